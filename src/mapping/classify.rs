//! Raw mapping classification

use crate::entity::RawMapping;
use crate::path::strip_brackets;

/// What a raw mapping entry compiles into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Declares that a container must exist before its children are written
    Precondition,
    LeafMapping,
    /// Repeating-node correspondence; becomes a loop binding, never a rule
    LoopHint,
    Skip,
}

/// Classify one entry.
///
/// A target written as an open loop (`[a$b.]`) fed by an unscripted source
/// that is itself an open loop path is a loop hint. Any other target ending
/// in `.` is a precondition.
pub fn classify(entry: &RawMapping) -> EntryKind {
    let Some(target) = entry.target.as_deref() else {
        return EntryKind::Skip;
    };
    let cleaned = strip_brackets(target);
    if cleaned.is_empty() {
        return EntryKind::Skip;
    }

    if is_open_loop(target) && !entry.scripted && strip_brackets(&entry.source).ends_with('.') {
        return EntryKind::LoopHint;
    }
    if cleaned.ends_with('.') {
        EntryKind::Precondition
    } else {
        EntryKind::LeafMapping
    }
}

/// Raw target written as `[...$node.]`
pub fn is_open_loop(target: &str) -> bool {
    target.trim().ends_with(".]")
}
