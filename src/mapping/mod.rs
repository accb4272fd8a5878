//! Mapping rule compilation
//!
//! Turns a transformation's raw `TARGET<TAB>SOURCE` entries into the
//! runtime's three tiers:
//!
//! - **Preconditions**: containers that must exist before children are
//!   written. Explicit ones come from the archive; the rest are synthesized
//!   from the ancestors of every leaf target, shallowest first.
//! - **Leaf mappings**: one value written to one childless target node.
//! - **Loop bindings**: repeating source node -> repeating target node.

pub mod classify;
pub mod source_paths;

pub use classify::{classify, is_open_loop, EntryKind};
pub use source_paths::{field_reference, SourcePathExtractor};

use tracing::debug;

use crate::config::{EngineConfig, SchemaDefaults};
use crate::entity::RawMapping;
use crate::model::{FieldNode, LoopBinding, MappingRule, SchemaDocument, SchemaRole};
use crate::path::{strip_brackets, to_native_script, PathTranslator};

/// Leaf mapping removed because its target is not a leaf of the target schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedMapping {
    pub target_path: String,
    pub reason: &'static str,
}

/// Output of [`MappingRuleCompiler::compile`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledMappings {
    /// Preconditions (shallowest first) followed by leaf mappings
    pub rules: Vec<MappingRule>,
    pub loops: Vec<LoopBinding>,
    pub dropped: Vec<DroppedMapping>,
}

impl CompiledMappings {
    pub fn preconditions(&self) -> impl Iterator<Item = &MappingRule> {
        self.rules.iter().filter(|r| r.is_precondition)
    }

    pub fn leaves(&self) -> impl Iterator<Item = &MappingRule> {
        self.rules.iter().filter(|r| !r.is_precondition)
    }
}

/// Compiles the raw entries of one transformation
pub struct MappingRuleCompiler<'a> {
    translator: &'a PathTranslator<'a>,
    extractor: SourcePathExtractor<'a>,
    defaults: &'a SchemaDefaults,
    prescript_marker: &'a str,
}

impl<'a> MappingRuleCompiler<'a> {
    pub fn new(config: &'a EngineConfig, translator: &'a PathTranslator<'a>) -> Self {
        Self {
            translator,
            extractor: SourcePathExtractor::new(&config.translation),
            defaults: &config.schemas,
            prescript_marker: &config.translation.prescript_marker,
        }
    }

    /// Compile `entries` against the (possibly unknown) target schema
    pub fn compile(&self, entries: &[RawMapping], target: Option<&SchemaDocument>) -> CompiledMappings {
        let flat = target.map_or(false, SchemaDocument::is_flat);
        let mut explicit: Vec<MappingRule> = Vec::new();
        let mut leaves: Vec<MappingRule> = Vec::new();
        let mut loops: Vec<LoopBinding> = Vec::new();
        let mut dropped = Vec::new();

        for entry in entries {
            let Some(raw_target) = entry.target.as_deref() else {
                continue;
            };
            if is_open_loop(raw_target) {
                loops.push(self.loop_binding(raw_target, &entry.source));
            }

            let kind = classify(entry);
            if matches!(kind, EntryKind::Skip | EntryKind::LoopHint) {
                continue;
            }

            let Some(rule) = self.rule(entry, raw_target, kind, target.filter(|_| flat)) else {
                continue;
            };

            if rule.is_precondition {
                if !explicit.iter().any(|p| p.target_path == rule.target_path) {
                    explicit.push(rule);
                }
                continue;
            }

            if let Some(doc) = target.filter(|d| d.has_structure() && !d.is_flat()) {
                if let Err(reason) = self.check_leaf(&doc.root, &rule.target_path) {
                    debug!("Dropping mapping to {}: {}", rule.target_path, reason);
                    dropped.push(DroppedMapping {
                        target_path: rule.target_path,
                        reason,
                    });
                    continue;
                }
            }
            leaves.push(rule);
        }

        let mut preconditions = explicit;
        if !flat {
            let synthesized = synthesize_preconditions(&leaves, &preconditions);
            preconditions.extend(synthesized);
        }
        preconditions.sort_by_key(MappingRule::depth);

        loops.sort_by_key(|l| l.target_loop_path.matches(['$', '.']).count());
        let mut unique: Vec<LoopBinding> = Vec::with_capacity(loops.len());
        for binding in loops {
            if !unique.contains(&binding) {
                unique.push(binding);
            }
        }

        preconditions.extend(leaves);
        CompiledMappings {
            rules: preconditions,
            loops: unique,
            dropped,
        }
    }

    fn rule(
        &self,
        entry: &RawMapping,
        raw_target: &str,
        kind: EntryKind,
        flat_target: Option<&SchemaDocument>,
    ) -> Option<MappingRule> {
        let mut is_precondition = kind == EntryKind::Precondition;

        let (target_path, target_script) = match flat_target {
            Some(doc) => self.flat_target(raw_target, doc),
            None => {
                let mut path = self.translator.to_output_path(raw_target, SchemaRole::Target);
                if let Some(stripped) = strip_marker_path(&path, self.prescript_marker) {
                    path = stripped;
                    if entry.scripted && !entry.source.trim().is_empty() {
                        is_precondition = true;
                    }
                }
                let native = strip_marker_script(strip_brackets(raw_target), self.prescript_marker);
                let script = self.translator.translate_native_root(&native, SchemaRole::Target);
                (path, script)
            }
        };
        if target_path.is_empty() {
            return None;
        }

        let source_paths = if entry.scripted {
            self.extractor.extract_scripted(&entry.source)
        } else if is_precondition {
            None
        } else {
            self.extractor.extract(&entry.source)
        };

        let transform_script = if entry.scripted {
            format!("<trans>\n{}\n</trans>", entry.source)
        } else {
            String::new()
        };

        Some(MappingRule {
            target_path,
            target_script,
            transform_script,
            source_paths,
            is_precondition,
        })
    }

    /// Target path and script for an entry writing to a flat schema.
    ///
    /// A known field keeps its name; the `data` pseudo-field and any other
    /// single-segment name land on the resolved field.
    fn flat_target(&self, raw_target: &str, doc: &SchemaDocument) -> (String, String) {
        let root = &self.defaults.flat_root;
        let path = self.translator.to_output_path(raw_target, SchemaRole::Target);
        if let Some(field) = path.strip_prefix(&format!("{}/", root)) {
            return (path.clone(), field.to_string());
        }

        let bare = strip_brackets(raw_target).trim_end_matches(['$', '.']);
        if doc.root.child(bare).is_some() {
            return (format!("{}/{}", root, bare), bare.to_string());
        }
        if bare == self.defaults.flat_pseudo_field || !path.contains('/') {
            let field = doc
                .root
                .children
                .first()
                .map_or(self.defaults.flat_default_field.as_str(), |c| c.name.as_str());
            return (format!("{}/{}", root, field), field.to_string());
        }
        let script = self
            .translator
            .translate_native_root(strip_brackets(raw_target), SchemaRole::Target);
        (path, script)
    }

    fn loop_binding(&self, raw_target: &str, source: &str) -> LoopBinding {
        LoopBinding {
            source_loop_path: strip_brackets(source).to_string(),
            target_loop_path: self
                .translator
                .translate_native_root(strip_brackets(raw_target), SchemaRole::Target),
            target_path: self.translator.to_output_path(raw_target, SchemaRole::Target),
        }
    }

    /// `Ok` when `path` names a childless node of `root`.
    ///
    /// The path may start at the root itself (under its canonical or runtime
    /// name) or directly at the root's children.
    fn check_leaf(&self, root: &FieldNode, path: &str) -> Result<(), &'static str> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let Some((first, rest)) = segments.split_first() else {
            return Err("empty target path");
        };

        let names_root = *first == root.name
            || self.translator.aliases().runtime_for(&root.name) == Some(*first)
            || self.translator.aliases().canonical_for(first) == Some(root.name.as_str());
        let node = if names_root {
            root.descend(rest.iter().copied())
        } else {
            root.descend(segments.iter().copied())
        };

        match node {
            None => Err("no such node in target schema"),
            Some(n) if !n.is_leaf() => Err("target is a container"),
            Some(_) => Ok(()),
        }
    }
}

/// Ancestors of every leaf target not already declared, in first-appearance
/// order. The second level is the main loop and takes the loop form.
fn synthesize_preconditions(leaves: &[MappingRule], explicit: &[MappingRule]) -> Vec<MappingRule> {
    let mut synthesized: Vec<MappingRule> = Vec::new();
    let declared = |path: &str, synthesized: &[MappingRule]| {
        explicit.iter().chain(synthesized).any(|p| p.target_path == path)
    };

    for leaf in leaves {
        let segments: Vec<&str> = leaf.target_path.split('/').filter(|s| !s.is_empty()).collect();
        for depth in 1..segments.len() {
            let path = segments[..depth].join("/");
            if declared(&path, &synthesized) {
                continue;
            }
            synthesized.push(MappingRule {
                target_script: to_native_script(&path, depth == 2),
                target_path: path,
                transform_script: String::new(),
                source_paths: None,
                is_precondition: true,
            });
        }
    }
    synthesized
}

/// `a//PRESCRIPT/` -> `a`; `None` when the path carries no trailing marker
fn strip_marker_path(path: &str, marker: &str) -> Option<String> {
    let trimmed = path.trim_end_matches('/');
    let head = trimmed.strip_suffix(marker)?;
    if !head.ends_with('/') {
        return None;
    }
    Some(head.trim_end_matches('/').to_string())
}

/// `invoices$/PRESCRIPT/` -> `invoices$`
fn strip_marker_script(native: &str, marker: &str) -> String {
    let trimmed = native.strip_suffix('/').unwrap_or(native);
    match trimmed
        .strip_suffix(marker)
        .and_then(|head| head.strip_suffix('/'))
    {
        Some(head) => format!("{}$", head.strip_suffix('$').unwrap_or(head)),
        None => native.to_string(),
    }
}
