//! Diagnostics
//!
//! Collects everything a conversion could not settle on its own: unresolved
//! schema references, missing or corrupt structure, unreadable entities and
//! dropped mappings. A non-empty list means "needs manual review", never
//! "conversion failed".

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::StructureIssue;
use crate::model::SchemaRole;

// =============================================================================
// Reason Codes
// =============================================================================

/// Machine-diffable reason for a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    // === Linking ===
    /// A schema reference names no known schema
    SchemaNameNotFound,
    /// A schema reference carries an id belonging to another schema
    SchemaIdMismatch,

    // === Structure ===
    /// No source described the schema
    StructureUnavailable,
    /// A tree cache entry could not be decoded
    CorruptCache,
    /// The call -> operation -> query chain stopped early
    BrokenReferenceChain,

    // === Entities ===
    /// An entity file could not be parsed and was skipped
    EntityUnreadable,
    /// The archive has no project folder
    ProjectNotFound,

    // === Mappings ===
    /// A leaf mapping targeted a container or a missing node and was dropped
    MappingTargetNotLeaf,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SchemaNameNotFound => "SCHEMA_NAME_NOT_FOUND",
            Self::SchemaIdMismatch => "SCHEMA_ID_MISMATCH",
            Self::StructureUnavailable => "STRUCTURE_UNAVAILABLE",
            Self::CorruptCache => "CORRUPT_CACHE",
            Self::BrokenReferenceChain => "BROKEN_REFERENCE_CHAIN",
            Self::EntityUnreadable => "ENTITY_UNREADABLE",
            Self::ProjectNotFound => "PROJECT_NOT_FOUND",
            Self::MappingTargetNotLeaf => "MAPPING_TARGET_NOT_LEAF",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::SchemaNameNotFound | Self::SchemaIdMismatch | Self::EntityUnreadable => {
                Severity::Error
            }

            Self::StructureUnavailable
            | Self::CorruptCache
            | Self::BrokenReferenceChain
            | Self::ProjectNotFound
            | Self::MappingTargetNotLeaf => Severity::Warning,
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&StructureIssue> for ReasonCode {
    fn from(issue: &StructureIssue) -> Self {
        match issue {
            StructureIssue::Unavailable => Self::StructureUnavailable,
            StructureIssue::CorruptCache { .. } => Self::CorruptCache,
            StructureIssue::BrokenChain { .. } => Self::BrokenReferenceChain,
        }
    }
}

// =============================================================================
// Severity
// =============================================================================

/// Diagnostic severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

// =============================================================================
// Diagnostic Item
// =============================================================================

/// One `(transformation, role, schema, reason)` record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticItem {
    /// Transformation name, or the entity path when no name is known
    pub transformation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<SchemaRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_name: Option<String>,
    pub code: ReasonCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<String>,
}

impl DiagnosticItem {
    pub fn new(
        transformation: impl Into<String>,
        code: ReasonCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            transformation: transformation.into(),
            role: None,
            schema_name: None,
            code,
            message: message.into(),
            context: Vec::new(),
        }
    }

    pub fn for_schema(mut self, role: SchemaRole, schema_name: impl Into<String>) -> Self {
        self.role = Some(role);
        self.schema_name = Some(schema_name.into());
        self
    }

    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context.push(ctx.into());
        self
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }
}

impl fmt::Display for DiagnosticItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {} ({}",
            self.code,
            self.code.severity(),
            self.message,
            self.transformation
        )?;
        if let Some(role) = self.role {
            write!(f, " / {}", role)?;
        }
        if let Some(schema) = &self.schema_name {
            write!(f, " / {}", schema)?;
        }
        write!(f, ")")?;

        for ctx in &self.context {
            write!(f, "\n  - {}", ctx)?;
        }

        Ok(())
    }
}

// =============================================================================
// Diagnostics Collection
// =============================================================================

/// Collection of diagnostics from one conversion
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diagnostics {
    items: Vec<DiagnosticItem>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a diagnostic item
    pub fn push(&mut self, item: DiagnosticItem) {
        self.items.push(item);
    }

    /// Reference to a schema name that no schema carries
    pub fn schema_name_not_found(&mut self, transformation: &str, role: SchemaRole, name: &str) {
        self.push(
            DiagnosticItem::new(
                transformation,
                ReasonCode::SchemaNameNotFound,
                format!("{} schema '{}' matches no converted schema", role, name),
            )
            .for_schema(role, name),
        );
    }

    /// Reference whose id belongs to a differently-named schema
    pub fn schema_id_mismatch(
        &mut self,
        transformation: &str,
        role: SchemaRole,
        name: &str,
        id: &str,
    ) {
        self.push(
            DiagnosticItem::new(
                transformation,
                ReasonCode::SchemaIdMismatch,
                format!("{} schema '{}' carries an id owned by another schema", role, name),
            )
            .for_schema(role, name)
            .with_context(format!("id: {}", id)),
        );
    }

    /// Structure problem recorded while loading a schema
    pub fn structure_issue(
        &mut self,
        transformation: &str,
        role: SchemaRole,
        name: &str,
        issue: &StructureIssue,
    ) {
        self.push(
            DiagnosticItem::new(transformation, ReasonCode::from(issue), issue.to_string())
                .for_schema(role, name),
        );
    }

    /// Entity skipped because it could not be read
    pub fn entity_unreadable(&mut self, path: &str, reason: impl fmt::Display) {
        self.push(DiagnosticItem::new(
            path,
            ReasonCode::EntityUnreadable,
            reason.to_string(),
        ));
    }

    /// Leaf mapping dropped because its target is not a leaf
    pub fn mapping_target_not_leaf(
        &mut self,
        transformation: &str,
        schema: &str,
        target_path: &str,
        reason: &str,
    ) {
        self.push(
            DiagnosticItem::new(
                transformation,
                ReasonCode::MappingTargetNotLeaf,
                format!("mapping to '{}' dropped: {}", target_path, reason),
            )
            .for_schema(SchemaRole::Target, schema),
        );
    }

    /// Check if there are any errors
    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|i| i.severity() == Severity::Error)
    }

    /// Get all errors
    pub fn errors(&self) -> impl Iterator<Item = &DiagnosticItem> {
        self.items.iter().filter(|i| i.severity() == Severity::Error)
    }

    /// Get all warnings
    pub fn warnings(&self) -> impl Iterator<Item = &DiagnosticItem> {
        self.items.iter().filter(|i| i.severity() == Severity::Warning)
    }

    /// Items carrying `code`
    pub fn with_code(&self, code: ReasonCode) -> impl Iterator<Item = &DiagnosticItem> {
        self.items.iter().filter(move |i| i.code == code)
    }

    /// Get all items
    pub fn all(&self) -> &[DiagnosticItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings().count()
    }

    /// Merge another Diagnostics into this one
    pub fn merge(&mut self, other: Diagnostics) {
        self.items.extend(other.items);
    }

    /// Format all diagnostics for display
    pub fn format_all(&self) -> String {
        let mut output = String::new();

        for item in &self.items {
            output.push_str(&format!("{}\n", item));
        }

        if !self.is_empty() {
            output.push_str(&format!(
                "\n{} error(s), {} warning(s) need review\n",
                self.error_count(),
                self.warning_count()
            ));
        }

        output
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_all())
    }
}

impl IntoIterator for Diagnostics {
    type Item = DiagnosticItem;
    type IntoIter = std::vec::IntoIter<DiagnosticItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a DiagnosticItem;
    type IntoIter = std::slice::Iter<'a, DiagnosticItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_severity() {
        assert_eq!(ReasonCode::SchemaNameNotFound.severity(), Severity::Error);
        assert_eq!(ReasonCode::CorruptCache.severity(), Severity::Warning);
    }

    #[test]
    fn test_diagnostics_collection() {
        let mut diags = Diagnostics::new();
        diags.schema_name_not_found("Contacts to NetSuite", SchemaRole::Source, "Contacts");
        diags.structure_issue(
            "Contacts to NetSuite",
            SchemaRole::Target,
            "netsuite_Upsert_input_x",
            &StructureIssue::Unavailable,
        );

        assert_eq!(diags.error_count(), 1);
        assert_eq!(diags.warning_count(), 1);
        assert_eq!(diags.with_code(ReasonCode::StructureUnavailable).count(), 1);
        assert!(diags.has_errors());
    }

    #[test]
    fn test_item_display_and_serialization() {
        let item = DiagnosticItem::new("T", ReasonCode::SchemaIdMismatch, "bad id")
            .for_schema(SchemaRole::Target, "S")
            .with_context("id: 1");
        assert_eq!(
            item.to_string(),
            "[SCHEMA_ID_MISMATCH] error: bad id (T / target / S)\n  - id: 1"
        );

        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["code"], "SCHEMA_ID_MISMATCH");
        assert_eq!(json["schemaName"], "S");
        assert_eq!(json["role"], "target");
    }

    #[test]
    fn test_issue_codes() {
        let broken = StructureIssue::BrokenChain {
            hop: "operation".into(),
        };
        assert_eq!(ReasonCode::from(&broken), ReasonCode::BrokenReferenceChain);
    }
}
