//! Error types for archive conversion
//!
//! Only [`ConvertError::MalformedArchive`] (a container that cannot be
//! opened) and configuration errors abort a conversion. Every other kind is
//! recoverable and is downgraded to a [`StructureIssue`] or a diagnostic at
//! the entity boundary.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for conversion operations
pub type Result<T> = std::result::Result<T, ConvertError>;

/// Conversion errors
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("Malformed archive: {0}")]
    MalformedArchive(String),

    #[error("Corrupt tree cache {path}: {reason}")]
    CorruptCache { path: String, reason: String },

    #[error("No structure available for schema {0}")]
    StructureUnavailable(String),

    #[error("Reference chain broken at {hop} for call {call_id}")]
    BrokenReferenceChain { call_id: String, hop: String },

    #[error("Unresolved schema reference {schema} in {transformation}")]
    UnresolvedSchemaReference { transformation: String, schema: String },

    #[error("Entity {path} could not be read: {reason}")]
    Entity { path: String, reason: String },

    #[error("Archive entry not found: {0}")]
    EntryNotFound(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config_crate::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConvertError {
    /// Whether the error must abort the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MalformedArchive(_) | Self::Config(_))
    }

    pub fn entity(path: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Entity {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn corrupt(path: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::CorruptCache {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Recoverable structure problem recorded against one schema role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StructureIssue {
    /// No source (XSD, document, cache, chain) described the schema
    Unavailable,
    /// A cache entry existed but could not be decoded
    CorruptCache { path: String, reason: String },
    /// The reference chain stopped at `hop`
    BrokenChain { hop: String },
}

impl fmt::Display for StructureIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable => write!(f, "no structure source found"),
            Self::CorruptCache { path, reason } => {
                write!(f, "corrupt cache {}: {}", path, reason)
            }
            Self::BrokenChain { hop } => write!(f, "reference chain broken at {}", hop),
        }
    }
}

impl ConvertError {
    /// The recoverable issue this error downgrades to, if any
    pub fn as_issue(&self) -> Option<StructureIssue> {
        match self {
            ConvertError::CorruptCache { path, reason } => Some(StructureIssue::CorruptCache {
                path: path.clone(),
                reason: reason.clone(),
            }),
            ConvertError::StructureUnavailable(_) => Some(StructureIssue::Unavailable),
            ConvertError::BrokenReferenceChain { hop, .. } => {
                Some(StructureIssue::BrokenChain { hop: hop.clone() })
            }
            _ => None,
        }
    }
}
