//! Reference chain resolution
//!
//! Some sources carry no structure of their own. Their field list lives at
//! the end of a chain of cross-references:
//!
//! ```text
//! transformation --callId--> operation (body mentions the id)
//!                --query link property--> query entity
//!                --query_string--> SELECT <fields> FROM <object>
//! ```
//!
//! The archive has no structured index from call to operation, so the
//! operation bodies are indexed once per run by the id tokens they contain.
//! Ids that are not token-shaped fall back to a scan in listing order, which
//! is also what the index reproduces: the first operation that mentions the
//! id wins.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

use crate::archive::{entity_id, ArchiveReader, ProjectLayout};
use crate::entity::{entity_property, query_string};
use crate::model::{Direction, FieldNode, MaxOccurs, ReferenceChainLink};

static ID_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9A-Fa-f]{8}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{12}")
        .expect("valid regex")
});

static SELECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)SELECT\s+(.*?)\s+FROM\s+(\w+)").expect("valid regex"));

static BRACKETED: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[.*?\]").expect("valid regex"));

/// What the resolver needs to know about an indirect source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainDescriptor {
    pub call_id: String,
    /// Read from the role marker on the unit, never from the adapter
    pub direction: Direction,
}

/// Hop at which a chain stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainHop {
    /// Request-direction descriptors never go through the chain
    Direction,
    Call,
    Operation,
    QueryLink,
    Query,
    QueryText,
}

impl ChainHop {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direction => "direction",
            Self::Call => "call",
            Self::Operation => "operation",
            Self::QueryLink => "query_link",
            Self::Query => "query",
            Self::QueryText => "query_string",
        }
    }
}

impl fmt::Display for ChainHop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChainResolution {
    Resolved {
        root: FieldNode,
        link: ReferenceChainLink,
    },
    /// `link` holds every hop that did resolve
    Unresolved {
        link: ReferenceChainLink,
        hop: ChainHop,
    },
}

/// Parsed `SELECT ... FROM ...` text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFields {
    pub object_name: String,
    pub fields: Vec<String>,
}

impl QueryFields {
    /// Two-level tree: the object as root, one leaf per field (sorted, unique)
    pub fn to_tree(&self) -> FieldNode {
        let mut names: Vec<&str> = self.fields.iter().map(String::as_str).collect();
        names.sort_unstable();
        names.dedup();

        let mut root = FieldNode::new(self.object_name.as_str())
            .with_occurs(1, MaxOccurs::One)
            .with_children(
                names
                    .into_iter()
                    .map(|name| {
                        let mut leaf = FieldNode::leaf(name, "string");
                        leaf.nillable = true;
                        leaf
                    })
                    .collect(),
            );
        root.renumber();
        root
    }
}

/// Permissive `SELECT <fields> FROM <object>` reader.
///
/// Bracketed placeholders are removed and `--` comment entries dropped.
pub fn parse_query(text: &str) -> Option<QueryFields> {
    let captures = SELECT.captures(text)?;
    let fields = captures
        .get(1)?
        .as_str()
        .split(',')
        .map(|f| BRACKETED.replace_all(f.trim(), "").trim().to_string())
        .filter(|f| !f.is_empty() && !f.starts_with("--"))
        .collect();
    Some(QueryFields {
        object_name: captures.get(2)?.as_str().to_string(),
        fields,
    })
}

/// Follows call -> operation -> query chains for one run
pub struct ReferenceChainResolver<'a> {
    archive: &'a dyn ArchiveReader,
    layout: &'a ProjectLayout,
    operations: Option<OperationIndex>,
}

/// Operation bodies plus an id-token -> first operation index
#[derive(Debug, Default)]
struct OperationIndex {
    bodies: Vec<(String, String)>,
    by_token: HashMap<String, usize>,
}

impl OperationIndex {
    fn build(archive: &dyn ArchiveReader, layout: &ProjectLayout) -> Self {
        let mut index = Self::default();
        for path in layout.operations(archive) {
            let Ok(body) = archive.read_to_string(&path) else {
                debug!("Skipping unreadable operation {}", path);
                continue;
            };
            let position = index.bodies.len();
            for token in ID_TOKEN.find_iter(&body) {
                index
                    .by_token
                    .entry(token.as_str().to_string())
                    .or_insert(position);
            }
            index.bodies.push((entity_id(&path).to_string(), body));
        }
        debug!(
            "Indexed {} operations ({} id tokens)",
            index.bodies.len(),
            index.by_token.len()
        );
        index
    }

    /// Id of the first operation whose body mentions `call_id`
    fn find(&self, call_id: &str) -> Option<&str> {
        let is_token = ID_TOKEN
            .find(call_id)
            .map_or(false, |m| m.start() == 0 && m.end() == call_id.len());

        let position = if is_token {
            self.by_token.get(call_id).copied()
        } else {
            self.bodies.iter().position(|(_, body)| body.contains(call_id))
        }?;
        self.bodies.get(position).map(|(id, _)| id.as_str())
    }
}

impl<'a> ReferenceChainResolver<'a> {
    pub fn new(archive: &'a dyn ArchiveReader, layout: &'a ProjectLayout) -> Self {
        Self {
            archive,
            layout,
            operations: None,
        }
    }

    /// Follow the chain for `descriptor`. Never fails: a missing hop is
    /// reported as [`ChainResolution::Unresolved`].
    pub fn resolve(&mut self, descriptor: &ChainDescriptor) -> ChainResolution {
        let mut link = ReferenceChainLink {
            call_id: descriptor.call_id.clone(),
            ..ReferenceChainLink::default()
        };
        let unresolved = |link: ReferenceChainLink, hop: ChainHop| {
            debug!("Reference chain for {} stopped at {}", link.call_id, hop);
            ChainResolution::Unresolved { link, hop }
        };

        if descriptor.direction == Direction::Input {
            return unresolved(link, ChainHop::Direction);
        }
        if descriptor.call_id.trim().is_empty() {
            return unresolved(link, ChainHop::Call);
        }

        let (archive, layout) = (self.archive, self.layout);
        let operations = self
            .operations
            .get_or_insert_with(|| OperationIndex::build(archive, layout));
        let Some(operation_id) = operations.find(&descriptor.call_id).map(str::to_string) else {
            return unresolved(link, ChainHop::Operation);
        };
        link.operation_id = Some(operation_id.clone());

        let operation_path = layout.operation(&operation_id);
        let query_id = archive
            .read_to_string(&operation_path)
            .and_then(|xml| entity_property(&operation_path, &xml, layout.query_link_key()));
        let Ok(Some(query_id)) = query_id else {
            return unresolved(link, ChainHop::QueryLink);
        };
        link.query_id = Some(query_id.clone());

        let query_path = layout.query(&query_id);
        let text = archive
            .read_to_string(&query_path)
            .and_then(|xml| query_string(&query_path, &xml));
        let Ok(Some(text)) = text else {
            return unresolved(link, ChainHop::Query);
        };

        let Some(query) = parse_query(&text).filter(|q| !q.fields.is_empty()) else {
            return unresolved(link, ChainHop::QueryText);
        };
        link.object_name = Some(query.object_name.clone());

        debug!(
            "Resolved call {} via operation {} to {} ({} fields)",
            link.call_id,
            operation_id,
            query.object_name,
            query.fields.len()
        );
        ChainResolution::Resolved {
            root: query.to_tree(),
            link,
        }
    }
}
