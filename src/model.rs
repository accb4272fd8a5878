//! Conversion data model
//!
//! Field trees serialize in the runtime's compact notation (`N`, `MN`, `MX`,
//! `C`, ...); everything else uses the runtime's camelCase keys so a
//! [`ConversionOutput`](crate::ConversionOutput) can be diffed directly
//! against a reference project.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::StructureIssue;

// =============================================================================
// Field Tree
// =============================================================================

/// Upper occurrence bound of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MaxOccurs {
    #[default]
    One,
    Bounded(u32),
    Unbounded,
}

impl MaxOccurs {
    /// Parse the archive notations: `-1`, `unbounded`, or a count
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw == "-1" || raw.eq_ignore_ascii_case("unbounded") {
            return Some(Self::Unbounded);
        }
        match raw.parse::<u32>().ok()? {
            1 => Some(Self::One),
            n => Some(Self::Bounded(n)),
        }
    }

    pub fn is_repeating(&self) -> bool {
        match self {
            Self::One => false,
            Self::Bounded(n) => *n > 1,
            Self::Unbounded => true,
        }
    }
}

impl Serialize for MaxOccurs {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::One => serializer.serialize_u32(1),
            Self::Bounded(n) => serializer.serialize_u32(*n),
            Self::Unbounded => serializer.serialize_str("unbounded"),
        }
    }
}

impl<'de> Deserialize<'de> for MaxOccurs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Count(i64),
            Text(String),
        }

        let parsed = match Raw::deserialize(deserializer)? {
            Raw::Count(-1) => Some(Self::Unbounded),
            Raw::Count(n) => u32::try_from(n).ok().and_then(|n| Self::parse(&n.to_string())),
            Raw::Text(s) => Self::parse(&s),
        };
        parsed.ok_or_else(|| serde::de::Error::custom("invalid max occurs"))
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// One node of a schema's field hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldNode {
    #[serde(rename = "N")]
    pub name: String,

    #[serde(rename = "NS", default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(rename = "MN", default)]
    pub min_occurs: u32,

    #[serde(rename = "MX", default)]
    pub max_occurs: MaxOccurs,

    #[serde(rename = "T", default, skip_serializing_if = "Option::is_none")]
    pub type_tag: Option<String>,

    #[serde(rename = "NIL", default, skip_serializing_if = "is_false")]
    pub nillable: bool,

    #[serde(rename = "ATR", default, skip_serializing_if = "is_false")]
    pub is_attribute: bool,

    #[serde(rename = "DV", default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,

    /// Ordinal among siblings (root is 0, children start at 1)
    #[serde(rename = "I", default)]
    pub index: u32,

    /// Nesting depth (root is 0)
    #[serde(rename = "L", default)]
    pub level: u32,

    /// Ordered children; order participates in equality
    #[serde(rename = "C", default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FieldNode>,
}

impl FieldNode {
    /// Optional single-valued node with no children
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            min_occurs: 0,
            max_occurs: MaxOccurs::One,
            type_tag: None,
            nillable: false,
            is_attribute: false,
            default_value: None,
            index: 0,
            level: 0,
            children: Vec::new(),
        }
    }

    /// Leaf carrying a value type
    pub fn leaf(name: impl Into<String>, type_tag: &str) -> Self {
        let mut node = Self::new(name);
        node.type_tag = Some(type_tag.to_string());
        node
    }

    pub fn with_occurs(mut self, min: u32, max: MaxOccurs) -> Self {
        self.min_occurs = min;
        self.max_occurs = max;
        self
    }

    pub fn with_children(mut self, children: Vec<FieldNode>) -> Self {
        self.children = children;
        self
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn child(&self, name: &str) -> Option<&FieldNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Walk `segments` downwards starting at this node's children
    pub fn descend<'a, I>(&self, segments: I) -> Option<&FieldNode>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut current = self;
        for segment in segments {
            current = current.child(segment)?;
        }
        Some(current)
    }

    /// Total node count including this node
    pub fn field_count(&self) -> usize {
        1 + self.children.iter().map(FieldNode::field_count).sum::<usize>()
    }

    /// Assign sibling ordinals and nesting levels from this node down
    pub fn renumber(&mut self) {
        self.index = 0;
        self.level = 0;
        Self::renumber_children(self);
    }

    fn renumber_children(node: &mut FieldNode) {
        let level = node.level + 1;
        for (i, child) in node.children.iter_mut().enumerate() {
            child.index = i as u32 + 1;
            child.level = level;
            Self::renumber_children(child);
        }
    }

    /// Remove every descendant whose name contains `marker`
    pub fn remove_marked(&mut self, marker: &str) {
        self.children.retain(|c| !c.name.contains(marker));
        for child in &mut self.children {
            child.remove_marked(marker);
        }
    }

    /// Slash paths of every leaf below this node (root name included)
    pub fn leaf_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_leaf_paths(String::new(), &mut out);
        out
    }

    fn collect_leaf_paths(&self, prefix: String, out: &mut Vec<String>) {
        let path = if prefix.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", prefix, self.name)
        };
        if self.children.is_empty() {
            out.push(path);
        } else {
            for child in &self.children {
                child.collect_leaf_paths(path.clone(), out);
            }
        }
    }
}

// =============================================================================
// Schemas
// =============================================================================

/// Request (input) or response (output) side of a connector call
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to an externally-backed schema
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Origin {
    pub adapter_id: String,
    pub function_name: String,
    pub direction: Direction,
    /// Correlation id of the connector call
    pub id: String,
}

impl Origin {
    /// `{adapter}_{Function}_{direction}_{id}`
    pub fn schema_name(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.adapter_id,
            capitalize(&self.function_name),
            self.direction,
            self.id
        )
    }
}

pub(crate) fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(|c| c.to_lowercase()))
            .collect(),
        None => String::new(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    #[default]
    Tree,
    Flat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchemaFormat {
    #[default]
    Xml,
    Csv,
}

/// Which archive mechanism supplied a schema's structure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Xsd,
    EmbeddedDocument,
    TreeCache,
    ConnectorCache,
    ReferenceChain,
    Unavailable,
}

/// Identity under which schemas are deduplicated
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IdentityKey {
    Origin {
        correlation_id: String,
        direction: Direction,
    },
    Name(String),
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Origin {
                correlation_id,
                direction,
            } => write!(f, "{}:{}", correlation_id, direction),
            Self::Name(name) => write!(f, "{}", name),
        }
    }
}

/// A schema with its recovered field tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub name: String,

    pub root: FieldNode,

    #[serde(default)]
    pub layout: Layout,

    #[serde(default)]
    pub format: SchemaFormat,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<Origin>,

    /// Id native to the archive (call id, document id), preferred by the linker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_id: Option<String>,

    pub provenance: Provenance,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue: Option<StructureIssue>,
}

impl SchemaDocument {
    /// Empty-but-named document for a schema whose structure is unknown
    pub fn unavailable(name: impl Into<String>, root_name: &str, issue: StructureIssue) -> Self {
        Self {
            id: None,
            name: name.into(),
            root: FieldNode::new(root_name),
            layout: Layout::Tree,
            format: SchemaFormat::Xml,
            origin: None,
            native_id: None,
            provenance: Provenance::Unavailable,
            issue: Some(issue),
        }
    }

    pub fn is_flat(&self) -> bool {
        self.layout == Layout::Flat
    }

    /// Whether any fields were recovered
    pub fn has_structure(&self) -> bool {
        !self.root.children.is_empty()
    }

    pub fn identity_key(&self) -> IdentityKey {
        match &self.origin {
            Some(origin) => IdentityKey::Origin {
                correlation_id: origin.id.clone(),
                direction: origin.direction,
            },
            None => IdentityKey::Name(self.name.clone()),
        }
    }
}

/// Schema reference attached to a transformation's source or target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaRef {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<Origin>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<SchemaDocument>,
}

impl SchemaRef {
    pub fn identity_key(&self) -> IdentityKey {
        match &self.origin {
            Some(origin) => IdentityKey::Origin {
                correlation_id: origin.id.clone(),
                direction: origin.direction,
            },
            None => IdentityKey::Name(self.name.clone()),
        }
    }
}

/// Source or target side of a transformation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaRole {
    Source,
    Target,
}

impl SchemaRole {
    /// Tree-cache direction suffix for this role
    pub fn cache_direction(&self) -> Direction {
        match self {
            Self::Source => Direction::Input,
            Self::Target => Direction::Output,
        }
    }
}

impl fmt::Display for SchemaRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Target => write!(f, "target"),
        }
    }
}

// =============================================================================
// Mappings
// =============================================================================

/// One compiled mapping rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingRule {
    /// Slash-form output path
    pub target_path: String,

    /// Native-notation target
    pub target_script: String,

    pub transform_script: String,

    /// `None` means "not a field copy"; `Some(vec![])` means a field copy with
    /// no schema-relative reference left
    #[serde(rename = "srcPaths")]
    pub source_paths: Option<Vec<String>>,

    #[serde(rename = "isPreconditionScript")]
    pub is_precondition: bool,
}

impl MappingRule {
    pub fn depth(&self) -> usize {
        self.target_path.matches('/').count()
    }
}

/// Correspondence between a repeating source node and a repeating target node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LoopBinding {
    #[serde(rename = "srcLoopPath")]
    pub source_loop_path: String,

    #[serde(rename = "tgtLoopPath")]
    pub target_loop_path: String,

    /// Slash form of the target loop
    #[serde(rename = "tgtPath")]
    pub target_path: String,
}

/// Call -> Operation -> Query hops followed for an indirect source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceChainLink {
    pub call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_name: Option<String>,
}

/// A converted transformation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformationUnit {
    pub id: String,

    /// Id of the transformation entity inside the archive
    pub legacy_id: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SchemaRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<SchemaRef>,

    pub mapping_rules: Vec<MappingRule>,

    pub loop_mapping_rules: Vec<LoopBinding>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<ReferenceChainLink>,
}

impl TransformationUnit {
    pub fn schema_ref(&self, role: SchemaRole) -> Option<&SchemaRef> {
        match role {
            SchemaRole::Source => self.source.as_ref(),
            SchemaRole::Target => self.target.as_ref(),
        }
    }

    pub fn schema_ref_mut(&mut self, role: SchemaRole) -> Option<&mut SchemaRef> {
        match role {
            SchemaRole::Source => self.source.as_mut(),
            SchemaRole::Target => self.target.as_mut(),
        }
    }

    /// Every source path referenced by a non-precondition rule
    pub fn source_paths(&self) -> impl Iterator<Item = &str> {
        self.mapping_rules
            .iter()
            .filter(|r| !r.is_precondition)
            .filter_map(|r| r.source_paths.as_ref())
            .flatten()
            .map(String::as_str)
    }

    /// Target paths of every leaf rule
    pub fn leaf_target_paths(&self) -> impl Iterator<Item = &str> {
        self.mapping_rules
            .iter()
            .filter(|r| !r.is_precondition)
            .map(|r| r.target_path.as_str())
    }
}
