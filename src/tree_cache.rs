//! Tree cache codec
//!
//! The archive keeps pre-computed structure snapshots as gzip-compressed XML.
//! Three dialects exist:
//!
//! - **Type library**: `ElementType` definitions wrapping a `CROM` body, plus
//!   top-level `CROM` document roots. A node with no direct children takes
//!   its children from the definition named by its `Xml Type`.
//! - **Flat** (`JTR Type="Text"`): every named `CROM` is one field.
//! - **Compact**: the node notation itself (`N`, `MN`, `MX`, `C`, ...), as
//!   written by connector calls.
//!
//! [`decode`] only parses. Root resolution against the type library happens
//! in [`TypeLibrary::resolve_root`], once the caller knows which root it wants.

use flate2::read::GzDecoder;
use roxmltree::{Document, Node};
use std::collections::{HashMap, HashSet};
use std::io::Read;
use thiserror::Error;

use crate::model::{FieldNode, MaxOccurs};

/// Why a cache entry could not be decoded
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct CorruptCache(pub String);

/// A decoded cache entry
#[derive(Debug, Clone, PartialEq)]
pub enum TreeCache {
    TypeLibrary(TypeLibrary),
    Flat(FlatFieldList),
    Compact(FieldNode),
}

/// Field names of a flat cache, in document order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlatFieldList {
    pub fields: Vec<String>,
}

/// Raw `CROM` element before type substitution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CromNode {
    pub name: Option<String>,
    /// Hex node kind code (`0x1`, `0x9`, ...)
    pub type_code: Option<String>,
    /// Name of the type definition this node instantiates
    pub xml_type: Option<String>,
    pub min: Option<String>,
    pub max: Option<String>,
    pub namespace: Option<String>,
    /// Numeric value-type code from the node's own `Attr`
    pub value_type: Option<String>,
    pub children: Vec<CromNode>,
}

/// Named reusable type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDefinition {
    pub id: String,
    pub body: CromNode,
}

/// Type definitions plus the declared document roots
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeLibrary {
    pub types: Vec<TypeDefinition>,
    pub roots: Vec<CromNode>,
}

// =============================================================================
// Decoding
// =============================================================================

/// Decompress and parse one cache entry
pub fn decode(raw: &[u8]) -> Result<TreeCache, CorruptCache> {
    if raw.is_empty() {
        return Err(CorruptCache("empty entry".to_string()));
    }

    let mut xml = String::new();
    GzDecoder::new(raw)
        .read_to_string(&mut xml)
        .map_err(|e| CorruptCache(format!("gzip: {}", e)))?;
    if xml.trim().is_empty() {
        return Err(CorruptCache("empty document".to_string()));
    }

    let doc = Document::parse(&xml).map_err(|e| CorruptCache(format!("xml: {}", e)))?;
    let root = doc.root_element();

    if root.has_tag_name("JTR") && root.attribute("Type") == Some("Text") {
        return Ok(TreeCache::Flat(FlatFieldList {
            fields: root
                .descendants()
                .filter(|n| n.has_tag_name("CROM"))
                .filter_map(|n| n.attribute("Name"))
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect(),
        }));
    }

    if element(root, "N").is_some() {
        return compact_node(root)
            .map(TreeCache::Compact)
            .ok_or_else(|| CorruptCache("compact root has no name".to_string()));
    }

    let types = root
        .descendants()
        .filter(|n| n.has_tag_name("ElementType"))
        .filter_map(|n| {
            let id = n.attribute("Name")?.to_string();
            let body = element(n, "CROM")?;
            Some(TypeDefinition {
                id,
                body: crom_node(body),
            })
        })
        .collect();
    let roots = root
        .children()
        .filter(|n| n.has_tag_name("CROM"))
        .map(crom_node)
        .collect();

    Ok(TreeCache::TypeLibrary(TypeLibrary { types, roots }))
}

fn element<'a, 'input>(node: Node<'a, 'input>, tag: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name(tag))
}

fn text_of(node: Node<'_, '_>, tag: &str) -> Option<String> {
    element(node, tag)
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// `Attr` belonging to this node, not to a nested `CROM`
fn own_attr<'a, 'input>(node: Node<'a, 'input>) -> Option<Node<'a, 'input>> {
    let mut stack: Vec<Node<'a, 'input>> = node.children().filter(|n| n.is_element()).collect();
    stack.reverse();
    while let Some(current) = stack.pop() {
        if current.has_tag_name("Attr") {
            return Some(current);
        }
        if current.has_tag_name("CROM") {
            continue;
        }
        let mut nested: Vec<_> = current.children().filter(|n| n.is_element()).collect();
        nested.reverse();
        stack.extend(nested);
    }
    None
}

fn crom_node(node: Node<'_, '_>) -> CromNode {
    let xml = element(node, "Xml");
    let xml_attr = |name: &str| xml.and_then(|x| non_empty(x.attribute(name)));

    CromNode {
        name: non_empty(node.attribute("Name")),
        type_code: non_empty(node.attribute("Type")),
        xml_type: xml_attr("Type"),
        min: xml_attr("Min"),
        max: xml_attr("Max"),
        namespace: xml_attr("NS"),
        value_type: own_attr(node).and_then(|a| non_empty(a.attribute("ValType"))),
        children: node
            .children()
            .filter(|n| n.has_tag_name("CROM"))
            .filter(|n| !n.attribute("Name").map_or(false, |name| name.starts_with("xsi:")))
            .map(crom_node)
            .collect(),
    }
}

fn compact_node(node: Node<'_, '_>) -> Option<FieldNode> {
    let mut field = FieldNode::new(text_of(node, "N")?);
    field.namespace = text_of(node, "NS");
    field.min_occurs = text_of(node, "MN")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    field.max_occurs = text_of(node, "MX")
        .map(|v| MaxOccurs::parse(&v).unwrap_or(MaxOccurs::One))
        .unwrap_or_default();
    field.type_tag = text_of(node, "T");
    field.nillable = text_of(node, "NIL").map_or(false, |v| v.eq_ignore_ascii_case("true"));
    field.is_attribute = text_of(node, "ATR").map_or(false, |v| v.eq_ignore_ascii_case("true"));
    field.default_value = text_of(node, "DV");
    field.index = text_of(node, "I").and_then(|v| v.parse().ok()).unwrap_or(0);
    field.level = text_of(node, "L").and_then(|v| v.parse().ok()).unwrap_or(0);
    field.children = node
        .children()
        .filter(|n| n.has_tag_name("C"))
        .filter_map(compact_node)
        .collect();
    Some(field)
}

// =============================================================================
// Root Resolution
// =============================================================================

/// Occurrence bounds implied by a node kind code
fn occurs_for_code(code: Option<&str>) -> (u32, MaxOccurs) {
    match code {
        Some("0x1") => (1, MaxOccurs::One),
        Some("0x9") => (0, MaxOccurs::Unbounded),
        Some("0x21") => (1, MaxOccurs::One),
        Some("0x24") => (0, MaxOccurs::One),
        _ => (0, MaxOccurs::One),
    }
}

/// Value type name for an `Attr ValType` code
fn value_type(code: &str) -> &'static str {
    match code {
        "4" => "int",
        "5" => "double",
        "6" => "boolean",
        "7" => "date",
        _ => "string",
    }
}

/// Strip a `{namespace}` prefix
fn local_name(name: &str) -> &str {
    name.rsplit('}').next().unwrap_or(name)
}

impl TypeLibrary {
    /// Type definitions keyed by id and by the body's own `Xml Type`
    fn index(&self) -> HashMap<&str, &CromNode> {
        let mut index = HashMap::new();
        for def in &self.types {
            index.insert(def.id.as_str(), &def.body);
            if let Some(xml_type) = def.body.xml_type.as_deref() {
                index.insert(xml_type, &def.body);
            }
        }
        index
    }

    /// Build the tree rooted at `root_name`.
    ///
    /// Without a name the first named top-level node is used, falling back
    /// to the first type body. Returns `None` when nothing matches.
    pub fn resolve_root(&self, root_name: Option<&str>) -> Option<FieldNode> {
        let index = self.index();

        let start = match root_name.map(local_name) {
            Some(wanted) => self
                .roots
                .iter()
                .find(|c| c.name.as_deref() == Some(wanted))
                .or_else(|| {
                    self.types
                        .iter()
                        .map(|t| &t.body)
                        .find(|b| b.name.as_deref() == Some(wanted))
                })?,
            None => self
                .roots
                .iter()
                .find(|c| c.name.is_some())
                .or_else(|| self.types.iter().map(|t| &t.body).find(|b| b.name.is_some()))?,
        };

        let mut expanding = HashSet::new();
        let mut root = build(start, &index, &mut expanding)?;
        root.renumber();
        Some(root)
    }
}

fn build<'a>(
    crom: &'a CromNode,
    index: &HashMap<&'a str, &'a CromNode>,
    expanding: &mut HashSet<&'a str>,
) -> Option<FieldNode> {
    let name = crom.name.as_deref()?;
    let mut node = FieldNode::new(name);
    node.namespace = crom.namespace.clone();

    let (min, max) = match (crom.min.as_deref(), crom.max.as_deref()) {
        (None, None) => occurs_for_code(crom.type_code.as_deref()),
        (min, max) => (
            min.and_then(|m| m.parse().ok()).unwrap_or(0),
            max.and_then(MaxOccurs::parse).unwrap_or_default(),
        ),
    };
    node.min_occurs = min;
    node.max_occurs = max;
    node.nillable = min == 0;
    node.type_tag = crom.value_type.as_deref().map(|c| value_type(c).to_string());

    // Direct children override whatever the referenced type declares
    if !crom.children.is_empty() {
        node.children = build_all(&crom.children, index, expanding);
    } else if let Some(xml_type) = crom.xml_type.as_deref() {
        if let Some(body) = index.get(xml_type).copied() {
            if expanding.insert(xml_type) {
                node.children = build_all(&body.children, index, expanding);
                expanding.remove(xml_type);
            }
        }
    }

    Some(node)
}

fn build_all<'a>(
    nodes: &'a [CromNode],
    index: &HashMap<&'a str, &'a CromNode>,
    expanding: &mut HashSet<&'a str>,
) -> Vec<FieldNode> {
    nodes
        .iter()
        .filter_map(|c| build(c, index, expanding))
        .collect()
}
