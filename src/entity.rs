//! Entity XML extraction
//!
//! Entities are small XML files: a `Header` (id, name, deleted flag), a
//! `Properties` block of key/value items, structure markers carrying
//! cross-reference ids, and, for transformations, the raw mapping entries.

use once_cell::sync::Lazy;
use regex::Regex;
use roxmltree::{Document, Node};
use std::collections::BTreeMap;

use crate::error::{ConvertError, Result};

static TRANS_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<trans>(.*?)</trans>").expect("valid regex"));

// =============================================================================
// Transformation
// =============================================================================

/// Cross-reference ids on an `InputStructure` / `OutputStructure` marker
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructureMarker {
    pub ws_call_id: Option<String>,
    pub call_id: Option<String>,
    pub call_type: Option<String>,
    pub doc_id: Option<String>,
}

impl StructureMarker {
    fn from_node(node: Node<'_, '_>) -> Self {
        let attr = |name: &str| {
            node.attribute(name)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        Self {
            ws_call_id: attr("wsCallId"),
            call_id: attr("callId"),
            call_type: attr("callType"),
            doc_id: attr("docId"),
        }
    }
}

/// One mapping entry as written in the archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMapping {
    /// Native target path; `None` when the entry has no target column
    pub target: Option<String>,
    /// Source expression, or the script body when `scripted`
    pub source: String,
    pub scripted: bool,
}

impl RawMapping {
    /// Split a `TARGET<TAB>SOURCE` expression
    pub fn parse(expr: &str) -> Self {
        let expr = expr.trim();
        let Some((target, source)) = expr.split_once('\t') else {
            return Self {
                target: None,
                source: expr.to_string(),
                scripted: false,
            };
        };

        let source = source.trim();
        if source.contains("<trans>") {
            let body = TRANS_BLOCK
                .captures(source)
                .and_then(|c| c.get(1))
                .map_or(source, |m| m.as_str());
            Self {
                target: Some(target.trim().to_string()),
                source: body.trim().to_string(),
                scripted: true,
            }
        } else {
            Self {
                target: Some(target.trim().to_string()),
                source: source.to_string(),
                scripted: false,
            }
        }
    }
}

/// A transformation entity
#[derive(Debug, Clone, Default)]
pub struct TransformationEntity {
    pub id: String,
    pub name: String,
    pub deleted: bool,
    pub properties: BTreeMap<String, String>,
    pub input: Option<StructureMarker>,
    pub output: Option<StructureMarker>,
    pub mappings: Vec<RawMapping>,
}

impl TransformationEntity {
    pub fn parse(path: &str, xml: &str) -> Result<Self> {
        let doc = Document::parse(xml).map_err(|e| ConvertError::entity(path, e))?;
        let root = doc.root_element();

        let header = child(root, "Header")
            .ok_or_else(|| ConvertError::entity(path, "missing Header"))?;
        let id = header
            .attribute("ID")
            .ok_or_else(|| ConvertError::entity(path, "Header has no ID"))?
            .to_string();
        let name = header.attribute("Name").unwrap_or(&id).to_string();
        let deleted = header
            .attribute("Deleted")
            .map_or(false, |d| d.eq_ignore_ascii_case("true"));

        let mappings = child(root, "Mappings")
            .map(|m| {
                m.children()
                    .filter(|n| n.has_tag_name("Mapping"))
                    .filter_map(|n| konga_string(n, "expr"))
                    .map(RawMapping::parse)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            id,
            name,
            deleted,
            properties: properties(root),
            input: child(root, "InputStructure").map(StructureMarker::from_node),
            output: child(root, "OutputStructure").map(StructureMarker::from_node),
            mappings,
        })
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

// =============================================================================
// Other Entities
// =============================================================================

/// Value of one `Properties/Item` in any entity
pub fn entity_property(path: &str, xml: &str, key: &str) -> Result<Option<String>> {
    let doc = Document::parse(xml).map_err(|e| ConvertError::entity(path, e))?;
    Ok(properties(doc.root_element())
        .remove(key)
        .filter(|v| !v.is_empty()))
}

/// Query-language text of a query entity
pub fn query_string(path: &str, xml: &str) -> Result<Option<String>> {
    let doc = Document::parse(xml).map_err(|e| ConvertError::entity(path, e))?;
    Ok(doc
        .descendants()
        .find(|n| n.has_tag_name("konga.string") && n.attribute("name") == Some("query_string"))
        .and_then(|n| n.text())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty()))
}

/// Flat field names of a document entity (`Segment/Fields/Field@name`)
pub fn document_fields(path: &str, xml: &str) -> Result<Vec<String>> {
    let doc = Document::parse(xml).map_err(|e| ConvertError::entity(path, e))?;
    Ok(doc
        .descendants()
        .filter(|n| n.has_tag_name("Field"))
        .filter(|n| {
            let fields = n.parent_element();
            fields.map_or(false, |f| f.has_tag_name("Fields"))
                && fields
                    .and_then(|f| f.parent_element())
                    .map_or(false, |s| s.has_tag_name("Segment"))
        })
        .filter_map(|n| n.attribute("name"))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect())
}

fn child<'a, 'input>(node: Node<'a, 'input>, tag: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name(tag))
}

fn konga_string<'a>(node: Node<'a, '_>, name: &str) -> Option<&'a str> {
    node.children()
        .find(|n| n.has_tag_name("konga.string") && n.attribute("name") == Some(name))
        .and_then(|n| n.text())
}

fn properties(root: Node<'_, '_>) -> BTreeMap<String, String> {
    child(root, "Properties")
        .map(|props| {
            props
                .children()
                .filter(|n| n.has_tag_name("Item"))
                .filter_map(|item| {
                    Some((
                        item.attribute("key")?.to_string(),
                        item.attribute("value").unwrap_or("").to_string(),
                    ))
                })
                .collect()
        })
        .unwrap_or_default()
}
