//! XSD structure reader
//!
//! Builds a field tree from a schema file shipped in the archive. Covers the
//! subset schema files in legacy projects actually use: global and local
//! elements, element refs, named and anonymous complex types, model groups
//! (`sequence`, `all`, `choice`, group refs), attributes, and simple/complex
//! content extension. A named type that is already being expanded further up
//! the tree is cut, leaving the repeated element as a leaf.

use roxmltree::{Document, Node};
use std::collections::{HashMap, HashSet};

use crate::error::{ConvertError, Result};
use crate::model::{FieldNode, MaxOccurs};

pub const XS_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema";

/// Parse `xml` and build the tree under `root_name`.
///
/// Falls back to the first global element when `root_name` is absent or not
/// declared.
pub fn parse(path: &str, xml: &str, root_name: Option<&str>) -> Result<FieldNode> {
    let doc = Document::parse(xml).map_err(|e| ConvertError::entity(path, e))?;
    let schema = doc.root_element();
    if !is_xs(schema, "schema") {
        return Err(ConvertError::entity(path, "root element is not xs:schema"));
    }

    let globals = Globals::collect(schema);
    let wanted = root_name.map(|r| r.rsplit('}').next().unwrap_or(r));
    let start = wanted
        .and_then(|name| globals.elements.get(name).copied())
        .or_else(|| schema.children().find(|n| is_xs(*n, "element")))
        .ok_or_else(|| ConvertError::StructureUnavailable(path.to_string()))?;

    let mut builder = Builder {
        globals: &globals,
        expanding: HashSet::new(),
    };
    let mut root = builder
        .element(start, false)
        .ok_or_else(|| ConvertError::StructureUnavailable(path.to_string()))?;
    root.min_occurs = 1;
    root.max_occurs = MaxOccurs::One;
    root.nillable = false;
    root.renumber();
    Ok(root)
}

fn is_xs(node: Node<'_, '_>, local: &str) -> bool {
    node.is_element()
        && node.tag_name().name() == local
        && node.tag_name().namespace().map_or(true, |ns| ns == XS_NAMESPACE)
}

/// `xs:string` -> `string`
fn local(qname: &str) -> &str {
    qname.rsplit(':').next().unwrap_or(qname)
}

fn occurs(node: Node<'_, '_>, in_choice: bool) -> (u32, MaxOccurs) {
    let min = node
        .attribute("minOccurs")
        .and_then(|m| m.trim().parse().ok())
        .unwrap_or(1);
    let max = node
        .attribute("maxOccurs")
        .and_then(MaxOccurs::parse)
        .unwrap_or_default();
    (if in_choice { 0 } else { min }, max)
}

/// Top-level named components
struct Globals<'a, 'input> {
    elements: HashMap<&'a str, Node<'a, 'input>>,
    complex_types: HashMap<&'a str, Node<'a, 'input>>,
    simple_types: HashMap<&'a str, Node<'a, 'input>>,
    groups: HashMap<&'a str, Node<'a, 'input>>,
    attribute_groups: HashMap<&'a str, Node<'a, 'input>>,
}

impl<'a, 'input> Globals<'a, 'input> {
    fn collect(schema: Node<'a, 'input>) -> Self {
        let mut globals = Self {
            elements: HashMap::new(),
            complex_types: HashMap::new(),
            simple_types: HashMap::new(),
            groups: HashMap::new(),
            attribute_groups: HashMap::new(),
        };
        for node in schema.children().filter(|n| n.is_element()) {
            let Some(name) = node.attribute("name") else {
                continue;
            };
            let table = match node.tag_name().name() {
                "element" => &mut globals.elements,
                "complexType" => &mut globals.complex_types,
                "simpleType" => &mut globals.simple_types,
                "group" => &mut globals.groups,
                "attributeGroup" => &mut globals.attribute_groups,
                _ => continue,
            };
            table.entry(name).or_insert(node);
        }
        globals
    }
}

struct Builder<'g, 'a, 'input> {
    globals: &'g Globals<'a, 'input>,
    expanding: HashSet<&'a str>,
}

impl<'g, 'a, 'input> Builder<'g, 'a, 'input> {
    fn element(&mut self, node: Node<'a, 'input>, in_choice: bool) -> Option<FieldNode> {
        let (min, max) = occurs(node, in_choice);

        // A ref takes its declaration from the global element, occurs from here
        let decl = match node.attribute("ref") {
            Some(reference) => self.globals.elements.get(local(reference)).copied()?,
            None => node,
        };

        let mut field = FieldNode::new(decl.attribute("name")?).with_occurs(min, max);
        field.nillable = decl.attribute("nillable") == Some("true");
        field.default_value = decl.attribute("default").map(str::to_string);

        if let Some(inline) = decl.children().find(|n| is_xs(*n, "complexType")) {
            field.children = self.complex_children(inline);
        } else if let Some(type_name) = decl.attribute("type").map(local) {
            match self.globals.complex_types.get(type_name).copied() {
                Some(complex) => {
                    if self.expanding.insert(type_name) {
                        field.children = self.complex_children(complex);
                        self.expanding.remove(type_name);
                    }
                }
                None => field.type_tag = Some(self.simple_type(type_name).to_string()),
            }
        } else if let Some(simple) = decl.children().find(|n| is_xs(*n, "simpleType")) {
            field.type_tag = Some(restriction_base(simple).unwrap_or("string").to_string());
        } else {
            field.type_tag = Some("string".to_string());
        }

        Some(field)
    }

    /// Builtin name behind a (possibly user-defined) simple type
    fn simple_type(&self, type_name: &'a str) -> &'a str {
        let mut current = type_name;
        let mut seen = HashSet::new();
        while let Some(def) = self.globals.simple_types.get(current) {
            if !seen.insert(current) {
                break;
            }
            match restriction_base(*def) {
                Some(base) => current = base,
                None => return "string",
            }
        }
        current
    }

    fn attribute(&self, node: Node<'a, 'input>) -> Option<FieldNode> {
        let name = node.attribute("name").or_else(|| node.attribute("ref").map(local))?;
        let min = u32::from(node.attribute("use") == Some("required"));
        let mut field = FieldNode::new(name).with_occurs(min, MaxOccurs::One);
        field.is_attribute = true;
        field.default_value = node.attribute("default").map(str::to_string);
        field.type_tag = Some(match node.attribute("type").map(local) {
            Some(type_name) => self.simple_type(type_name).to_string(),
            None => "string".to_string(),
        });
        Some(field)
    }

    fn complex_children(&mut self, complex: Node<'a, 'input>) -> Vec<FieldNode> {
        let mut children = Vec::new();
        for node in complex.children().filter(|n| n.is_element()) {
            match node.tag_name().name() {
                "sequence" | "all" | "choice" | "group" => {
                    self.particles(node, false, &mut children)
                }
                "attribute" => children.extend(self.attribute(node)),
                "attributeGroup" => self.attribute_group(node, &mut children),
                "complexContent" | "simpleContent" => {
                    for derivation in node
                        .children()
                        .filter(|n| is_xs(*n, "extension") || is_xs(*n, "restriction"))
                    {
                        if is_xs(derivation, "extension") {
                            self.base_children(derivation, &mut children);
                        }
                        children.extend(self.complex_children(derivation));
                    }
                }
                _ => {}
            }
        }
        children
    }

    fn base_children(&mut self, derivation: Node<'a, 'input>, out: &mut Vec<FieldNode>) {
        let Some(base) = derivation.attribute("base").map(local) else {
            return;
        };
        if let Some(complex) = self.globals.complex_types.get(base).copied() {
            if self.expanding.insert(base) {
                out.extend(self.complex_children(complex));
                self.expanding.remove(base);
            }
        }
    }

    fn particles(&mut self, group: Node<'a, 'input>, in_choice: bool, out: &mut Vec<FieldNode>) {
        let in_choice = in_choice || is_xs(group, "choice");

        if is_xs(group, "group") {
            if let Some(def) = group
                .attribute("ref")
                .and_then(|r| self.globals.groups.get(local(r)).copied())
            {
                for model in def.children().filter(|n| n.is_element()) {
                    self.particles(model, in_choice, out);
                }
            }
            return;
        }

        for node in group.children().filter(|n| n.is_element()) {
            match node.tag_name().name() {
                "element" => out.extend(self.element(node, in_choice)),
                "sequence" | "all" | "choice" | "group" => self.particles(node, in_choice, out),
                _ => {}
            }
        }
    }

    fn attribute_group(&self, node: Node<'a, 'input>, out: &mut Vec<FieldNode>) {
        let Some(def) = node
            .attribute("ref")
            .and_then(|r| self.globals.attribute_groups.get(local(r)).copied())
        else {
            return;
        };
        out.extend(
            def.children()
                .filter(|n| is_xs(*n, "attribute"))
                .filter_map(|n| self.attribute(n)),
        );
    }
}

fn restriction_base<'a>(simple: Node<'a, '_>) -> Option<&'a str> {
    simple
        .children()
        .find(|n| is_xs(*n, "restriction"))
        .and_then(|r| r.attribute("base"))
        .map(local)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTACTS: &str = r#"<?xml version="1.0"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema" targetNamespace="urn:crm">
  <xs:element name="Contacts">
    <xs:complexType>
      <xs:sequence>
        <xs:element name="Contact" type="ContactType" minOccurs="0" maxOccurs="unbounded"/>
      </xs:sequence>
    </xs:complexType>
  </xs:element>
  <xs:complexType name="ContactType">
    <xs:sequence>
      <xs:element name="Id" type="xs:string"/>
      <xs:element name="Email" type="Email" nillable="true"/>
      <xs:choice>
        <xs:element name="Phone" type="xs:string"/>
        <xs:element name="Mobile" type="xs:string"/>
      </xs:choice>
      <xs:element name="Manager" type="ContactType" minOccurs="0"/>
    </xs:sequence>
    <xs:attribute name="status" type="xs:string" use="required"/>
  </xs:complexType>
  <xs:simpleType name="Email">
    <xs:restriction base="xs:string"/>
  </xs:simpleType>
</xs:schema>"#;

    #[test]
    fn test_parse_named_and_anonymous_types() {
        let root = parse("files/Contacts.xsd", CONTACTS, Some("Contacts")).unwrap();
        assert_eq!(root.name, "Contacts");
        assert_eq!(root.min_occurs, 1);

        let contact = root.child("Contact").unwrap();
        assert_eq!(contact.max_occurs, MaxOccurs::Unbounded);
        assert_eq!(contact.min_occurs, 0);

        let names: Vec<_> = contact.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Id", "Email", "Phone", "Mobile", "Manager", "status"]);

        let email = contact.child("Email").unwrap();
        assert_eq!(email.type_tag.as_deref(), Some("string"));
        assert!(email.nillable);
        assert_eq!(contact.child("Phone").unwrap().min_occurs, 0);
        assert!(contact.child("status").unwrap().is_attribute);
    }

    #[test]
    fn test_recursive_type_is_cut() {
        let root = parse("x.xsd", CONTACTS, Some("Contacts")).unwrap();
        let manager = root.descend(["Contact", "Manager"]).unwrap();
        assert!(manager.is_leaf());
    }

    #[test]
    fn test_missing_root_falls_back_to_first_element() {
        let root = parse("x.xsd", CONTACTS, Some("{urn:crm}Nothing")).unwrap();
        assert_eq!(root.name, "Contacts");
    }

    #[test]
    fn test_element_ref_and_extension() {
        let xml = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="note" type="xs:string"/>
  <xs:complexType name="Base"><xs:sequence><xs:element name="id" type="xs:int"/></xs:sequence></xs:complexType>
  <xs:element name="order">
    <xs:complexType><xs:complexContent><xs:extension base="Base">
      <xs:sequence><xs:element ref="note" maxOccurs="3"/></xs:sequence>
    </xs:extension></xs:complexContent></xs:complexType>
  </xs:element>
</xs:schema>"#;
        let root = parse("x.xsd", xml, Some("order")).unwrap();
        assert_eq!(root.leaf_paths(), vec!["order/id", "order/note"]);
        assert_eq!(root.child("note").unwrap().max_occurs, MaxOccurs::Bounded(3));
        assert_eq!(root.child("id").unwrap().type_tag.as_deref(), Some("int"));
    }

    #[test]
    fn test_rejects_non_schema() {
        assert!(parse("x.xsd", "<root/>", None).is_err());
        assert!(parse("x.xsd", "<xs:schema", None).is_err());
    }
}
