//! Schema Structure Loading
//!
//! Decides, per transformation and role, which archive mechanism supplies a
//! schema's field tree. Sources are tried in priority order:
//!
//! 1. XSD file named by the entity's `source_xml` / `target_xml`
//! 2. Embedded document entity (`docId`)
//! 3. The transformation's own tree cache
//! 4. The connector call's tree cache
//! 5. The call -> operation -> query reference chain
//!
//! The first source that yields a tree wins. When none does, the schema is
//! still emitted, named but empty, with the last failure recorded as its
//! [`StructureIssue`].

use std::collections::HashMap;
use tracing::{debug, warn};

use crate::archive::{ArchiveReader, ProjectLayout};
use crate::chain::{ChainDescriptor, ChainResolution, ReferenceChainResolver};
use crate::config::{ConnectorRule, EngineConfig};
use crate::entity::{document_fields, StructureMarker, TransformationEntity};
use crate::error::StructureIssue;
use crate::model::{
    capitalize, Direction, FieldNode, IdentityKey, Layout, MaxOccurs, Origin, Provenance,
    ReferenceChainLink, SchemaDocument, SchemaFormat, SchemaRef, SchemaRole,
};
use crate::tree_cache::{self, TreeCache};
use crate::xsd;

// =============================================================================
// Role Properties
// =============================================================================

/// Entity properties describing one role
#[derive(Debug, Clone, Default)]
struct RoleProperties<'e> {
    schema_file: Option<&'e str>,
    declared_root: Option<&'e str>,
    type_id: Option<&'e str>,
    nature: Option<&'e str>,
    marker: Option<&'e StructureMarker>,
    wizard_role: Option<&'e str>,
}

impl<'e> RoleProperties<'e> {
    fn of(entity: &'e TransformationEntity, role: SchemaRole) -> Self {
        let (file, root, type_id, nature, marker) = match role {
            SchemaRole::Source => (
                "source_xml",
                "sourcedtd_root",
                "source_type_id",
                "natureofsource",
                entity.input.as_ref(),
            ),
            SchemaRole::Target => (
                "target_xml",
                "targetdtd_root",
                "target_type_id",
                "natureoftarget",
                entity.output.as_ref(),
            ),
        };
        Self {
            schema_file: entity.property(file),
            declared_root: entity.property(root),
            type_id: entity.property(type_id),
            nature: entity.property(nature),
            marker,
            wizard_role: entity.property("saleforce_wizard_role"),
        }
    }

    fn is_declared(&self) -> bool {
        self.schema_file.is_some()
            || self.declared_root.is_some()
            || self.type_id.is_some()
            || self.marker.is_some()
    }

    /// `wsCallId`, then `callId`
    fn correlation_id(&self) -> Option<&'e str> {
        let marker = self.marker?;
        marker
            .ws_call_id
            .as_deref()
            .or(marker.call_id.as_deref())
    }

    fn doc_id(&self) -> Option<&'e str> {
        self.marker.and_then(|m| m.doc_id.as_deref())
    }

    fn role_marks(&self, word: &str) -> bool {
        self.wizard_role
            .map_or(false, |r| r.to_uppercase().contains(word))
    }

    /// `UPDATE|REQUEST` -> `update`
    fn wizard_function(&self) -> Option<String> {
        let role = self.wizard_role?;
        let (first, _) = role.split_once('|')?;
        let first = first.trim();
        (!first.is_empty()).then(|| first.to_lowercase())
    }
}

// =============================================================================
// Loaded Schema
// =============================================================================

/// One role's schema as recovered from the archive
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedSchema {
    pub document: SchemaDocument,
    /// Root named by the entity (`{ns}name` when namespaced)
    pub declared_root: Option<String>,
    /// Whether the transformation's ref embeds the document
    pub embedded: bool,
    /// Hops followed when the structure came through the reference chain
    pub chain: Option<ReferenceChainLink>,
    /// External object this schema was designed against, when known
    pub external_object: Option<String>,
}

impl LoadedSchema {
    /// Reference attached to the transformation (id assigned at link time)
    pub fn schema_ref(&self) -> SchemaRef {
        let document = &self.document;
        SchemaRef {
            name: document.name.clone(),
            id: None,
            origin: document.origin.clone(),
            document: (document.origin.is_none() || self.embedded).then(|| document.clone()),
        }
    }
}

// =============================================================================
// Structure Sources
// =============================================================================

/// Candidate structure source, in priority order
#[derive(Debug, Clone, PartialEq, Eq)]
enum StructureSource {
    Xsd(String),
    Document(String),
    UnitCache(String),
    ConnectorCache(String),
    Chain(ChainDescriptor),
}

impl StructureSource {
    /// Entry backing this source; part of the structure cache key
    fn entry(&self) -> String {
        match self {
            Self::Xsd(p) | Self::Document(p) | Self::UnitCache(p) | Self::ConnectorCache(p) => {
                p.clone()
            }
            Self::Chain(descriptor) => format!("chain:{}:{}", descriptor.call_id, descriptor.direction),
        }
    }

    fn provenance(&self) -> Provenance {
        match self {
            Self::Xsd(_) => Provenance::Xsd,
            Self::Document(_) => Provenance::EmbeddedDocument,
            Self::UnitCache(_) => Provenance::TreeCache,
            Self::ConnectorCache(_) => Provenance::ConnectorCache,
            Self::Chain(_) => Provenance::ReferenceChain,
        }
    }
}

/// Structure cache key: the same entry read under a different root or
/// layout yields a different tree
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StructureKey {
    identity: IdentityKey,
    entry: String,
    root: Option<String>,
    flat: bool,
}

/// What a single source produced
enum Recovered {
    Tree(FieldNode),
    Fields(Vec<String>),
}

/// Structure recovered from the winning source
#[derive(Debug, Clone, PartialEq)]
struct Structure {
    root: FieldNode,
    layout: Layout,
    provenance: Provenance,
    chain: Option<ReferenceChainLink>,
}

// =============================================================================
// Loader
// =============================================================================

/// Loads schema structure for one run.
///
/// Owns the run's structure cache and reference-chain index; build a new
/// loader for every conversion.
pub struct SchemaStructureLoader<'a> {
    archive: &'a dyn ArchiveReader,
    layout: &'a ProjectLayout,
    config: &'a EngineConfig,
    chain: ReferenceChainResolver<'a>,
    cache: HashMap<StructureKey, Structure>,
}

impl<'a> SchemaStructureLoader<'a> {
    pub fn new(
        archive: &'a dyn ArchiveReader,
        layout: &'a ProjectLayout,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            archive,
            layout,
            config,
            chain: ReferenceChainResolver::new(archive, layout),
            cache: HashMap::new(),
        }
    }

    /// Number of distinct structures loaded so far
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Load the schema on `role`'s side of `entity`; `None` when the entity
    /// declares nothing for that role
    pub fn load(&mut self, entity: &TransformationEntity, role: SchemaRole) -> Option<LoadedSchema> {
        let props = RoleProperties::of(entity, role);
        if !props.is_declared() {
            return None;
        }

        let config = self.config;
        let connector = props.type_id.and_then(|t| config.connector(t));
        let origin = connector.and_then(|rule| self.origin(rule, &props));
        let flat = config.is_flat(props.nature, props.type_id);
        let embedded = connector.map_or(false, |c| c.embed_document) && role == SchemaRole::Target;

        let name = match &origin {
            Some(origin) => origin.schema_name(),
            None => props
                .schema_file
                .map(str::to_string)
                .unwrap_or_else(|| self.fallback_name(role, flat)),
        };
        let identity = match &origin {
            Some(origin) => IdentityKey::Origin {
                correlation_id: origin.id.clone(),
                direction: origin.direction,
            },
            None => IdentityKey::Name(name.clone()),
        };

        let cache_root = props
            .declared_root
            .map(str::to_string)
            .or_else(|| embedded.then(|| config.schemas.request_cache_root.clone()));
        let sources = self.sources(entity, role, &props, connector, origin.as_ref());

        let mut issue = StructureIssue::Unavailable;
        let mut structure = None;
        let mut chain_link = None;
        for source in sources {
            let key = StructureKey {
                identity: identity.clone(),
                entry: source.entry(),
                root: cache_root.clone(),
                flat,
            };
            if let Some(hit) = self.cache.get(&key) {
                debug!("{} {}: cached structure from {}", entity.name, role, key.entry);
                structure = Some(hit.clone());
                break;
            }
            match self.try_source(&source, cache_root.as_deref(), flat, &mut chain_link) {
                Ok(found) => {
                    debug!(
                        "{} {}: structure from {:?} ({} fields)",
                        entity.name,
                        role,
                        found.provenance,
                        found.root.field_count()
                    );
                    self.cache.insert(key, found.clone());
                    structure = Some(found);
                    break;
                }
                Err(Some(failure)) => {
                    warn!("{} {}: {} ({})", entity.name, role, failure, key.entry);
                    issue = failure;
                }
                Err(None) => debug!("{} {}: nothing usable in {}", entity.name, role, key.entry),
            }
        }

        if let Some(found) = &structure {
            chain_link = found.chain.clone().or(chain_link);
        }
        let external_object = chain_link
            .as_ref()
            .and_then(|l| l.object_name.clone())
            .or_else(|| self.external_hint(&props));

        let document = match structure {
            Some(found) => SchemaDocument {
                id: None,
                name,
                root: found.root,
                layout: found.layout,
                format: format_for(found.layout, origin.is_some()),
                native_id: origin.as_ref().map(|o| o.id.clone()).or(props.doc_id().map(str::to_string)),
                origin,
                provenance: found.provenance,
                issue: None,
            },
            None => {
                if issue == StructureIssue::Unavailable {
                    debug!("{} {}: no structure source", entity.name, role);
                }
                let root_name = props.declared_root.unwrap_or(&name);
                let mut document = SchemaDocument::unavailable(name.clone(), local_root(root_name), issue);
                if flat {
                    document.root = self.flat_root(Vec::new());
                    document.layout = Layout::Flat;
                }
                document.format = format_for(document.layout, origin.is_some());
                document.native_id = origin
                    .as_ref()
                    .map(|o| o.id.clone())
                    .or(props.doc_id().map(str::to_string));
                document.origin = origin;
                document
            }
        };

        Some(LoadedSchema {
            document,
            declared_root: props.declared_root.map(str::to_string),
            embedded,
            chain: chain_link,
            external_object,
        })
    }

    fn fallback_name(&self, role: SchemaRole, flat: bool) -> String {
        if flat {
            self.config.schemas.flat_default_name.clone()
        } else {
            format!("{} Schema", capitalize(&role.to_string()))
        }
    }

    fn origin(&self, rule: &ConnectorRule, props: &RoleProperties<'_>) -> Option<Origin> {
        let id = props.correlation_id()?;
        let function = match &rule.call_type_prefix {
            Some(prefix) => props
                .marker
                .and_then(|m| m.call_type.as_deref())
                .map(|t| t.strip_prefix(prefix.as_str()).unwrap_or(t).to_lowercase())
                .filter(|f| !f.is_empty())
                .unwrap_or_else(|| rule.function.clone()),
            None => props.wizard_function().unwrap_or_else(|| rule.function.clone()),
        };
        Some(Origin {
            adapter_id: rule.adapter.clone(),
            function_name: function,
            direction: rule.direction,
            id: id.to_string(),
        })
    }

    fn sources(
        &self,
        entity: &TransformationEntity,
        role: SchemaRole,
        props: &RoleProperties<'_>,
        connector: Option<&ConnectorRule>,
        origin: Option<&Origin>,
    ) -> Vec<StructureSource> {
        let mut sources = Vec::new();

        if let Some(file) = props.schema_file {
            let path = self.layout.schema_file(file);
            if self.archive.exists(&path) {
                sources.push(StructureSource::Xsd(path));
            }
        }
        if let Some(doc_id) = props.doc_id() {
            let path = self.layout.document(doc_id);
            if self.archive.exists(&path) {
                sources.push(StructureSource::Document(path));
            }
        }

        let unit_cache = self.layout.unit_cache(&entity.id, role.cache_direction());
        if self.archive.exists(&unit_cache) {
            sources.push(StructureSource::UnitCache(unit_cache));
        }

        if let Some(origin) = origin {
            let path = self.layout.connector_cache(&origin.id, origin.direction);
            if self.archive.exists(&path) {
                sources.push(StructureSource::ConnectorCache(path));
            }
        }

        if let Some(descriptor) = self.chain_descriptor(props, connector) {
            sources.push(StructureSource::Chain(descriptor));
        }
        sources
    }

    /// Chained connectors go through the chain unless the wizard role marks
    /// a response; a request marker turns the descriptor into an input one
    fn chain_descriptor(
        &self,
        props: &RoleProperties<'_>,
        connector: Option<&ConnectorRule>,
    ) -> Option<ChainDescriptor> {
        let rule = connector.filter(|c| c.chained)?;
        if props.role_marks("RESPONSE") {
            return None;
        }
        let direction = if props.role_marks("REQUEST") {
            Direction::Input
        } else {
            rule.direction
        };
        Some(ChainDescriptor {
            call_id: props.correlation_id().unwrap_or_default().to_string(),
            direction,
        })
    }

    /// `Err(None)`: the source held nothing usable; `Err(Some(_))`: it failed
    /// in a way worth reporting. Chain hops followed are left in `followed`
    /// either way.
    fn try_source(
        &mut self,
        source: &StructureSource,
        cache_root: Option<&str>,
        flat: bool,
        followed: &mut Option<ReferenceChainLink>,
    ) -> Result<Structure, Option<StructureIssue>> {
        let mut chain = None;
        let recovered = match source {
            StructureSource::Xsd(path) => {
                let xml = self.archive.read_to_string(path).map_err(|e| e.as_issue())?;
                match xsd::parse(path, &xml, cache_root) {
                    Ok(root) => Recovered::Tree(root),
                    Err(e) => {
                        debug!("Skipping schema file {}: {}", path, e);
                        return Err(e.as_issue());
                    }
                }
            }
            StructureSource::Document(path) => {
                let xml = self.archive.read_to_string(path).map_err(|e| e.as_issue())?;
                let fields = document_fields(path, &xml).map_err(|e| e.as_issue())?;
                if fields.is_empty() {
                    return Err(None);
                }
                Recovered::Fields(fields)
            }
            StructureSource::UnitCache(path) | StructureSource::ConnectorCache(path) => {
                let raw = self.archive.read(path).map_err(|e| e.as_issue())?;
                let decoded = tree_cache::decode(&raw).map_err(|e| {
                    Some(StructureIssue::CorruptCache {
                        path: path.clone(),
                        reason: e.to_string(),
                    })
                })?;
                match decoded {
                    TreeCache::TypeLibrary(library) => {
                        Recovered::Tree(library.resolve_root(cache_root).ok_or(None)?)
                    }
                    TreeCache::Flat(list) => Recovered::Fields(list.fields),
                    TreeCache::Compact(root) => Recovered::Tree(root),
                }
            }
            StructureSource::Chain(descriptor) => match self.chain.resolve(descriptor) {
                ChainResolution::Resolved { root, link } => {
                    chain = Some(link);
                    Recovered::Tree(root)
                }
                ChainResolution::Unresolved { link, hop } => {
                    *followed = Some(link);
                    return Err(Some(StructureIssue::BrokenChain {
                        hop: hop.to_string(),
                    }));
                }
            },
        };

        let (root, layout) = match recovered {
            Recovered::Fields(fields) => (self.flat_root(fields), Layout::Flat),
            Recovered::Tree(tree) if flat => {
                let fields = tree.children.iter().map(|c| c.name.clone()).collect();
                (self.flat_root(fields), Layout::Flat)
            }
            Recovered::Tree(mut tree) => {
                tree.remove_marked(&self.config.translation.prescript_marker);
                tree.renumber();
                (tree, Layout::Tree)
            }
        };
        Ok(Structure {
            root,
            layout,
            provenance: source.provenance(),
            chain,
        })
    }

    /// `__flat__` root holding one optional leaf per field
    fn flat_root(&self, fields: Vec<String>) -> FieldNode {
        let defaults = &self.config.schemas;
        let fields = if fields.is_empty() {
            vec![defaults.flat_default_field.clone()]
        } else {
            fields
        };
        let mut root = FieldNode::new(defaults.flat_root.as_str())
            .with_occurs(0, MaxOccurs::Unbounded)
            .with_children(
                fields
                    .into_iter()
                    .map(|name| FieldNode::leaf(name, "string"))
                    .collect(),
            );
        root.renumber();
        root
    }

    /// Object hint for a canonical schema file named after an external
    /// object's response or query (`ContactsResponse.xsd` -> `Contact`)
    fn external_hint(&self, props: &RoleProperties<'_>) -> Option<String> {
        let defaults = &self.config.schemas;
        if props.type_id != Some(defaults.canonical_type_id.as_str()) {
            return None;
        }
        let file = props.schema_file?.to_lowercase();
        if !(file.contains("response") || file.contains("query")) {
            return None;
        }
        defaults
            .external_object_hints
            .iter()
            .find(|hint| file.contains(hint.as_str()))
            .map(|hint| capitalize(hint))
    }
}

fn format_for(layout: Layout, connector: bool) -> SchemaFormat {
    if layout == Layout::Flat || connector {
        SchemaFormat::Csv
    } else {
        SchemaFormat::Xml
    }
}

fn local_root(root: &str) -> &str {
    root.rsplit('}').next().unwrap_or(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::MemoryArchive;
    use crate::config::LayoutConfig;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const CALL: &str = "c946915b-0000-4000-8000-00000000000a";
    const QUERY: &str = "9c6b28e7-0000-4000-8000-00000000000b";

    fn gzip(xml: &str) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(xml.as_bytes()).unwrap();
        encoder.finish().unwrap()
    }

    fn entity(id: &str, props: &[(&str, &str)], input: Option<StructureMarker>) -> TransformationEntity {
        TransformationEntity {
            id: id.to_string(),
            name: format!("unit {}", id),
            properties: props
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            input,
            ..TransformationEntity::default()
        }
    }

    fn layout() -> ProjectLayout {
        ProjectLayout::new("P", LayoutConfig::default())
    }

    const CONTACTS_XSD: &str = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="Contacts">
    <xs:complexType><xs:sequence>
      <xs:element name="Contact" maxOccurs="unbounded">
        <xs:complexType><xs:sequence>
          <xs:element name="FirstName" type="xs:string"/>
          <xs:element name="Email" type="xs:string" minOccurs="0"/>
        </xs:sequence></xs:complexType>
      </xs:element>
    </xs:sequence></xs:complexType>
  </xs:element>
</xs:schema>"#;

    #[test]
    fn test_xsd_wins_over_tree_cache() {
        let archive = MemoryArchive::new()
            .with("P/files/ContactsResponse.xsd", CONTACTS_XSD)
            .with(
                "P/cache/TransformationStructures/t1_input.gz",
                gzip(r#"<JTR><N>ignored</N></JTR>"#),
            );
        let layout = layout();
        let config = EngineConfig::default();
        let mut loader = SchemaStructureLoader::new(&archive, &layout, &config);

        let e = entity(
            "t1",
            &[
                ("source_xml", "ContactsResponse.xsd"),
                ("sourcedtd_root", "Contacts"),
                ("source_type_id", "4"),
            ],
            None,
        );
        let loaded = loader.load(&e, SchemaRole::Source).unwrap();
        assert_eq!(loaded.document.provenance, Provenance::Xsd);
        assert_eq!(loaded.document.name, "ContactsResponse.xsd");
        assert_eq!(loaded.document.root.name, "Contacts");
        assert_eq!(loaded.external_object.as_deref(), Some("Contact"));
        assert!(loaded.schema_ref().document.is_some());
    }

    #[test]
    fn test_corrupt_cache_is_unavailable_but_named() {
        let archive = MemoryArchive::new().with(
            "P/cache/TransformationStructures/t1_output.gz",
            b"\x1f\x8b garbage".to_vec(),
        );
        let layout = layout();
        let config = EngineConfig::default();
        let mut loader = SchemaStructureLoader::new(&archive, &layout, &config);

        let e = entity("t1", &[("target_xml", "Orders.xsd"), ("targetdtd_root", "Orders")], None);
        let loaded = loader.load(&e, SchemaRole::Target).unwrap();
        assert_eq!(loaded.document.name, "Orders.xsd");
        assert_eq!(loaded.document.provenance, Provenance::Unavailable);
        assert!(!loaded.document.has_structure());
        assert_eq!(loaded.document.root.name, "Orders");
        assert!(matches!(
            loaded.document.issue,
            Some(StructureIssue::CorruptCache { .. })
        ));
    }

    #[test]
    fn test_chained_source_resolves_query() {
        let archive = MemoryArchive::new()
            .with(
                "P/Data/Operation/op-1.xml",
                format!(
                    r#"<Entity><Properties><Item key="salesforce_wizard_guid" value="{}"/></Properties><Step ref="{}"/></Entity>"#,
                    QUERY, CALL
                ),
            )
            .with(
                format!("P/Data/SalesforceQuery/{}.xml", QUERY),
                r#"<Entity><konga.string name="query_string">SELECT Id, FirstName, LastName FROM Contact</konga.string></Entity>"#,
            );
        let layout = layout();
        let config = EngineConfig::default();
        let mut loader = SchemaStructureLoader::new(&archive, &layout, &config);

        let marker = StructureMarker {
            ws_call_id: Some(CALL.to_string()),
            ..StructureMarker::default()
        };
        let e = entity("t1", &[("source_type_id", "14")], Some(marker));
        let loaded = loader.load(&e, SchemaRole::Source).unwrap();

        let doc = &loaded.document;
        assert_eq!(doc.provenance, Provenance::ReferenceChain);
        assert_eq!(doc.root.name, "Contact");
        assert_eq!(doc.root.children.len(), 3);
        assert_eq!(doc.name, format!("salesforce_Query_output_{}", CALL));
        assert_eq!(doc.native_id.as_deref(), Some(CALL));
        assert_eq!(loaded.external_object.as_deref(), Some("Contact"));
        assert_eq!(loaded.chain.as_ref().unwrap().query_id.as_deref(), Some(QUERY));
        assert!(loaded.schema_ref().document.is_none());
    }

    #[test]
    fn test_broken_chain_is_recorded() {
        let archive = MemoryArchive::new().with("P/Data/Transformation/t1.xml", "<Entity/>");
        let layout = layout();
        let config = EngineConfig::default();
        let mut loader = SchemaStructureLoader::new(&archive, &layout, &config);

        let marker = StructureMarker {
            ws_call_id: Some(CALL.to_string()),
            ..StructureMarker::default()
        };
        let e = entity("t1", &[("source_type_id", "14")], Some(marker));
        let loaded = loader.load(&e, SchemaRole::Source).unwrap();
        assert_eq!(
            loaded.document.issue,
            Some(StructureIssue::BrokenChain {
                hop: "operation".into()
            })
        );
        assert_eq!(loaded.chain.unwrap().call_id, CALL);
    }

    #[test]
    fn test_flat_target_from_document() {
        let archive = MemoryArchive::new().with(
            "P/Data/Document/doc-1.xml",
            r#"<Entity><Segment><Fields><Field name="line"/><Field name="status"/></Fields></Segment></Entity>"#,
        );
        let layout = layout();
        let config = EngineConfig::default();
        let mut loader = SchemaStructureLoader::new(&archive, &layout, &config);

        let mut e = entity("t1", &[("natureoftarget", "Flat")], None);
        e.output = Some(StructureMarker {
            doc_id: Some("doc-1".into()),
            ..StructureMarker::default()
        });
        let loaded = loader.load(&e, SchemaRole::Target).unwrap();
        let doc = &loaded.document;
        assert!(doc.is_flat());
        assert_eq!(doc.format, SchemaFormat::Csv);
        assert_eq!(doc.name, "New Flat Schema");
        assert_eq!(doc.root.name, "__flat__");
        assert_eq!(doc.root.children[0].name, "line");
        assert_eq!(doc.native_id.as_deref(), Some("doc-1"));
    }

    #[test]
    fn test_request_target_embeds_document_with_origin() {
        let archive = MemoryArchive::new().with(
            "P/cache/TransformationStructures/t1_output.gz",
            gzip(
                r#"<JTR><CROM Name="root"><CROM Name="Contact"><CROM Name="Id"/></CROM></CROM></JTR>"#,
            ),
        );
        let layout = layout();
        let config = EngineConfig::default();
        let mut loader = SchemaStructureLoader::new(&archive, &layout, &config);

        let mut e = entity(
            "t1",
            &[("target_type_id", "12"), ("saleforce_wizard_role", "UPDATE|REQUEST")],
            None,
        );
        e.output = Some(StructureMarker {
            ws_call_id: Some("ws-9".into()),
            ..StructureMarker::default()
        });
        let loaded = loader.load(&e, SchemaRole::Target).unwrap();
        let reference = loaded.schema_ref();
        assert_eq!(reference.name, "salesforce_Update_input_ws-9");
        assert!(reference.origin.is_some());
        assert!(reference.document.is_some());
    }

    #[test]
    fn test_undeclared_role() {
        let archive = MemoryArchive::new();
        let layout = layout();
        let config = EngineConfig::default();
        let mut loader = SchemaStructureLoader::new(&archive, &layout, &config);
        assert!(loader.load(&entity("t1", &[], None), SchemaRole::Source).is_none());
    }

    #[test]
    fn test_shared_connector_cache_is_loaded_once() {
        let archive = MemoryArchive::new().with(
            "P/cache/ConnectorCallStructures/call-1_input.gz",
            gzip(r#"<Root><N>upsertList</N><C><N>record</N></C></Root>"#),
        );
        let layout = layout();
        let config = EngineConfig::default();
        let mut loader = SchemaStructureLoader::new(&archive, &layout, &config);

        let marker = StructureMarker {
            call_id: Some("call-1".into()),
            call_type: Some("NetSuiteUpsert".into()),
            ..StructureMarker::default()
        };
        let mut first = entity("t1", &[("target_type_id", "101")], None);
        first.output = Some(marker.clone());
        let mut second = entity("t2", &[("target_type_id", "101")], None);
        second.output = Some(marker);

        let a = loader.load(&first, SchemaRole::Target).unwrap();
        let b = loader.load(&second, SchemaRole::Target).unwrap();
        assert_eq!(a.document.provenance, Provenance::ConnectorCache);
        assert_eq!(a.document, b.document);
        assert_eq!(a.document.name, "netsuite_Upsert_input_call-1");
        assert_eq!(loader.cached(), 1);
    }

    #[test]
    fn test_same_xsd_under_different_roots() {
        let multi = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="Orders">
    <xs:complexType><xs:sequence>
      <xs:element name="OrderNo" type="xs:string"/>
    </xs:sequence></xs:complexType>
  </xs:element>
  <xs:element name="Invoices">
    <xs:complexType><xs:sequence>
      <xs:element name="InvoiceNo" type="xs:string"/>
    </xs:sequence></xs:complexType>
  </xs:element>
</xs:schema>"#;
        let archive = MemoryArchive::new().with("P/files/Multi.xsd", multi);
        let layout = layout();
        let config = EngineConfig::default();
        let mut loader = SchemaStructureLoader::new(&archive, &layout, &config);

        let orders = entity("a", &[("target_xml", "Multi.xsd"), ("targetdtd_root", "Orders")], None);
        let invoices =
            entity("b", &[("target_xml", "Multi.xsd"), ("targetdtd_root", "Invoices")], None);

        let a = loader.load(&orders, SchemaRole::Target).unwrap();
        let b = loader.load(&invoices, SchemaRole::Target).unwrap();
        assert_eq!(a.document.root.name, "Orders");
        assert_eq!(b.document.root.name, "Invoices");
        assert!(b.document.root.child("InvoiceNo").is_some());
        assert_eq!(loader.cached(), 2);

        let again = loader.load(&orders, SchemaRole::Target).unwrap();
        assert_eq!(again.document, a.document);
        assert_eq!(loader.cached(), 2);
    }
}
