//! Conversion Engine
//!
//! Drives one archive through the whole pipeline:
//!
//! ```text
//! archive ──> entities ──> loader ──> compiler ──> units ──> linker
//!                                                             │
//!                              ConversionOutput <─────────────┘
//! ```
//!
//! Every run owns its own structure cache and id cache, so converting the
//! same archive twice yields identical output.

use serde::Serialize;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::archive::{self, ArchiveReader, ProjectLayout};
use crate::config::EngineConfig;
use crate::diagnostics::{DiagnosticItem, Diagnostics, ReasonCode};
use crate::entity::TransformationEntity;
use crate::error::Result;
use crate::ids::IdGenerator;
use crate::linker::SchemaLinker;
use crate::loader::{LoadedSchema, SchemaStructureLoader};
use crate::mapping::MappingRuleCompiler;
use crate::model::{SchemaDocument, SchemaRole, TransformationUnit};
use crate::path::{PathTranslator, RootAliasTable, TranslationContext};

/// Everything one conversion produces
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionOutput {
    pub transformations: Vec<TransformationUnit>,
    pub schemas: Vec<SchemaDocument>,
    pub diagnostics: Diagnostics,
}

impl ConversionOutput {
    pub fn schema(&self, name: &str) -> Option<&SchemaDocument> {
        self.schemas.iter().find(|s| s.name == name)
    }

    pub fn transformation(&self, name: &str) -> Option<&TransformationUnit> {
        self.transformations.iter().find(|t| t.name == name)
    }
}

/// Archive -> transformation units and schemas
#[derive(Debug, Clone, Default)]
pub struct Converter {
    config: EngineConfig,
}

impl Converter {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Open `path` (packed or unpacked) and convert it
    pub fn convert_path(&self, path: &Path) -> Result<ConversionOutput> {
        let archive = archive::open(path)?;
        self.convert(archive.as_ref())
    }

    /// Convert every live transformation in `archive`.
    ///
    /// Only an unreadable container fails the run; everything else lands in
    /// the diagnostics.
    pub fn convert(&self, archive: &dyn ArchiveReader) -> Result<ConversionOutput> {
        let mut ids = IdGenerator::from_namespace(&self.config.ids.namespace)?;
        let mut diagnostics = Diagnostics::new();

        let Some(layout) = ProjectLayout::detect(archive, &self.config.layout) else {
            warn!("No project folder found in archive");
            diagnostics.push(DiagnosticItem::new(
                "",
                ReasonCode::ProjectNotFound,
                format!(
                    "no entry under */{}/ was found",
                    self.config.layout.transformation_dir
                ),
            ));
            return Ok(ConversionOutput {
                diagnostics,
                ..ConversionOutput::default()
            });
        };
        info!("Converting project {}", layout.project());

        let aliases = RootAliasTable::new(self.config.translation.root_aliases.clone());
        let mut loader = SchemaStructureLoader::new(archive, &layout, &self.config);
        let mut units = Vec::new();
        let mut candidates = Vec::new();

        for path in layout.transformations(archive) {
            let parsed = archive
                .read_to_string(&path)
                .and_then(|xml| TransformationEntity::parse(&path, &xml));
            let entity = match parsed {
                Ok(entity) => entity,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Skipping {}: {}", path, e);
                    diagnostics.entity_unreadable(&path, &e);
                    continue;
                }
            };
            if entity.deleted {
                debug!("Skipping deleted transformation {}", entity.id);
                continue;
            }

            let source = loader.load(&entity, SchemaRole::Source);
            let target = loader.load(&entity, SchemaRole::Target);
            let unit = self.build_unit(
                &entity,
                source.as_ref(),
                target.as_ref(),
                &aliases,
                &mut ids,
                &mut diagnostics,
            );
            info!(
                "Converted {} ({} rules, {} loops)",
                unit.name,
                unit.mapping_rules.len(),
                unit.loop_mapping_rules.len()
            );

            candidates.extend(source.map(|s| s.document));
            candidates.extend(target.map(|t| t.document));
            units.push(unit);
        }
        debug!("Loaded {} distinct structures", loader.cached());

        let linker = SchemaLinker::new(&self.config.translation);
        let schemas = linker.assign_ids(candidates, &mut units, &mut ids);
        diagnostics.merge(linker.validate(&units, &schemas));

        info!(
            "Converted {} transformations, {} schemas, {} diagnostics",
            units.len(),
            schemas.len(),
            diagnostics.len()
        );
        Ok(ConversionOutput {
            transformations: units,
            schemas,
            diagnostics,
        })
    }

    fn build_unit(
        &self,
        entity: &TransformationEntity,
        source: Option<&LoadedSchema>,
        target: Option<&LoadedSchema>,
        aliases: &RootAliasTable,
        ids: &mut IdGenerator,
        diagnostics: &mut Diagnostics,
    ) -> TransformationUnit {
        let name = entity.name.clone();

        for (role, loaded) in [(SchemaRole::Source, source), (SchemaRole::Target, target)] {
            let Some(doc) = loaded.map(|l| &l.document) else {
                continue;
            };
            if let Some(issue) = &doc.issue {
                warn!("{} {} schema {}: {}", name, role, doc.name, issue);
                diagnostics.structure_issue(&name, role, &doc.name, issue);
            }
        }

        let context = TranslationContext {
            source_root: source.and_then(|s| s.declared_root.clone()),
            target_root: target.and_then(|t| t.declared_root.clone()),
            alias_active: source.map_or(false, |s| s.external_object.is_some()),
        };
        let translator = PathTranslator::new(aliases, context);
        let compiled = MappingRuleCompiler::new(&self.config, &translator)
            .compile(&entity.mappings, target.map(|t| &t.document));

        let target_name = target.map_or("", |t| t.document.name.as_str());
        for dropped in &compiled.dropped {
            warn!(
                "{}: dropped mapping to {} ({})",
                name, dropped.target_path, dropped.reason
            );
            diagnostics.mapping_target_not_leaf(&name, target_name, &dropped.target_path, dropped.reason);
        }

        TransformationUnit {
            id: ids.transformation_id(&name),
            legacy_id: entity.id.clone(),
            source: source.map(LoadedSchema::schema_ref),
            target: target.map(LoadedSchema::schema_ref),
            mapping_rules: compiled.rules,
            loop_mapping_rules: compiled.loops,
            chain: source
                .and_then(|s| s.chain.clone())
                .or_else(|| target.and_then(|t| t.chain.clone())),
            name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::MemoryArchive;
    use crate::model::Provenance;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn gzip(xml: &str) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(xml.as_bytes()).unwrap();
        encoder.finish().unwrap()
    }

    fn transformation(id: &str, name: &str, deleted: bool, props: &str, body: &str) -> String {
        format!(
            r#"<Entity type="Transformation">
  <Header ID="{}" Name="{}" Deleted="{}"/>
  <Properties>{}</Properties>
  {}
</Entity>"#,
            id, name, deleted, props, body
        )
    }

    fn mapping(target: &str, source: &str) -> String {
        format!(
            r#"<Mapping><konga.string name="expr">{}&#9;{}</konga.string></Mapping>"#,
            target, source
        )
    }

    const CONTACTS_XSD: &str = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="Contacts">
    <xs:complexType><xs:sequence>
      <xs:element name="Contact" maxOccurs="unbounded">
        <xs:complexType><xs:sequence>
          <xs:element name="Id" type="xs:string"/>
        </xs:sequence></xs:complexType>
      </xs:element>
    </xs:sequence></xs:complexType>
  </xs:element>
</xs:schema>"#;

    const UPSERT_TREE: &str = "<Root><N>upsertList</N><C><N>record</N><MX>-1</MX>\
        <C><N>Contact</N><C><N>externalId</N><T>string</T></C></C></C></Root>";

    fn archive() -> MemoryArchive {
        let upsert_props = r#"<Item key="source_xml" value="ContactsResponse.xsd"/>
    <Item key="sourcedtd_root" value="Contacts"/>
    <Item key="source_type_id" value="4"/>
    <Item key="target_type_id" value="101"/>"#;
        let upsert_body = format!(
            r#"<OutputStructure callId="call-1" callType="NetSuiteUpsert"/>
  <Mappings>{}{}{}</Mappings>"#,
            mapping("[upsertList$record.]", "[records$Contact.]"),
            mapping("[upsertList$record.Contact$externalId$]", "[records$Contact.Id$]"),
            mapping("[upsertList$missing$]", "[records$Contact.Id$]"),
        );

        MemoryArchive::new()
            .with("P/files/ContactsResponse.xsd", CONTACTS_XSD)
            .with(
                "P/cache/ConnectorCallStructures/call-1_input.gz",
                gzip(UPSERT_TREE),
            )
            .with(
                "P/Data/Transformation/t1.xml",
                transformation("t1", "Contacts to NetSuite", false, upsert_props, &upsert_body),
            )
            .with(
                "P/Data/Transformation/t2.xml",
                transformation("t2", "Old", true, "", ""),
            )
            .with("P/Data/Transformation/t3.xml", "<Entity><Header")
            .with(
                "P/Data/Transformation/t4.xml",
                transformation(
                    "t4",
                    "Second upsert",
                    false,
                    r#"<Item key="target_type_id" value="101"/>"#,
                    r#"<OutputStructure callId="call-1" callType="NetSuiteUpsert"/>"#,
                ),
            )
    }

    #[test]
    fn test_convert_archive() {
        let output = Converter::default().convert(&archive()).unwrap();

        assert_eq!(output.transformations.len(), 2);
        assert_eq!(output.schemas.len(), 2);

        let unit = output.transformation("Contacts to NetSuite").unwrap();
        assert_eq!(unit.legacy_id, "t1");
        let paths: Vec<&str> = unit.mapping_rules.iter().map(|r| r.target_path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "upsertList",
                "upsertList/record",
                "upsertList/record/Contact",
                "upsertList/record/Contact/externalId",
            ]
        );
        let leaf = unit.mapping_rules.last().unwrap();
        assert_eq!(leaf.source_paths, Some(vec!["records/Contact/Id".to_string()]));
        assert_eq!(unit.loop_mapping_rules.len(), 1);

        let target = output.schema("netsuite_Upsert_input_call-1").unwrap();
        assert_eq!(target.id.as_deref(), Some("call-1"));
        assert_eq!(target.provenance, Provenance::ConnectorCache);

        let second = output.transformation("Second upsert").unwrap();
        assert_eq!(second.target.as_ref().unwrap().id.as_deref(), Some("call-1"));
        assert_eq!(
            unit.source.as_ref().unwrap().id,
            output.schema("ContactsResponse.xsd").unwrap().id
        );
    }

    #[test]
    fn test_convert_records_review_items() {
        let output = Converter::default().convert(&archive()).unwrap();
        let codes: Vec<ReasonCode> = output.diagnostics.all().iter().map(|d| d.code).collect();
        assert_eq!(
            codes,
            vec![ReasonCode::MappingTargetNotLeaf, ReasonCode::EntityUnreadable]
        );
        assert_eq!(output.diagnostics.all()[1].transformation, "P/Data/Transformation/t3.xml");
    }

    #[test]
    fn test_convert_is_deterministic() {
        let converter = Converter::default();
        let first = serde_json::to_string(&converter.convert(&archive()).unwrap()).unwrap();
        let second = serde_json::to_string(&converter.convert(&archive()).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_archive_without_project() {
        let output = Converter::default()
            .convert(&MemoryArchive::new().with("readme.txt", "x"))
            .unwrap();
        assert!(output.transformations.is_empty());
        assert_eq!(
            output.diagnostics.with_code(ReasonCode::ProjectNotFound).count(),
            1
        );
    }
}
