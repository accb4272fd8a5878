//! End-to-end conversion tests
//!
//! One fixture project is converted through every archive reader; each test
//! checks one behavior of the resulting units, schemas and diagnostics.

use std::fs;
use std::io::Write;
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use jpk_bridge::model::{Layout, Provenance};
use jpk_bridge::{
    ConversionOutput, Converter, EngineConfig, IdGenerator, MemoryArchive, ReasonCode,
    StructureIssue,
};

const CALL: &str = "c946915b-1111-4000-8000-00000000000a";
const QUERY: &str = "9c6b28e7-2222-4000-8000-00000000000b";

fn gzip(xml: &str) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(xml.as_bytes()).unwrap();
    encoder.finish().unwrap()
}

/// Every entry of the fixture project, in no particular order
fn project_entries() -> Vec<(String, Vec<u8>)> {
    let transformation = |id: &str| format!("P/Data/Transformation/{}.xml", id);
    vec![
        (
            transformation("t-upsert"),
            include_str!("fixtures/upsert_contacts.xml").into(),
        ),
        (
            transformation("t-export-a"),
            include_str!("fixtures/export_aliased.xml").into(),
        ),
        (
            transformation("t-export-n"),
            include_str!("fixtures/export_namespaced.xml").into(),
        ),
        (
            transformation("t-query"),
            include_str!("fixtures/query_contacts.xml").into(),
        ),
        (
            transformation("t-orders"),
            include_str!("fixtures/orders_corrupt.xml").into(),
        ),
        (
            transformation("t-dedup-a"),
            include_str!("fixtures/dedup_a.xml").into(),
        ),
        (
            transformation("t-dedup-b"),
            include_str!("fixtures/dedup_b.xml").into(),
        ),
        (
            transformation("t-deleted"),
            include_str!("fixtures/deleted.xml").into(),
        ),
        (transformation("t-broken"), b"<Entity><Header ID=".to_vec()),
        (
            "P/Data/Operation/op-query.xml".into(),
            include_str!("fixtures/operation.xml").into(),
        ),
        (
            format!("P/Data/SalesforceQuery/{}.xml", QUERY),
            include_str!("fixtures/query.xml").into(),
        ),
        (
            "P/Data/Document/doc-csv.xml".into(),
            include_str!("fixtures/document.xml").into(),
        ),
        (
            "P/files/ContactsResponse.xsd".into(),
            include_str!("fixtures/ContactsResponse.xsd").into(),
        ),
        (
            "P/files/ContactsExport.xsd".into(),
            include_str!("fixtures/ContactsExport.xsd").into(),
        ),
        (
            "P/cache/ConnectorCallStructures/call-upsert_input.gz".into(),
            gzip(
                "<Root><N>upsertList</N><C><N>record</N><MX>-1</MX>\
                 <C><N>Contact</N><C><N>externalId</N><T>string</T></C></C></C></Root>",
            ),
        ),
        (
            "P/cache/TransformationStructures/t-dedup-a_output.gz".into(),
            gzip("<Root><N>upsertList</N><C><N>record</N><C><N>externalId</N></C></C></Root>"),
        ),
        (
            "P/cache/TransformationStructures/t-dedup-b_output.gz".into(),
            gzip(
                "<Root><N>upsertList</N><C><N>record</N>\
                 <C><N>externalId</N></C><C><N>email</N></C></C></Root>",
            ),
        ),
        (
            "P/cache/TransformationStructures/t-orders_output.gz".into(),
            b"\x1f\x8b\x08\x00 not really gzip".to_vec(),
        ),
    ]
}

fn memory_archive() -> MemoryArchive {
    let mut archive = MemoryArchive::new();
    for (path, bytes) in project_entries() {
        archive.insert(path, bytes);
    }
    archive
}

fn convert() -> ConversionOutput {
    Converter::default().convert(&memory_archive()).unwrap()
}

// =============================================================================
// Batch Behavior
// =============================================================================

#[test]
fn test_live_transformations_are_converted() {
    let output = convert();
    let names: Vec<&str> = output.transformations.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "Dedup A",
            "Dedup B",
            "Export aliased",
            "Export namespaced",
            "Orders",
            "Contacts to CSV",
            "Contacts to NetSuite",
        ]
    );
    assert_eq!(output.schemas.len(), 7);
}

#[test]
fn test_review_items() {
    let output = convert();
    let codes: Vec<ReasonCode> = output.diagnostics.all().iter().map(|d| d.code).collect();
    assert_eq!(
        codes,
        vec![ReasonCode::EntityUnreadable, ReasonCode::CorruptCache]
    );
    assert_eq!(
        output.diagnostics.all()[0].transformation,
        "P/Data/Transformation/t-broken.xml"
    );
}

#[test]
fn test_conversion_is_deterministic() {
    let first = serde_json::to_value(convert()).unwrap();
    let second = serde_json::to_value(convert()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_ids_follow_names() {
    let output = convert();
    let mut ids = IdGenerator::from_namespace(&EngineConfig::default().ids.namespace).unwrap();

    let unit = output.transformation("Contacts to NetSuite").unwrap();
    assert_eq!(unit.id, ids.transformation_id("Contacts to NetSuite"));
    assert_eq!(unit.legacy_id, "t-upsert");

    let xsd = output.schema("ContactsResponse.xsd").unwrap();
    assert_eq!(xsd.id, Some(ids.schema_id("ContactsResponse.xsd")));
    assert_eq!(unit.source.as_ref().unwrap().id, xsd.id);

    let csv = output.schema("New Flat Schema").unwrap();
    assert_eq!(csv.id.as_deref(), Some("doc-csv"));
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_upsert_list_preconditions() {
    let output = convert();
    let unit = output.transformation("Contacts to NetSuite").unwrap();

    let rules: Vec<(&str, bool)> = unit
        .mapping_rules
        .iter()
        .map(|r| (r.target_path.as_str(), r.is_precondition))
        .collect();
    assert_eq!(
        rules,
        vec![
            ("upsertList", true),
            ("upsertList/record", true),
            ("upsertList/record/Contact", true),
            ("upsertList/record/Contact/externalId", false),
        ]
    );
    let synthesized = unit
        .mapping_rules
        .iter()
        .filter(|r| r.is_precondition && r.transform_script.is_empty())
        .count();
    assert_eq!(synthesized, 2);
    assert_eq!(unit.mapping_rules[1].target_script, "upsertList$record.");

    let target = output.schema("netsuite_Upsert_input_call-upsert").unwrap();
    assert_eq!(target.provenance, Provenance::ConnectorCache);
    assert_eq!(target.id.as_deref(), Some("call-upsert"));
}

#[test]
fn test_root_alias_applies_only_to_plain_roots() {
    let output = convert();

    let aliased = output.transformation("Export aliased").unwrap();
    assert_eq!(
        aliased.mapping_rules.last().unwrap().target_path,
        "records/Contact/FirstName"
    );

    let namespaced = output.transformation("Export namespaced").unwrap();
    assert_eq!(
        namespaced.mapping_rules.last().unwrap().target_path,
        "Contacts/Contact/FirstName"
    );
}

#[test]
fn test_select_query_source() {
    let output = convert();
    let unit = output.transformation("Contacts to CSV").unwrap();

    let source = output
        .schema(&format!("salesforce_Query_output_{}", CALL))
        .unwrap();
    assert_eq!(source.provenance, Provenance::ReferenceChain);
    assert_eq!(source.root.name, "Contact");
    let fields: Vec<&str> = source.root.children.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(fields, vec!["Id", "FirstName", "LastName"]);
    assert!(source.root.children.iter().all(|c| c.is_leaf()));

    let chain = unit.chain.as_ref().unwrap();
    assert_eq!(chain.operation_id.as_deref(), Some("op-query"));
    assert_eq!(chain.query_id.as_deref(), Some(QUERY));
    assert_eq!(unit.source.as_ref().unwrap().id.as_deref(), Some(CALL));
    assert!(unit.source.as_ref().unwrap().document.is_none());
}

#[test]
fn test_flat_target_has_no_preconditions() {
    let output = convert();
    let unit = output.transformation("Contacts to CSV").unwrap();
    assert!(unit.mapping_rules.iter().all(|r| !r.is_precondition));
    assert_eq!(unit.mapping_rules[0].target_path, "__flat__/first_name");
    assert_eq!(unit.mapping_rules[1].target_script, "first_name");

    let target = output.schema("New Flat Schema").unwrap();
    assert_eq!(target.layout, Layout::Flat);
}

#[test]
fn test_corrupt_cache_keeps_named_schema() {
    let output = convert();
    let orders = output.schema("Orders.xsd").unwrap();
    assert!(!orders.has_structure());
    assert_eq!(orders.root.name, "Orders");
    assert_eq!(orders.provenance, Provenance::Unavailable);
    assert!(matches!(orders.issue, Some(StructureIssue::CorruptCache { .. })));

    let unit = output.transformation("Orders").unwrap();
    assert_eq!(unit.mapping_rules.len(), 3);
}

#[test]
fn test_shared_origin_keeps_most_complete_tree() {
    let output = convert();
    let shared: Vec<_> = output
        .schemas
        .iter()
        .filter(|s| s.name == "netsuite_Upsert_input_call-shared")
        .collect();
    assert_eq!(shared.len(), 1);

    let record = shared[0].root.child("record").unwrap();
    assert!(record.child("email").is_some());
    for name in ["Dedup A", "Dedup B"] {
        let unit = output.transformation(name).unwrap();
        assert_eq!(unit.target.as_ref().unwrap().id.as_deref(), Some("call-shared"));
    }
}

// =============================================================================
// Archive Readers
// =============================================================================

#[test]
fn test_unpacked_directory_matches_memory() {
    let dir = tempfile::tempdir().unwrap();
    for (path, bytes) in project_entries() {
        let file = dir.path().join(&path);
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(file, bytes).unwrap();
    }

    let from_dir = Converter::default().convert_path(dir.path()).unwrap();
    assert_eq!(
        serde_json::to_value(from_dir).unwrap(),
        serde_json::to_value(convert()).unwrap()
    );
}

fn write_zip(path: &Path) {
    let file = fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default();
    for (name, bytes) in project_entries() {
        zip.start_file(name, options).unwrap();
        zip.write_all(&bytes).unwrap();
    }
    zip.finish().unwrap();
}

#[test]
fn test_zip_archive_matches_memory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("project.jpk");
    write_zip(&path);

    let from_zip = Converter::default().convert_path(&path).unwrap();
    assert_eq!(
        serde_json::to_value(from_zip).unwrap(),
        serde_json::to_value(convert()).unwrap()
    );
}

#[test]
fn test_unreadable_zip_entry_skips_only_that_transformation() {
    const BAD: &str = "P/Data/Transformation/t-zz-bad.xml";
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("project.jpk");

    let mut buf = std::io::Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut buf);
        let options = zip::write::FileOptions::default();
        let mut entries = project_entries();
        entries.push((BAD.into(), include_str!("fixtures/query_contacts.xml").into()));
        for (name, bytes) in entries {
            zip.start_file(name, options).unwrap();
            zip.write_all(&bytes).unwrap();
        }
        zip.finish().unwrap();
    }
    let mut bytes = buf.into_inner();
    let header = bytes
        .windows(4)
        .enumerate()
        .filter(|(_, w)| *w == b"PK\x01\x02")
        .map(|(i, _)| i)
        .find(|&i| {
            let len = u16::from_le_bytes([bytes[i + 28], bytes[i + 29]]) as usize;
            &bytes[i + 46..i + 46 + len] == BAD.as_bytes()
        })
        .unwrap();
    // unknown compression method
    bytes[header + 10..header + 12].copy_from_slice(&0x7777u16.to_le_bytes());
    fs::write(&path, bytes).unwrap();

    let output = Converter::default().convert_path(&path).unwrap();
    assert_eq!(output.transformations.len(), 7);
    assert!(output
        .diagnostics
        .all()
        .iter()
        .any(|d| d.code == ReasonCode::EntityUnreadable && d.transformation == BAD));
}

#[test]
fn test_unopenable_container_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.jpk");
    fs::write(&path, b"definitely not a zip").unwrap();

    let err = Converter::default().convert_path(&path).unwrap_err();
    assert!(err.is_fatal());
}
