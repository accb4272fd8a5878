//! Schema Linking
//!
//! Runs once every transformation of the archive is known:
//!
//! 1. Candidates are grouped by identity key (origin correlation id and
//!    direction, else name); structurally identical candidates collapse.
//! 2. Each group picks one canonical document: the candidate whose tree
//!    holds every path read or written by the most referencing units.
//! 3. The canonical id is written back to every reference.
//! 4. [`SchemaLinker::validate`] checks names and ids of every reference
//!    against the final schema list.

use tracing::{debug, info, warn};

use crate::checksum::Checksum;
use crate::config::TranslationConfig;
use crate::diagnostics::Diagnostics;
use crate::error::ConvertError;
use crate::ids::IdGenerator;
use crate::model::{FieldNode, IdentityKey, SchemaDocument, SchemaRole, TransformationUnit};
use crate::path::RootAliasTable;

const ROLES: [SchemaRole; 2] = [SchemaRole::Source, SchemaRole::Target];

/// Identity under which `doc` is deduplicated
pub fn identity_key(doc: &SchemaDocument) -> IdentityKey {
    doc.identity_key()
}

/// Candidates sharing one identity key
#[derive(Debug)]
struct CandidateGroup {
    key: IdentityKey,
    candidates: Vec<(Checksum, SchemaDocument)>,
}

pub struct SchemaLinker<'a> {
    translation: &'a TranslationConfig,
    aliases: RootAliasTable,
}

impl<'a> SchemaLinker<'a> {
    pub fn new(translation: &'a TranslationConfig) -> Self {
        Self {
            translation,
            aliases: RootAliasTable::new(translation.root_aliases.clone()),
        }
    }

    /// Collapse `candidates` to one canonical document per identity key,
    /// assign ids, and write them back to every reference in `units`.
    ///
    /// Returns the canonical documents in first-appearance order.
    pub fn assign_ids(
        &self,
        candidates: Vec<SchemaDocument>,
        units: &mut [TransformationUnit],
        ids: &mut IdGenerator,
    ) -> Vec<SchemaDocument> {
        let mut groups: Vec<CandidateGroup> = Vec::new();
        for doc in candidates {
            let key = identity_key(&doc);
            let checksum = Checksum::of_tree(&doc.root);
            match groups.iter_mut().find(|g| g.key == key) {
                Some(group) => {
                    if !group.candidates.iter().any(|(c, _)| *c == checksum) {
                        group.candidates.push((checksum, doc));
                    }
                }
                None => groups.push(CandidateGroup {
                    key,
                    candidates: vec![(checksum, doc)],
                }),
            }
        }

        let mut canonical: Vec<(IdentityKey, SchemaDocument)> = Vec::with_capacity(groups.len());
        for mut group in groups {
            let candidate_count = group.candidates.len();
            let chosen = self.choose(&group, units);
            let (_, mut doc) = group.candidates.swap_remove(chosen);
            if candidate_count > 1 {
                info!(
                    "Schema {} had {} distinct trees; kept candidate {}",
                    group.key, candidate_count, chosen
                );
            }

            let id = match &doc.native_id {
                Some(native) => native.clone(),
                None => ids.schema_id(&doc.name),
            };
            doc.id = Some(id);
            canonical.push((group.key, doc));
        }

        for unit in units.iter_mut() {
            for role in ROLES {
                let Some(reference) = unit.schema_ref_mut(role) else {
                    continue;
                };
                let key = reference.identity_key();
                let Some((_, doc)) = canonical.iter().find(|(k, _)| *k == key) else {
                    continue;
                };
                reference.id = doc.id.clone();
                if reference.document.is_some() {
                    reference.document = Some(doc.clone());
                }
            }
        }

        canonical.into_iter().map(|(_, doc)| doc).collect()
    }

    /// Index of the candidate fully covering the most referencing units;
    /// ties go to the earliest candidate
    fn choose(&self, group: &CandidateGroup, units: &[TransformationUnit]) -> usize {
        if group.candidates.len() < 2 {
            return 0;
        }

        let mut best = (0, 0);
        for (index, (_, doc)) in group.candidates.iter().enumerate() {
            let score = units
                .iter()
                .flat_map(|unit| ROLES.into_iter().map(move |role| (unit, role)))
                .filter(|(unit, role)| {
                    unit.schema_ref(*role)
                        .map_or(false, |r| r.identity_key() == group.key)
                })
                .filter(|(unit, role)| self.covers(&doc.root, unit, *role))
                .count();
            debug!("Schema {} candidate {} covers {} unit(s)", group.key, index, score);
            if score > best.1 {
                best = (index, score);
            }
        }
        best.0
    }

    /// Whether `root` holds every path `unit` reads (source) or writes (target)
    fn covers(&self, root: &FieldNode, unit: &TransformationUnit, role: SchemaRole) -> bool {
        match role {
            SchemaRole::Source => unit.source_paths().all(|p| self.contains_path(root, p)),
            SchemaRole::Target => unit.leaf_target_paths().all(|p| self.contains_path(root, p)),
        }
    }

    /// Walk `path` through `root`.
    ///
    /// Script-root and response markers are skipped, as is a leading segment
    /// naming the root itself. A numeric segment after a structural parent
    /// is a position, not a field.
    fn contains_path(&self, root: &FieldNode, path: &str) -> bool {
        let all: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut segments = all.as_slice();
        if let Some(rest) = segments.strip_prefix(&[self.translation.script_root.as_str()]) {
            segments = rest;
        }
        if let Some(rest) = segments.strip_prefix(&[self.translation.response_marker.as_str()]) {
            segments = rest;
        }
        if let Some((first, rest)) = segments.split_first() {
            let names_root = *first == root.name
                || self.aliases.runtime_for(&root.name) == Some(*first);
            if names_root {
                segments = rest;
            }
        }

        let mut node = root;
        let mut previous: Option<&str> = None;
        for &segment in segments {
            let structural = previous.map_or(false, |p| {
                self.translation.structural_index_parents.iter().any(|s| s == p)
            });
            if structural && segment.chars().all(|c| c.is_ascii_digit()) {
                previous = Some(segment);
                continue;
            }
            match node.child(segment) {
                Some(child) => node = child,
                None => return false,
            }
            previous = Some(segment);
        }
        true
    }

    /// Check every reference against the final schema list
    pub fn validate(&self, units: &[TransformationUnit], schemas: &[SchemaDocument]) -> Diagnostics {
        let mut diagnostics = Diagnostics::new();
        for unit in units {
            for role in ROLES {
                let Some(reference) = unit.schema_ref(role) else {
                    continue;
                };
                let named: Vec<&SchemaDocument> =
                    schemas.iter().filter(|s| s.name == reference.name).collect();
                if named.is_empty() {
                    let err = ConvertError::UnresolvedSchemaReference {
                        transformation: unit.name.clone(),
                        schema: reference.name.clone(),
                    };
                    warn!("{} ({})", err, role);
                    diagnostics.schema_name_not_found(&unit.name, role, &reference.name);
                    continue;
                }
                if let Some(id) = &reference.id {
                    if !named.iter().any(|s| s.id.as_ref() == Some(id)) {
                        warn!("{} {}: id {} does not belong to {}", unit.name, role, id, reference.name);
                        diagnostics.schema_id_mismatch(&unit.name, role, &reference.name, id);
                    }
                }
            }
        }
        diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Direction, Layout, MappingRule, Origin, Provenance, SchemaFormat, SchemaRef,
    };

    const NS: &str = "a3bb189e-8bf9-3888-9912-ace4e6543002";

    fn origin(id: &str) -> Origin {
        Origin {
            adapter_id: "netsuite".into(),
            function_name: "upsert".into(),
            direction: Direction::Output,
            id: id.into(),
        }
    }

    fn doc(name: &str, root: FieldNode, origin: Option<Origin>) -> SchemaDocument {
        SchemaDocument {
            id: None,
            name: name.into(),
            root,
            layout: Layout::Tree,
            format: SchemaFormat::Xml,
            native_id: origin.as_ref().map(|o| o.id.clone()),
            origin,
            provenance: Provenance::ConnectorCache,
            issue: None,
        }
    }

    fn unit(name: &str, source: SchemaRef, source_paths: &[&str]) -> TransformationUnit {
        TransformationUnit {
            id: format!("id-{}", name),
            legacy_id: name.into(),
            name: name.into(),
            source: Some(source),
            target: None,
            mapping_rules: source_paths
                .iter()
                .map(|p| MappingRule {
                    target_path: "out/value".into(),
                    target_script: "out$value$".into(),
                    transform_script: String::new(),
                    source_paths: Some(vec![p.to_string()]),
                    is_precondition: false,
                })
                .collect(),
            loop_mapping_rules: Vec::new(),
            chain: None,
        }
    }

    fn reference(doc: &SchemaDocument) -> SchemaRef {
        SchemaRef {
            name: doc.name.clone(),
            id: None,
            origin: doc.origin.clone(),
            document: None,
        }
    }

    fn response(children: &[&str]) -> FieldNode {
        FieldNode::new("upsertListResponse").with_children(
            children.iter().map(|c| FieldNode::leaf(*c, "string")).collect(),
        )
    }

    #[test]
    fn test_dedup_prefers_complete_candidate() {
        let translation = TranslationConfig::default();
        let linker = SchemaLinker::new(&translation);
        let mut ids = IdGenerator::from_namespace(NS).unwrap();

        let partial = doc("ns_out", response(&["status"]), Some(origin("call-1")));
        let complete = doc("ns_out", response(&["status", "baseRef"]), Some(origin("call-1")));
        let mut units = vec![unit(
            "t1",
            reference(&partial),
            &["upsertListResponse/baseRef"],
        )];

        let schemas = linker.assign_ids(vec![partial, complete.clone()], &mut units, &mut ids);
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0].root, complete.root);
        assert_eq!(schemas[0].id.as_deref(), Some("call-1"));
        assert_eq!(units[0].source.as_ref().unwrap().id.as_deref(), Some("call-1"));
    }

    #[test]
    fn test_identical_trees_collapse() {
        let translation = TranslationConfig::default();
        let linker = SchemaLinker::new(&translation);
        let mut ids = IdGenerator::from_namespace(NS).unwrap();

        let a = doc("Contacts.xsd", response(&["x"]), None);
        let b = doc("Contacts.xsd", response(&["x"]), None);
        let mut units = vec![unit("t1", reference(&a), &[]), unit("t2", reference(&b), &[])];

        let schemas = linker.assign_ids(vec![a, b], &mut units, &mut ids);
        assert_eq!(schemas.len(), 1);
        let id = schemas[0].id.clone();
        assert!(id.is_some());
        assert_eq!(units[0].source.as_ref().unwrap().id, id);
        assert_eq!(units[1].source.as_ref().unwrap().id, id);
    }

    #[test]
    fn test_ids_are_deterministic() {
        let translation = TranslationConfig::default();
        let linker = SchemaLinker::new(&translation);
        let run = || {
            let mut ids = IdGenerator::from_namespace(NS).unwrap();
            let a = doc("Contacts.xsd", response(&["x"]), None);
            let mut units = vec![unit("t1", reference(&a), &[])];
            linker.assign_ids(vec![a], &mut units, &mut ids)[0].id.clone()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_contains_path_markers_and_positions() {
        let translation = TranslationConfig::default();
        let linker = SchemaLinker::new(&translation);
        let root = FieldNode::new("upsertListResponse").with_children(vec![FieldNode::new(
            "writeResponse",
        )
        .with_children(vec![FieldNode::new("baseRef").with_children(vec![
            FieldNode::new("RecordRef").with_children(vec![FieldNode::leaf("externalId", "string")]),
        ])])]);

        assert!(linker.contains_path(
            &root,
            "jbroot/jbresponse/upsertListResponse/writeResponse/baseRef/1/RecordRef/externalId"
        ));
        assert!(linker.contains_path(&root, "writeResponse/baseRef"));
        assert!(!linker.contains_path(&root, "writeResponse/2/baseRef"));
        assert!(!linker.contains_path(&root, "writeResponse/missing"));
    }

    #[test]
    fn test_validate_reports_unknown_names_and_foreign_ids() {
        let translation = TranslationConfig::default();
        let linker = SchemaLinker::new(&translation);

        let mut known = doc("Known", response(&["x"]), None);
        known.id = Some("id-known".into());
        let mut other = doc("Other", response(&["y"]), None);
        other.id = Some("id-other".into());

        let missing = SchemaRef {
            name: "Missing".into(),
            id: None,
            origin: None,
            document: None,
        };
        let foreign = SchemaRef {
            name: "Known".into(),
            id: Some("id-other".into()),
            origin: None,
            document: None,
        };
        let units = vec![unit("t1", missing, &[]), unit("t2", foreign, &[])];

        let diagnostics = linker.validate(&units, &[known, other]);
        assert_eq!(diagnostics.len(), 2);
        let codes: Vec<_> = diagnostics.all().iter().map(|d| d.code.as_str()).collect();
        assert_eq!(codes, vec!["SCHEMA_NAME_NOT_FOUND", "SCHEMA_ID_MISMATCH"]);
        assert_eq!(diagnostics.all()[0].transformation, "t1");
    }
}
