//! Configuration management for the conversion engine
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (jpk-bridge.toml)
//! - Environment variables (JPK_BRIDGE__*)
//!
//! Every heuristic table the engine relies on lives here as data, so a new
//! connector family or external system can be described without touching the
//! translator or the compiler.
//!
//! ## Example config file (jpk-bridge.toml):
//! ```toml
//! [translation]
//! navigation_prefixes = ["root", "transaction", "response", "body", "queryresponse", "result"]
//! structural_index_parents = ["baseRef"]
//!
//! [[translation.root_aliases]]
//! canonical = "Contacts"
//! runtime = "records"
//!
//! [schemas]
//! flat_default_field = "field"
//!
//! [[connectors]]
//! type_id = "101"
//! adapter = "netsuite"
//! direction = "input"
//! function = "upsert"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::model::Direction;

/// Main configuration for the conversion engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Archive path conventions
    #[serde(default)]
    pub layout: LayoutConfig,

    /// Path and script notation tables
    #[serde(default)]
    pub translation: TranslationConfig,

    /// Schema naming and flat-schema defaults
    #[serde(default)]
    pub schemas: SchemaDefaults,

    /// Connector type table
    #[serde(default = "default_connectors")]
    pub connectors: Vec<ConnectorRule>,

    /// Deterministic id settings
    #[serde(default)]
    pub ids: IdConfig,
}

/// Archive layout (directory names under the project folder)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutConfig {
    #[serde(default = "default_transformation_dir")]
    pub transformation_dir: String,

    #[serde(default = "default_operation_dir")]
    pub operation_dir: String,

    #[serde(default = "default_query_dir")]
    pub query_dir: String,

    #[serde(default = "default_document_dir")]
    pub document_dir: String,

    #[serde(default = "default_files_dir")]
    pub files_dir: String,

    #[serde(default = "default_unit_cache_dir")]
    pub unit_cache_dir: String,

    #[serde(default = "default_connector_cache_dir")]
    pub connector_cache_dir: String,

    /// Operation property holding the linked query entity id
    #[serde(default = "default_query_link_key")]
    pub query_link_key: String,
}

/// One canonical -> runtime root rename
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootAlias {
    pub canonical: String,
    pub runtime: String,
}

/// Notation tables used by path translation and source extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationConfig {
    #[serde(default = "default_root_aliases")]
    pub root_aliases: Vec<RootAlias>,

    /// Leading segments stripped from source expressions
    #[serde(default = "default_navigation_prefixes")]
    pub navigation_prefixes: Vec<String>,

    /// Collection wrappers stripped after an explicit `root` prefix
    #[serde(default = "default_collection_roots")]
    pub collection_roots: Vec<String>,

    /// Parents whose numeric child is part of the schema, not an array index
    #[serde(default = "default_structural_index_parents")]
    pub structural_index_parents: Vec<String>,

    /// Root-navigation marker used inside transform scripts
    #[serde(default = "default_script_root")]
    pub script_root: String,

    /// Response wrapper that follows the script root
    #[serde(default = "default_response_marker")]
    pub response_marker: String,

    /// Design-time marker nodes removed from trees and target paths
    #[serde(default = "default_prescript_marker")]
    pub prescript_marker: String,
}

/// Schema naming and flat-schema defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDefaults {
    #[serde(default = "default_flat_root")]
    pub flat_root: String,

    /// Pseudo-field name used by raw entries targeting a flat schema
    #[serde(default = "default_flat_pseudo_field")]
    pub flat_pseudo_field: String,

    #[serde(default = "default_flat_field")]
    pub flat_default_field: String,

    #[serde(default = "default_flat_name")]
    pub flat_default_name: String,

    /// Natures marking a flat schema
    #[serde(default = "default_flat_natures")]
    pub flat_natures: Vec<String>,

    /// Type ids marking a flat schema
    #[serde(default = "default_flat_type_ids")]
    pub flat_type_ids: Vec<String>,

    /// Type id of canonical (XSD-described) schemas
    #[serde(default = "default_canonical_type_id")]
    pub canonical_type_id: String,

    /// Object names hinting that a canonical schema came from an external system
    #[serde(default = "default_external_object_hints")]
    pub external_object_hints: Vec<String>,

    /// Tree-cache root used by request targets without a declared root
    #[serde(default = "default_request_cache_root")]
    pub request_cache_root: String,
}

/// Connector type table row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorRule {
    pub type_id: String,
    pub adapter: String,
    pub direction: Direction,
    /// Function used when the entity names none
    pub function: String,
    /// Prefix stripped from the entity's call type to derive the function
    #[serde(default)]
    pub call_type_prefix: Option<String>,
    /// Whether structure comes through the reference chain unless the role
    /// marker names a response
    #[serde(default)]
    pub chained: bool,
    /// Target refs carry the recovered document next to their origin
    #[serde(default)]
    pub embed_document: bool,
}

/// Deterministic id settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdConfig {
    /// Namespace for v5 ids; fixed so repeated runs are byte-identical
    #[serde(default = "default_id_namespace")]
    pub namespace: String,
}

// Default value functions
fn default_transformation_dir() -> String {
    "Data/Transformation".to_string()
}

fn default_operation_dir() -> String {
    "Data/Operation".to_string()
}

fn default_query_dir() -> String {
    "Data/SalesforceQuery".to_string()
}

fn default_document_dir() -> String {
    "Data/Document".to_string()
}

fn default_files_dir() -> String {
    "files".to_string()
}

fn default_unit_cache_dir() -> String {
    "cache/TransformationStructures".to_string()
}

fn default_connector_cache_dir() -> String {
    "cache/ConnectorCallStructures".to_string()
}

fn default_query_link_key() -> String {
    "salesforce_wizard_guid".to_string()
}

fn default_root_aliases() -> Vec<RootAlias> {
    vec![RootAlias {
        canonical: "Contacts".to_string(),
        runtime: "records".to_string(),
    }]
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_navigation_prefixes() -> Vec<String> {
    strings(&["root", "transaction", "response", "body", "queryresponse", "result"])
}

fn default_collection_roots() -> Vec<String> {
    strings(&["records", "rows", "row", "data", "items", "list", "entry", "element"])
}

fn default_structural_index_parents() -> Vec<String> {
    strings(&["baseRef"])
}

fn default_script_root() -> String {
    "jbroot".to_string()
}

fn default_response_marker() -> String {
    "jbresponse".to_string()
}

fn default_prescript_marker() -> String {
    "PRESCRIPT".to_string()
}

fn default_flat_root() -> String {
    "__flat__".to_string()
}

fn default_flat_pseudo_field() -> String {
    "data".to_string()
}

fn default_flat_field() -> String {
    "field".to_string()
}

fn default_flat_name() -> String {
    "New Flat Schema".to_string()
}

fn default_flat_natures() -> Vec<String> {
    strings(&["Flat"])
}

fn default_flat_type_ids() -> Vec<String> {
    strings(&["1"])
}

fn default_canonical_type_id() -> String {
    "4".to_string()
}

fn default_external_object_hints() -> Vec<String> {
    strings(&[
        "contact",
        "account",
        "opportunity",
        "lead",
        "case",
        "campaign",
        "task",
        "event",
        "user",
        "record",
    ])
}

fn default_request_cache_root() -> String {
    "root".to_string()
}

fn default_connectors() -> Vec<ConnectorRule> {
    let rule = |type_id: &str, adapter: &str, direction, function: &str| ConnectorRule {
        type_id: type_id.to_string(),
        adapter: adapter.to_string(),
        direction,
        function: function.to_string(),
        call_type_prefix: None,
        chained: false,
        embed_document: false,
    };
    vec![
        ConnectorRule {
            embed_document: true,
            ..rule("12", "salesforce", Direction::Input, "update")
        },
        ConnectorRule {
            chained: true,
            ..rule("14", "salesforce", Direction::Output, "query")
        },
        ConnectorRule {
            call_type_prefix: Some("NetSuite".to_string()),
            ..rule("101", "netsuite", Direction::Input, "upsert")
        },
        ConnectorRule {
            call_type_prefix: Some("NetSuite".to_string()),
            ..rule("102", "netsuite", Direction::Output, "upsert")
        },
    ]
}

fn default_id_namespace() -> String {
    "a3bb189e-8bf9-3888-9912-ace4e6543002".to_string()
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            transformation_dir: default_transformation_dir(),
            operation_dir: default_operation_dir(),
            query_dir: default_query_dir(),
            document_dir: default_document_dir(),
            files_dir: default_files_dir(),
            unit_cache_dir: default_unit_cache_dir(),
            connector_cache_dir: default_connector_cache_dir(),
            query_link_key: default_query_link_key(),
        }
    }
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            root_aliases: default_root_aliases(),
            navigation_prefixes: default_navigation_prefixes(),
            collection_roots: default_collection_roots(),
            structural_index_parents: default_structural_index_parents(),
            script_root: default_script_root(),
            response_marker: default_response_marker(),
            prescript_marker: default_prescript_marker(),
        }
    }
}

impl Default for SchemaDefaults {
    fn default() -> Self {
        Self {
            flat_root: default_flat_root(),
            flat_pseudo_field: default_flat_pseudo_field(),
            flat_default_field: default_flat_field(),
            flat_default_name: default_flat_name(),
            flat_natures: default_flat_natures(),
            flat_type_ids: default_flat_type_ids(),
            canonical_type_id: default_canonical_type_id(),
            external_object_hints: default_external_object_hints(),
            request_cache_root: default_request_cache_root(),
        }
    }
}

impl Default for IdConfig {
    fn default() -> Self {
        Self {
            namespace: default_id_namespace(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            layout: LayoutConfig::default(),
            translation: TranslationConfig::default(),
            schemas: SchemaDefaults::default(),
            connectors: default_connectors(),
            ids: IdConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from a specific file
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        // Load from default locations
        let config_locations = [
            "jpk-bridge.toml",
            ".jpk-bridge.toml",
            "config/jpk-bridge.toml",
        ];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // Load from XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("dev", "jpk", "jpk-bridge") {
            let xdg_config = config_dir.config_dir().join("jpk-bridge.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        // Load from specified path
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Load from environment variables (JPK_BRIDGE__*)
        builder = builder.add_source(
            Environment::with_prefix("JPK_BRIDGE")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Connector rule for a type id, if the type is connector-backed
    pub fn connector(&self, type_id: &str) -> Option<&ConnectorRule> {
        self.connectors.iter().find(|c| c.type_id == type_id)
    }

    /// Whether a schema with this nature / type id is flat
    pub fn is_flat(&self, nature: Option<&str>, type_id: Option<&str>) -> bool {
        nature.map_or(false, |n| self.schemas.flat_natures.iter().any(|f| f == n))
            || type_id.map_or(false, |t| self.schemas.flat_type_ids.iter().any(|f| f == t))
    }
}
