//! JPK Bridge
//!
//! Schema discovery and transformation conversion for legacy integration
//! project archives. Reads an exported archive, recovers the structure of
//! every schema its transformations reference, and emits portable
//! transformation units plus a deduplicated schema list.
//!
//! ## Features
//!
//! - **Structure Recovery**: XSD files, embedded documents, gzipped tree
//!   caches and the call -> operation -> query reference chain
//! - **Path Translation**: native `[root$loop.field$]` notation to slash
//!   paths, with runtime root aliasing
//! - **Mapping Compilation**: preconditions synthesized and ordered, loop
//!   bindings extracted, non-leaf targets dropped with a diagnostic
//! - **Schema Linking**: one canonical document per identity, deterministic ids
//!
//! ## Archive Layout
//!
//! ```text
//! {project}/
//! ├── Data/
//! │   ├── Transformation/{id}.xml
//! │   ├── Operation/{id}.xml
//! │   ├── SalesforceQuery/{id}.xml
//! │   └── Document/{id}.xml
//! ├── files/*.xsd
//! └── cache/
//!     ├── TransformationStructures/{unit}_{input|output}.gz
//!     └── ConnectorCallStructures/{call}_{input|output}.gz
//! ```

pub mod archive;
pub mod chain;
pub mod checksum;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod entity;
pub mod error;
pub mod ids;
pub mod linker;
pub mod loader;
pub mod mapping;
pub mod model;
pub mod path;
pub mod tree_cache;
pub mod xsd;

pub use archive::{ArchiveReader, DirArchiveReader, MemoryArchive, ProjectLayout, ZipArchiveReader};
pub use chain::{ChainDescriptor, ChainResolution, ReferenceChainResolver};
pub use checksum::Checksum;
pub use config::EngineConfig;
pub use diagnostics::{DiagnosticItem, Diagnostics, ReasonCode, Severity};
pub use engine::{ConversionOutput, Converter};
pub use error::{ConvertError, Result, StructureIssue};
pub use ids::IdGenerator;
pub use linker::SchemaLinker;
pub use loader::{LoadedSchema, SchemaStructureLoader};
pub use mapping::{CompiledMappings, MappingRuleCompiler};
pub use model::{
    Direction, FieldNode, LoopBinding, MappingRule, Origin, ReferenceChainLink, SchemaDocument,
    SchemaRef, SchemaRole, TransformationUnit,
};
pub use path::{PathTranslator, RootAliasTable, TranslationContext};
