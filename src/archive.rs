//! Archive access
//!
//! The engine consumes archives only through [`ArchiveReader`]: list entries
//! by prefix, read an entry, check existence. Three readers are provided:
//!
//! - [`ZipArchiveReader`] for the packed container
//! - [`DirArchiveReader`] for an unpacked copy on disk
//! - [`MemoryArchive`] for embedding and tests
//!
//! [`ProjectLayout`] knows where each entity kind lives inside the project
//! folder.

use anyhow::Context;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use zip::ZipArchive;

use crate::config::LayoutConfig;
use crate::error::{ConvertError, Result};
use crate::model::Direction;

/// Read-only view of an archive's entries
pub trait ArchiveReader {
    /// Entry paths beginning with `prefix`, in sorted order
    fn list(&self, prefix: &str) -> Vec<String>;

    /// Raw bytes of one entry
    fn read(&self, path: &str) -> Result<Vec<u8>>;

    fn exists(&self, path: &str) -> bool;

    /// Entry decoded as UTF-8
    fn read_to_string(&self, path: &str) -> Result<String> {
        let bytes = self.read(path)?;
        String::from_utf8(bytes).map_err(|e| ConvertError::entity(path, e))
    }
}

/// Open a packed archive or an unpacked directory
pub fn open(path: &Path) -> Result<Box<dyn ArchiveReader>> {
    if path.is_dir() {
        Ok(Box::new(DirArchiveReader::open(path)?))
    } else {
        let file = fs::File::open(path).map_err(|e| {
            ConvertError::MalformedArchive(format!("{}: {}", path.display(), e))
        })?;
        Ok(Box::new(ZipArchiveReader::new(file)?))
    }
}

// =============================================================================
// Zip
// =============================================================================

/// Reader over a ZIP container
pub struct ZipArchiveReader<R: Read + Seek> {
    zip: RefCell<ZipArchive<R>>,
    names: Vec<String>,
    index: HashSet<String>,
}

impl<R: Read + Seek> ZipArchiveReader<R> {
    pub fn new(reader: R) -> Result<Self> {
        let zip = ZipArchive::new(reader)
            .map_err(|e| ConvertError::MalformedArchive(e.to_string()))?;
        let mut names: Vec<String> = zip
            .file_names()
            .filter(|n| !n.ends_with('/'))
            .map(str::to_string)
            .collect();
        names.sort();
        let index = names.iter().cloned().collect();
        Ok(Self {
            zip: RefCell::new(zip),
            names,
            index,
        })
    }
}

impl<R: Read + Seek> ArchiveReader for ZipArchiveReader<R> {
    fn list(&self, prefix: &str) -> Vec<String> {
        self.names
            .iter()
            .filter(|n| n.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        if !self.index.contains(path) {
            return Err(ConvertError::EntryNotFound(path.to_string()));
        }
        // The container opened; a bad entry only fails its own entity
        let mut zip = self.zip.borrow_mut();
        let mut entry = zip.by_name(path).map_err(|e| ConvertError::entity(path, e))?;
        let mut buf = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut buf)
            .map_err(|e| ConvertError::entity(path, e))?;
        Ok(buf)
    }

    fn exists(&self, path: &str) -> bool {
        self.index.contains(path)
    }
}

// =============================================================================
// Directory
// =============================================================================

/// Reader over an unpacked archive directory
pub struct DirArchiveReader {
    root: PathBuf,
    names: Vec<String>,
}

impl DirArchiveReader {
    pub fn open(root: &Path) -> Result<Self> {
        let names = Self::index(root)
            .map_err(|e| ConvertError::MalformedArchive(format!("{:#}", e)))?;
        Ok(Self {
            root: root.to_path_buf(),
            names,
        })
    }

    fn index(root: &Path) -> anyhow::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry.with_context(|| format!("walking {}", root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(root)
                .with_context(|| format!("{} outside archive root", entry.path().display()))?;
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            names.push(name);
        }
        names.sort();
        Ok(names)
    }
}

impl ArchiveReader for DirArchiveReader {
    fn list(&self, prefix: &str) -> Vec<String> {
        self.names
            .iter()
            .filter(|n| n.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        if !self.exists(path) {
            return Err(ConvertError::EntryNotFound(path.to_string()));
        }
        Ok(fs::read(self.root.join(path))?)
    }

    fn exists(&self, path: &str) -> bool {
        self.names.binary_search_by(|n| n.as_str().cmp(path)).is_ok()
    }
}

// =============================================================================
// Memory
// =============================================================================

/// In-memory archive
#[derive(Debug, Clone, Default)]
pub struct MemoryArchive {
    entries: BTreeMap<String, Vec<u8>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.entries.insert(path.into(), bytes.into());
    }

    pub fn with(mut self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(path, bytes);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ArchiveReader for MemoryArchive {
    fn list(&self, prefix: &str) -> Vec<String> {
        self.entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.entries
            .get(path)
            .cloned()
            .ok_or_else(|| ConvertError::EntryNotFound(path.to_string()))
    }

    fn exists(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }
}

// =============================================================================
// Project Layout
// =============================================================================

/// Entity locations inside one project folder
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    project: String,
    layout: LayoutConfig,
}

impl ProjectLayout {
    pub fn new(project: impl Into<String>, layout: LayoutConfig) -> Self {
        Self {
            project: project.into(),
            layout,
        }
    }

    /// Project folder = first component of the first transformation entry
    pub fn detect(archive: &dyn ArchiveReader, layout: &LayoutConfig) -> Option<Self> {
        let marker = format!("/{}/", layout.transformation_dir);
        archive
            .list("")
            .into_iter()
            .find(|name| name.contains(&marker))
            .and_then(|name| name.split('/').next().map(str::to_string))
            .map(|project| Self::new(project, layout.clone()))
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    fn entity(&self, dir: &str, id: &str) -> String {
        format!("{}/{}/{}.xml", self.project, dir, id)
    }

    fn dir_prefix(&self, dir: &str) -> String {
        format!("{}/{}/", self.project, dir)
    }

    /// Transformation entity paths in sorted order
    pub fn transformations(&self, archive: &dyn ArchiveReader) -> Vec<String> {
        self.xml_entities(archive, &self.layout.transformation_dir)
    }

    /// Operation entity paths in sorted order
    pub fn operations(&self, archive: &dyn ArchiveReader) -> Vec<String> {
        self.xml_entities(archive, &self.layout.operation_dir)
    }

    fn xml_entities(&self, archive: &dyn ArchiveReader, dir: &str) -> Vec<String> {
        archive
            .list(&self.dir_prefix(dir))
            .into_iter()
            .filter(|p| p.ends_with(".xml"))
            .collect()
    }

    pub fn operation(&self, id: &str) -> String {
        self.entity(&self.layout.operation_dir, id)
    }

    pub fn query(&self, id: &str) -> String {
        self.entity(&self.layout.query_dir, id)
    }

    pub fn document(&self, id: &str) -> String {
        self.entity(&self.layout.document_dir, id)
    }

    pub fn schema_file(&self, file_name: &str) -> String {
        format!("{}/{}/{}", self.project, self.layout.files_dir, file_name)
    }

    /// `{project}/cache/TransformationStructures/{unit}_{direction}.gz`
    pub fn unit_cache(&self, unit_id: &str, direction: Direction) -> String {
        format!(
            "{}/{}/{}_{}.gz",
            self.project, self.layout.unit_cache_dir, unit_id, direction
        )
    }

    /// `{project}/cache/ConnectorCallStructures/{origin}_{direction}.gz`
    pub fn connector_cache(&self, origin_id: &str, direction: Direction) -> String {
        format!(
            "{}/{}/{}_{}.gz",
            self.project, self.layout.connector_cache_dir, origin_id, direction
        )
    }

    pub fn query_link_key(&self) -> &str {
        &self.layout.query_link_key
    }
}

/// Entity id from its path (`.../{id}.xml`)
pub fn entity_id(path: &str) -> &str {
    let file = path.rsplit('/').next().unwrap_or(path);
    file.strip_suffix(".xml").unwrap_or(file)
}
