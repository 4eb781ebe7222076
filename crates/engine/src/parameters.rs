//! Persisted collection metadata
//!
//! A collection directory holds:
//! - `parameter.json`: identity, name, type and journal settings
//! - `index-<iid>.json`: one file per secondary index definition
//!
//! Index contents are never persisted; loading rebuilds them from the
//! definitions by replaying documents. Every file is written to a temporary
//! name first and renamed into place.

use serde::{Deserialize, Serialize};
use shoal_core::{CollectionId, CollectionType, Error, IndexDefinition, IndexId, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the collection metadata file
pub const PARAMETER_FILE: &str = "parameter.json";

/// Prefix of collection directories inside the database directory
pub const COLLECTION_DIR_PREFIX: &str = "collection-";

const INDEX_FILE_PREFIX: &str = "index-";

/// Contents of `parameter.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionParameters {
    /// Collection identifier
    pub cid: CollectionId,
    /// Current name
    pub name: String,
    /// Document or edge collection
    #[serde(rename = "type")]
    pub collection_type: CollectionType,
    /// Whether the name may use the system prefix
    #[serde(default)]
    pub is_system: bool,
    /// Journal rotation size in bytes
    pub journal_size: u64,
    /// Sync after every write
    #[serde(default)]
    pub wait_for_sync: bool,
    /// Set once the collection has been dropped
    #[serde(default)]
    pub deleted: bool,
}

impl CollectionParameters {
    /// Directory name of a collection
    pub fn dir_name(cid: CollectionId) -> String {
        format!("{}{}", COLLECTION_DIR_PREFIX, cid)
    }

    /// Parse a collection directory name
    pub fn parse_dir_name(name: &str) -> Option<CollectionId> {
        name.strip_prefix(COLLECTION_DIR_PREFIX)?
            .parse::<u64>()
            .ok()
            .map(CollectionId)
    }

    /// Read `parameter.json` from a collection directory
    ///
    /// # Errors
    ///
    /// `Corrupted` if the file exists but cannot be parsed.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(PARAMETER_FILE);
        let bytes = fs::read(&path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::corrupted(format!("{}: {}", path.display(), e)))
    }

    /// Write `parameter.json` into a collection directory
    pub fn save(&self, dir: &Path) -> Result<()> {
        write_atomic(&dir.join(PARAMETER_FILE), &serde_json::to_vec_pretty(self)?)
    }
}

fn index_file(dir: &Path, iid: IndexId) -> PathBuf {
    dir.join(format!("{}{}.json", INDEX_FILE_PREFIX, iid))
}

/// Persist an index definition
pub fn save_index(dir: &Path, definition: &IndexDefinition) -> Result<()> {
    write_atomic(
        &index_file(dir, definition.id),
        &serde_json::to_vec_pretty(definition)?,
    )
}

/// Remove a persisted index definition
pub fn remove_index(dir: &Path, iid: IndexId) -> Result<()> {
    match fs::remove_file(index_file(dir, iid)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Every persisted index definition, ordered by index id
///
/// # Errors
///
/// `Corrupted` for an unparseable definition file.
pub fn load_indexes(dir: &Path) -> Result<Vec<IndexDefinition>> {
    let mut definitions = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some(id) = name
            .strip_prefix(INDEX_FILE_PREFIX)
            .and_then(|rest| rest.strip_suffix(".json"))
            .and_then(|id| id.parse::<u64>().ok())
        else {
            continue;
        };
        let bytes = fs::read(entry.path())?;
        let definition: IndexDefinition = serde_json::from_slice(&bytes)
            .map_err(|e| Error::corrupted(format!("index definition {}: {}", name, e)))?;
        if definition.id != IndexId(id) {
            return Err(Error::corrupted(format!(
                "index definition {} carries id {}",
                name, definition.id
            )));
        }
        definitions.push(definition);
    }
    definitions.sort_by_key(|d| d.id);
    Ok(definitions)
}

/// Write `bytes` to `path` through a temporary file and a rename
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)?;
    fs::File::open(&tmp)?.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}
