//! Datafiles and journals
//!
//! A collection's documents live in append-only files inside the collection
//! directory:
//!
//! - `journal-<fid>.db`: the active append target
//! - `datafile-<fid>.db`: a sealed, immutable journal or compaction output
//! - `compaction-<fid>.db`: compaction output while it is being written
//!
//! # File Layout
//!
//! ```text
//! ┌────────────────────────────────────┐
//! │ Header (32 bytes)                  │
//! ├────────────────────────────────────┤
//! │ Marker 1                           │
//! ├────────────────────────────────────┤
//! │ ...                                │
//! └────────────────────────────────────┘
//! ```

use crate::marker::{Marker, MarkerError};
use byteorder::{ByteOrder, LittleEndian};
use shoal_core::DatafileId;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes identifying a datafile: "SHDF"
pub const DATAFILE_MAGIC: [u8; 4] = *b"SHDF";

/// Current datafile format version
pub const DATAFILE_FORMAT_VERSION: u32 = 1;

/// Size of the datafile header in bytes
pub const DATAFILE_HEADER_SIZE: usize = 32;

/// Role of a file within a collection directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatafileKind {
    /// Active append target
    Journal,
    /// Sealed, read-only
    Datafile,
    /// Compaction output in progress
    Compaction,
}

impl DatafileKind {
    /// File name prefix
    pub fn prefix(&self) -> &'static str {
        match self {
            DatafileKind::Journal => "journal",
            DatafileKind::Datafile => "datafile",
            DatafileKind::Compaction => "compaction",
        }
    }

    /// Parse a file name of the form `<prefix>-<fid>.db`
    pub fn parse_file_name(name: &str) -> Option<(DatafileKind, DatafileId)> {
        let stem = name.strip_suffix(".db")?;
        let (prefix, fid) = stem.split_once('-')?;
        let kind = match prefix {
            "journal" => DatafileKind::Journal,
            "datafile" => DatafileKind::Datafile,
            "compaction" => DatafileKind::Compaction,
            _ => return None,
        };
        Some((kind, DatafileId(fid.parse().ok()?)))
    }
}

/// Position of a marker inside the collection's files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MarkerLocation {
    /// File holding the marker
    pub fid: DatafileId,
    /// Byte offset of the marker from the start of the file
    pub offset: u64,
    /// Encoded marker size
    pub size: u32,
}

/// Datafile header (32 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatafileHeader {
    /// Magic bytes: "SHDF"
    pub magic: [u8; 4],
    /// Format version
    pub format_version: u32,
    /// File identifier
    pub fid: DatafileId,
    /// Creation time (microseconds since epoch)
    pub created_at: i64,
}

impl DatafileHeader {
    /// Create a header for a new file
    pub fn new(fid: DatafileId) -> Self {
        Self {
            magic: DATAFILE_MAGIC,
            format_version: DATAFILE_FORMAT_VERSION,
            fid,
            created_at: chrono::Utc::now().timestamp_micros(),
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; DATAFILE_HEADER_SIZE] {
        let mut bytes = [0u8; DATAFILE_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        LittleEndian::write_u32(&mut bytes[4..8], self.format_version);
        LittleEndian::write_u64(&mut bytes[8..16], self.fid.as_u64());
        LittleEndian::write_i64(&mut bytes[16..24], self.created_at);
        bytes
    }

    /// Deserialize header from bytes
    pub fn from_bytes(bytes: &[u8; DATAFILE_HEADER_SIZE]) -> Self {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        Self {
            magic,
            format_version: LittleEndian::read_u32(&bytes[4..8]),
            fid: DatafileId(LittleEndian::read_u64(&bytes[8..16])),
            created_at: LittleEndian::read_i64(&bytes[16..24]),
        }
    }

    /// Whether magic and version are recognised
    pub fn is_valid(&self) -> bool {
        self.magic == DATAFILE_MAGIC && self.format_version == DATAFILE_FORMAT_VERSION
    }
}

fn invalid_data(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// Open handle to a datafile, journal or compaction file
pub struct Datafile {
    file: File,
    fid: DatafileId,
    kind: DatafileKind,
    write_position: u64,
    path: PathBuf,
    dir: PathBuf,
}

impl Datafile {
    /// Create a new file and write its header
    pub fn create(dir: &Path, fid: DatafileId, kind: DatafileKind) -> io::Result<Self> {
        let path = Self::file_path(dir, kind, fid);
        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .read(true)
            .open(&path)?;
        file.write_all(&DatafileHeader::new(fid).to_bytes())?;

        Ok(Datafile {
            file,
            fid,
            kind,
            write_position: DATAFILE_HEADER_SIZE as u64,
            path,
            dir: dir.to_path_buf(),
        })
    }

    /// Open an existing file and validate its header
    ///
    /// Journals are opened for appending; other kinds are read-only.
    pub fn open(dir: &Path, fid: DatafileId, kind: DatafileKind) -> io::Result<Self> {
        let path = Self::file_path(dir, kind, fid);
        let mut file = OpenOptions::new()
            .read(true)
            .write(kind == DatafileKind::Journal)
            .open(&path)?;

        let mut header_bytes = [0u8; DATAFILE_HEADER_SIZE];
        file.read_exact(&mut header_bytes)?;
        let header = DatafileHeader::from_bytes(&header_bytes);
        if !header.is_valid() {
            return Err(invalid_data(format!(
                "invalid datafile header in {}",
                path.display()
            )));
        }
        if header.fid != fid {
            return Err(invalid_data(format!(
                "datafile id mismatch: expected {}, got {}",
                fid, header.fid
            )));
        }

        let write_position = file.seek(SeekFrom::End(0))?;
        Ok(Datafile {
            file,
            fid,
            kind,
            write_position,
            path,
            dir: dir.to_path_buf(),
        })
    }

    /// Path of a file of `kind` with id `fid`
    ///
    /// Format: `<prefix>-<fid>.db`
    pub fn file_path(dir: &Path, kind: DatafileKind, fid: DatafileId) -> PathBuf {
        dir.join(format!("{}-{}.db", kind.prefix(), fid))
    }

    /// File identifier
    pub fn fid(&self) -> DatafileId {
        self.fid
    }

    /// Current role
    pub fn kind(&self) -> DatafileKind {
        self.kind
    }

    /// Current size in bytes
    pub fn size(&self) -> u64 {
        self.write_position
    }

    /// Whether the file holds no markers
    pub fn is_empty(&self) -> bool {
        self.write_position <= DATAFILE_HEADER_SIZE as u64
    }

    /// Current path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a marker, returning where it was written
    pub fn append(&mut self, marker: &Marker) -> io::Result<MarkerLocation> {
        if self.kind == DatafileKind::Datafile {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "cannot append to a sealed datafile",
            ));
        }
        let bytes = marker.to_bytes();
        let offset = self.write_position;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&bytes)?;
        self.write_position += bytes.len() as u64;
        Ok(MarkerLocation {
            fid: self.fid,
            offset,
            size: bytes.len() as u32,
        })
    }

    /// Read the marker stored at `location`
    pub fn read_at(&mut self, location: MarkerLocation) -> crate::Result<Marker> {
        if location.fid != self.fid || location.offset + location.size as u64 > self.write_position
        {
            return Err(shoal_core::Error::corrupted(format!(
                "marker location {:?} outside datafile {}",
                location, self.fid
            )));
        }
        let mut buf = vec![0u8; location.size as usize];
        self.file.seek(SeekFrom::Start(location.offset))?;
        self.file.read_exact(&mut buf)?;
        let (marker, _) = Marker::from_bytes(&buf)?;
        Ok(marker)
    }

    /// Sync file data to disk
    pub fn sync(&mut self) -> io::Result<()> {
        self.file.sync_all()
    }

    /// Seal a journal or compaction file: sync and rename to a datafile
    pub fn seal(&mut self) -> io::Result<()> {
        if self.kind == DatafileKind::Datafile {
            return Ok(());
        }
        self.file.sync_all()?;
        let sealed = Self::file_path(&self.dir, DatafileKind::Datafile, self.fid);
        fs::rename(&self.path, &sealed)?;
        self.path = sealed;
        self.kind = DatafileKind::Datafile;
        Ok(())
    }

    /// Cut a journal at `position`, dropping a partially written tail
    pub fn truncate(&mut self, position: u64) -> io::Result<()> {
        if self.kind != DatafileKind::Journal {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "only journals can be truncated",
            ));
        }
        self.file.set_len(position)?;
        self.file.sync_all()?;
        self.write_position = position;
        Ok(())
    }

    /// Read all markers in append order
    pub fn scan(&mut self) -> io::Result<MarkerScan> {
        let mut data = Vec::with_capacity(self.write_position as usize);
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_to_end(&mut data)?;
        Ok(MarkerScan {
            data,
            fid: self.fid,
            position: DATAFILE_HEADER_SIZE,
            failed: false,
        })
    }
}

/// A marker read during a scan, with its location
#[derive(Debug, Clone)]
pub struct ScannedMarker {
    /// Where the marker was read from
    pub location: MarkerLocation,
    /// The decoded marker
    pub marker: Marker,
}

/// Failure while scanning, with the offset where it happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanError {
    /// Offset of the unreadable marker
    pub offset: u64,
    /// Decoder error
    pub error: MarkerError,
}

/// Sequential marker iterator over a file's contents
///
/// Yields markers in append order. Stops after the first error.
pub struct MarkerScan {
    data: Vec<u8>,
    fid: DatafileId,
    position: usize,
    failed: bool,
}

impl Iterator for MarkerScan {
    type Item = Result<ScannedMarker, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.position >= self.data.len() {
            return None;
        }
        let offset = self.position;
        match Marker::from_bytes(&self.data[offset..]) {
            Ok((marker, consumed)) => {
                self.position += consumed;
                Some(Ok(ScannedMarker {
                    location: MarkerLocation {
                        fid: self.fid,
                        offset: offset as u64,
                        size: consumed as u32,
                    },
                    marker,
                }))
            }
            Err(error) => {
                self.failed = true;
                Some(Err(ScanError {
                    offset: offset as u64,
                    error,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::DocumentMarker;
    use serde_json::json;
    use shoal_core::{DocumentId, RevisionId};
    use tempfile::tempdir;

    fn doc(did: u64) -> Marker {
        Marker::Document(
            DocumentMarker::new(DocumentId(did), RevisionId(did), None, &json!({"n": did}))
                .unwrap(),
        )
    }

    #[test]
    fn test_header_roundtrip() {
        let header = DatafileHeader::new(DatafileId(77));
        let parsed = DatafileHeader::from_bytes(&header.to_bytes());
        assert_eq!(parsed, header);
        assert!(parsed.is_valid());
    }

    #[test]
    fn test_file_naming() {
        let dir = Path::new("/tmp/c");
        assert_eq!(
            Datafile::file_path(dir, DatafileKind::Journal, DatafileId(12)),
            PathBuf::from("/tmp/c/journal-12.db")
        );
        assert_eq!(
            DatafileKind::parse_file_name("datafile-12.db"),
            Some((DatafileKind::Datafile, DatafileId(12)))
        );
        assert_eq!(
            DatafileKind::parse_file_name("compaction-3.db"),
            Some((DatafileKind::Compaction, DatafileId(3)))
        );
        assert_eq!(DatafileKind::parse_file_name("parameter.json"), None);
        assert_eq!(DatafileKind::parse_file_name("journal-x.db"), None);
    }

    #[test]
    fn test_append_and_read_at() {
        let dir = tempdir().unwrap();
        let mut journal = Datafile::create(dir.path(), DatafileId(1), DatafileKind::Journal).unwrap();
        assert!(journal.is_empty());

        let first = journal.append(&doc(1)).unwrap();
        let second = journal.append(&doc(2)).unwrap();
        assert_eq!(first.offset, DATAFILE_HEADER_SIZE as u64);
        assert_eq!(second.offset, first.offset + first.size as u64);

        assert_eq!(journal.read_at(second).unwrap().did(), DocumentId(2));
        assert_eq!(journal.read_at(first).unwrap().did(), DocumentId(1));
    }

    #[test]
    fn test_seal_renames_journal() {
        let dir = tempdir().unwrap();
        let mut journal = Datafile::create(dir.path(), DatafileId(5), DatafileKind::Journal).unwrap();
        let loc = journal.append(&doc(1)).unwrap();
        journal.seal().unwrap();

        assert_eq!(journal.kind(), DatafileKind::Datafile);
        assert!(dir.path().join("datafile-5.db").exists());
        assert!(!dir.path().join("journal-5.db").exists());
        assert!(journal.append(&doc(2)).is_err());
        assert_eq!(journal.read_at(loc).unwrap().did(), DocumentId(1));
    }

    #[test]
    fn test_scan_reopened_file() {
        let dir = tempdir().unwrap();
        {
            let mut journal =
                Datafile::create(dir.path(), DatafileId(9), DatafileKind::Journal).unwrap();
            for i in 1..=3 {
                journal.append(&doc(i)).unwrap();
            }
            journal.sync().unwrap();
        }

        let mut reopened = Datafile::open(dir.path(), DatafileId(9), DatafileKind::Journal).unwrap();
        let dids: Vec<u64> = reopened
            .scan()
            .unwrap()
            .map(|m| m.unwrap().marker.did().as_u64())
            .collect();
        assert_eq!(dids, vec![1, 2, 3]);
    }

    #[test]
    fn test_scan_stops_at_truncated_tail() {
        let dir = tempdir().unwrap();
        let path;
        let good_end;
        {
            let mut journal =
                Datafile::create(dir.path(), DatafileId(2), DatafileKind::Journal).unwrap();
            let loc = journal.append(&doc(1)).unwrap();
            good_end = loc.offset + loc.size as u64;
            journal.append(&doc(2)).unwrap();
            path = journal.path().to_path_buf();
        }
        let len = fs::metadata(&path).unwrap().len();
        OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(len - 3)
            .unwrap();

        let mut journal = Datafile::open(dir.path(), DatafileId(2), DatafileKind::Journal).unwrap();
        let results: Vec<_> = journal.scan().unwrap().collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        let err = results[1].clone().unwrap_err();
        assert_eq!(err.offset, good_end);
        assert_eq!(err.error, MarkerError::InsufficientData);

        journal.truncate(err.offset).unwrap();
        assert_eq!(journal.size(), good_end);
    }

    #[test]
    fn test_open_rejects_wrong_id() {
        let dir = tempdir().unwrap();
        Datafile::create(dir.path(), DatafileId(4), DatafileKind::Journal).unwrap();
        fs::rename(
            dir.path().join("journal-4.db"),
            dir.path().join("journal-8.db"),
        )
        .unwrap();
        assert!(Datafile::open(dir.path(), DatafileId(8), DatafileKind::Journal).is_err());
    }
}
