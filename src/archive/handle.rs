use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::errors::AuditError;
use super::source_index::parse_source_index;

pub const FVDL_ENTRY: &str = "audit.fvdl";
pub const AUDIT_ENTRY: &str = "audit.xml";
pub const FILTER_TEMPLATE_ENTRY: &str = "filtertemplate.xml";
pub const REMEDIATIONS_ENTRY: &str = "remediations.xml";
pub const SOURCE_INDEX_ENTRY: &str = "src-archive/index.xml";
pub const SOURCE_ARCHIVE_DIR: &str = "src-archive/";
const DAST_ENTRY: &str = "webinspect.xml";
/// Upper bound on the buffer reserved from a header-declared entry size.
const MAX_PREALLOCATION: usize = 64 * 1024 * 1024;

fn preallocation(declared: u64) -> usize {
    usize::try_from(declared).unwrap_or(usize::MAX).min(MAX_PREALLOCATION)
}

/// Normalize a caller-supplied entry name to the form stored in the zip.
pub(crate) fn entry_name(name: &str) -> String {
    name.replace('\\', "/").trim_start_matches('/').to_string()
}

/// An opened FPR container.
///
/// Entries are read on demand straight out of the zip; nothing touches disk
/// unless [`FprArchive::extract_to_temp`] is called. Dropping the handle
/// closes the underlying file.
pub struct FprArchive {
    path: PathBuf,
    zip: Mutex<ZipArchive<BufReader<File>>>,
    entries: Vec<String>,
    source_index: HashMap<String, String>,
}

impl std::fmt::Debug for FprArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FprArchive")
            .field("path", &self.path)
            .field("entries", &self.entries.len())
            .field("sources", &self.source_index.len())
            .finish()
    }
}

impl FprArchive {
    /// Open and validate an FPR.
    pub fn open(path: &Path) -> Result<Self, AuditError> {
        if !path.is_file() {
            return Err(AuditError::simple(format!("FPR file not found: {}", path.display())));
        }
        let file = File::open(path)?;
        let zip = ZipArchive::new(BufReader::new(file)).map_err(|e| {
            AuditError::technical(format!("Unable to read FPR {} as a zip archive: {}", path.display(), e))
        })?;
        let entries: Vec<String> = zip.file_names().map(entry_name).collect();

        let mut archive = Self {
            path: path.to_path_buf(),
            zip: Mutex::new(zip),
            entries,
            source_index: HashMap::new(),
        };
        archive.validate()?;

        if let Some(bytes) = archive.read_optional(SOURCE_INDEX_ENTRY)? {
            archive.source_index = parse_source_index(&bytes)?;
        }
        info!(
            path = %path.display(),
            entries = archive.entries.len(),
            sources = archive.source_index.len(),
            "Opened FPR"
        );
        Ok(archive)
    }

    fn validate(&self) -> Result<(), AuditError> {
        if self.has_entry(FVDL_ENTRY) {
            return Ok(());
        }
        if self.has_entry(DAST_ENTRY) {
            return Err(AuditError::simple(
                "FPR contains dynamic scan results (webinspect.xml); only static-analysis FPRs can be audited",
            ));
        }
        Err(AuditError::simple(format!(
            "Invalid FPR {}: {} not found",
            self.path.display(),
            FVDL_ENTRY
        )))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entry_names(&self) -> &[String] {
        &self.entries
    }

    pub fn has_entry(&self, name: &str) -> bool {
        let name = entry_name(name);
        self.entries.iter().any(|e| *e == name)
    }

    pub fn has_remediations(&self) -> bool {
        self.has_entry(REMEDIATIONS_ENTRY)
    }

    /// Source index present and at least one snapshot file beside it.
    pub fn has_source(&self) -> bool {
        self.has_entry(SOURCE_INDEX_ENTRY)
            && self.entries.iter().any(|e| {
                e.starts_with(SOURCE_ARCHIVE_DIR) && *e != SOURCE_INDEX_ENTRY && !e.ends_with('/')
            })
    }

    /// Logical source path to internal archive path.
    pub fn source_index(&self) -> &HashMap<String, String> {
        &self.source_index
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, ZipArchive<BufReader<File>>>, AuditError> {
        self.zip
            .lock()
            .map_err(|_| AuditError::Internal("archive handle lock poisoned".into()))
    }

    pub fn read_optional(&self, name: &str) -> Result<Option<Vec<u8>>, AuditError> {
        let name = entry_name(name);
        if !self.entries.iter().any(|e| *e == name) {
            return Ok(None);
        }
        let mut zip = self.lock()?;
        // Stored names may or may not carry a leading slash.
        let stored = zip
            .file_names()
            .find(|n| entry_name(n) == name)
            .map(str::to_string)
            .unwrap_or(name);
        let mut entry = zip.by_name(&stored)?;
        let mut buf = Vec::with_capacity(preallocation(entry.size()));
        entry.read_to_end(&mut buf)?;
        Ok(Some(buf))
    }

    pub fn read_entry(&self, name: &str) -> Result<Vec<u8>, AuditError> {
        self.read_optional(name)?.ok_or_else(|| {
            AuditError::technical(format!("Entry {} not found in {}", name, self.path.display()))
        })
    }

    pub fn read_entry_string(&self, name: &str) -> Result<String, AuditError> {
        let bytes = self.read_entry(name)?;
        String::from_utf8(bytes)
            .map_err(|e| AuditError::technical(format!("Entry {} is not valid UTF-8: {}", name, e)))
    }

    /// Source snapshot for a logical file name, `None` when not indexed.
    pub fn read_source(&self, relative: &str) -> Result<Option<String>, AuditError> {
        let Some(internal) = self.source_index.get(relative) else {
            return Ok(None);
        };
        match self.read_optional(internal)? {
            Some(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            None => {
                debug!(file = relative, internal = %internal, "Indexed source missing from archive");
                Ok(None)
            }
        }
    }

    /// Write a copy of this archive to `dest`, swapping in `replacements`
    /// (entry name to new content). Entries not present are added.
    ///
    /// The copy is written next to `dest` and renamed into place, so `dest`
    /// may be this archive's own path.
    pub fn write_with_replacements(
        &self,
        dest: &Path,
        replacements: &BTreeMap<String, Vec<u8>>,
    ) -> Result<(), AuditError> {
        let parent = dest
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let tmp = tempfile::NamedTempFile::new_in(parent)?;
        let replaced: BTreeMap<String, &Vec<u8>> =
            replacements.iter().map(|(k, v)| (entry_name(k), v)).collect();

        {
            let mut zip = self.lock()?;
            let mut writer = ZipWriter::new(tmp.as_file().try_clone()?);
            for i in 0..zip.len() {
                let entry = zip.by_index_raw(i)?;
                if replaced.contains_key(&entry_name(entry.name())) {
                    continue;
                }
                writer.raw_copy_file(entry)?;
            }
            let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
            for (name, content) in &replaced {
                writer.start_file(name.as_str(), options)?;
                writer.write_all(content)?;
            }
            writer.finish()?;
        }

        tmp.persist(dest)
            .map_err(|e| AuditError::technical(format!("Unable to write {}: {}", dest.display(), e.error)))?;
        info!(dest = %dest.display(), replaced = replaced.len(), "Wrote updated FPR");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::Write;
    use std::path::Path;

    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    /// Write a zip with the given (name, content) entries.
    pub fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = ZipWriter::new(file);
        for (name, content) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::write_zip;
    use super::*;
    use tempfile::TempDir;

    const INDEX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<properties><entry key="src/App.java">src-archive/0.java</entry></properties>"#;

    #[test]
    fn test_preallocation_ignores_oversized_headers() {
        assert_eq!(preallocation(12), 12);
        assert_eq!(preallocation(u64::MAX), MAX_PREALLOCATION);
    }

    #[test]
    fn test_open_valid_archive_with_source() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scan.fpr");
        write_zip(&path, &[
            ("audit.fvdl", "<FVDL/>"),
            ("src-archive/index.xml", INDEX),
            ("src-archive/0.java", "class App {}\n"),
        ]);

        let archive = FprArchive::open(&path).unwrap();
        assert!(archive.has_source());
        assert!(!archive.has_remediations());
        assert_eq!(archive.source_index().get("src/App.java").unwrap(), "src-archive/0.java");
        assert_eq!(archive.read_source("src/App.java").unwrap().unwrap(), "class App {}\n");
        assert!(archive.read_source("missing.java").unwrap().is_none());
        assert_eq!(archive.read_entry("/audit.fvdl").unwrap(), b"<FVDL/>");
    }

    #[test]
    fn test_index_without_sources_is_not_has_source() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scan.fpr");
        write_zip(&path, &[("audit.fvdl", "<FVDL/>"), ("src-archive/index.xml", INDEX)]);
        assert!(!FprArchive::open(&path).unwrap().has_source());
    }

    #[test]
    fn test_missing_fvdl_is_user_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.fpr");
        write_zip(&path, &[("audit.xml", "<Audit/>")]);
        let err = FprArchive::open(&path).unwrap_err();
        assert!(err.is_user_error());
        assert!(err.to_string().contains("audit.fvdl"));
    }

    #[test]
    fn test_dynamic_scan_archive_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dast.fpr");
        write_zip(&path, &[("webinspect.xml", "<Scan/>")]);
        let err = FprArchive::open(&path).unwrap_err();
        assert!(err.to_string().contains("dynamic"));
    }

    #[test]
    fn test_not_a_zip_is_technical() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.fpr");
        std::fs::write(&path, "not a zip").unwrap();
        let err = FprArchive::open(&path).unwrap_err();
        assert!(matches!(err, AuditError::Technical(_)));
    }

    #[test]
    fn test_write_with_replacements_in_place() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scan.fpr");
        write_zip(&path, &[("audit.fvdl", "<FVDL/>"), ("audit.xml", "<Audit/>")]);

        let archive = FprArchive::open(&path).unwrap();
        let mut replacements = BTreeMap::new();
        replacements.insert("audit.xml".to_string(), b"<Audit v=\"2\"/>".to_vec());
        replacements.insert("remediations.xml".to_string(), b"<Remediations/>".to_vec());
        archive.write_with_replacements(&path, &replacements).unwrap();
        drop(archive);

        let reopened = FprArchive::open(&path).unwrap();
        assert_eq!(reopened.read_entry("audit.fvdl").unwrap(), b"<FVDL/>");
        assert_eq!(reopened.read_entry_string("audit.xml").unwrap(), "<Audit v=\"2\"/>");
        assert!(reopened.has_remediations());
        assert_eq!(reopened.entry_names().len(), 3);
    }
}
