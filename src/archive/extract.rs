use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;

use tempfile::TempDir;
use tracing::{debug, info};

use crate::errors::AuditError;
use super::handle::FprArchive;

/// Maximum decompressed size per entry; guards against zip bombs.
const MAX_ENTRY_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// A physical copy of the archive contents. The directory is removed when
/// this value is dropped.
#[derive(Debug)]
pub struct ExtractedArchive {
    dir: TempDir,
}

impl ExtractedArchive {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

impl FprArchive {
    /// Extract every entry into a fresh temporary directory.
    pub fn extract_to_temp(&self) -> Result<ExtractedArchive, AuditError> {
        let dir = tempfile::Builder::new().prefix("fpr-extract-").tempdir()?;
        let mut zip = self.lock()?;

        for i in 0..zip.len() {
            let mut entry = zip.by_index(i)?;
            let Some(relative) = entry.enclosed_name() else {
                return Err(AuditError::technical(format!(
                    "Archive entry escapes extraction directory: {}",
                    entry.name()
                )));
            };
            let target = dir.path().join(relative);

            if entry.is_dir() {
                fs::create_dir_all(&target)?;
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&target)?;
            let copied = io::copy(&mut (&mut entry).take(MAX_ENTRY_SIZE), &mut out)?;
            debug!(entry = %target.display(), bytes = copied, "Extracted entry");
        }

        info!(dir = %dir.path().display(), "Extracted FPR");
        Ok(ExtractedArchive { dir })
    }
}
