use std::path::{Component, Path, PathBuf};

use data_encoding::BASE64;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::archive::{FprArchive, REMEDIATIONS_ENTRY};
use crate::errors::AuditError;
use crate::utils::text::strip_quotes;
use super::document::{Change, Remediation, RemediationDocument};
use super::fuzzy::FuzzySearcher;

/// Outcome counts for one remediation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemediationMetric {
    pub total_remediations: usize,
    pub applied_remediations: usize,
    pub skipped_remediations: usize,
    pub changes_applied: usize,
    pub changes_skipped: usize,
}

/// base64 of the SHA-256 of `content`.
pub fn content_hash(content: &str) -> String {
    BASE64.encode(&Sha256::digest(content.as_bytes()))
}

/// Lexically resolve `.` and `..` without touching the file system.
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Replays recorded edits onto a source tree.
#[derive(Debug)]
pub struct RemediationApplier {
    source_root: PathBuf,
    searcher: FuzzySearcher,
}

impl RemediationApplier {
    pub fn new(source_dir: &str) -> Result<Self, AuditError> {
        let dir = strip_quotes(source_dir);
        if dir.is_empty() {
            return Err(AuditError::simple("Source directory must not be blank"));
        }
        let path = Path::new(dir);
        let absolute = if path.is_absolute() { path.to_path_buf() } else { std::env::current_dir()?.join(path) };
        let source_root = normalize_path(&absolute);
        debug!(root = %source_root.display(), "Remediation source root");
        Ok(Self { source_root, searcher: FuzzySearcher::default() })
    }

    pub fn with_max_mismatches(mut self, max_mismatches: usize) -> Self {
        self.searcher = FuzzySearcher::new(max_mismatches);
        self
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    /// Apply the remediations recorded in an archive.
    pub fn apply_archive(&self, archive: &FprArchive) -> Result<RemediationMetric, AuditError> {
        let Some(bytes) = archive.read_optional(REMEDIATIONS_ENTRY)? else {
            return Err(AuditError::simple(format!(
                "No {} found in {}; nothing to apply",
                REMEDIATIONS_ENTRY,
                archive.path().display()
            )));
        };
        let doc = RemediationDocument::parse(&bytes)?;
        self.apply(&doc.remediations())
    }

    /// Target path inside the source root, `None` when it would escape it.
    fn resolve(&self, filename: &str) -> Option<PathBuf> {
        let relative = filename.replace('\\', "/");
        let path = normalize_path(&self.source_root.join(relative.trim_start_matches('/')));
        path.starts_with(&self.source_root).then_some(path)
    }

    pub fn apply(&self, remediations: &[Remediation]) -> Result<RemediationMetric, AuditError> {
        let mut metric = RemediationMetric { total_remediations: remediations.len(), ..Default::default() };

        for remediation in remediations {
            let mut applied_any = false;
            for fc in &remediation.file_changes {
                let Some(path) = self.resolve(&fc.filename) else {
                    error!(
                        file = %fc.filename,
                        "Skipping file that resolves outside the source directory (possible path traversal)"
                    );
                    metric.changes_skipped += fc.changes.len();
                    continue;
                };
                if !path.is_file() {
                    return Err(AuditError::technical(format!(
                        "Source code file not present at: {}",
                        path.display()
                    )));
                }

                let mut content = std::fs::read_to_string(&path)?.replace("\r\n", "\n");
                for change in &fc.changes {
                    match self.apply_change(&content, &fc.hash, change) {
                        Some(updated) => {
                            std::fs::write(&path, &updated)?;
                            content = updated;
                            metric.changes_applied += 1;
                            applied_any = true;
                            info!(instance_id = %remediation.instance_id, file = %fc.filename, "Remediation applied");
                        }
                        None => metric.changes_skipped += 1,
                    }
                }
            }
            if applied_any {
                metric.applied_remediations += 1;
            }
        }

        metric.skipped_remediations = metric.total_remediations - metric.applied_remediations;
        info!(
            total = metric.total_remediations,
            applied = metric.applied_remediations,
            skipped = metric.skipped_remediations,
            "Remediation run complete"
        );
        Ok(metric)
    }

    /// New file content with `change` applied, or `None` when it cannot be
    /// located.
    fn apply_change(&self, content: &str, hash: &str, change: &Change) -> Option<String> {
        let lines: Vec<&str> = content.lines().collect();

        let (from, to) = if content_hash(content) == hash {
            (change.line_from as usize, change.line_to as usize)
        } else {
            debug!("File content changed since capture, searching for the edit location");
            let context: Vec<&str> = change.context.lines().collect();
            let Some(context_start) = self.searcher.find_context(&lines, &context) else {
                warn!("Context lines not found, remediation not possible");
                return None;
            };
            let original: Vec<&str> = change.original_code.lines().collect();
            let Some((start, end)) = self.searcher.find_original(&lines, &original, context_start) else {
                warn!("Original code lines not found, remediation not possible");
                return None;
            };
            (start + 1, end + 1)
        };

        if from == 0 || from > to + 1 || to > lines.len() {
            warn!(from, to, lines = lines.len(), "Recorded line range is outside the file");
            return None;
        }

        let mut updated: Vec<&str> = Vec::with_capacity(lines.len());
        updated.extend_from_slice(&lines[..from - 1]);
        updated.extend(change.new_code.lines());
        updated.extend_from_slice(&lines[to..]);
        let mut out = updated.join("\n");
        out.push('\n');
        Some(out)
    }
}
