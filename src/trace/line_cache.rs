use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, warn};

use crate::archive::FprArchive;

/// Anything that can hand out source text by logical file name.
pub trait SourceProvider: Send + Sync {
    fn source(&self, file: &str) -> Option<String>;
}

impl SourceProvider for FprArchive {
    fn source(&self, file: &str) -> Option<String> {
        match self.read_source(file) {
            Ok(content) => content,
            Err(e) => {
                warn!(file, error = %e, "Failed to read source snapshot");
                None
            }
        }
    }
}

impl SourceProvider for HashMap<String, String> {
    fn source(&self, file: &str) -> Option<String> {
        self.get(file).cloned()
    }
}

/// A few lines of source around a trace location.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Fragment {
    pub content: String,
    pub start_line: u32,
    pub end_line: u32,
}

/// Per-run cache of split source files, keyed by logical file name.
///
/// Owned by whoever drives a build so that two archives opened in the same
/// process never see each other's content.
pub struct LineCache<'a> {
    source: &'a dyn SourceProvider,
    files: DashMap<String, Arc<Vec<String>>>,
}

impl<'a> LineCache<'a> {
    pub fn new(source: &'a dyn SourceProvider) -> Self {
        Self { source, files: DashMap::new() }
    }

    /// Lines of `file`; unknown files resolve to no lines.
    pub fn lines(&self, file: &str) -> Arc<Vec<String>> {
        if let Some(hit) = self.files.get(file) {
            return Arc::clone(hit.value());
        }
        let lines: Vec<String> = match self.source.source(file) {
            Some(text) => text.lines().map(str::to_string).collect(),
            None => {
                debug!(file, "Source not present in archive");
                Vec::new()
            }
        };
        let lines = Arc::new(lines);
        self.files.insert(file.to_string(), Arc::clone(&lines));
        lines
    }

    pub fn has_file(&self, file: &str) -> bool {
        !self.lines(file).is_empty()
    }

    /// Full content with `\n` separators, `None` when the file is unknown.
    pub fn content(&self, file: &str) -> Option<String> {
        let lines = self.lines(file);
        (!lines.is_empty()).then(|| lines.join("\n"))
    }

    /// One 1-based line, empty when out of range.
    pub fn line(&self, file: &str, line: u32) -> String {
        let lines = self.lines(file);
        if line == 0 {
            return String::new();
        }
        lines.get(line as usize - 1).cloned().unwrap_or_default()
    }

    /// Lines `line - before ..= line + after`, clamped to the file.
    pub fn fragment(&self, file: &str, line: u32, before: u32, after: u32) -> Fragment {
        let lines = self.lines(file);
        if lines.is_empty() || line == 0 {
            return Fragment::default();
        }
        let start = line.saturating_sub(before).max(1);
        let end = line.saturating_add(after).min(lines.len() as u32);
        if start > end {
            return Fragment::default();
        }
        let mut content = String::new();
        for l in &lines[start as usize - 1..end as usize] {
            content.push_str(l);
            content.push('\n');
        }
        Fragment { content, start_line: start, end_line: end }
    }

    pub fn cached_files(&self) -> usize {
        self.files.len()
    }
}
