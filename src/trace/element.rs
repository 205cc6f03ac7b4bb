use std::collections::BTreeMap;

use regex::Regex;
use serde::Serialize;

use super::line_cache::Fragment;

/// A node materialized at one position of a resolved trace.
///
/// Owns its nested inner trace; nothing points back into the node pool.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceElement {
    pub filename: String,
    pub line: u32,
    pub code: String,
    pub node_type: String,
    pub fragment: Fragment,
    pub additional_info: String,
    pub taint_flags: String,
    pub is_default: bool,
    pub reason: String,
    pub knowledge: BTreeMap<String, String>,
    pub inner_stack_trace: Vec<StackTraceElement>,
}

impl StackTraceElement {
    /// This element plus every element nested below it.
    pub fn node_count(&self) -> usize {
        1 + self.inner_stack_trace.iter().map(Self::node_count).sum::<usize>()
    }

    /// Individual taint flags of this element.
    pub fn taint_flag_list(&self) -> impl Iterator<Item = &str> {
        self.taint_flags.split(',').map(str::trim).filter(|f| !f.is_empty())
    }

    fn fields(&self) -> impl Iterator<Item = &str> {
        [
            self.filename.as_str(),
            self.node_type.as_str(),
            self.additional_info.as_str(),
            self.taint_flags.as_str(),
            self.reason.as_str(),
        ]
        .into_iter()
        .chain(self.knowledge.values().map(String::as_str))
    }

    pub fn contains(&self, needle: &str) -> bool {
        if needle.is_empty() {
            return false;
        }
        let needle = needle.to_lowercase();
        self.fields()
            .chain(std::iter::once(self.code.as_str()))
            .any(|f| f.to_lowercase().contains(&needle))
    }

    pub fn matches(&self, value: &str) -> bool {
        !value.is_empty() && self.fields().any(|f| f.eq_ignore_ascii_case(value))
    }

    pub fn matches_pattern(&self, pattern: &Regex) -> bool {
        self.fields()
            .chain(std::iter::once(self.code.as_str()))
            .any(|f| pattern.is_match(f))
    }
}

/// Total elements in a trace, inner traces included.
pub fn trace_size(trace: &[StackTraceElement]) -> usize {
    trace.iter().map(StackTraceElement::node_count).sum()
}
