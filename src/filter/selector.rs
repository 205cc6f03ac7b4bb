use std::collections::BTreeSet;

use regex::RegexBuilder;
use tracing::{debug, info, warn};

use crate::errors::AuditError;
use crate::vuln::{Priority, Vulnerability};
use super::engine::FilterEngine;
use super::query::SearchTree;
use super::template::{FilterSet, FilterTemplate};

const REGEX_META: &[char] = &['*', '?', '.', '+', '^', '$', '|', '\\', '(', ')', '[', ']', '{', '}'];

/// Which findings a run should look at.
#[derive(Debug, Clone, Default)]
pub struct FilterSelection {
    pub filter_set: Option<FilterSet>,
    pub folders: Vec<String>,
    pub priorities: Vec<Priority>,
}

impl FilterSelection {
    pub fn is_filtering_by_folder(&self) -> bool {
        !self.folders.is_empty()
    }

    /// Apply the filter set (and folder restriction), then the priority
    /// restriction. Input order is preserved.
    pub fn apply<'v>(&self, vulns: &'v [Vulnerability]) -> Result<Vec<&'v Vulnerability>, AuditError> {
        let selected = match &self.filter_set {
            Some(fs) => FilterEngine::new(fs).select(vulns, &self.folders)?,
            None => vulns.iter().collect(),
        };
        if self.priorities.is_empty() {
            return Ok(selected);
        }
        let tree = priority_query(&self.priorities)?;
        let before = selected.len();
        let selected: Vec<_> = selected.into_iter().filter(|v| tree.matches(v)).collect();
        info!(priorities = ?self.priorities, before, after = selected.len(), "Priority filter applied");
        Ok(selected)
    }
}

pub struct FilterSetSelector;

impl FilterSetSelector {
    /// Resolve the active filter set and validate the folder/priority request.
    pub fn select(
        template: Option<&FilterTemplate>,
        name_or_id: Option<&str>,
        no_filter_set: bool,
        folders: &[String],
        priorities: &[String],
    ) -> Result<FilterSelection, AuditError> {
        let filter_set = Self::resolve(template, name_or_id, no_filter_set)?;

        if !folders.is_empty() && filter_set.is_none() {
            return Err(AuditError::simple(
                "Folder selection requires an active filter set. Specify one with --filter-set, \
                 or make sure a filter set is enabled in the FPR.",
            ));
        }
        match &filter_set {
            Some(fs) => info!(filter_set = %fs.title, "Active filter set"),
            None => info!("No active filter set, auditing all applicable issues"),
        }

        Ok(FilterSelection {
            filter_set: filter_set.cloned(),
            folders: folders.to_vec(),
            priorities: resolve_priorities(priorities)?,
        })
    }

    fn resolve<'t>(
        template: Option<&'t FilterTemplate>,
        name_or_id: Option<&str>,
        no_filter_set: bool,
    ) -> Result<Option<&'t FilterSet>, AuditError> {
        if let Some(name) = name_or_id.map(str::trim).filter(|n| !n.is_empty()) {
            return Self::find(template, name).map(Some);
        }
        if no_filter_set {
            info!("Filter sets disabled for this run");
            return Ok(None);
        }
        debug!("No filter set requested, using the first enabled one");
        Ok(template.and_then(FilterTemplate::default_enabled_filter_set))
    }

    /// Match by id, then by regular expression or title prefix.
    pub fn find<'t>(template: Option<&'t FilterTemplate>, name_or_id: &str) -> Result<&'t FilterSet, AuditError> {
        let sets = match template {
            Some(t) if !t.filter_sets.is_empty() => &t.filter_sets,
            _ => {
                return Err(AuditError::simple(
                    "A filter set was specified, but the FPR does not contain a filtertemplate.xml \
                     or it has no filter sets defined.",
                ))
            }
        };
        let input = name_or_id.trim();

        if let Some(fs) = sets.iter().find(|fs| fs.id.eq_ignore_ascii_case(input)) {
            return Ok(fs);
        }

        let matches: Vec<&FilterSet> = if input.contains(REGEX_META) {
            debug!(pattern = input, "Interpreting filter set name as a regular expression");
            let re = RegexBuilder::new(&format!("^(?:{})$", input))
                .case_insensitive(true)
                .build()
                .map_err(|e| {
                    AuditError::simple(format!("Invalid regular expression provided for filter set name: {}", e))
                })?;
            sets.iter().filter(|fs| re.is_match(&fs.title)).collect()
        } else {
            let lower = input.to_lowercase();
            sets.iter().filter(|fs| fs.title.to_lowercase().starts_with(&lower)).collect()
        };

        match matches.as_slice() {
            [single] => Ok(*single),
            [] => Err(AuditError::simple(format!(
                "Filter set '{}' not found. Available filter sets are: {}",
                name_or_id,
                titles(sets.iter())
            ))),
            _ => Err(AuditError::simple(format!(
                "Filter set pattern '{}' is ambiguous. Did you mean one of: {}",
                name_or_id,
                titles(matches.iter().copied())
            ))),
        }
    }
}

fn titles<'x>(sets: impl Iterator<Item = &'x FilterSet>) -> String {
    sets.map(|fs| format!("'{}'", fs.title)).collect::<Vec<_>>().join(", ")
}

fn valid_priorities() -> String {
    Priority::ALL.iter().map(Priority::as_str).collect::<Vec<_>>().join(", ")
}

/// Resolve user priority input by case-insensitive prefix or `*` wildcard.
pub fn resolve_priorities(input: &[String]) -> Result<Vec<Priority>, AuditError> {
    let mut resolved = BTreeSet::new();
    for raw in input {
        let value = raw.trim().to_lowercase();
        if value.is_empty() {
            continue;
        }
        let matches: Vec<Priority> = if value.contains('*') {
            let pattern = format!("^{}$", regex::escape(&value).replace("\\*", ".*"));
            let re = RegexBuilder::new(&pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| AuditError::simple(format!("Invalid priority wildcard '{}': {}", raw, e)))?;
            let m: Vec<_> = Priority::ALL.into_iter().filter(|p| re.is_match(p.as_str())).collect();
            if m.is_empty() {
                return Err(AuditError::simple(format!(
                    "Priority wildcard '{}' did not match any valid priorities: {}",
                    raw,
                    valid_priorities()
                )));
            }
            m
        } else {
            let m: Vec<_> = Priority::ALL
                .into_iter()
                .filter(|p| p.as_str().to_lowercase().starts_with(&value))
                .collect();
            match m.len() {
                0 => {
                    return Err(AuditError::simple(format!(
                        "Invalid priority value: '{}'. Valid values are: {}",
                        raw,
                        valid_priorities()
                    )))
                }
                1 => m,
                _ => {
                    return Err(AuditError::simple(format!(
                        "Ambiguous priority value: '{}'. It could mean any of: {}",
                        raw,
                        m.iter().map(Priority::as_str).collect::<Vec<_>>().join(", ")
                    )))
                }
            }
        };
        resolved.extend(matches);
    }
    if !input.is_empty() && resolved.is_empty() {
        warn!("Priority filter given but nothing resolved, no issues will be audited");
    }
    Ok(resolved.into_iter().collect())
}

/// Synthetic query selecting the given priorities.
pub fn priority_query(priorities: &[Priority]) -> Result<SearchTree, AuditError> {
    let query = priorities
        .iter()
        .map(|p| format!("[fortify priority order]:\"{}\"", p))
        .collect::<Vec<_>>()
        .join(" OR ");
    SearchTree::parse(&query)
}
