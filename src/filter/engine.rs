use std::collections::BTreeMap;

use tracing::{debug, error, info};

use crate::errors::AuditError;
use crate::vuln::Vulnerability;
use super::query::SearchTree;
use super::template::FilterSet;

/// Compile a filter query, logging and disabling it when malformed.
fn compile(filter_set: &str, query: &str) -> SearchTree {
    match SearchTree::parse(query) {
        Ok(tree) => tree,
        Err(e) => {
            error!(filter_set, query, error = %e, "Failed to parse filter query, filter will never match");
            SearchTree::never()
        }
    }
}

/// A filter set with its queries compiled once.
pub struct FilterEngine<'a> {
    set: &'a FilterSet,
    folders: Vec<(&'a str, SearchTree)>,
    hides: Vec<SearchTree>,
}

impl<'a> FilterEngine<'a> {
    pub fn new(set: &'a FilterSet) -> Self {
        let folders = set
            .filters
            .iter()
            .filter(|f| f.is_set_folder())
            .map(|f| (f.action_param.as_str(), compile(&set.title, &f.query)))
            .collect();
        let hides = set
            .filters
            .iter()
            .filter(|f| f.is_hide())
            .map(|f| compile(&set.title, &f.query))
            .collect();
        Self { set, folders, hides }
    }

    pub fn filter_set(&self) -> &FilterSet {
        self.set
    }

    /// Folder id of the first matching folder filter.
    pub fn folder_of(&self, vuln: &Vulnerability) -> Option<&'a str> {
        self.folders
            .iter()
            .find(|(_, tree)| tree.matches(vuln))
            .map(|(folder, _)| *folder)
    }

    pub fn is_hidden(&self, vuln: &Vulnerability) -> bool {
        self.hides.iter().any(|tree| tree.matches(vuln))
    }

    /// Bucket findings by folder id. Each finding lands in at most one folder
    /// and hidden findings are dropped from every folder. Input order is kept
    /// within a folder.
    pub fn classify<'v>(&self, vulns: &'v [Vulnerability]) -> BTreeMap<&'a str, Vec<&'v Vulnerability>> {
        let mut buckets: BTreeMap<&'a str, Vec<&'v Vulnerability>> = BTreeMap::new();
        for vuln in vulns {
            let Some(folder) = self.folder_of(vuln) else {
                continue;
            };
            if self.is_hidden(vuln) {
                debug!(instance_id = %vuln.instance_id, "Finding hidden by filter set");
                continue;
            }
            buckets.entry(folder).or_default().push(vuln);
        }
        buckets
    }

    /// Findings in any folder, or only in the named folders when given.
    ///
    /// Folder names match case-insensitively; when none of them exists the
    /// error lists the available folders.
    pub fn select<'v>(
        &self,
        vulns: &'v [Vulnerability],
        folder_names: &[String],
    ) -> Result<Vec<&'v Vulnerability>, AuditError> {
        let target_ids: Vec<&str> = if folder_names.is_empty() {
            Vec::new()
        } else {
            let ids: Vec<&str> = self
                .set
                .folder_definitions
                .iter()
                .filter(|fd| folder_names.iter().any(|n| n.trim().eq_ignore_ascii_case(&fd.name)))
                .map(|fd| fd.id.as_str())
                .collect();
            if ids.is_empty() {
                let available = self
                    .set
                    .folder_definitions
                    .iter()
                    .map(|fd| format!("'{}'", fd.name))
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(AuditError::simple(format!(
                    "Folder(s) not found in FilterSet '{}'. Available folders: {}",
                    self.set.title, available
                )));
            }
            ids
        };

        let selected: Vec<&'v Vulnerability> = vulns
            .iter()
            .filter(|v| match self.folder_of(v) {
                Some(folder) => {
                    (target_ids.is_empty() || target_ids.contains(&folder)) && !self.is_hidden(v)
                }
                None => false,
            })
            .collect();

        if folder_names.is_empty() {
            info!(
                filter_set = %self.set.title,
                selected = selected.len(),
                total = vulns.len(),
                "Filter set applied"
            );
        } else {
            info!(
                filter_set = %self.set.title,
                folders = ?folder_names,
                selected = selected.len(),
                "Filtered by folder"
            );
        }
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::template::fixtures::TEMPLATE;
    use crate::filter::template::parse_filter_template;
    use crate::vuln::Priority;

    fn vuln(id: &str, category: &str, priority: Priority) -> Vulnerability {
        Vulnerability {
            instance_id: id.into(),
            category: category.into(),
            analyzer_name: "dataflow".into(),
            priority: Some(priority),
            ..Default::default()
        }
    }

    fn findings() -> Vec<Vulnerability> {
        vec![
            vuln("A", "SQL Injection", Priority::Critical),
            vuln("B", "XSS", Priority::High),
            vuln("C", "Dead Code", Priority::Low),
            vuln("D", "Weak Hash", Priority::Medium),
            vuln("E", "Log Forging", Priority::Critical),
        ]
    }

    #[test]
    fn test_classify_partitions_and_hides() {
        let t = parse_filter_template(TEMPLATE.as_bytes()).unwrap();
        let engine = FilterEngine::new(&t.filter_sets[0]);
        let vulns = findings();
        let buckets = engine.classify(&vulns);
        let ids = |folder: &str| -> Vec<&str> {
            buckets.get(folder).map(|v| v.iter().map(|x| x.instance_id.as_str()).collect()).unwrap_or_default()
        };
        assert_eq!(ids("f-critical"), vec!["A", "E"]);
        assert_eq!(ids("f-high"), vec!["B"]);
        // C is low but hidden as dead code
        assert_eq!(ids("f-other"), vec!["D"]);
        let total: usize = buckets.values().map(Vec::len).sum();
        assert_eq!(total, 4);
    }

    #[test]
    fn test_first_matching_folder_wins() {
        let t = parse_filter_template(TEMPLATE.as_bytes()).unwrap();
        let engine = FilterEngine::new(&t.filter_sets[1]);
        let mut v = vuln("X", "XSS", Priority::Low);
        v.taint_flags = vec!["WEB".into()];
        assert_eq!(engine.folder_of(&v), Some("f-critical"));
        v.taint_flags.clear();
        assert_eq!(engine.folder_of(&v), Some("f-other"));
    }

    #[test]
    fn test_select_by_folder_name() {
        let t = parse_filter_template(TEMPLATE.as_bytes()).unwrap();
        let engine = FilterEngine::new(&t.filter_sets[0]);
        let vulns = findings();
        let all = engine.select(&vulns, &[]).unwrap();
        assert_eq!(all.len(), 4);
        let crit = engine.select(&vulns, &["critical".to_string()]).unwrap();
        let ids: Vec<_> = crit.iter().map(|v| v.instance_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "E"]);
    }

    #[test]
    fn test_unknown_folder_lists_available() {
        let t = parse_filter_template(TEMPLATE.as_bytes()).unwrap();
        let engine = FilterEngine::new(&t.filter_sets[0]);
        let err = engine.select(&findings(), &["Nope".to_string()]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Folder(s) not found in FilterSet 'Quick View'. Available folders: 'Critical', 'High', 'Other'"
        );
        assert!(err.is_user_error());
    }

    #[test]
    fn test_malformed_query_never_matches() {
        let t = parse_filter_template(TEMPLATE.as_bytes()).unwrap();
        let engine = FilterEngine::new(&t.filter_sets[2]);
        let v = vuln("X", "XSS", Priority::Critical);
        assert_eq!(engine.folder_of(&v), Some("f-other"));
    }
}
