use std::collections::HashMap;

use tracing::trace;

use super::model::{Priority, Vulnerability};

/// Fallback accuracy/impact/probability for one `analyzer.category`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CategoryScores {
    pub accuracy: f64,
    pub impact: f64,
    pub probability: f64,
}

/// Category fallback table consulted for scores still at zero after the
/// rule and instance metadata have been applied.
#[derive(Debug, Clone)]
pub struct CategoryFallbacks {
    table: HashMap<String, CategoryScores>,
}

impl Default for CategoryFallbacks {
    fn default() -> Self {
        let mut fallbacks = Self { table: HashMap::new() };
        fallbacks.insert(
            "configuration.J2EE Misconfiguration: Missing Error Page",
            CategoryScores { accuracy: 5.0, impact: 2.0, probability: 1.0 },
        );
        fallbacks.insert(
            "structural.Password Management: Hardcoded Password",
            CategoryScores { accuracy: 4.0, impact: 4.0, probability: 4.0 },
        );
        fallbacks.insert(
            "content.Cross-Site Scripting: Content Sniffing",
            CategoryScores { accuracy: 3.0, impact: 3.0, probability: 2.0 },
        );
        fallbacks
    }
}

impl CategoryFallbacks {
    pub fn empty() -> Self {
        Self { table: HashMap::new() }
    }

    pub fn insert(&mut self, analyzer_dot_category: impl Into<String>, scores: CategoryScores) {
        self.table.insert(analyzer_dot_category.into(), scores);
    }

    pub fn get(&self, analyzer: &str, category: &str) -> Option<&CategoryScores> {
        if analyzer.is_empty() || category.is_empty() {
            return None;
        }
        self.table.get(&format!("{}.{}", analyzer, category))
    }
}

fn round5(value: f64) -> f64 {
    (value * 100_000.0).round() / 100_000.0
}

/// Package name is the first path segment of the first attached file.
fn package_name(path: &str) -> String {
    match path.find('/') {
        Some(idx) if idx > 0 => path[..idx].to_string(),
        _ => path.to_string(),
    }
}

pub fn category_of(vuln_type: &str, sub_type: &str) -> String {
    if sub_type.is_empty() {
        vuln_type.to_string()
    } else {
        format!("{}: {}", vuln_type, sub_type)
    }
}

/// Derive category, fallbacks, likelihood, priority and package name.
pub fn finalize(vuln: &mut Vulnerability, fallbacks: &CategoryFallbacks) {
    vuln.category = category_of(&vuln.vuln_type, &vuln.sub_type);

    if let Some(scores) = fallbacks.get(&vuln.analyzer_name, &vuln.category) {
        if vuln.accuracy == 0.0 {
            vuln.accuracy = scores.accuracy;
        }
        if vuln.impact == 0.0 {
            vuln.impact = scores.impact;
        }
        if vuln.probability == 0.0 {
            vuln.probability = scores.probability;
        }
    }

    vuln.likelihood = round5(vuln.accuracy * vuln.confidence * vuln.probability / 25.0);
    vuln.priority = Some(Priority::from_scores(vuln.impact, vuln.likelihood));

    if vuln.package_name.is_empty() {
        if let Some(first) = vuln.files.first() {
            vuln.package_name = package_name(&first.name);
        }
    }

    trace!(
        instance_id = %vuln.instance_id,
        likelihood = vuln.likelihood,
        priority = ?vuln.priority,
        "Finalized vulnerability"
    );
}
