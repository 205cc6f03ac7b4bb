use tracing::debug;

use crate::config::{AuditSettings, TagMappingConfig};
use crate::filter::FilterTemplate;
use crate::vuln::AuditState;
use super::document::AuditIssue;

pub const ANALYSIS_TAG_ID: &str = "87f2364f-dcd4-49e6-861d-f8d3f351686b";
pub const AVIATOR_STATUS_TAG_ID: &str = "FB7B0462-2C2E-46D9-811A-DCC1F3C83051";
pub const AVIATOR_PREDICTION_TAG_ID: &str = "C2D6EC66-CCB3-4FB9-9EE0-0BB02F51008F";
pub const HUMAN_AUDIT_TAG_ID: &str = "604f0fbe-b5fe-47cd-a9cb-587ad8ebe93a";

pub const PROCESSED_BY_AVIATOR: &str = "PROCESSED_BY_AVIATOR";
pub const PENDING_REVIEW: &str = "Pending Review";
pub const NOT_SET: &str = "Not Set";

pub const AUDITOR_STATUS_TAG_NAME: &str = "Auditor Status";
pub const EXPECTED_OUTCOME_TAG_NAME: &str = "AVIATOR_EXPECTED_OUTCOME";

fn is_pending(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case(PENDING_REVIEW)
}

/// Blank, `Not Set` or `Pending Review`.
pub fn is_unset(value: &str) -> bool {
    let v = value.trim();
    v.is_empty() || v.eq_ignore_ascii_case(NOT_SET) || is_pending(v)
}

/// Tag ids that matter for one run, resolved from configuration and the
/// archive's filter template.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditTags {
    pub results: String,
    pub auditor_status: Option<String>,
    pub expected_outcome: Option<String>,
}

impl Default for AuditTags {
    fn default() -> Self {
        Self { results: ANALYSIS_TAG_ID.to_string(), auditor_status: None, expected_outcome: None }
    }
}

impl AuditTags {
    pub fn resolve(
        settings: &AuditSettings,
        mapping: Option<&TagMappingConfig>,
        template: Option<&FilterTemplate>,
    ) -> Self {
        let by_name = |name: &str| template.and_then(|t| t.tag_by_name(name)).map(|t| t.id.clone());

        let results = mapping
            .map(|m| m.tag_id.trim().to_string())
            .filter(|id| !id.is_empty())
            .or_else(|| by_name("Analysis"))
            .unwrap_or_else(|| ANALYSIS_TAG_ID.to_string());
        let auditor_status = settings
            .auditor_status_tag_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .or_else(|| by_name(AUDITOR_STATUS_TAG_NAME));
        let expected_outcome = settings
            .expected_outcome_tag_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .or_else(|| by_name(EXPECTED_OUTCOME_TAG_NAME));

        let tags = Self { results, auditor_status, expected_outcome };
        debug!(?tags, "Resolved audit tags");
        tags
    }

    /// Why an issue counts as already audited, `None` when it still needs a
    /// verdict.
    pub fn already_audited(&self, issue: &AuditIssue) -> Option<&'static str> {
        if let Some(status) = self.auditor_status.as_deref().and_then(|id| issue.tag(id)) {
            if !status.trim().is_empty() && !is_pending(status) {
                return Some("auditor status is set");
            }
        }
        if issue.suppressed {
            return Some("issue is suppressed");
        }
        if self.expected_outcome.as_deref().and_then(|id| issue.tag(id)).is_some() {
            return Some("expected outcome is recorded");
        }
        let analysis = [self.results.as_str(), ANALYSIS_TAG_ID];
        if analysis.iter().filter_map(|id| issue.tag(id)).any(|v| !is_unset(v)) {
            return Some("analysis value is set");
        }
        if issue.tag(HUMAN_AUDIT_TAG_ID).is_some_and(|v| !v.trim().is_empty() && !is_pending(v)) {
            return Some("human audit is recorded");
        }
        if issue.tag(AVIATOR_STATUS_TAG_ID).is_some_and(|v| !v.trim().is_empty()) {
            return Some("already processed by Aviator");
        }
        None
    }
}

/// Human-readable name for a tag id, used as the attribute key filters see.
pub fn tag_name(id: &str, template: Option<&FilterTemplate>) -> String {
    if let Some(def) = template.and_then(|t| t.tag_by_id(id)) {
        return def.name.to_lowercase();
    }
    if id.eq_ignore_ascii_case(ANALYSIS_TAG_ID) {
        "analysis".to_string()
    } else {
        id.to_lowercase()
    }
}

/// Audit state as filter queries see it.
pub fn audit_state(issue: &AuditIssue, template: Option<&FilterTemplate>) -> AuditState {
    AuditState {
        tags: issue.tags.iter().map(|(id, v)| (tag_name(id, template), v.clone())).collect(),
        suppressed: issue.suppressed,
        comments: issue.comments.iter().map(|c| c.content.clone()).collect(),
        comment_users: issue.comments.iter().map(|c| c.username.clone()).collect(),
    }
}
