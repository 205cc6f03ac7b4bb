//! One audit run over one archive.
//!
//! A run moves through `Parsed → Filtered → Submitted → Merged → Finalized`.
//! Nothing is written unless at least one verdict succeeded, and the batch
//! is accepted whole or not at all: a timeout, transport failure or
//! cancellation aborts the run before any merge.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::archive::{FprArchive, AUDIT_ENTRY, REMEDIATIONS_ENTRY};
use crate::config::{AuditConfig, TagMappingConfig};
use crate::errors::AuditError;
use crate::filter::FilterSetSelector;
use crate::remediation::RemediationDocument;
use crate::vuln::Vulnerability;
use super::classifier::{AuditRequest, AuditResponse, IssueClassifier, IssuePayload};
use super::document::AuditDocument;
use super::parsed::ParsedFpr;
use super::tags::{
    is_unset, AuditTags, ANALYSIS_TAG_ID, AVIATOR_PREDICTION_TAG_ID, AVIATOR_STATUS_TAG_ID, PENDING_REVIEW,
    PROCESSED_BY_AVIATOR,
};

const PRE_PROCESSING_PREFIX: &str = "Client-side pre-processing error: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Parsed,
    Filtered,
    Submitted,
    Merged,
    Finalized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    Audited,
    PartiallyAudited,
    Failed,
    Skipped,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Audited => "AUDITED",
            AuditStatus::PartiallyAudited => "PARTIALLY_AUDITED",
            AuditStatus::Failed => "FAILED",
            AuditStatus::Skipped => "SKIPPED",
        }
    }
}

impl std::fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FprAuditResult {
    pub status: AuditStatus,
    pub message: Option<String>,
    pub issues_successfully_audited: usize,
    pub total_issues_to_audit: usize,
    pub already_audited: usize,
    pub skipped_by_limit: usize,
    pub updated_file: Option<PathBuf>,
    pub run_state: RunState,
}

/// Why a finding was held back from submission.
#[derive(Debug, Clone, PartialEq)]
struct LimitSkip<'v> {
    vuln: &'v Vulnerability,
    comment: String,
}

/// Candidates after the per-category and total caps, in selection order.
fn apply_limits<'v>(
    candidates: Vec<&'v Vulnerability>,
    max_per_category: Option<usize>,
    max_total: Option<usize>,
) -> (Vec<&'v Vulnerability>, Vec<LimitSkip<'v>>) {
    let mut in_category: HashMap<&str, usize> = HashMap::new();
    for v in &candidates {
        *in_category.entry(v.category.as_str()).or_default() += 1;
    }
    let total = candidates.len();

    let mut accepted = Vec::new();
    let mut skipped = Vec::new();
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for vuln in candidates {
        let seen_in_category = seen.entry(vuln.category.as_str()).or_default();
        *seen_in_category += 1;
        if let Some(max) = max_per_category.filter(|max| *seen_in_category > *max) {
            skipped.push(LimitSkip {
                vuln,
                comment: format!(
                    "Not audited by Aviator: {} new issues in category '{}' exceed the per-category limit of {}.",
                    in_category[vuln.category.as_str()],
                    vuln.category,
                    max
                ),
            });
            continue;
        }
        if let Some(max) = max_total.filter(|max| accepted.len() >= *max) {
            skipped.push(LimitSkip {
                vuln,
                comment: format!(
                    "Not audited by Aviator: {} new issues exceed the total limit of {}.",
                    total, max
                ),
            });
            continue;
        }
        accepted.push(vuln);
    }
    (accepted, skipped)
}

/// Keep the first response per submitted issue.
fn merge_responses(responses: Vec<AuditResponse>, submitted: &HashSet<&str>) -> BTreeMap<String, AuditResponse> {
    let mut accepted: BTreeMap<String, AuditResponse> = BTreeMap::new();
    for response in responses {
        if !submitted.contains(response.issue_id.as_str()) {
            debug!(issue_id = %response.issue_id, "Ignoring response for an issue that was not submitted");
            continue;
        }
        if accepted.contains_key(&response.issue_id) {
            warn!(issue_id = %response.issue_id, "Duplicate response ignored");
            continue;
        }
        accepted.insert(response.issue_id.clone(), response);
    }
    accepted
}

fn failure_reason(responses: &BTreeMap<String, AuditResponse>) -> String {
    let reason = responses
        .values()
        .filter_map(|r| r.status_message.as_deref())
        .find(|m| !m.trim().is_empty())
        .unwrap_or("see logs for details");
    reason.strip_prefix(PRE_PROCESSING_PREFIX).unwrap_or(reason).to_string()
}

/// Record a skip comment and mark the issue as seen, leaving a meaningful
/// analysis value alone.
fn annotate_skipped(doc: &mut AuditDocument, instance_id: &str, comment: &str, user: &str, now: DateTime<Utc>) {
    let analysis = doc.issue(instance_id).and_then(|i| i.tag(ANALYSIS_TAG_ID).map(str::to_string));
    doc.add_comment(instance_id, comment, user, now);
    doc.set_tag(instance_id, AVIATOR_STATUS_TAG_ID, PROCESSED_BY_AVIATOR);
    if analysis.as_deref().map_or(true, is_unset) {
        doc.set_tag(instance_id, ANALYSIS_TAG_ID, PENDING_REVIEW);
    }
}

/// Write one successful verdict.
fn apply_verdict(
    doc: &mut AuditDocument,
    results_tag: &str,
    mapping: &TagMappingConfig,
    response: &AuditResponse,
    user: &str,
    now: DateTime<Utc>,
) {
    let id = response.issue_id.as_str();
    let result = response.audit_result.clone().unwrap_or_default();

    let mapped = mapping.map_verdict(&result.tag_value, response.tier.as_deref());
    if !mapped.value.is_empty() {
        doc.set_tag(id, results_tag, &mapped.value);
    }
    if let Some(prediction) = response.aviator_prediction_tag.as_deref().filter(|p| !p.trim().is_empty()) {
        doc.set_tag(id, AVIATOR_PREDICTION_TAG_ID, prediction.trim());
    }
    doc.set_tag(id, AVIATOR_STATUS_TAG_ID, PROCESSED_BY_AVIATOR);
    if !result.comment.trim().is_empty() {
        doc.add_comment(id, result.comment.trim(), user, now);
    }
    if mapped.suppress {
        doc.set_suppressed(id, true);
    }
    debug!(instance_id = id, value = %mapped.value, suppressed = mapped.suppress, "Verdict recorded");
}

pub struct AuditOrchestrator {
    config: AuditConfig,
    classifier: Arc<dyn IssueClassifier>,
    cancel: CancellationToken,
    output: Option<PathBuf>,
}

impl AuditOrchestrator {
    pub fn new(config: AuditConfig, classifier: Arc<dyn IssueClassifier>) -> Self {
        Self { config, classifier, cancel: CancellationToken::new(), output: None }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Write the updated archive here instead of over the input.
    pub fn with_output(mut self, output: Option<PathBuf>) -> Self {
        self.output = output;
        self
    }

    pub async fn run(&self, fpr: &Path) -> Result<FprAuditResult, AuditError> {
        let span = info_span!("audit", run_id = %Uuid::new_v4(), fpr = %fpr.display());
        self.run_inner(fpr).instrument(span).await
    }

    async fn run_inner(&self, fpr: &Path) -> Result<FprAuditResult, AuditError> {
        let archive = FprArchive::open(fpr)?;
        let parsed = ParsedFpr::load(&archive)?;
        let settings = &self.config.audit;
        debug!(state = ?RunState::Parsed, "Audit run");

        // Filtered
        let selection = FilterSetSelector::select(
            parsed.template.as_ref(),
            settings.filter_set.as_deref(),
            settings.no_filter_set,
            &settings.folders,
            &settings.priorities,
        )?;
        let selected = selection.apply(&parsed.vulnerabilities)?;

        let tags = AuditTags::resolve(settings, self.config.tag_mapping.as_ref(), parsed.template.as_ref());
        let issues = parsed.audit.issue_map();
        let mut already_audited = 0;
        let fresh: Vec<&Vulnerability> = selected
            .into_iter()
            .filter(|v| match issues.get(&v.instance_id).and_then(|i| tags.already_audited(i)) {
                Some(reason) => {
                    debug!(instance_id = %v.instance_id, reason, "Skipping already audited issue");
                    already_audited += 1;
                    false
                }
                None => true,
            })
            .collect();
        let (candidates, limit_skips) = apply_limits(fresh, settings.max_per_category, settings.max_total);

        let now = Utc::now();
        let mut doc = parsed.audit.clone();
        for skip in &limit_skips {
            info!(instance_id = %skip.vuln.instance_id, "{}", skip.comment);
            if settings.annotate_skipped {
                annotate_skipped(&mut doc, &skip.vuln.instance_id, &skip.comment, &settings.user_name, now);
            }
        }

        let total = candidates.len();
        info!(
            candidates = total,
            already_audited,
            skipped_by_limit = limit_skips.len(),
            "Final count of issues to be audited"
        );

        let result = |status, message: Option<String>, succeeded, updated_file, run_state| FprAuditResult {
            status,
            message,
            issues_successfully_audited: succeeded,
            total_issues_to_audit: total,
            already_audited,
            skipped_by_limit: limit_skips.len(),
            updated_file,
            run_state,
        };

        if candidates.is_empty() {
            info!("Audit skipped, no issues to process after filtering");
            return Ok(result(AuditStatus::Skipped, Some("No issues to audit".into()), 0, None, RunState::Filtered));
        }

        // Submitted
        let classifier_cfg = &self.config.classifier;
        let project = classifier_cfg
            .project
            .clone()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| parsed.build_id.clone());
        let request = AuditRequest {
            project,
            build_id: parsed.build_id.clone(),
            application: classifier_cfg.application.clone(),
            version: classifier_cfg.version.clone(),
            token: classifier_cfg.token.clone(),
            issues: candidates
                .iter()
                .map(|v| IssuePayload::from_vulnerability(v, classifier_cfg.tier.as_deref()))
                .collect(),
        };
        info!(project = %request.project, issues = total, classifier = self.classifier.name(), "Starting audit");

        let minutes = classifier_cfg.timeout_minutes;
        let responses = tokio::select! {
            _ = self.cancel.cancelled() => {
                error!("Audit failed due to interruption");
                return Err(AuditError::Cancelled("Audit interrupted".into()));
            }
            outcome = tokio::time::timeout(classifier_timeout(minutes), self.classifier.classify(&request)) => {
                match outcome {
                    Ok(responses) => responses?,
                    Err(_) => {
                        error!(minutes, "Audit failed due to timeout");
                        return Err(AuditError::technical(format!("Audit timed out after {} minutes", minutes)));
                    }
                }
            }
        };
        info!(responses = responses.len(), "Audit completed");

        // Merged
        let submitted: HashSet<&str> = candidates.iter().map(|v| v.instance_id.as_str()).collect();
        let accepted = merge_responses(responses, &submitted);

        if accepted.is_empty() {
            error!(total, "No audit responses received");
            return Ok(result(
                AuditStatus::Failed,
                Some("No audit responses received from server".into()),
                0,
                None,
                RunState::Merged,
            ));
        }

        let succeeded = accepted.values().filter(|r| r.is_success()).count();
        let (status, message) = if succeeded == total {
            (AuditStatus::Audited, Some(format!("Audited {} of {} issues", succeeded, total)))
        } else if succeeded > 0 {
            (AuditStatus::PartiallyAudited, Some(format!("Audited {} of {} issues", succeeded, total)))
        } else {
            let reason = failure_reason(&accepted);
            (AuditStatus::Failed, Some(format!("All {} issues failed ({})", total, reason)))
        };

        if succeeded == 0 {
            info!(status = %status, "FPR audit process completed");
            return Ok(result(status, message, 0, None, RunState::Merged));
        }

        // Finalized
        let mapping = self.config.tag_mapping.clone().unwrap_or_default();
        let mut remediations: Option<RemediationDocument> = None;
        for vuln in &candidates {
            let Some(response) = accepted.get(&vuln.instance_id).filter(|r| r.is_success()) else {
                continue;
            };
            apply_verdict(&mut doc, &tags.results, &mapping, response, &settings.user_name, now);

            let fixes = response
                .audit_result
                .as_ref()
                .and_then(|r| r.autoremediation.as_ref())
                .filter(|a| !a.file_changes.is_empty());
            if let Some(fix) = fixes {
                if remediations.is_none() {
                    remediations = Some(match archive.read_optional(REMEDIATIONS_ENTRY)? {
                        Some(bytes) => RemediationDocument::parse(&bytes)?,
                        None => RemediationDocument::empty(),
                    });
                }
                if let Some(rem) = remediations.as_mut() {
                    rem.add(&vuln.instance_id, &fix.file_changes);
                }
            }
        }

        let mut replacements = BTreeMap::new();
        replacements.insert(AUDIT_ENTRY.to_string(), doc.to_bytes());
        if let Some(rem) = &remediations {
            replacements.insert(REMEDIATIONS_ENTRY.to_string(), rem.to_bytes());
        }
        let dest = self.output.clone().unwrap_or_else(|| fpr.to_path_buf());
        archive.write_with_replacements(&dest, &replacements)?;

        info!(status = %status, updated = %dest.display(), "FPR audit process completed");
        Ok(result(status, message, succeeded, Some(dest), RunState::Finalized))
    }
}

/// Large configured values clamp instead of wrapping.
fn classifier_timeout(minutes: u64) -> Duration {
    Duration::from_secs(minutes.saturating_mul(60))
}
