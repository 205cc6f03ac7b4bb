mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use common::{audit_xml, fpr, Finding};
use fpr_audit::archive::{FprArchive, AUDIT_ENTRY, REMEDIATIONS_ENTRY};
use fpr_audit::audit::tags::{ANALYSIS_TAG_ID, AVIATOR_STATUS_TAG_ID, PENDING_REVIEW, PROCESSED_BY_AVIATOR};
use fpr_audit::audit::{
    AuditDocument, AuditOrchestrator, AuditRequest, AuditResponse, AuditResult, AuditStatus, Autoremediation,
    IssueClassifier, RunState,
};
use fpr_audit::config::AuditConfig;
use fpr_audit::errors::AuditError;
use fpr_audit::remediation::{Change, FileChanges, RemediationDocument};

/// Answers each submitted issue from a fixed verdict table and records the
/// requests it saw.
struct MockClassifier {
    verdicts: Vec<(&'static str, &'static str, &'static str)>,
    seen: Mutex<Vec<AuditRequest>>,
    delay: Option<Duration>,
}

impl MockClassifier {
    fn new(verdicts: &[(&'static str, &'static str, &'static str)]) -> Self {
        Self { verdicts: verdicts.to_vec(), seen: Mutex::new(Vec::new()), delay: None }
    }

    fn submitted(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .flat_map(|r| r.issues.iter().map(|i| i.instance_id().to_string()))
            .collect()
    }
}

#[async_trait]
impl IssueClassifier for MockClassifier {
    async fn classify(&self, request: &AuditRequest) -> Result<Vec<AuditResponse>, AuditError> {
        self.seen.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .verdicts
            .iter()
            .map(|(id, status, value)| AuditResponse {
                issue_id: id.to_string(),
                status: status.to_string(),
                status_message: (*status != "SUCCESS").then(|| "Client-side pre-processing error: too big".into()),
                audit_result: Some(AuditResult {
                    tag_value: value.to_string(),
                    comment: format!("verdict for {}", id),
                    autoremediation: None,
                }),
                ..Default::default()
            })
            .collect())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

fn no_filter_set() -> AuditConfig {
    let mut config = AuditConfig::default();
    config.audit.no_filter_set = true;
    config
}

fn written_audit(path: &std::path::Path) -> AuditDocument {
    let archive = FprArchive::open(path).unwrap();
    AuditDocument::parse(&archive.read_entry(AUDIT_ENTRY).unwrap()).unwrap()
}

#[tokio::test]
async fn test_single_finding_is_audited_and_written_back() {
    let (_dir, path) = fpr(&[Finding::critical("F1", "SQL Injection")], &[]);
    let mock = Arc::new(MockClassifier::new(&[("F1", "SUCCESS", "Not an Issue")]));

    let result = AuditOrchestrator::new(no_filter_set(), mock.clone()).run(&path).await.unwrap();

    assert_eq!(result.status, AuditStatus::Audited);
    assert_eq!(result.issues_successfully_audited, 1);
    assert_eq!(result.total_issues_to_audit, 1);
    assert_eq!(result.run_state, RunState::Finalized);
    assert_eq!(result.updated_file.as_deref(), Some(path.as_path()));
    assert_eq!(mock.submitted(), vec!["F1"]);

    let issue = written_audit(&path).issue("F1").unwrap();
    assert_eq!(issue.tag(ANALYSIS_TAG_ID), Some("Not an Issue"));
    assert_eq!(issue.tag(AVIATOR_STATUS_TAG_ID), Some(PROCESSED_BY_AVIATOR));
    assert_eq!(issue.comments.len(), 1);
    assert_eq!(issue.comments[0].content, "verdict for F1");
    assert_eq!(issue.comments[0].username, "Fortify Aviator");
}

#[tokio::test]
async fn test_already_analysed_finding_is_skipped() {
    let audit = audit_xml("F1", "Exploitable");
    let (_dir, path) = fpr(&[Finding::critical("F1", "SQL Injection")], &[("audit.xml", audit.as_str())]);
    let before = std::fs::read(&path).unwrap();
    let mock = Arc::new(MockClassifier::new(&[]));

    let result = AuditOrchestrator::new(no_filter_set(), mock.clone()).run(&path).await.unwrap();

    assert_eq!(result.status, AuditStatus::Skipped);
    assert_eq!(result.already_audited, 1);
    assert_eq!(result.total_issues_to_audit, 0);
    assert!(result.updated_file.is_none());
    assert!(mock.submitted().is_empty());
    assert_eq!(std::fs::read(&path).unwrap(), before);
}

#[tokio::test]
async fn test_pending_review_is_still_audited() {
    let audit = audit_xml("F1", PENDING_REVIEW);
    let (_dir, path) = fpr(&[Finding::critical("F1", "SQL Injection")], &[("audit.xml", audit.as_str())]);
    let mock = Arc::new(MockClassifier::new(&[("F1", "SUCCESS", "Exploitable")]));

    let result = AuditOrchestrator::new(no_filter_set(), mock).run(&path).await.unwrap();
    assert_eq!(result.status, AuditStatus::Audited);
    assert_eq!(written_audit(&path).issue("F1").unwrap().tag(ANALYSIS_TAG_ID), Some("Exploitable"));
}

#[tokio::test]
async fn test_partial_success_writes_only_successful_verdicts() {
    let (dir, path) = fpr(&[Finding::critical("F1", "SQL Injection"), Finding::low("F2", "Dead Code")], &[]);
    let out = dir.path().join("out.fpr");
    let mock = Arc::new(MockClassifier::new(&[("F1", "SUCCESS", "Exploitable"), ("F2", "FAILED", "")]));

    let result = AuditOrchestrator::new(no_filter_set(), mock)
        .with_output(Some(out.clone()))
        .run(&path)
        .await
        .unwrap();

    assert_eq!(result.status, AuditStatus::PartiallyAudited);
    assert_eq!(result.issues_successfully_audited, 1);
    assert_eq!(result.total_issues_to_audit, 2);
    assert_eq!(result.updated_file.as_deref(), Some(out.as_path()));

    let doc = written_audit(&out);
    assert_eq!(doc.issue("F1").unwrap().tag(ANALYSIS_TAG_ID), Some("Exploitable"));
    assert!(doc.issue("F2").is_none());
    // input left alone when an output path is given
    assert!(!FprArchive::open(&path).unwrap().has_entry(AUDIT_ENTRY));
}

#[tokio::test]
async fn test_all_failed_reports_reason_without_write_back() {
    let (_dir, path) = fpr(&[Finding::critical("F1", "SQL Injection")], &[]);
    let mock = Arc::new(MockClassifier::new(&[("F1", "FAILED", "")]));

    let result = AuditOrchestrator::new(no_filter_set(), mock).run(&path).await.unwrap();

    assert_eq!(result.status, AuditStatus::Failed);
    assert_eq!(result.message.as_deref(), Some("All 1 issues failed (too big)"));
    assert!(result.updated_file.is_none());
    assert!(!FprArchive::open(&path).unwrap().has_entry(AUDIT_ENTRY));
}

#[tokio::test]
async fn test_no_responses_is_failure() {
    let (_dir, path) = fpr(&[Finding::critical("F1", "SQL Injection")], &[]);
    let mock = Arc::new(MockClassifier::new(&[("OTHER", "SUCCESS", "Exploitable")]));

    let result = AuditOrchestrator::new(no_filter_set(), mock).run(&path).await.unwrap();
    assert_eq!(result.status, AuditStatus::Failed);
    assert_eq!(result.message.as_deref(), Some("No audit responses received from server"));
}

#[tokio::test]
async fn test_total_limit_annotates_skipped_findings() {
    let (_dir, path) = fpr(
        &[Finding::critical("F1", "SQL Injection"), Finding::critical("F2", "SQL Injection")],
        &[],
    );
    let mut config = no_filter_set();
    config.audit.max_total = Some(1);
    config.audit.annotate_skipped = true;
    let mock = Arc::new(MockClassifier::new(&[("F1", "SUCCESS", "Exploitable")]));

    let result = AuditOrchestrator::new(config, mock.clone()).run(&path).await.unwrap();

    assert_eq!(result.status, AuditStatus::Audited);
    assert_eq!(result.skipped_by_limit, 1);
    assert_eq!(mock.submitted(), vec!["F1"]);

    let skipped = written_audit(&path).issue("F2").unwrap();
    assert_eq!(skipped.tag(ANALYSIS_TAG_ID), Some(PENDING_REVIEW));
    assert_eq!(skipped.tag(AVIATOR_STATUS_TAG_ID), Some(PROCESSED_BY_AVIATOR));
    assert!(skipped.comments[0].content.contains("exceed the total limit of 1"));
}

#[tokio::test]
async fn test_second_run_skips_processed_findings() {
    let (_dir, path) = fpr(&[Finding::critical("F1", "SQL Injection")], &[]);
    let mock = Arc::new(MockClassifier::new(&[("F1", "SUCCESS", "Suspicious")]));
    let first = AuditOrchestrator::new(no_filter_set(), mock.clone()).run(&path).await.unwrap();
    assert_eq!(first.status, AuditStatus::Audited);

    let second = AuditOrchestrator::new(no_filter_set(), mock.clone()).run(&path).await.unwrap();
    assert_eq!(second.status, AuditStatus::Skipped);
    assert_eq!(mock.submitted().len(), 1);
}

#[tokio::test]
async fn test_priority_selection_limits_candidates() {
    let (_dir, path) = fpr(&[Finding::critical("F1", "SQL Injection"), Finding::low("F2", "Dead Code")], &[]);
    let mut config = no_filter_set();
    config.audit.priorities = vec!["low".into()];
    let mock = Arc::new(MockClassifier::new(&[("F2", "SUCCESS", "Not an Issue")]));

    let result = AuditOrchestrator::new(config, mock.clone()).run(&path).await.unwrap();
    assert_eq!(result.status, AuditStatus::Audited);
    assert_eq!(mock.submitted(), vec!["F2"]);
}

#[tokio::test]
async fn test_request_carries_project_and_payload() {
    let (_dir, path) = fpr(&[Finding::critical("F1", "SQL Injection")], &[]);
    let mock = Arc::new(MockClassifier::new(&[("F1", "SUCCESS", "Exploitable")]));
    let mut config = no_filter_set();
    config.classifier.application = Some("demo-app".into());

    AuditOrchestrator::new(config, mock.clone()).run(&path).await.unwrap();

    let seen = mock.seen.lock().unwrap();
    let request = &seen[0];
    // project falls back to the build id
    assert_eq!(request.project, "demo-build");
    assert_eq!(request.build_id, "demo-build");
    assert_eq!(request.application.as_deref(), Some("demo-app"));
    let payload = serde_json::to_value(&request.issues[0]).unwrap();
    assert_eq!(payload["category"], "SQL Injection");
    assert!(payload.to_string().contains("stmt.execute(q);"));
}

#[tokio::test]
async fn test_cancellation_aborts_without_write_back() {
    let (_dir, path) = fpr(&[Finding::critical("F1", "SQL Injection")], &[]);
    let mut mock = MockClassifier::new(&[("F1", "SUCCESS", "Exploitable")]);
    mock.delay = Some(Duration::from_secs(30));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = AuditOrchestrator::new(no_filter_set(), Arc::new(mock))
        .with_cancellation(cancel)
        .run(&path)
        .await
        .unwrap_err();

    assert!(matches!(err, AuditError::Cancelled(_)));
    assert!(!err.is_user_error());
    assert!(!FprArchive::open(&path).unwrap().has_entry(AUDIT_ENTRY));
}

#[tokio::test(start_paused = true)]
async fn test_classifier_timeout_is_fatal_without_write_back() {
    let (_dir, path) = fpr(&[Finding::critical("F1", "SQL Injection")], &[]);
    let mut mock = MockClassifier::new(&[("F1", "SUCCESS", "Exploitable")]);
    mock.delay = Some(Duration::from_secs(62));
    let mut config = no_filter_set();
    config.classifier.timeout_minutes = 1;

    let err = AuditOrchestrator::new(config, Arc::new(mock)).run(&path).await.unwrap_err();

    assert!(matches!(err, AuditError::Technical(_)), "{:?}", err);
    assert_eq!(err.to_string(), "Technical error: Audit timed out after 1 minutes");
    assert!(!err.is_user_error());
    assert!(!FprArchive::open(&path).unwrap().has_entry(AUDIT_ENTRY));
}

#[tokio::test]
async fn test_huge_timeout_setting_does_not_overflow() {
    let (_dir, path) = fpr(&[Finding::critical("F1", "SQL Injection")], &[]);
    let mut config = no_filter_set();
    config.classifier.timeout_minutes = u64::MAX / 30;

    let result = AuditOrchestrator::new(config, Arc::new(MockClassifier::new(&[("F1", "SUCCESS", "Exploitable")])))
        .run(&path)
        .await
        .unwrap();
    assert_eq!(result.status, AuditStatus::Audited);
    assert_eq!(result.issues_successfully_audited, 1);
}

#[tokio::test]
async fn test_unknown_filter_set_is_user_error() {
    let (_dir, path) = fpr(&[Finding::critical("F1", "SQL Injection")], &[]);
    let mut config = AuditConfig::default();
    config.audit.filter_set = Some("Nope".into());

    let err = AuditOrchestrator::new(config, Arc::new(MockClassifier::new(&[])))
        .run(&path)
        .await
        .unwrap_err();
    assert!(err.is_user_error(), "{}", err);
}

struct RemediatingClassifier;

#[async_trait]
impl IssueClassifier for RemediatingClassifier {
    async fn classify(&self, request: &AuditRequest) -> Result<Vec<AuditResponse>, AuditError> {
        Ok(request
            .issues
            .iter()
            .map(|issue| AuditResponse {
                issue_id: issue.instance_id().to_string(),
                status: "SUCCESS".into(),
                audit_result: Some(AuditResult {
                    tag_value: "Exploitable".into(),
                    comment: "parameterize the query".into(),
                    autoremediation: Some(Autoremediation {
                        file_changes: vec![FileChanges {
                            filename: "src/App.java".into(),
                            hash: "abc=".into(),
                            changes: vec![Change {
                                line_from: 4,
                                line_to: 4,
                                context: "stmt.execute(q);".into(),
                                context_before: 0,
                                original_code: "stmt.execute(q);".into(),
                                new_code: "    stmt.execute(bind(q));".into(),
                            }],
                        }],
                    }),
                }),
                ..Default::default()
            })
            .collect())
    }

    fn name(&self) -> &str {
        "remediating"
    }
}

#[tokio::test]
async fn test_autoremediation_is_recorded_in_archive() {
    let (_dir, path) = fpr(&[Finding::critical("F1", "SQL Injection")], &[]);

    let result = AuditOrchestrator::new(no_filter_set(), Arc::new(RemediatingClassifier))
        .run(&path)
        .await
        .unwrap();
    assert_eq!(result.status, AuditStatus::Audited);

    let archive = FprArchive::open(&path).unwrap();
    let doc = RemediationDocument::parse(&archive.read_entry(REMEDIATIONS_ENTRY).unwrap()).unwrap();
    let rems = doc.remediations();
    assert_eq!(rems.len(), 1);
    assert_eq!(rems[0].instance_id, "F1");
    assert_eq!(rems[0].file_changes[0].changes[0].new_code, "    stmt.execute(bind(q));");
}
