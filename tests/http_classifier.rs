use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

use fpr_audit::audit::{AuditRequest, HttpClassifier, IssueClassifier, IssuePayload};
use fpr_audit::errors::AuditError;
use fpr_audit::vuln::Vulnerability;

#[derive(Clone, Default)]
struct MockState {
    calls: Arc<AtomicUsize>,
    fail_first: usize,
}

async fn audit_endpoint(
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let call = state.calls.fetch_add(1, Ordering::SeqCst);
    if call < state.fail_first {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({})));
    }
    if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer secret-token") {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "bad token" })));
    }
    let responses: Vec<Value> = body["issues"]
        .as_array()
        .map(|issues| {
            issues
                .iter()
                .map(|issue| {
                    json!({
                        "issueId": issue["issueData"]["instanceID"],
                        "status": "SUCCESS",
                        "tier": "1",
                        "inputToken": 120,
                        "auditResult": { "tagValue": "Not an Issue", "comment": format!("project {}", body["project"]) }
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    (StatusCode::OK, Json(json!({ "responses": responses })))
}

async fn serve(state: MockState) -> String {
    let app = Router::new().route("/api/v1/audit", post(audit_endpoint)).with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn request(token: &str) -> AuditRequest {
    let vuln = Vulnerability {
        instance_id: "F1".into(),
        class_id: "RULE-1".into(),
        vuln_type: "SQL Injection".into(),
        category: "SQL Injection".into(),
        ..Default::default()
    };
    AuditRequest {
        project: "demo".into(),
        build_id: "b1".into(),
        application: None,
        version: None,
        token: Some(token.into()),
        issues: vec![IssuePayload::from_vulnerability(&vuln, None)],
    }
}

#[tokio::test]
async fn test_batch_round_trip() {
    let state = MockState::default();
    let url = serve(state.clone()).await;
    let client = HttpClassifier::new(&url, 0).unwrap();

    let responses = client.classify(&request("secret-token")).await.unwrap();

    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].issue_id, "F1");
    assert!(responses[0].is_success());
    assert_eq!(responses[0].input_tokens, 120);
    assert_eq!(responses[0].audit_result.as_ref().unwrap().comment, "project \"demo\"");
    assert_eq!(state.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_bad_token_is_authentication_error() {
    let state = MockState::default();
    let url = serve(state.clone()).await;
    let client = HttpClassifier::new(&url, 2).unwrap();

    let err = client.classify(&request("wrong")).await.unwrap_err();

    assert!(matches!(err, AuditError::Authentication(_)), "{:?}", err);
    // never retried
    assert_eq!(state.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_server_error_without_retries_is_network_error() {
    let state = MockState { fail_first: 5, ..Default::default() };
    let url = serve(state.clone()).await;
    let client = HttpClassifier::new(&url, 0).unwrap();

    let err = client.classify(&request("secret-token")).await.unwrap_err();
    assert!(matches!(err, AuditError::Network(_)), "{:?}", err);
    assert!(err.classify().retryable);
}

#[test]
fn test_blank_url_is_rejected() {
    let err = HttpClassifier::new("   ", 3).err().unwrap();
    assert!(err.is_user_error());
}
