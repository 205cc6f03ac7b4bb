pub mod classifier;
pub mod document;
pub mod http;
pub mod orchestrator;
pub mod parsed;
pub mod tags;

pub use classifier::{AuditRequest, AuditResponse, AuditResult, Autoremediation, IssueClassifier, IssuePayload};
pub use document::{AuditDocument, AuditIssue};
pub use http::HttpClassifier;
pub use orchestrator::{AuditOrchestrator, AuditStatus, FprAuditResult, RunState};
pub use parsed::ParsedFpr;
pub use tags::AuditTags;
