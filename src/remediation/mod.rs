pub mod applier;
pub mod document;
pub mod fuzzy;

pub use applier::{content_hash, RemediationApplier, RemediationMetric};
pub use document::{Change, FileChanges, Remediation, RemediationDocument};
pub use fuzzy::FuzzySearcher;
