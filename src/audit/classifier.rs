use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::AuditError;
use crate::remediation::FileChanges;
use crate::trace::StackTraceElement;
use crate::vuln::{SourceFile, Vulnerability};

/// External service that predicts a verdict per finding.
#[async_trait]
pub trait IssueClassifier: Send + Sync {
    /// Submit one batch and wait for every response.
    async fn classify(&self, request: &AuditRequest) -> Result<Vec<AuditResponse>, AuditError>;

    /// Classifier name for logging.
    fn name(&self) -> &str;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRequest {
    pub project: String,
    pub build_id: String,
    pub application: Option<String>,
    pub version: Option<String>,
    #[serde(skip)]
    pub token: Option<String>,
    pub issues: Vec<IssuePayload>,
}

/// Scoring inputs sent as strings, the way the service expects them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IssueData {
    pub accuracy: String,
    pub analyzer_name: String,
    #[serde(rename = "classID")]
    pub class_id: String,
    pub confidence: String,
    pub default_severity: String,
    pub impact: String,
    #[serde(rename = "instanceID")]
    pub instance_id: String,
    pub instance_severity: String,
    pub filetype: String,
    pub kingdom: String,
    pub likelihood: String,
    pub priority: String,
    pub probability: String,
    pub sub_type: String,
    #[serde(rename = "type")]
    pub vuln_type: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuePayload {
    pub issue_data: IssueData,
    pub stack_trace: Vec<Vec<StackTraceElement>>,
    pub first_stack_trace: Vec<StackTraceElement>,
    pub longest_stack_trace: Vec<StackTraceElement>,
    pub files: Vec<SourceFile>,
    pub last_stack_trace_element: Option<StackTraceElement>,
    pub programming_languages: BTreeSet<String>,
    pub file_extension: String,
    pub language: String,
    pub category: String,
    pub tier: Option<String>,
    pub source: Option<StackTraceElement>,
    pub sink: Option<StackTraceElement>,
    pub category_level: String,
}

fn extension(file: &str) -> String {
    std::path::Path::new(file)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default()
}

/// Language for a source file extension, empty when unknown.
pub fn language_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "java" | "jsp" | "jspx" => "java",
        "cs" | "cshtml" | "aspx" | "vb" => "dotnet",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "ts" | "tsx" => "typescript",
        "py" => "python",
        "rb" | "erb" => "ruby",
        "go" => "go",
        "php" => "php",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" => "cpp",
        "kt" | "kts" => "kotlin",
        "swift" => "swift",
        "m" | "mm" => "objc",
        "scala" => "scala",
        "sql" | "pls" | "pkb" | "pks" => "sql",
        "cbl" | "cob" => "cobol",
        "xml" | "config" => "xml",
        "yaml" | "yml" => "yaml",
        "json" => "json",
        "tf" => "terraform",
        "dockerfile" => "docker",
        "rs" => "rust",
        _ => "",
    }
}

impl IssuePayload {
    pub fn from_vulnerability(vuln: &Vulnerability, tier: Option<&str>) -> Self {
        let primary_ext = extension(vuln.primary_file());
        let programming_languages = vuln
            .stack_trace
            .iter()
            .flatten()
            .map(|e| extension(&e.filename))
            .chain(vuln.files.iter().map(|f| extension(&f.name)))
            .chain(std::iter::once(primary_ext.clone()))
            .map(|ext| language_for_extension(&ext))
            .filter(|lang| !lang.is_empty())
            .map(str::to_string)
            .collect();

        Self {
            issue_data: IssueData {
                accuracy: vuln.accuracy.to_string(),
                analyzer_name: vuln.analyzer_name.clone(),
                class_id: vuln.class_id.clone(),
                confidence: vuln.confidence.to_string(),
                default_severity: vuln.default_severity.clone(),
                impact: vuln.impact.to_string(),
                instance_id: vuln.instance_id.clone(),
                instance_severity: vuln.instance_severity.clone(),
                filetype: vuln.file_type.clone(),
                kingdom: vuln.kingdom.clone(),
                likelihood: vuln.likelihood.to_string(),
                priority: vuln.priority.map(|p| p.to_string()).unwrap_or_default(),
                probability: vuln.probability.to_string(),
                sub_type: vuln.sub_type.clone(),
                vuln_type: vuln.vuln_type.clone(),
            },
            stack_trace: vuln.stack_trace.clone(),
            first_stack_trace: vuln.first_stack_trace.clone(),
            longest_stack_trace: vuln.longest_stack_trace.clone(),
            files: vuln.files.clone(),
            last_stack_trace_element: vuln.last_stack_trace_element.clone(),
            programming_languages,
            language: language_for_extension(&primary_ext).to_string(),
            file_extension: primary_ext,
            category: vuln.category.clone(),
            tier: tier.map(str::to_string),
            source: vuln.source.clone(),
            sink: vuln.sink.clone(),
            category_level: if vuln.kingdom.is_empty() {
                vuln.category.clone()
            } else {
                format!("{}: {}", vuln.kingdom, vuln.category)
            },
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.issue_data.instance_id
    }
}

/// Recorded code change suggested alongside a verdict.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Autoremediation {
    pub file_changes: Vec<FileChanges>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AuditResult {
    pub tag_value: String,
    pub comment: String,
    pub autoremediation: Option<Autoremediation>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AuditResponse {
    pub issue_id: String,
    pub status: String,
    pub status_message: Option<String>,
    pub tier: Option<String>,
    #[serde(alias = "inputToken")]
    pub input_tokens: u64,
    #[serde(alias = "outputToken")]
    pub output_tokens: u64,
    pub aviator_prediction_tag: Option<String>,
    pub is_aviator_processed: bool,
    pub audit_result: Option<AuditResult>,
}

impl AuditResponse {
    pub fn is_success(&self) -> bool {
        self.status.trim().eq_ignore_ascii_case("SUCCESS")
    }
}
