use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::trace::StackTraceElement;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 4] = [Priority::Critical, Priority::High, Priority::Medium, Priority::Low];

    /// Fixed thresholding over impact and likelihood.
    pub fn from_scores(impact: f64, likelihood: f64) -> Self {
        match (impact >= 2.5, likelihood >= 2.5) {
            (true, true) => Priority::Critical,
            (true, false) => Priority::High,
            (false, true) => Priority::Medium,
            (false, false) => Priority::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "Critical",
            Priority::High => "High",
            Priority::Medium => "Medium",
            Priority::Low => "Low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Priority::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown priority: {}", s))
    }
}

/// Source snapshot attached to a finding.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFile {
    pub name: String,
    pub content: String,
    pub segment: bool,
    pub start_line: u32,
    pub end_line: u32,
}

/// Request/response data carried by findings that originate from a dynamic
/// scan correlated into the archive.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestData {
    pub headers: Option<String>,
    pub parameters: Option<String>,
    pub body: Option<String>,
    pub method: Option<String>,
    pub cookies: Option<String>,
    pub http_version: Option<String>,
    pub attack_payload: Option<String>,
    pub attack_type: Option<String>,
    pub response: Option<String>,
    pub trigger: Option<String>,
    pub vulnerable_parameter: Option<String>,
}

impl RequestData {
    /// Slot for a content-type/field name such as `requestheaders`.
    pub fn slot_mut(&mut self, name: &str) -> Option<&mut Option<String>> {
        Some(match name.to_ascii_lowercase().as_str() {
            "requestheaders" => &mut self.headers,
            "requestparameters" => &mut self.parameters,
            "requestbody" => &mut self.body,
            "requestmethod" => &mut self.method,
            "requestcookies" => &mut self.cookies,
            "requesthttpversion" => &mut self.http_version,
            "attackpayload" => &mut self.attack_payload,
            "attacktype" => &mut self.attack_type,
            "response" => &mut self.response,
            "trigger" => &mut self.trigger,
            "vulnerableparameter" => &mut self.vulnerable_parameter,
            _ => return None,
        })
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Audit state copied onto a finding so filters can see it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditState {
    /// Tag name (lower-cased) to current value.
    pub tags: BTreeMap<String, String>,
    pub suppressed: bool,
    pub comments: Vec<String>,
    pub comment_users: Vec<String>,
}

/// The canonical finding.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Vulnerability {
    pub instance_id: String,
    pub class_id: String,
    pub kingdom: String,
    #[serde(rename = "type")]
    pub vuln_type: String,
    pub sub_type: String,
    pub category: String,
    pub analyzer_name: String,
    pub default_severity: String,
    pub instance_severity: String,
    pub confidence: f64,
    pub accuracy: f64,
    pub impact: f64,
    pub probability: f64,
    pub likelihood: f64,
    pub priority: Option<Priority>,
    pub audience: String,
    pub file_type: String,
    pub package_name: String,
    pub build_id: String,
    pub uuid: String,
    pub context_function: String,
    pub context_class: String,
    pub short_description: String,
    pub explanation: String,
    pub knowledge: BTreeMap<String, String>,
    pub taint_flags: Vec<String>,
    pub stack_trace: Vec<Vec<StackTraceElement>>,
    pub first_stack_trace: Vec<StackTraceElement>,
    pub longest_stack_trace: Vec<StackTraceElement>,
    pub last_stack_trace_element: Option<StackTraceElement>,
    pub source: Option<StackTraceElement>,
    pub sink: Option<StackTraceElement>,
    pub files: Vec<SourceFile>,
    pub request: RequestData,
    #[serde(skip)]
    pub audit: AuditState,
}

impl Vulnerability {
    /// Primary file: the sink's, else the first attached snapshot.
    pub fn primary_file(&self) -> &str {
        self.sink
            .as_ref()
            .map(|s| s.filename.as_str())
            .filter(|f| !f.is_empty())
            .or_else(|| self.files.first().map(|f| f.name.as_str()))
            .unwrap_or("")
    }

    pub fn primary_line(&self) -> u32 {
        self.sink.as_ref().map(|s| s.line).unwrap_or(0)
    }

    pub fn source_function(&self) -> &str {
        self.source.as_ref().map(|s| s.additional_info.as_str()).unwrap_or("")
    }

    pub fn sink_function(&self) -> &str {
        self.sink.as_ref().map(|s| s.additional_info.as_str()).unwrap_or("")
    }

    /// Knowledge value by key, ignoring ASCII case.
    pub fn knowledge_value(&self, key: &str) -> Option<&str> {
        self.knowledge
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}
