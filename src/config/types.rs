use serde::{Deserialize, Serialize};

pub const DEFAULT_ANALYSIS_TAG_ID: &str = "87f2364f-dcd4-49e6-861d-f8d3f351686b";
pub const DEFAULT_USER_NAME: &str = "Fortify Aviator";
pub const DEFAULT_TIMEOUT_MINUTES: u64 = 500;
pub const TOKEN_ENV_VAR: &str = "FPR_AUDIT_TOKEN";

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AuditConfig {
    pub classifier: ClassifierConfig,
    pub audit: AuditSettings,
    pub tag_mapping: Option<TagMappingConfig>,
    pub remediation: Option<RemediationSettings>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub url: Option<String>,
    pub token: Option<String>,
    pub project: Option<String>,
    pub application: Option<String>,
    pub version: Option<String>,
    pub timeout_minutes: u64,
    pub max_retries: u32,
    pub tier: Option<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            project: None,
            application: None,
            version: None,
            timeout_minutes: DEFAULT_TIMEOUT_MINUTES,
            max_retries: 3,
            tier: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditSettings {
    pub filter_set: Option<String>,
    pub no_filter_set: bool,
    pub folders: Vec<String>,
    pub priorities: Vec<String>,
    pub annotate_skipped: bool,
    pub max_per_category: Option<usize>,
    pub max_total: Option<usize>,
    pub user_name: String,
    pub auditor_status_tag_id: Option<String>,
    pub expected_outcome_tag_id: Option<String>,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            filter_set: None,
            no_filter_set: false,
            folders: Vec::new(),
            priorities: Vec::new(),
            annotate_skipped: false,
            max_per_category: None,
            max_total: None,
            user_name: DEFAULT_USER_NAME.to_string(),
            auditor_status_tag_id: None,
            expected_outcome_tag_id: None,
        }
    }
}

/// Translation of classifier verdicts into audit tag values.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TagMappingConfig {
    pub tag_id: String,
    pub mapping: TierMapping,
}

impl Default for TagMappingConfig {
    fn default() -> Self {
        let tier = TierResults {
            fp: Some(MappedResult { value: "Not an Issue".into(), suppress: false }),
            tp: Some(MappedResult { value: "Exploitable".into(), suppress: false }),
            unsure: Some(MappedResult { value: "Suspicious".into(), suppress: false }),
        };
        Self {
            tag_id: DEFAULT_ANALYSIS_TAG_ID.to_string(),
            mapping: TierMapping { tier_1: Some(tier.clone()), tier_2: Some(tier) },
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct TierMapping {
    pub tier_1: Option<TierResults>,
    pub tier_2: Option<TierResults>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct TierResults {
    pub fp: Option<MappedResult>,
    pub tp: Option<MappedResult>,
    pub unsure: Option<MappedResult>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MappedResult {
    pub value: String,
    #[serde(default)]
    pub suppress: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictLabel {
    Fp,
    Tp,
    Unsure,
}

impl VerdictLabel {
    /// Classify a raw verdict value by case-insensitive substring.
    pub fn classify(value: &str) -> Option<Self> {
        let v = value.trim().to_lowercase();
        if v.is_empty() {
            return None;
        }
        const FP: &[&str] = &["not an issue", "false positive", "fp"];
        const TP: &[&str] = &["remediation required", "exploitable", "true positive", "tp"];
        const UNSURE: &[&str] = &["unsure", "suspicious"];
        if FP.iter().any(|k| v.contains(k)) {
            Some(Self::Fp)
        } else if TP.iter().any(|k| v.contains(k)) {
            Some(Self::Tp)
        } else if UNSURE.iter().any(|k| v.contains(k)) {
            Some(Self::Unsure)
        } else {
            None
        }
    }
}

impl TierResults {
    pub fn get(&self, label: VerdictLabel) -> Option<&MappedResult> {
        match label {
            VerdictLabel::Fp => self.fp.as_ref(),
            VerdictLabel::Tp => self.tp.as_ref(),
            VerdictLabel::Unsure => self.unsure.as_ref(),
        }
    }
}

impl TagMappingConfig {
    /// Map a verdict value for the given response tier. Unmapped values are
    /// written as returned, unsuppressed.
    pub fn map_verdict(&self, value: &str, tier: Option<&str>) -> MappedResult {
        let tier_results = if tier.is_some_and(is_tier_two) {
            self.mapping.tier_2.as_ref()
        } else {
            self.mapping.tier_1.as_ref()
        };
        VerdictLabel::classify(value)
            .and_then(|label| tier_results.and_then(|t| t.get(label)))
            .cloned()
            .unwrap_or_else(|| MappedResult { value: value.trim().to_string(), suppress: false })
    }
}

fn is_tier_two(tier: &str) -> bool {
    let t = tier.trim().to_lowercase();
    t == "2" || t == "tier_2" || t == "tier2" || t == "tier 2"
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RemediationSettings {
    pub source_dir: String,
}

impl Default for RemediationSettings {
    fn default() -> Self {
        Self { source_dir: ".".to_string() }
    }
}
