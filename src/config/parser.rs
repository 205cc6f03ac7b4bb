use std::path::Path;

use tracing::{debug, warn};

use crate::errors::AuditError;
use super::credentials::resolve_credential;
use super::schema::{CONFIG_SCHEMA, TAG_MAPPING_SCHEMA};
use super::security::validate_security_patterns;
use super::types::{AuditConfig, TagMappingConfig, TOKEN_ENV_VAR};

const MAX_CONFIG_BYTES: u64 = 1_048_576;

/// Load a run configuration from YAML.
pub async fn parse_config(path: &Path) -> Result<AuditConfig, AuditError> {
    let yaml = read_yaml(path).await?;

    validate_security_patterns(&yaml)?;
    validate_schema(&yaml, &CONFIG_SCHEMA, "config");

    let mut config: AuditConfig = serde_yaml::from_value(yaml)?;
    resolve_token(&mut config);

    validate_conflicts(&config)?;

    debug!(path = %path.display(), "Configuration loaded");
    Ok(config)
}

/// Load a standalone tag mapping file.
pub async fn load_tag_mapping(path: &Path) -> Result<TagMappingConfig, AuditError> {
    let yaml = read_yaml(path).await?;
    validate_security_patterns(&yaml)?;
    validate_schema(&yaml, &TAG_MAPPING_SCHEMA, "tag mapping");

    let mapping: TagMappingConfig = serde_yaml::from_value(yaml)?;
    if mapping.tag_id.trim().is_empty() {
        return Err(AuditError::Config("Tag mapping has an empty tag_id".into()));
    }
    Ok(mapping)
}

async fn read_yaml(path: &Path) -> Result<serde_yaml::Value, AuditError> {
    if !path.exists() {
        return Err(AuditError::Config(format!("Config file not found: {}", path.display())));
    }

    let metadata = tokio::fs::metadata(path).await?;
    if metadata.len() > MAX_CONFIG_BYTES {
        return Err(AuditError::Config(format!("{} exceeds 1MB limit", path.display())));
    }

    let content = tokio::fs::read_to_string(path).await?;
    if content.trim().is_empty() {
        return Ok(serde_yaml::Value::Mapping(Default::default()));
    }
    Ok(serde_yaml::from_str(&content)?)
}

/// Schema validation is advisory: violations are logged and the typed
/// deserialize decides.
fn validate_schema(yaml: &serde_yaml::Value, schema: &serde_json::Value, what: &str) {
    let json_value = match serde_json::to_value(yaml) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "Could not convert {} for schema validation", what);
            return;
        }
    };

    let compiled = match jsonschema::JSONSchema::compile(schema) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Schema compilation error");
            return;
        }
    };

    if let Err(errors) = compiled.validate(&json_value) {
        for e in errors {
            warn!(validation_error = %format!("{} at {}", e, e.instance_path), "Schema warning in {}", what);
        }
    };
}

/// A `$VAR` token is taken from the environment; an absent token falls back
/// to `FPR_AUDIT_TOKEN`.
pub(crate) fn resolve_token(config: &mut AuditConfig) {
    config.classifier.token = match config.classifier.token.take() {
        Some(token) => Some(resolve_credential(&token)),
        None => std::env::var(TOKEN_ENV_VAR).ok().filter(|t| !t.is_empty()),
    };
}

/// Detect semantic conflicts in the parsed configuration.
pub fn validate_conflicts(config: &AuditConfig) -> Result<(), AuditError> {
    let audit = &config.audit;
    let named_set = audit.filter_set.as_deref().is_some_and(|s| !s.trim().is_empty());

    if audit.no_filter_set && named_set {
        return Err(AuditError::Config(
            "audit.no_filter_set and audit.filter_set cannot be used together".into(),
        ));
    }
    if audit.no_filter_set && !audit.folders.is_empty() {
        return Err(AuditError::Config(
            "audit.folders requires a filter set, but audit.no_filter_set is enabled".into(),
        ));
    }
    if audit.max_total == Some(0) {
        return Err(AuditError::Config("audit.max_total must be at least 1".into()));
    }
    if audit.max_per_category == Some(0) {
        return Err(AuditError::Config("audit.max_per_category must be at least 1".into()));
    }
    if config.classifier.timeout_minutes == 0 {
        return Err(AuditError::Config("classifier.timeout_minutes must be at least 1".into()));
    }

    if config.classifier.url.is_some() && config.classifier.token.as_deref().map_or(true, str::is_empty) {
        warn!("Classifier URL configured but no token provided");
    }
    if let (Some(max_cat), Some(max_total)) = (audit.max_per_category, audit.max_total) {
        if max_cat > max_total {
            warn!(max_per_category = max_cat, max_total, "Per-category limit exceeds total limit");
        }
    }

    Ok(())
}
