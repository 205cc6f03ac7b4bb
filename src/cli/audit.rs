use std::path::{Path, PathBuf};
use std::sync::Arc;

use console::style;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::audit::{AuditOrchestrator, AuditStatus, FprAuditResult, HttpClassifier};
use crate::cli::commands::AuditArgs;
use crate::cli::progress::spinner;
use crate::config::{self, AuditConfig};
use crate::errors::AuditError;
use crate::utils::formatting::{format_duration, format_ratio};

pub async fn handle_audit(
    args: AuditArgs,
    config_path: Option<&str>,
    quiet: bool,
    cancel: CancellationToken,
) -> Result<FprAuditResult, AuditError> {
    let fpr = PathBuf::from(&args.fpr);
    if !fpr.is_file() {
        return Err(AuditError::simple(format!("FPR file not found: {}", fpr.display())));
    }

    let mut config = super::load_config(config_path).await?;
    apply_overrides(&mut config, &args);
    if let Some(path) = args.tag_mapping.as_deref() {
        config.tag_mapping = Some(config::load_tag_mapping(Path::new(path)).await?);
    }
    config::parser::resolve_token(&mut config);
    config::validate_conflicts(&config)?;

    let url = config.classifier.url.clone().unwrap_or_default();
    let classifier = Arc::new(HttpClassifier::new(&url, config.classifier.max_retries)?);

    info!(fpr = %fpr.display(), "Starting FPR audit");
    let started = std::time::Instant::now();
    let bar = spinner(format!("Auditing {}", fpr.display()), !quiet && !args.json);

    let orchestrator = AuditOrchestrator::new(config, classifier)
        .with_output(args.output.as_ref().map(PathBuf::from))
        .with_cancellation(cancel);
    let outcome = orchestrator.run(&fpr).await;
    bar.finish_and_clear();
    let result = outcome?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if !quiet {
        print_summary(&result, started.elapsed().as_millis() as u64);
    }
    Ok(result)
}

/// Command-line flags win over the configuration file.
pub fn apply_overrides(config: &mut AuditConfig, args: &AuditArgs) {
    let classifier = &mut config.classifier;
    let pick = |flag: &Option<String>, current: &mut Option<String>| {
        if let Some(v) = flag.as_ref().filter(|v| !v.trim().is_empty()) {
            *current = Some(v.trim().to_string());
        }
    };
    pick(&args.url, &mut classifier.url);
    pick(&args.token, &mut classifier.token);
    pick(&args.project, &mut classifier.project);
    pick(&args.app, &mut classifier.application);
    pick(&args.app_version, &mut classifier.version);

    let audit = &mut config.audit;
    if args.filter_set.is_some() {
        audit.filter_set = args.filter_set.clone();
    }
    audit.no_filter_set |= args.no_filter_set;
    if !args.folders.is_empty() {
        audit.folders = args.folders.clone();
    }
    if !args.priorities.is_empty() {
        audit.priorities = args.priorities.clone();
    }
    audit.annotate_skipped |= args.annotate_skipped;
    if args.max_per_category.is_some() {
        audit.max_per_category = args.max_per_category;
    }
    if args.max_total.is_some() {
        audit.max_total = args.max_total;
    }
}

fn print_summary(result: &FprAuditResult, elapsed_ms: u64) {
    let status = match result.status {
        AuditStatus::Audited => style(result.status.as_str()).green().bold(),
        AuditStatus::PartiallyAudited => style(result.status.as_str()).yellow().bold(),
        AuditStatus::Failed => style(result.status.as_str()).red().bold(),
        AuditStatus::Skipped => style(result.status.as_str()).dim().bold(),
    };
    println!();
    println!("  {} {}", style("Status:").bold(), status);
    if let Some(message) = &result.message {
        println!("  {}", message);
    }
    println!(
        "  {} {}",
        style("Audited:").bold(),
        format_ratio(result.issues_successfully_audited, result.total_issues_to_audit)
    );
    if result.already_audited > 0 {
        println!("  {} {}", style("Already audited:").bold(), result.already_audited);
    }
    if result.skipped_by_limit > 0 {
        println!("  {} {}", style("Skipped by limit:").bold(), result.skipped_by_limit);
    }
    if let Some(path) = &result.updated_file {
        println!("  {} {}", style("Updated:").bold(), path.display());
    }
    println!("  {} {}", style("Elapsed:").bold(), format_duration(elapsed_ms));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands::{Cli, Commands};
    use clap::Parser;

    fn audit_args(extra: &[&str]) -> AuditArgs {
        let mut argv = vec!["fpr-audit", "audit", "scan.fpr"];
        argv.extend_from_slice(extra);
        match Cli::parse_from(argv).command {
            Commands::Audit(args) => args,
            _ => panic!("expected audit"),
        }
    }

    #[test]
    fn test_flags_override_file_values() {
        let mut config = AuditConfig::default();
        config.classifier.url = Some("https://file.example".into());
        config.audit.max_total = Some(50);
        config.audit.folders = vec!["High".into()];

        let args = audit_args(&["--url", "https://cli.example", "--folder", "Critical", "--annotate-skipped"]);
        apply_overrides(&mut config, &args);

        assert_eq!(config.classifier.url.as_deref(), Some("https://cli.example"));
        assert_eq!(config.audit.folders, vec!["Critical"]);
        assert_eq!(config.audit.max_total, Some(50));
        assert!(config.audit.annotate_skipped);
    }

    #[test]
    fn test_blank_flag_keeps_file_value() {
        let mut config = AuditConfig::default();
        config.classifier.project = Some("from-file".into());
        apply_overrides(&mut config, &audit_args(&["--project", "  "]));
        assert_eq!(config.classifier.project.as_deref(), Some("from-file"));
    }

    #[tokio::test]
    async fn test_missing_fpr_is_user_error() {
        let args = audit_args(&[]);
        let args = AuditArgs { fpr: "/nonexistent/scan.fpr".into(), ..args };
        let err = handle_audit(args, None, true, CancellationToken::new()).await.unwrap_err();
        assert!(err.is_user_error());
    }
}
