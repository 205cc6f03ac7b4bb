use std::path::PathBuf;

use console::style;
use serde::Serialize;

use crate::archive::{FprArchive, FILTER_TEMPLATE_ENTRY};
use crate::audit::ParsedFpr;
use crate::cli::commands::{FprArgs, InspectArgs};
use crate::errors::AuditError;
use crate::filter::{parse_filter_template, FilterSet};
use crate::vuln::Vulnerability;

fn open(path: &str) -> Result<FprArchive, AuditError> {
    let path = PathBuf::from(path);
    if !path.is_file() {
        return Err(AuditError::simple(format!("FPR file not found: {}", path.display())));
    }
    FprArchive::open(&path)
}

pub async fn handle_filter_sets(args: FprArgs) -> Result<(), AuditError> {
    let archive = open(&args.fpr)?;
    let Some(bytes) = archive.read_optional(FILTER_TEMPLATE_ENTRY)? else {
        println!("No filter template in {}", args.fpr);
        return Ok(());
    };
    let template = parse_filter_template(&bytes)?;
    if template.filter_sets.is_empty() {
        println!("No filter sets defined in {}", args.fpr);
    }
    for set in &template.filter_sets {
        print_filter_set(set);
    }
    Ok(())
}

fn print_filter_set(set: &FilterSet) {
    let enabled = if set.enabled { style("enabled").green() } else { style("disabled").dim() };
    println!("{} ({}) {}", style(&set.title).bold(), set.id, enabled);
    for folder in &set.folder_definitions {
        println!("    {} ({})", folder.name, folder.id);
    }
}

/// One line of `inspect` output.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FindingRow {
    pub instance_id: String,
    pub category: String,
    pub priority: String,
    pub likelihood: f64,
    pub file: String,
    pub line: u32,
}

impl From<&Vulnerability> for FindingRow {
    fn from(v: &Vulnerability) -> Self {
        Self {
            instance_id: v.instance_id.clone(),
            category: v.category.clone(),
            priority: v.priority.map(|p| p.as_str().to_string()).unwrap_or_default(),
            likelihood: v.likelihood,
            file: v.primary_file().to_string(),
            line: v.primary_line(),
        }
    }
}

pub async fn handle_inspect(args: InspectArgs) -> Result<(), AuditError> {
    let path = args.fpr.clone();
    let parsed = tokio::task::spawn_blocking(move || {
        let archive = open(&path)?;
        ParsedFpr::load(&archive)
    })
    .await
    .map_err(|e| AuditError::Internal(format!("Inspect task failed: {}", e)))??;

    let rows: Vec<FindingRow> = parsed.vulnerabilities.iter().map(FindingRow::from).collect();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("{} {} ({} findings)", style("Build").bold(), parsed.build_id, rows.len());
    for row in &rows {
        println!(
            "{:<34} {:<9} {:>5.2}  {:<40} {}:{}",
            row.instance_id, row.priority, row.likelihood, row.category, row.file, row.line
        );
    }
    Ok(())
}
