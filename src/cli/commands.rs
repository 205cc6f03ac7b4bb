use std::sync::LazyLock;

use clap::{Args, Parser, Subcommand, ValueEnum};

static LONG_VERSION: LazyLock<String> = LazyLock::new(|| {
    format!(
        "{} ({} {}, built {})",
        env!("CARGO_PKG_VERSION"),
        option_env!("FPR_AUDIT_GIT_REV").unwrap_or("unknown revision"),
        option_env!("FPR_AUDIT_TARGET").unwrap_or("unknown target"),
        env!("FPR_AUDIT_BUILD_DATE")
    )
});

#[derive(Parser)]
#[command(
    name = "fpr-audit",
    version,
    long_version = LONG_VERSION.as_str(),
    about = "Audit FPR archives with an external classifier and apply recorded remediations"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    /// YAML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Submit unaudited findings to the classifier and write verdicts back
    Audit(AuditArgs),
    /// Apply the remediations recorded in an FPR to a source tree
    ApplyRemediations(RemediateArgs),
    /// List the filter sets defined in an FPR
    FilterSets(FprArgs),
    /// Print the findings of an FPR
    Inspect(InspectArgs),
    /// Validate a configuration file
    ValidateConfig(ValidateArgs),
}

#[derive(Args, Clone)]
pub struct AuditArgs {
    /// FPR file to audit
    pub fpr: String,

    /// Classifier service URL
    #[arg(long)]
    pub url: Option<String>,

    /// Classifier access token (or FPR_AUDIT_TOKEN)
    #[arg(long)]
    pub token: Option<String>,

    /// Project name reported to the classifier (defaults to the build id)
    #[arg(long)]
    pub project: Option<String>,

    /// Application name
    #[arg(long)]
    pub app: Option<String>,

    /// Application version
    #[arg(long = "version")]
    pub app_version: Option<String>,

    /// Filter set title, id or pattern
    #[arg(long)]
    pub filter_set: Option<String>,

    /// Ignore the filter sets in the FPR
    #[arg(long)]
    pub no_filter_set: bool,

    /// Restrict to a folder of the active filter set (repeatable)
    #[arg(long = "folder")]
    pub folders: Vec<String>,

    /// Restrict to a priority, prefix or wildcard (repeatable)
    #[arg(long = "priority")]
    pub priorities: Vec<String>,

    /// Tag mapping YAML file
    #[arg(long)]
    pub tag_mapping: Option<String>,

    /// Write the updated FPR here instead of overwriting the input
    #[arg(short, long)]
    pub output: Option<String>,

    /// Comment and tag findings held back by a limit
    #[arg(long)]
    pub annotate_skipped: bool,

    /// Maximum findings submitted per category
    #[arg(long)]
    pub max_per_category: Option<usize>,

    /// Maximum findings submitted in total
    #[arg(long)]
    pub max_total: Option<usize>,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Clone)]
pub struct RemediateArgs {
    /// FPR file holding remediations.xml
    pub fpr: String,

    /// Root of the source tree the remediations apply to
    #[arg(long)]
    pub source_dir: Option<String>,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Clone)]
pub struct FprArgs {
    /// FPR file
    pub fpr: String,
}

#[derive(Args, Clone)]
pub struct InspectArgs {
    /// FPR file
    pub fpr: String,

    /// Print findings as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Clone)]
pub struct ValidateArgs {
    /// Config file to validate
    pub config: String,
}
