pub mod audit;
pub mod commands;
pub mod inspect;
pub mod progress;
pub mod remediate;

use std::path::PathBuf;

pub use commands::{Cli, Commands, LogFormat};

use crate::config::{self, AuditConfig};
use crate::errors::AuditError;

/// The YAML configuration named by `--config`, or defaults.
pub async fn load_config(path: Option<&str>) -> Result<AuditConfig, AuditError> {
    match path.map(str::trim).filter(|p| !p.is_empty()) {
        Some(p) => config::parse_config(&PathBuf::from(p)).await,
        None => Ok(AuditConfig::default()),
    }
}
