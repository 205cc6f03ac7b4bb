use tracing::{debug, info};

use crate::archive::{FprArchive, AUDIT_ENTRY, FILTER_TEMPLATE_ENTRY, FVDL_ENTRY};
use crate::errors::AuditError;
use crate::filter::{parse_filter_template, FilterTemplate};
use crate::fvdl::parse_fvdl;
use crate::vuln::{Vulnerability, VulnerabilityBuilder};
use super::document::AuditDocument;
use super::tags::audit_state;

/// Everything a run needs from one archive.
#[derive(Debug, Clone)]
pub struct ParsedFpr {
    pub build_id: String,
    pub vulnerabilities: Vec<Vulnerability>,
    pub template: Option<FilterTemplate>,
    pub audit: AuditDocument,
}

impl ParsedFpr {
    /// Parse the dataflow document, filter template and audit state, and
    /// copy each finding's audit state onto it.
    pub fn load(archive: &FprArchive) -> Result<Self, AuditError> {
        let fvdl = parse_fvdl(&archive.read_entry(FVDL_ENTRY)?)?;
        let mut vulnerabilities = VulnerabilityBuilder::new(&fvdl, archive).build_all();

        let template = match archive.read_optional(FILTER_TEMPLATE_ENTRY)? {
            Some(bytes) => Some(parse_filter_template(&bytes)?),
            None => {
                debug!("Archive has no filter template");
                None
            }
        };
        let audit = match archive.read_optional(AUDIT_ENTRY)? {
            Some(bytes) => AuditDocument::parse(&bytes)?,
            None => {
                debug!("Archive has no audit document, starting from an empty one");
                AuditDocument::empty()
            }
        };

        let issues = audit.issue_map();
        for vuln in &mut vulnerabilities {
            if let Some(issue) = issues.get(&vuln.instance_id) {
                vuln.audit = audit_state(issue, template.as_ref());
            }
        }

        info!(
            build_id = fvdl.build.build_id.as_deref().unwrap_or(""),
            vulnerabilities = vulnerabilities.len(),
            audited_entries = issues.len(),
            "Parsed FPR"
        );
        Ok(Self {
            build_id: fvdl.build.build_id.clone().unwrap_or_default(),
            vulnerabilities,
            template,
            audit,
        })
    }
}
