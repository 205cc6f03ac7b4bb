use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::AuditError;
use crate::utils::text::parse_u32_or;
use crate::utils::xml::{parse_document, XmlElement};

pub const REMEDIATION_NAMESPACE: &str = "xmlns://www.fortify.com/schema/remediations";

/// One recorded edit inside a file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Change {
    pub line_from: u32,
    pub line_to: u32,
    pub context: String,
    pub context_before: u32,
    pub original_code: String,
    pub new_code: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct FileChanges {
    pub filename: String,
    pub hash: String,
    pub changes: Vec<Change>,
}

/// Edits recorded for one finding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Remediation {
    pub instance_id: String,
    pub file_changes: Vec<FileChanges>,
}

fn descendants<'a>(el: &'a XmlElement, name: &str, out: &mut Vec<&'a XmlElement>) {
    for child in el.elements() {
        if child.name() == name {
            out.push(child);
        } else {
            descendants(child, name, out);
        }
    }
}

fn parse_change(el: &XmlElement) -> Option<Change> {
    let (Some(from), Some(to)) = (el.child_value("LineFrom"), el.child_value("LineTo")) else {
        warn!("Skipping change without a line range");
        return None;
    };
    let (Ok(line_from), Ok(line_to)) = (from.parse::<u32>(), to.parse::<u32>()) else {
        warn!(from = %from, to = %to, "Skipping change with a malformed line range");
        return None;
    };
    let context = el.child("Context");
    Some(Change {
        line_from,
        line_to,
        context: context.map(XmlElement::text).unwrap_or_default(),
        context_before: parse_u32_or(context.and_then(|c| c.attr("before")), 0),
        original_code: el.child_text("OriginalCode").unwrap_or_default(),
        new_code: el.child_text("NewCode").unwrap_or_default(),
    })
}

fn parse_file_changes(el: &XmlElement) -> Option<FileChanges> {
    let Some(filename) = el.child_value("Filename") else {
        warn!("Skipping file changes without a file name");
        return None;
    };
    Some(FileChanges {
        filename,
        hash: el.child_value("Hash").unwrap_or_default(),
        changes: el.children_named("Change").filter_map(parse_change).collect(),
    })
}

/// `remediations.xml`, kept as a tree so new entries can be appended.
#[derive(Debug, Clone)]
pub struct RemediationDocument {
    root: XmlElement,
}

impl RemediationDocument {
    pub fn parse(bytes: &[u8]) -> Result<Self, AuditError> {
        Ok(Self { root: parse_document(bytes)? })
    }

    pub fn empty() -> Self {
        Self { root: XmlElement::new("Remediations").with_attr("xmlns", REMEDIATION_NAMESPACE) }
    }

    /// Every recorded remediation in document order.
    pub fn remediations(&self) -> Vec<Remediation> {
        let mut found = Vec::new();
        if self.root.name() == "Remediation" {
            found.push(&self.root);
        } else {
            descendants(&self.root, "Remediation", &mut found);
        }
        found
            .into_iter()
            .map(|r| Remediation {
                instance_id: r.attr("instanceId").unwrap_or_default().to_string(),
                file_changes: r.children_named("FileChanges").filter_map(parse_file_changes).collect(),
            })
            .collect()
    }

    pub fn add(&mut self, instance_id: &str, file_changes: &[FileChanges]) {
        let q = |name: &str| self.root.prefixed(name);
        let mut remediation = XmlElement::new(&q("Remediation")).with_attr("instanceId", instance_id);
        for fc in file_changes {
            let mut el = XmlElement::new(&q("FileChanges"))
                .with_child(XmlElement::new(&q("Filename")).with_text(fc.filename.as_str()))
                .with_child(XmlElement::new(&q("Hash")).with_text(fc.hash.as_str()));
            for change in &fc.changes {
                el.push(
                    XmlElement::new(&q("Change"))
                        .with_child(XmlElement::new(&q("LineFrom")).with_text(change.line_from.to_string()))
                        .with_child(XmlElement::new(&q("LineTo")).with_text(change.line_to.to_string()))
                        .with_child(
                            XmlElement::new(&q("Context"))
                                .with_attr("before", change.context_before.to_string())
                                .with_text(change.context.as_str()),
                        )
                        .with_child(XmlElement::new(&q("OriginalCode")).with_text(change.original_code.as_str()))
                        .with_child(XmlElement::new(&q("NewCode")).with_text(change.new_code.as_str())),
                );
            }
            remediation.push(el);
        }
        self.root.push(remediation);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.root.to_xml_string().into_bytes()
    }
}
