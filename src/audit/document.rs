//! Read-modify-write access to the archive's `audit.xml`.
//!
//! The document is held as a generic XML tree so that anything this crate
//! does not model (project info, remediation metadata, vendor extensions)
//! is written back exactly as it was read.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::debug;

use crate::errors::AuditError;
use crate::utils::xml::{parse_document, XmlElement, XmlNode};

pub const AUDIT_NAMESPACE: &str = "xmlns://www.fortify.com/schema/audit";
const AUDIT_VERSION: &str = "4.3";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditComment {
    pub content: String,
    pub username: String,
    pub timestamp: String,
}

/// Snapshot of one issue's audit state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditIssue {
    pub instance_id: String,
    pub suppressed: bool,
    pub revision: u32,
    /// Lower-cased tag id to value.
    pub tags: BTreeMap<String, String>,
    pub comments: Vec<AuditComment>,
}

impl AuditIssue {
    pub fn tag(&self, id: &str) -> Option<&str> {
        self.tags.get(&id.to_lowercase()).map(String::as_str)
    }

    fn from_element(el: &XmlElement) -> Option<Self> {
        let instance_id = el.attr("instanceId")?.trim().to_string();
        if instance_id.is_empty() {
            return None;
        }
        let tags = el
            .children_named("Tag")
            .filter_map(|t| {
                let id = t.attr("id")?.trim().to_lowercase();
                Some((id, t.child_text("Value").unwrap_or_default().trim().to_string()))
            })
            .collect();
        let comments = el
            .child("ThreadedComments")
            .map(|tc| {
                tc.children_named("Comment")
                    .map(|c| AuditComment {
                        content: c.child_text("Content").unwrap_or_default(),
                        username: c.child_value("Username").unwrap_or_default(),
                        timestamp: c.child_value("Timestamp").unwrap_or_default(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Some(Self {
            instance_id,
            suppressed: el.attr("suppressed").is_some_and(|s| s.trim().eq_ignore_ascii_case("true")),
            revision: el.attr("revision").and_then(|r| r.trim().parse().ok()).unwrap_or(0),
            tags,
            comments,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AuditDocument {
    root: XmlElement,
    touched: HashSet<String>,
}

impl AuditDocument {
    pub fn parse(bytes: &[u8]) -> Result<Self, AuditError> {
        let root = parse_document(bytes)?;
        if root.name() != "Audit" {
            return Err(AuditError::parse(format!(
                "audit.xml root element is <{}>, expected <Audit>",
                root.name()
            )));
        }
        Ok(Self { root, touched: HashSet::new() })
    }

    /// A document with an empty issue list, for archives that have never
    /// been audited.
    pub fn empty() -> Self {
        let root = XmlElement::new("ns2:Audit")
            .with_attr("xmlns:ns2", AUDIT_NAMESPACE)
            .with_attr("version", AUDIT_VERSION)
            .with_child(XmlElement::new("ns2:IssueList"));
        Self { root, touched: HashSet::new() }
    }

    pub fn issues(&self) -> Vec<AuditIssue> {
        self.root
            .child("IssueList")
            .map(|list| list.children_named("Issue").filter_map(AuditIssue::from_element).collect())
            .unwrap_or_default()
    }

    /// Issues keyed by instance id; the first entry wins on duplicates.
    pub fn issue_map(&self) -> HashMap<String, AuditIssue> {
        let mut map = HashMap::new();
        for issue in self.issues() {
            map.entry(issue.instance_id.clone()).or_insert(issue);
        }
        map
    }

    pub fn issue(&self, instance_id: &str) -> Option<AuditIssue> {
        self.root
            .child("IssueList")?
            .children_named("Issue")
            .find(|e| e.attr("instanceId") == Some(instance_id))
            .and_then(AuditIssue::from_element)
    }

    /// Number of issues modified through this handle.
    pub fn touched(&self) -> usize {
        self.touched.len()
    }

    /// Mutable issue element, created when absent. The revision is bumped
    /// the first time an issue is modified through this handle.
    fn issue_mut(&mut self, instance_id: &str) -> &mut XmlElement {
        let list = self.root.child_or_insert("IssueList");
        let existing = list.children.iter().position(|c| {
            matches!(c, XmlNode::Element(e) if e.name() == "Issue" && e.attr("instanceId") == Some(instance_id))
        });
        let idx = match existing {
            Some(idx) => idx,
            None => {
                debug!(instance_id, "Adding issue to audit document");
                let issue = XmlElement::new(&list.prefixed("Issue"))
                    .with_attr("instanceId", instance_id)
                    .with_attr("suppressed", "false")
                    .with_attr("revision", "0");
                list.push(issue);
                list.children.len() - 1
            }
        };
        let issue = match &mut list.children[idx] {
            XmlNode::Element(e) => e,
            _ => unreachable!("index always points at an element"),
        };
        if self.touched.insert(instance_id.to_string()) {
            let revision: u32 = issue.attr("revision").and_then(|r| r.trim().parse().ok()).unwrap_or(0);
            issue.set_attr("revision", (revision + 1).to_string());
        }
        issue
    }

    pub fn set_tag(&mut self, instance_id: &str, tag_id: &str, value: &str) {
        let issue = self.issue_mut(instance_id);
        let existing = issue
            .children_named_mut("Tag")
            .find(|t| t.attr("id").is_some_and(|id| id.trim().eq_ignore_ascii_case(tag_id)));
        if let Some(tag) = existing {
            tag.child_or_insert("Value").set_text(value);
            return;
        }
        let tag = XmlElement::new(&issue.prefixed("Tag"))
            .with_attr("id", tag_id)
            .with_child(XmlElement::new(&issue.prefixed("Value")).with_text(value));
        // Tags precede the comment thread.
        let at = issue
            .children
            .iter()
            .position(|c| matches!(c, XmlNode::Element(e) if e.name() == "ThreadedComments"))
            .unwrap_or(issue.children.len());
        issue.children.insert(at, XmlNode::Element(tag));
    }

    pub fn add_comment(&mut self, instance_id: &str, content: &str, username: &str, at: DateTime<Utc>) {
        let issue = self.issue_mut(instance_id);
        let thread = issue.child_or_insert("ThreadedComments");
        let comment = XmlElement::new(&thread.prefixed("Comment"))
            .with_child(XmlElement::new(&thread.prefixed("Content")).with_text(content))
            .with_child(XmlElement::new(&thread.prefixed("Username")).with_text(username))
            .with_child(
                XmlElement::new(&thread.prefixed("Timestamp"))
                    .with_text(at.to_rfc3339_opts(SecondsFormat::Millis, false)),
            );
        thread.push(comment);
    }

    pub fn set_suppressed(&mut self, instance_id: &str, suppressed: bool) {
        self.issue_mut(instance_id).set_attr("suppressed", suppressed.to_string());
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.root.to_xml_string().into_bytes()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    pub const AUDIT_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<ns2:Audit xmlns:ns2="xmlns://www.fortify.com/schema/audit" version="4.3">
  <ns2:ProjectInfo><ns2:Name>demo</ns2:Name></ns2:ProjectInfo>
  <ns2:IssueList>
    <ns2:Issue instanceId="AAA" suppressed="false" revision="2">
      <ns2:Tag id="87F2364F-DCD4-49E6-861D-F8D3F351686B"><ns2:Value>Exploitable</ns2:Value></ns2:Tag>
      <ns2:ThreadedComments>
        <ns2:Comment><ns2:Content>looks real</ns2:Content><ns2:Username>alice</ns2:Username><ns2:Timestamp>2024-01-02T03:04:05.000+00:00</ns2:Timestamp></ns2:Comment>
      </ns2:ThreadedComments>
    </ns2:Issue>
    <ns2:Issue instanceId="BBB" suppressed="true" revision="0"/>
  </ns2:IssueList>
</ns2:Audit>"#;
}
