use serde::Serialize;
use tracing::{debug, warn};

use crate::errors::AuditError;
use crate::utils::text::parse_bool;
use crate::utils::xml::{parse_document, XmlElement};

pub const ACTION_SET_FOLDER: &str = "setFolder";
pub const ACTION_HIDE: &str = "hide";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub color: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagValue {
    pub id: String,
    pub value: String,
    pub description: String,
    pub is_default: bool,
    pub hidden: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub tag_type: String,
    pub value_type: String,
    pub extensible: bool,
    pub hidden: bool,
    pub values: Vec<TagValue>,
}

impl TagDefinition {
    pub fn value_names(&self) -> Vec<&str> {
        self.values.iter().map(|v| v.value.as_str()).collect()
    }

    /// Value as declared by the template, matched case-insensitively.
    pub fn find_value(&self, value: &str) -> Option<&TagValue> {
        self.values.iter().find(|v| v.value.eq_ignore_ascii_case(value.trim()))
    }
}

/// One folder or hide rule of a filter set.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub action_param: String,
    pub query: String,
    pub action: String,
}

impl Filter {
    pub fn is_set_folder(&self) -> bool {
        self.action.eq_ignore_ascii_case(ACTION_SET_FOLDER)
    }

    pub fn is_hide(&self) -> bool {
        self.action.eq_ignore_ascii_case(ACTION_HIDE)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSet {
    pub id: String,
    pub set_type: String,
    pub title: String,
    pub description: String,
    pub enabled: bool,
    pub disable_edit: bool,
    pub enabled_folders: Vec<String>,
    pub filters: Vec<Filter>,
    /// Template-wide folder definitions, visible to every filter set.
    pub folder_definitions: Vec<FolderDefinition>,
}

impl FilterSet {
    pub fn folder_by_id(&self, id: &str) -> Option<&FolderDefinition> {
        self.folder_definitions.iter().find(|f| f.id == id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterTemplate {
    pub id: String,
    pub version: String,
    pub name: String,
    pub description: String,
    pub folder_definitions: Vec<FolderDefinition>,
    pub default_folder: Option<String>,
    pub tag_definitions: Vec<TagDefinition>,
    pub filter_sets: Vec<FilterSet>,
}

impl FilterTemplate {
    pub fn default_enabled_filter_set(&self) -> Option<&FilterSet> {
        self.filter_sets.iter().find(|fs| fs.enabled)
    }

    pub fn tag_by_name(&self, name: &str) -> Option<&TagDefinition> {
        self.tag_definitions.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn tag_by_id(&self, id: &str) -> Option<&TagDefinition> {
        self.tag_definitions.iter().find(|t| t.id.eq_ignore_ascii_case(id))
    }
}

/// Child text under either capitalization, as templates mix both.
fn text_of(el: &XmlElement, name: &str) -> String {
    let mut cap = name.to_string();
    if let Some(first) = cap.get_mut(0..1) {
        first.make_ascii_uppercase();
    }
    el.child_value(name)
        .or_else(|| el.child_value(&cap))
        .or_else(|| el.child_value(&name.to_ascii_lowercase()))
        .unwrap_or_default()
}

fn parse_folder(el: &XmlElement) -> FolderDefinition {
    FolderDefinition {
        id: el.attr("id").unwrap_or_default().to_string(),
        name: text_of(el, "name"),
        description: text_of(el, "description"),
        color: el.attr("color").unwrap_or_default().to_string(),
    }
}

fn parse_tag_value(el: &XmlElement) -> TagValue {
    // The value is either the element's own text or a nested value element.
    let own = el.text().trim().to_string();
    let value = if own.is_empty() { text_of(el, "value") } else { own };
    TagValue {
        id: el.attr("id").unwrap_or_default().to_string(),
        value,
        description: text_of(el, "description"),
        is_default: parse_bool(el.attr("isDefault").or(el.attr("default"))),
        hidden: parse_bool(el.attr("hidden")),
    }
}

fn parse_tag(el: &XmlElement) -> TagDefinition {
    let values = el
        .elements()
        .filter(|c| c.name().eq_ignore_ascii_case("value"))
        .map(parse_tag_value)
        .filter(|v| !v.value.is_empty())
        .collect();
    TagDefinition {
        id: el.attr("id").unwrap_or_default().to_string(),
        name: text_of(el, "name"),
        description: text_of(el, "description"),
        tag_type: el.attr("type").unwrap_or_default().to_string(),
        value_type: el.attr("valueType").unwrap_or_default().to_string(),
        extensible: parse_bool(el.attr("extensible")),
        hidden: parse_bool(el.attr("hidden")),
        values,
    }
}

fn parse_filter(el: &XmlElement) -> Filter {
    Filter {
        action_param: text_of(el, "actionParam"),
        query: el
            .child_text("query")
            .or_else(|| el.child_text("Query"))
            .map(|q| q.trim().to_string())
            .unwrap_or_default(),
        action: text_of(el, "action"),
    }
}

fn parse_filter_set(el: &XmlElement, folders: &[FolderDefinition]) -> FilterSet {
    FilterSet {
        id: el.attr("id").unwrap_or_default().to_string(),
        set_type: el.attr("type").unwrap_or_default().to_string(),
        title: text_of(el, "title"),
        description: text_of(el, "description"),
        enabled: parse_bool(el.attr("enabled")),
        disable_edit: parse_bool(el.attr("disableEdit")),
        enabled_folders: el
            .children_named("EnabledFolders")
            .map(|f| f.text().trim().to_string())
            .filter(|f| !f.is_empty())
            .collect(),
        filters: el.children_named("Filter").map(parse_filter).collect(),
        folder_definitions: folders.to_vec(),
    }
}

/// Parse `filtertemplate.xml`.
pub fn parse_filter_template(bytes: &[u8]) -> Result<FilterTemplate, AuditError> {
    let root = parse_document(bytes)?;
    if root.name() != "FilterTemplate" {
        return Err(AuditError::parse(format!(
            "Expected FilterTemplate root element, found '{}'",
            root.name()
        )));
    }

    let folder_definitions: Vec<FolderDefinition> =
        root.children_named("FolderDefinition").map(parse_folder).collect();
    let filter_sets: Vec<FilterSet> = root
        .children_named("FilterSet")
        .map(|fs| parse_filter_set(fs, &folder_definitions))
        .collect();

    for fs in &filter_sets {
        for filter in fs.filters.iter().filter(|f| !f.is_set_folder() && !f.is_hide()) {
            warn!(filter_set = %fs.title, action = %filter.action, "Unsupported filter action, ignoring");
        }
    }

    let template = FilterTemplate {
        id: root.attr("id").unwrap_or_default().to_string(),
        version: root.attr("version").unwrap_or_default().to_string(),
        name: text_of(&root, "name"),
        description: text_of(&root, "description"),
        default_folder: root
            .child("DefaultFolder")
            .and_then(|d| d.attr("folderID"))
            .map(str::to_string),
        tag_definitions: root.children_named("TagDefinition").map(parse_tag).collect(),
        folder_definitions,
        filter_sets,
    };
    debug!(
        folders = template.folder_definitions.len(),
        tags = template.tag_definitions.len(),
        filter_sets = template.filter_sets.len(),
        "Parsed filter template"
    );
    Ok(template)
}

#[cfg(test)]
pub(crate) mod fixtures {
    pub const TEMPLATE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<FilterTemplate version="24.2" id="tpl-1">
  <Name>Quick View</Name>
  <Description>Default template</Description>
  <FolderDefinition id="f-critical" color="ed1c24"><name>Critical</name><description>Crit</description></FolderDefinition>
  <FolderDefinition id="f-high" color="ff7800"><name>High</name></FolderDefinition>
  <FolderDefinition id="f-other" color="000000"><name>Other</name></FolderDefinition>
  <DefaultFolder folderID="f-other"/>
  <TagDefinition id="87f2364f-dcd4-49e6-861d-f8d3f351686b" type="user" valueType="LIST" extensible="false">
    <name>Analysis</name>
    <value id="0" isDefault="true">Not Set</value>
    <value id="1">Not an Issue</value>
    <value id="2">Exploitable</value>
  </TagDefinition>
  <TagDefinition id="aaaa-bbbb" type="user" valueType="LIST" extensible="true">
    <name>Auditor Status</name>
    <value id="0"><value>Pending Review</value></value>
    <value id="1"><value>Reviewed</value></value>
  </TagDefinition>
  <FilterSet type="user" id="fs-quick" enabled="true">
    <Title>Quick View</Title>
    <EnabledFolders>f-critical</EnabledFolders>
    <EnabledFolders>f-high</EnabledFolders>
    <Filter><actionParam>f-critical</actionParam><query>[fortify priority order]:critical</query><action>setFolder</action></Filter>
    <Filter><actionParam>f-high</actionParam><query>[fortify priority order]:high</query><action>setFolder</action></Filter>
    <Filter><actionParam>f-other</actionParam><query>[fortify priority order]:medium OR [fortify priority order]:low</query><action>setFolder</action></Filter>
    <Filter><actionParam></actionParam><query>category:"Dead Code"</query><action>hide</action></Filter>
  </FilterSet>
  <FilterSet type="user" id="fs-security" enabled="false">
    <Title>Security Auditor View</Title>
    <Filter><actionParam>f-critical</actionParam><query>taint:web</query><action>setFolder</action></Filter>
    <Filter><actionParam>f-other</actionParam><query>analyzer:dataflow</query><action>setFolder</action></Filter>
  </FilterSet>
  <FilterSet type="user" id="fs-broken" enabled="false">
    <Title>Broken View</Title>
    <Filter><actionParam>f-critical</actionParam><query>category:/[/</query><action>setFolder</action></Filter>
    <Filter><actionParam>f-other</actionParam><query>dataflow</query><action>setFolder</action></Filter>
  </FilterSet>
</FilterTemplate>"#;
}
