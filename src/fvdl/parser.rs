use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::errors::AuditError;
use crate::utils::text::{parse_bool, parse_u32_or};
use crate::utils::xml::{parse_document, XmlElement};
use super::model::*;

/// Parse the dataflow document.
///
/// Every section except the `FVDL` root is optional; a missing section yields
/// an empty table. Node, trace and snippet references are kept as keys and
/// resolved later, so forward references are fine.
pub fn parse_fvdl(bytes: &[u8]) -> Result<FvdlDocument, AuditError> {
    let root = parse_document(bytes)?;
    if root.name() != "FVDL" {
        return Err(AuditError::parse(format!(
            "expected FVDL root element, found <{}>",
            root.name()
        )));
    }

    let mut doc = FvdlDocument { build: parse_build(&root), ..Default::default() };

    for section in root.elements() {
        match section.name() {
            "EngineData" => parse_rules(section, &mut doc.rules),
            "UnifiedNodePool" => parse_node_pool(section, &mut doc.nodes),
            "UnifiedTracePool" => parse_trace_pool(section, &mut doc.traces),
            "Snippets" => parse_snippets(section, &mut doc),
            "Description" => parse_description(section, &mut doc),
            "Vulnerabilities" => {
                doc.vulnerabilities = section
                    .children_named("Vulnerability")
                    .map(parse_vulnerability)
                    .collect();
            }
            _ => {}
        }
    }

    info!(
        rules = doc.rules.len(),
        nodes = doc.nodes.len(),
        traces = doc.traces.len(),
        snippets = doc.snippets.len(),
        descriptions = doc.descriptions.len(),
        vulnerabilities = doc.vulnerabilities.len(),
        "Parsed dataflow document"
    );
    Ok(doc)
}

fn parse_id(value: Option<&str>) -> Option<PoolId> {
    value.and_then(|v| v.trim().parse().ok())
}

fn parse_build(root: &XmlElement) -> BuildInfo {
    let build = root.child("Build");
    BuildInfo {
        uuid: root.child_value("UUID"),
        build_id: build.and_then(|b| b.child_value("BuildID")),
        source_base_path: build.and_then(|b| b.child_value("SourceBasePath")),
        number_files: build
            .and_then(|b| b.child_value("NumberFiles"))
            .and_then(|v| v.parse().ok()),
        scan_time: build
            .and_then(|b| b.child_value("ScanTime"))
            .and_then(|v| v.parse().ok()),
    }
}

fn parse_meta_groups(meta: Option<&XmlElement>, into: &mut BTreeMap<String, String>) {
    let Some(meta) = meta else { return };
    for group in meta.children_named("Group") {
        if let Some(name) = group.attr("name") {
            into.insert(name.to_string(), group.text().trim().to_string());
        }
    }
}

fn parse_rules(engine: &XmlElement, rules: &mut RuleMetadata) {
    let Some(rule_info) = engine.child("RuleInfo") else { return };
    for rule in rule_info.children_named("Rule") {
        let Some(id) = rule.attr("id") else {
            debug!("Rule without id, skipping");
            continue;
        };
        let mut meta = BTreeMap::new();
        parse_meta_groups(rule.child("MetaInfo"), &mut meta);
        rules.insert(id.to_string(), meta);
    }
}

pub(crate) fn parse_source_location(el: &XmlElement) -> SourceLocation {
    let line = parse_u32_or(el.attr("line"), 0);
    SourceLocation {
        path: el.attr("path").unwrap_or_default().to_string(),
        line,
        line_end: parse_u32_or(el.attr("lineEnd"), line),
        col_start: parse_u32_or(el.attr("colStart"), 0),
        col_end: parse_u32_or(el.attr("colEnd"), 0),
        context_id: el.attr("contextId").map(str::to_string),
        snippet: el.attr("snippet").map(str::to_string),
    }
}

fn parse_node(el: &XmlElement) -> Node {
    let mut node = Node {
        id: parse_id(el.attr("id")),
        location: el.child("SourceLocation").map(parse_source_location),
        secondary_location: el.child("SecondaryLocation").map(parse_source_location),
        details_only: parse_bool(el.attr("detailsOnly")),
        label: el.attr("label").map(str::to_string),
        ..Default::default()
    };

    if let Some(action) = el.child("Action") {
        node.action_type = action.attr("type").map(str::to_string);
        let text = action.text().trim().to_string();
        node.action = (!text.is_empty()).then_some(text);
    }

    if let Some(reason) = el.child("Reason") {
        for item in reason.elements() {
            match item.name() {
                "Rule" => {
                    if let Some(rule_id) = item.attr("ruleID") {
                        node.reason.rule_ids.push(rule_id.to_string());
                    }
                }
                "Trace" => node.reason.traces.push(ReasonTrace::Inline(parse_trace(item))),
                "TraceRef" => match parse_id(item.attr("id")) {
                    Some(id) => node.reason.traces.push(ReasonTrace::Ref(id)),
                    None => warn!("TraceRef without numeric id, skipping"),
                },
                "Internal" => node.reason.internal = true,
                _ => {}
            }
        }
    }

    if let Some(knowledge) = el.child("Knowledge") {
        for fact in knowledge.children_named("Fact") {
            let fact_type = fact.attr("type").unwrap_or_default();
            let value = fact.text().trim().to_string();
            if fact_type.eq_ignore_ascii_case("TaintFlags") {
                node.taint_flags.extend(
                    value.split(',').map(str::trim).filter(|f| !f.is_empty()).map(str::to_string),
                );
            } else if !fact_type.is_empty() {
                node.knowledge.entry(fact_type.to_string()).or_insert(value);
            }
        }
    }

    node
}

fn parse_entry(el: &XmlElement) -> Option<TraceEntry> {
    if let Some(node) = el.child("Node") {
        let is_default = parse_bool(node.attr("isDefault"));
        return Some(TraceEntry::Inline { node: Box::new(parse_node(node)), is_default });
    }
    if let Some(node_ref) = el.child("NodeRef") {
        return match parse_id(node_ref.attr("id")) {
            Some(id) => Some(TraceEntry::Ref(id)),
            None => {
                warn!("NodeRef without numeric id, skipping entry");
                None
            }
        };
    }
    None
}

/// Parse a `<Trace>` element (its `Primary/Entry` list).
pub(crate) fn parse_trace(el: &XmlElement) -> TraceDef {
    let entries = el
        .child("Primary")
        .map(|p| p.children_named("Entry").filter_map(parse_entry).collect())
        .unwrap_or_default();
    TraceDef { id: parse_id(el.attr("id")), entries }
}

fn parse_node_pool(section: &XmlElement, pool: &mut NodePool) {
    for el in section.children_named("Node") {
        match parse_id(el.attr("id")) {
            Some(id) => {
                pool.insert(id, parse_node(el));
            }
            None => warn!("Pooled node without numeric id, skipping"),
        }
    }
}

fn parse_trace_pool(section: &XmlElement, traces: &mut std::collections::HashMap<PoolId, TraceDef>) {
    for el in section.children_named("Trace") {
        let trace = parse_trace(el);
        match trace.id {
            Some(id) if id != 0 => {
                traces.insert(id, trace);
            }
            _ => warn!("Pooled trace missing or invalid id, skipping"),
        }
    }
}

fn parse_snippets(section: &XmlElement, doc: &mut FvdlDocument) {
    for el in section.children_named("Snippet") {
        let Some(id) = el.attr("id") else { continue };
        doc.snippets.insert(
            id.to_string(),
            Snippet {
                file: el.child_value("File"),
                start_line: parse_u32_or(el.child_text("StartLine").as_deref(), 0),
                end_line: parse_u32_or(el.child_text("EndLine").as_deref(), 0),
                text: el.child_text("Text").unwrap_or_default(),
            },
        );
    }
}

fn description_text(el: Option<&XmlElement>) -> String {
    el.map(|e| e.inner_markup()).unwrap_or_default()
}

fn parse_description(el: &XmlElement, doc: &mut FvdlDocument) {
    let Some(class_id) = el.attr("classID") else { return };
    doc.descriptions.entry(class_id.to_string()).or_insert_with(|| Description {
        abstract_text: description_text(el.child("Abstract")),
        explanation: description_text(el.child("Explanation")),
        recommendations: description_text(el.child("Recommendations")),
    });
}

fn parse_replacements(el: &XmlElement) -> ReplacementData {
    let mut data = ReplacementData::default();
    for def in el.elements() {
        let Some(key) = def.attr("key") else { continue };
        match def.name() {
            "Def" => {
                data.values.insert(
                    key.to_string(),
                    ReplacementDef {
                        value: def.attr("value").unwrap_or_default().to_string(),
                        location: def.child("SourceLocation").map(parse_source_location),
                    },
                );
            }
            "LocationDef" => {
                data.locations.insert(
                    key.to_string(),
                    LocationDef {
                        path: def.attr("path").unwrap_or_default().to_string(),
                        line: parse_u32_or(def.attr("line"), 0),
                        col_start: parse_u32_or(def.attr("colStart"), 0),
                        col_end: parse_u32_or(def.attr("colEnd"), 0),
                    },
                );
            }
            _ => {}
        }
    }
    data
}

fn field_part(field: &XmlElement, name: &str, attr: &str) -> String {
    field
        .attr(attr)
        .map(str::to_string)
        .or_else(|| field.child_text(name).map(|t| t.trim().to_string()))
        .unwrap_or_default()
}

fn parse_vulnerability(el: &XmlElement) -> RawVulnerability {
    let mut vuln = RawVulnerability::default();

    if let Some(class) = el.child("ClassInfo") {
        vuln.class_id = class.child_value("ClassID");
        vuln.kingdom = class.child_value("Kingdom");
        vuln.vuln_type = class.child_value("Type");
        vuln.subtype = class.child_value("Subtype");
        vuln.analyzer_name = class.child_value("AnalyzerName");
        vuln.default_severity = class.child_value("DefaultSeverity");
    }

    if let Some(instance) = el.child("InstanceInfo") {
        vuln.instance_id = instance.child_value("InstanceID");
        vuln.instance_severity = instance.child_value("InstanceSeverity");
        vuln.confidence = instance.child_value("Confidence");
        parse_meta_groups(instance.child("MetaInfo"), &mut vuln.instance_metadata);
    }

    if let Some(unified) = el.path(&["AnalysisInfo", "Unified"]) {
        if let Some(function) = unified.path(&["Context", "Function"]) {
            vuln.context_function = function.attr("name").map(str::to_string);
            vuln.context_class = function.attr("enclosingClass").map(str::to_string);
        }
        if let Some(defs) = unified.child("ReplacementDefinitions") {
            vuln.replacements = parse_replacements(defs);
        }
        vuln.traces = unified.children_named("Trace").map(parse_trace).collect();
    }

    for ext in el.children_named("ExternalID") {
        if let Some(name) = ext.attr("name") {
            let value = ext.attr("value").map(str::to_string).unwrap_or_else(|| ext.text().trim().to_string());
            vuln.external_ids.insert(name.to_string(), value);
        }
    }

    for aux in el.children_named("AuxiliaryData") {
        vuln.auxiliary.push(AuxiliaryData {
            content_type: aux.attr("contentType").unwrap_or_default().to_string(),
            fields: aux
                .children_named("AuxField")
                .map(|f| AuxField {
                    name: f.attr("name").unwrap_or_default().to_string(),
                    value: f.attr("value").unwrap_or_default().to_string(),
                    location: f.child("SourceLocation").map(parse_source_location),
                })
                .collect(),
        });
    }

    if let Some(entries) = el.child("ExternalEntries") {
        for entry in entries.children_named("Entry") {
            let fields = entry
                .child("Fields")
                .map(|fs| {
                    fs.children_named("Field")
                        .map(|f| ExternalField {
                            name: field_part(f, "Name", "name"),
                            value: field_part(f, "Value", "value"),
                            field_type: f.attr("type").map(str::to_string),
                            vuln_tag: f.attr("vulnTag").map(str::to_string),
                        })
                        .collect()
                })
                .unwrap_or_default();
            vuln.external_entries.push(ExternalEntry { url: entry.child_value("URL"), fields });
        }
    }

    vuln
}
