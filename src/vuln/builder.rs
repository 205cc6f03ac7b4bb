use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use crate::description::DescriptionRenderer;
use crate::fvdl::{FvdlDocument, RawVulnerability, TraceEntry};
use crate::trace::{trace_size, LineCache, SourceProvider, StackTraceElement, TraceResolver};
use crate::utils::text::parse_f64_or;
use super::finalizer::{finalize, CategoryFallbacks};
use super::model::{SourceFile, Vulnerability};

/// Builds canonical findings from a parsed dataflow document.
///
/// Holds the per-run line cache, so building every finding of one archive
/// reads each source snapshot once.
pub struct VulnerabilityBuilder<'a> {
    doc: &'a FvdlDocument,
    lines: LineCache<'a>,
    fallbacks: CategoryFallbacks,
}

impl<'a> VulnerabilityBuilder<'a> {
    pub fn new(doc: &'a FvdlDocument, source: &'a dyn SourceProvider) -> Self {
        Self { doc, lines: LineCache::new(source), fallbacks: CategoryFallbacks::default() }
    }

    pub fn with_fallbacks(mut self, fallbacks: CategoryFallbacks) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    /// Build every finding in document order, dropping those without identity.
    pub fn build_all(&self) -> Vec<Vulnerability> {
        let vulns: Vec<Vulnerability> = self.doc.vulnerabilities.iter().filter_map(|raw| self.build(raw)).collect();
        info!(
            built = vulns.len(),
            dropped = self.doc.vulnerabilities.len() - vulns.len(),
            "Built vulnerabilities"
        );
        vulns
    }

    pub fn build(&self, raw: &RawVulnerability) -> Option<Vulnerability> {
        let (Some(instance_id), Some(class_id)) = (raw.instance_id.as_deref(), raw.class_id.as_deref()) else {
            warn!(
                instance_id = raw.instance_id.as_deref().unwrap_or("UNKNOWN"),
                "Skipping vulnerability missing identity fields"
            );
            return None;
        };

        let mut vuln = Vulnerability {
            instance_id: instance_id.to_string(),
            class_id: class_id.to_string(),
            kingdom: raw.kingdom.clone().unwrap_or_default(),
            vuln_type: raw.vuln_type.clone().unwrap_or_default(),
            sub_type: raw.subtype.clone().unwrap_or_default(),
            analyzer_name: raw.analyzer_name.clone().unwrap_or_default(),
            default_severity: raw.default_severity.clone().unwrap_or_default(),
            instance_severity: raw.instance_severity.clone().unwrap_or_default(),
            confidence: parse_f64_or(raw.confidence.as_deref(), 0.0),
            context_function: raw.context_function.clone().unwrap_or_default(),
            context_class: raw.context_class.clone().unwrap_or_default(),
            build_id: self.doc.build.build_id.clone().unwrap_or_default(),
            uuid: self.doc.build.uuid.clone().unwrap_or_default(),
            ..Default::default()
        };

        // Rule metadata first, instance overrides on top.
        let mut metadata = self.doc.rules.get(class_id).cloned().unwrap_or_default();
        for (name, value) in &raw.instance_metadata {
            debug!(instance_id, name = %name, "Instance metadata override");
            metadata.insert(name.clone(), value.clone());
        }
        vuln.knowledge.extend(metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        for (name, value) in &raw.external_ids {
            vuln.knowledge.insert(format!("externalID.{}", name), value.clone());
        }

        vuln.accuracy = parse_f64_or(metadata.get("Accuracy").map(String::as_str), 0.0);
        vuln.impact = parse_f64_or(metadata.get("Impact").map(String::as_str), 0.0);
        vuln.probability = parse_f64_or(metadata.get("Probability").map(String::as_str), 0.0);
        vuln.audience = match metadata.get("audience").filter(|a| !a.trim().is_empty()) {
            Some(a) => a.clone(),
            None => self.audience_from_rules(raw),
        };
        vuln.file_type = metadata.get("DefaultFile").cloned().unwrap_or_default();

        self.attach_traces(&mut vuln, raw);
        aggregate_from_traces(&mut vuln);
        apply_request_data(&mut vuln, raw);
        self.render_descriptions(&mut vuln, raw);
        finalize(&mut vuln, &self.fallbacks);
        Some(vuln)
    }

    fn attach_traces(&self, vuln: &mut Vulnerability, raw: &RawVulnerability) {
        let resolver = TraceResolver::new(self.doc, &self.lines);
        let traces: Vec<Vec<StackTraceElement>> = raw
            .traces
            .iter()
            .map(|t| resolver.resolve(t))
            .filter(|t| !t.is_empty())
            .collect();

        let (Some(first), Some(last)) = (traces.first(), traces.last()) else {
            return;
        };

        // Primary endpoints of the last trace lead the file list.
        let mut files: Vec<SourceFile> = Vec::new();
        for el in [last.first(), last.last()].into_iter().flatten() {
            self.add_file(&el.filename, &mut files);
        }
        for el in traces.iter().flatten() {
            self.add_file(&el.filename, &mut files);
            for inner in &el.inner_stack_trace {
                self.add_file(&inner.filename, &mut files);
            }
        }

        vuln.files = files;
        vuln.first_stack_trace = first.clone();
        vuln.source = first.first().cloned();
        vuln.sink = first.last().cloned();
        vuln.last_stack_trace_element = last.last().cloned();
        vuln.longest_stack_trace = traces
            .iter()
            .enumerate()
            .max_by_key(|(i, t)| (trace_size(t), std::cmp::Reverse(*i)))
            .map(|(_, t)| t.clone())
            .unwrap_or_default();
        vuln.stack_trace = traces;
    }

    fn add_file(&self, name: &str, files: &mut Vec<SourceFile>) {
        if name.is_empty() || files.iter().any(|f| f.name == name) {
            return;
        }
        let Some(content) = self.lines.content(name) else {
            return;
        };
        files.push(SourceFile {
            name: name.to_string(),
            end_line: self.lines.lines(name).len() as u32,
            content,
            segment: false,
            start_line: 1,
        });
    }

    /// Intersection of the audience sets of every rule the finding touches.
    fn audience_from_rules(&self, raw: &RawVulnerability) -> String {
        let mut rule_ids: BTreeSet<&str> = BTreeSet::new();
        if let Some(class_id) = raw.class_id.as_deref() {
            rule_ids.insert(class_id);
        }
        for entry in raw.traces.iter().flat_map(|t| &t.entries) {
            let node = match entry {
                TraceEntry::Inline { node, .. } => Some(&**node),
                TraceEntry::Ref(id) => self.doc.nodes.get(*id),
            };
            if let Some(node) = node {
                rule_ids.extend(node.reason.rule_ids.iter().map(String::as_str));
            }
        }

        let mut intersection: Option<BTreeSet<String>> = None;
        for rule_id in rule_ids {
            let Some(audience) = self.doc.rules.get(rule_id).and_then(|m| m.get("audience")) else {
                continue;
            };
            if audience.trim().is_empty() {
                continue;
            }
            let current: BTreeSet<String> = audience.split(',').map(|a| a.trim().to_string()).collect();
            let next = match intersection {
                None => current,
                Some(prev) => prev.intersection(&current).cloned().collect(),
            };
            let empty = next.is_empty();
            intersection = Some(next);
            if empty {
                break;
            }
        }
        intersection
            .map(|set| set.into_iter().collect::<Vec<_>>().join(","))
            .unwrap_or_default()
    }

    fn render_descriptions(&self, vuln: &mut Vulnerability, raw: &RawVulnerability) {
        let Some(desc) = self.doc.descriptions.get(&vuln.class_id) else {
            debug!(class_id = %vuln.class_id, "No description for rule");
            return;
        };
        let (short, explanation) = {
            let renderer = DescriptionRenderer::new(&*vuln, &raw.replacements);
            (renderer.render_plain(&desc.abstract_text), renderer.render_plain(&desc.explanation))
        };
        vuln.short_description = short;
        vuln.explanation = explanation;
    }

    pub fn line_cache(&self) -> &LineCache<'a> {
        &self.lines
    }
}

/// Taint flags and knowledge of the top level and first inner level of
/// every trace, merged into the finding. Existing keys keep their value.
fn aggregate_from_traces(vuln: &mut Vulnerability) {
    let mut flags: BTreeSet<String> = BTreeSet::new();
    let mut knowledge: BTreeMap<String, String> = BTreeMap::new();
    for el in vuln.stack_trace.iter().flatten() {
        for node in std::iter::once(el).chain(el.inner_stack_trace.iter()) {
            flags.extend(node.taint_flag_list().map(str::to_string));
            for (k, v) in &node.knowledge {
                knowledge.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }
    }
    vuln.taint_flags = flags.into_iter().collect();
    for (k, v) in knowledge {
        vuln.knowledge.entry(k).or_insert(v);
    }
}

/// Request fields from auxiliary data, then from request-bearing external
/// entries, which take precedence.
fn apply_request_data(vuln: &mut Vulnerability, raw: &RawVulnerability) {
    for aux in &raw.auxiliary {
        let content_type = aux.content_type.to_ascii_lowercase();
        let value = match content_type.as_str() {
            "requestheaders" | "requestparameters" => Some(
                aux.fields
                    .iter()
                    .map(|f| f.value.as_str())
                    .filter(|v| *v != aux.content_type)
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            _ => aux.fields.iter().find(|f| f.name == "value").map(|f| f.value.clone()),
        };
        if let (Some(slot), Some(value)) = (vuln.request.slot_mut(&content_type), value) {
            *slot = Some(value);
        }
    }

    for entry in &raw.external_entries {
        let is_request = entry
            .url
            .as_deref()
            .is_some_and(|u| u.to_lowercase().contains("request"));
        if !is_request {
            continue;
        }
        for field in &entry.fields {
            if let Some(slot) = vuln.request.slot_mut(&field.name) {
                *slot = Some(field.value.clone());
            }
        }
    }
}
