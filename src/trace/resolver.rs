use std::collections::HashSet;

use tracing::{debug, trace, warn};

use crate::fvdl::{FvdlDocument, Node, PoolId, ReasonTrace, TraceDef, TraceEntry};
use super::element::StackTraceElement;
use super::line_cache::LineCache;

/// Nesting depth past which inner traces are silently cut off.
pub const MAX_TRACE_DEPTH: usize = 50;

const FRAGMENT_BEFORE: u32 = 5;
const FRAGMENT_AFTER: u32 = 2;

/// Turns pooled trace definitions into owned, nested element lists.
pub struct TraceResolver<'a> {
    doc: &'a FvdlDocument,
    lines: &'a LineCache<'a>,
}

impl<'a> TraceResolver<'a> {
    pub fn new(doc: &'a FvdlDocument, lines: &'a LineCache<'a>) -> Self {
        Self { doc, lines }
    }

    /// Resolve one trace to its root-level elements in source order.
    ///
    /// Trace ids already being resolved further up the stack are dead ends,
    /// so cyclic reference graphs terminate and keep every sibling resolved
    /// before the cycle was hit.
    pub fn resolve(&self, trace: &TraceDef) -> Vec<StackTraceElement> {
        let mut visiting = HashSet::new();
        self.resolve_trace(trace, 0, &mut visiting)
    }

    fn resolve_trace(
        &self,
        trace: &TraceDef,
        depth: usize,
        visiting: &mut HashSet<PoolId>,
    ) -> Vec<StackTraceElement> {
        if let Some(id) = trace.id {
            if !visiting.insert(id) {
                debug!(trace_id = id, "Cycle detected, skipping trace");
                return Vec::new();
            }
        }
        let elements = self.resolve_entries(&trace.entries, depth, visiting);
        if let Some(id) = trace.id {
            visiting.remove(&id);
        }
        elements
    }

    fn resolve_entries(
        &self,
        entries: &[TraceEntry],
        depth: usize,
        visiting: &mut HashSet<PoolId>,
    ) -> Vec<StackTraceElement> {
        entries
            .iter()
            .filter_map(|entry| self.build_element(entry, depth, visiting))
            .collect()
    }

    fn build_element(
        &self,
        entry: &TraceEntry,
        depth: usize,
        visiting: &mut HashSet<PoolId>,
    ) -> Option<StackTraceElement> {
        if depth > MAX_TRACE_DEPTH {
            trace!(depth, "Trace depth limit reached");
            return None;
        }

        let (node, entry_default): (&Node, bool) = match entry {
            TraceEntry::Inline { node, is_default } => (node.as_ref(), *is_default),
            TraceEntry::Ref(id) => match self.doc.nodes.get(*id) {
                Some(node) => (node, false),
                None => {
                    warn!(node_id = id, depth, "Could not find node in pool, skipping entry");
                    return None;
                }
            },
        };

        let mut element = self.materialize(node);
        element.is_default |= entry_default;

        for reason_trace in &node.reason.traces {
            match reason_trace {
                ReasonTrace::Inline(nested) => {
                    let inner = self.resolve_entries(&nested.entries, depth + 1, visiting);
                    element.inner_stack_trace.extend(inner);
                }
                ReasonTrace::Ref(id) => {
                    if visiting.contains(id) {
                        debug!(trace_id = id, "Cycle detected in reason trace");
                        continue;
                    }
                    let Some(referenced) = self.doc.traces.get(id) else {
                        warn!(trace_id = id, "Referenced trace not found in pool");
                        continue;
                    };
                    visiting.insert(*id);
                    let inner = self.resolve_entries(&referenced.entries, depth + 1, visiting);
                    visiting.remove(id);
                    element.inner_stack_trace.extend(inner);
                }
            }
        }

        Some(element)
    }

    fn materialize(&self, node: &Node) -> StackTraceElement {
        let filename = node.file_path().to_string();
        let line = node.line();

        let mut code = self.lines.line(&filename, line);
        if code.is_empty() {
            code = self.snippet_line(node).unwrap_or_default();
        }

        StackTraceElement {
            fragment: self.lines.fragment(&filename, line, FRAGMENT_BEFORE, FRAGMENT_AFTER),
            filename,
            line,
            code,
            node_type: node.action_type.clone().unwrap_or_default(),
            additional_info: node.action.clone().unwrap_or_default(),
            taint_flags: node.taint_flags.join(", "),
            is_default: node.details_only,
            reason: node.reason_text(),
            knowledge: node.knowledge.clone(),
            inner_stack_trace: Vec::new(),
        }
    }

    /// Source line taken from the node's snippet when the file itself is not
    /// in the archive.
    fn snippet_line(&self, node: &Node) -> Option<String> {
        let location = node.location.as_ref()?;
        let snippet = self.doc.snippets.get(location.snippet.as_deref()?)?;
        let offset = location.line.checked_sub(snippet.start_line)?;
        snippet.text.lines().nth(offset as usize).map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::fvdl::{parse_fvdl, NodeReason, SourceLocation};

    fn node(path: &str, line: u32) -> Node {
        Node {
            location: Some(SourceLocation { path: path.into(), line, line_end: line, ..Default::default() }),
            action_type: Some("InCall".into()),
            ..Default::default()
        }
    }

    fn sources() -> HashMap<String, String> {
        HashMap::from([("A.java".to_string(), "a1\na2\na3\na4\n".to_string())])
    }

    #[test]
    fn test_resolves_refs_and_inline_nodes_in_order() {
        let mut doc = FvdlDocument::default();
        doc.nodes.insert(1, node("A.java", 2));
        let trace = TraceDef {
            id: None,
            entries: vec![
                TraceEntry::Ref(1),
                TraceEntry::Ref(99),
                TraceEntry::Inline { node: Box::new(node("A.java", 4)), is_default: true },
            ],
        };
        let src = sources();
        let cache = LineCache::new(&src);
        let resolved = TraceResolver::new(&doc, &cache).resolve(&trace);

        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].code, "a2");
        assert_eq!(resolved[1].code, "a4");
        assert!(resolved[1].is_default);
        assert!(!resolved[0].is_default);
    }

    #[test]
    fn test_reference_cycle_terminates_and_keeps_siblings() {
        // Node 1's reason points at trace 10, whose only entry is node 1 again.
        let mut doc = FvdlDocument::default();
        let mut looping = node("A.java", 1);
        looping.reason = NodeReason { traces: vec![ReasonTrace::Ref(10)], ..Default::default() };
        doc.nodes.insert(1, looping);
        doc.nodes.insert(2, node("A.java", 3));
        doc.traces.insert(10, TraceDef { id: Some(10), entries: vec![TraceEntry::Ref(1), TraceEntry::Ref(2)] });

        let root = TraceDef { id: Some(10), entries: vec![TraceEntry::Ref(1), TraceEntry::Ref(2)] };
        let src = sources();
        let cache = LineCache::new(&src);
        let resolved = TraceResolver::new(&doc, &cache).resolve(&root);

        assert_eq!(resolved.len(), 2);
        assert!(resolved[0].inner_stack_trace.is_empty());
        assert_eq!(resolved[1].code, "a3");
    }

    #[test]
    fn test_cycle_through_pool_unwinds_once() {
        let mut doc = FvdlDocument::default();
        let mut looping = node("A.java", 1);
        looping.reason = NodeReason { traces: vec![ReasonTrace::Ref(10)], ..Default::default() };
        doc.nodes.insert(1, looping);
        doc.traces.insert(10, TraceDef { id: Some(10), entries: vec![TraceEntry::Ref(1)] });

        let root = TraceDef { id: None, entries: vec![TraceEntry::Ref(1)] };
        let src = sources();
        let cache = LineCache::new(&src);
        let resolved = TraceResolver::new(&doc, &cache).resolve(&root);

        // root node -> trace 10 -> node 1 again, whose own ref to 10 is a dead end
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].inner_stack_trace.len(), 1);
        assert!(resolved[0].inner_stack_trace[0].inner_stack_trace.is_empty());
    }

    #[test]
    fn test_inline_nesting_is_depth_limited() {
        // A chain of inline reason traces deeper than the cap.
        let mut current = node("A.java", 1);
        for _ in 0..(MAX_TRACE_DEPTH + 10) {
            let mut parent = node("A.java", 1);
            parent.reason.traces.push(ReasonTrace::Inline(TraceDef {
                id: None,
                entries: vec![TraceEntry::Inline { node: Box::new(current), is_default: false }],
            }));
            current = parent;
        }
        let doc = FvdlDocument::default();
        let root = TraceDef { id: None, entries: vec![TraceEntry::Inline { node: Box::new(current), is_default: false }] };
        let src = sources();
        let cache = LineCache::new(&src);
        let resolved = TraceResolver::new(&doc, &cache).resolve(&root);

        assert_eq!(resolved[0].node_count(), MAX_TRACE_DEPTH + 1);
    }

    #[test]
    fn test_snippet_fallback_when_source_missing() {
        let xml = br#"<FVDL>
          <UnifiedNodePool><Node id="1"><SourceLocation path="Gone.java" line="11" snippet="S"/></Node></UnifiedNodePool>
          <Snippets><Snippet id="S"><StartLine>10</StartLine><EndLine>12</EndLine><Text>ten
eleven
twelve</Text></Snippet></Snippets>
        </FVDL>"#;
        let doc = parse_fvdl(xml).unwrap();
        let src = HashMap::new();
        let cache = LineCache::new(&src);
        let resolved = TraceResolver::new(&doc, &cache)
            .resolve(&TraceDef { id: None, entries: vec![TraceEntry::Ref(1)] });
        assert_eq!(resolved[0].code, "eleven");
    }
}
