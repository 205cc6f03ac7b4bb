use std::collections::{BTreeMap, HashMap};

/// Numeric id as written in the node and trace pools.
pub type PoolId = u64;

/// Arena index into [`NodePool::nodes`].
pub type NodeIndex = usize;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceLocation {
    pub path: String,
    pub line: u32,
    pub line_end: u32,
    pub col_start: u32,
    pub col_end: u32,
    pub context_id: Option<String>,
    /// Snippet table key, resolved on demand.
    pub snippet: Option<String>,
}

/// Nested trace reached through a node's reason.
#[derive(Debug, Clone, PartialEq)]
pub enum ReasonTrace {
    Inline(TraceDef),
    Ref(PoolId),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeReason {
    pub rule_ids: Vec<String>,
    pub traces: Vec<ReasonTrace>,
    pub internal: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Node {
    pub id: Option<PoolId>,
    pub location: Option<SourceLocation>,
    pub secondary_location: Option<SourceLocation>,
    pub action_type: Option<String>,
    pub action: Option<String>,
    pub reason: NodeReason,
    pub taint_flags: Vec<String>,
    pub knowledge: BTreeMap<String, String>,
    pub details_only: bool,
    pub label: Option<String>,
}

impl Node {
    pub fn file_path(&self) -> &str {
        self.location.as_ref().map(|l| l.path.as_str()).unwrap_or("")
    }

    pub fn line(&self) -> u32 {
        self.location.as_ref().map(|l| l.line).unwrap_or(0)
    }

    /// First rule referenced by the node's reason.
    pub fn associated_rule_id(&self) -> Option<&str> {
        self.reason.rule_ids.first().map(String::as_str)
    }

    pub fn reason_text(&self) -> String {
        self.reason
            .rule_ids
            .iter()
            .map(|r| format!("Rule: {}", r))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One trace entry: a node written in place or a reference into the pool.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEntry {
    Inline { node: Box<Node>, is_default: bool },
    Ref(PoolId),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraceDef {
    pub id: Option<PoolId>,
    pub entries: Vec<TraceEntry>,
}

/// Shared node pool. Traces reference nodes by pool id; the pool maps ids to
/// arena slots.
#[derive(Debug, Clone, Default)]
pub struct NodePool {
    nodes: Vec<Node>,
    index: HashMap<PoolId, NodeIndex>,
}

impl NodePool {
    pub fn insert(&mut self, id: PoolId, node: Node) -> NodeIndex {
        let idx = self.nodes.len();
        self.nodes.push(node);
        self.index.insert(id, idx);
        idx
    }

    pub fn lookup(&self, id: PoolId) -> Option<NodeIndex> {
        self.index.get(&id).copied()
    }

    pub fn get(&self, id: PoolId) -> Option<&Node> {
        self.lookup(id).map(|idx| &self.nodes[idx])
    }

    pub fn node(&self, idx: NodeIndex) -> Option<&Node> {
        self.nodes.get(idx)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Rule id to metadata group (name to trimmed value).
pub type RuleMetadata = HashMap<String, BTreeMap<String, String>>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snippet {
    pub file: Option<String>,
    pub start_line: u32,
    pub end_line: u32,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Description {
    pub abstract_text: String,
    pub explanation: String,
    pub recommendations: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildInfo {
    pub uuid: Option<String>,
    pub build_id: Option<String>,
    pub source_base_path: Option<String>,
    pub number_files: Option<u32>,
    pub scan_time: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplacementDef {
    pub value: String,
    pub location: Option<SourceLocation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocationDef {
    pub path: String,
    pub line: u32,
    pub col_start: u32,
    pub col_end: u32,
}

/// Per-finding substitution table for description templates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplacementData {
    pub values: BTreeMap<String, ReplacementDef>,
    pub locations: BTreeMap<String, LocationDef>,
}

impl ReplacementData {
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key) || self.locations.contains_key(key)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuxField {
    pub name: String,
    pub value: String,
    pub location: Option<SourceLocation>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuxiliaryData {
    pub content_type: String,
    pub fields: Vec<AuxField>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExternalField {
    pub name: String,
    pub value: String,
    pub field_type: Option<String>,
    pub vuln_tag: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExternalEntry {
    pub url: Option<String>,
    pub fields: Vec<ExternalField>,
}

/// A finding as written in the document, before enrichment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawVulnerability {
    pub class_id: Option<String>,
    pub kingdom: Option<String>,
    pub vuln_type: Option<String>,
    pub subtype: Option<String>,
    pub analyzer_name: Option<String>,
    pub default_severity: Option<String>,
    pub instance_id: Option<String>,
    pub instance_severity: Option<String>,
    pub confidence: Option<String>,
    pub instance_metadata: BTreeMap<String, String>,
    pub context_function: Option<String>,
    pub context_class: Option<String>,
    pub replacements: ReplacementData,
    pub traces: Vec<TraceDef>,
    pub external_ids: BTreeMap<String, String>,
    pub auxiliary: Vec<AuxiliaryData>,
    pub external_entries: Vec<ExternalEntry>,
}

/// The typed dataflow document.
#[derive(Debug, Clone, Default)]
pub struct FvdlDocument {
    pub build: BuildInfo,
    pub rules: RuleMetadata,
    pub nodes: NodePool,
    pub traces: HashMap<PoolId, TraceDef>,
    pub snippets: HashMap<String, Snippet>,
    pub descriptions: HashMap<String, Description>,
    pub vulnerabilities: Vec<RawVulnerability>,
}
