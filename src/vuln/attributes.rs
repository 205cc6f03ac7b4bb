use regex::Regex;

use crate::description::RenderContext;
use crate::trace::StackTraceElement;
use super::model::Vulnerability;

/// Attribute name that searches every searchable field at once.
pub const ALL_SEARCH_FIELDS: &str = "all_search_fields";

/// Free-text search over a composite value.
pub trait Searchable {
    fn contains(&self, needle: &str) -> bool;
    fn matches(&self, value: &str) -> bool;
    fn matches_pattern(&self, pattern: &Regex) -> bool;
}

/// Value of one filterable attribute.
#[derive(Clone, Copy)]
pub enum AttributeValue<'a> {
    Missing,
    Text(&'a str),
    Number(f64),
    Flag(bool),
    List(&'a [String]),
    Searchable(&'a dyn Searchable),
}

impl std::fmt::Debug for AttributeValue<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttributeValue::Missing => write!(f, "Missing"),
            AttributeValue::Text(t) => write!(f, "Text({:?})", t),
            AttributeValue::Number(n) => write!(f, "Number({})", n),
            AttributeValue::Flag(b) => write!(f, "Flag({})", b),
            AttributeValue::List(l) => write!(f, "List({:?})", l),
            AttributeValue::Searchable(_) => write!(f, "Searchable"),
        }
    }
}

impl<'a> AttributeValue<'a> {
    fn text(s: &'a str) -> Self {
        if s.is_empty() {
            AttributeValue::Missing
        } else {
            AttributeValue::Text(s)
        }
    }

    fn opt(s: Option<&'a str>) -> Self {
        s.map(Self::text).unwrap_or(AttributeValue::Missing)
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, AttributeValue::Missing)
    }

    /// Scalar rendered as text; `None` for missing, list and composite values.
    pub fn as_text(&self) -> Option<String> {
        match self {
            AttributeValue::Text(t) => Some(t.to_string()),
            AttributeValue::Number(n) => Some(n.to_string()),
            AttributeValue::Flag(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

impl Searchable for Vec<Vec<StackTraceElement>> {
    fn contains(&self, needle: &str) -> bool {
        walk(self, &mut |e| e.contains(needle))
    }

    fn matches(&self, value: &str) -> bool {
        walk(self, &mut |e| e.matches(value))
    }

    fn matches_pattern(&self, pattern: &Regex) -> bool {
        walk(self, &mut |e| e.matches_pattern(pattern))
    }
}

fn walk_element(el: &StackTraceElement, f: &mut dyn FnMut(&StackTraceElement) -> bool) -> bool {
    f(el) || el.inner_stack_trace.iter().any(|i| walk_element(i, f))
}

fn walk(traces: &[Vec<StackTraceElement>], f: &mut dyn FnMut(&StackTraceElement) -> bool) -> bool {
    traces.iter().flatten().any(|el| walk_element(el, f))
}

impl Vulnerability {
    fn search_fields(&self) -> impl Iterator<Item = &str> {
        [
            self.instance_id.as_str(),
            self.class_id.as_str(),
            self.kingdom.as_str(),
            self.category.as_str(),
            self.analyzer_name.as_str(),
            self.context_function.as_str(),
            self.context_class.as_str(),
            self.source_function(),
            self.sink_function(),
        ]
        .into_iter()
        .chain(self.files.iter().map(|f| f.name.as_str()))
        .chain(self.taint_flags.iter().map(String::as_str))
        .chain(self.knowledge.values().map(String::as_str))
        .filter(|s| !s.is_empty())
    }

    /// Look up a filter attribute by its internal (already aliased) name.
    pub fn attribute(&self, name: &str) -> AttributeValue<'_> {
        let name = name.trim().to_lowercase();
        match name.as_str() {
            ALL_SEARCH_FIELDS => AttributeValue::Searchable(self),
            "accuracy" => AttributeValue::Number(self.accuracy),
            "impact" => AttributeValue::Number(self.impact),
            "probability" => AttributeValue::Number(self.probability),
            "likelihood" => AttributeValue::Number(self.likelihood),
            "confidence" => AttributeValue::Number(self.confidence),
            "priority" => AttributeValue::opt(self.priority.map(|p| p.as_str())),
            "instanceseverity" | "severity" => AttributeValue::text(&self.instance_severity),
            "instanceid" => AttributeValue::text(&self.instance_id),
            "classid" => AttributeValue::text(&self.class_id),
            "category" | "mappedcategory" => AttributeValue::text(&self.category),
            "kingdom" => AttributeValue::text(&self.kingdom),
            "analyzer" => AttributeValue::text(&self.analyzer_name),
            "audience" => AttributeValue::text(&self.audience),
            "filetype" => AttributeValue::text(&self.file_type),
            "package" => AttributeValue::text(&self.package_name),
            "classname" => AttributeValue::text(&self.context_class),
            "filename" => AttributeValue::text(self.primary_file()),
            "shortfilename" => {
                AttributeValue::text(self.primary_file().rsplit('/').next().unwrap_or_default())
            }
            "linenumber" => match self.sink {
                Some(ref s) => AttributeValue::Number(f64::from(s.line)),
                None => AttributeValue::Missing,
            },
            "sourcefile" => AttributeValue::opt(self.source.as_ref().map(|s| s.filename.as_str())),
            "sourceline" => match self.source {
                Some(ref s) => AttributeValue::Number(f64::from(s.line)),
                None => AttributeValue::Missing,
            },
            "sinkfunction" => AttributeValue::text(self.sink_function()),
            "sourcefunction" => AttributeValue::text(self.source_function()),
            "codesnippet" => AttributeValue::opt(self.sink.as_ref().map(|s| s.code.as_str())),
            "taintflags" => AttributeValue::List(&self.taint_flags),
            "tracenode" => AttributeValue::Searchable(&self.stack_trace),
            "cwe" => AttributeValue::opt(
                self.knowledge
                    .iter()
                    .find(|(k, _)| k.to_lowercase().starts_with("externalid.cwe"))
                    .map(|(_, v)| v.as_str()),
            ),
            "requestheaders" => AttributeValue::opt(self.request.headers.as_deref()),
            "requestparameters" => AttributeValue::opt(self.request.parameters.as_deref()),
            "requestbody" => AttributeValue::opt(self.request.body.as_deref()),
            "requestmethod" => AttributeValue::opt(self.request.method.as_deref()),
            "requestcookies" => AttributeValue::opt(self.request.cookies.as_deref()),
            "requesthttpversion" => AttributeValue::opt(self.request.http_version.as_deref()),
            "attackpayload" => AttributeValue::opt(self.request.attack_payload.as_deref()),
            "attacktype" => AttributeValue::opt(self.request.attack_type.as_deref()),
            "response" => AttributeValue::opt(self.request.response.as_deref()),
            "trigger" => AttributeValue::opt(self.request.trigger.as_deref()),
            "issuestate" => AttributeValue::opt(self.audit.tags.get("analysis").map(String::as_str)),
            "audited" => AttributeValue::Flag(
                self.audit
                    .tags
                    .get("analysis")
                    .is_some_and(|v| !v.trim().is_empty() && !v.eq_ignore_ascii_case("Not Set")),
            ),
            "suppressed" => AttributeValue::Flag(self.audit.suppressed),
            "comment" => AttributeValue::List(&self.audit.comments),
            "commentuser" => AttributeValue::List(&self.audit.comment_users),
            other => match self.audit.tags.get(other) {
                Some(v) => AttributeValue::text(v),
                None => AttributeValue::opt(self.knowledge_value(other)),
            },
        }
    }
}

impl Searchable for Vulnerability {
    fn contains(&self, needle: &str) -> bool {
        if needle.is_empty() {
            return false;
        }
        let needle = needle.to_lowercase();
        self.search_fields().any(|f| f.to_lowercase().contains(&needle))
            || Searchable::contains(&self.stack_trace, &needle)
    }

    fn matches(&self, value: &str) -> bool {
        !value.is_empty()
            && (self.search_fields().any(|f| f.eq_ignore_ascii_case(value))
                || Searchable::matches(&self.stack_trace, value))
    }

    fn matches_pattern(&self, pattern: &Regex) -> bool {
        self.search_fields().any(|f| pattern.is_match(f))
            || Searchable::matches_pattern(&self.stack_trace, pattern)
    }
}

impl RenderContext for Vulnerability {
    fn has_variable(&self, name: &str) -> bool {
        self.knowledge.contains_key(name)
    }

    fn contains_text(&self, needle: &str) -> bool {
        Searchable::contains(self, needle)
    }
}
