/// Filter modifier aliases, keyed by the cleaned (lower-cased, brackets
/// stripped) modifier as written in a query.
const ALIASES: &[(&str, &str)] = &[
    ("accuracy", "accuracy"),
    ("analysis", "issuestate"),
    ("analysis type", "analysistype"),
    ("analyzer", "analyzer"),
    ("attack payload", "attackpayload"),
    ("attack type", "attacktype"),
    ("audience", "audience"),
    ("audited", "audited"),
    ("body", "requestbody"),
    ("bug", "bugid"),
    ("cat", "category"),
    ("category", "category"),
    ("class", "classname"),
    ("codesnippet", "codesnippet"),
    ("comment", "comment"),
    ("comments", "comment"),
    ("commentuser", "commentuser"),
    ("con", "confidence"),
    ("confidence", "confidence"),
    ("cookies", "requestcookies"),
    ("correlated", "correlated"),
    ("cwe", "cwe"),
    ("engine priority", "enginepriority"),
    ("file", "filename"),
    ("filetype", "filetype"),
    ("fortify priority order", "priority"),
    ("headers", "requestheaders"),
    ("historyuser", "historyuser"),
    ("http version", "requesthttpversion"),
    ("impact", "impact"),
    ("instance id", "instanceid"),
    ("issue age", "issueage"),
    ("issue state", "issuestate"),
    ("issue status", "issuestatus"),
    ("kingdom", "kingdom"),
    ("likelihood", "likelihood"),
    ("line", "linenumber"),
    ("manual", "manual"),
    ("mapped category", "mappedcategory"),
    ("method", "requestmethod"),
    ("package", "package"),
    ("parameters", "requestparameters"),
    ("primaryrule", "classid"),
    ("probability", "probability"),
    ("remediation effort", "remediation"),
    ("request id", "requestid"),
    ("response", "response"),
    ("rule", "classid"),
    ("ruleid", "classid"),
    ("secondary requests", "secondaryrequests"),
    ("sev", "instanceseverity"),
    ("severity", "instanceseverity"),
    ("shortfilename", "shortfilename"),
    ("sink", "sinkfunction"),
    ("sink function", "sinkfunction"),
    ("source", "sourcefunction"),
    ("source function", "sourcefunction"),
    ("source context", "sourcecontext"),
    ("sourcefile", "sourcefile"),
    ("sourceline", "sourceline"),
    ("status", "issuestatus"),
    ("suppressed", "suppressed"),
    ("taint", "taintflags"),
    ("taint flags", "taintflags"),
    ("trace", "tracenode"),
    ("tracenode", "tracenode"),
    ("tracenodeallpaths", "tracenode"),
    ("trigger", "trigger"),
    ("url", "url"),
    ("user", "user"),
];

/// Strip negation and brackets from a modifier and lower-case it.
pub fn clean_modifier(modifier: &str) -> String {
    let m = modifier.trim();
    let m = m.strip_prefix('!').unwrap_or(m).trim();
    let m = match m.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        Some(inner) => inner,
        None => m,
    };
    m.trim().to_lowercase()
}

/// Internal attribute name for a query modifier. Unknown modifiers map to
/// themselves, so tag names such as `[PCI 4.0]` resolve against audit tags.
pub fn attribute_name(modifier: &str) -> String {
    let cleaned = clean_modifier(modifier);
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == cleaned)
        .map(|(_, target)| target.to_string())
        .unwrap_or(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_aliases() {
        assert_eq!(attribute_name("sev"), "instanceseverity");
        assert_eq!(attribute_name("RULE"), "classid");
        assert_eq!(attribute_name("[taint flags]"), "taintflags");
        assert_eq!(attribute_name("[Fortify Priority Order]"), "priority");
        assert_eq!(attribute_name("file"), "filename");
        assert_eq!(attribute_name("cat"), "category");
        assert_eq!(attribute_name("analysis"), "issuestate");
        assert_eq!(attribute_name("[Issue Status]"), "issuestatus");
    }

    #[test]
    fn test_unknown_maps_to_itself() {
        assert_eq!(attribute_name("[PCI 4.0]"), "pci 4.0");
        assert_eq!(attribute_name("!aa_prediction"), "aa_prediction");
    }

    #[test]
    fn test_clean_modifier() {
        assert_eq!(clean_modifier(" ![Analysis Type] "), "analysis type");
        assert_eq!(clean_modifier("[unterminated"), "[unterminated");
    }
}
