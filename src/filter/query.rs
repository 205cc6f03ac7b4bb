use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use tracing::trace;

use crate::errors::AuditError;
use crate::vuln::{Vulnerability, ALL_SEARCH_FIELDS};
use super::attributes::attribute_name;
use super::comparer::Comparer;

static TOKENIZER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""(?:\\.|[^"])*"|(?i:\bAND\b|\bOR\b)|!?\[[^\]]+\]:(?:"(?:\\.|[^"])*"|\S*)|\S+"#)
        .expect("tokenizer pattern is valid")
});

static MODIFIER_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^!?\s*(\[[^\]]+\]|\w+):").expect("modifier pattern is valid")
});

static LEGACY_MODIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([^\s\\:]+|\[[^\]]+?\]):").expect("legacy modifier pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    And,
    Or,
}

impl Operator {
    fn precedence(self) -> u8 {
        match self {
            Operator::And => 2,
            Operator::Or => 1,
        }
    }
}

/// One `attribute comparer` leaf.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub attribute: String,
    pub comparer: Comparer,
}

impl SearchQuery {
    pub fn new(attribute: impl Into<String>, comparer: Comparer) -> Self {
        Self { attribute: attribute.into(), comparer }
    }

    pub fn matches(&self, vuln: &Vulnerability) -> bool {
        self.comparer.matches(&vuln.attribute(&self.attribute))
    }
}

#[derive(Debug, Clone)]
pub enum QueryNode {
    Leaf(SearchQuery),
    Op(Operator, Box<QueryNode>, Box<QueryNode>),
}

impl QueryNode {
    fn matches(&self, vuln: &Vulnerability) -> bool {
        match self {
            QueryNode::Leaf(q) => q.matches(vuln),
            QueryNode::Op(Operator::And, l, r) => l.matches(vuln) && r.matches(vuln),
            QueryNode::Op(Operator::Or, l, r) => l.matches(vuln) || r.matches(vuln),
        }
    }
}

impl fmt::Display for QueryNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryNode::Leaf(q) => write!(f, "{}:{:?}", q.attribute, q.comparer),
            QueryNode::Op(op, l, r) => {
                let op = if *op == Operator::And { "AND" } else { "OR" };
                write!(f, "({} {} {})", l, op, r)
            }
        }
    }
}

/// Parsed filter query. A tree without a root never matches.
#[derive(Debug, Clone, Default)]
pub struct SearchTree {
    root: Option<QueryNode>,
}

#[derive(Debug)]
enum Token {
    Op(Operator),
    Term(String),
}

fn tokenize(query: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current: Option<String> = None;
    for m in TOKENIZER.find_iter(query) {
        let word = m.as_str();
        let op = if word.eq_ignore_ascii_case("AND") {
            Some(Operator::And)
        } else if word.eq_ignore_ascii_case("OR") {
            Some(Operator::Or)
        } else {
            None
        };
        match op {
            Some(op) => {
                if let Some(term) = current.take() {
                    tokens.push(Token::Term(term));
                }
                tokens.push(Token::Op(op));
            }
            None => {
                if let (Some(term), false) = (current.as_mut(), MODIFIER_START.is_match(word)) {
                    term.push(' ');
                    term.push_str(word);
                    continue;
                }
                if let Some(term) = current.replace(word.to_string()) {
                    tokens.push(Token::Term(term));
                }
            }
        }
    }
    if let Some(term) = current {
        tokens.push(Token::Term(term));
    }
    tokens
}

/// Byte offset of the first `:` outside quotes and not preceded by `\`.
fn separator(term: &str) -> Option<usize> {
    let mut in_quotes = false;
    let mut escaped = false;
    for (idx, c) in term.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => in_quotes = !in_quotes,
            ':' if !in_quotes => return Some(idx),
            _ => {}
        }
    }
    None
}

fn confidence_bound(value: &str, lower: bool) -> Result<Comparer, AuditError> {
    let v = value
        .trim()
        .parse::<f64>()
        .map_err(|_| AuditError::parse(format!("Invalid confidence value '{}'", value.trim())))?;
    let (lower, upper) = if lower { (v, 5.0) } else { (0.0, v) };
    Ok(Comparer::Range { lower, upper, lower_inclusive: true, upper_inclusive: true })
}

fn parse_term(term: &str) -> Result<SearchQuery, AuditError> {
    let Some(idx) = separator(term) else {
        return Ok(SearchQuery::new(ALL_SEARCH_FIELDS, Comparer::parse(term)?));
    };
    let (modifier, value) = (term[..idx].trim(), &term[idx + 1..]);
    let negated = modifier.starts_with('!');
    let attribute = attribute_name(modifier);

    let query = match attribute.as_str() {
        "maxconf" => SearchQuery::new("confidence", confidence_bound(value, false)?),
        "minconf" => SearchQuery::new("confidence", confidence_bound(value, true)?),
        _ => SearchQuery::new(attribute, Comparer::parse(value)?),
    };
    Ok(if negated {
        SearchQuery::new(query.attribute, query.comparer.negate())
    } else {
        query
    })
}

/// Shunting-yard step: reduce while the stacked operator binds at least as
/// tightly, then stack `op`.
fn push_op(op: Operator, output: &mut Vec<QueryNode>, ops: &mut Vec<Operator>) -> Result<(), AuditError> {
    while let Some(&top) = ops.last() {
        if top.precedence() < op.precedence() {
            break;
        }
        ops.pop();
        reduce(output, top)?;
    }
    ops.push(op);
    Ok(())
}

fn reduce(output: &mut Vec<QueryNode>, op: Operator) -> Result<(), AuditError> {
    let right = output.pop();
    let left = output.pop();
    match (left, right) {
        (Some(l), Some(r)) => {
            output.push(QueryNode::Op(op, Box::new(l), Box::new(r)));
            Ok(())
        }
        _ => Err(AuditError::parse("Operator is missing an operand")),
    }
}

impl SearchTree {
    pub fn never() -> Self {
        Self { root: None }
    }

    pub fn from_node(root: QueryNode) -> Self {
        Self { root: Some(root) }
    }

    pub fn root(&self) -> Option<&QueryNode> {
        self.root.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn matches(&self, vuln: &Vulnerability) -> bool {
        self.root.as_ref().is_some_and(|r| r.matches(vuln))
    }

    /// Parse the filter query syntax used by filter templates.
    ///
    /// AND binds tighter than OR, both left-associative, and adjacent terms
    /// are joined by an implicit AND.
    pub fn parse(query: &str) -> Result<Self, AuditError> {
        if query.trim().is_empty() {
            return Ok(Self::never());
        }

        let mut output: Vec<QueryNode> = Vec::new();
        let mut ops: Vec<Operator> = Vec::new();
        let mut expect_operand = true;

        for token in tokenize(query) {
            match token {
                Token::Term(term) => {
                    if !expect_operand {
                        push_op(Operator::And, &mut output, &mut ops)?;
                    }
                    output.push(QueryNode::Leaf(parse_term(&term)?));
                    expect_operand = false;
                }
                Token::Op(op) => {
                    if expect_operand {
                        return Err(AuditError::parse(format!("Unexpected operator in query '{}'", query)));
                    }
                    push_op(op, &mut output, &mut ops)?;
                    expect_operand = true;
                }
            }
        }
        if expect_operand {
            return Err(AuditError::parse(format!("Query '{}' ends with an operator", query)));
        }
        while let Some(op) = ops.pop() {
            reduce(&mut output, op)?;
        }

        let root = output.pop();
        if !output.is_empty() {
            return Err(AuditError::parse(format!("Malformed query '{}'", query)));
        }
        if let Some(ref r) = root {
            trace!(query, tree = %r, "Parsed filter query");
        }
        Ok(Self { root })
    }

    /// Parse the older `modifier:value modifier:value` syntax. Values for the
    /// same modifier are alternatives; distinct modifiers are ANDed.
    pub fn parse_legacy(query: &str) -> Result<Self, AuditError> {
        if query.trim().is_empty() {
            return Ok(Self::never());
        }

        let mut groups: Vec<(String, Vec<String>)> = Vec::new();
        let mut add = |modifier: String, value: &str| {
            let value = value.trim();
            if value.is_empty() {
                return;
            }
            match groups.iter_mut().find(|(m, _)| *m == modifier) {
                Some((_, values)) => values.push(value.to_string()),
                None => groups.push((modifier, vec![value.to_string()])),
            }
        };

        let found: Vec<_> = LEGACY_MODIFIER.find_iter(query).collect();
        match found.first() {
            None => add(ALL_SEARCH_FIELDS.to_string(), query),
            Some(first) => add(ALL_SEARCH_FIELDS.to_string(), &query[..first.start()]),
        }
        for (i, m) in found.iter().enumerate() {
            let modifier = m.as_str().trim_end_matches(':');
            let end = found.get(i + 1).map(|n| n.start()).unwrap_or(query.len());
            add(attribute_name(modifier), &query[m.end()..end]);
        }

        let mut root: Option<QueryNode> = None;
        for (attribute, values) in groups {
            let comparer = if values.len() == 1 {
                Comparer::parse(&values[0])?
            } else {
                Comparer::any_of(values.iter().map(|v| Comparer::parse(v)).collect::<Result<_, _>>()?)
            };
            let leaf = QueryNode::Leaf(SearchQuery::new(attribute, comparer));
            root = Some(match root {
                None => leaf,
                Some(prev) => QueryNode::Op(Operator::And, Box::new(prev), Box::new(leaf)),
            });
        }
        Ok(Self { root })
    }
}
