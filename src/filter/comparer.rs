use regex::{Regex, RegexBuilder};

use crate::errors::AuditError;
use crate::vuln::AttributeValue;

/// Search term meaning "attribute has no value".
pub const NONE_TERM: &str = "<none>";

/// How a single query value is compared against an attribute.
#[derive(Debug, Clone)]
pub enum Comparer {
    /// Case-insensitive substring.
    Contains(String),
    /// Case-insensitive equality.
    Exact(String),
    /// Matches missing or blank attributes.
    Absent,
    Range {
        lower: f64,
        upper: f64,
        lower_inclusive: bool,
        upper_inclusive: bool,
    },
    Regex(Regex),
    Not(Box<Comparer>),
    /// Legacy multi-value group: every negation must hold and, if any
    /// positive comparers exist, at least one of them must hold.
    Any {
        negations: Vec<Comparer>,
        positives: Vec<Comparer>,
    },
}

fn unescape(s: &str) -> String {
    s.replace("\\\"", "\"").replace("\\:", ":")
}

fn is_range_syntax(term: &str) -> bool {
    let Some(first) = term.chars().next() else {
        return false;
    };
    let Some(last) = term.chars().last() else {
        return false;
    };
    term.len() >= 3
        && matches!(first, '[' | '(')
        && matches!(last, ']' | ')')
        && term[1..term.len() - 1].contains([',', '-'])
}

fn parse_number(s: &str, term: &str) -> Result<f64, AuditError> {
    s.trim()
        .parse::<f64>()
        .map_err(|_| AuditError::parse(format!("Invalid number '{}' in range '{}'", s.trim(), term)))
}

fn parse_range(term: &str) -> Result<Comparer, AuditError> {
    let lower_inclusive = term.starts_with('[');
    let upper_inclusive = term.ends_with(']');
    let inner = &term[1..term.len() - 1];
    let (lo, hi) = match inner.split_once(',') {
        Some(parts) => parts,
        None => inner
            .split_once('-')
            .ok_or_else(|| AuditError::parse(format!("Invalid range '{}'", term)))?,
    };
    Ok(Comparer::Range {
        lower: parse_number(lo, term)?,
        upper: parse_number(hi, term)?,
        lower_inclusive,
        upper_inclusive,
    })
}

/// `>x`, `>=x`, `<x`, `<=x` where `x` is numeric.
fn parse_one_sided(term: &str) -> Option<Comparer> {
    let (rest, greater, inclusive) = if let Some(r) = term.strip_prefix(">=") {
        (r, true, true)
    } else if let Some(r) = term.strip_prefix("<=") {
        (r, false, true)
    } else if let Some(r) = term.strip_prefix('>') {
        (r, true, false)
    } else if let Some(r) = term.strip_prefix('<') {
        (r, false, false)
    } else {
        return None;
    };
    let value = rest.trim().parse::<f64>().ok()?;
    Some(if greater {
        Comparer::Range {
            lower: value,
            upper: f64::INFINITY,
            lower_inclusive: inclusive,
            upper_inclusive: true,
        }
    } else {
        Comparer::Range {
            lower: f64::NEG_INFINITY,
            upper: value,
            lower_inclusive: true,
            upper_inclusive: inclusive,
        }
    })
}

impl Comparer {
    /// Build the comparer for a raw query value.
    pub fn parse(raw: &str) -> Result<Self, AuditError> {
        let mut term = raw.trim();
        let negate = term.starts_with('!');
        if negate {
            term = term[1..].trim_start();
        }

        let comparer = if term.len() >= 2 && term.starts_with('"') && term.ends_with('"') {
            Comparer::Exact(unescape(&term[1..term.len() - 1]))
        } else if is_range_syntax(term) {
            parse_range(term)?
        } else if term.len() >= 2 && term.starts_with('/') && term.ends_with('/') {
            let pattern = &term[1..term.len() - 1];
            let re = RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| AuditError::parse(format!("Invalid regular expression '{}': {}", pattern, e)))?;
            Comparer::Regex(re)
        } else if term.eq_ignore_ascii_case(NONE_TERM) {
            Comparer::Absent
        } else if let Some(c) = parse_one_sided(term) {
            c
        } else {
            Comparer::Contains(unescape(term))
        };

        Ok(if negate { comparer.negate() } else { comparer })
    }

    pub fn negate(self) -> Self {
        match self {
            Comparer::Not(inner) => *inner,
            other => Comparer::Not(Box::new(other)),
        }
    }

    pub fn is_negation(&self) -> bool {
        matches!(self, Comparer::Not(_))
    }

    /// Combine the values given for one modifier in legacy syntax.
    pub fn any_of(comparers: Vec<Comparer>) -> Self {
        let (negations, positives) = comparers.into_iter().partition(Comparer::is_negation);
        Comparer::Any { negations, positives }
    }

    pub fn matches(&self, value: &AttributeValue<'_>) -> bool {
        match self {
            // Positive comparers never match a missing value, so negations do.
            Comparer::Not(inner) => !inner.matches(value),
            Comparer::Any { negations, positives } => {
                if negations.is_empty() && positives.is_empty() {
                    return false;
                }
                negations.iter().all(|c| c.matches(value))
                    && (positives.is_empty() || positives.iter().any(|c| c.matches(value)))
            }
            Comparer::Absent => match value {
                AttributeValue::Missing => true,
                AttributeValue::Text(t) => t.trim().is_empty(),
                AttributeValue::List(items) => items.is_empty(),
                _ => false,
            },
            _ => match value {
                AttributeValue::Missing => false,
                AttributeValue::List(items) => items.iter().any(|i| self.matches_text(i)),
                AttributeValue::Searchable(s) => match self {
                    Comparer::Contains(needle) => s.contains(needle),
                    Comparer::Exact(expected) => s.matches(expected),
                    Comparer::Regex(re) => s.matches_pattern(re),
                    _ => false,
                },
                AttributeValue::Number(n) => match self {
                    Comparer::Range { .. } => self.in_range(*n),
                    _ => self.matches_text(&n.to_string()),
                },
                other => other.as_text().is_some_and(|t| self.matches_text(&t)),
            },
        }
    }

    fn matches_text(&self, text: &str) -> bool {
        match self {
            Comparer::Contains(needle) => text.to_lowercase().contains(&needle.to_lowercase()),
            Comparer::Exact(expected) => text.eq_ignore_ascii_case(expected),
            Comparer::Regex(re) => re.is_match(text),
            Comparer::Range { .. } => text.trim().parse::<f64>().is_ok_and(|n| self.in_range(n)),
            Comparer::Absent => text.trim().is_empty(),
            Comparer::Not(_) | Comparer::Any { .. } => self.matches(&AttributeValue::Text(text)),
        }
    }

    fn in_range(&self, n: f64) -> bool {
        let Comparer::Range { lower, upper, lower_inclusive, upper_inclusive } = *self else {
            return false;
        };
        let above = if lower_inclusive { n >= lower } else { n > lower };
        let below = if upper_inclusive { n <= upper } else { n < upper };
        above && below
    }
}
