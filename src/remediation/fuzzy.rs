use crate::utils::text::normalize_line;

/// Whitespace- and case-insensitive block search over file lines.
///
/// Blank lines are ignored on both sides, so a block still aligns after
/// blank lines were added or removed around it.
#[derive(Debug, Clone, Copy, Default)]
pub struct FuzzySearcher {
    pub max_mismatches: usize,
}

fn normalized(lines: &[&str]) -> Vec<String> {
    lines.iter().map(|l| normalize_line(l)).collect()
}

fn block(lines: &[&str]) -> Vec<String> {
    lines.iter().map(|l| normalize_line(l)).filter(|l| !l.is_empty()).collect()
}

impl FuzzySearcher {
    pub fn new(max_mismatches: usize) -> Self {
        Self { max_mismatches }
    }

    /// Align `block` against `source` starting at `start`. Returns the index
    /// of the last source line consumed.
    fn align(&self, source: &[String], block: &[String], start: usize) -> Option<usize> {
        let mut mismatches = 0;
        let mut idx = start;
        let mut last = start;
        for expected in block {
            while source.get(idx).is_some_and(String::is_empty) {
                idx += 1;
            }
            let actual = source.get(idx)?;
            if actual != expected {
                mismatches += 1;
                if mismatches > self.max_mismatches {
                    return None;
                }
            }
            last = idx;
            idx += 1;
        }
        Some(last)
    }

    /// First line (0-based) where the context block starts. A context with
    /// no content anchors at the top of the file.
    pub fn find_context(&self, lines: &[&str], context: &[&str]) -> Option<usize> {
        let context = block(context);
        if context.is_empty() {
            return Some(0);
        }
        let source = normalized(lines);
        (0..source.len())
            .filter(|&i| !source[i].is_empty())
            .find(|&i| self.align(&source, &context, i).is_some())
    }

    /// Line span (0-based, inclusive) of the original code block, searching
    /// from `from`.
    pub fn find_original(&self, lines: &[&str], original: &[&str], from: usize) -> Option<(usize, usize)> {
        let original = block(original);
        if original.is_empty() {
            return None;
        }
        let source = normalized(lines);
        (from..source.len())
            .filter(|&i| !source[i].is_empty())
            .find_map(|i| self.align(&source, &original, i).map(|end| (i, end)))
    }
}
