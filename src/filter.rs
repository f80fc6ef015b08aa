//! The packet filter expression language.
//!
//! One clause per comma: `[c|s|a][.name-pattern]`. `c`/`s` pin the
//! direction, `a` (or nothing before the dot) matches both. A pattern with
//! `*` is a case-insensitive glob over the whole name; without `*` it is a
//! case-sensitive exact match. Clauses OR together; an empty expression
//! matches everything.

use std::fmt;

use tracing::debug;

use crate::model::Direction;

/// One clause of a filter expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterExpr {
    /// `None` matches both directions.
    pub direction: Option<Direction>,
    /// `None` matches any packet, named or not.
    pub pattern: Option<String>,
    /// Set exactly when the pattern contains `*`.
    pub wildcard: bool,
}

/// Ordered set of clauses combined with OR. Empty means "no filtering".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilterSet {
    exprs: Vec<FilterExpr>,
}

impl FilterSet {
    /// Parses an operator-typed expression. A clause whose direction
    /// character is not recognized is dropped with a debug log and the
    /// rest of the expression still applies.
    pub fn parse(input: &str) -> FilterSet {
        let mut exprs = Vec::new();
        for clause in input.split(',') {
            let clause = clause.trim();
            if clause.is_empty() {
                continue;
            }

            let (direction_part, pattern) = match clause.find('.') {
                Some(dot) => (&clause[..dot], Some(clause[dot + 1..].to_string())),
                None => (clause, None),
            };

            let direction = match direction_part.to_lowercase().as_str() {
                "c" => Some(Direction::Clientbound),
                "s" => Some(Direction::Serverbound),
                "a" | "" => None,
                other => {
                    debug!(clause, direction = other, "dropping filter clause");
                    continue;
                }
            };

            let wildcard = pattern.as_deref().is_some_and(|p| p.contains('*'));
            exprs.push(FilterExpr {
                direction,
                pattern,
                wildcard,
            });
        }
        FilterSet { exprs }
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }

    pub fn exprs(&self) -> &[FilterExpr] {
        &self.exprs
    }

    /// Compiles the set into a predicate the store can push down into its
    /// record scan.
    pub fn compile(&self) -> StorePredicate {
        StorePredicate {
            clauses: self
                .exprs
                .iter()
                .map(|expr| ClauseMatcher {
                    direction: expr.direction,
                    name: expr.pattern.as_ref().map(|p| {
                        if expr.wildcard {
                            NameMatcher::Wildcard(p.to_lowercase())
                        } else {
                            NameMatcher::Exact(p.clone())
                        }
                    }),
                })
                .collect(),
        }
    }
}

/// Renders the set back in the grammar of `parse`; the inverse of parsing
/// for any input that lost no clauses.
impl fmt::Display for FilterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, expr) in self.exprs.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            let direction = match expr.direction {
                Some(Direction::Clientbound) => "c",
                Some(Direction::Serverbound) => "s",
                None => "a",
            };
            match &expr.pattern {
                Some(pattern) => write!(f, "{direction}.{pattern}")?,
                None => f.write_str(direction)?,
            }
        }
        Ok(())
    }
}

/// Compiled filter, ready to test records during a store query.
#[derive(Debug, Clone, Default)]
pub struct StorePredicate {
    clauses: Vec<ClauseMatcher>,
}

#[derive(Debug, Clone)]
struct ClauseMatcher {
    direction: Option<Direction>,
    name: Option<NameMatcher>,
}

#[derive(Debug, Clone)]
enum NameMatcher {
    /// Case-sensitive whole-name equality.
    Exact(String),
    /// Lowercased glob, `*` matching any run, anchored at both ends.
    Wildcard(String),
}

impl StorePredicate {
    /// True when the record passes at least one clause. An empty predicate
    /// passes everything.
    pub fn matches(&self, direction: Direction, name: Option<&str>) -> bool {
        if self.clauses.is_empty() {
            return true;
        }
        self.clauses.iter().any(|c| c.matches(direction, name))
    }

    pub fn is_match_all(&self) -> bool {
        self.clauses.is_empty()
    }
}

impl ClauseMatcher {
    fn matches(&self, direction: Direction, name: Option<&str>) -> bool {
        if let Some(want) = self.direction {
            if want != direction {
                return false;
            }
        }
        match &self.name {
            None => true,
            // A record with no recorded name can only pass name-less clauses.
            Some(NameMatcher::Exact(expected)) => name == Some(expected.as_str()),
            Some(NameMatcher::Wildcard(pattern)) => {
                name.is_some_and(|n| glob_match(pattern, &n.to_lowercase()))
            }
        }
    }
}

/// `*`-only glob over chars, both sides already lowercased. Two-pointer
/// scan with backtracking to the last star.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let mut p = 0;
    let mut t = 0;
    let mut star: Option<usize> = None;
    let mut mark = 0;

    while t < text.len() {
        if p < pattern.len() && pattern[p] != '*' && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            mark = t;
            p += 1;
        } else if let Some(s) = star {
            p = s + 1;
            mark += 1;
            t = mark;
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}
