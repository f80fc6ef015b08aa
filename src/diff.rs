//! Structural diff between two decoded packet values.
//!
//! Pure functions over [`Value`] trees: no caching, no shared state, and
//! output order is fixed by sorted object keys and ascending array indices,
//! never by the order fields arrived in.

use std::collections::BTreeSet;
use std::fmt;

use crate::model::{PacketRecord, Value};

/// One step into a value tree.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum PathSeg {
    Key(String),
    Index(usize),
}

/// Where in the tree a finding points. The root is the empty path; a
/// nested field renders as `b.c[2].d`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiffPath(Vec<PathSeg>);

impl DiffPath {
    pub fn segments(&self) -> &[PathSeg] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    fn child_key(&self, key: &str) -> DiffPath {
        let mut segments = self.0.clone();
        segments.push(PathSeg::Key(key.to_string()));
        DiffPath(segments)
    }

    fn child_index(&self, index: usize) -> DiffPath {
        let mut segments = self.0.clone();
        segments.push(PathSeg::Index(index));
        DiffPath(segments)
    }
}

impl fmt::Display for DiffPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.0.iter().enumerate() {
            match seg {
                PathSeg::Key(key) => {
                    if i > 0 {
                        f.write_str(".")?;
                    }
                    f.write_str(key)?;
                }
                PathSeg::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffKind {
    Added,
    Removed,
    Modified,
    Unchanged,
}

/// A single finding. `old` is the baseline side, `new` the current side;
/// which of the two is present follows from `kind`.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffEntry {
    pub path: DiffPath,
    pub kind: DiffKind,
    pub old: Option<Value>,
    pub new: Option<Value>,
}

/// Complete comparison of one record against the baseline record.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffResult {
    entries: Vec<DiffEntry>,
    /// Capture-time difference, current minus baseline, in milliseconds.
    pub time_delta_ms: i64,
    /// Packet-number difference, current minus baseline.
    pub packet_delta: i64,
}

impl DiffResult {
    /// The findings worth showing: everything except Unchanged, in path
    /// order.
    pub fn changes(&self) -> impl Iterator<Item = &DiffEntry> {
        self.entries
            .iter()
            .filter(|e| e.kind != DiffKind::Unchanged)
    }

    /// Every computed entry, Unchanged included.
    pub fn all_entries(&self) -> &[DiffEntry] {
        &self.entries
    }

    pub fn is_identical(&self) -> bool {
        self.entries.iter().all(|e| e.kind == DiffKind::Unchanged)
    }
}

/// Diffs two value trees. Objects compare over the union of keys in sorted
/// order, arrays index by index with Added/Removed tails, scalars by value
/// and type. A shape mismatch is a single Modified at that node; neither
/// side is descended into.
pub fn diff_values(baseline: &Value, current: &Value) -> Vec<DiffEntry> {
    let mut entries = Vec::new();
    walk(&DiffPath::default(), Some(baseline), Some(current), &mut entries);
    entries
}

fn walk(
    path: &DiffPath,
    baseline: Option<&Value>,
    current: Option<&Value>,
    out: &mut Vec<DiffEntry>,
) {
    match (baseline, current) {
        (Some(Value::Object(b)), Some(Value::Object(c))) => {
            let keys: BTreeSet<&String> = b.keys().chain(c.keys()).collect();
            for key in keys {
                walk(
                    &path.child_key(key),
                    b.get(key.as_str()),
                    c.get(key.as_str()),
                    out,
                );
            }
        }
        (Some(Value::Array(b)), Some(Value::Array(c))) => {
            for i in 0..b.len().max(c.len()) {
                walk(&path.child_index(i), b.get(i), c.get(i), out);
            }
        }
        (Some(b), Some(c)) => {
            let kind = if b == c {
                DiffKind::Unchanged
            } else {
                DiffKind::Modified
            };
            out.push(DiffEntry {
                path: path.clone(),
                kind,
                old: Some(b.clone()),
                new: Some(c.clone()),
            });
        }
        (Some(b), None) => out.push(DiffEntry {
            path: path.clone(),
            kind: DiffKind::Removed,
            old: Some(b.clone()),
            new: None,
        }),
        (None, Some(c)) => out.push(DiffEntry {
            path: path.clone(),
            kind: DiffKind::Added,
            old: None,
            new: Some(c.clone()),
        }),
        (None, None) => {}
    }
}

/// Diffs the cursor record against the baseline record, carrying the two
/// scalar deltas alongside the tree findings.
pub fn diff_records(baseline: &PacketRecord, current: &PacketRecord) -> DiffResult {
    DiffResult {
        entries: diff_values(&baseline.value, &current.value),
        time_delta_ms: current.timestamp_ms - baseline.timestamp_ms,
        packet_delta: current.packet_number as i64 - baseline.packet_number as i64,
    }
}
