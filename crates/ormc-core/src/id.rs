//! Stable identifiers and source locations for model entities.
//!
//! [`ClassId`] is a newtype over `u32` indexing the [`Model`](crate::model::Model)'s
//! class table. [`Location`] points back at the declaration that produced a
//! class or member so that diagnostics can name it.

use std::fmt;

use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};

/// Persistent class identity within a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClassId(pub u32);

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Bridge between ClassId and petgraph's NodeIndex<u32>. The dependency graph
// adds one node per class in id order, so the indices coincide.

impl From<NodeIndex<u32>> for ClassId {
    fn from(idx: NodeIndex<u32>) -> Self {
        ClassId(idx.index() as u32)
    }
}

impl From<ClassId> for NodeIndex<u32> {
    fn from(id: ClassId) -> Self {
        NodeIndex::new(id.0 as usize)
    }
}

/// Source position of a declaration, as reported by the model producer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Location {
            file: file.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.file.is_empty() {
            write!(f, "<unknown>")
        } else {
            write!(f, "{}:{}:{}", self.file, self.line, self.column)
        }
    }
}
