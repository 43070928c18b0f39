//! Segment types - budget-bounded chunks of one node's text.

use serde::{Deserialize, Serialize};

/// Structural kind of a scanned block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Paragraph,
    List,
    Table,
    CodeBlock,
    /// Horizontal rule; always closes the current segment
    Rule,
}

/// Structural kind of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    Paragraph,
    List,
    Table,
    CodeBlock,
    /// More than one block kind packed together
    Mixed,
}

impl From<BlockKind> for SegmentKind {
    fn from(kind: BlockKind) -> Self {
        match kind {
            BlockKind::Paragraph | BlockKind::Rule => Self::Paragraph,
            BlockKind::List => Self::List,
            BlockKind::Table => Self::Table,
            BlockKind::CodeBlock => Self::CodeBlock,
        }
    }
}

/// A contiguous structural unit of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    /// Raw text including line terminators and trailing blank lines
    pub text: String,
    /// 1-based line the block starts on
    pub start_line: usize,
}

/// An ordered chunk of a node's text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Position within the node (0-based)
    pub index: usize,

    /// Exact slice of the original text
    pub text: String,

    /// Token estimate
    pub tokens: usize,

    pub kind: SegmentKind,

    /// 1-based line within the node text
    pub start_line: usize,

    /// Produced by splitting one oversized block at line boundaries
    pub forced_split: bool,
}

/// Concatenate segments back into the original text.
pub fn reassemble(segments: &[Segment]) -> String {
    segments.iter().map(|s| s.text.as_str()).collect()
}
