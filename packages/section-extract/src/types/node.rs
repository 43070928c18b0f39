//! Graph node types - headings of the hierarchical document corpus.

use serde::{Deserialize, Serialize};

/// Where a node's raw content lives.
///
/// Lines are 1-based and inclusive on both ends.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    /// Path-like identifier of the source document
    pub path: String,

    /// First line of the node's content
    pub start_line: usize,

    /// Last line of the node's content
    pub end_line: usize,
}

impl SourceRef {
    /// Create a new source reference.
    pub fn new(path: impl Into<String>, start_line: usize, end_line: usize) -> Self {
        Self {
            path: path.into(),
            start_line,
            end_line,
        }
    }

    /// Number of lines covered.
    pub fn line_count(&self) -> usize {
        if self.end_line < self.start_line {
            0
        } else {
            self.end_line - self.start_line + 1
        }
    }
}

/// One addressable section (heading) of a document.
///
/// Nodes are created by ingestion and are read-only for this library.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    /// Globally unique, stable id
    pub id: String,

    /// Heading title
    pub title: String,

    /// Short summary of the section
    pub summary: String,

    /// Embedding of the summary, when one was computed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    /// Depth in the hierarchy (0 = document-level heading)
    pub level: u32,

    /// Owning parent, if any
    #[serde(default)]
    pub parent: Option<String>,

    /// Ordered child ids
    #[serde(default)]
    pub children: Vec<String>,

    /// Document this node belongs to
    #[serde(default)]
    pub document_id: Option<String>,

    /// Raw content location
    pub source: SourceRef,
}

impl GraphNode {
    /// Create a new node with an empty summary.
    pub fn new(id: impl Into<String>, title: impl Into<String>, source: SourceRef) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            summary: String::new(),
            embedding: None,
            level: 0,
            parent: None,
            children: Vec::new(),
            document_id: None,
            source,
        }
    }

    /// Set the summary.
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    /// Set the summary embedding.
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Set the hierarchy level.
    pub fn with_level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }

    /// Set the parent id.
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Append a child id.
    pub fn with_child(mut self, child: impl Into<String>) -> Self {
        self.children.push(child.into());
        self
    }

    /// Append several child ids.
    pub fn with_children(mut self, children: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.children.extend(children.into_iter().map(|c| c.into()));
        self
    }

    /// Set the owning document.
    pub fn with_document(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    /// Whether the node is a document-level root.
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Lightweight match row for this node.
    pub fn to_match(&self) -> NodeMatch {
        NodeMatch {
            id: self.id.clone(),
            title: self.title.clone(),
            summary: self.summary.clone(),
            level: self.level,
        }
    }
}

/// A document: named container of top-level nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub name: String,
    pub source_path: String,
    /// Ordered top-level node ids
    #[serde(default)]
    pub children: Vec<String>,
}

impl Document {
    /// Create a new document.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        source_path: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            source_path: source_path.into(),
            children: Vec::new(),
        }
    }

    /// Append a top-level node id.
    pub fn with_child(mut self, child: impl Into<String>) -> Self {
        self.children.push(child.into());
        self
    }
}

/// Bounded pattern-match result returned by the graph store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMatch {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub level: u32,
}
