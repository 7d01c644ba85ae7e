//! Structural segmentation of content documents.
//!
//! The walk cuts a document body into ordered batches of captured nodes
//! whose serialised size respects a soft character budget. The same walk
//! drives reassembly, so batch boundaries are reproducible from the
//! original document alone.

use markup5ever_rcdom::{Handle, NodeData};

use crate::dom;
use crate::store::{SchemaVersion, Segment, SegmentStatus};

/// One flushed batch: the captured nodes in document order and their
/// concatenated serialisation.
#[derive(Debug, Clone)]
pub struct CapturedBatch {
    pub nodes: Vec<Handle>,
    pub html: String,
}

const HEADER_TAGS: [&str; 6] = ["h1", "h2", "h3", "h4", "h5", "h6"];

fn is_header_tag(tag: &str) -> bool {
    HEADER_TAGS.contains(&tag)
}

/// Candidate capture units. Tables moved from breaker to block in v2.
fn is_block_tag(tag: &str, schema: SchemaVersion) -> bool {
    matches!(
        tag,
        "p" | "div"
            | "blockquote"
            | "li"
            | "section"
            | "article"
            | "aside"
            | "main"
            | "header"
            | "footer"
    ) || is_header_tag(tag)
        || (tag == "table" && schema == SchemaVersion::V2)
}

/// Flush boundaries; never captured, never descended into.
fn is_breaker_tag(tag: &str, schema: SchemaVersion) -> bool {
    matches!(tag, "img" | "hr" | "pre" | "svg" | "figure")
        || (tag == "table" && schema == SchemaVersion::V1)
}

/// A block element with visible text and no direct child element that
/// is itself a block or breaker is captured whole.
fn is_leaf_block(node: &Handle, schema: SchemaVersion) -> bool {
    if dom::text_content(node).trim().is_empty() {
        return false;
    }
    !node.children.borrow().iter().any(|child| {
        dom::node_name(child)
            .map(|tag| is_block_tag(tag, schema) || is_breaker_tag(tag, schema))
            .unwrap_or(false)
    })
}

struct Walker {
    schema: SchemaVersion,
    char_limit: usize,
    batches: Vec<CapturedBatch>,
    current_nodes: Vec<Handle>,
    current_html: String,
    current_chars: usize,
}

impl Walker {
    fn new(schema: SchemaVersion, char_limit: usize) -> Self {
        Self {
            schema,
            char_limit,
            batches: Vec::new(),
            current_nodes: Vec::new(),
            current_html: String::new(),
            current_chars: 0,
        }
    }

    fn flush(&mut self) {
        if self.current_nodes.is_empty() {
            return;
        }
        self.batches.push(CapturedBatch {
            nodes: std::mem::take(&mut self.current_nodes),
            html: std::mem::take(&mut self.current_html),
        });
        self.current_chars = 0;
    }

    fn capture(&mut self, node: &Handle) {
        let html = dom::serialize_node(node);
        let chars = html.chars().count();
        if !self.current_nodes.is_empty() && self.current_chars + chars > self.char_limit {
            self.flush();
        }
        self.current_nodes.push(node.clone());
        self.current_html.push_str(&html);
        self.current_chars += chars;
    }

    /// Headers always form a batch of their own, regardless of budget.
    fn capture_alone(&mut self, node: &Handle) {
        self.flush();
        self.batches.push(CapturedBatch {
            nodes: vec![node.clone()],
            html: dom::serialize_node(node),
        });
    }

    fn visit_children(&mut self, node: &Handle) {
        let children: Vec<Handle> = node.children.borrow().iter().cloned().collect();
        for child in &children {
            self.visit(child);
        }
    }

    fn visit(&mut self, node: &Handle) {
        match &node.data {
            NodeData::Element { name, .. } => {
                let tag: &str = &name.local;
                if is_breaker_tag(tag, self.schema) {
                    self.flush();
                    return;
                }
                if is_header_tag(tag) {
                    self.capture_alone(node);
                    return;
                }
                if is_block_tag(tag, self.schema) && is_leaf_block(node, self.schema) {
                    self.capture(node);
                    return;
                }
                self.visit_children(node);
            }
            NodeData::Text { contents } => {
                if self.schema == SchemaVersion::V2 && !contents.borrow().trim().is_empty() {
                    self.capture(node);
                }
            }
            _ => {}
        }
    }
}

/// Walk a document body and return the captured batches in order.
/// Shared by segmentation and reassembly; both must agree on schema
/// version and budget for boundaries to line up.
pub fn walk_batches(body: &Handle, schema: SchemaVersion, char_limit: usize) -> Vec<CapturedBatch> {
    let mut walker = Walker::new(schema, char_limit);
    walker.visit_children(body);
    walker.flush();
    walker.batches
}

/// Segment one content document into pending translation units.
pub fn segment_document(
    markup: &str,
    doc_path: &str,
    schema: SchemaVersion,
    char_limit: usize,
) -> Vec<Segment> {
    let document = dom::parse_html_document(markup);
    let Some(body) = dom::document_body(&document) else {
        return Vec::new();
    };

    walk_batches(&body, schema, char_limit)
        .into_iter()
        .enumerate()
        .map(|(index, batch)| Segment {
            id: segment_id(doc_path, index),
            doc_path: doc_path.to_string(),
            batch_index: index,
            original_html: batch.html,
            translated_html: String::new(),
            status: SegmentStatus::Pending,
            retry_count: 0,
            error: None,
        })
        .collect()
}

pub fn segment_id(doc_path: &str, batch_index: usize) -> String {
    format!("{}::{}", doc_path, batch_index)
}
