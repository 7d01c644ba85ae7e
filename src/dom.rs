//! rcdom helpers shared by the segmenter, reassembler, and EPUB reader.
//!
//! Content documents are parsed leniently with html5ever; the container
//! manifest and package document are XML and go through xml5ever. Both
//! parsers build into the same `markup5ever_rcdom` tree.

use std::rc::Rc;

use html5ever::interface::{Attribute, QualName};
use html5ever::serialize::{serialize, SerializeOpts, TraversalScope};
use html5ever::tendril::{StrTendril, TendrilSink};
use html5ever::{namespace_url, ns, LocalName};
use markup5ever_rcdom::{Handle, Node, NodeData, RcDom, SerializableHandle};

/// Parse a full HTML/XHTML document leniently.
pub fn parse_html_document(source: &str) -> RcDom {
    html5ever::parse_document(RcDom::default(), Default::default())
        .from_utf8()
        .read_from(&mut source.as_bytes())
        .expect("reading from an in-memory buffer cannot fail")
}

/// Parse an XML document. Parse errors are recorded on the returned DOM.
pub fn parse_xml_document(source: &str) -> RcDom {
    xml5ever::driver::parse_document(RcDom::default(), Default::default())
        .from_utf8()
        .read_from(&mut source.as_bytes())
        .expect("reading from an in-memory buffer cannot fail")
}

/// Parse a markup fragment leniently in a body context, returning the
/// top-level nodes in order.
pub fn parse_html_fragment(source: &str) -> Vec<Handle> {
    let dom = html5ever::parse_fragment(
        RcDom::default(),
        Default::default(),
        QualName::new(None, ns!(html), LocalName::from("body")),
        vec![],
    )
    .from_utf8()
    .read_from(&mut source.as_bytes())
    .expect("reading from an in-memory buffer cannot fail");

    // parse_fragment wraps the nodes in a synthetic <html> element
    let children = dom.document.children.borrow();
    let Some(context) = children.first() else {
        return Vec::new();
    };
    detach_children(context)
}

/// Parse a markup fragment as XML, failing when the parser records any
/// error. The fragment is wrapped in a synthetic root so that fragments
/// with multiple top-level nodes are still well-formed.
pub fn parse_xml_fragment(source: &str) -> Option<Vec<Handle>> {
    let wrapped = format!("<mtj-root>{}</mtj-root>", source);
    let dom = parse_xml_document(&wrapped);

    if !dom.errors.is_empty() {
        return None;
    }

    let children = dom.document.children.borrow();
    let root = children
        .iter()
        .find(|node| matches!(node.data, NodeData::Element { .. }))?
        .clone();
    drop(children);
    Some(detach_children(&root))
}

fn detach_children(parent: &Handle) -> Vec<Handle> {
    let nodes: Vec<Handle> = parent.children.borrow_mut().drain(..).collect();
    for node in &nodes {
        node.parent.set(None);
    }
    nodes
}

/// Local (namespace-free) element name, if the node is an element.
pub fn node_name(node: &Handle) -> Option<&str> {
    match &node.data {
        NodeData::Element { name, .. } => Some(name.local.as_ref()),
        _ => None,
    }
}

/// Attribute lookup by local name, tolerating namespace prefixes.
pub fn get_node_attr(node: &Handle, attr_name: &str) -> Option<String> {
    match &node.data {
        NodeData::Element { attrs, .. } => attrs
            .borrow()
            .iter()
            .find(|attr| &*attr.name.local == attr_name)
            .map(|attr| attr.value.to_string()),
        _ => None,
    }
}

/// Set (or remove, with `None`) an attribute by local name.
pub fn set_node_attr(node: &Handle, attr_name: &str, attr_value: Option<&str>) {
    if let NodeData::Element { attrs, .. } = &node.data {
        let mut attrs_mut = attrs.borrow_mut();
        match attr_value {
            None => attrs_mut.retain(|a| &*a.name.local != attr_name),
            Some(value) => {
                if let Some(existing) =
                    attrs_mut.iter_mut().find(|a| &*a.name.local == attr_name)
                {
                    existing.value.clear();
                    existing.value.push_slice(value);
                } else {
                    attrs_mut.push(Attribute {
                        name: QualName::new(None, ns!(), LocalName::from(attr_name)),
                        value: StrTendril::from(value),
                    });
                }
            }
        }
    }
}

/// First direct child element with the given local name.
pub fn get_child_by_name(parent: &Handle, name: &str) -> Option<Handle> {
    parent
        .children
        .borrow()
        .iter()
        .find(|child| node_name(child) == Some(name))
        .cloned()
}

/// Depth-first search for the first element with the given local name.
pub fn find_first_by_name(node: &Handle, name: &str) -> Option<Handle> {
    if node_name(node) == Some(name) {
        return Some(node.clone());
    }
    for child in node.children.borrow().iter() {
        if let Some(found) = find_first_by_name(child, name) {
            return Some(found);
        }
    }
    None
}

/// Depth-first collection of every element with the given local name.
pub fn find_all_by_name(node: &Handle, name: &str, found: &mut Vec<Handle>) {
    if node_name(node) == Some(name) {
        found.push(node.clone());
    }
    for child in node.children.borrow().iter() {
        find_all_by_name(child, name, found);
    }
}

/// The `<body>` element of a parsed content document.
pub fn document_body(dom: &RcDom) -> Option<Handle> {
    let html = get_child_by_name(&dom.document, "html")?;
    get_child_by_name(&html, "body")
}

/// The `<html>` element of a parsed content document.
pub fn document_root(dom: &RcDom) -> Option<Handle> {
    get_child_by_name(&dom.document, "html")
}

/// Concatenated text of the subtree.
pub fn text_content(node: &Handle) -> String {
    let mut out = String::new();
    collect_text(node, &mut out);
    out
}

fn collect_text(node: &Handle, out: &mut String) {
    if let NodeData::Text { contents } = &node.data {
        out.push_str(&contents.borrow());
    }
    for child in node.children.borrow().iter() {
        collect_text(child, out);
    }
}

/// Build a detached element node.
pub fn new_element(name: &str, attrs: Vec<(&str, &str)>) -> Handle {
    Node::new(NodeData::Element {
        name: QualName::new(None, ns!(), LocalName::from(name)),
        attrs: std::cell::RefCell::new(
            attrs
                .into_iter()
                .map(|(attr_name, value)| Attribute {
                    name: QualName::new(None, ns!(), LocalName::from(attr_name)),
                    value: StrTendril::from(value),
                })
                .collect(),
        ),
        template_contents: std::cell::RefCell::new(None),
        mathml_annotation_xml_integration_point: false,
    })
}

/// Build a detached text node.
pub fn new_text(text: &str) -> Handle {
    Node::new(NodeData::Text {
        contents: std::cell::RefCell::new(StrTendril::from(text)),
    })
}

/// Append `child` to `parent`, fixing the parent pointer.
pub fn append_child(parent: &Handle, child: Handle) {
    child.parent.set(Some(Rc::downgrade(parent)));
    parent.children.borrow_mut().push(child);
}

/// Insert `child` as the first child of `parent`.
pub fn prepend_child(parent: &Handle, child: Handle) {
    child.parent.set(Some(Rc::downgrade(parent)));
    parent.children.borrow_mut().insert(0, child);
}

/// Current parent of a node, if it is attached.
pub fn parent_of(node: &Handle) -> Option<Handle> {
    let weak = node.parent.take();
    node.parent.set(weak.clone());
    weak.and_then(|w| w.upgrade())
}

/// Detach a node from its current parent, if any.
pub fn remove_from_parent(node: &Handle) {
    if let Some(parent) = parent_of(node) {
        parent
            .children
            .borrow_mut()
            .retain(|child| !Rc::ptr_eq(child, node));
    }
    node.parent.set(None);
}

/// Serialise one node (element or text) including the node itself.
pub fn serialize_node(node: &Handle) -> String {
    let mut buf = Vec::new();
    let serializable: SerializableHandle = node.clone().into();
    serialize(
        &mut buf,
        &serializable,
        SerializeOpts {
            traversal_scope: TraversalScope::IncludeNode,
            ..Default::default()
        },
    )
    .expect("serializing into a memory buffer cannot fail");
    String::from_utf8(buf).expect("serializer emits UTF-8")
}

/// Serialise a whole document back to markup.
pub fn serialize_document(dom: &RcDom) -> String {
    let mut buf = Vec::new();
    let serializable: SerializableHandle = dom.document.clone().into();
    serialize(&mut buf, &serializable, SerializeOpts::default())
        .expect("serializing into a memory buffer cannot fail");
    String::from_utf8(buf).expect("serializer emits UTF-8")
}

/// Escape `&` characters that do not begin a character reference, so a
/// lax HTML fragment has a chance of passing the XML parser.
pub fn escape_bare_ampersands(source: &str) -> String {
    let bytes = source.as_bytes();
    let mut out = String::with_capacity(source.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'&' {
            let rest = &source[i + 1..];
            let is_entity = rest
                .char_indices()
                .take(32)
                .find(|(_, c)| !c.is_ascii_alphanumeric() && *c != '#')
                .map(|(pos, c)| c == ';' && pos > 0)
                .unwrap_or(false);
            if is_entity {
                out.push('&');
            } else {
                out.push_str("&amp;");
            }
            i += 1;
        } else {
            let ch = source[i..].chars().next().expect("valid UTF-8 boundary");
            out.push(ch);
            i += ch.len_utf8();
        }
    }
    out
}
