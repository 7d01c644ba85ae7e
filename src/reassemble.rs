//! Structure-preserving reassembly.
//!
//! Each content document is re-walked with the same classification
//! rules used during segmentation, so batch boundaries land on exactly
//! the nodes that were captured. Translated markup is spliced in via a
//! patch plan built during the walk and applied afterwards, which keeps
//! the walk itself read-only.

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::OnceLock;

use markup5ever_rcdom::{Handle, NodeData};
use regex::Regex;
use tracing::{debug, warn};

use crate::config::{Direction, ExportSettings};
use crate::dom;
use crate::epub::{self, reader, writer};
use crate::error::Result;
use crate::segmenter;
use crate::store::{SchemaVersion, Segment, SegmentStatus};

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub target_language: String,
    pub target_direction: Direction,
    pub settings: ExportSettings,
    pub translated_title: Option<String>,
}

struct Patch {
    parent: Handle,
    anchor: Handle,
    inserts: Vec<Handle>,
    removals: Vec<Handle>,
}

/// Produce a freshly packaged archive with translated markup spliced
/// into every document that has translated segments, the package
/// metadata retargeted, and the cover replaced when one was supplied.
pub fn reassemble_book(
    source_book: &[u8],
    segments: &[Segment],
    schema: SchemaVersion,
    char_limit: usize,
    custom_cover: Option<&[u8]>,
    options: &ExportOptions,
) -> Result<Vec<u8>> {
    let parsed = reader::read_book(source_book)?;

    let mut by_doc: HashMap<&str, Vec<&Segment>> = HashMap::new();
    for segment in segments {
        by_doc.entry(segment.doc_path.as_str()).or_default().push(segment);
    }
    for doc_segments in by_doc.values_mut() {
        doc_segments.sort_by_key(|s| s.batch_index);
    }

    let mut replacements: HashMap<String, Vec<u8>> = HashMap::new();

    for doc in &parsed.docs {
        let Some(doc_segments) = by_doc.get(doc.path.as_str()) else {
            continue;
        };
        let source = match epub::read_entry_string(source_book, &doc.path) {
            Ok(source) => source,
            Err(err) => {
                warn!("Cannot read {} for reassembly: {}", doc.path, err);
                continue;
            }
        };
        let rebuilt = reassemble_document(&source, doc_segments, schema, char_limit, options);
        replacements.insert(doc.path.clone(), rebuilt.into_bytes());
    }

    let opf_source = epub::read_entry_string(source_book, &parsed.opf_path)?;
    replacements.insert(
        parsed.opf_path.clone(),
        update_opf(&opf_source, options).into_bytes(),
    );

    if let (Some(cover_bytes), Some(cover_path)) = (custom_cover, &parsed.meta.cover_path) {
        replacements.insert(cover_path.clone(), cover_bytes.to_vec());
    }

    writer::repackage(source_book, &replacements)
}

/// Splice translated segments into one content document.
pub fn reassemble_document(
    source: &str,
    segments: &[&Segment],
    schema: SchemaVersion,
    char_limit: usize,
    options: &ExportOptions,
) -> String {
    let document = dom::parse_html_document(source);
    let Some(html) = dom::document_root(&document) else {
        return source.to_string();
    };
    let Some(body) = dom::document_body(&document) else {
        return source.to_string();
    };

    let direction = options.target_direction.as_str();
    dom::set_node_attr(&html, "lang", Some(&options.target_language));
    dom::set_node_attr(&html, "xml:lang", Some(&options.target_language));
    dom::set_node_attr(&body, "dir", Some(direction));
    dom::set_node_attr(&body, "lang", Some(&options.target_language));

    inject_style(&html, options);

    let batches = segmenter::walk_batches(&body, schema, char_limit);
    if batches.len() != segments.len() {
        warn!(
            "Batch count changed between import and export ({} vs {} segments); \
             splicing by index where possible",
            batches.len(),
            segments.len()
        );
    }

    let mut patches: Vec<Patch> = Vec::new();
    for (index, batch) in batches.iter().enumerate() {
        let Some(segment) = segments.iter().find(|s| s.batch_index == index) else {
            continue;
        };
        if segment.status != SegmentStatus::Translated || segment.translated_html.is_empty() {
            continue;
        }

        let Some(nodes) = parse_translated_fragment(&segment.translated_html) else {
            warn!(
                "Translated markup for {} is unparsable, keeping original nodes",
                segment.id
            );
            continue;
        };

        for node in &nodes {
            if matches!(node.data, NodeData::Element { .. }) {
                dom::set_node_attr(node, "dir", Some(direction));
            }
        }

        let anchor = batch.nodes[0].clone();
        let Some(parent) = dom::parent_of(&anchor) else {
            warn!("Captured node for {} is detached, skipping", segment.id);
            continue;
        };
        patches.push(Patch {
            parent,
            anchor,
            inserts: nodes,
            removals: batch.nodes.clone(),
        });
    }

    debug!("Applying {} patch(es)", patches.len());
    apply_patches(patches);

    dom::serialize_document(&document)
}

fn apply_patches(patches: Vec<Patch>) {
    for patch in patches {
        {
            let mut children = patch.parent.children.borrow_mut();
            let Some(position) = children.iter().position(|c| Rc::ptr_eq(c, &patch.anchor))
            else {
                warn!("Patch anchor vanished, skipping splice");
                continue;
            };
            for (offset, node) in patch.inserts.iter().enumerate() {
                node.parent.set(Some(Rc::downgrade(&patch.parent)));
                children.insert(position + offset, node.clone());
            }
        }

        // Captured nodes are removed through their current parent
        // pointer, one by one; the structural shell is never deleted.
        for node in &patch.removals {
            if matches!(dom::node_name(node), Some("html" | "head" | "body")) {
                continue;
            }
            dom::remove_from_parent(node);
        }
    }
}

/// Fragment parse chain: strict XML, then XML with bare ampersands
/// escaped, then lenient HTML. `None` only when nothing salvageable
/// comes out of a non-empty fragment.
fn parse_translated_fragment(markup: &str) -> Option<Vec<Handle>> {
    if let Some(nodes) = dom::parse_xml_fragment(markup) {
        return Some(nodes);
    }

    let escaped = dom::escape_bare_ampersands(markup);
    if let Some(nodes) = dom::parse_xml_fragment(&escaped) {
        return Some(nodes);
    }

    let nodes = dom::parse_html_fragment(markup);
    if nodes.is_empty() && !markup.trim().is_empty() {
        return None;
    }
    Some(nodes)
}

fn inject_style(html: &Handle, options: &ExportOptions) {
    let style = dom::new_element("style", vec![("type", "text/css")]);
    dom::append_child(&style, dom::new_text(&style_rules(options)));

    match dom::get_child_by_name(html, "head") {
        Some(head) => dom::prepend_child(&head, style),
        None => dom::prepend_child(html, style),
    }
}

fn style_rules(options: &ExportOptions) -> String {
    let direction = options.target_direction.as_str();
    let alignment = options.settings.text_alignment.as_str();

    let mut css = format!("\nhtml, body {{ direction: {direction}; }}\n");
    if options.settings.force_alignment {
        // Strong override: the book's own styles must lose.
        css.push_str(&format!(
            "p, div, li, blockquote, h1, h2, h3, h4, h5, h6, section, article, aside, \
             header, footer, td, th {{ text-align: {alignment} !important; }}\n"
        ));
    } else {
        // Gentle default that the book's own, more specific rules win over.
        css.push_str(&format!("html, body {{ text-align: {alignment}; }}\n"));
    }
    css
}

/// Package-document metadata update, done as guarded text edits so the
/// rest of the OPF stays byte-identical (rcdom has no XML serialiser).
fn update_opf(source: &str, options: &ExportOptions) -> String {
    static LANG_RE: OnceLock<Regex> = OnceLock::new();
    static METADATA_CLOSE_RE: OnceLock<Regex> = OnceLock::new();
    static TITLE_RE: OnceLock<Regex> = OnceLock::new();
    static SPINE_RE: OnceLock<Regex> = OnceLock::new();
    static PPD_RE: OnceLock<Regex> = OnceLock::new();

    let lang_re = LANG_RE.get_or_init(|| {
        Regex::new(r"(?s)(<(?:[A-Za-z][\w.-]*:)?language[^>]*>)(.*?)(</(?:[A-Za-z][\w.-]*:)?language>)")
            .expect("static regex compiles")
    });
    let metadata_close_re = METADATA_CLOSE_RE.get_or_init(|| {
        Regex::new(r"</(?:[A-Za-z][\w.-]*:)?metadata>").expect("static regex compiles")
    });
    let title_re = TITLE_RE.get_or_init(|| {
        Regex::new(r"(?s)(<(?:[A-Za-z][\w.-]*:)?title[^>]*>)(.*?)(</(?:[A-Za-z][\w.-]*:)?title>)")
            .expect("static regex compiles")
    });
    let spine_re =
        SPINE_RE.get_or_init(|| Regex::new(r"<spine([^>]*)>").expect("static regex compiles"));
    let ppd_re = PPD_RE.get_or_init(|| {
        Regex::new(r#"page-progression-direction\s*=\s*"[^"]*""#).expect("static regex compiles")
    });

    let language = &options.target_language;
    let direction = options.target_direction.as_str();

    let mut updated = if lang_re.is_match(source) {
        lang_re
            .replace(source, |caps: &regex::Captures| {
                format!("{}{}{}", &caps[1], language, &caps[3])
            })
            .into_owned()
    } else {
        metadata_close_re
            .replace(source, |caps: &regex::Captures| {
                format!("<dc:language>{}</dc:language>{}", language, &caps[0])
            })
            .into_owned()
    };

    if let Some(title) = &options.translated_title {
        let escaped = xml_escape(title);
        updated = title_re
            .replace(&updated, |caps: &regex::Captures| {
                format!("{}{}{}", &caps[1], escaped, &caps[3])
            })
            .into_owned();
    }

    updated = spine_re
        .replace(&updated, |caps: &regex::Captures| {
            let attrs = &caps[1];
            if ppd_re.is_match(attrs) {
                let patched = ppd_re.replace(
                    attrs,
                    format!("page-progression-direction=\"{direction}\"").as_str(),
                );
                format!("<spine{patched}>")
            } else {
                format!("<spine page-progression-direction=\"{direction}\"{attrs}>")
            }
        })
        .into_owned();

    updated
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TextAlignment;

    fn rtl_options() -> ExportOptions {
        ExportOptions {
            target_language: "ar".to_string(),
            target_direction: Direction::Rtl,
            settings: ExportSettings {
                text_alignment: TextAlignment::Right,
                force_alignment: false,
            },
            translated_title: None,
        }
    }

    fn translated_segment(doc: &str, index: usize, original: &str, translated: &str) -> Segment {
        Segment {
            id: segmenter::segment_id(doc, index),
            doc_path: doc.to_string(),
            batch_index: index,
            original_html: original.to_string(),
            translated_html: translated.to_string(),
            status: SegmentStatus::Translated,
            retry_count: 0,
            error: None,
        }
    }

    #[test]
    fn test_single_paragraph_splice() {
        let source = "<html><head></head><body><p>Hello world.</p></body></html>";
        let segment = translated_segment(
            "d",
            0,
            "<p>Hello world.</p>",
            "<p>مرحبا بالعالم.</p>",
        );
        let rebuilt = reassemble_document(
            source,
            &[&segment],
            SchemaVersion::V2,
            6000,
            &rtl_options(),
        );

        assert!(rebuilt.contains("<body dir=\"rtl\" lang=\"ar\">"));
        assert!(rebuilt.contains("<p dir=\"rtl\">مرحبا بالعالم.</p>"));
        assert!(rebuilt.contains("direction: rtl"));
        assert!(rebuilt.contains("lang=\"ar\""));
        assert!(!rebuilt.contains("Hello world."));
    }

    #[test]
    fn test_untranslated_segments_keep_original() {
        let source = "<html><head></head><body><p>Keep me.</p></body></html>";
        let mut segment =
            translated_segment("d", 0, "<p>Keep me.</p>", "<p>ignored</p>");
        segment.status = SegmentStatus::Skipped;

        let rebuilt = reassemble_document(
            source,
            &[&segment],
            SchemaVersion::V2,
            6000,
            &rtl_options(),
        );
        assert!(rebuilt.contains("<p>Keep me.</p>"));
        assert!(!rebuilt.contains("ignored"));
    }

    #[test]
    fn test_orphan_text_splice() {
        let source = "<html><head></head><body>Intro line<p>Para</p></body></html>";
        let segment = translated_segment(
            "d",
            0,
            "Intro line<p>Para</p>",
            "سطر تمهيدي<p>فقرة</p>",
        );
        let rebuilt = reassemble_document(
            source,
            &[&segment],
            SchemaVersion::V2,
            6000,
            &rtl_options(),
        );

        assert!(rebuilt.contains("سطر تمهيدي"));
        assert!(rebuilt.contains("<p dir=\"rtl\">فقرة</p>"));
        assert!(!rebuilt.contains("Intro line"));
    }

    #[test]
    fn test_fragment_chain_handles_bare_ampersand() {
        let nodes = parse_translated_fragment("<p>bread & salt</p>").unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(
            dom::serialize_node(&nodes[0]),
            "<p>bread &amp; salt</p>"
        );
    }

    #[test]
    fn test_fragment_chain_falls_back_to_html() {
        // Unclosed tag: both XML legs fail, lenient HTML recovers.
        let nodes = parse_translated_fragment("<p>open").unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(dom::node_name(&nodes[0]), Some("p"));
    }

    #[test]
    fn test_forced_alignment_uses_important() {
        let mut options = rtl_options();
        options.settings.force_alignment = true;
        options.settings.text_alignment = TextAlignment::Justify;

        let css = style_rules(&options);
        assert!(css.contains("text-align: justify !important"));
        assert!(css.contains("blockquote"));

        let gentle = style_rules(&rtl_options());
        assert!(!gentle.contains("!important"));
        assert!(gentle.contains("html, body { text-align: right; }"));
    }

    #[test]
    fn test_update_opf_language_title_spine() {
        let opf = "<package><metadata xmlns:dc=\"http://purl.org/dc/elements/1.1/\">\
                   <dc:title>Old Title</dc:title>\
                   <dc:language>en</dc:language>\
                   </metadata><spine toc=\"ncx\"><itemref idref=\"a\"/></spine></package>";

        let mut options = rtl_options();
        options.translated_title = Some("عنوان جديد".to_string());
        let updated = update_opf(opf, &options);

        assert!(updated.contains("<dc:language>ar</dc:language>"));
        assert!(updated.contains("<dc:title>عنوان جديد</dc:title>"));
        assert!(updated.contains("<spine page-progression-direction=\"rtl\" toc=\"ncx\">"));
    }

    #[test]
    fn test_update_opf_inserts_missing_language() {
        let opf = "<package><metadata><dc:title>T</dc:title></metadata>\
                   <spine page-progression-direction=\"ltr\"></spine></package>";
        let updated = update_opf(opf, &rtl_options());

        assert!(updated.contains("<dc:language>ar</dc:language></metadata>"));
        assert!(updated.contains("page-progression-direction=\"rtl\""));
        assert!(!updated.contains("ltr"));
    }

    #[test]
    fn test_full_book_reassembly() {
        use crate::epub::testkit::TestEpub;

        let epub = TestEpub::new("Book")
            .doc("ch1.xhtml", "<body><p>Hello world.</p></body>")
            .cover(&[1, 2, 3])
            .build();

        let source = epub::read_entry_string(&epub, "OEBPS/ch1.xhtml").unwrap();
        let mut segments =
            segmenter::segment_document(&source, "OEBPS/ch1.xhtml", SchemaVersion::V2, 6000);
        assert_eq!(segments.len(), 1);
        segments[0].status = SegmentStatus::Translated;
        segments[0].translated_html = "<p>مرحبا بالعالم.</p>".to_string();

        let rebuilt = reassemble_book(
            &epub,
            &segments,
            SchemaVersion::V2,
            6000,
            Some(&[9, 9, 9]),
            &rtl_options(),
        )
        .unwrap();

        let doc = epub::read_entry_string(&rebuilt, "OEBPS/ch1.xhtml").unwrap();
        assert!(doc.contains("مرحبا بالعالم."));
        assert!(doc.contains("dir=\"rtl\""));

        let opf = epub::read_entry_string(&rebuilt, "OEBPS/content.opf").unwrap();
        assert!(opf.contains("<dc:language>ar</dc:language>"));
        assert!(opf.contains("page-progression-direction=\"rtl\""));

        // Cover replaced in place.
        assert_eq!(
            epub::read_entry_bytes(&rebuilt, "OEBPS/cover.jpg").unwrap(),
            vec![9, 9, 9]
        );
        assert_eq!(
            epub::read_entry_bytes(&rebuilt, "mimetype").unwrap(),
            epub::EPUB_MIME.as_bytes()
        );
    }

    #[test]
    fn test_export_then_reimport_preserves_boundaries() {
        use crate::epub::testkit::TestEpub;

        let epub = TestEpub::new("Round Trip")
            .doc(
                "ch1.xhtml",
                "<body><h1>Title</h1><p>First.</p><p>Second.</p></body>",
            )
            .build();

        let source = epub::read_entry_string(&epub, "OEBPS/ch1.xhtml").unwrap();
        let mut segments =
            segmenter::segment_document(&source, "OEBPS/ch1.xhtml", SchemaVersion::V2, 6000);
        let translations = ["<h1>عنوان</h1>", "<p>أولا.</p><p>ثانيا.</p>"];
        for (segment, translated) in segments.iter_mut().zip(translations) {
            segment.status = SegmentStatus::Translated;
            segment.translated_html = translated.to_string();
        }

        let rebuilt = reassemble_book(
            &epub,
            &segments,
            SchemaVersion::V2,
            6000,
            None,
            &rtl_options(),
        )
        .unwrap();

        // Re-importing the export yields the same batch boundaries with
        // the previous translations as the new originals.
        let exported_doc = epub::read_entry_string(&rebuilt, "OEBPS/ch1.xhtml").unwrap();
        let reimported =
            segmenter::segment_document(&exported_doc, "OEBPS/ch1.xhtml", SchemaVersion::V2, 6000);
        assert_eq!(reimported.len(), segments.len());
        assert!(reimported[0].original_html.contains("عنوان"));
        assert!(reimported[1].original_html.contains("أولا"));
    }
}
