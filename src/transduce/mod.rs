//! Streaming XML → JSON transducer.
//!
//! Bytes arrive in arbitrary chunks through [`XmlToJson::feed`]. Only the
//! first `<component>` element outside an already captured subtree is
//! converted; everything else is parsed for well-formedness and dropped.
//!
//! Conversion rules:
//! - attributes become string members, set when the element opens
//! - a child name seen twice under one parent folds into an array
//! - trimmed text replaces an empty element, extends a text element, or
//!   goes under `#text` when the element has attributes or children
//! - an element that never gets content becomes `{}`
//!
//! Text ending in `.jpg`, `.jpeg` or `.png` is also handed to the asset
//! callback, in document order.

mod arena;

use std::path::{Path, PathBuf};

use quick_xml::errors::SyntaxError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::Value;

use self::arena::{Arena, NodeId};
use crate::error::{Result, ReviewError};
use crate::fetch::ChunkSink;

pub use self::arena::TEXT_KEY;

/// Name of the element whose subtree is captured
pub const CAPTURE_ELEMENT: &str = "component";

/// File suffixes that mark a text fragment as an asset reference
pub const ASSET_SUFFIXES: [&str; 3] = [".jpg", ".jpeg", ".png"];

type AssetCallback = Box<dyn FnMut(&str) + Send>;

/// Whether a text fragment names an image asset
pub fn is_asset_reference(text: &str) -> bool {
    ASSET_SUFFIXES.iter().any(|suffix| text.ends_with(suffix))
}

fn trim_xml(text: &str) -> &str {
    text.trim_matches([' ', '\t', '\n', '\r'])
}

/// Whether a syntax error in `tail` can still be cured by more input.
///
/// The slice reader only reports unclosed markup once it has run off the
/// end of the buffer. A bad `<!` construct is final unless the buffer
/// stops right after the `<!`.
fn may_complete(error: &SyntaxError, tail: &[u8]) -> bool {
    match error {
        SyntaxError::InvalidBangMarkup => tail.trim_ascii_start().len() <= 2,
        _ => true,
    }
}

/// Incremental converter from an XML document to the JSON of its
/// `<component>` subtree.
pub struct XmlToJson {
    output: PathBuf,
    on_asset: Option<AssetCallback>,
    /// Bytes not yet consumed by the tokenizer
    pending: Vec<u8>,
    arena: Arena,
    /// Object holding the captured `component`
    root: NodeId,
    /// Open elements of the captured subtree
    stack: Vec<NodeId>,
    /// Names of every open element in the document
    open: Vec<String>,
    captured: bool,
}

impl std::fmt::Debug for XmlToJson {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XmlToJson")
            .field("output", &self.output)
            .field("pending", &self.pending.len())
            .field("depth", &self.stack.len())
            .field("captured", &self.captured)
            .finish_non_exhaustive()
    }
}

impl XmlToJson {
    /// Create a transducer that writes its JSON to `output` on finish
    pub fn new(output: impl Into<PathBuf>) -> Self {
        let mut arena = Arena::new();
        let root = arena.object();
        Self {
            output: output.into(),
            on_asset: None,
            pending: Vec::new(),
            arena,
            root,
            stack: Vec::new(),
            open: Vec::new(),
            captured: false,
        }
    }

    /// Call `f` with every asset reference found in the captured subtree
    pub fn with_asset_callback<F>(mut self, f: F) -> Self
    where
        F: FnMut(&str) + Send + 'static,
    {
        self.on_asset = Some(Box::new(f));
        self
    }

    /// Where the JSON is written
    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Whether the capture element has been closed
    pub fn captured(&self) -> bool {
        self.captured
    }

    /// Depth inside the capture element (0 outside it)
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Feed the next slice of the document.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<()> {
        self.pending.extend_from_slice(bytes);
        self.drain(false)
    }

    /// End of input: flush, validate and write the captured JSON.
    pub fn finish(mut self) -> Result<Value> {
        self.drain(true)?;

        if !self.open.is_empty() {
            return Err(ReviewError::Transduce(format!(
                "unbalanced document: {} unclosed element(s), innermost <{}>",
                self.open.len(),
                self.open.last().map_or("", String::as_str),
            )));
        }
        if !self.captured {
            return Err(ReviewError::Transduce(format!("no <{CAPTURE_ELEMENT}> element captured")));
        }

        let value = self.arena.to_value(self.root);
        std::fs::write(&self.output, serde_json::to_vec(&value)?)?;
        tracing::info!(path = %self.output.display(), "Wrote captured JSON");
        Ok(value)
    }

    /// Tokenize as much of `pending` as is complete.
    ///
    /// Unless `last`, trailing text and unterminated markup stay buffered
    /// until more bytes arrive.
    fn drain(&mut self, last: bool) -> Result<()> {
        let pending = std::mem::take(&mut self.pending);
        let mut reader = Reader::from_reader(pending.as_slice());
        // Each drain sees only the unconsumed tail, so end tags are matched
        // against `open` here rather than by the tokenizer.
        let config = reader.config_mut();
        config.check_end_names = false;
        config.allow_unmatched_ends = true;

        let mut consumed = 0;
        let result = loop {
            let event = match reader.read_event() {
                Ok(event) => event,
                Err(quick_xml::Error::Syntax(e)) if !last && may_complete(&e, &pending[consumed..]) => {
                    tracing::trace!(error = %e, "Waiting for the rest of the markup");
                    break Ok(());
                },
                Err(e) => break Err(e.into()),
            };
            let mut position = usize::try_from(reader.buffer_position()).unwrap_or(pending.len());

            let step = match event {
                Event::Eof => break Ok(()),
                Event::Text(_) if !last && position >= pending.len() => break Ok(()),
                Event::Start(start) => self.open_element(&start),
                Event::Empty(start) => match self.open_element(&start) {
                    Ok(()) => self.close_element(start.name().as_ref()),
                    Err(e) => Err(e),
                },
                Event::End(end) => self.close_element(end.name().as_ref()),
                Event::Text(text) => {
                    // Text never ends in a literal '<'; if the tokenizer
                    // already stepped over the next markup opener, resume
                    // from it.
                    if position > 0 && pending[position - 1] == b'<' {
                        position -= 1;
                    }
                    match text.unescape() {
                        Ok(text) => self.text(&text),
                        Err(e) => Err(e.into()),
                    }
                },
                Event::CData(data) => match std::str::from_utf8(&data) {
                    Ok(text) => self.text(text),
                    Err(e) => Err(ReviewError::Xml(e.to_string())),
                },
                _ => Ok(()),
            };
            if let Err(e) = step {
                break Err(e);
            }
            consumed = position;
        };

        drop(reader);
        self.pending = pending;
        self.pending.drain(..consumed.min(self.pending.len()));
        result
    }

    fn open_element(&mut self, start: &BytesStart<'_>) -> Result<()> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();

        let capturing = !self.stack.is_empty();
        let begins_capture = !capturing && !self.captured && name == CAPTURE_ELEMENT;
        if capturing || begins_capture {
            let mut attributes = Vec::new();
            for attr in start.attributes() {
                let attr = attr.map_err(|e| ReviewError::Xml(e.to_string()))?;
                let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                let value = attr.unescape_value()?.into_owned();
                attributes.push((key, value));
            }

            let node = self.arena.element(attributes);
            let parent = self.stack.last().copied().unwrap_or(self.root);
            self.arena.insert_child(parent, &name, node)?;
            self.stack.push(node);
            if begins_capture {
                tracing::debug!("Capture started");
            }
        }

        self.open.push(name);
        Ok(())
    }

    fn close_element(&mut self, name: &[u8]) -> Result<()> {
        let name = String::from_utf8_lossy(name);
        match self.open.pop() {
            Some(open) if open == name => {},
            Some(open) => {
                return Err(ReviewError::Xml(format!("expected </{open}>, found </{name}>")));
            },
            None => return Err(ReviewError::Xml(format!("unexpected </{name}>"))),
        }

        if self.stack.pop().is_some() && self.stack.is_empty() {
            self.captured = true;
            tracing::debug!("Capture finished");
        }
        Ok(())
    }

    fn text(&mut self, raw: &str) -> Result<()> {
        let Some(&current) = self.stack.last() else {
            return Ok(());
        };
        let text = trim_xml(raw);
        if text.is_empty() {
            return Ok(());
        }

        self.arena.append_text(current, text)?;
        if is_asset_reference(text) {
            if let Some(on_asset) = self.on_asset.as_mut() {
                on_asset(text);
            }
        }
        Ok(())
    }
}

impl ChunkSink for XmlToJson {
    fn on_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.feed(chunk)
    }
}

/// A transducer attached to a download.
///
/// The first transducer error is kept and later chunks are skipped, so the
/// download itself always runs to completion. The error surfaces from
/// [`Transduction::finish`].
#[derive(Debug)]
pub struct Transduction {
    transducer: XmlToJson,
    error: Option<ReviewError>,
}

impl Transduction {
    /// Wrap a transducer
    pub fn new(transducer: XmlToJson) -> Self {
        Self {
            transducer,
            error: None,
        }
    }

    /// Whether a chunk has been rejected
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }

    /// The first error, or the transducer's own `finish`.
    pub fn finish(self) -> Result<Value> {
        match self.error {
            Some(e) => Err(e),
            None => self.transducer.finish(),
        }
    }
}

impl ChunkSink for Transduction {
    fn on_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        if self.error.is_none() {
            if let Err(e) = self.transducer.feed(chunk) {
                tracing::warn!(error = %e, output = %self.transducer.output().display(), "Transduction failed, download continues");
                self.error = Some(e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn run(xml: &str) -> Result<Value> {
        let dir = tempfile::tempdir().unwrap();
        let mut t = XmlToJson::new(dir.path().join("out.json"));
        t.feed(xml.as_bytes())?;
        t.finish()
    }

    #[test]
    fn test_array_folding() {
        let value = run("<component><a><b>1</b><b>2</b></a></component>").unwrap();
        assert_eq!(value, json!({"component": {"a": {"b": ["1", "2"]}}}));
    }

    #[test]
    fn test_mixed_text_and_children() {
        let value = run("<component><a>text<b/></a></component>").unwrap();
        assert_eq!(value, json!({"component": {"a": {"#text": "text", "b": {}}}}));
    }

    #[test]
    fn test_capture_once() {
        let value = run(
            "<report><component><x>1</x></component><component><y>2</y></component></report>",
        )
        .unwrap();
        assert_eq!(value, json!({"component": {"x": "1"}}));
    }

    #[test]
    fn test_capture_nested_in_document() {
        let xml = r#"<?xml version="1.0"?>
            <report version="2">
              <header>ignored</header>
              <body><component id="c1" kind="board">
                <part ref="R1">  img/r1.png  </part>
                <part ref="R2"/>
              </component></body>
            </report>"#;
        let value = run(xml).unwrap();
        assert_eq!(
            value,
            json!({"component": {
                "id": "c1",
                "kind": "board",
                "part": [{"ref": "R1", "#text": "img/r1.png"}, {"ref": "R2"}]
            }})
        );
    }

    #[test]
    fn test_entities_and_cdata() {
        let value = run("<component><a>x &amp; y</a><b><![CDATA[<raw>]]></b></component>").unwrap();
        assert_eq!(value, json!({"component": {"a": "x & y", "b": "<raw>"}}));
    }

    #[test]
    fn test_missing_component() {
        let err = run("<report><a/></report>").unwrap_err();
        assert!(matches!(err, ReviewError::Transduce(_)));
    }

    #[test]
    fn test_unbalanced_document() {
        let err = run("<report><component><a>1</a></component>").unwrap_err();
        assert!(matches!(err, ReviewError::Transduce(_)));
    }

    #[test]
    fn test_mismatched_close() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = XmlToJson::new(dir.path().join("out.json"));
        assert!(matches!(t.feed(b"<component><a></b>"), Err(ReviewError::Xml(_))));
    }

    #[test]
    fn test_truncated_markup_fails_on_finish() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = XmlToJson::new(dir.path().join("out.json"));
        t.feed(b"<component><a>1</a></compo").unwrap();
        assert!(t.finish().is_err());
    }

    #[test]
    fn test_asset_callback_order() {
        let dir = tempfile::tempdir().unwrap();
        let found = Arc::new(Mutex::new(Vec::new()));
        let sink = found.clone();
        let mut t = XmlToJson::new(dir.path().join("out.json"))
            .with_asset_callback(move |asset| sink.lock().unwrap().push(asset.to_string()));

        t.feed(b"<r><img>outside.png</img><component><a>a.jpg</a><b>b.JPG</b>")
            .unwrap();
        t.feed(b"<c>c.jpeg</c><d>notes.txt</d><e>e.png</e></component></r>")
            .unwrap();
        t.finish().unwrap();

        assert_eq!(*found.lock().unwrap(), vec!["a.jpg", "c.jpeg", "e.png"]);
    }

    #[test]
    fn test_finish_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let mut t = XmlToJson::new(&path);
        t.feed(b"<component><a>1</a></component>").unwrap();
        t.finish().unwrap();

        let written: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written, json!({"component": {"a": "1"}}));
    }

    #[test]
    fn test_depth_tracks_capture() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = XmlToJson::new(dir.path().join("out.json"));
        t.feed(b"<r><component><a>").unwrap();
        assert_eq!(t.depth(), 2);
        t.feed(b"</a></component>").unwrap();
        assert_eq!(t.depth(), 0);
        assert!(t.captured());
    }

    #[test]
    fn test_close_tag_in_later_feed() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = XmlToJson::new(dir.path().join("out.json"));
        t.feed(b"<component><a>1</a>").unwrap();
        t.feed(b"</component>").unwrap();
        assert!(t.captured());
        assert_eq!(t.finish().unwrap(), json!({"component": {"a": "1"}}));
    }

    #[test]
    fn test_mismatched_close_in_later_feed() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = XmlToJson::new(dir.path().join("out.json"));
        t.feed(b"<component><a>").unwrap();
        assert!(matches!(t.feed(b"</b>"), Err(ReviewError::Xml(_))));
    }

    #[test]
    fn test_bad_markup_fails_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = XmlToJson::new(dir.path().join("out.json"));
        assert!(t.feed(b"<r><component><a>1</a><!bogus>").is_err());
    }

    #[test]
    fn test_bad_markup_split_after_bang_fails_on_next_feed() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = XmlToJson::new(dir.path().join("out.json"));
        t.feed(b"<r><component><a>1</a><!").unwrap();
        assert_eq!(t.pending.len(), 2);
        assert!(t.feed(b"bogus><b>2</b>").is_err());
    }

    #[test]
    fn test_cdata_split_after_bang() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = XmlToJson::new(dir.path().join("out.json"));
        t.feed(b"<r><component><a><!").unwrap();
        t.feed(b"[CDATA[x<y]]></a></component></r>").unwrap();
        assert_eq!(t.finish().unwrap(), json!({"component": {"a": "x<y"}}));
    }

    #[test]
    fn test_pending_stays_small_across_feeds() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = XmlToJson::new(dir.path().join("out.json"));
        t.feed(b"<r><component>").unwrap();
        for _ in 0..500 {
            t.feed(b"<b>2</b>").unwrap();
            assert!(t.pending.len() < 8);
        }
        t.feed(b"</component></r>").unwrap();
        let value = t.finish().unwrap();
        assert_eq!(value["component"]["b"].as_array().map(Vec::len), Some(500));
    }

    #[test]
    fn test_transduction_keeps_first_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = Transduction::new(XmlToJson::new(dir.path().join("out.json")));
        sink.on_chunk(b"<component><a></b>").unwrap();
        assert!(sink.failed());
        sink.on_chunk(b"</component>").unwrap();
        assert!(matches!(sink.finish(), Err(ReviewError::Xml(_))));
        assert!(!dir.path().join("out.json").exists());
    }

    #[test]
    fn test_transduction_success() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = Transduction::new(XmlToJson::new(dir.path().join("out.json")));
        sink.on_chunk(b"<component><a>").unwrap();
        sink.on_chunk(b"1</a></component>").unwrap();
        assert!(!sink.failed());
        assert_eq!(sink.finish().unwrap(), json!({"component": {"a": "1"}}));
    }

    const DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<report>
  <meta>skip &amp; me</meta>
  <component name="U1" side="top">
    <image>views/top.png</image>
    <defect id="1"><kind>solder</kind><photo>d/1.jpg</photo></defect>
    <defect id="2"><kind>bridge</kind>note<photo>d/2.jpeg</photo></defect>
    <empty/>
  </component>
  <component name="U2"/>
</report>
"#;

    proptest! {
        #[test]
        fn prop_chunking_does_not_change_output(cuts in proptest::collection::vec(0usize..DOC.len(), 0..12)) {
            let whole = run(DOC).unwrap();

            let mut cuts = cuts;
            cuts.sort_unstable();
            let dir = tempfile::tempdir().unwrap();
            let mut t = XmlToJson::new(dir.path().join("out.json"));
            let bytes = DOC.as_bytes();
            let mut start = 0;
            for cut in cuts {
                t.feed(&bytes[start..cut]).unwrap();
                start = cut;
            }
            t.feed(&bytes[start..]).unwrap();
            prop_assert_eq!(t.finish().unwrap(), whole);
        }
    }
}
