use quick_xml::escape::{escape, partial_escape};
use quick_xml::events::{BytesDecl, BytesStart, Event};
use quick_xml::Reader;

use crate::error::DocxError;

#[derive(Clone, Debug, PartialEq)]
pub enum XmlEvent {
    Decl {
        version: String,
        encoding: Option<String>,
        standalone: Option<String>,
    },
    Start {
        name: String,
        attrs: Vec<(String, String)>,
    },
    End {
        name: String,
    },
    Empty {
        name: String,
        attrs: Vec<(String, String)>,
    },
    Text {
        text: String,
    },
    CData {
        text: String,
    },
    Comment {
        text: String,
    },
    PI {
        content: String,
    },
    DocType {
        text: String,
    },
}

impl XmlEvent {
    /// Element name for `Start`/`Empty`/`End`, otherwise `None`.
    pub fn name(&self) -> Option<&str> {
        match self {
            XmlEvent::Start { name, .. } | XmlEvent::Empty { name, .. } | XmlEvent::End { name } => {
                Some(name.as_str())
            }
            _ => None,
        }
    }

    pub fn attrs(&self) -> &[(String, String)] {
        match self {
            XmlEvent::Start { attrs, .. } | XmlEvent::Empty { attrs, .. } => attrs,
            _ => &[],
        }
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        find_attr(self.attrs(), key)
    }

    pub fn is_open(&self, tag: &str) -> bool {
        matches!(self, XmlEvent::Start { name, .. } | XmlEvent::Empty { name, .. } if name == tag)
    }
}

#[derive(Clone, Debug)]
pub struct XmlPart {
    pub name: String,
    pub events: Vec<XmlEvent>,
}

pub fn find_attr<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

pub fn parse_xml_part(name: &str, xml_bytes: &[u8]) -> Result<XmlPart, DocxError> {
    let mut reader = Reader::from_reader(xml_bytes);
    reader.config_mut().trim_text(false);

    let mut events: Vec<XmlEvent> = Vec::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let ev = reader
            .read_event_into(&mut buf)
            .map_err(|e| DocxError::xml(name, format!("read event: {e}")))?;
        match ev {
            Event::Eof => break,
            Event::Decl(d) => {
                let version = bytes_to_string(
                    d.version()
                        .map_err(|e| DocxError::xml(name, format!("decl version: {e}")))?,
                );
                let encoding = d
                    .encoding()
                    .map(|r| r.map(bytes_to_string))
                    .transpose()
                    .unwrap_or(None);
                let standalone = d
                    .standalone()
                    .map(|r| r.map(bytes_to_string))
                    .transpose()
                    .unwrap_or(None);
                events.push(XmlEvent::Decl {
                    version,
                    encoding,
                    standalone,
                });
            }
            Event::Start(s) => {
                events.push(XmlEvent::Start {
                    name: bytes_to_string(s.name().as_ref()),
                    attrs: collect_attrs(name, &s)?,
                });
            }
            Event::End(e) => {
                events.push(XmlEvent::End {
                    name: bytes_to_string(e.name().as_ref()),
                });
            }
            Event::Empty(s) => {
                events.push(XmlEvent::Empty {
                    name: bytes_to_string(s.name().as_ref()),
                    attrs: collect_attrs(name, &s)?,
                });
            }
            Event::Text(t) => {
                let txt = t
                    .unescape()
                    .map_err(|e| DocxError::xml(name, format!("unescape text: {e}")))?
                    .into_owned();
                events.push(XmlEvent::Text { text: txt });
            }
            Event::CData(t) => {
                events.push(XmlEvent::CData {
                    text: bytes_to_string(t.into_inner()),
                });
            }
            Event::Comment(t) => {
                events.push(XmlEvent::Comment {
                    text: bytes_to_string(t.into_inner()),
                });
            }
            Event::PI(t) => {
                let target = bytes_to_string(t.target());
                let content = bytes_to_string(t.content());
                events.push(XmlEvent::PI {
                    content: format!("{target}{content}"),
                });
            }
            Event::DocType(t) => {
                events.push(XmlEvent::DocType {
                    text: bytes_to_string(t.into_inner()),
                });
            }
        }
    }

    Ok(XmlPart {
        name: name.to_string(),
        events,
    })
}

fn collect_attrs(part: &str, s: &BytesStart<'_>) -> Result<Vec<(String, String)>, DocxError> {
    let mut attrs: Vec<(String, String)> = Vec::new();
    for a in s.attributes() {
        let a = a.map_err(|e| DocxError::xml(part, format!("attr: {e}")))?;
        // Raw (still escaped) bytes; values such as VML `o:gfxdata` carry character
        // references that must survive a write unchanged.
        attrs.push((
            bytes_to_string(a.key.as_ref()),
            bytes_to_string(a.value.as_ref()),
        ));
    }
    Ok(attrs)
}

fn bytes_to_string(bytes: impl AsRef<[u8]>) -> String {
    String::from_utf8_lossy(bytes.as_ref()).into_owned()
}

/// Escape a value for use inside a double-quoted attribute.
pub fn escape_attr(value: &str) -> String {
    escape(value).into_owned()
}

pub fn write_xml_part(part: &XmlPart) -> Result<Vec<u8>, DocxError> {
    let mut out: Vec<u8> = Vec::new();

    fn escape_text_into(out: &mut Vec<u8>, text: &str) {
        out.extend_from_slice(partial_escape(text).as_bytes());
    }

    fn write_start_like(out: &mut Vec<u8>, name: &str, attrs: &[(String, String)], empty: bool) {
        out.extend_from_slice(b"<");
        out.extend_from_slice(name.as_bytes());
        // Stored values are already escaped.
        for (k, v) in attrs {
            out.extend_from_slice(b" ");
            out.extend_from_slice(k.as_bytes());
            out.extend_from_slice(b"=\"");
            out.extend_from_slice(v.as_bytes());
            out.extend_from_slice(b"\"");
        }
        if empty {
            out.extend_from_slice(b"/>");
        } else {
            out.extend_from_slice(b">");
        }
    }

    for ev in &part.events {
        match ev {
            XmlEvent::Decl {
                version,
                encoding,
                standalone,
            } => {
                let d =
                    BytesDecl::new(version.as_str(), encoding.as_deref(), standalone.as_deref());
                let mut writer = quick_xml::Writer::new(Vec::new());
                writer
                    .write_event(Event::Decl(d))
                    .map_err(|e| DocxError::xml(&part.name, format!("write decl: {e}")))?;
                out.extend_from_slice(&writer.into_inner());
            }
            XmlEvent::Start { name, attrs } => write_start_like(&mut out, name, attrs, false),
            XmlEvent::End { name } => {
                out.extend_from_slice(b"</");
                out.extend_from_slice(name.as_bytes());
                out.extend_from_slice(b">");
            }
            XmlEvent::Empty { name, attrs } => write_start_like(&mut out, name, attrs, true),
            XmlEvent::Text { text } => escape_text_into(&mut out, text),
            XmlEvent::CData { text } => {
                out.extend_from_slice(b"<![CDATA[");
                out.extend_from_slice(text.as_bytes());
                out.extend_from_slice(b"]]>");
            }
            XmlEvent::Comment { text } => {
                out.extend_from_slice(b"<!--");
                out.extend_from_slice(text.as_bytes());
                out.extend_from_slice(b"-->");
            }
            XmlEvent::PI { content } => {
                out.extend_from_slice(b"<?");
                out.extend_from_slice(content.as_bytes());
                out.extend_from_slice(b"?>");
            }
            XmlEvent::DocType { text } => {
                out.extend_from_slice(b"<!DOCTYPE");
                out.extend_from_slice(text.as_bytes());
                out.extend_from_slice(b">");
            }
        }
    }

    Ok(out)
}

/// Element index over a flat event list.
///
/// `ends[i]` is the index of the `End` event closing the `Start` at `i`; for `Empty`
/// events and non-element events it is `i` itself. Unbalanced markup closes at the last
/// event rather than failing.
pub struct XmlTree<'a> {
    pub part: &'a XmlPart,
    ends: Vec<usize>,
}

impl<'a> XmlTree<'a> {
    pub fn new(part: &'a XmlPart) -> Self {
        let n = part.events.len();
        let mut ends: Vec<usize> = (0..n).collect();
        let mut stack: Vec<usize> = Vec::new();
        for (idx, ev) in part.events.iter().enumerate() {
            match ev {
                XmlEvent::Start { .. } => stack.push(idx),
                XmlEvent::End { .. } => {
                    if let Some(open) = stack.pop() {
                        ends[open] = idx;
                    }
                }
                _ => {}
            }
        }
        for open in stack {
            ends[open] = n.saturating_sub(1);
        }
        Self { part, ends }
    }

    pub fn event(&self, idx: usize) -> &'a XmlEvent {
        &self.part.events[idx]
    }

    pub fn end_of(&self, idx: usize) -> usize {
        self.ends[idx]
    }

    /// First element anywhere in the part with the given name.
    pub fn find_first(&self, tag: &str) -> Option<usize> {
        self.part.events.iter().position(|ev| ev.is_open(tag))
    }

    /// Direct element children (`Start` or `Empty`) of the element at `idx`, in order.
    pub fn children(&self, idx: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let end = self.end_of(idx);
        let mut i = idx + 1;
        while i < end {
            match &self.part.events[i] {
                XmlEvent::Start { .. } => {
                    out.push(i);
                    i = self.end_of(i) + 1;
                }
                XmlEvent::Empty { .. } => {
                    out.push(i);
                    i += 1;
                }
                _ => i += 1,
            }
        }
        out
    }

    pub fn child_named(&self, idx: usize, tag: &str) -> Option<usize> {
        self.children(idx)
            .into_iter()
            .find(|&c| self.part.events[c].is_open(tag))
    }

    pub fn children_named(&self, idx: usize, tag: &str) -> Vec<usize> {
        self.children(idx)
            .into_iter()
            .filter(|&c| self.part.events[c].is_open(tag))
            .collect()
    }

    /// All descendant elements named `tag`, in document order (nested matches included).
    pub fn descendants_named(&self, idx: usize, tag: &str) -> Vec<usize> {
        let end = self.end_of(idx);
        (idx + 1..end)
            .filter(|&i| self.part.events[i].is_open(tag))
            .collect()
    }

    /// Concatenated `Text`/`CData` content directly inside the element at `idx`.
    pub fn text_of(&self, idx: usize) -> String {
        let mut out = String::new();
        let end = self.end_of(idx);
        for ev in &self.part.events[idx + 1..end.max(idx + 1)] {
            match ev {
                XmlEvent::Text { text } | XmlEvent::CData { text } => out.push_str(text),
                _ => {}
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_values_are_escaped() {
        assert_eq!(escape_attr("plain"), "plain");
        assert_eq!(escape_attr(r#"a&b<c>"d""#), "a&amp;b&lt;c&gt;&quot;d&quot;");
    }

    #[test]
    fn write_preserves_attr_entity_refs() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?><root xmlns:o="urn:test" o:gfxdata="A&#xD;&#xA;B"/>"#;
        let part = parse_xml_part("test.xml", xml).expect("parse xml");
        let out = write_xml_part(&part).expect("write xml");
        let s = String::from_utf8(out).expect("utf8");

        assert!(s.contains(r#"o:gfxdata="A&#xD;&#xA;B""#));
        assert!(!s.contains(r#"o:gfxdata="A&amp;#xD;"#));
    }

    #[test]
    fn tree_children_skip_nested_elements() {
        let xml = br#"<a><b><c/></b><d>x</d><e/></a>"#;
        let part = parse_xml_part("t.xml", xml).expect("parse");
        let tree = XmlTree::new(&part);
        let root = tree.find_first("a").expect("root");
        let names: Vec<&str> = tree
            .children(root)
            .into_iter()
            .filter_map(|i| tree.event(i).name())
            .collect();
        assert_eq!(names, vec!["b", "d", "e"]);
        let d = tree.child_named(root, "d").expect("d");
        assert_eq!(tree.text_of(d), "x");
        assert_eq!(tree.descendants_named(root, "c").len(), 1);
    }

    #[test]
    fn roundtrip_is_lossless_for_plain_markup() {
        let xml = br#"<w:p><w:r><w:t xml:space="preserve"> a &amp; b </w:t></w:r></w:p>"#;
        let part = parse_xml_part("t.xml", xml).expect("parse");
        let out = write_xml_part(&part).expect("write");
        assert_eq!(out, xml.to_vec());
    }
}
