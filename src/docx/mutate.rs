//! Document Mutation Engine: in-place paragraph replacement and insertion on a cloned
//! package, writing the result atomically.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use once_cell::sync::Lazy;
use tracing::debug;

use super::model::{build_blocks, load_styles, Block};
use super::package::{DocxPackage, DOCUMENT_PART};
use super::styles::StyleCatalog;
use super::tables::{paragraph_text, run_elements, ParagraphIndex};
use super::xml::{escape_attr, parse_xml_part, write_xml_part, XmlEvent, XmlPart, XmlTree};
use crate::anchor::{ParagraphSource, PatchAction};
use crate::error::{DocxError, PatchError};

/// Run properties carried from the anchor's first run onto the written run, in schema order.
/// `w:highlight` is emitted between `w:szCs` and `w:u`.
const LEADING_RUN_PROPS: [&str; 6] = ["w:rStyle", "w:rFonts", "w:b", "w:i", "w:sz", "w:szCs"];
const TRAILING_RUN_PROPS: [&str; 1] = ["w:u"];

/// Editable copy of a target document. The source package is never modified.
pub struct WorkingDocument {
    package: DocxPackage,
    document: XmlPart,
    styles: StyleCatalog,
    highlight: String,
}

impl WorkingDocument {
    pub fn open(pkg: &DocxPackage, highlight: &str) -> Result<Self, DocxError> {
        let document = parse_xml_part(DOCUMENT_PART, pkg.require_part(DOCUMENT_PART)?)?;
        let styles = load_styles(pkg)?;
        Ok(Self {
            package: pkg.clone(),
            document,
            styles,
            highlight: highlight.to_string(),
        })
    }

    pub fn document_part(&self) -> &XmlPart {
        &self.document
    }

    pub fn paragraph_count(&self) -> usize {
        let tree = XmlTree::new(&self.document);
        ParagraphIndex::new(&tree).len()
    }

    /// Block tree of the current state, for rebuilding a structure map.
    pub fn blocks(&self) -> Vec<Block> {
        build_blocks(&self.document, &self.styles)
    }

    fn paragraph_bounds(&self, position: usize) -> Result<(usize, usize), PatchError> {
        let tree = XmlTree::new(&self.document);
        let index = ParagraphIndex::new(&tree);
        let start = index
            .event_index(position)
            .ok_or(PatchError::InvalidAnchor { position })?;
        Ok((start, tree.end_of(start)))
    }

    /// Clear the paragraph at `position` (paragraph properties kept) and write `text` as a
    /// single highlighted run formatted like the paragraph's first run.
    pub fn replace_text(&mut self, position: usize, text: &str) -> Result<(), PatchError> {
        let (start, end) = self.paragraph_bounds(position)?;
        let tree = XmlTree::new(&self.document);

        let (name, attrs) = match tree.event(start) {
            XmlEvent::Start { name, attrs } | XmlEvent::Empty { name, attrs } => {
                (name.clone(), attrs.clone())
            }
            _ => return Err(PatchError::InvalidAnchor { position }),
        };
        let mut events = vec![XmlEvent::Start {
            name: name.clone(),
            attrs,
        }];
        if let Some(ppr) = tree.child_named(start, "w:pPr") {
            events.extend(self.document.events[ppr..=tree.end_of(ppr)].iter().cloned());
        }
        events.extend(new_run(&run_template(&tree, start), text, &self.highlight));
        events.push(XmlEvent::End { name });

        self.document.events.splice(start..=end, events);
        debug!(position, "replaced paragraph text");
        Ok(())
    }

    /// Insert a new paragraph holding `text` directly after the paragraph at `position`.
    /// The new paragraph copies the anchor's properties except any section break.
    /// Returns the new paragraph's position.
    pub fn insert_after(&mut self, position: usize, text: &str) -> Result<usize, PatchError> {
        let (start, end) = self.paragraph_bounds(position)?;
        let tree = XmlTree::new(&self.document);

        let mut events = vec![XmlEvent::Start {
            name: "w:p".to_string(),
            attrs: Vec::new(),
        }];
        if let Some(ppr) = tree.child_named(start, "w:pPr") {
            events.extend(copy_without(&tree, ppr, "w:sectPr"));
        }
        events.extend(new_run(&run_template(&tree, start), text, &self.highlight));
        events.push(XmlEvent::End {
            name: "w:p".to_string(),
        });

        let at = end + 1;
        self.document.events.splice(at..at, events);

        let tree = XmlTree::new(&self.document);
        let new_position = ParagraphIndex::new(&tree)
            .position_of(at)
            .ok_or(PatchError::InvalidAnchor { position })?;
        debug!(anchor = position, new_position, "inserted paragraph");
        Ok(new_position)
    }

    /// Apply one planned action. Returns the position written, `None` for a skip.
    pub fn apply(&mut self, action: &PatchAction) -> Result<Option<usize>, PatchError> {
        match action {
            PatchAction::Replace { anchor, text } => {
                self.replace_text(anchor.document_position, text)?;
                Ok(Some(anchor.document_position))
            }
            PatchAction::InsertAfter { anchor, text } => {
                self.insert_after(anchor.document_position, text).map(Some)
            }
            PatchAction::Skip { .. } => Ok(None),
        }
    }

    /// Serialize the mutated document into a copy of the original package. Only
    /// `word/document.xml` differs from the source.
    pub fn save(&self, output_path: &Path) -> Result<(), PatchError> {
        let mut replacements = HashMap::new();
        replacements.insert(DOCUMENT_PART.to_string(), write_xml_part(&self.document)?);
        self.package.write_atomic(output_path, &replacements)?;
        Ok(())
    }
}

impl ParagraphSource for WorkingDocument {
    fn paragraph_text(&self, position: usize) -> Option<String> {
        let tree = XmlTree::new(&self.document);
        let index = ParagraphIndex::new(&tree);
        index
            .event_index(position)
            .map(|ev| paragraph_text(&tree, ev))
    }
}

/// Formatting elements of the first run of a paragraph, split around the highlight slot.
#[derive(Default)]
struct RunTemplate {
    leading: Vec<XmlEvent>,
    trailing: Vec<XmlEvent>,
}

fn run_template(tree: &XmlTree<'_>, paragraph: usize) -> RunTemplate {
    let mut template = RunTemplate::default();
    let Some(first) = run_elements(tree, paragraph).into_iter().next() else {
        return template;
    };
    let Some(rpr) = tree.child_named(first, "w:rPr") else {
        return template;
    };
    let events = &tree.part.events;
    for tag in LEADING_RUN_PROPS {
        if let Some(c) = tree.child_named(rpr, tag) {
            template.leading.extend(events[c..=tree.end_of(c)].iter().cloned());
        }
    }
    for tag in TRAILING_RUN_PROPS {
        if let Some(c) = tree.child_named(rpr, tag) {
            template.trailing.extend(events[c..=tree.end_of(c)].iter().cloned());
        }
    }
    template
}

fn new_run(template: &RunTemplate, text: &str, highlight: &str) -> Vec<XmlEvent> {
    let mut out = vec![
        XmlEvent::Start {
            name: "w:r".to_string(),
            attrs: Vec::new(),
        },
        XmlEvent::Start {
            name: "w:rPr".to_string(),
            attrs: Vec::new(),
        },
    ];
    out.extend(template.leading.iter().cloned());
    if !highlight.trim().is_empty() {
        out.push(XmlEvent::Empty {
            name: "w:highlight".to_string(),
            attrs: vec![("w:val".to_string(), escape_attr(highlight.trim()))],
        });
    }
    out.extend(template.trailing.iter().cloned());
    out.push(XmlEvent::End {
        name: "w:rPr".to_string(),
    });

    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            out.push(XmlEvent::Empty {
                name: "w:br".to_string(),
                attrs: Vec::new(),
            });
        }
        out.push(XmlEvent::Start {
            name: "w:t".to_string(),
            attrs: vec![("xml:space".to_string(), "preserve".to_string())],
        });
        out.push(XmlEvent::Text {
            text: line.to_string(),
        });
        out.push(XmlEvent::End {
            name: "w:t".to_string(),
        });
    }
    out.push(XmlEvent::End {
        name: "w:r".to_string(),
    });
    out
}

/// Events of the element at `idx` with every `tag` subtree removed.
fn copy_without(tree: &XmlTree<'_>, idx: usize, tag: &str) -> Vec<XmlEvent> {
    let mut out = Vec::new();
    let end = tree.end_of(idx);
    let mut i = idx;
    while i <= end {
        let ev = tree.event(i);
        if ev.is_open(tag) {
            i = tree.end_of(i) + 1;
            continue;
        }
        out.push(ev.clone());
        i += 1;
    }
    out
}

static ACTIVE_OUTPUTS: Lazy<Mutex<HashSet<PathBuf>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Exclusive claim on an output path for the lifetime of one job.
#[derive(Debug)]
pub struct OutputLock {
    key: PathBuf,
}

impl OutputLock {
    pub fn acquire(output_path: &Path) -> Result<Self, PatchError> {
        let key = lock_key(output_path);
        let mut active = ACTIVE_OUTPUTS.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(key.clone()) {
            return Err(PatchError::OutputLocked(output_path.to_path_buf()));
        }
        Ok(Self { key })
    }
}

impl Drop for OutputLock {
    fn drop(&mut self) {
        let mut active = ACTIVE_OUTPUTS.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.key);
    }
}

fn lock_key(path: &Path) -> PathBuf {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    match (parent.canonicalize(), path.file_name()) {
        (Ok(dir), Some(name)) => dir.join(name),
        _ => path.to_path_buf(),
    }
}
