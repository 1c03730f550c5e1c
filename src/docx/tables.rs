//! Structural parse of `word/document.xml`: body paragraphs and (nested) tables,
//! read purely from tag structure.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::rpr::{read_rpr, RawRunProps};
use super::xml::{XmlEvent, XmlTree};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alignment {
    Left,
    Center,
    Right,
    Justify,
    Distribute,
    Unknown,
}

impl Alignment {
    fn from_jc(val: Option<&str>) -> Self {
        match val.map(str::trim) {
            Some("left") | Some("start") => Self::Left,
            Some("center") => Self::Center,
            Some("right") | Some("end") => Self::Right,
            Some("both") => Self::Justify,
            Some("distribute") => Self::Distribute,
            _ => Self::Unknown,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ParsedRun {
    pub text: String,
    pub props: RawRunProps,
}

#[derive(Clone, Debug)]
pub struct ParsedParagraph {
    pub event_index: usize,
    /// Ordinal of this paragraph among all body paragraphs, see [`ParagraphIndex`].
    pub position: usize,
    pub style_id: Option<String>,
    pub alignment: Alignment,
    pub runs: Vec<ParsedRun>,
}

impl ParsedParagraph {
    pub fn text(&self) -> String {
        self.runs.iter().map(|r| r.text.as_str()).collect()
    }
}

#[derive(Clone, Debug)]
pub enum CellItem {
    Paragraph(ParsedParagraph),
    Table(ParsedTable),
}

#[derive(Clone, Debug, Default)]
pub struct ParsedCell {
    pub items: Vec<CellItem>,
    /// Paragraphs were collected from all descendants because the cell had no direct
    /// paragraph children. In that case paragraphs owned by a nested table may be listed
    /// here as well.
    pub used_fallback: bool,
}

#[derive(Clone, Debug)]
pub struct ParsedTable {
    pub table_index: usize,
    pub rows: Vec<Vec<ParsedCell>>,
}

#[derive(Clone, Debug)]
pub enum BodyItem {
    Paragraph(ParsedParagraph),
    Table(ParsedTable),
}

/// Pre-order table numbering shared by every table in one document, nested ones included.
#[derive(Debug, Default)]
pub struct TableCounter {
    last: usize,
}

impl TableCounter {
    pub fn next_index(&mut self) -> usize {
        self.last += 1;
        self.last
    }
}

/// Ordinal positions of every `w:p` inside `w:body`, in document order.
///
/// Positions address paragraphs for the mutation engine; they count every paragraph
/// element, including those in table cells and empty ones.
pub struct ParagraphIndex {
    starts: Vec<usize>,
    by_event: HashMap<usize, usize>,
}

impl ParagraphIndex {
    pub fn new(tree: &XmlTree<'_>) -> Self {
        let starts: Vec<usize> = match tree.find_first("w:body") {
            Some(body) => tree.descendants_named(body, "w:p"),
            None => Vec::new(),
        };
        let by_event = starts.iter().enumerate().map(|(pos, &ev)| (ev, pos)).collect();
        Self { starts, by_event }
    }

    pub fn position_of(&self, event_index: usize) -> Option<usize> {
        self.by_event.get(&event_index).copied()
    }

    pub fn event_index(&self, position: usize) -> Option<usize> {
        self.starts.get(position).copied()
    }

    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }
}

/// Parse the direct block content of `w:body` in document order.
pub fn parse_body(tree: &XmlTree<'_>, index: &ParagraphIndex, counter: &mut TableCounter) -> Vec<BodyItem> {
    let Some(body) = tree.find_first("w:body") else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for child in block_children(tree, body) {
        let ev = tree.event(child);
        if ev.is_open("w:p") {
            out.push(BodyItem::Paragraph(parse_paragraph(tree, child, index)));
        } else if ev.is_open("w:tbl") {
            out.push(BodyItem::Table(parse_table(tree, child, counter, index)));
        }
    }
    out
}

/// Direct children of a block container, looking through content controls and custom
/// XML wrappers.
fn block_children(tree: &XmlTree<'_>, idx: usize) -> Vec<usize> {
    let mut out = Vec::new();
    for child in tree.children(idx) {
        match tree.event(child).name() {
            Some("w:sdt") => {
                if let Some(content) = tree.child_named(child, "w:sdtContent") {
                    out.extend(block_children(tree, content));
                }
            }
            Some("w:customXml") => out.extend(block_children(tree, child)),
            _ => out.push(child),
        }
    }
    out
}

/// Parse one `w:tbl`. The counter is advanced before this table's rows are visited, so
/// a table always numbers lower than any table nested inside it.
pub fn parse_table(
    tree: &XmlTree<'_>,
    idx: usize,
    counter: &mut TableCounter,
    index: &ParagraphIndex,
) -> ParsedTable {
    let table_index = counter.next_index();
    let mut rows = Vec::new();
    for tr in tree.children_named(idx, "w:tr") {
        let mut cells = Vec::new();
        for tc in tree.children_named(tr, "w:tc") {
            cells.push(parse_cell(tree, tc, counter, index));
        }
        rows.push(cells);
    }
    ParsedTable { table_index, rows }
}

fn parse_cell(
    tree: &XmlTree<'_>,
    tc: usize,
    counter: &mut TableCounter,
    index: &ParagraphIndex,
) -> ParsedCell {
    let mut cell = ParsedCell::default();
    let mut saw_paragraph = false;
    for child in block_children(tree, tc) {
        let ev = tree.event(child);
        if ev.is_open("w:p") {
            saw_paragraph = true;
            cell.items
                .push(CellItem::Paragraph(parse_paragraph(tree, child, index)));
        } else if ev.is_open("w:tbl") {
            cell.items
                .push(CellItem::Table(parse_table(tree, child, counter, index)));
        }
    }

    if !saw_paragraph {
        // Fallback: no direct paragraphs, so take every descendant paragraph. This can
        // pick up paragraphs that belong to a nested table.
        let found = tree.descendants_named(tc, "w:p");
        if !found.is_empty() {
            warn!(
                cell_event = tc,
                paragraphs = found.len(),
                "table cell without direct paragraphs, using descendant scan"
            );
            cell.used_fallback = true;
            for p in found {
                cell.items
                    .push(CellItem::Paragraph(parse_paragraph(tree, p, index)));
            }
        }
    }
    cell
}

pub fn parse_paragraph(tree: &XmlTree<'_>, idx: usize, index: &ParagraphIndex) -> ParsedParagraph {
    let mut style_id = None;
    let mut alignment = Alignment::Unknown;
    if let Some(ppr) = tree.child_named(idx, "w:pPr") {
        style_id = tree
            .child_named(ppr, "w:pStyle")
            .and_then(|s| tree.event(s).attr("w:val"))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        alignment = Alignment::from_jc(
            tree.child_named(ppr, "w:jc")
                .and_then(|j| tree.event(j).attr("w:val")),
        );
    }

    let mut runs = Vec::new();
    for r in run_elements(tree, idx) {
        runs.push(ParsedRun {
            text: run_text(tree, r),
            props: read_rpr(tree, tree.child_named(r, "w:rPr")),
        });
    }

    if runs.is_empty() {
        let text: String = tree
            .descendants_named(idx, "w:t")
            .into_iter()
            .map(|t| tree.text_of(t))
            .collect();
        if !text.is_empty() {
            runs.push(ParsedRun {
                text,
                props: RawRunProps::default(),
            });
        }
    }

    ParsedParagraph {
        event_index: idx,
        position: index.position_of(idx).unwrap_or(usize::MAX),
        style_id,
        alignment,
        runs,
    }
}

/// Runs of a paragraph: direct `w:r` children plus runs wrapped in inline containers.
pub fn run_elements(tree: &XmlTree<'_>, p: usize) -> Vec<usize> {
    let mut out = Vec::new();
    collect_runs(tree, p, &mut out);
    out
}

fn collect_runs(tree: &XmlTree<'_>, idx: usize, out: &mut Vec<usize>) {
    for child in tree.children(idx) {
        match tree.event(child).name() {
            Some("w:r") => out.push(child),
            Some("w:hyperlink") | Some("w:fldSimple") | Some("w:smartTag") | Some("w:ins") => {
                collect_runs(tree, child, out)
            }
            _ => {}
        }
    }
}

/// Visible text of a `w:r`.
pub fn run_text(tree: &XmlTree<'_>, r: usize) -> String {
    let mut out = String::new();
    for child in tree.children(r) {
        let ev = tree.event(child);
        match ev.name() {
            Some("w:t") => out.push_str(&tree.text_of(child)),
            Some("w:tab") | Some("w:ptab") => out.push('\t'),
            Some("w:cr") => out.push('\n'),
            Some("w:br") => {
                if ev.attr("w:type").unwrap_or("textWrapping") == "textWrapping" {
                    out.push('\n');
                }
            }
            Some("w:noBreakHyphen") => out.push('-'),
            _ => {}
        }
    }
    out
}

/// Visible text of the paragraph at `idx`, as the parser sees it.
pub fn paragraph_text(tree: &XmlTree<'_>, idx: usize) -> String {
    if matches!(tree.event(idx), XmlEvent::Empty { .. }) {
        return String::new();
    }
    let runs = run_elements(tree, idx);
    if runs.is_empty() {
        return tree
            .descendants_named(idx, "w:t")
            .into_iter()
            .map(|t| tree.text_of(t))
            .collect();
    }
    runs.into_iter().map(|r| run_text(tree, r)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docx::package::testing::document_xml;
    use crate::docx::xml::parse_xml_part;

    fn parse(body: &str) -> Vec<BodyItem> {
        let xml = document_xml(body);
        let part = parse_xml_part("word/document.xml", xml.as_bytes()).expect("parse");
        let tree = XmlTree::new(&part);
        let index = ParagraphIndex::new(&tree);
        let mut counter = TableCounter::default();
        parse_body(&tree, &index, &mut counter)
    }

    fn p(text: &str) -> String {
        format!("<w:p><w:r><w:t>{text}</w:t></w:r></w:p>")
    }

    fn tbl(cells: &[String]) -> String {
        let tcs: String = cells.iter().map(|c| format!("<w:tc>{c}</w:tc>")).collect();
        format!("<w:tbl><w:tr>{tcs}</w:tr></w:tbl>")
    }

    fn collect_indices(t: &ParsedTable, parent: Option<usize>, out: &mut Vec<(Option<usize>, usize)>) {
        out.push((parent, t.table_index));
        for row in &t.rows {
            for cell in row {
                for item in &cell.items {
                    if let CellItem::Table(n) = item {
                        collect_indices(n, Some(t.table_index), out);
                    }
                }
            }
        }
    }

    #[test]
    fn nested_tables_number_in_pre_order() {
        let inner_inner = tbl(&[p("deep")]);
        let inner = tbl(&[format!("{}{}", p("mid"), inner_inner)]);
        let body = format!(
            "{}{}{}",
            tbl(&[format!("{}{}", p("a"), inner), p("b")]),
            p("between"),
            tbl(&[p("c")])
        );
        let items = parse(&body);

        let mut pairs = Vec::new();
        for item in &items {
            if let BodyItem::Table(t) = item {
                collect_indices(t, None, &mut pairs);
            }
        }
        let indices: Vec<usize> = pairs.iter().map(|(_, i)| *i).collect();
        assert_eq!(indices, vec![1, 2, 3, 4]);
        for (parent, idx) in pairs {
            if let Some(parent) = parent {
                assert!(idx > parent);
            }
        }
    }

    #[test]
    fn cell_keeps_paragraphs_and_tables_in_order() {
        let body = tbl(&[format!("{}{}{}", p("first"), tbl(&[p("inner")]), p("last"))]);
        let items = parse(&body);
        let BodyItem::Table(t) = &items[0] else {
            panic!("expected table");
        };
        let cell = &t.rows[0][0];
        assert!(!cell.used_fallback);
        let kinds: Vec<&str> = cell
            .items
            .iter()
            .map(|i| match i {
                CellItem::Paragraph(_) => "p",
                CellItem::Table(_) => "t",
            })
            .collect();
        assert_eq!(kinds, vec!["p", "t", "p"]);
    }

    #[test]
    fn cell_without_direct_paragraphs_uses_descendant_scan() {
        let body = "<w:tbl><w:tr><w:tc><w:tcPr/><w:customBlock><w:p><w:r><w:t>buried</w:t></w:r></w:p></w:customBlock></w:tc></w:tr></w:tbl>";
        let items = parse(body);
        let BodyItem::Table(t) = &items[0] else {
            panic!("expected table");
        };
        let cell = &t.rows[0][0];
        assert!(cell.used_fallback);
        let CellItem::Paragraph(para) = &cell.items[0] else {
            panic!("expected paragraph");
        };
        assert_eq!(para.text(), "buried");
    }

    #[test]
    fn paragraph_runs_alignment_and_hyperlinks() {
        let body = r#"<w:p><w:pPr><w:pStyle w:val="Body"/><w:jc w:val="both"/></w:pPr><w:r><w:rPr><w:b/></w:rPr><w:t>Hi</w:t></w:r><w:hyperlink r:id="rId1"><w:r><w:t xml:space="preserve"> there</w:t><w:tab/></w:r></w:hyperlink></w:p>"#;
        let items = parse(body);
        let BodyItem::Paragraph(para) = &items[0] else {
            panic!("expected paragraph");
        };
        assert_eq!(para.style_id.as_deref(), Some("Body"));
        assert_eq!(para.alignment, Alignment::Justify);
        assert_eq!(para.runs.len(), 2);
        assert_eq!(para.runs[0].props.bold, Some(true));
        assert_eq!(para.runs[1].props.bold, None);
        assert_eq!(para.text(), "Hi there\t");
        assert_eq!(para.position, 0);
    }

    #[test]
    fn positions_count_all_body_paragraphs() {
        let body = format!("{}{}<w:p/>{}", p("a"), tbl(&[p("b")]), p("c"));
        let items = parse(&body);
        let positions: Vec<usize> = items
            .iter()
            .filter_map(|i| match i {
                BodyItem::Paragraph(p) => Some(p.position),
                _ => None,
            })
            .collect();
        assert_eq!(positions, vec![0, 2, 3]);
    }
}
