use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::format::resolve_format;
use super::package::{DocxPackage, DOCUMENT_PART, DOCUMENT_RELS_PART, STYLES_PART};
use super::styles::StyleCatalog;
use super::tables::{
    parse_body, Alignment, BodyItem, CellItem, ParagraphIndex, ParsedParagraph, ParsedTable,
    TableCounter,
};
use super::xml::{parse_xml_part, XmlPart, XmlTree};
use crate::error::DocxError;
use crate::textutil::heading_level;

/// Section path of content that precedes the first heading.
pub const ROOT_SECTION: &str = "ROOT";
pub const SECTION_SEPARATOR: &str = " > ";
pub const MODEL_VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Heading,
    Paragraph,
    TableCell,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub text: String,
    pub font_name: Option<String>,
    pub font_size_pt: Option<f64>,
    pub bold: Option<bool>,
    pub italic: Option<bool>,
    pub underline: Option<bool>,
    pub strike: Option<bool>,
    pub color: Option<String>,
    pub highlight: Option<String>,
    pub style_ref: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContentUnit {
    pub kind: UnitKind,
    pub text: String,
    pub style_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading_level: Option<usize>,
    pub alignment: Alignment,
    pub runs: Vec<Run>,
    pub section_path: String,
    pub para_idx: usize,
    pub document_order_index: usize,
    /// Paragraph ordinal within the body (see `ParagraphIndex`).
    pub position: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub paragraphs: Vec<ContentUnit>,
    pub nested_tables: Vec<Table>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub used_fallback: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub table_index: usize,
    pub section_path: String,
    pub rows: Vec<Vec<Cell>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Unit(ContentUnit),
    Table(Table),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentModel {
    pub version: u32,
    pub doc_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    pub blocks: Vec<Block>,
    #[serde(default)]
    pub embedded_files: Vec<String>,
}

impl DocumentModel {
    /// Every content unit in document order: body units, then each table's cell
    /// paragraphs and nested tables depth-first, at the table's place in the body.
    pub fn units(&self) -> Vec<&ContentUnit> {
        units_of(&self.blocks)
    }

    pub fn tables(&self) -> Vec<&Table> {
        fn walk<'a>(t: &'a Table, out: &mut Vec<&'a Table>) {
            out.push(t);
            for row in &t.rows {
                for cell in row {
                    for n in &cell.nested_tables {
                        walk(n, out);
                    }
                }
            }
        }
        let mut out = Vec::new();
        for block in &self.blocks {
            if let Block::Table(t) = block {
                walk(t, &mut out);
            }
        }
        out
    }
}

pub fn units_of(blocks: &[Block]) -> Vec<&ContentUnit> {
    let mut out = Vec::new();
    for block in blocks {
        match block {
            Block::Unit(u) => out.push(u),
            Block::Table(t) => collect_table_units(t, &mut out),
        }
    }
    out.sort_by_key(|u| u.document_order_index);
    out
}

fn collect_table_units<'a>(t: &'a Table, out: &mut Vec<&'a ContentUnit>) {
    for row in &t.rows {
        for cell in row {
            out.extend(cell.paragraphs.iter());
            for n in &cell.nested_tables {
                collect_table_units(n, out);
            }
        }
    }
}

/// Running section/paragraph addressing state for one document.
struct Addressing {
    headings: Vec<String>,
    seen_heading: bool,
    para_counters: HashMap<String, usize>,
    next_order: usize,
}

impl Addressing {
    fn new() -> Self {
        Self {
            headings: Vec::new(),
            seen_heading: false,
            para_counters: HashMap::new(),
            next_order: 0,
        }
    }

    fn enter_heading(&mut self, level: usize, text: &str) {
        self.headings.truncate(level.saturating_sub(1));
        self.headings.push(text.trim().to_string());
        self.seen_heading = true;
    }

    fn section_path(&self) -> String {
        if !self.seen_heading {
            return ROOT_SECTION.to_string();
        }
        let joined = self
            .headings
            .iter()
            .filter(|s| !s.is_empty())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(SECTION_SEPARATOR);
        if joined.is_empty() {
            ROOT_SECTION.to_string()
        } else {
            joined
        }
    }

    fn next_para_idx(&mut self, section_path: &str) -> usize {
        let counter = self.para_counters.entry(section_path.to_string()).or_insert(0);
        let idx = *counter;
        *counter += 1;
        idx
    }

    fn next_order(&mut self) -> usize {
        let idx = self.next_order;
        self.next_order += 1;
        idx
    }
}

struct Builder<'a> {
    catalog: &'a StyleCatalog,
    addr: Addressing,
}

impl Builder<'_> {
    fn body_paragraph(&mut self, p: &ParsedParagraph) -> ContentUnit {
        let style_name = self.catalog.paragraph_style_name(p.style_id.as_deref());
        let text = p.text().trim().to_string();
        let level = heading_level(&style_name);
        if let Some(level) = level {
            self.addr.enter_heading(level, &text);
        }
        let section_path = self.addr.section_path();
        let kind = if level.is_some() {
            UnitKind::Heading
        } else {
            UnitKind::Paragraph
        };
        self.unit(p, kind, style_name, level, section_path)
    }

    fn unit(
        &mut self,
        p: &ParsedParagraph,
        kind: UnitKind,
        style_name: String,
        heading_level: Option<usize>,
        section_path: String,
    ) -> ContentUnit {
        let para_idx = self.addr.next_para_idx(&section_path);
        let document_order_index = self.addr.next_order();
        let runs = p
            .runs
            .iter()
            .map(|r| {
                let eff = resolve_format(&r.props, p.style_id.as_deref(), self.catalog);
                Run {
                    text: r.text.clone(),
                    font_name: eff.font_name,
                    font_size_pt: eff.font_size_pt,
                    bold: eff.bold,
                    italic: eff.italic,
                    underline: eff.underline,
                    strike: eff.strike,
                    color: eff.color,
                    highlight: r.props.highlight.clone(),
                    style_ref: r.props.style_ref.clone(),
                }
            })
            .collect();
        ContentUnit {
            kind,
            text: p.text().trim().to_string(),
            style_name,
            heading_level,
            alignment: p.alignment,
            runs,
            section_path,
            para_idx,
            document_order_index,
            position: p.position,
        }
    }

    fn table(&mut self, t: &ParsedTable, parent_path: &str) -> Table {
        let mut rows = Vec::with_capacity(t.rows.len());
        for (r, row) in t.rows.iter().enumerate() {
            let mut cells = Vec::with_capacity(row.len());
            for (c, cell) in row.iter().enumerate() {
                let cell_path = cell_section_path(parent_path, t.table_index, r + 1, c + 1);
                let mut out = Cell {
                    paragraphs: Vec::new(),
                    nested_tables: Vec::new(),
                    used_fallback: cell.used_fallback,
                };
                for item in &cell.items {
                    match item {
                        CellItem::Paragraph(p) => {
                            let style_name =
                                self.catalog.paragraph_style_name(p.style_id.as_deref());
                            let unit =
                                self.unit(p, UnitKind::TableCell, style_name, None, cell_path.clone());
                            out.paragraphs.push(unit);
                        }
                        CellItem::Table(n) => {
                            let nested = self.table(n, &cell_path);
                            out.nested_tables.push(nested);
                        }
                    }
                }
                cells.push(out);
            }
            rows.push(cells);
        }
        Table {
            table_index: t.table_index,
            section_path: parent_path.to_string(),
            rows,
        }
    }
}

/// Address prefix for paragraphs inside a table cell (rows and columns are 1-based).
pub fn cell_section_path(parent: &str, table_index: usize, row: usize, col: usize) -> String {
    format!("{parent}{SECTION_SEPARATOR}[T{table_index} R{row} C{col}]")
}

/// Build the block tree of one parsed `word/document.xml`.
pub fn build_blocks(doc: &XmlPart, catalog: &StyleCatalog) -> Vec<Block> {
    let tree = XmlTree::new(doc);
    let index = ParagraphIndex::new(&tree);
    let mut counter = TableCounter::default();
    let items = parse_body(&tree, &index, &mut counter);

    let mut builder = Builder {
        catalog,
        addr: Addressing::new(),
    };
    let mut blocks = Vec::with_capacity(items.len());
    for item in &items {
        match item {
            BodyItem::Paragraph(p) => blocks.push(Block::Unit(builder.body_paragraph(p))),
            BodyItem::Table(t) => {
                let path = builder.addr.section_path();
                blocks.push(Block::Table(builder.table(t, &path)));
            }
        }
    }
    blocks
}

pub fn load_styles(pkg: &DocxPackage) -> Result<StyleCatalog, DocxError> {
    match pkg.part(STYLES_PART) {
        Some(bytes) if !bytes.is_empty() => {
            let part = parse_xml_part(STYLES_PART, bytes)?;
            Ok(StyleCatalog::from_part(&part))
        }
        _ => {
            debug!("no styles part, formatting inheritance limited to run properties");
            Ok(StyleCatalog::default())
        }
    }
}

/// Targets of OLE-object and embedded-package relationships of the main document.
pub fn embedded_files(pkg: &DocxPackage) -> Result<Vec<String>, DocxError> {
    let Some(bytes) = pkg.part(DOCUMENT_RELS_PART) else {
        return Ok(Vec::new());
    };
    let rels = parse_xml_part(DOCUMENT_RELS_PART, bytes)?;
    let mut out = Vec::new();
    for ev in &rels.events {
        if !ev.is_open("Relationship") {
            continue;
        }
        let rel_type = ev.attr("Type").unwrap_or("");
        if rel_type.ends_with("/oleObject") || rel_type.ends_with("/package") {
            if let Some(target) = ev.attr("Target") {
                out.push(target.to_string());
            }
        }
    }
    Ok(out)
}

pub fn build_model(pkg: &DocxPackage) -> Result<DocumentModel, DocxError> {
    let doc_bytes = pkg.require_part(DOCUMENT_PART)?;
    let doc = parse_xml_part(DOCUMENT_PART, doc_bytes)?;
    let catalog = load_styles(pkg)?;
    let blocks = build_blocks(&doc, &catalog);
    Ok(DocumentModel {
        version: MODEL_VERSION,
        doc_id: pkg.document_id()?,
        source_file: None,
        blocks,
        embedded_files: embedded_files(pkg)?,
    })
}

pub fn build_model_from_path(path: &Path) -> Result<DocumentModel, DocxError> {
    let pkg = DocxPackage::read(path)?;
    let mut model = build_model(&pkg)?;
    model.source_file = Some(path.display().to_string());
    info!(
        file = %path.display(),
        doc_id = %model.doc_id,
        units = model.units().len(),
        tables = model.tables().len(),
        "built structural model"
    );
    Ok(model)
}

/// Persisted models keyed by document identifier.
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn path_for(&self, doc_id: &str) -> PathBuf {
        self.dir.join(format!("{doc_id}.model.json"))
    }

    pub fn save(&self, model: &DocumentModel) -> Result<PathBuf, DocxError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&model.doc_id);
        save_model(model, &path)?;
        Ok(path)
    }

    pub fn load(&self, doc_id: &str) -> Result<Option<DocumentModel>, DocxError> {
        let path = self.path_for(doc_id);
        if !path.exists() {
            return Ok(None);
        }
        load_model(&path).map(Some)
    }
}

pub fn save_model(model: &DocumentModel, path: &Path) -> Result<(), DocxError> {
    fs::write(path, serde_json::to_vec_pretty(model)?)?;
    Ok(())
}

pub fn load_model(path: &Path) -> Result<DocumentModel, DocxError> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::docx::package::testing::{build_docx, document_xml, simple_docx, styles_xml};

    const STYLES: &str = r#"<w:style w:type="paragraph" w:default="1" w:styleId="Normal"><w:name w:val="Normal"/><w:rPr><w:sz w:val="22"/></w:rPr></w:style>
<w:style w:type="paragraph" w:styleId="Heading1"><w:name w:val="heading 1"/><w:basedOn w:val="Normal"/></w:style>
<w:style w:type="paragraph" w:styleId="Heading2"><w:name w:val="heading 2"/><w:basedOn w:val="Normal"/></w:style>"#;

    fn para(style: Option<&str>, text: &str) -> String {
        let ppr = style
            .map(|s| format!(r#"<w:pPr><w:pStyle w:val="{s}"/></w:pPr>"#))
            .unwrap_or_default();
        format!("<w:p>{ppr}<w:r><w:t>{text}</w:t></w:r></w:p>")
    }

    fn model(body: &str) -> DocumentModel {
        let bytes = simple_docx(body, STYLES);
        let pkg = DocxPackage::from_bytes(&bytes).expect("pkg");
        build_model(&pkg).expect("model")
    }

    #[test]
    fn section_paths_follow_heading_levels() {
        let body = [
            para(None, "Preamble"),
            para(Some("Heading1"), "Intro"),
            para(None, "a"),
            para(Some("Heading2"), "Detail"),
            para(None, "b"),
            para(Some("Heading1"), "Next"),
            para(None, "c"),
        ]
        .concat();
        let m = model(&body);
        let got: Vec<(String, usize, UnitKind)> = m
            .units()
            .iter()
            .map(|u| (u.section_path.clone(), u.para_idx, u.kind))
            .collect();
        assert_eq!(
            got,
            vec![
                ("ROOT".into(), 0, UnitKind::Paragraph),
                ("Intro".into(), 0, UnitKind::Heading),
                ("Intro".into(), 1, UnitKind::Paragraph),
                ("Intro > Detail".into(), 0, UnitKind::Heading),
                ("Intro > Detail".into(), 1, UnitKind::Paragraph),
                ("Next".into(), 0, UnitKind::Heading),
                ("Next".into(), 1, UnitKind::Paragraph),
            ]
        );
        assert_eq!(m.units()[1].heading_level, Some(1));
    }

    #[test]
    fn tables_do_not_advance_paragraph_counter() {
        let body = format!(
            "{}{}<w:tbl><w:tr><w:tc>{}{}</w:tc></w:tr></w:tbl>{}",
            para(Some("Heading1"), "Intro"),
            para(None, "before"),
            para(None, "cell one"),
            para(None, "cell two"),
            para(None, "after"),
        );
        let m = model(&body);
        let units = m.units();
        let after = units.iter().find(|u| u.text == "after").expect("after");
        assert_eq!(after.para_idx, 2);
        assert_eq!(after.section_path, "Intro");

        let cell: Vec<_> = units
            .iter()
            .filter(|u| u.kind == UnitKind::TableCell)
            .map(|u| (u.section_path.as_str(), u.para_idx))
            .collect();
        assert_eq!(
            cell,
            vec![("Intro > [T1 R1 C1]", 0), ("Intro > [T1 R1 C1]", 1)]
        );
        let tables = m.tables();
        assert_eq!(tables[0].section_path, "Intro");
    }

    #[test]
    fn order_index_and_addresses_are_unique() {
        let body = format!(
            "{}{}<w:tbl><w:tr><w:tc>{}<w:tbl><w:tr><w:tc>{}</w:tc></w:tr></w:tbl>{}</w:tc></w:tr></w:tbl>{}",
            para(None, "x"),
            para(None, ""),
            para(None, "c1"),
            para(None, "n1"),
            para(None, "c2"),
            para(None, "y"),
        );
        let m = model(&body);
        let units = m.units();
        let orders: Vec<usize> = units.iter().map(|u| u.document_order_index).collect();
        assert_eq!(orders, (0..units.len()).collect::<Vec<_>>());
        let texts: Vec<&str> = units.iter().map(|u| u.text.as_str()).collect();
        assert_eq!(texts, vec!["x", "", "c1", "n1", "c2", "y"]);
        let addrs: HashSet<(String, usize)> = units
            .iter()
            .map(|u| (u.section_path.clone(), u.para_idx))
            .collect();
        assert_eq!(addrs.len(), units.len());
    }

    #[test]
    fn runs_carry_resolved_formatting() {
        let body = r#"<w:p><w:r><w:rPr><w:b/></w:rPr><w:t>Bold</w:t></w:r><w:r><w:t>plain</w:t></w:r></w:p>"#;
        let m = model(body);
        let u = m.units()[0];
        assert_eq!(u.style_name, "Normal");
        assert_eq!(u.runs[0].bold, Some(true));
        assert_eq!(u.runs[1].bold, None);
        assert_eq!(u.runs[1].font_size_pt, Some(11.0));
    }

    #[test]
    fn run_strike_comes_from_character_style() {
        let styles = format!(
            r#"{STYLES}<w:style w:type="character" w:styleId="Gone"><w:name w:val="Gone"/><w:rPr><w:strike/></w:rPr></w:style>"#
        );
        let body = r#"<w:p><w:r><w:rPr><w:rStyle w:val="Gone"/></w:rPr><w:t>old</w:t></w:r><w:r><w:t>kept</w:t></w:r></w:p>"#;
        let pkg = DocxPackage::from_bytes(&simple_docx(body, &styles)).expect("pkg");
        let m = build_model(&pkg).expect("model");
        let u = m.units()[0];
        assert_eq!(u.runs[0].strike, Some(true));
        assert_eq!(u.runs[1].strike, None);
    }

    #[test]
    fn embedded_objects_and_json_roundtrip() {
        let rels = r#"<?xml version="1.0"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/oleObject" Target="embeddings/oleObject1.bin"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/></Relationships>"#;
        let doc = document_xml(&para(None, "hello"));
        let styles = styles_xml(STYLES);
        let bytes = build_docx(&[
            ("word/document.xml", doc.as_str()),
            ("word/styles.xml", styles.as_str()),
            ("word/_rels/document.xml.rels", rels),
        ]);
        let pkg = DocxPackage::from_bytes(&bytes).expect("pkg");
        let m = build_model(&pkg).expect("model");
        assert_eq!(m.embedded_files, vec!["embeddings/oleObject1.bin".to_string()]);

        let dir = tempfile::tempdir().expect("tempdir");
        let store = ModelStore::new(dir.path().to_path_buf());
        store.save(&m).expect("save");
        let back = store.load(&m.doc_id).expect("load").expect("present");
        assert_eq!(back, m);
        assert!(store.load("missing").expect("load").is_none());
    }

    #[test]
    fn missing_document_part_fails() {
        let bytes = build_docx(&[("word/styles.xml", "<w:styles/>")]);
        let pkg = DocxPackage::from_bytes(&bytes).expect("pkg");
        assert!(matches!(build_model(&pkg), Err(DocxError::MissingPart(_))));
    }
}
