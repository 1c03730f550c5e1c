use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::rpr::{read_rpr, RawRunProps};
use super::xml::{XmlPart, XmlTree};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StyleKind {
    Paragraph,
    Character,
    Table,
    Numbering,
    Other,
}

impl StyleKind {
    fn parse(v: Option<&str>) -> Self {
        match v.unwrap_or("paragraph") {
            "paragraph" => Self::Paragraph,
            "character" => Self::Character,
            "table" => Self::Table,
            "numbering" => Self::Numbering,
            _ => Self::Other,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Style {
    pub id: String,
    pub name: Option<String>,
    pub kind: StyleKind,
    pub based_on: Option<String>,
    pub run: RawRunProps,
}

/// Styles declared in `word/styles.xml`, keyed by style id.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StyleCatalog {
    pub styles: HashMap<String, Style>,
    pub doc_defaults: RawRunProps,
    pub default_paragraph: Option<String>,
}

impl StyleCatalog {
    pub fn from_part(part: &XmlPart) -> Self {
        let tree = XmlTree::new(part);
        let mut catalog = StyleCatalog::default();
        let Some(root) = tree.find_first("w:styles") else {
            return catalog;
        };

        if let Some(defaults) = tree.child_named(root, "w:docDefaults") {
            if let Some(rpr_default) = tree.child_named(defaults, "w:rPrDefault") {
                catalog.doc_defaults = read_rpr(&tree, tree.child_named(rpr_default, "w:rPr"));
            }
        }

        for idx in tree.children_named(root, "w:style") {
            let ev = tree.event(idx);
            let Some(id) = ev.attr("w:styleId").map(str::trim).filter(|s| !s.is_empty()) else {
                continue;
            };
            let kind = StyleKind::parse(ev.attr("w:type"));
            let is_default = matches!(ev.attr("w:default"), Some("1") | Some("true") | Some("on"));
            let name = tree
                .child_named(idx, "w:name")
                .and_then(|n| tree.event(n).attr("w:val"))
                .map(str::to_string);
            let based_on = tree
                .child_named(idx, "w:basedOn")
                .and_then(|n| tree.event(n).attr("w:val"))
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            let run = read_rpr(&tree, tree.child_named(idx, "w:rPr"));

            if kind == StyleKind::Paragraph && is_default {
                catalog.default_paragraph = Some(id.to_string());
            }
            catalog.styles.insert(
                id.to_string(),
                Style {
                    id: id.to_string(),
                    name,
                    kind,
                    based_on,
                    run,
                },
            );
        }
        catalog
    }

    pub fn get(&self, id: &str) -> Option<&Style> {
        self.styles.get(id)
    }

    /// The document's "Normal" style: the declared default paragraph style, else a style
    /// with id `Normal`.
    pub fn normal(&self) -> Option<&Style> {
        self.default_paragraph
            .as_deref()
            .and_then(|id| self.get(id))
            .or_else(|| self.get("Normal"))
    }

    /// Display name of the paragraph style a paragraph uses. Paragraphs without an
    /// explicit `w:pStyle` use the default paragraph style.
    pub fn paragraph_style_name(&self, style_id: Option<&str>) -> String {
        match style_id {
            Some(id) => self
                .get(id)
                .and_then(|s| s.name.clone())
                .unwrap_or_else(|| id.to_string()),
            None => self
                .normal()
                .and_then(|s| s.name.clone())
                .unwrap_or_else(|| "Normal".to_string()),
        }
    }
}
