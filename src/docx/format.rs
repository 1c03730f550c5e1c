use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::rpr::RawRunProps;
use super::styles::StyleCatalog;

/// Formatting of a run after inheritance. `None` means no level of the chain defines it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EffectiveFormat {
    pub font_name: Option<String>,
    pub font_size_pt: Option<f64>,
    pub bold: Option<bool>,
    pub italic: Option<bool>,
    pub underline: Option<bool>,
    pub strike: Option<bool>,
    pub color: Option<String>,
}

/// Resolve each property of `run` through: the run itself, its character style chain,
/// the paragraph style chain, the Normal style chain, then the document defaults.
///
/// `paragraph_style` is the paragraph's explicit style id; `None` uses the default
/// paragraph style.
pub fn resolve_format(
    run: &RawRunProps,
    paragraph_style: Option<&str>,
    catalog: &StyleCatalog,
) -> EffectiveFormat {
    let ctx = Resolver {
        run,
        char_style: run.style_ref.as_deref(),
        para_style: paragraph_style.or(catalog.default_paragraph.as_deref()),
        catalog,
    };
    EffectiveFormat {
        font_name: ctx.resolve(|p| p.font_name.clone()),
        font_size_pt: ctx.resolve(|p| p.font_size_pt),
        bold: ctx.resolve(|p| p.bold),
        italic: ctx.resolve(|p| p.italic),
        underline: ctx.resolve(|p| p.underline),
        strike: ctx.resolve(|p| p.strike),
        color: ctx.resolve(|p| p.color.clone()),
    }
}

struct Resolver<'a> {
    run: &'a RawRunProps,
    char_style: Option<&'a str>,
    para_style: Option<&'a str>,
    catalog: &'a StyleCatalog,
}

impl Resolver<'_> {
    fn resolve<T>(&self, pick: impl Fn(&RawRunProps) -> Option<T>) -> Option<T> {
        pick(self.run)
            .or_else(|| walk_chain(self.catalog, self.char_style, &pick))
            .or_else(|| walk_chain(self.catalog, self.para_style, &pick))
            .or_else(|| {
                let normal = self.catalog.normal().map(|s| s.id.as_str());
                walk_chain(self.catalog, normal, &pick)
            })
            .or_else(|| pick(&self.catalog.doc_defaults))
    }
}

/// Walk `start -> basedOn -> ...` until a style defines the property. A missing style
/// ends the walk; revisiting a style (a `basedOn` cycle) ends it as unresolved.
fn walk_chain<T>(
    catalog: &StyleCatalog,
    start: Option<&str>,
    pick: &impl Fn(&RawRunProps) -> Option<T>,
) -> Option<T> {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut cur = start;
    while let Some(id) = cur {
        if !visited.insert(id) {
            debug!(style = id, "style inheritance cycle");
            return None;
        }
        let style = catalog.get(id)?;
        if let Some(v) = pick(&style.run) {
            return Some(v);
        }
        cur = style.based_on.as_deref();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docx::styles::{Style, StyleKind};

    fn style(id: &str, kind: StyleKind, based_on: Option<&str>, run: RawRunProps) -> Style {
        Style {
            id: id.to_string(),
            name: Some(id.to_string()),
            kind,
            based_on: based_on.map(str::to_string),
            run,
        }
    }

    fn catalog(styles: Vec<Style>) -> StyleCatalog {
        let mut cat = StyleCatalog::default();
        for s in styles {
            cat.styles.insert(s.id.clone(), s);
        }
        cat
    }

    #[test]
    fn character_style_supplies_bold() {
        let cat = catalog(vec![
            style(
                "Emph",
                StyleKind::Character,
                None,
                RawRunProps {
                    bold: Some(true),
                    ..Default::default()
                },
            ),
            style("Body", StyleKind::Paragraph, None, RawRunProps::default()),
        ]);
        let run = RawRunProps {
            style_ref: Some("Emph".into()),
            ..Default::default()
        };
        let eff = resolve_format(&run, Some("Body"), &cat);
        assert_eq!(eff.bold, Some(true));
        assert_eq!(eff.italic, None);
    }

    #[test]
    fn strike_inherits_from_character_and_paragraph_styles() {
        let struck = RawRunProps {
            strike: Some(true),
            ..Default::default()
        };
        let cat = catalog(vec![
            style("Gone", StyleKind::Character, None, struck.clone()),
            style("Struck", StyleKind::Paragraph, None, struck),
            style("Body", StyleKind::Paragraph, None, RawRunProps::default()),
        ]);
        let via_char = RawRunProps {
            style_ref: Some("Gone".into()),
            ..Default::default()
        };
        assert_eq!(resolve_format(&via_char, Some("Body"), &cat).strike, Some(true));
        assert_eq!(
            resolve_format(&RawRunProps::default(), Some("Struck"), &cat).strike,
            Some(true)
        );
        assert_eq!(
            resolve_format(&RawRunProps::default(), Some("Body"), &cat).strike,
            None
        );
        let cleared = RawRunProps {
            strike: Some(false),
            ..Default::default()
        };
        assert_eq!(resolve_format(&cleared, Some("Struck"), &cat).strike, Some(false));
    }

    #[test]
    fn explicit_run_value_wins() {
        let cat = catalog(vec![style(
            "Body",
            StyleKind::Paragraph,
            None,
            RawRunProps {
                bold: Some(true),
                ..Default::default()
            },
        )]);
        let run = RawRunProps {
            bold: Some(false),
            ..Default::default()
        };
        assert_eq!(resolve_format(&run, Some("Body"), &cat).bold, Some(false));
    }

    #[test]
    fn paragraph_chain_then_normal_then_defaults() {
        let mut cat = catalog(vec![
            style(
                "Normal",
                StyleKind::Paragraph,
                None,
                RawRunProps {
                    font_name: Some("Cambria".into()),
                    ..Default::default()
                },
            ),
            style(
                "Base",
                StyleKind::Paragraph,
                None,
                RawRunProps {
                    font_size_pt: Some(14.0),
                    ..Default::default()
                },
            ),
            style("Derived", StyleKind::Paragraph, Some("Base"), RawRunProps::default()),
        ]);
        cat.default_paragraph = Some("Normal".into());
        cat.doc_defaults.color = Some("333333".into());

        let eff = resolve_format(&RawRunProps::default(), Some("Derived"), &cat);
        assert_eq!(eff.font_size_pt, Some(14.0));
        assert_eq!(eff.font_name.as_deref(), Some("Cambria"));
        assert_eq!(eff.color.as_deref(), Some("333333"));
        assert_eq!(eff.underline, None);
    }

    #[test]
    fn cyclic_chain_terminates_unresolved() {
        let cat = catalog(vec![
            style("A", StyleKind::Paragraph, Some("B"), RawRunProps::default()),
            style("B", StyleKind::Paragraph, Some("A"), RawRunProps::default()),
            style("Self", StyleKind::Character, Some("Self"), RawRunProps::default()),
        ]);
        let run = RawRunProps {
            style_ref: Some("Self".into()),
            ..Default::default()
        };
        let eff = resolve_format(&run, Some("A"), &cat);
        assert_eq!(eff, EffectiveFormat::default());
    }
}
