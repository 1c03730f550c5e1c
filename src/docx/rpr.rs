use serde::{Deserialize, Serialize};

use super::xml::{XmlEvent, XmlTree};

/// Run formatting exactly as written in one `w:rPr` block.
///
/// Every field is `None` when the markup does not mention it; `Some(false)` only when the
/// markup explicitly turns the property off.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRunProps {
    pub bold: Option<bool>,
    pub italic: Option<bool>,
    pub underline: Option<bool>,
    pub strike: Option<bool>,
    pub font_name: Option<String>,
    pub font_size_pt: Option<f64>,
    pub color: Option<String>,
    pub highlight: Option<String>,
    pub style_ref: Option<String>,
}

/// Read an `w:rPr` element. `rpr` may be `None` when the run has no properties block,
/// which yields all-unknown.
pub fn read_rpr(tree: &XmlTree<'_>, rpr: Option<usize>) -> RawRunProps {
    let Some(rpr) = rpr else {
        return RawRunProps::default();
    };
    let mut out = RawRunProps::default();
    for child in tree.children(rpr) {
        apply_property(&mut out, tree.event(child));
    }
    out
}

fn apply_property(out: &mut RawRunProps, ev: &XmlEvent) {
    let Some(name) = ev.name() else {
        return;
    };
    match name {
        "w:b" => out.bold = Some(toggle_value(ev.attr("w:val"))),
        "w:i" => out.italic = Some(toggle_value(ev.attr("w:val"))),
        "w:strike" => out.strike = Some(toggle_value(ev.attr("w:val"))),
        "w:u" => out.underline = Some(underline_value(ev.attr("w:val"))),
        "w:sz" => out.font_size_pt = ev.attr("w:val").and_then(half_points_to_pt),
        "w:rFonts" => {
            out.font_name = ev
                .attr("w:ascii")
                .or_else(|| ev.attr("w:hAnsi"))
                .or_else(|| ev.attr("w:cs"))
                .map(str::to_string);
        }
        "w:color" => {
            out.color = ev
                .attr("w:val")
                .map(str::trim)
                .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("auto"))
                .map(str::to_string);
        }
        "w:highlight" => {
            out.highlight = ev
                .attr("w:val")
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string);
        }
        "w:rStyle" => {
            out.style_ref = ev
                .attr("w:val")
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string);
        }
        _ => {}
    }
}

/// On/off properties: a bare element means on.
fn toggle_value(val: Option<&str>) -> bool {
    match val {
        None => true,
        Some(v) => !matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "0" | "false" | "off" | "no" | "none"
        ),
    }
}

/// `w:u`: only an explicit `none` turns underline off.
fn underline_value(val: Option<&str>) -> bool {
    !matches!(val, Some(v) if v.trim().eq_ignore_ascii_case("none"))
}

/// `w:sz` carries half-points.
pub fn half_points_to_pt(val: &str) -> Option<f64> {
    val.trim().parse::<i64>().ok().map(|hp| hp as f64 / 2.0)
}
