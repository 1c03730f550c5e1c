use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

use super::job::JobOutcome;
use crate::textutil::clip;

/// Bridge→target similarity above which a chunk is listed as a strong match.
const HIGH_SIMILARITY: f64 = 0.7;

/// `<dir>/<output_stem>.actions.json` and `.actions.txt`.
pub fn action_log_paths(output: &Path, report_dir: Option<&Path>) -> (PathBuf, PathBuf) {
    let stem = output
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let dir = report_dir
        .map(Path::to_path_buf)
        .or_else(|| output.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    (
        dir.join(format!("{stem}.actions.json")),
        dir.join(format!("{stem}.actions.txt")),
    )
}

pub fn write_action_log(outcome: &JobOutcome, json_path: &Path, txt_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = json_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create report dir: {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(outcome).context("serialize action log")?;
    fs::write(json_path, json)
        .with_context(|| format!("write action log: {}", json_path.display()))?;
    fs::write(txt_path, render_text_report(outcome))
        .with_context(|| format!("write action report: {}", txt_path.display()))?;
    Ok(())
}

fn sim4(v: Option<f64>) -> String {
    format!("{:.4}", v.unwrap_or(0.0))
}

pub fn render_text_report(outcome: &JobOutcome) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== Status Log ===");
    for step in &outcome.status {
        let _ = writeln!(out, "[{}] {}", step.elapsed, step.message);
    }

    let _ = writeln!(out, "\n=== Chunks Information ===");
    let mut high = Vec::new();
    for (i, r) in outcome.records.iter().enumerate() {
        let _ = writeln!(out, "\n---- Chunk {} ----", i + 1);
        let _ = writeln!(out, "New Chunk:\n{}\n", r.new_text.trim());
        let _ = writeln!(
            out,
            "Matched Bridge Chunk:\n{}\n",
            r.bridge_text.as_deref().unwrap_or("").trim()
        );
        let _ = writeln!(
            out,
            "Matched Target Chunk:\n{}\n",
            r.target_text.as_deref().unwrap_or("").trim()
        );
        let _ = writeln!(out, "Similarity (New→Bridge): {}", sim4(r.bridge_similarity));
        let _ = writeln!(out, "Similarity (Bridge→Target): {}", sim4(r.target_similarity));
        match &r.anchor {
            Some(a) => {
                let _ = writeln!(
                    out,
                    "Anchor Location: section_path='{}', para_idx={}, position={}",
                    a.section_path, a.para_idx, a.document_position
                );
            }
            None => {
                let _ = writeln!(out, "Anchor Location: none");
            }
        }
        let _ = writeln!(out, "Action Taken: {}", r.action_taken);

        if r.target_similarity.unwrap_or(0.0) > HIGH_SIMILARITY {
            high.push((i + 1, r));
        }
    }

    let _ = writeln!(
        out,
        "\n=== Chunks with Bridge→Target similarity > {:.0}% ===",
        HIGH_SIMILARITY * 100.0
    );
    if high.is_empty() {
        let _ = writeln!(out, "(none)");
    }
    for (n, r) in high {
        let _ = writeln!(
            out,
            "Chunk {n}: {} | {}",
            sim4(r.target_similarity),
            clip(r.new_text.trim(), 120)
        );
    }

    if outcome.cancelled {
        let _ = writeln!(out, "\nJob cancelled before all chunks were processed.");
    }
    if let Some(err) = &outcome.error {
        let _ = writeln!(out, "\nError: {err}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::{AnchorAddress, PatchAction, SkipReason};
    use crate::pipeline::job::ChunkActionRecord;
    use crate::progress::StatusStep;

    fn outcome() -> JobOutcome {
        let anchor = AnchorAddress {
            section_path: "Intro".into(),
            para_idx: 1,
            document_position: 2,
            snapshot_position: 2,
        };
        JobOutcome {
            status: vec![StatusStep {
                elapsed: "00:00".into(),
                message: "Loading documents".into(),
            }],
            output_path: Some(PathBuf::from("out.docx")),
            records: vec![
                ChunkActionRecord {
                    sequence_index: 0,
                    new_text: "new one".into(),
                    bridge_text: Some("old one".into()),
                    target_text: Some("target one".into()),
                    bridge_similarity: Some(0.9),
                    target_similarity: Some(0.92),
                    anchor: Some(anchor.clone()),
                    action: PatchAction::Replace {
                        anchor,
                        text: "new one".into(),
                    },
                    action_taken: "replaced".into(),
                },
                ChunkActionRecord {
                    sequence_index: 1,
                    new_text: "new two".into(),
                    bridge_text: Some("old two".into()),
                    target_text: Some("target two".into()),
                    bridge_similarity: Some(0.5),
                    target_similarity: Some(0.4),
                    anchor: None,
                    action: PatchAction::Skip {
                        reason: SkipReason::BelowThreshold,
                    },
                    action_taken: "skipped (below threshold)".into(),
                },
            ],
            cancelled: false,
            error: None,
        }
    }

    #[test]
    fn text_report_sections() {
        let txt = render_text_report(&outcome());
        assert!(txt.starts_with("=== Status Log ===\n[00:00] Loading documents\n"));
        assert!(txt.contains("Similarity (Bridge→Target): 0.9200"));
        assert!(txt.contains("Anchor Location: section_path='Intro', para_idx=1, position=2"));
        assert!(txt.contains("Action Taken: skipped (below threshold)"));
        let high = txt.split("similarity > 70% ===").nth(1).expect("high section");
        assert!(high.contains("Chunk 1: 0.9200 | new one"));
        assert!(!high.contains("new two"));
    }

    #[test]
    fn writes_both_logs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (json, txt) = action_log_paths(&dir.path().join("t_new.docx"), None);
        assert_eq!(json, dir.path().join("t_new.actions.json"));
        write_action_log(&outcome(), &json, &txt).expect("write");
        let v: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&json).expect("read")).expect("json");
        assert_eq!(v["records"][0]["action"]["action"], "replace");
        assert_eq!(v["records"][1]["action"]["reason"], "below_threshold");
        assert!(txt.exists());
    }
}
