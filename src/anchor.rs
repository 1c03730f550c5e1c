//! Anchor resolution and patch planning: chains new→bridge and bridge→target matches
//! to a concrete paragraph of the target and decides replace, insert or skip.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chunks::{Chunk, ChunkAddress};
use crate::docx::model::{units_of, Block, ContentUnit, DocumentModel, ROOT_SECTION};
use crate::error::PatchError;
use crate::similarity::MatchRecord;
use crate::textutil::normalized_eq;

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.7;

/// Read access to the current paragraph text of a document being edited.
pub trait ParagraphSource {
    fn paragraph_text(&self, position: usize) -> Option<String>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapEntry {
    pub para_idx: usize,
    pub document_position: usize,
    pub style_name: String,
    pub text: String,
}

/// `section_path` → entries in paragraph order, for one document instance.
#[derive(Clone, Debug, Default)]
pub struct StructureMap {
    sections: HashMap<String, Vec<MapEntry>>,
    order: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SectionFallback {
    Root,
    FirstAvailable,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedAnchor<'a> {
    pub section_path: &'a str,
    pub entry: &'a MapEntry,
    pub section_fallback: Option<SectionFallback>,
    /// The requested `para_idx` was absent and the section's last entry was used.
    pub entry_fallback: bool,
}

impl StructureMap {
    pub fn from_units<'a>(units: impl IntoIterator<Item = &'a ContentUnit>) -> Self {
        let mut map = StructureMap::default();
        for u in units {
            if !map.sections.contains_key(&u.section_path) {
                map.order.push(u.section_path.clone());
            }
            map.sections
                .entry(u.section_path.clone())
                .or_default()
                .push(MapEntry {
                    para_idx: u.para_idx,
                    document_position: u.position,
                    style_name: u.style_name.clone(),
                    text: u.text.clone(),
                });
        }
        map
    }

    pub fn from_model(model: &DocumentModel) -> Self {
        Self::from_units(model.units())
    }

    pub fn from_blocks(blocks: &[Block]) -> Self {
        Self::from_units(units_of(blocks))
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sections.values().map(Vec::len).sum()
    }

    /// Section paths in first-seen document order.
    pub fn sections(&self) -> &[String] {
        &self.order
    }

    pub fn section(&self, section_path: &str) -> Option<&[MapEntry]> {
        self.sections.get(section_path).map(Vec::as_slice)
    }

    /// Exact lookup, no fallbacks.
    pub fn lookup(&self, section_path: &str, para_idx: usize) -> Option<&MapEntry> {
        self.section(section_path)?
            .iter()
            .find(|e| e.para_idx == para_idx)
    }

    /// Best-effort resolution of an address. A missing section falls back to the root
    /// section, then to the first section of the document; a missing `para_idx` falls
    /// back to the section's last entry.
    pub fn resolve(&self, address: &ChunkAddress) -> Option<ResolvedAnchor<'_>> {
        let (section_path, section_fallback) =
            if let Some((key, _)) = self.sections.get_key_value(&address.section_path) {
                (key.as_str(), None)
            } else if self.sections.contains_key(ROOT_SECTION) {
                (ROOT_SECTION, Some(SectionFallback::Root))
            } else {
                (self.order.first()?.as_str(), Some(SectionFallback::FirstAvailable))
            };
        let entries = self.sections.get(section_path)?;
        let (entry, entry_fallback) = match entries.iter().find(|e| e.para_idx == address.para_idx)
        {
            Some(e) => (e, false),
            None => (entries.last()?, true),
        };
        if section_fallback.is_some() || entry_fallback {
            debug!(
                requested = %address.section_path,
                para_idx = address.para_idx,
                resolved = section_path,
                resolved_idx = entry.para_idx,
                "anchor address resolved by fallback"
            );
        }
        Some(ResolvedAnchor {
            section_path,
            entry,
            section_fallback,
            entry_fallback,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoBridgeMatch,
    NoTargetAnchor,
    BelowThreshold,
    AnchorNotFound,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::NoBridgeMatch => "no bridge match",
            SkipReason::NoTargetAnchor => "no target anchor",
            SkipReason::BelowThreshold => "below threshold",
            SkipReason::AnchorNotFound => "anchor location not found",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnchorAddress {
    pub section_path: String,
    pub para_idx: usize,
    /// Paragraph position the action is applied at.
    pub document_position: usize,
    /// Position recorded in the structure map snapshot.
    pub snapshot_position: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PatchAction {
    Replace { anchor: AnchorAddress, text: String },
    InsertAfter { anchor: AnchorAddress, text: String },
    Skip { reason: SkipReason },
}

impl PatchAction {
    pub fn label(&self) -> String {
        match self {
            PatchAction::Replace { .. } => "replaced".to_string(),
            PatchAction::InsertAfter { .. } => "inserted after".to_string(),
            PatchAction::Skip { reason } => format!("skipped ({reason})"),
        }
    }

    pub fn anchor(&self) -> Option<&AnchorAddress> {
        match self {
            PatchAction::Replace { anchor, .. } | PatchAction::InsertAfter { anchor, .. } => {
                Some(anchor)
            }
            PatchAction::Skip { .. } => None,
        }
    }
}

/// How snapshot positions are mapped onto the document as it is edited.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorMode {
    /// Positions from the single structure map are used as-is.
    #[default]
    Snapshot,
    /// Positions are shifted past paragraphs inserted earlier in the same job.
    ShiftTracked,
}

impl AnchorMode {
    pub fn parse(s: Option<&str>) -> Self {
        match s.unwrap_or("snapshot").trim().to_ascii_lowercase().as_str() {
            "shift_tracked" | "shift-tracked" => Self::ShiftTracked,
            _ => Self::Snapshot,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlanOutcome {
    pub action: PatchAction,
    pub bridge_index: Option<usize>,
    pub target_index: Option<usize>,
    pub bridge_similarity: Option<f64>,
    pub target_similarity: Option<f64>,
}

impl PlanOutcome {
    fn skip(reason: SkipReason) -> Self {
        Self {
            action: PatchAction::Skip { reason },
            bridge_index: None,
            target_index: None,
            bridge_similarity: None,
            target_similarity: None,
        }
    }
}

pub struct PatchPlanner<'a> {
    new_to_bridge: &'a [MatchRecord],
    bridge_to_target: &'a [MatchRecord],
    target_chunks: &'a [Chunk],
    map: &'a StructureMap,
    threshold: f64,
    mode: AnchorMode,
    /// Snapshot positions of anchors that received an insertion.
    insertions: Vec<usize>,
}

impl<'a> PatchPlanner<'a> {
    pub fn new(
        new_to_bridge: &'a [MatchRecord],
        bridge_to_target: &'a [MatchRecord],
        target_chunks: &'a [Chunk],
        map: &'a StructureMap,
        threshold: f64,
        mode: AnchorMode,
    ) -> Self {
        Self {
            new_to_bridge,
            bridge_to_target,
            target_chunks,
            map,
            threshold,
            mode,
            insertions: Vec::new(),
        }
    }

    /// Decide the action for one new chunk against the document's current state.
    /// Chunks must be planned and applied in `sequence_index` order.
    pub fn plan(
        &self,
        chunk: &Chunk,
        doc: &impl ParagraphSource,
    ) -> Result<PlanOutcome, PatchError> {
        let Some(bridge_rec) = self
            .new_to_bridge
            .iter()
            .find(|r| r.source_index == chunk.sequence_index)
        else {
            return Ok(PlanOutcome::skip(SkipReason::NoBridgeMatch));
        };
        let mut out = PlanOutcome::skip(SkipReason::NoBridgeMatch);
        out.bridge_similarity = bridge_rec.similarity;
        let Some(bridge_index) = bridge_rec.target_index else {
            return Ok(out);
        };
        out.bridge_index = Some(bridge_index);

        out.action = PatchAction::Skip {
            reason: SkipReason::NoTargetAnchor,
        };
        let Some(target_rec) = self
            .bridge_to_target
            .iter()
            .find(|r| r.source_index == bridge_index)
        else {
            return Ok(out);
        };
        out.target_similarity = target_rec.similarity;
        let Some(target_index) = target_rec.target_index else {
            return Ok(out);
        };
        out.target_index = Some(target_index);
        let Some(target_chunk) = self.target_chunks.get(target_index) else {
            return Ok(out);
        };

        if target_rec.similarity.unwrap_or(0.0) < self.threshold {
            out.action = PatchAction::Skip {
                reason: SkipReason::BelowThreshold,
            };
            return Ok(out);
        }

        let Some(resolved) = self.map.resolve(&target_chunk.address) else {
            out.action = PatchAction::Skip {
                reason: SkipReason::AnchorNotFound,
            };
            return Ok(out);
        };

        let snapshot = resolved.entry.document_position;
        let current = self.current_position(snapshot);
        let current_text = doc
            .paragraph_text(current)
            .ok_or(PatchError::InvalidAnchor { position: current })?;

        let mut anchor = AnchorAddress {
            section_path: resolved.section_path.to_string(),
            para_idx: resolved.entry.para_idx,
            document_position: current,
            snapshot_position: snapshot,
        };
        out.action = if normalized_eq(&current_text, &target_chunk.text) {
            PatchAction::Replace {
                anchor,
                text: chunk.text.clone(),
            }
        } else {
            anchor.document_position = self.insertion_position(snapshot, current);
            PatchAction::InsertAfter {
                anchor,
                text: chunk.text.clone(),
            }
        };
        Ok(out)
    }

    /// Record an action that was applied to the document.
    pub fn record_applied(&mut self, action: &PatchAction) {
        if let PatchAction::InsertAfter { anchor, .. } = action {
            self.insertions.push(anchor.snapshot_position);
        }
    }

    fn current_position(&self, snapshot: usize) -> usize {
        match self.mode {
            AnchorMode::Snapshot => snapshot,
            AnchorMode::ShiftTracked => {
                snapshot + self.insertions.iter().filter(|&&p| p < snapshot).count()
            }
        }
    }

    /// Paragraph to insert after. In shift-tracked mode earlier insertions at the same
    /// anchor are skipped so new paragraphs keep their planning order.
    fn insertion_position(&self, snapshot: usize, current: usize) -> usize {
        match self.mode {
            AnchorMode::Snapshot => current,
            AnchorMode::ShiftTracked => {
                current + self.insertions.iter().filter(|&&p| p == snapshot).count()
            }
        }
    }
}
