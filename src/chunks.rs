//! Flattening of a structural model into the text chunks used for matching.

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::docx::model::{ContentUnit, DocumentModel, UnitKind};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkAddress {
    pub section_path: String,
    pub para_idx: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub sequence_index: usize,
    pub text: String,
    pub address: ChunkAddress,
    pub source_kind: UnitKind,
    pub document_order_index: usize,
    pub document_position: usize,
    pub style_name: String,
}

/// Chunk list of one document, in document order. Units with no text are left out;
/// `sequence_index` numbers the chunks that remain.
pub fn extract_chunks(model: &DocumentModel) -> Vec<Chunk> {
    model
        .units()
        .into_iter()
        .filter(|u| !u.text.is_empty())
        .enumerate()
        .map(|(sequence_index, u)| chunk_from_unit(sequence_index, u))
        .collect()
}

fn chunk_from_unit(sequence_index: usize, unit: &ContentUnit) -> Chunk {
    Chunk {
        sequence_index,
        text: unit.text.clone(),
        address: ChunkAddress {
            section_path: unit.section_path.clone(),
            para_idx: unit.para_idx,
        },
        source_kind: unit.kind,
        document_order_index: unit.document_order_index,
        document_position: unit.position,
        style_name: unit.style_name.clone(),
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChunkFile {
    pub doc_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    pub chunks: Vec<Chunk>,
}

pub fn write_chunks_json(model: &DocumentModel, out: &Path) -> anyhow::Result<usize> {
    let file = ChunkFile {
        doc_id: model.doc_id.clone(),
        source_file: model.source_file.clone(),
        chunks: extract_chunks(model),
    };
    let n = file.chunks.len();
    let json = serde_json::to_string_pretty(&file).context("serialize chunks json")?;
    fs::write(out, json).with_context(|| format!("write chunks json: {}", out.display()))?;
    Ok(n)
}
