//! Similarity Matcher: all-pairs cosine similarity and best-match extraction over
//! externally produced vectors.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::MatchError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub source_index: usize,
    /// Best target, or `None` when there is no target or the best score is below the
    /// acceptance threshold.
    pub target_index: Option<usize>,
    /// Best score in `[0, 1]`, reported even when below the threshold. `None` only when
    /// the target set is empty.
    pub similarity: Option<f64>,
}

/// Cosine similarity of two vectors, `0.0` when either has zero magnitude.
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

fn check_dimensions(source: &[Vec<f32>], target: &[Vec<f32>]) -> Result<(), MatchError> {
    let Some(expected) = source.first().or_else(|| target.first()).map(Vec::len) else {
        return Ok(());
    };
    for (index, v) in source.iter().chain(target.iter()).enumerate() {
        if v.len() != expected {
            return Err(MatchError::DimensionMismatch {
                expected,
                found: v.len(),
                index,
            });
        }
    }
    Ok(())
}

/// Row-major `source.len() x target.len()` cosine matrix.
pub fn similarity_matrix(
    source: &[Vec<f32>],
    target: &[Vec<f32>],
) -> Result<Vec<Vec<f64>>, MatchError> {
    check_dimensions(source, target)?;
    Ok(source
        .iter()
        .map(|s| target.iter().map(|t| cosine(s, t)).collect())
        .collect())
}

/// Best target per source vector. Ties go to the lowest target index.
pub fn match_vectors(
    source: &[Vec<f32>],
    target: &[Vec<f32>],
    threshold: f64,
) -> Result<Vec<MatchRecord>, MatchError> {
    let matrix = similarity_matrix(source, target)?;
    Ok(matrix
        .iter()
        .enumerate()
        .map(|(source_index, row)| best_in_row(source_index, row, threshold))
        .collect())
}

fn best_in_row(source_index: usize, row: &[f64], threshold: f64) -> MatchRecord {
    let mut best: Option<(usize, f64)> = None;
    for (j, &score) in row.iter().enumerate() {
        let better = match best {
            None => true,
            Some((_, b)) => rank(score, b) == Ordering::Greater,
        };
        if better {
            best = Some((j, score));
        }
    }
    match best {
        None => MatchRecord {
            source_index,
            target_index: None,
            similarity: None,
        },
        Some((j, raw)) => {
            let similarity = if raw.is_nan() { 0.0 } else { raw.clamp(0.0, 1.0) };
            MatchRecord {
                source_index,
                target_index: (similarity >= threshold).then_some(j),
                similarity: Some(similarity),
            }
        }
    }
}

/// NaN ranks below every number.
fn rank(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}
