use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocxError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("xml error in {part}: {message}")]
    Xml { part: String, message: String },

    #[error("missing package part: {0}")]
    MissingPart(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DocxError {
    pub fn xml(part: &str, message: impl std::fmt::Display) -> Self {
        Self::Xml {
            part: part.to_string(),
            message: message.to_string(),
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum MatchError {
    #[error("vector {index} has dimension {found}, expected {expected}")]
    DimensionMismatch {
        expected: usize,
        found: usize,
        index: usize,
    },

    #[error("{vectors} vectors supplied for {chunks} chunks")]
    LengthMismatch { chunks: usize, vectors: usize },
}

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("anchor position {position} does not resolve to a paragraph")]
    InvalidAnchor { position: usize },

    #[error("output already being written: {}", .0.display())]
    OutputLocked(PathBuf),

    #[error(transparent)]
    Docx(#[from] DocxError),
}
