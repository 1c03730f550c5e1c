pub mod anchor;
pub mod chunks;
pub mod config;
pub mod docx;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod similarity;
pub mod textutil;
pub mod vectors;
