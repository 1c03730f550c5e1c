pub mod job;
pub mod report;

pub use job::{
    run_alignment, run_alignment_with, AlignmentJob, CancelToken, ChunkActionRecord, JobOutcome,
    VectorSource,
};
pub use report::{action_log_paths, render_text_report, write_action_log};
