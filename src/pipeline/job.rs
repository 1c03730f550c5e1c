use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;
use tracing::{debug, warn};

use crate::anchor::{AnchorAddress, PatchAction, PatchPlanner, StructureMap};
use crate::chunks::{extract_chunks, Chunk};
use crate::config::Settings;
use crate::docx::model::{build_model, DocumentModel, ModelStore};
use crate::docx::mutate::{OutputLock, WorkingDocument};
use crate::docx::package::DocxPackage;
use crate::progress::{StatusStep, StatusTrail};
use crate::similarity::match_vectors;
use crate::vectors::{embed_texts, load_bounded, CallPolicy, Embedder, VectorSet};

/// Where chunk vectors come from.
#[derive(Clone)]
pub enum VectorSource {
    /// Pre-computed vector files, one per document, aligned with its chunk list.
    Files {
        new: PathBuf,
        bridge: PathBuf,
        target: PathBuf,
    },
    /// Embed chunk texts in-process.
    Embedder(Arc<dyn Embedder>),
}

#[derive(Clone)]
pub struct AlignmentJob {
    pub new_doc: PathBuf,
    pub bridge_doc: PathBuf,
    pub target_doc: PathBuf,
    pub output: PathBuf,
    pub vectors: VectorSource,
    pub settings: Settings,
}

impl AlignmentJob {
    /// `<target_stem><suffix>.docx` next to the target document.
    pub fn default_output_for(target: &Path, suffix: &str) -> PathBuf {
        let stem = target
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("output");
        target.with_file_name(format!("{stem}{suffix}.docx"))
    }
}

/// Cooperative cancellation flag, checked between chunks.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Audit record for one new-document chunk.
#[derive(Clone, Debug, Serialize)]
pub struct ChunkActionRecord {
    pub sequence_index: usize,
    pub new_text: String,
    pub bridge_text: Option<String>,
    pub target_text: Option<String>,
    pub bridge_similarity: Option<f64>,
    pub target_similarity: Option<f64>,
    pub anchor: Option<AnchorAddress>,
    pub action: PatchAction,
    pub action_taken: String,
}

#[derive(Debug, Serialize)]
pub struct JobOutcome {
    pub status: Vec<StatusStep>,
    pub output_path: Option<PathBuf>,
    pub records: Vec<ChunkActionRecord>,
    pub cancelled: bool,
    pub error: Option<String>,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

struct Loaded {
    model: DocumentModel,
    package: DocxPackage,
    chunks: Vec<Chunk>,
}

fn load_document(path: &Path, role: &str) -> anyhow::Result<Loaded> {
    let package = DocxPackage::read(path)
        .with_context(|| format!("open {role} document: {}", path.display()))?;
    let mut model =
        build_model(&package).with_context(|| format!("parse {role} document: {}", path.display()))?;
    model.source_file = Some(path.display().to_string());
    let chunks = extract_chunks(&model);
    Ok(Loaded {
        model,
        package,
        chunks,
    })
}

fn vectors_for(
    source: &VectorSource,
    role: &str,
    doc: &Loaded,
    policy: CallPolicy,
) -> anyhow::Result<VectorSet> {
    let set = match source {
        VectorSource::Files { new, bridge, target } => {
            let path = match role {
                "new" => new,
                "bridge" => bridge,
                _ => target,
            };
            load_bounded(path, policy)?
        }
        VectorSource::Embedder(embedder) => {
            let texts = doc.chunks.iter().map(|c| c.text.clone()).collect();
            embed_texts(Arc::clone(embedder), &doc.model.doc_id, texts, policy)?
        }
    };
    set.check_aligned(doc.chunks.len())
        .with_context(|| format!("{role} vectors do not match its chunks"))?;
    Ok(set)
}

/// Run the three-document alignment. Never panics on bad input; failures are reported
/// in the outcome together with the status trail collected up to that point.
pub fn run_alignment(job: &AlignmentJob, cancel: &CancelToken, echo: bool) -> JobOutcome {
    run_alignment_with(job, cancel, echo, &mut |_| {})
}

/// Like [`run_alignment`], calling `on_chunk` after each chunk's action has been applied
/// to the working copy.
pub fn run_alignment_with(
    job: &AlignmentJob,
    cancel: &CancelToken,
    echo: bool,
    on_chunk: &mut dyn FnMut(&ChunkActionRecord),
) -> JobOutcome {
    let mut trail = StatusTrail::new(echo);
    let mut records = Vec::new();
    let mut cancelled = false;
    let result = run_steps(job, cancel, &mut trail, &mut records, &mut cancelled, on_chunk);
    let (output_path, error) = match result {
        Ok(path) => (Some(path), None),
        Err(e) => {
            warn!(error = %format!("{e:#}"), "alignment job failed");
            trail.step(format!("Error: {e:#}"));
            (None, Some(format!("{e:#}")))
        }
    };
    JobOutcome {
        status: trail.into_steps(),
        output_path,
        records,
        cancelled,
        error,
    }
}

fn run_steps(
    job: &AlignmentJob,
    cancel: &CancelToken,
    trail: &mut StatusTrail,
    records: &mut Vec<ChunkActionRecord>,
    cancelled: &mut bool,
    on_chunk: &mut dyn FnMut(&ChunkActionRecord),
) -> anyhow::Result<PathBuf> {
    let settings = &job.settings;
    let _lock = OutputLock::acquire(&job.output)?;

    trail.step("Loading documents");
    let new_doc = load_document(&job.new_doc, "new")?;
    let bridge_doc = load_document(&job.bridge_doc, "bridge")?;
    let target_doc = load_document(&job.target_doc, "target")?;
    trail.step(format!(
        "Parsed documents: new {} chunks, bridge {} chunks, target {} chunks",
        new_doc.chunks.len(),
        bridge_doc.chunks.len(),
        target_doc.chunks.len()
    ));

    if let Some(dir) = settings.model_dir.as_ref() {
        let store = ModelStore::new(dir.clone());
        for doc in [&new_doc, &bridge_doc, &target_doc] {
            store
                .save(&doc.model)
                .with_context(|| format!("persist model {}", doc.model.doc_id))?;
        }
        trail.step(format!("Stored structural models in {}", dir.display()));
    }

    let policy = CallPolicy {
        timeout: Duration::from_secs(settings.timeout_secs),
        retry_transient: settings.retry_transient,
    };
    trail.step("Fetching chunk vectors");
    let new_vecs = vectors_for(&job.vectors, "new", &new_doc, policy)?;
    let bridge_vecs = vectors_for(&job.vectors, "bridge", &bridge_doc, policy)?;
    let target_vecs = vectors_for(&job.vectors, "target", &target_doc, policy)?;

    trail.step("Matching new → bridge → target");
    let new_to_bridge = match_vectors(
        &new_vecs.vectors,
        &bridge_vecs.vectors,
        settings.bridge_threshold,
    )
    .context("match new to bridge")?;
    let bridge_to_target = match_vectors(&bridge_vecs.vectors, &target_vecs.vectors, 0.0)
        .context("match bridge to target")?;

    let mut working = WorkingDocument::open(&target_doc.package, &settings.highlight)
        .context("open target working copy")?;
    let map = StructureMap::from_blocks(&working.blocks());
    trail.step(format!(
        "Built target structure map: {} sections, {} paragraphs",
        map.sections().len(),
        map.len()
    ));

    let mut planner = PatchPlanner::new(
        &new_to_bridge,
        &bridge_to_target,
        &target_doc.chunks,
        &map,
        settings.similarity_threshold,
        settings.anchor_mode,
    );
    let total = new_doc.chunks.len();
    let report_every = (total / 10).max(1);
    for (i, chunk) in new_doc.chunks.iter().enumerate() {
        if cancel.is_cancelled() {
            *cancelled = true;
            trail.step(format!("Cancelled after {i} of {total} chunks"));
            break;
        }
        let outcome = planner
            .plan(chunk, &working)
            .with_context(|| format!("plan chunk {}", chunk.sequence_index))?;
        working
            .apply(&outcome.action)
            .with_context(|| format!("apply chunk {}", chunk.sequence_index))?;
        planner.record_applied(&outcome.action);
        debug!(chunk = chunk.sequence_index, action = %outcome.action.label(), "chunk processed");

        let record = ChunkActionRecord {
            sequence_index: chunk.sequence_index,
            new_text: chunk.text.clone(),
            bridge_text: outcome
                .bridge_index
                .and_then(|b| bridge_doc.chunks.get(b))
                .map(|c| c.text.clone()),
            target_text: outcome
                .target_index
                .and_then(|t| target_doc.chunks.get(t))
                .map(|c| c.text.clone()),
            bridge_similarity: outcome.bridge_similarity,
            target_similarity: outcome.target_similarity,
            anchor: outcome.action.anchor().cloned(),
            action_taken: outcome.action.label(),
            action: outcome.action,
        };
        on_chunk(&record);
        records.push(record);
        if (i + 1) % report_every == 0 || i + 1 == total {
            trail.progress("Patched chunks", i + 1, total);
        }
    }

    working
        .save(&job.output)
        .with_context(|| format!("save output: {}", job.output.display()))?;
    trail.step(format!("Saved {}", job.output.display()));
    Ok(job.output.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::ParagraphSource;
    use crate::docx::package::testing::simple_docx;
    use crate::vectors::HashedBagOfWords;

    fn write_doc(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, simple_docx(body, "")).expect("write docx");
        path
    }

    fn p(text: &str) -> String {
        format!("<w:p><w:r><w:t>{text}</w:t></w:r></w:p>")
    }

    fn job(dir: &Path) -> AlignmentJob {
        let new_doc = write_doc(dir, "new.docx", &p("alpha beta gamma updated"));
        let bridge_doc = write_doc(dir, "bridge.docx", &p("alpha beta gamma"));
        let target_doc = write_doc(
            dir,
            "target.docx",
            &format!("{}{}", p("alpha beta gamma"), p("other")),
        );
        AlignmentJob {
            output: AlignmentJob::default_output_for(&target_doc, "_new_generated"),
            new_doc,
            bridge_doc,
            target_doc,
            vectors: VectorSource::Embedder(Arc::new(HashedBagOfWords::default())),
            settings: Settings::default(),
        }
    }

    #[test]
    fn default_output_name() {
        assert_eq!(
            AlignmentJob::default_output_for(Path::new("/d/plan.docx"), "_new_generated"),
            PathBuf::from("/d/plan_new_generated.docx")
        );
    }

    #[test]
    fn lexical_job_replaces_matching_anchor() {
        let dir = tempfile::tempdir().expect("tempdir");
        let job = job(dir.path());
        let out = run_alignment(&job, &CancelToken::new(), false);
        assert!(out.is_success(), "{:?}", out.error);
        assert_eq!(out.records.len(), 1);
        assert!(matches!(out.records[0].action, PatchAction::Replace { .. }));
        assert_eq!(out.records[0].target_text.as_deref(), Some("alpha beta gamma"));

        let pkg = DocxPackage::read(&job.output).expect("output");
        let doc = WorkingDocument::open(&pkg, "yellow").expect("open");
        assert_eq!(
            doc.paragraph_text(0).as_deref(),
            Some("alpha beta gamma updated")
        );
        assert_eq!(doc.paragraph_text(1).as_deref(), Some("other"));
    }

    #[test]
    fn cancelled_job_saves_untouched_copy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let job = job(dir.path());
        let token = CancelToken::new();
        token.cancel();
        let out = run_alignment(&job, &token, false);
        assert!(out.cancelled);
        assert!(out.records.is_empty());
        assert!(job.output.exists());
    }

    #[test]
    fn cancel_between_chunks_keeps_applied_ones() {
        let dir = tempfile::tempdir().expect("tempdir");
        let d = dir.path();
        let mut job = job(d);
        job.new_doc = write_doc(
            d,
            "new2.docx",
            &format!("{}{}", p("alpha beta gamma updated"), p("delta epsilon zeta updated")),
        );
        job.bridge_doc = write_doc(
            d,
            "bridge2.docx",
            &format!("{}{}", p("alpha beta gamma"), p("delta epsilon zeta")),
        );
        job.target_doc = write_doc(
            d,
            "target2.docx",
            &format!("{}{}", p("alpha beta gamma"), p("delta epsilon zeta")),
        );

        let token = CancelToken::new();
        let mut seen = 0;
        let out = run_alignment_with(&job, &token, false, &mut |_| {
            seen += 1;
            token.cancel();
        });
        assert!(out.is_success(), "{:?}", out.error);
        assert!(out.cancelled);
        assert_eq!(seen, 1);
        assert_eq!(out.records.len(), 1);
        assert!(matches!(out.records[0].action, PatchAction::Replace { .. }));

        let pkg = DocxPackage::read(&job.output).expect("output");
        let doc = WorkingDocument::open(&pkg, "yellow").expect("open");
        assert_eq!(
            doc.paragraph_text(0).as_deref(),
            Some("alpha beta gamma updated")
        );
        assert_eq!(doc.paragraph_text(1).as_deref(), Some("delta epsilon zeta"));
    }

    #[test]
    fn missing_input_reports_status_and_writes_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut job = job(dir.path());
        job.bridge_doc = dir.path().join("absent.docx");
        let out = run_alignment(&job, &CancelToken::new(), false);
        assert!(!out.is_success());
        assert!(out.output_path.is_none());
        assert!(!job.output.exists());
        assert!(out.status.iter().any(|s| s.message.starts_with("Loading")));
        assert!(out.status.last().expect("step").message.starts_with("Error"));
    }

    #[test]
    fn mismatched_vector_file_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut job = job(dir.path());
        let bad = dir.path().join("bad.json");
        VectorSet {
            doc_id: String::new(),
            dimension: 2,
            vectors: vec![],
        }
        .save(&bad)
        .expect("save");
        job.vectors = VectorSource::Files {
            new: bad.clone(),
            bridge: bad.clone(),
            target: bad,
        };
        let out = run_alignment(&job, &CancelToken::new(), false);
        assert!(out.error.expect("error").contains("new vectors"));
    }
}
