use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{CommandFactory, Parser};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use docx_aligner::chunks::write_chunks_json;
use docx_aligner::config::{init_default_config, Settings};
use docx_aligner::docx::model::{build_model_from_path, save_model};
use docx_aligner::pipeline::{
    action_log_paths, run_alignment, write_action_log, AlignmentJob, CancelToken, VectorSource,
};
use docx_aligner::vectors::HashedBagOfWords;

#[derive(Parser, Debug)]
#[command(name = "docx-aligner")]
#[command(about = "Structural DOCX extraction and three-document similarity patching", long_about = None)]
struct Args {
    /// Generate a default config file, then exit
    #[arg(long)]
    init_config: bool,

    /// Directory to write the config file (default: current directory)
    #[arg(long, value_name = "DIR")]
    init_config_dir: Option<PathBuf>,

    /// Overwrite an existing config file when used with --init-config
    #[arg(long)]
    force: bool,

    /// Input .docx for the extraction modes
    #[arg(value_name = "DOCX")]
    input: Option<PathBuf>,

    /// Write the structural model of DOCX as JSON
    #[arg(long, value_name = "JSON")]
    extract_model_json: Option<PathBuf>,

    /// Write the chunk list of DOCX as JSON (input for an external embedder)
    #[arg(long, value_name = "JSON")]
    extract_chunks_json: Option<PathBuf>,

    /// New document carrying the content to bring over
    #[arg(long, value_name = "DOCX")]
    new: Option<PathBuf>,

    /// Prior version of the new document, used to locate anchors
    #[arg(long, value_name = "DOCX")]
    bridge: Option<PathBuf>,

    /// Document to update
    #[arg(long, value_name = "DOCX")]
    target: Option<PathBuf>,

    /// Vector file aligned with the new document's chunks
    #[arg(long, value_name = "JSON")]
    new_vectors: Option<PathBuf>,

    /// Vector file aligned with the bridge document's chunks
    #[arg(long, value_name = "JSON")]
    bridge_vectors: Option<PathBuf>,

    /// Vector file aligned with the target document's chunks
    #[arg(long, value_name = "JSON")]
    target_vectors: Option<PathBuf>,

    /// Use the built-in lexical embedder instead of vector files
    #[arg(long)]
    lexical_vectors: bool,

    /// Output .docx (default: <target_stem>_new_generated.docx)
    #[arg(short, long, value_name = "DOCX")]
    output: Option<PathBuf>,

    /// Minimum bridge→target similarity for an anchor (0..1)
    #[arg(long)]
    threshold: Option<f64>,

    /// Config file path (default: search for docx-aligner.toml upwards)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if args.init_config {
        let dir = args
            .init_config_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let cfg_path = init_default_config(&dir, args.force).context("init default config")?;
        eprintln!("Wrote config: {}", cfg_path.display());
        return Ok(());
    }

    if let Some(out) = args.extract_model_json.as_ref() {
        let input = args
            .input
            .as_ref()
            .context("missing DOCX for --extract-model-json")?;
        let model = build_model_from_path(input)?;
        save_model(&model, out).with_context(|| format!("write model: {}", out.display()))?;
        eprintln!("Wrote model: {}", out.display());
        return Ok(());
    }

    if let Some(out) = args.extract_chunks_json.as_ref() {
        let input = args
            .input
            .as_ref()
            .context("missing DOCX for --extract-chunks-json")?;
        let model = build_model_from_path(input)?;
        let n = write_chunks_json(&model, out)?;
        eprintln!("Wrote {n} chunks: {}", out.display());
        return Ok(());
    }

    let (new_doc, bridge_doc, target_doc) = match (args.new, args.bridge, args.target) {
        (Some(n), Some(b), Some(t)) => (n, b, t),
        (None, None, None) => {
            let mut cmd = Args::command();
            cmd.print_help().context("print help")?;
            eprintln!(
                "\n\nUSAGE:\n  docx-aligner --new NEW.docx --bridge OLD.docx --target DOC.docx --lexical-vectors\n  docx-aligner --extract-chunks-json chunks.json DOC.docx\n"
            );
            return Ok(());
        }
        _ => {
            return Err(anyhow!(
                "alignment requires all of --new, --bridge and --target"
            ))
        }
    };

    let workdir = target_doc
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    let mut settings = Settings::discover(args.config, &workdir)?;
    if let Some(t) = args.threshold {
        settings.similarity_threshold = t.clamp(0.0, 1.0);
    }

    let vectors = if args.lexical_vectors {
        VectorSource::Embedder(Arc::new(HashedBagOfWords::default()))
    } else {
        match (args.new_vectors, args.bridge_vectors, args.target_vectors) {
            (Some(new), Some(bridge), Some(target)) => VectorSource::Files {
                new,
                bridge,
                target,
            },
            _ => {
                return Err(anyhow!(
                    "provide --new-vectors, --bridge-vectors and --target-vectors, or --lexical-vectors"
                ))
            }
        }
    };

    let output = args
        .output
        .unwrap_or_else(|| AlignmentJob::default_output_for(&target_doc, &settings.output_suffix));
    let report_dir = settings.report_dir.clone();
    let job = AlignmentJob {
        new_doc,
        bridge_doc,
        target_doc,
        output: output.clone(),
        vectors,
        settings,
    };

    let outcome = run_alignment(&job, &CancelToken::new(), false);

    let (json_path, txt_path) = action_log_paths(&output, report_dir.as_deref());
    if let Err(e) = write_action_log(&outcome, &json_path, &txt_path) {
        warn!(error = %format!("{e:#}"), "could not write action log");
    } else {
        eprintln!("Action log: {}", txt_path.display());
    }

    if let Some(err) = outcome.error {
        return Err(anyhow!(err));
    }
    println!("{}", output.display());
    Ok(())
}
