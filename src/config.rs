use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::anchor::{AnchorMode, DEFAULT_SIMILARITY_THRESHOLD};

pub const CONFIG_FILE_NAME: &str = "docx-aligner.toml";
pub const CONFIG_ENV_VAR: &str = "DOCX_ALIGNER_CONFIG";

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub matching: MatchingSection,
    #[serde(default)]
    pub patch: PatchSection,
    #[serde(default)]
    pub io: IoSection,
    #[serde(default)]
    pub storage: StorageSection,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct MatchingSection {
    /// Minimum bridge→target similarity for an anchor to be used.
    #[serde(default)]
    pub similarity_threshold: Option<f64>,
    /// Acceptance threshold for new→bridge matches.
    #[serde(default)]
    pub bridge_threshold: Option<f64>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PatchSection {
    /// `w:highlight` colour marking written text; empty disables marking.
    #[serde(default)]
    pub highlight: Option<String>,
    #[serde(default)]
    pub output_suffix: Option<String>,
    /// "snapshot" or "shift_tracked".
    #[serde(default)]
    pub anchor_mode: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct IoSection {
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub retry_transient: Option<bool>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct StorageSection {
    /// Where persisted structural models go. Relative paths resolve against the config
    /// file directory.
    #[serde(default)]
    pub model_dir: Option<PathBuf>,
    /// Where action logs go (default: next to the output document).
    #[serde(default)]
    pub report_dir: Option<PathBuf>,
}

/// Effective settings after file values and command-line overrides are merged.
#[derive(Clone, Debug)]
pub struct Settings {
    pub config_path: Option<PathBuf>,
    pub similarity_threshold: f64,
    pub bridge_threshold: f64,
    pub highlight: String,
    pub output_suffix: String,
    pub anchor_mode: AnchorMode,
    pub timeout_secs: u64,
    pub retry_transient: bool,
    pub model_dir: Option<PathBuf>,
    pub report_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default(), None)
    }
}

impl Settings {
    pub fn from_config(cfg: &AppConfig, config_path: Option<&Path>) -> Self {
        let config_dir = config_path
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let resolve = |p: &PathBuf| {
            if p.is_relative() {
                config_dir.join(p)
            } else {
                p.clone()
            }
        };
        Self {
            config_path: config_path.map(Path::to_path_buf),
            similarity_threshold: cfg
                .matching
                .similarity_threshold
                .unwrap_or(DEFAULT_SIMILARITY_THRESHOLD)
                .clamp(0.0, 1.0),
            bridge_threshold: cfg.matching.bridge_threshold.unwrap_or(0.0).clamp(0.0, 1.0),
            highlight: cfg
                .patch
                .highlight
                .clone()
                .unwrap_or_else(|| "yellow".to_string()),
            output_suffix: cfg
                .patch
                .output_suffix
                .clone()
                .unwrap_or_else(|| "_new_generated".to_string()),
            anchor_mode: AnchorMode::parse(cfg.patch.anchor_mode.as_deref()),
            timeout_secs: cfg.io.timeout_secs.unwrap_or(30).max(1),
            retry_transient: cfg.io.retry_transient.unwrap_or(true),
            model_dir: cfg.storage.model_dir.as_ref().map(resolve),
            report_dir: cfg.storage.report_dir.as_ref().map(resolve),
        }
    }

    /// Locate and load the config file: explicit path, then the environment variable,
    /// then an upward search from the cwd and `workdir`. No file means defaults.
    pub fn discover(explicit: Option<PathBuf>, workdir: &Path) -> anyhow::Result<Self> {
        let cfg_file = explicit
            .or_else(|| std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from))
            .or_else(|| find_default_config(workdir, CONFIG_FILE_NAME));
        match cfg_file {
            Some(p) if p.exists() => {
                let cfg = load_config(&p)?;
                Ok(Self::from_config(&cfg, Some(&p)))
            }
            _ => Ok(Self::default()),
        }
    }
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = start_dir;
    for _ in 0..=max_levels {
        let candidate = dir.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
    None
}

pub fn find_default_config(workdir: &Path, filename: &str) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, filename, 8) {
            return Some(p);
        }
    }
    find_file_upwards(workdir, filename, 8)
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&text).context("parse config toml")?;
    Ok(cfg)
}

const DEFAULT_CONFIG_TOML: &str = r#"[matching]
# Minimum bridge->target similarity (0..1) before a target paragraph is used as an anchor.
similarity_threshold = 0.7
# Acceptance threshold for new->bridge matches. 0 accepts the best bridge chunk always.
bridge_threshold = 0.0

[patch]
# Highlight colour marking written text ("" disables marking).
highlight = "yellow"
# Output file name: <target_stem><output_suffix>.docx
output_suffix = "_new_generated"
# "snapshot": anchor positions from one structure map taken before editing.
# "shift_tracked": positions are moved past paragraphs inserted earlier in the job.
anchor_mode = "snapshot"

[io]
timeout_secs = 30
retry_transient = true

[storage]
# model_dir = "_models"
# report_dir = "_reports"
"#;

pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;
    let cfg_path = dir.join(CONFIG_FILE_NAME);
    if cfg_path.exists() && !force {
        return Ok(cfg_path);
    }
    std::fs::write(&cfg_path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("write config: {}", cfg_path.display()))?;
    Ok(cfg_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        let s = Settings::default();
        assert_eq!(s.similarity_threshold, 0.7);
        assert_eq!(s.bridge_threshold, 0.0);
        assert_eq!(s.highlight, "yellow");
        assert_eq!(s.output_suffix, "_new_generated");
        assert_eq!(s.anchor_mode, AnchorMode::Snapshot);
        assert_eq!(s.timeout_secs, 30);
        assert!(s.retry_transient);
    }

    #[test]
    fn written_default_parses_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = init_default_config(dir.path(), false).expect("init");
        let cfg = load_config(&path).expect("load");
        let s = Settings::from_config(&cfg, Some(&path));
        assert_eq!(s.similarity_threshold, 0.7);
        assert_eq!(s.anchor_mode, AnchorMode::Snapshot);
        assert!(s.model_dir.is_none());
    }

    #[test]
    fn partial_file_and_relative_dirs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            "[matching]\nsimilarity_threshold = 0.85\n[patch]\nanchor_mode = \"shift_tracked\"\n[storage]\nmodel_dir = \"models\"\n",
        )
        .expect("write");
        let s = Settings::discover(Some(path.clone()), dir.path()).expect("discover");
        assert_eq!(s.similarity_threshold, 0.85);
        assert_eq!(s.anchor_mode, AnchorMode::ShiftTracked);
        assert_eq!(s.model_dir, Some(dir.path().join("models")));
        assert_eq!(s.highlight, "yellow");
    }

    #[test]
    fn upward_search_finds_parent_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).expect("mkdir");
        std::fs::write(dir.path().join("marker.toml"), "").expect("write");
        assert_eq!(
            find_file_upwards(&nested, "marker.toml", 8),
            Some(dir.path().join("marker.toml"))
        );
        assert_eq!(find_file_upwards(&nested, "marker.toml", 1), None);
    }
}
