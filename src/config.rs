//! Configuration for the anvil orchestrator.
//!
//! Settings are layered: built-in defaults, then `.anvil/anvil.toml`, then
//! CLI overrides applied by the command layer. The result is an explicit
//! `BuildConfig` value constructed once and passed by reference into the
//! packer, scheduler, and orchestrator — there is no ambient global state.
//!
//! # Configuration File Format
//!
//! ```toml
//! [packer]
//! max_context_tokens = 32000
//! reserved_output_tokens = 4000
//! max_chunk_tokens = 2000
//! overlap_tokens = 200
//! chars_per_token = 4.0
//! chunk_strategy = "semantic"
//!
//! [limits]
//! max_tokens = 2000000
//! max_cost = 25.0
//!
//! [run]
//! phases = ["Scaffolding", "Core types"]
//! ```

use anyhow::{Context, Result, anyhow};
use glob::glob;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::packer::ChunkStrategy;

/// Token-budget and resource-ceiling values consumed by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Model context window in estimated tokens
    pub max_context_tokens: usize,
    /// Tokens reserved for model output; subtracted from the context window
    pub reserved_output_tokens: usize,
    /// Per-chunk token ceiling for the packer
    pub max_chunk_tokens: usize,
    /// Overlap carried between consecutive chunks split from one unit
    pub overlap_tokens: usize,
    /// Characters-per-token ratio for the estimator
    pub chars_per_token: f64,
    /// Chunking strategy selector
    pub chunk_strategy: ChunkStrategy,
    /// Global token ceiling for the whole build (None = unlimited)
    pub max_tokens: Option<u64>,
    /// Global cost ceiling in dollars for the whole build (None = unlimited)
    pub max_cost: Option<f64>,
    /// Optional allowlist of phase names to execute
    pub phase_allowlist: Option<Vec<String>>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: 32_000,
            reserved_output_tokens: 4_000,
            max_chunk_tokens: 2_000,
            overlap_tokens: 200,
            chars_per_token: 4.0,
            chunk_strategy: ChunkStrategy::default(),
            max_tokens: None,
            max_cost: None,
            phase_allowlist: None,
        }
    }
}

impl BuildConfig {
    /// The space available for assembled context:
    /// `max_context_tokens - reserved_output_tokens`.
    pub fn effective_context_budget(&self) -> usize {
        self.max_context_tokens
            .saturating_sub(self.reserved_output_tokens)
    }

    /// Check whether a phase is allowed to execute under the allowlist.
    pub fn phase_allowed(&self, phase_name: &str) -> bool {
        match &self.phase_allowlist {
            Some(names) => names.iter().any(|n| n == phase_name),
            None => true,
        }
    }
}

/// On-disk layout of `.anvil/anvil.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    packer: PackerSection,
    #[serde(default)]
    limits: LimitsSection,
    #[serde(default)]
    run: RunSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PackerSection {
    max_context_tokens: Option<usize>,
    reserved_output_tokens: Option<usize>,
    max_chunk_tokens: Option<usize>,
    overlap_tokens: Option<usize>,
    chars_per_token: Option<f64>,
    chunk_strategy: Option<ChunkStrategy>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct LimitsSection {
    max_tokens: Option<u64>,
    max_cost: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RunSection {
    phases: Option<Vec<String>>,
}

impl ConfigFile {
    fn apply(self, config: &mut BuildConfig) {
        let p = self.packer;
        if let Some(v) = p.max_context_tokens {
            config.max_context_tokens = v;
        }
        if let Some(v) = p.reserved_output_tokens {
            config.reserved_output_tokens = v;
        }
        if let Some(v) = p.max_chunk_tokens {
            config.max_chunk_tokens = v;
        }
        if let Some(v) = p.overlap_tokens {
            config.overlap_tokens = v;
        }
        if let Some(v) = p.chars_per_token {
            config.chars_per_token = v;
        }
        if let Some(v) = p.chunk_strategy {
            config.chunk_strategy = v;
        }
        if let Some(v) = self.limits.max_tokens {
            config.max_tokens = Some(v);
        }
        if let Some(v) = self.limits.max_cost {
            config.max_cost = Some(v);
        }
        if let Some(v) = self.run.phases {
            config.phase_allowlist = Some(v);
        }
    }
}

/// Filesystem layout of the `.anvil/` state directory.
///
/// Separate from `Config` so status and reset work without a spec file.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub anvil_dir: PathBuf,
    pub plan_file: PathBuf,
    pub checkpoint_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl ProjectPaths {
    pub fn new(project_dir: &Path) -> Self {
        let anvil_dir = project_dir.join(".anvil");
        Self {
            plan_file: anvil_dir.join("plan.json"),
            checkpoint_dir: anvil_dir.join("checkpoints"),
            log_dir: anvil_dir.join("logs"),
            anvil_dir,
        }
    }
}

/// Runtime configuration: project paths plus the build values.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub spec_file: PathBuf,
    pub anvil_dir: PathBuf,
    pub plan_file: PathBuf,
    pub checkpoint_dir: PathBuf,
    pub log_dir: PathBuf,
    pub verbose: bool,
    pub build: BuildConfig,
}

impl Config {
    /// Create a new Config, discovering the spec file and layering
    /// `.anvil/anvil.toml` over the defaults.
    pub fn new(project_dir: PathBuf, verbose: bool, spec_file: Option<PathBuf>) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;

        let spec_file = match spec_file {
            Some(path) => path
                .canonicalize()
                .context("Failed to resolve spec file path")?,
            None => Self::find_spec_file(&project_dir)?,
        };

        let ProjectPaths {
            anvil_dir,
            plan_file,
            checkpoint_dir,
            log_dir,
        } = ProjectPaths::new(&project_dir);

        let mut build = BuildConfig::default();
        let config_path = anvil_dir.join("anvil.toml");
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            let file: ConfigFile = toml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", config_path.display()))?;
            file.apply(&mut build);
        }

        Ok(Self {
            project_dir,
            spec_file,
            anvil_dir,
            plan_file,
            checkpoint_dir,
            log_dir,
            verbose,
            build,
        })
    }

    /// Create the `.anvil/` state directories if missing.
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.checkpoint_dir)
            .context("Failed to create checkpoint directory")?;
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        Ok(())
    }

    /// Find a spec file, checking `.anvil/spec.md` first, then
    /// `docs/plans/*spec*.md` (most recently modified wins).
    fn find_spec_file(project_dir: &Path) -> Result<PathBuf> {
        let anvil_spec = project_dir.join(".anvil/spec.md");
        if anvil_spec.exists() {
            return Ok(anvil_spec);
        }

        let pattern = project_dir
            .join("docs/plans/*spec*.md")
            .to_string_lossy()
            .to_string();

        let mut spec_files: Vec<PathBuf> = glob(&pattern)
            .context("Failed to read glob pattern")?
            .filter_map(|entry| entry.ok())
            .collect();

        if spec_files.is_empty() {
            return Err(anyhow!(
                "No spec file found. Create .anvil/spec.md or provide --spec-file"
            ));
        }

        spec_files.sort_by(|a, b| {
            let a_time = a.metadata().and_then(|m| m.modified()).ok();
            let b_time = b.metadata().and_then(|m| m.modified()).ok();
            b_time.cmp(&a_time)
        });

        Ok(spec_files.remove(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn setup_spec_file(dir: &Path) -> PathBuf {
        let anvil_dir = dir.join(".anvil");
        fs::create_dir_all(&anvil_dir).unwrap();
        let spec_file = anvil_dir.join("spec.md");
        fs::write(&spec_file, "# Test Spec").unwrap();
        spec_file
    }

    #[test]
    fn test_effective_context_budget() {
        let config = BuildConfig::default();
        assert_eq!(config.effective_context_budget(), 28_000);

        let tight = BuildConfig {
            max_context_tokens: 100,
            reserved_output_tokens: 200,
            ..BuildConfig::default()
        };
        assert_eq!(tight.effective_context_budget(), 0);
    }

    #[test]
    fn test_phase_allowed() {
        let mut config = BuildConfig::default();
        assert!(config.phase_allowed("anything"));

        config.phase_allowlist = Some(vec!["Core".to_string()]);
        assert!(config.phase_allowed("Core"));
        assert!(!config.phase_allowed("Extras"));
    }

    #[test]
    fn test_config_new_discovers_anvil_spec() {
        let dir = tempdir().unwrap();
        let spec = setup_spec_file(dir.path());
        let config = Config::new(dir.path().to_path_buf(), false, None).unwrap();
        assert!(config.spec_file.ends_with(".anvil/spec.md"));
        assert_eq!(
            fs::read_to_string(&config.spec_file).unwrap(),
            fs::read_to_string(spec).unwrap()
        );
    }

    #[test]
    fn test_config_new_docs_plans_fallback() {
        let dir = tempdir().unwrap();
        let plans_dir = dir.path().join("docs/plans");
        fs::create_dir_all(&plans_dir).unwrap();
        fs::write(plans_dir.join("my-spec.md"), "# Spec").unwrap();

        let config = Config::new(dir.path().to_path_buf(), false, None).unwrap();
        assert!(config.spec_file.ends_with("my-spec.md"));
    }

    #[test]
    fn test_config_new_no_spec_file_error() {
        let dir = tempdir().unwrap();
        let result = Config::new(dir.path().to_path_buf(), false, None);
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("No spec file found")
        );
    }

    #[test]
    fn test_config_layers_toml_over_defaults() {
        let dir = tempdir().unwrap();
        setup_spec_file(dir.path());
        fs::write(
            dir.path().join(".anvil/anvil.toml"),
            r#"
[packer]
max_chunk_tokens = 512
chunk_strategy = "sliding_window"

[limits]
max_cost = 12.5

[run]
phases = ["Core"]
"#,
        )
        .unwrap();

        let config = Config::new(dir.path().to_path_buf(), false, None).unwrap();
        assert_eq!(config.build.max_chunk_tokens, 512);
        assert_eq!(config.build.chunk_strategy, ChunkStrategy::SlidingWindow);
        assert_eq!(config.build.max_cost, Some(12.5));
        assert_eq!(
            config.build.phase_allowlist,
            Some(vec!["Core".to_string()])
        );
        // Untouched values keep their defaults.
        assert_eq!(config.build.max_context_tokens, 32_000);
        assert_eq!(config.build.max_tokens, None);
    }

    #[test]
    fn test_config_invalid_toml_errors() {
        let dir = tempdir().unwrap();
        setup_spec_file(dir.path());
        fs::write(dir.path().join(".anvil/anvil.toml"), "not [valid").unwrap();

        let result = Config::new(dir.path().to_path_buf(), false, None);
        assert!(result.is_err());
    }

    #[test]
    fn test_ensure_directories() {
        let dir = tempdir().unwrap();
        setup_spec_file(dir.path());
        let config = Config::new(dir.path().to_path_buf(), false, None).unwrap();
        config.ensure_directories().unwrap();
        assert!(config.checkpoint_dir.exists());
        assert!(config.log_dir.exists());
    }
}
