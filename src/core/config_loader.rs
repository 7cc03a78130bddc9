//! Configuration file loader for layer-publisher
//!
//! This module provides configuration loading, validation, and merging capabilities.

use super::config::*;
use super::variant::{PACKAGE_SOURCE_ENV, resolve_package_source};
use crate::core::error::PipelineError;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Configuration file name
pub const CONFIG_FILENAME: &str = ".layer-publish.yaml";

/// Comma-separated region override
pub const REGIONS_ENV: &str = "LAYER_PUBLISH_REGIONS";

/// Output directory override
pub const OUTPUT_DIR_ENV: &str = "LAYER_PUBLISH_OUTPUT_DIR";

/// Environment variable pattern (${VAR_NAME})
const ENV_VAR_PATTERN: &str = r"\$\{([A-Z_][A-Z0-9_]*)\}";

/// Overrides taken from the command line
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub regions: Option<Vec<String>>,
    pub output_dir: Option<PathBuf>,
    pub max_concurrency: Option<usize>,
}

/// Configuration load options
#[derive(Debug, Clone)]
pub struct ConfigLoadOptions {
    /// Project path to load `.layer-publish.yaml` from
    pub project_path: PathBuf,

    /// Explicit configuration file; must exist when given
    pub config_path: Option<PathBuf>,

    /// CLI arguments (highest priority)
    pub cli: CliOverrides,

    /// Environment variables
    pub env: HashMap<String, String>,
}

impl ConfigLoadOptions {
    pub fn new<P: Into<PathBuf>>(project_path: P) -> Self {
        Self {
            project_path: project_path.into(),
            config_path: None,
            cli: CliOverrides::default(),
            env: HashMap::new(),
        }
    }
}

/// Configuration validation result
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationResult {
    pub valid: bool,
    pub errors: Vec<ConfigValidationIssue>,
    pub warnings: Vec<ConfigValidationIssue>,
}

/// One validation finding
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationIssue {
    /// Field path (e.g., "publish.max_concurrency")
    pub field: String,
    pub message: String,
}

impl ConfigValidationIssue {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Configuration file loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from multiple sources with priority
    ///
    /// Priority (high to low):
    /// 1. CLI arguments
    /// 2. Environment variables
    /// 3. Config file (`--config` or ./.layer-publish.yaml)
    /// 4. Default values
    pub async fn load(options: ConfigLoadOptions) -> Result<PipelineConfig, PipelineError> {
        let mut config = match &options.config_path {
            Some(path) => Self::load_config_file(path).await?.ok_or_else(|| {
                PipelineError::ConfigError(format!("config file not found: {}", path.display()))
            })?,
            None => Self::load_config_file(&options.project_path.join(CONFIG_FILENAME))
                .await?
                .unwrap_or_default(),
        };

        // Only the file value is expanded, the PIP_TARGET override is used as given
        config.package.source = Self::expand_string(&config.package.source, &options.env)?;

        Self::apply_env(&mut config, &options.env);
        Self::apply_cli(&mut config, options.cli);

        if config.output_dir.is_relative() {
            config.output_dir = options.project_path.join(&config.output_dir);
        }

        let validation = Self::validate(&config);
        for warning in &validation.warnings {
            warn!(field = %warning.field, "{}", warning.message);
        }
        if !validation.valid {
            return Err(PipelineError::ConfigError(Self::format_validation_result(
                &validation,
            )));
        }

        Ok(config)
    }

    /// Load configuration from a YAML file, `None` when absent
    async fn load_config_file(file_path: &Path) -> Result<Option<PipelineConfig>, PipelineError> {
        if !file_path.exists() {
            debug!(path = %file_path.display(), "no configuration file");
            return Ok(None);
        }

        let content = fs::read_to_string(file_path).await.map_err(|e| {
            PipelineError::ConfigError(format!("Failed to read config file: {}", e))
        })?;

        let config: PipelineConfig = serde_yaml::from_str(&content).map_err(|e| {
            PipelineError::ConfigError(format!("Failed to parse YAML config: {}", e))
        })?;

        debug!(path = %file_path.display(), "loaded configuration file");
        Ok(Some(config))
    }

    /// Apply environment overrides
    fn apply_env(config: &mut PipelineConfig, env: &HashMap<String, String>) {
        if let Some(source) = env.get(PACKAGE_SOURCE_ENV).filter(|s| !s.trim().is_empty()) {
            config.package.source = resolve_package_source(Some(source));
        }

        if let Some(regions) = env.get(REGIONS_ENV) {
            let regions = split_list(regions);
            if !regions.is_empty() {
                config.regions = regions;
            }
        }

        if let Some(dir) = env.get(OUTPUT_DIR_ENV).filter(|d| !d.trim().is_empty()) {
            config.output_dir = PathBuf::from(dir);
        }
    }

    /// Apply command-line overrides
    fn apply_cli(config: &mut PipelineConfig, cli: CliOverrides) {
        if let Some(regions) = cli.regions.filter(|r| !r.is_empty()) {
            config.regions = regions;
        }
        if let Some(dir) = cli.output_dir {
            config.output_dir = dir;
        }
        if let Some(max_concurrency) = cli.max_concurrency {
            config.publish.max_concurrency = max_concurrency;
        }
    }

    /// Expand `${VAR}` references from the supplied environment
    fn expand_string(
        input: &str,
        env: &HashMap<String, String>,
    ) -> Result<String, PipelineError> {
        let env_var_regex = Regex::new(ENV_VAR_PATTERN)
            .map_err(|e| PipelineError::ConfigError(e.to_string()))?;

        let mut result = input.to_string();
        for cap in env_var_regex.captures_iter(input) {
            let var_name = &cap[1];

            if let Some(value) = env.get(var_name) {
                result = result.replace(&format!("${{{}}}", var_name), value);
            } else {
                warn!("Environment variable {} not found", var_name);
            }
        }

        Ok(result)
    }

    /// Validate configuration
    pub fn validate(config: &PipelineConfig) -> ConfigValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if config.package.source.trim().is_empty() {
            errors.push(ConfigValidationIssue::new("package.source", "Package source is required"));
        }

        if config.regions.is_empty() {
            errors.push(ConfigValidationIssue::new("regions", "At least one region is required"));
        }

        let mut seen_regions = HashSet::new();
        for region in &config.regions {
            if !seen_regions.insert(region) {
                errors.push(ConfigValidationIssue::new(
                    "regions",
                    format!("Duplicate region: {}", region),
                ));
            }
        }

        if config.variants.is_empty() {
            errors.push(ConfigValidationIssue::new("variants", "At least one variant is required"));
        }

        let mut seen_archives = HashSet::new();
        for variant in &config.variants {
            if !seen_archives.insert(&variant.archive_name) {
                errors.push(ConfigValidationIssue::new(
                    "variants.archive_name",
                    format!("Duplicate archive name: {}", variant.archive_name),
                ));
            }
            if variant.archive_name.contains('/') || variant.archive_name.contains('\\') {
                errors.push(ConfigValidationIssue::new(
                    "variants.archive_name",
                    format!("Archive name must be a plain file name: {}", variant.archive_name),
                ));
            }
        }

        if config.publish.max_concurrency == 0 {
            errors.push(ConfigValidationIssue::new(
                "publish.max_concurrency",
                "Concurrency must be at least 1",
            ));
        }

        if config.publish.timeout_secs == 0 || config.build.timeout_secs == 0 {
            errors.push(ConfigValidationIssue::new("timeout_secs", "Timeouts must be positive"));
        }

        let retry = &config.publish.retry;
        if retry.max_attempts == 0 {
            errors.push(ConfigValidationIssue::new(
                "publish.retry.max_attempts",
                "At least one attempt is required",
            ));
        }
        if !retry.backoff_multiplier.is_finite() || retry.backoff_multiplier < 1.0 {
            errors.push(ConfigValidationIssue::new(
                "publish.retry.backoff_multiplier",
                format!(
                    "Backoff multiplier must be a finite number of at least 1.0: {}",
                    retry.backoff_multiplier
                ),
            ));
        }
        if retry.initial_delay > retry.max_delay {
            errors.push(ConfigValidationIssue::new(
                "publish.retry.initial_delay",
                "Initial delay must not exceed max_delay",
            ));
        }

        if config.publish.publish_retry == PublishRetryPolicy::Always {
            warnings.push(ConfigValidationIssue::new(
                "publish.publish_retry",
                "Retrying ambiguous publish failures may create duplicate versions",
            ));
        }

        if !config.build.base_image_template.contains("{version}") {
            warnings.push(ConfigValidationIssue::new(
                "build.base_image_template",
                "Base image does not depend on the runtime version",
            ));
        }

        ConfigValidationResult {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Format validation result as human-readable string
    pub fn format_validation_result(result: &ConfigValidationResult) -> String {
        let mut lines = Vec::new();

        if result.valid {
            lines.push("✅ Configuration validation succeeded".to_string());
        } else {
            lines.push("❌ Configuration has errors".to_string());
        }

        if !result.errors.is_empty() {
            lines.push("\n🔴 Errors:".to_string());
            for error in &result.errors {
                lines.push(format!("  - [{}] {}", error.field, error.message));
            }
        }

        if !result.warnings.is_empty() {
            lines.push("\n🟡 Warnings:".to_string());
            for warning in &result.warnings {
                lines.push(format!("  - [{}] {}", warning.field, warning.message));
            }
        }

        lines.join("\n")
    }
}

/// Split a comma-separated list, dropping blanks
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
