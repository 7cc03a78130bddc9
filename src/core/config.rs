//! Configuration structures and types for layer-publisher
//!
//! This module provides type-safe configuration management with serde support.
//! Every section has defaults matching the standard Datadog layer release, so an empty
//! configuration file is valid.

use super::retry::RetryOptions;
use super::variant::{DEFAULT_PACKAGE_SOURCE, VariantTemplate, VariantRegistry};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Regions layers are published to by default
pub const DEFAULT_REGIONS: &[&str] = &[
    "us-east-2",
    "us-east-1",
    "us-west-1",
    "us-west-2",
    "ap-south-1",
    "ap-northeast-3",
    "ap-northeast-2",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-northeast-1",
    "ca-central-1",
    "cn-north-1",
    "cn-northwest-1",
    "eu-central-1",
    "eu-west-1",
    "eu-west-2",
    "eu-west-3",
    "sa-east-1",
];

/// Root configuration object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Package being layered
    pub package: PackageConfig,

    /// Variants to build, in build and publish order
    pub variants: Vec<VariantTemplate>,

    /// Region targets, in publish order
    pub regions: Vec<String>,

    /// Directory packaged archives are written to
    pub output_dir: PathBuf,

    /// Build stage settings
    pub build: BuildConfig,

    /// Publish stage settings
    pub publish: PublishStageConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            package: PackageConfig::default(),
            variants: VariantRegistry::default_templates(),
            regions: DEFAULT_REGIONS.iter().map(|r| r.to_string()).collect(),
            output_dir: PathBuf::from("layers"),
            build: BuildConfig::default(),
            publish: PublishStageConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Variant registry with the configured package source applied
    pub fn variant_registry(&self) -> VariantRegistry {
        VariantRegistry::new(&self.variants, &self.package.source)
    }
}

/// Package information
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PackageConfig {
    /// Install target handed to pip (VCS ref or index spec)
    pub source: String,

    /// Description attached to every published version
    pub description: String,
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            source: DEFAULT_PACKAGE_SOURCE.to_string(),
            description: "Datadog python API client for lambdas".to_string(),
        }
    }
}

/// Build stage configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BuildConfig {
    /// Base image, `{version}` is replaced by the runtime version
    pub base_image_template: String,

    /// Working directory inside the build environment
    pub workdir: String,

    /// Directory (relative to `workdir`) exported back to the host
    pub export_dir: String,

    /// Timeout applied to each build environment command
    pub timeout_secs: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            base_image_template: "python:{version}".to_string(),
            workdir: "/usr/layer_build".to_string(),
            export_dir: "python".to_string(),
            timeout_secs: 900,
        }
    }
}

impl BuildConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// How publish calls are retried after a failure
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PublishRetryPolicy {
    /// Publish is attempted once
    Never,
    /// Retry only failures that cannot have created a version
    #[default]
    UnambiguousOnly,
    /// Retry every transient failure, accepting possible duplicate versions
    Always,
}

/// Publish stage configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PublishStageConfig {
    /// Timeout applied to each publish or grant call
    pub timeout_secs: u64,

    /// Maximum (region, variant) pairs in flight; 1 means sequential
    pub max_concurrency: usize,

    /// Backoff settings shared by publish and grant calls
    pub retry: RetryOptions,

    /// Publish retry policy
    pub publish_retry: PublishRetryPolicy,

    /// Permission action granted on each version
    pub grant_action: String,

    /// Principal granted access
    pub grant_principal: String,
}

impl Default for PublishStageConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            max_concurrency: 1,
            retry: RetryOptions::default(),
            publish_retry: PublishRetryPolicy::default(),
            grant_action: "lambda:GetLayerVersion".to_string(),
            grant_principal: "*".to_string(),
        }
    }
}

impl PublishStageConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_standard_release() {
        let config = PipelineConfig::default();

        assert_eq!(config.regions.len(), 18);
        assert_eq!(config.regions[0], "us-east-2");
        assert_eq!(config.variants.len(), 3);
        assert_eq!(config.output_dir, PathBuf::from("layers"));
        assert_eq!(config.publish.grant_principal, "*");
        assert_eq!(config.publish.publish_retry, PublishRetryPolicy::UnambiguousOnly);
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config: PipelineConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r#"
regions: [us-east-1, eu-west-1]
package:
  source: "datadog==0.30.0"
publish:
  max_concurrency: 4
  publish_retry: never
"#;
        let config: PipelineConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.regions, vec!["us-east-1", "eu-west-1"]);
        assert_eq!(config.package.source, "datadog==0.30.0");
        assert!(!config.package.description.is_empty());
        assert_eq!(config.publish.max_concurrency, 4);
        assert_eq!(config.publish.publish_retry, PublishRetryPolicy::Never);
        assert_eq!(config.variants.len(), 3);
    }

    #[test]
    fn test_variant_registry_uses_configured_source() {
        let mut config = PipelineConfig::default();
        config.package.source = "datadog".to_string();

        let registry = config.variant_registry();
        assert!(registry.variants().iter().all(|v| v.package_source() == "datadog"));
    }
}
