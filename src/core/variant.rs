//! Layer variants: one build target per supported runtime version

use serde::{Deserialize, Serialize};
use std::fmt;

/// Install target used when no override is supplied
pub const DEFAULT_PACKAGE_SOURCE: &str = "git+https://github.com/DataDog/datadogpy";

/// Environment variable overriding [`DEFAULT_PACKAGE_SOURCE`]
pub const PACKAGE_SOURCE_ENV: &str = "PIP_TARGET";

/// Variant as written in configuration, before the package source is known
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantTemplate {
    /// Runtime version, e.g. "3.7"
    pub runtime_version: String,
    /// Layer name the archive is published under
    pub layer_name: String,
    /// File name of the packaged archive
    pub archive_name: String,
}

impl VariantTemplate {
    pub fn new(runtime_version: &str, layer_name: &str, archive_name: &str) -> Self {
        Self {
            runtime_version: runtime_version.to_string(),
            layer_name: layer_name.to_string(),
            archive_name: archive_name.to_string(),
        }
    }
}

/// Fully resolved, immutable description of one variant build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantSpec {
    runtime_version: String,
    display_name: String,
    archive_file_name: String,
    package_source: String,
}

impl VariantSpec {
    pub fn new(template: &VariantTemplate, package_source: &str) -> Self {
        Self {
            runtime_version: template.runtime_version.clone(),
            display_name: template.layer_name.clone(),
            archive_file_name: template.archive_name.clone(),
            package_source: package_source.to_string(),
        }
    }

    pub fn runtime_version(&self) -> &str {
        &self.runtime_version
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn archive_file_name(&self) -> &str {
        &self.archive_file_name
    }

    pub fn package_source(&self) -> &str {
        &self.package_source
    }

    /// Compatible-runtime tag understood by the registry, e.g. "python3.7"
    pub fn runtime_tag(&self) -> String {
        format!("python{}", self.runtime_version)
    }

    /// Site-packages directory, relative to the build working directory
    pub fn site_packages_dir(&self) -> String {
        format!("python/lib/python{}/site-packages", self.runtime_version)
    }

    /// Metadata the publish stage needs about this variant
    pub fn meta(&self) -> VariantMeta {
        VariantMeta {
            display_name: self.display_name.clone(),
            runtime_tag: self.runtime_tag(),
        }
    }
}

impl fmt::Display for VariantSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (python{})", self.display_name, self.runtime_version)
    }
}

/// Publish-time metadata for one variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantMeta {
    pub display_name: String,
    pub runtime_tag: String,
}

/// Resolve the package source: a non-blank override wins over the default
/// and is kept exactly as given
pub fn resolve_package_source(override_source: Option<&str>) -> String {
    override_source
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(DEFAULT_PACKAGE_SOURCE)
        .to_string()
}

/// Ordered set of variants to build, all sharing one package source
#[derive(Debug, Clone)]
pub struct VariantRegistry {
    variants: Vec<VariantSpec>,
}

impl VariantRegistry {
    pub fn new(templates: &[VariantTemplate], package_source: &str) -> Self {
        Self {
            variants: templates
                .iter()
                .map(|t| VariantSpec::new(t, package_source))
                .collect(),
        }
    }

    /// Built-in variant list: Python 2.7, 3.6 and 3.7
    pub fn default_templates() -> Vec<VariantTemplate> {
        vec![
            VariantTemplate::new("2.7", "Datadog-Python27-metric", "datadogpy27.zip"),
            VariantTemplate::new("3.6", "Datadog-Python36-metric", "datadogpy36.zip"),
            VariantTemplate::new("3.7", "Datadog-Python37-metric", "datadogpy37.zip"),
        ]
    }

    pub fn variants(&self) -> &[VariantSpec] {
        &self.variants
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    /// Keep only variants whose runtime version or layer name is in `names`
    pub fn filtered(&self, names: &[String]) -> Self {
        if names.is_empty() {
            return self.clone();
        }

        Self {
            variants: self
                .variants
                .iter()
                .filter(|v| {
                    names
                        .iter()
                        .any(|n| n == v.runtime_version() || n == v.display_name())
                })
                .cloned()
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_source_when_no_override() {
        assert_eq!(resolve_package_source(None), DEFAULT_PACKAGE_SOURCE);
        assert_eq!(resolve_package_source(Some("  ")), DEFAULT_PACKAGE_SOURCE);
    }

    #[test]
    fn test_override_source_is_kept_verbatim() {
        assert_eq!(
            resolve_package_source(Some("datadog==0.28.0")),
            "datadog==0.28.0"
        );
        assert_eq!(
            resolve_package_source(Some(" git+https://host/repo@${REF} ")),
            " git+https://host/repo@${REF} "
        );
    }

    #[test]
    fn test_default_templates() {
        let registry = VariantRegistry::new(&VariantRegistry::default_templates(), "datadog");

        assert_eq!(registry.len(), 3);
        let v27 = &registry.variants()[0];
        assert_eq!(v27.display_name(), "Datadog-Python27-metric");
        assert_eq!(v27.archive_file_name(), "datadogpy27.zip");
        assert_eq!(v27.runtime_tag(), "python2.7");
        assert_eq!(v27.site_packages_dir(), "python/lib/python2.7/site-packages");
        assert!(registry.variants().iter().all(|v| v.package_source() == "datadog"));
    }

    #[test]
    fn test_filter_by_runtime_or_name() {
        let registry = VariantRegistry::new(&VariantRegistry::default_templates(), "datadog");

        let filtered = registry.filtered(&["3.6".to_string(), "Datadog-Python37-metric".to_string()]);
        let names: Vec<_> = filtered.variants().iter().map(|v| v.runtime_version()).collect();
        assert_eq!(names, vec!["3.6", "3.7"]);

        assert_eq!(registry.filtered(&[]).len(), 3);
    }
}
