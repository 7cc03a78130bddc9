//! Release Pipeline - build every variant, then publish the archives
//!
//! The build stage is all-or-nothing: the first build, extraction or packing
//! failure aborts the run before a single publish call is made. The publish
//! stage never aborts on a pair failure; it reports.

use crate::build::{ArchivePacker, ArtifactBuilder};
use crate::core::error::PipelineError;
use crate::core::interrupt::interrupted;
use crate::core::variant::VariantRegistry;
use crate::orchestration::publish_orchestrator::{LayerArchive, PublishOrchestrator};
use crate::orchestration::summary::RunReport;
use chrono::Utc;
use std::future::Future;
use tracing::{error, info, warn};

/// Build stage and publish stage wired together
pub struct ReleasePipeline {
    builder: ArtifactBuilder,
    packer: ArchivePacker,
    orchestrator: PublishOrchestrator,
}

impl ReleasePipeline {
    pub fn new(
        builder: ArtifactBuilder,
        packer: ArchivePacker,
        orchestrator: PublishOrchestrator,
    ) -> Self {
        Self {
            builder,
            packer,
            orchestrator,
        }
    }

    pub fn packer(&self) -> &ArchivePacker {
        &self.packer
    }

    /// Build and pack every variant, in order
    ///
    /// # Errors
    ///
    /// Returns the first fatal error; later variants are not built.
    pub async fn build_all(
        &self,
        variants: &VariantRegistry,
    ) -> Result<Vec<LayerArchive>, PipelineError> {
        let mut archives = Vec::with_capacity(variants.len());

        for (index, spec) in variants.variants().iter().enumerate() {
            println!("\n🔨 [{}/{}] Building {}...", index + 1, variants.len(), spec);

            let artifact = self.builder.build(spec).await?;
            let archive = self.packer.pack(&artifact, spec.archive_file_name())?;
            println!("✅ {} → {} ({} bytes)", spec.display_name(), archive.path.display(), archive.size);

            archives.push(LayerArchive {
                meta: spec.meta(),
                archive,
            });
        }

        info!(archives = archives.len(), "build stage complete");
        Ok(archives)
    }

    /// Archives already present in the output directory for `variants`
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::PackingFailure` if any archive is missing.
    pub fn existing_archives(
        &self,
        variants: &VariantRegistry,
    ) -> Result<Vec<LayerArchive>, PipelineError> {
        let names: Vec<&str> = variants
            .variants()
            .iter()
            .map(|v| v.archive_file_name())
            .collect();
        let found = self.packer.existing(&names)?;

        Ok(variants
            .variants()
            .iter()
            .zip(found)
            .map(|(spec, archive)| LayerArchive {
                meta: spec.meta(),
                archive,
            })
            .collect())
    }

    /// Publish `archives` to every region and report
    pub async fn publish(&self, archives: &[LayerArchive], regions: &[String]) -> RunReport {
        self.publish_until(archives, regions, interrupted()).await
    }

    /// Publish until `cancel` resolves; a cancelled run reports the pairs that finished
    pub async fn publish_until(
        &self,
        archives: &[LayerArchive],
        regions: &[String],
        cancel: impl Future<Output = ()>,
    ) -> RunReport {
        let started_at = Utc::now();
        println!(
            "\n🚀 Publishing {} layers to {} regions...",
            archives.len(),
            regions.len()
        );

        let batch = self
            .orchestrator
            .publish_until(archives, regions, cancel)
            .await;

        if batch.cancelled {
            warn!("interrupted; aborted publish calls may have completed remotely");
            RunReport::interrupted(batch.records, batch.unfinished, started_at)
        } else {
            RunReport::from_records(batch.records, started_at)
        }
    }

    /// Publish the archives from a previous build
    pub async fn publish_existing(
        &self,
        variants: &VariantRegistry,
        regions: &[String],
    ) -> RunReport {
        match self.existing_archives(variants) {
            Ok(archives) => self.publish(&archives, regions).await,
            Err(e) => {
                error!(error = %e, "archives missing; run the build first");
                RunReport::aborted(e, Utc::now())
            }
        }
    }

    /// Build every variant, then publish; a build failure aborts before publishing
    pub async fn release(&self, variants: &VariantRegistry, regions: &[String]) -> RunReport {
        let started_at = Utc::now();

        let archives = match self.build_all(variants).await {
            Ok(archives) => archives,
            Err(e) => {
                error!(variant = e.scope(), error = %e, "build stage failed; nothing was published");
                return RunReport::aborted(e, started_at);
            }
        };

        let mut report = self.publish(&archives, regions).await;
        report.started_at = started_at;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::BuildOptions;
    use crate::core::config::PublishRetryPolicy;
    use crate::core::retry::RetryOptions;
    use crate::core::variant::VariantTemplate;
    use crate::orchestration::publish_orchestrator::PublishOptions;
    use crate::orchestration::summary::RunStatus;
    use crate::test_support::{FakeEnvironment, FakeRegistry, PublishScript};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn pipeline(
        environment: Arc<FakeEnvironment>,
        registry: Arc<FakeRegistry>,
        output: &TempDir,
    ) -> ReleasePipeline {
        let publish = PublishOptions {
            timeout: Duration::from_secs(5),
            retry: RetryOptions {
                max_attempts: 2,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                backoff_multiplier: 2.0,
            },
            publish_retry: PublishRetryPolicy::UnambiguousOnly,
            ..PublishOptions::default()
        };

        ReleasePipeline::new(
            ArtifactBuilder::new(environment, BuildOptions::default()),
            ArchivePacker::new(output.path().join("layers")),
            PublishOrchestrator::new(registry, publish),
        )
    }

    fn variants() -> VariantRegistry {
        VariantRegistry::new(&VariantRegistry::default_templates(), "datadog")
    }

    fn regions() -> Vec<String> {
        vec!["us-east-1".to_string(), "eu-west-1".to_string()]
    }

    #[tokio::test]
    async fn test_release_publishes_every_pair() {
        let output = TempDir::new().unwrap();
        let registry = Arc::new(FakeRegistry::new());
        let pipeline = pipeline(Arc::new(FakeEnvironment::new()), registry.clone(), &output);

        let report = pipeline.release(&variants(), &regions()).await;

        assert!(matches!(report.status, RunStatus::CompleteSuccess));
        assert_eq!(report.records.len(), 6);
        assert_eq!(registry.grant_calls().len(), 6);
        for name in ["datadogpy27.zip", "datadogpy36.zip", "datadogpy37.zip"] {
            assert!(output.path().join("layers").join(name).is_file());
        }
    }

    #[tokio::test]
    async fn test_build_failure_aborts_before_publishing() {
        let output = TempDir::new().unwrap();
        let environment = Arc::new(FakeEnvironment::new().failing_install("3.6"));
        let registry = Arc::new(FakeRegistry::new());
        let pipeline = pipeline(environment.clone(), registry.clone(), &output);

        let report = pipeline.release(&variants(), &regions()).await;

        match &report.status {
            RunStatus::AbortedDuringBuild { error } => {
                assert!(matches!(error, PipelineError::BuildFailure { .. }));
                assert_eq!(error.scope(), "Datadog-Python36-metric");
            }
            other => panic!("expected build abort, got {:?}", other),
        }
        assert!(registry.publish_calls().is_empty());
        assert!(registry.grant_calls().is_empty());
        // 2.7 and 3.6 were attempted, 3.7 never started
        assert_eq!(environment.instances().len(), 2);
        assert_eq!(environment.teardowns().len(), 2);
        assert_eq!(report.exit_code(false), 1);
    }

    #[tokio::test]
    async fn test_publish_existing_requires_archives() {
        let output = TempDir::new().unwrap();
        let registry = Arc::new(FakeRegistry::new());
        let pipeline = pipeline(Arc::new(FakeEnvironment::new()), registry.clone(), &output);

        let report = pipeline.publish_existing(&variants(), &regions()).await;

        assert!(matches!(
            report.status,
            RunStatus::AbortedDuringBuild {
                error: PipelineError::PackingFailure { .. }
            }
        ));
        assert!(registry.publish_calls().is_empty());
    }

    #[tokio::test]
    async fn test_publish_existing_after_build() {
        let output = TempDir::new().unwrap();
        let registry = Arc::new(FakeRegistry::new());
        let pipeline = pipeline(Arc::new(FakeEnvironment::new()), registry.clone(), &output);
        let single = VariantRegistry::new(
            &[VariantTemplate::new("3.7", "Datadog-Python37-metric", "datadogpy37.zip")],
            "datadog",
        );

        pipeline.build_all(&single).await.unwrap();
        let report = pipeline.publish_existing(&single, &regions()).await;

        assert!(matches!(report.status, RunStatus::CompleteSuccess));
        assert_eq!(report.records.len(), 2);
        assert!(report
            .records
            .iter()
            .all(|r| r.version_identifier() == Some("1")));
    }

    #[tokio::test]
    async fn test_rebuild_overwrites_archives() {
        let output = TempDir::new().unwrap();
        let pipeline = pipeline(
            Arc::new(FakeEnvironment::new()),
            Arc::new(FakeRegistry::new()),
            &output,
        );

        let first = pipeline.build_all(&variants()).await.unwrap();
        let second = pipeline.build_all(&variants()).await.unwrap();

        assert_eq!(first.len(), 3);
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.archive.path, b.archive.path);
            assert_eq!(a.archive.size, b.archive.size);
        }
    }

    #[tokio::test]
    async fn test_interrupted_publish_reports_finished_pairs() {
        let output = TempDir::new().unwrap();
        let registry = Arc::new(FakeRegistry::new());
        registry.script_publish("us-east-1", "Datadog-Python36-metric", PublishScript::Hang);
        let pipeline = pipeline(Arc::new(FakeEnvironment::new()), registry.clone(), &output);
        let archives = pipeline.build_all(&variants()).await.unwrap();

        let report = pipeline
            .publish_until(&archives, &regions(), tokio::time::sleep(Duration::from_millis(50)))
            .await;

        assert!(matches!(
            report.status,
            RunStatus::InterruptedDuringPublish { unfinished: 5 }
        ));
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].variant, "Datadog-Python27-metric");
        assert_eq!(report.records[0].version_identifier(), Some("1"));
        assert_eq!(report.exit_code(false), 130);
        assert_eq!(registry.publish_calls().len(), 2);
    }
}
