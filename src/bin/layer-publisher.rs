//! Layer Publisher CLI
//!
//! Builds one layer archive per runtime variant and publishes every archive
//! to every region

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use layer_publisher::build::{ArchivePacker, ArtifactBuilder, BuildOptions};
use layer_publisher::orchestration::{PublishOptions, PublishOrchestrator, ReleasePipeline};
use layer_publisher::plugins::{AwsLambdaRegistry, DockerEnvironment};
use layer_publisher::{
    CliOverrides, ConfigLoadOptions, ConfigLoader, PipelineConfig, SafeCommandExecutor,
    VariantRegistry, install_interrupt_handler,
};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Build and publish runtime layers to every region
#[derive(Parser)]
#[command(name = "layer-publisher")]
#[command(version)]
#[command(about = "Build and publish runtime layers to every region", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to ./.layer-publish.yaml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory packaged archives are written to
    #[arg(long, global = true, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List the variants that would be built
    Variants,

    /// Remove packaged archives from the output directory
    Clean,

    /// Build and pack every variant
    Build {
        /// Comma-separated runtime versions or layer names
        #[arg(long, value_delimiter = ',')]
        variants: Vec<String>,
    },

    /// Publish previously built archives to every region
    Publish(PublishArgs),

    /// Build every variant, then publish
    Release(PublishArgs),
}

#[derive(Args)]
struct PublishArgs {
    /// Comma-separated regions (overrides configuration)
    #[arg(long, value_delimiter = ',')]
    regions: Vec<String>,

    /// Comma-separated runtime versions or layer names
    #[arg(long, value_delimiter = ',')]
    variants: Vec<String>,

    /// Maximum (region, variant) pairs published at once
    #[arg(long)]
    max_concurrency: Option<usize>,

    /// Exit with code 2 when any pair failed
    #[arg(long)]
    strict: bool,
}

#[tokio::main]
async fn main() {
    let result = run().await;

    match result {
        Ok(exit_code) => process::exit(exit_code),
        Err(e) => {
            eprintln!("\n❌ Error");
            eprintln!("{:#}", e);
            process::exit(1);
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("layer_publisher={}", default_level)));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init()
        .ok();
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    install_interrupt_handler();

    let project_path = std::env::current_dir().context("cannot determine current directory")?;
    let publish_args = match &cli.command {
        Commands::Publish(args) | Commands::Release(args) => Some(args),
        _ => None,
    };

    let mut options = ConfigLoadOptions::new(&project_path);
    options.config_path = cli.config.clone();
    options.env = std::env::vars().collect();
    options.cli = CliOverrides {
        regions: publish_args.map(|a| a.regions.clone()),
        output_dir: cli.output_dir.clone(),
        max_concurrency: publish_args.and_then(|a| a.max_concurrency),
    };
    let config = ConfigLoader::load(options).await?;

    match &cli.command {
        Commands::Variants => variants_command(&config),
        Commands::Clean => clean_command(&config),
        Commands::Build { variants } => {
            let variants = select_variants(&config, variants)?;
            build_command(&project_path, &config, &variants).await
        }
        Commands::Publish(args) => {
            let variants = select_variants(&config, &args.variants)?;
            let pipeline = pipeline(&project_path, &config)?;

            let report = pipeline.publish_existing(&variants, &config.regions).await;
            report.print_summary();
            Ok(report.exit_code(args.strict))
        }
        Commands::Release(args) => {
            let variants = select_variants(&config, &args.variants)?;
            let pipeline = pipeline(&project_path, &config)?;

            let report = pipeline.release(&variants, &config.regions).await;
            report.print_summary();
            Ok(report.exit_code(args.strict))
        }
    }
}

fn select_variants(config: &PipelineConfig, filter: &[String]) -> Result<VariantRegistry> {
    let variants = config.variant_registry().filtered(filter);
    if variants.is_empty() {
        anyhow::bail!("no configured variant matches: {}", filter.join(", "));
    }
    Ok(variants)
}

fn pipeline(project_path: &Path, config: &PipelineConfig) -> Result<ReleasePipeline> {
    let build_executor =
        SafeCommandExecutor::new(project_path)?.with_timeout(config.build.timeout());
    let publish_executor =
        SafeCommandExecutor::new(project_path)?.with_timeout(config.publish.timeout());

    Ok(ReleasePipeline::new(
        ArtifactBuilder::new(
            Arc::new(DockerEnvironment::new(build_executor)),
            BuildOptions::from(&config.build),
        ),
        ArchivePacker::new(&config.output_dir),
        PublishOrchestrator::new(
            Arc::new(AwsLambdaRegistry::new(publish_executor)),
            PublishOptions::from_config(config),
        ),
    ))
}

fn variants_command(config: &PipelineConfig) -> Result<i32> {
    let variants = config.variant_registry();

    println!("\n📦 {} variants\n", variants.len());
    for spec in variants.variants() {
        println!("  - {}", spec);
        println!("      layer:   {}", spec.display_name());
        println!("      archive: {}", spec.archive_file_name());
        println!("      runtime: {}", spec.runtime_tag());
        println!("      source:  {}", spec.package_source());
    }
    println!("\n🌍 {} regions: {}", config.regions.len(), config.regions.join(", "));

    Ok(0)
}

fn clean_command(config: &PipelineConfig) -> Result<i32> {
    let variants = config.variant_registry();
    let names: Vec<&str> = variants
        .variants()
        .iter()
        .map(|v| v.archive_file_name())
        .collect();

    let removed = ArchivePacker::new(&config.output_dir)
        .clean(&names)
        .with_context(|| format!("failed to clean {}", config.output_dir.display()))?;

    if removed.is_empty() {
        println!("Nothing to clean in {}", config.output_dir.display());
    }
    for path in &removed {
        println!("🗑️  Removed {}", path.display());
    }

    Ok(0)
}

async fn build_command(
    project_path: &Path,
    config: &PipelineConfig,
    variants: &VariantRegistry,
) -> Result<i32> {
    let pipeline = pipeline(project_path, config)?;

    match pipeline.build_all(variants).await {
        Ok(archives) => {
            println!("\n✅ Built {} archives in {}", archives.len(), config.output_dir.display());
            Ok(0)
        }
        Err(e) => {
            eprintln!("\n❌ {}", e);
            for action in e.suggested_actions() {
                eprintln!("   - {}", action);
            }
            Ok(1)
        }
    }
}
