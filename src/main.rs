// SYNOID Restore Entry Point
// Copyright (c) 2026 Xing_The_Creator | SYNOID

use synoid_restore::agent::acquisition::AcquisitionManager;
use synoid_restore::agent::artifact_store::ArtifactStore;
use synoid_restore::agent::entry_point::EntryPointResolver;
use synoid_restore::agent::health::{self, HealthMonitor};
use synoid_restore::agent::hub::{ArtifactRegistry, HfHubRegistry};
use synoid_restore::agent::model_registry::{ModelCatalog, ModelVariant};
use synoid_restore::agent::orchestrator::{JobOrchestrator, JobRequest};
use synoid_restore::config::RestoreConfig;
use synoid_restore::state::KernelState;
use synoid_restore::{gpu_backend, server};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Files shown per variant in the download listing.
const LISTING_LIMIT: usize = 10;

#[derive(Parser)]
#[command(name = "synoid-restore")]
#[command(about = "SYNOID SeedVR2 Video Restoration", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download model weights into the checkpoint store
    Download {
        /// Model to download: 3B, 7B or both
        #[arg(short, long, default_value = "both")]
        model: String,

        /// Checkpoint directory (defaults to SEEDVR_CKPTS_DIR)
        #[arg(short, long)]
        save_dir: Option<PathBuf>,
    },

    /// Restore a video
    Restore {
        /// Input video file
        #[arg(short, long)]
        input: PathBuf,

        /// Model variant (3B or 7B)
        #[arg(short, long, default_value = "3B")]
        model: String,

        /// Output height
        #[arg(long, default_value_t = 720)]
        height: u32,

        /// Output width
        #[arg(long, default_value_t = 1280)]
        width: u32,

        #[arg(long, default_value_t = 42)]
        seed: i64,

        /// Output frame rate; left to the model when omitted
        #[arg(long)]
        fps: Option<u32>,

        /// Processes to launch (defaults to the detected GPU count)
        #[arg(long)]
        parallelism: Option<u32>,

        #[arg(long)]
        cfg_scale: Option<f32>,

        #[arg(long)]
        cfg_rescale: Option<f32>,

        #[arg(long)]
        sample_steps: Option<u32>,
    },

    /// Locate (and if needed heal) the inference script for a model
    Resolve {
        #[arg(short, long, default_value = "3B")]
        model: String,
    },

    /// List models and whether they are ready locally
    Models,

    /// Show detected GPUs
    Gpu,

    /// Start the restore dashboard server
    Serve {
        /// Port to run the server on (defaults to SEEDVR_PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind (defaults to SEEDVR_HOST)
        #[arg(long)]
        host: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    // Global panic handler: log panics instead of crashing silently
    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        eprintln!("🚨 [SYNOID PANIC] at {}: {}", location, message);
    }));

    info!("--- SYNOID RESTORE v{} ---", env!("CARGO_PKG_VERSION"));

    let args = Cli::parse();
    let mut config = RestoreConfig::from_env();

    let missing_deps = health::check_dependencies(&config.launcher);
    if !missing_deps.is_empty() {
        tracing::debug!(
            "⚠️ Missing dependencies: {:?}. Restore jobs may not work.",
            missing_deps
        );
    }

    let catalog = Arc::new(ModelCatalog::seedvr2().context("build model catalog")?);

    match args.command {
        Commands::Download { model, save_dir } => {
            if let Some(dir) = save_dir {
                config.store_dir = dir;
            }
            let failed = download(&config, &catalog, &model).await?;
            if failed > 0 {
                std::process::exit(1);
            }
        }
        Commands::Restore {
            input,
            model,
            height,
            width,
            seed,
            fps,
            parallelism,
            cfg_scale,
            cfg_rescale,
            sample_steps,
        } => {
            let orchestrator = build_orchestrator(config, catalog);
            let request = JobRequest {
                video: input,
                variant: model,
                height,
                width,
                seed,
                fps,
                parallelism,
                cfg_scale,
                cfg_rescale,
                sample_steps,
            };
            let progress = |fraction: f32, label: &str| {
                info!("[JOB] {:>3.0}% {}", fraction * 100.0, label);
            };
            match orchestrator.run(request, &progress).await {
                Ok(result) => {
                    println!("✅ Restored video: {}", result.path.display());
                    println!(
                        "   {:.1} MB in {:.1}s",
                        result.size_bytes as f64 / 1_048_576.0,
                        result.elapsed_secs
                    );
                }
                Err(e) => {
                    error!("❌ Restore failed during {}: {}", e.stage(), e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Resolve { model } => {
            let Some(variant) = catalog.find(&model) else {
                bail!("unknown model '{}' (expected one of: {})", model, catalog.ids().join(", "));
            };
            let resolver = EntryPointResolver::new(
                config.workspace_dir.clone(),
                config.repo_dir.clone(),
                ArtifactStore::new(config.store_dir.clone()),
            );
            let entry = resolver.resolve(variant)?;
            println!("Script:      {}", entry.script.display());
            println!("Working dir: {}", entry.working_dir.display());
            if entry.healed {
                println!("(dependency tree was restored into the workspace)");
            }
        }
        Commands::Models => {
            let store = ArtifactStore::new(config.store_dir.clone());
            println!("=== Models ({}) ===", store.root().display());
            for status in store.statuses(&catalog) {
                println!(
                    "{} {:<12} {:<5} {}",
                    if status.ready { "✓" } else { "✗" },
                    status.label,
                    status.id,
                    status.description
                );
            }
        }
        Commands::Gpu => {
            gpu_backend::print_gpu_status();
        }
        Commands::Serve { port, host } => {
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(host) = host {
                config.host = host;
            }
            let host = config.host.clone();
            let port = config.port;
            info!("🌐 Starting restore dashboard on {}:{}...", host, port);

            let health = HealthMonitor::new(30, config.outputs_dir.clone());
            health.start();

            let state = Arc::new(KernelState::new(Arc::new(build_orchestrator(
                config, catalog,
            ))));
            let served = server::start_server(&host, port, state).await;
            health.stop();
            info!("{}", health.status_report());
            served?;
        }
    }

    Ok(())
}

fn build_orchestrator(config: RestoreConfig, catalog: Arc<ModelCatalog>) -> JobOrchestrator {
    let registry: Arc<dyn ArtifactRegistry> = Arc::new(HfHubRegistry::new(config.hf_token.clone()));
    JobOrchestrator::new(Arc::new(config), catalog, registry)
}

/// Variants named by `--model`.
fn select_variants<'a>(
    catalog: &'a ModelCatalog,
    selection: &str,
) -> anyhow::Result<Vec<&'a ModelVariant>> {
    if selection.eq_ignore_ascii_case("both") || selection.eq_ignore_ascii_case("all") {
        return Ok(catalog.variants().iter().collect());
    }
    match catalog.find(selection) {
        Some(variant) => Ok(vec![variant]),
        None => bail!(
            "unknown model '{}' (expected one of: {}, both)",
            selection,
            catalog.ids().join(", ")
        ),
    }
}

/// Acquire each selected variant and print a summary. Returns the failure count.
async fn download(
    config: &RestoreConfig,
    catalog: &ModelCatalog,
    selection: &str,
) -> anyhow::Result<usize> {
    let variants = select_variants(catalog, selection)?;
    std::fs::create_dir_all(&config.store_dir)
        .with_context(|| format!("create {}", config.store_dir.display()))?;

    let store = ArtifactStore::new(config.store_dir.clone());
    let manager = AcquisitionManager::new(
        store.clone(),
        Arc::new(HfHubRegistry::new(config.hf_token.clone())),
        config.retry.clone(),
        config.alias_mode,
    );

    println!("=== SeedVR2 Model Download ===");
    println!("Models: {}", variants.iter().map(|v| v.label.as_str()).collect::<Vec<_>>().join(", "));
    println!("Save directory: {}", store.root().display());
    let waits: Vec<String> = config
        .retry
        .schedule()
        .iter()
        .map(|d| format!("{}s", d.as_secs()))
        .collect();
    println!(
        "Retry policy: {} attempts, waits {}",
        config.retry.max_attempts,
        waits.join(" → ")
    );

    let mut succeeded = Vec::new();
    let mut failed = Vec::new();
    for variant in variants {
        match manager.ensure_ready(variant).await {
            Ok(ready) => {
                println!("\n✅ {} ready in {}", variant.label, ready.local_dir.display());
                let files = store.list_files(variant);
                for file in files.iter().take(LISTING_LIMIT) {
                    println!(
                        "   {} ({:.1} MB)",
                        file.relative.display(),
                        file.size_bytes as f64 / 1_048_576.0
                    );
                }
                if files.len() > LISTING_LIMIT {
                    println!("   ... and {} more files", files.len() - LISTING_LIMIT);
                }
                succeeded.push(variant.label.clone());
            }
            Err(e) => {
                error!("❌ {}", e);
                failed.push(variant.label.clone());
            }
        }
    }

    println!("\n=== Download Summary ===");
    if !succeeded.is_empty() {
        println!("✅ Successful: {}", succeeded.join(", "));
    }
    if !failed.is_empty() {
        println!("❌ Failed: {}", failed.join(", "));
    }
    if let Some(disk) = store.storage_summary() {
        println!(
            "💾 Storage: {:.1} GB free of {:.1} GB",
            disk.free_bytes as f64 / 1_073_741_824.0,
            disk.total_bytes as f64 / 1_073_741_824.0
        );
    }
    Ok(failed.len())
}
