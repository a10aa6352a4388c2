use audio_studio_ai::{
    ensure_model, model::registry::load_registry, server, set_download_progress_callback,
    ModelArgs, ModelKind, ServeArgs,
};
use clap::{Parser, Subcommand};
use std::{process, time::Duration};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "audio-studio-ai")]
#[command(about = "Voice cloning and vocal separation service", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service
    Serve(ServeArgs),

    /// Download and verify both models ahead of time
    Prepare {
        #[command(flatten)]
        models: ModelArgs,

        #[arg(short, long)]
        quiet: bool,
    },

    /// List available models
    List,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "audio_studio_ai=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    let result = match cli.command {
        Commands::Serve(args) => handle_serve(args),
        Commands::Prepare { models, quiet } => handle_prepare(models, quiet),
        Commands::List => handle_list(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn handle_serve(args: ServeArgs) -> anyhow::Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(server::run(args));
    // A model download may still be running on the blocking pool.
    rt.shutdown_timeout(Duration::from_secs(2));
    result
}

fn handle_prepare(models: ModelArgs, quiet: bool) -> anyhow::Result<()> {
    if !quiet {
        set_download_progress_callback(|downloaded, total| {
            if total > 0 {
                let percent = (downloaded as f64 / total as f64 * 100.0).round() as u64;
                eprint!(
                    "\rDownloading: {:>3}% ({:.2} MB / {:.2} MB)",
                    percent,
                    downloaded as f64 / 1_000_000.0,
                    total as f64 / 1_000_000.0
                );
                if downloaded >= total {
                    eprintln!();
                }
            } else {
                eprint!("\rDownloading: {:.2} MB", downloaded as f64 / 1_000_000.0);
            }
        });
    }

    let cache_dir = models.cache_dir()?;
    let targets = [
        (
            ModelKind::VoiceClone,
            &models.voice_model,
            models.voice_manifest_url.as_deref(),
        ),
        (
            ModelKind::Separator,
            &models.separator_model,
            models.separator_manifest_url.as_deref(),
        ),
    ];
    for (kind, name, manifest_url) in targets {
        let handle = ensure_model(name, kind, manifest_url, &cache_dir)?;
        if !quiet {
            eprintln!(
                "{} model `{}` v{} ready in {}",
                kind.as_str(),
                handle.manifest.name,
                handle.manifest.version,
                cache_dir.display()
            );
        }
    }
    Ok(())
}

fn handle_list() -> anyhow::Result<()> {
    let registry = load_registry()?;

    println!("Available models");
    for kind in [ModelKind::VoiceClone, ModelKind::Separator] {
        println!("{}:", kind.as_str());
        let default = registry.default_for(kind);
        for m in registry.models.iter().filter(|m| m.kind == kind) {
            let marker = if m.name == default { " (default)" } else { "" };
            println!("  - {}{}  {}", m.name, marker, m.description);
        }
    }
    Ok(())
}
