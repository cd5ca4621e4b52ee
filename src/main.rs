use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use catalog_worker::{app::ComponentRegistry, config::Config, observability};

/// Builds curated movie and series lists from external catalog providers.
#[derive(Debug, Parser)]
#[command(name = "catalog-worker", version)]
struct Cli {
    /// Path to the list definitions file.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Directory holding outputs, state and snapshots.
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,
    /// Generate only the named lists (comma-separated ids).
    #[arg(long, value_delimiter = ',', value_name = "IDS")]
    only: Vec<String>,
    /// Run the full pipeline without writing outputs or state.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    std::panic::set_hook(Box::new(|panic_info| {
        let thread = std::thread::current();
        let thread_name = thread.name().unwrap_or("unnamed");
        let message = panic_info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| {
                panic_info
                    .payload()
                    .downcast_ref::<String>()
                    .map(|s| s.as_str())
            })
            .unwrap_or("unknown panic payload");

        if let Some(location) = panic_info.location() {
            error!(
                thread = thread_name,
                file = location.file(),
                line = location.line(),
                column = location.column(),
                message,
                "panic occurred"
            );
        } else {
            error!(
                thread = thread_name,
                message, "panic occurred without location information"
            );
        }
    }));

    observability::init().context("failed to initialize tracing")?;

    let cli = Cli::parse();
    let mut config = Config::from_env().context("failed to load configuration")?;
    if let Some(path) = cli.config {
        config = config.with_lists_path(path);
    }
    if let Some(dir) = cli.data_dir {
        config = config.with_data_dir(dir);
    }
    info!(
        lists = %config.lists_path().display(),
        data_dir = %config.data_dir().display(),
        dry_run = cli.dry_run,
        "catalog worker starting"
    );

    let registry = ComponentRegistry::build(config, cli.dry_run)
        .context("failed to build component registry")?;
    let summary = registry.runner().run(&cli.only).await;

    // Logs go to stderr; the summary is the only thing on stdout.
    print!("{}", summary.render());
    std::process::exit(summary.exit_code());
}
