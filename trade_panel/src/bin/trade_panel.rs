use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use trade_panel::config::{load_config_path, load_config_path_with_report};
use trade_panel::pipeline::{run, write_outputs};

#[derive(Parser)]
#[command(version, about = "Align economic time series and fit OLS regressions")]
struct Cli {
    /// Default log level; RUST_LOG overrides it
    #[arg(long, global = true, default_value = "info")]
    log_level: LevelFilter,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run the pipeline described by a config file
    Run {
        #[arg(long, value_name = "FILE")]
        config: PathBuf,
        /// Skip writing the panel file and plot
        #[arg(long)]
        no_output: bool,
        /// Panel rows to print
        #[arg(long, default_value_t = 5)]
        head: usize,
    },
    /// Parse and validate a config file without reading any data
    Check {
        #[arg(long, value_name = "FILE")]
        config: PathBuf,
    },
}

fn init_logging(level: LevelFilter) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    match cli.cmd {
        Cmd::Run {
            config,
            no_output,
            head,
        } => {
            let cfg = load_config_path(&config)?;
            let outcome = run(&cfg).map_err(|e| {
                let stage = e.stage();
                anyhow::Error::new(e).context(format!("pipeline failed at the {stage} stage"))
            })?;

            for c in &outcome.coverage {
                println!("{c}");
            }
            println!();
            println!("{}", outcome.panel.head(head));
            if let Some(reg) = &outcome.regression {
                println!();
                println!("{reg}");
            }

            if !no_output {
                for path in write_outputs(&outcome, &cfg).context("writing outputs")? {
                    println!("wrote {}", path.display());
                }
            }
        }
        Cmd::Check { config } => {
            let (cfg, report) = load_config_path_with_report(&config)?;
            println!("{}: {report}", config.display());
            println!("data directory: {}", cfg.data_dir().display());
        }
    }

    Ok(())
}
