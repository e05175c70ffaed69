mod cli;

use mediascan::{
    config::{self, OutputFormat},
    render,
};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "mediascan=debug,mediascan_probe=trace".to_string()
        } else {
            "warn".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Probe { file, speed, json } => {
            probe_file(&file, speed, json, cli.config.as_deref())
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("mediascan {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn probe_file(
    path: &Path,
    speed: Option<f32>,
    json: bool,
    config_path: Option<&Path>,
) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;

    if let Some(speed) = speed {
        if !(0.0..=1.0).contains(&speed) {
            anyhow::bail!("--speed must be between 0.0 and 1.0, got {}", speed);
        }
    }

    if !path.exists() {
        anyhow::bail!("File does not exist: {:?}", path);
    }

    let options = config.probe.to_options(speed);
    tracing::debug!(
        "Probing {:?} at speed {} (head window {} bytes)",
        path,
        options.parse_speed,
        options.head_window()
    );

    let info = mediascan_probe::probe_file_with(path, &options)
        .with_context(|| format!("Failed to probe {:?}", path))?;
    tracing::debug!("{}", render::headline(&info));

    let format = if json {
        OutputFormat::Json
    } else {
        config.output.format
    };
    print!("{}", render::render(&info, format)?);
    if format == OutputFormat::Json {
        println!();
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let resolved = path
        .map(Path::to_path_buf)
        .or_else(config::find_default_config);

    match resolved {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(&p)?;
            println!("✓ Configuration is valid");
            println!("  Parse speed: {}", config.probe.parse_speed);
            println!("  Head window: {} MiB", config.probe.head_window_mib);
            println!("  Output format: {:?}", config.output.format);
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            println!("  Parse speed: {}", config.probe.parse_speed);
            println!("  Head window: {} MiB", config.probe.head_window_mib);
        }
    }

    Ok(())
}
