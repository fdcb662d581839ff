mod cli;

use fragmux::{config::Config, report};
use fragmux_media::{KeyMap, UnfragmentOptions, Unfragmenter};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "fragmux=trace,fragmux_media=trace".to_string()
        } else {
            "fragmux=info,fragmux_media=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Unfragment {
            init,
            segments,
            output,
            keys,
            track_id,
        } => {
            let config = Config::load(cli.config.as_deref())?;
            unfragment(&config, &init, &segments, &output, &keys, track_id)
        }
        Commands::Inspect { file, json } => inspect_file(&file, json),
        Commands::Ranges { file, offset } => print_ranges(&file, offset),
        Commands::Version => {
            println!("fragmux {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn read_input(path: &Path) -> Result<Vec<u8>> {
    if !path.exists() {
        anyhow::bail!("File does not exist: {:?}", path);
    }
    std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))
}

fn unfragment(
    config: &Config,
    init: &Path,
    segments: &[PathBuf],
    output: &Path,
    cli_keys: &[String],
    track_id: Option<u32>,
) -> Result<()> {
    // Command-line keys are merged over the config file's
    let mut keys: KeyMap = config.key_map().context("Invalid key in config file")?;
    for pair in cli_keys {
        let (kid, key) =
            KeyMap::parse_pair(pair).with_context(|| format!("Invalid --key '{pair}'"))?;
        keys.insert(kid, key);
    }

    let options = UnfragmentOptions {
        track_id: track_id.or(config.track_id),
    };

    let init_data = read_input(init)?;
    let file = File::create(output)
        .with_context(|| format!("Failed to create output file: {:?}", output))?;
    let mut remuxer = Unfragmenter::new(BufWriter::new(file), options);

    remuxer
        .initialize(&init_data)
        .with_context(|| format!("Failed to initialize from {:?}", init))?;

    for segment in segments {
        tracing::debug!("Adding segment {:?}", segment);
        let data = read_input(segment)?;
        remuxer
            .add_encrypted_segment(&data, &keys)
            .with_context(|| format!("Failed to add segment {:?}", segment))?;
    }

    let summary = remuxer.finish().context("Failed to finish output")?;
    remuxer
        .into_inner()
        .flush()
        .with_context(|| format!("Failed to write {:?}", output))?;

    let size = std::fs::metadata(output)?.len();
    println!("Wrote {} ({} bytes)", output.display(), size);
    println!(
        "Track {}: {} samples in {} chunks, duration {}/{}",
        summary.track_id,
        summary.sample_count,
        summary.chunk_count,
        summary.duration,
        summary.timescale
    );
    Ok(())
}

fn inspect_file(file: &Path, json: bool) -> Result<()> {
    let data = read_input(file)?;
    let report =
        report::inspect(&data).with_context(|| format!("Failed to parse {:?}", file))?;

    if json {
        let json_str = serde_json::to_string_pretty(&report)?;
        println!("{}", json_str);
    } else {
        println!("File: {}", file.display());
        println!("Size: {} bytes", data.len());
        print!("{}", report);
    }
    Ok(())
}

fn print_ranges(file: &Path, offset: Option<u64>) -> Result<()> {
    let data = read_input(file)?;
    let ranges =
        report::sidx_ranges(&data, offset).with_context(|| format!("Failed to parse {:?}", file))?;

    for (start, end) in ranges {
        println!("{}-{}", start, end);
    }
    Ok(())
}
