// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright © 2022 Adrian <adrian.eddy at gmail>

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ Args, Parser, Subcommand };
use gpmf_gpx::{ extract, FileReport, MergeOutcome };

#[derive(Parser, Debug)]
#[command(version, about = "Converts GoPro GPMF GPS telemetry to 1 Hz GPX tracks and stitches tracks together.", long_about = None)]
struct Cli {
    #[arg(short, long, global = true, help = "Verbose logging.", default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Writes a .gpx beside every .mp4/.360 file of a directory.")]
    Extract(ExtractArgs),
    #[command(about = "Stitches the .gpx files of a directory into one continuous track.")]
    Merge(MergeArgs),
    #[command(about = "Prints the GPMF track layout of one file.")]
    Info {
        file: PathBuf,
    },
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// Directory holding the video files.
    #[arg(default_value = "ip")]
    dir: PathBuf,
    /// Sensor stream to read first.
    #[arg(long, default_value = "GPS9")]
    tag: String,
    /// Stream tried when the first one has no samples.
    #[arg(long = "fallback-tag", default_value = "GPS5")]
    fallback_tag: String,
    /// Activity written as the track type.
    #[arg(long, default_value = "running")]
    activity: String,
}

#[derive(Args, Debug)]
struct MergeArgs {
    /// Directory holding the .gpx files, merged in file name order.
    #[arg(default_value = "ip_merge")]
    dir: PathBuf,
    #[arg(default_value = "op_merge/merged.gpx")]
    output: PathBuf,
}

fn run(cli: Cli) -> gpmf_gpx::error::Result<ExitCode> {
    match cli.command {
        Commands::Extract(args) => {
            let options = gpmf_gpx::ExtractOptions {
                primary_tag: args.tag,
                fallback_tag: args.fallback_tag,
                activity_type: args.activity,
                ..Default::default()
            };
            let results = gpmf_gpx::extract_directory(&args.dir, &options)?;
            let written = results.iter().filter(|x| matches!(x.1, Ok(FileReport::Written { .. }))).count();
            let failed = results.iter().filter(|x| x.1.is_err()).count();
            log::info!("Done: {written} written, {} without GPS, {failed} failed", results.len() - written - failed);
            Ok(if failed > 0 { ExitCode::FAILURE } else { ExitCode::SUCCESS })
        }
        Commands::Merge(args) => {
            match gpmf_gpx::merge_directory(&args.dir, &args.output)? {
                MergeOutcome::NotEnoughFiles(_) => Ok(ExitCode::FAILURE),
                MergeOutcome::Merged { .. } => Ok(ExitCode::SUCCESS),
            }
        }
        Commands::Info { file } => {
            let info = extract::file_info(&file)?;
            println!("{}", file.display());
            println!("  GPMF payloads: {} ({:.3}s)", info.payloads, info.duration);
            if let Some((frames, num, den)) = info.video {
                println!("  Video: {frames} frames @ {:.3} fps", num as f64 / den as f64);
            }
            match info.creation_time {
                Some(t) => println!("  Creation time: {}", t.format("%Y-%m-%d %H:%M:%S")),
                None => println!("  Creation time: unknown"),
            }
            println!("  Streams: {}", info.tags.join(", "));
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    gpmf_gpx::init_logging(if cli.verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info });

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
