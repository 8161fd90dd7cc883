//! Pipe graph compiler CLI
//!
//! Usage:
//!   pipegen2 pipegen.yaml soc_descriptor.yaml blob.yaml 0 perf_dump_info
//!   pipegen2 pipegen.yaml soc_descriptor.yaml blob.yaml 0 perf_dump_info --config pipegen.json -v

use clap::{ArgAction, Parser as ClapParser};
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use tracing::Level;

use pipegen2::{compile_epoch, EpochReport, NoopForkJoinChecker, PipegenConfig, PipegenError, PipegenResult};

#[derive(ClapParser, Debug)]
#[command(name = "pipegen2")]
#[command(author = "Overlay Team")]
#[command(version = "0.1.0")]
#[command(about = "Compiles a pipegen epoch description into a repaired, partitioned pipe graph")]
struct Args {
    /// Pipegen text describing the epoch's buffers and pipes
    #[arg(value_name = "PIPEGEN_YAML")]
    pipegen_yaml: PathBuf,

    /// SoC descriptor of the target device
    #[arg(value_name = "SOC_DESCRIPTOR_YAML")]
    soc_descriptor_yaml: PathBuf,

    /// Where to write the epoch report
    #[arg(value_name = "OUTPUT_BLOB_YAML")]
    output_blob_yaml: PathBuf,

    /// Temporal epoch being compiled
    #[arg(value_name = "EPOCH_NUMBER")]
    epoch: u32,

    /// Performance dump settings, passed through untouched
    #[arg(value_name = "PERF_DUMP_INFO")]
    perf_dump_info: String,

    /// JSON file overriding the default compiler configuration
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Print the report as JSON instead of a summary
    #[arg(short = 'j', long = "json")]
    json_output: bool,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let args = Args::parse();

    let level = match args.verbose {
        0 => Level::WARN,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match run(&args) {
        Ok(report) => {
            if args.json_output {
                match report.to_json() {
                    Ok(json) => println!("{}", json),
                    Err(e) => fail(&PipegenError::config(format!("Failed to serialize report: {}", e))),
                }
            } else {
                print_report(&report, &args.output_blob_yaml);
            }
        }
        Err(e) => fail(&e),
    }
}

fn run(args: &Args) -> PipegenResult<EpochReport> {
    let config = match &args.config {
        Some(path) => PipegenConfig::from_json_file(path)?,
        None => PipegenConfig::default(),
    };

    if !args.soc_descriptor_yaml.exists() {
        return Err(PipegenError::io(
            &args.soc_descriptor_yaml,
            std::io::Error::new(std::io::ErrorKind::NotFound, "SoC descriptor not found"),
        ));
    }
    tracing::debug!(perf_dump_info = %args.perf_dump_info, "perf dump settings");

    let epoch = compile_epoch(&args.pipegen_yaml, &config)?;
    let report = epoch.report(args.epoch, &config, &NoopForkJoinChecker)?;

    let json = report
        .to_json()
        .map_err(|e| PipegenError::config(format!("Failed to serialize report: {}", e)))?;
    fs::write(&args.output_blob_yaml, json).map_err(|e| PipegenError::io(&args.output_blob_yaml, e))?;
    Ok(report)
}

fn fail(error: &PipegenError) -> ! {
    let line = format!("<PIPEGEN-ERROR> {}", error);
    println!("{}", line);
    eprintln!("{}", line.red());
    process::exit(1);
}

fn print_report(report: &EpochReport, output: &Path) {
    println!("{}", format!("Epoch {} compiled", report.epoch).bold().green());
    println!("{}", "=".repeat(40));
    println!("{}: {:?}", "Chips".cyan(), report.chips);
    println!("{}: {}", "Buffers".cyan(), report.num_buffers);
    println!("{}: {}", "Pipes".cyan(), report.num_pipes);
    println!("{}: {}", "Subgraphs".cyan(), report.subgraphs.len());
    if !report.mmio_transfers.is_empty() {
        println!("{}: {}", "MMIO transfers".cyan(), report.mmio_transfers.len());
    }
    println!("{}: {}", "Report".cyan(), output.display());
}
