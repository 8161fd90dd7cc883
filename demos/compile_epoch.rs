//! Example: Compiling One Epoch
//!
//! Compiles a small pipegen description twice, with and without the
//! post-TM relay bypass, and prints the resulting partition.
//!
//! Run with: cargo run --example compile_epoch

use pipegen2::{compile_epoch_str, NoopForkJoinChecker, PcieFlowConfig, PipegenConfig};

const SAMPLE: &str = include_str!("sample_epoch.yaml");

fn main() {
    println!("=== Pipe Graph Compilation Example ===\n");

    let unoptimized = PipegenConfig::new(PcieFlowConfig::default(), false);
    let epoch = compile_epoch_str(SAMPLE, &unoptimized).unwrap();
    println!(
        "Without relay bypass: {} buffers, {} pipes",
        epoch.graph.buffers().len(),
        epoch.graph.pipes().len()
    );

    let config = PipegenConfig::default();
    let epoch = compile_epoch_str(SAMPLE, &config).unwrap();
    println!(
        "With relay bypass:    {} buffers, {} pipes\n",
        epoch.graph.buffers().len(),
        epoch.graph.pipes().len()
    );

    for (i, subgraph) in epoch.subgraphs.iter().enumerate() {
        let buffers: Vec<String> = subgraph.buffers.iter().map(|id| id.to_string()).collect();
        let pipes: Vec<String> = subgraph.pipes.iter().map(|id| id.to_string()).collect();
        println!("Subgraph {}:", i);
        println!("  buffers: {}", buffers.join(", "));
        println!("  pipes:   {}", pipes.join(", "));
    }
    println!();

    let report = epoch.report(0, &config, &NoopForkJoinChecker).unwrap();
    print!("{}", report);
}
