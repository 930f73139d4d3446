//! spirc command-line driver.
//!
//! Reads a graph file, runs every stage of the back end and writes the
//! portable binary.

use std::fs;
use std::path::PathBuf;
use std::process;

use clap::Parser;

use spirc::{CompileConfig, DebugOptions, FeatureFlags, Graph, SpirCompiler, TargetCapability};

#[derive(Parser)]
#[command(name = "spirc", version, about = "Compile a computation graph to a portable SPIR binary")]
struct Cli {
    /// Input graph file
    input: PathBuf,

    /// Output binary (default: <input>.spv)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Device capability as MAJOR.MINOR
    #[arg(long, default_value = "8.0")]
    capability: TargetCapability,

    /// Skip the multi-headed attention fusion pipeline
    #[arg(long)]
    no_attention_fusion: bool,

    /// Let min/max drop NaN operands
    #[arg(long)]
    fast_min_max: bool,

    /// Decompose reshapes and normalize layouts after layout assignment
    #[arg(long)]
    normalize_layouts: bool,

    /// Lowered module file that may replace the compiled one (repeatable)
    #[arg(long, value_name = "PATH")]
    lowered_ir_file: Vec<PathBuf>,

    /// Directory receiving graph dumps before and after each pass
    #[arg(long, value_name = "DIR")]
    dump_to: Option<PathBuf>,

    /// Verify graph invariants at pipeline boundaries in release builds too
    #[arg(long)]
    verify: bool,

    /// Print pass statistics after compiling
    #[arg(long)]
    stats: bool,
}

impl Cli {
    fn config(&self) -> CompileConfig {
        let mut features = FeatureFlags::from_env();
        if self.no_attention_fusion {
            features.attention_fusion = false;
        }
        let mut config = CompileConfig {
            features,
            debug: DebugOptions {
                fast_min_max: self.fast_min_max,
                normalize_layouts: self.normalize_layouts,
                lowered_ir_files: self.lowered_ir_file.clone(),
                dump_to: self.dump_to.clone(),
                verify_invariants: self.verify,
            },
            ..CompileConfig::default()
        };
        config.target.capability = self.capability;
        config
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let text = fs::read_to_string(&cli.input)?;
    let graph = Graph::parse(&text).map_err(|err| format!("{}: {}", cli.input.display(), err))?;
    let artifact = SpirCompiler::default().compile(graph, &cli.config())?;

    let output = cli.output.clone().unwrap_or_else(|| cli.input.with_extension("spv"));
    fs::write(&output, &artifact.binary)?;
    log::info!("Wrote {} bytes to {}", artifact.binary.len(), output.display());
    if cli.stats {
        println!("{}", artifact.stats);
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(err) = run(&cli) {
        eprintln!("error: {err}");
        process::exit(1);
    }
}
