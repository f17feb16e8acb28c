//! Run the optimizer on a textual program and print the runtime program.
//!
//! ```text
//! mir-opt model.mir --places cuda/float/NCHW,host/float/NCHW --trace
//! ```

use clap::Parser;
use infer_mir::config::{parse_pass_list, parse_pick_factor, parse_places, CompileOptions};
use infer_mir::core::Scope;
use infer_mir::passes::{PassRegistry, DEFAULT_PASSES};
use infer_mir::program::Program;
use infer_mir::text_program::parse_program;
use infer_mir::Optimizer;
use std::fs;
use std::io::{self, Read};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "mir-opt", version, about = "Compile a textual inference program")]
struct Cli {
    /// Program file; reads stdin when omitted
    input: Option<String>,

    /// Valid places, best first (overrides the file's `places`)
    #[arg(long)]
    places: Option<String>,

    /// Kernel pick factors: any of target,precision,layout
    #[arg(long)]
    pick: Option<String>,

    /// Comma-separated pass list replacing the default pipeline
    #[arg(long)]
    passes: Option<String>,

    /// Append the host fallback places
    #[arg(long)]
    host_fallbacks: bool,

    /// Print the pass trace
    #[arg(long)]
    trace: bool,

    /// Print the kernel summary
    #[arg(long)]
    summary: bool,

    /// Print the default pipeline and exit
    #[arg(long)]
    list_passes: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    if cli.list_passes {
        for name in DEFAULT_PASSES {
            println!("{}", name);
        }
        return Ok(());
    }

    let text = match &cli.input {
        Some(path) => fs::read_to_string(path)?,
        None => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };
    let parsed = parse_program(&text)?;

    let mut options = CompileOptions::new(parsed.valid_places.clone()).overlay_env()?;
    if let Some(places) = &cli.places {
        options.valid_places = parse_places(places)?;
    }
    if let Some(pick) = &cli.pick {
        options.pick_factor = parse_pick_factor(pick)?;
    }
    if let Some(passes) = &cli.passes {
        options.passes = parse_pass_list(passes);
    }
    if cli.host_fallbacks {
        options = options.with_host_fallbacks();
    }

    let scope = Scope::with_vars(parsed.program.vars.iter().map(|v| v.name.clone()));
    let program = Program::new(parsed.program, scope);
    let mut optimizer = Optimizer::new(
        Arc::new(PassRegistry::with_builtin_passes()?),
        Arc::new(parsed.kernels),
    );

    let result = optimizer
        .run_with_options(&program, &options)
        .and_then(|()| optimizer.gen_runtime_program());
    if cli.trace {
        for event in optimizer.session().trace() {
            println!("{}", event);
        }
    }
    let runtime = match result {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    print!("{}", runtime);
    let io = runtime.feed_fetch()?;
    println!("inputs:  {}", io.inputs.join(", "));
    println!("outputs: {}", io.outputs.join(", "));
    if cli.summary {
        let summary = runtime.kernel_summary();
        println!("ops:     {}", summary.op_types.iter().cloned().collect::<Vec<_>>().join(", "));
        for kernel in &summary.kernels {
            println!("kernel:  {}", kernel);
        }
    }
    print!("{}", optimizer.session().stats());
    Ok(())
}
