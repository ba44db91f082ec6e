//! colflow command line
//! --------------------
//! Loads a JSON workflow, runs it once and prints the live rows of its tables.

use std::env;
use std::path::PathBuf;

use colflow::manifest::WorkflowManifest;
use colflow::{EngineConfig, FlowError};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} [--log <level>] [--incremental] [--print <table>]... <workflow.json>\n\nFlags:\n  --log <level>      Log level when RUST_LOG is unset (default: info)\n  --incremental      Evaluate only rows added since the last run\n  --print <table>    Print only this table (repeatable); default prints all tables\n  -h, --help         Show this help\n\nEnvironment:\n  COLFLOW_INCREMENTAL, COLFLOW_MAX_PATH_DEPTH, COLFLOW_MAX_AUGMENT_ROUNDS"
    );
}

struct Args {
    log: String,
    incremental: bool,
    print: Vec<String>,
    manifest: PathBuf,
}

fn parse_args() -> Args {
    let mut args: Vec<String> = env::args().collect();
    let program = args.remove(0);
    let mut log = "info".to_string();
    let mut incremental = false;
    let mut print = Vec::new();
    let mut manifest: Option<PathBuf> = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--log" => {
                if i + 1 >= args.len() { eprintln!("--log requires a value"); print_usage(&program); std::process::exit(2); }
                log = args[i + 1].clone();
                i += 2;
            }
            "--print" => {
                if i + 1 >= args.len() { eprintln!("--print requires a table name"); print_usage(&program); std::process::exit(2); }
                print.push(args[i + 1].clone());
                i += 2;
            }
            "--incremental" => { incremental = true; i += 1; }
            "-h" | "--help" => { print_usage(&program); std::process::exit(0); }
            other if other.starts_with('-') => {
                eprintln!("unknown flag {}", other);
                print_usage(&program);
                std::process::exit(2);
            }
            other => { manifest = Some(PathBuf::from(other)); i += 1; }
        }
    }
    let Some(manifest) = manifest else {
        print_usage(&program);
        std::process::exit(2);
    };
    Args { log, incremental, print, manifest }
}

fn run(args: &Args) -> Result<(), FlowError> {
    let manifest = WorkflowManifest::from_path(&args.manifest)?;
    let mut wf = manifest.into_workflow_with(EngineConfig::from_env());
    if args.incremental { wf.set_incremental(true); }
    let report = wf.run()?;
    info!(target: "colflow", "executed {} operation(s), skipped {}", report.executed.len(), report.skipped.len());
    for (label, reason) in report.skipped.iter() {
        eprintln!("skipped {}: {}", label, reason);
    }
    let names: Vec<String> = if args.print.is_empty() { wf.registry().table_names() } else { args.print.clone() };
    for name in names {
        let t = wf.registry().require_table(&name)?;
        println!("{}", name);
        println!("{}", t.store.full_slice(&[] as &[&str])?);
    }
    Ok(())
}

fn main() {
    let args = parse_args();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    if let Err(e) = run(&args) {
        eprintln!("error: {}", e);
        std::process::exit(e.exit_code());
    }
}
