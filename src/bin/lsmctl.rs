//! Thin CLI client over the public `Engine` API: one operation per
//! invocation against a data directory.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use lsm_engine::{CancellationToken, Engine, LSMBuilder};

#[derive(Parser)]
#[command(name = "lsmctl", about = "Inspect and mutate an lsm_engine data directory")]
struct Cli {
    #[arg(long, default_value = "sst_data")]
    data_dir: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Insert or overwrite a key.
    Put { key: String, value: String },
    /// Print a key's value, or report it absent.
    Get { key: String },
    /// Delete a key.
    Delete { key: String },
    /// Print segment count, memtable size, and bloom fill ratio.
    Stats,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let engine = match LSMBuilder::new().base_path(&cli.data_dir).build() {
        Ok(engine) => engine,
        Err(err) => {
            eprintln!("failed to open engine: {err}");
            return ExitCode::FAILURE;
        }
    };

    let result = run(&engine, cli.command);
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(engine: &Engine, command: Command) -> lsm_engine::Result<()> {
    match command {
        Command::Put { key, value } => engine.insert(key, value),
        Command::Get { key } => {
            match engine.get(&key, &CancellationToken::new())? {
                Some(value) => println!("{value}"),
                None => println!("(absent)"),
            }
            Ok(())
        }
        Command::Delete { key } => engine.delete(&key),
        Command::Stats => {
            let stats = engine.stats();
            println!("segments: {}", stats.segment_count);
            println!("memtable entries: {}", stats.memtable_len);
            println!("bloom fill ratio: {:.4}", stats.bloom_fill_ratio);
            Ok(())
        }
    }
}
