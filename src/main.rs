use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use karel99::{Config, Halt, PrintSink, StopSignal};

/// Run one routine from a Karel 99 source file.
#[derive(Parser)]
struct Args {
    /// Source file (.K99, ISO-8859-2 encoded).
    input: PathBuf,
    /// Name of the routine to execute.
    routine: String,
    /// Write the alias-translated source (comments preserved) here.
    #[arg(long)]
    translated: Option<PathBuf>,
    /// Fill cells outside the declared map with walls.
    #[arg(long)]
    walled: bool,
}

/// Prints each `PRINT` line as soon as it is produced.
struct Stdout;

impl PrintSink for Stdout {
    fn print(&mut self, text: &str) {
        println!("{text}");
    }
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let args = Args::parse();

    let bytes = std::fs::read(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let config = Config {
        wall_outside_map: args.walled,
        ..Config::default()
    };
    let loaded = karel99::load_bytes(&bytes, &config)
        .with_context(|| format!("failed to load {}", args.input.display()))?;

    if let Some(path) = &args.translated {
        let mut text = loaded.translated.join("\n");
        text.push('\n');
        std::fs::write(path, text)
            .with_context(|| format!("failed to write {}", path.display()))?;
        log::info!("translated source written to {}", path.display());
    }

    let mut world = loaded.world;
    let stop = StopSignal::new();
    let halt = karel99::run(
        &loaded.program,
        &mut world,
        &args.routine,
        &stop,
        &mut Stdout,
        &config,
    )?;
    if halt == Halt::Stopped {
        log::warn!("execution was stopped before completing");
    }

    let (x, y) = world.position();
    log::info!("finished at ({x}, {y}) facing {:?}", world.facing());
    Ok(())
}
