//! Command-line entry point: wire the pool, model and terminal together.

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};

use elfscope::cmd::Commander;
use elfscope::model::ViewModel;
use elfscope::pool::WorkerPool;
use elfscope::{ui, ArchSpec, Batch, PublishFn};

/// Architecture override names accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ArchArg {
    #[value(name = "x86", alias = "i386")]
    X86,
    #[value(name = "x86_64", alias = "amd64")]
    X86_64,
    #[value(name = "arm", alias = "armv7")]
    Arm,
    #[value(name = "aarch64", alias = "arm64")]
    Aarch64,
}

impl ArchArg {
    fn spec(self) -> ArchSpec {
        match self {
            ArchArg::X86 => ArchSpec::X86_32,
            ArchArg::X86_64 => ArchSpec::X86_64,
            ArchArg::Arm => ArchSpec::ARM,
            ArchArg::Aarch64 => ArchSpec::AARCH64,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "elfscope", version, about = "Terminal ELF disassembly explorer")]
struct Args {
    /// ELF image to open at startup
    path: Option<String>,

    /// Worker threads in the disassembly pool
    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// Override the architecture detected from the ELF header
    #[arg(long, value_enum)]
    arch: Option<ArchArg>,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let pool = match WorkerPool::new(args.threads) {
        Ok(pool) => Arc::new(pool),
        Err(err) => {
            eprintln!("elfscope: could not start worker pool: {err}");
            return ExitCode::FAILURE;
        }
    };
    let model = Arc::new(ViewModel::new("elfscope", "no image loaded"));
    let publish: PublishFn = {
        let model = Arc::clone(&model);
        Arc::new(move |batch: Batch| model.add_instructions(batch.insns))
    };

    let mut commander = Commander::new(
        Arc::clone(&model),
        Arc::clone(&pool),
        publish,
        args.arch.map(ArchArg::spec),
    );

    if let Some(path) = &args.path {
        if let Err(err) = commander.open_image(path) {
            eprintln!("elfscope: could not load {path}: {err}");
            return ExitCode::FAILURE;
        }
    }

    ui::setup_panic_hook();
    let mut terminal = match ui::setup_terminal() {
        Ok(terminal) => terminal,
        Err(err) => {
            eprintln!("elfscope: could not initialise terminal: {err}");
            return ExitCode::FAILURE;
        }
    };

    let result = ui::run(&mut terminal, &model, &mut commander);
    let _ = ui::restore_terminal();

    // Let in-flight decode jobs finish before the pool shuts down.
    pool.drain();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("elfscope: {err}");
            ExitCode::FAILURE
        }
    }
}
