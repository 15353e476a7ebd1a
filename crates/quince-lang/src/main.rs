use std::io::{self, Read};
use std::path::PathBuf;

use clap::Parser;
use quince_core::interrupt::interrupt_flag;
use quince_core::{
    format_error, with_eval_stack, CompiledUnit, EvalOptions, QuinceError, RuntimeCtx, ERROR_TAG,
    WARN_TAG,
};
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::flag;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quince")]
#[command(version, about = "Run Quince programs")]
struct Cli {
    /// Source file to run (reads stdin when omitted)
    file: Option<PathBuf>,

    /// Evaluate CODE instead of a file
    #[arg(short, long, value_name = "CODE", conflicts_with = "file")]
    eval: Option<String>,

    /// Print the compiled bytecode instead of the result
    #[arg(long)]
    dump: bool,

    /// Print the value of the last form
    #[arg(short, long)]
    print: bool,
}

fn install_signal_handlers() {
    for sig in [SIGINT, SIGTERM] {
        if let Err(err) = flag::register(sig, interrupt_flag()) {
            eprintln!(
                "{} failed to register signal handler ({}): {}",
                WARN_TAG, sig, err
            );
        }
    }
}

fn read_stdin() -> Result<String, QuinceError> {
    let mut code = String::new();
    io::stdin()
        .read_to_string(&mut code)
        .map_err(|e| QuinceError::io("<stdin>", e))?;
    Ok(code)
}

fn compile(ctx: &RuntimeCtx, cli: &Cli) -> Result<CompiledUnit, QuinceError> {
    match (&cli.eval, &cli.file) {
        (Some(code), _) => ctx.compile_string(code, "-e", 1),
        (None, Some(path)) => ctx.compile_file(path),
        (None, None) => ctx.compile_string(&read_stdin()?, "<stdin>", 1),
    }
}

fn run(ctx: &RuntimeCtx, cli: &Cli) -> Result<(), QuinceError> {
    if cli.dump {
        let unit = compile(ctx, cli)?;
        print!("{}", unit);
        return Ok(());
    }
    let value = match (&cli.eval, &cli.file) {
        (Some(code), _) => ctx.eval_source(code, "-e", 1)?,
        (None, Some(path)) => ctx.eval_file(path)?,
        (None, None) => ctx.eval_source(&read_stdin()?, "<stdin>", 1)?,
    };
    debug!(result = %value, "finished");
    if cli.print {
        println!("{}", value);
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("QUINCE_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    install_signal_handlers();

    let result = with_eval_stack(move || {
        let ctx = RuntimeCtx::with_options(EvalOptions::default());
        run(&ctx, &cli).map_err(|err| format_error(&err))
    })
    .unwrap_or_else(|err| Err(format_error(&err)));
    if let Err(message) = result {
        eprintln!("{} {}", ERROR_TAG, message);
        std::process::exit(1);
    }
}
