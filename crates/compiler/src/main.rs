//! minicc CLI
//!
//! Compiles one C source file and writes the assembly to standard output
//! (or to a file with `-o`). Diagnostics go to standard error; the exit
//! status is 0 on success and 1 on any compile or I/O failure.

use clap::{CommandFactory, Parser as ClapParser};
use clap_complete::Shell;
use minicc::CompilerConfig;
use std::io;
use std::path::PathBuf;
use std::process;

#[derive(ClapParser)]
#[command(name = "minicc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Compile a C subset to x86-64 assembly", long_about = None)]
struct Cli {
    /// Input C source file
    #[arg(required_unless_present = "completions")]
    input: Option<PathBuf>,

    /// Write assembly to PATH instead of stdout
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Print the decorated AST to stderr
    #[arg(long)]
    dump_ast: bool,

    /// Interleave '# file:line:' source comments in the assembly
    #[arg(long)]
    source_comments: bool,

    /// Generate a shell completion script and exit
    #[arg(long, value_enum, value_name = "SHELL")]
    completions: Option<Shell>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    if let Some(shell) = cli.completions {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "minicc", &mut io::stdout());
        return;
    }

    let input = cli.input.expect("clap enforces input");
    let config = CompilerConfig::new()
        .with_dump_ast(cli.dump_ast)
        .with_source_comments(cli.source_comments);

    if let Err(e) = minicc::compile_file(&input, cli.output.as_deref(), &config) {
        eprintln!("{}", e);
        process::exit(1);
    }
}
