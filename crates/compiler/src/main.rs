//! `lethec` CLI: compile, check, and lint Lethe source files.

use clap::{CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{Shell, generate};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::process;

use lethec::compiler::Compiler;
use lethec::config::CompilerConfig;

#[derive(ClapParser)]
#[command(name = "lethec")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Lethe compiler front end", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse, resolve, run codegen, and write a serialized bytecode image
    /// next to the input file (same name, `.lec` extension)
    Build {
        /// Input .le source file
        input: PathBuf,

        /// Path to a CompilerConfig TOML file
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Parse and resolve only, without codegen (fast diagnostics)
    Check {
        /// Input .le source file
        input: PathBuf,

        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Resolve and report warnings only, skipping codegen
    Lint {
        /// Input .le files to lint
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        #[arg(long)]
        config: Option<PathBuf>,

        /// Treat warnings as errors (exit with failure if any warnings)
        #[arg(long)]
        deny_warnings: bool,
    },

    /// Generate shell completion scripts
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { input, config } => run_build(&input, config.as_deref()),
        Commands::Check { input, config } => run_check(&input, config.as_deref()),
        Commands::Lint {
            paths,
            config,
            deny_warnings,
        } => run_lint(&paths, config.as_deref(), deny_warnings),
        Commands::Completions { shell } => run_completions(shell),
    }
}

fn run_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "lethec", &mut io::stdout());
}

fn load_config(path: Option<&std::path::Path>) -> CompilerConfig {
    match path {
        Some(path) => match fs::read_to_string(path) {
            Ok(src) => match CompilerConfig::from_toml(&src) {
                Ok(cfg) => cfg,
                Err(e) => {
                    eprintln!("Error parsing config '{}': {e}", path.display());
                    process::exit(1);
                }
            },
            Err(e) => {
                eprintln!("Error reading config '{}': {e}", path.display());
                process::exit(1);
            }
        },
        None => CompilerConfig::new(),
    }
}

fn read_source(input: &std::path::Path) -> String {
    fs::read_to_string(input).unwrap_or_else(|e| {
        eprintln!("Error reading '{}': {e}", input.display());
        process::exit(1);
    })
}

fn run_build(input: &std::path::Path, config_path: Option<&std::path::Path>) {
    let config = load_config(config_path);
    let source = read_source(input);

    let mut compiler = Compiler::new(config, lethe_core::GlobalCounter::new());
    compiler.compile(&source, input.display().to_string());
    compiler.resolve(false);

    if compiler.has_errors() {
        eprintln!("Build failed: {}", input.display());
        process::exit(1);
    }

    let program = compiler.codegen();
    println!(
        "Compiled {}: {} instruction(s), {} type(s), {} constant(s)",
        input.display(),
        program.instructions.len(),
        program.type_count(),
        program.constants.len(),
    );
    if program.has_errors() {
        eprintln!("Codegen reported {} error(s)", program.errors.len());
        process::exit(1);
    }

    let image = program.bytecode_image();
    let bytes = bincode::serialize(&image).unwrap_or_else(|e| {
        eprintln!("Error serializing bytecode image: {e}");
        process::exit(1);
    });
    let out_path = input.with_extension("lec");
    if let Err(e) = fs::write(&out_path, bytes) {
        eprintln!("Error writing '{}': {e}", out_path.display());
        process::exit(1);
    }
    println!("Wrote {}", out_path.display());
}

fn run_check(input: &std::path::Path, config_path: Option<&std::path::Path>) {
    let config = load_config(config_path);
    let source = read_source(input);

    let mut compiler = Compiler::new(config, lethe_core::GlobalCounter::new());
    compiler.compile(&source, input.display().to_string());
    let ok = compiler.resolve(true);

    if !ok || compiler.has_errors() {
        eprintln!("Check failed: {}", input.display());
        process::exit(1);
    }
    println!("OK: {}", input.display());
}

fn run_lint(paths: &[PathBuf], config_path: Option<&std::path::Path>, deny_warnings: bool) {
    let config = load_config(config_path);
    let mut total_warnings = 0usize;
    let mut had_errors = false;

    for path in paths {
        let source = read_source(path);
        let mut compiler = Compiler::new(config.clone(), lethe_core::GlobalCounter::new());
        compiler.compile(&source, path.display().to_string());
        compiler.resolve(true);

        let warnings = compiler.take_warnings();
        for warning in &warnings {
            println!("{}: warning[{}]: {}", path.display(), warning.id.code(), warning.message);
        }
        total_warnings += warnings.len();
        if compiler.has_errors() {
            had_errors = true;
        }
    }

    println!("{total_warnings} warning(s) across {} file(s)", paths.len());
    if had_errors || (deny_warnings && total_warnings > 0) {
        process::exit(1);
    }
}
