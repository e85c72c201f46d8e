//! C-Accel Compiler CLI
//!
//! The `caxc` command drives the C-Accel front end and writes LLVM IR.

use caccel::ast::ParseStatistics;
use caccel::driver::{self, CompileError, CompileOptions};
use caccel::{ir, lexer, parser};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "caxc")]
#[command(version = caccel::VERSION)]
#[command(about = "The C-Accel Compiler", long_about = None)]
struct Cli {
    /// Log pass progress to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a C-Accel source file to LLVM IR
    Build {
        /// Input file to compile
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Output IR file (defaults to <FILE>.ll)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Emit tokens (for debugging)
        #[arg(long)]
        emit_tokens: bool,

        /// Emit the syntax tree (for debugging)
        #[arg(long)]
        emit_ast: bool,

        /// Print the C-Accel IR listing (for debugging)
        #[arg(long)]
        emit_ir: bool,

        /// Print the generated LLVM IR
        #[arg(long)]
        emit_llvm: bool,

        /// Print parse statistics
        #[arg(long)]
        stats: bool,

        /// Generate code even when the parser reported errors
        #[arg(long)]
        allow_diagnostics: bool,

        /// Also write a native object file next to the IR
        #[arg(long)]
        object: bool,
    },

    /// Check a file for errors without writing output
    Check {
        /// Input file to check
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },

    /// Tokenize a file and print tokens
    Tokenize {
        /// Input file to tokenize
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },

    /// Parse a file and print the syntax tree
    Parse {
        /// Input file to parse
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Print parse statistics
        #[arg(long)]
        stats: bool,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn read_source(input: &Path) -> miette::Result<String> {
    fs::read_to_string(input).map_err(|e| miette::miette!("Failed to read {}: {}", input.display(), e))
}

fn report(err: CompileError) -> miette::Report {
    if let CompileError::Diagnostics(diagnostics) = &err {
        for diagnostic in diagnostics {
            eprintln!("{}", diagnostic);
        }
    }
    miette::miette!("{}", err)
}

fn print_stats(stats: &ParseStatistics) {
    println!("\n=== Parse Statistics ===");
    println!("{}", stats);
}

fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Build {
            input,
            output,
            emit_tokens,
            emit_ast,
            emit_ir,
            emit_llvm,
            stats,
            allow_diagnostics,
            object,
        } => {
            println!("Compiling {}...", input.display());

            let options = CompileOptions {
                allow_diagnostics,
                ..CompileOptions::default()
            };
            let (out_path, compilation) =
                driver::compile_file(&input, output.as_deref(), &options).map_err(report)?;

            if emit_tokens {
                println!("\n=== Tokens ===");
                for token in &compilation.tokens {
                    println!(
                        "{:>8} {:20} {:?}",
                        token.position.to_string(),
                        format!("{:?}", token.kind),
                        token.text
                    );
                }
            }
            if emit_ast {
                println!("\n=== AST ===");
                print!("{}", compilation.program);
            }
            if stats {
                print_stats(&compilation.statistics());
            }
            for diagnostic in &compilation.diagnostics {
                eprintln!("{}", diagnostic);
            }
            for warning in &compilation.warnings {
                eprintln!("Warning: {}", warning);
            }
            if emit_ir {
                println!("\n=== C-Accel IR ===");
                print!("{}", ir::print_module(&compilation.module));
            }
            if emit_llvm {
                println!("\n=== LLVM IR ===");
                print!("{}", compilation.ir);
            }

            if object {
                let obj_path = out_path.with_extension("o");
                ir::emit_object(&compilation.module, &obj_path, ir::OptLevel::default())
                    .map_err(|e| miette::miette!("{}", e))?;
                println!("Object file: {}", obj_path.display());
            }

            println!("IR written to {}", out_path.display());
            Ok(())
        }

        Commands::Check { input } => {
            let source = read_source(&input)?;
            println!("Checking {}...", input.display());

            let compilation = driver::compile(&source, &CompileOptions::default()).map_err(report)?;
            for warning in &compilation.warnings {
                eprintln!("Warning: {}", warning);
            }
            println!("No errors found! ({} tokens)", compilation.tokens.len());
            Ok(())
        }

        Commands::Tokenize { input } => {
            let source = read_source(&input)?;

            for token in lexer::tokenize(&source) {
                println!(
                    "{:>4}..{:<4} {:>8} {:20} {:?}",
                    token.span.start,
                    token.span.end,
                    token.position.to_string(),
                    format!("{:?}", token.kind),
                    token.text
                );
            }
            Ok(())
        }

        Commands::Parse { input, stats } => {
            let source = read_source(&input)?;

            let (program, diagnostics) =
                parser::parse(lexer::tokenize(&source)).map_err(|e| miette::miette!("{}", e))?;
            print!("{}", program);
            if stats {
                print_stats(&ParseStatistics::collect(&program));
            }

            if !diagnostics.is_empty() {
                eprintln!("\nParser errors:");
                for diagnostic in diagnostics {
                    eprintln!("  {}", diagnostic);
                }
            }
            Ok(())
        }
    }
}
