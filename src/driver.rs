//! Compilation driver
//!
//! Runs one source text through every stage (scan, parse, generate, verify,
//! LLVM emission) and collects the intermediate products. Each call owns its
//! own state, so independent compilations can run side by side.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::ast::{Node, ParseStatistics};
use crate::ir::{emit_llvm_ir, generate, verify_module, BackendError, Module, VerifyError};
use crate::lexer::tokenize;
use crate::parser::{Diagnostic, ParseError, Parser, MAX_LOOP_ITERATIONS};
use crate::token::Token;

/// Module name used when none is configured
pub const DEFAULT_MODULE_NAME: &str = "C-ACCEL-Module";

/// Extension of the textual IR file
pub const IR_EXTENSION: &str = "ll";

/// Configuration for one compilation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// Name recorded in the module header
    pub module_name: String,
    /// Cap on every list-consuming parser loop
    pub max_parse_iterations: usize,
    /// Keep going after syntax diagnostics instead of stopping before codegen
    pub allow_diagnostics: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            module_name: DEFAULT_MODULE_NAME.to_string(),
            max_parse_iterations: MAX_LOOP_ITERATIONS,
            allow_diagnostics: false,
        }
    }
}

/// Everything produced by a successful compilation
#[derive(Debug, Clone)]
pub struct Compilation {
    pub tokens: Vec<Token>,
    pub program: Node,
    /// Syntax diagnostics; empty unless `allow_diagnostics` was set
    pub diagnostics: Vec<Diagnostic>,
    /// Best-effort problems reported by the generator
    pub warnings: Vec<String>,
    pub module: Module,
    /// The module as printed by LLVM after verification
    pub ir: String,
}

impl Compilation {
    pub fn statistics(&self) -> ParseStatistics {
        ParseStatistics::collect(&self.program)
    }
}

/// Compilation errors
#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("found {} syntax error(s)", .0.len())]
    Diagnostics(Vec<Diagnostic>),

    #[error("generated IR failed verification: {0}")]
    Verify(#[from] VerifyError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Compile source text to a module verified by both checkers
pub fn compile(source: &str, options: &CompileOptions) -> Result<Compilation, CompileError> {
    let tokens = tokenize(source);
    debug!(count = tokens.len(), "scanned tokens");

    let mut parser = Parser::with_limit(tokens.clone(), options.max_parse_iterations);
    let program = parser.parse_program()?;
    let diagnostics = parser.into_diagnostics();
    debug!(diagnostics = diagnostics.len(), "parsed program");

    if !diagnostics.is_empty() && !options.allow_diagnostics {
        return Err(CompileError::Diagnostics(diagnostics));
    }

    let (module, warnings) = generate(&program, &options.module_name);
    verify_module(&module)?;
    let ir = emit_llvm_ir(&module)?;
    debug!(functions = module.functions.len(), warnings = warnings.len(), "generated module");

    Ok(Compilation {
        tokens,
        program,
        diagnostics,
        warnings,
        module,
        ir,
    })
}

/// Where the IR for `input` goes when no output path is given
pub fn default_output_path(input: &Path) -> PathBuf {
    input.with_extension(IR_EXTENSION)
}

/// Compile a source file and write its IR. Returns the IR file path together
/// with the compilation so callers can report on it.
pub fn compile_file(
    input: &Path,
    output: Option<&Path>,
    options: &CompileOptions,
) -> Result<(PathBuf, Compilation), CompileError> {
    let source = fs::read_to_string(input).map_err(|source| CompileError::Read {
        path: input.to_path_buf(),
        source,
    })?;
    let compilation = compile(&source, options)?;

    let path = output.map_or_else(|| default_output_path(input), Path::to_path_buf);
    fs::write(&path, &compilation.ir).map_err(|source| CompileError::Write {
        path: path.clone(),
        source,
    })?;
    info!(input = %input.display(), output = %path.display(), "wrote IR");
    Ok((path, compilation))
}
