//! C-Accel Compiler
//!
//! Front end for the C-Accel language: scanning, parsing and lowering to
//! LLVM IR through inkwell. Linking an executable from the emitted `.ll` or
//! object file is left to the native toolchain.
//!
//! # Architecture
//!
//! ```text
//! Source Code (.cax)
//!       │
//!       ▼
//! ┌─────────────┐
//! │    Lexer    │  → Tokens
//! └─────────────┘
//!       │
//!       ▼
//! ┌─────────────┐
//! │   Parser    │  → Syntax tree + diagnostics
//! └─────────────┘
//!       │
//!       ▼
//! ┌─────────────┐
//! │  IR Lowering│  → C-Accel IR
//! └─────────────┘
//!       │
//!       ▼
//! ┌─────────────┐
//! │   Verifier  │  → Checked C-Accel IR
//! └─────────────┘
//!       │
//!       ▼
//! ┌─────────────┐
//! │ LLVM Codegen│  → Verified LLVM IR / object file
//! └─────────────┘
//! ```

pub mod lexer;
pub mod token;
pub mod span;
pub mod ast;
pub mod parser;
pub mod ir;
pub mod driver;

// Re-exports for convenience
pub use ast::{Node, NodeKind};
pub use driver::{compile, compile_file, CompileError, CompileOptions, Compilation};
pub use lexer::{tokenize, Lexer};
pub use parser::{parse, Diagnostic, ParseError};
pub use span::Span;
pub use token::{Token, TokenKind};

/// Compiler version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// File extension for C-Accel source files
pub const FILE_EXTENSION: &str = "cax";
