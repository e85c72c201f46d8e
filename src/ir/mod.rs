//! C-Accel Intermediate Representation
//!
//! An SSA-form IR that mirrors the subset of LLVM the generator needs.
//! Lowering builds it from the syntax tree and the verifier checks it before
//! it is handed to the LLVM backend. The printer renders a debug listing.

// Note: instr must come before types to avoid circular deps
mod instr;
mod types;
mod builder;
mod lower;
mod printer;
mod verify;
mod llvm;

pub use instr::*;
pub use types::*;
pub use builder::*;
pub use lower::*;
pub use printer::*;
pub use verify::*;
pub use llvm::*;
