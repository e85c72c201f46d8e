//! IR Verification
//!
//! Structural and type checks over a finished module, run before it is handed
//! to the LLVM backend. LLVM's verifier has the final word; this pass keeps
//! the LLVM builder from ever seeing operands of disagreeing types and reports
//! problems in terms of the generator's own names. It covers entry point
//! shape, terminators, branch targets, register definitions and operand types.

use super::instr::{InstrKind, Terminator};
use super::types::{Function, IrType, Module, VReg, Value};
use std::collections::HashSet;
use thiserror::Error;

/// Reasons a module is rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("module has no 'main' function")]
    MissingMain,

    #[error("'main' must take no parameters and return i32, found {0}")]
    BadMainSignature(String),

    #[error("function '{0}' is defined more than once")]
    DuplicateFunction(String),

    #[error("external function '{0}' has a body")]
    ExternalWithBody(String),

    #[error("in function '{function}': {message}")]
    Invalid { function: String, message: String },
}

/// Check a module; the first problem found is reported
pub fn verify_module(module: &Module) -> Result<(), VerifyError> {
    let mut seen = HashSet::new();
    for func in &module.functions {
        if !seen.insert(func.name.as_str()) {
            return Err(VerifyError::DuplicateFunction(func.name.clone()));
        }
        if func.is_external && !func.is_declaration() {
            return Err(VerifyError::ExternalWithBody(func.name.clone()));
        }
    }

    let main = module.function("main").ok_or(VerifyError::MissingMain)?;
    if main.ret_type != IrType::I32 || !main.params.is_empty() || main.is_vararg {
        return Err(VerifyError::BadMainSignature(signature(main)));
    }

    for func in module.functions.iter().filter(|f| !f.is_declaration()) {
        FunctionVerifier::new(module, func).run()?;
    }
    Ok(())
}

fn signature(func: &Function) -> String {
    let params: Vec<String> = func.params.iter().map(ToString::to_string).collect();
    format!("{} ({})", func.ret_type, params.join(", "))
}

struct FunctionVerifier<'a> {
    module: &'a Module,
    func: &'a Function,
    defined: HashSet<VReg>,
}

impl<'a> FunctionVerifier<'a> {
    fn new(module: &'a Module, func: &'a Function) -> Self {
        let defined = func.instructions().filter_map(|i| i.result).collect();
        Self {
            module,
            func,
            defined,
        }
    }

    fn fail(&self, message: impl Into<String>) -> VerifyError {
        VerifyError::Invalid {
            function: self.func.name.clone(),
            message: message.into(),
        }
    }

    fn run(&self) -> Result<(), VerifyError> {
        for block in &self.func.blocks {
            for inst in &block.instructions {
                for operand in inst.operands() {
                    self.check_defined(operand)?;
                }
                self.check_instruction(&inst.kind)
                    .map_err(|msg| self.fail(format!("block '{}': {}", block.label, msg)))?;
            }

            let term = block
                .terminator
                .as_ref()
                .ok_or_else(|| self.fail(format!("block '{}' has no terminator", block.label)))?;
            for operand in term.operands() {
                self.check_defined(operand)?;
            }
            for target in term.successors() {
                if self.func.block(target).is_none() {
                    return Err(self.fail(format!(
                        "block '{}' branches to a block outside the function",
                        block.label
                    )));
                }
            }
            self.check_terminator(term)
                .map_err(|msg| self.fail(format!("block '{}': {}", block.label, msg)))?;
        }
        Ok(())
    }

    fn check_defined(&self, value: &Value) -> Result<(), VerifyError> {
        match value.as_reg() {
            Some(reg) if !self.defined.contains(&reg) => {
                Err(self.fail(format!("use of undefined value {}", reg)))
            }
            _ => Ok(()),
        }
    }

    fn check_instruction(&self, kind: &InstrKind) -> Result<(), String> {
        match kind {
            InstrKind::Alloca(ty) => {
                if *ty == IrType::Void {
                    return Err("alloca of void".into());
                }
            }
            InstrKind::Load { ptr, .. } => expect_ptr(ptr, "load address")?,
            InstrKind::Store { value, ptr } => {
                expect_ptr(ptr, "store address")?;
                if value.ty == IrType::Void {
                    return Err("store of void".into());
                }
            }
            InstrKind::GetElementPtr { ptr, indices, .. } => {
                expect_ptr(ptr, "getelementptr base")?;
                if indices.iter().any(|i| !i.ty.is_int()) {
                    return Err("getelementptr index is not an integer".into());
                }
            }
            InstrKind::Binary { op, lhs, rhs } => {
                if !lhs.ty.same_llvm(&rhs.ty) {
                    return Err(format!("'{}' operands differ: {} and {}", op, lhs.ty, rhs.ty));
                }
                if op.is_float() && !lhs.ty.is_float() {
                    return Err(format!("'{}' needs double operands, found {}", op, lhs.ty));
                }
                if !op.is_float() && !lhs.ty.is_int() {
                    return Err(format!("'{}' needs integer operands, found {}", op, lhs.ty));
                }
            }
            InstrKind::FNeg(value) => {
                if !value.ty.is_float() {
                    return Err(format!("fneg of {}", value.ty));
                }
            }
            InstrKind::ICmp { lhs, rhs, .. } => {
                if !lhs.ty.same_llvm(&rhs.ty) || !(lhs.ty.is_int() || lhs.ty.is_ptr()) {
                    return Err(format!("icmp on {} and {}", lhs.ty, rhs.ty));
                }
            }
            InstrKind::FCmp { lhs, rhs, .. } => {
                if !lhs.ty.is_float() || !rhs.ty.is_float() {
                    return Err(format!("fcmp on {} and {}", lhs.ty, rhs.ty));
                }
            }
            InstrKind::Call { callee, args, .. } => self.check_call(callee, args)?,
        }
        Ok(())
    }

    fn check_call(&self, callee: &str, args: &[Value]) -> Result<(), String> {
        let target = self
            .module
            .function(callee)
            .ok_or_else(|| format!("call to undeclared function '{}'", callee))?;

        let fixed = target.params.len();
        let arity_ok = if target.is_vararg {
            args.len() >= fixed
        } else {
            args.len() == fixed
        };
        if !arity_ok {
            return Err(format!(
                "call to '{}' passes {} arguments, expected {}",
                callee,
                args.len(),
                fixed
            ));
        }
        for (arg, param) in args.iter().zip(&target.params) {
            if !arg.ty.same_llvm(param) {
                return Err(format!("argument of type {} passed to '{}' as {}", arg.ty, callee, param));
            }
        }
        Ok(())
    }

    fn check_terminator(&self, term: &Terminator) -> Result<(), String> {
        match term {
            Terminator::Ret(None) if self.func.ret_type != IrType::Void => {
                Err(format!("ret void in function returning {}", self.func.ret_type))
            }
            Terminator::Ret(Some(value)) if !value.ty.same_llvm(&self.func.ret_type) => Err(format!(
                "ret {} in function returning {}",
                value.ty, self.func.ret_type
            )),
            Terminator::CondBr { cond, .. } if cond.ty != IrType::Bool => {
                Err(format!("branch condition has type {}", cond.ty))
            }
            _ => Ok(()),
        }
    }
}

fn expect_ptr(value: &Value, what: &str) -> Result<(), String> {
    if value.ty.is_ptr() {
        Ok(())
    } else {
        Err(format!("{} has type {}", what, value.ty))
    }
}
