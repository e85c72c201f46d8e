//! IR Instructions
//!
//! Instruction definitions for the C-Accel IR. Operands are typed [`Value`]s
//! so every instruction can be printed without a type table.

use super::types::{BlockId, IrType, VReg, Value};
use std::fmt;

/// An instruction in the IR
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Result register (None for void instructions)
    pub result: Option<VReg>,
    /// Preferred printed name of the result; unnamed results are numbered
    pub name: Option<String>,
    /// The instruction kind
    pub kind: InstrKind,
}

impl Instruction {
    pub fn new(result: Option<VReg>, name: Option<String>, kind: InstrKind) -> Self {
        Self { result, name, kind }
    }

    /// Every operand read by this instruction
    pub fn operands(&self) -> Vec<&Value> {
        match &self.kind {
            InstrKind::Alloca(_) => vec![],
            InstrKind::Load { ptr, .. } => vec![ptr],
            InstrKind::Store { value, ptr } => vec![value, ptr],
            InstrKind::Binary { lhs, rhs, .. }
            | InstrKind::ICmp { lhs, rhs, .. }
            | InstrKind::FCmp { lhs, rhs, .. } => vec![lhs, rhs],
            InstrKind::FNeg(value) => vec![value],
            InstrKind::GetElementPtr { ptr, indices, .. } => {
                std::iter::once(ptr).chain(indices.iter()).collect()
            }
            InstrKind::Call { args, .. } => args.iter().collect(),
        }
    }
}

/// Kinds of instructions
#[derive(Debug, Clone, PartialEq)]
pub enum InstrKind {
    // ============ Memory ============
    /// Allocate stack space; the result is a pointer
    Alloca(IrType),
    /// Load a value of type `ty`
    Load { ty: IrType, ptr: Value },
    Store { value: Value, ptr: Value },
    /// Element address: `getelementptr inbounds base_ty, ptr, indices...`
    GetElementPtr {
        base_ty: IrType,
        ptr: Value,
        indices: Vec<Value>,
    },

    // ============ Arithmetic ============
    /// Two-operand arithmetic or bitwise operation
    Binary { op: BinOp, lhs: Value, rhs: Value },
    /// Float negation
    FNeg(Value),

    // ============ Comparison ============
    /// Integer comparison
    ICmp { op: CmpOp, lhs: Value, rhs: Value },
    /// Unordered float comparison
    FCmp { op: CmpOp, lhs: Value, rhs: Value },

    // ============ Calls ============
    Call {
        callee: String,
        ret_ty: IrType,
        args: Vec<Value>,
    },
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    SDiv,
    SRem,
    FAdd,
    FSub,
    FMul,
    FDiv,
    And,
    Or,
    Xor,
}

impl BinOp {
    pub fn is_float(&self) -> bool {
        matches!(self, BinOp::FAdd | BinOp::FSub | BinOp::FMul | BinOp::FDiv)
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::SDiv => "sdiv",
            BinOp::SRem => "srem",
            BinOp::FAdd => "fadd",
            BinOp::FSub => "fsub",
            BinOp::FMul => "fmul",
            BinOp::FDiv => "fdiv",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
        };
        write!(f, "{}", s)
    }
}

/// Comparison predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
}

impl CmpOp {
    /// Predicate spelling for `fcmp` (unordered forms)
    pub fn float_name(&self) -> &'static str {
        match self {
            CmpOp::Eq => "ueq",
            CmpOp::Ne => "une",
            CmpOp::Slt => "ult",
            CmpOp::Sle => "ule",
            CmpOp::Sgt => "ugt",
            CmpOp::Sge => "uge",
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Eq => "eq",
            CmpOp::Ne => "ne",
            CmpOp::Slt => "slt",
            CmpOp::Sle => "sle",
            CmpOp::Sgt => "sgt",
            CmpOp::Sge => "sge",
        };
        write!(f, "{}", s)
    }
}

/// Block terminators
#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    /// Return from function
    Ret(Option<Value>),
    /// Unconditional branch
    Br(BlockId),
    /// Conditional branch on an `i1`
    CondBr {
        cond: Value,
        then_block: BlockId,
        else_block: BlockId,
    },
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Ret(_) => vec![],
            Terminator::Br(target) => vec![*target],
            Terminator::CondBr {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
        }
    }

    pub fn operands(&self) -> Vec<&Value> {
        match self {
            Terminator::Ret(Some(value)) => vec![value],
            Terminator::CondBr { cond, .. } => vec![cond],
            Terminator::Ret(None) | Terminator::Br(_) => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_spelling() {
        assert_eq!(BinOp::SDiv.to_string(), "sdiv");
        assert_eq!(BinOp::FAdd.to_string(), "fadd");
        assert_eq!(CmpOp::Sge.to_string(), "sge");
        assert_eq!(CmpOp::Ne.float_name(), "une");
    }

    #[test]
    fn test_operands_and_successors() {
        let store = Instruction::new(
            None,
            None,
            InstrKind::Store {
                value: Value::i32(1),
                ptr: Value::reg(VReg(0), IrType::ptr(IrType::I32)),
            },
        );
        assert_eq!(store.operands().len(), 2);

        let branch = Terminator::CondBr {
            cond: Value::bool(true),
            then_block: BlockId(1),
            else_block: BlockId(2),
        };
        assert_eq!(branch.successors(), vec![BlockId(1), BlockId(2)]);
        assert_eq!(branch.operands().len(), 1);
        assert!(Terminator::Ret(None).successors().is_empty());
    }
}
