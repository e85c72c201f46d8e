//! IR Types
//!
//! Type, value and container representations for the C-Accel IR. Types map
//! one-to-one onto LLVM first-class types; pointers are opaque when printed
//! but remember their pointee so the generator can reason about slots.

use super::{Instruction, Terminator};
use std::fmt;

/// A virtual register (SSA value)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VReg(pub u32);

impl fmt::Display for VReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// A basic block label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// IR types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrType {
    /// Void/unit type
    Void,
    /// Boolean (1 bit)
    Bool,
    /// 8-bit integer (characters)
    I8,
    /// 32-bit signed integer
    I32,
    /// 64-bit float
    F64,
    /// Pointer; the pointee is bookkeeping only
    Ptr(Box<IrType>),
    /// Fixed-size array of elements
    Array(Box<IrType>, usize),
}

impl IrType {
    pub fn ptr(inner: IrType) -> Self {
        IrType::Ptr(Box::new(inner))
    }

    pub fn array(element: IrType, size: usize) -> Self {
        IrType::Array(Box::new(element), size)
    }

    /// Size in bytes (assumes 64-bit pointers)
    pub fn size(&self) -> usize {
        match self {
            IrType::Void => 0,
            IrType::Bool | IrType::I8 => 1,
            IrType::I32 => 4,
            IrType::F64 | IrType::Ptr(_) => 8,
            IrType::Array(elem, size) => elem.size() * size,
        }
    }

    /// ABI alignment in bytes
    pub fn align(&self) -> usize {
        match self {
            IrType::Array(elem, _) => elem.align(),
            IrType::Void => 1,
            other => other.size(),
        }
    }

    pub fn is_ptr(&self) -> bool {
        matches!(self, IrType::Ptr(_))
    }

    /// Integer types, `i1` included
    pub fn is_int(&self) -> bool {
        matches!(self, IrType::Bool | IrType::I8 | IrType::I32)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, IrType::F64)
    }

    pub fn is_array(&self) -> bool {
        matches!(self, IrType::Array(..))
    }

    pub fn pointee(&self) -> Option<&IrType> {
        match self {
            IrType::Ptr(inner) => Some(inner),
            _ => None,
        }
    }

    /// Type equality as LLVM sees it: all pointers are the same `ptr`
    pub fn same_llvm(&self, other: &IrType) -> bool {
        match (self, other) {
            (IrType::Ptr(_), IrType::Ptr(_)) => true,
            (IrType::Array(a, n), IrType::Array(b, m)) => n == m && a.same_llvm(b),
            (a, b) => a == b,
        }
    }

    /// The zero/null default of this type
    pub fn zero(&self) -> Constant {
        match self {
            IrType::F64 => Constant::Float(0.0),
            IrType::Bool => Constant::Bool(false),
            IrType::Ptr(_) => Constant::Null,
            IrType::Array(..) => Constant::Zero,
            IrType::Void | IrType::I8 | IrType::I32 => Constant::Int(0),
        }
    }
}

/// LLVM type syntax
impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrType::Void => write!(f, "void"),
            IrType::Bool => write!(f, "i1"),
            IrType::I8 => write!(f, "i8"),
            IrType::I32 => write!(f, "i32"),
            IrType::F64 => write!(f, "double"),
            IrType::Ptr(_) => write!(f, "ptr"),
            IrType::Array(elem, size) => write!(f, "[{} x {}]", size, elem),
        }
    }
}

/// A constant value
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
    /// Address of a module global
    Global(String),
    Array(Vec<Constant>),
    /// Raw bytes of a C string, terminator included
    CString(Vec<u8>),
    /// `zeroinitializer`
    Zero,
}

/// An operand: either a register or a constant, always typed
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub ty: IrType,
    pub kind: ValueKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValueKind {
    Reg(VReg),
    Const(Constant),
}

impl Value {
    pub fn reg(vreg: VReg, ty: IrType) -> Self {
        Self {
            ty,
            kind: ValueKind::Reg(vreg),
        }
    }

    pub fn constant(constant: Constant, ty: IrType) -> Self {
        Self {
            ty,
            kind: ValueKind::Const(constant),
        }
    }

    /// Integer constant of the given integer type
    pub fn int(ty: IrType, value: i64) -> Self {
        Self::constant(Constant::Int(value), ty)
    }

    pub fn i32(value: i64) -> Self {
        Self::int(IrType::I32, value)
    }

    pub fn i8(value: i64) -> Self {
        Self::int(IrType::I8, value)
    }

    pub fn bool(value: bool) -> Self {
        Self::constant(Constant::Bool(value), IrType::Bool)
    }

    pub fn f64(value: f64) -> Self {
        Self::constant(Constant::Float(value), IrType::F64)
    }

    pub fn null() -> Self {
        Self::constant(Constant::Null, IrType::ptr(IrType::I8))
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.kind, ValueKind::Const(_))
    }

    pub fn as_constant(&self) -> Option<&Constant> {
        match &self.kind {
            ValueKind::Const(c) => Some(c),
            ValueKind::Reg(_) => None,
        }
    }

    pub fn as_reg(&self) -> Option<VReg> {
        match self.kind {
            ValueKind::Reg(r) => Some(r),
            ValueKind::Const(_) => None,
        }
    }
}

/// A module contains functions and global definitions
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub name: String,
    pub functions: Vec<Function>,
    pub globals: Vec<Global>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
            globals: Vec::new(),
        }
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn global(&self, name: &str) -> Option<&Global> {
        self.globals.iter().find(|g| g.name == name)
    }
}

/// A function in the IR. A function without blocks is a declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<IrType>,
    pub ret_type: IrType,
    pub blocks: Vec<BasicBlock>,
    pub is_external: bool,
    pub is_vararg: bool,
}

impl Function {
    pub fn new(name: impl Into<String>, params: Vec<IrType>, ret_type: IrType) -> Self {
        Self {
            name: name.into(),
            params,
            ret_type,
            blocks: Vec::new(),
            is_external: false,
            is_vararg: false,
        }
    }

    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn entry_block(&self) -> Option<&BasicBlock> {
        self.blocks.first()
    }

    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.iter().find(|b| b.id == id)
    }

    pub fn block_by_label(&self, label: &str) -> Option<&BasicBlock> {
        self.blocks.iter().find(|b| b.label == label)
    }

    /// All instructions in layout order
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.blocks.iter().flat_map(|b| b.instructions.iter())
    }
}

/// A basic block contains a sequence of instructions
#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    pub id: BlockId,
    pub label: String,
    pub instructions: Vec<Instruction>,
    pub terminator: Option<Terminator>,
}

impl BasicBlock {
    pub fn new(id: BlockId, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
            instructions: Vec::new(),
            terminator: None,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminator.is_some()
    }
}

/// A global variable or constant
#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub name: String,
    pub ty: IrType,
    pub init: Constant,
    pub is_const: bool,
}

impl Global {
    /// Contents of a C string global, without the terminator
    pub fn string_value(&self) -> Option<String> {
        match &self.init {
            Constant::CString(bytes) => {
                let body = bytes.strip_suffix(&[0u8]).unwrap_or(bytes);
                Some(String::from_utf8_lossy(body).into_owned())
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_syntax() {
        assert_eq!(IrType::Bool.to_string(), "i1");
        assert_eq!(IrType::F64.to_string(), "double");
        assert_eq!(IrType::ptr(IrType::I32).to_string(), "ptr");
        assert_eq!(IrType::array(IrType::I32, 3).to_string(), "[3 x i32]");
    }

    #[test]
    fn test_pointers_compare_opaquely() {
        let a = IrType::ptr(IrType::I8);
        let b = IrType::ptr(IrType::array(IrType::I32, 2));
        assert_ne!(a, b);
        assert!(a.same_llvm(&b));
        assert!(!IrType::I32.same_llvm(&IrType::I8));
    }

    #[test]
    fn test_zero_defaults() {
        assert_eq!(IrType::I32.zero(), Constant::Int(0));
        assert_eq!(IrType::F64.zero(), Constant::Float(0.0));
        assert_eq!(IrType::ptr(IrType::I8).zero(), Constant::Null);
        assert_eq!(IrType::array(IrType::I8, 4).zero(), Constant::Zero);
    }

    #[test]
    fn test_sizes_and_alignment() {
        assert_eq!(IrType::array(IrType::I32, 3).size(), 12);
        assert_eq!(IrType::array(IrType::F64, 3).align(), 8);
        assert_eq!(IrType::Bool.align(), 1);
    }

    #[test]
    fn test_string_global_value() {
        let global = Global {
            name: ".str".into(),
            ty: IrType::array(IrType::I8, 4),
            init: Constant::CString(b"%d\n\0".to_vec()),
            is_const: true,
        };
        assert_eq!(global.string_value().as_deref(), Some("%d\n"));
    }
}
