//! LLVM Backend for C-Accel IR
//!
//! Converts a C-Accel [`Module`] to LLVM IR using inkwell. The result is
//! checked by LLVM's module verifier before it is printed, and can be
//! optimized and written out as a native object file. Linking is left to the
//! caller.
//!
//! Value names are passed through as given; LLVM makes them unique per
//! function (`x`, `x1`, ...) and folds instructions whose operands are all
//! constants.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use inkwell::basic_block::BasicBlock as LLVMBlock;
use inkwell::builder::{Builder, BuilderError};
use inkwell::context::Context;
use inkwell::module::{Linkage, Module as LLVMModule};
use inkwell::passes::PassBuilderOptions;
use inkwell::targets::{
    CodeModel, FileType, InitializationConfig, RelocMode, Target, TargetMachine,
};
use inkwell::types::{BasicMetadataTypeEnum, BasicType, BasicTypeEnum, IntType};
use inkwell::values::{
    ArrayValue, BasicMetadataValueEnum, BasicValueEnum, FloatValue, FunctionValue, IntValue,
    PointerValue,
};
use inkwell::{AddressSpace, FloatPredicate, IntPredicate, OptimizationLevel};
use thiserror::Error;
use tracing::debug;

use super::{
    BasicBlock, BinOp, BlockId, CmpOp, Constant, Function, Global, InstrKind, Instruction, IrType,
    Module, Terminator, VReg, Value, ValueKind,
};

/// Failures reported by the LLVM backend
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("LLVM builder error: {0}")]
    Builder(#[from] BuilderError),

    #[error("cannot lower to LLVM: {0}")]
    Unsupported(String),

    #[error("LLVM verification failed: {0}")]
    Verify(String),

    #[error("target setup failed: {0}")]
    Target(String),

    #[error("optimization failed: {0}")]
    Optimize(String),

    #[error("could not write {}: {message}", path.display())]
    Write { path: PathBuf, message: String },
}

/// Optimization level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptLevel {
    None,
    Less,
    #[default]
    Default,
    Aggressive,
}

impl OptLevel {
    fn passes(self) -> &'static str {
        match self {
            OptLevel::None => "default<O0>",
            OptLevel::Less => "default<O1>",
            OptLevel::Default => "default<O2>",
            OptLevel::Aggressive => "default<O3>",
        }
    }

    fn codegen(self) -> OptimizationLevel {
        match self {
            OptLevel::None => OptimizationLevel::None,
            OptLevel::Less => OptimizationLevel::Less,
            OptLevel::Default => OptimizationLevel::Default,
            OptLevel::Aggressive => OptimizationLevel::Aggressive,
        }
    }
}

/// LLVM code generator
pub struct LLVMCodegen<'ctx> {
    context: &'ctx Context,
    module: LLVMModule<'ctx>,
    builder: Builder<'ctx>,
    /// LLVM value of every register defined so far in the current function
    values: HashMap<VReg, BasicValueEnum<'ctx>>,
    /// LLVM block for every block of the current function
    blocks: HashMap<BlockId, LLVMBlock<'ctx>>,
}

impl<'ctx> LLVMCodegen<'ctx> {
    pub fn new(context: &'ctx Context, module_name: &str) -> Self {
        Self {
            context,
            module: context.create_module(module_name),
            builder: context.create_builder(),
            values: HashMap::new(),
            blocks: HashMap::new(),
        }
    }

    /// Build the LLVM form of `module` in `context`
    pub fn lower(context: &'ctx Context, module: &Module) -> Result<Self, BackendError> {
        let mut codegen = Self::new(context, &module.name);
        codegen.compile_module(module)?;
        Ok(codegen)
    }

    /// Convert a C-Accel IR module to LLVM IR
    pub fn compile_module(&mut self, module: &Module) -> Result<(), BackendError> {
        for global in &module.globals {
            self.declare_global(global)?;
        }
        for func in &module.functions {
            self.declare_function(func)?;
        }
        for func in module.functions.iter().filter(|f| !f.is_declaration()) {
            self.compile_function(func)?;
        }
        debug!(
            functions = module.functions.len(),
            globals = module.globals.len(),
            "module lowered to LLVM"
        );
        Ok(())
    }

    /// Run LLVM's module verifier
    pub fn verify(&self) -> Result<(), BackendError> {
        self.module
            .verify()
            .map_err(|e| BackendError::Verify(e.to_string()))
    }

    /// The module as LLVM assembly
    pub fn to_ir_string(&self) -> String {
        self.module.print_to_string().to_string()
    }

    fn target_machine(level: OptLevel) -> Result<TargetMachine, BackendError> {
        Target::initialize_native(&InitializationConfig::default()).map_err(BackendError::Target)?;

        let triple = TargetMachine::get_default_triple();
        let target = Target::from_triple(&triple).map_err(|e| BackendError::Target(e.to_string()))?;
        target
            .create_target_machine(
                &triple,
                "generic",
                "",
                level.codegen(),
                RelocMode::PIC,
                CodeModel::Default,
            )
            .ok_or_else(|| BackendError::Target("could not create target machine".into()))
    }

    /// Run the standard pass pipeline for `level`
    pub fn optimize(&self, level: OptLevel) -> Result<(), BackendError> {
        let machine = Self::target_machine(level)?;
        self.module
            .run_passes(level.passes(), &machine, PassBuilderOptions::create())
            .map_err(|e| BackendError::Optimize(e.to_string()))
    }

    /// Write a native object file for the host target
    pub fn write_object_file(&self, path: &Path, level: OptLevel) -> Result<(), BackendError> {
        let machine = Self::target_machine(level)?;
        machine
            .write_to_file(&self.module, FileType::Object, path)
            .map_err(|e| BackendError::Write {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
    }

    // ============ Declarations ============

    fn declare_global(&mut self, global: &Global) -> Result<(), BackendError> {
        let ty = self.basic_type(&global.ty)?;
        let init = self.constant(&global.init, &global.ty)?;

        let value = self.module.add_global(ty, None, &global.name);
        value.set_initializer(&init);
        value.set_constant(global.is_const);
        value.set_linkage(Linkage::Private);
        value.set_unnamed_addr(true);
        value.set_alignment(alignment(&global.ty));
        Ok(())
    }

    fn declare_function(&mut self, func: &Function) -> Result<FunctionValue<'ctx>, BackendError> {
        let params = func
            .params
            .iter()
            .map(|ty| self.basic_type(ty).map(BasicMetadataTypeEnum::from))
            .collect::<Result<Vec<_>, _>>()?;

        let fn_type = match &func.ret_type {
            IrType::Void => self.context.void_type().fn_type(&params, func.is_vararg),
            ty => self.basic_type(ty)?.fn_type(&params, func.is_vararg),
        };
        Ok(self.module.add_function(&func.name, fn_type, None))
    }

    // ============ Function bodies ============

    fn compile_function(&mut self, func: &Function) -> Result<(), BackendError> {
        let function = self.module.get_function(&func.name).ok_or_else(|| {
            BackendError::Unsupported(format!("function '{}' was never declared", func.name))
        })?;

        self.values.clear();
        self.blocks.clear();
        for block in &func.blocks {
            let llvm_block = self.context.append_basic_block(function, &block.label);
            self.blocks.insert(block.id, llvm_block);
        }

        for block in &func.blocks {
            self.compile_block(block)?;
        }
        Ok(())
    }

    fn compile_block(&mut self, block: &BasicBlock) -> Result<(), BackendError> {
        let llvm_block = self.block(block.id)?;
        self.builder.position_at_end(llvm_block);

        for inst in &block.instructions {
            self.compile_instruction(inst)?;
        }

        match &block.terminator {
            Some(term) => self.compile_terminator(term),
            None => Err(BackendError::Unsupported(format!(
                "block '{}' has no terminator",
                block.label
            ))),
        }
    }

    fn compile_instruction(&mut self, inst: &Instruction) -> Result<(), BackendError> {
        let name = inst.name.as_deref().unwrap_or("");

        let result: Option<BasicValueEnum<'ctx>> = match &inst.kind {
            InstrKind::Alloca(ty) => {
                let ty = self.basic_type(ty)?;
                Some(self.builder.build_alloca(ty, name)?.into())
            }
            InstrKind::Load { ty, ptr } => {
                let ty = self.basic_type(ty)?;
                let ptr = self.pointer(ptr)?;
                Some(self.builder.build_load(ty, ptr, name)?)
            }
            InstrKind::Store { value, ptr } => {
                let value = self.value(value)?;
                let ptr = self.pointer(ptr)?;
                self.builder.build_store(ptr, value)?;
                None
            }
            InstrKind::GetElementPtr {
                base_ty,
                ptr,
                indices,
            } => {
                let base_ty = self.basic_type(base_ty)?;
                let ptr = self.pointer(ptr)?;
                let indices = indices
                    .iter()
                    .map(|index| self.int(index))
                    .collect::<Result<Vec<_>, _>>()?;
                // SAFETY: the address is only formed from an array slot and its
                // element type; LLVM does not dereference it here
                let address = unsafe { self.builder.build_in_bounds_gep(base_ty, ptr, &indices, name)? };
                Some(address.into())
            }
            InstrKind::Binary { op, lhs, rhs } => Some(self.binary(*op, lhs, rhs, name)?),
            InstrKind::FNeg(value) => {
                let value = self.float(value)?;
                Some(self.builder.build_float_neg(value, name)?.into())
            }
            InstrKind::ICmp { op, lhs, rhs } => Some(self.icmp(*op, lhs, rhs, name)?.into()),
            InstrKind::FCmp { op, lhs, rhs } => {
                let (lhs, rhs) = (self.float(lhs)?, self.float(rhs)?);
                let cmp = self
                    .builder
                    .build_float_compare(float_predicate(*op), lhs, rhs, name)?;
                Some(cmp.into())
            }
            InstrKind::Call { callee, args, .. } => self.call(callee, args, name)?,
        };

        if let (Some(reg), Some(value)) = (inst.result, result) {
            self.values.insert(reg, value);
        }
        Ok(())
    }

    fn binary(
        &self,
        op: BinOp,
        lhs: &Value,
        rhs: &Value,
        name: &str,
    ) -> Result<BasicValueEnum<'ctx>, BackendError> {
        if op.is_float() {
            let (lhs, rhs) = (self.float(lhs)?, self.float(rhs)?);
            let value = match op {
                BinOp::FAdd => self.builder.build_float_add(lhs, rhs, name)?,
                BinOp::FSub => self.builder.build_float_sub(lhs, rhs, name)?,
                BinOp::FMul => self.builder.build_float_mul(lhs, rhs, name)?,
                _ => self.builder.build_float_div(lhs, rhs, name)?,
            };
            return Ok(value.into());
        }

        let (lhs, rhs) = (self.int(lhs)?, self.int(rhs)?);
        let value = match op {
            BinOp::Add => self.builder.build_int_add(lhs, rhs, name)?,
            BinOp::Sub => self.builder.build_int_sub(lhs, rhs, name)?,
            BinOp::Mul => self.builder.build_int_mul(lhs, rhs, name)?,
            BinOp::SDiv => self.builder.build_int_signed_div(lhs, rhs, name)?,
            BinOp::SRem => self.builder.build_int_signed_rem(lhs, rhs, name)?,
            BinOp::And => self.builder.build_and(lhs, rhs, name)?,
            BinOp::Or => self.builder.build_or(lhs, rhs, name)?,
            BinOp::Xor | BinOp::FAdd | BinOp::FSub | BinOp::FMul | BinOp::FDiv => {
                self.builder.build_xor(lhs, rhs, name)?
            }
        };
        Ok(value.into())
    }

    /// Integer comparison; pointers compare by address
    fn icmp(&self, op: CmpOp, lhs: &Value, rhs: &Value, name: &str) -> Result<IntValue<'ctx>, BackendError> {
        let predicate = int_predicate(op);
        match (self.value(lhs)?, self.value(rhs)?) {
            (BasicValueEnum::IntValue(l), BasicValueEnum::IntValue(r)) => {
                Ok(self.builder.build_int_compare(predicate, l, r, name)?)
            }
            (BasicValueEnum::PointerValue(l), BasicValueEnum::PointerValue(r)) => {
                Ok(self.builder.build_int_compare(predicate, l, r, name)?)
            }
            _ => Err(BackendError::Unsupported(format!(
                "icmp on {} and {}",
                lhs.ty, rhs.ty
            ))),
        }
    }

    fn call(
        &self,
        callee: &str,
        args: &[Value],
        name: &str,
    ) -> Result<Option<BasicValueEnum<'ctx>>, BackendError> {
        let function = self
            .module
            .get_function(callee)
            .ok_or_else(|| BackendError::Unsupported(format!("call to undeclared function '{}'", callee)))?;
        let args = args
            .iter()
            .map(|arg| self.value(arg).map(BasicMetadataValueEnum::from))
            .collect::<Result<Vec<_>, _>>()?;

        // void results cannot carry a name
        let name = if function.get_type().get_return_type().is_some() {
            name
        } else {
            ""
        };
        let site = self.builder.build_call(function, &args, name)?;
        Ok(site.try_as_basic_value().left())
    }

    fn compile_terminator(&mut self, term: &Terminator) -> Result<(), BackendError> {
        match term {
            Terminator::Ret(None) => {
                self.builder.build_return(None)?;
            }
            Terminator::Ret(Some(value)) => {
                let value = self.value(value)?;
                self.builder.build_return(Some(&value))?;
            }
            Terminator::Br(target) => {
                let target = self.block(*target)?;
                self.builder.build_unconditional_branch(target)?;
            }
            Terminator::CondBr {
                cond,
                then_block,
                else_block,
            } => {
                let cond = self.int(cond)?;
                let (then_block, else_block) = (self.block(*then_block)?, self.block(*else_block)?);
                self.builder.build_conditional_branch(cond, then_block, else_block)?;
            }
        }
        Ok(())
    }

    // ============ Values and types ============

    fn block(&self, id: BlockId) -> Result<LLVMBlock<'ctx>, BackendError> {
        self.blocks
            .get(&id)
            .copied()
            .ok_or_else(|| BackendError::Unsupported(format!("branch to unknown block {}", id)))
    }

    fn value(&self, value: &Value) -> Result<BasicValueEnum<'ctx>, BackendError> {
        match &value.kind {
            ValueKind::Reg(reg) => self
                .values
                .get(reg)
                .copied()
                .ok_or_else(|| BackendError::Unsupported(format!("use of undefined value {}", reg))),
            ValueKind::Const(constant) => self.constant(constant, &value.ty),
        }
    }

    fn int(&self, value: &Value) -> Result<IntValue<'ctx>, BackendError> {
        match self.value(value)? {
            BasicValueEnum::IntValue(v) => Ok(v),
            _ => Err(mismatch("an integer", &value.ty)),
        }
    }

    fn float(&self, value: &Value) -> Result<FloatValue<'ctx>, BackendError> {
        match self.value(value)? {
            BasicValueEnum::FloatValue(v) => Ok(v),
            _ => Err(mismatch("a double", &value.ty)),
        }
    }

    fn pointer(&self, value: &Value) -> Result<PointerValue<'ctx>, BackendError> {
        match self.value(value)? {
            BasicValueEnum::PointerValue(v) => Ok(v),
            _ => Err(mismatch("a pointer", &value.ty)),
        }
    }

    fn constant(&self, constant: &Constant, ty: &IrType) -> Result<BasicValueEnum<'ctx>, BackendError> {
        let value: BasicValueEnum<'ctx> = match (constant, ty) {
            (Constant::Zero, ty) => self.basic_type(ty)?.const_zero(),
            (Constant::Int(v), IrType::Bool | IrType::I8 | IrType::I32) => {
                // two's complement bits; const_int sign-extends them
                self.int_type(ty)?.const_int(*v as u64, true).into()
            }
            (Constant::Bool(b), IrType::Bool) => self.context.bool_type().const_int(u64::from(*b), false).into(),
            (Constant::Float(f), IrType::F64) => self.context.f64_type().const_float(*f).into(),
            (Constant::Null, IrType::Ptr(_)) => self.context.ptr_type(AddressSpace::default()).const_null().into(),
            (Constant::Global(name), IrType::Ptr(_)) => self
                .module
                .get_global(name)
                .map(|global| global.as_pointer_value().into())
                .ok_or_else(|| BackendError::Unsupported(format!("unknown global @{}", name)))?,
            (Constant::CString(bytes), IrType::Array(..)) => self.context.const_string(bytes, false).into(),
            (Constant::Array(items), IrType::Array(element, _)) => self.const_array(items, element)?.into(),
            (constant, ty) => {
                return Err(BackendError::Unsupported(format!(
                    "constant {:?} of type {}",
                    constant, ty
                )))
            }
        };
        Ok(value)
    }

    fn const_array(&self, items: &[Constant], element: &IrType) -> Result<ArrayValue<'ctx>, BackendError> {
        let values = items
            .iter()
            .map(|item| self.constant(item, element))
            .collect::<Result<Vec<_>, _>>()?;

        let array = match self.basic_type(element)? {
            BasicTypeEnum::IntType(ty) => ty.const_array(&collect_values(&values, element, |v| match v {
                BasicValueEnum::IntValue(v) => Some(v),
                _ => None,
            })?),
            BasicTypeEnum::FloatType(ty) => ty.const_array(&collect_values(&values, element, |v| match v {
                BasicValueEnum::FloatValue(v) => Some(v),
                _ => None,
            })?),
            BasicTypeEnum::PointerType(ty) => ty.const_array(&collect_values(&values, element, |v| match v {
                BasicValueEnum::PointerValue(v) => Some(v),
                _ => None,
            })?),
            BasicTypeEnum::ArrayType(ty) => ty.const_array(&collect_values(&values, element, |v| match v {
                BasicValueEnum::ArrayValue(v) => Some(v),
                _ => None,
            })?),
            _ => {
                return Err(BackendError::Unsupported(format!(
                    "arrays of {} are not supported",
                    element
                )))
            }
        };
        Ok(array)
    }

    fn int_type(&self, ty: &IrType) -> Result<IntType<'ctx>, BackendError> {
        match ty {
            IrType::Bool => Ok(self.context.bool_type()),
            IrType::I8 => Ok(self.context.i8_type()),
            IrType::I32 => Ok(self.context.i32_type()),
            other => Err(mismatch("an integer type", other)),
        }
    }

    fn basic_type(&self, ty: &IrType) -> Result<BasicTypeEnum<'ctx>, BackendError> {
        let basic: BasicTypeEnum<'ctx> = match ty {
            IrType::Void => return Err(BackendError::Unsupported("void is not a value type".into())),
            IrType::Bool => self.context.bool_type().into(),
            IrType::I8 => self.context.i8_type().into(),
            IrType::I32 => self.context.i32_type().into(),
            IrType::F64 => self.context.f64_type().into(),
            IrType::Ptr(_) => self.context.ptr_type(AddressSpace::default()).into(),
            IrType::Array(element, len) => {
                let len = u32::try_from(*len)
                    .map_err(|_| BackendError::Unsupported(format!("array of {} elements", len)))?;
                self.basic_type(element)?.array_type(len).into()
            }
        };
        Ok(basic)
    }
}

fn mismatch(expected: &str, found: &IrType) -> BackendError {
    BackendError::Unsupported(format!("expected {}, found {}", expected, found))
}

/// Unwrap every array element as one LLVM value kind
fn collect_values<'ctx, T>(
    values: &[BasicValueEnum<'ctx>],
    element: &IrType,
    unwrap: impl Fn(BasicValueEnum<'ctx>) -> Option<T>,
) -> Result<Vec<T>, BackendError> {
    values
        .iter()
        .map(|v| unwrap(*v).ok_or_else(|| mismatch("an array element", element)))
        .collect()
}

fn alignment(ty: &IrType) -> u32 {
    u32::try_from(ty.align()).unwrap_or(1)
}

fn int_predicate(op: CmpOp) -> IntPredicate {
    match op {
        CmpOp::Eq => IntPredicate::EQ,
        CmpOp::Ne => IntPredicate::NE,
        CmpOp::Slt => IntPredicate::SLT,
        CmpOp::Sle => IntPredicate::SLE,
        CmpOp::Sgt => IntPredicate::SGT,
        CmpOp::Sge => IntPredicate::SGE,
    }
}

/// Unordered predicates, matching `CmpOp::float_name`
fn float_predicate(op: CmpOp) -> FloatPredicate {
    match op {
        CmpOp::Eq => FloatPredicate::UEQ,
        CmpOp::Ne => FloatPredicate::UNE,
        CmpOp::Slt => FloatPredicate::ULT,
        CmpOp::Sle => FloatPredicate::ULE,
        CmpOp::Sgt => FloatPredicate::UGT,
        CmpOp::Sge => FloatPredicate::UGE,
    }
}

/// Lower `module` through LLVM, verify it, and return LLVM's assembly text
pub fn emit_llvm_ir(module: &Module) -> Result<String, BackendError> {
    let context = Context::create();
    let codegen = LLVMCodegen::lower(&context, module)?;
    codegen.verify()?;
    Ok(codegen.to_ir_string())
}

/// Lower, verify, optimize and write `module` as a native object file
pub fn emit_object(module: &Module, path: &Path, level: OptLevel) -> Result<(), BackendError> {
    let context = Context::create();
    let codegen = LLVMCodegen::lower(&context, module)?;
    codegen.verify()?;
    codegen.optimize(level)?;
    codegen.write_object_file(path, level)?;
    debug!(path = %path.display(), "object file written");
    Ok(())
}
