//! IR Builder
//!
//! Helper for constructing IR instructions and basic blocks.
//!
//! Blocks are created detached and only become part of the function layout
//! when appended, so a construct can create its merge block up front while
//! nested blocks still land before it. Instructions emitted after the current
//! block was terminated start a fresh unreachable block, which keeps every
//! function structurally valid.

use super::instr::{BinOp, CmpOp, InstrKind, Instruction, Terminator};
use super::types::{BasicBlock, BlockId, Constant, Function, Global, IrType, Module, VReg, Value};
use std::collections::HashMap;
use tracing::warn;

/// Per-function construction state
struct FunctionState {
    /// Index of the function in the module
    index: usize,
    /// Every block created for this function, attached or not
    blocks: HashMap<BlockId, BasicBlock>,
    /// Attached blocks in layout order
    layout: Vec<BlockId>,
    entry: BlockId,
    current: BlockId,
    /// Number of allocas already placed at the top of the entry block
    entry_allocas: usize,
}

/// Builder for constructing IR
pub struct IrBuilder {
    /// Next virtual register ID
    next_vreg: u32,
    /// Next block ID
    next_block: u32,
    /// Next string constant ID
    next_string: u32,
    /// Current module being built
    module: Module,
    /// Current function being built
    current_fn: Option<FunctionState>,
}

impl IrBuilder {
    /// Create a new IR builder
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            next_vreg: 0,
            next_block: 0,
            next_string: 0,
            module: Module::new(module_name),
            current_fn: None,
        }
    }

    /// Finish building and return the module
    pub fn finish(mut self) -> Module {
        self.finish_function();
        self.module
    }

    /// Create a fresh virtual register
    pub fn fresh_vreg(&mut self) -> VReg {
        let vreg = VReg(self.next_vreg);
        self.next_vreg += 1;
        vreg
    }

    /// Create a fresh block ID
    pub fn fresh_block(&mut self) -> BlockId {
        let id = BlockId(self.next_block);
        self.next_block += 1;
        id
    }

    // ============ Declarations ============

    /// Declare a function. Returns false if the name is already taken.
    pub fn declare_function(&mut self, name: impl Into<String>, params: Vec<IrType>, ret_type: IrType) -> bool {
        let name = name.into();
        if self.has_function(&name) {
            return false;
        }
        self.module.functions.push(Function::new(name, params, ret_type));
        true
    }

    /// Declare a function under `name`, or under `name.N` when that symbol is
    /// already taken. Returns the symbol actually used.
    pub fn declare_function_unique(&mut self, name: &str, params: Vec<IrType>, ret_type: IrType) -> String {
        let mut symbol = name.to_string();
        let mut suffix = 0;
        while self.has_function(&symbol) {
            suffix += 1;
            symbol = format!("{}.{}", name, suffix);
        }
        self.module.functions.push(Function::new(symbol.clone(), params, ret_type));
        symbol
    }

    /// Declare an external function
    pub fn declare_external(&mut self, name: impl Into<String>, params: Vec<IrType>, ret_type: IrType) {
        let mut func = Function::new(name, params, ret_type);
        func.is_external = true;
        self.module.functions.push(func);
    }

    /// Declare an external variadic function
    pub fn declare_external_vararg(&mut self, name: impl Into<String>, params: Vec<IrType>, ret_type: IrType) {
        let mut func = Function::new(name, params, ret_type);
        func.is_external = true;
        func.is_vararg = true;
        self.module.functions.push(func);
    }

    /// Declare the C runtime output functions
    pub fn declare_stdio(&mut self) {
        if self.has_function("printf") {
            return;
        }
        // int printf(const char *format, ...)
        self.declare_external_vararg("printf", vec![IrType::ptr(IrType::I8)], IrType::I32);
        // int puts(const char *s)
        self.declare_external("puts", vec![IrType::ptr(IrType::I8)], IrType::I32);
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.module.function(name).is_some()
    }

    /// Add a private C string constant and return its address
    pub fn build_global_string(&mut self, text: &str) -> Value {
        let name = if self.next_string == 0 {
            ".str".to_string()
        } else {
            format!(".str.{}", self.next_string)
        };
        self.next_string += 1;

        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        let ty = IrType::array(IrType::I8, bytes.len());
        self.module.globals.push(Global {
            name: name.clone(),
            ty,
            init: Constant::CString(bytes),
            is_const: true,
        });
        Value::constant(Constant::Global(name), IrType::ptr(IrType::I8))
    }

    // ============ Function Building ============

    /// Start the body of a declared function, positioned at its entry block
    pub fn start_function(&mut self, name: &str) -> bool {
        self.finish_function();

        let Some(index) = self
            .module
            .functions
            .iter()
            .position(|f| f.name == name && !f.is_external)
        else {
            return false;
        };

        let entry = self.fresh_block();
        let mut blocks = HashMap::new();
        blocks.insert(entry, BasicBlock::new(entry, "entry"));
        self.current_fn = Some(FunctionState {
            index,
            blocks,
            layout: vec![entry],
            entry,
            current: entry,
            entry_allocas: 0,
        });
        true
    }

    /// Finish the current function, moving its attached blocks into the module
    pub fn finish_function(&mut self) {
        let Some(mut state) = self.current_fn.take() else {
            return;
        };
        let blocks: Vec<BasicBlock> = state
            .layout
            .iter()
            .filter_map(|id| state.blocks.remove(id))
            .collect();
        if let Some(func) = self.module.functions.get_mut(state.index) {
            func.blocks = blocks;
        }
    }

    /// Create a detached block
    pub fn create_block(&mut self, label: &str) -> BlockId {
        let id = self.fresh_block();
        match self.current_fn.as_mut() {
            Some(state) => {
                state.blocks.insert(id, BasicBlock::new(id, label));
            }
            None => warn!(label, "block created outside of a function"),
        }
        id
    }

    /// Attach a block at the end of the function layout
    pub fn append_block(&mut self, id: BlockId) {
        if let Some(state) = self.current_fn.as_mut() {
            if !state.layout.contains(&id) {
                state.layout.push(id);
            }
        }
    }

    pub fn position_at_end(&mut self, id: BlockId) {
        if let Some(state) = self.current_fn.as_mut() {
            state.current = id;
        }
    }

    pub fn current_block(&self) -> Option<BlockId> {
        self.current_fn.as_ref().map(|s| s.current)
    }

    /// Whether the insertion block already ends in a terminator
    pub fn is_terminated(&self) -> bool {
        self.current_fn
            .as_ref()
            .and_then(|s| s.blocks.get(&s.current))
            .map_or(false, BasicBlock::is_terminated)
    }

    /// The insertion block, opening an unreachable continuation if the
    /// current one is already terminated
    fn open_block(&mut self) -> Option<&mut BasicBlock> {
        if self.is_terminated() {
            let dead = self.create_block("dead");
            self.append_block(dead);
            self.position_at_end(dead);
        }
        let state = self.current_fn.as_mut()?;
        state.blocks.get_mut(&state.current)
    }

    fn push(&mut self, kind: InstrKind, name: &str, result_ty: Option<IrType>) -> Option<Value> {
        let result = result_ty.map(|ty| (self.fresh_vreg(), ty));
        let name = (!name.is_empty()).then(|| name.to_string());
        let inst = Instruction::new(result.as_ref().map(|(r, _)| *r), name, kind);
        match self.open_block() {
            Some(block) => block.instructions.push(inst),
            None => warn!("instruction emitted outside of a function"),
        }
        result.map(|(r, ty)| Value::reg(r, ty))
    }

    fn push_value(&mut self, kind: InstrKind, name: &str, ty: IrType) -> Value {
        let fallback = Value::constant(ty.zero(), ty.clone());
        self.push(kind, name, Some(ty)).unwrap_or(fallback)
    }

    fn terminate(&mut self, terminator: Terminator) {
        match self.open_block() {
            Some(block) => block.terminator = Some(terminator),
            None => warn!("terminator emitted outside of a function"),
        }
    }

    // ============ Memory ============

    /// Stack slot placed at the top of the entry block
    pub fn build_entry_alloca(&mut self, ty: IrType, name: &str) -> Value {
        let vreg = self.fresh_vreg();
        let slot = Value::reg(vreg, IrType::ptr(ty.clone()));
        let name = (!name.is_empty()).then(|| name.to_string());
        let inst = Instruction::new(Some(vreg), name.clone(), InstrKind::Alloca(ty));
        match self.current_fn.as_mut() {
            Some(state) => {
                if let Some(entry) = state.blocks.get_mut(&state.entry) {
                    entry.instructions.insert(state.entry_allocas, inst);
                    state.entry_allocas += 1;
                }
            }
            None => warn!(?name, "alloca outside of a function"),
        }
        slot
    }

    /// Stack slot at the current position
    pub fn build_alloca(&mut self, ty: IrType, name: &str) -> Value {
        let slot_ty = IrType::ptr(ty.clone());
        self.push_value(InstrKind::Alloca(ty), name, slot_ty)
    }

    pub fn build_load(&mut self, ty: IrType, ptr: Value, name: &str) -> Value {
        self.push_value(InstrKind::Load { ty: ty.clone(), ptr }, name, ty)
    }

    pub fn build_store(&mut self, value: Value, ptr: Value) {
        self.push(InstrKind::Store { value, ptr }, "", None);
    }

    /// Address of an element of `base_ty` reached through `indices`
    pub fn build_gep(&mut self, base_ty: IrType, ptr: Value, indices: Vec<Value>, name: &str) -> Value {
        let mut element = base_ty.clone();
        for _ in indices.iter().skip(1) {
            if let IrType::Array(inner, _) = element {
                element = *inner;
            }
        }
        let kind = InstrKind::GetElementPtr {
            base_ty,
            ptr,
            indices,
        };
        self.push_value(kind, name, IrType::ptr(element))
    }

    // ============ Arithmetic ============

    /// The result takes the type of the left operand
    pub fn build_binary(&mut self, op: BinOp, lhs: Value, rhs: Value, name: &str) -> Value {
        let ty = lhs.ty.clone();
        self.push_value(InstrKind::Binary { op, lhs, rhs }, name, ty)
    }

    pub fn build_fneg(&mut self, value: Value, name: &str) -> Value {
        let ty = value.ty.clone();
        self.push_value(InstrKind::FNeg(value), name, ty)
    }

    pub fn build_icmp(&mut self, op: CmpOp, lhs: Value, rhs: Value, name: &str) -> Value {
        self.push_value(InstrKind::ICmp { op, lhs, rhs }, name, IrType::Bool)
    }

    pub fn build_fcmp(&mut self, op: CmpOp, lhs: Value, rhs: Value, name: &str) -> Value {
        self.push_value(InstrKind::FCmp { op, lhs, rhs }, name, IrType::Bool)
    }

    // ============ Calls ============

    /// Call a function; void calls produce no value
    pub fn build_call(&mut self, callee: &str, ret_ty: IrType, args: Vec<Value>, name: &str) -> Option<Value> {
        let kind = InstrKind::Call {
            callee: callee.to_string(),
            ret_ty: ret_ty.clone(),
            args,
        };
        if ret_ty == IrType::Void {
            self.push(kind, "", None);
            None
        } else {
            self.push(kind, name, Some(ret_ty))
        }
    }

    // ============ Terminators ============

    pub fn build_ret(&mut self, value: Option<Value>) {
        self.terminate(Terminator::Ret(value));
    }

    pub fn build_br(&mut self, target: BlockId) {
        self.terminate(Terminator::Br(target));
    }

    pub fn build_cond_br(&mut self, cond: Value, then_block: BlockId, else_block: BlockId) {
        self.terminate(Terminator::CondBr {
            cond,
            then_block,
            else_block,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder_with_main() -> IrBuilder {
        let mut builder = IrBuilder::new("test");
        builder.declare_stdio();
        assert!(builder.declare_function("main", vec![], IrType::I32));
        assert!(builder.start_function("main"));
        builder
    }

    #[test]
    fn test_stdio_declared_once() {
        let mut builder = IrBuilder::new("test");
        builder.declare_stdio();
        builder.declare_stdio();
        let module = builder.finish();
        let names: Vec<_> = module.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["printf", "puts"]);
        assert!(module.functions[0].is_vararg);
        assert!(module.functions[1].is_external);
    }

    #[test]
    fn test_duplicate_declaration_rejected() {
        let mut builder = IrBuilder::new("test");
        assert!(builder.declare_function("f", vec![], IrType::Void));
        assert!(!builder.declare_function("f", vec![], IrType::I32));
        let module = builder.finish();
        assert_eq!(module.function("f").map(|f| f.ret_type.clone()), Some(IrType::Void));
        assert_eq!(module.functions.len(), 1);
    }

    #[test]
    fn test_unique_declaration_avoids_runtime_names() {
        let mut builder = IrBuilder::new("test");
        builder.declare_stdio();
        assert_eq!(builder.declare_function_unique("printf", vec![], IrType::Void), "printf.1");
        assert_eq!(builder.declare_function_unique("printf", vec![], IrType::Void), "printf.2");
        assert_eq!(builder.declare_function_unique("helper", vec![], IrType::Void), "helper");
        assert!(!builder.start_function("puts"));
        assert!(builder.start_function("printf.1"));
        builder.build_ret(None);

        let module = builder.finish();
        let printf = module.function("printf").expect("printf");
        assert!(printf.is_external && printf.is_declaration());
        assert!(!module.function("printf.1").expect("user printf").is_declaration());
    }

    #[test]
    fn test_string_globals_are_numbered() {
        let mut builder = IrBuilder::new("test");
        let first = builder.build_global_string("a");
        let second = builder.build_global_string("a");
        assert_eq!(first.as_constant(), Some(&Constant::Global(".str".into())));
        assert_eq!(second.as_constant(), Some(&Constant::Global(".str.1".into())));
        let module = builder.finish();
        assert_eq!(module.globals.len(), 2);
        assert_eq!(module.globals[0].ty, IrType::array(IrType::I8, 2));
    }

    #[test]
    fn test_entry_allocas_stay_at_top() {
        let mut builder = builder_with_main();
        let a = builder.build_entry_alloca(IrType::I32, "a");
        builder.build_store(Value::i32(1), a);
        let b = builder.build_entry_alloca(IrType::F64, "b");
        builder.build_store(Value::f64(2.0), b);
        builder.build_ret(Some(Value::i32(0)));
        let module = builder.finish();

        let entry = module.function("main").and_then(|f| f.entry_block()).expect("entry");
        let kinds: Vec<bool> = entry
            .instructions
            .iter()
            .map(|i| matches!(i.kind, InstrKind::Alloca(_)))
            .collect();
        assert_eq!(kinds, vec![true, true, false, false]);
    }

    #[test]
    fn test_blocks_follow_append_order() {
        let mut builder = builder_with_main();
        let then_bb = builder.create_block("then");
        let merge_bb = builder.create_block("ifcont");
        let nested = builder.create_block("inner");
        builder.build_cond_br(Value::bool(true), then_bb, merge_bb);
        builder.append_block(then_bb);
        builder.position_at_end(then_bb);
        builder.build_br(nested);
        builder.append_block(nested);
        builder.position_at_end(nested);
        builder.build_br(merge_bb);
        builder.append_block(merge_bb);
        builder.position_at_end(merge_bb);
        builder.build_ret(Some(Value::i32(0)));
        let module = builder.finish();

        let labels: Vec<_> = module.functions[2].blocks.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["entry", "then", "inner", "ifcont"]);
    }

    #[test]
    fn test_detached_blocks_are_dropped() {
        let mut builder = builder_with_main();
        builder.create_block("never");
        builder.build_ret(Some(Value::i32(0)));
        let module = builder.finish();
        assert_eq!(module.functions[2].blocks.len(), 1);
    }

    #[test]
    fn test_code_after_terminator_opens_new_block() {
        let mut builder = builder_with_main();
        builder.build_ret(Some(Value::i32(1)));
        assert!(builder.is_terminated());
        builder.build_call("puts", IrType::I32, vec![Value::null()], "");
        assert!(!builder.is_terminated());
        builder.build_ret(Some(Value::i32(0)));
        let module = builder.finish();

        let blocks = &module.functions[2].blocks;
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].label, "dead");
        assert_eq!(blocks[1].instructions.len(), 1);
    }

    #[test]
    fn test_void_call_has_no_value() {
        let mut builder = builder_with_main();
        builder.declare_function("helper", vec![], IrType::Void);
        assert!(builder.build_call("helper", IrType::Void, vec![], "calltmp").is_none());
        let value = builder.build_call("puts", IrType::I32, vec![Value::null()], "");
        assert_eq!(value.map(|v| v.ty), Some(IrType::I32));
    }

    #[test]
    fn test_gep_result_points_at_element() {
        let mut builder = builder_with_main();
        let array_ty = IrType::array(IrType::F64, 3);
        let slot = builder.build_entry_alloca(array_ty.clone(), "a");
        let addr = builder.build_gep(array_ty, slot, vec![Value::i32(0), Value::i32(2)], "idx");
        assert_eq!(addr.ty, IrType::ptr(IrType::F64));
    }
}
