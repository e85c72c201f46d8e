//! AST to IR Lowering
//!
//! Converts a parsed C-Accel program into IR in two passes: every top-level
//! function is declared first so calls may precede definitions, then bodies
//! are lowered in declaration order. A program without an entry point gets a
//! synthesized `main` that returns 0.
//!
//! Lowering is best effort. An expression that cannot be lowered yields no
//! value, a warning is recorded, and the enclosing statement is skipped; the
//! module stays structurally complete either way.
//!
//! Types follow the values produced, never declarations: the first assignment
//! to a name fixes the type of its slot, arithmetic picks the float family
//! from the left operand only, and comparisons are always signed integer
//! comparisons.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::ast::{Node, NodeKind};

use super::builder::IrBuilder;
use super::instr::{BinOp, CmpOp};
use super::types::{BlockId, Constant, IrType, Module, Value, ValueKind};

/// A named stack slot
#[derive(Debug, Clone)]
struct Slot {
    /// Address returned by the alloca
    ptr: Value,
    /// Type stored in the slot
    ty: IrType,
}

/// A user function as calls see it
#[derive(Debug, Clone)]
struct Callee {
    /// Symbol in the module; differs from the source name on a clash with
    /// a runtime declaration
    symbol: String,
    ret_type: IrType,
}

/// Lowers AST to IR
pub struct Lowerer {
    builder: IrBuilder,
    /// User functions and `main` by source name; the runtime externals are
    /// not callable from source
    functions: HashMap<String, Callee>,
    /// Function-scoped variables; blocks do not open scopes
    locals: HashMap<String, Slot>,
    /// Functions whose body has been lowered
    defined: HashSet<String>,
    /// Non-fatal problems, formatted `Line n: message`
    warnings: Vec<String>,
}

impl Lowerer {
    pub fn new(module_name: impl Into<String>) -> Self {
        let mut builder = IrBuilder::new(module_name);
        builder.declare_stdio();
        Self {
            builder,
            functions: HashMap::new(),
            locals: HashMap::new(),
            defined: HashSet::new(),
            warnings: Vec::new(),
        }
    }

    /// Lower a whole program, returning the module and the warnings raised
    pub fn lower_program(mut self, program: &Node) -> (Module, Vec<String>) {
        // First pass: declare every function
        for item in &program.children {
            if item.is(NodeKind::FunctionDecl) {
                self.declare_function(item);
            }
        }

        // Second pass: lower function bodies
        for item in &program.children {
            match item.kind {
                NodeKind::FunctionDecl => self.lower_function(item),
                NodeKind::Exec => debug!(line = item.line, "exec directive ignored"),
                NodeKind::Import => debug!(module = %item.value, "import recorded"),
                NodeKind::ClassDecl => debug!(class = %item.value, "class declaration not lowered"),
                _ => {}
            }
        }

        if !self.functions.contains_key("main") {
            debug!("no entry point, synthesizing main");
            let symbol = self.builder.declare_function_unique("main", vec![], IrType::I32);
            self.builder.start_function(&symbol);
            self.builder.build_ret(Some(Value::i32(0)));
            self.builder.finish_function();
        }

        (self.builder.finish(), self.warnings)
    }

    fn warn(&mut self, line: u32, message: impl Into<String>) {
        let message = format!("Line {}: {}", line, message.into());
        warn!("{}", message);
        self.warnings.push(message);
    }

    /// Name the function is emitted under
    fn function_name(node: &Node) -> &str {
        if node.is_entry_point() {
            "main"
        } else {
            &node.value
        }
    }

    fn declare_function(&mut self, node: &Node) {
        let name = Self::function_name(node).to_string();
        if name.is_empty() {
            self.warn(node.line, "function has no name and is skipped");
            return;
        }

        let ret_type = if node.is_entry_point() {
            IrType::I32
        } else {
            IrType::Void
        };
        if self.functions.contains_key(&name) {
            self.warn(
                node.line,
                format!("function {} already declared; keeping the first definition", name),
            );
            return;
        }

        let symbol = self.builder.declare_function_unique(&name, vec![], ret_type.clone());
        if symbol != name {
            debug!(function = %name, %symbol, "renamed to avoid a runtime declaration");
        }
        self.functions.insert(name, Callee { symbol, ret_type });
    }

    fn lower_function(&mut self, node: &Node) {
        let name = Self::function_name(node).to_string();
        // later definitions of a name were rejected while declaring
        if name.is_empty() || !self.defined.insert(name.clone()) {
            return;
        }
        let Some(callee) = self.functions.get(&name).cloned() else {
            return;
        };
        if !self.builder.start_function(&callee.symbol) {
            self.warn(node.line, format!("function {} not declared", name));
            return;
        }
        debug!(function = %name, "lowering function");

        self.locals.clear();
        if let Some(body) = node.child(0).filter(|b| b.is(NodeKind::Block)) {
            self.lower_block(body);
        }

        if !self.builder.is_terminated() {
            match callee.ret_type {
                IrType::Void => self.builder.build_ret(None),
                ty => {
                    let zero = Value::constant(ty.zero(), ty);
                    self.builder.build_ret(Some(zero));
                }
            }
        }
        self.builder.finish_function();
    }

    // ============ Statements ============

    fn lower_block(&mut self, block: &Node) {
        for stmt in &block.children {
            self.lower_stmt(stmt);
        }
    }

    fn lower_stmt(&mut self, stmt: &Node) {
        match stmt.kind {
            NodeKind::Assignment => self.lower_assignment(stmt),
            NodeKind::If => self.lower_if(stmt),
            NodeKind::While => self.lower_while(stmt),
            NodeKind::For => self.lower_for(stmt),
            NodeKind::Return => self.lower_return(stmt),
            NodeKind::Print => self.lower_print(stmt),
            NodeKind::VectorDecl => self.lower_vector_decl(stmt),
            NodeKind::Block => self.lower_block(stmt),
            NodeKind::FunctionCall | NodeKind::UnaryOp => {
                self.lower_expr(stmt);
            }
            NodeKind::RangeFor => debug!(line = stmt.line, "range loop not lowered"),
            NodeKind::Program
            | NodeKind::Import
            | NodeKind::Exec
            | NodeKind::FunctionDecl
            | NodeKind::ClassDecl
            | NodeKind::ObjectSection
            | NodeKind::MemberSection
            | NodeKind::VarDecl
            | NodeKind::BinaryOp
            | NodeKind::MemberAccess
            | NodeKind::ArrayAccess
            | NodeKind::ArrayLiteral
            | NodeKind::Literal
            | NodeKind::Identifier => debug!(kind = %stmt.kind, line = stmt.line, "statement has no effect"),
        }
    }

    fn lower_assignment(&mut self, node: &Node) {
        if node.has_attribute("indexed") {
            self.lower_indexed_assignment(node);
            return;
        }
        let Some(value_node) = node.child(0) else {
            self.warn(node.line, format!("assignment to '{}' has no value", node.value));
            return;
        };

        let value = match node.attribute("operator") {
            Some(op) => {
                let Some(slot) = self.lookup(&node.value, node.line) else {
                    return;
                };
                let current = self.builder.build_load(slot.ty, slot.ptr, &node.value);
                let Some(rhs) = self.lower_expr(value_node) else {
                    return;
                };
                self.binary_op(op.trim_end_matches('='), current, rhs, node.line)
            }
            None => self.lower_expr(value_node),
        };
        let Some(mut value) = value else {
            return;
        };

        // An array literal yields the address of its storage; the variable
        // gets its own copy of the aggregate
        if value_node.is(NodeKind::ArrayLiteral) {
            if let Some(array_ty) = value.ty.pointee().filter(|t| t.is_array()).cloned() {
                value = self.builder.build_load(array_ty, value, "arraycopy");
            }
        }

        let slot = match self.locals.get(&node.value) {
            Some(slot) => slot.clone(),
            None => {
                let ptr = self.builder.build_entry_alloca(value.ty.clone(), &node.value);
                let slot = Slot {
                    ptr,
                    ty: value.ty.clone(),
                };
                self.locals.insert(node.value.clone(), slot.clone());
                slot
            }
        };
        self.builder.build_store(value, slot.ptr);
    }

    /// `name[index] = value` and `name[index] op= value`
    fn lower_indexed_assignment(&mut self, node: &Node) {
        let (Some(index_node), Some(value_node)) = (node.child(0), node.child(1)) else {
            self.warn(node.line, format!("assignment to '{}' has no value", node.value));
            return;
        };
        let Some(slot) = self.lookup(&node.value, node.line) else {
            return;
        };
        let IrType::Array(element_ty, _) = slot.ty.clone() else {
            self.warn(node.line, format!("'{}' is not an array", node.value));
            return;
        };

        let Some(index) = self.lower_expr(index_node) else {
            return;
        };
        let address = self.element_address(&slot, index);

        let value = match node.attribute("operator") {
            Some(op) => {
                let current = self.builder.build_load(*element_ty, address.clone(), "arrayval");
                let Some(rhs) = self.lower_expr(value_node) else {
                    return;
                };
                self.binary_op(op.trim_end_matches('='), current, rhs, node.line)
            }
            None => self.lower_expr(value_node),
        };
        if let Some(value) = value {
            self.builder.build_store(value, address);
        }
    }

    fn lower_if(&mut self, node: &Node) {
        if node.children.len() < 2 {
            return;
        }
        let Some(cond) = self.lower_expr(&node.children[0]) else {
            return;
        };
        let Some(cond) = self.to_condition(cond, "ifcond", node.line) else {
            return;
        };

        let then_bb = self.builder.create_block("then");
        self.builder.append_block(then_bb);
        let else_bb = (node.children.len() > 2).then(|| self.builder.create_block("else"));
        let merge_bb = self.builder.create_block("ifcont");

        self.builder.build_cond_br(cond, then_bb, else_bb.unwrap_or(merge_bb));

        self.builder.position_at_end(then_bb);
        self.lower_stmt(&node.children[1]);
        if !self.builder.is_terminated() {
            self.builder.build_br(merge_bb);
        }

        if let Some(else_bb) = else_bb {
            self.builder.append_block(else_bb);
            self.builder.position_at_end(else_bb);
            self.lower_stmt(&node.children[2]);
            if !self.builder.is_terminated() {
                self.builder.build_br(merge_bb);
            }
        }

        self.builder.append_block(merge_bb);
        self.builder.position_at_end(merge_bb);
    }

    fn lower_while(&mut self, node: &Node) {
        if node.children.len() < 2 {
            return;
        }
        let cond_bb = self.builder.create_block("whilecond");
        self.builder.append_block(cond_bb);
        let body_bb = self.builder.create_block("whilebody");
        let after_bb = self.builder.create_block("afterwhile");

        self.builder.build_br(cond_bb);
        self.builder.position_at_end(cond_bb);
        if !self.branch_on(&node.children[0], "whilecond", body_bb, after_bb) {
            return;
        }

        self.builder.append_block(body_bb);
        self.builder.position_at_end(body_bb);
        self.lower_stmt(&node.children[1]);
        if !self.builder.is_terminated() {
            self.builder.build_br(cond_bb);
        }

        self.builder.append_block(after_bb);
        self.builder.position_at_end(after_bb);
    }

    fn lower_for(&mut self, node: &Node) {
        if node.children.len() < 4 {
            debug!(line = node.line, "range loop not lowered");
            return;
        }

        // Init runs inline in the current block
        self.lower_stmt(&node.children[0]);

        let cond_bb = self.builder.create_block("forcond");
        self.builder.append_block(cond_bb);
        let body_bb = self.builder.create_block("forbody");
        let inc_bb = self.builder.create_block("forinc");
        let after_bb = self.builder.create_block("afterfor");

        self.builder.build_br(cond_bb);
        self.builder.position_at_end(cond_bb);
        if !self.branch_on(&node.children[1], "forcond", body_bb, after_bb) {
            return;
        }

        self.builder.append_block(body_bb);
        self.builder.position_at_end(body_bb);
        self.lower_stmt(&node.children[3]);
        if !self.builder.is_terminated() {
            self.builder.build_br(inc_bb);
        }

        self.builder.append_block(inc_bb);
        self.builder.position_at_end(inc_bb);
        self.lower_stmt(&node.children[2]);
        self.builder.build_br(cond_bb);

        self.builder.append_block(after_bb);
        self.builder.position_at_end(after_bb);
    }

    /// Evaluate a loop condition and branch on it. Without a usable
    /// condition the loop is skipped: control goes straight to `after_bb`,
    /// which becomes the insertion point, and false is returned.
    fn branch_on(&mut self, cond: &Node, name: &str, body_bb: BlockId, after_bb: BlockId) -> bool {
        let cond = self
            .lower_expr(cond)
            .and_then(|value| self.to_condition(value, name, cond.line));
        match cond {
            Some(cond) => {
                self.builder.build_cond_br(cond, body_bb, after_bb);
                true
            }
            None => {
                self.builder.build_br(after_bb);
                self.builder.append_block(after_bb);
                self.builder.position_at_end(after_bb);
                false
            }
        }
    }

    /// Coerce a value to `i1` by comparing it against zero
    fn to_condition(&mut self, value: Value, name: &str, line: u32) -> Option<Value> {
        match value.ty.clone() {
            IrType::Bool => Some(value),
            ty @ (IrType::I8 | IrType::I32) => {
                let zero = Value::int(ty, 0);
                Some(self.builder.build_icmp(CmpOp::Ne, value, zero, name))
            }
            IrType::F64 => Some(self.builder.build_fcmp(CmpOp::Ne, value, Value::f64(0.0), name)),
            ty @ IrType::Ptr(_) => {
                let null = Value::constant(Constant::Null, ty);
                Some(self.builder.build_icmp(CmpOp::Ne, value, null, name))
            }
            ty @ (IrType::Array(..) | IrType::Void) => {
                self.warn(line, format!("condition of type {} cannot be tested", ty));
                None
            }
        }
    }

    fn lower_return(&mut self, node: &Node) {
        match node.child(0) {
            None => self.builder.build_ret(None),
            Some(expr) => {
                if let Some(value) = self.lower_expr(expr) {
                    self.builder.build_ret(Some(value));
                }
            }
        }
    }

    fn lower_print(&mut self, node: &Node) {
        let Some(arg) = node.child(0) else {
            return;
        };
        let Some(value) = self.lower_expr(arg) else {
            return;
        };

        let format = match value.ty {
            IrType::I32 | IrType::Bool => "%d\n",
            IrType::I8 => "%c\n",
            IrType::F64 => "%f\n",
            IrType::Ptr(_) => "%s\n",
            IrType::Void | IrType::Array(..) => "%d\n",
        };
        let format = self.builder.build_global_string(format);
        self.builder.build_call("printf", IrType::I32, vec![format, value], "");
    }

    /// Vectors are an opaque pointer slot; no operation is lowered on them
    fn lower_vector_decl(&mut self, node: &Node) {
        let ty = IrType::ptr(IrType::I8);
        let ptr = self.builder.build_entry_alloca(ty.clone(), &node.value);
        self.locals.insert(node.value.clone(), Slot { ptr, ty });
    }

    // ============ Expressions ============

    fn lower_expr(&mut self, expr: &Node) -> Option<Value> {
        match expr.kind {
            NodeKind::Literal => Some(self.lower_literal(&expr.value)),
            NodeKind::Identifier => {
                let slot = self.lookup(&expr.value, expr.line)?;
                Some(self.builder.build_load(slot.ty, slot.ptr, &expr.value))
            }
            NodeKind::BinaryOp => {
                let (Some(lhs), Some(rhs)) = (expr.child(0), expr.child(1)) else {
                    return None;
                };
                let lhs = self.lower_expr(lhs);
                let rhs = self.lower_expr(rhs);
                self.binary_op(&expr.value, lhs?, rhs?, expr.line)
            }
            NodeKind::UnaryOp => self.lower_unary(expr),
            NodeKind::FunctionCall => self.lower_call(expr),
            NodeKind::ArrayLiteral => Some(self.lower_array_literal(expr)),
            NodeKind::ArrayAccess => Some(self.lower_array_access(expr)),
            NodeKind::MemberAccess => {
                debug!(member = %expr.value, line = expr.line, "member access not lowered");
                None
            }
            _ => None,
        }
    }

    fn lookup(&mut self, name: &str, line: u32) -> Option<Slot> {
        let slot = self.locals.get(name).cloned();
        if slot.is_none() {
            self.warn(line, format!("Unknown variable: {}", name));
        }
        slot
    }

    /// Classify a literal by its text
    fn lower_literal(&mut self, text: &str) -> Value {
        match text {
            "true" => return Value::bool(true),
            "false" => return Value::bool(false),
            "null" => return Value::i32(0),
            _ => {}
        }

        let bytes = text.as_bytes();
        if let [b] = bytes {
            if !b.is_ascii_digit() && *b != b'-' {
                return Value::i8(i64::from(*b));
            }
        }

        if text.contains('.') {
            if let Some(v) = parse_float_prefix(text) {
                return Value::f64(v);
            }
        }

        if text.starts_with('-') || text.starts_with(|c: char| c.is_ascii_digit()) {
            if let Some(v) = parse_int_prefix(text) {
                return Value::i32(i64::from(v));
            }
        }

        match bytes.first() {
            Some(b) if !b.is_ascii_digit() => self.builder.build_global_string(text),
            _ => Value::i32(0),
        }
    }

    fn binary_op(&mut self, op: &str, lhs: Value, rhs: Value, line: u32) -> Option<Value> {
        let float = lhs.ty.is_float();
        let arith = |int_op: BinOp, float_op: BinOp| if float { float_op } else { int_op };

        let (bin, name) = match op {
            "+" => (arith(BinOp::Add, BinOp::FAdd), "addtmp"),
            "-" => (arith(BinOp::Sub, BinOp::FSub), "subtmp"),
            "*" => (arith(BinOp::Mul, BinOp::FMul), "multmp"),
            "/" => (arith(BinOp::SDiv, BinOp::FDiv), "divtmp"),
            "%" => (BinOp::SRem, "modtmp"),
            "&&" => (BinOp::And, "andtmp"),
            "||" => (BinOp::Or, "ortmp"),
            _ => {
                let cmp = match op {
                    "<" => CmpOp::Slt,
                    ">" => CmpOp::Sgt,
                    "<=" => CmpOp::Sle,
                    ">=" => CmpOp::Sge,
                    "==" => CmpOp::Eq,
                    "!=" => CmpOp::Ne,
                    _ => {
                        self.warn(line, format!("unsupported binary operator '{}'", op));
                        return None;
                    }
                };
                return Some(self.builder.build_icmp(cmp, lhs, rhs, "cmptmp"));
            }
        };
        Some(self.builder.build_binary(bin, lhs, rhs, name))
    }

    fn lower_unary(&mut self, node: &Node) -> Option<Value> {
        let operand = node.child(0)?;
        let op = node.value.as_str();

        if matches!(op, "++" | "--" | "++post" | "--post") {
            if !operand.is(NodeKind::Identifier) {
                debug!(line = node.line, "increment target is not a variable");
                return None;
            }
            let slot = self.lookup(&operand.value, node.line)?;
            let one = match &slot.ty {
                IrType::F64 => Value::f64(1.0),
                ty if ty.is_int() => Value::int(ty.clone(), 1),
                ty => {
                    self.warn(node.line, format!("cannot increment a value of type {}", ty));
                    return None;
                }
            };
            let float = slot.ty.is_float();
            let old = self.builder.build_load(slot.ty.clone(), slot.ptr.clone(), &operand.value);
            let (bin, name) = match (op.starts_with("++"), float) {
                (true, false) => (BinOp::Add, "inc"),
                (true, true) => (BinOp::FAdd, "inc"),
                (false, false) => (BinOp::Sub, "dec"),
                (false, true) => (BinOp::FSub, "dec"),
            };
            let new = self.builder.build_binary(bin, old.clone(), one, name);
            self.builder.build_store(new, slot.ptr);
            // every spelling yields the value before the update
            return Some(old);
        }

        let value = self.lower_expr(operand)?;
        match op {
            "-" if value.ty.is_float() => Some(self.builder.build_fneg(value, "negtmp")),
            "-" => {
                let zero = Value::int(value.ty.clone(), 0);
                Some(self.builder.build_binary(BinOp::Sub, zero, value, "negtmp"))
            }
            "!" => {
                let ones = Value::int(value.ty.clone(), -1);
                Some(self.builder.build_binary(BinOp::Xor, value, ones, "nottmp"))
            }
            _ => None,
        }
    }

    fn lower_call(&mut self, node: &Node) -> Option<Value> {
        let name = node.value.as_str();
        match name {
            "len" => return Some(Value::i32(self.static_len(node))),
            "size" => return Some(Value::i32(0)),
            "push" | "pop" => {
                debug!(line = node.line, builtin = name, "vector operation not lowered");
                return None;
            }
            _ => {}
        }

        let Some(callee) = self.functions.get(name).cloned() else {
            self.warn(node.line, format!("Unknown function: {}", name));
            return None;
        };

        let mut args = Vec::new();
        for arg in &node.children {
            // a method call repeats its own name as the receiver
            if arg.is(NodeKind::Identifier) && arg.value == name {
                continue;
            }
            if let Some(value) = self.lower_expr(arg) {
                args.push(value);
            }
        }
        self.builder.build_call(&callee.symbol, callee.ret_type, args, "")
    }

    /// Element count of a named fixed-size array, 0 for anything else
    fn static_len(&self, node: &Node) -> i64 {
        node.child(0)
            .filter(|arg| arg.is(NodeKind::Identifier))
            .and_then(|arg| self.locals.get(&arg.value))
            .and_then(|slot| match slot.ty {
                IrType::Array(_, count) => i64::try_from(count).ok(),
                _ => None,
            })
            .unwrap_or(0)
    }

    /// Constant arrays only: storage is allocated at the current position and
    /// its address is the value
    fn lower_array_literal(&mut self, node: &Node) -> Value {
        let mut elements = Vec::new();
        for child in &node.children {
            let Some(value) = self.lower_expr(child) else {
                continue;
            };
            if !value.is_constant() {
                return Value::i32(0);
            }
            elements.push(value);
        }

        let Some(element_ty) = elements.first().map(|v| v.ty.clone()) else {
            return Value::i32(0);
        };
        let constants: Vec<Constant> = elements
            .into_iter()
            .map(|value| match value.kind {
                ValueKind::Const(c) if value.ty.same_llvm(&element_ty) => c,
                _ => element_ty.zero(),
            })
            .collect();

        let array_ty = IrType::array(element_ty, constants.len());
        let slot = self.builder.build_alloca(array_ty.clone(), "array");
        self.builder
            .build_store(Value::constant(Constant::Array(constants), array_ty), slot.clone());
        slot
    }

    fn lower_array_access(&mut self, node: &Node) -> Value {
        let (Some(base), Some(index)) = (node.child(0), node.child(1)) else {
            return Value::i32(0);
        };

        let named = base
            .is(NodeKind::Identifier)
            .then(|| self.locals.get(&base.value))
            .flatten()
            .filter(|slot| slot.ty.is_array())
            .cloned();
        let slot = match named {
            Some(slot) => Some(slot),
            None => self.lower_expr(base).and_then(|value| {
                let ty = value.ty.pointee().filter(|t| t.is_array()).cloned()?;
                value.as_reg()?;
                Some(Slot { ptr: value, ty })
            }),
        };

        let Some(index) = self.lower_expr(index) else {
            return Value::i32(0);
        };
        let Some(slot) = slot else {
            return Value::i32(0);
        };
        let IrType::Array(element_ty, _) = slot.ty.clone() else {
            return Value::i32(0);
        };
        let address = self.element_address(&slot, index);
        self.builder.build_load(*element_ty, address, "arrayval")
    }

    fn element_address(&mut self, slot: &Slot, index: Value) -> Value {
        self.builder.build_gep(
            slot.ty.clone(),
            slot.ptr.clone(),
            vec![Value::i32(0), index],
            "arrayelem",
        )
    }
}

/// Lower a program into a module named `module_name`
pub fn generate(program: &Node, module_name: &str) -> (Module, Vec<String>) {
    Lowerer::new(module_name).lower_program(program)
}

/// Longest leading decimal float: digits, optional fraction, optional
/// exponent. Needs at least one mantissa digit.
fn parse_float_prefix(text: &str) -> Option<f64> {
    let text = text.trim_start();
    let bytes = text.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end += 1;
    }

    let int_start = end;
    while bytes.get(end).is_some_and(u8::is_ascii_digit) {
        end += 1;
    }
    let mut digits = end - int_start;
    if bytes.get(end) == Some(&b'.') {
        end += 1;
        let frac_start = end;
        while bytes.get(end).is_some_and(u8::is_ascii_digit) {
            end += 1;
        }
        digits += end - frac_start;
    }
    if digits == 0 {
        return None;
    }

    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let exp_digits = exp_end;
        while bytes.get(exp_end).is_some_and(u8::is_ascii_digit) {
            exp_end += 1;
        }
        if exp_end > exp_digits {
            end = exp_end;
        }
    }

    text[..end].parse().ok()
}

/// Longest leading decimal integer that fits in 32 bits
fn parse_int_prefix(text: &str) -> Option<i32> {
    let text = text.trim_start();
    let bytes = text.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end += 1;
    }
    let digits_start = end;
    while bytes.get(end).is_some_and(u8::is_ascii_digit) {
        end += 1;
    }
    if end == digits_start {
        return None;
    }
    text[..end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{print_module, verify_module};
    use crate::parser::parse_source;

    fn lower(source: &str) -> (Module, Vec<String>) {
        let (program, diagnostics) = parse_source(source).expect("parse");
        assert!(diagnostics.is_empty(), "diagnostics: {:?}", diagnostics);
        generate(&program, "test")
    }

    fn lower_text(source: &str) -> String {
        let (module, warnings) = lower(source);
        assert!(warnings.is_empty(), "warnings: {:?}", warnings);
        assert_eq!(verify_module(&module), Ok(()));
        print_module(&module)
    }

    fn strings(module: &Module) -> Vec<String> {
        module.globals.iter().filter_map(|g| g.string_value()).collect()
    }

    #[test]
    fn test_missing_main_is_synthesized() {
        let text = lower_text("#import \"io\"");
        assert!(text.contains("define i32 @main() {\nentry:\n  ret i32 0\n}\n"));
    }

    #[test]
    fn test_anonymous_main_is_entry_point() {
        let (module, _) = lower("func(Main) { }");
        let names: Vec<_> = module.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["printf", "puts", "main"]);
        assert_eq!(module.functions[2].ret_type, IrType::I32);
    }

    #[test]
    fn test_user_function_is_void() {
        let text = lower_text(r#"func(Main) { helper() } func(Void) = "helper" { print(1) }"#);
        assert!(text.contains("define void @helper() {"));
        assert!(text.contains("  call void @helper()\n"));
        assert!(text.contains("  ret void\n"));
    }

    #[test]
    fn test_if_scoped_variable_outlives_block() {
        let text = lower_text("func(Main) { c = 1; if (c) { y = 5 } print(y) }");
        let merge = text.find("ifcont:").expect("merge block");
        let load = text.find("load i32, ptr %y, align 4").expect("load of y");
        assert!(load > merge);
        assert!(text.contains("%ifcond = icmp ne i32 %c1, 0"));
    }

    #[test]
    fn test_print_format_follows_type() {
        let (module, _) = lower("func(Main) { print(1) print(2.5) print('a') print(\"hi\") print(true) }");
        assert_eq!(
            strings(&module),
            vec!["%d\n", "%f\n", "%c\n", "hi", "%s\n", "%d\n"]
        );
        assert_eq!(verify_module(&module), Ok(()));
    }

    #[test]
    fn test_round_trip_program() {
        let source = "func(Main){ x = 1; x = x + 2; print(x); }";
        let text = lower_text(source);
        assert!(text.contains("  store i32 1, ptr %x, align 4\n"));
        assert!(text.contains("  %addtmp = add i32 %x1, 2\n"));
        assert!(text.contains("  store i32 %addtmp, ptr %x, align 4\n"));
        assert!(text.contains("call i32 (ptr, ...) @printf(ptr @.str, i32 %x2)"));
        assert_eq!(text, lower_text(source));
    }

    #[test]
    fn test_mixed_array_keeps_first_type() {
        let text = lower_text("func(Main) { a = [1, 2.5, 3] }");
        assert!(text.contains("store [3 x i32] [i32 1, i32 0, i32 3], ptr %array, align 4"));
        assert!(text.contains("%arraycopy = load [3 x i32], ptr %array, align 4"));
        assert!(text.contains("%a = alloca [3 x i32], align 4"));
    }

    #[test]
    fn test_non_constant_array_collapses_to_zero() {
        let text = lower_text("func(Main) { y = 1; a = [y, 2] }");
        assert!(text.contains("store i32 0, ptr %a, align 4"));
        assert!(!text.contains("%array"));
    }

    #[test]
    fn test_len_of_array_variable() {
        let text = lower_text("func(Main) { a = [1, 2, 3]; print(len(a)); print(len(q)) }");
        assert!(text.contains("@printf(ptr @.str, i32 3)"));
        assert!(text.contains("@printf(ptr @.str.1, i32 0)"));
    }

    #[test]
    fn test_array_indexing() {
        let text = lower_text("func(Main) { a = [4, 5]; print(a[1]); a[0] = 9 }");
        assert!(text.contains("%arrayelem = getelementptr inbounds [2 x i32], ptr %a, i32 0, i32 1"));
        assert!(text.contains("%arrayval = load i32, ptr %arrayelem, align 4"));
        assert!(text.contains("store i32 9, ptr %arrayelem"));
    }

    #[test]
    fn test_loop_block_labels() {
        let text = lower_text(
            "func(Main) { i = 0; while (i < 3) { i++ } for (j = 0, j < 2, j++) { print(j) } }",
        );
        let order: Vec<usize> = [
            "whilecond:",
            "whilebody:",
            "afterwhile:",
            "forcond:",
            "forbody:",
            "forinc:",
            "afterfor:",
        ]
        .iter()
        .map(|label| text.find(label).expect(label))
        .collect();
        assert!(order.windows(2).all(|w| w[0] < w[1]));
        assert!(text.contains("br label %whilecond"));
    }

    #[test]
    fn test_unknown_variable_warns() {
        let (module, warnings) = lower("func(Main) { print(z) }");
        assert_eq!(warnings, vec!["Line 1: Unknown variable: z"]);
        assert!(module.globals.is_empty());
        assert_eq!(verify_module(&module), Ok(()));
    }

    #[test]
    fn test_undeclared_function_warns() {
        let (module, warnings) = lower("func(Main) {\n  nothing()\n}");
        assert_eq!(warnings, vec!["Line 2: Unknown function: nothing"]);
        assert_eq!(verify_module(&module), Ok(()));
    }

    #[test]
    fn test_runtime_functions_are_not_callable() {
        let (module, warnings) = lower("func(Main) { puts(\"hi\"); printf(\"%d\", 1) }");
        assert_eq!(
            warnings,
            vec!["Line 1: Unknown function: puts", "Line 1: Unknown function: printf"]
        );
        let main = module.function("main").expect("main");
        assert_eq!(main.instructions().count(), 0);
        assert_eq!(verify_module(&module), Ok(()));
    }

    #[test]
    fn test_user_function_named_like_runtime_is_renamed() {
        let source = r#"func(Void) = "printf" { print(7) } func(Main) { printf(); print(1) }"#;
        let text = lower_text(source);
        assert!(text.contains("declare i32 @printf(ptr, ...)\n"));
        assert!(text.contains("define void @printf.1() {"));
        assert!(text.contains("  call void @printf.1()\n"));
        assert!(text.contains("call i32 (ptr, ...) @printf(ptr @.str.1, i32 1)"));

        let (module, _) = lower(source);
        let externals: Vec<_> = module
            .functions
            .iter()
            .filter(|f| f.is_external)
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(externals, vec!["printf", "puts"]);
        assert!(module.function("printf").is_some_and(|f| f.is_declaration()));
    }

    #[test]
    fn test_unknown_increment_target_warns() {
        let (module, warnings) = lower("func(Main) { q++ }");
        assert_eq!(warnings, vec!["Line 1: Unknown variable: q"]);
        assert_eq!(verify_module(&module), Ok(()));
    }

    #[test]
    fn test_self_named_argument_is_skipped() {
        let text = lower_text(r#"func(Void) = "f" { } func(Main) { f(f) }"#);
        assert!(text.contains("  call void @f()\n"));
    }

    #[test]
    fn test_increment_yields_old_value() {
        let text = lower_text("func(Main) { i = 1; j = i++ }");
        assert!(text.contains("%inc = add i32 %i1, 1"));
        assert!(text.contains("store i32 %inc, ptr %i, align 4"));
        assert!(text.contains("store i32 %i1, ptr %j, align 4"));
    }

    #[test]
    fn test_double_increment_adds_one_point_zero() {
        let text = lower_text("func(Main) { d = 1.5; d++ }");
        assert!(text.contains("%inc = fadd double %d1, 1.000000e+00"));
    }

    #[test]
    fn test_left_operand_selects_family() {
        let (module, _) = lower("func(Main) { x = 1.5; y = x + 2 }");
        let text = print_module(&module);
        assert!(text.contains("%addtmp = fadd double %x1, 2"));
        assert!(verify_module(&module).is_err());
    }

    #[test]
    fn test_comparisons_are_signed_integer() {
        let (module, _) = lower("func(Main) { a = 1.5; if (a < 2.5) { print(a) } }");
        assert!(print_module(&module).contains("icmp slt double"));
        assert!(verify_module(&module).is_err());
    }

    #[test]
    fn test_range_for_is_noop() {
        let (module, warnings) = lower("func(Main) { for (x in range(3)) { print(x) } }");
        assert!(warnings.is_empty());
        assert!(module.globals.is_empty());
        let main = module.function("main").expect("main");
        assert_eq!(main.blocks.len(), 1);
        assert!(main.blocks[0].instructions.is_empty());
    }

    #[test]
    fn test_vector_builtins_are_stubs() {
        let text = lower_text("func(Main) { vector<Int> v; v.push(1); n = size(v) }");
        assert!(text.contains("%v = alloca ptr, align 8"));
        assert!(text.contains("store i32 0, ptr %n, align 4"));
        assert!(!text.contains("@push"));
    }

    #[test]
    fn test_code_after_return_stays_valid() {
        let text = lower_text("func(Main) { return 1; print(2) }");
        assert!(text.contains("  ret i32 1\n"));
        assert!(text.contains("\ndead:\n"));
    }

    #[test]
    fn test_exec_and_classes_are_skipped() {
        let source = r#"
            exec(threads = 4)
            class(Point) = "P" { object: x, y member: func(Void) = "m" { } }
            func(Main) { }
        "#;
        let (module, warnings) = lower(source);
        assert!(warnings.is_empty());
        let names: Vec<_> = module.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["printf", "puts", "main"]);
    }

    #[test]
    fn test_duplicate_function_keeps_first() {
        let source = r#"func(Void) = "f" { print(1) } func(Void) = "f" { print(2.5) } func(Main) { f() }"#;
        let (module, warnings) = lower(source);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("already declared"));
        assert_eq!(strings(&module), vec!["%d\n"]);
        assert_eq!(verify_module(&module), Ok(()));
    }

    #[test]
    fn test_double_condition_uses_fcmp() {
        let text = lower_text("func(Main) { d = 0.5; while (d) { d = 0.0 } }");
        assert!(text.contains("fcmp une double %d1, 0.000000e+00"));
    }

    #[test]
    fn test_not_and_negate() {
        let text = lower_text("func(Main) { b = true; c = !b; x = 2; y = -x }");
        assert!(text.contains("%nottmp = xor i1 %b1, true"));
        assert!(text.contains("%negtmp = sub i32 0, %x"));
    }

    #[test]
    fn test_compound_assignment() {
        let text = lower_text("func(Main) { x = 2; x += 3; a = [1, 2]; a[1] *= 4 }");
        assert!(text.contains("%addtmp = add i32 %x1, 3"));
        assert!(text.contains("%multmp = mul i32 %arrayval, 4"));
        assert!(text.contains("store i32 %multmp, ptr %arrayelem"));
    }

    #[test]
    fn test_literal_classification() {
        let mut lowerer = Lowerer::new("t");
        assert_eq!(lowerer.lower_literal("true"), Value::bool(true));
        assert_eq!(lowerer.lower_literal("null"), Value::i32(0));
        assert_eq!(lowerer.lower_literal("a"), Value::i8(97));
        assert_eq!(lowerer.lower_literal("7"), Value::i32(7));
        assert_eq!(lowerer.lower_literal("-12"), Value::i32(-12));
        assert_eq!(lowerer.lower_literal("2.5"), Value::f64(2.5));
        assert_eq!(lowerer.lower_literal("3.x"), Value::f64(3.0));
        assert_eq!(lowerer.lower_literal(""), Value::i32(0));
        assert_eq!(lowerer.lower_literal("99999999999"), Value::i32(0));
        let text = lowerer.lower_literal("hello");
        assert_eq!(text.as_constant(), Some(&Constant::Global(".str".into())));
    }

    #[test]
    fn test_numeric_prefixes() {
        assert_eq!(parse_float_prefix("1.2.3"), Some(1.2));
        assert_eq!(parse_float_prefix("1.5e3x"), Some(1500.0));
        assert_eq!(parse_float_prefix("2.e"), Some(2.0));
        assert_eq!(parse_float_prefix(".x"), None);
        assert_eq!(parse_int_prefix("42abc"), Some(42));
        assert_eq!(parse_int_prefix("-"), None);
        assert_eq!(parse_int_prefix("2147483648"), None);
    }
}
