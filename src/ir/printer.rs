//! IR Listing
//!
//! Renders a [`Module`] in LLVM assembly syntax with opaque pointers, before
//! any LLVM folding. Used for debug output and in tests. Local names
//! are made unique per function the way LLVM's symbol table does it: a clash
//! appends the function's next unique counter to the requested name, and
//! results without a name are numbered in textual order.

use super::instr::{InstrKind, Instruction, Terminator};
use super::types::{BasicBlock, BlockId, Constant, Function, Global, IrType, Module, VReg, Value, ValueKind};
use std::collections::{HashMap, HashSet};
use std::fmt::{self, Write};

/// Print a module as an LLVM-syntax listing
pub fn print_module(module: &Module) -> String {
    module.to_string()
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; ModuleID = '{}'", self.name)?;
        writeln!(f, "source_filename = \"{}\"", escape_name(&self.name))?;

        if !self.globals.is_empty() {
            writeln!(f)?;
            for global in &self.globals {
                write_global(f, global)?;
            }
        }

        for func in &self.functions {
            writeln!(f)?;
            FunctionPrinter::new(self, func).write(f)?;
        }
        Ok(())
    }
}

fn write_global(f: &mut fmt::Formatter<'_>, global: &Global) -> fmt::Result {
    let kind = if global.is_const { "constant" } else { "global" };
    writeln!(
        f,
        "@{} = private unnamed_addr {} {} {}, align {}",
        identifier(&global.name),
        kind,
        global.ty,
        constant_text(&global.init, &global.ty),
        global.ty.align()
    )
}

/// Per-function printing state
struct FunctionPrinter<'a> {
    module: &'a Module,
    func: &'a Function,
    values: HashMap<VReg, String>,
    blocks: HashMap<BlockId, String>,
}

impl<'a> FunctionPrinter<'a> {
    fn new(module: &'a Module, func: &'a Function) -> Self {
        let mut printer = Self {
            module,
            func,
            values: HashMap::new(),
            blocks: HashMap::new(),
        };
        printer.assign_names();
        printer
    }

    fn assign_names(&mut self) {
        let func = self.func;
        let mut used: HashSet<String> = HashSet::new();
        let mut last_unique = 0u32;
        let mut next_slot = func.params.len() as u32;

        let mut unique = |base: &str, used: &mut HashSet<String>| -> String {
            let mut candidate = base.to_string();
            while used.contains(&candidate) {
                last_unique += 1;
                candidate = format!("{}{}", base, last_unique);
            }
            used.insert(candidate.clone());
            candidate
        };

        for block in &func.blocks {
            let label = if block.label.is_empty() {
                let slot = next_slot.to_string();
                next_slot += 1;
                slot
            } else {
                unique(&block.label, &mut used)
            };
            self.blocks.insert(block.id, label);

            for inst in &block.instructions {
                let Some(result) = inst.result else { continue };
                let name = match inst.name.as_deref() {
                    Some(name) if !name.is_empty() => unique(name, &mut used),
                    _ => {
                        let slot = next_slot.to_string();
                        next_slot += 1;
                        slot
                    }
                };
                self.values.insert(result, name);
            }
        }
    }

    fn write(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let func = self.func;
        let mut params: Vec<String> = func.params.iter().map(ToString::to_string).collect();

        if func.is_declaration() {
            if func.is_vararg {
                params.push("...".to_string());
            }
            return writeln!(
                f,
                "declare {} @{}({})",
                func.ret_type,
                identifier(&func.name),
                params.join(", ")
            );
        }

        let params: Vec<String> = func
            .params
            .iter()
            .enumerate()
            .map(|(i, ty)| format!("{} %{}", ty, i))
            .collect();
        writeln!(
            f,
            "define {} @{}({}) {{",
            func.ret_type,
            identifier(&func.name),
            params.join(", ")
        )?;
        for (i, block) in func.blocks.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            self.write_block(f, block)?;
        }
        writeln!(f, "}}")
    }

    fn write_block(&self, f: &mut fmt::Formatter<'_>, block: &BasicBlock) -> fmt::Result {
        writeln!(f, "{}:", identifier(&self.label(block.id)))?;
        for inst in &block.instructions {
            writeln!(f, "  {}", self.instruction(inst))?;
        }
        if let Some(term) = &block.terminator {
            writeln!(f, "  {}", self.terminator(term))?;
        }
        Ok(())
    }

    fn label(&self, id: BlockId) -> String {
        self.blocks.get(&id).cloned().unwrap_or_else(|| id.to_string())
    }

    fn reg(&self, vreg: VReg) -> String {
        match self.values.get(&vreg) {
            Some(name) => format!("%{}", identifier(name)),
            None => vreg.to_string(),
        }
    }

    /// Operand without its type
    fn operand(&self, value: &Value) -> String {
        match &value.kind {
            ValueKind::Reg(vreg) => self.reg(*vreg),
            ValueKind::Const(constant) => constant_text(constant, &value.ty),
        }
    }

    /// Operand with its type, as in call arguments
    fn typed(&self, value: &Value) -> String {
        format!("{} {}", value.ty, self.operand(value))
    }

    fn instruction(&self, inst: &Instruction) -> String {
        let body = match &inst.kind {
            InstrKind::Alloca(ty) => format!("alloca {}, align {}", ty, ty.align()),
            InstrKind::Load { ty, ptr } => {
                format!("load {}, {}, align {}", ty, self.typed(ptr), ty.align())
            }
            InstrKind::Store { value, ptr } => format!(
                "store {}, {}, align {}",
                self.typed(value),
                self.typed(ptr),
                value.ty.align()
            ),
            InstrKind::GetElementPtr {
                base_ty,
                ptr,
                indices,
            } => {
                let mut text = format!("getelementptr inbounds {}, {}", base_ty, self.typed(ptr));
                for index in indices {
                    let _ = write!(text, ", {}", self.typed(index));
                }
                text
            }
            InstrKind::Binary { op, lhs, rhs } => {
                format!("{} {} {}, {}", op, lhs.ty, self.operand(lhs), self.operand(rhs))
            }
            InstrKind::FNeg(value) => format!("fneg {}", self.typed(value)),
            InstrKind::ICmp { op, lhs, rhs } => {
                format!("icmp {} {} {}, {}", op, lhs.ty, self.operand(lhs), self.operand(rhs))
            }
            InstrKind::FCmp { op, lhs, rhs } => format!(
                "fcmp {} {} {}, {}",
                op.float_name(),
                lhs.ty,
                self.operand(lhs),
                self.operand(rhs)
            ),
            InstrKind::Call {
                callee,
                ret_ty,
                args,
            } => {
                let args: Vec<String> = args.iter().map(|a| self.typed(a)).collect();
                let signature = match self.module.function(callee) {
                    Some(target) if target.is_vararg => {
                        let mut params: Vec<String> =
                            target.params.iter().map(ToString::to_string).collect();
                        params.push("...".to_string());
                        format!("{} ({})", ret_ty, params.join(", "))
                    }
                    _ => ret_ty.to_string(),
                };
                format!("call {} @{}({})", signature, identifier(callee), args.join(", "))
            }
        };

        match inst.result {
            Some(result) => format!("{} = {}", self.reg(result), body),
            None => body,
        }
    }

    fn terminator(&self, term: &Terminator) -> String {
        match term {
            Terminator::Ret(None) => "ret void".to_string(),
            Terminator::Ret(Some(value)) => format!("ret {}", self.typed(value)),
            Terminator::Br(target) => format!("br label %{}", identifier(&self.label(*target))),
            Terminator::CondBr {
                cond,
                then_block,
                else_block,
            } => format!(
                "br {}, label %{}, label %{}",
                self.typed(cond),
                identifier(&self.label(*then_block)),
                identifier(&self.label(*else_block))
            ),
        }
    }
}

/// Constant in operand position
fn constant_text(constant: &Constant, ty: &IrType) -> String {
    match constant {
        Constant::Int(v) if *ty == IrType::Bool => (*v != 0).to_string(),
        Constant::Int(v) => v.to_string(),
        Constant::Bool(b) => b.to_string(),
        Constant::Float(v) => float_text(*v),
        Constant::Null => "null".to_string(),
        Constant::Global(name) => format!("@{}", identifier(name)),
        Constant::Zero => "zeroinitializer".to_string(),
        Constant::CString(bytes) => format!("c\"{}\"", escape_bytes(bytes)),
        Constant::Array(elements) => {
            let element_ty = match ty {
                IrType::Array(inner, _) => inner.as_ref().clone(),
                other => other.clone(),
            };
            let items: Vec<String> = elements
                .iter()
                .map(|e| format!("{} {}", element_ty, constant_text(e, &element_ty)))
                .collect();
            format!("[{}]", items.join(", "))
        }
    }
}

/// Doubles print in exponent form when that reads back exactly, otherwise
/// as the raw bit pattern
fn float_text(value: f64) -> String {
    if value.is_finite() {
        let rust = format!("{:.6e}", value);
        if let Some((mantissa, exponent)) = rust.split_once('e') {
            if let Ok(exp) = exponent.parse::<i32>() {
                let sign = if exp < 0 { '-' } else { '+' };
                let text = format!("{}e{}{:02}", mantissa, sign, exp.abs());
                if text.parse::<f64>().map(f64::to_bits) == Ok(value.to_bits()) {
                    return text;
                }
            }
        }
    }
    format!("0x{:016X}", value.to_bits())
}

/// Printable ASCII stays literal; quotes, backslashes and everything else
/// become `\XX`
fn escape_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        if (0x20..0x7f).contains(&b) && b != b'"' && b != b'\\' {
            out.push(b as char);
        } else {
            let _ = write!(out, "\\{:02X}", b);
        }
    }
    out
}

fn escape_name(name: &str) -> String {
    escape_bytes(name.as_bytes())
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || "-$._".contains(c) => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || "-$._".contains(c))
}

/// Global or local name, quoted when it is not a bare LLVM identifier.
/// Purely numeric names are slot numbers and stay bare.
fn identifier(name: &str) -> String {
    if is_plain_identifier(name) || (!name.is_empty() && name.bytes().all(|b| b.is_ascii_digit())) {
        name.to_string()
    } else {
        format!("\"{}\"", escape_name(name))
    }
}
