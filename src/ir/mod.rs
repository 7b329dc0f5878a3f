//! Register based intermediate representation.
//!
//! Every value the language can produce is a `double`. The only other type is
//! `i1`, the result of a comparison, which is converted back to `double` before
//! it can escape into user code.

use std::fmt;

use log::debug;

mod builder;
pub mod exec;
mod verify;

pub use builder::{BlockId, Builder, BuilderError};
pub use verify::VerifyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    Double,
    Bool,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Double => write!(f, "double"),
            Type::Bool => write!(f, "i1"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Const(f64),
    /// formal parameter, by position
    Param(usize),
    /// result of an instruction, indexing [`Body::registers`]
    Register(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstructionKind {
    FAdd(Value, Value),
    FSub(Value, Value),
    FMul(Value, Value),
    /// unordered or less than
    FCmpUlt(Value, Value),
    UiToFp(Value),
    Call { callee: String, args: Vec<Value> },
    Ret(Value),
}

impl InstructionKind {
    pub fn opcode(&self) -> &'static str {
        match self {
            InstructionKind::FAdd(..) => "fadd",
            InstructionKind::FSub(..) => "fsub",
            InstructionKind::FMul(..) => "fmul",
            InstructionKind::FCmpUlt(..) => "fcmp ult",
            InstructionKind::UiToFp(..) => "uitofp",
            InstructionKind::Call { .. } => "call",
            InstructionKind::Ret(..) => "ret",
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(self, InstructionKind::Ret(_))
    }

    /// Type of the register this instruction defines, if any.
    pub fn result_type(&self) -> Option<Type> {
        match self {
            InstructionKind::FCmpUlt(..) => Some(Type::Bool),
            InstructionKind::Ret(_) => None,
            _ => Some(Type::Double),
        }
    }

    pub fn operands(&self) -> Vec<Value> {
        match self {
            InstructionKind::FAdd(lhs, rhs)
            | InstructionKind::FSub(lhs, rhs)
            | InstructionKind::FMul(lhs, rhs)
            | InstructionKind::FCmpUlt(lhs, rhs) => vec![*lhs, *rhs],
            InstructionKind::UiToFp(value) | InstructionKind::Ret(value) => vec![*value],
            InstructionKind::Call { args, .. } => args.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub dest: Option<usize>,
    pub kind: InstructionKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Register {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    pub name: String,
    pub instructions: Vec<Instruction>,
}

impl BasicBlock {
    pub fn terminator(&self) -> Option<&Instruction> {
        self.instructions
            .last()
            .filter(|inst| inst.kind.is_terminator())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Body {
    pub blocks: Vec<BasicBlock>,
    pub registers: Vec<Register>,
}

/// A function signature plus an optional body. Every parameter and the return
/// value are `double`.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    name: String,
    params: Vec<String>,
    body: Option<Body>,
}

impl Function {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn count_params(&self) -> usize {
        self.params.len()
    }

    pub fn get_params(&self) -> Vec<Value> {
        (0..self.params.len()).map(Value::Param).collect()
    }

    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    /// A function without a body is only a declaration.
    pub fn is_declaration(&self) -> bool {
        self.body.is_none()
    }

    pub fn count_basic_blocks(&self) -> usize {
        self.body.as_ref().map_or(0, |body| body.blocks.len())
    }

    /// Renames the formal parameters. Arity is part of the signature and
    /// cannot change, so a list of a different length is ignored.
    pub fn set_param_names(&mut self, names: Vec<String>) -> bool {
        if names.len() != self.params.len() {
            return false;
        }
        self.params = names;
        true
    }

    pub fn set_body(&mut self, body: Body) {
        self.body = Some(body);
    }

    /// Drops the body, turning the function back into a declaration.
    pub fn clear_body(&mut self) -> Option<Body> {
        self.body.take()
    }

    pub fn verify(&self, module: &Module) -> Result<(), VerifyError> {
        verify::verify_function(module, self)
    }

    fn value_name(&self, value: &Value) -> String {
        match value {
            Value::Const(num) => format_const(*num),
            Value::Param(idx) => match self.params.get(*idx) {
                Some(name) => format!("%{}", name),
                None => format!("%arg{}", idx),
            },
            Value::Register(idx) => match self.body.as_ref().and_then(|b| b.registers.get(*idx)) {
                Some(reg) => format!("%{}", reg.name),
                None => format!("%r{}", idx),
            },
        }
    }

    fn value_type(&self, value: &Value) -> Type {
        match value {
            Value::Register(idx) => self
                .body
                .as_ref()
                .and_then(|b| b.registers.get(*idx))
                .map_or(Type::Double, |reg| reg.ty),
            _ => Type::Double,
        }
    }

    fn write_instruction(&self, f: &mut fmt::Formatter<'_>, inst: &Instruction) -> fmt::Result {
        write!(f, "  ")?;
        if let Some(dest) = inst.dest {
            write!(f, "{} = ", self.value_name(&Value::Register(dest)))?;
        }
        match &inst.kind {
            InstructionKind::FAdd(lhs, rhs)
            | InstructionKind::FSub(lhs, rhs)
            | InstructionKind::FMul(lhs, rhs)
            | InstructionKind::FCmpUlt(lhs, rhs) => write!(
                f,
                "{} {} {}, {}",
                inst.kind.opcode(),
                self.value_type(lhs),
                self.value_name(lhs),
                self.value_name(rhs)
            ),
            InstructionKind::UiToFp(value) => write!(
                f,
                "uitofp {} {} to double",
                self.value_type(value),
                self.value_name(value)
            ),
            InstructionKind::Call { callee, args } => {
                let args = args
                    .iter()
                    .map(|arg| format!("{} {}", self.value_type(arg), self.value_name(arg)))
                    .collect::<Vec<_>>();
                write!(f, "call double @{}({})", callee, args.join(", "))
            }
            InstructionKind::Ret(value) => write!(
                f,
                "ret {} {}",
                self.value_type(value),
                self.value_name(value)
            ),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self
            .params
            .iter()
            .map(|param| format!("double %{}", param))
            .collect::<Vec<_>>()
            .join(", ");

        let body = match &self.body {
            None => return writeln!(f, "declare double @{}({})", self.name, params),
            Some(body) => body,
        };

        writeln!(f, "define double @{}({}) {{", self.name, params)?;
        for (i, block) in body.blocks.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            writeln!(f, "{}:", block.name)?;
            for inst in &block.instructions {
                self.write_instruction(f, inst)?;
                writeln!(f)?;
            }
        }
        writeln!(f, "}}")
    }
}

/// Formats a constant the way LLVM prints doubles, e.g. `2.000000e+00`.
fn format_const(value: f64) -> String {
    let formatted = format!("{:.6e}", value);
    match formatted.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exp.abs())
        }
        None => formatted,
    }
}

/// Ordered collection of functions, keyed by name.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    name: String,
    functions: Vec<Function>,
}

impl Module {
    pub fn new(name: &str) -> Self {
        Module {
            name: name.to_string(),
            functions: Vec::new(),
        }
    }

    pub fn get_function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|func| func.name == name)
    }

    pub fn get_function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|func| func.name == name)
    }

    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.functions.iter()
    }

    /// Adds a declaration. Returns `None` if the name is already taken.
    pub fn add_function(&mut self, name: &str, params: Vec<String>) -> Option<&mut Function> {
        if self.get_function(name).is_some() {
            return None;
        }
        debug!("adding function @{} with {} params", name, params.len());
        self.functions.push(Function {
            name: name.to_string(),
            params,
            body: None,
        });
        self.functions.last_mut()
    }

    pub fn remove_function(&mut self, name: &str) -> Option<Function> {
        let idx = self.functions.iter().position(|func| func.name == name)?;
        debug!("removing function @{}", name);
        Some(self.functions.remove(idx))
    }

    /// `base` if it is free, otherwise the first free `base.N`.
    pub fn unique_name(&self, base: &str) -> String {
        if self.get_function(base).is_none() {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{}.{}", base, n))
            .find(|name| self.get_function(name).is_none())
            .unwrap_or_else(|| base.to_string())
    }

    pub fn verify(&self) -> Result<(), VerifyError> {
        for func in &self.functions {
            func.verify(self)?;
        }
        Ok(())
    }

    pub fn print_to_string(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; ModuleID = '{}'", self.name)?;
        for func in &self.functions {
            writeln!(f)?;
            write!(f, "{}", func)?;
        }
        Ok(())
    }
}
