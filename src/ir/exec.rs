//! Direct interpretation of a [`Module`], used to evaluate top-level
//! expressions without a native backend.

use std::collections::HashMap;

use log::trace;

use super::{Body, Function, InstructionKind, Module, Value};

/// Deepest call chain the engine will follow. With no control flow in the
/// language any recursive function recurses forever, so this bounds it.
pub const MAX_CALL_DEPTH: usize = 128;

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum ExecError {
    #[error("unknown function @{0}")]
    UnknownFunction(String),
    #[error("no host implementation for extern @{0}")]
    UnresolvedExtern(String),
    #[error("@{name} expects {expected} arguments, found {found}")]
    ArgumentCount {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("call depth exceeded {0} frames")]
    StackOverflow(usize),
    #[error("@{function} is malformed: {detail}")]
    Malformed { function: String, detail: String },
}

#[derive(Debug, Clone, Copy)]
pub struct HostFunction {
    pub arity: usize,
    pub func: fn(&[f64]) -> f64,
}

pub struct ExecutionEngine<'m> {
    module: &'m Module,
    externs: HashMap<String, HostFunction>,
}

impl<'m> ExecutionEngine<'m> {
    /// An engine with the common libm functions available as externs.
    pub fn new(module: &'m Module) -> Self {
        let mut engine = ExecutionEngine {
            module,
            externs: HashMap::new(),
        };
        engine.add_global_mapping("sin", 1, |args| args[0].sin());
        engine.add_global_mapping("cos", 1, |args| args[0].cos());
        engine.add_global_mapping("exp", 1, |args| args[0].exp());
        engine.add_global_mapping("log", 1, |args| args[0].ln());
        engine.add_global_mapping("sqrt", 1, |args| args[0].sqrt());
        engine.add_global_mapping("fabs", 1, |args| args[0].abs());
        engine
    }

    /// Binds an extern declaration to a host function. The host function is
    /// only called with exactly `arity` arguments.
    pub fn add_global_mapping(&mut self, name: &str, arity: usize, func: fn(&[f64]) -> f64) {
        self.externs
            .insert(name.to_string(), HostFunction { arity, func });
    }

    pub fn run_function(&self, name: &str, args: &[f64]) -> Result<f64, ExecError> {
        self.call(name, args, 0)
    }

    fn call(&self, name: &str, args: &[f64], depth: usize) -> Result<f64, ExecError> {
        if depth >= MAX_CALL_DEPTH {
            return Err(ExecError::StackOverflow(MAX_CALL_DEPTH));
        }

        let function = self
            .module
            .get_function(name)
            .ok_or_else(|| ExecError::UnknownFunction(name.to_string()))?;
        if function.count_params() != args.len() {
            return Err(ExecError::ArgumentCount {
                name: name.to_string(),
                expected: function.count_params(),
                found: args.len(),
            });
        }

        trace!("calling @{} with {:?}", name, args);
        match function.body() {
            Some(body) => self.execute(function, body, args, depth),
            None => {
                let host = self
                    .externs
                    .get(name)
                    .ok_or_else(|| ExecError::UnresolvedExtern(name.to_string()))?;
                if host.arity != args.len() {
                    return Err(ExecError::ArgumentCount {
                        name: name.to_string(),
                        expected: host.arity,
                        found: args.len(),
                    });
                }
                Ok((host.func)(args))
            }
        }
    }

    fn execute(&self, function: &Function, body: &Body, args: &[f64], depth: usize) -> Result<f64, ExecError> {
        let malformed = |detail: &str| ExecError::Malformed {
            function: function.name().to_string(),
            detail: detail.to_string(),
        };

        let mut registers: Vec<Option<f64>> = vec![None; body.registers.len()];
        let entry = body.blocks.first().ok_or_else(|| malformed("no entry block"))?;

        for inst in &entry.instructions {
            let read = |value: &Value| -> Result<f64, ExecError> {
                match value {
                    Value::Const(num) => Ok(*num),
                    Value::Param(idx) => args
                        .get(*idx)
                        .copied()
                        .ok_or_else(|| malformed("parameter out of range")),
                    Value::Register(idx) => registers
                        .get(*idx)
                        .copied()
                        .flatten()
                        .ok_or_else(|| malformed("read of undefined register")),
                }
            };

            let result = match &inst.kind {
                InstructionKind::FAdd(lhs, rhs) => read(lhs)? + read(rhs)?,
                InstructionKind::FSub(lhs, rhs) => read(lhs)? - read(rhs)?,
                InstructionKind::FMul(lhs, rhs) => read(lhs)? * read(rhs)?,
                InstructionKind::FCmpUlt(lhs, rhs) => {
                    let (lhs, rhs) = (read(lhs)?, read(rhs)?);
                    let unordered = lhs.is_nan() || rhs.is_nan();
                    if unordered || lhs < rhs {
                        1.0
                    } else {
                        0.0
                    }
                }
                InstructionKind::UiToFp(value) => read(value)?,
                InstructionKind::Call { callee, args } => {
                    let args = args.iter().map(read).collect::<Result<Vec<_>, _>>()?;
                    self.call(callee, &args, depth + 1)?
                }
                InstructionKind::Ret(value) => return read(value),
            };

            let dest = inst
                .dest
                .ok_or_else(|| malformed("instruction result is not assigned"))?;
            match registers.get_mut(dest) {
                Some(slot) => *slot = Some(result),
                None => return Err(malformed("write to undefined register")),
            }
        }

        Err(malformed("entry block falls through without returning"))
    }
}
