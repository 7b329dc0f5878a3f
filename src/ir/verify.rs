use super::{Function, InstructionKind, Module, Type, Value};

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum VerifyError {
    #[error("@{0} has a body with no basic blocks")]
    NoBlocks(String),
    #[error("block {block} in @{function} is empty")]
    EmptyBlock { function: String, block: String },
    #[error("block {block} in @{function} does not end in a terminator")]
    MissingTerminator { function: String, block: String },
    #[error("terminator in the middle of block {block} in @{function}")]
    MisplacedTerminator { function: String, block: String },
    #[error("@{function} uses undefined value {value}")]
    UndefinedValue { function: String, value: String },
    #[error("{opcode} in @{function} has a malformed result: {detail}")]
    MalformedResult {
        function: String,
        opcode: &'static str,
        detail: String,
    },
    #[error("operand of {opcode} in @{function} is {found}, expected {expected}")]
    TypeMismatch {
        function: String,
        opcode: &'static str,
        expected: Type,
        found: Type,
    },
    #[error("@{function} calls unknown function @{callee}")]
    UnknownCallee { function: String, callee: String },
    #[error("@{function} calls @{callee} with {found} arguments, expected {expected}")]
    CallArity {
        function: String,
        callee: String,
        expected: usize,
        found: usize,
    },
}

struct Verifier<'a> {
    module: &'a Module,
    function: &'a Function,
    defined: Vec<bool>,
}

impl<'a> Verifier<'a> {
    fn name(&self) -> String {
        self.function.name().to_string()
    }

    fn type_of(&self, value: &Value) -> Result<Type, VerifyError> {
        let undefined = || VerifyError::UndefinedValue {
            function: self.name(),
            value: format!("{:?}", value),
        };

        match value {
            Value::Const(_) => Ok(Type::Double),
            Value::Param(idx) if *idx < self.function.count_params() => Ok(Type::Double),
            Value::Param(_) => Err(undefined()),
            Value::Register(idx) => {
                if !self.defined.get(*idx).copied().unwrap_or(false) {
                    return Err(undefined());
                }
                self.function
                    .body()
                    .and_then(|body| body.registers.get(*idx))
                    .map(|reg| reg.ty)
                    .ok_or_else(undefined)
            }
        }
    }

    fn expect_type(&self, kind: &InstructionKind, value: &Value, expected: Type) -> Result<(), VerifyError> {
        let found = self.type_of(value)?;
        if found != expected {
            return Err(VerifyError::TypeMismatch {
                function: self.name(),
                opcode: kind.opcode(),
                expected,
                found,
            });
        }
        Ok(())
    }

    fn check_operands(&self, kind: &InstructionKind) -> Result<(), VerifyError> {
        match kind {
            InstructionKind::UiToFp(value) => self.expect_type(kind, value, Type::Bool),
            InstructionKind::Call { callee, args } => {
                let target = self.module.get_function(callee).ok_or_else(|| {
                    VerifyError::UnknownCallee {
                        function: self.name(),
                        callee: callee.clone(),
                    }
                })?;
                if target.count_params() != args.len() {
                    return Err(VerifyError::CallArity {
                        function: self.name(),
                        callee: callee.clone(),
                        expected: target.count_params(),
                        found: args.len(),
                    });
                }
                for arg in args {
                    self.expect_type(kind, arg, Type::Double)?;
                }
                Ok(())
            }
            _ => {
                for operand in kind.operands() {
                    self.expect_type(kind, &operand, Type::Double)?;
                }
                Ok(())
            }
        }
    }

    fn define(&mut self, kind: &InstructionKind, dest: Option<usize>) -> Result<(), VerifyError> {
        let function = self.function;
        let malformed = |detail: String| VerifyError::MalformedResult {
            function: function.name().to_string(),
            opcode: kind.opcode(),
            detail,
        };

        let (ty, reg) = match (kind.result_type(), dest) {
            (None, None) => return Ok(()),
            (None, Some(reg)) => {
                return Err(malformed(format!("defines register {} but has no result", reg)))
            }
            (Some(_), None) => {
                return Err(malformed("result is not assigned to a register".to_string()))
            }
            (Some(ty), Some(reg)) => (ty, reg),
        };

        let declared = function
            .body()
            .and_then(|body| body.registers.get(reg))
            .map(|reg| reg.ty);
        match declared {
            None => Err(malformed(format!("register {} does not exist", reg))),
            Some(declared) if declared != ty => Err(malformed(format!(
                "register {} is {}, result is {}",
                reg, declared, ty
            ))),
            Some(_) if self.defined[reg] => Err(malformed(format!("register {} is assigned twice", reg))),
            Some(_) => {
                self.defined[reg] = true;
                Ok(())
            }
        }
    }

    fn run(mut self) -> Result<(), VerifyError> {
        let function = self.function;
        let body = match function.body() {
            Some(body) => body,
            None => return Ok(()),
        };

        if body.blocks.is_empty() {
            return Err(VerifyError::NoBlocks(self.name()));
        }

        for block in &body.blocks {
            if block.instructions.is_empty() {
                return Err(VerifyError::EmptyBlock {
                    function: self.name(),
                    block: block.name.clone(),
                });
            }
            if block.terminator().is_none() {
                return Err(VerifyError::MissingTerminator {
                    function: self.name(),
                    block: block.name.clone(),
                });
            }

            let count = block.instructions.len();
            for (i, inst) in block.instructions.iter().enumerate() {
                if inst.kind.is_terminator() && i + 1 != count {
                    return Err(VerifyError::MisplacedTerminator {
                        function: self.name(),
                        block: block.name.clone(),
                    });
                }
                self.check_operands(&inst.kind)?;
                self.define(&inst.kind, inst.dest)?;
            }
        }

        Ok(())
    }
}

pub(super) fn verify_function(module: &Module, function: &Function) -> Result<(), VerifyError> {
    let registers = function.body().map_or(0, |body| body.registers.len());
    Verifier {
        module,
        function,
        defined: vec![false; registers],
    }
    .run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BasicBlock, Body, Builder, Instruction, Register};
    use pretty_assertions::assert_eq;

    fn module_with(body: Body) -> Module {
        let mut module = Module::new("test");
        module
            .add_function("f", vec!["x".to_string()])
            .unwrap()
            .set_body(body);
        module
    }

    fn verify_f(module: &Module) -> Result<(), VerifyError> {
        module.get_function("f").unwrap().verify(module)
    }

    fn block(instructions: Vec<Instruction>) -> BasicBlock {
        BasicBlock {
            name: "entry".to_string(),
            instructions,
        }
    }

    fn ret(value: Value) -> Instruction {
        Instruction {
            dest: None,
            kind: InstructionKind::Ret(value),
        }
    }

    #[test]
    fn well_formed_body_passes() {
        let mut module = Module::new("test");
        module.add_function("f", vec!["x".to_string()]);
        let mut builder = Builder::for_function(module.get_function("f").unwrap());
        let entry = builder.append_basic_block("entry");
        builder.position_at_end(entry);
        let f = module.get_function("f").unwrap().clone();
        let call = builder.build_call(&f, &[Value::Param(0)], "calltmp").unwrap();
        let cmp = builder
            .build_float_compare_ult(call, Value::Const(1.0), "cmptmp")
            .unwrap();
        let converted = builder.build_unsigned_int_to_float(cmp, "booltmp").unwrap();
        builder.build_return(converted).unwrap();
        module.get_function_mut("f").unwrap().set_body(builder.finish());

        assert_eq!(module.verify(), Ok(()));
    }

    #[test]
    fn declarations_always_pass() {
        let mut module = Module::new("test");
        module.add_function("sin", vec!["x".to_string()]);
        assert_eq!(module.verify(), Ok(()));
    }

    #[test]
    fn body_needs_a_block() {
        let module = module_with(Body::default());
        assert_eq!(verify_f(&module), Err(VerifyError::NoBlocks("f".to_string())));
    }

    #[test]
    fn blocks_must_be_terminated() {
        let module = module_with(Body {
            blocks: vec![block(vec![])],
            registers: vec![],
        });
        assert_eq!(
            verify_f(&module),
            Err(VerifyError::EmptyBlock {
                function: "f".to_string(),
                block: "entry".to_string(),
            })
        );

        let module = module_with(Body {
            blocks: vec![block(vec![Instruction {
                dest: Some(0),
                kind: InstructionKind::FAdd(Value::Param(0), Value::Param(0)),
            }])],
            registers: vec![Register {
                name: "addtmp".to_string(),
                ty: Type::Double,
            }],
        });
        assert_eq!(
            verify_f(&module),
            Err(VerifyError::MissingTerminator {
                function: "f".to_string(),
                block: "entry".to_string(),
            })
        );
    }

    #[test]
    fn terminator_must_be_last() {
        let module = module_with(Body {
            blocks: vec![block(vec![ret(Value::Const(1.0)), ret(Value::Const(2.0))])],
            registers: vec![],
        });
        assert_eq!(
            verify_f(&module),
            Err(VerifyError::MisplacedTerminator {
                function: "f".to_string(),
                block: "entry".to_string(),
            })
        );
    }

    #[test]
    fn values_must_be_defined_before_use() {
        let module = module_with(Body {
            blocks: vec![block(vec![ret(Value::Register(0))])],
            registers: vec![Register {
                name: "ghost".to_string(),
                ty: Type::Double,
            }],
        });
        assert!(matches!(
            verify_f(&module),
            Err(VerifyError::UndefinedValue { .. })
        ));

        let module = module_with(Body {
            blocks: vec![block(vec![ret(Value::Param(3))])],
            registers: vec![],
        });
        assert!(matches!(
            verify_f(&module),
            Err(VerifyError::UndefinedValue { .. })
        ));
    }

    #[test]
    fn returning_a_bool_is_a_type_error() {
        let module = module_with(Body {
            blocks: vec![block(vec![
                Instruction {
                    dest: Some(0),
                    kind: InstructionKind::FCmpUlt(Value::Param(0), Value::Const(0.0)),
                },
                ret(Value::Register(0)),
            ])],
            registers: vec![Register {
                name: "cmptmp".to_string(),
                ty: Type::Bool,
            }],
        });
        assert_eq!(
            verify_f(&module),
            Err(VerifyError::TypeMismatch {
                function: "f".to_string(),
                opcode: "ret",
                expected: Type::Double,
                found: Type::Bool,
            })
        );
    }

    #[test]
    fn calls_are_checked_against_the_module() {
        let module = module_with(Body {
            blocks: vec![block(vec![
                Instruction {
                    dest: Some(0),
                    kind: InstructionKind::Call {
                        callee: "f".to_string(),
                        args: vec![],
                    },
                },
                ret(Value::Register(0)),
            ])],
            registers: vec![Register {
                name: "calltmp".to_string(),
                ty: Type::Double,
            }],
        });
        assert_eq!(
            verify_f(&module),
            Err(VerifyError::CallArity {
                function: "f".to_string(),
                callee: "f".to_string(),
                expected: 1,
                found: 0,
            })
        );
    }
}
