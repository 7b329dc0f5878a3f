use std::collections::HashSet;

use super::{BasicBlock, Body, Function, Instruction, InstructionKind, Register, Type, Value};

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum BuilderError {
    #[error("builder is not positioned at a basic block")]
    UnsetPosition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockId(usize);

/// Accumulates the body of one function.
///
/// Instructions are appended at the end of the block the builder is positioned
/// at. Register names are made unique within the function by appending a
/// counter, so `addtmp` is followed by `addtmp1`, `addtmp2` and so on.
#[derive(Debug, Default)]
pub struct Builder {
    blocks: Vec<BasicBlock>,
    registers: Vec<Register>,
    used_names: HashSet<String>,
    position: Option<usize>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A builder whose register names will not shadow `function`'s parameters.
    pub fn for_function(function: &Function) -> Self {
        Builder {
            used_names: function.params().iter().cloned().collect(),
            ..Self::default()
        }
    }

    fn fresh_name(&mut self, base: &str) -> String {
        let mut name = base.to_string();
        let mut counter = 1;
        while self.used_names.contains(&name) {
            name = format!("{}{}", base, counter);
            counter += 1;
        }
        self.used_names.insert(name.clone());
        name
    }

    pub fn append_basic_block(&mut self, name: &str) -> BlockId {
        let name = self.fresh_name(name);
        self.blocks.push(BasicBlock {
            name,
            instructions: Vec::new(),
        });
        BlockId(self.blocks.len() - 1)
    }

    pub fn position_at_end(&mut self, block: BlockId) {
        self.position = Some(block.0);
    }

    fn insert_position(&self) -> Result<usize, BuilderError> {
        // a BlockId from another builder counts as no position at all
        self.position
            .filter(|&idx| idx < self.blocks.len())
            .ok_or(BuilderError::UnsetPosition)
    }

    fn insert_value(&mut self, kind: InstructionKind, ty: Type, name: &str) -> Result<Value, BuilderError> {
        let block = self.insert_position()?;
        let name = self.fresh_name(name);
        self.registers.push(Register { name, ty });
        let dest = self.registers.len() - 1;
        self.blocks[block].instructions.push(Instruction {
            dest: Some(dest),
            kind,
        });
        Ok(Value::Register(dest))
    }

    pub fn build_float_add(&mut self, lhs: Value, rhs: Value, name: &str) -> Result<Value, BuilderError> {
        self.insert_value(InstructionKind::FAdd(lhs, rhs), Type::Double, name)
    }

    pub fn build_float_sub(&mut self, lhs: Value, rhs: Value, name: &str) -> Result<Value, BuilderError> {
        self.insert_value(InstructionKind::FSub(lhs, rhs), Type::Double, name)
    }

    pub fn build_float_mul(&mut self, lhs: Value, rhs: Value, name: &str) -> Result<Value, BuilderError> {
        self.insert_value(InstructionKind::FMul(lhs, rhs), Type::Double, name)
    }

    /// `fcmp ult`, producing an `i1`.
    pub fn build_float_compare_ult(
        &mut self,
        lhs: Value,
        rhs: Value,
        name: &str,
    ) -> Result<Value, BuilderError> {
        self.insert_value(InstructionKind::FCmpUlt(lhs, rhs), Type::Bool, name)
    }

    pub fn build_unsigned_int_to_float(&mut self, value: Value, name: &str) -> Result<Value, BuilderError> {
        self.insert_value(InstructionKind::UiToFp(value), Type::Double, name)
    }

    pub fn build_call(&mut self, callee: &Function, args: &[Value], name: &str) -> Result<Value, BuilderError> {
        self.insert_value(
            InstructionKind::Call {
                callee: callee.name().to_string(),
                args: args.to_vec(),
            },
            Type::Double,
            name,
        )
    }

    pub fn build_return(&mut self, value: Value) -> Result<(), BuilderError> {
        let block = self.insert_position()?;
        self.blocks[block].instructions.push(Instruction {
            dest: None,
            kind: InstructionKind::Ret(value),
        });
        Ok(())
    }

    pub fn finish(self) -> Body {
        Body {
            blocks: self.blocks,
            registers: self.registers,
        }
    }
}
