use std::collections::HashMap;

use log::{debug, warn};

use crate::ast::{ASTNode, Expression, Function, Prototype};
use crate::ir::{self, Builder, BuilderError, Module, Value, VerifyError};

/// Name given to the wrapper function of a top-level expression.
pub const ANONYMOUS_FUNCTION: &str = "__anon_expr";

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum CodegenError {
    #[error("unknown variable referenced {0}")]
    UnknownVariable(String),
    #[error("invalid binary operator {0}")]
    InvalidOperator(char),
    #[error("unknown function referenced {0}")]
    UnknownFunction(String),
    #[error("incorrect number of arguments for {name}: expected {expected}, found {found}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("function {0} cannot be redefined")]
    CannotRedefine(String),
    #[error("failed to verify function {name}: {source}")]
    StructuralError { name: String, source: VerifyError },
    #[error(transparent)]
    Builder(#[from] BuilderError),
}

/// Code generation state: the module being filled in, the builder for the
/// function currently being generated and that function's parameters.
pub struct Codegen {
    pub module: Module,
    pub builder: Builder,
    pub named_values: HashMap<String, Value>,
}

impl Codegen {
    pub fn new(module_name: &str) -> Codegen {
        Codegen {
            module: Module::new(module_name),
            builder: Builder::new(),
            named_values: HashMap::new(),
        }
    }

    pub fn codegen_expr(&mut self, expr: &Expression) -> Result<Value, CodegenError> {
        match expr {
            Expression::Number(value) => Ok(Value::Const(*value)),
            Expression::Variable(name) => match self.named_values.get(name) {
                Some(var) => Ok(*var),
                None => Err(CodegenError::UnknownVariable(name.clone())),
            },
            Expression::Binary(op, left, right) => {
                let lhs = self.codegen_expr(left)?;
                let rhs = self.codegen_expr(right)?;

                let value = match op {
                    '+' => self.builder.build_float_add(lhs, rhs, "addtmp")?,
                    '-' => self.builder.build_float_sub(lhs, rhs, "subtmp")?,
                    '*' => self.builder.build_float_mul(lhs, rhs, "multmp")?,
                    '<' => {
                        let cmp = self.builder.build_float_compare_ult(lhs, rhs, "cmptmp")?;
                        // there is no boolean type, comparisons yield 0.0 or 1.0
                        self.builder.build_unsigned_int_to_float(cmp, "booltmp")?
                    }
                    _ => return Err(CodegenError::InvalidOperator(*op)),
                };
                Ok(value)
            }
            Expression::Call(callee, args) => {
                let expected = match self.module.get_function(callee) {
                    Some(func) => func.count_params(),
                    None => return Err(CodegenError::UnknownFunction(callee.clone())),
                };
                if expected != args.len() {
                    return Err(CodegenError::ArityMismatch {
                        name: callee.clone(),
                        expected,
                        found: args.len(),
                    });
                }

                let mut gened_args = Vec::with_capacity(args.len());
                for arg in args {
                    gened_args.push(self.codegen_expr(arg)?);
                }

                let func = self
                    .module
                    .get_function(callee)
                    .ok_or_else(|| CodegenError::UnknownFunction(callee.clone()))?;
                Ok(self.builder.build_call(func, &gened_args, "calltmp")?)
            }
        }
    }

    fn function_name(&self, proto: &Prototype) -> String {
        if proto.is_anonymous() {
            self.module.unique_name(ANONYMOUS_FUNCTION)
        } else {
            proto.name.clone()
        }
    }

    /// Declares `name` unless it already exists with the same arity.
    fn declare(&mut self, name: &str, params: &[String]) -> Result<(), CodegenError> {
        match self.module.get_function(name) {
            Some(existing) if existing.count_params() != params.len() => {
                Err(CodegenError::ArityMismatch {
                    name: name.to_string(),
                    expected: existing.count_params(),
                    found: params.len(),
                })
            }
            Some(_) => Ok(()),
            None => {
                debug!("declaring {}({})", name, params.join(" "));
                self.module.add_function(name, params.to_vec());
                Ok(())
            }
        }
    }

    fn lookup(&self, name: &str) -> Result<&ir::Function, CodegenError> {
        self.module
            .get_function(name)
            .ok_or_else(|| CodegenError::UnknownFunction(name.to_string()))
    }

    pub fn compile_proto(&mut self, proto: &Prototype) -> Result<&ir::Function, CodegenError> {
        let name = self.function_name(proto);
        self.declare(&name, &proto.params)?;
        self.lookup(&name)
    }

    fn compile_body(&mut self, name: &str, proto: &Prototype, body: &Expression) -> Result<(), CodegenError> {
        let function = self
            .module
            .get_function_mut(name)
            .ok_or_else(|| CodegenError::UnknownFunction(name.to_string()))?;
        // a definition binds the names it was written with, not the declaration's
        function.set_param_names(proto.params.clone());
        let params = function.get_params();

        self.builder = Builder::for_function(function);
        let entry = self.builder.append_basic_block("entry");
        self.builder.position_at_end(entry);

        self.named_values.clear();
        self.named_values.reserve(proto.params.len());
        for (param, value) in proto.params.iter().zip(params) {
            self.named_values.insert(param.clone(), value);
        }

        let body = self.codegen_expr(body)?;
        self.builder.build_return(body)?;

        let body = std::mem::take(&mut self.builder).finish();
        let function = self
            .module
            .get_function_mut(name)
            .ok_or_else(|| CodegenError::UnknownFunction(name.to_string()))?;
        function.set_body(body);

        self.lookup(name)?
            .verify(&self.module)
            .map_err(|source| CodegenError::StructuralError {
                name: name.to_string(),
                source,
            })
    }

    pub fn compile_fn(&mut self, function: &Function) -> Result<&ir::Function, CodegenError> {
        let Function {
            prototype: proto,
            body,
        } = function;
        let name = self.function_name(proto);

        let declared_params = match self.module.get_function(&name) {
            Some(existing) if !existing.is_declaration() => {
                return Err(CodegenError::CannotRedefine(name))
            }
            Some(existing) => Some(existing.params().to_vec()),
            None => None,
        };
        self.declare(&name, &proto.params)?;

        if let Err(err) = self.compile_body(&name, proto, body) {
            self.named_values.clear();
            self.builder = Builder::new();
            match declared_params {
                Some(params) => {
                    warn!("restoring {} to a declaration: {}", name, err);
                    if let Some(existing) = self.module.get_function_mut(&name) {
                        existing.clear_body();
                        existing.set_param_names(params);
                    }
                }
                None => {
                    warn!("discarding {}: {}", name, err);
                    self.module.remove_function(&name);
                }
            }
            return Err(err);
        }

        debug!("defined {}", name);
        self.lookup(&name)
    }

    pub fn compile_node(&mut self, node: &ASTNode) -> Result<&ir::Function, CodegenError> {
        match node {
            ASTNode::Function(func) => self.compile_fn(func),
            ASTNode::Extern(proto) => self.compile_proto(proto),
        }
    }

    pub fn codegen(&mut self, ast_nodes: &[ASTNode]) -> Result<(), CodegenError> {
        for node in ast_nodes {
            self.compile_node(node)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::parser::Parser;

    fn compile(source: &str) -> (Codegen, Result<(), CodegenError>) {
        let ast = Parser::default().parse_str(source).unwrap();
        let mut codegen = Codegen::new("test");
        let res = codegen.codegen(&ast);
        (codegen, res)
    }

    #[test]
    fn codegen_works() {
        let (codegen, res) = compile("extern sin(x); def thing(x) sin(x) * x;");
        res.unwrap();
        assert_eq!(
            codegen.module.print_to_string(),
            "; ModuleID = 'test'\n\
             \n\
             declare double @sin(double %x)\n\
             \n\
             define double @thing(double %x) {\n\
             entry:\n\
             \x20 %calltmp = call double @sin(double %x)\n\
             \x20 %multmp = fmul double %calltmp, %x\n\
             \x20 ret double %multmp\n\
             }\n"
        );
    }

    #[test]
    fn definition_respects_precedence() {
        let (codegen, res) = compile("def foo(a b) a+b*2;");
        res.unwrap();
        let foo = codegen.module.get_function("foo").unwrap();
        assert_eq!(foo.count_params(), 2);
        assert_eq!(
            foo.to_string(),
            "define double @foo(double %a, double %b) {\n\
             entry:\n\
             \x20 %multmp = fmul double %b, 2.000000e+00\n\
             \x20 %addtmp = fadd double %a, %multmp\n\
             \x20 ret double %addtmp\n\
             }\n"
        );
    }

    #[test]
    fn comparison_converts_to_double() {
        let (codegen, res) = compile("def lt(a b) a < b;");
        res.unwrap();
        assert_eq!(
            codegen.module.get_function("lt").unwrap().to_string(),
            "define double @lt(double %a, double %b) {\n\
             entry:\n\
             \x20 %cmptmp = fcmp ult double %a, %b\n\
             \x20 %booltmp = uitofp i1 %cmptmp to double\n\
             \x20 ret double %booltmp\n\
             }\n"
        );
    }

    #[test]
    fn extern_is_declaration_only() {
        let (codegen, res) = compile("extern sin(x);");
        res.unwrap();
        let sin = codegen.module.get_function("sin").unwrap();
        assert!(sin.is_declaration());
        assert_eq!(sin.count_basic_blocks(), 0);
        assert_eq!(sin.count_params(), 1);
    }

    #[test]
    fn redeclaration_is_idempotent() {
        let (mut codegen, res) = compile("extern cos(x);");
        res.unwrap();
        let before = codegen.module.get_function("cos").unwrap().clone();
        let again = codegen
            .compile_proto(&Prototype::new("cos", vec!["x".to_string()]))
            .unwrap();
        assert_eq!(again, &before);
        assert_eq!(codegen.module.functions().count(), 1);
    }

    #[test]
    fn redeclaration_with_other_arity_fails() {
        let (mut codegen, res) = compile("extern cos(x);");
        res.unwrap();
        assert_eq!(
            codegen
                .compile_proto(&Prototype::new("cos", vec![]))
                .unwrap_err(),
            CodegenError::ArityMismatch {
                name: "cos".to_string(),
                expected: 1,
                found: 0,
            }
        );
    }

    #[test]
    fn cannot_redefine() {
        let (codegen, res) = compile("def foo(a) a; def foo(b) b;");
        assert_eq!(res, Err(CodegenError::CannotRedefine("foo".to_string())));
        // the first definition survives untouched
        let foo = codegen.module.get_function("foo").unwrap();
        assert!(!foo.is_declaration());
        assert_eq!(foo.params().to_vec(), vec!["a".to_string()]);
    }

    #[test]
    fn unknown_function() {
        let (codegen, res) = compile("bar(1)");
        assert_eq!(res, Err(CodegenError::UnknownFunction("bar".to_string())));
        assert_eq!(codegen.module.functions().count(), 0);
    }

    #[test]
    fn arity_mismatch() {
        let (_, res) = compile("def id(x) x; id(1, 2)");
        assert_eq!(
            res,
            Err(CodegenError::ArityMismatch {
                name: "id".to_string(),
                expected: 1,
                found: 2,
            })
        );
    }

    #[test]
    fn unknown_variable_removes_function() {
        let (codegen, res) = compile("def f(x) y;");
        assert_eq!(res, Err(CodegenError::UnknownVariable("y".to_string())));
        assert!(codegen.module.get_function("f").is_none());
    }

    #[test]
    fn parameters_do_not_leak_between_functions() {
        let (codegen, res) = compile("def f(x) x; def g(y) x;");
        assert_eq!(res, Err(CodegenError::UnknownVariable("x".to_string())));
        assert!(codegen.module.get_function("f").is_some());
        assert!(codegen.module.get_function("g").is_none());
    }

    #[test]
    fn failed_definition_keeps_declaration() {
        let (codegen, res) = compile("extern f(a); def f(b) c;");
        assert_eq!(res, Err(CodegenError::UnknownVariable("c".to_string())));
        let f = codegen.module.get_function("f").unwrap();
        assert!(f.is_declaration());
        assert_eq!(f.params().to_vec(), vec!["a".to_string()]);
    }

    #[test]
    fn definition_completes_declaration() {
        let (codegen, res) = compile("extern f(a); def f(b) b*b;");
        res.unwrap();
        let f = codegen.module.get_function("f").unwrap();
        assert!(!f.is_declaration());
        assert_eq!(f.params().to_vec(), vec!["b".to_string()]);
        assert_eq!(codegen.module.functions().count(), 1);
    }

    #[test]
    fn invalid_operator() {
        let mut parser = Parser::default();
        parser.set_precedence('/', 40);
        let ast = parser.parse_str("def half(x) x / 2;").unwrap();
        let mut codegen = Codegen::new("test");
        assert_eq!(codegen.codegen(&ast), Err(CodegenError::InvalidOperator('/')));
        assert!(codegen.module.get_function("half").is_none());
    }

    #[test]
    fn anonymous_functions_are_fresh() {
        let (mut codegen, res) = compile("4+5*6; 4+5*6;");
        res.unwrap();
        let names = codegen
            .module
            .functions()
            .map(|func| func.name().to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["__anon_expr", "__anon_expr.1"]);

        let wrapper = Function {
            prototype: Prototype::anonymous(),
            body: Expression::Number(1.0),
        };
        let third = codegen.compile_fn(&wrapper).unwrap();
        assert_eq!(third.name(), "__anon_expr.2");
        assert_eq!(third.count_params(), 0);
    }

    #[test]
    fn expression_outside_function_is_a_builder_error() {
        let mut codegen = Codegen::new("test");
        let expr = Expression::binary('+', Expression::Number(1.0), Expression::Number(2.0));
        assert_eq!(
            codegen.codegen_expr(&expr),
            Err(CodegenError::Builder(BuilderError::UnsetPosition))
        );
    }

    #[test]
    fn failed_definition_releases_the_builder() {
        let (mut codegen, res) = compile("def f(x) x*2 + y;");
        assert_eq!(res, Err(CodegenError::UnknownVariable("y".to_string())));
        let expr = Expression::binary('+', Expression::Number(1.0), Expression::Number(2.0));
        assert_eq!(
            codegen.codegen_expr(&expr),
            Err(CodegenError::Builder(BuilderError::UnsetPosition))
        );
        assert!(codegen.module.get_function("f").is_none());
    }

    #[test]
    fn module_verifies_after_codegen() {
        let (codegen, res) = compile("extern sin(x); def f(a b) sin(a) < b - 1; f(1, 2)");
        res.unwrap();
        assert_eq!(codegen.module.verify(), Ok(()));
    }
}
