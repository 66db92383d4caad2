//! Lowering: typed extended AST to core AST.
//!
//! Control flow becomes explicit labels, branches, and jumps; functions
//! (including nested ones) are hoisted to top level under fully-qualified
//! names; identifiers keep their resolved `(scope_distance, offsets)`
//! access patterns. Scope distances survive lowering because every scope
//! the resolver pushed corresponds to exactly one core block: branch and
//! loop-test scopes lower to wrapper blocks even when they hold no
//! declarations.

use std::collections::HashMap;
use std::fmt;

use aster_core::types::Type;
use aster_core::{Access, Block, Expr, Label, Lit, Param, Stmt};

use crate::ast::{Ast, NodeId, NodeKind};
use crate::scope::VarResolution;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LowerError {
    pub message: String,
}

impl LowerError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for LowerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lowering error: {}", self.message)
    }
}

impl std::error::Error for LowerError {}

/// Lowers a resolved and typechecked arena into a core module. The entry
/// function, named `main`, collects the top-level statements.
pub fn lower(ast: &Ast) -> Result<aster_core::Module, LowerError> {
    let mut lowerer = Lowerer {
        ast,
        functions: Vec::new(),
        fn_names: HashMap::new(),
        prefix: ast.module_name().unwrap_or_default(),
        fn_stack: Vec::new(),
        label_next: 0,
        temp_next: 0,
    };

    let root = ast.root_id();
    let body = lowerer.lower_function_body(root, true)?;
    let entry = aster_core::Function {
        name: "main".to_string(),
        params: Vec::new(),
        ret: Type::Void,
        body,
    };
    lowerer.functions.insert(0, entry);

    Ok(aster_core::Module {
        name: ast.module_name(),
        imports: ast.imports(),
        functions: lowerer.functions,
    })
}

struct Lowerer<'a> {
    ast: &'a Ast,
    functions: Vec<aster_core::Function>,
    /// Function node id to fully-qualified name, filled as definitions
    /// are encountered (always before their call sites).
    fn_names: HashMap<NodeId, String>,
    prefix: Vec<String>,
    fn_stack: Vec<String>,
    label_next: u32,
    temp_next: u32,
}

impl Lowerer<'_> {
    fn fresh_label(&mut self) -> Label {
        let label = Label(self.label_next);
        self.label_next += 1;
        label
    }

    fn fresh_temp(&mut self) -> String {
        let name = format!("$v{}", self.temp_next);
        self.temp_next += 1;
        name
    }

    fn qualified(&self, name: &str) -> String {
        let mut parts: Vec<&str> = self.prefix.iter().map(String::as_str).collect();
        parts.extend(self.fn_stack.iter().map(String::as_str));
        parts.push(name);
        parts.join(".")
    }

    fn node_ty(&self, node: NodeId) -> Result<Type, LowerError> {
        self.ast
            .get_node(node)
            .ty
            .clone()
            .ok_or_else(|| LowerError::new("node reached lowering without a type"))
    }

    /// Lowers the statement children of a function body (or the root
    /// block) into a core block, hoisting nested functions.
    fn lower_function_body(&mut self, block: NodeId, is_root: bool) -> Result<Block, LowerError> {
        let children = self.ast.get_node(block).children.clone();
        let mut stmts = Vec::new();
        let mut result = None;

        for (index, &child) in children.iter().enumerate() {
            let kind = self.ast.get_node(child).kind;
            match kind {
                NodeKind::ModuleDeclaration
                | NodeKind::ImportDeclaration
                | NodeKind::ExportStmt
                | NodeKind::TypeDefinition => {}
                NodeKind::Function => {
                    self.lower_function(child)?;
                }
                _ => {
                    let last = index + 1 == children.len();
                    self.lower_stmt(child, last && !is_root, &mut stmts, &mut result)?;
                }
            }
        }
        Ok(Block {
            stmts,
            result: result.map(Box::new),
        })
    }

    fn lower_function(&mut self, node: NodeId) -> Result<(), LowerError> {
        let children = self.ast.get_node(node).children.clone();
        let (name_node, from, _to, body) = match children.as_slice() {
            [name, from, to, body] => (Some(*name), *from, *to, *body),
            [from, to, body] => (None, *from, *to, *body),
            _ => return Err(LowerError::new("malformed function")),
        };

        let simple = match name_node {
            Some(name_node) => self.ast.identifier(name_node).full(),
            None => format!("$fn{}", self.functions.len()),
        };
        let fq = self.qualified(&simple);
        self.fn_names.insert(node, fq.clone());

        let params = self.lower_params(from)?;
        let ret = match self.node_ty(node)? {
            Type::Function { to, .. } => *to,
            other => {
                return Err(LowerError::new(format!(
                    "function node carries non-function type {other}"
                )))
            }
        };

        // Fresh per-function label and temp spaces.
        let saved_labels = std::mem::replace(&mut self.label_next, 0);
        let saved_temps = std::mem::replace(&mut self.temp_next, 0);
        self.fn_stack.push(simple);
        let body = self.lower_function_body(body, false)?;
        self.fn_stack.pop();
        self.label_next = saved_labels;
        self.temp_next = saved_temps;

        self.functions.push(aster_core::Function {
            name: fq,
            params,
            ret,
            body,
        });
        Ok(())
    }

    fn lower_params(&mut self, from: NodeId) -> Result<Vec<Param>, LowerError> {
        let mut params = Vec::new();
        let mut push = |lowerer: &Self, decl: NodeId| -> Result<(), LowerError> {
            let children = lowerer.ast.get_node(decl).children.clone();
            let [id, _ty] = children.as_slice() else {
                return Err(LowerError::new("malformed parameter declaration"));
            };
            params.push(Param {
                name: lowerer.ast.identifier(*id).full(),
                ty: lowerer.node_ty(decl)?,
            });
            Ok(())
        };
        match self.ast.get_node(from).kind {
            NodeKind::Declaration => push(self, from)?,
            NodeKind::Tuple | NodeKind::TypeTuple => {
                for decl in self.ast.get_node(from).children.clone() {
                    push(self, decl)?;
                }
            }
            other => {
                return Err(LowerError::new(format!(
                    "invalid function parameter list {other:?}"
                )))
            }
        }
        Ok(params)
    }

    /// Lowers a block-child node into statements, or into the block
    /// result when it is the value-producing tail.
    fn lower_stmt(
        &mut self,
        node: NodeId,
        is_tail: bool,
        stmts: &mut Vec<Stmt>,
        result: &mut Option<Expr>,
    ) -> Result<(), LowerError> {
        let kind = self.ast.get_node(node).kind;
        match kind {
            NodeKind::Assignment => self.lower_assignment(node, stmts),
            NodeKind::WhileLoop => self.lower_while(node, stmts),
            NodeKind::Function => self.lower_function(node),
            NodeKind::ModuleDeclaration
            | NodeKind::ImportDeclaration
            | NodeKind::ExportStmt
            | NodeKind::TypeDefinition => Ok(()),
            NodeKind::IfStatement if self.node_ty(node)? == Type::Void => {
                self.lower_if_stmt(node, stmts)
            }
            NodeKind::Match if self.node_ty(node)? == Type::Void => {
                self.lower_match_stmt(node, stmts)
            }
            NodeKind::BlockResult => {
                let child = self.ast.get_node(node).children[0];
                let expr = self.lower_expr(child, stmts)?;
                *result = Some(expr);
                Ok(())
            }
            _ => {
                let ty = self.node_ty(node)?;
                let expr = self.lower_expr(node, stmts)?;
                if is_tail && ty != Type::Void && ty != Type::Unset {
                    *result = Some(expr);
                } else {
                    stmts.push(Stmt::Eval(expr));
                }
                Ok(())
            }
        }
    }

    fn lower_assignment(&mut self, node: NodeId, stmts: &mut Vec<Stmt>) -> Result<(), LowerError> {
        let children = self.ast.get_node(node).children.clone();
        let (lhs, rhs) = match children.as_slice() {
            [lhs, rhs] => (*lhs, *rhs),
            [lhs, _ty, rhs] => (*lhs, *rhs),
            _ => return Err(LowerError::new("malformed assignment")),
        };

        match self.ast.get_node(lhs).kind {
            NodeKind::Identifier => {
                let name = self.ast.identifier(lhs).full();
                let ty = self.node_ty(lhs)?;
                let value = self.lower_expr(rhs, stmts)?;
                stmts.push(Stmt::Declare {
                    name: name.clone(),
                    ty,
                });
                stmts.push(Stmt::Set {
                    target: Access::local(),
                    name,
                    value,
                });
                Ok(())
            }
            NodeKind::IdentifierTuple => self.lower_tuple_assignment(lhs, rhs, stmts),
            other => Err(LowerError::new(format!(
                "invalid assignment target {other:?}"
            ))),
        }
    }

    fn lower_tuple_assignment(
        &mut self,
        lhs: NodeId,
        rhs: NodeId,
        stmts: &mut Vec<Stmt>,
    ) -> Result<(), LowerError> {
        let parts = self.ast.get_node(lhs).children.clone();

        // Elementwise when the right-hand side is literally a tuple;
        // otherwise store the whole product once and project.
        if self.ast.get_node(rhs).kind == NodeKind::Tuple
            && self.ast.get_node(rhs).children.len() == parts.len()
        {
            let values = self.ast.get_node(rhs).children.clone();
            for (&part, &value) in parts.iter().zip(values.iter()) {
                if self.ast.get_node(part).kind == NodeKind::IdentifierTuple {
                    self.lower_tuple_assignment(part, value, stmts)?;
                    continue;
                }
                let name = self.ast.identifier(part).full();
                let ty = self.node_ty(part)?;
                let value = self.lower_expr(value, stmts)?;
                stmts.push(Stmt::Declare {
                    name: name.clone(),
                    ty,
                });
                stmts.push(Stmt::Set {
                    target: Access::local(),
                    name,
                    value,
                });
            }
            return Ok(());
        }

        let whole_ty = self.node_ty(lhs)?;
        let temp = self.fresh_temp();
        let value = self.lower_expr(rhs, stmts)?;
        stmts.push(Stmt::Declare {
            name: temp.clone(),
            ty: whole_ty.clone(),
        });
        stmts.push(Stmt::Set {
            target: Access::local(),
            name: temp.clone(),
            value,
        });
        for (index, &part) in parts.iter().enumerate() {
            if self.ast.get_node(part).kind != NodeKind::Identifier {
                return Err(LowerError::new(
                    "nested identifier tuples require a tuple initializer",
                ));
            }
            let name = self.ast.identifier(part).full();
            let ty = self.node_ty(part)?;
            stmts.push(Stmt::Declare {
                name: name.clone(),
                ty: ty.clone(),
            });
            stmts.push(Stmt::Set {
                target: Access::local(),
                name,
                value: Expr::Var {
                    access: Access {
                        distance: 0,
                        offsets: vec![index as u32],
                    },
                    name: temp.clone(),
                    ty,
                },
            });
        }
        Ok(())
    }

    fn lower_while(&mut self, node: NodeId, stmts: &mut Vec<Stmt>) -> Result<(), LowerError> {
        let children = self.ast.get_node(node).children.clone();
        let [test, body] = children.as_slice() else {
            return Err(LowerError::new("malformed while loop"));
        };
        let start = self.fresh_label();
        let end = self.fresh_label();

        stmts.push(Stmt::Mark(start));
        // The loop test owns a scope of its own; wrap it in a block so
        // the generator pushes a matching frame. A block test already is
        // that scope and needs no wrapper.
        let cond = if self.ast.get_node(*test).kind == NodeKind::Block {
            let mut inner = Vec::new();
            self.lower_expr(*test, &mut inner)?
        } else {
            self.lower_scoped_expr(*test)?
        };
        stmts.push(Stmt::Branch {
            cond,
            on_zero: end,
        });
        let body = self.lower_expr(*body, stmts)?;
        stmts.push(Stmt::Eval(body));
        stmts.push(Stmt::Jump(start));
        stmts.push(Stmt::Mark(end));
        Ok(())
    }

    /// Wraps an expression in a block of its own, mirroring a scope the
    /// resolver pushed around it.
    fn lower_scoped_expr(&mut self, node: NodeId) -> Result<Expr, LowerError> {
        let mut inner = Vec::new();
        let expr = self.lower_expr(node, &mut inner)?;
        Ok(Expr::Block(Block {
            stmts: inner,
            result: Some(Box::new(expr)),
        }))
    }

    fn if_arms(&self, node: NodeId) -> (Vec<(NodeId, NodeId)>, Option<NodeId>) {
        let children = self.ast.get_node(node).children.clone();
        let mut pairs = Vec::new();
        let mut rest = children.as_slice();
        while let [test, arm, tail @ ..] = rest {
            pairs.push((*test, *arm));
            rest = tail;
        }
        let else_arm = match rest {
            [only] => Some(*only),
            _ => None,
        };
        (pairs, else_arm)
    }

    fn lower_if_stmt(&mut self, node: NodeId, stmts: &mut Vec<Stmt>) -> Result<(), LowerError> {
        let (pairs, else_arm) = self.if_arms(node);
        let end = self.fresh_label();
        for (test, arm) in pairs {
            let next = self.fresh_label();
            let cond = self.lower_expr(test, stmts)?;
            stmts.push(Stmt::Branch {
                cond,
                on_zero: next,
            });
            let arm = self.lower_expr(arm, stmts)?;
            stmts.push(Stmt::Eval(arm));
            stmts.push(Stmt::Jump(end));
            stmts.push(Stmt::Mark(next));
        }
        if let Some(else_arm) = else_arm {
            let arm = self.lower_expr(else_arm, stmts)?;
            stmts.push(Stmt::Eval(arm));
        }
        stmts.push(Stmt::Mark(end));
        Ok(())
    }

    fn lower_if_expr(&mut self, node: NodeId, stmts: &mut Vec<Stmt>) -> Result<Expr, LowerError> {
        let ty = self.node_ty(node)?;
        let (pairs, else_arm) = self.if_arms(node);
        let Some(else_arm) = else_arm else {
            return Err(LowerError::new(
                "an if expression used for its value requires an else arm",
            ));
        };

        let temp = self.fresh_temp();
        stmts.push(Stmt::Declare {
            name: temp.clone(),
            ty: ty.clone(),
        });
        let end = self.fresh_label();
        for (test, arm) in pairs {
            let next = self.fresh_label();
            let cond = self.lower_expr(test, stmts)?;
            stmts.push(Stmt::Branch {
                cond,
                on_zero: next,
            });
            let value = self.lower_expr(arm, stmts)?;
            stmts.push(Stmt::Set {
                target: Access::local(),
                name: temp.clone(),
                value,
            });
            stmts.push(Stmt::Jump(end));
            stmts.push(Stmt::Mark(next));
        }
        let value = self.lower_expr(else_arm, stmts)?;
        stmts.push(Stmt::Set {
            target: Access::local(),
            name: temp.clone(),
            value,
        });
        stmts.push(Stmt::Mark(end));

        Ok(Expr::Var {
            access: Access::local(),
            name: temp,
            ty,
        })
    }

    fn match_parts(&self, node: NodeId) -> Result<(NodeId, Vec<(NodeId, NodeId)>), LowerError> {
        let children = self.ast.get_node(node).children.clone();
        let Some((&scrutinee, branches)) = children.split_first() else {
            return Err(LowerError::new("malformed match"));
        };
        let mut arms = Vec::with_capacity(branches.len());
        for &branch in branches {
            let branch_children = self.ast.get_node(branch).children.clone();
            let [test, body] = branch_children.as_slice() else {
                return Err(LowerError::new("malformed match branch"));
            };
            arms.push((*test, *body));
        }
        Ok((scrutinee, arms))
    }

    fn lower_match_stmt(&mut self, node: NodeId, stmts: &mut Vec<Stmt>) -> Result<(), LowerError> {
        let (scrutinee, arms) = self.match_parts(node)?;
        let value = self.lower_expr(scrutinee, stmts)?;
        stmts.push(Stmt::Eval(value));

        let end = self.fresh_label();
        for (test, body) in arms {
            let next = self.fresh_label();
            // Branch scopes lower to wrapper blocks around both the test
            // and the body.
            let cond = self.lower_scoped_expr(test)?;
            stmts.push(Stmt::Branch {
                cond,
                on_zero: next,
            });
            let body = self.lower_scoped_expr(body)?;
            stmts.push(Stmt::Eval(body));
            stmts.push(Stmt::Jump(end));
            stmts.push(Stmt::Mark(next));
        }
        stmts.push(Stmt::Mark(end));
        Ok(())
    }

    fn lower_match_expr(&mut self, node: NodeId, stmts: &mut Vec<Stmt>) -> Result<Expr, LowerError> {
        let ty = self.node_ty(node)?;
        let (scrutinee, arms) = self.match_parts(node)?;
        let value = self.lower_expr(scrutinee, stmts)?;
        stmts.push(Stmt::Eval(value));

        let temp = self.fresh_temp();
        stmts.push(Stmt::Declare {
            name: temp.clone(),
            ty: ty.clone(),
        });
        let end = self.fresh_label();
        for (test, body) in arms {
            let next = self.fresh_label();
            let cond = self.lower_scoped_expr(test)?;
            stmts.push(Stmt::Branch {
                cond,
                on_zero: next,
            });
            let value = self.lower_scoped_expr(body)?;
            stmts.push(Stmt::Set {
                target: Access::local(),
                name: temp.clone(),
                value,
            });
            stmts.push(Stmt::Jump(end));
            stmts.push(Stmt::Mark(next));
        }
        stmts.push(Stmt::Mark(end));

        Ok(Expr::Var {
            access: Access::local(),
            name: temp,
            ty,
        })
    }

    fn lower_expr(&mut self, node: NodeId, stmts: &mut Vec<Stmt>) -> Result<Expr, LowerError> {
        let kind = self.ast.get_node(node).kind;
        match kind {
            NodeKind::Identifier => {
                let ident = self.ast.identifier(node).clone();
                let distance = ident.scope_distance.ok_or_else(|| {
                    LowerError::new(format!("`{}` was not resolved", ident.full()))
                })?;
                // The binding is named by the head segment; the offsets
                // carry the projection path.
                Ok(Expr::Var {
                    access: Access {
                        distance,
                        offsets: ident.offsets.clone().unwrap_or_default(),
                    },
                    name: ident.head().to_string(),
                    ty: self.node_ty(node)?,
                })
            }
            NodeKind::Number => {
                let value = self.ast.number(node).value;
                let ty = self.node_ty(node)?;
                let int_kind = ty.int_kind().ok_or_else(|| {
                    LowerError::new(format!("number literal has non-integer type {ty}"))
                })?;
                Ok(Expr::Lit(Lit::Int {
                    value,
                    kind: int_kind,
                }))
            }
            NodeKind::String => Ok(Expr::Lit(Lit::Str(self.ast.string(node).0.clone()))),
            NodeKind::Boolean => Ok(Expr::Lit(Lit::Bool(self.ast.boolean(node).0))),
            NodeKind::Block => {
                let block = self.lower_block(node)?;
                Ok(Expr::Block(block))
            }
            NodeKind::BlockResult => {
                let child = self.ast.get_node(node).children[0];
                self.lower_expr(child, stmts)
            }
            NodeKind::FunctionCall => self.lower_call(node, stmts),
            NodeKind::Tuple => {
                let children = self.ast.get_node(node).children.clone();
                let mut items = Vec::with_capacity(children.len());
                for child in children {
                    items.push(self.lower_expr(child, stmts)?);
                }
                Ok(Expr::Tuple {
                    items,
                    ty: self.node_ty(node)?,
                })
            }
            NodeKind::ArrayValue => {
                let children = self.ast.get_node(node).children.clone();
                let mut items = Vec::with_capacity(children.len());
                for child in children {
                    items.push(self.lower_expr(child, stmts)?);
                }
                let elem_ty = match self.node_ty(node)? {
                    Type::Array { elem, .. } => *elem,
                    other => {
                        return Err(LowerError::new(format!(
                            "array literal has non-array type {other}"
                        )))
                    }
                };
                Ok(Expr::ArrayValue { items, elem_ty })
            }
            NodeKind::ArrayIndex => {
                let children = self.ast.get_node(node).children.clone();
                let [base, index] = children.as_slice() else {
                    return Err(LowerError::new("malformed array index"));
                };
                if self.ast.get_node(*index).kind != NodeKind::Number {
                    return Err(LowerError::new(
                        "array indices must be number literals in this backend",
                    ));
                }
                let value = self.ast.number(*index).value;
                let index_u32 = u32::try_from(value).map_err(|_| {
                    LowerError::new(format!("array index {value} out of range"))
                })?;
                let base = self.lower_expr(*base, stmts)?;
                Ok(Expr::ArrayIndex {
                    base: Box::new(base),
                    index: index_u32,
                    elem_ty: self.node_ty(node)?,
                })
            }
            NodeKind::Reference => {
                let child = self.ast.get_node(node).children[0];
                let inner = self.lower_expr(child, stmts)?;
                Ok(Expr::Reference {
                    inner: Box::new(inner),
                })
            }
            NodeKind::IfStatement => self.lower_if_expr(node, stmts),
            NodeKind::Match => self.lower_match_expr(node, stmts),
            _ if kind.is_binary_op() => {
                let op = kind.binary_op().expect("checked");
                let children = self.ast.get_node(node).children.clone();
                let [lhs, rhs] = children.as_slice() else {
                    return Err(LowerError::new("malformed binary operator"));
                };
                let operand_ty = self.node_ty(*lhs)?;
                let int_kind = operand_ty.int_kind().ok_or_else(|| {
                    LowerError::new(format!(
                        "binary operands must be integers, found {operand_ty}"
                    ))
                })?;
                let lhs = self.lower_expr(*lhs, stmts)?;
                let rhs = self.lower_expr(*rhs, stmts)?;
                Ok(Expr::Binary {
                    op,
                    kind: int_kind,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                })
            }
            other => Err(LowerError::new(format!(
                "unsupported node kind {other:?} in expression position"
            ))),
        }
    }

    /// Lowers a block node (one pushed scope) into a core block.
    fn lower_block(&mut self, node: NodeId) -> Result<Block, LowerError> {
        let children = self.ast.get_node(node).children.clone();
        let mut stmts = Vec::new();
        let mut result = None;
        for (index, &child) in children.iter().enumerate() {
            let last = index + 1 == children.len();
            self.lower_stmt(child, last, &mut stmts, &mut result)?;
        }
        Ok(Block {
            stmts,
            result: result.map(Box::new),
        })
    }

    fn lower_call(&mut self, node: NodeId, stmts: &mut Vec<Stmt>) -> Result<Expr, LowerError> {
        let children = self.ast.get_node(node).children.clone();
        let [callee, args] = children.as_slice() else {
            return Err(LowerError::new("malformed function call"));
        };
        let (callee, args) = (*callee, *args);

        // Constructors are layout identities: the value is the argument
        // tuple itself.
        let callee_ty = self.node_ty(callee)?;
        if matches!(callee_ty, Type::Nominal { .. }) {
            return self.lower_expr(args, stmts);
        }

        let fq = self.callee_name(callee)?;
        let arg = self.lower_expr(args, stmts)?;
        Ok(Expr::Call {
            callee: fq,
            arg: Box::new(arg),
            arg_ty: self.node_ty(args)?,
            ret_ty: self.node_ty(node)?,
        })
    }

    /// The fully-qualified name a call site targets.
    fn callee_name(&self, callee: NodeId) -> Result<String, LowerError> {
        let ident = self.ast.identifier(callee).clone();
        let ns = self
            .ast
            .get_node(callee)
            .name_scope
            .ok_or_else(|| LowerError::new("call site was not annotated"))?;

        if ident.is_simple() {
            match self.ast.resolve_variable(ns, ident.head()) {
                VarResolution::Found(lookup) => {
                    let decl = lookup.declaration_node;
                    if let Some(fq) = self.fn_names.get(&decl) {
                        return Ok(fq.clone());
                    }
                    match self.ast.get_node(decl).kind {
                        NodeKind::Declaration => Ok(self.ast.identifier(
                            self.ast.get_node(decl).children[0],
                        )
                        .full()),
                        _ => Err(LowerError::new(format!(
                            "`{}` is not directly callable; indirect calls are not supported",
                            ident.full()
                        ))),
                    }
                }
                _ => Err(LowerError::new(format!(
                    "cannot resolve callee `{}`",
                    ident.full()
                ))),
            }
        } else {
            // Module-qualified callees are addressed by their written
            // fully-qualified name.
            Ok(ident.full())
        }
    }
}
