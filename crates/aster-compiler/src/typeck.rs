//! Type checking: bottom-up elaboration with targeted constraints.
//!
//! Every node receives a fully-elaborated structural type. Where the
//! context fixes a type (a declared annotation, a callee's parameter
//! type, a function's return type, the first arm of an `if`), that
//! expectation is threaded downward so unsuffixed number literals can
//! adopt the expected integer width. Everything else is checked bottom-up
//! and compared for deep structural equality.

use std::fmt;

use aster_core::types::{IntKind, Type};

use crate::ast::{Ast, NodeId, NodeKind};
use crate::scope::ScopeId;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeError {
    pub message: String,
}

impl TypeError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "typecheck error: {}", self.message)
    }
}

impl std::error::Error for TypeError {}

/// Typechecks the whole arena. Must run after resolution.
pub fn typecheck(ast: &mut Ast) -> Result<(), TypeError> {
    let root = ast.root_id();
    let mut checker = Checker { ast };
    checker.check(root, None)?;
    Ok(())
}

struct Checker<'a> {
    ast: &'a mut Ast,
}

impl Checker<'_> {
    fn type_scope_of(&self, node: NodeId) -> Result<ScopeId, TypeError> {
        self.ast.get_node(node).type_scope.ok_or_else(|| {
            TypeError::new("node was not annotated by the resolver")
        })
    }

    fn set_ty(&mut self, node: NodeId, ty: Type) -> Type {
        self.ast.get_node_mut(node).ty = Some(ty.clone());
        ty
    }

    fn check(&mut self, node: NodeId, expected: Option<&Type>) -> Result<Type, TypeError> {
        let kind = self.ast.get_node(node).kind;
        match kind {
            NodeKind::Block => self.check_block(node, expected),
            NodeKind::BlockResult => {
                let child = self.only_child(node)?;
                let ty = self.check(child, expected)?;
                Ok(self.set_ty(node, ty))
            }
            NodeKind::Assignment => self.check_assignment(node),
            NodeKind::Declaration => self.check_declaration(node),
            NodeKind::Function => self.check_function(node),
            NodeKind::FunctionCall => self.check_call(node),
            NodeKind::IfStatement => self.check_if(node),
            NodeKind::Match => self.check_match(node),
            NodeKind::WhileLoop => self.check_while(node),
            NodeKind::Identifier => self.check_identifier(node),
            NodeKind::Tuple => self.check_tuple(node, expected),
            NodeKind::ArrayValue => self.check_array_value(node, expected),
            NodeKind::ArrayIndex => self.check_array_index(node),
            NodeKind::Reference => self.check_reference(node, expected),
            NodeKind::Number => self.check_number(node, expected),
            NodeKind::String => Ok(self.set_ty(node, Type::Str)),
            NodeKind::Boolean => Ok(self.set_ty(node, Type::Bool)),
            NodeKind::TypeDefinition => self.check_type_definition(node),
            NodeKind::ExportStmt
            | NodeKind::ModuleDeclaration
            | NodeKind::ImportDeclaration => Ok(self.set_ty(node, Type::Void)),
            NodeKind::TypeAtom
            | NodeKind::TypeTuple
            | NodeKind::FunctionType
            | NodeKind::ReferenceType
            | NodeKind::ArrayType
            | NodeKind::Record
            | NodeKind::RecordElement => self.elab_type_expr(node),
            _ if kind.is_binary_op() => self.check_binary(node, expected),
            other => Err(TypeError::new(format!(
                "unsupported node kind {other:?} during type checking"
            ))),
        }
    }

    fn only_child(&self, node: NodeId) -> Result<NodeId, TypeError> {
        self.ast
            .get_node(node)
            .children
            .first()
            .copied()
            .ok_or_else(|| TypeError::new("malformed node: missing child"))
    }

    fn check_block(&mut self, node: NodeId, expected: Option<&Type>) -> Result<Type, TypeError> {
        let children = self.ast.get_node(node).children.clone();
        let mut last = Type::Unset;
        for (index, child) in children.iter().enumerate() {
            let constraint = if index + 1 == children.len() {
                expected
            } else {
                None
            };
            last = self.check(*child, constraint)?;
        }
        Ok(self.set_ty(node, last))
    }

    fn check_assignment(&mut self, node: NodeId) -> Result<Type, TypeError> {
        let children = self.ast.get_node(node).children.clone();
        let (lhs, type_expr, rhs) = match children.as_slice() {
            [lhs, rhs] => (*lhs, None, *rhs),
            [lhs, ty, rhs] => (*lhs, Some(*ty), *rhs),
            _ => return Err(TypeError::new("malformed assignment")),
        };

        let declared = match type_expr {
            Some(ty) => Some(self.elab_type_expr(ty)?),
            None => None,
        };
        let value_ty = self.check(rhs, declared.as_ref())?;
        if let Some(declared) = &declared {
            if *declared != value_ty {
                return Err(TypeError::new(format!(
                    "type mismatch in assignment: expected {declared}, found {value_ty}"
                )));
            }
        }
        let bound = declared.unwrap_or(value_ty);
        self.bind_target(lhs, &bound)?;
        Ok(self.set_ty(node, Type::Void))
    }

    /// Binds an assignment target to `ty`, elementwise for identifier
    /// tuples.
    fn bind_target(&mut self, lhs: NodeId, ty: &Type) -> Result<(), TypeError> {
        match self.ast.get_node(lhs).kind {
            NodeKind::Identifier => {
                let ts = self.type_scope_of(lhs)?;
                let name = self.ast.identifier(lhs).full();
                self.ast.get_type_scope_mut(ts).set_type(&name, ty.clone());
                self.set_ty(lhs, ty.clone());
                Ok(())
            }
            NodeKind::IdentifierTuple => {
                let parts = self.ast.get_node(lhs).children.clone();
                let elems = match ty {
                    Type::Product(elems) if elems.len() == parts.len() => elems.clone(),
                    other => {
                        return Err(TypeError::new(format!(
                            "tuple assignment of {} names requires a product of the same arity, found {other}",
                            parts.len()
                        )))
                    }
                };
                self.set_ty(lhs, ty.clone());
                for (part, elem) in parts.iter().zip(elems.iter()) {
                    self.bind_target(*part, elem)?;
                }
                Ok(())
            }
            other => Err(TypeError::new(format!("invalid assignment target {other:?}"))),
        }
    }

    fn check_declaration(&mut self, node: NodeId) -> Result<Type, TypeError> {
        let children = self.ast.get_node(node).children.clone();
        let [id, type_expr] = children.as_slice() else {
            return Err(TypeError::new("malformed declaration"));
        };
        let (id, type_expr) = (*id, *type_expr);
        let ty = self.elab_type_expr(type_expr)?;
        let ts = self.type_scope_of(id)?;
        let name = self.ast.identifier(id).full();
        self.ast.get_type_scope_mut(ts).set_type(&name, ty.clone());
        self.set_ty(id, ty.clone());
        Ok(self.set_ty(node, ty))
    }

    fn check_function(&mut self, node: NodeId) -> Result<Type, TypeError> {
        let children = self.ast.get_node(node).children.clone();
        let (name_node, from, to, body) = match children.as_slice() {
            [name, from, to, body] => (Some(*name), *from, *to, *body),
            [from, to, body] => (None, *from, *to, *body),
            _ => return Err(TypeError::new("malformed function")),
        };

        let from_ty = self.check_params(from)?;
        let to_ty = self.elab_type_expr(to)?;
        let fn_ty = Type::function(from_ty, to_ty.clone());

        // Bind the function's name in the enclosing scope before checking
        // the body so self-recursive calls resolve. The name node carries
        // the enclosing scope; the function node carries its own.
        if let Some(name_node) = name_node {
            let ts = self.type_scope_of(name_node)?;
            let name = self.ast.identifier(name_node).full();
            self.ast.get_type_scope_mut(ts).set_type(&name, fn_ty.clone());
            self.set_ty(name_node, fn_ty.clone());
        }

        let body_ty = self.check(body, Some(&to_ty))?;
        if body_ty != to_ty {
            return Err(TypeError::new(format!(
                "function body has type {body_ty} but declares return type {to_ty}"
            )));
        }
        Ok(self.set_ty(node, fn_ty))
    }

    /// Elaborates a parameter list: a single declaration keeps its bare
    /// type, a tuple of declarations becomes a product.
    fn check_params(&mut self, from: NodeId) -> Result<Type, TypeError> {
        match self.ast.get_node(from).kind {
            NodeKind::Declaration => self.check_declaration(from),
            NodeKind::Tuple | NodeKind::TypeTuple => {
                let params = self.ast.get_node(from).children.clone();
                let mut elems = Vec::with_capacity(params.len());
                for param in params {
                    elems.push(self.check_declaration(param)?);
                }
                Ok(self.set_ty(from, Type::Product(elems)))
            }
            other => Err(TypeError::new(format!(
                "invalid function parameter list {other:?}"
            ))),
        }
    }

    fn check_call(&mut self, node: NodeId) -> Result<Type, TypeError> {
        let children = self.ast.get_node(node).children.clone();
        let [callee, args] = children.as_slice() else {
            return Err(TypeError::new("malformed function call"));
        };
        let (callee, args) = (*callee, *args);

        let ts = self.type_scope_of(node)?;
        let ident = self.ast.identifier(callee).clone();
        if let Some(callee_ty) = self.callee_type(ts, &ident) {
            let Type::Function { from, to } = &callee_ty else {
                return Err(TypeError::new(format!(
                    "`{}` has type {callee_ty} and cannot be called",
                    ident.full()
                )));
            };
            let arg_ty = self.check(args, Some(from))?;
            if !argument_matches(&arg_ty, from) {
                return Err(TypeError::new(format!(
                    "call of `{}` with arguments {arg_ty} does not match parameters {from}",
                    ident.full()
                )));
            }
            self.set_ty(callee, callee_ty.clone());
            return Ok(self.set_ty(node, to.as_ref().clone()));
        }

        // Constructor form: the callee names a defined type.
        if let Some(nominal) = self.constructor_type(ts, &ident) {
            let Type::Nominal { inner, .. } = &nominal else {
                return Err(TypeError::new(format!(
                    "`{}` does not name a constructible type",
                    ident.full()
                )));
            };
            let arg_ty = self.check(args, Some(inner))?;
            if !argument_matches(&arg_ty, inner) {
                return Err(TypeError::new(format!(
                    "constructor `{}` expects {inner}, found {arg_ty}",
                    ident.full()
                )));
            }
            self.set_ty(callee, nominal.clone());
            return Ok(self.set_ty(node, nominal));
        }

        Err(TypeError::new(format!(
            "cannot resolve callee `{}`",
            ident.full()
        )))
    }

    fn callee_type(&self, ts: ScopeId, ident: &crate::ast::Identifier) -> Option<Type> {
        if ident.is_simple() {
            return self.ast.type_of_variable(ts, ident.head()).map(|(_, ty)| ty);
        }
        for split in (1..ident.segments.len()).rev() {
            let (path, tail) = ident.segments.split_at(split);
            if tail.len() != 1 {
                continue;
            }
            if let Some((_, ty)) = self.ast.qualified_type_of_variable(ts, path, &tail[0]) {
                return Some(ty);
            }
        }
        None
    }

    fn constructor_type(&self, ts: ScopeId, ident: &crate::ast::Identifier) -> Option<Type> {
        if ident.is_simple() {
            return self.ast.lookup_type(ts, ident.head());
        }
        for split in (1..ident.segments.len()).rev() {
            let (path, tail) = ident.segments.split_at(split);
            if tail.len() != 1 {
                continue;
            }
            if let Some(ty) = self.ast.lookup_qualified_type(ts, path, &tail[0]) {
                return Some(ty);
            }
        }
        None
    }

    fn check_if(&mut self, node: NodeId) -> Result<Type, TypeError> {
        let children = self.ast.get_node(node).children.clone();
        let mut rest = children.as_slice();
        let mut common: Option<Type> = None;
        let mut has_else = false;

        while let [test, arm, tail @ ..] = rest {
            let test_ty = self.check(*test, Some(&Type::Bool))?;
            if test_ty != Type::Bool {
                return Err(TypeError::new(format!(
                    "if test must be boolean, found {test_ty}"
                )));
            }
            let arm_ty = self.check(*arm, common.as_ref())?;
            common = Some(self.merge_branch_type(common, arm_ty)?);
            rest = tail;
        }
        if let [else_arm] = rest {
            has_else = true;
            let arm_ty = self.check(*else_arm, common.as_ref())?;
            common = Some(self.merge_branch_type(common, arm_ty)?);
        }

        // Without an else arm the statement has no value.
        let ty = if has_else {
            common.unwrap_or(Type::Void)
        } else {
            Type::Void
        };
        Ok(self.set_ty(node, ty))
    }

    fn merge_branch_type(&self, common: Option<Type>, arm: Type) -> Result<Type, TypeError> {
        match common {
            None => Ok(arm),
            Some(common) if common == arm => Ok(common),
            Some(common) => Err(TypeError::new(format!(
                "branches must share one type: {common} vs {arm}"
            ))),
        }
    }

    fn check_match(&mut self, node: NodeId) -> Result<Type, TypeError> {
        let children = self.ast.get_node(node).children.clone();
        let Some((&scrutinee, branches)) = children.split_first() else {
            return Err(TypeError::new("malformed match"));
        };
        self.check(scrutinee, None)?;

        let mut common: Option<Type> = None;
        for &branch in branches {
            let branch_children = self.ast.get_node(branch).children.clone();
            let [test, body] = branch_children.as_slice() else {
                return Err(TypeError::new("malformed match branch"));
            };
            let test_ty = self.check(*test, Some(&Type::Bool))?;
            if test_ty != Type::Bool {
                return Err(TypeError::new(format!(
                    "match branch test must be boolean, found {test_ty}"
                )));
            }
            let body_ty = self.check(*body, common.as_ref())?;
            self.set_ty(branch, body_ty.clone());
            common = Some(self.merge_branch_type(common, body_ty)?);
        }
        Ok(self.set_ty(node, common.unwrap_or(Type::Void)))
    }

    fn check_while(&mut self, node: NodeId) -> Result<Type, TypeError> {
        let children = self.ast.get_node(node).children.clone();
        let [test, body] = children.as_slice() else {
            return Err(TypeError::new("malformed while loop"));
        };
        let test_ty = self.check(*test, Some(&Type::Bool))?;
        if test_ty != Type::Bool {
            return Err(TypeError::new(format!(
                "while test must be boolean, found {test_ty}"
            )));
        }
        self.check(*body, None)?;
        Ok(self.set_ty(node, Type::Void))
    }

    fn check_identifier(&mut self, node: NodeId) -> Result<Type, TypeError> {
        let ts = self.type_scope_of(node)?;
        let ident = self.ast.identifier(node).clone();

        let head_ty = self.ast.type_of_variable(ts, ident.head()).map(|(_, ty)| ty);
        if let Some(mut ty) = head_ty {
            if let Some(offsets) = &ident.offsets {
                for &offset in offsets {
                    let Some((_, elem)) = ty.project(offset as usize) else {
                        return Err(TypeError::new(format!(
                            "`{}` projects into a non-product type {ty}",
                            ident.full()
                        )));
                    };
                    ty = elem.clone();
                }
            }
            return Ok(self.set_ty(node, ty));
        }

        if !ident.is_simple() {
            for split in (1..ident.segments.len()).rev() {
                let (path, tail) = ident.segments.split_at(split);
                if tail.len() != 1 {
                    continue;
                }
                if let Some((_, ty)) = self.ast.qualified_type_of_variable(ts, path, &tail[0]) {
                    return Ok(self.set_ty(node, ty));
                }
            }
        }

        Err(TypeError::new(format!(
            "type environment has no entry for `{}`",
            ident.full()
        )))
    }

    fn check_tuple(&mut self, node: NodeId, expected: Option<&Type>) -> Result<Type, TypeError> {
        let children = self.ast.get_node(node).children.clone();
        let elem_expectations: Vec<Option<Type>> = match expected {
            Some(Type::Product(elems)) if elems.len() == children.len() => {
                elems.iter().cloned().map(Some).collect()
            }
            // A one-element tuple forwards the whole expectation, so a
            // single-argument call can constrain its argument.
            Some(other) if children.len() == 1 => vec![Some(other.clone())],
            _ => vec![None; children.len()],
        };

        let mut elems = Vec::with_capacity(children.len());
        for (child, expectation) in children.iter().zip(elem_expectations.iter()) {
            elems.push(self.check(*child, expectation.as_ref())?);
        }
        Ok(self.set_ty(node, Type::Product(elems)))
    }

    fn check_array_value(&mut self, node: NodeId, expected: Option<&Type>) -> Result<Type, TypeError> {
        let children = self.ast.get_node(node).children.clone();
        let elem_expected = match expected {
            Some(Type::Array { elem, .. }) => Some(elem.as_ref().clone()),
            _ => None,
        };

        let mut elem_ty = elem_expected;
        for &child in &children {
            let ty = self.check(child, elem_ty.as_ref())?;
            match &elem_ty {
                None => elem_ty = Some(ty),
                Some(elem) if *elem == ty => {}
                Some(elem) => {
                    return Err(TypeError::new(format!(
                        "all elements of an array must share one type: {elem} vs {ty}"
                    )))
                }
            }
        }
        let elem = elem_ty.unwrap_or(Type::Void);
        Ok(self.set_ty(node, Type::array(elem, children.len())))
    }

    fn check_array_index(&mut self, node: NodeId) -> Result<Type, TypeError> {
        let children = self.ast.get_node(node).children.clone();
        let [base, index] = children.as_slice() else {
            return Err(TypeError::new("malformed array index"));
        };
        let base_ty = self.check(*base, None)?;
        let Type::Array { elem, .. } = &base_ty else {
            return Err(TypeError::new(format!(
                "array expression must have an array type, found {base_ty}"
            )));
        };
        let elem = elem.as_ref().clone();
        let index_ty = self.check(*index, Some(&Type::Int(IntKind::I32)))?;
        if index_ty.int_kind().is_none() {
            return Err(TypeError::new(format!(
                "array index must be an integer, found {index_ty}"
            )));
        }
        Ok(self.set_ty(node, elem))
    }

    fn check_reference(&mut self, node: NodeId, expected: Option<&Type>) -> Result<Type, TypeError> {
        let child = self.only_child(node)?;
        let inner_expected = match expected {
            Some(Type::Reference(inner)) => Some(inner.as_ref().clone()),
            _ => None,
        };
        let inner = self.check(child, inner_expected.as_ref())?;
        Ok(self.set_ty(node, Type::Reference(Box::new(inner))))
    }

    fn check_number(&mut self, node: NodeId, expected: Option<&Type>) -> Result<Type, TypeError> {
        let number = *self.ast.number(node);
        let kind = match number.declared {
            Some(declared) => declared,
            None => match expected.and_then(Type::int_kind) {
                Some(kind) if kind.fits(number.value) => kind,
                _ => IntKind::I32,
            },
        };
        Ok(self.set_ty(node, Type::Int(kind)))
    }

    fn check_binary(&mut self, node: NodeId, expected: Option<&Type>) -> Result<Type, TypeError> {
        let kind = self.ast.get_node(node).kind;
        let op = kind.binary_op().expect("caller checked is_binary_op");
        let children = self.ast.get_node(node).children.clone();
        let [lhs, rhs] = children.as_slice() else {
            return Err(TypeError::new("binary operator expects two operands"));
        };

        // Arithmetic results inherit the operand type, so an outer integer
        // expectation constrains the left side.
        let lhs_expected = if op.is_comparison() { None } else { expected };
        let lhs_ty = self.check(*lhs, lhs_expected.filter(|t| t.int_kind().is_some()))?;
        if lhs_ty.int_kind().is_none() {
            return Err(TypeError::new(format!(
                "left side of {op:?} must be an integer primitive, found {lhs_ty}"
            )));
        }
        let rhs_ty = self.check(*rhs, Some(&lhs_ty))?;
        if rhs_ty != lhs_ty {
            return Err(TypeError::new(format!(
                "operands of {op:?} must share one integer primitive: {lhs_ty} vs {rhs_ty}"
            )));
        }

        let ty = if op.is_comparison() { Type::Bool } else { lhs_ty };
        Ok(self.set_ty(node, ty))
    }

    fn check_type_definition(&mut self, node: NodeId) -> Result<Type, TypeError> {
        let children = self.ast.get_node(node).children.clone();
        let [id, type_expr] = children.as_slice() else {
            return Err(TypeError::new("malformed type definition"));
        };
        let (id, type_expr) = (*id, *type_expr);
        let structural = self.elab_type_expr(type_expr)?;
        let name = self.ast.identifier(id).full();
        let nominal = Type::nominal(name.clone(), structural);
        let ts = self.type_scope_of(node)?;
        self.ast.get_type_scope_mut(ts).define_type(&name, nominal.clone());
        self.set_ty(id, nominal.clone());
        Ok(self.set_ty(node, nominal))
    }

    /// Elaborates a type expression to a structural type, annotating the
    /// expression nodes along the way.
    fn elab_type_expr(&mut self, node: NodeId) -> Result<Type, TypeError> {
        let kind = self.ast.get_node(node).kind;
        let children = self.ast.get_node(node).children.clone();
        let ty = match kind {
            NodeKind::TypeAtom => {
                let id = children
                    .first()
                    .copied()
                    .ok_or_else(|| TypeError::new("malformed type atom"))?;
                let ts = self.type_scope_of(node)?;
                let ident = self.ast.identifier(id).clone();
                let resolved = if ident.is_simple() {
                    self.ast.lookup_type(ts, ident.head())
                } else {
                    let (path, tail) = ident.segments.split_at(ident.segments.len() - 1);
                    self.ast.lookup_qualified_type(ts, path, &tail[0])
                };
                let ty = resolved.ok_or_else(|| {
                    TypeError::new(format!("unknown type `{}`", ident.full()))
                })?;
                self.set_ty(id, ty.clone());
                ty
            }
            NodeKind::TypeTuple => {
                let mut elems = Vec::with_capacity(children.len());
                for child in children {
                    elems.push(self.elab_type_expr(child)?);
                }
                Type::Product(elems)
            }
            NodeKind::FunctionType => {
                let [from, to] = children.as_slice() else {
                    return Err(TypeError::new("malformed function type"));
                };
                let from = self.elab_type_expr(*from)?;
                let to = self.elab_type_expr(*to)?;
                Type::function(from, to)
            }
            NodeKind::ReferenceType => {
                let inner = self.elab_type_expr(self.only_child(node)?)?;
                Type::Reference(Box::new(inner))
            }
            NodeKind::ArrayType => {
                let [elem, count] = children.as_slice() else {
                    return Err(TypeError::new("malformed array type"));
                };
                let elem_ty = self.elab_type_expr(*elem)?;
                if self.ast.get_node(*count).kind != NodeKind::Number {
                    return Err(TypeError::new("array length must be a number literal"));
                }
                let value = self.ast.number(*count).value;
                let count_usize = usize::try_from(value).map_err(|_| {
                    TypeError::new(format!("invalid array length {value}"))
                })?;
                Type::array(elem_ty, count_usize)
            }
            NodeKind::Record => {
                let mut elems = Vec::with_capacity(children.len());
                for element in children {
                    elems.push(self.elab_type_expr(element)?);
                }
                Type::Product(elems)
            }
            NodeKind::RecordElement => {
                let [_name, type_expr] = children.as_slice() else {
                    return Err(TypeError::new("malformed record element"));
                };
                self.elab_type_expr(*type_expr)?
            }
            other => {
                return Err(TypeError::new(format!(
                    "expected a type expression, found {other:?}"
                )))
            }
        };
        Ok(self.set_ty(node, ty))
    }
}

/// Whether an argument tuple is acceptable for a parameter type. A
/// one-element product is interchangeable with its bare element so
/// single-argument calls match single-parameter signatures.
fn argument_matches(arg: &Type, param: &Type) -> bool {
    if arg == param {
        return true;
    }
    if let Type::Product(elems) = arg {
        if elems.len() == 1 && elems[0] == *param {
            return true;
        }
    }
    false
}
