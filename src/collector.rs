//! Pass 1: the constraint collector (spec.md §4.5). A single top-down walk
//! that allocates fresh type variables, records equivalence requirements
//! into a [`ConstraintStore`], and performs best-effort overload/generic
//! resolution at call sites using whatever type information is available
//! before unification runs — mirroring `why_lib::typechecker`'s per-node
//! `check` methods, which also resolve calls against the current scope
//! inline rather than in a separate pass.
//!
//! Call resolution here is deliberately provisional: a call to a concrete
//! overload set is only finalized immediately when arity narrows it to one
//! candidate; anything still ambiguous, and every generic instantiation, is
//! re-examined by [`crate::specialize`] once Pass 2 has produced concrete
//! types. See `DESIGN.md` for why overload resolution is split this way
//! instead of living entirely in Pass 3.

use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{Block, CallResolution, Expr, FunctionDecl, Program, TypeExpr};
use crate::constraints::ConstraintStore;
use crate::error::{ErrorChannel, ErrorKind, SemaError};
use crate::scope::{Binding, FunctionBinding, ScopeStack};
use crate::span::Span;
use crate::types::{Type, PRIMITIVES};

/// Resolve a user-written [`TypeExpr`] against `scope`, substituting any
/// name present in `bindings` first (used to plug fresh type variables in
/// for a generic function's declared type parameters at a call site).
pub fn resolve_type_expr(
    scope: &ScopeStack,
    texpr: &TypeExpr,
    bindings: Option<&HashMap<Rc<str>, Type>>,
) -> Result<Type, SemaError> {
    let TypeExpr::Named(name, params, span) = texpr;

    if let Some(bindings) = bindings {
        if let Some(bound) = bindings.get(name.as_ref()) {
            return Ok(bound.clone());
        }
    }

    if params.is_empty() && PRIMITIVES.contains(&name.as_ref()) {
        return Ok(Type::primitive(name));
    }
    if name.as_ref() == "pointer" && params.len() == 1 {
        return Ok(Type::pointer(resolve_type_expr(scope, &params[0], bindings)?));
    }
    if name.as_ref() == "boxed" && params.len() == 1 {
        return Ok(Type::boxed(resolve_type_expr(scope, &params[0], bindings)?));
    }
    if name.as_ref() == "array" {
        let element = match params.first() {
            Some(p) => resolve_type_expr(scope, p, bindings)?,
            None => Type::NoType,
        };
        return Ok(Type::array(None, element));
    }

    match scope.resolve_type(name) {
        Some(ty) => Ok(ty),
        None => Err(SemaError::new(
            span.clone(),
            ErrorKind::UndefinedType {
                name: name.to_string(),
            },
        )),
    }
}

pub struct Collector<'a> {
    pub store: &'a mut ConstraintStore,
    pub scope: &'a mut ScopeStack,
    pub errors: &'a mut ErrorChannel,
    return_type: Option<Type>,
}

impl<'a> Collector<'a> {
    pub fn new(
        store: &'a mut ConstraintStore,
        scope: &'a mut ScopeStack,
        errors: &'a mut ErrorChannel,
    ) -> Collector<'a> {
        Collector {
            store,
            scope,
            errors,
            return_type: None,
        }
    }

    pub fn collect_program_statements(&mut self, program: &Program) {
        for statement in &program.statements {
            self.collect_statement(statement);
        }
    }

    /// Collect a statement-position expression, flagging an unconsumed call
    /// return value (spec.md §8 scenario S6). Declarations, assignments and
    /// returns never reach here with a non-`void` type by construction, so
    /// the check only needs to look at bare `Call` statements.
    fn collect_statement(&mut self, stmt: &Expr) -> Type {
        let ty = self.collect_expr(stmt);
        if let Expr::Call { span, .. } = stmt {
            let is_void_or_unresolved = matches!(&ty, Type::Nominal(n) if n.name.as_ref() == "void")
                || matches!(ty, Type::NoType);
            if !is_void_or_unresolved {
                self.errors.push(SemaError::new(
                    span.clone(),
                    ErrorKind::UnhandledReturnValue {
                        return_type: ty.clone(),
                    },
                ));
            }
        }
        ty
    }

    /// Collect a function body with `return_type` bound as the slot every
    /// `return` inside it unifies against. An `=`-bodied function's value
    /// *is* its return value, so it is unified against `return_type`
    /// directly here rather than through a `Return` node; a block-bodied
    /// function only does that implicitly when it qualifies as an
    /// expression (its trailing/singleton value reduces to the return
    /// type), which `Expr::Return` nodes inside it already cover otherwise.
    pub fn collect_function_body(&mut self, decl: &FunctionDecl, return_type: Type) {
        self.return_type = Some(return_type.clone());
        self.scope.enter_scope();
        for param in &decl.params {
            self.scope
                .add_function_argument(param.name.clone(), param.type_slot.clone());
        }
        if let Some(body) = decl.body.borrow().as_ref() {
            match body {
                crate::ast::FunctionBody::Expression(expr) => {
                    let value_type = self.collect_expr(expr);
                    self.store.unify(value_type, return_type);
                }
                crate::ast::FunctionBody::Block(block) => {
                    let value_type = self.collect_block(block);
                    if block.could_be_expression() {
                        self.store.unify(value_type, return_type);
                    }
                }
            }
        }
        self.scope.exit_scope();
        self.return_type = None;
    }

    fn resolve_type_expr(
        &self,
        texpr: &TypeExpr,
        bindings: Option<&HashMap<Rc<str>, Type>>,
    ) -> Result<Type, SemaError> {
        resolve_type_expr(self.scope, texpr, bindings)
    }

    /// Honors the singleton-block rewriting rule (spec.md §4.2,
    /// [`Block::yields`]): a block with no trailing expression but exactly
    /// one statement treats that statement as its yielded value rather than
    /// as a dropped statement, so it is not flagged as an unhandled call
    /// result.
    fn collect_block(&mut self, block: &Block) -> Type {
        let ty = match (&block.trailing, block.statements.as_slice()) {
            (Some(trailing), statements) => {
                for stmt in statements {
                    self.collect_statement(stmt);
                }
                self.collect_expr(trailing)
            }
            (None, [only]) => self.collect_expr(only),
            (None, statements) => {
                for stmt in statements {
                    self.collect_statement(stmt);
                }
                Type::primitive("void")
            }
        };
        *block.type_slot.borrow_mut() = ty.clone();
        ty
    }

    pub fn collect_expr(&mut self, expr: &Expr) -> Type {
        let ty = self.collect_expr_inner(expr);
        crate::ast::set_type(expr, ty.clone());
        ty
    }

    fn collect_expr_inner(&mut self, expr: &Expr) -> Type {
        match expr {
            Expr::IntLiteral { annotation, span, .. } => {
                let var = self.store.fresh_var();
                if let Type::TypeVariable(id) = var {
                    self.store.require_interface(id, "Number");
                }
                if let Some(annotation) = annotation {
                    match self.resolve_type_expr(annotation, None) {
                        Ok(ty) if ty.is_integer() || ty.is_float() => {
                            self.store.unify(var.clone(), ty.clone());
                            return ty;
                        }
                        Ok(ty) => {
                            self.errors.push(SemaError::new(
                                span.clone(),
                                ErrorKind::IncompatibleTypes {
                                    expected: Type::primitive("int64"),
                                    actual: ty,
                                },
                            ));
                        }
                        Err(err) => self.errors.push(err),
                    }
                }
                // A singleton class, so the unifier still sees (and can
                // default) this variable even when it never meets another
                // type in a binary relationship.
                self.store.unify_many(vec![var.clone()]);
                var
            }
            Expr::FloatLiteral { annotation, span, .. } => {
                let var = self.store.fresh_var();
                if let Type::TypeVariable(id) = var {
                    self.store.require_interface(id, "Float");
                }
                if let Some(annotation) = annotation {
                    match self.resolve_type_expr(annotation, None) {
                        Ok(ty) if ty.is_float() => {
                            self.store.unify(var.clone(), ty.clone());
                            return ty;
                        }
                        Ok(ty) => {
                            self.errors.push(SemaError::new(
                                span.clone(),
                                ErrorKind::IncompatibleTypes {
                                    expected: Type::primitive("float64"),
                                    actual: ty,
                                },
                            ));
                        }
                        Err(err) => self.errors.push(err),
                    }
                }
                self.store.unify_many(vec![var.clone()]);
                var
            }
            Expr::BoolLiteral { .. } => Type::primitive("bool"),
            Expr::StringLiteral { .. } => Type::primitive("string"),
            Expr::ArrayLiteral { elements, .. } => {
                let element_var = self.store.fresh_var();
                let mut class = vec![element_var.clone()];
                for element in elements {
                    class.push(self.collect_expr(element));
                }
                self.store.unify_many(class);
                Type::array(Some(elements.len() as u64), element_var)
            }
            Expr::Identifier { name, span, .. } => match self.scope.resolve(name) {
                Some(Binding::Variable { type_slot, .. }) => type_slot.borrow().clone(),
                Some(Binding::FunctionArgument { type_slot }) => type_slot.borrow().clone(),
                _ => {
                    self.errors.push(SemaError::new(
                        span.clone(),
                        ErrorKind::UndefinedVariable { name: name.clone() },
                    ));
                    Type::NoType
                }
            },
            Expr::Declaration {
                name,
                mutable,
                annotation,
                value,
                ..
            } => {
                let value_type = self.collect_expr(value);
                let binding_slot = value.type_slot();
                if let Some(annotation) = annotation {
                    match self.resolve_type_expr(annotation, None) {
                        Ok(declared) => {
                            self.store.unify(declared.clone(), value_type.clone());
                            *binding_slot.borrow_mut() = declared;
                        }
                        Err(err) => self.errors.push(err),
                    }
                }
                if let Err(err) = self.scope.add_variable(name.clone(), binding_slot, *mutable) {
                    self.errors.push(err);
                }
                Type::primitive("void")
            }
            Expr::Assignment {
                target,
                value,
                span,
                ..
            } => {
                let target_type = self.collect_expr(target);
                let value_type = self.collect_expr(value);
                self.store.unify(target_type.clone(), value_type);
                if let Expr::Identifier { name, .. } = target.as_ref() {
                    if self.scope.is_mutable(name) == Some(false) {
                        self.errors.push(SemaError::new(
                            span.clone(),
                            ErrorKind::ReassigningImmutable { name: name.clone() },
                        ));
                    }
                }
                Type::primitive("void")
            }
            Expr::Return { value, .. } => {
                let value_type = match value {
                    Some(value) => self.collect_expr(value),
                    None => Type::primitive("void"),
                };
                if let Some(return_type) = self.return_type.clone() {
                    self.store.unify(value_type, return_type);
                }
                Type::primitive("void")
            }
            Expr::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                let condition_type = self.collect_expr(condition);
                self.store.unify(condition_type, Type::primitive("bool"));

                let then_type = self.collect_block(then_branch);
                let node_var = self.store.fresh_var();

                if let Some(else_branch) = else_branch {
                    let else_type = self.collect_block(else_branch);
                    if expr.is_expression() {
                        self.store
                            .unify_many(vec![node_var.clone(), then_type, else_type]);
                        return node_var;
                    }
                }
                Type::primitive("void")
            }
            Expr::StructLiteral {
                type_name,
                fields,
                span,
                ..
            } => {
                let declared = self.scope.resolve_type(type_name);
                let mut missing = vec![];
                if let Some(Type::Nominal(nominal)) = &declared {
                    if let Some(decl) = &nominal.def {
                        for (field_name, _) in &decl.fields {
                            if !fields.iter().any(|(n, _)| n == field_name) {
                                missing.push(field_name.clone());
                            }
                        }
                        for (field_name, field_expr) in fields {
                            let field_type = self.collect_expr(field_expr);
                            match decl.fields.iter().find(|(n, _)| n == field_name) {
                                Some((_, texpr)) => match self.resolve_type_expr(texpr, None) {
                                    Ok(declared_field_type) => {
                                        self.store.unify(field_type, declared_field_type);
                                    }
                                    Err(err) => self.errors.push(err),
                                },
                                None => self.errors.push(SemaError::new(
                                    span.clone(),
                                    ErrorKind::MissingField {
                                        type_name: type_name.clone(),
                                        field: field_name.clone(),
                                    },
                                )),
                            }
                        }
                    }
                } else {
                    self.errors.push(SemaError::new(
                        span.clone(),
                        ErrorKind::UndefinedType {
                            name: type_name.clone(),
                        },
                    ));
                }
                if !missing.is_empty() {
                    self.errors.push(SemaError::new(
                        span.clone(),
                        ErrorKind::NotAllFieldsInitialized {
                            type_name: type_name.clone(),
                            missing,
                        },
                    ));
                }
                declared.unwrap_or(Type::NoType)
            }
            Expr::FieldAccess { base, path, span, .. } => {
                let mut current = self.collect_expr(base);
                for field in path {
                    current = self.step_field_access(&current, field, span);
                }
                current
            }
            Expr::AddressOf { operand, .. } => {
                let operand_type = self.collect_expr(operand);
                Type::pointer(operand_type)
            }
            Expr::Dereference { operand, span, .. } => {
                let operand_type = self.collect_expr(operand);
                match &operand_type {
                    Type::Nominal(n) if n.name.as_ref() == "pointer" || n.name.as_ref() == "boxed" => {
                        n.params.first().cloned().unwrap_or(Type::NoType)
                    }
                    other => {
                        self.errors.push(SemaError::new(
                            span.clone(),
                            ErrorKind::ConstraintFailed {
                                interface: "pointer".to_string(),
                                found: other.clone(),
                            },
                        ));
                        Type::NoType
                    }
                }
            }
            Expr::New { operand, .. } => {
                let operand_type = self.collect_expr(operand);
                Type::boxed(operand_type)
            }
            Expr::Call {
                callee,
                arguments,
                mutable_args,
                resolved,
                span,
                ..
            } => {
                let argument_types: Vec<Type> =
                    arguments.iter().map(|arg| self.collect_expr(arg)).collect();
                self.collect_call(callee, &argument_types, mutable_args, resolved, span)
            }
            Expr::Block(block) => self.collect_block(block),
        }
    }

    fn step_field_access(&mut self, base: &Type, field: &str, span: &Span) -> Type {
        match base {
            Type::Nominal(n) => match &n.def {
                Some(decl) => match decl.fields.iter().find(|(name, _)| name == field) {
                    Some((_, texpr)) => self
                        .resolve_type_expr(texpr, None)
                        .unwrap_or_else(|err| {
                            self.errors.push(err);
                            Type::NoType
                        }),
                    None => {
                        self.errors.push(SemaError::new(
                            span.clone(),
                            ErrorKind::MissingField {
                                type_name: n.name.to_string(),
                                field: field.to_string(),
                            },
                        ));
                        Type::NoType
                    }
                },
                None => {
                    self.errors.push(SemaError::new(
                        span.clone(),
                        ErrorKind::MissingField {
                            type_name: n.name.to_string(),
                            field: field.to_string(),
                        },
                    ));
                    Type::NoType
                }
            },
            Type::Struct(s) => s
                .fields
                .iter()
                .find(|(name, _)| name.as_ref() == field)
                .map(|(_, ty)| ty.clone())
                .unwrap_or(Type::NoType),
            Type::TypeVariable(id) => {
                let field_var = self.store.fresh_var();
                if let Type::TypeVariable(field_id) = field_var.clone() {
                    self.store.require_field(*id, field, field_id);
                }
                field_var
            }
            _ => Type::NoType,
        }
    }

    fn collect_call(
        &mut self,
        callee: &str,
        argument_types: &[Type],
        mutable_args: &[bool],
        resolved: &std::cell::RefCell<Option<CallResolution>>,
        span: &Span,
    ) -> Type {
        match self.scope.resolve_function(callee) {
            None => {
                self.errors.push(SemaError::new(
                    span.clone(),
                    ErrorKind::UndefinedFunction {
                        name: callee.to_string(),
                    },
                ));
                Type::NoType
            }
            Some(FunctionBinding::Generic(decl)) => {
                self.collect_generic_call(decl, argument_types, mutable_args, resolved, span)
            }
            Some(FunctionBinding::Concrete(overloads)) => self.collect_concrete_call(
                callee,
                &overloads,
                argument_types,
                mutable_args,
                resolved,
                span,
            ),
        }
    }

    /// A generic call's return type depends on argument types the unifier
    /// has not finalized yet, and the specialization cache
    /// (spec.md §4.7 "Generic specialization") can only be keyed by final,
    /// concrete argument types — so unlike a concrete overload, a generic
    /// call is always left to `crate::specialize::reresolve_deferred_calls`
    /// rather than ever resolved here. This only records the unifications
    /// that let Pass 2 pin down the actuals.
    fn collect_generic_call(
        &mut self,
        decl: Rc<FunctionDecl>,
        argument_types: &[Type],
        mutable_args: &[bool],
        resolved: &std::cell::RefCell<Option<CallResolution>>,
        span: &Span,
    ) -> Type {
        let _ = resolved;
        let _ = span;
        let _ = mutable_args;
        let mut bindings: HashMap<Rc<str>, Type> = HashMap::new();
        for type_param in &decl.type_params {
            let var = self.store.fresh_var();
            if let Type::TypeVariable(id) = var.clone() {
                crate::constraints::seed_type_param_constraints(self.store, id, type_param);
            }
            bindings.insert(Rc::from(type_param.name.as_str()), var);
        }

        for (param, actual) in decl.params.iter().zip(argument_types) {
            if let Some(annotation) = &param.annotation {
                if let Ok(formal) = self.resolve_type_expr(annotation, Some(&bindings)) {
                    self.store.unify(formal, actual.clone());
                }
            }
        }

        let return_type = match &decl.return_type {
            Some(annotation) => self
                .resolve_type_expr(annotation, Some(&bindings))
                .unwrap_or(Type::NoType),
            None => Type::primitive("void"),
        };
        let result_var = self.store.fresh_var();
        self.store.unify(result_var.clone(), return_type);
        result_var
    }

    fn collect_concrete_call(
        &mut self,
        name: &str,
        overloads: &[Rc<FunctionDecl>],
        argument_types: &[Type],
        mutable_args: &[bool],
        resolved: &std::cell::RefCell<Option<CallResolution>>,
        span: &Span,
    ) -> Type {
        let arity = argument_types.len();
        let candidates: Vec<Rc<FunctionDecl>> = overloads
            .iter()
            .filter(|decl| decl.params.len() == arity || (decl.is_variadic && arity >= decl.params.len()))
            .filter(|decl| self.mutability_preserved(decl, mutable_args))
            .cloned()
            .collect();

        if candidates.is_empty() {
            self.errors.push(SemaError::new(
                span.clone(),
                ErrorKind::UndefinedFunction {
                    name: name.to_string(),
                },
            ));
            return Type::NoType;
        }

        let mut deferred = false;
        let chosen = if candidates.len() == 1 {
            candidates.into_iter().next()
        } else {
            let compatible: Vec<Rc<FunctionDecl>> = candidates
                .into_iter()
                .filter(|decl| self.is_compatible(decl, argument_types))
                .collect();
            match compatible.len() {
                0 => {
                    self.errors.push(SemaError::new(
                        span.clone(),
                        ErrorKind::UndefinedFunction {
                            name: name.to_string(),
                        },
                    ));
                    None
                }
                1 => compatible.into_iter().next(),
                n => {
                    // Every actual is already concrete, so no amount of
                    // unification will narrow this further: a real
                    // ambiguity, reported now. Otherwise some actual is
                    // still an inference variable — defer to
                    // `crate::specialize::reresolve_deferred_calls`, which
                    // re-runs this same filter once Pass 2 has given every
                    // actual a final type.
                    if argument_types.iter().all(Type::is_concrete) {
                        self.errors.push(SemaError::new(
                            span.clone(),
                            ErrorKind::AmbiguousCall {
                                name: name.to_string(),
                                candidates: n,
                            },
                        ));
                    } else {
                        deferred = true;
                    }
                    None
                }
            }
        };

        let Some(decl) = chosen else {
            return if deferred {
                self.store.fresh_var()
            } else {
                Type::NoType
            };
        };

        for (param, actual) in decl.params.iter().zip(argument_types) {
            if let Some(annotation) = &param.annotation {
                if let Ok(formal) = self.resolve_type_expr(annotation, None) {
                    self.store.unify(formal, actual.clone());
                }
            }
        }
        let return_type = match &decl.return_type {
            Some(annotation) => self.resolve_type_expr(annotation, None).unwrap_or(Type::NoType),
            None => Type::primitive("void"),
        };
        let result_var = self.store.fresh_var();
        self.store.unify(result_var.clone(), return_type.clone());

        *resolved.borrow_mut() = Some(CallResolution {
            callee: decl,
            arguments: argument_types.to_vec(),
            return_type: return_type.clone(),
        });
        result_var
    }

    /// A concrete actual is compatible with a formal when either side is
    /// still an unresolved type variable, or the two are structurally equal
    /// (spec.md §4.7 "type-compatibility filter").
    fn is_compatible(&self, decl: &FunctionDecl, argument_types: &[Type]) -> bool {
        decl.params.iter().zip(argument_types).all(|(param, actual)| {
            let Some(annotation) = &param.annotation else {
                return true;
            };
            match self.resolve_type_expr(annotation, None) {
                Ok(formal) => !actual.is_concrete() || !formal.is_concrete() || formal.equals(actual),
                Err(_) => false,
            }
        })
    }

    /// spec.md §4.7 step 2 "Preserve mutability": a `mut`-passed actual
    /// requires a `mut`-declared formal and vice versa, position by
    /// position. A variadic tail beyond the declared formals is exempt —
    /// there is no formal to compare it against.
    fn mutability_preserved(&self, decl: &FunctionDecl, mutable_args: &[bool]) -> bool {
        decl.params
            .iter()
            .zip(mutable_args)
            .all(|(param, &is_mut)| param.mutable == is_mut)
    }
}
