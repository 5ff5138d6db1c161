//! Pass 3: the specialization resolver (spec.md §4.7). Runs after
//! unification, so every argument type it sees is final. It has two
//! responsibilities:
//!
//! - confirm (or, for calls the collector deferred, now decide) which
//!   concrete overload a call site binds to;
//! - for generic callees, look up or create a content-addressed
//!   specialization, guarding the recursive-descent-into-the-callee's-body
//!   that [`crate::Analyzer`] performs against specialization cycles.
//!
//! Grounded in `original_source/src/semantic/make_concrete.cpp` (the
//! specialization cache) and `src/semantic/type_infer.cpp`'s
//! `being_specialized` stack for the recursion guard.

use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{get_type, set_type, Block, CallResolution, Expr, FunctionDecl, Specialization};
use crate::collector::resolve_type_expr;
use crate::error::{ErrorChannel, ErrorKind, SemaError};
use crate::scope::{FunctionBinding, ScopeStack};
use crate::span::Span;
use crate::types::Type;

/// `(function-name, argument-types)` call stack, checked for containment
/// before a recursive specialization request is allowed to proceed
/// (spec.md §4.7 step 4 / §5 "Recursion safety").
#[derive(Debug, Default)]
pub struct RecursionGuard {
    stack: Vec<(String, Vec<String>)>,
}

impl RecursionGuard {
    pub fn new() -> RecursionGuard {
        RecursionGuard::default()
    }

    fn key(name: &str, arguments: &[Type]) -> (String, Vec<String>) {
        (
            name.to_string(),
            arguments.iter().map(ToString::to_string).collect(),
        )
    }

    pub fn contains(&self, name: &str, arguments: &[Type]) -> bool {
        let key = Self::key(name, arguments);
        self.stack.iter().any(|frame| *frame == key)
    }

    pub fn push(&mut self, name: &str, arguments: &[Type]) {
        self.stack.push(Self::key(name, arguments));
    }

    pub fn pop(&mut self) {
        self.stack.pop();
    }
}

pub enum SpecializationLookup {
    /// An identical argument tuple was already specialized; reuse its slot.
    Existing(usize),
    /// A fresh specialization was recorded; the caller must still analyze
    /// the callee's body under `bindings` to populate it fully.
    New(usize),
    /// The same `(name, arguments)` pair is already being specialized
    /// higher up the call stack; the cycle is broken by returning an open
    /// result rather than recursing forever (spec.md §4.7 step 4).
    Cycle,
}

/// Look up or create a specialization for `decl` at `arguments`, honoring
/// the recursion guard.
pub fn find_or_create_specialization(
    decl: &FunctionDecl,
    arguments: &[Type],
    bindings: HashMap<Rc<str>, Type>,
    return_type: Type,
    guard: &RecursionGuard,
) -> SpecializationLookup {
    if let Some(index) = decl
        .specializations
        .borrow()
        .iter()
        .position(|s| s.matches(arguments))
    {
        return SpecializationLookup::Existing(index);
    }

    if guard.contains(&decl.name, arguments) {
        return SpecializationLookup::Cycle;
    }

    let mut specializations = decl.specializations.borrow_mut();
    specializations.push(Specialization {
        arguments: arguments.to_vec(),
        return_type,
        bindings,
        used: std::cell::Cell::new(false),
    });
    SpecializationLookup::New(specializations.len() - 1)
}

/// spec.md §4.7 overload resolution, steps 1-4, run against final
/// (post-unification) argument types. `mutable_args` preserves mutability
/// (step 2): a `mut`-passed actual requires a `mut`-declared formal and vice
/// versa, position by position, with a variadic tail exempt since it has no
/// formal to compare against.
pub fn resolve_overload(
    name: &str,
    candidates: &[Rc<FunctionDecl>],
    argument_types: &[Type],
    mutable_args: &[bool],
    resolve_formal: impl Fn(&FunctionDecl, usize) -> Option<Type>,
    resolve_return: impl Fn(&FunctionDecl) -> Option<Type>,
    span: &Span,
) -> Result<Rc<FunctionDecl>, SemaError> {
    let arity = argument_types.len();
    let by_arity: Vec<&Rc<FunctionDecl>> = candidates
        .iter()
        .filter(|decl| decl.params.len() == arity || (decl.is_variadic && arity >= decl.params.len()))
        .filter(|decl| {
            decl.params
                .iter()
                .zip(mutable_args)
                .all(|(param, &is_mut)| param.mutable == is_mut)
        })
        .collect();

    let by_type: Vec<&Rc<FunctionDecl>> = by_arity
        .into_iter()
        .filter(|decl| {
            argument_types.iter().enumerate().all(|(i, actual)| {
                match resolve_formal(decl, i) {
                    Some(formal) => !actual.is_concrete() || formal.equals(actual),
                    None => true,
                }
            })
        })
        .collect();

    let by_return: Vec<&Rc<FunctionDecl>> = by_type
        .into_iter()
        .filter(|decl| resolve_return(decl).is_some())
        .collect();

    match by_return.len() {
        0 => Err(SemaError::new(
            span.clone(),
            ErrorKind::UndefinedFunction {
                name: name.to_string(),
            },
        )),
        1 => Ok(by_return[0].clone()),
        n => Err(SemaError::new(
            span.clone(),
            ErrorKind::AmbiguousCall {
                name: name.to_string(),
                candidates: n,
            },
        )),
    }
}

/// Build the generic-to-concrete substitution map a specialization needs,
/// by reading off the type parameter each formal position names directly
/// (spec.md §4.7 "Generic specialization" step 2's unify-to-populate, done
/// here by direct lookup since every actual's type is already final).
fn build_generic_bindings(decl: &FunctionDecl, argument_types: &[Type]) -> HashMap<Rc<str>, Type> {
    let mut bindings = HashMap::new();
    for (param, actual) in decl.params.iter().zip(argument_types) {
        if let Some(crate::ast::TypeExpr::Named(name, params, _)) = &param.annotation {
            if params.is_empty() && decl.type_params.iter().any(|tp| tp.name == name.as_ref()) {
                bindings.insert(name.clone(), actual.clone());
            }
        }
    }
    bindings
}

/// Walk `expr`, resolving every `Call` the collector left deferred (its
/// `resolved` cell is still empty and no error was raised for it) now that
/// Pass 2 has given every argument a final type. Calls the collector
/// already settled, or already reported as genuinely undefined, are left
/// untouched. `guard` bounds recursive specialization requests within this
/// walk (spec.md §4.7 "Generic specialization" step 4).
pub fn reresolve_deferred_calls(
    expr: &Expr,
    scope: &ScopeStack,
    errors: &mut ErrorChannel,
    guard: &RecursionGuard,
) {
    match expr {
        Expr::ArrayLiteral { elements, .. } => {
            for e in elements {
                reresolve_deferred_calls(e, scope, errors, guard);
            }
        }
        Expr::Declaration { value, .. } => reresolve_deferred_calls(value, scope, errors, guard),
        Expr::Assignment { target, value, .. } => {
            reresolve_deferred_calls(target, scope, errors, guard);
            reresolve_deferred_calls(value, scope, errors, guard);
        }
        Expr::Return { value, .. } => {
            if let Some(value) = value {
                reresolve_deferred_calls(value, scope, errors, guard);
            }
        }
        Expr::If {
            condition,
            then_branch,
            else_branch,
            ..
        } => {
            reresolve_deferred_calls(condition, scope, errors, guard);
            reresolve_deferred_block(then_branch, scope, errors, guard);
            if let Some(else_branch) = else_branch {
                reresolve_deferred_block(else_branch, scope, errors, guard);
            }
        }
        Expr::StructLiteral { fields, .. } => {
            for (_, value) in fields {
                reresolve_deferred_calls(value, scope, errors, guard);
            }
        }
        Expr::FieldAccess { base, .. } => reresolve_deferred_calls(base, scope, errors, guard),
        Expr::AddressOf { operand, .. }
        | Expr::Dereference { operand, .. }
        | Expr::New { operand, .. } => reresolve_deferred_calls(operand, scope, errors, guard),
        Expr::Call {
            callee,
            arguments,
            mutable_args,
            resolved,
            span,
            ..
        } => {
            for arg in arguments {
                reresolve_deferred_calls(arg, scope, errors, guard);
            }
            if resolved.borrow().is_some() {
                return;
            }
            match scope.resolve_function(callee) {
                Some(FunctionBinding::Concrete(overloads)) => {
                    let argument_types: Vec<Type> = arguments.iter().map(get_type).collect();
                    let resolve_formal = |decl: &FunctionDecl, i: usize| {
                        decl.params
                            .get(i)
                            .and_then(|p| p.annotation.as_ref())
                            .and_then(|a| resolve_type_expr(scope, a, None).ok())
                    };
                    let resolve_return = |decl: &FunctionDecl| {
                        decl.return_type
                            .as_ref()
                            .and_then(|a| resolve_type_expr(scope, a, None).ok())
                    };
                    match resolve_overload(
                        callee,
                        &overloads,
                        &argument_types,
                        mutable_args,
                        resolve_formal,
                        resolve_return,
                        span,
                    ) {
                        Ok(decl) => {
                            let return_type = resolve_return(&decl).unwrap_or(Type::primitive("void"));
                            set_type(expr, return_type.clone());
                            *resolved.borrow_mut() = Some(CallResolution {
                                callee: decl,
                                arguments: argument_types,
                                return_type,
                            });
                        }
                        Err(err) => errors.push(err),
                    }
                }
                Some(FunctionBinding::Generic(decl)) => {
                    let argument_types: Vec<Type> = arguments.iter().map(get_type).collect();
                    let bindings = build_generic_bindings(&decl, &argument_types);
                    let return_type = match &decl.return_type {
                        Some(annotation) => resolve_type_expr(scope, annotation, Some(&bindings))
                            .unwrap_or(Type::NoType),
                        None => Type::primitive("void"),
                    };
                    match find_or_create_specialization(
                        &decl,
                        &argument_types,
                        bindings,
                        return_type.clone(),
                        guard,
                    ) {
                        SpecializationLookup::Existing(_) | SpecializationLookup::New(_) => {
                            set_type(expr, return_type.clone());
                            *resolved.borrow_mut() = Some(CallResolution {
                                callee: decl,
                                arguments: argument_types,
                                return_type,
                            });
                        }
                        SpecializationLookup::Cycle => {
                            // Break the cycle: leave the call unresolved
                            // rather than recursing forever (spec.md §4.7
                            // step 4).
                        }
                    }
                }
                None => {
                    // Undefined-function was already reported by the
                    // collector.
                }
            }
        }
        Expr::Block(block) => reresolve_deferred_block(block, scope, errors, guard),
        Expr::IntLiteral { .. }
        | Expr::FloatLiteral { .. }
        | Expr::BoolLiteral { .. }
        | Expr::StringLiteral { .. }
        | Expr::Identifier { .. } => {}
    }
}

fn reresolve_deferred_block(
    block: &Block,
    scope: &ScopeStack,
    errors: &mut ErrorChannel,
    guard: &RecursionGuard,
) {
    for stmt in &block.statements {
        reresolve_deferred_calls(stmt, scope, errors, guard);
    }
    if let Some(trailing) = &block.trailing {
        reresolve_deferred_calls(trailing, scope, errors, guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AnalysisState, Param, TypeExpr};
    use crate::span::Span;
    use std::cell::{Cell, RefCell};

    fn decl(name: &str, param_count: usize) -> Rc<FunctionDecl> {
        Rc::new(FunctionDecl {
            name: name.to_string(),
            params: (0..param_count)
                .map(|i| Param {
                    name: format!("a{i}"),
                    annotation: Some(TypeExpr::named("int64")),
                    mutable: false,
                    type_slot: crate::ast::fresh_slot(),
                    span: Span::default(),
                })
                .collect(),
            return_type: Some(TypeExpr::named("int64")),
            type_params: vec![],
            body: RefCell::new(None),
            is_extern: true,
            is_variadic: false,
            module: Rc::from("main"),
            span: Span::default(),
            state: Cell::new(AnalysisState::CompletelyTyped),
            is_used: Cell::new(false),
            specializations: RefCell::new(vec![]),
            signature: RefCell::new(None),
        })
    }

    #[test]
    fn reused_specialization_is_returned_without_creating_a_duplicate() {
        let f = decl("identity", 1);
        let guard = RecursionGuard::new();
        let args = vec![Type::primitive("int64")];

        let first = find_or_create_specialization(
            &f,
            &args,
            HashMap::new(),
            Type::primitive("int64"),
            &guard,
        );
        assert!(matches!(first, SpecializationLookup::New(0)));

        let second = find_or_create_specialization(
            &f,
            &args,
            HashMap::new(),
            Type::primitive("int64"),
            &guard,
        );
        assert!(matches!(second, SpecializationLookup::Existing(0)));
    }

    #[test]
    fn distinct_argument_tuples_get_distinct_specializations() {
        let f = decl("identity", 1);
        let guard = RecursionGuard::new();

        find_or_create_specialization(
            &f,
            &[Type::primitive("int64")],
            HashMap::new(),
            Type::primitive("int64"),
            &guard,
        );
        let second = find_or_create_specialization(
            &f,
            &[Type::primitive("float64")],
            HashMap::new(),
            Type::primitive("float64"),
            &guard,
        );
        assert!(matches!(second, SpecializationLookup::New(1)));
    }

    #[test]
    fn recursion_guard_breaks_cycles() {
        let f = decl("loopy", 1);
        let mut guard = RecursionGuard::new();
        let args = vec![Type::primitive("int64")];
        guard.push("loopy", &args);

        let outcome =
            find_or_create_specialization(&f, &args, HashMap::new(), Type::primitive("int64"), &guard);
        assert!(matches!(outcome, SpecializationLookup::Cycle));
    }

    #[test]
    fn overload_resolution_picks_the_unique_arity_match() {
        let candidates = vec![decl("add", 1), decl("add", 2)];
        let resolved = resolve_overload(
            "add",
            &candidates,
            &[Type::primitive("int64"), Type::primitive("int64")],
            &[false, false],
            |d, i| d.params.get(i).map(|_| Type::primitive("int64")),
            |d| d.return_type.as_ref().map(|_| Type::primitive("int64")),
            &Span::default(),
        )
        .expect("resolves");
        assert_eq!(resolved.params.len(), 2);
    }

    #[test]
    fn overload_resolution_errors_on_no_arity_match() {
        let candidates = vec![decl("add", 2)];
        let err = resolve_overload(
            "add",
            &candidates,
            &[Type::primitive("int64")],
            &[false],
            |d, i| d.params.get(i).map(|_| Type::primitive("int64")),
            |d| d.return_type.as_ref().map(|_| Type::primitive("int64")),
            &Span::default(),
        )
        .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UndefinedFunction { .. }));
    }

    fn overload(name: &str, ty: &str) -> Rc<FunctionDecl> {
        Rc::new(FunctionDecl {
            name: name.to_string(),
            params: vec![
                Param {
                    name: "a".to_string(),
                    annotation: Some(TypeExpr::named(ty)),
                    mutable: false,
                    type_slot: crate::ast::fresh_slot(),
                    span: Span::default(),
                },
                Param {
                    name: "b".to_string(),
                    annotation: Some(TypeExpr::named(ty)),
                    mutable: false,
                    type_slot: crate::ast::fresh_slot(),
                    span: Span::default(),
                },
            ],
            return_type: Some(TypeExpr::named(ty)),
            type_params: vec![],
            body: RefCell::new(None),
            is_extern: true,
            is_variadic: false,
            module: Rc::from("<intrinsic>"),
            span: Span::default(),
            state: Cell::new(AnalysisState::CompletelyTyped),
            is_used: Cell::new(false),
            specializations: RefCell::new(vec![]),
            signature: RefCell::new(None),
        })
    }

    fn finalized_literal(ty: &str) -> Expr {
        let expr = Expr::IntLiteral {
            value: 1,
            annotation: None,
            type_slot: crate::ast::fresh_slot(),
            span: Span::default(),
        };
        set_type(&expr, Type::primitive(ty));
        expr
    }

    #[test]
    fn deferred_call_resolves_once_arguments_are_concrete() {
        let mut scope = ScopeStack::new();
        scope
            .add_function("add", overload("add", "int64"), Span::default())
            .expect("first overload");
        scope
            .add_function("add", overload("add", "float64"), Span::default())
            .expect("second overload");

        let call = Expr::Call {
            callee: "add".to_string(),
            arguments: vec![finalized_literal("int64"), finalized_literal("int64")],
            mutable_args: vec![false, false],
            resolved: RefCell::new(None),
            type_slot: crate::ast::fresh_slot(),
            span: Span::default(),
        };

        let mut errors = ErrorChannel::default();
        let guard = RecursionGuard::new();
        reresolve_deferred_calls(&call, &scope, &mut errors, &guard);

        assert!(errors.is_empty());
        if let Expr::Call { resolved, .. } = &call {
            let resolution = resolved.borrow();
            let resolution = resolution.as_ref().expect("resolves once concrete");
            assert_eq!(resolution.return_type, Type::primitive("int64"));
        }
        assert_eq!(get_type(&call), Type::primitive("int64"));
    }

    #[test]
    fn deferred_call_rejects_a_mutability_mismatch() {
        let mut scope = ScopeStack::new();
        scope
            .add_function("add", overload("add", "int64"), Span::default())
            .expect("insert");

        let call = Expr::Call {
            callee: "add".to_string(),
            arguments: vec![finalized_literal("int64"), finalized_literal("int64")],
            mutable_args: vec![true, false],
            resolved: RefCell::new(None),
            type_slot: crate::ast::fresh_slot(),
            span: Span::default(),
        };

        let mut errors = ErrorChannel::default();
        let guard = RecursionGuard::new();
        reresolve_deferred_calls(&call, &scope, &mut errors, &guard);

        assert!(errors
            .iter()
            .any(|e| matches!(e.kind, ErrorKind::UndefinedFunction { .. })));
        if let Expr::Call { resolved, .. } = &call {
            assert!(resolved.borrow().is_none());
        }
    }
}
