//! Fixed intrinsic operations (spec.md §6.4), pre-seeded into the root scope
//! as overload sets over primitive types. Modeled on
//! `why_lib::typechecker::context::Context::build`, which seeds its root
//! scope with the language's built-in operators before any user module is
//! analyzed.

use std::cell::RefCell;
use std::rc::Rc;

use once_cell::sync::Lazy;

use crate::ast::{AnalysisState, FunctionDecl, Param, TypeExpr};
use crate::scope::ScopeStack;
use crate::span::Span;
use crate::types::Type;

const NUMERIC_PRIMITIVES: &[&str] = &["int8", "int16", "int32", "int64", "float32", "float64"];
const ARITHMETIC: &[&str] = &["add", "subtract", "multiply", "divide", "modulo"];
const COMPARISON: &[&str] = &["equals", "not_equals", "less_than", "greater_than", "less_equal", "greater_equal"];
const LOGICAL: &[&str] = &["and", "or"];

/// One entry per intrinsic overload: `(name, param types, return type)`.
struct IntrinsicSignature {
    name: &'static str,
    params: Vec<&'static str>,
    return_type: &'static str,
}

static INTRINSIC_SIGNATURES: Lazy<Vec<IntrinsicSignature>> = Lazy::new(build_signatures);

fn build_signatures() -> Vec<IntrinsicSignature> {
    let mut sigs = vec![];

    for name in ARITHMETIC {
        for ty in NUMERIC_PRIMITIVES {
            sigs.push(IntrinsicSignature {
                name,
                params: vec![ty, ty],
                return_type: ty,
            });
        }
    }

    for name in COMPARISON {
        for ty in NUMERIC_PRIMITIVES {
            sigs.push(IntrinsicSignature {
                name,
                params: vec![ty, ty],
                return_type: "bool",
            });
        }
    }

    for name in LOGICAL {
        sigs.push(IntrinsicSignature {
            name,
            params: vec!["bool", "bool"],
            return_type: "bool",
        });
    }

    for ty in NUMERIC_PRIMITIVES {
        sigs.push(IntrinsicSignature {
            name: "negate",
            params: vec![ty],
            return_type: ty,
        });
    }
    sigs.push(IntrinsicSignature {
        name: "not",
        params: vec!["bool"],
        return_type: "bool",
    });

    for ty in NUMERIC_PRIMITIVES {
        sigs.push(IntrinsicSignature {
            name: "print",
            params: vec![ty],
            return_type: "void",
        });
    }
    sigs.push(IntrinsicSignature {
        name: "print",
        params: vec!["string"],
        return_type: "void",
    });
    sigs.push(IntrinsicSignature {
        name: "print",
        params: vec!["bool"],
        return_type: "void",
    });

    for ty in NUMERIC_PRIMITIVES {
        sigs.push(IntrinsicSignature {
            name: "size",
            params: vec![ty],
            return_type: "int64",
        });
    }

    sigs
}

fn intrinsic_decl(sig: &IntrinsicSignature) -> Rc<FunctionDecl> {
    let params = sig
        .params
        .iter()
        .enumerate()
        .map(|(i, ty)| Param {
            name: format!("arg{i}"),
            annotation: Some(TypeExpr::named(ty)),
            mutable: false,
            type_slot: Rc::new(RefCell::new(Type::primitive(ty))),
            span: Span::default(),
        })
        .collect();

    Rc::new(FunctionDecl {
        name: sig.name.to_string(),
        params,
        return_type: Some(TypeExpr::named(sig.return_type)),
        type_params: vec![],
        body: RefCell::new(None),
        is_extern: true,
        is_variadic: false,
        module: Rc::from("<intrinsic>"),
        span: Span::default(),
        state: std::cell::Cell::new(AnalysisState::CompletelyTyped),
        is_used: std::cell::Cell::new(false),
        specializations: RefCell::new(vec![]),
        signature: RefCell::new(None),
    })
}

/// `subscript`/`subscript_mut` are generic over the element type (spec.md
/// §6.4: "`subscript`, `subscript_mut` ... array access"); they cannot be
/// expressed as a flat per-primitive overload set, so they are registered
/// directly as the single generic declaration each.
fn subscript_decls() -> Vec<(&'static str, Rc<FunctionDecl>)> {
    let element_param = crate::ast::TypeParam {
        name: "T".to_string(),
        interfaces: vec![],
        fields: vec![],
    };

    let make = |name: &'static str, mutable_array: bool| {
        let array_param = Param {
            name: "arr".to_string(),
            annotation: Some(TypeExpr::Named(
                Rc::from("array"),
                vec![TypeExpr::named("T")],
                Span::default(),
            )),
            mutable: mutable_array,
            type_slot: crate::ast::fresh_slot(),
            span: Span::default(),
        };
        let index_param = Param {
            name: "index".to_string(),
            annotation: Some(TypeExpr::named("int64")),
            mutable: false,
            type_slot: Rc::new(RefCell::new(Type::primitive("int64"))),
            span: Span::default(),
        };
        Rc::new(FunctionDecl {
            name: name.to_string(),
            params: vec![array_param, index_param],
            return_type: Some(TypeExpr::named("T")),
            type_params: vec![element_param.clone()],
            body: RefCell::new(None),
            is_extern: true,
            is_variadic: false,
            module: Rc::from("<intrinsic>"),
            span: Span::default(),
            state: std::cell::Cell::new(AnalysisState::NotAnalyzed),
            is_used: std::cell::Cell::new(false),
            specializations: RefCell::new(vec![]),
            signature: RefCell::new(None),
        })
    };

    vec![
        ("subscript", make("subscript", false)),
        ("subscript_mut", make("subscript_mut", true)),
    ]
}

/// Seed `scope`'s root frame with every intrinsic overload. Intended to be
/// called exactly once, before any module is loaded (spec.md §6.4).
pub fn seed(scope: &mut ScopeStack) {
    for sig in INTRINSIC_SIGNATURES.iter() {
        let decl = intrinsic_decl(sig);
        scope
            .add_function(sig.name, decl, Span::default())
            .expect("intrinsic overloads never conflict with each other");
    }
    for (name, decl) in subscript_decls() {
        scope
            .add_function(name, decl, Span::default())
            .expect("subscript is declared once");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::{Binding, FunctionBinding};

    #[test]
    fn arithmetic_is_overloaded_per_numeric_primitive() {
        let mut scope = ScopeStack::new();
        seed(&mut scope);
        match scope.resolve_function("add") {
            Some(FunctionBinding::Concrete(overloads)) => {
                assert_eq!(overloads.len(), NUMERIC_PRIMITIVES.len());
            }
            other => panic!("expected concrete overload set, got {other:?}"),
        }
    }

    #[test]
    fn subscript_is_generic() {
        let mut scope = ScopeStack::new();
        seed(&mut scope);
        assert!(matches!(
            scope.resolve_function("subscript"),
            Some(FunctionBinding::Generic(_))
        ));
    }

    #[test]
    fn print_covers_every_primitive_family() {
        let mut scope = ScopeStack::new();
        seed(&mut scope);
        match scope.resolve("print") {
            Some(Binding::Function(FunctionBinding::Concrete(overloads))) => {
                assert_eq!(overloads.len(), NUMERIC_PRIMITIVES.len() + 2);
            }
            other => panic!("expected concrete overload set, got {other:?}"),
        }
    }
}
