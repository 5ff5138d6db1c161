//! Pass 4: the usage marker (spec.md §4.8). A reachability closure from the
//! implicit top-level block: a non-generic function is marked used the
//! moment a live call site targets it, a generic function's specific
//! `Specialization` is marked used the moment a live call site targets that
//! exact argument tuple, and marking a function transitively visits its own
//! body's call sites. Unmarked functions (and unmarked specializations) are
//! dead and not emitted.

use std::collections::HashSet;
use std::rc::Rc;

use crate::ast::{Block, Expr, FunctionBody, FunctionDecl};

/// Walk `roots` (ordinarily just the program's top-level statements)
/// marking every transitively-reachable function and specialization.
pub fn mark_reachable(roots: &[Expr]) {
    let mut visited_functions: HashSet<*const FunctionDecl> = HashSet::new();
    for root in roots {
        visit_expr(root, &mut visited_functions);
    }
}

fn visit_expr(expr: &Expr, visited: &mut HashSet<*const FunctionDecl>) {
    match expr {
        Expr::ArrayLiteral { elements, .. } => {
            for e in elements {
                visit_expr(e, visited);
            }
        }
        Expr::Declaration { value, .. } => visit_expr(value, visited),
        Expr::Assignment { target, value, .. } => {
            visit_expr(target, visited);
            visit_expr(value, visited);
        }
        Expr::Return { value, .. } => {
            if let Some(value) = value {
                visit_expr(value, visited);
            }
        }
        Expr::If {
            condition,
            then_branch,
            else_branch,
            ..
        } => {
            visit_expr(condition, visited);
            visit_block(then_branch, visited);
            if let Some(else_branch) = else_branch {
                visit_block(else_branch, visited);
            }
        }
        Expr::StructLiteral { fields, .. } => {
            for (_, value) in fields {
                visit_expr(value, visited);
            }
        }
        Expr::FieldAccess { base, .. } => visit_expr(base, visited),
        Expr::AddressOf { operand, .. }
        | Expr::Dereference { operand, .. }
        | Expr::New { operand, .. } => visit_expr(operand, visited),
        Expr::Call {
            arguments, resolved, ..
        } => {
            for arg in arguments {
                visit_expr(arg, visited);
            }
            if let Some(resolution) = resolved.borrow().as_ref() {
                mark_function_used(&resolution.callee, &resolution.arguments, visited);
            }
        }
        Expr::Block(block) => visit_block(block, visited),
        Expr::IntLiteral { .. }
        | Expr::FloatLiteral { .. }
        | Expr::BoolLiteral { .. }
        | Expr::StringLiteral { .. }
        | Expr::Identifier { .. } => {}
    }
}

fn visit_block(block: &Block, visited: &mut HashSet<*const FunctionDecl>) {
    for stmt in &block.statements {
        visit_expr(stmt, visited);
    }
    if let Some(trailing) = &block.trailing {
        visit_expr(trailing, visited);
    }
}

/// Mark `decl` used; for a generic function also mark the specialization
/// matching `arguments`. Extern functions carry no body to recurse into and
/// need no specializations (spec.md §4.8 "Extern functions ... are marked
/// used directly").
fn mark_function_used(decl: &Rc<FunctionDecl>, arguments: &[crate::types::Type], visited: &mut HashSet<*const FunctionDecl>) {
    decl.is_used.set(true);

    if decl.is_generic() {
        let specializations = decl.specializations.borrow();
        if let Some(specialization) = specializations.iter().find(|s| s.matches(arguments)) {
            specialization.used.set(true);
        }
    }

    if decl.is_extern {
        return;
    }

    let ptr = Rc::as_ptr(decl);
    if !visited.insert(ptr) {
        return;
    }

    if let Some(body) = decl.body.borrow().as_ref() {
        match body {
            FunctionBody::Expression(expr) => visit_expr(expr, visited),
            FunctionBody::Block(block) => visit_block(block, visited),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{fresh_slot, AnalysisState, CallResolution, Param};
    use crate::span::Span;
    use crate::types::Type;
    use std::cell::{Cell, RefCell};

    fn leaf_function(name: &str) -> Rc<FunctionDecl> {
        Rc::new(FunctionDecl {
            name: name.to_string(),
            params: vec![],
            return_type: None,
            type_params: vec![],
            body: RefCell::new(Some(FunctionBody::Block(Block::statements_only(
                vec![],
                Span::default(),
            )))),
            is_extern: false,
            is_variadic: false,
            module: Rc::from("main"),
            span: Span::default(),
            state: Cell::new(AnalysisState::Analyzed),
            is_used: Cell::new(false),
            specializations: RefCell::new(vec![]),
            signature: RefCell::new(None),
        })
    }

    #[test]
    fn called_function_is_marked_used() {
        let callee = leaf_function("helper");
        let call = Expr::Call {
            callee: "helper".to_string(),
            arguments: vec![],
            mutable_args: vec![],
            resolved: RefCell::new(Some(CallResolution {
                callee: callee.clone(),
                arguments: vec![],
                return_type: Type::primitive("void"),
            })),
            type_slot: fresh_slot(),
            span: Span::default(),
        };
        mark_reachable(&[call]);
        assert!(callee.is_used.get());
    }

    #[test]
    fn unreferenced_function_stays_unmarked() {
        let callee = leaf_function("dead");
        mark_reachable(&[]);
        assert!(!callee.is_used.get());
    }

    #[test]
    fn only_the_targeted_specialization_is_marked() {
        let callee = Rc::new(FunctionDecl {
            name: "identity".to_string(),
            params: vec![Param {
                name: "x".to_string(),
                annotation: None,
                mutable: false,
                type_slot: fresh_slot(),
                span: Span::default(),
            }],
            return_type: None,
            type_params: vec![crate::ast::TypeParam {
                name: "T".to_string(),
                interfaces: vec![],
                fields: vec![],
            }],
            body: RefCell::new(Some(FunctionBody::Block(Block::statements_only(
                vec![],
                Span::default(),
            )))),
            is_extern: false,
            is_variadic: false,
            module: Rc::from("main"),
            span: Span::default(),
            state: Cell::new(AnalysisState::Analyzed),
            is_used: Cell::new(false),
            specializations: RefCell::new(vec![
                crate::ast::Specialization {
                    arguments: vec![Type::primitive("int64")],
                    return_type: Type::primitive("int64"),
                    bindings: Default::default(),
                    used: Cell::new(false),
                },
                crate::ast::Specialization {
                    arguments: vec![Type::primitive("float64")],
                    return_type: Type::primitive("float64"),
                    bindings: Default::default(),
                    used: Cell::new(false),
                },
            ]),
            signature: RefCell::new(None),
        });

        let call = Expr::Call {
            callee: "identity".to_string(),
            arguments: vec![],
            mutable_args: vec![],
            resolved: RefCell::new(Some(CallResolution {
                callee: callee.clone(),
                arguments: vec![Type::primitive("int64")],
                return_type: Type::primitive("int64"),
            })),
            type_slot: fresh_slot(),
            span: Span::default(),
        };
        mark_reachable(&[call]);

        let specializations = callee.specializations.borrow();
        assert!(specializations[0].used.get());
        assert!(!specializations[1].used.get());
    }
}
