//! Pass 2: the unifier (spec.md §4.6). Invoked once per function body (and
//! once for the top-level program block); inference state never leaks
//! between functions, mirroring the teacher's "each function gets a private
//! solver".

use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::Expr;
use crate::constraints::{compose_interfaces, default_for_interface, ConstraintStore, VarId};
use crate::error::{ErrorKind, SemaError};
use crate::span::Span;
use crate::types::Type;

/// DSU over canonical type keys (a type's `Display` string already keys it
/// uniquely per spec.md §4.1 `hash`, so that string doubles as the union-find
/// key).
#[derive(Default)]
struct DisjointSet {
    parent: HashMap<String, String>,
}

impl DisjointSet {
    fn find(&mut self, key: &str) -> String {
        let parent = self
            .parent
            .entry(key.to_string())
            .or_insert_with(|| key.to_string())
            .clone();
        if parent == key {
            return parent;
        }
        let root = self.find(&parent);
        self.parent.insert(key.to_string(), root.clone());
        root
    }

    fn union(&mut self, a: &str, b: &str) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent.insert(ra, rb);
        }
    }
}

fn is_variable(ty: &Type) -> bool {
    matches!(ty, Type::TypeVariable(_) | Type::FinalTypeVariable(_))
}

pub struct Labeling {
    /// Representative concrete (or defaulted) type per original
    /// `TypeVariable` id, ready to be spliced back into the AST.
    pub var_to_type: HashMap<VarId, Type>,
}

/// Run the unifier over one function's (or the top-level block's)
/// constraint store.
pub fn solve(store: &mut ConstraintStore, span: &Span) -> Result<Labeling, SemaError> {
    // Step 1: merge equivalence classes that share any element, to a fixed
    // point. The classes as emitted are small (mostly pairs); DSU gives us
    // the transitive closure for free.
    let mut dsu = DisjointSet::default();
    let mut members: HashMap<String, Vec<Type>> = HashMap::new();
    for class in &store.classes {
        if class.is_empty() {
            continue;
        }
        let first_key = class[0].to_string();
        for ty in &class[1..] {
            dsu.union(&first_key, &ty.to_string());
        }
        for ty in class {
            members.entry(ty.to_string()).or_default().push(ty.clone());
        }
    }

    let mut groups: HashMap<String, Vec<Type>> = HashMap::new();
    for (key, types) in members {
        let root = dsu.find(&key);
        groups.entry(root).or_default().extend(types);
    }

    // Step 2: label each class.
    let mut var_to_type: HashMap<VarId, Type> = HashMap::new();
    let mut representative_by_root: HashMap<String, Type> = HashMap::new();
    let mut next_label: usize = 0;

    for (root, types) in &groups {
        let mut concrete: Option<Type> = None;
        for ty in types {
            if !is_variable(ty) {
                match &concrete {
                    None => concrete = Some(ty.clone()),
                    Some(existing) if existing.equals(ty) => {}
                    Some(existing) => {
                        return Err(SemaError::new(
                            span.clone(),
                            ErrorKind::IncompatibleTypes {
                                expected: existing.clone(),
                                actual: ty.clone(),
                            },
                        ));
                    }
                }
            }
        }

        // Step 3: propagate interface constraints across the class.
        let mut domain: Vec<Rc<str>> = vec![];
        for ty in types {
            if let Type::TypeVariable(id) = ty {
                if let Some(ifaces) = store.interface_constraints.get(id) {
                    for iface in ifaces {
                        if !domain.contains(iface) {
                            domain.push(iface.clone());
                        }
                    }
                }
            }
        }
        let composed = compose_interfaces(&domain).map_err(|(a, b)| {
            SemaError::new(
                span.clone(),
                ErrorKind::ConstraintFailed {
                    interface: format!("{a} vs {b}"),
                    found: concrete.clone().unwrap_or(Type::NoType),
                },
            )
        })?;

        let representative = match concrete {
            Some(ty) => ty,
            None => {
                // Step 4 (partial): default a class bound only by interface
                // constraints; otherwise mint a fresh FinalTypeVariable.
                if let Some(first) = composed.first() {
                    if let Some(defaulted) = default_for_interface(first) {
                        defaulted
                    } else {
                        let label = label_for(next_label);
                        next_label += 1;
                        Type::FinalTypeVariable(Rc::from(label.as_str()))
                    }
                } else {
                    let label = label_for(next_label);
                    next_label += 1;
                    Type::FinalTypeVariable(Rc::from(label.as_str()))
                }
            }
        };

        representative_by_root.insert(root.clone(), representative.clone());
        for ty in types {
            if let Type::TypeVariable(id) = ty {
                var_to_type.insert(*id, representative.clone());
            }
        }
    }

    Ok(Labeling { var_to_type })
}

/// Spreadsheet-style label allocation: a, b, ..., z, aa, ab, ...
fn label_for(mut n: usize) -> String {
    let mut chars = vec![];
    loop {
        chars.push((b'a' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    chars.into_iter().rev().collect()
}

/// Step 4 (finalize): replace every original `TypeVariable` everywhere in
/// the AST with its class representative.
pub fn resolve_vars_in_type(ty: &Type, mapping: &HashMap<VarId, Type>) -> Type {
    match ty {
        Type::TypeVariable(id) => mapping.get(id).cloned().unwrap_or_else(|| ty.clone()),
        Type::Nominal(n) => Type::Nominal(crate::types::Nominal {
            name: n.name.clone(),
            params: n
                .params
                .iter()
                .map(|p| resolve_vars_in_type(p, mapping))
                .collect(),
            def: n.def.clone(),
        }),
        Type::Struct(s) => Type::Struct(crate::types::StructType {
            fields: s
                .fields
                .iter()
                .map(|(name, t)| (name.clone(), resolve_vars_in_type(t, mapping)))
                .collect(),
            open: s.open,
        }),
        _ => ty.clone(),
    }
}

pub fn finalize_expr(expr: &Expr, mapping: &HashMap<VarId, Type>) {
    let slot = expr.type_slot();
    let resolved = resolve_vars_in_type(&slot.borrow().clone(), mapping);
    *slot.borrow_mut() = resolved;

    match expr {
        Expr::ArrayLiteral { elements, .. } => {
            for e in elements {
                finalize_expr(e, mapping);
            }
        }
        Expr::Declaration { value, .. } => finalize_expr(value, mapping),
        Expr::Assignment { target, value, .. } => {
            finalize_expr(target, mapping);
            finalize_expr(value, mapping);
        }
        Expr::Return { value, .. } => {
            if let Some(value) = value {
                finalize_expr(value, mapping);
            }
        }
        Expr::If {
            condition,
            then_branch,
            else_branch,
            ..
        } => {
            finalize_expr(condition, mapping);
            finalize_block(then_branch, mapping);
            if let Some(else_branch) = else_branch {
                finalize_block(else_branch, mapping);
            }
        }
        Expr::StructLiteral { fields, .. } => {
            for (_, value) in fields {
                finalize_expr(value, mapping);
            }
        }
        Expr::FieldAccess { base, .. } => finalize_expr(base, mapping),
        Expr::AddressOf { operand, .. }
        | Expr::Dereference { operand, .. }
        | Expr::New { operand, .. } => finalize_expr(operand, mapping),
        Expr::Call { arguments, .. } => {
            for arg in arguments {
                finalize_expr(arg, mapping);
            }
        }
        Expr::Block(block) => finalize_block(block, mapping),
        Expr::IntLiteral { .. }
        | Expr::FloatLiteral { .. }
        | Expr::BoolLiteral { .. }
        | Expr::StringLiteral { .. }
        | Expr::Identifier { .. } => {}
    }
}

fn finalize_block(block: &crate::ast::Block, mapping: &HashMap<VarId, Type>) {
    for stmt in &block.statements {
        finalize_expr(stmt, mapping);
    }
    if let Some(trailing) = &block.trailing {
        finalize_expr(trailing, mapping);
    }
    let resolved = resolve_vars_in_type(&block.type_slot.borrow().clone(), mapping);
    *block.type_slot.borrow_mut() = resolved;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::ConstraintStore;

    #[test]
    fn labels_are_spreadsheet_style() {
        assert_eq!(label_for(0), "a");
        assert_eq!(label_for(25), "z");
        assert_eq!(label_for(26), "aa");
    }

    #[test]
    fn integer_literal_defaults_to_int64() {
        let mut store = ConstraintStore::default();
        let v = store.fresh_var();
        if let Type::TypeVariable(id) = v.clone() {
            store.require_interface(id, "Number");
        }
        store.unify_many(vec![v.clone()]);
        let labeling = solve(&mut store, &Span::default()).expect("solves");
        if let Type::TypeVariable(id) = v {
            assert_eq!(labeling.var_to_type[&id], Type::primitive("int64"));
        }
    }

    #[test]
    fn conflicting_concrete_types_error() {
        let mut store = ConstraintStore::default();
        store.unify(Type::primitive("int64"), Type::primitive("bool"));
        assert!(solve(&mut store, &Span::default()).is_err());
    }

    #[test]
    fn unbound_variable_becomes_final_type_variable() {
        let mut store = ConstraintStore::default();
        let v = store.fresh_var();
        store.unify_many(vec![v.clone()]);
        let labeling = solve(&mut store, &Span::default()).expect("solves");
        if let Type::TypeVariable(id) = v {
            assert!(matches!(
                labeling.var_to_type[&id],
                Type::FinalTypeVariable(_)
            ));
        }
    }
}
