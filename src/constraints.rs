//! Constraint store for a single function analysis (spec.md §3.5), modeled
//! per the §9 design note: equivalence classes are produced by collection as
//! raw pairs/sets and merged to a fixed point by the unifier via a
//! union-find keyed on each type's canonical string (`Type`'s `Hash`/`Eq`
//! already key off that string, spec.md §4.1 `hash`).

use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::TypeParam;
use crate::types::Type;

pub type VarId = u64;

/// A parameter-list shape constraint: "must be a `pointer[X]` for some X"
/// (spec.md §3.5 `parameter_constraints`).
#[derive(Debug, Clone)]
pub struct ParameterConstraint {
    pub nominal_name: Rc<str>,
    pub arity: usize,
}

#[derive(Debug, Default)]
pub struct ConstraintStore {
    next_var: VarId,
    /// Raw emitted equivalence requirements; merged to a fixed point by the
    /// unifier, not here (spec.md §4.6 step 1).
    pub classes: Vec<Vec<Type>>,
    pub interface_constraints: HashMap<VarId, Vec<Rc<str>>>,
    /// Insertion-ordered `(field_name, type_variable)` pairs per base
    /// variable (spec.md §9 "Structural field constraints").
    pub field_constraints: HashMap<VarId, Vec<(Rc<str>, VarId)>>,
    pub parameter_constraints: HashMap<VarId, ParameterConstraint>,
    /// Final substitution produced per function specialization (spec.md
    /// §3.5 `type_bindings`).
    pub type_bindings: HashMap<Rc<str>, Type>,
}

impl ConstraintStore {
    pub fn fresh_var(&mut self) -> Type {
        let id = self.next_var;
        self.next_var += 1;
        Type::TypeVariable(id)
    }

    pub fn unify(&mut self, a: Type, b: Type) {
        self.classes.push(vec![a, b]);
    }

    pub fn unify_many(&mut self, types: Vec<Type>) {
        if types.len() > 1 {
            self.classes.push(types);
        }
    }

    pub fn require_interface(&mut self, var: VarId, interface: &str) {
        self.interface_constraints
            .entry(var)
            .or_default()
            .push(Rc::from(interface));
    }

    pub fn require_field(&mut self, base: VarId, field: &str, field_var: VarId) {
        self.field_constraints
            .entry(base)
            .or_default()
            .push((Rc::from(field), field_var));
    }

    pub fn require_parameter_shape(&mut self, var: VarId, nominal_name: &str, arity: usize) {
        self.parameter_constraints.insert(
            var,
            ParameterConstraint {
                nominal_name: Rc::from(nominal_name),
                arity,
            },
        );
    }
}

/// Interface domain lattice used when propagating constraints across a
/// merged equivalence class (spec.md §4.6 step 3): `Number` ⊓ `Float` =
/// `Float`; any two others that disagree is an error.
pub fn compose_interfaces(domain: &[Rc<str>]) -> Result<Vec<Rc<str>>, (Rc<str>, Rc<str>)> {
    let mut composed: Vec<Rc<str>> = vec![];
    for iface in domain {
        if iface.as_ref() == "Number" && composed.iter().any(|i| i.as_ref() == "Float") {
            continue;
        }
        if iface.as_ref() == "Float" {
            composed.retain(|i| i.as_ref() != "Number");
            if !composed.iter().any(|i| i.as_ref() == "Float") {
                composed.push(iface.clone());
            }
            continue;
        }
        if !composed.contains(iface) {
            if let Some(conflict) = composed
                .iter()
                .find(|existing| is_conflicting_pair(existing, iface))
            {
                return Err((conflict.clone(), iface.clone()));
            }
            composed.push(iface.clone());
        }
    }
    Ok(composed)
}

fn is_conflicting_pair(a: &str, b: &str) -> bool {
    let numericish = |s: &str| matches!(s, "Number" | "Float");
    !numericish(a) && !numericish(b) && a != b
}

pub fn default_for_interface(interface: &str) -> Option<Type> {
    match interface {
        "Number" => Some(Type::primitive("int64")),
        "Float" => Some(Type::primitive("float64")),
        _ => None,
    }
}

/// Resolve a type-parameter's declared interface/field constraints into the
/// store at the variable representing it.
pub fn seed_type_param_constraints(store: &mut ConstraintStore, var: VarId, param: &TypeParam) {
    for iface in &param.interfaces {
        store.require_interface(var, iface);
    }
    for (field_name, _field_type) in &param.fields {
        let field_var = store.fresh_var();
        if let Type::TypeVariable(id) = field_var {
            store.require_field(var, field_name, id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_and_float_compose_to_float() {
        let composed =
            compose_interfaces(&[Rc::from("Number"), Rc::from("Float")]).expect("no conflict");
        assert_eq!(composed, vec![Rc::<str>::from("Float")]);
    }

    #[test]
    fn unrelated_interfaces_conflict() {
        assert!(compose_interfaces(&[Rc::from("Ord"), Rc::from("Show")]).is_err());
    }

    #[test]
    fn defaulting_picks_int64_and_float64() {
        assert_eq!(default_for_interface("Number"), Some(Type::primitive("int64")));
        assert_eq!(
            default_for_interface("Float"),
            Some(Type::primitive("float64"))
        );
        assert_eq!(default_for_interface("Ord"), None);
    }
}
