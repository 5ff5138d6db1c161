//! Canonical semantic type representation (spec.md §3.1/§4.1).
//!
//! A `Type` is a tagged sum: absence, an inference variable, a surface
//! polymorphic parameter, a nominal type (primitive, built-in or user
//! struct), or a structural record used for field-access constraints before
//! a variable's nominal type is known.

use std::collections::HashMap;
use std::fmt::{self, Display};
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::ast::TypeDecl;

/// The closed set of primitive names (spec.md §3.1).
pub const PRIMITIVES: &[&str] = &[
    "int8", "int16", "int32", "int64", "float32", "float64", "bool", "string", "void",
];

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum Type {
    NoType,
    TypeVariable(u64),
    FinalTypeVariable(Rc<str>),
    Nominal(Nominal),
    Struct(StructType),
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Nominal {
    pub name: Rc<str>,
    pub params: Vec<Type>,
    /// Borrowed back-reference into the AST arena for user structs. Never
    /// participates in equality or hashing — two nominal types with the same
    /// name and parameters are the same type regardless of which AST node
    /// first declared it.
    #[serde(skip)]
    pub def: Option<Rc<TypeDecl>>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StructType {
    pub fields: Vec<(Rc<str>, Type)>,
    pub open: bool,
}

impl Type {
    pub fn primitive(name: &str) -> Type {
        Type::Nominal(Nominal {
            name: Rc::from(name),
            params: vec![],
            def: None,
        })
    }

    pub fn pointer(inner: Type) -> Type {
        Type::Nominal(Nominal {
            name: Rc::from("pointer"),
            params: vec![inner],
            def: None,
        })
    }

    pub fn boxed(inner: Type) -> Type {
        Type::Nominal(Nominal {
            name: Rc::from("boxed"),
            params: vec![inner],
            def: None,
        })
    }

    /// `size` is `None` for an unknown-length array (`arrayN` with no known
    /// `N` yet, e.g. an empty array literal in a generic context).
    pub fn array(size: Option<u64>, element: Type) -> Type {
        let name = match size {
            Some(n) => format!("array{n}"),
            None => "array".to_string(),
        };
        Type::Nominal(Nominal {
            name: Rc::from(name.as_str()),
            params: vec![element],
            def: None,
        })
    }

    pub fn nominal_name(&self) -> Option<&str> {
        match self {
            Type::Nominal(n) => Some(&n.name),
            _ => None,
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self.nominal_name(),
            Some("int8" | "int16" | "int32" | "int64")
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self.nominal_name(), Some("float32" | "float64"))
    }

    pub fn is_pointer(&self) -> bool {
        self.nominal_name() == Some("pointer")
    }

    pub fn is_boxed(&self) -> bool {
        self.nominal_name() == Some("boxed")
    }

    pub fn is_array(&self) -> bool {
        self.nominal_name().is_some_and(|n| n.starts_with("array"))
    }

    pub fn is_struct_type(&self) -> bool {
        matches!(self, Type::Struct(_))
    }

    /// On `arrayN` with a known size, the size. `None` for unknown-length
    /// arrays or non-array types (spec.md §4.1 `get_array_size`).
    pub fn array_size(&self) -> Option<u64> {
        let name = self.nominal_name()?;
        let suffix = name.strip_prefix("array")?;
        if suffix.is_empty() {
            return None;
        }
        suffix.parse().ok()
    }

    pub fn array_element(&self) -> Option<&Type> {
        match self {
            Type::Nominal(n) if self.is_array() => n.params.first(),
            _ => None,
        }
    }

    pub fn is_concrete(&self) -> bool {
        match self {
            Type::NoType | Type::TypeVariable(_) | Type::FinalTypeVariable(_) => false,
            Type::Nominal(n) => n.params.iter().all(Type::is_concrete),
            Type::Struct(s) => s.fields.iter().all(|(_, t)| t.is_concrete()),
        }
    }

    /// Structural equality (spec.md §4.1 `equals`).
    ///
    /// `StructType` equality is intentionally asymmetric: every field named
    /// on the left must be present and equal on the right, but the right may
    /// carry extra fields. This is only ever used for display/diagnostics,
    /// never to decide unification (the unifier always compares the same
    /// direction it was built to compare).
    pub fn equals(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::NoType, Type::NoType) => true,
            (Type::TypeVariable(a), Type::TypeVariable(b)) => a == b,
            (Type::FinalTypeVariable(a), Type::FinalTypeVariable(b)) => a == b,
            (Type::Nominal(a), Type::Nominal(b)) => {
                a.name == b.name
                    && a.params.len() == b.params.len()
                    && a.params.iter().zip(&b.params).all(|(x, y)| x.equals(y))
            }
            (Type::Struct(a), Type::Struct(b)) => a.fields.iter().all(|(name, ty)| {
                b.fields
                    .iter()
                    .any(|(bname, bty)| bname == name && ty.equals(bty))
            }),
            _ => false,
        }
    }

    /// Replace every `FinalTypeVariable` whose id appears in `bindings`,
    /// recursing into nominal parameters and struct fields. Fails if a
    /// `FinalTypeVariable` not covered by `bindings` is encountered — by
    /// emission time every surface variable must have been solved.
    pub fn substitute(&self, bindings: &HashMap<Rc<str>, Type>) -> Result<Type, String> {
        match self {
            Type::NoType | Type::TypeVariable(_) => Ok(self.clone()),
            Type::FinalTypeVariable(id) => bindings
                .get(id)
                .cloned()
                .ok_or_else(|| format!("unresolved final type variable '{id}'")),
            Type::Nominal(n) => {
                let mut params = Vec::with_capacity(n.params.len());
                for p in &n.params {
                    params.push(p.substitute(bindings)?);
                }
                Ok(Type::Nominal(Nominal {
                    name: n.name.clone(),
                    params,
                    def: n.def.clone(),
                }))
            }
            Type::Struct(s) => {
                let mut fields = Vec::with_capacity(s.fields.len());
                for (name, ty) in &s.fields {
                    fields.push((name.clone(), ty.substitute(bindings)?));
                }
                Ok(Type::Struct(StructType {
                    fields,
                    open: s.open,
                }))
            }
        }
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::NoType => write!(f, "<no type>"),
            Type::TypeVariable(id) => write!(f, "?{id}"),
            Type::FinalTypeVariable(id) => write!(f, "'{id}"),
            Type::Nominal(n) if n.params.is_empty() => write!(f, "{}", n.name),
            Type::Nominal(n) => {
                let params = n
                    .params
                    .iter()
                    .map(|p| p.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{}[{}]", n.name, params)
            }
            Type::Struct(s) => {
                let fields = s
                    .fields
                    .iter()
                    .map(|(name, ty)| format!("{name}: {ty}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{{{fields}}}")
            }
        }
    }
}

// Hashing and equality key types by their canonical string form so a `Type`
// can be used as a map key (spec.md §4.1 `hash`).
impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

impl Eq for Type {}

impl Hash for Type {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_string().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_are_concrete() {
        assert!(Type::primitive("int64").is_concrete());
        assert!(!Type::TypeVariable(0).is_concrete());
    }

    #[test]
    fn array_size_roundtrip() {
        let arr = Type::array(Some(3), Type::primitive("int64"));
        assert_eq!(arr.array_size(), Some(3));
        let open = Type::array(None, Type::primitive("int64"));
        assert_eq!(open.array_size(), None);
    }

    #[test]
    fn struct_equality_is_asymmetric() {
        let narrow = Type::Struct(StructType {
            fields: vec![(Rc::from("x"), Type::primitive("int64"))],
            open: true,
        });
        let wide = Type::Struct(StructType {
            fields: vec![
                (Rc::from("x"), Type::primitive("int64")),
                (Rc::from("y"), Type::primitive("int64")),
            ],
            open: false,
        });
        assert!(narrow.equals(&wide));
        assert!(!wide.equals(&narrow));
    }

    #[test]
    fn substitute_replaces_final_vars() {
        let mut bindings = HashMap::new();
        bindings.insert(Rc::from("a"), Type::primitive("int64"));
        let t = Type::array(Some(1), Type::FinalTypeVariable(Rc::from("a")));
        assert_eq!(
            t.substitute(&bindings).unwrap(),
            Type::array(Some(1), Type::primitive("int64"))
        );
    }

    #[test]
    fn substitute_fails_on_unknown_final_var() {
        let t = Type::FinalTypeVariable(Rc::from("z"));
        assert!(t.substitute(&HashMap::new()).is_err());
    }
}
