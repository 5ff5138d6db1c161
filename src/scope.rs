//! Nested lexical scopes (spec.md §3.2/§4.3), adapted from
//! `why_lib::typechecker::scope::Scope`. The teacher keeps one frame with a
//! variables map, a constants map and a types map; this module keeps the two
//! maps the spec calls for instead — a mutable **variable-scope** and an
//! immutable-after-population **functions-and-types-scope** — since
//! constants and immutable variables collapse into one `Binding::Variable`
//! with a `mutable` flag here.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{FunctionDecl, InterfaceDecl, TypeSlot};
use crate::error::{ErrorKind, SemaError};
use crate::span::Span;
use crate::types::Type;

/// A function binding is a tagged union: either a set of non-generic
/// overloads, or a single generic function. Mixing the two under one name
/// is an error at declaration time (spec.md §4.3, §9 design notes).
#[derive(Debug, Clone)]
pub enum FunctionBinding {
    Concrete(Vec<Rc<FunctionDecl>>),
    Generic(Rc<FunctionDecl>),
}

#[derive(Debug, Clone)]
pub enum Binding {
    Variable { type_slot: TypeSlot, mutable: bool },
    FunctionArgument { type_slot: TypeSlot },
    Function(FunctionBinding),
    Interface(Rc<InterfaceDecl>),
    TypeDefinition(Type),
}

/// Dynamically-attached implementations discovered while resolving an
/// interface constraint against concrete types. Transient: cleared whenever
/// the frame that owns the binding is popped (spec.md §4.3).
#[derive(Debug, Default)]
struct InterfaceAttachments {
    attached: RefCell<Vec<Rc<FunctionDecl>>>,
}

#[derive(Debug, Default)]
struct Frame {
    variables: HashMap<String, Binding>,
    functions_and_types: HashMap<String, Binding>,
    interface_attachments: HashMap<String, Rc<InterfaceAttachments>>,
}

#[derive(Debug, Default)]
pub struct ScopeStack {
    frames: Vec<Frame>,
}

impl ScopeStack {
    pub fn new() -> ScopeStack {
        ScopeStack {
            frames: vec![Frame::default()],
        }
    }

    pub fn enter_scope(&mut self) {
        self.frames.push(Frame::default());
    }

    pub fn exit_scope(&mut self) {
        if let Some(frame) = self.frames.pop() {
            for attachments in frame.interface_attachments.values() {
                attachments.attached.borrow_mut().clear();
            }
        }
    }

    fn top_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("scope stack is never empty")
    }

    pub fn add_variable(
        &mut self,
        name: impl Into<String>,
        type_slot: TypeSlot,
        mutable: bool,
    ) -> Result<(), SemaError> {
        let name = name.into();
        self.top_mut()
            .variables
            .insert(name, Binding::Variable { type_slot, mutable });
        Ok(())
    }

    pub fn add_function_argument(&mut self, name: impl Into<String>, type_slot: TypeSlot) {
        self.top_mut()
            .variables
            .insert(name.into(), Binding::FunctionArgument { type_slot });
    }

    /// Merge into the overload set unless either side is generic.
    pub fn add_function(
        &mut self,
        name: impl Into<String>,
        decl: Rc<FunctionDecl>,
        span: Span,
    ) -> Result<(), SemaError> {
        let name = name.into();
        let frame = self.top_mut();
        match frame.functions_and_types.get(&name) {
            None => {
                let binding = if decl.is_generic() {
                    FunctionBinding::Generic(decl)
                } else {
                    FunctionBinding::Concrete(vec![decl])
                };
                frame
                    .functions_and_types
                    .insert(name, Binding::Function(binding));
                Ok(())
            }
            Some(Binding::Function(FunctionBinding::Concrete(existing))) if !decl.is_generic() => {
                let mut overloads = existing.clone();
                overloads.push(decl);
                frame
                    .functions_and_types
                    .insert(name, Binding::Function(FunctionBinding::Concrete(overloads)));
                Ok(())
            }
            Some(Binding::Function(_)) => Err(SemaError::new(
                span,
                ErrorKind::GenericOverloadConflict { name },
            )),
            Some(Binding::Interface(_)) => Err(SemaError::new(
                span,
                ErrorKind::GenericOverloadConflict { name },
            )),
            Some(_) => Err(SemaError::new(span, ErrorKind::RedefinedType { name })),
        }
    }

    pub fn add_interface(
        &mut self,
        name: impl Into<String>,
        decl: Rc<InterfaceDecl>,
        span: Span,
    ) -> Result<(), SemaError> {
        let name = name.into();
        let frame = self.top_mut();
        if frame.functions_and_types.contains_key(&name) {
            return Err(SemaError::new(span, ErrorKind::RedefinedType { name }));
        }
        frame
            .interface_attachments
            .insert(name.clone(), Rc::new(InterfaceAttachments::default()));
        frame
            .functions_and_types
            .insert(name, Binding::Interface(decl));
        Ok(())
    }

    pub fn add_type(
        &mut self,
        name: impl Into<String>,
        ty: Type,
        span: Span,
    ) -> Result<(), SemaError> {
        let name = name.into();
        let frame = self.top_mut();
        if frame.functions_and_types.contains_key(&name) {
            return Err(SemaError::new(span, ErrorKind::RedefinedType { name }));
        }
        frame
            .functions_and_types
            .insert(name, Binding::TypeDefinition(ty));
        Ok(())
    }

    /// Walks frames top-down, consulting variables first, then
    /// functions/types (spec.md §4.3).
    pub fn resolve(&self, name: &str) -> Option<Binding> {
        for frame in self.frames.iter().rev() {
            if let Some(binding) = frame.variables.get(name) {
                return Some(binding.clone());
            }
        }
        for frame in self.frames.iter().rev() {
            if let Some(binding) = frame.functions_and_types.get(name) {
                return Some(binding.clone());
            }
        }
        None
    }

    pub fn resolve_type(&self, name: &str) -> Option<Type> {
        match self.resolve(name)? {
            Binding::TypeDefinition(ty) => Some(ty),
            _ => None,
        }
    }

    pub fn resolve_function(&self, name: &str) -> Option<FunctionBinding> {
        match self.resolve(name)? {
            Binding::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn is_mutable(&self, name: &str) -> Option<bool> {
        match self.resolve(name)? {
            Binding::Variable { mutable, .. } => Some(mutable),
            Binding::FunctionArgument { .. } => Some(true),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::fresh_slot;

    #[test]
    fn shadowing_is_legal_for_variables() {
        let mut scope = ScopeStack::new();
        scope
            .add_variable("x", fresh_slot(), false)
            .expect("insert");
        scope.enter_scope();
        scope
            .add_variable("x", fresh_slot(), true)
            .expect("insert");
        assert!(matches!(
            scope.resolve("x"),
            Some(Binding::Variable { mutable: true, .. })
        ));
        scope.exit_scope();
        assert!(matches!(
            scope.resolve("x"),
            Some(Binding::Variable { mutable: false, .. })
        ));
    }

    #[test]
    fn bindings_never_leak_out_of_a_popped_frame() {
        let mut scope = ScopeStack::new();
        scope.enter_scope();
        scope
            .add_variable("local", fresh_slot(), false)
            .expect("insert");
        scope.exit_scope();
        assert!(scope.resolve("local").is_none());
    }

    #[test]
    fn variables_shadow_functions_of_the_same_name() {
        let mut scope = ScopeStack::new();
        let decl = Rc::new(crate::ast::FunctionDecl {
            name: "f".into(),
            params: vec![],
            return_type: None,
            type_params: vec![],
            body: RefCell::new(None),
            is_extern: true,
            is_variadic: false,
            module: Rc::from("main"),
            span: Span::default(),
            state: std::cell::Cell::new(crate::ast::AnalysisState::NotAnalyzed),
            is_used: std::cell::Cell::new(false),
            specializations: RefCell::new(vec![]),
            signature: RefCell::new(None),
        });
        scope
            .add_function("f", decl, Span::default())
            .expect("insert");
        scope.enter_scope();
        scope
            .add_variable("f", fresh_slot(), false)
            .expect("insert");
        assert!(matches!(scope.resolve("f"), Some(Binding::Variable { .. })));
    }
}
