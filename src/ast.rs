//! AST facade (spec.md §4.2) plus the node shapes the semantic core operates
//! over.
//!
//! Tokenization and parsing are out of scope (spec.md §1) — this module is
//! the *shape* of an already-built tree, not a parser. A real front-end
//! would construct `Program` values through [`crate::source::SourceProvider`]
//! however it likes; the fixtures under `tests/` and the `#[cfg(test)]`
//! modules throughout this crate build them by hand, the way
//! `why_lib::typechecker::scope` builds `Expression` values inline rather
//! than invoking a parser.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::span::Span;
use crate::types::Type;

/// A type annotation as written by the user, before it has been resolved
/// against a scope. Shares its shape with [`Type`] (see spec.md §3.1) but
/// parameters are themselves unresolved `TypeExpr`s and user type names are
/// plain strings rather than back-references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeExpr {
    Named(Rc<str>, Vec<TypeExpr>, Span),
}

impl TypeExpr {
    pub fn named(name: &str) -> TypeExpr {
        TypeExpr::Named(Rc::from(name), vec![], Span::default())
    }

    pub fn span(&self) -> Span {
        match self {
            TypeExpr::Named(_, _, span) => span.clone(),
        }
    }
}

/// A shared, mutably-updatable type slot. Every expression node owns one of
/// these so that unification can alias two expressions' slots instead of
/// copying, mirroring `why_lib::typechecker::scope::StoredVariable::type_id`.
pub type TypeSlot = Rc<RefCell<Type>>;

pub fn fresh_slot() -> TypeSlot {
    Rc::new(RefCell::new(Type::NoType))
}

#[derive(Debug, Clone)]
pub struct Block {
    pub statements: Vec<Expr>,
    /// The expression the block reduces to, if any ("a block qualifies [as
    /// an expression] only when it reduces to a single expression",
    /// spec.md §4.2).
    pub trailing: Option<Box<Expr>>,
    pub type_slot: TypeSlot,
    pub span: Span,
}

impl Block {
    pub fn statements_only(statements: Vec<Expr>, span: Span) -> Block {
        Block {
            statements,
            trailing: None,
            type_slot: fresh_slot(),
            span,
        }
    }

    pub fn expression(trailing: Expr, span: Span) -> Block {
        Block {
            statements: vec![],
            trailing: Some(Box::new(trailing)),
            type_slot: fresh_slot(),
            span,
        }
    }

    /// `could_be_expression` additionally permits a singleton
    /// statement-only block to be treated as if its one statement were the
    /// trailing expression (spec.md §4.2 "trivial rewriting of singleton
    /// blocks").
    pub fn could_be_expression(&self) -> bool {
        self.trailing.is_some() || self.statements.len() == 1
    }

    pub fn is_expression(&self) -> bool {
        self.trailing.is_some()
    }

    /// The expression a block yields, honoring the singleton-block
    /// rewriting rule.
    pub fn yields(&self) -> Option<&Expr> {
        self.trailing
            .as_deref()
            .or_else(|| self.statements.first())
    }
}

#[derive(Debug, Clone)]
pub struct CallResolution {
    pub callee: Rc<FunctionDecl>,
    pub arguments: Vec<Type>,
    pub return_type: Type,
}

#[derive(Debug, Clone)]
pub enum Expr {
    IntLiteral {
        value: i64,
        annotation: Option<TypeExpr>,
        type_slot: TypeSlot,
        span: Span,
    },
    FloatLiteral {
        value: f64,
        annotation: Option<TypeExpr>,
        type_slot: TypeSlot,
        span: Span,
    },
    BoolLiteral {
        value: bool,
        type_slot: TypeSlot,
        span: Span,
    },
    StringLiteral {
        value: String,
        type_slot: TypeSlot,
        span: Span,
    },
    ArrayLiteral {
        elements: Vec<Expr>,
        type_slot: TypeSlot,
        span: Span,
    },
    Identifier {
        name: String,
        type_slot: TypeSlot,
        span: Span,
    },
    Declaration {
        name: String,
        mutable: bool,
        annotation: Option<TypeExpr>,
        value: Box<Expr>,
        type_slot: TypeSlot,
        span: Span,
    },
    Assignment {
        target: Box<Expr>,
        value: Box<Expr>,
        type_slot: TypeSlot,
        span: Span,
    },
    Return {
        value: Option<Box<Expr>>,
        type_slot: TypeSlot,
        span: Span,
    },
    If {
        condition: Box<Expr>,
        then_branch: Block,
        else_branch: Option<Block>,
        type_slot: TypeSlot,
        span: Span,
    },
    StructLiteral {
        type_name: String,
        fields: Vec<(String, Expr)>,
        type_slot: TypeSlot,
        span: Span,
    },
    FieldAccess {
        base: Box<Expr>,
        path: Vec<String>,
        type_slot: TypeSlot,
        span: Span,
    },
    AddressOf {
        operand: Box<Expr>,
        type_slot: TypeSlot,
        span: Span,
    },
    Dereference {
        operand: Box<Expr>,
        type_slot: TypeSlot,
        span: Span,
    },
    New {
        operand: Box<Expr>,
        type_slot: TypeSlot,
        span: Span,
    },
    Call {
        callee: String,
        arguments: Vec<Expr>,
        /// Which actuals were passed with `mut` (overload resolution
        /// preserves mutability, spec.md §4.7).
        mutable_args: Vec<bool>,
        resolved: RefCell<Option<CallResolution>>,
        type_slot: TypeSlot,
        span: Span,
    },
    Block(Box<Block>),
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::IntLiteral { span, .. }
            | Expr::FloatLiteral { span, .. }
            | Expr::BoolLiteral { span, .. }
            | Expr::StringLiteral { span, .. }
            | Expr::ArrayLiteral { span, .. }
            | Expr::Identifier { span, .. }
            | Expr::Declaration { span, .. }
            | Expr::Assignment { span, .. }
            | Expr::Return { span, .. }
            | Expr::If { span, .. }
            | Expr::StructLiteral { span, .. }
            | Expr::FieldAccess { span, .. }
            | Expr::AddressOf { span, .. }
            | Expr::Dereference { span, .. }
            | Expr::New { span, .. }
            | Expr::Call { span, .. } => span.clone(),
            Expr::Block(b) => b.span.clone(),
        }
    }

    pub fn type_slot(&self) -> TypeSlot {
        match self {
            Expr::IntLiteral { type_slot, .. }
            | Expr::FloatLiteral { type_slot, .. }
            | Expr::BoolLiteral { type_slot, .. }
            | Expr::StringLiteral { type_slot, .. }
            | Expr::ArrayLiteral { type_slot, .. }
            | Expr::Identifier { type_slot, .. }
            | Expr::Declaration { type_slot, .. }
            | Expr::Assignment { type_slot, .. }
            | Expr::Return { type_slot, .. }
            | Expr::If { type_slot, .. }
            | Expr::StructLiteral { type_slot, .. }
            | Expr::FieldAccess { type_slot, .. }
            | Expr::AddressOf { type_slot, .. }
            | Expr::Dereference { type_slot, .. }
            | Expr::New { type_slot, .. }
            | Expr::Call { type_slot, .. } => type_slot.clone(),
            Expr::Block(b) => b.type_slot.clone(),
        }
    }

    /// spec.md §4.2: branches, calls, literals, identifiers qualify; blocks
    /// only when they reduce to a single expression; if/else only when both
    /// branches qualify and an `else` exists.
    pub fn is_expression(&self) -> bool {
        match self {
            Expr::Block(b) => b.is_expression(),
            Expr::If {
                then_branch,
                else_branch,
                ..
            } => {
                let Some(else_branch) = else_branch else {
                    return false;
                };
                then_branch.is_expression() && else_branch.is_expression()
            }
            _ => true,
        }
    }

    pub fn could_be_expression(&self) -> bool {
        match self {
            Expr::Block(b) => b.could_be_expression(),
            Expr::If {
                then_branch,
                else_branch,
                ..
            } => {
                let Some(else_branch) = else_branch else {
                    return false;
                };
                then_branch.could_be_expression() && else_branch.could_be_expression()
            }
            _ => true,
        }
    }
}

/// `get_type`/`set_type` (spec.md §4.2).
pub fn get_type(expr: &Expr) -> Type {
    expr.type_slot().borrow().clone()
}

pub fn set_type(expr: &Expr, ty: Type) {
    *expr.type_slot().borrow_mut() = ty;
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub annotation: Option<TypeExpr>,
    /// Declared `mut`: overload resolution rejects a call unless a `mut`
    /// actual lines up with a `mut` formal and vice versa (spec.md §4.7
    /// step 2 "Preserve mutability").
    pub mutable: bool,
    pub type_slot: TypeSlot,
    pub span: Span,
}

/// A type-parameter's declared constraints: the interfaces it must satisfy
/// and the fields it must structurally carry (spec.md §3.3).
#[derive(Debug, Clone, Default)]
pub struct TypeParam {
    pub name: String,
    pub interfaces: Vec<String>,
    pub fields: Vec<(String, TypeExpr)>,
}

#[derive(Debug, Clone)]
pub enum FunctionBody {
    Expression(Box<Expr>),
    Block(Block),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisState {
    NotAnalyzed,
    BeingAnalyzed,
    Analyzed,
    /// Every parameter and the return type are concrete at declaration; no
    /// inference is required (spec.md §3.3).
    CompletelyTyped,
}

#[derive(Debug, Clone)]
pub struct Specialization {
    pub arguments: Vec<Type>,
    pub return_type: Type,
    pub bindings: std::collections::HashMap<Rc<str>, Type>,
    pub used: Cell<bool>,
}

impl Specialization {
    /// spec.md §3.4: two specializations of the same function are equal iff
    /// their argument tuples are equal element-wise.
    pub fn matches(&self, arguments: &[Type]) -> bool {
        self.arguments.len() == arguments.len()
            && self
                .arguments
                .iter()
                .zip(arguments)
                .all(|(a, b)| a.equals(b))
    }
}

#[derive(Debug)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: Option<TypeExpr>,
    pub type_params: Vec<TypeParam>,
    pub body: RefCell<Option<FunctionBody>>,
    pub is_extern: bool,
    pub is_variadic: bool,
    pub module: Rc<str>,
    pub span: Span,
    pub state: Cell<AnalysisState>,
    pub is_used: Cell<bool>,
    pub specializations: RefCell<Vec<Specialization>>,
    pub signature: RefCell<Option<Type>>,
}

impl FunctionDecl {
    pub fn is_generic(&self) -> bool {
        !self.type_params.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct TypeDecl {
    pub name: String,
    pub fields: Vec<(String, TypeExpr)>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct InterfaceMethod {
    pub name: String,
    pub params: Vec<TypeExpr>,
    pub return_type: TypeExpr,
}

#[derive(Debug, Clone)]
pub struct InterfaceDecl {
    pub name: String,
    pub methods: Vec<InterfaceMethod>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum Directive {
    /// Non-transitive: visible only in the importing module.
    Use(String, Span),
    /// Transitive: re-exported into importers of the including module.
    Include(String, Span),
}

#[derive(Debug)]
pub struct Program {
    pub module: Rc<str>,
    pub directives: Vec<Directive>,
    pub type_decls: Vec<Rc<TypeDecl>>,
    pub interface_decls: Vec<Rc<InterfaceDecl>>,
    pub functions: Vec<Rc<FunctionDecl>>,
    pub statements: Vec<Expr>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> Expr {
        Expr::Identifier {
            name: name.to_string(),
            type_slot: fresh_slot(),
            span: Span::default(),
        }
    }

    #[test]
    fn singleton_block_could_be_expression_but_is_not() {
        let block = Block::statements_only(vec![id("x")], Span::default());
        assert!(!block.is_expression());
        assert!(block.could_be_expression());
        assert!(block.yields().is_some());
    }

    #[test]
    fn if_without_else_is_never_an_expression() {
        let expr = Expr::If {
            condition: Box::new(id("cond")),
            then_branch: Block::expression(id("a"), Span::default()),
            else_branch: None,
            type_slot: fresh_slot(),
            span: Span::default(),
        };
        assert!(!expr.is_expression());
        assert!(!expr.could_be_expression());
    }

    #[test]
    fn get_and_set_type_share_the_slot() {
        let expr = id("x");
        set_type(&expr, Type::primitive("int64"));
        assert_eq!(get_type(&expr), Type::primitive("int64"));
    }
}
