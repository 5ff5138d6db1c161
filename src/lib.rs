//! Semantic analysis core for a statically-typed, ahead-of-time compiler
//! front-end: constraint-based type inference with parametric polymorphism,
//! interface and structural-field constraints, overload resolution,
//! monomorphization via specialization, and lazy cross-module resolution.
//!
//! Tokenization and parsing live outside this crate (see [`source`]); this
//! crate starts from an already-built [`ast::Program`] and runs it through
//! four passes per function: collect ([`collector`]), unify ([`unify`]),
//! specialize ([`specialize`]), and mark usage ([`usage`]).

pub mod ast;
pub mod collector;
pub mod constraints;
pub mod error;
pub mod intrinsics;
pub mod module;
pub mod scope;
pub mod source;
pub mod span;
pub mod specialize;
pub mod types;
pub mod unify;
pub mod usage;

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use ast::{AnalysisState, FunctionBody, FunctionDecl, Program, TypeExpr};
use collector::Collector;
use constraints::ConstraintStore;
use error::{ErrorChannel, ErrorKind, SemaError};
use module::{ModuleLoader, ModuleTable};
use scope::ScopeStack;
use source::{ProgramParser, SourceProvider};
use span::Span;
use types::{Nominal, Type};

/// Register one loaded module's type, interface and function declarations
/// into `scope`, the same shallow pass `register_program_declarations` runs
/// over a module's own declarations (spec.md §4.4: "an imported symbol
/// behaves as if declared in the importing module").
fn register_module_exports(
    loaded: &Program,
    scope: &mut ScopeStack,
    imported_functions: &RefCell<Vec<Rc<FunctionDecl>>>,
    errors: &RefCell<Vec<SemaError>>,
) {
    for type_decl in &loaded.type_decls {
        let ty = Type::Nominal(Nominal {
            name: Rc::from(type_decl.name.as_str()),
            params: vec![],
            def: Some(type_decl.clone()),
        });
        if let Err(err) = scope.add_type(type_decl.name.clone(), ty, type_decl.span.clone()) {
            errors.borrow_mut().push(err);
        }
    }
    for interface_decl in &loaded.interface_decls {
        if let Err(err) = scope.add_interface(
            interface_decl.name.clone(),
            interface_decl.clone(),
            interface_decl.span.clone(),
        ) {
            errors.borrow_mut().push(err);
        }
    }
    for function in &loaded.functions {
        if let Err(err) =
            scope.add_function(function.name.clone(), function.clone(), function.span.clone())
        {
            errors.borrow_mut().push(err);
        }
        imported_functions.borrow_mut().push(function.clone());
    }
}

/// Compiler-internal tuning knobs, threaded through the [`Analyzer`] the
/// way `why_lib`'s `TypeChecker` threads its `Context`. Not a user-facing
/// config surface — no file format, no env var parsing.
#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    pub default_integer_type: String,
    pub default_float_type: String,
    pub max_specialization_depth: usize,
    pub stdlib_root: PathBuf,
}

impl Default for AnalysisOptions {
    fn default() -> AnalysisOptions {
        AnalysisOptions {
            default_integer_type: "int64".to_string(),
            default_float_type: "float64".to_string(),
            max_specialization_depth: 256,
            stdlib_root: PathBuf::from("/usr/local/lib/nova/std"),
        }
    }
}

/// Top-level façade orchestrating the four passes over one compilation
/// unit's functions plus its top-level statements.
pub struct Analyzer {
    pub scope: ScopeStack,
    pub errors: ErrorChannel,
    options: AnalysisOptions,
    provider: Option<Box<dyn SourceProvider>>,
    parser: Option<Box<dyn ProgramParser>>,
    modules: ModuleTable,
    imported_functions: Vec<Rc<FunctionDecl>>,
}

impl Analyzer {
    pub fn new(options: AnalysisOptions) -> Analyzer {
        let mut scope = ScopeStack::new();
        intrinsics::seed(&mut scope);
        Analyzer {
            scope,
            errors: ErrorChannel::default(),
            options,
            provider: None,
            parser: None,
            modules: ModuleTable::new(),
            imported_functions: vec![],
        }
    }

    /// Like [`Analyzer::new`], but with `use`/`include` directives (spec.md
    /// §4.4) wired to actually resolve: `register_program_declarations` loads
    /// each directive's target through `provider`/`parser` before walking the
    /// module's own declarations.
    pub fn with_module_loader(
        options: AnalysisOptions,
        provider: Box<dyn SourceProvider>,
        parser: Box<dyn ProgramParser>,
    ) -> Analyzer {
        let mut analyzer = Analyzer::new(options);
        analyzer.provider = Some(provider);
        analyzer.parser = Some(parser);
        analyzer
    }

    /// Resolve `program`'s own `use`/`include` directives, registering each
    /// imported module's exported declarations into `self.scope` ahead of
    /// `program`'s own. A no-op when no loader was configured ([`Analyzer::new`])
    /// or the program carries no directives.
    ///
    /// `Directive::Include` additionally re-exports: the included module's own
    /// unresolved directives are propagated up and resolved here too, the way
    /// [`module::ModuleLoader::load_directives`]'s doc describes the caller
    /// doing with its returned `transitive_exports`.
    fn import_directives(&mut self, program: &Program) -> Result<(), SemaError> {
        let (Some(provider), Some(parser)) = (self.provider.as_deref(), self.parser.as_deref())
        else {
            return Ok(());
        };
        if program.directives.is_empty() {
            return Ok(());
        }

        let loader = ModuleLoader::new(provider, parser, self.options.stdlib_root.clone());
        let imported_functions = RefCell::new(Vec::new());
        let import_errors = RefCell::new(Vec::new());
        let register_exports = RefCell::new(|loaded: &Program, scope: &mut ScopeStack| {
            register_module_exports(loaded, scope, &imported_functions, &import_errors);
        });

        let mut pending_includes =
            loader.load_directives(&mut self.modules, program, &mut self.scope, &register_exports)?;
        while let Some(path) = pending_includes.pop() {
            if let Some(included_program) = self.modules.program_of(&path) {
                let mut more = loader.load_directives(
                    &mut self.modules,
                    &included_program,
                    &mut self.scope,
                    &register_exports,
                )?;
                pending_includes.append(&mut more);
            }
        }

        self.imported_functions.extend(imported_functions.into_inner());
        for err in import_errors.into_inner() {
            self.errors.push(err);
        }
        Ok(())
    }

    /// Shallow registration: every type, interface and function name in
    /// `program` becomes resolvable before any body is analyzed, so mutually
    /// recursive functions and forward references within a module work.
    pub fn register_program_declarations(&mut self, program: &Program) {
        if let Err(err) = self.import_directives(program) {
            self.errors.push(err);
        }
        for type_decl in &program.type_decls {
            log::debug!("registering type '{}' for module '{}'", type_decl.name, program.module);
            let ty = Type::Nominal(Nominal {
                name: Rc::from(type_decl.name.as_str()),
                params: vec![],
                def: Some(type_decl.clone()),
            });
            if let Err(err) =
                self.scope
                    .add_type(type_decl.name.clone(), ty, type_decl.span.clone())
            {
                self.errors.push(err);
            }
        }
        for interface_decl in &program.interface_decls {
            if let Err(err) = self.scope.add_interface(
                interface_decl.name.clone(),
                interface_decl.clone(),
                interface_decl.span.clone(),
            ) {
                self.errors.push(err);
            }
        }
        for function in &program.functions {
            log::debug!("registering function '{}' for module '{}'", function.name, program.module);
            if let Err(err) =
                self.scope
                    .add_function(function.name.clone(), function.clone(), function.span.clone())
            {
                self.errors.push(err);
            }
        }
    }

    /// Analyze every registered function's body, then the module's
    /// top-level statements, then mark reachable functions/specializations,
    /// then validate the entry point. Idempotent per function: a function
    /// already `Analyzed` (or mid-analysis, guarding against a declaration
    /// cycle) is skipped (spec.md §3.3 `AnalysisState`).
    pub fn analyze_program(&mut self, program: &Program) {
        for function in &program.functions {
            self.analyze_function(function);
        }
        let imported = std::mem::take(&mut self.imported_functions);
        for function in &imported {
            self.analyze_function(function);
        }

        let mut top_level_store = ConstraintStore::default();
        {
            let mut collector = Collector::new(&mut top_level_store, &mut self.scope, &mut self.errors);
            collector.collect_program_statements(program);
        }
        match unify::solve(&mut top_level_store, &Span::new(program.module.clone(), (0, 0), (0, 0))) {
            Ok(labeling) => {
                for statement in &program.statements {
                    unify::finalize_expr(statement, &labeling.var_to_type);
                }
                let guard = specialize::RecursionGuard::new();
                for statement in &program.statements {
                    specialize::reresolve_deferred_calls(statement, &self.scope, &mut self.errors, &guard);
                }
            }
            Err(err) => self.errors.push(err),
        }

        usage::mark_reachable(&program.statements);

        self.validate_main_function(program);
    }

    fn analyze_function(&mut self, decl: &Rc<FunctionDecl>) {
        match decl.state.get() {
            AnalysisState::Analyzed | AnalysisState::CompletelyTyped => return,
            AnalysisState::BeingAnalyzed => return,
            AnalysisState::NotAnalyzed => {}
        }
        decl.state.set(AnalysisState::BeingAnalyzed);

        self.scope.enter_scope();
        for type_param in &decl.type_params {
            let abstract_var = Type::FinalTypeVariable(Rc::from(type_param.name.as_str()));
            let _ = self.scope.add_type(type_param.name.clone(), abstract_var, decl.span.clone());
        }

        let return_type = match &decl.return_type {
            Some(annotation) => collector::resolve_type_expr(&self.scope, annotation, None)
                .unwrap_or(Type::NoType),
            None => Type::primitive("void"),
        };

        let mut store = ConstraintStore::default();
        {
            let mut collector = Collector::new(&mut store, &mut self.scope, &mut self.errors);
            collector.collect_function_body(decl, return_type);
        }
        self.scope.exit_scope();

        match unify::solve(&mut store, &decl.span) {
            Ok(labeling) => {
                let guard = specialize::RecursionGuard::new();
                if let Some(body) = decl.body.borrow().as_ref() {
                    match body {
                        FunctionBody::Expression(expr) => {
                            unify::finalize_expr(expr, &labeling.var_to_type);
                            specialize::reresolve_deferred_calls(expr, &self.scope, &mut self.errors, &guard);
                        }
                        FunctionBody::Block(block) => {
                            for stmt in &block.statements {
                                unify::finalize_expr(stmt, &labeling.var_to_type);
                                specialize::reresolve_deferred_calls(stmt, &self.scope, &mut self.errors, &guard);
                            }
                            if let Some(trailing) = &block.trailing {
                                unify::finalize_expr(trailing, &labeling.var_to_type);
                                specialize::reresolve_deferred_calls(
                                    trailing,
                                    &self.scope,
                                    &mut self.errors,
                                    &guard,
                                );
                            }
                        }
                    }
                }
            }
            Err(err) => self.errors.push(err),
        }

        decl.state.set(AnalysisState::Analyzed);
    }

    /// spec.md §7 supplement: a program with no `main` function, or whose
    /// `main` does not take zero arguments and return `void` or `int32`, is
    /// rejected (`original_source/src/semantic/semantic.cpp`'s
    /// `check_main_function`).
    fn validate_main_function(&mut self, program: &Program) {
        let Some(main) = program.functions.iter().find(|f| f.name == "main") else {
            self.errors.push(SemaError::new(
                Span::new(program.module.clone(), (0, 0), (0, 0)),
                ErrorKind::MissingMainFunction,
            ));
            return;
        };

        let valid_return = match &main.return_type {
            None => true,
            Some(TypeExpr::Named(name, params, _)) if params.is_empty() => {
                matches!(name.as_ref(), "void" | "int32")
            }
            _ => false,
        };

        if !main.params.is_empty() || main.is_generic() || !valid_return {
            self.errors.push(SemaError::new(
                main.span.clone(),
                ErrorKind::InvalidMainSignature,
            ));
        }
    }
}
