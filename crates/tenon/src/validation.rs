//! Document validation.
//!
//! Validation turns syntax errors, linking errors and the findings of
//! registered checks into [`Diagnostic`]s. Checks are grouped by
//! [`ValidationCategory`] so cheap checks can run on every edit while
//! expensive ones run on demand:
//!
//! | Category | Runs |
//! |----------|------|
//! | `built-in` | lexer, parser and linking errors |
//! | `fast` | registered checks cheap enough for every update |
//! | `slow` | registered checks requested explicitly |

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tenon_syntax::{AstNode, AstNodeId, Grammar, Range, Resolution, Span, SyntaxError};
use tokio_util::sync::CancellationToken;

use crate::cancel::interrupt_and_check;
use crate::document::Document;
use crate::error::Result;

/// Diagnostic code of lexer errors.
pub const LEXING_ERROR: &str = "lexing-error";
/// Diagnostic code of parser errors.
pub const PARSING_ERROR: &str = "parsing-error";
/// Diagnostic code of unresolved references.
pub const LINKING_ERROR: &str = "linking-error";

/// Group of validation checks that run together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationCategory {
    /// Lexer, parser and linking errors
    BuiltIn,
    /// Cheap registered checks
    Fast,
    /// Expensive registered checks
    Slow,
}

impl ValidationCategory {
    /// Every category.
    pub const ALL: [Self; 3] = [Self::BuiltIn, Self::Fast, Self::Slow];
}

impl fmt::Display for ValidationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BuiltIn => "built-in",
            Self::Fast => "fast",
            Self::Slow => "slow",
        })
    }
}

/// How serious a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// The document is invalid
    Error,
    /// Probably a mistake
    Warning,
    /// Worth knowing
    Information,
    /// A suggestion
    Hint,
}

/// One validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// How serious the finding is
    pub severity: Severity,
    /// Human-readable message
    pub message: String,
    /// Where the finding applies
    pub range: Range,
    /// Machine-readable code for built-in findings
    pub code: Option<String>,
}

/// Which validation a build runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOptions {
    /// Categories to run; `None` runs every category
    pub categories: Option<Vec<ValidationCategory>>,
    /// Skip everything after lexer errors if there are any
    pub stop_after_lexing_errors: bool,
    /// Skip everything after parser errors if there are any
    pub stop_after_parsing_errors: bool,
    /// Skip registered checks if there are linking errors
    pub stop_after_linking_errors: bool,
}

impl ValidationOptions {
    /// Run only `categories`.
    #[must_use]
    pub fn with_categories(categories: impl IntoIterator<Item = ValidationCategory>) -> Self {
        Self {
            categories: Some(categories.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Returns `true` if `category` is requested.
    #[must_use]
    pub fn includes(&self, category: ValidationCategory) -> bool {
        self.categories.as_ref().is_none_or(|categories| categories.contains(&category))
    }

    /// The requested categories, resolving `None` to every category.
    #[must_use]
    pub fn requested(&self) -> Vec<ValidationCategory> {
        self.categories.clone().unwrap_or_else(|| ValidationCategory::ALL.to_vec())
    }
}

/// Collects the findings of registered checks.
pub struct ValidationAcceptor<'d> {
    document: &'d Document,
    diagnostics: Vec<Diagnostic>,
}

impl<'d> ValidationAcceptor<'d> {
    fn new(document: &'d Document) -> Self {
        Self {
            document,
            diagnostics: Vec::new(),
        }
    }

    /// The document being validated.
    #[must_use]
    pub const fn document(&self) -> &'d Document {
        self.document
    }

    /// An AST node of the document being validated.
    #[must_use]
    pub fn node(&self, id: AstNodeId) -> &'d AstNode {
        self.document.parse_result.ast.node(id)
    }

    /// Report a finding on `node`.
    pub fn accept(&mut self, severity: Severity, node: AstNodeId, message: impl Into<String>) {
        let result = &self.document.parse_result;
        let range = result
            .ast
            .node(node)
            .cst()
            .and_then(|cst| result.cst.range(cst))
            .unwrap_or_default();
        self.diagnostics.push(Diagnostic {
            severity,
            message: message.into(),
            range,
            code: None,
        });
    }

    /// Report an error on `node`.
    pub fn error(&mut self, node: AstNodeId, message: impl Into<String>) {
        self.accept(Severity::Error, node, message);
    }

    /// Report a warning on `node`.
    pub fn warning(&mut self, node: AstNodeId, message: impl Into<String>) {
        self.accept(Severity::Warning, node, message);
    }
}

/// A registered check, called once per AST node of a matching type.
pub type ValidationCheck = Arc<dyn Fn(AstNodeId, &mut ValidationAcceptor<'_>) + Send + Sync>;

struct RegisteredCheck {
    type_name: String,
    category: ValidationCategory,
    check: ValidationCheck,
}

/// Checks registered per AST type and category.
#[derive(Default)]
pub struct ValidationRegistry {
    checks: RwLock<Vec<RegisteredCheck>>,
}

impl fmt::Debug for ValidationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationRegistry")
            .field("checks", &self.checks.read().len())
            .finish()
    }
}

impl ValidationRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `check` for nodes of `type_name` and its subtypes.
    pub fn register<F>(&self, type_name: &str, category: ValidationCategory, check: F)
    where
        F: Fn(AstNodeId, &mut ValidationAcceptor<'_>) + Send + Sync + 'static,
    {
        self.checks.write().push(RegisteredCheck {
            type_name: type_name.to_string(),
            category,
            check: Arc::new(check),
        });
    }

    /// Checks applying to nodes of `type_name` in the requested categories.
    #[must_use]
    pub fn checks_for(&self, grammar: &Grammar, type_name: &str, options: &ValidationOptions) -> Vec<ValidationCheck> {
        self.checks
            .read()
            .iter()
            .filter(|registered| options.includes(registered.category))
            .filter(|registered| grammar.is_subtype(type_name, &registered.type_name))
            .map(|registered| Arc::clone(&registered.check))
            .collect()
    }
}

/// Produces the diagnostics of a document.
#[async_trait]
pub trait DocumentValidator: Send + Sync {
    /// Validate `document` with the categories requested in `options`.
    async fn validate_document(
        &self,
        document: &Document,
        options: &ValidationOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<Diagnostic>>;
}

/// Reports syntax and linking errors as built-in diagnostics, then runs
/// registered checks over every AST node.
pub struct DefaultDocumentValidator {
    grammar: Arc<Grammar>,
    registry: Arc<ValidationRegistry>,
}

impl fmt::Debug for DefaultDocumentValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultDocumentValidator")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl DefaultDocumentValidator {
    /// Create a validator running the checks of `registry`.
    #[must_use]
    pub const fn new(grammar: Arc<Grammar>, registry: Arc<ValidationRegistry>) -> Self {
        Self { grammar, registry }
    }

    async fn validate_ast(
        &self,
        document: &Document,
        options: &ValidationOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<Diagnostic>> {
        let ast = &document.parse_result.ast;
        let mut acceptor = ValidationAcceptor::new(document);
        for node in ast.all_nodes() {
            interrupt_and_check(cancel).await?;
            let Some(type_name) = ast.node(node).type_name() else {
                continue;
            };
            for check in self.registry.checks_for(&self.grammar, type_name, options) {
                check(node, &mut acceptor);
            }
        }
        Ok(acceptor.diagnostics)
    }
}

fn syntax_diagnostic(document: &Document, error: &SyntaxError, code: &str) -> Diagnostic {
    let cst = &document.parse_result.cst;
    let span = Span {
        offset: error.offset,
        end: error.offset + error.length,
    };
    Diagnostic {
        severity: Severity::Error,
        message: error.message.clone(),
        range: cst.lines().range(cst.text(), span),
        code: Some(code.to_string()),
    }
}

fn linking_diagnostics(document: &Document) -> Vec<Diagnostic> {
    let result = &document.parse_result;
    document
        .references
        .iter()
        .filter_map(|locator| {
            let reference = result.ast.reference(locator)?;
            let Resolution::Error(message) = &reference.resolution else {
                return None;
            };
            let cst = reference.cst.or_else(|| result.ast.node(locator.node).cst());
            Some(Diagnostic {
                severity: Severity::Error,
                message: message.clone(),
                range: cst.and_then(|cst| result.cst.range(cst)).unwrap_or_default(),
                code: Some(LINKING_ERROR.to_string()),
            })
        })
        .collect()
}

fn has_code(diagnostics: &[Diagnostic], code: &str) -> bool {
    diagnostics.iter().any(|d| d.code.as_deref() == Some(code))
}

#[async_trait]
impl DocumentValidator for DefaultDocumentValidator {
    async fn validate_document(
        &self,
        document: &Document,
        options: &ValidationOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<Diagnostic>> {
        let result = &document.parse_result;
        let mut diagnostics = Vec::new();
        interrupt_and_check(cancel).await?;

        if options.includes(ValidationCategory::BuiltIn) {
            diagnostics.extend(result.lexer_errors.iter().map(|e| syntax_diagnostic(document, e, LEXING_ERROR)));
            if options.stop_after_lexing_errors && has_code(&diagnostics, LEXING_ERROR) {
                return Ok(diagnostics);
            }
            diagnostics.extend(result.parser_errors.iter().map(|e| syntax_diagnostic(document, e, PARSING_ERROR)));
            if options.stop_after_parsing_errors && has_code(&diagnostics, PARSING_ERROR) {
                return Ok(diagnostics);
            }
            diagnostics.extend(linking_diagnostics(document));
            if options.stop_after_linking_errors && has_code(&diagnostics, LINKING_ERROR) {
                return Ok(diagnostics);
            }
        }

        diagnostics.extend(self.validate_ast(document, options, cancel).await?);
        interrupt_and_check(cancel).await?;
        Ok(diagnostics)
    }
}
