//! The `domainmodel` sample language.
//!
//! Entities, data types and nested packages:
//!
//! ```text
//! package blog {
//!     datatype String
//!     entity Post {
//!         title: String
//!         many comments: Comment
//!     }
//!     entity Comment extends Post {}
//! }
//! entity Reader { favourite: blog.Post }
//! ```
//!
//! Types inside packages are exported under their qualified name
//! (`blog.Post`) and are visible by simple name inside their package.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tenon_syntax::grammar::{
    alt, append, assign, call, cross_ref, flag, group, keyword, many, optional, terminal,
};
use tenon_syntax::{Ast, AstNodeId, AstParser, Grammar, GrammarBuilder};
use tokio_util::sync::CancellationToken;

use crate::cancel::interrupt_and_check;
use crate::config::WorkbenchConfig;
use crate::document::Document;
use crate::error::Result;
use crate::index::SymbolDescription;
use crate::scope::{PrecomputedScopes, ScopeComputation};
use crate::services::LanguageServices;
use crate::validation::{ValidationCategory, ValidationRegistry};

/// File extension of domain models.
pub const EXTENSION: &str = ".dmodel";

const PACKAGE: &str = "PackageDeclaration";

/// The compiled grammar.
///
/// # Errors
///
/// Returns an error if the grammar does not compile.
pub fn grammar() -> Result<Arc<Grammar>> {
    let mut builder = GrammarBuilder::new("DomainModel");
    builder
        .node_rule("Domainmodel", many(append("elements", call("AbstractElement"))))
        .node_rule("AbstractElement", alt([call(PACKAGE), call("Type")]))
        .node_rule(
            PACKAGE,
            group([
                keyword("package"),
                assign("name", call("QualifiedName")),
                keyword("{"),
                many(append("elements", call("AbstractElement"))),
                keyword("}"),
            ]),
        )
        .node_rule("Type", alt([call("DataType"), call("Entity")]))
        .node_rule("DataType", group([keyword("datatype"), assign("name", terminal("ID"))]))
        .node_rule(
            "Entity",
            group([
                keyword("entity"),
                assign("name", terminal("ID")),
                optional(group([
                    keyword("extends"),
                    assign("superType", cross_ref("Entity", call("QualifiedName"))),
                ])),
                keyword("{"),
                many(append("features", call("Feature"))),
                keyword("}"),
            ]),
        )
        .node_rule(
            "Feature",
            group([
                optional(flag("many", keyword("many"))),
                assign("name", terminal("ID")),
                keyword(":"),
                assign("type", cross_ref("Type", call("QualifiedName"))),
            ]),
        )
        .data_type_rule(
            "QualifiedName",
            group([terminal("ID"), many(group([keyword("."), terminal("ID")]))]),
        )
        .terminal("ID", r"[_a-zA-Z][\w_]*")
        .hidden_terminal("WS", r"\s+")
        .hidden_terminal("ML_COMMENT", r"/\*[\s\S]*?\*/")
        .hidden_terminal("SL_COMMENT", r"//[^\n\r]*");
    Ok(Arc::new(builder.build()?))
}

/// A parser for domain models.
///
/// # Errors
///
/// Returns an error if the grammar does not compile.
pub fn parser() -> Result<AstParser> {
    Ok(AstParser::new(grammar()?)?)
}

/// Language services for domain models, with qualified-name scoping and the
/// domain model checks registered.
///
/// # Errors
///
/// Returns an error if the grammar does not compile or `config` is invalid.
pub fn services(config: &WorkbenchConfig) -> Result<LanguageServices> {
    let parser = parser()?;
    let scopes = QualifiedNameScopeComputation::new(Arc::clone(parser.grammar()));
    let builder = LanguageServices::builder(parser).with_scope_computation(Arc::new(scopes));
    register_checks(builder.validation());
    builder.build(config)
}

/// Register the domain model checks.
pub fn register_checks(registry: &ValidationRegistry) {
    registry.register("Type", ValidationCategory::Fast, |node, acceptor| {
        let starts_lowercase = acceptor
            .node(node)
            .name()
            .and_then(|name| name.chars().next())
            .is_some_and(|first| !first.is_uppercase());
        if starts_lowercase {
            acceptor.warning(node, "Type name should start with a capital.");
        }
    });

    registry.register("Entity", ValidationCategory::Slow, |node, acceptor| {
        let ast = &acceptor.document().parse_result.ast;
        let mut seen = HashSet::new();
        for feature in ast.children(node) {
            if let Some(name) = ast.node(feature).name() {
                if !seen.insert(name) {
                    acceptor.error(feature, format!("Duplicate feature name '{name}'."));
                }
            }
        }
    });
}

/// Name of the package chain around `node`, outermost first (`"a.b"`), or
/// `None` outside any package.
fn package_prefix(ast: &Ast, node: AstNodeId) -> Option<String> {
    let mut names = Vec::new();
    let mut current = ast.node(node).container().map(|c| c.node);
    while let Some(id) = current {
        let package = ast.node(id);
        if package.type_name() == Some(PACKAGE) {
            names.extend(package.name());
        }
        current = package.container().map(|c| c.node);
    }
    if names.is_empty() {
        return None;
    }
    names.reverse();
    Some(names.join("."))
}

fn is_type(grammar: &Grammar, ast: &Ast, node: AstNodeId) -> bool {
    ast.node(node)
        .type_name()
        .is_some_and(|type_name| grammar.is_subtype(type_name, "Type"))
}

/// Exports every type under its package-qualified name. Inside a package
/// (or the model root) the types it contains are visible by simple name and
/// the types of nested packages by their name relative to it.
#[derive(Debug, Clone)]
pub struct QualifiedNameScopeComputation {
    grammar: Arc<Grammar>,
}

impl QualifiedNameScopeComputation {
    /// Create a scope computation using `grammar` for type reflection.
    #[must_use]
    pub const fn new(grammar: Arc<Grammar>) -> Self {
        Self { grammar }
    }

    fn process_container(
        &self,
        document: &Document,
        container: AstNodeId,
        scopes: &mut PrecomputedScopes,
    ) -> Vec<SymbolDescription> {
        let ast = &document.parse_result.ast;
        let mut local = Vec::new();
        for element in ast.children(container) {
            let node = ast.node(element);
            if node.type_name() == Some(PACKAGE) {
                let prefix = node.name().unwrap_or_default().to_string();
                for nested in self.process_container(document, element, scopes) {
                    let qualified = format!("{prefix}.{}", nested.name);
                    local.push(SymbolDescription { name: qualified, ..nested });
                }
            } else if is_type(&self.grammar, ast, element) {
                if let Some(name) = node.name() {
                    local.extend(SymbolDescription::of(document, element, name));
                }
            }
        }
        scopes.entry(container).or_default().extend(local.iter().cloned());
        local
    }
}

#[async_trait]
impl ScopeComputation for QualifiedNameScopeComputation {
    async fn compute_exports(&self, document: &Document, cancel: &CancellationToken) -> Result<Vec<SymbolDescription>> {
        let result = &document.parse_result;
        let mut exports = Vec::new();
        for node in result.ast.all_nodes() {
            interrupt_and_check(cancel).await?;
            if !is_type(&self.grammar, &result.ast, node) {
                continue;
            }
            let Some(name) = result.ast.node(node).name() else {
                continue;
            };
            let name = match package_prefix(&result.ast, node) {
                Some(prefix) => format!("{prefix}.{name}"),
                None => name.to_string(),
            };
            exports.extend(SymbolDescription::of(document, node, name));
        }
        Ok(exports)
    }

    async fn compute_local_scopes(&self, document: &Document, cancel: &CancellationToken) -> Result<PrecomputedScopes> {
        interrupt_and_check(cancel).await?;
        let mut scopes = PrecomputedScopes::new();
        if let Some(root) = document.parse_result.root() {
            self.process_container(document, root, &mut scopes);
        }
        Ok(scopes)
    }
}
