//! Scope computation.
//!
//! Decides which named nodes a document exports to the workspace and which
//! are visible locally, per container node.

use std::collections::HashMap;

use async_trait::async_trait;
use tenon_syntax::AstNodeId;
use tokio_util::sync::CancellationToken;

use crate::cancel::interrupt_and_check;
use crate::document::Document;
use crate::error::Result;
use crate::index::SymbolDescription;

/// Locally visible symbols, keyed by the node whose scope they belong to.
pub type PrecomputedScopes = HashMap<AstNodeId, Vec<SymbolDescription>>;

/// Computes exported and local symbols of a document.
#[async_trait]
pub trait ScopeComputation: Send + Sync {
    /// Symbols other documents can reference.
    async fn compute_exports(&self, document: &Document, cancel: &CancellationToken) -> Result<Vec<SymbolDescription>>;

    /// Symbols visible inside the document, per container node.
    async fn compute_local_scopes(&self, document: &Document, cancel: &CancellationToken) -> Result<PrecomputedScopes>;
}

/// Name-based scoping: named direct children of the root are exported, and
/// every named node is visible in the scope of its container.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultScopeComputation;

#[async_trait]
impl ScopeComputation for DefaultScopeComputation {
    async fn compute_exports(&self, document: &Document, cancel: &CancellationToken) -> Result<Vec<SymbolDescription>> {
        let ast = &document.parse_result.ast;
        let Some(root) = ast.root() else {
            return Ok(Vec::new());
        };
        let mut exports = Vec::new();
        for child in ast.children(root) {
            interrupt_and_check(cancel).await?;
            if let Some(name) = ast.node(child).name() {
                exports.extend(SymbolDescription::of(document, child, name));
            }
        }
        Ok(exports)
    }

    async fn compute_local_scopes(&self, document: &Document, cancel: &CancellationToken) -> Result<PrecomputedScopes> {
        let ast = &document.parse_result.ast;
        let mut scopes = PrecomputedScopes::new();
        for node in ast.all_nodes() {
            interrupt_and_check(cancel).await?;
            let (Some(name), Some(container)) = (ast.node(node).name(), ast.node(node).container()) else {
                continue;
            };
            if let Some(symbol) = SymbolDescription::of(document, node, name) {
                scopes.entry(container.node).or_default().push(symbol);
            }
        }
        Ok(scopes)
    }
}

#[cfg(test)]
mod tests {
    use tenon_syntax::{AstParser, GrammarBuilder};
    use tenon_syntax::grammar::{append, assign, call, group, keyword, many, terminal};

    use super::*;
    use crate::document::DocumentUri;

    fn document(text: &str) -> Document {
        let mut builder = GrammarBuilder::new("folders");
        builder
            .node_rule("Tree", many(append("items", call("Folder"))))
            .node_rule(
                "Folder",
                group([
                    keyword("folder"),
                    assign("name", terminal("ID")),
                    keyword("{"),
                    many(append("items", call("Folder"))),
                    keyword("}"),
                ]),
            )
            .terminal("ID", "[a-z]+")
            .hidden_terminal("WS", r"\s+");
        let parser = AstParser::new(std::sync::Arc::new(builder.build().unwrap())).unwrap();
        let uri = DocumentUri::parse("memory:///tree.folders").unwrap();
        Document::parsed(uri, text.to_string(), parser.parse(text))
    }

    #[tokio::test]
    async fn exports_only_top_level_names() {
        let document = document("folder a { folder b {} } folder c {}");

        let exports = DefaultScopeComputation
            .compute_exports(&document, &CancellationToken::new())
            .await
            .unwrap();

        let names: Vec<_> = exports.iter().map(|s| (s.name.as_str(), s.path.as_str())).collect();
        assert_eq!(names, [("a", "/items@0"), ("c", "/items@1")]);
    }

    #[tokio::test]
    async fn nested_names_are_local_to_their_container() {
        let document = document("folder a { folder b {} }");
        let ast = &document.parse_result.ast;
        let a = ast.children(ast.root().unwrap())[0];

        let scopes = DefaultScopeComputation
            .compute_local_scopes(&document, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(scopes[&ast.root().unwrap()][0].name, "a");
        assert_eq!(scopes[&a][0].name, "b");
        assert_eq!(scopes[&a][0].path, "/items@0/items@0");
    }

    #[tokio::test]
    async fn cancellation_stops_computation() {
        let document = document("folder a {}");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = DefaultScopeComputation.compute_exports(&document, &cancel).await;

        assert!(result.is_err_and(|e| e.is_cancelled()));
    }
}
