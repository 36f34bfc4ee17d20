//! Cross-reference resolution.

use std::sync::Arc;

use async_trait::async_trait;
use tenon_syntax::{AstNodeId, Grammar, Reference, ReferenceTarget, Resolution};
use tokio_util::sync::CancellationToken;

use crate::cancel::interrupt_and_check;
use crate::document::Document;
use crate::error::Result;
use crate::index::{IndexManager, SymbolDescription};

/// Resolves and resets the cross-references of a document.
#[async_trait]
pub trait Linker: Send + Sync {
    /// Resolve every unresolved reference and record all visited references
    /// in [`Document::references`]. References that cannot be resolved carry
    /// an error instead of a target.
    async fn link(&self, document: &mut Document, cancel: &CancellationToken) -> Result<()>;

    /// Reset every recorded reference to unresolved and forget them.
    fn unlink(&self, document: &mut Document);
}

/// Resolves a reference by name: first in the precomputed local scopes from
/// the referencing node up through its containers, then among the exported
/// symbols of the workspace. Candidates must be subtypes of the reference's
/// target type; inner scopes shadow outer ones.
pub struct DefaultLinker {
    grammar: Arc<Grammar>,
    index: Arc<IndexManager>,
}

impl std::fmt::Debug for DefaultLinker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultLinker").finish_non_exhaustive()
    }
}

impl DefaultLinker {
    /// Create a linker resolving against `index`.
    #[must_use]
    pub const fn new(grammar: Arc<Grammar>, index: Arc<IndexManager>) -> Self {
        Self { grammar, index }
    }

    /// Find the symbol `name` of type `type_name` visible from `from`.
    #[must_use]
    pub fn find(&self, document: &Document, from: AstNodeId, name: &str, type_name: &str) -> Option<SymbolDescription> {
        let ast = &document.parse_result.ast;
        if let Some(scopes) = &document.precomputed_scopes {
            let mut current = Some(from);
            while let Some(node) = current {
                let local = scopes.get(&node).and_then(|symbols| {
                    symbols
                        .iter()
                        .find(|symbol| symbol.name == name && self.grammar.is_subtype(&symbol.type_name, type_name))
                });
                if let Some(symbol) = local {
                    return Some(symbol.clone());
                }
                current = ast.node(node).container().map(|container| container.node);
            }
        }
        self.index
            .all_elements(Some(type_name), None)
            .find(|symbol| symbol.name == name)
    }

    fn resolve(&self, document: &Document, from: AstNodeId, reference: &Reference) -> Resolution {
        match self.find(document, from, &reference.text, &reference.target_type) {
            Some(symbol) => Resolution::Resolved(ReferenceTarget {
                uri: symbol.uri.to_string(),
                path: symbol.path,
                name: symbol.name,
                type_name: symbol.type_name,
            }),
            None => Resolution::Error(format!(
                "Could not resolve reference to {} named '{}'.",
                reference.target_type, reference.text
            )),
        }
    }
}

#[async_trait]
impl Linker for DefaultLinker {
    async fn link(&self, document: &mut Document, cancel: &CancellationToken) -> Result<()> {
        let locators = document.parse_result.ast.all_references();
        for locator in &locators {
            interrupt_and_check(cancel).await?;
            let resolution = match document.parse_result.ast.reference(locator) {
                Some(reference) if reference.resolution == Resolution::Unresolved => {
                    self.resolve(document, locator.node, reference)
                }
                _ => continue,
            };
            if let Some(reference) = document.parse_result.ast.reference_mut(locator) {
                reference.resolution = resolution;
            }
        }
        document.references = locators;
        Ok(())
    }

    fn unlink(&self, document: &mut Document) {
        unlink_references(document);
    }
}

/// Reset the references recorded on `document` to unresolved.
pub fn unlink_references(document: &mut Document) {
    let locators = std::mem::take(&mut document.references);
    for locator in &locators {
        if let Some(reference) = document.parse_result.ast.reference_mut(locator) {
            reference.resolution = Resolution::Unresolved;
        }
    }
}

/// Linker that resolves nothing.
#[cfg(test)]
pub(crate) struct NoopLinker;

#[cfg(test)]
#[async_trait]
impl Linker for NoopLinker {
    async fn link(&self, _document: &mut Document, _cancel: &CancellationToken) -> Result<()> {
        Ok(())
    }

    fn unlink(&self, document: &mut Document) {
        unlink_references(document);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkbenchConfig;
    use crate::document::DocumentUri;
    use crate::domainmodel;
    use crate::services::LanguageServices;

    struct Fixture {
        services: LanguageServices,
        linker: DefaultLinker,
        cancel: CancellationToken,
    }

    impl Fixture {
        fn new() -> Self {
            let services = domainmodel::services(&WorkbenchConfig::default()).unwrap();
            let linker = DefaultLinker::new(Arc::clone(&services.grammar), Arc::clone(&services.index));
            Self {
                services,
                linker,
                cancel: CancellationToken::new(),
            }
        }

        /// Parse, index and scope a document, leaving it ready to link.
        async fn prepared(&self, name: &str, text: &str) -> Document {
            let uri = DocumentUri::parse(&format!("memory:///{name}.dmodel")).unwrap();
            let mut document = self
                .services
                .factory
                .from_text(uri, text.to_string(), &self.cancel)
                .await
                .unwrap();
            self.services.index.update_content(&document, &self.cancel).await.unwrap();
            let scopes = self
                .services
                .scope_computation
                .compute_local_scopes(&document, &self.cancel)
                .await
                .unwrap();
            document.precomputed_scopes = Some(scopes);
            document
        }
    }

    fn feature_type(document: &Document, entity: usize, feature: usize) -> &Reference {
        let ast = &document.parse_result.ast;
        let entity = ast.children(ast.root().unwrap())[entity];
        let feature = ast.children(entity)[feature];
        ast.node(feature).get("type").and_then(|v| v.as_reference()).unwrap()
    }

    #[tokio::test]
    async fn resolves_local_names() {
        let fixture = Fixture::new();
        let mut document = fixture
            .prepared("a", "datatype String entity Post { title: String }")
            .await;

        fixture.linker.link(&mut document, &fixture.cancel).await.unwrap();

        let target = feature_type(&document, 1, 0).target().unwrap();
        assert_eq!(target.path, "/elements@0");
        assert_eq!(target.type_name, "DataType");
        assert_eq!(document.references.len(), 1);
    }

    #[tokio::test]
    async fn resolves_names_exported_by_other_documents() {
        let fixture = Fixture::new();
        fixture.prepared("types", "datatype String").await;
        let mut document = fixture.prepared("post", "entity Post { title: String }").await;

        fixture.linker.link(&mut document, &fixture.cancel).await.unwrap();

        let target = feature_type(&document, 0, 0).target().unwrap();
        assert_eq!(target.uri, "memory:///types.dmodel");
    }

    #[tokio::test]
    async fn unresolvable_names_carry_an_error() {
        let fixture = Fixture::new();
        let mut document = fixture.prepared("a", "entity Post { title: Missing }").await;

        fixture.linker.link(&mut document, &fixture.cancel).await.unwrap();

        assert_eq!(
            feature_type(&document, 0, 0).error(),
            Some("Could not resolve reference to Type named 'Missing'.")
        );
        assert!(document.has_linking_errors());
    }

    #[tokio::test]
    async fn wrong_target_type_does_not_resolve() {
        let fixture = Fixture::new();
        let mut document = fixture
            .prepared("a", "datatype Text entity Post extends Text {}")
            .await;

        fixture.linker.link(&mut document, &fixture.cancel).await.unwrap();

        let ast = &document.parse_result.ast;
        let post = ast.children(ast.root().unwrap())[1];
        let super_type = ast.node(post).get("superType").and_then(|v| v.as_reference()).unwrap();
        assert!(super_type.error().is_some());
    }

    #[tokio::test]
    async fn unlink_resets_references() {
        let fixture = Fixture::new();
        let mut document = fixture
            .prepared("a", "datatype String entity Post { title: String }")
            .await;
        fixture.linker.link(&mut document, &fixture.cancel).await.unwrap();

        fixture.linker.unlink(&mut document);

        assert!(document.references.is_empty());
        assert_eq!(feature_type(&document, 1, 0).resolution, Resolution::Unresolved);
    }
}
