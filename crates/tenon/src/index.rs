//! Workspace-wide symbol and reference index.
//!
//! The index caches, per document URI, the symbols the document exports and
//! the cross-references it holds. An entry is always replaced as a whole when
//! its document passes the corresponding build phase again; entries are
//! never merged.
//!
//! Readers get snapshots: [`IndexManager::all_elements`] collects `Arc`
//! slices under the lock and iterates them after releasing it, so a later
//! write never changes what an existing iterator yields.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::Serialize;
use tenon_syntax::{AstNodeId, Grammar, Range};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::document::{Document, DocumentUri};
use crate::error::Result;
use crate::references::ReferenceDescriptionProvider;
use crate::scope::ScopeComputation;

/// A named, exported or locally visible AST node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SymbolDescription {
    /// Name the node is visible under
    pub name: String,
    /// Type tag of the node
    pub type_name: String,
    /// Document holding the node
    pub uri: DocumentUri,
    /// Node path inside the document
    pub path: String,
}

impl SymbolDescription {
    /// Describe `node` of `document` under `name`. Returns `None` for
    /// untyped nodes.
    #[must_use]
    pub fn of(document: &Document, node: AstNodeId, name: impl Into<String>) -> Option<Self> {
        let ast = &document.parse_result.ast;
        let type_name = ast.node(node).type_name()?;
        Some(Self {
            name: name.into(),
            type_name: type_name.to_string(),
            uri: document.uri.clone(),
            path: ast.path_of(node),
        })
    }
}

/// A resolved cross-reference from one node to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceDescription {
    /// Document holding the reference
    pub source_uri: DocumentUri,
    /// Path of the node holding the reference
    pub source_path: String,
    /// Where the reference is spelled
    pub source_range: Option<Range>,
    /// Document holding the target
    pub target_uri: DocumentUri,
    /// Path of the target node
    pub target_path: String,
    /// Source and target are in the same document
    pub local: bool,
}

type Symbols = Arc<[SymbolDescription]>;

/// Symbol and reference caches for a workspace.
pub struct IndexManager {
    grammar: Arc<Grammar>,
    scope_computation: Arc<dyn ScopeComputation>,
    reference_provider: Arc<dyn ReferenceDescriptionProvider>,
    symbols: RwLock<IndexMap<DocumentUri, Symbols>>,
    symbols_by_type: RwLock<HashMap<(DocumentUri, String), Symbols>>,
    references: RwLock<HashMap<DocumentUri, Arc<[ReferenceDescription]>>>,
}

impl std::fmt::Debug for IndexManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexManager")
            .field("documents", &self.symbols.read().len())
            .finish_non_exhaustive()
    }
}

impl IndexManager {
    /// Create an empty index.
    #[must_use]
    pub fn new(
        grammar: Arc<Grammar>,
        scope_computation: Arc<dyn ScopeComputation>,
        reference_provider: Arc<dyn ReferenceDescriptionProvider>,
    ) -> Self {
        Self {
            grammar,
            scope_computation,
            reference_provider,
            symbols: RwLock::new(IndexMap::new()),
            symbols_by_type: RwLock::new(HashMap::new()),
            references: RwLock::new(HashMap::new()),
        }
    }

    // === Writes ===

    /// Replace the exported symbols of `document`.
    ///
    /// # Errors
    ///
    /// Returns an error if export computation fails or is cancelled; the
    /// previous entry is kept in that case.
    pub async fn update_content(&self, document: &Document, cancel: &CancellationToken) -> Result<()> {
        let exports = self.scope_computation.compute_exports(document, cancel).await?;
        debug!(uri = %document.uri, exports = exports.len(), "Indexed document content");
        self.symbols.write().insert(document.uri.clone(), exports.into());
        self.symbols_by_type.write().retain(|(uri, _), _| uri != &document.uri);
        Ok(())
    }

    /// Replace the outgoing references of `document`.
    ///
    /// # Errors
    ///
    /// Returns an error if description fails or is cancelled; the previous
    /// entry is kept in that case.
    pub async fn update_references(&self, document: &Document, cancel: &CancellationToken) -> Result<()> {
        let descriptions = self.reference_provider.create_descriptions(document, cancel).await?;
        debug!(uri = %document.uri, references = descriptions.len(), "Indexed document references");
        self.references.write().insert(document.uri.clone(), descriptions.into());
        Ok(())
    }

    /// Drop the exported symbols of `uri`.
    pub fn remove_content(&self, uri: &DocumentUri) {
        self.symbols.write().shift_remove(uri);
        self.symbols_by_type.write().retain(|(cached, _), _| cached != uri);
    }

    /// Drop the outgoing references of `uri`.
    pub fn remove_references(&self, uri: &DocumentUri) {
        self.references.write().remove(uri);
    }

    /// Drop everything indexed for `uri`.
    pub fn remove(&self, uri: &DocumentUri) {
        self.remove_content(uri);
        self.remove_references(uri);
    }

    // === Reads ===

    /// Exported symbols, optionally restricted to subtypes of `type_filter`
    /// and to the documents in `uri_filter`.
    ///
    /// The returned iterator works on a snapshot and can be cloned to restart
    /// it.
    #[must_use]
    pub fn all_elements(&self, type_filter: Option<&str>, uri_filter: Option<&HashSet<DocumentUri>>) -> Elements {
        let uris: Vec<DocumentUri> = {
            let symbols = self.symbols.read();
            symbols
                .keys()
                .filter(|uri| uri_filter.is_none_or(|filter| filter.contains(*uri)))
                .cloned()
                .collect()
        };
        let slices = uris
            .iter()
            .filter_map(|uri| match type_filter {
                Some(type_name) => self.elements_of_type(uri, type_name),
                None => self.symbols.read().get(uri).cloned(),
            })
            .filter(|slice| !slice.is_empty())
            .collect();
        Elements::new(slices)
    }

    fn elements_of_type(&self, uri: &DocumentUri, type_name: &str) -> Option<Symbols> {
        let key = (uri.clone(), type_name.to_string());
        if let Some(cached) = self.symbols_by_type.read().get(&key) {
            return Some(Arc::clone(cached));
        }
        let all = self.symbols.read().get(uri).cloned()?;
        let filtered: Symbols = all
            .iter()
            .filter(|symbol| self.grammar.is_subtype(&symbol.type_name, type_name))
            .cloned()
            .collect();
        self.symbols_by_type.write().insert(key, Arc::clone(&filtered));
        Some(filtered)
    }

    /// Exported symbols of one document.
    #[must_use]
    pub fn elements_of(&self, uri: &DocumentUri) -> Symbols {
        self.symbols.read().get(uri).cloned().unwrap_or_else(|| Arc::from([]))
    }

    /// Outgoing references of one document.
    #[must_use]
    pub fn references_of(&self, uri: &DocumentUri) -> Arc<[ReferenceDescription]> {
        self.references.read().get(uri).cloned().unwrap_or_else(|| Arc::from([]))
    }

    /// Returns `true` if the document at `uri` holds a cross-document
    /// reference into one of `changed`.
    #[must_use]
    pub fn is_affected(&self, uri: &DocumentUri, changed: &HashSet<DocumentUri>) -> bool {
        self.references
            .read()
            .get(uri)
            .is_some_and(|references| {
                references
                    .iter()
                    .any(|reference| !reference.local && changed.contains(&reference.target_uri))
            })
    }

    /// Every indexed reference pointing at the node `target_path` of
    /// `target_uri`.
    #[must_use]
    pub fn find_all_references(&self, target_uri: &DocumentUri, target_path: &str) -> Vec<ReferenceDescription> {
        self.references
            .read()
            .values()
            .flat_map(|references| references.iter())
            .filter(|reference| &reference.target_uri == target_uri && reference.target_path == target_path)
            .cloned()
            .collect()
    }
}

/// Restartable iterator over snapshot slices of exported symbols.
#[derive(Debug, Clone)]
pub struct Elements {
    slices: Arc<[Symbols]>,
    slice: usize,
    item: usize,
}

impl Elements {
    fn new(slices: Vec<Symbols>) -> Self {
        Self {
            slices: slices.into(),
            slice: 0,
            item: 0,
        }
    }
}

impl Iterator for Elements {
    type Item = SymbolDescription;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let slice = self.slices.get(self.slice)?;
            if let Some(symbol) = slice.get(self.item) {
                self.item += 1;
                return Some(symbol.clone());
            }
            self.slice += 1;
            self.item = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentFactory;
    use crate::domainmodel;
    use crate::services::LanguageServices;

    async fn parsed(services: &LanguageServices, name: &str, text: &str) -> Document {
        let uri = DocumentUri::parse(&format!("memory:///{name}.dmodel")).unwrap();
        let factory: &DocumentFactory = &services.factory;
        factory
            .from_text(uri, text.to_string(), &CancellationToken::new())
            .await
            .unwrap()
    }

    fn services() -> LanguageServices {
        domainmodel::services(&crate::config::WorkbenchConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn content_is_replaced_not_merged() {
        let services = services();
        let index = &services.index;
        let cancel = CancellationToken::new();
        let first = parsed(&services, "a", "entity A {} entity B {}").await;
        index.update_content(&first, &cancel).await.unwrap();

        let second = parsed(&services, "a", "entity C {}").await;
        index.update_content(&second, &cancel).await.unwrap();

        let names: Vec<_> = index.elements_of(&second.uri).iter().map(|s| s.name.clone()).collect();
        assert_eq!(names, ["C"]);
    }

    #[tokio::test]
    async fn type_filter_includes_subtypes() {
        let services = services();
        let index = &services.index;
        let cancel = CancellationToken::new();
        let document = parsed(&services, "a", "datatype String entity Post {} package blog {}").await;
        index.update_content(&document, &cancel).await.unwrap();

        let types: Vec<_> = index.all_elements(Some("Type"), None).map(|s| s.name).collect();
        let entities: Vec<_> = index.all_elements(Some("Entity"), None).map(|s| s.name).collect();

        assert_eq!(types, ["String", "Post"]);
        assert_eq!(entities, ["Post"]);
    }

    #[tokio::test]
    async fn iterators_are_snapshots() {
        let services = services();
        let index = &services.index;
        let cancel = CancellationToken::new();
        index
            .update_content(&parsed(&services, "a", "entity A {}").await, &cancel)
            .await
            .unwrap();
        let elements = index.all_elements(None, None);

        index
            .update_content(&parsed(&services, "b", "entity B {}").await, &cancel)
            .await
            .unwrap();

        assert_eq!(elements.clone().count(), 1);
        assert_eq!(elements.map(|s| s.name).collect::<Vec<_>>(), ["A"]);
        assert_eq!(index.all_elements(None, None).count(), 2);
    }

    #[tokio::test]
    async fn uri_filter_restricts_documents() {
        let services = services();
        let index = &services.index;
        let cancel = CancellationToken::new();
        let a = parsed(&services, "a", "entity A {}").await;
        let b = parsed(&services, "b", "entity B {}").await;
        index.update_content(&a, &cancel).await.unwrap();
        index.update_content(&b, &cancel).await.unwrap();

        let only_b = HashSet::from([b.uri.clone()]);
        let names: Vec<_> = index.all_elements(None, Some(&only_b)).map(|s| s.name).collect();

        assert_eq!(names, ["B"]);
    }

    #[tokio::test]
    async fn remove_drops_cached_type_slices() {
        let services = services();
        let index = &services.index;
        let document = parsed(&services, "a", "entity A {}").await;
        index.update_content(&document, &CancellationToken::new()).await.unwrap();
        assert_eq!(index.all_elements(Some("Entity"), None).count(), 1);

        index.remove(&document.uri);

        assert_eq!(index.all_elements(Some("Entity"), None).count(), 0);
        assert!(index.elements_of(&document.uri).is_empty());
    }

    fn reference(source: &str, target: &str, local: bool) -> ReferenceDescription {
        ReferenceDescription {
            source_uri: DocumentUri::parse(source).unwrap(),
            source_path: "/elements@0".into(),
            source_range: None,
            target_uri: DocumentUri::parse(target).unwrap(),
            target_path: "/elements@1".into(),
            local,
        }
    }

    #[test]
    fn affected_only_by_cross_document_targets() {
        let services = services();
        let index = &services.index;
        let x = DocumentUri::parse("memory:///x.dmodel").unwrap();
        let y = DocumentUri::parse("memory:///y.dmodel").unwrap();
        index.references.write().insert(
            x.clone(),
            Arc::from([
                reference("memory:///x.dmodel", "memory:///x.dmodel", true),
                reference("memory:///x.dmodel", "memory:///y.dmodel", false),
            ]),
        );

        assert!(index.is_affected(&x, &HashSet::from([y.clone()])));
        assert!(!index.is_affected(&x, &HashSet::from([x.clone()])));
        assert!(!index.is_affected(&y, &HashSet::from([x.clone()])));
        assert_eq!(index.find_all_references(&y, "/elements@1").len(), 1);
        assert!(index.find_all_references(&y, "/elements@0").is_empty());
    }
}
