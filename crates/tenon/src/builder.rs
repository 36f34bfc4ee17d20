//! Incremental document builder.
//!
//! The [`DocumentBuilder`] moves batches of documents through the build
//! phases in [`DocumentState`] order. A batch advances phase by phase: every
//! document is parsed before any is indexed, every document is indexed
//! before any is linked, and so on, so a document can link against the
//! exports of any other document in the same batch.
//!
//! After each document transition the document-phase listeners fire; after
//! each phase the build-phase listeners fire once with every document of the
//! batch that reached it.
//!
//! Cancellation is checked before every document transition. Transitions
//! that completed are kept, so the next build resumes each document from
//! its last completed phase.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::cancel::interrupt_and_check;
use crate::document::{Document, DocumentHandle, DocumentState, DocumentUri};
use crate::error::{Error, Result};
use crate::services::LanguageServices;
use crate::validation::{ValidationCategory, ValidationOptions};

/// Options of one build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Validation to run; `None` stops the build after indexing references
    pub validation: Option<ValidationOptions>,
}

impl BuildOptions {
    /// Build and validate with `validation`.
    #[must_use]
    pub const fn validated(validation: ValidationOptions) -> Self {
        Self {
            validation: Some(validation),
        }
    }
}

/// Per-document bookkeeping between builds.
#[derive(Debug, Clone)]
struct BuildState {
    completed: bool,
    options: BuildOptions,
    validation_checks: Vec<ValidationCategory>,
}

/// Listener notified after one document completes a phase.
pub type DocumentPhaseListener =
    Arc<dyn Fn(DocumentHandle, CancellationToken) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Listener notified after a batch completes a phase.
pub type BuildPhaseListener =
    Arc<dyn Fn(Vec<DocumentHandle>, CancellationToken) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Listener notified with the changed and deleted URIs of an update.
pub type UpdateListener = Arc<dyn Fn(&[DocumentUri], &[DocumentUri]) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    update: Vec<(u64, UpdateListener)>,
    build: Vec<(u64, DocumentState, BuildPhaseListener)>,
    document: Vec<(u64, DocumentState, DocumentPhaseListener)>,
}

impl Listeners {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn remove(&mut self, id: u64) {
        self.update.retain(|(key, _)| *key != id);
        self.build.retain(|(key, _, _)| *key != id);
        self.document.retain(|(key, _, _)| *key != id);
    }
}

/// Registration of a listener. The listener stays registered until
/// [`ListenerHandle::dispose`] is called.
#[derive(Debug)]
pub struct ListenerHandle {
    id: u64,
    listeners: Weak<Mutex<Listeners>>,
}

impl ListenerHandle {
    /// Unsubscribe the listener.
    pub fn dispose(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.lock().remove(self.id);
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Progress {
    workspace: DocumentState,
    transitions: u64,
}

/// Drives documents through the build phases.
pub struct DocumentBuilder {
    services: Arc<LanguageServices>,
    update_options: BuildOptions,
    build_state: Mutex<HashMap<DocumentUri, BuildState>>,
    listeners: Arc<Mutex<Listeners>>,
    progress: watch::Sender<Progress>,
}

impl std::fmt::Debug for DocumentBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentBuilder")
            .field("update_options", &self.update_options)
            .field("workspace_state", &self.workspace_state())
            .finish_non_exhaustive()
    }
}

impl DocumentBuilder {
    /// Create a builder over `services`. `update_options` apply to the
    /// rebuild triggered by [`DocumentBuilder::update`].
    #[must_use]
    pub fn new(services: Arc<LanguageServices>, update_options: BuildOptions) -> Self {
        let (progress, _) = watch::channel(Progress {
            workspace: DocumentState::Changed,
            transitions: 0,
        });
        Self {
            services,
            update_options,
            build_state: Mutex::new(HashMap::new()),
            listeners: Arc::new(Mutex::new(Listeners::default())),
            progress,
        }
    }

    /// The services documents are built with.
    #[must_use]
    pub const fn services(&self) -> &Arc<LanguageServices> {
        &self.services
    }

    /// Last phase the whole workspace completed.
    #[must_use]
    pub fn workspace_state(&self) -> DocumentState {
        self.progress.borrow().workspace
    }

    /// Number of document transitions completed since the builder was
    /// created.
    #[must_use]
    pub fn transitions(&self) -> u64 {
        self.progress.borrow().transitions
    }

    /// Validation categories already run on `uri` since it was last
    /// invalidated.
    #[must_use]
    pub fn validation_checks(&self, uri: &DocumentUri) -> Vec<ValidationCategory> {
        self.build_state
            .lock()
            .get(uri)
            .map(|state| state.validation_checks.clone())
            .unwrap_or_default()
    }

    // === Listeners ===

    /// Call `listener` with the changed and deleted URIs of every update.
    pub fn on_update<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&[DocumentUri], &[DocumentUri]) + Send + Sync + 'static,
    {
        let listener: UpdateListener = Arc::new(listener);
        let mut listeners = self.listeners.lock();
        let id = listeners.next_id();
        listeners.update.push((id, listener));
        self.handle(id)
    }

    /// Call `listener` after every build phase that ends at `state`, with
    /// the documents of the batch that reached it.
    pub fn on_build_phase<F, Fut>(&self, state: DocumentState, listener: F) -> ListenerHandle
    where
        F: Fn(Vec<DocumentHandle>, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let listener: BuildPhaseListener = Arc::new(move |documents: Vec<DocumentHandle>, cancel: CancellationToken| {
            listener(documents, cancel).boxed()
        });
        let mut listeners = self.listeners.lock();
        let id = listeners.next_id();
        listeners.build.push((id, state, listener));
        self.handle(id)
    }

    /// Call `listener` each time a document reaches `state`.
    ///
    /// A listener failing with [`Error::Cancelled`] does not abort the build.
    pub fn on_document_phase<F, Fut>(&self, state: DocumentState, listener: F) -> ListenerHandle
    where
        F: Fn(DocumentHandle, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let listener: DocumentPhaseListener = Arc::new(move |document: DocumentHandle, cancel: CancellationToken| {
            listener(document, cancel).boxed()
        });
        let mut listeners = self.listeners.lock();
        let id = listeners.next_id();
        listeners.document.push((id, state, listener));
        self.handle(id)
    }

    fn handle(&self, id: u64) -> ListenerHandle {
        ListenerHandle {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    fn emit_update(&self, changed: &[DocumentUri], deleted: &[DocumentUri]) {
        let listeners: Vec<UpdateListener> = self
            .listeners
            .lock()
            .update
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(changed, deleted);
        }
    }

    async fn notify_document_phase(
        &self,
        document: &DocumentHandle,
        state: DocumentState,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let listeners: Vec<DocumentPhaseListener> = self
            .listeners
            .lock()
            .document
            .iter()
            .filter(|(_, target, _)| *target == state)
            .map(|(_, _, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            match listener(document.clone(), cancel.clone()).await {
                Err(e) if e.is_cancelled() => {
                    trace!(uri = %document.uri(), state = ?state, "Document listener cancelled");
                }
                result => result?,
            }
        }
        Ok(())
    }

    async fn notify_build_phase(
        &self,
        documents: Vec<DocumentHandle>,
        state: DocumentState,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }
        let listeners: Vec<BuildPhaseListener> = self
            .listeners
            .lock()
            .build
            .iter()
            .filter(|(_, target, _)| *target == state)
            .map(|(_, _, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(documents.clone(), cancel.clone()).await?;
        }
        Ok(())
    }

    // === Builds ===

    /// Build `documents` up to the phase `options` ask for.
    ///
    /// Documents that are already validated are revalidated: with every
    /// category if `options` request all of them, otherwise with only the
    /// requested categories that have not run yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if `cancel` fires, or the first
    /// collaborator error. Completed transitions are kept either way.
    pub async fn build(
        &self,
        documents: &[DocumentHandle],
        options: BuildOptions,
        cancel: &CancellationToken,
    ) -> Result<()> {
        for handle in documents {
            let mut document = handle.write().await;
            let uri = handle.uri();
            if document.state() != DocumentState::Validated {
                self.build_state.lock().remove(uri);
                continue;
            }
            let Some(validation) = &options.validation else {
                continue;
            };
            match &validation.categories {
                None => {
                    document.set_state(DocumentState::IndexedReferences);
                    document.diagnostics.clear();
                    self.build_state.lock().remove(uri);
                }
                Some(categories) => {
                    let mut states = self.build_state.lock();
                    let Some(state) = states.get_mut(uri) else {
                        continue;
                    };
                    let missing: Vec<_> = categories
                        .iter()
                        .copied()
                        .filter(|category| !state.validation_checks.contains(category))
                        .collect();
                    if !missing.is_empty() {
                        state.completed = false;
                        state.options = BuildOptions::validated(ValidationOptions {
                            categories: Some(missing),
                            ..validation.clone()
                        });
                        document.set_state(DocumentState::IndexedReferences);
                    }
                }
            }
        }

        self.set_workspace_state(DocumentState::Changed);
        let uris: Vec<DocumentUri> = documents.iter().map(|handle| handle.uri().clone()).collect();
        self.emit_update(&uris, &[]);
        self.build_documents(documents, &options, cancel).await
    }

    /// Apply file changes and rebuild what they affect.
    ///
    /// Changed documents are reset to [`DocumentState::Changed`] (or created
    /// if unknown) and deleted ones are removed from the workspace and the
    /// index. Every other document that has a linking error or references a
    /// changed or deleted document is unlinked and lowered to at most
    /// [`DocumentState::ComputedScopes`]. Then every document that is not
    /// linked, whose last build did not complete, or that misses a
    /// validation category of the update options is rebuilt, open documents
    /// first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if `cancel` fires, or the first
    /// collaborator error.
    pub async fn update(
        &self,
        changed: &[DocumentUri],
        deleted: &[DocumentUri],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let services = &self.services;
        self.set_workspace_state(DocumentState::Changed);

        for uri in deleted {
            services.documents.delete(uri);
            self.build_state.lock().remove(uri);
            services.index.remove(uri);
        }
        for uri in changed {
            if services.documents.invalidate(uri, services.linker.as_ref()).await.is_none() {
                services.documents.add(DocumentHandle::new(Document::unparsed(uri.clone())))?;
                debug!(uri = %uri, "Created document");
            }
            self.build_state.lock().remove(uri);
        }

        let all_changed: HashSet<DocumentUri> = changed.iter().chain(deleted).cloned().collect();
        for handle in services.documents.all() {
            let uri = handle.uri();
            if all_changed.contains(uri) {
                continue;
            }
            let mut document = handle.write().await;
            if document.has_linking_errors() || services.index.is_affected(uri, &all_changed) {
                services.linker.unlink(&mut document);
                document.lower_to(DocumentState::ComputedScopes);
                document.diagnostics.clear();
                self.build_state.lock().remove(uri);
                debug!(uri = %uri, state = ?document.state(), "Scheduled document for relinking");
            }
        }

        self.emit_update(changed, deleted);
        interrupt_and_check(cancel).await?;

        let mut rebuild = Vec::new();
        for handle in services.documents.all() {
            let mut document = handle.write().await;
            let missing = self.missing_categories(handle.uri(), &self.update_options);
            let completed = self
                .build_state
                .lock()
                .get(handle.uri())
                .is_some_and(|state| state.completed);
            if document.state() >= DocumentState::Linked && completed && missing.is_empty() {
                continue;
            }
            if document.state() == DocumentState::Validated && !missing.is_empty() {
                if let Some(validation) = &self.update_options.validation {
                    let mut states = self.build_state.lock();
                    let checks = states
                        .get(handle.uri())
                        .map(|state| state.validation_checks.clone())
                        .unwrap_or_default();
                    states.insert(
                        handle.uri().clone(),
                        BuildState {
                            completed: false,
                            options: BuildOptions::validated(ValidationOptions {
                                categories: Some(missing),
                                ..validation.clone()
                            }),
                            validation_checks: checks,
                        },
                    );
                }
                document.set_state(DocumentState::IndexedReferences);
            }
            rebuild.push(handle.clone());
        }
        rebuild.sort_by_key(|handle| !services.text_documents.is_open(handle.uri()));

        debug!(
            changed = changed.len(),
            deleted = deleted.len(),
            rebuild = rebuild.len(),
            "Updating workspace"
        );
        self.build_documents(&rebuild, &self.update_options, cancel).await
    }

    /// Categories of `options` not yet run on `uri`.
    fn missing_categories(&self, uri: &DocumentUri, options: &BuildOptions) -> Vec<ValidationCategory> {
        let Some(validation) = &options.validation else {
            return Vec::new();
        };
        let executed = self.validation_checks(uri);
        validation
            .requested()
            .into_iter()
            .filter(|category| !executed.contains(category))
            .collect()
    }

    async fn build_documents(
        &self,
        documents: &[DocumentHandle],
        options: &BuildOptions,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.prepare_build(documents, options);

        for target in [
            DocumentState::Parsed,
            DocumentState::IndexedContent,
            DocumentState::ComputedScopes,
            DocumentState::Linked,
            DocumentState::IndexedReferences,
        ] {
            self.run_cancelable(documents, target, cancel).await?;
        }

        let to_validate: Vec<DocumentHandle> = {
            let states = self.build_state.lock();
            documents
                .iter()
                .filter(|handle| {
                    states
                        .get(handle.uri())
                        .is_some_and(|state| state.options.validation.is_some())
                })
                .cloned()
                .collect()
        };
        self.run_cancelable(&to_validate, DocumentState::Validated, cancel).await?;

        let mut states = self.build_state.lock();
        for handle in documents {
            if let Some(state) = states.get_mut(handle.uri()) {
                state.completed = true;
            }
        }
        Ok(())
    }

    /// Start a build state for every document that has none or whose last
    /// build completed. Validation categories already run are kept.
    fn prepare_build(&self, documents: &[DocumentHandle], options: &BuildOptions) {
        let mut states = self.build_state.lock();
        for handle in documents {
            let previous = states.get(handle.uri());
            if previous.is_some_and(|state| !state.completed) {
                continue;
            }
            let validation_checks = previous
                .map(|state| state.validation_checks.clone())
                .unwrap_or_default();
            states.insert(
                handle.uri().clone(),
                BuildState {
                    completed: false,
                    options: options.clone(),
                    validation_checks,
                },
            );
        }
    }

    async fn run_cancelable(
        &self,
        documents: &[DocumentHandle],
        target: DocumentState,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut transitioned = 0usize;
        for handle in documents {
            {
                let mut document = handle.write().await;
                if document.state() >= target {
                    continue;
                }
                interrupt_and_check(cancel).await?;
                self.transition(&mut document, target, cancel).await?;
                document.set_state(target);
            }
            transitioned += 1;
            trace!(uri = %handle.uri(), state = ?target, "Document transitioned");
            self.progress.send_modify(|progress| progress.transitions += 1);
            self.notify_document_phase(handle, target, cancel).await?;
        }

        let mut reached = Vec::new();
        for handle in documents {
            if handle.state().await == target {
                reached.push(handle.clone());
            }
        }
        self.notify_build_phase(reached, target, cancel).await?;
        self.set_workspace_state(target);
        debug!(state = ?target, documents = transitioned, "Build phase complete");
        Ok(())
    }

    async fn transition(
        &self,
        document: &mut Document,
        target: DocumentState,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let services = &self.services;
        match target {
            DocumentState::Changed => Ok(()),
            DocumentState::Parsed => services.factory.update(document, cancel).await,
            DocumentState::IndexedContent => services.index.update_content(document, cancel).await,
            DocumentState::ComputedScopes => {
                let scopes = services.scope_computation.compute_local_scopes(document, cancel).await?;
                document.precomputed_scopes = Some(scopes);
                Ok(())
            }
            DocumentState::Linked => services.linker.link(document, cancel).await,
            DocumentState::IndexedReferences => services.index.update_references(document, cancel).await,
            DocumentState::Validated => self.validate(document, cancel).await,
        }
    }

    /// Run the requested categories that have not run on `document` yet and
    /// append their diagnostics.
    async fn validate(&self, document: &mut Document, cancel: &CancellationToken) -> Result<()> {
        let (options, executed) = {
            let states = self.build_state.lock();
            let state = states.get(&document.uri);
            (
                state.and_then(|state| state.options.validation.clone()),
                state.map(|state| state.validation_checks.clone()).unwrap_or_default(),
            )
        };
        let Some(mut options) = options else {
            return Ok(());
        };
        let categories: Vec<ValidationCategory> = options
            .requested()
            .into_iter()
            .filter(|category| !executed.contains(category))
            .collect();
        options.categories = Some(categories.clone());

        let diagnostics = self
            .services
            .validator
            .validate_document(document, &options, cancel)
            .await?;
        document.diagnostics.extend(diagnostics);

        if let Some(state) = self.build_state.lock().get_mut(&document.uri) {
            for category in categories {
                if !state.validation_checks.contains(&category) {
                    state.validation_checks.push(category);
                }
            }
        }
        Ok(())
    }

    fn set_workspace_state(&self, state: DocumentState) {
        self.progress.send_modify(|progress| progress.workspace = state);
    }

    // === Waiting ===

    /// Wait until the workspace, or the document at `uri`, reaches `state`.
    ///
    /// # Errors
    ///
    /// - [`Error::DocumentNotFound`] if no document is registered at `uri`
    /// - [`Error::StateUnreachable`] if the workspace reached `state` while
    ///   the document did not
    /// - [`Error::Cancelled`] if `cancel` fires first
    pub async fn wait_until(
        &self,
        state: DocumentState,
        uri: Option<&DocumentUri>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut progress = self.progress.subscribe();
        loop {
            let workspace = progress.borrow_and_update().workspace;
            match uri {
                None if workspace >= state => return Ok(()),
                None => {}
                Some(uri) => {
                    let handle = self
                        .services
                        .documents
                        .get(uri)
                        .ok_or_else(|| Error::DocumentNotFound(uri.to_string()))?;
                    if handle.state().await >= state {
                        return Ok(());
                    }
                    if workspace >= state {
                        return Err(Error::StateUnreachable {
                            uri: uri.to_string(),
                            state,
                        });
                    }
                }
            }
            tokio::select! {
                () = cancel.cancelled() => return Err(Error::Cancelled),
                changed = progress.changed() => {
                    changed.map_err(|_| Error::Internal("build progress channel closed".into()))?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::config::{ParserMode, WorkbenchConfig};
    use crate::domainmodel;
    use crate::validation::Severity;

    fn builder() -> DocumentBuilder {
        let mut config = WorkbenchConfig::default();
        config.parser.mode = ParserMode::Sync;
        let services = Arc::new(domainmodel::services(&config).unwrap());
        DocumentBuilder::new(services, BuildOptions::validated(config.update_validation()))
    }

    fn uri(name: &str) -> DocumentUri {
        DocumentUri::parse(&format!("memory:///{name}.dmodel")).unwrap()
    }

    async fn add(builder: &DocumentBuilder, name: &str, text: &str) -> DocumentHandle {
        let document = builder
            .services()
            .factory
            .from_text(uri(name), text.to_string(), &CancellationToken::new())
            .await
            .unwrap();
        let handle = DocumentHandle::new(document);
        builder.services().documents.add(handle.clone()).unwrap();
        handle
    }

    #[tokio::test]
    async fn build_without_validation_stops_at_indexed_references() {
        let builder = builder();
        let handle = add(&builder, "a", "entity A {}").await;

        builder
            .build(&[handle.clone()], BuildOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(handle.state().await, DocumentState::IndexedReferences);
        assert_eq!(builder.workspace_state(), DocumentState::Validated);
        assert_eq!(builder.transitions(), 4);
    }

    #[tokio::test]
    async fn validation_runs_only_new_categories() {
        let builder = builder();
        let handle = add(&builder, "a", "entity lower { x: y x: y }").await;
        let cancel = CancellationToken::new();
        let fast = ValidationOptions::with_categories([ValidationCategory::BuiltIn, ValidationCategory::Fast]);

        builder
            .build(&[handle.clone()], BuildOptions::validated(fast.clone()), &cancel)
            .await
            .unwrap();
        let after_fast = handle.read().await.diagnostics.len();
        builder
            .build(&[handle.clone()], BuildOptions::validated(fast), &cancel)
            .await
            .unwrap();
        assert_eq!(handle.read().await.diagnostics.len(), after_fast);

        let slow = ValidationOptions::with_categories([ValidationCategory::Slow]);
        builder
            .build(&[handle.clone()], BuildOptions::validated(slow), &cancel)
            .await
            .unwrap();

        let document = handle.read().await;
        assert_eq!(document.state(), DocumentState::Validated);
        assert!(document
            .diagnostics
            .iter()
            .any(|d| d.message == "Duplicate feature name 'x'."));
        assert_eq!(
            builder.validation_checks(handle.uri()),
            [ValidationCategory::BuiltIn, ValidationCategory::Fast, ValidationCategory::Slow]
        );
    }

    #[tokio::test]
    async fn full_revalidation_replaces_diagnostics() {
        let builder = builder();
        let handle = add(&builder, "a", "entity lower {}").await;
        let cancel = CancellationToken::new();
        let all = BuildOptions::validated(ValidationOptions::default());

        builder.build(&[handle.clone()], all.clone(), &cancel).await.unwrap();
        builder.build(&[handle.clone()], all, &cancel).await.unwrap();

        let document = handle.read().await;
        let warnings = document
            .diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .count();
        assert_eq!(warnings, 1);
    }

    #[tokio::test]
    async fn cancelled_document_listener_does_not_abort_build() {
        let builder = builder();
        let handle = add(&builder, "a", "entity A {}").await;
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        builder.on_document_phase(DocumentState::Linked, move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Cancelled) }
        });

        builder
            .build(&[handle.clone()], BuildOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(handle.state().await, DocumentState::IndexedReferences);
    }

    #[tokio::test]
    async fn disposed_listeners_are_not_called() {
        let builder = builder();
        let handle = add(&builder, "a", "entity A {}").await;
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let registration = builder.on_build_phase(DocumentState::Parsed, move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        });
        registration.dispose();

        builder
            .build(&[handle], BuildOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancelled_build_keeps_completed_transitions() {
        let builder = builder();
        let handle = add(&builder, "a", "entity A {}").await;
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        builder.on_build_phase(DocumentState::IndexedContent, move |_, _| {
            trigger.cancel();
            async { Ok(()) }
        });

        let result = builder.build(&[handle.clone()], BuildOptions::default(), &cancel).await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(handle.state().await, DocumentState::IndexedContent);

        builder
            .build(&[handle.clone()], BuildOptions::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(handle.state().await, DocumentState::IndexedReferences);
    }

    #[tokio::test]
    async fn wait_until_reports_unknown_and_unreachable_documents() {
        let builder = builder();
        let handle = add(&builder, "a", "entity A {}").await;
        let cancel = CancellationToken::new();
        builder
            .build(&[handle.clone()], BuildOptions::default(), &cancel)
            .await
            .unwrap();

        let missing = builder.wait_until(DocumentState::Parsed, Some(&uri("missing")), &cancel).await;
        let unreachable = builder
            .wait_until(DocumentState::Validated, Some(handle.uri()), &cancel)
            .await;
        let reached = builder.wait_until(DocumentState::Linked, Some(handle.uri()), &cancel).await;

        assert!(matches!(missing, Err(Error::DocumentNotFound(_))));
        assert!(matches!(unreachable, Err(Error::StateUnreachable { .. })));
        assert!(reached.is_ok());
    }

    #[tokio::test]
    async fn wait_until_honours_cancellation() {
        let builder = builder();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = builder.wait_until(DocumentState::Validated, None, &cancel).await;

        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
