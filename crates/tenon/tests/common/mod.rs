//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use tenon::config::ParserMode;
use tenon::{domainmodel, BuildOptions, DocumentBuilder, DocumentHandle, DocumentUri, WorkbenchConfig};
use tokio_util::sync::CancellationToken;

/// Configuration parsing on the calling task.
pub fn sync_config() -> WorkbenchConfig {
    let mut config = WorkbenchConfig::default();
    config.parser.mode = ParserMode::Sync;
    config
}

/// A domain model builder whose updates validate the configured categories.
pub fn builder() -> Arc<DocumentBuilder> {
    let config = sync_config();
    let services = Arc::new(domainmodel::services(&config).unwrap());
    Arc::new(DocumentBuilder::new(
        services,
        BuildOptions::validated(config.update_validation()),
    ))
}

/// In-memory URI of the document `name`.
pub fn uri(name: &str) -> DocumentUri {
    DocumentUri::parse(&format!("memory:///{name}.dmodel")).unwrap()
}

/// Put `text` in an open buffer for `name`.
pub fn open(builder: &DocumentBuilder, name: &str, text: &str) -> DocumentUri {
    let uri = uri(name);
    builder.services().text_documents.open(uri.clone(), text.to_string());
    uri
}

/// Apply `changed` and wait for the rebuild.
pub async fn update(builder: &DocumentBuilder, changed: &[DocumentUri]) {
    builder.update(changed, &[], &CancellationToken::new()).await.unwrap();
}

/// The registered document at `uri`.
pub fn handle(builder: &DocumentBuilder, uri: &DocumentUri) -> DocumentHandle {
    builder.services().documents.get(uri).unwrap()
}

/// Messages of the diagnostics of `uri`.
pub async fn messages(builder: &DocumentBuilder, uri: &DocumentUri) -> Vec<String> {
    handle(builder, uri)
        .read()
        .await
        .diagnostics
        .iter()
        .map(|d| d.message.clone())
        .collect()
}
