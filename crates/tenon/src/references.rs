//! Descriptions of resolved cross-references for the reference index.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::cancel::interrupt_and_check;
use crate::document::{Document, DocumentUri};
use crate::error::Result;
use crate::index::ReferenceDescription;

/// Describes the outgoing references of a linked document.
#[async_trait]
pub trait ReferenceDescriptionProvider: Send + Sync {
    /// One description per resolved reference.
    async fn create_descriptions(
        &self,
        document: &Document,
        cancel: &CancellationToken,
    ) -> Result<Vec<ReferenceDescription>>;
}

/// Describes every resolved reference found during linking; unresolved
/// references are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultReferenceDescriptionProvider;

#[async_trait]
impl ReferenceDescriptionProvider for DefaultReferenceDescriptionProvider {
    async fn create_descriptions(
        &self,
        document: &Document,
        cancel: &CancellationToken,
    ) -> Result<Vec<ReferenceDescription>> {
        let result = &document.parse_result;
        let mut descriptions = Vec::new();
        for locator in &document.references {
            interrupt_and_check(cancel).await?;
            let Some(reference) = result.ast.reference(locator) else {
                continue;
            };
            let Some(target) = reference.target() else {
                continue;
            };
            let target_uri = match DocumentUri::parse(&target.uri) {
                Ok(uri) => uri,
                Err(e) => {
                    warn!(uri = %target.uri, error = %e, "Skipping reference with unusable target URI");
                    continue;
                }
            };
            descriptions.push(ReferenceDescription {
                source_uri: document.uri.clone(),
                source_path: result.ast.path_of(locator.node),
                source_range: reference.cst.and_then(|cst| result.cst.range(cst)),
                local: target_uri == document.uri,
                target_uri,
                target_path: target.path.clone(),
            });
        }
        Ok(descriptions)
    }
}
