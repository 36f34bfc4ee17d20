//! CLI command implementations.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use tenon::{domainmodel, DocumentUri, Workspace, WorkbenchConfig};

pub mod check;
pub mod references;
pub mod symbols;

/// Load the configuration under `root`, then load and build every document.
async fn open_workspace(root: &Path, workers: Option<usize>) -> Result<Workspace> {
    let root = root
        .canonicalize()
        .with_context(|| format!("cannot open workspace {}", root.display()))?;
    let mut config = WorkbenchConfig::load_or_default(&root).await?;
    if let Some(workers) = workers {
        config.parser.thread_count = workers;
    }

    let services = domainmodel::services(&config).context("cannot set up the domain model language")?;
    let workspace = Workspace::new(services, config);
    let report = workspace.load(vec![root.clone()]).await?;

    for (directory, reason) in &report.directories_skipped {
        eprintln!("{}: skipped {directory}: {reason}", "warning".yellow().bold());
    }
    tracing::info!(root = %root.display(), documents = report.documents.len(), "Workspace ready");
    Ok(workspace)
}

/// Path of `uri` relative to `root` for display, or the URI itself.
fn display_path(root: &Path, uri: &DocumentUri) -> String {
    let Some(path) = uri.to_file_path() else {
        return uri.to_string();
    };
    let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    path.strip_prefix(&root)
        .map_or_else(|_| path.display().to_string(), |relative| relative.display().to_string())
}
