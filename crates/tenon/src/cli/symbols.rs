//! `tenon symbols` command implementation.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{bail, Result};
use colored::Colorize;
use tenon::SymbolDescription;

use super::{display_path, open_workspace};

/// Run the symbols command.
pub async fn run(workspace: &Path, workers: Option<usize>, type_filter: Option<&str>) -> Result<ExitCode> {
    let ws = open_workspace(workspace, workers).await?;

    if let Some(type_name) = type_filter {
        if !ws.services().grammar.type_names().any(|known| known == type_name) {
            bail!("unknown type '{type_name}'");
        }
    }

    let filter = type_filter.map(str::to_string);
    let mut symbols: Vec<SymbolDescription> = ws
        .read(move |services| async move { services.index.all_elements(filter.as_deref(), None).collect() })
        .await?;
    symbols.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.uri.cmp(&b.uri)));

    if symbols.is_empty() {
        println!("No symbols found");
        return Ok(ExitCode::SUCCESS);
    }

    println!("Found {} symbols:", symbols.len().to_string().green().bold());
    println!();
    for symbol in &symbols {
        println!(
            "  {:<12} {} {}",
            symbol.type_name.cyan(),
            symbol.name.white().bold(),
            format!("({}{})", display_path(workspace, &symbol.uri), symbol.path).dimmed()
        );
    }
    Ok(ExitCode::SUCCESS)
}
