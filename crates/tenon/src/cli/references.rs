//! `tenon references` command implementation.

use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use colored::Colorize;
use tenon::{ReferenceDescription, SymbolDescription};

use super::{display_path, open_workspace};

/// Run the references command.
pub async fn run(workspace: &Path, workers: Option<usize>, name: &str) -> Result<ExitCode> {
    let ws = open_workspace(workspace, workers).await?;

    let wanted = name.to_string();
    let found: Vec<(SymbolDescription, Vec<ReferenceDescription>)> = ws
        .read(move |services| async move {
            services
                .index
                .all_elements(None, None)
                .filter(|symbol| symbol.name == wanted)
                .map(|symbol| {
                    let references = services.index.find_all_references(&symbol.uri, &symbol.path);
                    (symbol, references)
                })
                .collect()
        })
        .await?;

    if found.is_empty() {
        println!("No exported symbol named \"{name}\"");
        return Ok(ExitCode::FAILURE);
    }

    for (symbol, mut references) in found {
        println!(
            "{} {} {}",
            symbol.type_name.cyan(),
            symbol.name.white().bold(),
            format!("({})", display_path(workspace, &symbol.uri)).dimmed()
        );
        if references.is_empty() {
            println!("    {}", "no references".dimmed());
            continue;
        }
        references.sort_by(|a, b| {
            a.source_uri
                .cmp(&b.source_uri)
                .then_with(|| a.source_path.cmp(&b.source_path))
        });
        for reference in &references {
            let location = match reference.source_range {
                Some(range) => format!(
                    "{}:{}:{}",
                    display_path(workspace, &reference.source_uri),
                    range.start.line + 1,
                    range.start.character + 1
                ),
                None => display_path(workspace, &reference.source_uri),
            };
            println!("    {} {location} {}", "•".dimmed(), reference.source_path.dimmed());
        }
    }
    Ok(ExitCode::SUCCESS)
}
