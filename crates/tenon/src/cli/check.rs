//! `tenon check` command implementation.

use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use colored::Colorize;
use tenon::{Diagnostic, DocumentUri, Severity};

use super::{display_path, open_workspace};

/// Run the check command. Fails the process if any document has errors.
pub async fn run(workspace: &Path, workers: Option<usize>, all: bool) -> Result<ExitCode> {
    let ws = open_workspace(workspace, workers).await?;

    let mut reports: Vec<(DocumentUri, Vec<Diagnostic>)> = ws
        .read(|services| async move {
            let mut reports = Vec::new();
            for handle in services.documents.all() {
                let document = handle.read().await;
                reports.push((document.uri.clone(), document.diagnostics.clone()));
            }
            reports
        })
        .await?;
    reports.sort_by(|a, b| a.0.cmp(&b.0));

    let mut errors = 0usize;
    let mut warnings = 0usize;
    for (uri, diagnostics) in &reports {
        let path = display_path(workspace, uri);
        for diagnostic in diagnostics {
            match diagnostic.severity {
                Severity::Error => errors += 1,
                Severity::Warning => warnings += 1,
                Severity::Information | Severity::Hint => {}
            }
            if diagnostic.severity != Severity::Error && !all {
                continue;
            }
            let start = diagnostic.range.start;
            println!(
                "{}:{}:{}: {}: {}",
                path.white().bold(),
                start.line + 1,
                start.character + 1,
                format_severity(diagnostic.severity),
                diagnostic.message
            );
        }
    }

    if errors + warnings > 0 {
        println!();
    }
    println!(
        "Checked {} documents: {} errors, {} warnings",
        reports.len().to_string().green().bold(),
        if errors == 0 {
            errors.to_string().green()
        } else {
            errors.to_string().red().bold()
        },
        warnings.to_string().yellow()
    );

    Ok(if errors == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn format_severity(severity: Severity) -> colored::ColoredString {
    match severity {
        Severity::Error => "error".red().bold(),
        Severity::Warning => "warning".yellow().bold(),
        Severity::Information => "info".blue(),
        Severity::Hint => "hint".dimmed(),
    }
}
