//! `forge catalog`: list what the catalog scan found.

use anyhow::{Context, Result};

use crate::catalog;
use crate::config::Config;

pub fn list_catalog(config: &Config, unit: Option<&str>) -> Result<()> {
    let catalog = catalog::scan(&config.catalog, &config.extraction).context("catalog scan failed")?;

    let lessons = match unit {
        Some(prefix) => catalog.find_by_unit_prefix(prefix),
        None => catalog.lessons(),
    };

    println!(
        "{:<10} {:>6} {:>6} {:>8}   TITLE SOURCE",
        "LESSON", "SHEETS", "DECKS", "READNOWS"
    );
    for code in &lessons {
        let documents = catalog.find(code);
        let count = |kind: catalog::SourceKind| documents.iter().filter(|d| d.kind == kind).count();
        let first = documents
            .first()
            .map(|d| d.path.display().to_string())
            .unwrap_or_default();
        println!(
            "{:<10} {:>6} {:>6} {:>8}   {}",
            code,
            count(catalog::SourceKind::Spreadsheet),
            count(catalog::SourceKind::Deck),
            count(catalog::SourceKind::ReadNow),
            first
        );
    }

    println!();
    println!(
        "{} lessons in {} units, {} source files",
        lessons.len(),
        catalog.units().len(),
        catalog.documents().len()
    );

    if !catalog.excluded().is_empty() {
        println!();
        println!("Excluded:");
        for excluded in catalog.excluded() {
            println!("  {}  ({})", excluded.path.display(), excluded.reason);
        }
    }

    Ok(())
}
