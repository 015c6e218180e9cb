//! Source catalog: discovers lesson resources on disk and indexes them by
//! [`LessonCode`].
//!
//! Spreadsheets (unit guidance), slide decks and prior ReadNow documents are
//! found by glob patterns relative to their roots. Each file is parsed once
//! and kept read-only for the rest of the run. A file that cannot be opened
//! or carries no lesson code is logged and excluded; only a missing root
//! aborts the scan.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::{CatalogConfig, ExtractionRules};
use crate::lesson_code::{LessonCode, UnitCode};
use crate::ooxml::{self, Deck, Workbook};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog root does not exist or is not a directory: {0}")]
    RootMissing(PathBuf),
    #[error("catalog root is unreadable: {path}: {message}")]
    RootUnreadable { path: PathBuf, message: String },
    #[error("invalid glob pattern '{pattern}': {message}")]
    Glob { pattern: String, message: String },
}

/// What kind of source a document is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SourceKind {
    Spreadsheet,
    Deck,
    ReadNow,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Spreadsheet => "spreadsheet",
            SourceKind::Deck => "deck",
            SourceKind::ReadNow => "readnow",
        }
    }
}

/// Column layout detected for one worksheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetLayout {
    pub code_column: usize,
    /// Header texts by column, taken from the row above the first lesson row.
    pub headers: BTreeMap<usize, String>,
}

/// Where a lesson's data lives inside a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// Index into [`Workbook::sheets`] and into that sheet's rows.
    Row { sheet: usize, row: usize },
    WholeDocument,
}

#[derive(Debug, Clone)]
pub enum Content {
    Workbook {
        workbook: Workbook,
        layouts: BTreeMap<usize, SheetLayout>,
    },
    Deck(Deck),
    Paragraphs(Vec<String>),
}

/// A read-only source file plus its lesson index.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub path: PathBuf,
    pub kind: SourceKind,
    pub content: Content,
    pub locations: BTreeMap<LessonCode, Location>,
}

impl SourceDocument {
    pub fn file_stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    pub fn folder_name(&self) -> String {
        self.path
            .parent()
            .and_then(|p| p.file_name())
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// A file that was matched but left out of the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Excluded {
    pub path: PathBuf,
    pub reason: String,
}

/// Index of all lesson sources found under the configured roots.
#[derive(Debug, Default)]
pub struct Catalog {
    documents: Vec<SourceDocument>,
    index: BTreeMap<LessonCode, Vec<usize>>,
    excluded: Vec<Excluded>,
}

impl Catalog {
    /// Builds a catalog from already-parsed documents, in scan order.
    pub fn from_documents(documents: Vec<SourceDocument>) -> Self {
        let mut catalog = Catalog::default();
        for document in documents {
            catalog.insert(document);
        }
        catalog
    }

    fn insert(&mut self, document: SourceDocument) {
        let idx = self.documents.len();
        for code in document.locations.keys() {
            self.index.entry(code.clone()).or_default().push(idx);
        }
        self.documents.push(document);
    }

    /// Documents indexed for a lesson, in catalog scan order.
    pub fn find(&self, code: &LessonCode) -> Vec<&SourceDocument> {
        self.index
            .get(code)
            .map(|ids| ids.iter().map(|&i| &self.documents[i]).collect())
            .unwrap_or_default()
    }

    /// All indexed lessons whose code starts with `prefix`, sorted.
    pub fn find_by_unit_prefix(&self, prefix: &str) -> Vec<LessonCode> {
        self.index
            .keys()
            .filter(|code| code.has_prefix(prefix))
            .cloned()
            .collect()
    }

    pub fn lessons(&self) -> Vec<LessonCode> {
        self.index.keys().cloned().collect()
    }

    pub fn units(&self) -> Vec<UnitCode> {
        self.index
            .keys()
            .map(|c| c.unit())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn documents(&self) -> &[SourceDocument] {
        &self.documents
    }

    pub fn excluded(&self) -> &[Excluded] {
        &self.excluded
    }
}

/// Scans the configured roots and builds the catalog.
///
/// Scan order is spreadsheets, then decks, then ReadNow documents, each in
/// sorted path order. That order is what "first match wins" refers to.
pub fn scan(config: &CatalogConfig, rules: &ExtractionRules) -> Result<Catalog, CatalogError> {
    let root = &config.root;
    if !root.is_dir() {
        return Err(CatalogError::RootMissing(root.clone()));
    }
    std::fs::read_dir(root).map_err(|e| CatalogError::RootUnreadable {
        path: root.clone(),
        message: e.to_string(),
    })?;

    let mut excludes = vec!["**/.git/**".to_string()];
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;
    let spreadsheet_set = build_globset(&config.spreadsheet_globs)?;
    let deck_set = build_globset(&config.deck_globs)?;
    let readnow_set = build_globset(&config.readnow_globs)?;

    let mut spreadsheets = Vec::new();
    let mut decks = Vec::new();
    for (path, rel) in walk(root, config.follow_symlinks, &exclude_set) {
        if spreadsheet_set.is_match(&rel) {
            spreadsheets.push(path);
        } else if deck_set.is_match(&rel) {
            decks.push(path);
        }
    }

    let mut readnows = Vec::new();
    if let Some(dir) = &config.readnow_dir {
        if dir.is_dir() {
            for (path, rel) in walk(dir, config.follow_symlinks, &exclude_set) {
                if readnow_set.is_match(&rel) {
                    readnows.push(path);
                }
            }
        } else {
            tracing::debug!(dir = %dir.display(), "ReadNow folder not found; mark schemes will not be read");
        }
    }

    let mut catalog = Catalog::default();
    let batches = [
        (SourceKind::Spreadsheet, spreadsheets),
        (SourceKind::Deck, decks),
        (SourceKind::ReadNow, readnows),
    ];
    for (kind, paths) in batches {
        for path in paths {
            match load_document(&path, kind, rules) {
                Ok(document) if document.locations.is_empty() => {
                    tracing::warn!(path = %path.display(), "no lesson code found; excluded");
                    catalog.excluded.push(Excluded {
                        path,
                        reason: "no lesson code found".to_string(),
                    });
                }
                Ok(document) => {
                    tracing::debug!(
                        path = %path.display(),
                        kind = kind.as_str(),
                        lessons = document.locations.len(),
                        "indexed"
                    );
                    catalog.insert(document);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "unreadable source; excluded");
                    catalog.excluded.push(Excluded {
                        path,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    tracing::info!(
        root = %root.display(),
        documents = catalog.documents.len(),
        lessons = catalog.index.len(),
        excluded = catalog.excluded.len(),
        "catalog scan complete"
    );
    Ok(catalog)
}

/// Files under `root` as (absolute path, root-relative path), sorted.
/// Office lock files (`~$name.xlsx`) are skipped.
fn walk(root: &Path, follow_symlinks: bool, exclude_set: &GlobSet) -> Vec<(PathBuf, String)> {
    let walker = WalkDir::new(root)
        .follow_links(follow_symlinks)
        .sort_by_file_name();
    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.file_name().to_string_lossy().starts_with('~') {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");
        if exclude_set.is_match(&rel_str) {
            continue;
        }
        files.push((path.to_path_buf(), rel_str));
    }
    files
}

fn load_document(path: &Path, kind: SourceKind, rules: &ExtractionRules) -> Result<SourceDocument> {
    let bytes = std::fs::read(path)?;
    let mut document = SourceDocument {
        path: path.to_path_buf(),
        kind,
        content: Content::Paragraphs(Vec::new()),
        locations: BTreeMap::new(),
    };
    match kind {
        SourceKind::Spreadsheet => {
            let workbook = ooxml::read_workbook(&bytes)?;
            let mut layouts = BTreeMap::new();
            for (sheet_idx, sheet) in workbook.sheets.iter().enumerate() {
                let Some(layout) = detect_layout(sheet, rules) else {
                    continue;
                };
                for (row_idx, row) in sheet.rows.iter().enumerate() {
                    let code = row
                        .cell(layout.code_column)
                        .and_then(|text| text.trim().parse::<LessonCode>().ok());
                    if let Some(code) = code {
                        document.locations.entry(code).or_insert(Location::Row {
                            sheet: sheet_idx,
                            row: row_idx,
                        });
                    }
                }
                layouts.insert(sheet_idx, layout);
            }
            document.content = Content::Workbook { workbook, layouts };
        }
        SourceKind::Deck => {
            let deck = ooxml::read_deck(&bytes)?;
            let code = LessonCode::find_in(&document.file_stem())
                .or_else(|| LessonCode::find_in(&document.folder_name()))
                .or_else(|| {
                    deck.slide(1)
                        .and_then(|s| LessonCode::find_in(&s.lines().join(" ")))
                });
            if let Some(code) = code {
                document.locations.insert(code, Location::WholeDocument);
            }
            document.content = Content::Deck(deck);
        }
        SourceKind::ReadNow => {
            if let Some(code) = LessonCode::find_in(&document.file_stem()) {
                document.locations.insert(code, Location::WholeDocument);
            }
            document.content = Content::Paragraphs(ooxml::read_paragraphs(&bytes)?);
        }
    }
    Ok(document)
}

/// Finds the lesson-code column (the first of the leftmost
/// `code_search_columns` columns that holds a lesson code) and the header row
/// above the first lesson row.
fn detect_layout(sheet: &ooxml::Sheet, rules: &ExtractionRules) -> Option<SheetLayout> {
    let (first_row, code_column) = sheet.rows.iter().enumerate().find_map(|(idx, row)| {
        (0..rules.code_search_columns)
            .find(|&col| {
                row.cell(col)
                    .is_some_and(|text| text.trim().parse::<LessonCode>().is_ok())
            })
            .map(|col| (idx, col))
    })?;

    let header_window = first_row.saturating_sub(rules.header_search_rows)..first_row;
    let headers = sheet.rows[header_window]
        .iter()
        .rev()
        .find(|row| row.cells.len() > 1)
        .map(|row| row.cells.clone())
        .unwrap_or_default();

    Some(SheetLayout {
        code_column,
        headers,
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, CatalogError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| CatalogError::Glob {
            pattern: pattern.clone(),
            message: e.to_string(),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| CatalogError::Glob {
        pattern: patterns.join(", "),
        message: e.to_string(),
    })
}
