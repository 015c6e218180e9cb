//! Structured access to OOXML packages (xlsx, pptx, docx).
//!
//! Office documents are ZIP archives of XML parts. This module reads the
//! parts the pipeline cares about into plain Rust structures (workbook rows,
//! slide shapes, document paragraphs) and rewrites `{{placeholder}}` text in
//! template packages. Everything else in a package is treated as opaque and
//! copied byte-for-byte.

use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, BytesText, Event};
use regex::Regex;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read, Write};

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Maximum sheets to read from a workbook.
const MAX_SHEETS: usize = 100;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder pattern is valid")
});

/// Excel's escape for characters XML cannot carry, e.g. `_x000D_`.
static EXCEL_ESCAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_x([0-9A-Fa-f]{4})_").expect("excel escape pattern is valid"));

#[derive(Debug, thiserror::Error)]
pub enum OoxmlError {
    #[error("not a readable OOXML package: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("XML error in {part}: {message}")]
    Xml { part: String, message: String },
    #[error("package part {0} not found")]
    MissingPart(String),
    #[error("package part {0} exceeds the 50 MiB size limit")]
    TooLarge(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn xml_err(part: &str, e: impl std::fmt::Display) -> OoxmlError {
    OoxmlError::Xml {
        part: part.to_string(),
        message: e.to_string(),
    }
}

type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

fn open(bytes: &[u8]) -> Result<Archive<'_>, OoxmlError> {
    Ok(zip::ZipArchive::new(Cursor::new(bytes))?)
}

fn read_entry_bounded(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, OoxmlError> {
    let entry = archive.by_name(name).map_err(|e| match e {
        zip::result::ZipError::FileNotFound => OoxmlError::MissingPart(name.to_string()),
        other => OoxmlError::Zip(other),
    })?;
    read_bounded(entry, name)
}

fn read_bounded(entry: impl Read, name: &str) -> Result<Vec<u8>, OoxmlError> {
    let mut out = Vec::new();
    entry.take(MAX_ENTRY_BYTES).read_to_end(&mut out)?;
    if out.len() as u64 >= MAX_ENTRY_BYTES {
        return Err(OoxmlError::TooLarge(name.to_string()));
    }
    Ok(out)
}

/// Part names matching `{prefix}{n}.xml`, sorted by `n`.
fn numbered_parts(archive: &Archive<'_>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| {
            n.strip_prefix(prefix)
                .and_then(|rest| rest.strip_suffix(".xml"))
                .is_some_and(|num| num.parse::<u32>().is_ok())
        })
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

/// Where a package lists its content parts in display order.
struct PartList {
    main: &'static str,
    rels: &'static str,
    item: &'static [u8],
    fallback_prefix: &'static str,
}

const DECK_PARTS: PartList = PartList {
    main: "ppt/presentation.xml",
    rels: "ppt/_rels/presentation.xml.rels",
    item: b"sldId",
    fallback_prefix: "ppt/slides/slide",
};

const WORKBOOK_PARTS: PartList = PartList {
    main: "xl/workbook.xml",
    rels: "xl/_rels/workbook.xml.rels",
    item: b"sheet",
    fallback_prefix: "xl/worksheets/sheet",
};

/// Content parts in the order PowerPoint or Excel shows them, resolved
/// through the main part's relationship ids. Part-number order is used when
/// the main part or its relationships are absent or resolve to nothing.
fn ordered_parts(archive: &mut Archive<'_>, list: &PartList) -> Result<Vec<String>, OoxmlError> {
    let ids = match read_entry_bounded(archive, list.main) {
        Ok(xml) => relationship_ids(&xml, list.main, list.item)?,
        Err(OoxmlError::MissingPart(_)) => Vec::new(),
        Err(e) => return Err(e),
    };
    let targets = if ids.is_empty() {
        HashMap::new()
    } else {
        match read_entry_bounded(archive, list.rels) {
            Ok(xml) => relationship_targets(&xml, list.rels, list.main)?,
            Err(OoxmlError::MissingPart(_)) => HashMap::new(),
            Err(e) => return Err(e),
        }
    };
    let ordered: Vec<String> = ids
        .iter()
        .filter_map(|id| targets.get(id))
        .filter(|part| archive.file_names().any(|name| name == part.as_str()))
        .cloned()
        .collect();
    if ordered.is_empty() {
        return Ok(numbered_parts(archive, list.fallback_prefix));
    }
    Ok(ordered)
}

/// `r:id` values of every `item` element, in document order.
fn relationship_ids(xml: &[u8], part: &str, item: &[u8]) -> Result<Vec<String>, OoxmlError> {
    let mut ids = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == item => {
                let id = e
                    .attributes()
                    .flatten()
                    .find(|a| a.key.prefix().is_some() && a.key.local_name().as_ref() == b"id")
                    .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()));
                if let Some(id) = id {
                    ids.push(id);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_err(part, e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(ids)
}

/// Relationship id to package part name, for internal targets.
fn relationship_targets(
    xml: &[u8],
    part: &str,
    source: &str,
) -> Result<HashMap<String, String>, OoxmlError> {
    let base = source.rsplit_once('/').map_or("", |(dir, _)| dir);
    let mut targets = HashMap::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                let external = attr_value(&e, b"TargetMode").is_some_and(|m| m == "External");
                if let (false, Some(id), Some(target)) =
                    (external, attr_value(&e, b"Id"), attr_value(&e, b"Target"))
                {
                    targets.insert(id, resolve_target(base, &target));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_err(part, e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(targets)
}

/// Resolves a relationship target against the directory of its source part.
fn resolve_target(base: &str, target: &str) -> String {
    let joined = match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None if base.is_empty() => target.to_string(),
        None => format!("{}/{}", base, target),
    };
    let mut segments: Vec<&str> = Vec::new();
    for segment in joined.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

/// Decodes Excel's `_xHHHH_` escapes. `_x005F_` is a literal underscore, so
/// `_x005F_x000D_` stays the text `_x000D_`. A decoded vertical tab (Excel's
/// in-cell line break when pasted from Word) becomes a newline; other
/// characters XML cannot carry are dropped.
fn decode_excel_escapes(text: &str) -> Cow<'_, str> {
    if !text.contains("_x") {
        return Cow::Borrowed(text);
    }
    EXCEL_ESCAPE.replace_all(text, |caps: &regex::Captures<'_>| {
        let decoded = u32::from_str_radix(&caps[1], 16)
            .ok()
            .and_then(char::from_u32);
        match decoded {
            Some('\u{b}') => "\n".to_string(),
            Some(c) if c == '\t' || c == '\n' || c == '\r' || !c.is_control() => c.to_string(),
            Some(_) => String::new(),
            None => caps[0].to_string(),
        }
    })
}

fn attr_value(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

// ============ Spreadsheets ============

/// All worksheets of an xlsx package, in tab order.
#[derive(Debug, Clone, Default)]
pub struct Workbook {
    pub sheets: Vec<Sheet>,
}

#[derive(Debug, Clone, Default)]
pub struct Sheet {
    pub rows: Vec<Row>,
}

/// One worksheet row. `number` is the 1-based row number; cells are keyed
/// by 0-based column index and only non-empty cells are present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    pub number: u32,
    pub cells: BTreeMap<usize, String>,
}

impl Row {
    pub fn cell(&self, column: usize) -> Option<&str> {
        self.cells.get(&column).map(|s| s.as_str())
    }
}

/// Converts a column name (`"A"`, `"F"`, `"AB"`) into a 0-based index.
pub fn column_index(letters: &str) -> Option<usize> {
    let letters = letters.trim();
    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    letters.chars().try_fold(0usize, |acc, c| {
        let digit = (c.to_ascii_uppercase() as u8 - b'A') as usize + 1;
        acc.checked_mul(26)?.checked_add(digit)
    })
    .map(|n| n - 1)
}

/// Splits a cell reference like `"B12"` into (column index, row number).
fn parse_cell_ref(reference: &str) -> Option<(usize, u32)> {
    let split = reference.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = reference.split_at(split);
    Some((column_index(letters)?, digits.parse().ok()?))
}

pub fn read_workbook(bytes: &[u8]) -> Result<Workbook, OoxmlError> {
    let mut archive = open(bytes)?;
    let shared = match read_entry_bounded(&mut archive, "xl/sharedStrings.xml") {
        Ok(xml) => read_shared_strings(&xml)?,
        Err(OoxmlError::MissingPart(_)) => Vec::new(),
        Err(e) => return Err(e),
    };
    let names = ordered_parts(&mut archive, &WORKBOOK_PARTS)?;
    if names.is_empty() {
        return Err(OoxmlError::MissingPart("xl/worksheets/sheet1.xml".to_string()));
    }
    let mut sheets = Vec::new();
    for name in names.into_iter().take(MAX_SHEETS) {
        let xml = read_entry_bounded(&mut archive, &name)?;
        sheets.push(read_sheet(&xml, &shared, &name)?);
    }
    Ok(Workbook { sheets })
}

fn read_shared_strings(xml: &[u8]) -> Result<Vec<String>, OoxmlError> {
    let part = "xl/sharedStrings.xml";
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    let mut in_phonetic = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                b"rPh" => in_phonetic = true,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Ok(Event::Text(te)) if in_t && !in_phonetic => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&te.unescape().map_err(|e| xml_err(part, e))?);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => {
                    let text = current.take().unwrap_or_default();
                    strings.push(decode_excel_escapes(&text).into_owned());
                }
                b"t" => in_t = false,
                b"rPh" => in_phonetic = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_err(part, e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

#[derive(Default)]
struct CellState {
    column: usize,
    kind: Option<String>,
    value: String,
    inline: String,
}

fn read_sheet(xml: &[u8], shared: &[String], part: &str) -> Result<Sheet, OoxmlError> {
    let mut sheet = Sheet::default();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut row: Option<Row> = None;
    let mut cell: Option<CellState> = None;
    let mut next_column = 0usize;
    let mut in_v = false;
    let mut in_inline_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    let number = attr_value(&e, b"r")
                        .and_then(|r| r.parse().ok())
                        .unwrap_or_else(|| sheet.rows.last().map_or(1, |r: &Row| r.number + 1));
                    row = Some(Row {
                        number,
                        cells: BTreeMap::new(),
                    });
                    next_column = 0;
                }
                b"c" => {
                    let column = attr_value(&e, b"r")
                        .and_then(|r| parse_cell_ref(&r))
                        .map_or(next_column, |(c, _)| c);
                    next_column = column + 1;
                    cell = Some(CellState {
                        column,
                        kind: attr_value(&e, b"t"),
                        ..CellState::default()
                    });
                }
                b"v" => in_v = true,
                b"t" if cell.is_some() => in_inline_t = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"c" => {
                    next_column = attr_value(&e, b"r")
                        .and_then(|r| parse_cell_ref(&r))
                        .map_or(next_column, |(c, _)| c)
                        + 1;
                }
                b"row" => {
                    next_column = 0;
                }
                _ => {}
            },
            Ok(Event::Text(te)) => {
                if let Some(state) = cell.as_mut() {
                    let text = te.unescape().map_err(|e| xml_err(part, e))?;
                    if in_v {
                        state.value.push_str(&text);
                    } else if in_inline_t {
                        state.inline.push_str(&text);
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" => in_v = false,
                b"t" => in_inline_t = false,
                b"c" => {
                    if let (Some(state), Some(row)) = (cell.take(), row.as_mut()) {
                        let text = cell_text(state.kind.as_deref(), &state.value, &state.inline, shared);
                        if !text.trim().is_empty() {
                            row.cells.insert(state.column, text);
                        }
                    }
                }
                b"row" => {
                    if let Some(done) = row.take() {
                        if !done.cells.is_empty() {
                            sheet.rows.push(done);
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_err(part, e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(sheet)
}

fn cell_text(kind: Option<&str>, value: &str, inline: &str, shared: &[String]) -> String {
    match kind {
        Some("s") => value
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|i| shared.get(i).cloned())
            .unwrap_or_default(),
        Some("inlineStr") => decode_excel_escapes(inline).into_owned(),
        Some("b") => match value.trim() {
            "1" => "TRUE".to_string(),
            _ => "FALSE".to_string(),
        },
        _ => value.to_string(),
    }
}

// ============ Slide decks ============

#[derive(Debug, Clone, Default)]
pub struct Deck {
    pub slides: Vec<Slide>,
}

/// One slide; `number` is 1-based.
#[derive(Debug, Clone, Default)]
pub struct Slide {
    pub number: usize,
    pub shapes: Vec<Shape>,
}

/// A text-bearing shape with its offset in EMUs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Shape {
    pub top: i64,
    pub left: i64,
    pub paragraphs: Vec<String>,
}

impl Deck {
    pub fn slide(&self, number: usize) -> Option<&Slide> {
        self.slides.iter().find(|s| s.number == number)
    }
}

impl Slide {
    /// Non-empty paragraph texts, shapes read top-to-bottom then left-to-right.
    pub fn lines(&self) -> Vec<String> {
        let mut shapes: Vec<&Shape> = self.shapes.iter().collect();
        shapes.sort_by_key(|s| (s.top, s.left));
        shapes
            .into_iter()
            .flat_map(|s| s.paragraphs.iter())
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect()
    }
}

pub fn read_deck(bytes: &[u8]) -> Result<Deck, OoxmlError> {
    let mut archive = open(bytes)?;
    let names = ordered_parts(&mut archive, &DECK_PARTS)?;
    let mut slides = Vec::with_capacity(names.len());
    for (idx, name) in names.iter().enumerate() {
        let xml = read_entry_bounded(&mut archive, name)?;
        let shapes = read_slide_shapes(&xml, name)?;
        slides.push(Slide {
            number: idx + 1,
            shapes,
        });
    }
    Ok(Deck { slides })
}

fn read_slide_shapes(xml: &[u8], part: &str) -> Result<Vec<Shape>, OoxmlError> {
    let mut shapes = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut shape: Option<Shape> = None;
    let mut positioned = false;
    let mut paragraph: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"sp" | b"graphicFrame" => {
                    shape = Some(Shape::default());
                    positioned = false;
                }
                b"off" => set_offset(&e, shape.as_mut(), &mut positioned),
                b"p" => paragraph = Some(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"off" => set_offset(&e, shape.as_mut(), &mut positioned),
                b"br" => {
                    if let Some(text) = paragraph.as_mut() {
                        let done = std::mem::take(text);
                        shape
                            .get_or_insert_with(Shape::default)
                            .paragraphs
                            .push(done);
                    }
                }
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                if let Some(text) = paragraph.as_mut() {
                    text.push_str(&te.unescape().map_err(|e| xml_err(part, e))?);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"p" => {
                    if let Some(text) = paragraph.take() {
                        let target = shape.get_or_insert_with(Shape::default);
                        target.paragraphs.push(text);
                    }
                }
                b"sp" | b"graphicFrame" => {
                    if let Some(done) = shape.take() {
                        if done.paragraphs.iter().any(|p| !p.trim().is_empty()) {
                            shapes.push(done);
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_err(part, e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(shapes)
}

fn set_offset(e: &BytesStart<'_>, shape: Option<&mut Shape>, positioned: &mut bool) {
    if let Some(shape) = shape {
        if !*positioned {
            shape.left = attr_value(e, b"x").and_then(|v| v.parse().ok()).unwrap_or(0);
            shape.top = attr_value(e, b"y").and_then(|v| v.parse().ok()).unwrap_or(0);
            *positioned = true;
        }
    }
}

// ============ Word documents ============

/// Body paragraphs of a docx package, in document order (empty ones included).
pub fn read_paragraphs(bytes: &[u8]) -> Result<Vec<String>, OoxmlError> {
    let part = "word/document.xml";
    let mut archive = open(bytes)?;
    let xml = read_entry_bounded(&mut archive, part)?;
    let mut out = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => stack.push(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"p" => out.push(String::new()),
                b"tab" => {
                    if let Some(p) = stack.last_mut() {
                        p.push('\t');
                    }
                }
                b"br" | b"cr" => {
                    if let Some(p) = stack.last_mut() {
                        p.push('\n');
                    }
                }
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                if let Some(p) = stack.last_mut() {
                    p.push_str(&te.unescape().map_err(|e| xml_err(part, e))?);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"p" => {
                    if let Some(p) = stack.pop() {
                        out.push(p);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_err(part, e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

// ============ Template rewriting ============

/// Parts of a package that may carry placeholders.
fn is_template_part(name: &str) -> bool {
    if name == "word/document.xml" {
        return true;
    }
    let numbered = |prefix: &str| {
        name.strip_prefix(prefix)
            .and_then(|rest| rest.strip_suffix(".xml"))
            .is_some_and(|n| n.chars().all(|c| c.is_ascii_digit()))
    };
    numbered("word/header") || numbered("word/footer") || numbered("ppt/slides/slide")
}

/// Replaces `{{name}}` placeholders whose name is in `values`.
/// Unknown placeholders are left untouched.
pub fn substitute(text: &str, values: &HashMap<String, String>) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &regex::Captures<'_>| {
            values
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Placeholder names referenced anywhere in a template package.
pub fn placeholders(bytes: &[u8]) -> Result<Vec<String>, OoxmlError> {
    let mut archive = open(bytes)?;
    let parts: Vec<String> = archive
        .file_names()
        .filter(|n| is_template_part(n))
        .map(|s| s.to_string())
        .collect();
    let mut found = Vec::new();
    for name in parts {
        let xml = read_entry_bounded(&mut archive, &name)?;
        for text in paragraph_texts(&xml, &name)? {
            for caps in PLACEHOLDER.captures_iter(&text) {
                let key = caps[1].to_string();
                if !found.contains(&key) {
                    found.push(key);
                }
            }
        }
    }
    Ok(found)
}

fn paragraph_texts(xml: &[u8], part: &str) -> Result<Vec<String>, OoxmlError> {
    let mut out = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => stack.push(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                if let Some(p) = stack.last_mut() {
                    p.push_str(&te.unescape().map_err(|e| xml_err(part, e))?);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"p" => {
                    if let Some(p) = stack.pop() {
                        out.push(p);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_err(part, e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

/// Rewrites a template package, substituting placeholders in every
/// document, header, footer and slide part. Returns the new package bytes.
pub fn replace_placeholders(
    bytes: &[u8],
    values: &HashMap<String, String>,
) -> Result<Vec<u8>, OoxmlError> {
    let mut archive = open(bytes)?;
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        let name = entry.name().to_string();
        if entry.is_dir() {
            writer.add_directory(name, options)?;
            continue;
        }
        let data = read_bounded(entry, &name)?;
        let data = if is_template_part(&name) {
            rewrite_part(&data, values, &name)?
        } else {
            data
        };
        writer.start_file(name, options)?;
        writer.write_all(&data)?;
    }
    Ok(writer.finish()?.into_inner())
}

fn emit(
    writer: &mut quick_xml::Writer<Cursor<Vec<u8>>>,
    event: Event<'_>,
    part: &str,
) -> Result<(), OoxmlError> {
    writer.write_event(event).map_err(|e| xml_err(part, e))
}

enum ParagraphEdge {
    Open,
    Close,
    Inside,
}

fn rewrite_part(
    xml: &[u8],
    values: &HashMap<String, String>,
    part: &str,
) -> Result<Vec<u8>, OoxmlError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut writer = quick_xml::Writer::new(Cursor::new(Vec::new()));
    let mut buf = Vec::new();
    let mut pending: Vec<Event<'static>> = Vec::new();
    let mut depth = 0usize;
    loop {
        let event = reader.read_event_into(&mut buf).map_err(|e| xml_err(part, e))?;
        let edge = match &event {
            Event::Eof => break,
            Event::Start(e) if e.local_name().as_ref() == b"p" => ParagraphEdge::Open,
            Event::End(e) if e.local_name().as_ref() == b"p" => ParagraphEdge::Close,
            _ => ParagraphEdge::Inside,
        };
        match edge {
            ParagraphEdge::Open => {
                depth += 1;
                pending.push(event.into_owned());
            }
            ParagraphEdge::Close if depth == 1 => {
                depth = 0;
                pending.push(event.into_owned());
                for out in rewrite_paragraph(std::mem::take(&mut pending), values, part)? {
                    emit(&mut writer, out, part)?;
                }
            }
            ParagraphEdge::Close if depth > 1 => {
                depth -= 1;
                pending.push(event.into_owned());
            }
            _ if depth > 0 => pending.push(event.into_owned()),
            _ => emit(&mut writer, event, part)?,
        }
        buf.clear();
    }
    for out in pending {
        emit(&mut writer, out, part)?;
    }
    Ok(writer.into_inner().into_inner())
}

/// Substitutes placeholders in one buffered paragraph.
///
/// Word and PowerPoint often split `{{name}}` across several runs, so the
/// paragraph's text is joined before substitution and the result is written
/// into the first text element. A multi-line result becomes one copy of the
/// paragraph per line.
fn rewrite_paragraph(
    events: Vec<Event<'static>>,
    values: &HashMap<String, String>,
    part: &str,
) -> Result<Vec<Event<'static>>, OoxmlError> {
    let mut text = String::new();
    let mut in_t = false;
    for event in &events {
        match event {
            Event::Start(e) if e.local_name().as_ref() == b"t" => in_t = true,
            Event::End(e) if e.local_name().as_ref() == b"t" => in_t = false,
            Event::Text(te) if in_t => {
                text.push_str(&te.unescape().map_err(|e| xml_err(part, e))?)
            }
            _ => {}
        }
    }
    if !text.contains("{{") {
        return Ok(events);
    }
    let replaced = substitute(&text, values);
    if replaced == text {
        return Ok(events);
    }

    let mut out = Vec::new();
    for line in replaced.split('\n') {
        let mut wrote = false;
        let mut in_t = false;
        for event in &events {
            match event {
                Event::Start(e) if e.local_name().as_ref() == b"t" => {
                    in_t = true;
                    out.push(Event::Start(preserve_space(e)));
                    if !wrote {
                        out.push(Event::Text(BytesText::new(line).into_owned()));
                        wrote = true;
                    }
                }
                Event::Empty(e) if e.local_name().as_ref() == b"t" && !wrote => {
                    out.push(Event::Start(preserve_space(e)));
                    out.push(Event::Text(BytesText::new(line).into_owned()));
                    out.push(Event::End(e.to_end().into_owned()));
                    wrote = true;
                }
                Event::End(e) if e.local_name().as_ref() == b"t" => {
                    in_t = false;
                    out.push(event.clone());
                }
                Event::Text(_) | Event::CData(_) if in_t => {}
                other => out.push(other.clone()),
            }
        }
    }
    Ok(out)
}

/// Word trims leading/trailing spaces in `w:t` unless told otherwise.
fn preserve_space(e: &BytesStart<'_>) -> BytesStart<'static> {
    let mut start = e.clone().into_owned();
    let is_word_text = e.name().as_ref() == b"w:t";
    let has_space = e
        .attributes()
        .flatten()
        .any(|a| a.key.as_ref() == b"xml:space");
    if is_word_text && !has_space {
        start.push_attribute(("xml:space", "preserve"));
    }
    start
}

// ============ Package building ============

/// Writes a set of named parts into a new ZIP package.
pub fn build_package(parts: &[(&str, String)]) -> Result<Vec<u8>, OoxmlError> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    for (name, content) in parts {
        writer.start_file(name.to_string(), options)?;
        writer.write_all(content.as_bytes())?;
    }
    Ok(writer.finish()?.into_inner())
}
