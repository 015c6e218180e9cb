//! Field extraction from catalogued sources.
//!
//! Every source document indexed for a lesson contributes a partial
//! [`LessonRecord`]; partials are merged in catalog scan order under the
//! configured [`MergePolicy`](crate::models::MergePolicy). All rules come from
//! [`ExtractionRules`], so the positional conventions (objectives on slides
//! 4 to 7, title one column right of the code) can change without touching
//! this module.
//!
//! Sub-extractions are independent: a deck without objectives does not stop
//! a ReadNow from supplying the mark scheme. Fields nobody supplies stay
//! empty.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::catalog::{Catalog, Content, Location, SheetLayout, SourceDocument, SourceKind};
use crate::config::ExtractionRules;
use crate::lesson_code::LessonCode;
use crate::models::{Attainment, ExitTicketItem, LessonRecord};
use crate::ooxml::{self, Deck};

static NUMBERED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:Q\s*)?(\d+)\s*[.):]\s+(.*)$").expect("numbered line pattern is valid"));
static QUESTION_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*Q(?:uestion)?\s*:\s*(.*)$").expect("question label pattern is valid"));
static ANSWER_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(?:answer|ans|a)\s*:\s*(.*)$").expect("answer label pattern is valid"));
static COPY_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\(\d+\)\s*$").expect("copy suffix pattern is valid"));

const BULLETS: &[char] = &['•', '◦', '▪', '●', '‣', '-', '*', '–'];

pub struct Extractor<'a> {
    rules: &'a ExtractionRules,
    attainment: Attainment,
}

impl<'a> Extractor<'a> {
    pub fn new(rules: &'a ExtractionRules, attainment: Attainment) -> Self {
        Self { rules, attainment }
    }

    /// Builds the lesson record for `code` from every document the catalog
    /// holds for it.
    pub fn extract(&self, code: &LessonCode, catalog: &Catalog) -> LessonRecord {
        let mut record = LessonRecord::new(code.clone());
        for document in self.ordered(catalog.find(code)) {
            let partial = match document.kind {
                SourceKind::Spreadsheet => self.from_spreadsheet(code, document),
                SourceKind::Deck => self.from_deck(code, document),
                SourceKind::ReadNow => self.from_readnow(code, document),
            };
            record.merge_from(partial, self.rules.merge);
        }
        tracing::debug!(
            code = %code,
            title = !record.title.is_empty(),
            objectives = record.objectives.len(),
            exit_ticket = record.exit_ticket.len(),
            mark_scheme = !record.mark_scheme.is_empty(),
            "extracted"
        );
        record
    }

    /// Scan order, except that ReadNows named for the run's attainment band
    /// come before the other ReadNows.
    fn ordered<'c>(&self, documents: Vec<&'c SourceDocument>) -> Vec<&'c SourceDocument> {
        let tag = format!("_{}", self.attainment).to_ascii_uppercase();
        let mut ordered = documents;
        ordered.sort_by_key(|d| match d.kind {
            SourceKind::ReadNow if d.file_stem().to_ascii_uppercase().contains(&tag) => 0,
            SourceKind::ReadNow => 1,
            _ => 0,
        });
        ordered
    }

    fn from_spreadsheet(&self, code: &LessonCode, document: &SourceDocument) -> LessonRecord {
        let mut record = partial(code, document);
        let Content::Workbook { workbook, layouts } = &document.content else {
            return record;
        };
        let Some(Location::Row { sheet, row }) = document.locations.get(code) else {
            return record;
        };
        let (Some(layout), Some(row)) = (
            layouts.get(sheet),
            workbook.sheets.get(*sheet).and_then(|s| s.rows.get(*row)),
        ) else {
            return record;
        };

        let column = layout.code_column;
        if let Some(title) = row.cell(column + self.rules.title_column_offset) {
            record.title = clean_cell(title);
        }
        if let Some(objectives) = row.cell(column + self.rules.objective_column_offset) {
            record.objectives = objective_lines(objectives);
        }
        record.exit_ticket = self
            .exit_ticket_columns(layout)
            .into_iter()
            .filter_map(|col| row.cell(col))
            .flat_map(parse_exit_ticket)
            .collect();
        record
    }

    fn exit_ticket_columns(&self, layout: &SheetLayout) -> Vec<usize> {
        if let Some(range) = &self.rules.exit_ticket_columns {
            return parse_column_range(range);
        }
        layout
            .headers
            .iter()
            .filter(|(_, header)| {
                let lower = header.to_lowercase();
                lower.contains("exit") && lower.contains("ticket")
            })
            .map(|(col, _)| *col)
            .take(1)
            .collect()
    }

    fn from_deck(&self, code: &LessonCode, document: &SourceDocument) -> LessonRecord {
        let mut record = partial(code, document);
        let Content::Deck(deck) = &document.content else {
            return record;
        };
        record.objectives = self.deck_objectives(deck);
        record.title = title_from_name(&document.file_stem());
        if record.title.is_empty() {
            record.title = title_from_name(&document.folder_name());
        }
        record
    }

    fn deck_objectives(&self, deck: &Deck) -> Vec<String> {
        let range = self.rules.objective_slides;
        for number in range.first..=range.last {
            let Some(slide) = deck.slide(number) else {
                continue;
            };
            let lines: Vec<String> = slide
                .lines()
                .into_iter()
                .filter(|line| !contains_any(line, &self.rules.objective_excludes))
                .collect();
            let found = self.objectives_on_slide(&lines);
            if !found.is_empty() {
                tracing::debug!(slide = number, count = found.len(), "objectives found on slide");
                return found;
            }
        }
        Vec::new()
    }

    fn objectives_on_slide(&self, lines: &[String]) -> Vec<String> {
        if let Some(header) = lines
            .iter()
            .position(|line| contains_any(line, &self.rules.objective_headers))
        {
            return lines[header + 1..]
                .iter()
                .take_while(|line| !contains_any(line, &self.rules.objective_stop_markers))
                .map(|line| strip_bullet(line))
                .filter(|line| !line.is_empty())
                .collect();
        }
        lines
            .iter()
            .take_while(|line| !contains_any(line, &self.rules.objective_stop_markers))
            .filter(|line| {
                let lower = line.to_lowercase();
                self.rules
                    .objective_prefixes
                    .iter()
                    .any(|prefix| lower.starts_with(&prefix.to_lowercase()))
            })
            .map(|line| strip_bullet(line))
            .filter(|line| !line.is_empty())
            .collect()
    }

    fn from_readnow(&self, code: &LessonCode, document: &SourceDocument) -> LessonRecord {
        let mut record = partial(code, document);
        if let Content::Paragraphs(paragraphs) = &document.content {
            let lines = mark_scheme_lines(paragraphs, &self.rules.mark_scheme_heading);
            record.mark_scheme = format_mark_scheme(&lines);
        }
        record
    }
}

fn partial(code: &LessonCode, document: &SourceDocument) -> LessonRecord {
    let mut record = LessonRecord::new(code.clone());
    record.sources.push(document.path.clone());
    record
}

fn contains_any(line: &str, needles: &[String]) -> bool {
    let lower = line.to_lowercase();
    needles.iter().any(|n| lower.contains(&n.to_lowercase()))
}

fn clean_cell(text: &str) -> String {
    let text = text.trim();
    if text.eq_ignore_ascii_case("nan") {
        String::new()
    } else {
        text.to_string()
    }
}

fn strip_bullet(line: &str) -> String {
    line.trim().trim_start_matches(BULLETS).trim().to_string()
}

fn objective_lines(cell: &str) -> Vec<String> {
    cell.lines()
        .map(strip_bullet)
        .filter(|line| !line.is_empty() && !line.eq_ignore_ascii_case("nan"))
        .collect()
}

/// `"F"` or `"F:G"` into 0-based column indices.
fn parse_column_range(range: &str) -> Vec<usize> {
    let mut ends = range.split(':').filter_map(ooxml::column_index);
    match (ends.next(), ends.next()) {
        (Some(first), Some(last)) if first <= last => (first..=last).collect(),
        (Some(first), None) => vec![first],
        _ => {
            tracing::warn!(columns = range, "invalid exit_ticket_columns; ignoring");
            Vec::new()
        }
    }
}

/// Parses an exit-ticket cell into question/answer pairs.
pub fn parse_exit_ticket(cell: &str) -> Vec<ExitTicketItem> {
    let mut items: Vec<ExitTicketItem> = Vec::new();
    let mut in_answer = false;
    for line in cell.lines().map(str::trim) {
        if line.is_empty() || line.eq_ignore_ascii_case("nan") {
            continue;
        }
        if let Some(caps) = ANSWER_LABEL.captures(line) {
            let answer = caps[1].trim().to_string();
            match items.last_mut() {
                Some(item) => item.answer = answer,
                None => items.push(ExitTicketItem {
                    question: String::new(),
                    answer,
                }),
            }
            in_answer = true;
            continue;
        }
        let question = NUMBERED
            .captures(line)
            .or_else(|| QUESTION_LABEL.captures(line))
            .map(|caps| caps[caps.len() - 1].trim().to_string());
        match (question, items.last_mut()) {
            (None, Some(item)) => {
                let target = if in_answer {
                    &mut item.answer
                } else {
                    &mut item.question
                };
                if !target.is_empty() {
                    target.push(' ');
                }
                target.push_str(line);
            }
            (question, _) => {
                items.push(ExitTicketItem {
                    question: question.unwrap_or_else(|| strip_bullet(line)),
                    answer: String::new(),
                });
                in_answer = false;
            }
        }
    }
    items
}

/// Paragraphs between the mark-scheme heading and the next all-caps heading.
pub fn mark_scheme_lines(paragraphs: &[String], heading: &str) -> Vec<String> {
    let heading = heading.to_lowercase();
    let Some(start) = paragraphs
        .iter()
        .position(|p| p.to_lowercase().contains(&heading))
    else {
        return Vec::new();
    };
    paragraphs[start + 1..]
        .iter()
        .map(|p| p.trim())
        .take_while(|p| !is_section_heading(p))
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_section_heading(text: &str) -> bool {
    text.chars().count() > 10
        && text.chars().any(|c| c.is_alphabetic())
        && !text.chars().any(|c| c.is_lowercase())
}

/// Numbers mark-scheme lines. Lines already numbered keep their number and
/// reset the counter; bullet glyphs are replaced by numbers.
pub fn format_mark_scheme(lines: &[String]) -> String {
    let mut next = 1u32;
    let mut out = Vec::with_capacity(lines.len());
    for line in lines {
        if let Some(caps) = NUMBERED.captures(line) {
            let number: u32 = caps[1].parse().unwrap_or(next);
            out.push(format!("{}. {}", number, caps[2].trim()));
            next = number + 1;
        } else {
            let text = strip_bullet(line);
            if text.is_empty() {
                continue;
            }
            out.push(format!("{}. {}", next, text));
            next += 1;
        }
    }
    out.join("\n")
}

/// Deck or folder name with the lesson code and copy suffixes removed:
/// `"C3.1.3 Electronic Configuration (1)"` becomes
/// `"Electronic Configuration"`.
pub fn title_from_name(name: &str) -> String {
    let mut title = name.to_string();
    if let Some(code) = LessonCode::find_in(name) {
        let shown = code.to_string();
        if let Some(pos) = title.to_ascii_uppercase().find(&shown) {
            title.replace_range(pos..pos + shown.len(), " ");
        }
    }
    let title = COPY_SUFFIX.replace(&title, "");
    title
        .trim_matches(|c: char| c.is_whitespace() || c == '_' || c == '-')
        .replace('_', " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::ooxml::{Row, Shape, Sheet, Slide, Workbook};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn row(number: u32, cells: &[(usize, &str)]) -> Row {
        Row {
            number,
            cells: cells.iter().map(|(c, t)| (*c, t.to_string())).collect(),
        }
    }

    fn spreadsheet(rows: Vec<Row>) -> SourceDocument {
        let mut headers = BTreeMap::new();
        headers.insert(0, "Lesson code".to_string());
        headers.insert(1, "Title".to_string());
        headers.insert(2, "Objectives".to_string());
        headers.insert(3, "Exit Ticket".to_string());
        let mut locations = BTreeMap::new();
        for (idx, r) in rows.iter().enumerate() {
            if let Ok(code) = r.cell(0).unwrap_or("").parse::<LessonCode>() {
                locations.insert(code, Location::Row { sheet: 0, row: idx });
            }
        }
        let mut layouts = BTreeMap::new();
        layouts.insert(
            0,
            SheetLayout {
                code_column: 0,
                headers,
            },
        );
        SourceDocument {
            path: PathBuf::from("Unit Guidance/B3.xlsx"),
            kind: SourceKind::Spreadsheet,
            content: Content::Workbook {
                workbook: Workbook {
                    sheets: vec![Sheet { rows }],
                },
                layouts,
            },
            locations,
        }
    }

    fn deck(stem: &str, code: &str, slides: Vec<(usize, Vec<&str>)>) -> SourceDocument {
        let slides = slides
            .into_iter()
            .map(|(number, paragraphs)| Slide {
                number,
                shapes: vec![Shape {
                    top: 0,
                    left: 0,
                    paragraphs: paragraphs.iter().map(|p| p.to_string()).collect(),
                }],
            })
            .collect();
        SourceDocument {
            path: PathBuf::from(format!("{}.pptx", stem)),
            kind: SourceKind::Deck,
            content: Content::Deck(Deck { slides }),
            locations: [(code.parse().unwrap(), Location::WholeDocument)].into(),
        }
    }

    fn readnow(stem: &str, code: &str, paragraphs: &[&str]) -> SourceDocument {
        SourceDocument {
            path: PathBuf::from(format!("{}.docx", stem)),
            kind: SourceKind::ReadNow,
            content: Content::Paragraphs(paragraphs.iter().map(|p| p.to_string()).collect()),
            locations: [(code.parse().unwrap(), Location::WholeDocument)].into(),
        }
    }

    fn code(s: &str) -> LessonCode {
        s.parse().unwrap()
    }

    #[test]
    fn spreadsheet_row_without_exit_ticket() {
        let catalog = Catalog::from_documents(vec![
            spreadsheet(vec![row(
                5,
                &[(0, "B3.2.4"), (1, "DNA"), (2, "Describe the structure of DNA")],
            )]),
            deck("B3.3.1 Proteins", "B3.3.1", vec![]),
        ]);
        let rules = ExtractionRules::default();
        let record = Extractor::new(&rules, Attainment::Lpa).extract(&code("B3.2.4"), &catalog);
        assert_eq!(record.objectives, vec!["Describe the structure of DNA"]);
        assert!(record.exit_ticket.is_empty());
        assert_eq!(record.mark_scheme, "");
        assert_eq!(record.title, "DNA");
    }

    #[test]
    fn extraction_is_idempotent() {
        let catalog = Catalog::from_documents(vec![spreadsheet(vec![row(
            5,
            &[(0, "B3.2.4"), (2, "• A\n• B"), (3, "1. What is DNA?\nAnswer: a polymer")],
        )])]);
        let rules = ExtractionRules::default();
        let extractor = Extractor::new(&rules, Attainment::Hpa);
        let first = extractor.extract(&code("B3.2.4"), &catalog);
        let second = extractor.extract(&code("B3.2.4"), &catalog);
        assert_eq!(first, second);
        assert_eq!(first.objectives, vec!["A", "B"]);
        assert_eq!(first.exit_ticket[0].answer, "a polymer");
    }

    #[test]
    fn objectives_follow_header_until_stop_marker() {
        let document = deck(
            "C3.1.3 Electronic Configuration (1)",
            "C3.1.3",
            vec![
                (3, vec!["• Not an objective slide"]),
                (
                    5,
                    vec![
                        "Students will be able to:",
                        "Describe electron shells",
                        "Fix-it: reteach shells",
                        "Draw configurations",
                        "Key words",
                        "shell",
                    ],
                ),
            ],
        );
        let catalog = Catalog::from_documents(vec![document]);
        let rules = ExtractionRules::default();
        let record = Extractor::new(&rules, Attainment::Lpa).extract(&code("C3.1.3"), &catalog);
        assert_eq!(
            record.objectives,
            vec!["Describe electron shells", "Draw configurations"]
        );
        assert_eq!(record.title, "Electronic Configuration");
    }

    #[test]
    fn prefixed_lines_used_without_header() {
        let catalog = Catalog::from_documents(vec![deck(
            "P1.1.2",
            "P1.1.2",
            vec![(8, vec!["• too late"]), (4, vec!["Starter", "• Define speed", "I can use s = d/t"])],
        )]);
        let rules = ExtractionRules::default();
        let record = Extractor::new(&rules, Attainment::Lpa).extract(&code("P1.1.2"), &catalog);
        assert_eq!(record.objectives, vec!["Define speed", "I can use s = d/t"]);
    }

    #[test]
    fn slide_range_is_configurable() {
        let catalog = Catalog::from_documents(vec![deck(
            "P1.1.2",
            "P1.1.2",
            vec![(8, vec!["• Late objective"])],
        )]);
        let mut rules = ExtractionRules::default();
        rules.objective_slides.last = 8;
        let record = Extractor::new(&rules, Attainment::Lpa).extract(&code("P1.1.2"), &catalog);
        assert_eq!(record.objectives, vec!["Late objective"]);
    }

    #[test]
    fn mark_scheme_prefers_matching_attainment() {
        let catalog = Catalog::from_documents(vec![
            readnow(
                "C3.2.9_ReadNow_HPA",
                "C3.2.9",
                &["Passage", "MARK SCHEME", "hpa answer"],
            ),
            readnow(
                "C3.2.9_ReadNow_LPA",
                "C3.2.9",
                &[
                    "Passage text",
                    "Mark Scheme",
                    "• Ionic bonds transfer electrons",
                    "3) Covalent bonds share",
                    "Giant lattice",
                    "EXTENSION QUESTIONS",
                    "ignored",
                ],
            ),
        ]);
        let rules = ExtractionRules::default();
        let record = Extractor::new(&rules, Attainment::Lpa).extract(&code("C3.2.9"), &catalog);
        assert_eq!(
            record.mark_scheme,
            "1. Ionic bonds transfer electrons\n3. Covalent bonds share\n4. Giant lattice"
        );
        assert_eq!(record.sources, vec![PathBuf::from("C3.2.9_ReadNow_LPA.docx")]);
    }

    #[test]
    fn exit_ticket_pairs() {
        let items = parse_exit_ticket(
            "Q1) Name the bond\nin sodium chloride\nA: ionic\n2. State one property\nnan",
        );
        assert_eq!(
            items,
            vec![
                ExitTicketItem {
                    question: "Name the bond in sodium chloride".to_string(),
                    answer: "ionic".to_string(),
                },
                ExitTicketItem {
                    question: "State one property".to_string(),
                    answer: String::new(),
                },
            ]
        );
    }

    #[test]
    fn configured_exit_ticket_range() {
        let mut rules = ExtractionRules::default();
        rules.exit_ticket_columns = Some("E:F".to_string());
        let catalog = Catalog::from_documents(vec![spreadsheet(vec![row(
            5,
            &[(0, "B3.2.4"), (3, "1. ignored"), (4, "1. First"), (5, "2. Second")],
        )])]);
        let record = Extractor::new(&rules, Attainment::Lpa).extract(&code("B3.2.4"), &catalog);
        let questions: Vec<&str> = record.exit_ticket.iter().map(|i| i.question.as_str()).collect();
        assert_eq!(questions, vec!["First", "Second"]);
    }

    #[test]
    fn titles_drop_codes_and_copy_suffixes() {
        assert_eq!(title_from_name("B3.2.4_DNA_structure"), "DNA structure");
        assert_eq!(title_from_name("C4.2.14 Moles (2)"), "Moles");
    }
}
