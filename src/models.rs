//! Core data types that flow through the generation pipeline.
//!
//! A [`LessonRecord`] is assembled per lesson from whatever sources the
//! catalog holds, optionally enriched with generated text, and handed to the
//! renderer. A [`GeneratedDocument`] is the only thing that outlives a run.

use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::lesson_code::LessonCode;

/// Coarse ability grouping used to tune generated content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Attainment {
    #[serde(rename = "HPA", alias = "hpa")]
    Hpa,
    #[serde(rename = "LPA", alias = "lpa")]
    Lpa,
}

impl Attainment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Attainment::Hpa => "HPA",
            Attainment::Lpa => "LPA",
        }
    }
}

impl fmt::Display for Attainment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Attainment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HPA" => Ok(Attainment::Hpa),
            "LPA" => Ok(Attainment::Lpa),
            other => Err(format!("unknown attainment '{}': expected HPA or LPA", other)),
        }
    }
}

/// The kinds of document the pipeline can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputKind {
    Slides,
    ReadNow,
    Worksheet,
    Review,
    /// Lesson-plan proforma: misconceptions and a scripted lesson sequence.
    Proforma,
}

impl OutputKind {
    pub const ALL: [OutputKind; 5] = [
        OutputKind::Slides,
        OutputKind::ReadNow,
        OutputKind::Worksheet,
        OutputKind::Review,
        OutputKind::Proforma,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKind::Slides => "slides",
            OutputKind::ReadNow => "readnow",
            OutputKind::Worksheet => "worksheet",
            OutputKind::Review => "review",
            OutputKind::Proforma => "proforma",
        }
    }

    /// Deterministic output file name for a lesson.
    ///
    /// ReadNow names match what the extractor searches for, so generated
    /// ReadNows supply mark schemes to later slide runs.
    pub fn file_name(&self, code: &LessonCode, attainment: Attainment) -> String {
        match self {
            OutputKind::Slides => format!("{}_Slides.pptx", code),
            OutputKind::ReadNow => format!("{}_ReadNow_{}.docx", code, attainment),
            OutputKind::Worksheet => format!("{}_Worksheet_{}.docx", code, attainment),
            OutputKind::Review => format!("{}_Review.docx", code),
            OutputKind::Proforma => format!("{}_Proforma.docx", code),
        }
    }
}

/// Which fields an output kind needs and which it asks the generator for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputProfile {
    /// Fields that render as marked blanks (or skip the lesson) when empty.
    pub required: &'static [Field],
    /// Fields always taken from fresh generated text.
    pub generated: &'static [Field],
    /// Fields generated only when extraction left them empty.
    pub fill_if_missing: &'static [Field],
}

impl OutputProfile {
    /// Fields the augmenter should request for `record`.
    pub fn wanted(&self, record: &LessonRecord) -> Vec<Field> {
        let mut wanted: Vec<Field> = self.generated.to_vec();
        for &field in self.fill_if_missing {
            if record.is_empty(field) && !wanted.contains(&field) {
                wanted.push(field);
            }
        }
        wanted
    }

    pub fn missing(&self, record: &LessonRecord) -> Vec<Field> {
        self.required
            .iter()
            .copied()
            .filter(|f| record.is_empty(*f))
            .collect()
    }
}

impl OutputKind {
    pub fn profile(&self) -> OutputProfile {
        match self {
            OutputKind::Slides => OutputProfile {
                required: &[Field::Title, Field::Objectives, Field::MarkScheme],
                generated: &[],
                fill_if_missing: &[Field::MarkScheme],
            },
            OutputKind::ReadNow => OutputProfile {
                required: &[Field::Title, Field::Passage, Field::Questions, Field::MarkScheme],
                generated: &[Field::Passage, Field::Questions, Field::MarkScheme],
                fill_if_missing: &[],
            },
            OutputKind::Worksheet => OutputProfile {
                required: &[Field::Title, Field::Objectives, Field::Questions],
                generated: &[Field::Questions, Field::MarkScheme],
                fill_if_missing: &[],
            },
            OutputKind::Review => OutputProfile {
                required: &[Field::Title, Field::Questions, Field::MarkScheme],
                generated: &[Field::Questions, Field::MarkScheme],
                fill_if_missing: &[],
            },
            OutputKind::Proforma => OutputProfile {
                required: &[Field::Title, Field::Objectives, Field::Misconceptions, Field::Plan],
                generated: &[Field::Misconceptions, Field::Plan],
                fill_if_missing: &[],
            },
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OutputKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!(
                    "unknown output kind '{}': expected slides, readnow, worksheet, review or proforma",
                    s
                )
            })
    }
}

/// A lesson field that a template can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Title,
    Objectives,
    ExitTicket,
    MarkScheme,
    Passage,
    Questions,
    Misconceptions,
    Plan,
}

impl Field {
    pub fn placeholder(&self) -> &'static str {
        match self {
            Field::Title => "title",
            Field::Objectives => "objectives",
            Field::ExitTicket => "exit_ticket",
            Field::MarkScheme => "mark_scheme",
            Field::Passage => "passage",
            Field::Questions => "questions",
            Field::Misconceptions => "misconceptions",
            Field::Plan => "plan",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Field::Title => "title",
            Field::Objectives => "objectives",
            Field::ExitTicket => "exit ticket",
            Field::MarkScheme => "mark scheme",
            Field::Passage => "passage",
            Field::Questions => "questions",
            Field::Misconceptions => "misconceptions",
            Field::Plan => "lesson plan",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-field conflict resolution when several sources supply a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergePolicy {
    #[default]
    FirstWins,
    LastWins,
}

/// One exit-ticket question with its answer, if the source gave one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExitTicketItem {
    pub question: String,
    pub answer: String,
}

/// The resolved view of one lesson.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonRecord {
    pub code: LessonCode,
    pub title: String,
    pub objectives: Vec<String>,
    pub exit_ticket: Vec<ExitTicketItem>,
    pub mark_scheme: String,
    pub passage: String,
    pub questions: Vec<String>,
    pub misconceptions: String,
    /// Scripted lesson sequence (TKT/TBAT, intro, I do, we do, CfU, you do).
    pub plan: String,
    pub sources: Vec<PathBuf>,
}

impl LessonRecord {
    pub fn new(code: LessonCode) -> Self {
        Self {
            code,
            title: String::new(),
            objectives: Vec::new(),
            exit_ticket: Vec::new(),
            mark_scheme: String::new(),
            passage: String::new(),
            questions: Vec::new(),
            misconceptions: String::new(),
            plan: String::new(),
            sources: Vec::new(),
        }
    }

    pub fn is_empty(&self, field: Field) -> bool {
        match field {
            Field::Title => self.title.trim().is_empty(),
            Field::Objectives => self.objectives.is_empty(),
            Field::ExitTicket => self.exit_ticket.is_empty(),
            Field::MarkScheme => self.mark_scheme.trim().is_empty(),
            Field::Passage => self.passage.trim().is_empty(),
            Field::Questions => self.questions.is_empty(),
            Field::Misconceptions => self.misconceptions.trim().is_empty(),
            Field::Plan => self.plan.trim().is_empty(),
        }
    }

    /// Merges a partial record pulled from one more source.
    ///
    /// With [`MergePolicy::FirstWins`] a populated field is never replaced;
    /// with [`MergePolicy::LastWins`] any non-empty incoming value replaces it.
    pub fn merge_from(&mut self, other: LessonRecord, policy: MergePolicy) {
        let take = |field: Field, own: &LessonRecord| match policy {
            MergePolicy::FirstWins => own.is_empty(field) && !other.is_empty(field),
            MergePolicy::LastWins => !other.is_empty(field),
        };
        let fields = [
            take(Field::Title, self),
            take(Field::Objectives, self),
            take(Field::ExitTicket, self),
            take(Field::MarkScheme, self),
            take(Field::Passage, self),
            take(Field::Questions, self),
            take(Field::Misconceptions, self),
            take(Field::Plan, self),
        ];
        let contributed = fields.iter().any(|t| *t);
        let LessonRecord {
            title,
            objectives,
            exit_ticket,
            mark_scheme,
            passage,
            questions,
            misconceptions,
            plan,
            sources,
            ..
        } = other;
        if fields[0] {
            self.title = title;
        }
        if fields[1] {
            self.objectives = objectives;
        }
        if fields[2] {
            self.exit_ticket = exit_ticket;
        }
        if fields[3] {
            self.mark_scheme = mark_scheme;
        }
        if fields[4] {
            self.passage = passage;
        }
        if fields[5] {
            self.questions = questions;
        }
        if fields[6] {
            self.misconceptions = misconceptions;
        }
        if fields[7] {
            self.plan = plan;
        }
        if contributed {
            for source in sources {
                if !self.sources.contains(&source) {
                    self.sources.push(source);
                }
            }
        }
    }
}

/// A rendered output written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedDocument {
    pub code: LessonCode,
    pub kind: OutputKind,
    pub path: PathBuf,
    /// Required fields that rendered as marked blanks.
    pub blanks: Vec<Field>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(title: &str, mark_scheme: &str, source: &str) -> LessonRecord {
        let mut r = LessonRecord::new("B3.2.4".parse().unwrap());
        r.title = title.to_string();
        r.mark_scheme = mark_scheme.to_string();
        r.sources.push(PathBuf::from(source));
        r
    }

    #[test]
    fn first_wins_fills_only_empty_fields() {
        let mut base = record("DNA", "", "a.xlsx");
        base.merge_from(record("Other title", "1. A", "b.docx"), MergePolicy::FirstWins);
        assert_eq!(base.title, "DNA");
        assert_eq!(base.mark_scheme, "1. A");
        assert_eq!(
            base.sources,
            vec![PathBuf::from("a.xlsx"), PathBuf::from("b.docx")]
        );
    }

    #[test]
    fn last_wins_replaces_populated_fields() {
        let mut base = record("DNA", "", "a.xlsx");
        base.merge_from(record("Other title", "", "b.pptx"), MergePolicy::LastWins);
        assert_eq!(base.title, "Other title");
    }

    #[test]
    fn source_with_nothing_new_is_not_recorded() {
        let mut base = record("DNA", "1. A", "a.xlsx");
        base.merge_from(record("", "", "b.pptx"), MergePolicy::FirstWins);
        assert_eq!(base.sources, vec![PathBuf::from("a.xlsx")]);
    }

    #[test]
    fn slides_request_mark_scheme_only_when_missing() {
        let profile = OutputKind::Slides.profile();
        let with_scheme = record("DNA", "1. A", "a.xlsx");
        assert!(profile.wanted(&with_scheme).is_empty());
        let without = record("DNA", "", "a.xlsx");
        assert_eq!(profile.wanted(&without), vec![Field::MarkScheme]);
        assert_eq!(
            profile.missing(&without),
            vec![Field::Objectives, Field::MarkScheme]
        );
        assert_eq!(
            OutputKind::ReadNow.profile().wanted(&with_scheme),
            vec![Field::Passage, Field::Questions, Field::MarkScheme]
        );
    }

    #[test]
    fn output_names_are_deterministic() {
        let code = "C3.2.9".parse().unwrap();
        assert_eq!(
            OutputKind::ReadNow.file_name(&code, Attainment::Lpa),
            "C3.2.9_ReadNow_LPA.docx"
        );
        assert_eq!(
            OutputKind::Slides.file_name(&code, Attainment::Hpa),
            "C3.2.9_Slides.pptx"
        );
        assert_eq!("READNOW".parse::<OutputKind>(), Ok(OutputKind::ReadNow));
        assert_eq!(
            OutputKind::Proforma.file_name(&code, Attainment::Hpa),
            "C3.2.9_Proforma.docx"
        );
    }

    #[test]
    fn proforma_generates_misconceptions_and_plan() {
        let profile = OutputKind::Proforma.profile();
        let lesson = record("DNA", "1. A", "a.xlsx");
        assert_eq!(
            profile.wanted(&lesson),
            vec![Field::Misconceptions, Field::Plan]
        );
        assert_eq!(
            profile.missing(&lesson),
            vec![Field::Objectives, Field::Misconceptions, Field::Plan]
        );
        assert_eq!("proforma".parse::<OutputKind>(), Ok(OutputKind::Proforma));
    }
}
