//! End-of-run summary.
//!
//! Collects how each lesson ended and prints the report users read after a
//! batch: what was rendered (and with which blanks), what was skipped and
//! why, and whether the run was cut short.

use std::path::PathBuf;

use crate::augment::AugmentOutcome;
use crate::lesson_code::LessonCode;
use crate::models::{Field, OutputKind};
use crate::progress::format_number;

/// Final state of one lesson.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LessonOutcome {
    Rendered {
        code: LessonCode,
        path: PathBuf,
        blanks: Vec<Field>,
        augment: AugmentOutcome,
    },
    Skipped {
        code: LessonCode,
        reason: String,
    },
}

impl LessonOutcome {
    pub fn skipped(code: &LessonCode, reason: &str) -> Self {
        LessonOutcome::Skipped {
            code: code.clone(),
            reason: reason.to_string(),
        }
    }

    pub fn code(&self) -> &LessonCode {
        match self {
            LessonOutcome::Rendered { code, .. } | LessonOutcome::Skipped { code, .. } => code,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub kind: OutputKind,
    pub outcomes: Vec<LessonOutcome>,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn new(kind: OutputKind) -> Self {
        Self {
            kind,
            outcomes: Vec::new(),
            cancelled: false,
        }
    }

    pub fn push(&mut self, outcome: LessonOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn rendered_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, LessonOutcome::Rendered { .. }))
            .count()
    }

    pub fn skipped_count(&self) -> usize {
        self.outcomes.len() - self.rendered_count()
    }

    /// Rendered lessons that carry at least one marked blank.
    pub fn with_blanks_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, LessonOutcome::Rendered { blanks, .. } if !blanks.is_empty()))
            .count()
    }
}

fn augment_note(outcome: &AugmentOutcome) -> String {
    match outcome {
        AugmentOutcome::NotNeeded => String::new(),
        AugmentOutcome::Disabled => "generation disabled".to_string(),
        AugmentOutcome::Filled(fields) if fields.is_empty() => "generated text unusable".to_string(),
        AugmentOutcome::Filled(fields) => format!(
            "generated: {}",
            fields.iter().map(|f| f.label()).collect::<Vec<_>>().join(", ")
        ),
        AugmentOutcome::Failed(reason) => format!("generation failed: {}", reason),
    }
}

/// Renders the summary as the lines printed to stdout.
pub fn format_summary(summary: &RunSummary) -> Vec<String> {
    let mut lines = Vec::new();
    lines.push(format!("run {}", summary.kind));
    lines.push(format!(
        "  rendered: {} ({} with blanks)",
        format_number(summary.rendered_count() as u64),
        format_number(summary.with_blanks_count() as u64)
    ));
    lines.push(format!(
        "  skipped:  {}",
        format_number(summary.skipped_count() as u64)
    ));
    if summary.cancelled {
        lines.push("  cancelled: remaining lessons were not processed".to_string());
    }

    if summary.outcomes.is_empty() {
        return lines;
    }
    lines.push(String::new());
    lines.push(format!("  {:<10} {:<9} {}", "LESSON", "STATUS", "DETAIL"));
    lines.push(format!("  {}", "-".repeat(60)));
    for outcome in &summary.outcomes {
        match outcome {
            LessonOutcome::Rendered {
                code,
                path,
                blanks,
                augment,
            } => {
                lines.push(format!("  {:<10} {:<9} {}", code, "rendered", path.display()));
                if !blanks.is_empty() {
                    let names: Vec<&str> = blanks.iter().map(|f| f.label()).collect();
                    lines.push(format!("  {:<10} {:<9} blanks: {}", "", "", names.join(", ")));
                }
                let note = augment_note(augment);
                if !note.is_empty() {
                    lines.push(format!("  {:<10} {:<9} {}", "", "", note));
                }
            }
            LessonOutcome::Skipped { code, reason } => {
                lines.push(format!("  {:<10} {:<9} {}", code, "skipped", reason));
            }
        }
    }
    lines
}

pub fn print_summary(summary: &RunSummary) {
    for line in format_summary(summary) {
        println!("{}", line);
    }
}
