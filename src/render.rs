//! Template rendering and atomic output writes.
//!
//! A template is any docx or pptx package containing `{{placeholder}}`
//! markers. [`Renderer::render`] fills them from a [`LessonRecord`] and
//! writes the package next to its destination through a temporary file,
//! renaming it into place only once it is complete.

use chrono::Local;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::{MissingFieldPolicy, RunConfig};
use crate::models::{Field, GeneratedDocument, LessonRecord, OutputKind};
use crate::ooxml::{self, OoxmlError};

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("template not found: {0}")]
    TemplateMissing(PathBuf),
    #[error("cannot read template {path}: {source}")]
    TemplateUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid template {path}: {source}")]
    TemplateInvalid { path: PathBuf, source: OoxmlError },
    #[error("cannot write {path}: {source}")]
    Output {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Result of rendering one lesson.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    Written(GeneratedDocument),
    /// Required fields were empty and the policy is to skip.
    Skipped { missing: Vec<Field> },
}

/// Text substituted for an empty required field.
pub fn blank_marker(field: Field) -> String {
    format!("[no {} available]", field.label())
}

pub struct Renderer<'a> {
    run: &'a RunConfig,
    on_missing: MissingFieldPolicy,
    date: String,
}

impl<'a> Renderer<'a> {
    pub fn new(run: &'a RunConfig, on_missing: MissingFieldPolicy) -> Self {
        Self {
            run,
            on_missing,
            date: Local::now().format("%-d %B %Y").to_string(),
        }
    }

    pub fn render(
        &self,
        record: &LessonRecord,
        kind: OutputKind,
        template: &Path,
        output_path: &Path,
    ) -> Result<Rendered, RenderError> {
        let missing = kind.profile().missing(record);
        if !missing.is_empty() && self.on_missing == MissingFieldPolicy::Skip {
            return Ok(Rendered::Skipped { missing });
        }

        let bytes = read_template(template)?;
        let values = self.values(record, &missing);
        let rendered =
            ooxml::replace_placeholders(&bytes, &values).map_err(|source| RenderError::TemplateInvalid {
                path: template.to_path_buf(),
                source,
            })?;

        write_atomic(output_path, &rendered)?;
        tracing::debug!(code = %record.code, path = %output_path.display(), bytes = rendered.len(), "wrote output");

        Ok(Rendered::Written(GeneratedDocument {
            code: record.code.clone(),
            kind,
            path: output_path.to_path_buf(),
            blanks: missing,
        }))
    }

    /// Placeholder values for a record. Fields listed in `blanks` get the
    /// blank marker; other empty fields render as empty text.
    pub fn values(&self, record: &LessonRecord, blanks: &[Field]) -> HashMap<String, String> {
        let mut values = HashMap::new();
        values.insert("code".to_string(), record.code.to_string());
        values.insert("unit".to_string(), record.code.unit().to_string());
        values.insert("subject".to_string(), record.code.subject_name().to_string());
        values.insert("year".to_string(), self.run.student_year.clone());
        values.insert("attainment".to_string(), self.run.attainment.to_string());
        values.insert("date".to_string(), self.date.clone());

        let fields = [
            (Field::Title, record.title.clone()),
            (
                Field::Objectives,
                record
                    .objectives
                    .iter()
                    .map(|o| format!("• {}", o))
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            (Field::ExitTicket, exit_ticket_text(record)),
            (Field::MarkScheme, record.mark_scheme.clone()),
            (Field::Passage, record.passage.clone()),
            (Field::Questions, numbered(&record.questions)),
            (Field::Misconceptions, record.misconceptions.clone()),
            (Field::Plan, record.plan.clone()),
        ];
        for (field, text) in fields {
            let text = if blanks.contains(&field) {
                blank_marker(field)
            } else {
                text
            };
            values.insert(field.placeholder().to_string(), text);
        }
        values
    }
}

fn read_template(template: &Path) -> Result<Vec<u8>, RenderError> {
    if !template.is_file() {
        return Err(RenderError::TemplateMissing(template.to_path_buf()));
    }
    std::fs::read(template).map_err(|source| RenderError::TemplateUnreadable {
        path: template.to_path_buf(),
        source,
    })
}

/// Required fields of `kind` that `template` never references, so their
/// values (or blank markers) would be silently dropped.
pub fn unreferenced_fields(kind: OutputKind, template: &Path) -> Result<Vec<Field>, RenderError> {
    let bytes = read_template(template)?;
    let names = ooxml::placeholders(&bytes).map_err(|source| RenderError::TemplateInvalid {
        path: template.to_path_buf(),
        source,
    })?;
    Ok(kind
        .profile()
        .required
        .iter()
        .copied()
        .filter(|f| !names.iter().any(|n| n == f.placeholder()))
        .collect())
}

fn numbered(items: &[String]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + 1, item))
        .collect::<Vec<_>>()
        .join("\n")
}

fn exit_ticket_text(record: &LessonRecord) -> String {
    let mut lines = Vec::new();
    for (i, item) in record.exit_ticket.iter().enumerate() {
        lines.push(format!("{}. {}", i + 1, item.question));
        if !item.answer.is_empty() {
            lines.push(format!("Answer: {}", item.answer));
        }
    }
    lines.join("\n")
}

/// Writes `bytes` to a temporary file in the destination directory and
/// renames it over `path`. An existing file is replaced.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), RenderError> {
    let output_err = |source: std::io::Error| RenderError::Output {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(output_err)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(output_err)?;
    tmp.write_all(bytes).map_err(output_err)?;
    tmp.as_file().sync_all().map_err(output_err)?;
    tmp.persist(path).map_err(|e| output_err(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WordCountRange;
    use crate::models::{Attainment, ExitTicketItem};
    use tempfile::TempDir;

    fn run() -> RunConfig {
        RunConfig {
            target_lesson: None,
            target_unit: None,
            lesson_code_prefix: None,
            student_year: "Year 10".to_string(),
            attainment: Attainment::Hpa,
            reading_age: 12,
            word_count: WordCountRange { min: 150, max: 200 },
            language_style: String::new(),
        }
    }

    fn template(dir: &Path, body: &str) -> PathBuf {
        let paragraphs: String = body
            .lines()
            .map(|l| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", l))
            .collect();
        let xml = format!(
            r#"<?xml version="1.0"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{}</w:body></w:document>"#,
            paragraphs
        );
        let path = dir.join("template.docx");
        std::fs::write(&path, ooxml::build_package(&[("word/document.xml", xml)]).unwrap()).unwrap();
        path
    }

    fn record() -> LessonRecord {
        let mut r = LessonRecord::new("B3.2.4".parse().unwrap());
        r.title = "DNA & RNA <structure>".to_string();
        r.objectives = vec!["Describe the structure of DNA".to_string()];
        r.exit_ticket = vec![ExitTicketItem {
            question: "What is a nucleotide?".to_string(),
            answer: "A monomer".to_string(),
        }];
        r
    }

    #[test]
    fn renders_fields_verbatim() {
        let dir = TempDir::new().unwrap();
        let template = template(
            dir.path(),
            "{{code}} {{title}}\n{{objectives}}\n{{exit_ticket}}\n{{subject}} {{year}}",
        );
        let out = dir.path().join("out").join("B3.2.4_Slides.pptx");
        let run = run();
        let renderer = Renderer::new(&run, MissingFieldPolicy::Mark);
        let rendered = renderer
            .render(&record(), OutputKind::Slides, &template, &out)
            .unwrap();
        let Rendered::Written(doc) = rendered else {
            panic!("expected a written document");
        };
        assert_eq!(doc.blanks, vec![Field::MarkScheme]);
        let paragraphs = ooxml::read_paragraphs(&std::fs::read(&out).unwrap()).unwrap();
        assert_eq!(
            paragraphs,
            vec![
                "B3.2.4 DNA & RNA <structure>",
                "• Describe the structure of DNA",
                "1. What is a nucleotide?",
                "Answer: A monomer",
                "Biology Year 10",
            ]
        );
    }

    #[test]
    fn empty_record_renders_marked_blanks() {
        let dir = TempDir::new().unwrap();
        let template = template(dir.path(), "{{title}}\n{{mark_scheme}}\n{{passage}}");
        let out = dir.path().join("slides.pptx");
        let record = LessonRecord::new("C1.1.1".parse().unwrap());
        Renderer::new(&run(), MissingFieldPolicy::Mark)
            .render(&record, OutputKind::Slides, &template, &out)
            .unwrap();
        let paragraphs = ooxml::read_paragraphs(&std::fs::read(&out).unwrap()).unwrap();
        assert_eq!(
            paragraphs,
            vec!["[no title available]", "[no mark scheme available]", ""]
        );
    }

    #[test]
    fn skip_policy_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let template = template(dir.path(), "{{title}}");
        let out = dir.path().join("skipped.docx");
        let rendered = Renderer::new(&run(), MissingFieldPolicy::Skip)
            .render(&record(), OutputKind::Review, &template, &out)
            .unwrap();
        assert_eq!(
            rendered,
            Rendered::Skipped {
                missing: vec![Field::Questions, Field::MarkScheme]
            }
        );
        assert!(!out.exists());
    }

    #[test]
    fn missing_template_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = Renderer::new(&run(), MissingFieldPolicy::Mark)
            .render(
                &record(),
                OutputKind::ReadNow,
                &dir.path().join("nope.docx"),
                &dir.path().join("out.docx"),
            )
            .unwrap_err();
        assert!(matches!(err, RenderError::TemplateMissing(_)));
    }

    #[test]
    fn reports_required_fields_the_template_never_mentions() {
        let dir = TempDir::new().unwrap();
        let template = template(dir.path(), "{{title}}\n{{questions}}\n{{date}}");
        assert_eq!(
            unreferenced_fields(OutputKind::Review, &template).unwrap(),
            vec![Field::MarkScheme]
        );
        assert!(unreferenced_fields(OutputKind::Review, &dir.path().join("nope.docx")).is_err());
    }

    #[test]
    fn atomic_write_replaces_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file.docx");
        std::fs::write(&path, b"old").unwrap();
        write_atomic(&path, b"new").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"new");
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}
