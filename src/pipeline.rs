//! Generation pipeline orchestration.
//!
//! Drives every lesson in scope through
//! `Discovered → Extracted → (Augmented) → Rendered | Skipped`, one lesson
//! at a time in [`LessonCode`] order. A failure inside a lesson never
//! escapes it: the lesson is recorded as skipped and the run moves on.
//! Cancellation is checked between lessons only, so every lesson is either
//! fully written or not written at all.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::augment::{AugmentOutcome, Augmenter};
use crate::catalog::{self, Catalog};
use crate::config::{Config, RunConfig};
use crate::extract::Extractor;
use crate::generation::{self, Constraints, DisabledGenerator, TextGenerator};
use crate::lesson_code::LessonCode;
use crate::models::OutputKind;
use crate::progress::{NoProgress, ProgressMode, RunProgressEvent, RunProgressReporter};
use crate::render::{self, Rendered, Renderer};
use crate::summary::{self, LessonOutcome, RunSummary};

/// Per-lesson state, as reported in progress events and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LessonState {
    Discovered,
    Extracted,
    Augmented,
    Rendered,
    Skipped,
}

impl LessonState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LessonState::Discovered => "discovered",
            LessonState::Extracted => "extracted",
            LessonState::Augmented => "augmented",
            LessonState::Rendered => "rendered",
            LessonState::Skipped => "skipped",
        }
    }
}

pub struct Pipeline<'a> {
    config: &'a Config,
    run: &'a RunConfig,
    catalog: &'a Catalog,
    generator: &'a dyn TextGenerator,
    progress: &'a dyn RunProgressReporter,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a Config,
        run: &'a RunConfig,
        catalog: &'a Catalog,
        generator: &'a dyn TextGenerator,
        progress: &'a dyn RunProgressReporter,
    ) -> Self {
        Self {
            config,
            run,
            catalog,
            generator,
            progress,
        }
    }

    /// Lessons this run will process, sorted.
    ///
    /// A target lesson is processed even when the catalog has no source for
    /// it, so it shows up as skipped rather than silently vanishing.
    pub fn scope(&self) -> Vec<LessonCode> {
        if let Some(target) = &self.run.target_lesson {
            return vec![target.clone()];
        }
        self.catalog
            .lessons()
            .into_iter()
            .filter(|code| self.run.in_scope(code))
            .collect()
    }

    pub fn output_path(&self, code: &LessonCode, kind: OutputKind) -> PathBuf {
        self.config
            .render
            .output_dir
            .join(kind.file_name(code, self.run.attainment))
    }

    pub fn run(&self, kind: OutputKind, cancel: &AtomicBool) -> RunSummary {
        let scope = self.scope();
        let total = scope.len() as u64;
        let mut summary = RunSummary::new(kind);
        self.progress.report(RunProgressEvent::Scoped {
            kind: kind.to_string(),
            total,
        });
        tracing::info!(kind = %kind, lessons = total, "run started");
        self.check_template(kind);

        for (i, code) in scope.iter().enumerate() {
            if cancel.load(Ordering::SeqCst) {
                tracing::warn!(remaining = scope.len() - i, "run cancelled");
                summary.cancelled = true;
                break;
            }
            let n = i as u64 + 1;
            let report = |state: LessonState| {
                self.progress.report(RunProgressEvent::Lesson {
                    code: code.to_string(),
                    state: state.as_str(),
                    n,
                    total,
                })
            };
            report(LessonState::Discovered);
            let outcome = self.process(code, kind, &report);
            let state = match &outcome {
                LessonOutcome::Rendered { .. } => LessonState::Rendered,
                LessonOutcome::Skipped { .. } => LessonState::Skipped,
            };
            report(state);
            summary.push(outcome);
        }

        tracing::info!(
            rendered = summary.rendered_count(),
            skipped = summary.skipped_count(),
            cancelled = summary.cancelled,
            "run finished"
        );
        summary
    }

    /// Warns once per run about required fields the template has no
    /// placeholder for. Unusable templates are reported per lesson instead.
    fn check_template(&self, kind: OutputKind) {
        let Some(template) = self.config.template_for(kind) else {
            return;
        };
        match render::unreferenced_fields(kind, template) {
            Ok(fields) => {
                for field in fields {
                    tracing::warn!(
                        kind = %kind,
                        template = %template.display(),
                        placeholder = field.placeholder(),
                        "template has no placeholder for a required field"
                    );
                }
            }
            Err(e) => tracing::debug!(kind = %kind, error = %e, "template not checked"),
        }
    }

    fn process(&self, code: &LessonCode, kind: OutputKind, report: &dyn Fn(LessonState)) -> LessonOutcome {
        if self.catalog.find(code).is_empty() {
            tracing::warn!(code = %code, "no source found; skipping");
            return LessonOutcome::skipped(code, "no source found");
        }

        let mut record = Extractor::new(&self.config.extraction, self.run.attainment).extract(code, self.catalog);
        report(LessonState::Extracted);
        tracing::info!(code = %code, sources = record.sources.len(), "extracted");

        let augmenter = Augmenter::new(self.generator, Constraints::from_config(&self.config.generation));
        let augmented = augmenter.augment(&mut record, self.run, kind);
        if matches!(augmented, AugmentOutcome::Filled(_)) {
            report(LessonState::Augmented);
        }

        let Some(template) = self.config.template_for(kind) else {
            tracing::warn!(code = %code, kind = %kind, "no template configured; skipping");
            return LessonOutcome::skipped(code, &format!("no template configured for {}", kind));
        };

        let output = self.output_path(code, kind);
        let renderer = Renderer::new(self.run, self.config.render.on_missing);
        match renderer.render(&record, kind, template, &output) {
            Ok(Rendered::Written(document)) => {
                if document.blanks.is_empty() {
                    tracing::info!(code = %code, path = %document.path.display(), "rendered");
                } else {
                    tracing::info!(code = %code, path = %document.path.display(), blanks = ?document.blanks, "rendered with blanks");
                }
                LessonOutcome::Rendered {
                    code: code.clone(),
                    path: document.path,
                    blanks: document.blanks,
                    augment: augmented,
                }
            }
            Ok(Rendered::Skipped { missing }) => {
                let names: Vec<&str> = missing.iter().map(|f| f.label()).collect();
                tracing::warn!(code = %code, missing = ?names, "required fields empty; skipping");
                LessonOutcome::skipped(code, &format!("missing fields: {}", names.join(", ")))
            }
            Err(e) => {
                tracing::warn!(code = %code, error = %e, "render failed; skipping");
                LessonOutcome::skipped(code, &e.to_string())
            }
        }
    }
}

/// Options for one `forge run` invocation beyond the RunConfig.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub kind: OutputKind,
    pub dry_run: bool,
    pub progress: ProgressMode,
}

/// Runs the pipeline for `kind` and prints the summary.
///
/// Returns an error only for run-level failures: an unusable catalog root or
/// a generator that cannot be constructed. Per-lesson failures end up in the
/// returned summary.
pub fn run_generate(config: &Config, options: RunOptions, cancel: &AtomicBool) -> Result<RunSummary> {
    let run = config.run.clone();
    let catalog = catalog::scan(&config.catalog, &config.extraction).context("catalog scan failed")?;

    if options.dry_run {
        // No generator is built, so a dry run needs no API key.
        let pipeline = Pipeline::new(config, &run, &catalog, &DisabledGenerator, &NoProgress);
        let scope = pipeline.scope();
        println!("run {} (dry-run)", options.kind);
        println!("  lessons in scope: {}", scope.len());
        for code in &scope {
            let sources = catalog.find(code);
            println!(
                "  {:<10} -> {}",
                code,
                pipeline.output_path(code, options.kind).display()
            );
            if sources.is_empty() {
                println!("      (no source found)");
            }
            for source in sources {
                println!("      {} {}", source.kind.as_str(), source.path.display());
            }
        }
        return Ok(RunSummary::new(options.kind));
    }

    let generator =
        generation::create_generator(&config.generation).context("cannot set up text generation")?;
    let reporter = options.progress.reporter();
    let pipeline = Pipeline::new(config, &run, &catalog, generator.as_ref(), reporter.as_ref());
    let summary = pipeline.run(options.kind, cancel);
    summary::print_summary(&summary);
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Content, Location, SourceDocument, SourceKind};
    use crate::generation::{GenerateError, Prompt};
    use crate::models::Attainment;
    use crate::ooxml::{Deck, Shape, Slide};
    use crate::progress::NoProgress;
    use std::collections::HashMap;
    use std::path::Path;
    use tempfile::TempDir;

    struct Outage;

    impl TextGenerator for Outage {
        fn name(&self) -> &str {
            "outage"
        }

        fn generate(&self, _prompt: &Prompt, _constraints: &Constraints) -> Result<String, GenerateError> {
            Err(GenerateError::Transport {
                provider: "outage",
                message: "operation timed out".to_string(),
            })
        }
    }

    fn config(dir: &Path) -> Config {
        let text = format!(
            r#"
[catalog]
root = "{root}"

[run]
student_year = "Year 9"
attainment = "LPA"
reading_age = 9
word_count = {{ min = 100, max = 120 }}

[render]
output_dir = "{out}"

[outputs.slides]
template = "{template}"
"#,
            root = dir.display(),
            out = dir.join("out").display(),
            template = dir.join("slides.pptx").display(),
        );
        toml::from_str(&text).unwrap()
    }

    fn write_slides_template(dir: &Path) {
        let slide = r#"<p:sld xmlns:p="p" xmlns:a="a"><p:cSld><p:spTree><p:sp><p:txBody><a:p><a:r><a:t>{{code}} {{title}}</a:t></a:r></a:p><a:p><a:r><a:t>{{mark_scheme}}</a:t></a:r></a:p></p:txBody></p:sp></p:spTree></p:cSld></p:sld>"#;
        let bytes = crate::ooxml::build_package(&[("ppt/slides/slide1.xml", slide.to_string())]).unwrap();
        std::fs::write(dir.join("slides.pptx"), bytes).unwrap();
    }

    fn deck(code: &str, title: &str) -> SourceDocument {
        SourceDocument {
            path: PathBuf::from(format!("{} {}.pptx", code, title)),
            kind: SourceKind::Deck,
            content: Content::Deck(Deck {
                slides: vec![Slide {
                    number: 4,
                    shapes: vec![Shape {
                        top: 0,
                        left: 0,
                        paragraphs: vec!["• Describe ionic bonding".to_string()],
                    }],
                }],
            }),
            locations: [(code.parse().unwrap(), Location::WholeDocument)].into(),
        }
    }

    #[test]
    fn outage_renders_with_blanks_and_completes() {
        let dir = TempDir::new().unwrap();
        write_slides_template(dir.path());
        let config = config(dir.path());
        let catalog = Catalog::from_documents(vec![deck("C3.2.9", "Ionic bonding"), deck("C3.2.10", "Covalent")]);
        let cancel = AtomicBool::new(false);
        let summary = Pipeline::new(&config, &config.run, &catalog, &Outage, &NoProgress)
            .run(OutputKind::Slides, &cancel);

        assert_eq!(summary.rendered_count(), 2);
        assert_eq!(summary.skipped_count(), 0);
        let LessonOutcome::Rendered { code, blanks, augment, path } = &summary.outcomes[0] else {
            panic!("expected rendered lesson");
        };
        assert_eq!(code.to_string(), "C3.2.9");
        assert_eq!(blanks, &vec![crate::models::Field::MarkScheme]);
        assert!(matches!(augment, AugmentOutcome::Failed(_)));
        assert!(path.ends_with("C3.2.9_Slides.pptx"));
        assert!(path.exists());
    }

    #[test]
    fn target_without_source_is_skipped() {
        let dir = TempDir::new().unwrap();
        write_slides_template(dir.path());
        let mut config = config(dir.path());
        config.run.target_lesson = Some("B3.2.4".parse().unwrap());
        let catalog = Catalog::from_documents(vec![deck("C3.2.9", "Ionic bonding")]);
        let summary = Pipeline::new(&config, &config.run, &catalog, &generation::DisabledGenerator, &NoProgress)
            .run(OutputKind::Slides, &AtomicBool::new(false));
        assert_eq!(summary.rendered_count(), 0);
        assert_eq!(
            summary.outcomes,
            vec![LessonOutcome::skipped(&"B3.2.4".parse().unwrap(), "no source found")]
        );
    }

    #[test]
    fn missing_template_skips_and_continues() {
        let dir = TempDir::new().unwrap();
        let mut config = config(dir.path());
        config.outputs = HashMap::new();
        let catalog = Catalog::from_documents(vec![deck("C3.2.9", "Ionic bonding")]);
        let summary = Pipeline::new(&config, &config.run, &catalog, &generation::DisabledGenerator, &NoProgress)
            .run(OutputKind::Slides, &AtomicBool::new(false));
        assert_eq!(summary.skipped_count(), 1);
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn cancelled_run_stops_before_next_lesson() {
        let dir = TempDir::new().unwrap();
        write_slides_template(dir.path());
        let config = config(dir.path());
        let catalog = Catalog::from_documents(vec![deck("C3.2.9", "Ionic bonding")]);
        let summary = Pipeline::new(&config, &config.run, &catalog, &generation::DisabledGenerator, &NoProgress)
            .run(OutputKind::Slides, &AtomicBool::new(true));
        assert!(summary.cancelled);
        assert!(summary.outcomes.is_empty());
    }

    #[test]
    fn scope_applies_unit_filter() {
        let dir = TempDir::new().unwrap();
        let mut config = config(dir.path());
        config.run.target_unit = Some("C3.2".to_string());
        config.run.attainment = Attainment::Hpa;
        let catalog = Catalog::from_documents(vec![
            deck("C3.2.10", "b"),
            deck("C3.2.9", "a"),
            deck("C3.3.1", "c"),
        ]);
        let pipeline = Pipeline::new(&config, &config.run, &catalog, &generation::DisabledGenerator, &NoProgress);
        let scope: Vec<String> = pipeline.scope().iter().map(|c| c.to_string()).collect();
        assert_eq!(scope, vec!["C3.2.9", "C3.2.10"]);
    }
}
