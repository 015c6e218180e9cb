//! Optional enrichment of a lesson record with generated text.
//!
//! The augmenter asks the configured [`TextGenerator`] for the fields an
//! output kind needs (see [`OutputProfile`](crate::models::OutputProfile)),
//! then splits the reply into passage, questions and mark scheme (or, for
//! lesson-plan proformas, misconceptions and plan). Any failure leaves the
//! record as it was.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::RunConfig;
use crate::extract::format_mark_scheme;
use crate::generation::{Constraints, Prompt, TextGenerator};
use crate::models::{Attainment, Field, LessonRecord, OutputKind};

static NUMBERED_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:Q\s*)?(\d+)\s*[.)]\s+(.*)$").expect("question pattern is valid"));

const HPA_QUESTIONS: &str = "1. Define a key term (1 mark)
2. Recall a fact (1 mark)
3. Recall another fact (1 mark)
4. Recall another fact (1 mark)
5. Apply knowledge or solve a problem (4 marks)";

const LPA_QUESTIONS: &str = "1. Multiple choice question with exactly 4 options labelled A) B) C) D)
2. Fill-in-the-gap sentence with one missing keyword shown as _____
3. State question
4. Describe question answerable in one sentence
5. Explain question scaffolded with a WHAT: line and a WHY: line
Do not label the question types; write the questions directly.";

const PLAN_PARTS: &str = "TKT: 5-7 \"They know that\" knowledge statements
TBAT: 3-5 \"They'll be able to\" skill statements using action verbs
Intro: introduce, sequence, importance and enthuse (2-3 sentences each)
I do: a think-aloud modelling script with [PAUSE] and [COLD CALL] cues
We do: a guided practice script the class completes with you
Check for understanding: 3-4 hinge questions with the answers to listen for
You do: the independent task and what a completed answer looks like";

/// What happened when a record was offered to the augmenter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AugmentOutcome {
    /// The output kind needed nothing generated for this record.
    NotNeeded,
    /// Fields were wanted but no generator is configured.
    Disabled,
    /// These fields now hold generated text.
    Filled(Vec<Field>),
    /// Generation failed; the record is unchanged.
    Failed(String),
}

/// Generated reply split into its sections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sections {
    pub passage: String,
    pub questions: Vec<String>,
    pub mark_scheme: String,
    pub misconceptions: String,
    pub plan: String,
}

pub struct Augmenter<'a> {
    generator: &'a dyn TextGenerator,
    constraints: Constraints,
}

impl<'a> Augmenter<'a> {
    pub fn new(generator: &'a dyn TextGenerator, constraints: Constraints) -> Self {
        Self {
            generator,
            constraints,
        }
    }

    pub fn augment(&self, record: &mut LessonRecord, run: &RunConfig, kind: OutputKind) -> AugmentOutcome {
        let profile = kind.profile();
        let wanted = profile.wanted(record);
        if wanted.is_empty() {
            return AugmentOutcome::NotNeeded;
        }
        if !self.generator.is_enabled() {
            return AugmentOutcome::Disabled;
        }

        let prompt = build_prompt(record, run, kind);
        tracing::debug!(code = %record.code, provider = self.generator.name(), ?wanted, "requesting generated text");
        let text = match self.generator.generate(&prompt, &self.constraints) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(code = %record.code, provider = self.generator.name(), error = %e, "generation failed; keeping extracted fields");
                return AugmentOutcome::Failed(e.to_string());
            }
        };

        let mut sections = parse_response(&text);
        if wanted == [Field::MarkScheme] && sections.mark_scheme.is_empty() {
            sections.mark_scheme = format_mark_scheme(&non_empty_lines(&text));
        }

        let mut filled = Vec::new();
        for field in wanted {
            let applied = match field {
                Field::Passage if !sections.passage.is_empty() => {
                    record.passage = std::mem::take(&mut sections.passage);
                    true
                }
                Field::Questions if !sections.questions.is_empty() => {
                    record.questions = std::mem::take(&mut sections.questions);
                    true
                }
                Field::MarkScheme if !sections.mark_scheme.is_empty() => {
                    record.mark_scheme = std::mem::take(&mut sections.mark_scheme);
                    true
                }
                Field::Misconceptions if !sections.misconceptions.is_empty() => {
                    record.misconceptions = std::mem::take(&mut sections.misconceptions);
                    true
                }
                Field::Plan if !sections.plan.is_empty() => {
                    record.plan = std::mem::take(&mut sections.plan);
                    true
                }
                _ => false,
            };
            if applied {
                filled.push(field);
            }
        }
        tracing::info!(code = %record.code, fields = ?filled, "augmented");
        AugmentOutcome::Filled(filled)
    }
}

/// Builds the request for `kind` from the record's known fields and the
/// run's audience settings.
pub fn build_prompt(record: &LessonRecord, run: &RunConfig, kind: OutputKind) -> Prompt {
    let subject = record.code.subject_name();
    let system = format!(
        "You are an experienced GCSE {} teacher writing classroom resources for {} {} students.",
        subject, run.student_year, run.attainment
    );

    let mut context = format!("Lesson {}: {}\n", record.code, display_title(record));
    if !record.objectives.is_empty() {
        context.push_str("Learning objectives:\n");
        for objective in &record.objectives {
            context.push_str(&format!("- {}\n", objective));
        }
    }

    let user = match kind {
        OutputKind::Slides => {
            let mut text = context;
            text.push_str("\nExit ticket questions:\n");
            for (i, item) in record.exit_ticket.iter().enumerate() {
                text.push_str(&format!("{}. {}\n", i + 1, item.question));
            }
            text.push_str(
                "\nWrite a concise mark scheme for these questions, one numbered answer per \
                 question (1-2 sentences each).\nFormat: a heading MARK SCHEME, then the numbered answers.\n",
            );
            text
        }
        OutputKind::ReadNow => {
            let mut text = format!(
                "Write for {} GCSE {} students ({}, reading age: {}).\n{}\nRequirements:\n",
                run.attainment, subject, run.student_year, run.reading_age, context
            );
            if run.attainment == Attainment::Lpa {
                text.push_str(&format!("- {}\n", run.language_style));
            } else {
                text.push_str("- Short paragraphs (2-3 sentences each)\n");
            }
            text.push_str(&format!(
                "- {}-{} words\n- Define each technical word on first use\n- Focus only on the first learning objective\n- Do not repeat the lesson title\n\nThen 5 questions (number them 1-5):\n{}\n\nAll answers must be stated in the text. Provide a MARK SCHEME with concise answers.\n",
                run.word_count.min,
                run.word_count.max,
                questions_for(run.attainment)
            ));
            text.push_str("\nFormat: content, then a heading \"Questions\", then a heading \"MARK SCHEME\".\n");
            text
        }
        OutputKind::Worksheet | OutputKind::Review => {
            let (count, purpose) = if kind == OutputKind::Worksheet {
                (10, "an independent practice worksheet")
            } else {
                (5, "a short retrieval review")
            };
            let mut text = format!(
                "Write {} for {} {} students ({}, reading age: {}).\n{}\n",
                purpose, run.student_year, run.attainment, subject, run.reading_age, context
            );
            if run.attainment == Attainment::Lpa {
                text.push_str(&format!("Use {}.\n", run.language_style));
            }
            text.push_str(&format!(
                "Write {} questions (number them 1-{}) that test only these objectives, in this style:\n{}\n",
                count,
                count,
                questions_for(run.attainment)
            ));
            text.push_str("\nFormat: a heading \"Questions\", the numbered questions, then a heading \"MARK SCHEME\" with numbered answers.\n");
            text
        }
        OutputKind::Proforma => {
            let mut text = format!(
                "Plan this lesson for {} {} students (reading age: {}).\n{}\n",
                run.student_year, run.attainment, run.reading_age, context
            );
            text.push_str(
                "List 5-7 common misconceptions students have about this topic. For each give the \
                 misconception, the correct understanding and how to address it in class.\n",
            );
            text.push_str(&format!(
                "\nThen write the lesson plan with these parts, each under its own label:\n{}\n",
                PLAN_PARTS
            ));
            text.push_str("\nFormat: a heading \"MISCONCEPTIONS\" with the numbered list, then a heading \"LESSON PLAN\".\n");
            text
        }
    };

    Prompt { system, user }
}

fn questions_for(attainment: Attainment) -> &'static str {
    match attainment {
        Attainment::Hpa => HPA_QUESTIONS,
        Attainment::Lpa => LPA_QUESTIONS,
    }
}

fn display_title(record: &LessonRecord) -> &str {
    if record.title.is_empty() {
        "(untitled)"
    } else {
        &record.title
    }
}

fn non_empty_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Passage,
    Questions,
    MarkScheme,
    Misconceptions,
    Plan,
}

/// Heading text with markdown decoration (`#`, `*`, `:`) removed, lowercased.
fn heading_key(line: &str) -> String {
    line.trim()
        .trim_matches(|c: char| c == '#' || c == '*' || c == ':' || c.is_whitespace())
        .to_lowercase()
}

/// Splits a reply of the form content, `Questions`, `MARK SCHEME`, or
/// `MISCONCEPTIONS`, `LESSON PLAN`. Inside the plan only a misconceptions
/// heading ends the section, so its own labels are kept verbatim.
pub fn parse_response(text: &str) -> Sections {
    let mut section = Section::Passage;
    let mut passage = Vec::new();
    let mut questions: Vec<String> = Vec::new();
    let mut scheme = Vec::new();
    let mut misconceptions = Vec::new();
    let mut plan = Vec::new();

    for raw in text.lines() {
        let key = heading_key(raw);
        if key == "misconceptions" || key == "common misconceptions" {
            section = Section::Misconceptions;
            continue;
        }
        if key == "lesson plan" {
            section = Section::Plan;
            continue;
        }
        if section == Section::Plan {
            plan.push(raw.trim_end().to_string());
            continue;
        }
        if key == "questions" || key == "question" {
            section = Section::Questions;
            continue;
        }
        if key == "mark scheme" || key == "markscheme" || key == "answers" {
            section = Section::MarkScheme;
            continue;
        }
        let line = raw.trim();
        match section {
            Section::Passage => passage.push(line.replace("**", "*")),
            Section::Questions => {
                if line.is_empty() {
                    continue;
                }
                if let Some(caps) = NUMBERED_ITEM.captures(line) {
                    questions.push(caps[2].trim().to_string());
                } else if let Some(last) = questions.last_mut() {
                    last.push('\n');
                    last.push_str(line);
                } else {
                    questions.push(line.to_string());
                }
            }
            Section::MarkScheme => {
                if !line.is_empty() {
                    scheme.push(line.to_string());
                }
            }
            Section::Misconceptions => misconceptions.push(line.to_string()),
            Section::Plan => {}
        }
    }

    Sections {
        passage: passage.join("\n").trim().to_string(),
        questions,
        mark_scheme: format_mark_scheme(&scheme),
        misconceptions: misconceptions.join("\n").trim().to_string(),
        plan: plan.join("\n").trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WordCountRange;
    use crate::generation::GenerateError;
    use crate::models::ExitTicketItem;

    struct Canned(Result<&'static str, ()>);

    impl TextGenerator for Canned {
        fn name(&self) -> &str {
            "canned"
        }

        fn generate(&self, _prompt: &Prompt, _constraints: &Constraints) -> Result<String, GenerateError> {
            self.0
                .map(str::to_string)
                .map_err(|_| GenerateError::Transport {
                    provider: "canned",
                    message: "timed out".to_string(),
                })
        }
    }

    fn run(attainment: Attainment) -> RunConfig {
        RunConfig {
            target_lesson: None,
            target_unit: None,
            lesson_code_prefix: None,
            student_year: "Year 9".to_string(),
            attainment,
            reading_age: 9,
            word_count: WordCountRange { min: 100, max: 120 },
            language_style: "simple language".to_string(),
        }
    }

    fn constraints() -> Constraints {
        Constraints {
            max_tokens: 500,
            temperature: 0.5,
        }
    }

    fn record() -> LessonRecord {
        let mut r = LessonRecord::new("C3.2.9".parse().unwrap());
        r.title = "Ionic bonding".to_string();
        r.objectives = vec!["Describe ionic bonding".to_string()];
        r.exit_ticket = vec![ExitTicketItem {
            question: "What is an ion?".to_string(),
            answer: String::new(),
        }];
        r
    }

    const REPLY: &str = "An *ion* is a charged particle.\n\nMetals lose electrons.\n\n**Questions**\n1. What is an ion?\n2. Which is a metal?\nA) Na B) Cl\n\nMARK SCHEME:\n1. A charged particle\n- Na";

    #[test]
    fn splits_reply_into_sections() {
        let sections = parse_response(REPLY);
        assert_eq!(
            sections.passage,
            "An *ion* is a charged particle.\n\nMetals lose electrons."
        );
        assert_eq!(
            sections.questions,
            vec!["What is an ion?", "Which is a metal?\nA) Na B) Cl"]
        );
        assert_eq!(sections.mark_scheme, "1. A charged particle\n2. Na");
    }

    #[test]
    fn readnow_fills_generated_fields() {
        let generator = Canned(Ok(REPLY));
        let mut record = record();
        let outcome = Augmenter::new(&generator, constraints()).augment(
            &mut record,
            &run(Attainment::Lpa),
            OutputKind::ReadNow,
        );
        assert_eq!(
            outcome,
            AugmentOutcome::Filled(vec![Field::Passage, Field::Questions, Field::MarkScheme])
        );
        assert_eq!(record.questions.len(), 2);
        assert_eq!(record.title, "Ionic bonding");
    }

    #[test]
    fn failure_leaves_record_unchanged() {
        let generator = Canned(Err(()));
        let mut record = record();
        let before = record.clone();
        let outcome = Augmenter::new(&generator, constraints()).augment(
            &mut record,
            &run(Attainment::Hpa),
            OutputKind::Slides,
        );
        assert!(matches!(outcome, AugmentOutcome::Failed(_)));
        assert_eq!(record, before);
        assert_eq!(record.mark_scheme, "");
    }

    #[test]
    fn slides_with_mark_scheme_need_nothing() {
        let generator = Canned(Ok("unused"));
        let mut record = record();
        record.mark_scheme = "1. A charged particle".to_string();
        let outcome = Augmenter::new(&generator, constraints()).augment(
            &mut record,
            &run(Attainment::Lpa),
            OutputKind::Slides,
        );
        assert_eq!(outcome, AugmentOutcome::NotNeeded);
    }

    #[test]
    fn bare_answer_list_becomes_mark_scheme() {
        let generator = Canned(Ok("A charged particle"));
        let mut record = record();
        Augmenter::new(&generator, constraints()).augment(&mut record, &run(Attainment::Lpa), OutputKind::Slides);
        assert_eq!(record.mark_scheme, "1. A charged particle");
    }

    const PROFORMA_REPLY: &str = "## MISCONCEPTIONS\n1. Ions share electrons.\nReality: electrons transfer.\n\n## LESSON PLAN\nTKT:\n• Metals lose electrons\n\nCheck for understanding\nQuestions:\n1. What charge does Na form?\n\nYou do: draw dot and cross diagrams.";

    #[test]
    fn proforma_reply_fills_misconceptions_and_plan() {
        let generator = Canned(Ok(PROFORMA_REPLY));
        let mut record = record();
        let outcome = Augmenter::new(&generator, constraints()).augment(
            &mut record,
            &run(Attainment::Hpa),
            OutputKind::Proforma,
        );
        assert_eq!(
            outcome,
            AugmentOutcome::Filled(vec![Field::Misconceptions, Field::Plan])
        );
        assert_eq!(
            record.misconceptions,
            "1. Ions share electrons.\nReality: electrons transfer."
        );
        assert!(record.plan.starts_with("TKT:"));
        assert!(record.plan.contains("Questions:\n1. What charge does Na form?"));
        assert!(record.plan.ends_with("draw dot and cross diagrams."));
        assert!(record.questions.is_empty());
        assert!(record.mark_scheme.is_empty());
    }

    #[test]
    fn proforma_prompt_asks_for_both_sections() {
        let prompt = build_prompt(&record(), &run(Attainment::Lpa), OutputKind::Proforma);
        assert!(prompt.user.contains("MISCONCEPTIONS"));
        assert!(prompt.user.contains("LESSON PLAN"));
        assert!(prompt.user.contains("I do:"));
        assert!(prompt.user.contains("Describe ionic bonding"));
    }

    #[test]
    fn prompt_reflects_attainment() {
        let lpa = build_prompt(&record(), &run(Attainment::Lpa), OutputKind::ReadNow);
        assert!(lpa.user.contains("Multiple choice"));
        assert!(lpa.user.contains("100-120 words"));
        assert!(lpa.user.contains("simple language"));
        assert!(lpa.system.contains("Chemistry"));
        let hpa = build_prompt(&record(), &run(Attainment::Hpa), OutputKind::ReadNow);
        assert!(hpa.user.contains("Define a key term"));
        assert!(!hpa.user.contains("simple language"));
    }
}
