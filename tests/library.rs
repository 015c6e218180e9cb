//! Drives the library API over OOXML files on disk.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use tempfile::TempDir;

use lesson_forge::catalog;
use lesson_forge::config::Config;
use lesson_forge::extract::Extractor;
use lesson_forge::generation::{Constraints, GenerateError, Prompt, TextGenerator};
use lesson_forge::lesson_code::LessonCode;
use lesson_forge::models::{Field, OutputKind};
use lesson_forge::pipeline::Pipeline;
use lesson_forge::progress::NoProgress;
use lesson_forge::summary::LessonOutcome;

struct Timeout;

impl TextGenerator for Timeout {
    fn name(&self) -> &str {
        "timeout"
    }

    fn generate(&self, _prompt: &Prompt, _constraints: &Constraints) -> Result<String, GenerateError> {
        Err(GenerateError::Transport {
            provider: "timeout",
            message: "operation timed out".to_string(),
        })
    }
}

fn write_package(path: &Path, parts: &[(String, String)]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let file = fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    for (name, content) in parts {
        zip.start_file(name.as_str(), options).unwrap();
        zip.write_all(content.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}

fn write_xlsx(path: &Path, rows: &[&[&str]]) {
    let mut sheet = String::from(
        r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );
    for (i, cells) in rows.iter().enumerate() {
        sheet.push_str(&format!(r#"<row r="{}">"#, i + 1));
        for (col, text) in cells.iter().enumerate() {
            sheet.push_str(&format!(
                r#"<c r="{}{}" t="inlineStr"><is><t>{}</t></is></c>"#,
                (b'A' + col as u8) as char,
                i + 1,
                text
            ));
        }
        sheet.push_str("</row>");
    }
    sheet.push_str("</sheetData></worksheet>");
    write_package(path, &[("xl/worksheets/sheet1.xml".to_string(), sheet)]);
}

fn write_pptx(path: &Path, slides: &[&str]) {
    let parts: Vec<(String, String)> = slides
        .iter()
        .enumerate()
        .map(|(i, text)| {
            (
                format!("ppt/slides/slide{}.xml", i + 1),
                format!(
                    r#"<p:sld xmlns:p="p" xmlns:a="a"><p:cSld><p:spTree><p:sp><p:txBody><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:txBody></p:sp></p:spTree></p:cSld></p:sld>"#,
                    text
                ),
            )
        })
        .collect();
    write_package(path, &parts);
}

fn config(dir: &Path) -> Config {
    let text = format!(
        r#"
[catalog]
root = "{root}"

[run]
student_year = "Year 10"
attainment = "HPA"
reading_age = 12
word_count = {{ min = 150, max = 200 }}

[render]
output_dir = "{out}"

[outputs.slides]
template = "{template}"
"#,
        root = dir.join("resources").display(),
        out = dir.join("out").display(),
        template = dir.join("slides.pptx").display(),
    );
    toml::from_str(&text).unwrap()
}

fn setup() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let resources = tmp.path().join("resources");
    write_xlsx(
        &resources.join("Unit Guidance/Biology/B3 guidance.xlsx"),
        &[
            &["Lesson code", "Title", "Objectives", "Exit ticket"],
            &["B3.2.1", "Cells", "Describe a cell", ""],
            &["B3.2.4", "DNA", "Describe the structure of DNA", ""],
            &["B3.3.1", "Genes", "Define a gene", ""],
        ],
    );
    write_pptx(&resources.join("Biology/B9.9.9 Unrelated.pptx"), &["B9.9.9 Unrelated"]);
    write_pptx(
        &resources.join("Chemistry/C3.2.9 Covalent bonding.pptx"),
        &["C3.2.9", "", "", "• Describe a covalent bond"],
    );
    write_package(
        &tmp.path().join("slides.pptx"),
        &[(
            "ppt/slides/slide1.xml".to_string(),
            r#"<p:sld xmlns:p="p" xmlns:a="a"><p:cSld><p:spTree><p:sp><p:txBody><a:p><a:r><a:t>{{title}}: {{mark_scheme}}</a:t></a:r></a:p></p:txBody></p:sp></p:spTree></p:cSld></p:sld>"#.to_string(),
        )],
    );
    tmp
}

#[test]
fn extracts_spreadsheet_row_with_empty_exit_ticket() {
    let tmp = setup();
    let config = config(tmp.path());
    let catalog = catalog::scan(&config.catalog, &config.extraction).unwrap();

    let code: LessonCode = "B3.2.4".parse().unwrap();
    let record = Extractor::new(&config.extraction, config.run.attainment).extract(&code, &catalog);

    assert_eq!(record.objectives, vec!["Describe the structure of DNA"]);
    assert!(record.exit_ticket.is_empty());
    assert!(record.mark_scheme.is_empty());
    assert_eq!(record.sources.len(), 1);
}

#[test]
fn unit_prefix_is_component_wise() {
    let tmp = setup();
    let config = config(tmp.path());
    let catalog = catalog::scan(&config.catalog, &config.extraction).unwrap();

    let found: Vec<String> = catalog
        .find_by_unit_prefix("B3.2")
        .iter()
        .map(|c| c.to_string())
        .collect();
    assert_eq!(found, vec!["B3.2.1", "B3.2.4"]);
}

#[test]
fn generation_timeout_still_renders() {
    let tmp = setup();
    let mut config = config(tmp.path());
    config.run.target_lesson = Some("C3.2.9".parse().unwrap());
    let catalog = catalog::scan(&config.catalog, &config.extraction).unwrap();
    let run = config.run.clone();

    let pipeline = Pipeline::new(&config, &run, &catalog, &Timeout, &NoProgress);
    let summary = pipeline.run(OutputKind::Slides, &AtomicBool::new(false));

    assert_eq!(summary.outcomes.len(), 1);
    match &summary.outcomes[0] {
        LessonOutcome::Rendered { path, blanks, .. } => {
            assert!(path.ends_with("C3.2.9_Slides.pptx"));
            assert!(path.exists());
            assert!(blanks.contains(&Field::MarkScheme));
        }
        other => panic!("expected a rendered lesson, got {:?}", other),
    }
}
