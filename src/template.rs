//! Starter templates for the word-processed output kinds.
//!
//! `forge template init <kind>` writes a minimal docx whose paragraphs are
//! the placeholders that kind uses. Teachers then restyle it in Word; the
//! renderer only cares that the `{{placeholder}}` text survives.

use anyhow::{bail, Result};
use std::path::Path;

use quick_xml::escape::escape;

use crate::models::OutputKind;
use crate::ooxml;
use crate::render::write_atomic;

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

/// Paragraph layout of the starter template: `(bold heading, placeholder line)`.
fn layout(kind: OutputKind) -> &'static [(&'static str, &'static str)] {
    match kind {
        OutputKind::ReadNow => &[
            ("Read Now: {{title}}", "{{code}} | {{subject}} | {{year}} {{attainment}}"),
            ("", "{{passage}}"),
            ("Questions", "{{questions}}"),
            ("MARK SCHEME", "{{mark_scheme}}"),
        ],
        OutputKind::Worksheet => &[
            ("{{title}}", "{{code}} | {{year}} {{attainment}} | {{date}}"),
            ("Learning objectives", "{{objectives}}"),
            ("Questions", "{{questions}}"),
            ("MARK SCHEME", "{{mark_scheme}}"),
        ],
        OutputKind::Review => &[
            ("Review: {{title}}", "{{code}} | {{unit}} | {{date}}"),
            ("Questions", "{{questions}}"),
            ("MARK SCHEME", "{{mark_scheme}}"),
        ],
        OutputKind::Proforma => &[
            ("Lesson plan: {{title}}", "{{code}} | {{subject}} | {{year}} {{attainment}} | {{date}}"),
            ("Learning objectives", "{{objectives}}"),
            ("Misconceptions", "{{misconceptions}}"),
            (
                "Do Now",
                "You have 5 minutes to read the Read Now and answer the questions for {{code}}.",
            ),
            ("Lesson sequence", "{{plan}}"),
        ],
        OutputKind::Slides => &[],
    }
}

fn paragraph(text: &str, bold: bool) -> String {
    let props = if bold { "<w:rPr><w:b/></w:rPr>" } else { "" };
    format!(
        r#"<w:p><w:r>{}<w:t xml:space="preserve">{}</w:t></w:r></w:p>"#,
        props,
        escape(text)
    )
}

/// Builds the starter docx for `kind`.
pub fn starter_template(kind: OutputKind) -> Result<Vec<u8>> {
    if kind == OutputKind::Slides {
        bail!("slides templates must be authored in PowerPoint; add {{{{placeholders}}}} to an existing deck");
    }
    let mut body = String::new();
    for (heading, line) in layout(kind) {
        if !heading.is_empty() {
            body.push_str(&paragraph(heading, true));
        }
        body.push_str(&paragraph(line, false));
    }
    let document = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{}<w:sectPr/></w:body></w:document>"#,
        body
    );
    let bytes = ooxml::build_package(&[
        ("[Content_Types].xml", CONTENT_TYPES.to_string()),
        ("_rels/.rels", ROOT_RELS.to_string()),
        ("word/document.xml", document),
    ])?;
    Ok(bytes)
}

/// Writes the starter template for `kind` to `out`.
pub fn init_template(kind: OutputKind, out: &Path) -> Result<()> {
    let bytes = starter_template(kind)?;
    write_atomic(out, &bytes)?;
    println!("Wrote {} template to {}", kind, out.display());
    Ok(())
}
