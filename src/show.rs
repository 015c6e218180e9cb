//! `forge show <code>`: print the extracted record for one lesson.

use anyhow::{Context, Result};

use crate::catalog;
use crate::config::Config;
use crate::extract::Extractor;
use crate::lesson_code::LessonCode;
use crate::models::LessonRecord;

pub fn show_lesson(config: &Config, code: &LessonCode) -> Result<()> {
    let catalog = catalog::scan(&config.catalog, &config.extraction).context("catalog scan failed")?;
    if catalog.find(code).is_empty() {
        println!("{}: no source found", code);
        return Ok(());
    }
    let record = Extractor::new(&config.extraction, config.run.attainment).extract(code, &catalog);
    print_record(&record);
    Ok(())
}

fn print_record(record: &LessonRecord) {
    let or_none = |s: &str| {
        if s.is_empty() {
            "(none)".to_string()
        } else {
            s.to_string()
        }
    };

    println!("Lesson:   {} ({}, unit {})", record.code, record.code.subject_name(), record.code.unit());
    println!("Title:    {}", or_none(&record.title));
    println!();
    println!("Objectives:");
    if record.objectives.is_empty() {
        println!("  (none)");
    }
    for objective in &record.objectives {
        println!("  • {}", objective);
    }
    println!();
    println!("Exit ticket:");
    if record.exit_ticket.is_empty() {
        println!("  (none)");
    }
    for (i, item) in record.exit_ticket.iter().enumerate() {
        println!("  {}. {}", i + 1, item.question);
        if !item.answer.is_empty() {
            println!("     Answer: {}", item.answer);
        }
    }
    println!();
    println!("Mark scheme:");
    for line in or_none(&record.mark_scheme).lines() {
        println!("  {}", line);
    }
    println!();
    println!("Sources:");
    for source in &record.sources {
        println!("  {}", source.display());
    }
}
