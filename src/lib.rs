//! # Lesson Forge
//!
//! Batch generator for classroom documents: slide decks, ReadNow reading
//! passages, worksheets, review questions and lesson-plan proformas.
//!
//! Lesson Forge finds a lesson's existing resources (unit guidance
//! spreadsheets, slide decks, earlier ReadNow documents), pulls structured
//! fields out of them, optionally asks a text generation service for the
//! content they lack, and stamps the result into a docx or pptx template.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌───────────┐   ┌──────────┐
//! │ Catalog  │──▶│ Extractor │──▶│ Augmenter │──▶│ Renderer │──▶ output/
//! │ xlsx/pptx│   │  rules    │   │ (optional)│   │ template │
//! └──────────┘   └───────────┘   └───────────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! forge catalog                          # what was found, per lesson
//! forge show C3.2.9                      # extracted fields for one lesson
//! forge template init readnow            # starter docx template
//! forge run readnow --unit C3.2          # generate ReadNows for a unit
//! forge run slides --lesson C3.2.9 --dry-run
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`lesson_code`] | Lesson and unit identifiers |
//! | [`models`] | Core data types |
//! | [`ooxml`] | Reading and rewriting xlsx/pptx/docx packages |
//! | [`catalog`] | Source discovery and lesson index |
//! | [`extract`] | Field extraction rules |
//! | [`generation`] | Text generation providers |
//! | [`augment`] | Prompting and response parsing |
//! | [`render`] | Template filling and atomic writes |
//! | [`pipeline`] | Per-lesson orchestration |
//! | [`progress`] | Progress events on stderr |
//! | [`summary`] | Run summary |
//! | [`sources`], [`show`], [`template`] | `catalog`, `show` and `template init` commands |

pub mod augment;
pub mod catalog;
pub mod config;
pub mod extract;
pub mod generation;
pub mod lesson_code;
pub mod models;
pub mod ooxml;
pub mod pipeline;
pub mod progress;
pub mod render;
pub mod show;
pub mod sources;
pub mod summary;
pub mod template;
