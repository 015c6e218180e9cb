//! # Lesson Forge CLI (`forge`)
//!
//! ## Usage
//!
//! ```bash
//! forge --config ./config/forge.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `forge run <kind>` | Generate one document per lesson in scope (`slides`, `readnow`, `worksheet`, `review`) |
//! | `forge catalog` | List indexed lessons and excluded files |
//! | `forge show <code>` | Print the extracted fields for one lesson |
//! | `forge template init <kind>` | Write a starter docx template |
//!
//! ## Examples
//!
//! ```bash
//! # ReadNows for every lesson in unit C3.2, LPA, reading age 9
//! forge run readnow --unit C3.2 --attainment LPA --reading-age 9
//!
//! # One slide deck, without writing anything
//! forge run slides --lesson C3.2.9 --dry-run
//! ```
//!
//! Exit code is 0 whenever the batch completes, even if lessons were
//! skipped. Only configuration errors and an unusable catalog root fail.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use lesson_forge::config::{self, Config};
use lesson_forge::lesson_code::LessonCode;
use lesson_forge::models::{Attainment, OutputKind};
use lesson_forge::pipeline::{self, RunOptions};
use lesson_forge::progress::ProgressMode;
use lesson_forge::{show, sources, template};

/// Lesson Forge: generate slides, ReadNows, worksheets and reviews from
/// lesson resources.
///
/// All commands except `template init` read a TOML configuration file.
/// See `config/forge.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "forge",
    about = "Lesson Forge: generate classroom documents from lesson resources",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/forge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate one document per lesson in scope.
    ///
    /// Flags override the `[run]` table of the configuration for this
    /// invocation only.
    Run {
        /// Output kind: `slides`, `readnow`, `worksheet`, `review` or `proforma`.
        kind: OutputKind,

        /// Process only this lesson (e.g. `C3.2.9`). Overrides unit and prefix filters.
        #[arg(long)]
        lesson: Option<LessonCode>,

        /// Restrict to a unit (e.g. `C3.2`).
        #[arg(long)]
        unit: Option<String>,

        /// Restrict to lesson codes starting with this prefix (e.g. `C3.`).
        #[arg(long)]
        prefix: Option<String>,

        /// Year group shown in documents and prompts (e.g. `Year 9`).
        #[arg(long)]
        year: Option<String>,

        /// Attainment band: `HPA` or `LPA`.
        #[arg(long)]
        attainment: Option<Attainment>,

        /// Target reading age for generated text.
        #[arg(long)]
        reading_age: Option<u32>,

        /// List lessons in scope and their sources without generating anything.
        #[arg(long)]
        dry_run: bool,

        /// Progress on stderr. Defaults to `human` on a terminal, otherwise `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Scan the lesson resources and list what was indexed.
    Catalog {
        /// Only list lessons under this unit prefix (e.g. `B3.2`).
        #[arg(long)]
        unit: Option<String>,
    },

    /// Print the fields extracted for one lesson.
    Show {
        /// Lesson code (e.g. `B3.2.4`).
        code: LessonCode,
    },

    /// Manage templates.
    Template {
        #[command(subcommand)]
        action: TemplateAction,
    },
}

#[derive(Subcommand)]
enum TemplateAction {
    /// Write a starter docx template containing the placeholders for a kind.
    Init {
        /// Output kind: `readnow`, `worksheet`, `review` or `proforma`.
        kind: OutputKind,

        /// Destination path. Defaults to `templates/<kind>.docx`.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

/// CLI overrides for the `[run]` table.
struct RunOverrides {
    lesson: Option<LessonCode>,
    unit: Option<String>,
    prefix: Option<String>,
    year: Option<String>,
    attainment: Option<Attainment>,
    reading_age: Option<u32>,
}

fn apply_overrides(cfg: &mut Config, overrides: RunOverrides) -> Result<()> {
    let run = &mut cfg.run;
    if let Some(lesson) = overrides.lesson {
        run.target_lesson = Some(lesson);
    }
    if let Some(unit) = overrides.unit {
        run.target_unit = Some(unit);
    }
    if let Some(prefix) = overrides.prefix {
        run.lesson_code_prefix = Some(prefix);
    }
    if let Some(year) = overrides.year {
        run.student_year = year;
    }
    if let Some(attainment) = overrides.attainment {
        run.attainment = attainment;
    }
    if let Some(age) = overrides.reading_age {
        if age == 0 {
            bail!("--reading-age must be > 0");
        }
        run.reading_age = age;
    }
    Ok(())
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lesson_forge=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Template {
        action: TemplateAction::Init { kind, out },
    } = &cli.command
    {
        let out = out
            .clone()
            .unwrap_or_else(|| PathBuf::from("templates").join(format!("{}.docx", kind)));
        template::init_template(*kind, &out)?;
        return Ok(());
    }

    let mut cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Run {
            kind,
            lesson,
            unit,
            prefix,
            year,
            attainment,
            reading_age,
            dry_run,
            progress,
        } => {
            apply_overrides(
                &mut cfg,
                RunOverrides {
                    lesson,
                    unit,
                    prefix,
                    year,
                    attainment,
                    reading_age,
                },
            )?;
            let options = RunOptions {
                kind,
                dry_run,
                progress: progress.unwrap_or_else(ProgressMode::default_for_tty),
            };

            let cancel = Arc::new(AtomicBool::new(false));
            let flag = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt received; stopping after the current lesson (press Ctrl-C again to abort)");
                    flag.store(true, Ordering::SeqCst);
                    if tokio::signal::ctrl_c().await.is_ok() {
                        std::process::exit(130);
                    }
                }
            });

            tokio::task::spawn_blocking(move || pipeline::run_generate(&cfg, options, &cancel)).await??;
        }
        Commands::Catalog { unit } => {
            sources::list_catalog(&cfg, unit.as_deref())?;
        }
        Commands::Show { code } => {
            show::show_lesson(&cfg, &code)?;
        }
        Commands::Template { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
