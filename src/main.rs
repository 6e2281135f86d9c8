use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use surveyflow::navigation::{AnswerSubmission, SubmittedAnswer};
use surveyflow::{
    BackOutcome, Config, ConversationStatus, MemoryStateStore, NextOutcome, SqliteStateStore,
    StateStore, Survey, SurveyCatalog, SurveyEngine,
};

#[derive(Parser, Debug)]
#[command(name = "surveyflow", version, about = "Survey flow validation and navigation")]
struct Cli {
    /// Config file (default: ~/.surveyflow/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level regardless of config
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check survey files for cycles and dead ends
    Validate {
        /// A survey file, or a directory of *.toml surveys
        /// (default: storage.surveys_dir)
        path: Option<PathBuf>,
    },
    /// Walk one scripted respondent through a survey
    Simulate {
        file: PathBuf,
        /// text:.. number:.. date:YYYY-MM-DD location:lat,lon choice:i
        /// choices:i,j rating:r skip back
        #[arg(long = "answer", value_name = "SPEC")]
        answers: Vec<String>,
        /// Keep conversation state in storage.state_db instead of memory
        #[arg(long)]
        durable: bool,
        /// Respondent id to run as
        #[arg(long, default_value_t = 1)]
        respondent: i64,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, config_source) = Config::load_with_source(cli.config.as_deref())?;

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        config.log.level.parse().unwrap_or(tracing::Level::INFO)
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match &config_source {
        Some(path) => tracing::debug!("loaded config from {}", path.display()),
        None => tracing::debug!("no config file; using defaults"),
    }

    match cli.command {
        Command::Validate { path } => validate(&validate_target(&config, path)),
        Command::Simulate {
            file,
            answers,
            durable,
            respondent,
        } => {
            let store = state_store(&config, durable)?;
            simulate(&config, store, &file, respondent, &answers).await
        }
        Command::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

// ── validate ─────────────────────────────────────────────────────

fn validate_target(config: &Config, path: Option<PathBuf>) -> PathBuf {
    path.unwrap_or_else(|| config.storage.surveys_dir())
}

fn survey_files(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut files: Vec<_> = std::fs::read_dir(path)
        .with_context(|| format!("failed to read {}", path.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("toml"))
        .collect();
    files.sort();
    Ok(files)
}

fn read_survey(path: &Path) -> Result<Survey> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Survey::from_toml_str(&content).with_context(|| format!("in {}", path.display()))
}

fn validate(path: &Path) -> Result<()> {
    let files = survey_files(path)?;
    if files.is_empty() {
        bail!("no survey files found in {}", path.display());
    }

    let mut failures = 0usize;
    for file in &files {
        let mut survey = match read_survey(file) {
            Ok(survey) => survey,
            Err(e) => {
                failures += 1;
                println!("✗ {}: {e:#}", file.display());
                continue;
            }
        };
        match survey.activate() {
            Ok(()) => println!(
                "✓ survey {} '{}' ({} questions)",
                survey.id,
                survey.title,
                survey.len()
            ),
            Err(e) => {
                failures += 1;
                println!("✗ survey {} '{}': {e}", survey.id, survey.title);
            }
        }
    }

    if failures > 0 {
        bail!("{failures} of {} surveys failed validation", files.len());
    }
    Ok(())
}

// ── simulate ─────────────────────────────────────────────────────

fn state_store(config: &Config, durable: bool) -> Result<Arc<dyn StateStore>> {
    if !durable {
        return Ok(Arc::new(MemoryStateStore::new()));
    }
    let path = config.storage.state_db();
    tracing::debug!("conversation state in {}", path.display());
    Ok(Arc::new(SqliteStateStore::open(&path)?))
}

#[derive(Debug, Clone, PartialEq)]
enum ScriptStep {
    Answer(SubmittedAnswer),
    Skip,
    Back,
}

fn parse_indices(raw: &str) -> Result<Vec<usize>> {
    raw.split(',')
        .map(|part| {
            part.trim()
                .parse::<usize>()
                .with_context(|| format!("invalid option index '{part}'"))
        })
        .collect()
}

fn parse_step(spec: &str) -> Result<ScriptStep> {
    match spec {
        "skip" => return Ok(ScriptStep::Skip),
        "back" => return Ok(ScriptStep::Back),
        _ => {}
    }
    let Some((kind, value)) = spec.split_once(':') else {
        bail!("invalid answer spec '{spec}'");
    };
    let answer = match kind {
        "text" => SubmittedAnswer::Text(value.to_string()),
        "number" => SubmittedAnswer::Number(
            value
                .parse()
                .with_context(|| format!("invalid number '{value}'"))?,
        ),
        "date" => SubmittedAnswer::Date(
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .with_context(|| format!("invalid date '{value}'"))?,
        ),
        "location" => {
            let Some((lat, lon)) = value.split_once(',') else {
                bail!("location must be lat,lon");
            };
            SubmittedAnswer::Location {
                latitude: lat.trim().parse().context("invalid latitude")?,
                longitude: lon.trim().parse().context("invalid longitude")?,
            }
        }
        "choice" => SubmittedAnswer::Choice(
            value
                .trim()
                .parse()
                .with_context(|| format!("invalid option index '{value}'"))?,
        ),
        "choices" => SubmittedAnswer::Choices(parse_indices(value)?),
        "rating" => SubmittedAnswer::Rating(
            value
                .trim()
                .parse()
                .with_context(|| format!("invalid rating '{value}'"))?,
        ),
        other => bail!("unknown answer kind '{other}'"),
    };
    Ok(ScriptStep::Answer(answer))
}

fn print_question(survey: &Survey, id: surveyflow::survey::QuestionId) {
    match survey.question(id) {
        Some(q) => {
            println!("→ Q{id} [{}] {}", q.kind.as_str(), q.text);
            for (i, option) in q.options.iter().enumerate() {
                println!("    {i}. {}", option.text);
            }
        }
        None => println!("→ Q{id}"),
    }
}

async fn simulate(
    config: &Config,
    states: Arc<dyn StateStore>,
    file: &Path,
    respondent: i64,
    specs: &[String],
) -> Result<()> {
    let steps = specs
        .iter()
        .map(|s| parse_step(s))
        .collect::<Result<Vec<_>>>()?;

    let catalog = Arc::new(SurveyCatalog::new());
    let survey_id = catalog.insert(read_survey(file)?).id;
    let survey = catalog.activate(survey_id)?;

    let engine = SurveyEngine::new(catalog, states, &config.engine);

    // A durable store may still hold this respondent's last run.
    if let Ok(Some(state)) = engine.state(respondent).await {
        if state.status == ConversationStatus::Active {
            engine.cancel(respondent).await?;
            println!("(cancelled unfinished run of survey {})", state.survey_id);
        }
    }

    let first = engine.start(respondent, survey_id).await?;
    println!("survey {} '{}'", survey.id, survey.title);
    print_question(&survey, first);

    for step in steps {
        let result = match step {
            ScriptStep::Answer(answer) => {
                engine
                    .get_next(AnswerSubmission::new(respondent, answer))
                    .await
            }
            ScriptStep::Skip => engine.skip(respondent).await,
            ScriptStep::Back => match engine.go_back(respondent).await {
                Ok(BackOutcome::Previous(id)) => Ok(NextOutcome::Question(id)),
                Ok(BackOutcome::NoHistory) => {
                    println!("  (already at the first question)");
                    continue;
                }
                Err(e) => Err(e),
            },
        };

        match result {
            Ok(NextOutcome::Question(id)) => print_question(&survey, id),
            Ok(NextOutcome::Completed) => break,
            Err(e) => println!("  ! {e} ({:?})", e.outcome()),
        }
    }

    let status = engine
        .state(respondent)
        .await?
        .map(|s| s.status)
        .unwrap_or(ConversationStatus::Idle);
    println!("status: {status}");
    Ok(())
}
