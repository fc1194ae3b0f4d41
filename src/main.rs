// src/main.rs

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use receipt_split::config::{Config, DEFAULT_CONFIG_PATH};
use receipt_split::credential::Sha256Verifier;
use receipt_split::extraction::{CandidateChoice, FileTextSource, Interpreter};
use receipt_split::heuristics::items::suggest_other_subcategories;
use receipt_split::heuristics::{Category, Interpretation, OtherSubcategory};
use receipt_split::ledger::{ItemEdit, NewItem};
use receipt_split::llm_extract::LlmExtractor;
use receipt_split::lobby_db::SqliteLobbyStore;
use receipt_split::service::LobbyService;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "receipt-split", version, about = "Split a restaurant bill from its receipt")]
struct Cli {
    /// Configuration file
    #[arg(long, env = "RECEIPT_SPLIT_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Interpret an OCR text file and print items, totals and review findings
    Interpret {
        file: PathBuf,
        #[arg(long, default_value = "primary", value_parser = parse_choice)]
        choice: CandidateChoice,
    },
    /// Interpret a receipt and open a lobby for it
    Create {
        file: PathBuf,
        #[arg(long)]
        name: String,
        #[arg(long, env = "RECEIPT_SPLIT_PASSCODE")]
        passcode: String,
        #[arg(long, default_value = "primary", value_parser = parse_choice)]
        choice: CandidateChoice,
    },
    /// Join a lobby; the first to join becomes its host
    Join {
        lobby: String,
        #[arg(long, env = "RECEIPT_SPLIT_PASSCODE")]
        passcode: String,
        #[arg(long)]
        name: String,
    },
    /// List a lobby's items, newest first
    Items { lobby: String },
    /// Set how much of an item a participant is paying for (0 removes the claim)
    Claim {
        lobby: String,
        participant: String,
        item: String,
        quantity: f64,
    },
    /// Clear claims on an item (host only)
    Reset {
        lobby: String,
        actor: String,
        item: String,
        #[arg(long)]
        participant: Option<String>,
    },
    /// Add an item by hand (host only)
    AddItem {
        lobby: String,
        actor: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        quantity: Option<f64>,
        #[arg(long)]
        unit_price: Option<f64>,
        #[arg(long)]
        cost: Option<f64>,
        #[arg(long, value_parser = parse_category)]
        category: Option<Category>,
        #[arg(long, value_parser = parse_subcategory)]
        subcategory: Option<OtherSubcategory>,
    },
    /// Edit an item (host only); claims above a lowered quantity are clamped
    EditItem {
        lobby: String,
        actor: String,
        item: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        quantity: Option<f64>,
        #[arg(long)]
        unit_price: Option<f64>,
        #[arg(long)]
        cost: Option<f64>,
        #[arg(long, value_parser = parse_category)]
        category: Option<Category>,
        #[arg(long, value_parser = parse_subcategory)]
        subcategory: Option<OtherSubcategory>,
    },
    /// Who owes what
    Summary {
        lobby: String,
        #[arg(long)]
        compact: bool,
    },
    /// Subcategory suggestions for an item name
    Suggest { name: String },
    /// Edit the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Set a single dotted key, e.g. `review.subtotal_abs_tolerance 3`
    Set { key: String, value: String },
}

fn parse_choice(s: &str) -> Result<CandidateChoice, String> {
    CandidateChoice::parse(s).ok_or_else(|| format!("expected primary, fallback or hybrid, got {s:?}"))
}

fn parse_category(s: &str) -> Result<Category, String> {
    Category::parse(s).ok_or_else(|| format!("unknown category {s:?}"))
}

fn parse_subcategory(s: &str) -> Result<OtherSubcategory, String> {
    OtherSubcategory::parse(s).ok_or_else(|| format!("unknown subcategory {s:?}"))
}

fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn open_service(cfg: &Config) -> CliResult<LobbyService> {
    if let Some(parent) = Path::new(&cfg.db_path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let store = SqliteLobbyStore::open(&cfg.db_path)?;
    Ok(LobbyService::new(
        Arc::new(store),
        Arc::new(Sha256Verifier::new(cfg.credentials.pepper.clone())),
    ))
}

async fn interpret(cfg: &Config, file: &Path, choice: CandidateChoice) -> CliResult<Interpretation> {
    let mut interpreter = Interpreter::new(
        cfg.classifier.rule_table()?,
        cfg.review,
        cfg.extraction.timeout(),
    );
    if let Some(llm) = LlmExtractor::from_config(&cfg.fallback)? {
        info!(model = %llm.model(), "Fallback extractor available");
        interpreter = interpreter.with_fallback(Arc::new(llm));
    }

    let (lines, primary) = interpreter
        .interpret_source(&FileTextSource::new(file))
        .await?;
    if primary.needs_review() && choice == CandidateChoice::Primary {
        warn!(
            reasons = primary.review.reasons.len(),
            "Receipt needs review; consider --choice fallback or hybrid"
        );
    }
    let fallback = match choice {
        CandidateChoice::Primary => None,
        _ => Some(interpreter.fallback_candidate(&lines).await?),
    };
    Ok(interpreter.choose(choice, primary, fallback)?)
}

#[tokio::main]
async fn main() -> CliResult<()> {
    // init tracing
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Command::Config {
        action: ConfigAction::Set { key, value },
    } = &cli.command
    {
        Config::set_value(&cli.config, key, value)?;
        info!(key = %key, path = %cli.config.display(), "Configuration updated");
        return Ok(());
    }

    let cfg = Config::load(&cli.config)?;

    match cli.command {
        Command::Interpret { file, choice } => {
            print_json(&interpret(&cfg, &file, choice).await?)?;
        }
        Command::Create {
            file,
            name,
            passcode,
            choice,
        } => {
            let interpretation = interpret(&cfg, &file, choice).await?;
            let svc = open_service(&cfg)?;
            let lobby_id = svc.create_lobby(&name, &interpretation, &passcode).await?;
            print_json(&serde_json::json!({
                "lobby_id": lobby_id,
                "items": interpretation.items.len(),
                "review": interpretation.review,
            }))?;
        }
        Command::Join {
            lobby,
            passcode,
            name,
        } => {
            let svc = open_service(&cfg)?;
            print_json(&svc.join_lobby(&lobby, &passcode, &name).await?)?;
        }
        Command::Items { lobby } => {
            let svc = open_service(&cfg)?;
            print_json(&svc.list_items(&lobby).await?)?;
        }
        Command::Claim {
            lobby,
            participant,
            item,
            quantity,
        } => {
            let svc = open_service(&cfg)?;
            print_json(&svc.set_claim(&lobby, &participant, &item, quantity).await?)?;
        }
        Command::Reset {
            lobby,
            actor,
            item,
            participant,
        } => {
            let svc = open_service(&cfg)?;
            let state = svc
                .reset_claims(&lobby, &actor, &item, participant.as_deref())
                .await?;
            print_json(&state)?;
        }
        Command::AddItem {
            lobby,
            actor,
            name,
            quantity,
            unit_price,
            cost,
            category,
            subcategory,
        } => {
            let svc = open_service(&cfg)?;
            let item = NewItem {
                name,
                quantity,
                unit_price,
                cost,
                category,
                other_subcategory: subcategory,
            };
            print_json(&svc.add_item(&lobby, &actor, item).await?)?;
        }
        Command::EditItem {
            lobby,
            actor,
            item,
            name,
            quantity,
            unit_price,
            cost,
            category,
            subcategory,
        } => {
            let svc = open_service(&cfg)?;
            let edit = ItemEdit {
                name,
                quantity,
                unit_price,
                cost,
                category,
                other_subcategory: subcategory,
            };
            print_json(&svc.edit_item(&lobby, &actor, &item, edit).await?)?;
        }
        Command::Summary { lobby, compact } => {
            let svc = open_service(&cfg)?;
            let summary = svc.get_summary(&lobby).await?;
            if compact {
                print_json(&summary.compact())?;
            } else {
                print_json(&summary.rounded())?;
            }
        }
        Command::Suggest { name } => {
            let names: Vec<&str> = suggest_other_subcategories(&name)
                .iter()
                .map(|s| s.as_str())
                .collect();
            print_json(&names)?;
        }
        Command::Config { .. } => {}
    }

    Ok(())
}
