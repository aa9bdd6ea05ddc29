use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use promptly_agents::{
    Completer, CompletionConfig, PromptInput, PromptOutcome, PromptWorkflow, DEFAULT_HISTORY_LIMIT,
};
use promptly_core::{classify, render_named, ClassificationResult, Intent, PromptRecord};
use promptly_observability::{init_tracing, AppMetrics};
use promptly_storage::Store;
use serde::Serialize;

type Workflow = PromptWorkflow<Store, Completer>;

#[derive(Debug, Parser)]
#[command(name = "promptly")]
#[command(about = "Turn plain prompts into structured XML prompts")]
struct Cli {
    /// SQLite URL for prompt history; history is kept in memory when unset.
    #[arg(long, env = "PROMPTLY_DATABASE_URL", global = true)]
    database_url: Option<String>,

    #[arg(long, env = "PROMPTLY_OWNER", default_value = "local", global = true)]
    owner: String,

    #[arg(long, env = "PROMPTLY_HISTORY_LIMIT", default_value_t = DEFAULT_HISTORY_LIMIT, global = true)]
    history_limit: usize,

    /// Print JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Detect the intent of a prompt.
    Classify { text: String },
    /// Render a prompt with an explicit intent code.
    Render {
        text: String,
        #[arg(long)]
        intent: String,
    },
    /// Classify, render and store a prompt.
    Submit { text: String },
    History {
        #[arg(long)]
        limit: Option<usize>,
    },
    Show { id: String },
    /// Re-render a stored prompt with another intent.
    Override {
        id: String,
        #[arg(long)]
        intent: String,
    },
    /// Send a stored prompt to the completion endpoint.
    Complete { id: String },
    Interactive,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("promptly_cli");
    let cli = Cli::parse();

    match &cli.command {
        Command::Classify { text } => {
            let classification = classify(text);
            if cli.json {
                print_json(&classification)?;
            } else {
                print_classification(&classification);
            }
        }
        Command::Render { text, intent } => {
            let rendered = render_named(text, intent)?;
            if cli.json {
                print_json(&rendered)?;
            } else {
                println!("{}\n\n{}", rendered.markup, rendered.explanation);
            }
        }
        Command::Submit { text } => {
            let workflow = build_workflow(&cli).await?;
            let outcome = workflow
                .submit(PromptInput {
                    text: text.clone(),
                    owner_id: Some(cli.owner.clone()),
                })
                .await?;
            print_outcome(&outcome, cli.json)?;
        }
        Command::History { limit } => {
            let workflow = build_workflow(&cli).await?;
            let limit = limit.unwrap_or(workflow.history_limit());
            let prompts = workflow.history(Some(&cli.owner), limit).await?;
            if cli.json {
                print_json(&prompts)?;
            } else if prompts.is_empty() {
                println!("no prompts stored for {}", cli.owner);
            } else {
                for record in &prompts {
                    println!(
                        "{}  {} {:<18} {}",
                        record.id,
                        record.intent.icon(),
                        record.intent.display_name(),
                        record.title
                    );
                }
            }
        }
        Command::Show { id } => {
            let workflow = build_workflow(&cli).await?;
            let outcome = workflow.recall(id).await?;
            print_outcome(&outcome, cli.json)?;
        }
        Command::Override { id, intent } => {
            let intent = Intent::parse(intent)?;
            let workflow = build_workflow(&cli).await?;
            let outcome = workflow.override_intent(id, intent).await?;
            print_outcome(&outcome, cli.json)?;
        }
        Command::Complete { id } => {
            let workflow = build_workflow(&cli).await?;
            let record = workflow.generate_completion(id).await?;
            if cli.json {
                print_json(&record)?;
            } else {
                print_record(&record);
            }
        }
        Command::Interactive => {
            let workflow = build_workflow(&cli).await?;
            run_interactive(&workflow, &cli).await?;
        }
    }

    Ok(())
}

async fn run_interactive(workflow: &Workflow, cli: &Cli) -> Result<()> {
    println!("Promptly interactive mode. type 'exit' to quit.");

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            break;
        }

        let text = line.trim();
        if text.eq_ignore_ascii_case("exit") || text.eq_ignore_ascii_case("quit") {
            break;
        }
        if text.is_empty() {
            continue;
        }

        let outcome = workflow
            .submit(PromptInput {
                text: text.to_string(),
                owner_id: Some(cli.owner.clone()),
            })
            .await?;
        println!();
        print_outcome(&outcome, cli.json)?;
        println!();
    }

    Ok(())
}

async fn build_workflow(cli: &Cli) -> Result<Workflow> {
    let store = match cli.database_url.as_deref() {
        Some(database_url) => Store::sqlite(database_url)
            .await
            .with_context(|| format!("failed opening prompt history at {database_url}"))?,
        None => Store::memory(),
    };
    let completer = Completer::from_config(&CompletionConfig::from_env())
        .context("failed to build completion client")?;

    Ok(PromptWorkflow::new(Arc::new(store), Arc::new(completer), AppMetrics::shared())
        .with_history_limit(cli.history_limit))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_classification(classification: &ClassificationResult) {
    let intent = classification.intent;
    println!(
        "{} {} ({}% confidence, {})",
        intent.icon(),
        intent.display_name(),
        classification.confidence_percent(),
        classification.band().label()
    );
    if !classification.matched_keywords.is_empty() {
        println!("matched: {}", classification.matched_keywords.join(", "));
    }
    if !classification.alternative_intents.is_empty() {
        let alternatives = classification
            .alternative_intents
            .iter()
            .map(|alt| format!("{} {}%", alt.intent.display_name(), alt.confidence_percent()))
            .collect::<Vec<_>>();
        println!("also possible: {}", alternatives.join(", "));
    }
}

fn print_record(record: &PromptRecord) {
    println!("id: {}", record.id);
    println!("{}\n", record.markup);
    println!("{}", record.explanation);
    if let Some(response) = record.ai_response.as_deref() {
        println!("\nAI response:\n{response}");
    }
}

fn print_outcome(outcome: &PromptOutcome, json: bool) -> Result<()> {
    if json {
        return print_json(outcome);
    }
    print_classification(&outcome.classification);
    print_record(&outcome.record);
    Ok(())
}
