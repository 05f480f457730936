// src/main.rs
// samvad - retrieval-augmented conversational orchestrator

use anyhow::Result;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::FmtSubscriber;

use samvad::chat::{ChatRequest, ClientInfo};
use samvad::error::ChatError;
use samvad::predictions::PredictionStore;
use samvad::{AppState, CONFIG};

#[derive(Parser, Debug)]
#[command(name = "samvad", about = "Conversational orchestrator chat loop")]
struct Args {
    /// Registered user id; omit to chat as a guest
    #[arg(long)]
    user_id: Option<String>,

    /// Continue an existing conversation
    #[arg(long)]
    conversation_id: Option<String>,

    /// Force the web-evidence pipeline on every turn
    #[arg(long, default_value_t = false)]
    web_search: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let level = CONFIG
        .logging
        .level
        .parse()
        .unwrap_or(tracing::Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    info!("Connecting to database");
    let pool = PgPoolOptions::new()
        .max_connections(CONFIG.database.max_connections)
        .connect(&CONFIG.database.url)
        .await?;

    let state = AppState::new(pool).await?;

    // Hourly sweep retiring expired prediction bundles
    {
        let predictions = state.predictions.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
            loop {
                interval.tick().await;
                if let Err(e) = predictions.sweep_expired().await {
                    tracing::warn!("Prediction sweep failed: {}", e);
                }
            }
        });
    }

    info!("Ready. Type a message, or 'exit' to quit.");

    let client = ClientInfo::new(None, "127.0.0.1", "samvad-cli");
    let mut conversation_id = args.conversation_id;
    let stdin = std::io::stdin();

    loop {
        eprint!("> ");
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        if message == "exit" || message == "quit" {
            break;
        }

        let request = ChatRequest {
            user_id: args.user_id.clone(),
            conversation_id: conversation_id.clone(),
            message: message.to_string(),
            include_web_search: args.web_search,
            language: None,
        };

        match state.chat.handle_message(request, &client).await {
            Ok(response) => {
                conversation_id = Some(response.conversation_id.clone());
                println!("\n{}\n", response.response);
                if !response.sources.is_empty() {
                    println!("Sources:");
                    for source in &response.sources {
                        println!("  [{}] {} - {}", source.number, source.title, source.url);
                    }
                    println!();
                }
            }
            Err(ChatError::Denied(denial)) => {
                println!("\n{} ({})\n", denial.message, denial.error.as_str());
                for plan in &denial.plans {
                    println!("  {} - Rs.{} ({})", plan.name, plan.price, plan.limit_description);
                }
            }
            Err(e) => {
                eprintln!("error: {}", e);
            }
        }
    }

    Ok(())
}
