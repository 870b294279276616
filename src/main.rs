mod assistant;
mod commands;
mod history;
mod llm;
mod records;
mod state;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use poise::serenity_prelude as serenity;
use poise::{Framework, FrameworkOptions};
use tokio::sync::RwLock;
use tracing::{error, info, Level};

use history::HistoryStore;
use llm::{ChatBackend, GenerationParams, LlmClient};
use records::Dataset;
use state::{AppState, SessionRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load env
    let _ = dotenv::dotenv();

    let level = dotenv::var("LOG_LEVEL")
        .ok()
        .and_then(|l| l.parse::<Level>().ok())
        .unwrap_or(Level::DEBUG);
    tracing_subscriber::fmt().with_max_level(level).init();

    let token = dotenv::var("DISCORD_TOKEN").context("DISCORD_TOKEN required")?;
    let guild_id: Option<serenity::GuildId> = dotenv::var("DISCORD_GUILD_ID")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(serenity::GuildId::new);

    // Load record tables
    let invoice_path = PathBuf::from(
        dotenv::var("INVOICE_DATA_PATH").unwrap_or_else(|_| "./data/invoice_dataset.csv".into()),
    );
    let order_path = PathBuf::from(
        dotenv::var("ORDER_DATA_PATH").unwrap_or_else(|_| "./data/order_dataset.csv".into()),
    );
    let dataset = Arc::new(Dataset::load(&invoice_path, Some(&order_path))?);
    info!(
        invoices = dataset.invoices.len(),
        orders = dataset.orders.as_ref().map_or(0, |t| t.len()),
        mode = ?dataset.mode(),
        "Record tables loaded"
    );

    // Init history storage
    let history_dir =
        PathBuf::from(dotenv::var("HISTORY_DIR").unwrap_or_else(|_| "./data/history".into()));
    let history = Arc::new(HistoryStore::new(&history_dir).await?);
    info!("History store initialized at {:?}", history_dir);

    // Init LLM client
    let llm_client = Arc::new(LlmClient::from_env()?);
    info!(model = llm_client.model(), "LLM client initialized");

    // Parse admin user IDs from env
    let admin_ids: HashSet<u64> = dotenv::var("ADMIN_USER_IDS")
        .unwrap_or_default()
        .split(',')
        .filter_map(|s| s.trim().parse::<u64>().ok())
        .collect();
    if !admin_ids.is_empty() {
        info!(count = admin_ids.len(), "Admin users configured");
    }

    let backend: Arc<dyn ChatBackend> = llm_client.clone();
    let app_state = AppState {
        sessions: SessionRegistry::new(dataset.clone(), backend),
        dataset,
        llm: llm_client,
        history,
        admin_ids,
        params: Arc::new(RwLock::new(GenerationParams::default())),
    };

    let intents =
        serenity::GatewayIntents::GUILDS | serenity::GatewayIntents::GUILD_MESSAGES;

    let framework = Framework::builder()
        .options(FrameworkOptions {
            commands: vec![commands::factures()],
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                info!("Bot connected as: {} ({})", ready.user.name, ready.user.id);

                let commands = &framework.options().commands;
                info!("Registering {} top-level command(s):", commands.len());
                for cmd in commands {
                    info!("  /{} ({} subcommands)", cmd.name, cmd.subcommands.len());
                    for sub in &cmd.subcommands {
                        info!("    /{} {}", cmd.name, sub.name);
                    }
                }

                if let Some(gid) = guild_id {
                    info!("Registering to guild {} (instant)", gid);
                    poise::builtins::register_in_guild(ctx, commands, gid).await?;
                } else {
                    info!("Registering globally (up to 1 hour delay)");
                    poise::builtins::register_globally(ctx, commands).await?;
                }

                Ok(app_state)
            })
        })
        .build();

    info!("Starting invoice assistant bot...");

    let mut client = serenity::ClientBuilder::new(&token, intents)
        .framework(framework)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create client: {}", e))?;

    if let Err(e) = client.start().await {
        error!("Client error: {}", e);
    }

    Ok(())
}
