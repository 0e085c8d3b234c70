//! Delivery Dates CLI - migrations and operational tools.
//!
//! # Usage
//!
//! ```bash
//! # Create the KV table
//! dd-cli migrate
//!
//! # Store a token for a shop installed out of band
//! dd-cli token set --shop example.myshopify.com --token shpat_xxx --scopes write_orders
//!
//! # Register the order webhooks with the stored token
//! dd-cli webhooks register --shop example.myshopify.com
//!
//! # Inspect and recover dead letters
//! dd-cli dlq list --limit 20
//! dd-cli dlq replay 20260105T101500.000000Z-...
//!
//! # Sweep due retries once
//! dd-cli retries run
//! ```
//!
//! # Environment Variables
//!
//! - `DATABASE_URL` - `PostgreSQL` connection string (all commands)
//! - The server's variables (`SHOPIFY_API_SECRET`, ...) for the commands that
//!   go through the pipeline: `webhooks`, `dlq`, `retries`

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "dd-cli")]
#[command(author, version, about = "Delivery Dates CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Manage shop access tokens
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
    /// Manage Shopify webhook subscriptions
    Webhooks {
        #[command(subcommand)]
        action: WebhooksAction,
    },
    /// Inspect and recover the dead-letter queue
    Dlq {
        #[command(subcommand)]
        action: DlqAction,
    },
    /// Work the retry queue
    Retries {
        #[command(subcommand)]
        action: RetriesAction,
    },
    /// Maintain the KV table
    Kv {
        #[command(subcommand)]
        action: KvAction,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Store an access token for a shop
    Set {
        /// Shop domain (`example.myshopify.com`)
        #[arg(short, long)]
        shop: String,

        /// Offline access token
        #[arg(short, long)]
        token: String,

        /// Granted scopes, comma separated
        #[arg(long, default_value = "write_orders")]
        scopes: String,
    },
    /// Remove a shop's access token
    Delete {
        #[arg(short, long)]
        shop: String,
    },
    /// List shops with a stored token
    List,
}

#[derive(Subcommand)]
enum WebhooksAction {
    /// Register the order and uninstall webhooks for a shop
    Register {
        #[arg(short, long)]
        shop: String,
    },
}

#[derive(Subcommand)]
enum DlqAction {
    /// List dead letters, oldest first
    List {
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },
    /// Replay a dead letter through the pipeline
    Replay { id: String },
    /// Delete a dead letter
    Discard { id: String },
}

#[derive(Subcommand)]
enum RetriesAction {
    /// Process every retry that is due now
    Run,
    /// Show scheduled retries
    List {
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum KvAction {
    /// Delete expired rows
    Purge,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Token { action } => match action {
            TokenAction::Set {
                shop,
                token,
                scopes,
            } => commands::tokens::set(&shop, &token, &scopes).await?,
            TokenAction::Delete { shop } => commands::tokens::delete(&shop).await?,
            TokenAction::List => commands::tokens::list().await?,
        },
        Commands::Webhooks { action } => match action {
            WebhooksAction::Register { shop } => commands::webhooks::register(&shop).await?,
        },
        Commands::Dlq { action } => match action {
            DlqAction::List { limit } => commands::dlq::list(limit).await?,
            DlqAction::Replay { id } => commands::dlq::replay(&id).await?,
            DlqAction::Discard { id } => commands::dlq::discard(&id).await?,
        },
        Commands::Retries { action } => match action {
            RetriesAction::Run => commands::retries::run().await?,
            RetriesAction::List { limit } => commands::retries::list(limit).await?,
        },
        Commands::Kv { action } => match action {
            KvAction::Purge => commands::migrate::purge_expired().await?,
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_token_set() {
        let cli = Cli::try_parse_from([
            "dd-cli", "token", "set", "--shop", "a.myshopify.com", "--token", "shpat_1",
        ])
        .ok();
        assert!(matches!(
            cli.map(|c| c.command),
            Some(Commands::Token {
                action: TokenAction::Set { .. }
            })
        ));
    }
}
