//! Hearthwood CLI - drive the cart engine from a terminal.
//!
//! # Usage
//!
//! ```bash
//! # Show the guest cart stored under CART_GUEST_DIR
//! hw-cli cart show
//!
//! # Add two units of a variant
//! hw-cli cart add sku-oak-table --quantity 2 --price 349.00 --color natural
//!
//! # Sign in and move the guest cart and wishlist into the account
//! hw-cli --token "$CART_CUSTOMER_TOKEN" login
//!
//! # Work against the remote cart
//! hw-cli --token "$CART_CUSTOMER_TOKEN" cart qty line-12 3
//! ```
//!
//! # Commands
//!
//! - `cart` - Show or change the cart
//! - `wishlist` - Show or change the wishlist
//! - `login` - Migrate the guest cart and wishlist into the account
//! - `logout` - Show the guest cart and wishlist again

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use hearthwood_cart::CartSyncConfig;
use rust_decimal::Decimal;
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod context;

#[derive(Parser)]
#[command(name = "hw-cli")]
#[command(author, version, about = "Hearthwood cart tools")]
struct Cli {
    /// Customer bearer token (overrides `CART_CUSTOMER_TOKEN`)
    #[arg(long, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or change the cart
    Cart {
        #[command(subcommand)]
        action: CartAction,
    },
    /// Show or change the wishlist
    Wishlist {
        #[command(subcommand)]
        action: WishlistAction,
    },
    /// Sign in and migrate guest rows into the account
    Login,
    /// Sign out and show the guest rows
    Logout,
}

#[derive(Subcommand)]
enum CartAction {
    /// Print the cart as JSON
    Show,
    /// Add units of a variant
    Add {
        /// Variant (SKU) id
        variant: String,

        #[arg(short, long, default_value_t = 1)]
        quantity: u32,

        /// Unit price
        #[arg(short, long)]
        price: Decimal,

        #[arg(short, long)]
        color: Option<String>,

        #[arg(short, long)]
        size: Option<String>,

        /// Per-unit assembly surcharge (enables assembly)
        #[arg(long)]
        assembly: Option<Decimal>,
    },
    /// Set a row's quantity (zero or below removes it)
    Qty {
        item_id: String,

        #[arg(allow_negative_numbers = true)]
        quantity: i64,
    },
    /// Turn assembly on or off for a row
    Assembly {
        item_id: String,

        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
    /// Change a row's color (omit to clear it)
    Color {
        item_id: String,
        color: Option<String>,
    },
    /// Delete a row
    Remove { item_id: String },
    /// Delete every row
    Clear,
}

#[derive(Subcommand)]
enum WishlistAction {
    /// Print the wishlist as JSON
    Show,
    /// Save a variant
    Add {
        /// Variant (SKU) id
        variant: String,

        /// Unit price
        #[arg(short, long)]
        price: Decimal,

        #[arg(short, long)]
        color: Option<String>,

        #[arg(short, long)]
        size: Option<String>,
    },
    /// Drop a saved row
    Remove { item_id: String },
    /// Drop every saved row
    Clear,
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &CartSyncConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    Some(guard)
}

/// Route warnings and errors to Sentry events, info and debug to breadcrumbs.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match CartSyncConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing_subscriber::fmt::init();
            tracing::error!("Invalid configuration: {e}");
            std::process::exit(2);
        }
    };

    // Sentry must be initialized before the subscriber so the layer can attach
    let _sentry_guard = init_sentry(&config);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "hearthwood_cart=info,hearthwood_cli=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    if let Err(e) = run(cli, config).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: CartSyncConfig) -> Result<(), commands::CliError> {
    let token = cli
        .token
        .map(secrecy::SecretString::from)
        .or_else(|| config.customer_token.clone());

    match cli.command {
        Commands::Cart { action } => {
            let ctx = context::Context::build(&config, token)?;
            commands::cart::run(&ctx, action).await
        }
        Commands::Wishlist { action } => {
            let ctx = context::Context::build(&config, token)?;
            commands::wishlist::run(&ctx, action).await
        }
        Commands::Login => {
            let token = token.ok_or(commands::CliError::MissingToken)?;
            let ctx = context::Context::for_login(&config)?;
            commands::session::login(&ctx, token).await
        }
        Commands::Logout => {
            let ctx = context::Context::build(&config, None)?;
            commands::session::logout(&ctx).await
        }
    }
}
