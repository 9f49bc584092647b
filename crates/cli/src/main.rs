//! Varketplace cart CLI - drive the cart synchronizer from a terminal.
//!
//! # Usage
//!
//! ```bash
//! # Show the cart (guest unless VARKETPLACE_USER_ID/VARKETPLACE_AUTH_TOKEN are set)
//! vk-cart show
//!
//! # Add two of product 7, remembering its name and price
//! vk-cart add 7 --quantity 2 --name "Olive oil" --price 12.50
//!
//! # Change or remove a line by product ID, or by server line ID with --server
//! vk-cart update 7 5
//! vk-cart remove 41 --server
//!
//! # Sign in and merge the guest cart into the server cart
//! vk-cart login --user-id 9 --token "$TOKEN"
//!
//! # Print a checkout session payload
//! vk-cart checkout --currency usd --origin https://shop.example
//! ```
//!
//! Cart state for guests is kept under `VARKETPLACE_STORE_DIR`.

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use varketplace_cart::CartConfig;
use varketplace_core::{CurrencyCode, ProductId, UserId};

mod commands;

use commands::{CommandError, Context};

#[derive(Parser)]
#[command(name = "vk-cart")]
#[command(author, version, about = "Varketplace cart tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and print the cart
    Show,
    /// Add a product to the cart
    Add {
        /// Product ID
        product_id: ProductId,

        /// Number of units to add
        #[arg(short, long, default_value_t = 1)]
        quantity: u32,

        /// Product name to keep with the line
        #[arg(long)]
        name: Option<String>,

        /// Unit price to keep with the line
        #[arg(long)]
        price: Option<Decimal>,
    },
    /// Set a line's quantity (0 removes it)
    Update {
        /// Product ID, or server line ID with --server
        key: i64,

        /// New quantity
        quantity: u32,

        /// Treat KEY as a server line ID
        #[arg(long)]
        server: bool,
    },
    /// Remove a line
    Remove {
        /// Product ID, or server line ID with --server
        key: i64,

        /// Treat KEY as a server line ID
        #[arg(long)]
        server: bool,
    },
    /// Empty the cart
    Clear,
    /// Start a session and merge the guest cart into it
    Login {
        #[arg(long)]
        user_id: UserId,

        #[arg(long)]
        token: String,
    },
    /// End the configured session and fall back to the local cart
    Logout,
    /// Print the checkout session payload for the cart
    Checkout {
        /// Currency code
        #[arg(long, default_value = "eur")]
        currency: CurrencyCode,

        /// Storefront origin for the return URLs
        #[arg(long)]
        origin: Option<String>,

        /// Customer email to prefill
        #[arg(long)]
        email: Option<String>,
    },
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &CartConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

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

    let config = match CartConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing_subscriber::fmt::init();
            tracing::error!("Invalid configuration: {e}");
            std::process::exit(2);
        }
    };

    let _sentry_guard = init_sentry(&config);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "varketplace_cart=info,vk_cart=info".into());

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

async fn run(cli: Cli, config: CartConfig) -> Result<(), CommandError> {
    let ctx = Context::open(&config)?;

    match cli.command {
        Commands::Show => commands::cart::show(&ctx).await,
        Commands::Add {
            product_id,
            quantity,
            name,
            price,
        } => commands::cart::add(&ctx, product_id, quantity, name, price).await,
        Commands::Update {
            key,
            quantity,
            server,
        } => commands::cart::update(&ctx, commands::item_key(key, server), quantity).await,
        Commands::Remove { key, server } => {
            commands::cart::remove(&ctx, commands::item_key(key, server)).await
        }
        Commands::Clear => commands::cart::clear(&ctx).await,
        Commands::Login { user_id, token } => commands::session::login(&ctx, user_id, token).await,
        Commands::Logout => commands::session::logout(&ctx).await,
        Commands::Checkout {
            currency,
            origin,
            email,
        } => {
            commands::cart::checkout(&ctx, currency, origin.as_deref(), email.as_deref()).await
        }
    }
}
