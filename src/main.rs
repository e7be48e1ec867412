//! Inventory Console - live view runner
//!
//! Mounts list views against the inventory API and logs every update they
//! receive from this process, peer instances and the server push channel.

use anyhow::Result;
use clap::{Parser, Subcommand};
use inventory_console::events::EntityKind;
use inventory_console::view::{ViewObserver, ViewState};
use inventory_console::{Config, ConsoleState};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "console")]
#[command(about = "Live list views for the inventory admin API")]
struct Cli {
    /// Path to the YAML config file (defaults to ./config.yaml)
    #[arg(long, env = "INVENTORY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mount live views and log their state until Ctrl-C
    Watch {
        /// Entities to watch (product, organization, person, imports)
        #[arg(required = true)]
        entities: Vec<EntityKind>,

        /// Start every view on this page
        #[arg(long, default_value = "0")]
        page: u32,
    },

    /// Publish a change notification on the bus (e.g. "org:changed")
    Publish {
        /// Bus event name
        name: String,
    },
}

/// Logs view updates through tracing
struct LogObserver {
    entity: EntityKind,
}

impl ViewObserver for LogObserver {
    fn on_change(&self, state: &ViewState) {
        if state.loading {
            tracing::debug!(entity = %self.entity, page = state.query.page, "Loading");
            return;
        }
        tracing::info!(
            entity = %self.entity,
            page = state.query.page,
            size = state.query.size,
            total_pages = state.envelope.total_pages,
            items = state.envelope.items.len(),
            "View updated"
        );
    }

    fn on_error(&self, message: &str) {
        tracing::error!(entity = %self.entity, "{}", message);
    }

    fn on_notice(&self, message: &str) {
        tracing::info!(entity = %self.entity, "{}", message);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,inventory_console=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = Config::from_yaml_and_env(cli.config.as_deref())?;

    match cli.command {
        Commands::Watch { entities, page } => run_watch(config, entities, page).await,
        Commands::Publish { name } => run_publish(config, &name).await,
    }
}

async fn run_watch(config: Config, entities: Vec<EntityKind>, page: u32) -> Result<()> {
    let state = ConsoleState::new(config).await?;
    tracing::info!(
        api = %state.config.api_url,
        push = %state.config.push_url,
        mirrored = state.bus.has_transport(),
        "Console ready"
    );

    let mut views = Vec::new();
    for entity in entities {
        let view = state.mount(entity, Arc::new(LogObserver { entity }));
        if page > 0 {
            view.set_query(inventory_console::view::QueryPatch::default().page(page));
        }
        views.push(view);
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    for mut view in views {
        view.unmount();
    }
    Ok(())
}

async fn run_publish(config: Config, name: &str) -> Result<()> {
    let state = ConsoleState::new(config).await?;
    if !state.bus.has_transport() {
        tracing::warn!("No NATS_URL configured, the event only reaches this process");
    }
    state.bus.publish(name, serde_json::Value::Null);

    // Publishing is fire-and-forget; give it a moment to leave the process.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    tracing::info!(name = %name, "Published");
    Ok(())
}
