//! Inventory Console - CLI Tool
//!
//! Command-line interface for the inventory REST API.

use anyhow::Result;
use clap::{Parser, Subcommand};
use inventory_console::api::{ApiClient, ImportOperation, RecordApi};
use inventory_console::events::EntityKind;
use inventory_console::view::{normalize, PageQuery, QueryPatch, SortDir};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "invctl")]
#[command(about = "CLI for the inventory admin API")]
struct Cli {
    /// Inventory API base URL
    #[arg(
        long,
        env = "INVENTORY_API_URL",
        default_value = "http://localhost:8080/api"
    )]
    server: String,

    /// Request timeout in seconds
    #[arg(long, env = "INVENTORY_API_TIMEOUT_SECS", default_value = "30")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List one page of records
    List {
        /// product, organization, person
        entity: EntityKind,

        /// Zero-based page
        #[arg(short, long, default_value = "0")]
        page: u32,

        #[arg(short, long)]
        size: Option<u32>,

        /// Sort column
        #[arg(long)]
        sort: Option<String>,

        /// asc or desc
        #[arg(long)]
        dir: Option<SortDir>,

        /// Filter as field=value (repeatable)
        #[arg(short, long = "filter")]
        filters: Vec<String>,
    },

    /// Show one record
    Get { entity: EntityKind, id: i64 },

    /// Create a record from a JSON body
    Create {
        entity: EntityKind,

        /// JSON body
        #[arg(long)]
        json: String,
    },

    /// Replace a record with a JSON body
    Update {
        entity: EntityKind,
        id: i64,

        /// JSON body
        #[arg(long)]
        json: String,
    },

    /// Delete a record
    Delete { entity: EntityKind, id: i64 },

    /// Bulk import operations
    Import {
        #[command(subcommand)]
        action: ImportAction,
    },
}

#[derive(Subcommand)]
enum ImportAction {
    /// Upload an import file
    Upload {
        /// Entity the file contains
        #[arg(long, default_value = "product")]
        entity: EntityKind,

        /// File to upload
        file: PathBuf,
    },

    /// Show import job history
    History {
        #[arg(short, long, default_value = "0")]
        page: u32,

        #[arg(short, long, default_value = "20")]
        size: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = ApiClient::new(&cli.server, Duration::from_secs(cli.timeout))?;

    let result = run(&client, cli.command).await;

    // Show the server's message rather than the error chain.
    if let Err(e) = &result {
        if let Some(api_error) = e.downcast_ref::<inventory_console::api::ApiError>() {
            anyhow::bail!("{}", api_error.user_message());
        }
    }
    result
}

async fn run(client: &ApiClient, command: Commands) -> Result<()> {
    match command {
        Commands::List {
            entity,
            page,
            size,
            sort,
            dir,
            filters,
        } => {
            let patch = QueryPatch {
                page: None,
                size,
                sort,
                dir,
                filters: Some(parse_filters(entity, &filters)?),
            };
            let mut query = entity.default_query();
            query.apply(patch);
            query.page = page;
            handle_list(client, entity, &query).await
        }
        Commands::Get { entity, id } => print_json(&client.get(entity, id).await?),
        Commands::Create { entity, json } => {
            let created = client.create(entity, &parse_body(&json)?).await?;
            println!("Created {}: {}", entity, created["id"]);
            Ok(())
        }
        Commands::Update { entity, id, json } => {
            let updated = client.update(entity, id, &parse_body(&json)?).await?;
            print_json(&updated)
        }
        Commands::Delete { entity, id } => {
            client.delete(entity, id).await?;
            println!("Deleted {} {}", entity, id);
            Ok(())
        }
        Commands::Import { action } => handle_import(client, action).await,
    }
}

async fn handle_list(client: &ApiClient, entity: EntityKind, query: &PageQuery) -> Result<()> {
    let raw = client.list(entity, query).await?;
    let envelope = normalize(&raw, query.size);

    for item in &envelope.items {
        println!("{}", serde_json::to_string(item)?);
    }
    println!(
        "-- page {}/{}{}",
        query.page + 1,
        envelope.total_pages,
        envelope
            .total_elements
            .map(|n| format!(", {} records", n))
            .unwrap_or_default()
    );
    Ok(())
}

async fn handle_import(client: &ApiClient, action: ImportAction) -> Result<()> {
    match action {
        ImportAction::Upload { entity, file } => {
            let contents = tokio::fs::read(&file).await?;
            let file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "import.yaml".to_string());

            let resp = client.upload_import(entity, &file_name, contents).await?;
            println!("import started: {} created", resp.created_count);
            for error in resp.errors {
                println!(
                    "  row {}: {} {}",
                    error.index.map(|i| i.to_string()).unwrap_or_else(|| "-".into()),
                    error.field_path.unwrap_or_default(),
                    error.message.unwrap_or_default()
                );
            }
        }

        ImportAction::History { page, size } => {
            let mut query = EntityKind::Import.default_query();
            query.apply(QueryPatch::default().size(size));
            query.page = page;

            let raw = client.list_imports(&query).await?;
            let envelope = normalize(&raw, query.size);

            println!("{:<6} {:<10} {:<8} {}", "ID", "STATUS", "CREATED", "DURATION");
            println!("{}", "-".repeat(48));
            for item in envelope.items {
                let Ok(op) = serde_json::from_value::<ImportOperation>(item) else {
                    continue;
                };
                println!(
                    "{:<6} {:<10} {:<8} {}",
                    op.id,
                    op.status,
                    op.created_count.map(|n| n.to_string()).unwrap_or_else(|| "-".into()),
                    op.duration()
                        .map(|d| format!("{}ms", d.num_milliseconds()))
                        .unwrap_or_else(|| "-".into())
                );
            }
        }
    }

    Ok(())
}

fn parse_filters(entity: EntityKind, filters: &[String]) -> Result<BTreeMap<String, String>> {
    filters
        .iter()
        .map(|f| -> Result<(String, String)> {
            let (field, value) = f
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("filter must be field=value, got '{}'", f))?;
            let field = field.trim();
            if !entity.filter_fields().contains(&field) {
                anyhow::bail!(
                    "{} cannot be filtered by '{}' (known: {})",
                    entity,
                    field,
                    entity.filter_fields().join(", ")
                );
            }
            Ok((field.to_string(), value.to_string()))
        })
        .collect()
}

fn parse_body(json: &str) -> Result<Value> {
    serde_json::from_str(json).map_err(|e| anyhow::anyhow!("invalid JSON body: {}", e))
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_filters_accepts_known_fields() {
        let filters = vec!["name=bolt".to_string(), " unit =PCS".to_string()];
        let parsed = parse_filters(EntityKind::Product, &filters).unwrap();
        assert_eq!(parsed["name"], "bolt");
        assert_eq!(parsed["unit"], "PCS");
    }

    #[test]
    fn test_parse_filters_rejects_unknown_field() {
        let err = parse_filters(EntityKind::Person, &["partNumber=7".to_string()]).unwrap_err();
        assert!(err.to_string().contains("'partNumber'"));

        let err = parse_filters(EntityKind::Import, &["status=DONE".to_string()]).unwrap_err();
        assert!(err.to_string().contains("import"));
    }

    #[test]
    fn test_parse_filters_requires_separator() {
        assert!(parse_filters(EntityKind::Product, &["name".to_string()]).is_err());
    }
}
