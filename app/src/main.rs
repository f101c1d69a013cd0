use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use directories::ProjectDirs;
use serde::Serialize;
use serde_json::json;

use modelhub_core::api::v1::{self, ApiState, ModelInput, ProviderInput};
use modelhub_core::clients::OpenAiClientFactory;
use modelhub_core::codec::AesGcmCodec;
use modelhub_core::db::{init_db, DbPool};
use modelhub_core::registry::seed::seed_defaults;
use modelhub_core::registry::ModelType;
use modelhub_core::ModelManager;

/// Manage model providers, their models and the active chat/embedding selection.
#[derive(Parser, Debug)]
#[command(name = "modelhub", version, about)]
struct Cli {
    /// Directory holding modelhub.db.
    #[arg(long, global = true, env = "MODELHUB_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Passphrase the API-key encryption key is derived from.
    #[arg(long, global = true, env = "MODELHUB_SECRET_KEY", hide_env_values = true)]
    secret_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the database and seed the built-in providers.
    Init,
    #[command(subcommand)]
    Providers(ProviderCommand),
    #[command(subcommand)]
    Models(ModelCommand),
    /// Select the active model for a model type.
    Select {
        model_type: ModelType,
        provider_id: String,
        model_id: String,
    },
    /// Show the resolved chat and embedding models.
    Selection,
    /// Build a client for the active model and list what the upstream serves.
    Check {
        model_type: ModelType,
        /// Use this provider's default model instead of the selection.
        #[arg(long)]
        provider: Option<String>,
    },
    /// Show recent audit events of a module.
    Events {
        #[arg(default_value = "providers")]
        module: String,
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Subcommand, Debug)]
enum ProviderCommand {
    List {
        /// Include inactive providers.
        #[arg(long)]
        all: bool,
    },
    Add(AddProvider),
    Remove { id: String },
}

#[derive(Args, Debug)]
struct AddProvider {
    /// Lowercase slug, unique across providers.
    #[arg(long)]
    name: String,
    #[arg(long)]
    display_name: String,
    #[arg(long)]
    base_url: Option<String>,
    #[arg(long, env = "MODELHUB_PROVIDER_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    /// The provider accepts requests without an API key.
    #[arg(long)]
    no_key: bool,
    #[arg(long, default_value = "openai_compatible")]
    provider_type: String,
    #[arg(long)]
    description: Option<String>,
}

#[derive(Subcommand, Debug)]
enum ModelCommand {
    List {
        provider_id: String,
        #[arg(long = "type")]
        model_type: Option<ModelType>,
        #[arg(long)]
        all: bool,
    },
    Add(AddModel),
    Remove { provider_id: String, id: String },
}

#[derive(Args, Debug)]
struct AddModel {
    provider_id: String,
    /// Identifier the provider's API expects.
    #[arg(long)]
    model_id: String,
    #[arg(long)]
    name: String,
    #[arg(long = "type")]
    model_type: ModelType,
    #[arg(long)]
    default: bool,
    #[arg(long)]
    max_tokens: Option<i64>,
    #[arg(long)]
    description: Option<String>,
}

fn workspace_dir(cli: &Cli) -> PathBuf {
    if let Some(dir) = &cli.workspace {
        return dir.clone();
    }
    if let Some(proj) = ProjectDirs::from("com", "ModelHub", "ModelHub") {
        proj.data_dir().to_path_buf()
    } else {
        std::env::temp_dir().join("ModelHub")
    }
}

fn init_logging() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))
        .context("failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
    Ok(())
}

fn print<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn manager(cli: &Cli, pool: DbPool) -> Result<Arc<ModelManager>> {
    let secret = cli
        .secret_key
        .as_deref()
        .filter(|s| !s.is_empty())
        .context("a secret key is required: pass --secret-key or set MODELHUB_SECRET_KEY")?;
    let codec = Arc::new(AesGcmCodec::from_passphrase(secret));
    Ok(ModelManager::with_sqlite_settings(pool, codec))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging()?;

    let workspace = workspace_dir(&cli);
    let pool = init_db(workspace.clone())
        .with_context(|| format!("failed to open database in {}", workspace.display()))?;
    let manager = manager(&cli, pool)?;
    let state = ApiState::new(manager.clone());

    match cli.command {
        Commands::Init => {
            let conn = manager.pool().get().context("failed to get a connection")?;
            let seeded = seed_defaults(&conn, manager.codec()).context("failed to seed providers")?;
            print(&json!({ "workspace": workspace, "seeded_providers": seeded }))?;
        }
        Commands::Providers(ProviderCommand::List { all }) => {
            print(&v1::providers_list(&state, all)?)?;
        }
        Commands::Providers(ProviderCommand::Add(add)) => {
            let input = ProviderInput {
                name: add.name,
                display_name: add.display_name,
                base_url: add.base_url,
                api_key: add.api_key,
                requires_api_key: !add.no_key,
                is_active: true,
                provider_type: add.provider_type,
                description: add.description,
                configuration: Default::default(),
            };
            print(&v1::providers_create(&state, input)?)?;
        }
        Commands::Providers(ProviderCommand::Remove { id }) => {
            v1::providers_delete(&state, &id)?;
            print(&json!({ "deleted": id }))?;
        }
        Commands::Models(ModelCommand::List {
            provider_id,
            model_type,
            all,
        }) => {
            let model_type = model_type.map(|t| t.as_str());
            print(&v1::models_list(&state, &provider_id, model_type, all)?)?;
        }
        Commands::Models(ModelCommand::Add(add)) => {
            let input = ModelInput {
                model_id: add.model_id,
                model_name: add.name,
                model_type: add.model_type.to_string(),
                is_default: add.default,
                is_active: true,
                max_tokens: add.max_tokens,
                cost_per_token_input: None,
                cost_per_token_output: None,
                description: add.description,
                configuration: Default::default(),
            };
            print(&v1::models_create(&state, &add.provider_id, input)?)?;
        }
        Commands::Models(ModelCommand::Remove { provider_id, id }) => {
            v1::models_delete(&state, &provider_id, &id)?;
            print(&json!({ "deleted": id }))?;
        }
        Commands::Select {
            model_type,
            provider_id,
            model_id,
        } => {
            if !manager.set_selected(model_type, &provider_id, &model_id) {
                anyhow::bail!("failed to store the {model_type} selection");
            }
            print(&manager.active_provider_info(model_type))?;
        }
        Commands::Selection => {
            print(&v1::selection_current(&state))?;
        }
        Commands::Check { model_type, provider } => {
            let factory = OpenAiClientFactory::default();
            let (client, info) = manager.get_client(&factory, model_type, provider.as_deref())?;
            let upstream = client
                .list_models()
                .await
                .with_context(|| format!("upstream {} is unreachable", client.base_url()))?;
            print(&json!({
                "model": info,
                "base_url": client.base_url(),
                "served": upstream.contains(&info.model_id),
                "upstream_models": upstream,
            }))?;
        }
        Commands::Events { module, limit } => {
            print(&v1::events_list(&state, &module, limit)?)?;
        }
    }
    Ok(())
}
