//! Key management commands

use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;
use serde_json::json;
use tracing::info;

use super::{Cli, Command};
use crate::config::AppConfig;
use crate::domain::api_key::{ApiKeyUpdate, Attributes, NewApiKey};
use crate::domain::rate_limit::RateLimitPolicy;
use crate::infrastructure::api_key::{ApiKeyManager, AuthOutcome};
use crate::infrastructure::logging;
use crate::infrastructure::storage::StoreFactory;

/// Rate limit flags shared by several commands
#[derive(Args, Clone, Debug, Default)]
pub struct RateLimitFlags {
    /// Window length in milliseconds
    #[arg(long)]
    pub window_ms: Option<u64>,

    /// Maximum requests per window
    #[arg(long)]
    pub max_requests: Option<u32>,
}

impl RateLimitFlags {
    /// The policy described by the flags, filling an omitted half from
    /// `fallback`
    pub fn policy(&self, fallback: &RateLimitPolicy) -> Option<RateLimitPolicy> {
        if self.window_ms.is_none() && self.max_requests.is_none() {
            return None;
        }

        Some(RateLimitPolicy::new(
            self.window_ms.unwrap_or(fallback.window_ms),
            self.max_requests.unwrap_or(fallback.max_requests),
        ))
    }
}

#[derive(Args, Clone, Debug)]
pub struct CreateArgs {
    #[arg(long)]
    pub owner: String,

    #[arg(long)]
    pub name: String,

    /// Permissions as a JSON object
    #[arg(long, value_parser = parse_attributes)]
    pub permissions: Option<Attributes>,

    /// Metadata as a JSON object
    #[arg(long, value_parser = parse_attributes)]
    pub metadata: Option<Attributes>,

    /// Expiry as an RFC 3339 timestamp
    #[arg(long)]
    pub expires_at: Option<DateTime<Utc>>,

    #[command(flatten)]
    pub rate_limit: RateLimitFlags,
}

#[derive(Args, Clone, Debug)]
pub struct ListArgs {
    #[arg(long)]
    pub owner: String,

    /// Include secrets in the output
    #[arg(long)]
    pub include_secret: bool,
}

#[derive(Args, Clone, Debug)]
pub struct GetArgs {
    #[arg(long)]
    pub id: String,

    /// Only show the key if it belongs to this owner
    #[arg(long)]
    pub owner: Option<String>,
}

#[derive(Args, Clone, Debug)]
pub struct UpdateArgs {
    #[arg(long)]
    pub id: String,

    #[arg(long)]
    pub owner: String,

    #[arg(long)]
    pub name: Option<String>,

    #[arg(long)]
    pub active: Option<bool>,

    #[arg(long, value_parser = parse_attributes)]
    pub permissions: Option<Attributes>,

    #[arg(long, value_parser = parse_attributes)]
    pub metadata: Option<Attributes>,

    #[arg(long, conflicts_with = "clear_expiration")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Remove the expiry
    #[arg(long)]
    pub clear_expiration: bool,

    #[command(flatten)]
    pub rate_limit: RateLimitFlags,

    /// Remove the key's own rate limit
    #[arg(long, conflicts_with_all = ["window_ms", "max_requests"])]
    pub clear_rate_limit: bool,
}

#[derive(Args, Clone, Debug)]
pub struct DeleteArgs {
    #[arg(long)]
    pub id: String,

    #[arg(long)]
    pub owner: String,
}

#[derive(Args, Clone, Debug)]
pub struct SecretArgs {
    #[arg(long)]
    pub secret: String,
}

#[derive(Args, Clone, Debug)]
pub struct RateLimitArgs {
    #[arg(long)]
    pub id: String,

    #[command(flatten)]
    pub rate_limit: RateLimitFlags,
}

fn parse_attributes(s: &str) -> Result<Attributes, String> {
    match serde_json::from_str::<serde_json::Value>(s) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(_) => Err("expected a JSON object".to_string()),
        Err(e) => Err(format!("invalid JSON: {}", e)),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

impl UpdateArgs {
    fn to_update(&self, fallback: &RateLimitPolicy) -> ApiKeyUpdate {
        let mut update = ApiKeyUpdate::new();

        if let Some(name) = &self.name {
            update = update.with_name(name);
        }
        if let Some(active) = self.active {
            update = update.with_active(active);
        }
        if let Some(permissions) = &self.permissions {
            update = update.with_permissions(permissions.clone());
        }
        if let Some(metadata) = &self.metadata {
            update = update.with_metadata(metadata.clone());
        }
        if self.clear_expiration {
            update = update.with_expiration(None);
        } else if let Some(expires_at) = self.expires_at {
            update = update.with_expiration(Some(expires_at));
        }
        if self.clear_rate_limit {
            update = update.with_rate_limit(None);
        } else if let Some(policy) = self.rate_limit.policy(fallback) {
            update = update.with_rate_limit(Some(policy));
        }

        update
    }
}

/// Load configuration, open the store and run one command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let mut config = AppConfig::load()?;
    logging::init_logging(&config.logging)?;

    if let Some(backend) = cli.backend {
        config.storage.backend = backend;
    }

    let store = StoreFactory::create(&config.storage.store_config()?).await?;
    let manager = ApiKeyManager::from_settings(store, &config.keys)?;

    execute(&manager, cli.command).await
}

/// Run one command against a manager
pub async fn execute(manager: &ApiKeyManager, command: Command) -> anyhow::Result<()> {
    let default_policy = *manager.default_rate_limit();

    match command {
        Command::Create(args) => {
            let mut new_key = NewApiKey::new(args.owner, args.name);
            new_key.permissions = args.permissions;
            new_key.metadata = args.metadata;
            new_key.expires_at = args.expires_at;
            new_key.rate_limit = args.rate_limit.policy(&default_policy);

            let created = manager.create_key(new_key).await?;
            info!(key_id = %created.id(), "Issued API key");
            print_json(&created)
        }
        Command::List(args) => {
            let keys = manager
                .list_keys_with_secrets(&args.owner, args.include_secret)
                .await?;
            print_json(&keys)
        }
        Command::Get(args) => {
            let key = manager.get_key_by_id(&args.id, args.owner.as_deref()).await?;
            print_json(&key)
        }
        Command::Update(args) => {
            let update = args.to_update(&default_policy);
            let updated = manager.update_key(&args.id, &args.owner, update).await?;
            print_json(&updated)
        }
        Command::Delete(args) => {
            let deleted = manager.delete_key(&args.id, &args.owner).await?;
            print_json(&json!({ "deleted": deleted }))
        }
        Command::Validate(args) => {
            let key = manager.validate_key(&args.secret).await?;
            print_json(&json!({ "valid": key.is_some(), "key": key }))
        }
        Command::Authenticate(args) => {
            let outcome = match manager.authenticate(&args.secret).await? {
                AuthOutcome::Unauthenticated => json!({ "outcome": "unauthenticated" }),
                AuthOutcome::RateLimited { key_id } => {
                    json!({ "outcome": "rate_limited", "key_id": key_id })
                }
                AuthOutcome::Authenticated(key) => {
                    json!({ "outcome": "authenticated", "key": key })
                }
            };
            print_json(&outcome)
        }
        Command::CheckRateLimit(args) => {
            let policy = args.rate_limit.policy(&default_policy);
            let allowed = manager.check_rate_limit(&args.id, policy.as_ref()).await?;
            print_json(&json!({ "allowed": allowed }))
        }
    }
}
