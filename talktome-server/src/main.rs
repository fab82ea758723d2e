use std::path::{Path, PathBuf};

use clap::Parser;
use dotenv::dotenv;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

mod context;
mod server;

use server::run_server;

const DEFAULT_LOG_FILTER: &str = concat!(
    "talktome=info,talktome_server=info,talktome_core=info,talktome_ai=info,",
    "hyper=warn,reqwest=warn"
);

/// Discord user ids allowed to run the quota administration commands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PowerUsers(pub Vec<u64>);

/// Accepts a JSON array (`[123, "456"]`) or a comma separated list.
fn parse_power_users(raw: &str) -> Result<PowerUsers, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(PowerUsers::default());
    }

    if trimmed.starts_with('[') {
        let values: Vec<serde_json::Value> =
            serde_json::from_str(trimmed).map_err(|e| format!("invalid power user list: {e}"))?;
        return values
            .iter()
            .map(|value| match value {
                serde_json::Value::Number(n) => {
                    n.as_u64().ok_or_else(|| format!("invalid user id: {n}"))
                }
                serde_json::Value::String(s) => {
                    s.trim().parse::<u64>().map_err(|_| format!("invalid user id: {s:?}"))
                }
                other => Err(format!("invalid user id: {other}")),
            })
            .collect::<Result<Vec<u64>, String>>()
            .map(PowerUsers);
    }

    trimmed
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<u64>().map_err(|_| format!("invalid user id: {part:?}")))
        .collect::<Result<Vec<u64>, String>>()
        .map(PowerUsers)
}

#[derive(Parser, Debug, Clone)]
#[command(name = "talktome")]
#[command(author, version, about = "talktome - Discord chat bot with per-channel token quotas")]
pub struct Args {
    /// Discord bot token.
    #[arg(long, env = "DISCORD_APP_TOKEN", hide_env_values = true)]
    pub discord_token: String,

    /// Bot name, used as the command prefix (`!{name}_...`) and as the
    /// author of the bot's own messages.
    #[arg(long, env = "DISCORD_BOT_NAME")]
    pub bot_name: String,

    /// Postgres connection URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://talktome@localhost:5432/talktome"
    )]
    pub database_url: String,

    #[arg(
        long,
        env = "DATABASE_MAX_CONNECTIONS",
        default_value_t = talktome_core::db::DEFAULT_MAX_CONNECTIONS,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub db_max_connections: u32,

    /// Keep token usage in memory instead of Postgres. Usage is lost on restart.
    #[arg(long, default_value = "false")]
    pub in_memory_ledger: bool,

    /// Default token budget per channel over the 24 hour window.
    #[arg(
        long,
        env = "DISCORD_TOKEN_USAGE_LIMIT",
        value_parser = clap::value_parser!(i64).range(0..)
    )]
    pub token_usage_limit: i64,

    /// Messages kept per channel as conversation context.
    #[arg(long, env = "CHANNEL_MESSAGE_HISTORY_LIMIT", default_value_t = 20)]
    pub history_limit: usize,

    #[arg(long, env = "POWER_USERS_IDS", default_value = "", value_parser = parse_power_users)]
    pub power_user_ids: PowerUsers,

    /// JSON file with the prompt texts.
    #[arg(long, env = "PROMPTS_JSON_PATH", default_value = "prompts.json")]
    pub prompts_path: PathBuf,

    /// "openai" or "anthropic".
    #[arg(long, env = "MODEL_PROVIDER", default_value = "openai")]
    pub model_provider: String,

    /// Chat model name; defaults to the provider's default model.
    #[arg(long, env = "MODEL_NAME")]
    pub model: Option<String>,

    /// Used for moderation, and for chat when the provider is OpenAI.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: String,

    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub anthropic_api_key: Option<String>,

    /// 0 disables the timeout.
    #[arg(long, env = "MODEL_TIMEOUT_SECS", default_value_t = 60)]
    pub model_timeout_secs: u64,

    /// 0 disables the timeout.
    #[arg(long, env = "MODERATION_TIMEOUT_SECS", default_value_t = 15)]
    pub moderation_timeout_secs: u64,

    #[arg(
        long,
        env = "PRUNE_INTERVAL_SECS",
        default_value_t = 3600,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub prune_interval_secs: u64,

    /// Do not load channel history from Discord when a channel's cache is empty.
    #[arg(long, default_value = "false")]
    pub no_history_backfill: bool,

    /// Guild to register the `/token_usage` slash command on. Registered
    /// globally when unset.
    #[arg(long, env = "TESTING_GUILD_ID")]
    pub command_guild_id: Option<u64>,

    /// Directory for the daily rotated log file.
    #[arg(long, env = "LOG_DIR", default_value = "logs")]
    pub log_dir: PathBuf,
}

/// Logs to stdout and to a daily rotated `talktome.log` in `log_dir`.
/// The returned guard flushes the file writer when dropped.
fn init_tracing(log_dir: &Path) -> Result<WorkerGuard, Box<dyn std::error::Error>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let file_appender = tracing_appender::rolling::daily(log_dir, "talktome.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .try_init()?;

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    let args = Args::parse();
    let _log_guard = init_tracing(&args.log_dir)?;

    info!(
        "talktome starting. bot_name={}, provider={}, history_limit={}, token_usage_limit={}",
        args.bot_name, args.model_provider, args.history_limit, args.token_usage_limit
    );

    if let Err(e) = run_server(args).await {
        error!("Server error: {:?}", e);
        return Err(e.into());
    }

    info!("Main finished. Goodbye!");
    Ok(())
}
