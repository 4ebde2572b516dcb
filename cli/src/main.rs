mod terminal;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use reqwest::Url;
use serde_json::{Map, Value, json};
use smoketron::api::{DEFAULT_ALLIES_LIMIT, DEFAULT_ALLIES_PAGE};
use smoketron::timefmt::{DEFAULT_NEW_RECRUIT_DAYS, format_alien_time_str, is_new_recruit};
use smoketron::types::ActionResult;
use smoketron::url_params::{capture_referral, take_oauth_outcome};
use smoketron::{
    ApiClient, ApiError, AuthError, AuthManager, ClientConfig, FileStorage, SessionStore, StorageError, Verification,
};
use terminal::{TerminalNotices, TerminalWallet};
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("not signed in; run `smoketron login` first")]
    NotSignedIn,
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "smoketron", about = "$CIGAR Smoketron session and mission CLI")]
struct Cli {
    /// Overrides `SMOKETRON_API_BASE_URL`.
    #[arg(long)]
    base_url: Option<String>,

    #[arg(long, env = "SMOKETRON_STATE_DIR", default_value = ".smoketron")]
    state_dir: PathBuf,

    #[arg(long, env = "SMOKETRON_WALLET_ADDRESS")]
    wallet_address: Option<String>,

    /// Signer program; the message to sign is appended as the last argument.
    #[arg(long, env = "SMOKETRON_SIGN_COMMAND")]
    sign_command: Option<String>,

    /// Also print progress notices.
    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in with the configured wallet.
    Login,
    Logout,
    /// Validate the stored session and print the profile.
    Whoami,
    /// Print the X authorization URL to visit.
    LinkX,
    /// Handle a return URL carrying `ref` or X OAuth parameters.
    Open { url: String },
    Allies {
        #[arg(long, default_value_t = DEFAULT_ALLIES_PAGE)]
        page: u32,
        #[arg(long, default_value_t = DEFAULT_ALLIES_LIMIT)]
        limit: u32,
    },
    Missions,
    Badges,
    Summary,
    Complete {
        mission_id: String,
        /// Completion payload as a JSON object.
        #[arg(long)]
        data: Option<String>,
    },
    Checkin,
}

struct CliContext {
    api: Arc<ApiClient>,
    manager: AuthManager,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let ctx = build_context(&cli)?;
    match cli.command {
        Command::Login => run_login(&ctx).await,
        Command::Logout => {
            ctx.manager.logout();
            Ok(())
        }
        Command::Whoami => run_whoami(&ctx).await,
        Command::LinkX => run_link_x(&ctx).await,
        Command::Open { url } => run_open(&ctx, &url).await,
        Command::Allies { page, limit } => run_allies(&ctx, page, limit).await,
        Command::Missions => {
            require_session(&ctx).await?;
            let directives = guard(&ctx, ctx.api.mission_directives().await).await?;
            print_json(&serde_json::to_value(directives)?)
        }
        Command::Badges => {
            require_session(&ctx).await?;
            let badges = guard(&ctx, ctx.api.my_badges().await).await?;
            print_json(&serde_json::to_value(badges)?)
        }
        Command::Summary => run_summary(&ctx).await,
        Command::Complete { mission_id, data } => run_complete(&ctx, &mission_id, data.as_deref()).await,
        Command::Checkin => {
            require_session(&ctx).await?;
            let result = guard(&ctx, ctx.api.daily_checkin().await).await?;
            print_json(&action_json(result))
        }
    }
}

fn build_context(cli: &Cli) -> Result<CliContext, CliError> {
    let config = match &cli.base_url {
        Some(url) => ClientConfig { timeouts: ClientConfig::from_env().timeouts, ..ClientConfig::new(url) },
        None => ClientConfig::from_env(),
    };
    tracing::debug!(base_url = %config.base_url, state_dir = %cli.state_dir.display(), "starting");

    let api = Arc::new(ApiClient::new(&config)?);
    let store = SessionStore::new(Arc::new(FileStorage::open(&cli.state_dir)?));
    let wallet = Arc::new(TerminalWallet::new(cli.wallet_address.clone(), cli.sign_command.as_deref()));
    let notices = Arc::new(TerminalNotices::new(cli.verbose));
    let manager = AuthManager::new(api.clone(), wallet, store, notices);
    Ok(CliContext { api, manager })
}

async fn run_login(ctx: &CliContext) -> Result<(), CliError> {
    ctx.manager.initialize().await;
    let user = ctx.manager.connect_wallet().await?;
    print_json(&serde_json::to_value(user)?)
}

async fn run_whoami(ctx: &CliContext) -> Result<(), CliError> {
    ctx.manager.initialize().await;
    let session = ctx.manager.snapshot();
    let verified = session.verification() == Some(Verification::Verified);
    let authenticated = session.is_authenticated();
    let Some(user) = session.user.filter(|_| authenticated) else {
        return Err(CliError::NotSignedIn);
    };
    let mut value = serde_json::to_value(user)?;
    if let Some(obj) = value.as_object_mut() {
        obj.insert("verified".into(), Value::Bool(verified));
    }
    print_json(&value)
}

async fn run_link_x(ctx: &CliContext) -> Result<(), CliError> {
    ctx.manager.initialize().await;
    let url = ctx.manager.initiate_x_connect().await?;
    println!("{url}");
    Ok(())
}

/// Consume `ref` before the session is restored, then the X OAuth outcome
/// after, mirroring a page load of the returned URL.
async fn run_open(ctx: &CliContext, raw: &str) -> Result<(), CliError> {
    let url = Url::parse(raw).map_err(|e| CliError::InvalidUrl(format!("{raw}: {e}")))?;
    let url = capture_referral(&url, ctx.manager.store())?;
    ctx.manager.initialize().await;
    let (outcome, url) = take_oauth_outcome(&url);
    if let Some(outcome) = outcome {
        ctx.manager.complete_x_connect(&outcome).await;
    }
    println!("{url}");
    Ok(())
}

async fn run_allies(ctx: &CliContext, page: u32, limit: u32) -> Result<(), CliError> {
    require_session(ctx).await?;
    let response = guard(ctx, ctx.api.my_allies(page, limit).await).await?;
    let now = OffsetDateTime::now_utc();
    let mut value = serde_json::to_value(&response)?;
    if let Some(allies) = value.get_mut("allies").and_then(Value::as_array_mut) {
        for (ally, info) in allies.iter_mut().zip(&response.allies) {
            if let Some(obj) = ally.as_object_mut() {
                obj.insert("joinedAlien".into(), Value::String(format_alien_time_str(&info.joined_at)));
                obj.insert(
                    "newRecruit".into(),
                    Value::Bool(is_new_recruit(&info.joined_at, now, DEFAULT_NEW_RECRUIT_DAYS)),
                );
            }
        }
    }
    print_json(&value)
}

async fn run_summary(ctx: &CliContext) -> Result<(), CliError> {
    require_session(ctx).await?;
    let summary = ctx.api.mission_summary().await;
    let mut value = serde_json::to_value(summary)?;
    if let Some(obj) = value.as_object_mut() {
        obj.insert("progressPercent".into(), json!(summary.progress_percent()));
    }
    print_json(&value)
}

async fn run_complete(ctx: &CliContext, mission_id: &str, data: Option<&str>) -> Result<(), CliError> {
    let data = data.map(serde_json::from_str::<Value>).transpose()?;
    require_session(ctx).await?;
    let result = guard(ctx, ctx.api.complete_mission(mission_id, data.as_ref()).await).await?;
    print_json(&action_json(result))
}

async fn require_session(ctx: &CliContext) -> Result<(), CliError> {
    ctx.manager.initialize().await;
    if ctx.manager.is_authenticated() { Ok(()) } else { Err(CliError::NotSignedIn) }
}

/// A 401 on a feature call means the credential is dead; revalidating lets
/// the manager end the session consistently.
async fn guard<T>(ctx: &CliContext, result: Result<T, ApiError>) -> Result<T, CliError> {
    match result {
        Err(e) if e.is_unauthorized() => {
            ctx.manager.refresh_profile().await;
            Err(e.into())
        }
        other => other.map_err(CliError::from),
    }
}

fn action_json(result: ActionResult) -> Value {
    let mut obj: Map<String, Value> = result.extra;
    if let Some(message) = result.message {
        obj.insert("message".into(), Value::String(message));
    }
    Value::Object(obj)
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
