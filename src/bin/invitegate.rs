//! invitegate CLI: run the service or operate on invite requests.

use invitegate::config::Config;
use invitegate::db::Db;
use invitegate::engine::{ControlConfig, ControlPlane};
use invitegate::intake::Intake;
use invitegate::model::{NewInviteRequest, RequestId, RequestStatus};
use invitegate::notify::HttpNotifier;
use invitegate::provider::BotApiProvider;
use invitegate::queue::WORK_QUEUE;
use invitegate::server::{AppState, build_router};
use invitegate::telemetry::{TelemetryConfig, init_telemetry};
use invitegate::webhook::WebhookHandler;
use invitegate::worker::{Worker, WorkerConfig};
use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "invitegate", about = "Single-use invite issuance and join confirmation")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server and the queue worker
    Serve,
    /// Invite request operations
    Request {
        #[command(subcommand)]
        action: RequestAction,
    },
}

#[derive(Subcommand)]
enum RequestAction {
    /// Queue a new invite request
    Submit {
        /// Requesting user identity
        user_id: String,
        /// External correlation identifier
        #[arg(long)]
        correlation_id: Option<String>,
    },
    /// List recent requests
    List {
        /// Filter by status
        #[arg(long)]
        status: Option<String>,
        /// Maximum items to show
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Show one request
    Show {
        /// Request ID (full UUID)
        id: String,
    },
    /// Schedule another delivery for a stuck request
    Requeue {
        /// Request ID (full UUID)
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Serve => cmd_serve(config).await,
        Command::Request { action } => {
            let db = connect(&config).await?;
            match action {
                RequestAction::Submit {
                    user_id,
                    correlation_id,
                } => cmd_submit(db, user_id, correlation_id).await,
                RequestAction::List { status, limit } => cmd_list(&db, status, limit).await,
                RequestAction::Show { id } => cmd_show(db, id).await,
                RequestAction::Requeue { id } => cmd_requeue(db, id).await,
            }
        }
    }
}

async fn connect(config: &Config) -> anyhow::Result<Arc<Db>> {
    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;
    db.create_queue(WORK_QUEUE).await?;
    Ok(Arc::new(db))
}

async fn cmd_serve(config: Config) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "invitegate".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let db = connect(&config).await?;
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;

    let provider = Arc::new(BotApiProvider::new(
        http.clone(),
        config.provider.base_url.clone(),
        config.provider.token.clone(),
        config.provider.chat_id.clone(),
    ));
    let notifier = Arc::new(HttpNotifier::new(
        http,
        config.notify.url.clone(),
        config.notify.api_key.clone(),
    ));

    let worker = Worker::new(
        db.clone(),
        db.clone(),
        db.clone(),
        provider,
        notifier.clone(),
        WorkerConfig {
            retry: config.retry,
            invite_ttl: config.provider.invite_ttl,
        },
    );
    let control = ControlPlane::new(
        db.clone(),
        worker,
        ControlConfig {
            visibility_timeout: config.visibility_timeout_secs,
            concurrency: config.worker_concurrency,
            ..ControlConfig::default()
        },
    );

    let app_state = AppState::new(
        Intake::new(db.clone(), db.clone()),
        db.clone(),
        WebhookHandler::new(db.clone(), db.clone(), notifier, config.notify.on_join),
        config.api_secret.clone(),
    );
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!(addr = %config.listen_addr, "listening");

    let ctrl = control.clone();
    let worker_task = tokio::spawn(async move { ctrl.run().await });

    axum::serve(listener, build_router(app_state))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    control.shutdown();
    worker_task.await??;
    Ok(())
}

async fn cmd_submit(
    db: Arc<Db>,
    user_id: String,
    correlation_id: Option<String>,
) -> anyhow::Result<()> {
    let mut new = NewInviteRequest::new(user_id);
    if let Some(id) = correlation_id {
        new = new.correlation_id(id);
    }
    let request = Intake::new(db.clone(), db).submit(new).await?;
    println!("Queued: {} (status: {})", request.id, request.status);
    Ok(())
}

async fn cmd_list(db: &Db, status: Option<String>, limit: i64) -> anyhow::Result<()> {
    let status: Option<RequestStatus> = status.map(|s| s.parse()).transpose()?;
    let requests = db.list_requests(status, limit).await?;

    if requests.is_empty() {
        println!("No requests found.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<10}  {:<4}  {:<6}  {:<20}  CREATED",
        "ID", "STATUS", "TRY", "JOINED", "USER"
    );
    println!("{}", "-".repeat(100));
    for r in &requests {
        println!(
            "{:<36}  {:<10}  {:<4}  {:<6}  {:<20}  {}",
            r.id,
            r.status,
            r.attempts,
            if r.joined { "yes" } else { "no" },
            r.user_id.chars().take(20).collect::<String>(),
            r.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    println!("\n{} request(s)", requests.len());
    Ok(())
}

async fn cmd_show(db: Arc<Db>, id: String) -> anyhow::Result<()> {
    use invitegate::store::RequestStore as _;

    let id: RequestId = id.parse()?;
    let r = db
        .get_request(id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("no request {id}"))?;

    println!("ID:          {}", r.id);
    println!("User:        {}", r.user_id);
    println!("Correlation: {}", r.correlation_id.as_deref().unwrap_or("-"));
    println!("Status:      {}", r.status);
    println!("Attempts:    {}", r.attempts);
    println!("Invite:      {}", r.invite_link.as_deref().unwrap_or("-"));
    println!("Notified:    {}", r.created_notified);
    println!("Joined:      {}", r.joined);
    println!("Member:      {}", r.member_id.as_deref().unwrap_or("-"));
    if let Some(at) = r.joined_at {
        println!("Joined At:   {at}");
    }
    if let Some(ref err) = r.last_error {
        println!("Last Error:  {err}");
    }
    println!("Created:     {}", r.created_at);
    println!("Updated:     {}", r.updated_at);
    Ok(())
}

async fn cmd_requeue(db: Arc<Db>, id: String) -> anyhow::Result<()> {
    let id: RequestId = id.parse()?;
    let request = Intake::new(db.clone(), db).requeue(id).await?;
    println!("Rescheduled: {} (status: {})", request.id, request.status);
    Ok(())
}
