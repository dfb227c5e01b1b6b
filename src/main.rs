use thread_relay::assistant::OpenAiThreadsClient;
use thread_relay::comm::Relay;
use thread_relay::config::{self, Credentials, DeliveryMode, Profile};
use thread_relay::engine::TurnEngine;
use thread_relay::gateway::{self, GatewayConfig};
use thread_relay::session::MemorySessionStore;
use thread_relay::telegram::{self, BotApi};

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Pause before restarting a crashed delivery loop.
const RESTART_DELAY: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "thread-relay", version, about = "Telegram relay for OpenAI assistant threads")]
struct Cli {
    /// Path to the bot profile (YAML); built-in defaults when omitted
    #[arg(short, long)]
    profile: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Pull updates with long polling
    Poll,
    /// Serve a webhook endpoint and register it with Telegram
    Webhook {
        /// Route the platform posts updates to
        #[arg(long, default_value = config::DEFAULT_WEBHOOK_PATH)]
        path: String,
    },
    /// Validate configuration and print the resolved profile
    Check,
}

/// Resolved delivery plan, decided once before the supervision loop.
enum Plan {
    Poll,
    Webhook { url: String, gateway: GatewayConfig },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    {
        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;

        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let cli = Cli::parse();

    let profile = Profile::load_or_default(cli.profile.as_deref()).await?;
    let creds = Credentials::from_env().context("load credentials")?;
    info!(?creds, "configuration loaded");

    let plan = match cli.command {
        Some(Command::Check) => {
            println!("{}", serde_yaml_ng::to_string(&profile)?);
            println!("delivery: {:?}", DeliveryMode::infer(&creds));
            return Ok(());
        }
        Some(Command::Poll) => Plan::Poll,
        Some(Command::Webhook { path }) => webhook_plan(&creds, path)?,
        None => match DeliveryMode::infer(&creds) {
            DeliveryMode::Poll => Plan::Poll,
            DeliveryMode::Webhook => webhook_plan(&creds, config::DEFAULT_WEBHOOK_PATH.into())?,
        },
    };

    let client = OpenAiThreadsClient::new(&creds.openai_api_key, &creds.openai_base_url)
        .context("build assistant client")?;
    let engine = TurnEngine::new(
        Arc::new(client),
        Arc::new(MemorySessionStore::new()),
        &creds.assistant_id,
        profile,
    );
    let api = Arc::new(
        BotApi::new(&creds.telegram_token, &creds.telegram_api_url)
            .context("build Bot API client")?,
    );
    let relay = Arc::new(Relay::new(Arc::new(engine), api.clone()));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received Ctrl-C, shutting down…");
                cancel.cancel();
            }
        });
    }

    // Supervision: restart delivery after unexpected failures.  Sessions
    // survive because the relay is built once above.
    loop {
        match serve(&plan, api.clone(), relay.clone(), cancel.clone()).await {
            Ok(()) => break,
            Err(e) => {
                error!(error = %format!("{e:#}"), "delivery loop failed");
                if cancel.is_cancelled() {
                    break;
                }
                info!(delay_secs = RESTART_DELAY.as_secs(), "restarting delivery loop");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(RESTART_DELAY) => {}
                }
            }
        }
    }

    info!("shutdown complete");
    Ok(())
}

fn webhook_plan(creds: &Credentials, path: String) -> anyhow::Result<Plan> {
    let url = creds
        .webhook_url(&path)
        .context("WEBHOOK_HOST must be set for webhook delivery")?;
    Ok(Plan::Webhook {
        url,
        gateway: GatewayConfig {
            addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, creds.port)),
            path,
            secret: creds.webhook_secret.clone(),
        },
    })
}

async fn serve(
    plan: &Plan,
    api: Arc<BotApi>,
    relay: Arc<Relay>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    match plan {
        Plan::Poll => telegram::polling::run(api, relay, cancel)
            .await
            .context("long polling"),
        Plan::Webhook { url, gateway: cfg } => {
            let gw = gateway::start_gateway(cfg.clone(), relay, cancel.clone()).await?;
            if let Err(e) = api.set_webhook(url, cfg.secret.as_deref()).await {
                gw.handle.abort();
                return Err(e).context("register webhook");
            }
            gw.handle.await.context("gateway task panicked")?;
            anyhow::ensure!(cancel.is_cancelled(), "gateway stopped unexpectedly");
            Ok(())
        }
    }
}
