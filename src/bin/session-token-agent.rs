use std::path::Path;

use anyhow::Result;
use clap::Parser;
use session_token_cache::cache::observer::{ChannelObserver, TokenEvent};
use session_token_cache::cache::token_cache::{GetTokenOptions, TokenLifecycleCache};
use session_token_cache::config::loader::file_to_config;
use session_token_cache::server;
use session_token_cache::sources::http::HttpFetcher;
use session_token_cache::utils::channel;
use session_token_cache::utils::logging::{self, LogLevel};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, env = "CONFIG", default_value = "session-token-agent.yaml")]
    config: String,
    #[arg(long, env = "LOG_LEVEL", value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // -------------------------------
    // 1. Load YAML config, init logging
    // -------------------------------

    let args = Args::parse();
    let service_config = file_to_config(Path::new(&args.config)).await?;
    logging::run(&service_config, args.log_level);

    // -------------------------------
    // 2. Build fetcher and cache
    // -------------------------------

    let event_sender = channel::run();
    let fetcher = HttpFetcher::from_config(&service_config.backend)?;
    let cache = TokenLifecycleCache::builder(service_config.session.session_id.clone(), fetcher)
        .settings(&service_config.settings)
        .observer(ChannelObserver::new(event_sender.clone()))
        .build();

    let event_log = tokio::spawn(log_events(event_sender.subscribe()));

    // -------------------------------
    // 3. Warm the configured tokens
    // -------------------------------

    let organization = service_config.session.organization_id.clone();
    let templates = std::iter::once(None).chain(service_config.session.templates.iter().map(Some));
    for template in templates {
        let options = GetTokenOptions {
            template: template.cloned(),
            organization_id: organization.clone(),
            ..GetTokenOptions::default()
        };
        if let Err(e) = cache.get_token(options).await {
            warn!(template = ?template, error = %e, "initial token fetch failed");
        }
    }

    // -------------------------------
    // 4. Serve until ctrl-c
    // -------------------------------

    info!("Service starting...");
    tokio::select! {
        result = server::server::start(&service_config.settings, cache.clone()) => {
            if let Err(e) = result {
                error!(error = %e, "http server stopped");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
        }
    }

    cache.destroy();
    event_log.abort();
    Ok(())
}

async fn log_events(mut receiver: Receiver<TokenEvent>) {
    loop {
        match receiver.recv().await {
            Ok(TokenEvent::Resolved { token, key }) => {
                info!(cache_key = %key, exp = ?token.expires_at_secs(), "token resolved");
            }
            Ok(TokenEvent::Failed { error, key }) => {
                warn!(cache_key = %key, error = %error, "token fetch failed");
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "event log lagging behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
