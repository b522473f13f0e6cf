use std::sync::Arc;

use anyhow::Context;
use campaign_sync::automation::ActiveCampaignClient;
use campaign_sync::config::SyncConfig;
use campaign_sync::mailer::PostmarkMailer;
use campaign_sync::notify::Notifications;
use campaign_sync::pipeline::{Orchestrator, OrchestratorDeps};
use campaign_sync::retry::RetryRunner;
use campaign_sync::routes::sync_routes;
use campaign_sync::scheduler;
use campaign_sync::store::AirtableStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = SyncConfig::from_env().context("Failed to load configuration")?;

    eprintln!("📬 campaign-sync v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Time zone: {}", config.pipeline.time_zone);
    eprintln!(
        "   Retry: {} delays, {}",
        config.retry.delays.len(),
        if config.retry.capped { "capped" } else { "uncapped" }
    );
    eprintln!(
        "   Slack: {}",
        if config.slack.webhook_url.is_some() { "enabled" } else { "log only" }
    );

    let notifications = Notifications::from_config(&config.slack);
    let retry = RetryRunner::new(config.retry.clone(), notifications.clone());

    let store = AirtableStore::new(config.airtable).context("Failed to build record store client")?;
    let source = ActiveCampaignClient::new(config.activecampaign, retry.clone())
        .context("Failed to build automation client")?;
    let mailer = PostmarkMailer::new(config.postmark).context("Failed to build mail client")?;
    let sender = mailer.sender();

    let orchestrator = Arc::new(Orchestrator::new(
        OrchestratorDeps {
            store: Arc::new(store),
            source: Arc::new(source),
            mailer: Arc::new(mailer),
            sender,
            notifications,
            retry,
        },
        config.pipeline,
    ));

    match &config.server.schedule {
        Some(expr) => {
            let schedule = scheduler::parse_schedule(expr)?;
            let _ticker = scheduler::spawn_cron_ticker(Arc::clone(&orchestrator), schedule);
            eprintln!("   Schedule: {expr}");
        }
        None => eprintln!("   Schedule: off (HTTP triggers only)"),
    }

    let port = config.server.port;
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;
    eprintln!("   Triggers: http://0.0.0.0:{port}/ping\n");
    tracing::info!(port, "Trigger server started");

    axum::serve(listener, sync_routes(orchestrator)).await?;
    Ok(())
}
