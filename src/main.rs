use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};
use wecom_gateway::client::{build_http_client, ApiClient, RetryPolicy};
use wecom_gateway::config::{load_config, GatewayConfig};
use wecom_gateway::outbound::Messenger;
use wecom_gateway::token::{HttpTokenSource, TokenStore};
use wecom_gateway::webhook::{create_webhook_router, LoggingDispatcher, WebhookState};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wecom_gateway=info".into()),
        )
        .init();

    info!("WeCom gateway starting...");

    // Config file is optional; environment overrides it
    let config_path = std::env::var("WECOM_GATEWAY_CONFIG")
        .unwrap_or_else(|_| "wecom-gateway.toml".to_string());
    let mut config = if std::path::Path::new(&config_path).exists() {
        load_config(&config_path)?
    } else {
        info!(path = %config_path, "Config file not found, using defaults");
        GatewayConfig::default()
    };
    config.apply_env_overrides();

    let scope = config
        .wecom
        .resolve_scope()
        .context("WeCom credentials are incomplete")?;

    info!(
        corp_id = %scope.corp_id,
        agent_id = scope.agent_id,
        api_base = %config.client.base_url,
        webhook_port = config.webhook.port,
        webhook_path = %config.webhook.path,
        "Configuration loaded"
    );

    // Outbound stack: shared HTTP client, token cache, resilient invoker
    let http_client =
        build_http_client(&config.client).context("Failed to build HTTP client")?;
    let token_source = Arc::new(HttpTokenSource::new(
        http_client.clone(),
        config.client.base_url.clone(),
    ));
    let tokens = Arc::new(TokenStore::new(token_source));
    let api_client = Arc::new(ApiClient::new(
        http_client,
        config.client.base_url.clone(),
        Arc::clone(&tokens),
        RetryPolicy::from(&config.client),
    ));
    let messenger = Messenger::new(api_client, scope);

    let probe = messenger.probe().await;
    if probe.ok {
        info!("Credential probe succeeded");
    } else {
        warn!(error = ?probe.error, "Credential probe failed, continuing");
    }

    // Webhook listener
    let secrets = config.wecom.callback_secrets();
    if secrets.token.is_none() {
        warn!("No callback token configured, webhook signatures will not be verified");
    }
    let state = WebhookState::from_secrets(&secrets, Arc::new(LoggingDispatcher))
        .context("Invalid callback secrets")?;
    let router = create_webhook_router(&config.webhook.path, state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.webhook.port))
        .await
        .context("Failed to bind webhook port")?;
    info!(port = config.webhook.port, "Webhook listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "Webhook server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    tokens.clear();
    info!("WeCom gateway stopped");

    Ok(())
}
