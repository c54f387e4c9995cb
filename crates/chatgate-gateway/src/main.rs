//! Chatgate Gateway - Entry Point

use std::sync::Arc;

use chatgate_gateway::{
    build_routes, metrics, AppState, CompletionProxy, GatewayConfig, GATEWAY_VERSION,
};
use chatgate_runtime::OpenAIClient;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = GatewayConfig::parse();

    init_tracing(config.log_json);

    tracing::info!("Starting Chatgate Gateway v{}", GATEWAY_VERSION);
    metrics::init_metrics();

    let state = match config.api_key() {
        Some(api_key) => {
            let mut client =
                OpenAIClient::new(api_key, &config.openai_api_base, config.connect_timeout())?;
            if let Some(org) = &config.openai_organization {
                client = client.with_organization(org);
            }
            let client = Arc::new(client);

            let settings = config.proxy_settings();
            let budget = config.token_budget()?;
            tracing::info!(
                model = %settings.model,
                token_counter = ?config.token_counter,
                reserved_completion_tokens = settings.reserved_completion_tokens,
                init_messages = settings.init_messages.len(),
                upstream = %config.openai_api_base,
                "Completion proxy configured"
            );

            let proxy = CompletionProxy::new(client.clone(), client, budget, settings);
            AppState::new(Arc::new(proxy))
        }
        None => {
            tracing::error!(
                "OPENAI_API_KEY is not set; every chat request will fail until it is configured"
            );
            AppState::without_credential()
        }
    };

    let app = build_routes(state).layer(TraceLayer::new_for_http());

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn init_tracing(json: bool) {
    let registry = tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| {
            "chatgate_gateway=debug,chatgate_context=debug,chatgate_runtime=debug,tower_http=debug"
                .into()
        }),
    ));

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
