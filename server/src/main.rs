//! codereview binary — thin CLI shell over the [`codereview_server`] library crate.

use axum::routing::{get, post};
use axum::Router;
use clap::{Parser, Subcommand};
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use codereview_server::ai_client::{build_http_client, AiClient, AnthropicMessagesClient, OpenAiCompatClient};
use codereview_server::api;
use codereview_server::config::PipelineConfig;
use codereview_server::error::AppError;
use codereview_server::types::AppContext;
use codereview_server::{acquirer::RepositoryAcquirer, orchestrator};

/// Clones a repository, chunks and scores it with an AI pipeline, and serves
/// the result over HTTP.
#[derive(Parser)]
#[command(name = "codereview", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Project directory to load `.codereview.toml` from (default: current directory)
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Token counter: bytes-estimate (default) or tiktoken
    #[arg(long, default_value = "bytes-estimate")]
    tokenizer: String,

    /// Bind to 0.0.0.0 instead of 127.0.0.1 (localhost)
    #[arg(long)]
    bind_all: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP façade (default action if no subcommand is given)
    Serve,
    /// Score a single repository one-shot, printing the final report as JSON
    Score {
        /// Repository URL to clone and score
        repo_url: String,
    },
}

fn build_one_client(provider: &str, api_key: String, http: reqwest::Client) -> Result<Arc<dyn AiClient>, AppError> {
    match provider {
        "openai" => Ok(Arc::new(OpenAiCompatClient::new(http, "https://api.openai.com/v1", api_key))),
        "anthropic" => Ok(Arc::new(AnthropicMessagesClient::new(http, "https://api.anthropic.com/v1", api_key))),
        other => Err(AppError::Config(format!(
            "unsupported AI provider {other:?} (expected \"openai\" or \"anthropic\")"
        ))),
    }
}

fn build_ai_clients(cfg: &PipelineConfig) -> Result<(Arc<dyn AiClient>, Arc<dyn AiClient>), AppError> {
    let http = build_http_client(cfg.ai_timeout_ms);

    let scoring_key = std::env::var("CODEREVIEW_SCORING_API_KEY").unwrap_or_default();
    let scoring = build_one_client(&cfg.scoring_provider, scoring_key, http.clone())?;

    let review_key = std::env::var("CODEREVIEW_REVIEW_API_KEY").unwrap_or_default();
    let review = build_one_client(&cfg.review_provider, review_key, http)?;

    Ok((scoring, review))
}

fn build_context(cli: &Cli) -> Result<AppContext, AppError> {
    let dir = cli.config_dir.clone().unwrap_or_else(|| std::env::current_dir().unwrap_or_default());
    let config = PipelineConfig::load(&dir);
    let tokenizer = codereview_core::tokenizer::create_tokenizer(&cli.tokenizer);
    let language_registry = Arc::new(codereview_core::language::LanguageRegistry::new(config.force_simple_strategy));
    let acquirer = Arc::new(RepositoryAcquirer::new(config.cache_root.clone()));
    let (scoring_client, review_client) = build_ai_clients(&config)?;

    Ok(AppContext {
        config: Arc::new(config),
        tokenizer,
        language_registry,
        acquirer,
        scoring_client,
        review_client,
        runs: Arc::new(DashMap::new()),
        start_time: std::time::Instant::now(),
    })
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("received SIGINT, shutting down..."),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down..."),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl+C");
        info!("received Ctrl+C, shutting down...");
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("codereview=info".parse().unwrap()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    if let Some(Commands::Score { repo_url }) = &cli.command {
        let ctx = build_context(&cli).unwrap_or_else(|e| {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        });
        let (run_id, all_files) = orchestrator::start(ctx.clone(), None, repo_url.clone(), None)
            .await
            .unwrap_or_else(|e| {
                eprintln!("could not start run: {e}");
                std::process::exit(1);
            });
        info!(run_id = run_id.as_str(), file_count = all_files.len(), "scoring run started");
        loop {
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            let Ok(view) = orchestrator::status(&ctx, &run_id) else { break };
            match view.status {
                codereview_core::model::RunStatus::Complete => {
                    println!("{}", serde_json::to_string_pretty(&view.report).unwrap_or_default());
                    return;
                }
                codereview_core::model::RunStatus::Error => {
                    eprintln!("scoring run failed: {}", view.error.unwrap_or_default());
                    std::process::exit(1);
                }
                _ => continue,
            }
        }
        return;
    }

    let ctx = build_context(&cli).unwrap_or_else(|e| {
        error!(error = %e, "configuration error");
        eprintln!("configuration error: {e}");
        std::process::exit(1);
    });

    let app = Router::new()
        .route("/health", get(api::health))
        .route("/analysis", post(api::start_analysis))
        .route("/analysis/{run_id}/status", get(api::analysis_status))
        .route("/analysis/{run_id}/score-file", post(api::score_file))
        .route("/analysis/{run_id}/file-content", get(api::file_content))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(ctx);

    let bind_addr = if cli.bind_all { "0.0.0.0" } else { "127.0.0.1" };
    let explicit_port: Option<u16> = std::env::var("PORT").ok().and_then(|p| p.parse().ok());

    let listener = if let Some(port) = explicit_port {
        tokio::net::TcpListener::bind(format!("{bind_addr}:{port}")).await.unwrap_or_else(|e| {
            error!(port = port, error = %e, "could not bind to port");
            eprintln!("  PORT={port} was set explicitly. Choose a different port.");
            std::process::exit(1);
        })
    } else {
        const BASE: u16 = 8732;
        const RANGE: u16 = 10;
        let mut found = None;
        for port in BASE..BASE + RANGE {
            if let Ok(l) = tokio::net::TcpListener::bind(format!("{bind_addr}:{port}")).await {
                found = Some(l);
                break;
            }
        }
        found.unwrap_or_else(|| {
            error!(range_start = BASE, range_end = BASE + RANGE - 1, "no free port found");
            eprintln!("  Try: PORT=<port> codereview");
            std::process::exit(1);
        })
    };

    let port = listener.local_addr().unwrap().port();
    info!(port = port, "http://localhost:{port}");
    eprintln!("CODEREVIEW_PORT={port}");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await.unwrap();
}
