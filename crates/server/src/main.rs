//! myna server entry point

use clap::Parser;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use myna_config::{load_settings, Settings};
use myna_pipeline::{ContextGraph, OnnxExecutor, UnitDict};
use myna_server::{create_router, AppState};

/// Streaming speech recognition server
#[derive(Parser, Debug)]
#[command(name = "myna-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration environment (loads config/{env}.yaml)
    #[arg(long, env = "MYNA_ENV")]
    env: Option<String>,

    /// Listen port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Intra-op inference threads (overrides config)
    #[arg(long = "num_threads")]
    num_threads: Option<usize>,

    /// Model directory (overrides config)
    #[arg(long = "model_path")]
    model_path: Option<String>,

    /// Unit dictionary path (overrides config)
    #[arg(long = "dict_path")]
    dict_path: Option<String>,

    /// Context phrase list, one phrase per line (overrides config)
    #[arg(long = "context_path")]
    context_path: Option<String>,

    /// Score bonus per matched context token (overrides config)
    #[arg(long = "context_score")]
    context_score: Option<f32>,

    /// Hypotheses returned per utterance (overrides config)
    #[arg(long)]
    nbest: Option<usize>,

    /// Attach word-level timestamps to results
    #[arg(long)]
    timestamp: bool,

    /// Rearm for the next utterance after every endpoint
    #[arg(long = "continuous_decoding")]
    continuous_decoding: bool,

    /// Encoder chunk size in subsampled frames (overrides config)
    #[arg(long = "chunk_size")]
    chunk_size: Option<usize>,
}

impl Args {
    fn apply(&self, settings: &mut Settings) {
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(num_threads) = self.num_threads {
            settings.server.num_threads = num_threads;
        }
        if let Some(model_path) = &self.model_path {
            settings.model.model_path = model_path.clone();
        }
        if let Some(dict_path) = &self.dict_path {
            settings.model.dict_path = dict_path.clone();
        }
        if let Some(context_path) = &self.context_path {
            settings.decode.context_path = Some(context_path.clone());
        }
        if let Some(context_score) = self.context_score {
            settings.decode.context_score = context_score;
        }
        if let Some(nbest) = self.nbest {
            settings.decode.nbest = nbest;
        }
        if self.timestamp {
            settings.decode.timestamp = true;
        }
        if self.continuous_decoding {
            settings.decode.continuous_decoding = true;
        }
        if let Some(chunk_size) = self.chunk_size {
            settings.decode.chunk_size = chunk_size;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            use clap::error::ErrorKind;
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(1),
            };
        }
    };

    // Priority: CLI flags > env vars > config/{env}.yaml > config/default.yaml
    let mut settings = match load_settings(args.env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::from(1);
        }
    };
    args.apply(&mut settings);
    if let Err(e) = settings.validate() {
        eprintln!("Invalid configuration: {}", e);
        return ExitCode::from(1);
    }
    if settings.model.model_path.is_empty() || settings.model.dict_path.is_empty() {
        eprintln!("--model_path and --dict_path are required");
        return ExitCode::from(1);
    }

    init_tracing(&settings);
    tracing::info!("Starting myna server v{}", env!("CARGO_PKG_VERSION"));

    // Shared inference resources, loaded once and read-shared by sessions.
    // The inference thread pool is sized here and never reconfigured.
    let executor = match OnnxExecutor::new(&settings.model.model_path, settings.server.num_threads)
    {
        Ok(executor) => Arc::new(executor),
        Err(e) => {
            tracing::error!(error = %e, "Failed to load model");
            return ExitCode::from(2);
        }
    };

    let dict = match UnitDict::load(&settings.model.dict_path) {
        Ok(dict) => Arc::new(dict),
        Err(e) => {
            tracing::error!(error = %e, "Failed to load dictionary");
            return ExitCode::from(2);
        }
    };

    let context_graph = match &settings.decode.context_path {
        Some(path) => {
            match ContextGraph::load(path, &dict, settings.decode.context_score) {
                Ok(graph) => Some(Arc::new(graph)),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to load context phrases");
                    return ExitCode::from(2);
                }
            }
        }
        None => None,
    };

    let port = settings.server.port;
    let state = AppState::new(executor, dict, context_graph, settings);
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, addr = %addr, "Failed to bind");
            return ExitCode::from(1);
        }
    };
    tracing::info!("Listening on {}", addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server error");
        return ExitCode::from(1);
    }

    tracing::info!("Server shutdown complete");
    ExitCode::SUCCESS
}

/// Resolve once the process is asked to stop.
///
/// Stopping the accept loop is enough for a clean exit: each session's
/// decode worker observes its stop flag when the socket closes, so no
/// decoder state needs flushing here. If a handler cannot be registered
/// the corresponding signal is simply not listened for.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {
            tracing::info!("Ctrl+C received, closing sessions and stopping");
        }
        _ = terminate => {
            tracing::info!("SIGTERM received, closing sessions and stopping");
        }
    }
}

/// Initialize tracing once at startup.
///
/// `RUST_LOG` takes precedence; otherwise the configured level applies to
/// the myna crates while HTTP-layer noise stays at info. Session and
/// utterance context travels in structured fields on each event.
fn init_tracing(settings: &Settings) {
    let level = &settings.observability.log_level;
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "myna_server={level},myna_pipeline={level},myna_config={level},tower_http=info"
        )
        .into()
    });

    let registry = tracing_subscriber::registry().with(env_filter);
    if settings.observability.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }
}
