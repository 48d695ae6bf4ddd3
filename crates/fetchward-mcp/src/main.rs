use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use fetchward_local::{Engine, EngineConfig};
use fetchward_mcp::auth::verifier_from_config;
use fetchward_mcp::config::Config;
use fetchward_mcp::hostgate::HostGate;
use fetchward_mcp::ratelimit::{RateLimitConfig, RateLimiter};
use fetchward_mcp::server::{bind_socket_addr, build_router, now_ms, AppState};
use fetchward_mcp::session::{self, SessionConfig, SessionStore};

#[derive(Parser, Debug)]
#[command(name = "fetchward", version, about = "Safety-hardened HTTP fetch MCP server")]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the effective configuration and exit, without opening a socket
    /// or making any network call.
    Doctor,
    /// Print version information and exit.
    Version,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match cli.command {
        Some(Commands::Version) => {
            println!("fetchward {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some(Commands::Doctor) => {
            return run_doctor(&cli.config);
        }
        None => {}
    }

    if let Err(e) = cli.config.validate() {
        eprintln!("configuration error: {e}");
        std::process::exit(1);
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async_main(cli.config))
}

fn run_doctor(cfg: &Config) -> anyhow::Result<()> {
    if let Err(e) = cfg.validate() {
        println!("status: invalid");
        println!("error: {e}");
        std::process::exit(1);
    }
    println!("status: ok");
    println!("bind: {}:{}", cfg.server_host, cfg.server_port);
    println!("allow_remote: {}", cfg.allow_remote);
    println!("auth_mode: {:?}", cfg.auth_mode);
    println!("cache_enabled: {} (max_entries={})", cfg.cache_enabled, cfg.cache_max_entries);
    println!("session: max={} ttl_ms={}", cfg.max_sessions, cfg.session_ttl_ms);
    println!(
        "rate_limit: enabled={} max={}/{}ms",
        cfg.rate_limit_enabled, cfg.rate_limit_max_requests, cfg.rate_limit_window_ms
    );
    Ok(())
}

async fn async_main(cfg: Config) -> anyhow::Result<()> {
    let engine = Arc::new(Engine::new(EngineConfig {
        fetcher: fetchward_local::fetcher::FetcherConfig {
            user_agent: cfg.fetcher_user_agent.clone(),
            timeout_ms: cfg.fetcher_timeout_ms,
            ..Default::default()
        },
        redirect: fetchward_local::redirect::RedirectConfig {
            max_redirects: cfg.fetcher_max_redirects,
        },
        pipeline: fetchward_local::pipeline::PipelineConfig {
            max_content_bytes: cfg.fetcher_max_content_bytes as usize,
            timeout_ms: cfg.fetcher_timeout_ms,
        },
        host: fetchward_local::normalize::NormalizeConfig {
            max_url_length: cfg.max_url_length,
            ..Default::default()
        },
        cache_max_entries: cfg.cache_max_entries,
        ..Default::default()
    })?);

    if cfg.stdio {
        #[cfg(feature = "stdio")]
        {
            return fetchward_mcp::stdio::serve_stdio(engine).await;
        }
        #[cfg(not(feature = "stdio"))]
        {
            anyhow::bail!("--stdio requires the \"stdio\" feature");
        }
    }

    serve_http(engine, cfg).await
}

async fn serve_http(engine: Arc<Engine>, cfg: Config) -> anyhow::Result<()> {
    let sessions = Arc::new(SessionStore::new(SessionConfig {
        max_sessions: cfg.max_sessions,
        ttl_ms: cfg.session_ttl_ms,
        init_timeout_ms: cfg.session_init_timeout_ms,
    }));
    let rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig {
        enabled: cfg.rate_limit_enabled,
        max_requests: cfg.rate_limit_max_requests,
        window_ms: cfg.rate_limit_window_ms,
        cleanup_interval_ms: cfg.rate_limit_cleanup_interval_ms,
    }));
    let host_gate = Arc::new(HostGate::new(&cfg.server_host, &cfg.allowed_hosts));
    let verifier = verifier_from_config(&cfg);

    let state = Arc::new(AppState {
        engine,
        sessions: sessions.clone(),
        rate_limiter: rate_limiter.clone(),
        host_gate,
        verifier,
        cache_enabled: cfg.cache_enabled,
        started_at: now_ms(),
    });

    let session_evictor = session::spawn_evictor(sessions.clone());
    let rate_limit_evictor = fetchward_mcp::ratelimit::spawn_evictor(
        rate_limiter.clone(),
        Duration::from_millis(cfg.rate_limit_cleanup_interval_ms),
    );

    let addr: SocketAddr = bind_socket_addr(&cfg)?;
    let app = build_router(state);
    tracing::info!(%addr, "starting fetchward server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let shutdown = shutdown_signal();
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown)
        .await?;

    session_evictor.abort();
    rate_limit_evictor.abort();
    sessions.clear();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };
    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            sig.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
