//! syspeek_agent: serves live system metrics, processes and sockets over HTTP.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use syspeek_agent::auth::{hash_password, AuthManager, SWEEP_PERIOD};
use syspeek_agent::config::{self, Config};
use syspeek_agent::metrics::Collector;
use syspeek_agent::rate::RateEngine;
use syspeek_agent::source::LinuxSource;
use syspeek_agent::state::AppState;
use syspeek_agent::{api, control, tls};

/// Consecutive ports tried when the port was not given explicitly.
const PORT_ATTEMPTS: u16 = 10;

#[derive(Debug, Parser)]
#[command(name = "syspeek_agent", version, about = "Live system introspection server")]
struct Args {
    /// Path to the JSON config file
    #[arg(long, value_name = "PATH")]
    config_file: Option<PathBuf>,
    /// Print the default config and exit
    #[arg(long)]
    print_config_file: bool,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    /// Serve HTTPS with a generated self-signed certificate
    #[arg(long)]
    https: bool,
    #[arg(long, value_name = "PEM", requires = "key")]
    cert: Option<PathBuf>,
    #[arg(long, value_name = "PEM", requires = "cert")]
    key: Option<PathBuf>,
    /// Read-only access without login
    #[arg(short, long)]
    public: bool,
    /// Full access without login
    #[arg(short, long)]
    admin: bool,
    /// Print the value to store as a password in the config file and exit
    #[arg(long, value_name = "PLAINTEXT")]
    hash_password: Option<String>,
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn bind(host: &str, port: u16, attempts: u16) -> anyhow::Result<TcpListener> {
    let mut last_err = None;
    for i in 0..attempts {
        let Some(p) = port.checked_add(i) else { break };
        match TcpListener::bind((host, p)).await {
            Ok(l) => {
                if i > 0 {
                    info!("port {port} busy, using {p}");
                }
                return Ok(l);
            }
            Err(e) => last_err = Some(e),
        }
    }
    match last_err {
        Some(e) if attempts == 1 => {
            Err(e).with_context(|| format!("cannot listen on {host}:{port}"))
        }
        Some(e) => Err(e).with_context(|| {
            format!(
                "no free port in {port}..{}",
                port.saturating_add(attempts - 1)
            )
        }),
        None => bail!("no port to try from {port}"),
    }
}

async fn shutdown_signal(token: CancellationToken) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
        _ = token.cancelled() => {}
    }
    token.cancel();
}

fn access_mode(auth: &AuthManager) -> &'static str {
    if auth.is_admin() {
        "admin (no authentication required)"
    } else if auth.is_public() {
        "public read-only (login for read-write)"
    } else {
        "login required"
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    if let Some(plain) = &args.hash_password {
        println!("{}", hash_password(plain));
        return Ok(());
    }
    if args.print_config_file {
        println!("{}", Config::default().to_json_pretty());
        return Ok(());
    }
    init_logging();

    let path = args.config_file.clone().unwrap_or_else(config::default_path);
    let mut cfg = Config::load(&path)?;
    if let Some(h) = &args.host {
        cfg.server.host = h.clone();
    }
    if let Some(p) = args.port {
        cfg.server.port = p;
    }
    if let (Some(c), Some(k)) = (&args.cert, &args.key) {
        cfg.server.ssl.enabled = true;
        cfg.server.ssl.cert = c.display().to_string();
        cfg.server.ssl.key = k.display().to_string();
    } else if args.https {
        cfg.server.ssl.enabled = true;
    }
    cfg.validate()?;

    if !cfg.has_auth() && !args.public && !args.admin {
        bail!("no users configured; run with -p for public read-only mode or -a for admin mode");
    }
    let auth = AuthManager::new(cfg.auth_settings(args.public, args.admin));

    control::raise_own_priority();

    let rates = Arc::new(RateEngine::new());
    let collector = Collector::new(Arc::new(LinuxSource::new()), rates.clone());
    let state = AppState::new(cfg, auth, collector)?;
    let cfg = state.config.clone();

    let shutdown = CancellationToken::new();
    state.auth.spawn_sweeper(SWEEP_PERIOD, shutdown.clone());
    let retention = RateEngine::retention_for(state.dispatcher.intervals().longest());
    rates.spawn_janitor(retention, shutdown.clone());

    let attempts = if args.port.is_some() { 1 } else { PORT_ATTEMPTS };
    let listener = bind(&cfg.server.host, cfg.server.port, attempts).await?;
    let local: SocketAddr = listener.local_addr()?;

    let https = cfg.server.ssl.enabled;
    let display_host = match cfg.server.host.as_str() {
        "0.0.0.0" | "::" => "localhost",
        h => h,
    };
    info!(
        "listening on {}://{}:{}",
        if https { "https" } else { "http" },
        display_host,
        local.port()
    );
    info!("mode: {}", access_mode(&state.auth));

    let dispatcher = state.dispatcher.clone();
    let app = api::router(state);

    if https {
        let (cert, key) = if cfg.server.ssl.cert.is_empty() {
            tls::ensure_self_signed_cert()?
        } else {
            (PathBuf::from(&cfg.server.ssl.cert), PathBuf::from(&cfg.server.ssl.key))
        };
        let rustls = axum_server::tls_rustls::RustlsConfig::from_pem_file(&cert, &key)
            .await
            .with_context(|| format!("loading TLS material {}", cert.display()))?;
        let handle = axum_server::Handle::new();
        {
            let handle = handle.clone();
            let token = shutdown.clone();
            tokio::spawn(async move {
                shutdown_signal(token).await;
                dispatcher.shutdown();
                handle.graceful_shutdown(Some(Duration::from_secs(5)));
            });
        }
        axum_server::from_tcp_rustls(listener.into_std()?, rustls)
            .handle(handle)
            .serve(app.into_make_service())
            .await?;
    } else {
        let token = shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_signal(token).await;
                dispatcher.shutdown();
            })
            .await?;
    }

    shutdown.cancel();
    Ok(())
}
