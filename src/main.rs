use clap::Parser;
use ollama_shim::audit::{AuditSink, FileAuditSink, NoopAuditSink};
use ollama_shim::backend::HttpBackend;
use ollama_shim::config::{config_search_paths, ForwardMode};
use ollama_shim::{build_router, AppState, Proxy, ShimConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "ollama-shim",
    about = "Translate OpenAI-style chat completions into Ollama /api/chat requests",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config and env)
    #[arg(short, long)]
    port: Option<u16>,

    /// Backend chat URL (overrides config and env)
    #[arg(long)]
    backend_url: Option<String>,

    /// Route to accept chat requests on
    #[arg(long)]
    route: Option<String>,

    /// Directory for audit records
    #[arg(long)]
    audit_dir: Option<PathBuf>,

    /// Do not persist inbound payloads
    #[arg(long)]
    no_audit: bool,

    /// Forward bodies untouched instead of translating them
    #[arg(long)]
    passthrough: bool,

    /// Audit and answer 400 without contacting the backend
    #[arg(long)]
    debug_short_circuit: bool,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Real environment always wins over .env
    let dotenv = dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ollama_shim=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    if let Some(path) = dotenv {
        info!(path = %path.display(), "Loaded .env");
    }

    let mut config = ShimConfig::find_and_load(cli.config.as_deref())?;
    config.apply_env();

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(url) = cli.backend_url {
        config.backend.url = url;
    }
    if let Some(route) = cli.route {
        config.route = route;
    }
    if let Some(dir) = cli.audit_dir {
        config.audit.dir = dir;
    }
    if cli.no_audit {
        config.audit.enabled = false;
    }
    if cli.passthrough {
        config.mode = ForwardMode::Passthrough;
    }
    if cli.debug_short_circuit {
        config.debug_short_circuit = true;
    }

    config.validate()?;

    let audit: Arc<dyn AuditSink> = if config.audit.enabled {
        Arc::new(FileAuditSink::new(&config.audit.dir))
    } else {
        Arc::new(NoopAuditSink)
    };

    let backend = HttpBackend::new(
        HttpBackend::default_client()?,
        &config.backend.url,
        Duration::from_secs(config.backend.timeout_secs),
    );

    info!("╔═══════════════════════════════════════════════════════╗");
    info!("║           ollama-shim v{}                          ║", env!("CARGO_PKG_VERSION"));
    info!("╚═══════════════════════════════════════════════════════╝");
    info!("  Route:     POST {}", config.route);
    info!("  Backend:   {}", config.backend.url);
    info!("  Mode:      {:?}", config.mode);
    info!("  Port:      {}", config.port);
    if config.audit.enabled {
        info!("  Audit dir: {}", config.audit.dir.display());
    } else {
        info!("  Audit:     disabled");
    }
    if config.debug_short_circuit {
        info!("  DEBUG SHORT-CIRCUIT: backend will not be contacted");
    }

    let proxy = Proxy::from_config(&config, Arc::new(backend), audit);
    let state = Arc::new(AppState {
        config: config.clone(),
        proxy,
    });

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}{}", bind_addr, config.route);

    axum::serve(listener, app).await?;

    Ok(())
}
