use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use quotaguard::config::{EvaluatorKind, GuardConfig, LogFormat};
use quotaguard::http::{AdmissionState, GuardServer};
use quotaguard::ratelimit::{
    AdmissionGuard, AtomicQuotaEvaluator, BroadcastObserver, Interval, MemoryCounterStore,
    QuotaBackend, QuotaEvaluator, RuleSet, RulesConfig,
};
use quotaguard::reload::spawn_rule_reloader;

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "quotaguard", version, about = "Per-client request admission guard")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the forward-auth server
    Serve {
        /// Service configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Rules file, overrides `rules.path`
        #[arg(short, long)]
        rules: Option<PathBuf>,
        /// Environment whose rules apply, overrides `rules.environment`
        #[arg(short, long)]
        environment: Option<String>,
        /// Listen address, overrides `server.listen_addr`
        #[arg(short, long)]
        listen: Option<SocketAddr>,
    },
    /// Parse and compile a rules file, then exit
    Validate {
        rules: PathBuf,
        #[arg(short, long, default_value = "production")]
        environment: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            rules,
            environment,
            listen,
        } => {
            let mut config = GuardConfig::load(config.as_deref())?;
            if let Some(rules) = rules {
                config.rules.path = Some(rules.display().to_string());
            }
            if let Some(environment) = environment {
                config.rules.environment = environment;
            }
            if let Some(listen) = listen {
                config.server.listen_addr = listen;
            }
            init_tracing(config.logging.format);
            serve(config).await
        }
        Command::Validate { rules, environment } => {
            init_tracing(LogFormat::Text);
            validate(&rules, &environment)
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn serve(config: GuardConfig) -> anyhow::Result<()> {
    info!("Starting Quotaguard Admission Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        listen_addr = %config.server.listen_addr,
        environment = %config.rules.environment,
        evaluator = ?config.rules.evaluator,
        "Configuration loaded"
    );

    let rules = match &config.rules.path {
        Some(path) => RulesConfig::from_file(path)?.compile_for(&config.rules.environment)?,
        None => {
            warn!("No rules file configured, every request will be admitted");
            RuleSet::new()
        }
    };
    info!(rules = rules.len(), "Rules loaded");

    let store = Arc::new(MemoryCounterStore::new());
    let backend: Arc<dyn QuotaBackend> = match config.rules.evaluator {
        EvaluatorKind::Simple => Arc::new(QuotaEvaluator::new(store.clone())),
        EvaluatorKind::Atomic => Arc::new(AtomicQuotaEvaluator::new(store.clone())),
    };

    let violations = Arc::new(BroadcastObserver::new(256));
    let guard = Arc::new(AdmissionGuard::new(rules, backend).with_observer(violations.clone()));

    let mut stream = violations.stream();
    tokio::spawn(async move {
        while let Some(event) = stream.next().await {
            match event.map(|v| serde_json::to_string(&v)) {
                Ok(Ok(json)) => debug!(violation = %json, "Violation event"),
                Ok(Err(e)) => warn!(error = %e, "Failed to encode violation event"),
                Err(e) => warn!(error = %e, "Violation subscriber lagged"),
            }
        }
    });

    if let (Some(path), true) = (&config.rules.path, config.rules.reload_interval_secs > 0) {
        spawn_rule_reloader(
            guard.clone(),
            PathBuf::from(path),
            config.rules.environment.clone(),
            Duration::from_secs(config.rules.reload_interval_secs),
        );
    }

    let purge_store = store.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PURGE_INTERVAL);
        loop {
            ticker.tick().await;
            let purged = purge_store.purge_expired();
            if purged > 0 {
                debug!(purged, remaining = purge_store.len(), "Purged expired counters");
            }
        }
    });

    let state = AdmissionState::new(guard)
        .with_proxy_headers(config.server.trust_proxy_headers)
        .with_rejection_message(config.server.rejection_message.clone());
    let server = GuardServer::new(config.server.listen_addr, state);

    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Quotaguard Admission Service stopped");
    Ok(())
}

fn validate(path: &Path, environment: &str) -> anyhow::Result<()> {
    let config = RulesConfig::from_file(path)?;
    let rules = config.compile_for(environment)?;

    println!("{}: {} rule(s) for environment '{}'", path.display(), rules.len(), environment);
    for (index, compiled) in rules.iter().enumerate() {
        let rule = compiled.rule();
        let limits: Vec<String> = Interval::ALL
            .iter()
            .filter_map(|interval| rule.limit(*interval).map(|limit| format!("{}/{}", limit, interval)))
            .collect();
        println!(
            "  #{} methods=[{}] patterns={} limits=[{}]",
            index + 1,
            rule.request_methods.join(","),
            compiled.patterns().len(),
            limits.join(", ")
        );
    }
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
