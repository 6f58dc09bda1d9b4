// # domainmanagerd - Domain Manager Daemon
//
// Thin integration layer around domainmanager-core:
// 1. Reads configuration from environment variables
// 2. Initializes logging and the runtime
// 3. Registers domain handlers
// 4. Runs the DomainManager over a JSON lines node event stream
//
// No DNS logic lives here.
//
// ## Configuration
//
// ### Cloudflare
// - `DOMAINMANAGER_CLOUDFLARE_API_TOKEN`: Scoped API token (preferred)
// - `DOMAINMANAGER_CLOUDFLARE_API_EMAIL` / `CF_API_EMAIL`: Account email (legacy auth)
// - `DOMAINMANAGER_CLOUDFLARE_API_KEY` / `CF_API_KEY`: Global API key (legacy auth)
//
// ### Route53
// - `DOMAINMANAGER_ROUTE53_ACCESS_KEY_ID` / `AWS_ACCESS_KEY_ID`: IAM access key id
// - `DOMAINMANAGER_ROUTE53_SECRET_ACCESS_KEY` / `AWS_SECRET_ACCESS_KEY`: IAM secret
// - `DOMAINMANAGER_ROUTE53_REGION`: API region (default eu-central-1)
//
// ### Memory handler
// - `DOMAINMANAGER_MEMORY_ZONES`: Comma-separated zones served from memory
// - `DOMAINMANAGER_MEMORY_SHAPE`: `single` or `grouped` (default single)
//
// ### Engine
// - `DOMAINMANAGER_MODE`: `dry-run` only logs provider mutations
// - `DOMAINMANAGER_GATE_LABEL`: Label a node must carry with value `yes`
// - `DOMAINMANAGER_HOSTNAME_LABEL`: Label holding the node's resolvable hostname
// - `DOMAINMANAGER_EVENTS_FILE`: Node event file (default: stdin)
// - `DOMAINMANAGER_LOG_LEVEL`: trace, debug, info, warn, error (default info)
//
// Handlers are consulted in order: Cloudflare, Route53, then memory. Without
// any handler the daemon only observes.
//
// ## Example
//
// ```bash
// export DOMAINMANAGER_CLOUDFLARE_API_TOKEN=your_token
// kubectl-node-events | domainmanagerd
// ```

use anyhow::{Context, Result};
use std::env;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use domainmanager_core::config::DEFAULT_ROUTE53_REGION;
use domainmanager_core::traits::SystemHostResolver;
use domainmanager_core::{
    DomainManager, DomainManagerConfig, EngineConfig, HandlerRegistry, HandlerShape,
    ProviderConfig,
};
use domainmanager_source_jsonl::{GateFilter, JsonLinesSource};

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum DaemonExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<DaemonExitCode> for ExitCode {
    fn from(code: DaemonExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    cloudflare_api_token: Option<String>,
    cloudflare_api_email: Option<String>,
    cloudflare_api_key: Option<String>,
    route53_access_key_id: Option<String>,
    route53_secret_access_key: Option<String>,
    route53_region: Option<String>,
    dry_run: bool,
    memory_zones: Vec<String>,
    memory_shape: String,
    gate_label: Option<String>,
    hostname_label: Option<String>,
    events_file: Option<String>,
    log_level: String,
}

/// First non-empty value among the given variables
fn env_first(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| env::var(name).ok())
        .find(|value| !value.is_empty())
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        Self {
            cloudflare_api_token: env_first(&["DOMAINMANAGER_CLOUDFLARE_API_TOKEN"]),
            cloudflare_api_email: env_first(&["DOMAINMANAGER_CLOUDFLARE_API_EMAIL", "CF_API_EMAIL"]),
            cloudflare_api_key: env_first(&["DOMAINMANAGER_CLOUDFLARE_API_KEY", "CF_API_KEY"]),
            route53_access_key_id: env_first(&[
                "DOMAINMANAGER_ROUTE53_ACCESS_KEY_ID",
                "AWS_ACCESS_KEY_ID",
            ]),
            route53_secret_access_key: env_first(&[
                "DOMAINMANAGER_ROUTE53_SECRET_ACCESS_KEY",
                "AWS_SECRET_ACCESS_KEY",
            ]),
            route53_region: env_first(&["DOMAINMANAGER_ROUTE53_REGION"]),
            dry_run: env::var("DOMAINMANAGER_MODE").is_ok_and(|mode| mode == "dry-run"),
            memory_zones: env::var("DOMAINMANAGER_MEMORY_ZONES")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            memory_shape: env::var("DOMAINMANAGER_MEMORY_SHAPE")
                .unwrap_or_else(|_| "single".to_string()),
            gate_label: env_first(&["DOMAINMANAGER_GATE_LABEL"]),
            hostname_label: env_first(&["DOMAINMANAGER_HOSTNAME_LABEL"]),
            events_file: env_first(&["DOMAINMANAGER_EVENTS_FILE"]),
            log_level: env::var("DOMAINMANAGER_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        }
    }

    fn has_cloudflare(&self) -> bool {
        self.cloudflare_api_token.is_some()
            || self.cloudflare_api_email.is_some()
            || self.cloudflare_api_key.is_some()
    }

    fn has_route53(&self) -> bool {
        self.route53_access_key_id.is_some() || self.route53_secret_access_key.is_some()
    }

    /// Validate settings the core configuration does not cover
    fn validate(&self) -> Result<()> {
        if self.cloudflare_api_token.is_none()
            && self.cloudflare_api_email.is_some() != self.cloudflare_api_key.is_some()
        {
            anyhow::bail!(
                "Legacy Cloudflare auth needs both DOMAINMANAGER_CLOUDFLARE_API_EMAIL \
                and DOMAINMANAGER_CLOUDFLARE_API_KEY"
            );
        }

        if self.has_cloudflare() && cfg!(not(feature = "cloudflare")) {
            anyhow::bail!("Cloudflare credentials set but the cloudflare feature is disabled");
        }

        if self.route53_access_key_id.is_some() != self.route53_secret_access_key.is_some() {
            anyhow::bail!(
                "Route53 needs both DOMAINMANAGER_ROUTE53_ACCESS_KEY_ID \
                and DOMAINMANAGER_ROUTE53_SECRET_ACCESS_KEY"
            );
        }

        if self.has_route53() && cfg!(not(feature = "route53")) {
            anyhow::bail!("Route53 credentials set but the route53 feature is disabled");
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "DOMAINMANAGER_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }

    /// Build the core configuration
    fn manager_config(&self) -> Result<DomainManagerConfig> {
        let mut engine = EngineConfig::default();
        if let Some(label) = &self.gate_label {
            engine.gate_label = label.clone();
        }
        if let Some(label) = &self.hostname_label {
            engine.hostname_label = label.clone();
        }

        let mut config = DomainManagerConfig {
            providers: Vec::new(),
            engine,
        };

        if self.has_cloudflare() {
            config = config.with_provider(ProviderConfig::Cloudflare {
                api_token: self.cloudflare_api_token.clone(),
                api_email: self.cloudflare_api_email.clone(),
                api_key: self.cloudflare_api_key.clone(),
                dry_run: self.dry_run,
            });
        }

        if let (Some(access_key_id), Some(secret_access_key)) =
            (&self.route53_access_key_id, &self.route53_secret_access_key)
        {
            config = config.with_provider(ProviderConfig::Route53 {
                access_key_id: access_key_id.clone(),
                secret_access_key: secret_access_key.clone(),
                region: self
                    .route53_region
                    .clone()
                    .unwrap_or_else(|| DEFAULT_ROUTE53_REGION.to_string()),
                dry_run: self.dry_run,
            });
        }

        if !self.memory_zones.is_empty() {
            let shape = match self.memory_shape.to_lowercase().as_str() {
                "single" => HandlerShape::Single,
                "grouped" => HandlerShape::Grouped,
                other => anyhow::bail!(
                    "DOMAINMANAGER_MEMORY_SHAPE '{}' is not valid. Valid shapes: single, grouped",
                    other
                ),
            };
            config = config.with_provider(ProviderConfig::Memory {
                name: "memory".to_string(),
                shape,
                zones: self.memory_zones.clone(),
            });
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    let config = Config::from_env();

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return DaemonExitCode::ConfigError.into();
    }

    let manager_config = match config.manager_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return DaemonExitCode::ConfigError.into();
        }
    };

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return DaemonExitCode::ConfigError.into();
    }

    info!("Starting domainmanagerd");
    info!(
        providers = manager_config.providers.len(),
        dry_run = config.dry_run,
        "Configuration loaded"
    );

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return DaemonExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(config, manager_config).await {
            error!("Daemon error: {:#}", e);
            DaemonExitCode::RuntimeError
        } else {
            DaemonExitCode::CleanShutdown
        }
    });

    // A pending stdin read sits on a blocking thread; don't wait for it forever
    rt.shutdown_timeout(SHUTDOWN_TIMEOUT);

    result.into()
}

/// Run the daemon
async fn run_daemon(config: Config, manager_config: DomainManagerConfig) -> Result<()> {
    let registry = HandlerRegistry::with_builtin();

    #[cfg(feature = "cloudflare")]
    {
        info!("Registering Cloudflare handler");
        domainmanager_provider_cloudflare::register(&registry);
    }

    #[cfg(feature = "route53")]
    {
        info!("Registering Route53 handler");
        domainmanager_provider_route53::register(&registry);
    }

    let handlers = registry
        .create_handlers(&manager_config.providers)
        .context("Failed to create domain handlers")?;

    if handlers.is_empty() {
        warn!("No domain handlers configured, running as observer only");
    }

    let gate = GateFilter::from_engine(&manager_config.engine);
    let source = match &config.events_file {
        Some(path) => {
            info!(path = %path, "Reading node events from file");
            JsonLinesSource::open(path, gate).await?
        }
        None => {
            info!("Reading node events from stdin");
            JsonLinesSource::stdin(gate)
        }
    };

    let (mut manager, mut event_rx) = DomainManager::new(
        handlers,
        Box::new(SystemHostResolver::new()),
        manager_config,
    )?;

    // Drain monitoring events so the channel never fills up
    let monitor = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            tracing::debug!(?event, "Manager event");
        }
    });

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let (failure_tx, mut failure_rx) = tokio::sync::oneshot::channel();
    let signals = tokio::spawn(async move {
        match wait_for_shutdown().await {
            Ok(signal) => info!("Received shutdown signal: {}", signal),
            Err(e) => {
                error!("Shutdown signal error: {:#}", e);
                // Recorded before the shutdown is triggered
                let _ = failure_tx.send(e);
            }
        }
        let _ = shutdown_tx.send(());
    });

    let result = manager.run_with_shutdown(&source, Some(shutdown_rx)).await;

    signals.abort();
    drop(manager);
    let _ = monitor.await;

    info!("Shutting down daemon");
    daemon_result(result, failure_rx.try_recv().ok())
}

/// Combine the manager outcome with a signal handling failure
///
/// Losing the signal handlers stops the manager like a shutdown would, but
/// the daemon must still report it as a runtime error.
fn daemon_result(
    run: domainmanager_core::Result<()>,
    signal_failure: Option<anyhow::Error>,
) -> Result<()> {
    if let Some(e) = signal_failure {
        return Err(e.context("Shutdown signal handling failed"));
    }
    run.map_err(Into::into)
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    let received = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    Ok(received)
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
