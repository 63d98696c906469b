// # wildcertd - Wildcard Certificate Daemon
//
// ⚠️ ARCHITECTURAL CONSTRAINTS ⚠️
//
// - This is a THIN integration layer ONLY
// - DO NOT add ACME logic, DNS logic, or retry logic here
// - All issuance and renewal logic MUST be in wildcert-core
// - Configuration is via environment variables ONLY (a `.env` file is honored)
//
// The wildcertd daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Wiring the ACME client, the Cloudflare provider and the file store
// 4. Starting the renewal scheduler and stopping it on SIGINT/SIGTERM
//
// ## Configuration
//
// ### Required
// - `DOMAIN`: Primary domain; the certificate covers it and `*.DOMAIN`
// - `CLOUDFLARE_TOKEN`: Cloudflare API token with Zone:DNS:Edit
// - `MAINTAINER_EMAIL`: Contact registered with Let's Encrypt
//
// ### Optional
// - `KEY_SIZE`: RSA key size, 1024/2048/3072/4096 (default 4096)
// - `STAGING`: Use the Let's Encrypt staging directory (default true)
// - `VERBOSE`: Debug-level logging (default false)
// - `DAYS_BEFORE_RENEW`: Renew when this many days or fewer remain (default 30)
// - `CLOUDFLARE_ZONE_ID`: Skip the zone lookup
// - `PEMS_DIR`: Where artifacts are written (default ./pems)
//
// ## Example
//
// ```bash
// export DOMAIN=example.com
// export CLOUDFLARE_TOKEN=your_token
// export MAINTAINER_EMAIL=admin@example.com
// export STAGING=false
//
// wildcertd
// ```

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{Level, debug, error, info};
use tracing_subscriber::FmtSubscriber;
use wildcert_acme::InstantAcmeClient;
use wildcert_core::{
    AcmeOrchestrator, FileCertificateStore, IssuanceRequest, KeyStrength, OrchestratorSettings,
    RenewalConfig, RenewalScheduler, SchedulerEvent, ShutdownTrigger, shutdown_channel,
};
use wildcert_dns_cloudflare::CloudflareDnsProvider;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

const DEFAULT_PEMS_DIR: &str = "./pems";

/// Exit codes for different termination scenarios
///
/// - 0: Clean shutdown, or required configuration missing
/// - 1: Invalid configuration value
/// - 2: The startup issuance cycle failed
/// - 3: Runtime error (unexpected)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WildcertExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// A configuration value is present but invalid
    ConfigError = 1,
    /// The first certificate check failed
    StartupFailed = 2,
    /// Runtime error (unexpected failure)
    RuntimeError = 3,
}

impl From<WildcertExitCode> for ExitCode {
    fn from(code: WildcertExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
#[derive(Clone, PartialEq, Eq)]
struct Config {
    domain: String,
    cloudflare_token: String,
    cloudflare_zone_id: Option<String>,
    maintainer_email: String,
    key_size: KeyStrength,
    staging: bool,
    days_before_renew: u32,
    pems_dir: PathBuf,
}

// Custom Debug implementation that hides the API token
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("domain", &self.domain)
            .field("cloudflare_token", &"<REDACTED>")
            .field("cloudflare_zone_id", &self.cloudflare_zone_id)
            .field("maintainer_email", &self.maintainer_email)
            .field("key_size", &self.key_size)
            .field("staging", &self.staging)
            .field("days_before_renew", &self.days_before_renew)
            .field("pems_dir", &self.pems_dir)
            .finish()
    }
}

/// Result of reading the environment
#[derive(Debug)]
enum Loaded {
    Ready(Config),
    /// A required variable is unset or empty
    Missing(&'static str),
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Loaded> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`
    ///
    /// Unset and empty variables are treated alike. Optional values that
    /// are present must parse.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Loaded> {
        let get = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let Some(domain) = get("DOMAIN") else {
            return Ok(Loaded::Missing("DOMAIN"));
        };
        let Some(cloudflare_token) = get("CLOUDFLARE_TOKEN") else {
            return Ok(Loaded::Missing("CLOUDFLARE_TOKEN"));
        };
        let Some(maintainer_email) = get("MAINTAINER_EMAIL") else {
            return Ok(Loaded::Missing("MAINTAINER_EMAIL"));
        };

        let key_size = match get("KEY_SIZE") {
            Some(raw) => {
                let bits: u32 = raw
                    .parse()
                    .with_context(|| format!("KEY_SIZE must be a number of bits. Got: {}", raw))?;
                KeyStrength::try_from(bits)?
            }
            None => KeyStrength::default(),
        };

        let staging = match get("STAGING") {
            Some(raw) => parse_bool("STAGING", &raw)?,
            None => true,
        };

        let days_before_renew = match get("DAYS_BEFORE_RENEW") {
            Some(raw) => raw.parse().with_context(|| {
                format!("DAYS_BEFORE_RENEW must be a whole number of days. Got: {}", raw)
            })?,
            None => wildcert_core::config::DEFAULT_RENEWAL_THRESHOLD_DAYS,
        };

        Ok(Loaded::Ready(Self {
            domain,
            cloudflare_token,
            cloudflare_zone_id: get("CLOUDFLARE_ZONE_ID"),
            maintainer_email,
            key_size,
            staging,
            days_before_renew,
            pems_dir: get("PEMS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PEMS_DIR)),
        }))
    }

    /// Validate the configuration
    ///
    /// Builds the request the scheduler will issue with, so every check
    /// `IssuanceRequest::new` performs happens before anything starts.
    fn validate(&self) -> Result<IssuanceRequest> {
        if self.days_before_renew == 0 || self.days_before_renew >= 90 {
            anyhow::bail!(
                "DAYS_BEFORE_RENEW must be between 1 and 89 (certificates last 90 days). Got: {}",
                self.days_before_renew
            );
        }

        // Check for obvious placeholder tokens (common mistake)
        let token_lower = self.cloudflare_token.to_lowercase();
        if token_lower.contains("your_token") || token_lower.contains("replace_me") {
            anyhow::bail!(
                "CLOUDFLARE_TOKEN appears to be a placeholder. \
                Use an actual API token from the Cloudflare dashboard."
            );
        }

        let request = IssuanceRequest::new(
            self.domain.clone(),
            self.key_size,
            self.maintainer_email.clone(),
            self.staging,
        )?;

        Ok(request)
    }

    fn renewal_config(&self) -> RenewalConfig {
        RenewalConfig {
            threshold_days: self.days_before_renew,
            ..RenewalConfig::default()
        }
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => anyhow::bail!("{} must be true or false. Got: {}", name, raw),
    }
}

fn main() -> ExitCode {
    // A missing .env file is fine
    dotenvy::dotenv().ok();

    // Initialize tracing
    let verbose = std::env::var("VERBOSE")
        .ok()
        .is_some_and(|raw| parse_bool("VERBOSE", raw.trim()).unwrap_or(false));
    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return WildcertExitCode::RuntimeError.into();
    }

    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(Loaded::Ready(config)) => config,
        Ok(Loaded::Missing(name)) => {
            error!(variable = name, "{} is not set, nothing to do", name);
            return WildcertExitCode::CleanShutdown.into();
        }
        Err(e) => {
            error!("Configuration error: {:#}", e);
            return WildcertExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    let request = match config.validate() {
        Ok(request) => request,
        Err(e) => {
            error!("Configuration validation error: {:#}", e);
            return WildcertExitCode::ConfigError.into();
        }
    };

    info!("Starting wildcertd daemon");
    debug!(config = ?config, "Configuration loaded");
    info!(
        domain = %request.primary_domain(),
        staging = request.use_staging_directory(),
        key_size = request.key_strength().bits(),
        threshold_days = config.days_before_renew,
        "Managing wildcard certificate"
    );

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return WildcertExitCode::RuntimeError.into();
        }
    };

    rt.block_on(run_daemon(config, request)).into()
}

/// Run the daemon until a signal arrives or startup fails
async fn run_daemon(config: Config, request: IssuanceRequest) -> WildcertExitCode {
    let (trigger, _signal) = shutdown_channel();

    let scheduler = match build_scheduler(&config, request).await {
        Ok((scheduler, events)) => {
            tokio::spawn(log_events(events));
            scheduler
        }
        Err(e) => {
            error!("Daemon error: {:#}", e);
            return WildcertExitCode::RuntimeError;
        }
    };

    if let Err(e) = spawn_signal_listener(trigger.clone()) {
        error!("Daemon error: {:#}", e);
        return WildcertExitCode::RuntimeError;
    }

    let handle = match scheduler.start(trigger).await {
        Ok(handle) => handle,
        Err(e) if e.is_cancelled() => {
            info!("Shutdown requested during startup check");
            return WildcertExitCode::CleanShutdown;
        }
        Err(e) => {
            error!(step = %e.step(), error = %e, "Startup certificate check failed");
            return WildcertExitCode::StartupFailed;
        }
    };

    info!("Daemon initialized successfully");

    // Returns once a signal fires the trigger
    handle.join().await;

    info!("Shutting down daemon");
    WildcertExitCode::CleanShutdown
}

/// Wire the collaborators into a scheduler
async fn build_scheduler(
    config: &Config,
    request: IssuanceRequest,
) -> Result<(RenewalScheduler, mpsc::Receiver<SchedulerEvent>)> {
    let acme = InstantAcmeClient::new().context("Failed to create ACME client")?;
    let dns = CloudflareDnsProvider::new(
        config.cloudflare_token.clone(),
        config.cloudflare_zone_id.clone(),
    )
    .context("Failed to create Cloudflare provider")?;
    let store = FileCertificateStore::new(&config.pems_dir)
        .await
        .with_context(|| format!("Failed to open {}", config.pems_dir.display()))?;

    info!(pems_dir = %config.pems_dir.display(), "Certificate store ready");

    let orchestrator = AcmeOrchestrator::new(
        Arc::new(acme),
        Arc::new(dns),
        OrchestratorSettings::default(),
    )?;

    let scheduler = RenewalScheduler::new(
        orchestrator,
        Arc::new(store),
        request,
        config.renewal_config(),
    )?;

    Ok(scheduler)
}

/// Drain scheduler events so the channel never fills up
async fn log_events(mut events: mpsc::Receiver<SchedulerEvent>) {
    while let Some(event) = events.recv().await {
        debug!(event = ?event, "Scheduler event");
    }
}

/// Fire `trigger` on SIGTERM or SIGINT
#[cfg(unix)]
fn spawn_signal_listener(trigger: ShutdownTrigger) -> Result<()> {
    // Set up signal handlers for SIGTERM and SIGINT
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?;

    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        };
        info!("Received shutdown signal: {}", name);
        trigger.trigger();
    });

    Ok(())
}

/// Fire `trigger` on Ctrl-C
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
fn spawn_signal_listener(trigger: ShutdownTrigger) -> Result<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal: SIGINT");
                trigger.trigger();
            }
            Err(e) => tracing::warn!("Failed to wait for CTRL-C: {}", e),
        }
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Loaded> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("DOMAIN", "example.com"),
        ("CLOUDFLARE_TOKEN", "0123456789abcdef0123456789abcdef01234567"),
        ("MAINTAINER_EMAIL", "admin@example.com"),
    ];

    fn ready(extra: &[(&str, &str)]) -> Config {
        let mut vars = REQUIRED.to_vec();
        vars.extend_from_slice(extra);
        match load(&vars).unwrap() {
            Loaded::Ready(config) => config,
            Loaded::Missing(name) => panic!("{} reported missing", name),
        }
    }

    #[test]
    fn defaults_apply_when_optional_values_are_unset() {
        let config = ready(&[]);
        assert_eq!(config.key_size, KeyStrength::Bits4096);
        assert!(config.staging);
        assert_eq!(config.days_before_renew, 30);
        assert_eq!(config.pems_dir, PathBuf::from("./pems"));
        assert_eq!(config.cloudflare_zone_id, None);
    }

    #[test]
    fn missing_required_variable_is_named() {
        let result = load(&[("DOMAIN", "example.com"), ("MAINTAINER_EMAIL", "a@b.c")]).unwrap();
        assert!(matches!(result, Loaded::Missing("CLOUDFLARE_TOKEN")));

        let result = load(&[
            ("DOMAIN", "   "),
            ("CLOUDFLARE_TOKEN", "t"),
            ("MAINTAINER_EMAIL", "a@b.c"),
        ])
        .unwrap();
        assert!(matches!(result, Loaded::Missing("DOMAIN")));
    }

    #[test]
    fn optional_values_are_parsed() {
        let config = ready(&[
            ("KEY_SIZE", "2048"),
            ("STAGING", "FALSE"),
            ("DAYS_BEFORE_RENEW", "14"),
            ("CLOUDFLARE_ZONE_ID", "zone-123"),
            ("PEMS_DIR", "/var/lib/wildcert"),
        ]);
        assert_eq!(config.key_size, KeyStrength::Bits2048);
        assert!(!config.staging);
        assert_eq!(config.renewal_config().threshold_days, 14);
        assert_eq!(config.cloudflare_zone_id.as_deref(), Some("zone-123"));
        assert_eq!(config.pems_dir, PathBuf::from("/var/lib/wildcert"));
    }

    #[test]
    fn invalid_values_are_errors() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("KEY_SIZE", "1536"));
        assert!(load(&vars).is_err());

        let mut vars = REQUIRED.to_vec();
        vars.push(("STAGING", "maybe"));
        assert!(load(&vars).is_err());

        let mut vars = REQUIRED.to_vec();
        vars.push(("DAYS_BEFORE_RENEW", "-3"));
        assert!(load(&vars).is_err());
    }

    #[test]
    fn validate_builds_the_request() {
        let request = ready(&[("STAGING", "false")]).validate().unwrap();
        assert_eq!(request.primary_domain(), "example.com");
        assert_eq!(request.domains(), vec!["example.com", "*.example.com"]);
        assert!(!request.use_staging_directory());
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert!(ready(&[("DAYS_BEFORE_RENEW", "0")]).validate().is_err());
        assert!(ready(&[("DAYS_BEFORE_RENEW", "90")]).validate().is_err());

        let mut config = ready(&[]);
        config.domain = "*.example.com".to_string();
        assert!(config.validate().is_err());

        let mut config = ready(&[]);
        config.maintainer_email = "not-an-email".to_string();
        assert!(config.validate().is_err());

        let mut config = ready(&[]);
        config.cloudflare_token = "your_token".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn token_is_not_exposed_in_debug() {
        let debug_str = format!("{:?}", ready(&[]));
        assert!(!debug_str.contains("0123456789abcdef"));
        assert!(debug_str.contains("<REDACTED>"));
    }

    #[test]
    fn exit_codes_are_stable() {
        assert_eq!(WildcertExitCode::CleanShutdown as u8, 0);
        assert_eq!(WildcertExitCode::ConfigError as u8, 1);
        assert_eq!(WildcertExitCode::StartupFailed as u8, 2);
        assert_eq!(WildcertExitCode::RuntimeError as u8, 3);
    }
}
