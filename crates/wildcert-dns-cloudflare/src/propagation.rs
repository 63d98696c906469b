//! DNS propagation checking
//!
//! Polls public resolvers until a challenge TXT record is visible with the
//! expected value, or the caller's deadline passes.

use hickory_resolver::config::{NameServerConfig, ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::xfer::Protocol;
use hickory_resolver::{ResolveError, Resolver, TokioResolver};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use wildcert_core::{Error, Result};

/// Propagation polling settings
///
/// The overall deadline is not part of the config; it comes with each
/// wait so the orchestrator stays in charge of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagationConfig {
    /// Delay before the first lookup
    pub initial_delay: Duration,

    /// Delay between lookups
    pub check_interval: Duration,

    /// Resolvers to query (empty = system defaults)
    pub nameservers: Vec<IpAddr>,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            check_interval: Duration::from_secs(5),
            nameservers: vec![
                IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)),
                IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)),
                IpAddr::V4(Ipv4Addr::new(9, 9, 9, 9)),
            ],
        }
    }
}

/// TXT record propagation checker
#[derive(Debug)]
pub struct PropagationChecker {
    config: PropagationConfig,
    resolver: TokioResolver,
}

impl PropagationChecker {
    /// Create a checker with the default resolvers
    pub fn new() -> Result<Self> {
        Self::with_config(PropagationConfig::default())
    }

    /// Create a checker with custom settings
    pub fn with_config(config: PropagationConfig) -> Result<Self> {
        if config.check_interval.is_zero() {
            return Err(Error::config("Propagation check interval must be > 0"));
        }

        let resolver_config = if config.nameservers.is_empty() {
            ResolverConfig::default()
        } else {
            let mut resolver_config = ResolverConfig::new();
            for ip in &config.nameservers {
                resolver_config
                    .add_name_server(NameServerConfig::new(SocketAddr::new(*ip, 53), Protocol::Udp));
            }
            resolver_config
        };

        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_secs(5);
        opts.attempts = 2;
        // Every lookup must reach the resolvers
        opts.cache_size = 0;

        let resolver =
            Resolver::builder_with_config(resolver_config, TokioConnectionProvider::default())
                .with_options(opts)
                .build();

        Ok(Self { config, resolver })
    }

    pub fn config(&self) -> &PropagationConfig {
        &self.config
    }

    /// Wait until `record_name` serves `expected_value`
    ///
    /// # Returns
    ///
    /// - `true`: The value was observed
    /// - `false`: `timeout` elapsed first
    pub async fn wait_for(&self, record_name: &str, expected_value: &str, timeout: Duration) -> bool {
        let start = Instant::now();
        let deadline = start + timeout;

        debug!(
            record = %record_name,
            timeout_secs = timeout.as_secs(),
            "Waiting for DNS propagation"
        );

        tokio::time::sleep(self.config.initial_delay.min(timeout)).await;

        loop {
            match self.check_record(record_name, expected_value).await {
                Ok(true) => {
                    debug!(
                        record = %record_name,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "DNS propagation confirmed"
                    );
                    return true;
                }
                Ok(false) => trace!(record = %record_name, "Record not yet propagated"),
                Err(e) => warn!(record = %record_name, error = %e, "DNS lookup error"),
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            tokio::time::sleep(self.config.check_interval.min(deadline - now)).await;
        }
    }

    /// Look the record up once
    ///
    /// # Returns
    ///
    /// - `Ok(true)`: One of the TXT values equals `expected_value`
    /// - `Ok(false)`: No such value yet (including NXDOMAIN)
    /// - `Err(Error::DnsProvider)`: The lookup itself failed
    pub async fn check_record(&self, record_name: &str, expected_value: &str) -> Result<bool> {
        match self.resolver.txt_lookup(fully_qualified(record_name)).await {
            Ok(lookup) => {
                let values = lookup.iter().map(|txt| {
                    // Long TXT values arrive split into several strings
                    txt.txt_data()
                        .iter()
                        .map(|chunk| String::from_utf8_lossy(chunk))
                        .collect::<String>()
                });
                Ok(contains_value(values, expected_value))
            }
            Err(e) if is_not_yet_visible(&e) => Ok(false),
            Err(e) => Err(Error::dns_provider(format!(
                "DNS lookup failed for '{}': {}",
                record_name, e
            ))),
        }
    }
}

fn fully_qualified(name: &str) -> String {
    if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{}.", name)
    }
}

fn contains_value(values: impl IntoIterator<Item = String>, expected: &str) -> bool {
    values.into_iter().any(|value| value == expected)
}

/// Lookup errors that just mean the record has not shown up yet
///
/// Transport failures (timeouts, no reachable nameserver) are real errors.
fn is_not_yet_visible(error: &ResolveError) -> bool {
    error.is_no_records_found() || error.is_nx_domain()
}
