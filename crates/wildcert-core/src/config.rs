//! Configuration types for wildcert
//!
//! Everything here is validated at construction time so the orchestrator
//! and scheduler never see a malformed request.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::{validate_primary_domain, wildcard_of};
use crate::error::{Error, Result};

/// Let's Encrypt production directory
pub const LETSENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// Let's Encrypt staging directory
pub const LETSENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Default propagation wait for DNS-01 challenge records
pub const DEFAULT_PROPAGATION_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Default renewal threshold in days
pub const DEFAULT_RENEWAL_THRESHOLD_DAYS: u32 = 30;

/// Default interval between renewal checks
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// RSA modulus size for the certificate key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum KeyStrength {
    Bits1024,
    Bits2048,
    Bits3072,
    #[default]
    Bits4096,
}

impl KeyStrength {
    /// All supported strengths, weakest first
    pub const ALL: [KeyStrength; 4] = [
        KeyStrength::Bits1024,
        KeyStrength::Bits2048,
        KeyStrength::Bits3072,
        KeyStrength::Bits4096,
    ];

    /// Modulus size in bits
    pub fn bits(&self) -> u32 {
        match self {
            KeyStrength::Bits1024 => 1024,
            KeyStrength::Bits2048 => 2048,
            KeyStrength::Bits3072 => 3072,
            KeyStrength::Bits4096 => 4096,
        }
    }
}

impl TryFrom<u32> for KeyStrength {
    type Error = Error;

    fn try_from(bits: u32) -> Result<Self> {
        match bits {
            1024 => Ok(KeyStrength::Bits1024),
            2048 => Ok(KeyStrength::Bits2048),
            3072 => Ok(KeyStrength::Bits3072),
            4096 => Ok(KeyStrength::Bits4096),
            other => Err(Error::config(format!(
                "Unsupported key size {}. Supported sizes: 1024, 2048, 3072, 4096",
                other
            ))),
        }
    }
}

impl From<KeyStrength> for u32 {
    fn from(strength: KeyStrength) -> Self {
        strength.bits()
    }
}

impl std::fmt::Display for KeyStrength {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.bits())
    }
}

/// Everything one issuance cycle needs to know
///
/// Immutable once built; a fresh request is handed to every cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuanceRequest {
    primary_domain: String,
    key_strength: KeyStrength,
    maintainer_contact: String,
    use_staging_directory: bool,
}

impl IssuanceRequest {
    /// Build a validated request
    ///
    /// # Parameters
    ///
    /// - `primary_domain`: The apex name, e.g. `example.com` (never a wildcard)
    /// - `key_strength`: RSA modulus size for the certificate key
    /// - `maintainer_contact`: Email address registered with the CA
    /// - `use_staging_directory`: Issue against Let's Encrypt staging
    ///
    /// # Returns
    ///
    /// - `Err(Error::Config)`: If the domain is malformed or the contact is empty
    pub fn new(
        primary_domain: impl Into<String>,
        key_strength: KeyStrength,
        maintainer_contact: impl Into<String>,
        use_staging_directory: bool,
    ) -> Result<Self> {
        let primary_domain = primary_domain.into().trim().to_ascii_lowercase();
        let maintainer_contact = maintainer_contact.into().trim().to_string();

        validate_primary_domain(&primary_domain)?;

        if maintainer_contact.is_empty() {
            return Err(Error::config("Maintainer contact cannot be empty"));
        }

        if !maintainer_contact.contains('@') {
            return Err(Error::config(format!(
                "Maintainer contact must be an email address. Got: {}",
                maintainer_contact
            )));
        }

        Ok(Self {
            primary_domain,
            key_strength,
            maintainer_contact,
            use_staging_directory,
        })
    }

    pub fn primary_domain(&self) -> &str {
        &self.primary_domain
    }

    /// `*.` + primary domain
    pub fn wildcard_domain(&self) -> String {
        wildcard_of(&self.primary_domain)
    }

    /// `[primary, *.primary]`, the fixed order used for the order and the CSR
    pub fn domains(&self) -> Vec<String> {
        vec![self.primary_domain.clone(), self.wildcard_domain()]
    }

    pub fn key_strength(&self) -> KeyStrength {
        self.key_strength
    }

    pub fn maintainer_contact(&self) -> &str {
        &self.maintainer_contact
    }

    /// Contact URI sent with the account registration
    pub fn contact_uri(&self) -> String {
        format!("mailto:{}", self.maintainer_contact)
    }

    pub fn use_staging_directory(&self) -> bool {
        self.use_staging_directory
    }

    /// Directory URL matching the staging flag
    pub fn directory_url(&self) -> &'static str {
        if self.use_staging_directory {
            LETSENCRYPT_STAGING
        } else {
            LETSENCRYPT_PRODUCTION
        }
    }
}

/// Bounded polling with exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    /// Maximum number of status queries
    pub max_attempts: u32,

    /// Delay before the second query
    #[serde(with = "millis")]
    pub initial_delay: Duration,

    /// Upper bound for a single delay
    #[serde(with = "millis")]
    pub max_delay: Duration,
}

impl PollPolicy {
    /// Delay to wait after the given zero-based attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::config(format!("{} max_attempts must be > 0", name)));
        }
        if self.max_delay < self.initial_delay {
            return Err(Error::config(format!(
                "{} max_delay must be >= initial_delay",
                name
            )));
        }
        Ok(())
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(15),
        }
    }
}

/// Orchestrator tunables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    /// Upper bound for the DNS propagation wait
    #[serde(with = "millis", default = "default_propagation_timeout")]
    pub propagation_timeout: Duration,

    /// Authorization polling after challenges are marked ready
    #[serde(default)]
    pub validation_poll: PollPolicy,

    /// Order polling after the CSR is submitted
    #[serde(default)]
    pub finalization_poll: PollPolicy,
}

fn default_propagation_timeout() -> Duration {
    DEFAULT_PROPAGATION_TIMEOUT
}

impl OrchestratorSettings {
    /// Validate the settings
    pub fn validate(&self) -> Result<()> {
        if self.propagation_timeout.is_zero() {
            return Err(Error::config("Propagation timeout must be > 0"));
        }
        self.validation_poll.validate("Validation poll")?;
        self.finalization_poll.validate("Finalization poll")?;
        Ok(())
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            propagation_timeout: DEFAULT_PROPAGATION_TIMEOUT,
            validation_poll: PollPolicy::default(),
            finalization_poll: PollPolicy::default(),
        }
    }
}

/// Renewal scheduler settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenewalConfig {
    /// Renew when this many days or fewer remain
    #[serde(default = "default_threshold_days")]
    pub threshold_days: u32,

    /// Period between checks after the startup run
    #[serde(with = "millis", default = "default_check_interval")]
    pub check_interval: Duration,

    /// Capacity of the scheduler event channel
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

fn default_threshold_days() -> u32 {
    DEFAULT_RENEWAL_THRESHOLD_DAYS
}

fn default_check_interval() -> Duration {
    DEFAULT_CHECK_INTERVAL
}

fn default_event_channel_capacity() -> usize {
    32
}

impl RenewalConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.check_interval.is_zero() {
            return Err(Error::config("Check interval must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(Error::config("Event channel capacity must be > 0"));
        }
        Ok(())
    }
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            threshold_days: DEFAULT_RENEWAL_THRESHOLD_DAYS,
            check_interval: DEFAULT_CHECK_INTERVAL,
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
