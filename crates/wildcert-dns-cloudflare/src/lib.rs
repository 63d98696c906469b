// # Cloudflare DNS-01 Provider
//
// This crate implements `wildcert_core::DnsChallengeProvider` against the
// Cloudflare API v4.
//
// ## Behavior
//
// - One POST per published challenge, one DELETE per removal
// - Full error propagation to the orchestrator (no retries, no backoff)
// - HTTP timeout configured (30 seconds)
// - Specific error messages for HTTP status codes (401/403, 404, 429, 5xx)
// - Zone auto-discovery or explicit zone ID
// - Propagation confirmed through public resolvers (see `propagation`)
//
// ## Trust Level: Untrusted (DNS Provider)
//
// **Allowed Capabilities**:
// - Perform HTTP/HTTPS API calls to Cloudflare only
// - Query public resolvers while waiting for propagation
// - Remember record ids between publish and remove
//
// **Forbidden Capabilities**:
// - Retry or reschedule anything (owned by the orchestrator)
// - Touch the certificate store
//
// ## Security Requirements
//
// - API token NEVER appears in logs or Debug output
// - Provider MUST fail fast if the token is empty
//
// ## API Reference
//
// - Create DNS Record: POST `/zones/:zone_id/dns_records`
// - Delete DNS Record: DELETE `/zones/:zone_id/dns_records/:record_id`
// - List Zones: GET `/zones?name=...`

pub mod propagation;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use wildcert_core::traits::{DnsChallengeProvider, TxtChallenge};
use wildcert_core::{Error, Result};

pub use propagation::{PropagationChecker, PropagationConfig};

/// Cloudflare API base URL
pub const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// TTL for challenge records; short so stale values expire quickly
pub const CHALLENGE_TTL: u32 = 120;

/// Where a published record lives, for the later DELETE
#[derive(Debug, Clone, PartialEq, Eq)]
struct PublishedRecord {
    zone_id: String,
    record_id: String,
}

/// Cloudflare DNS-01 provider
///
/// # Security
///
/// The Debug implementation does NOT expose the API token.
pub struct CloudflareDnsProvider {
    /// Cloudflare API token
    /// ⚠️ NEVER log this value
    api_token: String,

    /// Zone ID (optional, auto-detected from the record name otherwise)
    zone_id: Option<String>,

    /// API base URL
    api_base: String,

    /// HTTP client for API requests
    client: reqwest::Client,

    /// Public resolver checks
    propagation: PropagationChecker,

    /// Challenge token -> created record
    published: Mutex<HashMap<String, PublishedRecord>>,
}

// Custom Debug implementation that hides the API token
impl std::fmt::Debug for CloudflareDnsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareDnsProvider")
            .field("api_token", &"<REDACTED>")
            .field("zone_id", &self.zone_id)
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl CloudflareDnsProvider {
    /// Create a new Cloudflare provider
    ///
    /// # Parameters
    ///
    /// - `api_token`: Cloudflare API token with Zone:DNS:Edit permissions
    /// - `zone_id`: Optional zone ID (auto-detected if absent)
    ///
    /// # Returns
    ///
    /// - `Err(Error::Config)`: If the token is empty or the HTTP client or
    ///   resolver cannot be built
    pub fn new(api_token: impl Into<String>, zone_id: Option<String>) -> Result<Self> {
        Self::with_propagation(api_token, zone_id, PropagationChecker::new()?)
    }

    /// Create a provider with a custom propagation checker
    pub fn with_propagation(
        api_token: impl Into<String>,
        zone_id: Option<String>,
        propagation: PropagationChecker,
    ) -> Result<Self> {
        let api_token = api_token.into();

        // Validate token is not empty
        if api_token.trim().is_empty() {
            return Err(Error::config("Cloudflare API token cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_token,
            zone_id: zone_id.filter(|id| !id.trim().is_empty()),
            api_base: CLOUDFLARE_API_BASE.to_string(),
            client,
            propagation,
            published: Mutex::new(HashMap::new()),
        })
    }

    /// Point the provider at a different API endpoint
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Get the zone ID for a record
    ///
    /// If zone_id is set, returns it directly. Otherwise, queries Cloudflare
    /// for the zone guessed by [`zone_name_for`].
    ///
    /// ```http
    /// GET /zones?name=example.com
    /// Authorization: Bearer <token>
    /// ```
    async fn get_zone_id(&self, record_name: &str) -> Result<String> {
        if let Some(ref zone_id) = self.zone_id {
            tracing::debug!("Using pre-configured zone ID");
            return Ok(zone_id.clone());
        }

        let zone_name = zone_name_for(record_name)?;
        tracing::debug!(zone = %zone_name, "Looking up zone ID");

        let url = format!("{}/zones?name={}", self.api_base, zone_name);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_token)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| Error::dns_provider(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(map_status_error(status, &body, &format!("Zone lookup for {}", zone_name)));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| Error::dns_provider(format!("Failed to parse response: {}", e)))?;

        let zone_id = json["result"]
            .as_array()
            .ok_or_else(|| Error::dns_provider("Invalid response format: result is not an array"))?
            .first()
            .ok_or_else(|| Error::dns_provider(format!("Zone not found: {}", zone_name)))?["id"]
            .as_str()
            .ok_or_else(|| Error::dns_provider("Invalid response format: zone.id is not a string"))?;

        tracing::debug!(zone_id = %zone_id, "Found zone ID");
        Ok(zone_id.to_string())
    }
}

#[async_trait]
impl DnsChallengeProvider for CloudflareDnsProvider {
    /// Create the challenge TXT record
    ///
    /// ```http
    /// POST /zones/:zone_id/dns_records
    /// {"type": "TXT", "name": "_acme-challenge.example.com", "content": "...", "ttl": 120}
    /// ```
    async fn publish(&self, challenge: &TxtChallenge) -> Result<()> {
        let zone_id = self.get_zone_id(&challenge.record_name).await?;

        let url = format!("{}/zones/{}/dns_records", self.api_base, zone_id);
        let payload = serde_json::json!({
            "type": "TXT",
            "name": challenge.record_name,
            "content": challenge.value,
            "ttl": CHALLENGE_TTL,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::dns_provider(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(map_status_error(
                status,
                &body,
                &format!("Creating TXT record {}", challenge.record_name),
            ));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| Error::dns_provider(format!("Failed to parse response: {}", e)))?;
        let record_id = created_record_id(&json)?;

        tracing::info!(
            record = %challenge.record_name,
            record_id = %record_id,
            "Created TXT record"
        );

        self.published.lock().await.insert(
            challenge.token.clone(),
            PublishedRecord { zone_id, record_id },
        );

        Ok(())
    }

    async fn await_propagation(&self, challenge: &TxtChallenge, timeout: Duration) -> Result<bool> {
        Ok(self
            .propagation
            .wait_for(&challenge.record_name, &challenge.value, timeout)
            .await)
    }

    /// Delete the challenge TXT record
    ///
    /// ```http
    /// DELETE /zones/:zone_id/dns_records/:record_id
    /// ```
    async fn remove(&self, challenge: &TxtChallenge) -> Result<()> {
        let Some(record) = self.published.lock().await.remove(&challenge.token) else {
            tracing::debug!(
                record = %challenge.record_name,
                "No record created for this challenge, nothing to remove"
            );
            return Ok(());
        };

        let url = format!(
            "{}/zones/{}/dns_records/{}",
            self.api_base, record.zone_id, record.record_id
        );

        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| Error::dns_provider(format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        if status == 404 {
            tracing::debug!(record_id = %record.record_id, "TXT record already gone");
            return Ok(());
        }
        if !response.status().is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(map_status_error(
                status,
                &body,
                &format!("Deleting TXT record {}", challenge.record_name),
            ));
        }

        tracing::info!(
            record = %challenge.record_name,
            record_id = %record.record_id,
            "Deleted TXT record"
        );
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "cloudflare"
    }
}

/// Guess the zone that holds `record_name`
///
/// Takes the last two labels, or the last three when the second-level label
/// looks like a public suffix part (`example.co.uk`). Configure the zone ID
/// explicitly for anything this gets wrong.
pub fn zone_name_for(record_name: &str) -> Result<String> {
    let name = record_name.trim_end_matches('.');
    let parts: Vec<&str> = name.split('.').filter(|p| !p.is_empty()).collect();

    if parts.len() < 2 {
        return Err(Error::config(format!("Invalid domain name: {}", record_name)));
    }

    let n = parts.len();
    let zone = if n >= 4 && parts[n - 2].len() <= 3 {
        format!("{}.{}.{}", parts[n - 3], parts[n - 2], parts[n - 1])
    } else {
        format!("{}.{}", parts[n - 2], parts[n - 1])
    };

    Ok(zone)
}

fn created_record_id(json: &Value) -> Result<String> {
    if json["success"].as_bool() == Some(false) {
        return Err(Error::dns_provider(format!(
            "Cloudflare rejected the record: {}",
            json["errors"]
        )));
    }

    json["result"]["id"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::dns_provider("Invalid response format: result.id is not a string"))
}

/// Map a non-success HTTP status to a provider error
fn map_status_error(status: u16, body: &str, context: &str) -> Error {
    match status {
        401 | 403 => Error::dns_provider(format!(
            "{}: Authentication failed: Invalid API token or insufficient permissions. Status: {}",
            context, status
        )),
        404 => Error::dns_provider(format!("{}: Not found. Status: {}", context, status)),
        429 => Error::dns_provider(format!(
            "{}: Rate limit exceeded. Please retry later. Status: {}",
            context, status
        )),
        500..=599 => Error::dns_provider(format!(
            "{}: Cloudflare server error (transient): {} - {}",
            context, status, body
        )),
        _ => Error::dns_provider(format!("{}: {} - {}", context, status, body)),
    }
}
