// # ACME Client Backend
//
// This crate implements `wildcert_core::AcmeClient` on top of `instant-acme`.
//
// ## Responsibilities
//
// - Directory discovery (one GET, checked for the endpoints we need)
// - Account registration with a fresh account key per session
// - Order, authorization and challenge plumbing
// - Mapping RFC 8555 problem documents to `ProtocolProblem`
//
// ## Not Here
//
// - Polling, backoff and timeouts (owned by `AcmeOrchestrator`)
// - Key and CSR generation (owned by `wildcert_core::crypto`)
// - Account persistence (every cycle registers a new account)

use async_trait::async_trait;
use instant_acme::{
    Account, ChallengeType, Identifier, NewAccount, NewOrder, Order, Problem,
};
use serde::Deserialize;
use std::time::Duration;
use wildcert_core::error::ProtocolProblem;
use wildcert_core::traits::{
    AccountInfo, AcmeClient, AcmeSession, AuthorizationState, AuthorizationStatus,
    Dns01Challenge, IssuedCertificate, NewAccountRequest, OrderState, OrderStatus,
    PendingAuthorization, ProtocolResult, split_leaf_and_chain,
};

/// Timeout for the directory request
const DIRECTORY_TIMEOUT: Duration = Duration::from_secs(30);

/// The subset of the ACME directory a cycle depends on
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Directory {
    pub new_nonce: String,
    pub new_account: String,
    pub new_order: String,
    #[serde(default)]
    pub meta: Option<DirectoryMeta>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryMeta {
    #[serde(default)]
    pub terms_of_service: Option<String>,
}

/// `AcmeClient` backed by instant-acme
#[derive(Debug, Clone)]
pub struct InstantAcmeClient {
    http: reqwest::Client,
}

impl InstantAcmeClient {
    /// Create a new client
    ///
    /// # Returns
    ///
    /// - `Err(Error::Config)`: If the HTTP client cannot be built
    pub fn new() -> wildcert_core::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(DIRECTORY_TIMEOUT)
            .build()
            .map_err(|e| wildcert_core::Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { http })
    }

    /// Fetch and parse the directory document
    pub async fn fetch_directory(&self, directory_url: &str) -> ProtocolResult<Directory> {
        let response = self
            .http
            .get(directory_url)
            .send()
            .await
            .map_err(|e| ProtocolProblem::new(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let mut problem = ProtocolProblem::new(format!("Directory request returned {}", status));
            problem.status = Some(status.as_u16());
            return Err(problem);
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProtocolProblem::new(format!("Failed to read directory: {}", e)))?;

        parse_directory(&body)
    }
}

#[async_trait]
impl AcmeClient for InstantAcmeClient {
    async fn open(&self, directory_url: &str) -> ProtocolResult<Box<dyn AcmeSession>> {
        let directory = self.fetch_directory(directory_url).await?;

        tracing::debug!(
            new_account = %directory.new_account,
            new_order = %directory.new_order,
            terms_of_service = ?directory.meta.as_ref().and_then(|m| m.terms_of_service.as_deref()),
            "Fetched ACME directory"
        );

        Ok(Box::new(InstantAcmeSession {
            directory_url: directory_url.to_string(),
            account: None,
            order: None,
        }))
    }

    fn client_name(&self) -> &'static str {
        "instant-acme"
    }
}

/// Parse a directory document, requiring the endpoints a cycle uses
pub fn parse_directory(body: &str) -> ProtocolResult<Directory> {
    serde_json::from_str(body)
        .map_err(|e| ProtocolProblem::new(format!("Malformed ACME directory: {}", e)))
}

/// One cycle's account and order
struct InstantAcmeSession {
    directory_url: String,
    account: Option<Account>,
    order: Option<Order>,
}

impl InstantAcmeSession {
    fn account(&self) -> ProtocolResult<&Account> {
        self.account
            .as_ref()
            .ok_or_else(|| ProtocolProblem::new("No account registered in this session"))
    }

    fn order(&mut self) -> ProtocolResult<&mut Order> {
        self.order
            .as_mut()
            .ok_or_else(|| ProtocolProblem::new("No order created in this session"))
    }
}

#[async_trait]
impl AcmeSession for InstantAcmeSession {
    async fn register_account(&mut self, request: &NewAccountRequest) -> ProtocolResult<AccountInfo> {
        let contact: Vec<&str> = request.contact.iter().map(String::as_str).collect();
        let new_account = NewAccount {
            contact: &contact,
            terms_of_service_agreed: request.terms_of_service_agreed,
            only_return_existing: false,
        };

        // The account key is generated by instant-acme and dropped with the session
        let (account, _credentials) = Account::create(&new_account, &self.directory_url, None)
            .await
            .map_err(problem_from_error)?;

        let info = AccountInfo {
            account_url: account.id().to_string(),
        };
        self.account = Some(account);

        Ok(info)
    }

    async fn create_order(&mut self, identifiers: &[String]) -> ProtocolResult<Vec<PendingAuthorization>> {
        let identifiers: Vec<Identifier> = identifiers
            .iter()
            .map(|name| Identifier::Dns(name.clone()))
            .collect();

        let mut order = self
            .account()?
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await
            .map_err(problem_from_error)?;

        let authorizations = order.authorizations().await.map_err(problem_from_error)?;
        let urls = order.state().authorizations.clone();

        if urls.len() != authorizations.len() {
            return Err(ProtocolProblem::new(format!(
                "Order lists {} authorizations but {} were fetched",
                urls.len(),
                authorizations.len()
            )));
        }

        let pending = urls
            .into_iter()
            .zip(authorizations.iter())
            .map(|(url, authorization)| {
                let dns01 = authorization
                    .challenges
                    .iter()
                    .find(|c| c.r#type == ChallengeType::Dns01)
                    .map(|challenge| Dns01Challenge {
                        url: challenge.url.clone(),
                        token: challenge.token.clone(),
                        key_authorization: order.key_authorization(challenge).as_str().to_string(),
                    });

                PendingAuthorization {
                    url,
                    identifier: identifier_name(&authorization.identifier),
                    status: map_authorization_status(&authorization.status),
                    dns01,
                }
            })
            .collect();

        self.order = Some(order);
        Ok(pending)
    }

    async fn set_challenge_ready(&mut self, challenge_url: &str) -> ProtocolResult<()> {
        self.order()?
            .set_challenge_ready(challenge_url)
            .await
            .map_err(problem_from_error)
    }

    async fn authorization_status(&mut self, authorization_url: &str) -> ProtocolResult<AuthorizationState> {
        let order = self.order()?;

        let index = order
            .state()
            .authorizations
            .iter()
            .position(|url| url == authorization_url)
            .ok_or_else(|| {
                ProtocolProblem::new(format!("Unknown authorization {}", authorization_url))
            })?;

        let authorizations = order.authorizations().await.map_err(problem_from_error)?;
        let authorization = authorizations.get(index).ok_or_else(|| {
            ProtocolProblem::new(format!("Authorization {} missing from order", authorization_url))
        })?;

        let problem = authorization
            .challenges
            .iter()
            .find(|c| c.r#type == ChallengeType::Dns01)
            .and_then(|c| c.error.as_ref())
            .map(problem_from_document);

        Ok(AuthorizationState {
            status: map_authorization_status(&authorization.status),
            problem,
        })
    }

    async fn finalize(&mut self, csr_der: &[u8]) -> ProtocolResult<()> {
        self.order()?
            .finalize(csr_der)
            .await
            .map_err(problem_from_error)
    }

    async fn order_status(&mut self) -> ProtocolResult<OrderState> {
        let order = self.order()?;
        order.refresh().await.map_err(problem_from_error)?;

        let state = order.state();
        Ok(OrderState {
            status: map_order_status(&state.status),
            problem: state.error.as_ref().map(problem_from_document),
        })
    }

    async fn download_certificate(&mut self) -> ProtocolResult<IssuedCertificate> {
        let chain = self
            .order()?
            .certificate()
            .await
            .map_err(problem_from_error)?
            .ok_or_else(|| ProtocolProblem::new("Certificate not available for this order"))?;

        split_leaf_and_chain(&chain)
            .ok_or_else(|| ProtocolProblem::new("Certificate response held no PEM certificate"))
    }
}

#[allow(unreachable_patterns)]
fn identifier_name(identifier: &Identifier) -> String {
    match identifier {
        Identifier::Dns(name) => name.clone(),
        other => format!("{:?}", other),
    }
}

#[allow(unreachable_patterns)]
fn map_authorization_status(status: &instant_acme::AuthorizationStatus) -> AuthorizationStatus {
    use instant_acme::AuthorizationStatus as Acme;

    match status {
        Acme::Pending => AuthorizationStatus::Pending,
        Acme::Valid => AuthorizationStatus::Valid,
        Acme::Invalid => AuthorizationStatus::Invalid,
        Acme::Expired => AuthorizationStatus::Expired,
        Acme::Revoked => AuthorizationStatus::Revoked,
        _ => AuthorizationStatus::Deactivated,
    }
}

fn map_order_status(status: &instant_acme::OrderStatus) -> OrderStatus {
    use instant_acme::OrderStatus as Acme;

    match status {
        Acme::Pending => OrderStatus::Pending,
        Acme::Ready => OrderStatus::Ready,
        Acme::Processing => OrderStatus::Processing,
        Acme::Valid => OrderStatus::Valid,
        Acme::Invalid => OrderStatus::Invalid,
    }
}

fn problem_from_document(problem: &Problem) -> ProtocolProblem {
    ProtocolProblem::from_document(problem.r#type.clone(), problem.detail.clone(), problem.status)
}

fn problem_from_error(error: instant_acme::Error) -> ProtocolProblem {
    match error {
        instant_acme::Error::Api(problem) => problem_from_document(&problem),
        other => ProtocolProblem::new(other.to_string()),
    }
}
