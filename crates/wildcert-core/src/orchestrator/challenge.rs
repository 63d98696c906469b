//! Mapping an order's authorizations to DNS-01 work items

use crate::error::{Error, ProtocolProblem, Result};
use crate::traits::{AuthorizationStatus, PendingAuthorization, TxtChallenge};

/// One authorization that still needs a DNS-01 round trip
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ChallengePlan {
    pub authorization_url: String,
    pub challenge_url: String,
    pub identifier: String,
    pub txt: TxtChallenge,
}

/// Build the DNS-01 plan for an order
///
/// Authorizations the CA already considers valid are skipped. Any other
/// non-pending authorization, or one without a DNS-01 challenge, fails the
/// order.
pub(crate) fn plan_challenges(authorizations: &[PendingAuthorization]) -> Result<Vec<ChallengePlan>> {
    if authorizations.is_empty() {
        return Err(Error::OrderCreationFailed(ProtocolProblem::new(
            "Order returned no authorizations",
        )));
    }

    let mut plans = Vec::with_capacity(authorizations.len());

    for authorization in authorizations {
        match authorization.status {
            AuthorizationStatus::Valid => {
                tracing::debug!(
                    identifier = %authorization.identifier,
                    "Authorization already valid, skipping challenge"
                );
                continue;
            }
            AuthorizationStatus::Pending => {}
            ref other => {
                return Err(Error::OrderCreationFailed(ProtocolProblem::new(format!(
                    "Authorization for {} is {:?}",
                    authorization.identifier, other
                ))));
            }
        }

        let dns01 = authorization.dns01.as_ref().ok_or_else(|| {
            Error::OrderCreationFailed(ProtocolProblem::new(format!(
                "No dns-01 challenge offered for {}",
                authorization.identifier
            )))
        })?;

        plans.push(ChallengePlan {
            authorization_url: authorization.url.clone(),
            challenge_url: dns01.url.clone(),
            identifier: authorization.identifier.clone(),
            txt: TxtChallenge::new(
                &authorization.identifier,
                &dns01.token,
                &dns01.key_authorization,
            ),
        });
    }

    Ok(plans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::Dns01Challenge;

    fn authorization(identifier: &str, status: AuthorizationStatus, dns01: bool) -> PendingAuthorization {
        PendingAuthorization {
            url: format!("https://ca.test/authz/{}", identifier),
            identifier: identifier.to_string(),
            status,
            dns01: dns01.then(|| Dns01Challenge {
                url: format!("https://ca.test/chall/{}", identifier),
                token: format!("token-{}", identifier),
                key_authorization: format!("token-{}.thumb", identifier),
            }),
        }
    }

    #[test]
    fn plans_pending_authorizations_in_order() {
        let plans = plan_challenges(&[
            authorization("example.com", AuthorizationStatus::Pending, true),
            authorization("*.example.com", AuthorizationStatus::Pending, true),
        ])
        .unwrap();

        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].identifier, "example.com");
        assert_eq!(plans[1].identifier, "*.example.com");
        assert_eq!(plans[1].txt.record_name, "_acme-challenge.example.com");
        assert_ne!(plans[0].txt.value, plans[1].txt.value);
    }

    #[test]
    fn skips_valid_authorizations() {
        let plans = plan_challenges(&[
            authorization("example.com", AuthorizationStatus::Valid, true),
            authorization("*.example.com", AuthorizationStatus::Pending, true),
        ])
        .unwrap();

        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].identifier, "*.example.com");
    }

    #[test]
    fn missing_dns01_fails_the_order() {
        let err = plan_challenges(&[authorization("example.com", AuthorizationStatus::Pending, false)])
            .unwrap_err();
        assert!(matches!(err, Error::OrderCreationFailed(_)));
        assert!(err.to_string().contains("dns-01"));
    }

    #[test]
    fn empty_or_dead_orders_fail() {
        assert!(matches!(
            plan_challenges(&[]),
            Err(Error::OrderCreationFailed(_))
        ));
        assert!(matches!(
            plan_challenges(&[authorization("example.com", AuthorizationStatus::Expired, true)]),
            Err(Error::OrderCreationFailed(_))
        ));
    }
}
