//! # Request Authentication
//!
//! Resolves caller identity under two mutually exclusive capability paths:
//! a trusted-agent shared secret, or a wallet signature over the canonical
//! action message. The path is selected by the request's explicit `mode`
//! discriminator. Toward the caller every failure is the same undifferentiated
//! `Unauthorized`; the real cause is logged server-side only, so the endpoint
//! leaks nothing about signature, timestamp, or nonce validity.

use ethers::types::{Address, Signature};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::config::AuthSettings;
use crate::errors::AuthError;
use crate::metrics::NONCE_REPLAYS_REJECTED;
use crate::nonce_ledger::NonceLedger;
use crate::store::Clock;
use crate::types::{AuthContext, AuthMode, AuthPayload, CallerIdentity};

#[derive(Debug)]
pub struct RequestAuthenticator {
    settings: AuthSettings,
    nonce_ledger: Arc<NonceLedger>,
    clock: Arc<dyn Clock>,
}

/// Builds the canonical human-readable message a wallet signs for an action:
/// the fixed action label, then ordered `field:value` lines for the signer,
/// the business parameters, the nonce, and the timestamp. Signer and server
/// must produce this byte-for-byte identically.
pub fn canonical_message(
    action_label: &str,
    signer: Address,
    business_fields: &[(&str, String)],
    nonce: &str,
    timestamp: i64,
) -> String {
    let mut lines = Vec::with_capacity(business_fields.len() + 3);
    lines.push(action_label.to_string());
    lines.push(format!("signer:{signer:#x}"));
    for (key, value) in business_fields {
        lines.push(format!("{key}:{value}"));
    }
    lines.push(format!("nonce:{nonce}"));
    lines.push(format!("timestamp:{timestamp}"));
    lines.join("\n")
}

/// Constant-time equality over credential bytes.
fn secrets_match(presented: &str, expected: &str) -> bool {
    if presented.len() != expected.len() {
        return false;
    }
    presented
        .bytes()
        .zip(expected.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

impl RequestAuthenticator {
    pub fn new(
        settings: AuthSettings,
        nonce_ledger: Arc<NonceLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { settings, nonce_ledger, clock }
    }

    /// Authorizes an action request. `scope` namespaces nonce consumption
    /// per action type; `action_label` and `business_fields` reconstruct the
    /// canonical signed message on the wallet path.
    ///
    /// On the wallet path the nonce is consumed immediately upon successful
    /// verification, before any downstream work, so a caller cannot probe
    /// with the same nonce twice; retries of the authorized action itself go
    /// through the idempotency key.
    #[instrument(skip(self, payload, business_fields), fields(scope, action_label))]
    pub async fn authorize(
        &self,
        scope: &str,
        action_label: &str,
        business_fields: &[(&str, String)],
        payload: &AuthPayload,
    ) -> Result<AuthContext, AuthError> {
        match payload {
            AuthPayload::TrustedAgent { token } => self.authorize_agent(token),
            AuthPayload::WalletSigned { signer, signature, nonce, timestamp } => {
                self.authorize_wallet(scope, action_label, business_fields, *signer, signature, nonce, *timestamp)
                    .await
            }
        }
    }

    fn authorize_agent(&self, token: &str) -> Result<AuthContext, AuthError> {
        let expected = match self.settings.agent_secret.as_deref() {
            Some(secret) if !secret.is_empty() => secret,
            _ => {
                warn!(target: "auth", "trusted-agent path requested but no secret is configured");
                return Err(AuthError::AgentPathUnavailable);
            }
        };

        if token.len() < self.settings.min_secret_len || !secrets_match(token, expected) {
            debug!(target: "auth", "agent credential rejected");
            return Err(AuthError::Unauthorized);
        }

        Ok(AuthContext { mode: AuthMode::TrustedAgent, identity: CallerIdentity::Agent })
    }

    #[allow(clippy::too_many_arguments)]
    async fn authorize_wallet(
        &self,
        scope: &str,
        action_label: &str,
        business_fields: &[(&str, String)],
        claimed_signer: Address,
        signature: &str,
        nonce: &str,
        timestamp: i64,
    ) -> Result<AuthContext, AuthError> {
        if claimed_signer == Address::zero() || nonce.is_empty() {
            debug!(target: "auth", "malformed signer or nonce");
            return Err(AuthError::Unauthorized);
        }

        let now = self.clock.now_unix();
        if (now - timestamp).abs() > self.settings.max_clock_skew_secs {
            debug!(target: "auth", timestamp, now, "signed timestamp outside skew window");
            return Err(AuthError::Unauthorized);
        }

        let parsed: Signature = signature.parse().map_err(|_| {
            debug!(target: "auth", "unparseable signature");
            AuthError::Unauthorized
        })?;

        let message =
            canonical_message(action_label, claimed_signer, business_fields, nonce, timestamp);
        let recovered = parsed.recover(message).map_err(|_| {
            debug!(target: "auth", "signature recovery failed");
            AuthError::Unauthorized
        })?;

        // Address comparison is over raw bytes, which subsumes the
        // case-insensitive hex comparison of the wire format.
        if recovered != claimed_signer {
            debug!(target: "auth", claimed = ?claimed_signer, recovered = ?recovered, "recovered signer mismatch");
            return Err(AuthError::Unauthorized);
        }

        let consumed = self
            .nonce_ledger
            .consume(scope, claimed_signer, nonce, timestamp)
            .await
            .unwrap_or(false);
        if !consumed {
            NONCE_REPLAYS_REJECTED.inc();
            debug!(target: "auth", scope, "nonce already consumed or expired");
            return Err(AuthError::Unauthorized);
        }

        Ok(AuthContext {
            mode: AuthMode::WalletSigned,
            identity: CallerIdentity::Wallet(claimed_signer),
        })
    }
}
