// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! HMAC-signed OAuth `state` parameter.
//!
//! Format before base64url encoding:
//! `provider|user_id|issued_at_ms_hex|nonce_hex|signature_hex`

use super::{pkce::random_bytes, OAuthError};
use crate::models::ProviderName;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Data bound into a signed state value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePayload {
    pub provider: ProviderName,
    pub user_id: Uuid,
    pub issued_at_ms: i64,
    pub nonce: String,
}

impl StatePayload {
    /// Fresh payload with the current time and a random nonce.
    pub fn issue(provider: ProviderName, user_id: Uuid) -> Result<Self, OAuthError> {
        Ok(Self {
            provider,
            user_id,
            issued_at_ms: Utc::now().timestamp_millis(),
            nonce: hex::encode(random_bytes::<16>()?),
        })
    }

    fn data(&self) -> String {
        format!(
            "{}|{}|{:x}|{}",
            self.provider, self.user_id, self.issued_at_ms, self.nonce
        )
    }
}

/// Sign `payload` and encode it for use as the `state` query parameter.
pub fn sign_state(secret: &[u8], payload: &StatePayload) -> Result<String, OAuthError> {
    let data = payload.data();
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| OAuthError::Internal(format!("HMAC key error: {e}")))?;
    mac.update(data.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    Ok(URL_SAFE_NO_PAD.encode(format!("{}|{}", data, signature)))
}

/// Verify the signature on `state` and decode its payload.
pub fn verify_state(state: &str, secret: &[u8]) -> Option<StatePayload> {
    let bytes = URL_SAFE_NO_PAD.decode(state).ok()?;
    let state_str = String::from_utf8(bytes).ok()?;

    let parts: Vec<&str> = state_str.splitn(5, '|').collect();
    if parts.len() != 5 {
        return None;
    }

    let signed_len = state_str.len() - parts[4].len() - 1;
    let signature = hex::decode(parts[4]).ok()?;

    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(state_str[..signed_len].as_bytes());
    if mac.verify_slice(&signature).is_err() {
        tracing::error!("OAuth state signature mismatch! Potential tampering.");
        return None;
    }

    Some(StatePayload {
        provider: parts[0].parse().ok()?,
        user_id: parts[1].parse().ok()?,
        issued_at_ms: i64::from_str_radix(parts[2], 16).ok()?,
        nonce: parts[3].to_string(),
    })
}
