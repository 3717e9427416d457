// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Cloud KMS encryption of provider tokens at rest.
//!
//! Every ciphertext is bound to its credential document through KMS
//! additional authenticated data, so a token copied onto another user's
//! document fails to decrypt.

use crate::error::AppError;
use crate::models::CredentialKey;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::sync::Arc;

/// KMS encryption service.
#[derive(Clone)]
pub struct KmsService {
    /// Format: projects/{project}/locations/{location}/keyRings/{ring}/cryptoKeys/{key}
    key_path: String,
    client: Option<Arc<google_cloud_kms::client::Client>>,
}

impl KmsService {
    const KEY_RING_NAME: &str = "wearables-sync";

    /// Connect to GCP KMS.
    pub async fn new(project_id: &str, location: &str, key_name: &str) -> Result<Self, AppError> {
        let key_path = format!(
            "projects/{}/locations/{}/keyRings/{}/cryptoKeys/{}",
            project_id,
            location,
            Self::KEY_RING_NAME,
            key_name
        );

        let config = google_cloud_kms::client::ClientConfig::default()
            .with_auth()
            .await
            .map_err(|e| {
                AppError::Internal(anyhow::anyhow!("Failed to create KMS auth config: {}", e))
            })?;

        let client = google_cloud_kms::client::Client::new(config)
            .await
            .map_err(|e| {
                AppError::Internal(anyhow::anyhow!("Failed to create KMS client: {}", e))
            })?;

        tracing::info!(key = %key_path, "KMS token encryption enabled");

        Ok(Self {
            key_path,
            client: Some(Arc::new(client)),
        })
    }

    /// Offline mock: base64 "encryption". Debug builds only.
    #[cfg(debug_assertions)]
    pub fn new_mock() -> Self {
        Self {
            key_path: "projects/mock/locations/mock/keyRings/mock/cryptoKeys/mock".to_string(),
            client: None,
        }
    }

    /// Encrypt `plaintext` bound to `aad`. Returns base64 ciphertext.
    pub async fn encrypt(&self, plaintext: &str, aad: &[u8]) -> Result<String, AppError> {
        use google_cloud_googleapis::cloud::kms::v1::EncryptRequest;

        #[cfg(debug_assertions)]
        {
            if self.client.is_none() {
                let mut sealed = hex::encode(aad).into_bytes();
                sealed.push(b':');
                sealed.extend_from_slice(plaintext.as_bytes());
                return Ok(BASE64.encode(sealed));
            }
        }

        // Release builds have no mock: a missing client is an error.
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("KMS client not connected")))?;

        let req = EncryptRequest {
            name: self.key_path.clone(),
            plaintext: plaintext.as_bytes().to_vec(),
            additional_authenticated_data: aad.to_vec(),
            ..Default::default()
        };

        let response = client
            .encrypt(req, None)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("KMS encrypt failed: {}", e)))?;

        Ok(BASE64.encode(response.ciphertext))
    }

    /// Decrypt base64 ciphertext produced by [`Self::encrypt`] with the same `aad`.
    pub async fn decrypt(&self, ciphertext_b64: &str, aad: &[u8]) -> Result<String, AppError> {
        use google_cloud_googleapis::cloud::kms::v1::DecryptRequest;

        let ciphertext = BASE64.decode(ciphertext_b64).map_err(|e| {
            AppError::Internal(anyhow::anyhow!("Base64 ciphertext decode failed: {}", e))
        })?;

        #[cfg(debug_assertions)]
        {
            if self.client.is_none() {
                let expected = format!("{}:", hex::encode(aad));
                let plaintext = ciphertext
                    .strip_prefix(expected.as_bytes())
                    .ok_or_else(|| AppError::Internal(anyhow::anyhow!("AAD mismatch (mock)")))?;
                return String::from_utf8(plaintext.to_vec()).map_err(|e| {
                    AppError::Internal(anyhow::anyhow!("UTF-8 decode failed (mock): {}", e))
                });
            }
        }

        let client = self
            .client
            .as_ref()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("KMS client not connected")))?;

        let req = DecryptRequest {
            name: self.key_path.clone(),
            ciphertext,
            additional_authenticated_data: aad.to_vec(),
            ..Default::default()
        };

        let response = client
            .decrypt(req, None)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("KMS decrypt failed: {}", e)))?;

        String::from_utf8(response.plaintext)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("UTF-8 decode failed: {}", e)))
    }
}

/// Encrypt a credential's tokens before storing.
pub async fn encrypt_tokens(
    kms: &KmsService,
    key: CredentialKey,
    access_token: &str,
    refresh_token: Option<&str>,
) -> Result<(String, Option<String>), AppError> {
    let aad = key.document_id();
    let encrypted_access = kms.encrypt(access_token, aad.as_bytes()).await?;
    let encrypted_refresh = match refresh_token {
        Some(token) => Some(kms.encrypt(token, aad.as_bytes()).await?),
        None => None,
    };
    Ok((encrypted_access, encrypted_refresh))
}

/// Decrypt a credential's tokens after retrieval.
pub async fn decrypt_tokens(
    kms: &KmsService,
    key: CredentialKey,
    encrypted_access: &str,
    encrypted_refresh: Option<&str>,
) -> Result<(String, Option<String>), AppError> {
    let aad = key.document_id();
    let access_token = kms.decrypt(encrypted_access, aad.as_bytes()).await?;
    let refresh_token = match encrypted_refresh {
        Some(token) => Some(kms.decrypt(token, aad.as_bytes()).await?),
        None => None,
    };
    Ok((access_token, refresh_token))
}
