// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! The fixed OAuth orchestration shared by every provider.
//!
//! ## Concurrency
//!
//! Every read-modify-write of a credential happens while holding the
//! per-(user, provider) lock from [`RefreshLocks`]. Those critical sections
//! run inside `tokio::spawn`, so a caller that is dropped mid-request (client
//! disconnect, handler timeout) cannot abandon a refresh between rotating the
//! token at the provider and persisting it.
//!
//! ```text
//! Request A (user 1) ──► cache miss ──► acquire lock ──► refresh ──► cache
//! Request B (user 1) ──► cache miss ──► wait on lock ──► cache hit
//! Request C (user 2) ──► cache miss ──► acquire lock ──► refresh ──► cache
//! ```

use super::{
    merge_scopes, pkce::PkcePair, pkce::CHALLENGE_METHOD, state, AuthorizationRequest,
    ExchangeOutcome, OAuthError, OAuthState, ProviderDescriptor, ProviderIdentity, ProviderOAuth,
    RefreshOutcome, TokenRequest, TokenResponse, Verification,
};
use crate::db::CredentialStore;
use crate::models::{CredentialKey, CredentialStatus, ProviderCredential, ProviderName};
use crate::services::http::{check_response_json, ProviderApiError};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Refresh access tokens this long before they expire.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 5 * 60;

/// Authorizations not completed within this window are discarded.
const PENDING_AUTHORIZATION_TTL_SECS: i64 = 10 * 60;

/// Characters of the refresh token compared after a write.
const VERIFICATION_PREFIX_CHARS: usize = 20;

/// Cached access token with expiry.
#[derive(Clone)]
pub struct CachedToken {
    access_token: String,
    expires_at: Option<DateTime<Utc>>,
}

/// Token cache shared across requests (per-instance, in-memory).
pub type TokenCache = Arc<DashMap<CredentialKey, CachedToken>>;

/// Per-credential locks to prevent concurrent refresh races.
pub type RefreshLocks = Arc<DashMap<CredentialKey, Arc<Mutex<()>>>>;

/// In-flight authorization, keyed by its signed state value.
struct PendingAuthorization {
    user_id: Uuid,
    scope: String,
    code_verifier: Option<String>,
    redirect_uri: Option<String>,
    created_at: DateTime<Utc>,
}

impl PendingAuthorization {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > Duration::seconds(PENDING_AUTHORIZATION_TTL_SECS)
    }
}

struct EngineInner {
    provider: Arc<dyn ProviderOAuth>,
    http: reqwest::Client,
    store: Arc<dyn CredentialStore>,
    state_key: Vec<u8>,
    pending: DashMap<String, PendingAuthorization>,
    token_cache: TokenCache,
    refresh_locks: RefreshLocks,
}

/// OAuth lifecycle for one provider. Cheap to clone.
#[derive(Clone)]
pub struct OAuthEngine {
    inner: Arc<EngineInner>,
}

impl OAuthEngine {
    pub fn new(
        provider: Arc<dyn ProviderOAuth>,
        store: Arc<dyn CredentialStore>,
        http: reqwest::Client,
        state_key: Vec<u8>,
        token_cache: TokenCache,
        refresh_locks: RefreshLocks,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                provider,
                http,
                store,
                state_key,
                pending: DashMap::new(),
                token_cache,
                refresh_locks,
            }),
        }
    }

    pub fn descriptor(&self) -> &ProviderDescriptor {
        self.inner.provider.descriptor()
    }

    pub fn provider(&self) -> ProviderName {
        self.descriptor().provider
    }

    fn key(&self, user_id: Uuid) -> CredentialKey {
        CredentialKey::new(user_id, self.provider())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Authorization
    // ─────────────────────────────────────────────────────────────────────

    /// Build the provider authorization URL and remember the pending flow.
    ///
    /// The requested scope (or the provider default) is always widened with
    /// the provider's mandatory scope.
    pub fn initiate_authorization(
        &self,
        user_id: Uuid,
        requested_scope: Option<&str>,
        redirect_uri: Option<String>,
    ) -> Result<AuthorizationRequest, OAuthError> {
        let now = Utc::now();
        self.inner.pending.retain(|_, p| !p.is_expired(now));

        let descriptor = self.descriptor();
        let requested = requested_scope
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&descriptor.default_scope);
        let scope = merge_scopes(requested, self.inner.provider.mandatory_scope());

        let pkce = if descriptor.use_pkce {
            Some(PkcePair::generate()?)
        } else {
            None
        };

        let payload = state::StatePayload::issue(descriptor.provider, user_id)?;
        let signed_state = state::sign_state(&self.inner.state_key, &payload)?;

        let mut authorization_url = format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}",
            descriptor.authorize_url,
            urlencoding::encode(&descriptor.client_id),
            urlencoding::encode(&descriptor.redirect_uri),
            urlencoding::encode(&scope),
            signed_state,
        );
        if let Some(pkce) = &pkce {
            authorization_url.push_str(&format!(
                "&code_challenge={}&code_challenge_method={}",
                pkce.challenge, CHALLENGE_METHOD
            ));
        }

        self.inner.pending.insert(
            signed_state.clone(),
            PendingAuthorization {
                user_id,
                scope: scope.clone(),
                code_verifier: pkce.map(|p| p.verifier),
                redirect_uri,
                created_at: now,
            },
        );

        tracing::info!(
            provider = %descriptor.provider,
            %user_id,
            scope = %scope,
            pkce = descriptor.use_pkce,
            "Starting OAuth authorization"
        );

        Ok(AuthorizationRequest {
            authorization_url,
            state: signed_state,
            scope,
        })
    }

    /// Exchange an authorization code for tokens and persist the credential.
    ///
    /// The state must be one this engine issued, unexpired and unused.
    pub async fn exchange_code(
        &self,
        code: &str,
        oauth_state: &str,
    ) -> Result<ExchangeOutcome, OAuthError> {
        let payload = state::verify_state(oauth_state, &self.inner.state_key)
            .ok_or_else(|| OAuthError::InvalidState("signature check failed".to_string()))?;

        if payload.provider != self.provider() {
            return Err(OAuthError::InvalidState(format!(
                "state was issued for {}",
                payload.provider
            )));
        }

        // Single use: removing it here means a replayed callback fails.
        let (_, pending) = self
            .inner
            .pending
            .remove(oauth_state)
            .ok_or_else(|| OAuthError::InvalidState("unknown or already used".to_string()))?;

        if pending.user_id != payload.user_id {
            return Err(OAuthError::InvalidState("user mismatch".to_string()));
        }
        if pending.is_expired(Utc::now()) {
            return Err(OAuthError::InvalidState("authorization expired".to_string()));
        }

        let engine = self.clone();
        let code = code.to_string();
        tokio::spawn(async move { engine.complete_exchange(&code, pending).await }).await?
    }

    async fn complete_exchange(
        &self,
        code: &str,
        pending: PendingAuthorization,
    ) -> Result<ExchangeOutcome, OAuthError> {
        let descriptor = self.descriptor();
        let key = self.key(pending.user_id);

        let mut request = TokenRequest::authorization_code(code, &descriptor.redirect_uri);
        if let Some(verifier) = pending.code_verifier {
            request = request.with("code_verifier", verifier);
        }

        let tokens = self.post_token(request).await.map_err(|e| match e {
            ProviderApiError::Timeout => {
                tracing::warn!(provider = %key.provider, user_id = %key.user_id, "Code exchange timed out");
                OAuthError::Timeout
            }
            other => {
                tracing::error!(
                    provider = %key.provider,
                    user_id = %key.user_id,
                    error = %other,
                    "Code exchange rejected"
                );
                OAuthError::Exchange(other.to_string())
            }
        })?;

        let identity = self.fetch_provider_identity(&tokens.access_token).await;

        let now = Utc::now();
        let credential = ProviderCredential {
            user_id: pending.user_id,
            provider: key.provider,
            expires_at: tokens.expires_at(now),
            granted_scope: tokens
                .scope
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(pending.scope),
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            provider_user_id: identity.into_option(),
            status: CredentialStatus::Active,
            created_at: now,
            updated_at: now,
        };

        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        self.inner.store.upsert_credential(&credential).await?;
        self.cache_token(&credential);
        log_transition(key, OAuthState::Authorizing, OAuthState::Authorized);

        tracing::info!(
            provider = %key.provider,
            user_id = %key.user_id,
            provider_user_id = ?credential.provider_user_id,
            has_refresh_token = credential.refresh_token.is_some(),
            "OAuth successful, credential stored"
        );

        Ok(ExchangeOutcome {
            credential,
            redirect_uri: pending.redirect_uri,
        })
    }

    /// Look up the provider-side user ID. Failures degrade to
    /// [`ProviderIdentity::Unavailable`] and are logged.
    pub async fn fetch_provider_identity(&self, access_token: &str) -> ProviderIdentity {
        let provider = self.provider();
        match self
            .inner
            .provider
            .fetch_identity(&self.inner.http, access_token)
            .await
        {
            Ok(Some(id)) => {
                tracing::debug!(%provider, provider_user_id = %id, "Fetched provider identity");
                ProviderIdentity::Known(id)
            }
            Ok(None) => ProviderIdentity::Unavailable,
            Err(e) => {
                tracing::error!(%provider, error = %e, "Failed to fetch provider identity");
                ProviderIdentity::Unavailable
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Refresh
    // ─────────────────────────────────────────────────────────────────────

    /// Refresh the credential for `user_id` using `refresh_token`.
    ///
    /// Callers racing with the same token are serialized; the loser gets
    /// [`OAuthError::StaleRefreshToken`] instead of spending the provider's
    /// already-rotated token.
    pub async fn refresh(
        &self,
        user_id: Uuid,
        refresh_token: &str,
    ) -> Result<RefreshOutcome, OAuthError> {
        let engine = self.clone();
        let key = self.key(user_id);
        let presented = refresh_token.to_string();

        tokio::spawn(async move {
            let lock = engine.lock_for(key);
            let _guard = lock.lock().await;
            engine.refresh_locked(key, &presented).await
        })
        .await?
    }

    /// Refresh with whatever refresh token is currently stored, e.g. after
    /// the provider rejected an access token that looked unexpired.
    pub async fn force_refresh(&self, user_id: Uuid) -> Result<RefreshOutcome, OAuthError> {
        let key = self.key(user_id);
        self.inner.token_cache.remove(&key);

        let credential = self
            .inner
            .store
            .get_credential(key)
            .await?
            .ok_or(OAuthError::NotConnected(key))?;
        let refresh_token = credential.refresh_token.ok_or_else(|| {
            OAuthError::Refresh("no refresh token stored, re-authorization required".to_string())
        })?;

        self.refresh(user_id, &refresh_token).await
    }

    /// Must be called with the key's lock held.
    async fn refresh_locked(
        &self,
        key: CredentialKey,
        presented: &str,
    ) -> Result<RefreshOutcome, OAuthError> {
        let current = self
            .inner
            .store
            .get_credential(key)
            .await?
            .ok_or(OAuthError::NotConnected(key))?;

        match current.refresh_token.as_deref() {
            None => {
                return Err(OAuthError::Refresh(
                    "no refresh token stored, re-authorization required".to_string(),
                ))
            }
            Some(stored) if stored != presented => {
                tracing::info!(
                    provider = %key.provider,
                    user_id = %key.user_id,
                    "Refresh token already rotated by a concurrent refresh"
                );
                return Err(OAuthError::StaleRefreshToken);
            }
            Some(_) => {}
        }

        let from = stored_state(&current);
        log_transition(key, from, OAuthState::Refreshing);

        let request = self
            .inner
            .provider
            .prepare_refresh_request(presented, &current.granted_scope);

        let tokens = match self.post_token(request).await {
            Ok(tokens) => tokens,
            Err(ProviderApiError::Timeout) => {
                // Unknown whether the provider rotated; leave the credential alone.
                tracing::warn!(provider = %key.provider, user_id = %key.user_id, "Token refresh timed out");
                log_transition(key, OAuthState::Refreshing, from);
                return Err(OAuthError::Timeout);
            }
            Err(e) if e.is_invalid_grant() => {
                // Another instance may have won the rotation race.
                if let Ok(Some(latest)) = self.inner.store.get_credential(key).await {
                    if latest.refresh_token.as_deref() != Some(presented) {
                        tracing::info!(
                            provider = %key.provider,
                            user_id = %key.user_id,
                            "Refresh token race detected - another instance won"
                        );
                        return Err(OAuthError::StaleRefreshToken);
                    }
                }
                self.mark_stale(current).await;
                return Err(OAuthError::Refresh(e.to_string()));
            }
            Err(e) => {
                tracing::error!(
                    provider = %key.provider,
                    user_id = %key.user_id,
                    error = %e,
                    "Token refresh failed"
                );
                self.mark_stale(current).await;
                return Err(OAuthError::Refresh(e.to_string()));
            }
        };

        let now = Utc::now();
        let issued_refresh_token = tokens.refresh_token.clone();
        let refreshed = ProviderCredential {
            expires_at: tokens.expires_at(now),
            granted_scope: tokens
                .scope
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| current.granted_scope.clone()),
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token.or_else(|| current.refresh_token.clone()),
            status: CredentialStatus::Active,
            updated_at: now,
            ..current
        };

        if let Err(e) = self.inner.store.upsert_credential(&refreshed).await {
            // The provider has already rotated; losing this write forces re-consent.
            tracing::error!(
                provider = %key.provider,
                user_id = %key.user_id,
                error = %e,
                "Failed to persist refreshed credential"
            );
            return Err(e.into());
        }

        let verification = self
            .verify_persisted(key, issued_refresh_token.as_deref())
            .await;

        self.cache_token(&refreshed);
        log_transition(key, OAuthState::Refreshing, OAuthState::Authorized);
        tracing::info!(provider = %key.provider, user_id = %key.user_id, "Token refreshed and cached");

        Ok(RefreshOutcome {
            credential: refreshed,
            verification,
        })
    }

    /// Read the credential back and compare refresh token prefixes.
    async fn verify_persisted(&self, key: CredentialKey, issued: Option<&str>) -> Verification {
        let Some(issued) = issued else {
            return Verification::Skipped;
        };
        let expected_prefix = token_prefix(issued);

        match self.inner.store.get_credential(key).await {
            Ok(stored) => {
                let stored_prefix = stored
                    .and_then(|c| c.refresh_token)
                    .map(|t| token_prefix(&t))
                    .unwrap_or_default();

                if stored_prefix == expected_prefix {
                    tracing::debug!(provider = %key.provider, user_id = %key.user_id, "Token verification passed");
                    Verification::Passed
                } else {
                    tracing::error!(
                        provider = %key.provider,
                        user_id = %key.user_id,
                        "Token verification FAILED: stored refresh token differs from the one issued"
                    );
                    Verification::Mismatch {
                        stored_prefix,
                        expected_prefix,
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    provider = %key.provider,
                    user_id = %key.user_id,
                    error = %e,
                    "Token verification read-back failed"
                );
                Verification::Unavailable(e.to_string())
            }
        }
    }

    async fn mark_stale(&self, credential: ProviderCredential) {
        let key = credential.key();
        self.inner.token_cache.remove(&key);

        let stale = ProviderCredential {
            status: CredentialStatus::Stale,
            updated_at: Utc::now(),
            ..credential
        };
        if let Err(e) = self.inner.store.upsert_credential(&stale).await {
            tracing::error!(
                provider = %key.provider,
                user_id = %key.user_id,
                error = %e,
                "Failed to mark credential stale"
            );
        }
        log_transition(key, OAuthState::Refreshing, OAuthState::Expired);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Access
    // ─────────────────────────────────────────────────────────────────────

    /// Get a valid access token, refreshing if expired or expiring soon.
    pub async fn get_valid_access_token(&self, user_id: Uuid) -> Result<String, OAuthError> {
        let key = self.key(user_id);
        let margin = Duration::seconds(TOKEN_REFRESH_MARGIN_SECS);

        // Fast path - no I/O
        if let Some(token) = self.cached_token(key, Utc::now(), margin) {
            return Ok(token);
        }

        let engine = self.clone();
        tokio::spawn(async move {
            let lock = engine.lock_for(key);
            let _guard = lock.lock().await;

            // Another task may have refreshed while we were waiting.
            let now = Utc::now();
            if let Some(token) = engine.cached_token(key, now, margin) {
                return Ok(token);
            }

            let credential = engine
                .inner
                .store
                .get_credential(key)
                .await?
                .ok_or(OAuthError::NotConnected(key))?;

            if !credential.expires_within(now, margin) {
                engine.cache_token(&credential);
                return Ok(credential.access_token);
            }

            let Some(refresh_token) = credential.refresh_token else {
                return Err(OAuthError::Refresh(
                    "access token expired and no refresh token is stored".to_string(),
                ));
            };

            tracing::info!(provider = %key.provider, user_id = %key.user_id, "Access token expiring, refreshing");
            match engine.refresh_locked(key, &refresh_token).await {
                Ok(outcome) => Ok(outcome.credential.access_token),
                Err(OAuthError::StaleRefreshToken) => engine.load_winner(key, now, margin).await,
                Err(e) => Err(e),
            }
        })
        .await?
    }

    /// Use the credential another instance just wrote.
    async fn load_winner(
        &self,
        key: CredentialKey,
        now: DateTime<Utc>,
        margin: Duration,
    ) -> Result<String, OAuthError> {
        let credential = self
            .inner
            .store
            .get_credential(key)
            .await?
            .ok_or(OAuthError::NotConnected(key))?;

        if credential.expires_within(now, margin) {
            return Err(OAuthError::StaleRefreshToken);
        }
        self.cache_token(&credential);
        Ok(credential.access_token)
    }

    /// Stored credential for `user_id`, if connected.
    pub async fn credential(&self, user_id: Uuid) -> Result<Option<ProviderCredential>, OAuthError> {
        Ok(self.inner.store.get_credential(self.key(user_id)).await?)
    }

    /// Lifecycle state derived from stored and in-memory data.
    pub async fn connection_state(&self, user_id: Uuid) -> Result<OAuthState, OAuthError> {
        let key = self.key(user_id);

        let refreshing = self
            .inner
            .refresh_locks
            .get(&key)
            .is_some_and(|lock| lock.try_lock().is_err());
        if refreshing {
            return Ok(OAuthState::Refreshing);
        }

        let now = Utc::now();
        let state = match self.inner.store.get_credential(key).await? {
            Some(c) if c.status == CredentialStatus::Stale => OAuthState::Expired,
            Some(c) if c.refresh_token.is_none() && c.expires_within(now, Duration::zero()) => {
                OAuthState::Expired
            }
            Some(_) => OAuthState::Authorized,
            None if self
                .inner
                .pending
                .iter()
                .any(|p| p.user_id == user_id && !p.is_expired(now)) =>
            {
                OAuthState::Authorizing
            }
            None => OAuthState::Unauthorized,
        };
        Ok(state)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Revocation
    // ─────────────────────────────────────────────────────────────────────

    /// Delete the stored credential, then revoke at the provider on a
    /// best-effort basis. Returns `false` if nothing was connected.
    pub async fn revoke(&self, user_id: Uuid) -> Result<bool, OAuthError> {
        let engine = self.clone();
        let key = self.key(user_id);

        tokio::spawn(async move {
            let lock = engine.lock_for(key);
            let _guard = lock.lock().await;

            engine.inner.token_cache.remove(&key);
            let Some(credential) = engine.inner.store.get_credential(key).await? else {
                return Ok(false);
            };
            engine.inner.store.delete_credential(key).await?;
            log_transition(key, stored_state(&credential), OAuthState::Revoked);

            if let Err(e) = engine
                .inner
                .provider
                .revoke_remote(&engine.inner.http, &credential)
                .await
            {
                tracing::warn!(
                    provider = %key.provider,
                    user_id = %key.user_id,
                    error = %e,
                    "Provider-side revocation failed, local credential already removed"
                );
            }

            tracing::info!(provider = %key.provider, user_id = %key.user_id, "Credential revoked");
            Ok(true)
        })
        .await?
    }

    // ─────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────

    async fn post_token(&self, request: TokenRequest) -> Result<TokenResponse, ProviderApiError> {
        let descriptor = self.descriptor();
        let mut params = request.into_params();
        let builder = descriptor.authenticate(self.inner.http.post(&descriptor.token_url), &mut params);

        let response = builder
            .form(&params)
            .send()
            .await
            .map_err(ProviderApiError::from_transport)?;
        let tokens: TokenResponse = check_response_json(response).await?;

        if tokens.access_token.trim().is_empty() {
            return Err(ProviderApiError::Decode("empty access_token".to_string()));
        }
        Ok(tokens)
    }

    fn lock_for(&self, key: CredentialKey) -> Arc<Mutex<()>> {
        self.inner
            .refresh_locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn cached_token(
        &self,
        key: CredentialKey,
        now: DateTime<Utc>,
        margin: Duration,
    ) -> Option<String> {
        let cached = self.inner.token_cache.get(&key)?;
        match cached.expires_at {
            Some(at) if now + margin >= at => None,
            _ => Some(cached.access_token.clone()),
        }
    }

    fn cache_token(&self, credential: &ProviderCredential) {
        self.inner.token_cache.insert(
            credential.key(),
            CachedToken {
                access_token: credential.access_token.clone(),
                expires_at: credential.expires_at,
            },
        );
    }
}

/// State a stored credential is in before a transition starts from it.
fn stored_state(credential: &ProviderCredential) -> OAuthState {
    if credential.status == CredentialStatus::Stale {
        OAuthState::Expired
    } else {
        OAuthState::Authorized
    }
}

fn log_transition(key: CredentialKey, from: OAuthState, to: OAuthState) {
    debug_assert!(from.can_transition_to(to), "{from:?} -> {to:?}");
    tracing::debug!(
        provider = %key.provider,
        user_id = %key.user_id,
        from = ?from,
        to = ?to,
        "OAuth state transition"
    );
}

fn token_prefix(token: &str) -> String {
    token.chars().take(VERIFICATION_PREFIX_CHARS).collect()
}
