use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind as JwtErrorKind, Algorithm, DecodingKey, EncodingKey,
    Header, Validation,
};
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use super::events::AuthEventLogger;
use super::notifier::{AuthChange, AuthNotifier};
use super::revocation::RevocationList;
use super::session::SessionService;
use super::ServiceError;
use crate::config::JwtConfig;
use crate::models::{AuthEvent, AuthEventKind, ClaimSet, TokenClaims, TokenKind, TokenPair};

#[derive(Clone)]
struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKeys {
    fn from_secret(name: &str, secret: &str) -> Result<Self, ServiceError> {
        if secret.is_empty() {
            return Err(ServiceError::Configuration(format!(
                "{} signing secret is not set",
                name
            )));
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        })
    }
}

/// Default lifetimes per token kind.
#[derive(Debug, Clone, Copy)]
pub struct TokenLifetimes {
    pub access: Duration,
    pub refresh: Duration,
    pub sso: Duration,
    pub csrf: Duration,
}

impl TokenLifetimes {
    pub fn for_kind(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Access => self.access,
            TokenKind::Refresh => self.refresh,
            TokenKind::Sso => self.sso,
            TokenKind::Csrf => self.csrf,
        }
    }
}

/// Only the expiry is read when checking for imminent expiry.
#[derive(Deserialize)]
struct ExpiryOnly {
    exp: i64,
}

/// Token codec: issues and verifies HS256 tokens of every kind.
///
/// Access, SSO and CSRF tokens share the access secret; refresh tokens use
/// their own. The kind is part of the signed claims and is always checked.
#[derive(Clone)]
pub struct TokenService {
    access_keys: SigningKeys,
    refresh_keys: SigningKeys,
    issuer: String,
    audience: String,
    lifetimes: TokenLifetimes,
    revocations: RevocationList,
    events: Arc<AuthEventLogger>,
    notifier: AuthNotifier,
    sessions: Option<SessionService>,
}

impl TokenService {
    pub fn new(
        config: &JwtConfig,
        revocations: RevocationList,
        events: Arc<AuthEventLogger>,
    ) -> Result<Self, ServiceError> {
        let access_keys = SigningKeys::from_secret("Access", config.access_secret.expose_secret())?;
        let refresh_keys =
            SigningKeys::from_secret("Refresh", config.refresh_secret.expose_secret())?;

        if config.issuer.is_empty() || config.audience.is_empty() {
            return Err(ServiceError::Configuration(
                "Token issuer and audience must be set".to_string(),
            ));
        }

        tracing::info!(issuer = %config.issuer, "Token service initialized with HS256 keys");

        Ok(Self {
            access_keys,
            refresh_keys,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            lifetimes: TokenLifetimes {
                access: Duration::seconds(config.access_token_ttl_seconds),
                refresh: Duration::seconds(config.refresh_token_ttl_seconds),
                sso: Duration::seconds(config.sso_token_ttl_seconds),
                csrf: Duration::seconds(config.csrf_token_ttl_seconds),
            },
            revocations,
            events,
            notifier: AuthNotifier::default(),
            sessions: None,
        })
    }

    /// Publish revocations on a shared notifier instead of a private one.
    pub fn with_notifier(mut self, notifier: AuthNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    /// Refresh tokens bound to a session are only exchanged while that
    /// session is live.
    pub fn with_sessions(mut self, sessions: SessionService) -> Self {
        self.sessions = Some(sessions);
        self
    }

    fn keys(&self, kind: TokenKind) -> &SigningKeys {
        match kind {
            TokenKind::Refresh => &self.refresh_keys,
            TokenKind::Access | TokenKind::Sso | TokenKind::Csrf => &self.access_keys,
        }
    }

    pub fn lifetimes(&self) -> &TokenLifetimes {
        &self.lifetimes
    }

    /// Issue a token of `kind` for `subject`, expiring `ttl` from now.
    pub fn issue(
        &self,
        subject: &str,
        kind: TokenKind,
        claims: ClaimSet,
        ttl: Duration,
    ) -> Result<String, ServiceError> {
        self.issue_with_id(subject, kind, claims, ttl, Uuid::new_v4().to_string())
    }

    fn issue_with_id(
        &self,
        subject: &str,
        kind: TokenKind,
        claims: ClaimSet,
        ttl: Duration,
        jti: String,
    ) -> Result<String, ServiceError> {
        if subject.is_empty() {
            return Err(ServiceError::Validation("Token subject must not be empty".into()));
        }
        if ttl <= Duration::zero() {
            return Err(ServiceError::Validation("Token lifetime must be positive".into()));
        }

        let now = Utc::now();
        let token_claims = TokenClaims {
            sub: subject.to_string(),
            kind,
            iss: self.issuer.clone(),
            aud: vec![self.audience.clone()],
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            jti,
            email: claims.email,
            permissions: claims.permissions,
            apps: claims.apps,
            sso: claims.sso,
            sid: claims.session_id,
        };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &token_claims,
            &self.keys(kind).encoding,
        )
        .map_err(|e| anyhow::anyhow!("Failed to encode {} token: {}", kind, e))?;

        Ok(token)
    }

    /// Verify signature, issuer, audience, expiry, kind and revocation.
    pub async fn verify(
        &self,
        token: &str,
        expected_kind: TokenKind,
    ) -> Result<TokenClaims, ServiceError> {
        match self.verify_inner(token, expected_kind).await {
            Ok(claims) => Ok(claims),
            Err(e) => {
                if !e.is_infrastructure() {
                    self.events.log(
                        AuthEvent::new(AuthEventKind::TokenValidationFailed)
                            .error(e.to_string())
                            .details(serde_json::json!({ "expected_kind": expected_kind })),
                    );
                }
                Err(e)
            }
        }
    }

    async fn verify_inner(
        &self,
        token: &str,
        expected_kind: TokenKind,
    ) -> Result<TokenClaims, ServiceError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);

        let data = decode::<TokenClaims>(token, &self.keys(expected_kind).decoding, &validation)
            .map_err(|e| match e.kind() {
                JwtErrorKind::ExpiredSignature => ServiceError::TokenExpired,
                _ => ServiceError::InvalidToken(format!("Invalid {} token", expected_kind)),
            })?;
        let claims = data.claims;

        if claims.kind != expected_kind {
            return Err(ServiceError::InvalidToken(format!(
                "Expected {} token, got {}",
                expected_kind, claims.kind
            )));
        }

        let revoked = self
            .revocations
            .is_revoked(&claims.sub, claims.iat)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Revocation lookup failed");
                ServiceError::ServiceUnavailable("Revocation check unavailable".into())
            })?;
        if revoked {
            return Err(ServiceError::InvalidToken("Token has been revoked".into()));
        }

        Ok(claims)
    }

    /// True when the token expires within `buffer_seconds`, or cannot be
    /// parsed at all. Signature is not checked.
    pub fn is_expiring_soon(&self, token: &str, buffer_seconds: i64) -> bool {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        match decode::<ExpiryOnly>(token, &DecodingKey::from_secret(&[]), &validation) {
            Ok(data) => data.claims.exp - Utc::now().timestamp() <= buffer_seconds,
            Err(_) => true,
        }
    }

    /// Access and refresh token sharing one token family id.
    pub fn generate_token_pair(
        &self,
        user_id: &str,
        claims: ClaimSet,
    ) -> Result<TokenPair, ServiceError> {
        let family = Uuid::new_v4().to_string();
        let access_token = self.issue_with_id(
            user_id,
            TokenKind::Access,
            claims.clone(),
            self.lifetimes.access,
            family.clone(),
        )?;
        let refresh_claims = ClaimSet {
            sso: None,
            ..claims
        };
        let refresh_token = self.issue_with_id(
            user_id,
            TokenKind::Refresh,
            refresh_claims,
            self.lifetimes.refresh,
            family,
        )?;

        self.events.record(AuthEventKind::TokenIssued, Some(user_id));

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.lifetimes.access.num_seconds(),
            refresh_expires_in: self.lifetimes.refresh.num_seconds(),
        })
    }

    /// Exchange a refresh token for a new pair carrying the same claims.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ServiceError> {
        let claims = self.verify(refresh_token, TokenKind::Refresh).await?;
        if let (Some(session_id), Some(sessions)) = (claims.sid.as_deref(), &self.sessions) {
            if !sessions.validate(session_id, Some(&claims.sub)).await? {
                self.events.log(
                    AuthEvent::new(AuthEventKind::TokenValidationFailed)
                        .user(&claims.sub)
                        .error("Session is no longer active"),
                );
                return Err(ServiceError::Authentication(
                    "Session is no longer active".into(),
                ));
            }
        }
        let claim_set = ClaimSet {
            email: claims.email,
            permissions: claims.permissions,
            apps: claims.apps,
            sso: None,
            session_id: claims.sid,
        };
        let pair = self.generate_token_pair(&claims.sub, claim_set)?;
        self.events.record(AuthEventKind::TokenRefreshed, Some(&claims.sub));
        Ok(pair)
    }

    /// CSRF token bound to one session.
    pub fn issue_csrf(&self, session_id: &str) -> Result<String, ServiceError> {
        self.issue(
            session_id,
            TokenKind::Csrf,
            ClaimSet::default().with_session(session_id),
            self.lifetimes.csrf,
        )
    }

    pub async fn verify_csrf(&self, token: &str, session_id: &str) -> Result<(), ServiceError> {
        let claims = self.verify(token, TokenKind::Csrf).await?;
        if claims.sid.as_deref() != Some(session_id) {
            return Err(ServiceError::InvalidToken(
                "CSRF token bound to another session".into(),
            ));
        }
        Ok(())
    }

    /// Invalidate every token issued to `user_id` up to now.
    pub async fn revoke_user_tokens(&self, user_id: &str) -> Result<i64, ServiceError> {
        let ttl = self
            .lifetimes
            .refresh
            .to_std()
            .map_err(|e| anyhow::anyhow!("Invalid refresh lifetime: {}", e))?;
        let revoked_at = self.revocations.revoke_user(user_id, ttl).await?;
        self.events.record(AuthEventKind::TokenRevoked, Some(user_id));
        self.notifier.publish(AuthChange::TokensRevoked {
            user_id: user_id.to_string(),
        });
        Ok(revoked_at)
    }
}
