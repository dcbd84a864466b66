use chrono::Utc;
use service_core::store::Store;
use std::sync::Arc;
use std::time::Instant;
use url::Url;
use uuid::Uuid;

use super::events::AuthEventLogger;
use super::notifier::{AuthChange, AuthNotifier};
use super::token::TokenService;
use super::ServiceError;
use crate::config::Environment;
use crate::models::app::{DEVELOPMENT_HOSTS, FIRST_PARTY_HOSTS};
use crate::models::{
    AppId, AuthEvent, AuthEventKind, ClaimSet, ExchangeState, SsoClaims, SsoExchange, SsoToken,
    SsoVerification, TokenKind,
};

/// Message returned for every failed verification; the cause is only logged.
const SSO_FAILED: &str = "SSO verification failed";

/// Cross-application sign-on hand-off.
///
/// The hub mints a short-lived SSO token naming exactly one target app and
/// stores an exchange record keyed by the correlation id. The target verifies
/// the token against its own identity and the record.
#[derive(Clone)]
pub struct SsoService {
    tokens: TokenService,
    store: Arc<dyn Store>,
    environment: Environment,
    events: Arc<AuthEventLogger>,
    notifier: AuthNotifier,
}

impl SsoService {
    pub fn new(
        tokens: TokenService,
        store: Arc<dyn Store>,
        environment: Environment,
        events: Arc<AuthEventLogger>,
        notifier: AuthNotifier,
    ) -> Self {
        Self {
            tokens,
            store,
            environment,
            events,
            notifier,
        }
    }

    fn exchange_key(session_id: &str) -> String {
        format!("sso:{}", session_id)
    }

    /// Marker claimed by the first successful redemption at `app`.
    fn redemption_key(session_id: &str, app: AppId) -> String {
        format!("sso:{}:{}", session_id, app)
    }

    fn parse_app(name: &str) -> Result<AppId, ServiceError> {
        name.parse::<AppId>().map_err(ServiceError::Validation)
    }

    pub async fn generate(
        &self,
        user_id: &str,
        source_app: &str,
        target_app: &str,
        permissions: Vec<String>,
    ) -> Result<SsoToken, ServiceError> {
        let source_app = Self::parse_app(source_app)?;
        let target_app = Self::parse_app(target_app)?;
        if source_app == target_app {
            return Err(ServiceError::Validation(
                "Source and target application must differ".into(),
            ));
        }
        if user_id.is_empty() {
            return Err(ServiceError::Validation("User id must not be empty".into()));
        }

        let ttl = self.tokens.lifetimes().sso;
        let now = Utc::now();
        let exchange = SsoExchange {
            session_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            source_app,
            target_app,
            state: ExchangeState::Created,
            created_at: now,
            expires_at: now + ttl,
            active_apps: vec![source_app],
            permissions: permissions.clone(),
        };

        let claims = ClaimSet {
            permissions,
            sso: Some(SsoClaims {
                source_app,
                target_app,
                session_id: exchange.session_id.clone(),
            }),
            ..Default::default()
        };
        let token = self.tokens.issue(user_id, TokenKind::Sso, claims, ttl)?;

        self.save_exchange(&exchange).await?;

        self.events.log(
            AuthEvent::new(AuthEventKind::SsoTokenGenerated)
                .user(user_id)
                .app(source_app)
                .details(serde_json::json!({
                    "target_app": target_app,
                    "exchange_id": exchange.session_id,
                })),
        );

        Ok(SsoToken {
            token,
            session_id: exchange.session_id,
            source_app,
            target_app,
            expires_at: exchange.expires_at,
            expires_in: ttl.num_seconds(),
        })
    }

    /// Verify an SSO token at `expected_target_app`.
    ///
    /// Every rejection surfaces as the same authentication error; only
    /// backing-store failures are reported as such.
    pub async fn verify(
        &self,
        token: &str,
        expected_target_app: &str,
    ) -> Result<SsoVerification, ServiceError> {
        let started = Instant::now();
        match self.verify_inner(token, expected_target_app).await {
            Ok(verification) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                self.events.log(
                    AuthEvent::new(AuthEventKind::SsoTokenVerified)
                        .user(&verification.user_id)
                        .app(verification.target_app)
                        .duration_ms(duration_ms),
                );
                self.events.log(
                    AuthEvent::new(AuthEventKind::CrossAppNavigation)
                        .user(&verification.user_id)
                        .app(verification.target_app)
                        .details(serde_json::json!({
                            "from": verification.source_app,
                            "to": verification.target_app,
                        })),
                );
                self.events.log(
                    AuthEvent::new(AuthEventKind::LoginSuccess)
                        .user(&verification.user_id)
                        .app(verification.target_app),
                );
                self.notifier.publish(AuthChange::SignedIn {
                    user_id: verification.user_id.clone(),
                    app: verification.target_app,
                    exchange_id: verification.session_id.clone(),
                });
                Ok(verification)
            }
            Err(e) if e.is_infrastructure() => Err(e),
            Err(e) => {
                tracing::warn!(
                    reason = %e,
                    expected_target_app = %expected_target_app,
                    "SSO verification rejected"
                );
                self.events.log(
                    AuthEvent::new(AuthEventKind::SsoVerificationFailed)
                        .error(e.to_string())
                        .duration_ms(started.elapsed().as_millis() as u64),
                );
                self.events.log(AuthEvent::new(AuthEventKind::LoginFailure).error(e.to_string()));
                Err(ServiceError::Authentication(SSO_FAILED.to_string()))
            }
        }
    }

    async fn verify_inner(
        &self,
        token: &str,
        expected_target_app: &str,
    ) -> Result<SsoVerification, ServiceError> {
        let expected = expected_target_app
            .parse::<AppId>()
            .map_err(ServiceError::Authentication)?;

        let claims = self.tokens.verify(token, TokenKind::Sso).await?;
        let sso = claims
            .sso
            .ok_or_else(|| ServiceError::Authentication("Token carries no SSO claims".into()))?;

        if sso.target_app != expected {
            return Err(ServiceError::Authentication(format!(
                "Token issued for {}, presented at {}",
                sso.target_app, expected
            )));
        }

        let now = Utc::now();
        let mut exchange = self
            .load_exchange(&sso.session_id)
            .await?
            .filter(|e| !e.is_expired_at(now))
            .ok_or_else(|| ServiceError::Authentication("SSO exchange not found".into()))?;

        if exchange.user_id != claims.sub || exchange.target_app != sso.target_app {
            return Err(ServiceError::Authentication(
                "SSO exchange does not match token".into(),
            ));
        }

        let remaining = (exchange.expires_at - now)
            .to_std()
            .map_err(|_| ServiceError::Authentication("SSO exchange expired".into()))?;
        let claimed = self
            .store
            .set_if_absent(
                &Self::redemption_key(&exchange.session_id, expected),
                &now.to_rfc3339(),
                remaining,
            )
            .await?;
        if !claimed {
            return Err(ServiceError::Authentication(
                "SSO token already redeemed".into(),
            ));
        }

        exchange.activate(expected);
        self.save_exchange(&exchange).await?;

        Ok(SsoVerification {
            user_id: exchange.user_id,
            session_id: exchange.session_id,
            source_app: exchange.source_app,
            target_app: exchange.target_app,
            permissions: claims.permissions,
            active_apps: exchange.active_apps,
        })
    }

    async fn load_exchange(&self, session_id: &str) -> Result<Option<SsoExchange>, ServiceError> {
        let raw = self.store.get(&Self::exchange_key(session_id)).await?;
        match raw {
            Some(raw) => {
                let exchange = serde_json::from_str(&raw)
                    .map_err(|e| anyhow::anyhow!("Corrupt SSO exchange record: {}", e))?;
                Ok(Some(exchange))
            }
            None => Ok(None),
        }
    }

    /// Persist with a TTL matching the remaining lifetime of the exchange.
    async fn save_exchange(&self, exchange: &SsoExchange) -> Result<(), ServiceError> {
        let remaining = (exchange.expires_at - Utc::now())
            .to_std()
            .map_err(|_| ServiceError::Authentication("SSO exchange expired".into()))?;
        let raw = serde_json::to_string(exchange)
            .map_err(|e| anyhow::anyhow!("Failed to encode SSO exchange: {}", e))?;
        self.store
            .set(&Self::exchange_key(&exchange.session_id), &raw, remaining)
            .await?;
        Ok(())
    }

    /// Apps that joined the exchange, in arrival order. Empty once expired.
    pub async fn active_apps(&self, session_id: &str) -> Result<Vec<AppId>, ServiceError> {
        let now = Utc::now();
        Ok(self
            .load_exchange(session_id)
            .await?
            .filter(|e| !e.is_expired_at(now))
            .map(|e| e.active_apps)
            .unwrap_or_default())
    }

    /// Sweep expired exchange records (and any other elapsed keys).
    pub async fn cleanup_expired(&self) -> Result<usize, ServiceError> {
        let purged = self.store.purge_expired().await?;
        if purged > 0 {
            tracing::debug!(purged, "Purged expired store entries");
        }
        Ok(purged)
    }

    /// Allow-list check for post-login redirects. Never fails; anything not
    /// recognised is rejected.
    pub fn validate_return_url(&self, candidate: &str) -> bool {
        validate_return_url(candidate, self.environment)
    }

    pub fn build_redirect_url(&self, target: AppId, token: &str, return_path: &str) -> String {
        format!(
            "{}/auth/sso/callback?ssoToken={}&returnPath={}",
            target.base_url(self.environment),
            urlencoding::encode(token),
            urlencoding::encode(safe_return_path(return_path)),
        )
    }
}

pub fn validate_return_url(candidate: &str, environment: Environment) -> bool {
    let Ok(url) = Url::parse(candidate) else {
        return false;
    };
    if !url.username().is_empty() || url.password().is_some() {
        return false;
    }
    let Some(host) = url.host_str() else {
        return false;
    };

    match url.scheme() {
        "https" if FIRST_PARTY_HOSTS.contains(&host) => true,
        "http" | "https" if !environment.is_production() => DEVELOPMENT_HOSTS.contains(&host),
        _ => false,
    }
}

/// Same-origin absolute path, or `/`.
fn safe_return_path(path: &str) -> &str {
    if path.starts_with('/') && !path.starts_with("//") && !path.contains('\\') {
        path
    } else {
        "/"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::revocation::RevocationList;
    use crate::services::token::tests::jwt_config;
    use service_core::store::MemoryStore;

    fn sso() -> (SsoService, Arc<AuthEventLogger>) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let events = Arc::new(AuthEventLogger::default());
        let tokens = TokenService::new(
            &jwt_config(),
            RevocationList::new(store.clone()),
            events.clone(),
        )
        .unwrap();
        (
            SsoService::new(
                tokens,
                store,
                Environment::Prod,
                events.clone(),
                AuthNotifier::default(),
            ),
            events,
        )
    }

    #[tokio::test]
    async fn generate_validates_app_names() {
        let (sso, _) = sso();
        assert!(matches!(
            sso.generate("user-1", "hub", "evil", vec![]).await,
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            sso.generate("user-1", "nope", "justsplit", vec![]).await,
            Err(ServiceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn verify_at_target_records_navigation() {
        let (sso, events) = sso();
        let token = sso
            .generate("user-1", "hub", "justsplit", vec!["expenses:read".into()])
            .await
            .unwrap();
        assert_eq!(token.expires_in, 300);

        let verified = sso.verify(&token.token, "justsplit").await.unwrap();
        assert_eq!(verified.user_id, "user-1");
        assert_eq!(verified.permissions, vec!["expenses:read".to_string()]);
        assert_eq!(verified.active_apps, vec![AppId::Hub, AppId::JustSplit]);
        assert_eq!(events.metrics().cross_app_navigations, 1);

        // Redeemable once; the record stays readable until expiry
        match sso.verify(&token.token, "justsplit").await {
            Err(ServiceError::Authentication(msg)) => assert_eq!(msg, SSO_FAILED),
            other => panic!("unexpected result: {:?}", other.map(|v| v.user_id)),
        }
        let metrics = events.metrics();
        assert_eq!(metrics.cross_app_navigations, 1);
        assert_eq!((metrics.login_success, metrics.login_failure), (1, 1));
        assert_eq!(
            sso.active_apps(&token.session_id).await.unwrap(),
            vec![AppId::Hub, AppId::JustSplit]
        );
    }

    #[tokio::test]
    async fn concurrent_redemptions_admit_one() {
        let (sso, _) = sso();
        let token = sso
            .generate("user-1", "hub", "somos", vec![])
            .await
            .unwrap();

        let attempts = (0..8).map(|_| {
            let sso = sso.clone();
            let token = token.token.clone();
            tokio::spawn(async move { sso.verify(&token, "somos").await.is_ok() })
        });
        let mut accepted = 0;
        for attempt in attempts.collect::<Vec<_>>() {
            if attempt.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
    }

    #[tokio::test]
    async fn wrong_target_and_unknown_target_fail_generically() {
        let (sso, _) = sso();
        let token = sso
            .generate("user-1", "hub", "justsplit", vec![])
            .await
            .unwrap();

        for target in ["website", "not-an-app"] {
            match sso.verify(&token.token, target).await {
                Err(ServiceError::Authentication(msg)) => assert_eq!(msg, SSO_FAILED),
                other => panic!("unexpected result: {:?}", other.map(|v| v.user_id)),
            }
        }
    }

    #[tokio::test]
    async fn access_token_is_not_an_sso_token() {
        let (sso, _) = sso();
        let pair = sso
            .tokens
            .generate_token_pair("user-1", ClaimSet::default())
            .unwrap();
        assert!(matches!(
            sso.verify(&pair.access_token, "justsplit").await,
            Err(ServiceError::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn purged_exchange_fails_verification() {
        let (sso, _) = sso();
        let token = sso
            .generate("user-1", "hub", "somos", vec![])
            .await
            .unwrap();
        sso.store
            .delete(&SsoService::exchange_key(&token.session_id))
            .await
            .unwrap();
        assert!(matches!(
            sso.verify(&token.token, "somos").await,
            Err(ServiceError::Authentication(_))
        ));
        assert!(sso.active_apps(&token.session_id).await.unwrap().is_empty());
    }

    #[test]
    fn return_urls_are_allow_listed() {
        let prod = Environment::Prod;
        assert!(validate_return_url("https://hub.cybere.co/dashboard", prod));
        assert!(validate_return_url("https://cybere.co/", prod));
        assert!(!validate_return_url("http://hub.cybere.co/", prod));
        assert!(!validate_return_url("https://evil.com/", prod));
        assert!(!validate_return_url("https://hub.cybere.co.evil.com/", prod));
        assert!(!validate_return_url("https://user@hub.cybere.co/", prod));
        assert!(!validate_return_url("javascript:alert(1)", prod));
        assert!(!validate_return_url("not a url", prod));
        assert!(!validate_return_url("http://localhost:40000/", prod));

        let dev = Environment::Dev;
        assert!(validate_return_url("http://localhost:40000/", dev));
        assert!(validate_return_url("http://127.0.0.1:40002/x", dev));
        assert!(!validate_return_url("ftp://localhost/", dev));
    }

    #[test]
    fn redirect_url_encodes_and_sanitises() {
        let (sso, _) = sso();
        let url = sso.build_redirect_url(AppId::JustSplit, "a.b.c", "/groups?id=1");
        assert_eq!(
            url,
            "https://justsplit.cybere.co/auth/sso/callback?ssoToken=a.b.c&returnPath=%2Fgroups%3Fid%3D1"
        );

        let url = sso.build_redirect_url(AppId::Hub, "t", "//evil.com");
        assert!(url.ends_with("returnPath=%2F"));
        let url = sso.build_redirect_url(AppId::Hub, "t", "https://evil.com");
        assert!(url.ends_with("returnPath=%2F"));
    }
}
