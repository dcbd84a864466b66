use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::Rng;
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;
use std::sync::Arc;
use subtle::{Choice, ConstantTimeEq};
use totp_rs::{Algorithm, Secret as TotpSecret, TOTP};

use super::events::AuthEventLogger;
use super::ServiceError;
use crate::config::TwoFactorConfig;
use crate::models::{
    AuthEvent, AuthEventKind, DeviceInfo, TrustedDevice, TwoFactorCheck, TwoFactorCredential,
    TwoFactorSetup,
};
use crate::repository::TwoFactorRepository;

type HmacSha256 = Hmac<Sha256>;

pub const BACKUP_CODE_COUNT: usize = 10;
const BACKUP_CODE_GROUPS: usize = 4;
const BACKUP_CODE_GROUP_LEN: usize = 4;
const BACKUP_CODE_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

const TOTP_DIGITS: usize = 6;
const TOTP_SKEW: u8 = 1;
const TOTP_STEP_SECONDS: u64 = 30;

/// TOTP enrolment and verification with single-use backup codes.
#[derive(Clone)]
pub struct TwoFactorService {
    repository: Arc<dyn TwoFactorRepository>,
    issuer: String,
    backup_code_key: Secret<String>,
    events: Arc<AuthEventLogger>,
}

impl TwoFactorService {
    pub fn new(
        repository: Arc<dyn TwoFactorRepository>,
        config: &TwoFactorConfig,
        events: Arc<AuthEventLogger>,
    ) -> Self {
        Self {
            repository,
            issuer: config.issuer.clone(),
            backup_code_key: config.backup_code_key.clone(),
            events,
        }
    }

    /// Fresh secret, provisioning URI and backup codes. Nothing is stored
    /// until [`TwoFactorService::verify_and_enable`] succeeds.
    pub fn generate_secret(&self, user_id: &str, email: &str) -> Result<TwoFactorSetup, ServiceError> {
        if user_id.is_empty() || email.is_empty() || email.contains(':') {
            return Err(ServiceError::Validation("Invalid account for two-factor setup".into()));
        }

        let secret = TotpSecret::generate_secret();
        let secret_bytes = secret
            .to_bytes()
            .map_err(|e| anyhow::anyhow!("TOTP secret bytes: {:?}", e))?;
        let totp = TOTP::new(
            Algorithm::SHA1,
            TOTP_DIGITS,
            TOTP_SKEW,
            TOTP_STEP_SECONDS,
            secret_bytes,
            Some(self.issuer.clone()),
            email.to_string(),
        )
        .map_err(|e| ServiceError::Validation(format!("Invalid TOTP parameters: {}", e)))?;

        Ok(TwoFactorSetup {
            secret: secret.to_encoded().to_string(),
            otpauth_url: totp.get_url(),
            backup_codes: generate_backup_codes(),
        })
    }

    /// Confirm enrolment with a code from the candidate secret, then persist
    /// secret, hashed backup codes and the enrolling device in one write.
    pub async fn verify_and_enable(
        &self,
        user_id: &str,
        secret: &str,
        code: &str,
        backup_codes: Option<Vec<String>>,
        device: Option<&DeviceInfo>,
    ) -> Result<(), ServiceError> {
        let code = normalize_totp_code(code)?;
        let totp = totp_for(secret)?;
        if !check_code(&totp, &code)? {
            self.events.log(
                AuthEvent::new(AuthEventKind::TwoFactorFailed)
                    .user(user_id)
                    .error("Enrolment code rejected"),
            );
            return Err(ServiceError::Validation("Invalid verification code".into()));
        }

        if self.is_enabled(user_id).await? {
            return Err(ServiceError::Conflict(
                "Two-factor authentication is already enabled".into(),
            ));
        }

        let backup_code_hashes = backup_codes
            .unwrap_or_default()
            .iter()
            .map(|c| {
                let normalized = normalize_backup_code(c)?;
                self.hash_backup_code(&normalized)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let now = Utc::now();
        let credential = TwoFactorCredential {
            user_id: user_id.to_string(),
            secret: secret.to_uppercase(),
            backup_code_hashes,
            enabled: true,
            trusted_devices: device
                .map(|d| {
                    vec![TrustedDevice {
                        user_agent: d.user_agent.clone(),
                        last_used: now,
                        trusted: true,
                    }]
                })
                .unwrap_or_default(),
            created_at: now,
            updated_at: now,
        };

        if !self.repository.insert_if_absent(&credential).await? {
            return Err(ServiceError::Conflict(
                "Two-factor authentication is already enabled".into(),
            ));
        }

        self.events.record(AuthEventKind::TwoFactorEnabled, Some(user_id));
        Ok(())
    }

    /// Check a 6-digit code against the stored secret, allowing one time step
    /// of drift either way. Not enrolled reads as `NotEnabled`, never as an
    /// error.
    pub async fn verify_token(&self, user_id: &str, code: &str) -> Result<TwoFactorCheck, ServiceError> {
        let code = normalize_totp_code(code)?;
        let Some(credential) = self.enabled_credential(user_id).await? else {
            return Ok(TwoFactorCheck::NotEnabled);
        };

        let totp = totp_for(&credential.secret)?;
        if check_code(&totp, &code)? {
            self.events.record(AuthEventKind::TwoFactorVerified, Some(user_id));
            Ok(TwoFactorCheck::Accepted)
        } else {
            self.events.log(
                AuthEvent::new(AuthEventKind::TwoFactorFailed)
                    .user(user_id)
                    .error("TOTP code rejected"),
            );
            Ok(TwoFactorCheck::Rejected)
        }
    }

    /// Compare against every stored hash and consume the matching one.
    pub async fn verify_backup_code(
        &self,
        user_id: &str,
        code: &str,
    ) -> Result<TwoFactorCheck, ServiceError> {
        let normalized = normalize_backup_code(code)?;
        let Some(credential) = self.enabled_credential(user_id).await? else {
            return Ok(TwoFactorCheck::NotEnabled);
        };

        let candidate = self.hash_backup_code(&normalized)?;
        let matched = credential
            .backup_code_hashes
            .iter()
            .fold(Choice::from(0u8), |found, stored| {
                found | stored.as_bytes().ct_eq(candidate.as_bytes())
            });

        // The conditional pull makes concurrent use of one code succeed once
        if bool::from(matched)
            && self
                .repository
                .consume_backup_code(user_id, &candidate, Utc::now())
                .await?
        {
            self.events.log(
                AuthEvent::new(AuthEventKind::BackupCodeUsed)
                    .user(user_id)
                    .details(serde_json::json!({
                        "remaining": credential.backup_code_hashes.len().saturating_sub(1)
                    })),
            );
            return Ok(TwoFactorCheck::Accepted);
        }

        self.events.log(
            AuthEvent::new(AuthEventKind::TwoFactorFailed)
                .user(user_id)
                .error("Backup code rejected"),
        );
        Ok(TwoFactorCheck::Rejected)
    }

    /// Replace every backup code. Returns the new plaintext codes.
    pub async fn regenerate_backup_codes(&self, user_id: &str) -> Result<Vec<String>, ServiceError> {
        if !self.is_enabled(user_id).await? {
            return Err(ServiceError::Validation(
                "Two-factor authentication is not enabled".into(),
            ));
        }

        let codes = generate_backup_codes();
        let hashes = codes
            .iter()
            .map(|c| self.hash_backup_code(&normalize_backup_code(c)?))
            .collect::<Result<Vec<_>, _>>()?;

        if !self
            .repository
            .replace_backup_codes(user_id, &hashes, Utc::now())
            .await?
        {
            return Err(ServiceError::Validation(
                "Two-factor authentication is not enabled".into(),
            ));
        }

        self.events.record(AuthEventKind::BackupCodesRegenerated, Some(user_id));
        Ok(codes)
    }

    pub async fn is_enabled(&self, user_id: &str) -> Result<bool, ServiceError> {
        Ok(self.enabled_credential(user_id).await?.is_some())
    }

    /// Opt out: the credential is destroyed.
    pub async fn disable(&self, user_id: &str) -> Result<bool, ServiceError> {
        let removed = self.repository.delete(user_id).await?;
        if removed {
            self.events.record(AuthEventKind::TwoFactorDisabled, Some(user_id));
        }
        Ok(removed)
    }

    pub async fn is_trusted_device(&self, user_id: &str, user_agent: &str) -> Result<bool, ServiceError> {
        Ok(self
            .enabled_credential(user_id)
            .await?
            .is_some_and(|c| {
                c.trusted_devices
                    .iter()
                    .any(|d| d.trusted && d.user_agent == user_agent)
            }))
    }

    /// Mark the device as trusted, refreshing `last_used`. False when not
    /// enrolled.
    pub async fn trust_device(&self, user_id: &str, user_agent: &str) -> Result<bool, ServiceError> {
        if user_agent.is_empty() {
            return Err(ServiceError::Validation("User agent must not be empty".into()));
        }
        let device = TrustedDevice {
            user_agent: user_agent.to_string(),
            last_used: Utc::now(),
            trusted: true,
        };
        self.repository.upsert_trusted_device(user_id, &device).await
    }

    async fn enabled_credential(
        &self,
        user_id: &str,
    ) -> Result<Option<TwoFactorCredential>, ServiceError> {
        Ok(self.repository.find(user_id).await?.filter(|c| c.enabled))
    }

    fn hash_backup_code(&self, normalized: &str) -> Result<String, ServiceError> {
        let mut mac = HmacSha256::new_from_slice(self.backup_code_key.expose_secret().as_bytes())
            .map_err(|e| anyhow::anyhow!("Invalid backup code key: {}", e))?;
        mac.update(normalized.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

/// Four hyphen-separated groups of four base36 characters.
pub fn generate_backup_codes() -> Vec<String> {
    let mut rng = rand::thread_rng();
    (0..BACKUP_CODE_COUNT)
        .map(|_| {
            (0..BACKUP_CODE_GROUPS)
                .map(|_| {
                    (0..BACKUP_CODE_GROUP_LEN)
                        .map(|_| {
                            BACKUP_CODE_ALPHABET[rng.gen_range(0..BACKUP_CODE_ALPHABET.len())]
                                as char
                        })
                        .collect::<String>()
                })
                .collect::<Vec<_>>()
                .join("-")
        })
        .collect()
}

/// Strip separators and whitespace and uppercase; reject anything that is
/// not sixteen base36 characters.
fn normalize_backup_code(code: &str) -> Result<String, ServiceError> {
    let normalized: String = code
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if normalized.len() != BACKUP_CODE_GROUPS * BACKUP_CODE_GROUP_LEN
        || !normalized.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(ServiceError::Validation("Malformed backup code".into()));
    }
    Ok(normalized)
}

fn normalize_totp_code(code: &str) -> Result<String, ServiceError> {
    let code: String = code.chars().filter(|c| !c.is_whitespace()).collect();
    if code.len() != TOTP_DIGITS || !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(ServiceError::Validation("Code must be 6 digits".into()));
    }
    Ok(code)
}

fn totp_for(secret: &str) -> Result<TOTP, ServiceError> {
    let bytes = TotpSecret::Encoded(secret.trim().to_uppercase())
        .to_bytes()
        .map_err(|_| ServiceError::Validation("Invalid two-factor secret".into()))?;
    TOTP::new(
        Algorithm::SHA1,
        TOTP_DIGITS,
        TOTP_SKEW,
        TOTP_STEP_SECONDS,
        bytes,
        None,
        String::new(),
    )
    .map_err(|e| ServiceError::Validation(format!("Invalid two-factor secret: {}", e)))
}

fn check_code(totp: &TOTP, code: &str) -> Result<bool, ServiceError> {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|e| ServiceError::Internal(anyhow::anyhow!("System clock error: {}", e)))?;
    Ok(check_code_at(totp, code, now.as_secs()))
}

/// Accepts the step containing `unix_seconds` and `TOTP_SKEW` steps either side.
fn check_code_at(totp: &TOTP, code: &str, unix_seconds: u64) -> bool {
    totp.check(code, unix_seconds)
}
