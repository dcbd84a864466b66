use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{SsoToken, SsoVerification, TokenPair};

#[derive(Debug, Default, Deserialize)]
pub struct RefreshRequest {
    /// Used when the refresh cookie is absent.
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SsoGenerateRequest {
    #[validate(length(min = 1, message = "Target application is required"))]
    pub target_app: String,

    /// Defaults to the hub.
    pub source_app: Option<String>,

    /// Path on the target application to land on after sign-on.
    pub return_path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SsoGenerateResponse {
    #[serde(flatten)]
    pub token: SsoToken,
    pub redirect_url: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SsoVerifyRequest {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,

    #[validate(length(min = 1, message = "Application is required"))]
    pub app: String,
}

#[derive(Debug, Serialize)]
pub struct SsoVerifyResponse {
    #[serde(flatten)]
    pub verification: SsoVerification,
    pub tokens: TokenPair,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TwoFactorSetupRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TwoFactorEnableRequest {
    #[validate(length(min = 16, message = "Secret is required"))]
    pub secret: String,

    #[validate(length(min = 6, max = 8, message = "Code must be 6 digits"))]
    pub code: String,

    /// Backup codes shown during setup, confirmed together with the secret.
    pub backup_codes: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TwoFactorVerifyRequest {
    #[validate(length(min = 1, message = "Code is required"))]
    pub code: String,

    /// Treat `code` as a backup code.
    #[serde(default)]
    pub backup: bool,

    /// Remember this device for the caller.
    #[serde(default)]
    pub trust_device: bool,
}

#[derive(Debug, Serialize)]
pub struct BackupCodesResponse {
    pub backup_codes: Vec<String>,
}
