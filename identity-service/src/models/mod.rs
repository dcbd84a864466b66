//! Domain types for tokens, sessions, SSO exchanges, two-factor
//! credentials, consent and auth events.

pub mod app;
pub mod auth_event;
pub mod consent;
pub mod session;
pub mod sso;
pub mod token;
pub mod two_factor;

pub use app::AppId;
pub use auth_event::{AuthEvent, AuthEventKind, Severity};
pub use consent::{
    ConsentCategory, ConsentMetadata, ConsentRecord, ConsentSnapshot, DataType, PrivacySettings,
    Relationship, VisibilityLevel,
};
pub use session::{DeviceInfo, GeoLocation, Session, SessionCleanupReport, TouchOutcome};
pub use sso::{ExchangeState, SsoExchange, SsoToken, SsoVerification};
pub use token::{ClaimSet, SsoClaims, TokenClaims, TokenKind, TokenPair};
pub use two_factor::{TrustedDevice, TwoFactorCheck, TwoFactorCredential, TwoFactorSetup};
