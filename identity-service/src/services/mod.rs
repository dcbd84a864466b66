pub mod consent;
pub mod error;
pub mod events;
pub mod notifier;
pub mod privacy;
pub mod revocation;
pub mod session;
pub mod sso;
pub mod token;
pub mod two_factor;

pub use consent::ConsentService;
pub use error::{ErrorKind, ServiceError};
pub use events::{AuthEventLogger, AuthEventSink, AuthMetrics};
pub use notifier::{AuthChange, AuthNotifier};
pub use privacy::PrivacyService;
pub use revocation::RevocationList;
pub use session::SessionService;
pub use sso::SsoService;
pub use token::TokenService;
pub use two_factor::TwoFactorService;
