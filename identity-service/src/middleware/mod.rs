pub mod auth;
pub mod rate_limit;

pub use auth::{auth_middleware, AuthUser};
pub use rate_limit::route_limit;
