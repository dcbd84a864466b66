//! HTTP handlers for identity-service.

pub mod consent;
pub mod health;
pub mod metrics;
pub mod sessions;
pub mod sso;
pub mod token;
pub mod two_factor;

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use service_core::middleware::rate_limit::{forwarded_client_ip, peer_ip};
use std::{convert::Infallible, net::IpAddr};

use crate::{models::DeviceInfo, AppState};

/// Device description from request headers and the resolved client address.
pub fn device_from_parts(
    headers: &HeaderMap,
    peer: Option<IpAddr>,
    trusted_proxy_hops: usize,
) -> DeviceInfo {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let mut device = DeviceInfo::new(user_agent);
    device.ip_address =
        forwarded_client_ip(headers, peer, trusted_proxy_hops).map(|ip| ip.to_string());
    device
}

/// Caller's device, with the address resolved the same way the rate limiter
/// resolves it.
pub struct ClientDevice(pub DeviceInfo);

#[axum::async_trait]
impl FromRequestParts<AppState> for ClientDevice {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(ClientDevice(device_from_parts(
            &parts.headers,
            peer_ip(&parts.extensions),
            state.config.security.trusted_proxy_hops,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(forwarded_for: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_static("Firefox/128"));
        headers.insert("x-forwarded-for", HeaderValue::from_static(forwarded_for));
        headers
    }

    #[test]
    fn device_reads_agent_and_client_behind_proxy() {
        let device = device_from_parts(&headers("6.6.6.6, 203.0.113.7"), None, 1);
        assert_eq!(device.user_agent, "Firefox/128");
        assert_eq!(device.ip_address.as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn forwarded_header_is_ignored_when_directly_exposed() {
        let peer = Some(IpAddr::from([192, 0, 2, 44]));
        let device = device_from_parts(&headers("203.0.113.7"), peer, 0);
        assert_eq!(device.ip_address.as_deref(), Some("192.0.2.44"));
    }

    #[test]
    fn missing_headers_give_empty_device() {
        let device = device_from_parts(&HeaderMap::new(), None, 1);
        assert!(device.user_agent.is_empty());
        assert!(device.ip_address.is_none());
    }
}
