//! Allow-listed first-party applications.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::Environment;

/// Registrable domain shared by every first-party application.
pub const ROOT_DOMAIN: &str = "cybere.co";

/// Hosts accepted as redirect targets in production.
pub const FIRST_PARTY_HOSTS: &[&str] = &[
    "cybere.co",
    "www.cybere.co",
    "hub.cybere.co",
    "justsplit.cybere.co",
    "somos.cybere.co",
    "demos.cybere.co",
    "plantopia.cybere.co",
];

/// Hosts accepted only outside production.
pub const DEVELOPMENT_HOSTS: &[&str] = &["localhost", "127.0.0.1"];

/// Applications allowed to take part in single sign-on. The list is fixed in
/// code and not user-editable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppId {
    Hub,
    Website,
    JustSplit,
    Somos,
    Demos,
    Plantopia,
}

impl AppId {
    pub const ALL: [AppId; 6] = [
        AppId::Hub,
        AppId::Website,
        AppId::JustSplit,
        AppId::Somos,
        AppId::Demos,
        AppId::Plantopia,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppId::Hub => "hub",
            AppId::Website => "website",
            AppId::JustSplit => "justsplit",
            AppId::Somos => "somos",
            AppId::Demos => "demos",
            AppId::Plantopia => "plantopia",
        }
    }

    fn dev_port(&self) -> u16 {
        match self {
            AppId::Hub => 40000,
            AppId::Website => 40001,
            AppId::JustSplit => 40002,
            AppId::Somos => 40003,
            AppId::Demos => 40004,
            AppId::Plantopia => 40005,
        }
    }

    /// Public origin of the application in the given environment.
    pub fn base_url(&self, environment: Environment) -> String {
        match (environment, self) {
            (Environment::Dev, app) => format!("http://localhost:{}", app.dev_port()),
            (Environment::Prod, AppId::Website) => format!("https://{}", ROOT_DOMAIN),
            (Environment::Prod, app) => format!("https://{}.{}", app.as_str(), ROOT_DOMAIN),
        }
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AppId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AppId::ALL
            .iter()
            .copied()
            .find(|app| app.as_str() == s)
            .ok_or_else(|| format!("Unknown application: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_apps_only() {
        assert_eq!("justsplit".parse::<AppId>(), Ok(AppId::JustSplit));
        assert!("JustSplit".parse::<AppId>().is_err());
        assert!("evil".parse::<AppId>().is_err());
    }

    #[test]
    fn production_urls_use_subdomains() {
        assert_eq!(AppId::Hub.base_url(Environment::Prod), "https://hub.cybere.co");
        assert_eq!(AppId::Website.base_url(Environment::Prod), "https://cybere.co");
        assert_eq!(AppId::JustSplit.base_url(Environment::Dev), "http://localhost:40002");
    }

    #[test]
    fn every_production_url_is_first_party() {
        for app in AppId::ALL {
            let url = url::Url::parse(&app.base_url(Environment::Prod)).unwrap();
            assert!(FIRST_PARTY_HOSTS.contains(&url.host_str().unwrap()));
        }
    }
}
