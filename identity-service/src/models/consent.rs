//! Consent history, consent snapshot and privacy visibility settings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Version stamped on every consent record.
pub const CONSENT_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentCategory {
    /// Always granted; not user-settable.
    Necessary,
    Functional,
    Analytics,
    Marketing,
    Personalization,
}

impl ConsentCategory {
    pub const ALL: [ConsentCategory; 5] = [
        ConsentCategory::Necessary,
        ConsentCategory::Functional,
        ConsentCategory::Analytics,
        ConsentCategory::Marketing,
        ConsentCategory::Personalization,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConsentCategory::Necessary => "necessary",
            ConsentCategory::Functional => "functional",
            ConsentCategory::Analytics => "analytics",
            ConsentCategory::Marketing => "marketing",
            ConsentCategory::Personalization => "personalization",
        }
    }
}

impl fmt::Display for ConsentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConsentCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConsentCategory::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("Unknown consent category: {}", s))
    }
}

/// Request context captured alongside a consent change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentMetadata {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Append-only history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentRecord {
    pub record_id: String,
    pub user_id: String,
    pub category: ConsentCategory,
    pub granted: bool,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub metadata: Option<ConsentMetadata>,
}

/// Current derived consent state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentSnapshot {
    pub user_id: String,
    /// Explicit grants/withdrawals only; use [`ConsentSnapshot::get`] to read.
    pub categories: BTreeMap<ConsentCategory, bool>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ConsentSnapshot {
    pub fn empty(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            categories: BTreeMap::new(),
            updated_at: None,
        }
    }

    /// `necessary` is always true; anything not explicitly granted is false.
    pub fn get(&self, category: ConsentCategory) -> bool {
        if category == ConsentCategory::Necessary {
            return true;
        }
        self.categories.get(&category).copied().unwrap_or(false)
    }

    /// Every category with its effective value.
    pub fn resolved(&self) -> BTreeMap<ConsentCategory, bool> {
        ConsentCategory::ALL
            .iter()
            .map(|c| (*c, self.get(*c)))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Profile,
    Email,
    Phone,
    Activity,
    Location,
    Expenses,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VisibilityLevel {
    Everyone,
    Friends,
    OnlyMe,
}

impl DataType {
    pub const ALL: [DataType; 6] = [
        DataType::Profile,
        DataType::Email,
        DataType::Phone,
        DataType::Activity,
        DataType::Location,
        DataType::Expenses,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Profile => "profile",
            DataType::Email => "email",
            DataType::Phone => "phone",
            DataType::Activity => "activity",
            DataType::Location => "location",
            DataType::Expenses => "expenses",
        }
    }

    pub fn default_visibility(&self) -> VisibilityLevel {
        match self {
            DataType::Profile => VisibilityLevel::Everyone,
            DataType::Activity | DataType::Expenses => VisibilityLevel::Friends,
            DataType::Email | DataType::Phone | DataType::Location => VisibilityLevel::OnlyMe,
        }
    }
}

impl std::str::FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataType::ALL
            .iter()
            .copied()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| format!("Unknown data type: {}", s))
    }
}

impl VisibilityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisibilityLevel::Everyone => "everyone",
            VisibilityLevel::Friends => "friends",
            VisibilityLevel::OnlyMe => "only-me",
        }
    }
}

/// How the viewer relates to the data owner, as established by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relationship {
    Friend,
    Stranger,
}

/// Per-user visibility settings and block list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivacySettings {
    pub user_id: String,
    pub visibility: BTreeMap<DataType, VisibilityLevel>,
    pub blocked_users: BTreeSet<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl PrivacySettings {
    pub fn defaults_for(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            visibility: BTreeMap::new(),
            blocked_users: BTreeSet::new(),
            updated_at: None,
        }
    }

    pub fn visibility_of(&self, data_type: DataType) -> VisibilityLevel {
        self.visibility
            .get(&data_type)
            .copied()
            .unwrap_or_else(|| data_type.default_visibility())
    }

    pub fn is_blocked(&self, viewer_id: &str) -> bool {
        self.blocked_users.contains(viewer_id)
    }
}
