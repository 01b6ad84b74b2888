use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::time;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

id_newtype!(LabId);
id_newtype!(UserId);

const UNKNOWN_STATUS: &str = "Unknown";

/// Lifecycle status reported by the backend.
///
/// The backend sends a free-form string. Known values are matched
/// case-insensitively; anything else is kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LabStatus {
    Creating,
    Running,
    Stopped,
    Expired,
    Other(String),
}

impl LabStatus {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "creating" => Self::Creating,
            "running" => Self::Running,
            "stopped" => Self::Stopped,
            "expired" => Self::Expired,
            _ => Self::Other(trimmed.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Creating => "Creating",
            Self::Running => "Running",
            Self::Stopped => "Stopped",
            Self::Expired => "Expired",
            Self::Other(raw) => raw,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn tone(&self) -> StatusTone {
        match self {
            Self::Running => StatusTone::Healthy,
            Self::Creating => StatusTone::Pending,
            Self::Stopped | Self::Expired => StatusTone::Halted,
            Self::Other(_) => StatusTone::Neutral,
        }
    }

    pub fn css_class(&self) -> String {
        let slug = self.as_str().trim().to_ascii_lowercase().replace(' ', "-");
        if slug.is_empty() {
            format!("status-{}", UNKNOWN_STATUS.to_ascii_lowercase())
        } else {
            format!("status-{slug}")
        }
    }
}

impl Default for LabStatus {
    fn default() -> Self {
        Self::Other(UNKNOWN_STATUS.to_string())
    }
}

impl fmt::Display for LabStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for LabStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LabStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.map(|raw| Self::parse(&raw)).unwrap_or_default())
    }
}

/// Coarse visual classification of a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTone {
    Healthy,
    Pending,
    Halted,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lab {
    pub id: LabId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    pub lab_type: String,
    #[serde(default)]
    pub status: LabStatus,
    #[serde(
        default,
        with = "time::optional_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(with = "time::timestamp")]
    pub expires_at: DateTime<Utc>,
    pub access_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,
}

impl Lab {
    pub fn time_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        time::time_remaining(self.expires_at, now)
    }

    pub fn format_time_remaining(&self, now: DateTime<Utc>) -> String {
        time::format_time_remaining(self.expires_at, now)
    }

    /// Display title such as `Docker Lab`.
    pub fn title(&self) -> String {
        let mut chars = self.lab_type.chars();
        match chars.next() {
            Some(first) => format!("{}{} Lab", first.to_uppercase(), chars.as_str()),
            None => "Lab".to_string(),
        }
    }
}
