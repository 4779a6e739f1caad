use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Admin,
    Operator,
    Viewer,
    Unknown,
}

impl ActorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Operator => "operator",
            Self::Viewer => "viewer",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Self::Admin),
            "operator" => Some(Self::Operator),
            "viewer" => Some(Self::Viewer),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Identity and role of whoever sent the current request.
///
/// Resolved fresh for every request and never cached.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    pub profile_id: Option<String>,
    pub external_user_id: String,
    pub role: ActorRole,
    pub is_admin: bool,
}

impl ActorContext {
    pub fn unknown(profile_id: Option<String>, external_user_id: impl Into<String>) -> Self {
        Self {
            profile_id,
            external_user_id: external_user_id.into(),
            role: ActorRole::Unknown,
            is_admin: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub external_user_id: String,
    pub display_name: Option<String>,
    pub role: ActorRole,
    pub is_admin: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceType {
    Dm,
    Channel,
    Group,
    Unknown,
}

impl SurfaceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dm => "dm",
            Self::Channel => "channel",
            Self::Group => "group",
            Self::Unknown => "unknown",
        }
    }

    /// Accepts both the canonical names and the Slack `channel_type` values.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dm" | "im" => Some(Self::Dm),
            "channel" => Some(Self::Channel),
            "group" | "mpim" | "private_channel" => Some(Self::Group),
            _ => None,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceContext {
    pub channel_id: String,
    pub surface_type: SurfaceType,
}
