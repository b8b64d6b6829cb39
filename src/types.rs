use serde::{Deserialize, Serialize};

/// Current instant in RFC 3339 UTC, second precision.
pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Viewer,
    Admin,
    SuperAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "viewer" => Some(Role::Viewer),
            "admin" => Some(Role::Admin),
            "super_admin" => Some(Role::SuperAdmin),
            _ => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin | Role::SuperAdmin)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncidentSource {
    Desktop,
    Mobile,
    Web,
}

impl IncidentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentSource::Desktop => "desktop",
            IncidentSource::Mobile => "mobile",
            IncidentSource::Web => "web",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "desktop" => Some(IncidentSource::Desktop),
            "mobile" => Some(IncidentSource::Mobile),
            "web" => Some(IncidentSource::Web),
            _ => None,
        }
    }
}

/// One attempt (successful or manual) to install a device driver on site.
#[derive(Debug, Clone, Serialize)]
pub struct Installation {
    pub id: i64,
    pub timestamp: String,
    pub driver_brand: String,
    pub driver_version: String,
    pub status: String,
    pub client_name: String,
    pub driver_description: String,
    pub installation_time_seconds: i64,
    pub os_info: String,
    pub notes: String,
}

/// Follow-up observation attached to an installation. Immutable once created.
#[derive(Debug, Clone, Serialize)]
pub struct Incident {
    pub id: i64,
    pub installation_id: i64,
    pub reporter_username: String,
    pub note: String,
    pub time_adjustment_seconds: i64,
    pub severity: String,
    pub source: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IncidentPhoto {
    pub id: i64,
    pub incident_id: i64,
    pub r2_key: String,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub sha256: String,
    pub created_at: String,
}

/// Console user row without the password hash (list/identity responses).
#[derive(Debug, Clone, Serialize)]
pub struct WebUser {
    pub id: i64,
    pub username: String,
    pub role: String,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
    pub last_login_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditLog {
    pub id: i64,
    pub timestamp: String,
    pub action: String,
    pub username: String,
    pub success: bool,
    pub details: String,
    pub computer_name: Option<String>,
    pub ip_address: Option<String>,
    pub platform: Option<String>,
}
