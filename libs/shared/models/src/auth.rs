use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtHeader {
    pub alg: String,
    pub typ: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: Option<u64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub app_metadata: Option<serde_json::Value>,
    pub user_metadata: Option<serde_json::Value>,
    pub aud: Option<String>,
    pub iat: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn role(&self) -> Role {
        self.role.as_deref().map(Role::from_claim).unwrap_or(Role::Unknown)
    }
}

/// Clinic roles recognised by the scheduling endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Doctor,
    Nurse,
    Receptionist,
    Patient,
    Unknown,
}

impl Role {
    pub fn from_claim(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" | "branch_admin" | "super_admin" => Role::Admin,
            "doctor" => Role::Doctor,
            "nurse" => Role::Nurse,
            "receptionist" | "front_desk" => Role::Receptionist,
            "patient" => Role::Patient,
            _ => Role::Unknown,
        }
    }

    /// Branch staff who operate the front desk and queue.
    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Admin | Role::Doctor | Role::Nurse | Role::Receptionist)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Doctor => write!(f, "doctor"),
            Role::Nurse => write!(f, "nurse"),
            Role::Receptionist => write!(f, "receptionist"),
            Role::Patient => write!(f, "patient"),
            Role::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub valid: bool,
    pub user_id: String,
    pub email: Option<String>,
    pub role: Option<String>,
}
