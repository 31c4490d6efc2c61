//! Caller identity resolved once per request by the surrounding layer

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Business,
    Influencer,
    Admin,
    /// The scheduled sweep runs under this role.
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Business => "business",
            Role::Influencer => "influencer",
            Role::Admin => "admin",
            Role::System => "system",
        };
        f.write_str(name)
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "business" => Ok(Role::Business),
            "influencer" => Ok(Role::Influencer),
            "admin" => Ok(Role::Admin),
            "system" => Ok(Role::System),
            other => anyhow::bail!("unknown role '{other}'"),
        }
    }
}

/// An authenticated caller. Immutable for the duration of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    /// Actor the auto-approval sweep acts as.
    pub fn system() -> Self {
        Self {
            id: "system".to_string(),
            role: Role::System,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
