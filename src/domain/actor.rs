use serde::{Deserialize, Serialize};
use uuid::Uuid;

string_enum! {
    /// Role of the caller, as asserted by the upstream auth layer.
    pub enum ActorRole {
        Investor => "INVESTOR",
        Sponsor => "SPONSOR",
        Admin => "ADMIN",
        System => "SYSTEM",
    }
}

/// The authenticated principal on whose behalf an operation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub role: ActorRole,
}

impl Actor {
    pub fn new(id: Uuid, role: ActorRole) -> Self {
        Self { id, role }
    }

    /// Internal workers (retry sweeper, webhook reconciliation).
    pub fn system() -> Self {
        Self {
            id: Uuid::nil(),
            role: ActorRole::System,
        }
    }

    pub fn is_elevated(&self) -> bool {
        matches!(self.role, ActorRole::Admin | ActorRole::System)
    }

    /// Label written into audit entries.
    pub fn audit_label(&self) -> String {
        match self.role {
            ActorRole::System => "system".to_string(),
            role => format!("{}:{}", role.as_str().to_lowercase(), self.id),
        }
    }
}
