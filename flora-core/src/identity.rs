use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role attached to an authenticated caller by the identity collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Admin,
}

/// The already-authenticated caller every core operation receives.
/// Credential verification happens upstream; this is its result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: Role,
}

impl AuthUser {
    pub fn client(user_id: Uuid) -> Self {
        Self {
            user_id,
            role: Role::Client,
        }
    }

    pub fn admin(user_id: Uuid) -> Self {
        Self {
            user_id,
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
