use core::str::FromStr;

use serde::{Deserialize, Serialize};

use warden_core::AuthError;

/// Role a user holds inside one workspace.
///
/// Ordered by privilege: `Owner > Admin > Member`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceRole {
    Owner,
    Admin,
    Member,
}

impl WorkspaceRole {
    pub const ALL: [WorkspaceRole; 3] = [WorkspaceRole::Owner, WorkspaceRole::Admin, WorkspaceRole::Member];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkspaceRole::Owner => "owner",
            WorkspaceRole::Admin => "admin",
            WorkspaceRole::Member => "member",
        }
    }

    /// Numeric privilege rank; higher outranks lower.
    pub fn rank(&self) -> u8 {
        match self {
            WorkspaceRole::Owner => 3,
            WorkspaceRole::Admin => 2,
            WorkspaceRole::Member => 1,
        }
    }

    pub fn at_least(&self, other: WorkspaceRole) -> bool {
        self.rank() >= other.rank()
    }

    /// Roles that may be granted through "add member". Ownership is never granted.
    pub fn is_grantable(&self) -> bool {
        matches!(self, WorkspaceRole::Admin | WorkspaceRole::Member)
    }
}

impl core::fmt::Display for WorkspaceRole {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkspaceRole {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(WorkspaceRole::Owner),
            "admin" => Ok(WorkspaceRole::Admin),
            "member" => Ok(WorkspaceRole::Member),
            _ => Err(AuthError::InvalidRole),
        }
    }
}
