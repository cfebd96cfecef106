use serde::Serialize;
use thiserror::Error;

use warden_core::AuthError;

use crate::WorkspaceRole;

/// A workspace operation subject to the role hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceOperation {
    Create,
    Read,
    ListMembers,
    Update,
    Delete,
    AddMember { role: WorkspaceRole },
    RemoveMember { is_self: bool, target_role: WorkspaceRole },
}

impl WorkspaceOperation {
    pub fn name(&self) -> &'static str {
        match self {
            WorkspaceOperation::Create => "workspace.create",
            WorkspaceOperation::Read => "workspace.read",
            WorkspaceOperation::ListMembers => "workspace.list_members",
            WorkspaceOperation::Update => "workspace.update",
            WorkspaceOperation::Delete => "workspace.delete",
            WorkspaceOperation::AddMember { .. } => "member.add",
            WorkspaceOperation::RemoveMember { is_self: true, .. } => "member.leave",
            WorkspaceOperation::RemoveMember { is_self: false, .. } => "member.remove",
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PolicyError {
    #[error("not a member of the workspace")]
    NotMember,

    #[error("forbidden")]
    Forbidden,

    #[error("invalid role")]
    InvalidRole,

    #[error("owner cannot leave workspace, delete it instead")]
    OwnerCannotLeave,
}

impl From<PolicyError> for AuthError {
    fn from(value: PolicyError) -> Self {
        match value {
            PolicyError::NotMember => AuthError::NotMember,
            PolicyError::Forbidden => AuthError::Forbidden,
            PolicyError::InvalidRole => AuthError::InvalidRole,
            PolicyError::OwnerCannotLeave => AuthError::OwnerCannotLeave,
        }
    }
}

/// Decide whether a requester holding `requester` (or no membership) may
/// perform `op`.
///
/// - No IO
/// - No panics
/// - Rank is checked before the requested role, so a member asking to grant
///   `owner` is told `Forbidden`, not `InvalidRole`.
pub fn authorize(requester: Option<WorkspaceRole>, op: WorkspaceOperation) -> Result<(), PolicyError> {
    use WorkspaceRole::*;

    if op == WorkspaceOperation::Create {
        return Ok(());
    }
    let role = requester.ok_or(PolicyError::NotMember)?;

    match op {
        WorkspaceOperation::Create | WorkspaceOperation::Read | WorkspaceOperation::ListMembers => Ok(()),
        WorkspaceOperation::Update => require(role, Admin),
        WorkspaceOperation::Delete => require(role, Owner),
        WorkspaceOperation::AddMember { role: granted } => {
            require(role, Admin)?;
            if granted.is_grantable() {
                Ok(())
            } else {
                Err(PolicyError::InvalidRole)
            }
        }
        WorkspaceOperation::RemoveMember { is_self: true, .. } => {
            if role == Owner {
                Err(PolicyError::OwnerCannotLeave)
            } else {
                Ok(())
            }
        }
        WorkspaceOperation::RemoveMember {
            is_self: false,
            target_role,
        } => match role {
            Owner => Ok(()),
            Admin if target_role == Member => Ok(()),
            Admin | Member => Err(PolicyError::Forbidden),
        },
    }
}

fn require(role: WorkspaceRole, min: WorkspaceRole) -> Result<(), PolicyError> {
    if role.at_least(min) {
        Ok(())
    } else {
        Err(PolicyError::Forbidden)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Authorization Explanation (Audit Trail)
// ─────────────────────────────────────────────────────────────────────────────

/// Structured account of one policy decision, suitable for a log line.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub operation: &'static str,
    pub requester_role: Option<WorkspaceRole>,
    pub granted: bool,
    pub reason: String,
    pub denial: Option<DenialKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    NotMember,
    InsufficientRole,
    InvalidRole,
    OwnerCannotLeave,
}

/// Explain why [`authorize`] allows or denies `op` for `requester`.
pub fn explain(requester: Option<WorkspaceRole>, op: WorkspaceOperation) -> AuthorizationExplanation {
    let decision = authorize(requester, op);
    let held = requester.map(|r| r.as_str()).unwrap_or("none");

    let (denial, reason) = match decision {
        Ok(()) => (None, format!("role '{held}' permits {}", op.name())),
        Err(PolicyError::NotMember) => (
            Some(DenialKind::NotMember),
            "requester has no membership in the workspace".to_string(),
        ),
        Err(PolicyError::Forbidden) => (
            Some(DenialKind::InsufficientRole),
            format!("role '{held}' does not permit {}", op.name()),
        ),
        Err(PolicyError::InvalidRole) => (
            Some(DenialKind::InvalidRole),
            "only 'admin' or 'member' can be granted".to_string(),
        ),
        Err(PolicyError::OwnerCannotLeave) => (
            Some(DenialKind::OwnerCannotLeave),
            "the owner must delete the workspace instead of leaving".to_string(),
        ),
    };

    AuthorizationExplanation {
        operation: op.name(),
        requester_role: requester,
        granted: denial.is_none(),
        reason,
        denial,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use WorkspaceRole::*;

    fn remove_other(target_role: WorkspaceRole) -> WorkspaceOperation {
        WorkspaceOperation::RemoveMember {
            is_self: false,
            target_role,
        }
    }

    fn leave(role: WorkspaceRole) -> WorkspaceOperation {
        WorkspaceOperation::RemoveMember {
            is_self: true,
            target_role: role,
        }
    }

    #[test]
    fn anyone_authenticated_may_create() {
        assert_eq!(authorize(None, WorkspaceOperation::Create), Ok(()));
    }

    #[test]
    fn non_members_cannot_read() {
        assert_eq!(authorize(None, WorkspaceOperation::Read), Err(PolicyError::NotMember));
        assert_eq!(authorize(None, WorkspaceOperation::ListMembers), Err(PolicyError::NotMember));
        for role in WorkspaceRole::ALL {
            assert_eq!(authorize(Some(role), WorkspaceOperation::Read), Ok(()));
        }
    }

    #[test]
    fn update_requires_admin() {
        assert_eq!(authorize(Some(Member), WorkspaceOperation::Update), Err(PolicyError::Forbidden));
        assert_eq!(authorize(Some(Admin), WorkspaceOperation::Update), Ok(()));
        assert_eq!(authorize(Some(Owner), WorkspaceOperation::Update), Ok(()));
    }

    #[test]
    fn only_owner_deletes() {
        assert_eq!(authorize(Some(Member), WorkspaceOperation::Delete), Err(PolicyError::Forbidden));
        assert_eq!(authorize(Some(Admin), WorkspaceOperation::Delete), Err(PolicyError::Forbidden));
        assert_eq!(authorize(Some(Owner), WorkspaceOperation::Delete), Ok(()));
    }

    #[test]
    fn owner_role_is_never_grantable() {
        let grant_owner = WorkspaceOperation::AddMember { role: Owner };
        assert_eq!(authorize(Some(Owner), grant_owner), Err(PolicyError::InvalidRole));
        assert_eq!(authorize(Some(Member), grant_owner), Err(PolicyError::Forbidden));
        assert_eq!(authorize(Some(Admin), WorkspaceOperation::AddMember { role: Admin }), Ok(()));
    }

    #[test]
    fn admin_cannot_remove_peers_or_owner() {
        assert_eq!(authorize(Some(Admin), remove_other(Admin)), Err(PolicyError::Forbidden));
        assert_eq!(authorize(Some(Admin), remove_other(Owner)), Err(PolicyError::Forbidden));
        assert_eq!(authorize(Some(Admin), remove_other(Member)), Ok(()));
        assert_eq!(authorize(Some(Owner), remove_other(Admin)), Ok(()));
        assert_eq!(authorize(Some(Member), remove_other(Member)), Err(PolicyError::Forbidden));
    }

    #[test]
    fn everyone_but_owner_may_leave() {
        assert_eq!(authorize(Some(Owner), leave(Owner)), Err(PolicyError::OwnerCannotLeave));
        assert_eq!(authorize(Some(Admin), leave(Admin)), Ok(()));
        assert_eq!(authorize(Some(Member), leave(Member)), Ok(()));
    }

    #[test]
    fn explanation_matches_decision() {
        let denied = explain(Some(Member), WorkspaceOperation::Delete);
        assert!(!denied.granted);
        assert_eq!(denied.denial, Some(DenialKind::InsufficientRole));
        assert_eq!(denied.operation, "workspace.delete");

        let granted = explain(Some(Owner), WorkspaceOperation::Delete);
        assert!(granted.granted);
        assert!(granted.denial.is_none());

        let json = serde_json::to_value(explain(None, WorkspaceOperation::Read)).unwrap();
        assert_eq!(json["denial"], "not_member");
    }

    fn any_role() -> impl Strategy<Value = WorkspaceRole> {
        prop::sample::select(WorkspaceRole::ALL.to_vec())
    }

    fn any_ranked_op() -> impl Strategy<Value = WorkspaceOperation> {
        prop_oneof![
            Just(WorkspaceOperation::Read),
            Just(WorkspaceOperation::ListMembers),
            Just(WorkspaceOperation::Update),
            Just(WorkspaceOperation::Delete),
            any_role().prop_map(|role| WorkspaceOperation::AddMember { role }),
            any_role().prop_map(remove_other),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: whatever a role may do, every higher role may do too
        /// (leaving is the one operation outside the hierarchy).
        #[test]
        fn permissions_are_monotonic_in_rank(op in any_ranked_op(), low in any_role(), high in any_role()) {
            prop_assume!(high.rank() >= low.rank());
            if authorize(Some(low), op).is_ok() {
                prop_assert_eq!(authorize(Some(high), op), Ok(()));
            }
        }
    }
}
