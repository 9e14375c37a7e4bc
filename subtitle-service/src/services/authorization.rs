//! Maps every guarded action to the single permission it requires.

use crate::models::{Permission, Role};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    ViewOwnProfile,
    UpdateOwnProfile,
    ViewOwnOrders,
    ManageOwnOrders,
    ViewAllOrders,
    ViewUsers,
    ViewAuditLog,
    ViewStats,
    ViewSettings,
    UpdateUser,
    /// Updating an account whose current role is admin or super_admin.
    UpdatePrivilegedUser,
    UpdateOrder,
    ReprocessOrder,
    RefundOrder,
    ReviewSubtitles,
    UpdateSetting,
    ChangeRole,
}

impl Action {
    pub const ALL: [Action; 17] = [
        Action::ViewOwnProfile,
        Action::UpdateOwnProfile,
        Action::ViewOwnOrders,
        Action::ManageOwnOrders,
        Action::ViewAllOrders,
        Action::ViewUsers,
        Action::ViewAuditLog,
        Action::ViewStats,
        Action::ViewSettings,
        Action::UpdateUser,
        Action::UpdatePrivilegedUser,
        Action::UpdateOrder,
        Action::ReprocessOrder,
        Action::RefundOrder,
        Action::ReviewSubtitles,
        Action::UpdateSetting,
        Action::ChangeRole,
    ];

    pub fn required_permission(&self) -> Permission {
        match self {
            Action::ViewOwnProfile | Action::ViewOwnOrders => Permission::ReadOwn,
            Action::UpdateOwnProfile | Action::ManageOwnOrders => Permission::WriteOwn,
            Action::ViewAllOrders
            | Action::ViewUsers
            | Action::ViewAuditLog
            | Action::ViewStats
            | Action::ViewSettings => Permission::ReadAll,
            Action::UpdateUser => Permission::WriteAll,
            Action::UpdatePrivilegedUser => Permission::ManageUsers,
            Action::UpdateOrder
            | Action::ReprocessOrder
            | Action::RefundOrder
            | Action::ReviewSubtitles => Permission::ManageOrders,
            Action::UpdateSetting => Permission::ManageSettings,
            Action::ChangeRole => Permission::ManageRoles,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorizationError {
    #[error("role '{role}' lacks permission '{required}'")]
    MissingPermission {
        role: Role,
        action: Action,
        required: Permission,
    },

    /// Permission is held but a rule about the target forbids the action.
    #[error("{0}")]
    Denied(String),
}

pub fn authorize(role: Role, action: Action) -> Result<(), AuthorizationError> {
    let required = action.required_permission();
    if role.has_permission(required) {
        Ok(())
    } else {
        Err(AuthorizationError::MissingPermission {
            role,
            action,
            required,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimum_role(action: Action) -> Role {
        match action.required_permission() {
            Permission::ReadOwn | Permission::WriteOwn => Role::User,
            Permission::ReadAll
            | Permission::WriteAll
            | Permission::ManageOrders
            | Permission::ManageSettings => Role::Admin,
            Permission::ManageUsers | Permission::ManageRoles => Role::SuperAdmin,
        }
    }

    #[test]
    fn test_every_role_action_pair() {
        for role in Role::ALL {
            for action in Action::ALL {
                let result = authorize(role, action);
                assert_eq!(
                    result.is_ok(),
                    role >= minimum_role(action),
                    "{role} / {action:?}"
                );
            }
        }
    }

    #[test]
    fn test_user_cannot_touch_settings() {
        let err = authorize(Role::User, Action::UpdateSetting).unwrap_err();
        assert_eq!(
            err,
            AuthorizationError::MissingPermission {
                role: Role::User,
                action: Action::UpdateSetting,
                required: Permission::ManageSettings,
            }
        );
    }

    #[test]
    fn test_only_super_admin_changes_roles() {
        assert!(authorize(Role::Admin, Action::ChangeRole).is_err());
        assert!(authorize(Role::Admin, Action::UpdatePrivilegedUser).is_err());
        assert!(authorize(Role::SuperAdmin, Action::ChangeRole).is_ok());
    }
}
