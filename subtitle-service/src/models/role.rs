//! Account roles and the permissions each one grants.

use super::UnknownVariant;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Account role. Ordered from least to most privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
    SuperAdmin,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::User, Role::Admin, Role::SuperAdmin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
        }
    }

    /// Admin and super_admin accounts; only a super_admin may modify these.
    pub fn is_privileged(&self) -> bool {
        matches!(self, Role::Admin | Role::SuperAdmin)
    }

    pub fn permissions(&self) -> &'static HashSet<Permission> {
        // Every role is inserted when the table is built.
        &ROLE_PERMISSIONS[self]
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            "super_admin" => Ok(Role::SuperAdmin),
            other => Err(UnknownVariant::new("role", other)),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ReadOwn,
    WriteOwn,
    ReadAll,
    WriteAll,
    ManageOrders,
    ManageSettings,
    ManageUsers,
    ManageRoles,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ReadOwn => "read_own",
            Permission::WriteOwn => "write_own",
            Permission::ReadAll => "read_all",
            Permission::WriteAll => "write_all",
            Permission::ManageOrders => "manage_orders",
            Permission::ManageSettings => "manage_settings",
            Permission::ManageUsers => "manage_users",
            Permission::ManageRoles => "manage_roles",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const USER_GRANTS: &[Permission] = &[Permission::ReadOwn, Permission::WriteOwn];

const ADMIN_GRANTS: &[Permission] = &[
    Permission::ReadAll,
    Permission::WriteAll,
    Permission::ManageOrders,
    Permission::ManageSettings,
];

const SUPER_ADMIN_GRANTS: &[Permission] = &[Permission::ManageUsers, Permission::ManageRoles];

/// Built once, read-only afterwards. Each role inherits everything granted
/// to the role below it.
static ROLE_PERMISSIONS: Lazy<HashMap<Role, HashSet<Permission>>> = Lazy::new(|| {
    let user: HashSet<Permission> = USER_GRANTS.iter().copied().collect();

    let mut admin = user.clone();
    admin.extend(ADMIN_GRANTS.iter().copied());

    let mut super_admin = admin.clone();
    super_admin.extend(SUPER_ADMIN_GRANTS.iter().copied());

    HashMap::from([
        (Role::User, user),
        (Role::Admin, admin),
        (Role::SuperAdmin, super_admin),
    ])
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_superset_chain() {
        assert!(Role::User.permissions().is_subset(Role::Admin.permissions()));
        assert!(Role::Admin
            .permissions()
            .is_subset(Role::SuperAdmin.permissions()));
        assert_eq!(Role::User.permissions().len(), 2);
        assert_eq!(Role::Admin.permissions().len(), 6);
        assert_eq!(Role::SuperAdmin.permissions().len(), 8);
    }

    #[test]
    fn test_role_management_is_super_admin_only() {
        assert!(!Role::User.has_permission(Permission::ManageRoles));
        assert!(!Role::Admin.has_permission(Permission::ManageRoles));
        assert!(Role::SuperAdmin.has_permission(Permission::ManageRoles));
        assert!(!Role::Admin.has_permission(Permission::ManageUsers));
    }

    #[test]
    fn test_role_parsing() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("root".parse::<Role>().is_err());
        assert_eq!(
            serde_json::to_string(&Role::SuperAdmin).unwrap(),
            "\"super_admin\""
        );
    }
}
