use std::collections::HashMap;
use std::sync::Mutex;

use devparam_domain::{PermissionType, UserPermissions};

/// Users that skip every permission check.
pub(crate) fn is_bypass_user(user_name: &str) -> bool {
    if user_name == "root" {
        return true;
    }
    #[cfg(feature = "admin-bypass")]
    if user_name == "admin" {
        return true;
    }
    false
}

/// The permissions backend consumed by the filter layer. Fetched once per
/// logical front-end call.
pub trait Permissions: Send + Sync {
    fn get_user_permissions(&self, user_name: &str) -> UserPermissions;

    /// Human-readable name of one permission, used in `UNAUTHORIZED`
    /// messages.
    fn get_permission_name(&self, feature: &str, permission_type: PermissionType) -> String {
        let kind = match permission_type {
            PermissionType::Read => "read",
            PermissionType::Write => "write",
        };
        format!("{}.{}", feature.to_ascii_lowercase(), kind)
    }
}

/// Fixed user table; unknown users get empty permission sets.
#[derive(Default)]
pub struct StaticPermissions {
    users: Mutex<HashMap<String, UserPermissions>>,
}

impl StaticPermissions {
    pub fn new() -> Self {
        StaticPermissions::default()
    }

    pub fn with_user(self, permissions: UserPermissions) -> Self {
        self.users
            .lock()
            .unwrap()
            .insert(permissions.user_name.clone(), permissions);
        self
    }
}

impl Permissions for StaticPermissions {
    fn get_user_permissions(&self, user_name: &str) -> UserPermissions {
        self.users
            .lock()
            .unwrap()
            .get(user_name)
            .cloned()
            .unwrap_or_else(|| UserPermissions::new(user_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_user_has_no_permissions() {
        let backend = StaticPermissions::new();
        let perms = backend.get_user_permissions("nobody");
        assert_eq!(perms.user_name, "nobody");
        assert!(perms.read_permissions.is_empty());
        assert!(perms.write_permissions.is_empty());
    }

    #[test]
    fn permission_names_are_stable() {
        let backend = StaticPermissions::new();
        assert_eq!(
            backend.get_permission_name("Identity", PermissionType::Read),
            "identity.read"
        );
        assert_eq!(
            backend.get_permission_name("Network", PermissionType::Write),
            "network.write"
        );
    }
}
