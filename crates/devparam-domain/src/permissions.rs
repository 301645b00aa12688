use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionType {
    Read,
    Write,
}

/// A user's effective permission sets, keyed by feature name (lowercase).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserPermissions {
    pub user_name: String,
    pub read_permissions: BTreeSet<String>,
    pub write_permissions: BTreeSet<String>,
}

impl UserPermissions {
    pub fn new(user_name: impl Into<String>) -> Self {
        UserPermissions {
            user_name: user_name.into(),
            ..UserPermissions::default()
        }
    }

    pub fn with_read(mut self, feature: impl Into<String>) -> Self {
        self.read_permissions.insert(feature.into().to_ascii_lowercase());
        self
    }

    pub fn with_write(mut self, feature: impl Into<String>) -> Self {
        self.write_permissions.insert(feature.into().to_ascii_lowercase());
        self
    }

    pub fn has(&self, feature: &str, permission_type: PermissionType) -> bool {
        let feature = feature.to_ascii_lowercase();
        match permission_type {
            PermissionType::Read => self.read_permissions.contains(&feature),
            PermissionType::Write => self.write_permissions.contains(&feature),
        }
    }
}
