//! Ownership directory: who owns which components, and in what role.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// A team member as seen by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub owned_components: BTreeSet<String>,
}

impl UserProfile {
    /// Display name, falling back to the user ID.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.user_id
        } else {
            &self.name
        }
    }

    pub fn is_lead(&self) -> bool {
        self.role.to_lowercase().contains("lead")
    }
}

/// Maps users to owned components and components to owners.
pub trait OwnershipDirectory: Send + Sync {
    fn profile(&self, user_id: &str) -> Option<UserProfile>;

    /// Owners of `component`, ordered by user ID.
    fn owners_of(&self, component: &str) -> Vec<UserProfile>;

    /// Components owned by `user_id`; empty for unknown users.
    fn components_of(&self, user_id: &str) -> BTreeSet<String> {
        self.profile(user_id)
            .map(|p| p.owned_components)
            .unwrap_or_default()
    }
}

/// A fixed directory, typically loaded from config.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    users: BTreeMap<String, UserProfile>,
}

impl StaticDirectory {
    pub fn new(users: impl IntoIterator<Item = UserProfile>) -> Self {
        Self {
            users: users
                .into_iter()
                .map(|u| (u.user_id.clone(), u))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl OwnershipDirectory for StaticDirectory {
    fn profile(&self, user_id: &str) -> Option<UserProfile> {
        self.users.get(user_id).cloned()
    }

    fn owners_of(&self, component: &str) -> Vec<UserProfile> {
        self.users
            .values()
            .filter(|u| u.owned_components.contains(component))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, role: &str, owns: &[&str]) -> UserProfile {
        UserProfile {
            user_id: id.into(),
            name: String::new(),
            role: role.into(),
            owned_components: owns.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_owners_and_components() {
        let dir = StaticDirectory::new([
            user("bob", "Firmware Engineer", &["firmware"]),
            user("alice", "Mechanical Lead", &["motor", "mechanical"]),
            user("carol", "Electrical Engineer", &["motor", "power_supply"]),
        ]);
        let owners: Vec<String> = dir.owners_of("motor").into_iter().map(|u| u.user_id).collect();
        assert_eq!(owners, vec!["alice", "carol"]);
        assert!(dir.components_of("bob").contains("firmware"));
        assert!(dir.components_of("nobody").is_empty());
        assert!(dir.profile("alice").unwrap().is_lead());
        assert_eq!(dir.profile("bob").unwrap().display_name(), "bob");
    }
}
