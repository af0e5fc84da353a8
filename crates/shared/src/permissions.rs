//! Role permission resolution.
//!
//! A company may store its own permission map for a role name. That override
//! wins over the built-in defaults; a role with neither gets nothing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const MODULES: [&str; 7] = [
    "leads",
    "appointments",
    "meetings",
    "pipelines",
    "users",
    "settings",
    "reports",
];

pub const ACTIONS: [&str; 4] = ["view", "create", "edit", "delete"];

/// `module -> action -> allowed`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionMap(BTreeMap<String, BTreeMap<String, bool>>);

impl PermissionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form: grant `actions` on `module`
    pub fn allow(mut self, module: &str, actions: &[&str]) -> Self {
        for action in actions {
            self.set(module, action, true);
        }
        self
    }

    pub fn set(&mut self, module: &str, action: &str, allowed: bool) {
        self.0
            .entry(module.to_string())
            .or_default()
            .insert(action.to_string(), allowed);
    }

    pub fn get(&self, module: &str, action: &str) -> Option<bool> {
        self.0.get(module).and_then(|actions| actions.get(action)).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, bool)> {
        self.0.iter().flat_map(|(module, actions)| {
            actions
                .iter()
                .map(move |(action, allowed)| (module.as_str(), action.as_str(), *allowed))
        })
    }
}

/// Built-in permission table keyed by role name
pub fn default_permissions(role_name: &str) -> Option<PermissionMap> {
    let map = match role_name {
        "Admin" => MODULES
            .iter()
            .fold(PermissionMap::new(), |map, module| map.allow(module, &ACTIONS)),
        "Gerente" => PermissionMap::new()
            .allow("leads", &ACTIONS)
            .allow("appointments", &ACTIONS)
            .allow("meetings", &ACTIONS)
            .allow("pipelines", &ACTIONS)
            .allow("users", &["view", "create", "edit"])
            .allow("settings", &["view"])
            .allow("reports", &["view"]),
        "Vendedor" => PermissionMap::new()
            .allow("leads", &["view", "create", "edit"])
            .allow("appointments", &["view", "create", "edit"])
            .allow("meetings", &["view", "create"])
            .allow("pipelines", &["view"])
            .allow("reports", &["view"]),
        "Closer" => PermissionMap::new()
            .allow("leads", &["view", "edit"])
            .allow("appointments", &["view", "create", "edit"])
            .allow("meetings", &["view"])
            .allow("pipelines", &["view"]),
        _ => return None,
    };
    Some(map)
}

/// Effective permissions of one caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    pub role_name: Option<String>,
    pub map: PermissionMap,
}

/// Company override, then the default table, then deny-by-default
pub fn resolve_permissions(
    role_name: Option<&str>,
    company_override: Option<&PermissionMap>,
) -> Permissions {
    let map = match (company_override, role_name) {
        (Some(map), _) => map.clone(),
        (None, Some(name)) => default_permissions(name).unwrap_or_default(),
        (None, None) => PermissionMap::new(),
    };
    Permissions {
        role_name: role_name.map(str::to_string),
        map,
    }
}

/// The `(module, action)` pair guarding a named resource
pub fn resource_requirement(resource: &str) -> Option<(&'static str, &'static str)> {
    match resource {
        "leads" => Some(("leads", "view")),
        "appointments" => Some(("appointments", "view")),
        "meetings" => Some(("meetings", "view")),
        "pipelines" => Some(("pipelines", "view")),
        "users" => Some(("users", "view")),
        "settings" => Some(("settings", "view")),
        "reports" => Some(("reports", "view")),
        _ => None,
    }
}

impl Permissions {
    pub fn has_permission(&self, module: &str, action: &str) -> bool {
        self.map.get(module, action).unwrap_or(false)
    }

    pub fn can_access(&self, resource: &str) -> bool {
        resource_requirement(resource)
            .map(|(module, action)| self.has_permission(module, action))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_takes_precedence_over_defaults() {
        // Default table lets Vendedor create leads; the company says no
        let mut company = PermissionMap::new().allow("leads", &["view"]);
        company.set("leads", "create", false);

        let resolved = resolve_permissions(Some("Vendedor"), Some(&company));
        assert!(!resolved.has_permission("leads", "create"));
        assert!(resolved.has_permission("leads", "view"));
        // Nothing falls through to the defaults once an override exists
        assert!(!resolved.has_permission("appointments", "view"));
    }

    #[test]
    fn test_defaults_used_without_override() {
        let resolved = resolve_permissions(Some("Vendedor"), None);
        assert!(resolved.has_permission("leads", "create"));
        assert!(!resolved.has_permission("leads", "delete"));
        assert!(!resolved.has_permission("settings", "view"));
    }

    #[test]
    fn test_unknown_role_is_denied_everything() {
        let resolved = resolve_permissions(Some("Estagiario"), None);
        assert!(resolved.map.is_empty());
        for module in MODULES {
            for action in ACTIONS {
                assert!(!resolved.has_permission(module, action));
            }
        }

        let no_role = resolve_permissions(None, None);
        assert!(!no_role.can_access("leads"));
    }

    #[test]
    fn test_admin_has_everything() {
        let resolved = resolve_permissions(Some("Admin"), None);
        for module in MODULES {
            for action in ACTIONS {
                assert!(resolved.has_permission(module, action), "{module}.{action}");
            }
        }
    }

    #[test]
    fn test_can_access_maps_resources() {
        let closer = resolve_permissions(Some("Closer"), None);
        assert!(closer.can_access("leads"));
        assert!(closer.can_access("appointments"));
        assert!(!closer.can_access("settings"));
        assert!(!closer.can_access("users"));
        assert!(!closer.can_access("no-such-page"));
    }

    #[test]
    fn test_permission_map_serializes_as_nested_object() {
        let map = PermissionMap::new().allow("leads", &["view"]);
        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(json, serde_json::json!({"leads": {"view": true}}));

        let parsed: PermissionMap =
            serde_json::from_str(r#"{"meetings":{"create":false,"view":true}}"#).unwrap();
        assert_eq!(parsed.get("meetings", "view"), Some(true));
        assert_eq!(parsed.get("meetings", "create"), Some(false));
        assert_eq!(parsed.get("meetings", "delete"), None);
    }
}
