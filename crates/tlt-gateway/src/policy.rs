//! Role policy: `(role × tool × action) → allow/deny` with two-tier lookup.
//!
//! An explicit rule wins; otherwise the role's default applies. The rule
//! table lives in-process, is mutable through admin-only gateway tools, and
//! persists through an atomic file rewrite.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Closed role set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Admin,
    EventOwner,
    User,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::EventOwner => "event-owner",
            Role::User => "user",
        }
    }

    pub fn parse(raw: &str) -> Option<Role> {
        match raw {
            "admin" => Some(Role::Admin),
            // The original wire format used an underscore; accept both.
            "event-owner" | "event_owner" => Some(Role::EventOwner),
            "user" => Some(Role::User),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authentication context extracted from tool-call arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthContext {
    pub user_id: String,
    pub role: Role,
    #[serde(default)]
    pub event_permissions: Vec<String>,
}

/// Reserved argument key carrying the auth context.
pub const AUTH_CONTEXT_KEY: &str = "auth_context";

impl AuthContext {
    /// Removes and parses the auth context from an argument map.
    ///
    /// Returns `None` when the key is absent or malformed; the caller decides
    /// whether an absent context is acceptable (development mode only).
    pub fn take_from(arguments: &mut Map<String, Value>) -> Option<AuthContext> {
        let raw = arguments.remove(AUTH_CONTEXT_KEY)?;
        serde_json::from_value(raw).ok()
    }

    /// Serialises this context back into an argument map.
    pub fn insert_into(&self, arguments: &mut Map<String, Value>) {
        if let Ok(value) = serde_json::to_value(self) {
            arguments.insert(AUTH_CONTEXT_KEY.to_string(), value);
        }
    }
}

/// One explicit policy rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub role: Role,
    pub tool: String,
    pub allow: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PolicyFile {
    rules: Vec<PolicyRule>,
    user_roles: HashMap<String, Role>,
}

/// Administrative surfaces of an event; event-owner and admin only by
/// default. Ordinary participation tools stay open to the `user` role.
const OWNER_TOOLS: &[&str] = &[
    "delete_event",
    "update_guild_settings",
    "activate_photo_collection",
    "deactivate_photo_collection",
    "update_photo_settings",
    "activate_vibe_canvas",
    "deactivate_vibe_canvas",
    "update_vibe_settings",
];

/// Gateway management tools that change policy; admin only, always.
const ADMIN_TOOLS: &[&str] = &[
    "add_policy",
    "remove_policy",
    "add_user_role",
    "remove_user_role",
];

/// In-process policy engine with optional file persistence.
#[derive(Debug, Default)]
pub struct PolicyEngine {
    rules: HashMap<(Role, String), bool>,
    user_roles: HashMap<String, Role>,
    path: Option<PathBuf>,
}

impl PolicyEngine {
    /// Engine with role defaults only and no persistence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine backed by a policy file; missing files start empty.
    ///
    /// # Errors
    /// Returns an error when the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let mut engine = Self {
            path: Some(path.to_path_buf()),
            ..Self::default()
        };
        if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("read policy {}", path.display()))?;
            let file: PolicyFile = serde_json::from_str(&raw)
                .with_context(|| format!("parse policy {}", path.display()))?;
            for rule in file.rules {
                engine.rules.insert((rule.role, rule.tool), rule.allow);
            }
            engine.user_roles = file.user_roles;
        }
        Ok(engine)
    }

    /// Whether `role` may invoke `tool`.
    ///
    /// Explicit rule first, then the role default: admins may do anything,
    /// event owners everything except policy mutation, users only
    /// non-mutating tools.
    pub fn check(&self, role: Role, tool: &str) -> bool {
        if let Some(&allow) = self.rules.get(&(role, tool.to_string())) {
            return allow;
        }
        if ADMIN_TOOLS.contains(&tool) {
            return role == Role::Admin;
        }
        match role {
            Role::Admin => true,
            Role::EventOwner => true,
            Role::User => !OWNER_TOOLS.contains(&tool),
        }
    }

    /// Adds or replaces an explicit rule and persists.
    ///
    /// # Errors
    /// Returns an error when persistence fails; the in-memory rule is kept.
    pub fn add_rule(&mut self, role: Role, tool: &str, allow: bool) -> Result<()> {
        self.rules.insert((role, tool.to_string()), allow);
        self.save()
    }

    /// Removes an explicit rule; returns whether one existed.
    ///
    /// # Errors
    /// Returns an error when persistence fails.
    pub fn remove_rule(&mut self, role: Role, tool: &str) -> Result<bool> {
        let removed = self.rules.remove(&(role, tool.to_string())).is_some();
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    /// All explicit rules, sorted for stable output.
    pub fn rules(&self) -> Vec<PolicyRule> {
        let mut rules: Vec<PolicyRule> = self
            .rules
            .iter()
            .map(|((role, tool), &allow)| PolicyRule {
                role: *role,
                tool: tool.clone(),
                allow,
            })
            .collect();
        rules.sort_by(|a, b| (a.role.as_str(), &a.tool).cmp(&(b.role.as_str(), &b.tool)));
        rules
    }

    /// Role assigned to a user, defaulting to `user`.
    pub fn role_for_user(&self, user_id: &str) -> Role {
        self.user_roles.get(user_id).copied().unwrap_or(Role::User)
    }

    /// Assigns a role to a user and persists.
    ///
    /// # Errors
    /// Returns an error when persistence fails.
    pub fn add_user_role(&mut self, user_id: &str, role: Role) -> Result<()> {
        self.user_roles.insert(user_id.to_string(), role);
        self.save()
    }

    /// Clears a user's assigned role; returns whether one existed.
    ///
    /// # Errors
    /// Returns an error when persistence fails.
    pub fn remove_user_role(&mut self, user_id: &str) -> Result<bool> {
        let removed = self.user_roles.remove(user_id).is_some();
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let file = PolicyFile {
            rules: self.rules(),
            user_roles: self.user_roles.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, bytes).with_context(|| format!("write {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_defaults() {
        let engine = PolicyEngine::new();
        assert!(engine.check(Role::Admin, "add_policy"));
        assert!(engine.check(Role::Admin, "delete_event"));
        assert!(engine.check(Role::EventOwner, "delete_event"));
        assert!(!engine.check(Role::EventOwner, "add_policy"));
        assert!(engine.check(Role::User, "process_rsvp"));
        assert!(engine.check(Role::User, "submit_photo_dm"));
        assert!(!engine.check(Role::User, "delete_event"));
        assert!(!engine.check(Role::User, "remove_user_role"));
    }

    #[test]
    fn explicit_rule_overrides_default() {
        let mut engine = PolicyEngine::new();
        engine.add_rule(Role::User, "delete_event", true).unwrap();
        assert!(engine.check(Role::User, "delete_event"));
        engine
            .add_rule(Role::EventOwner, "process_rsvp", false)
            .unwrap();
        assert!(!engine.check(Role::EventOwner, "process_rsvp"));
        assert!(engine.remove_rule(Role::User, "delete_event").unwrap());
        assert!(!engine.check(Role::User, "delete_event"));
    }

    #[test]
    fn persistence_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("policy.json");
        {
            let mut engine = PolicyEngine::load(&path).unwrap();
            engine.add_rule(Role::User, "vibe_bit", false).unwrap();
            engine.add_user_role("7", Role::Admin).unwrap();
        }
        let engine = PolicyEngine::load(&path).unwrap();
        assert!(!engine.check(Role::User, "vibe_bit"));
        assert_eq!(engine.role_for_user("7"), Role::Admin);
        assert_eq!(engine.role_for_user("8"), Role::User);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn auth_context_extraction_strips_key() {
        let mut args = Map::new();
        args.insert("event_id".to_string(), serde_json::json!("42"));
        args.insert(
            AUTH_CONTEXT_KEY.to_string(),
            serde_json::json!({"user_id": "7", "role": "event-owner"}),
        );
        let auth = AuthContext::take_from(&mut args).unwrap();
        assert_eq!(auth.role, Role::EventOwner);
        assert_eq!(auth.user_id, "7");
        assert!(!args.contains_key(AUTH_CONTEXT_KEY));
        assert!(args.contains_key("event_id"));
        assert!(AuthContext::take_from(&mut args).is_none());
    }

    #[test]
    fn role_parse_accepts_both_separators() {
        assert_eq!(Role::parse("event-owner"), Some(Role::EventOwner));
        assert_eq!(Role::parse("event_owner"), Some(Role::EventOwner));
        assert_eq!(Role::parse("root"), None);
    }
}
