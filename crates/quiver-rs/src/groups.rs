//! Group-based dynamic tool activation.
//!
//! A group is a named activation unit aggregating zero or more tools. Tools
//! in no group are always active; grouped tools are visible only while at
//! least one of their groups is active. Deactivation flips visibility only,
//! memberships survive, so reactivating a group restores its tools without
//! re-registration.
//!
//! The manager keeps the group→tools and tool→groups indexes under one lock
//! so they stay mutually consistent under concurrent mutation.

use crate::errors::RegistrationError;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use tracing::{debug, warn};

/// Read-only snapshot of one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolGroup {
    pub name: String,
    pub description: String,
    pub active: bool,
    /// Member tool names, sorted for stable output.
    pub tools: Vec<String>,
}

struct GroupEntry {
    description: String,
    active: bool,
    tools: HashSet<String>,
}

#[derive(Default)]
struct GroupState {
    groups: HashMap<String, GroupEntry>,
    by_tool: HashMap<String, HashSet<String>>,
}

/// Named groups of tool names with an activation flag, plus the reverse
/// tool→groups index.
#[derive(Default)]
pub struct GroupManager {
    state: RwLock<GroupState>,
}

impl GroupManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a group. Fails if the name is empty or already taken.
    pub fn create(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        active: bool,
    ) -> Result<(), RegistrationError> {
        let name = name.into();
        if name.is_empty() {
            return Err(RegistrationError::EmptyName);
        }
        let mut state = self.write();
        if state.groups.contains_key(&name) {
            return Err(RegistrationError::DuplicateGroup(name));
        }
        debug!("created tool group '{name}' (active={active})");
        state.groups.insert(
            name,
            GroupEntry {
                description: description.into(),
                active,
                tools: HashSet::new(),
            },
        );
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().groups.contains_key(name)
    }

    /// Flip the active flag on the named groups. Unknown names are skipped
    /// with a warning. Returns how many groups were updated.
    pub fn set_active(&self, names: &[impl AsRef<str>], active: bool) -> usize {
        let mut state = self.write();
        let mut updated = 0;
        for name in names {
            let name = name.as_ref();
            match state.groups.get_mut(name) {
                Some(entry) => {
                    entry.active = active;
                    updated += 1;
                }
                None => warn!("set_active: no group named '{name}'"),
            }
        }
        debug!("set {updated} group(s) active={active}");
        updated
    }

    /// Activate the named groups and nothing else.
    ///
    /// Activation is strictly additive: groups not named keep their current
    /// state, active or not. This is not a replace operation. Returns the
    /// groups that were newly activated.
    pub fn activate_only(&self, names: &[impl AsRef<str>]) -> Vec<String> {
        let mut state = self.write();
        let mut newly = Vec::new();
        for name in names {
            let name = name.as_ref();
            if let Some(entry) = state.groups.get_mut(name) {
                if !entry.active {
                    entry.active = true;
                    newly.push(name.to_string());
                }
            } else {
                warn!("activate_only: no group named '{name}'");
            }
        }
        newly
    }

    /// Add a tool to a group, maintaining both sides of the index.
    pub fn add_tool(&self, group: &str, tool: &str) -> Result<(), RegistrationError> {
        let mut state = self.write();
        let Some(entry) = state.groups.get_mut(group) else {
            return Err(RegistrationError::UnknownGroup(group.to_string()));
        };
        entry.tools.insert(tool.to_string());
        state
            .by_tool
            .entry(tool.to_string())
            .or_default()
            .insert(group.to_string());
        Ok(())
    }

    /// Remove a tool from one group, maintaining both sides of the index.
    pub fn remove_tool(&self, group: &str, tool: &str) {
        let mut state = self.write();
        if let Some(entry) = state.groups.get_mut(group) {
            entry.tools.remove(tool);
        }
        let now_ungrouped = state
            .by_tool
            .get_mut(tool)
            .map(|groups| {
                groups.remove(group);
                groups.is_empty()
            })
            .unwrap_or(false);
        if now_ungrouped {
            state.by_tool.remove(tool);
        }
    }

    /// Remove a tool from every group it belongs to. Called when the tool
    /// leaves the registry, so the index never references ghost tools.
    pub fn detach_tool(&self, tool: &str) {
        let mut state = self.write();
        if let Some(groups) = state.by_tool.remove(tool) {
            for group in groups {
                if let Some(entry) = state.groups.get_mut(&group) {
                    entry.tools.remove(tool);
                }
            }
        }
    }

    /// Whether a tool is currently callable: ungrouped, or a member of at
    /// least one active group.
    pub fn is_active_tool(&self, tool: &str) -> bool {
        let state = self.read();
        match state.by_tool.get(tool) {
            None => true,
            Some(groups) => groups
                .iter()
                .any(|g| state.groups.get(g).is_some_and(|e| e.active)),
        }
    }

    /// Remove the named groups, detaching their member tools from the
    /// index. Returns the tools that became fully ungrouped, for the caller
    /// to optionally purge from the registry.
    pub fn remove_groups(&self, names: &[impl AsRef<str>]) -> Vec<String> {
        let mut state = self.write();
        let mut candidates: HashSet<String> = HashSet::new();

        for name in names {
            let name = name.as_ref();
            let Some(entry) = state.groups.remove(name) else {
                warn!("remove_groups: no group named '{name}'");
                continue;
            };
            for tool in entry.tools {
                let now_ungrouped = state
                    .by_tool
                    .get_mut(&tool)
                    .map(|groups| {
                        groups.remove(name);
                        groups.is_empty()
                    })
                    .unwrap_or(false);
                if now_ungrouped {
                    state.by_tool.remove(&tool);
                    candidates.insert(tool);
                }
            }
        }

        let mut orphaned: Vec<String> = candidates.into_iter().collect();
        orphaned.sort();
        orphaned
    }

    /// Names of all currently active groups, sorted.
    pub fn list_active(&self) -> Vec<String> {
        let state = self.read();
        let mut active: Vec<String> = state
            .groups
            .iter()
            .filter(|(_, e)| e.active)
            .map(|(n, _)| n.clone())
            .collect();
        active.sort();
        active
    }

    /// Snapshot of one group.
    pub fn get(&self, name: &str) -> Option<ToolGroup> {
        let state = self.read();
        state.groups.get(name).map(|entry| {
            let mut tools: Vec<String> = entry.tools.iter().cloned().collect();
            tools.sort();
            ToolGroup {
                name: name.to_string(),
                description: entry.description.clone(),
                active: entry.active,
                tools,
            }
        })
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, GroupState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, GroupState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}
