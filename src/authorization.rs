//! Row and Column Authorization
//!
//! Derives, from the role-view grants that apply to a user, which values each
//! authorization variable may take (row authorization) and which columns are
//! hidden (column authorization). Restrictions found across grants are unioned.

use crate::model::{AuthParamValue, RoleViewGrant, SqlVariable};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

/// Permission levels on a project resource, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    Hidden,
    Read,
    Write,
    Delete,
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionLevel::Hidden => write!(f, "hidden"),
            PermissionLevel::Read => write!(f, "read"),
            PermissionLevel::Write => write!(f, "write"),
            PermissionLevel::Delete => write!(f, "delete"),
        }
    }
}

impl FromStr for PermissionLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hidden" => Ok(PermissionLevel::Hidden),
            "read" => Ok(PermissionLevel::Read),
            "write" => Ok(PermissionLevel::Write),
            "delete" => Ok(PermissionLevel::Delete),
            _ => Err(format!(
                "Unknown permission '{s}'. Valid levels: hidden, read, write, delete"
            )),
        }
    }
}

/// Project as seen by the requesting user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectDetail {
    pub id: u64,
    pub name: String,
    pub owner_id: u64,
}

/// The requesting user's permissions inside one project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectPermission {
    pub view_permission: PermissionLevel,
    pub source_permission: PermissionLevel,
}

impl ProjectPermission {
    /// May run ad hoc SQL from the view editor.
    pub fn can_execute_sql(&self) -> bool {
        self.source_permission > PermissionLevel::Hidden
            && self.view_permission >= PermissionLevel::Write
    }
}

// ── Row Authorization ───────────────────────────────────────────────────────

/// Declared variables restricted by the grants, with the allowed values of
/// every restricting grant attached.
///
/// Values for the same variable are unioned across grants (first-seen order,
/// duplicates dropped). Grants whose row authorization cannot be decoded are
/// skipped.
pub fn resolve_row_auth(grants: &[RoleViewGrant], declared: &[SqlVariable]) -> Vec<SqlVariable> {
    if grants.is_empty() || declared.is_empty() {
        return Vec::new();
    }
    let by_name: HashMap<&str, &SqlVariable> =
        declared.iter().map(|v| (v.name.trim(), v)).collect();

    let mut order: Vec<String> = Vec::new();
    let mut merged: HashMap<String, SqlVariable> = HashMap::new();

    for grant in grants {
        for entry in row_auth_entries(grant) {
            let Some(var) = by_name.get(entry.name.trim()) else {
                continue;
            };
            let slot = merged.entry(var.name.trim().to_string()).or_insert_with(|| {
                order.push(var.name.trim().to_string());
                SqlVariable {
                    name: var.name.trim().to_string(),
                    kind: var.kind,
                    default_values: Vec::new(),
                }
            });
            for value in entry.values {
                if !slot.default_values.contains(&value) {
                    slot.default_values.push(value);
                }
            }
        }
    }

    order
        .into_iter()
        .filter_map(|name| merged.remove(&name))
        .collect()
}

/// Decoded `{name, values[]}` entries of one grant.
pub fn row_auth_entries(grant: &RoleViewGrant) -> Vec<AuthParamValue> {
    let Some(raw) = grant.row_auth.as_deref().filter(|s| !s.trim().is_empty()) else {
        return Vec::new();
    };
    match serde_json::from_str::<Vec<AuthParamValue>>(raw) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(
                role_id = grant.role_id,
                view_id = grant.view_id,
                error = %e,
                "skipping undecodable row authorization"
            );
            Vec::new()
        }
    }
}

// ── Column Authorization ────────────────────────────────────────────────────

/// Columns hidden from the user: the union over all grants.
///
/// `None` when no grant applies.
pub fn resolve_column_auth(grants: &[RoleViewGrant]) -> Option<BTreeSet<String>> {
    if grants.is_empty() {
        return None;
    }
    let columns = grants
        .iter()
        .filter_map(|g| g.column_auth.as_deref())
        .flat_map(|list| list.split(','))
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect();
    Some(columns)
}
