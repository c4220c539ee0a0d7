use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use dlsgate_core::AppError;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::access_request::RequestId;

/// Document field the DLS filter matches against.
pub const DLS_USER_FIELD: &str = "user";

/// Only action granted by this system.
pub const READ_ACTION: &str = "read";

/// How grants are folded into the single shared role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleLayout {
    /// One index entry per index with an active grant; users are OR-ed.
    Merged,
    /// One filter for the whole role; every write replaces the previous one.
    Shared,
}

impl RuleLayout {
    /// Returns a stable configuration value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Merged => "merged",
            Self::Shared => "shared",
        }
    }
}

impl FromStr for RuleLayout {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "merged" => Ok(Self::Merged),
            "shared" => Ok(Self::Shared),
            other => Err(AppError::Validation(format!(
                "rule layout must be either 'merged' or 'shared', got '{other}'"
            ))),
        }
    }
}

/// Role body accepted by the authorization service's role upsert endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDocument {
    /// Always empty: the role grants no cluster actions.
    pub cluster_permissions: Vec<String>,
    /// One entry per index carrying a DLS filter.
    pub index_permissions: Vec<IndexPermission>,
    /// Always empty.
    pub tenant_permissions: Vec<String>,
}

/// One index-scoped permission inside a [`RoleDocument`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexPermission {
    /// Index patterns the entry applies to.
    pub index_patterns: Vec<String>,
    /// JSON-encoded query restricting readable documents.
    pub dls: String,
    /// Field-level security, unused.
    pub fls: Vec<String>,
    /// Masked fields, unused.
    pub masked_fields: Vec<String>,
    /// Allowed actions, read only.
    pub allowed_actions: Vec<String>,
}

impl IndexPermission {
    fn read_only(index: &str, dls: String) -> Self {
        Self {
            index_patterns: vec![index.to_owned()],
            dls,
            fls: Vec::new(),
            masked_fields: Vec::new(),
            allowed_actions: vec![READ_ACTION.to_owned()],
        }
    }
}

/// Renders the DLS query admitting exactly `usernames`.
///
/// An empty set renders a query that matches no document.
#[must_use]
pub fn dls_filter_for<'a>(usernames: impl IntoIterator<Item = &'a str>) -> String {
    let usernames: Vec<&str> = usernames.into_iter().collect();
    let query = match usernames.as_slice() {
        [] => json!({ "bool": { "must_not": { "match_all": {} } } }),
        [username] => json!({ "term": { DLS_USER_FIELD: username } }),
        many => json!({ "terms": { DLS_USER_FIELD: many } }),
    };

    query.to_string()
}

/// In-memory picture of what the shared role currently grants.
///
/// Each admitted (index, user) pair remembers the requests holding it, so two
/// active requests for the same pair keep the user admitted until both end.
/// Every mutation reports whether the book changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleBook {
    layout: RuleLayout,
    entries: BTreeMap<String, BTreeMap<String, BTreeSet<RequestId>>>,
}

impl RuleBook {
    /// Creates an empty rule book.
    #[must_use]
    pub fn new(layout: RuleLayout) -> Self {
        Self {
            layout,
            entries: BTreeMap::new(),
        }
    }

    /// Returns the configured layout.
    #[must_use]
    pub fn layout(&self) -> RuleLayout {
        self.layout
    }

    /// Admits `username` to `index` on behalf of `request_id`.
    pub fn grant(&mut self, request_id: RequestId, index: &str, username: &str) -> bool {
        let before = self.entries.clone();
        if self.layout == RuleLayout::Shared {
            self.entries.clear();
        }
        self.entries
            .entry(index.to_owned())
            .or_default()
            .entry(username.to_owned())
            .or_default()
            .insert(request_id);

        before != self.entries
    }

    /// Withdraws the hold of `request_id` on (`index`, `username`).
    ///
    /// With the merged layout the user stays admitted while another request
    /// still holds the pair. With the shared layout the whole role collapses
    /// to a never-matching filter on `index`, whoever else was admitted.
    pub fn clear(&mut self, request_id: RequestId, index: &str, username: &str) -> bool {
        let before = self.entries.clone();
        match self.layout {
            RuleLayout::Shared => {
                self.entries.clear();
                self.entries.insert(index.to_owned(), BTreeMap::new());
            }
            RuleLayout::Merged => {
                if let Some(users) = self.entries.get_mut(index) {
                    if let Some(holders) = users.get_mut(username) {
                        holders.remove(&request_id);
                        if holders.is_empty() {
                            users.remove(username);
                        }
                    }
                    if users.is_empty() {
                        self.entries.remove(index);
                    }
                }
            }
        }

        before != self.entries
    }

    /// Returns the usernames currently admitted to `index`.
    #[must_use]
    pub fn users_for(&self, index: &str) -> Vec<&str> {
        self.entries
            .get(index)
            .map(|users| users.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Returns the requests holding (`index`, `username`).
    #[must_use]
    pub fn holders_of(&self, index: &str, username: &str) -> Vec<RequestId> {
        self.entries
            .get(index)
            .and_then(|users| users.get(username))
            .map(|holders| holders.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Renders the role document for the upsert call.
    #[must_use]
    pub fn render(&self) -> RoleDocument {
        RoleDocument {
            cluster_permissions: Vec::new(),
            index_permissions: self
                .entries
                .iter()
                .map(|(index, users)| {
                    IndexPermission::read_only(index, dls_filter_for(users.keys().map(String::as_str)))
                })
                .collect(),
            tenant_permissions: Vec::new(),
        }
    }
}
