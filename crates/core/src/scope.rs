use serde::{Deserialize, Serialize};

/// Which delta events a dashboard view cares about: one organization,
/// optionally narrowed to a single repository.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub organization_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_id: Option<String>,
}

impl Scope {
    /// Org-wide scope.
    pub fn org(organization_id: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            repository_id: None,
        }
    }

    /// Scope narrowed to one repository.
    pub fn repo(organization_id: impl Into<String>, repository_id: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            repository_id: Some(repository_id.into()),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.organization_id.is_empty()
    }

    /// Does a subscription with this scope accept an event published under
    /// `event`?
    ///
    /// Org-wide subscriptions see everything in the org. Repo-scoped
    /// subscriptions see their repo's events plus org-wide events, and never
    /// another repo's.
    pub fn accepts(&self, event: &Scope) -> bool {
        if self.organization_id != event.organization_id {
            return false;
        }
        match (&self.repository_id, &event.repository_id) {
            (Some(sub), Some(ev)) => sub == ev,
            _ => true,
        }
    }
}
