//! Access grants from the compute host's managed identity to storage.
//!
//! The host reaches its storage dependency with identity-based credentials;
//! no account key or connection string is ever provisioned. Each grant's
//! remote name is an idempotency key derived from (scope, principal, role),
//! so re-resolving against an already-granted role yields the same name and
//! the control plane treats the second PUT as a no-op.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for grant idempotency keys.
const GRANT_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2b8e_4a7d_4c35_9e21_b0d4_53a8_77f1);

// ---------------------------------------------------------------------------
// DataRole
// ---------------------------------------------------------------------------

/// Data-plane roles the host needs on its storage account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataRole {
    BlobDataContributor,
    QueueDataContributor,
    TableDataContributor,
}

/// Roles granted on every convergence.
pub const REQUIRED_ROLES: [DataRole; 3] = [
    DataRole::BlobDataContributor,
    DataRole::QueueDataContributor,
    DataRole::TableDataContributor,
];

impl DataRole {
    /// Built-in role definition GUID.
    pub fn definition_guid(&self) -> &'static str {
        match self {
            DataRole::BlobDataContributor => "ba92f5b4-2d11-453d-a403-e96b0029c9fe",
            DataRole::QueueDataContributor => "974c5e8b-45b9-4653-ba55-5f855dd0fb88",
            DataRole::TableDataContributor => "0a9a7e1f-b9d0-4cc4-a60d-0319b160aaa3",
        }
    }

    /// Short purpose label, used for node ids and logs.
    pub fn purpose(&self) -> &'static str {
        match self {
            DataRole::BlobDataContributor => "blob",
            DataRole::QueueDataContributor => "queue",
            DataRole::TableDataContributor => "table",
        }
    }

    pub fn definition_id(&self, subscription_id: &str) -> String {
        format!(
            "/subscriptions/{}/providers/Microsoft.Authorization/roleDefinitions/{}",
            subscription_id,
            self.definition_guid()
        )
    }
}

impl fmt::Display for DataRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-data-contributor", self.purpose())
    }
}

// ---------------------------------------------------------------------------
// AccessGrant
// ---------------------------------------------------------------------------

/// Materialized identity of the compute host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    pub principal_id: String,
}

/// One (principal, scope, role) binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
    pub principal_id: String,
    pub scope: String,
    pub role: DataRole,
    pub key: Uuid,
}

impl AccessGrant {
    /// ARM id of the role assignment this grant materializes as.
    pub fn assignment_id(&self) -> String {
        format!(
            "{}/providers/Microsoft.Authorization/roleAssignments/{}",
            self.scope, self.key
        )
    }
}

/// Deterministic idempotency key for a grant.
pub fn grant_key(scope: &str, principal_id: &str, role: DataRole) -> Uuid {
    let name = format!("{}|{}|{}", scope, principal_id, role.definition_guid());
    Uuid::new_v5(&GRANT_NAMESPACE, name.as_bytes())
}

pub fn resolve_grant(identity: &HostIdentity, scope: &str, role: DataRole) -> AccessGrant {
    AccessGrant {
        principal_id: identity.principal_id.clone(),
        scope: scope.to_string(),
        role,
        key: grant_key(scope, &identity.principal_id, role),
    }
}

/// Resolve one grant per requested role, dropping repeated roles.
pub fn resolve_grants(identity: &HostIdentity, scope: &str, roles: &[DataRole]) -> Vec<AccessGrant> {
    let mut set = GrantSet::new();
    for role in roles {
        set.insert(resolve_grant(identity, scope, *role));
    }
    set.into_grants()
}

// ---------------------------------------------------------------------------
// GrantSet
// ---------------------------------------------------------------------------

/// Grants keyed by (principal, role). Never holds two grants for the same pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantSet {
    grants: BTreeMap<(String, DataRole), AccessGrant>,
}

impl GrantSet {
    pub fn new() -> Self {
        GrantSet {
            grants: BTreeMap::new(),
        }
    }

    /// Insert a grant. Returns false when the (principal, role) pair was
    /// already present, in which case the set is unchanged.
    pub fn insert(&mut self, grant: AccessGrant) -> bool {
        let pair = (grant.principal_id.clone(), grant.role);
        if self.grants.contains_key(&pair) {
            return false;
        }
        self.grants.insert(pair, grant);
        true
    }

    pub fn extend<I: IntoIterator<Item = AccessGrant>>(&mut self, grants: I) -> usize {
        grants.into_iter().filter(|g| self.insert(g.clone())).count()
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }

    pub fn into_grants(self) -> Vec<AccessGrant> {
        self.grants.into_values().collect()
    }
}
