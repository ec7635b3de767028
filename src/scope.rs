use serde::{Deserialize, Serialize};
use std::fmt;

/// Tenant identifier: the unit of usage tracking and throttling.
///
/// Scopes are value types and are used as map keys everywhere; `Ord` exists
/// so that tie-breaking between equally-loaded scopes is deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Scope {
    pub tenant_id: u64,
}

impl Scope {
    pub fn new(tenant_id: u64) -> Self {
        Self { tenant_id }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tenant-{}", self.tenant_id)
    }
}
