//! Permission check gating who may start external commands

use crate::endpoint::OwnerId;
use std::collections::HashSet;

/// Host capability check consulted before anything else
pub trait SecurityPolicy: Send + Sync {
    fn may_start_external(&self, owner: OwnerId) -> bool;
}

/// Lets every caller through
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl SecurityPolicy for AllowAll {
    fn may_start_external(&self, _owner: OwnerId) -> bool {
        true
    }
}

/// Refuses every caller
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

impl SecurityPolicy for DenyAll {
    fn may_start_external(&self, _owner: OwnerId) -> bool {
        false
    }
}

/// Only listed owners may start commands
#[derive(Debug, Clone, Default)]
pub struct OwnerAllowList {
    owners: HashSet<OwnerId>,
}

impl OwnerAllowList {
    pub fn new(owners: impl IntoIterator<Item = OwnerId>) -> Self {
        Self {
            owners: owners.into_iter().collect(),
        }
    }
}

impl SecurityPolicy for OwnerAllowList {
    fn may_start_external(&self, owner: OwnerId) -> bool {
        self.owners.contains(&owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_policies() {
        assert!(AllowAll.may_start_external(OwnerId(1)));
        assert!(!DenyAll.may_start_external(OwnerId(1)));
    }

    #[test]
    fn allow_list_checks_membership() {
        let policy = OwnerAllowList::new([OwnerId(7)]);
        assert!(policy.may_start_external(OwnerId(7)));
        assert!(!policy.may_start_external(OwnerId(8)));
    }
}
