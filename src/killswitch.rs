//! Operational kill switches evaluated per request context.

use std::collections::HashSet;

/// Disables check-in ingestion for an organization.
pub const DISABLE_CHECK_IN: &str = "crons.organization.disable-check-in";

pub trait KillSwitches: Send + Sync {
    fn is_blocked(&self, switch: &str, organization_id: i32) -> bool;
}

/// Switch state sourced from configuration at startup.
pub struct StaticKillSwitches {
    blocked_organizations: HashSet<i32>,
}

impl StaticKillSwitches {
    pub fn new(blocked_organizations: impl IntoIterator<Item = i32>) -> Self {
        Self {
            blocked_organizations: blocked_organizations.into_iter().collect(),
        }
    }
}

impl KillSwitches for StaticKillSwitches {
    fn is_blocked(&self, switch: &str, organization_id: i32) -> bool {
        switch == DISABLE_CHECK_IN && self.blocked_organizations.contains(&organization_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_only_listed_organizations() {
        let switches = StaticKillSwitches::new([42]);
        assert!(switches.is_blocked(DISABLE_CHECK_IN, 42));
        assert!(!switches.is_blocked(DISABLE_CHECK_IN, 7));
        assert!(!switches.is_blocked("crons.some-other-switch", 42));
    }
}
