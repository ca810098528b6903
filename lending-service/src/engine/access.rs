//! Per-module access-control lists.
//!
//! Every engine component owns one [`AccessControl`]. A grant is keyed by
//! (module, grantee); privileged operations call
//! [`AccessControl::require_permitted`] before touching any state.
//!
//! Administration is chained: the deploying identity holds the first grant,
//! and any identity with an active grant may grant or revoke on that module.
//! A revoke that would leave no active grant is refused, so a module can
//! never become unadministrable.

use crate::engine::error::LendingError;
use crate::models::Grant;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Identifies the component a grant applies to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ModuleId {
    /// Settlement token ledger.
    Asset,
    /// Interest accrual engine.
    Pile,
    /// Loan origination registry.
    Origination,
    /// A fund manager, by symbol.
    Fund(String),
}

impl std::fmt::Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleId::Asset => write!(f, "asset"),
            ModuleId::Pile => write!(f, "pile"),
            ModuleId::Origination => write!(f, "origination"),
            ModuleId::Fund(symbol) => write!(f, "fund:{}", symbol),
        }
    }
}

impl FromStr for ModuleId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asset" => Ok(ModuleId::Asset),
            "pile" => Ok(ModuleId::Pile),
            "origination" => Ok(ModuleId::Origination),
            _ => match s.strip_prefix("fund:") {
                Some(symbol) if !symbol.is_empty() => Ok(ModuleId::Fund(symbol.to_string())),
                _ => Err(format!("Invalid module: {}", s)),
            },
        }
    }
}

impl From<ModuleId> for String {
    fn from(module: ModuleId) -> Self {
        module.to_string()
    }
}

impl TryFrom<String> for ModuleId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Access-control list of a single module.
#[derive(Debug, Clone)]
pub struct AccessControl {
    module: ModuleId,
    grants: BTreeMap<String, bool>,
}

impl AccessControl {
    /// Create the list with `deployer` as the bootstrap administrator.
    pub fn new(module: ModuleId, deployer: &str) -> Self {
        let mut grants = BTreeMap::new();
        grants.insert(deployer.to_string(), true);
        Self { module, grants }
    }

    /// Rebuild from persisted rows; rows for other modules are ignored.
    pub fn restore<'a>(module: ModuleId, rows: impl IntoIterator<Item = &'a Grant>) -> Self {
        let name = module.to_string();
        let grants = rows
            .into_iter()
            .filter(|g| g.module == name)
            .map(|g| (g.grantee.clone(), g.active))
            .collect();
        Self { module, grants }
    }

    pub fn module(&self) -> &ModuleId {
        &self.module
    }

    pub fn is_permitted(&self, identity: &str) -> bool {
        self.grants.get(identity).copied().unwrap_or(false)
    }

    /// Fail with `Unauthorized` unless `caller` holds an active grant.
    pub fn require_permitted(&self, caller: &str) -> Result<(), LendingError> {
        if self.is_permitted(caller) {
            Ok(())
        } else {
            Err(LendingError::Unauthorized {
                module: self.module.clone(),
                caller: caller.to_string(),
            })
        }
    }

    /// Activate `grantee`. Returns whether anything changed.
    pub fn grant(&mut self, caller: &str, grantee: &str) -> Result<bool, LendingError> {
        self.require_permitted(caller)?;
        if self.is_permitted(grantee) {
            return Ok(false);
        }
        self.grants.insert(grantee.to_string(), true);
        Ok(true)
    }

    /// Deactivate `grantee`. Returns whether anything changed.
    pub fn revoke(&mut self, caller: &str, grantee: &str) -> Result<bool, LendingError> {
        self.require_permitted(caller)?;
        if !self.is_permitted(grantee) {
            return Ok(false);
        }
        if self.active_count() == 1 {
            return Err(LendingError::WouldOrphanModule {
                module: self.module.clone(),
                grantee: grantee.to_string(),
            });
        }
        self.grants.insert(grantee.to_string(), false);
        Ok(true)
    }

    pub fn active_count(&self) -> usize {
        self.grants.values().filter(|active| **active).count()
    }

    /// Identities currently holding an active grant.
    pub fn administrators(&self) -> impl Iterator<Item = &str> + '_ {
        self.grants
            .iter()
            .filter(|(_, active)| **active)
            .map(|(id, _)| id.as_str())
    }

    /// Persistable row for `grantee`, if it was ever granted.
    pub fn record(&self, grantee: &str) -> Option<Grant> {
        self.grants.get(grantee).map(|active| Grant {
            module: self.module.to_string(),
            grantee: grantee.to_string(),
            active: *active,
        })
    }

    pub fn records(&self) -> Vec<Grant> {
        self.grants
            .iter()
            .map(|(grantee, active)| Grant {
                module: self.module.to_string(),
                grantee: grantee.clone(),
                active: *active,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_ids_round_trip_through_strings() {
        for module in [
            ModuleId::Asset,
            ModuleId::Pile,
            ModuleId::Origination,
            ModuleId::Fund("TST".to_string()),
        ] {
            assert_eq!(module.to_string().parse::<ModuleId>(), Ok(module));
        }
        assert!("fund:".parse::<ModuleId>().is_err());
        assert!("treasury".parse::<ModuleId>().is_err());
    }

    #[test]
    fn deployer_is_the_bootstrap_administrator() {
        let acl = AccessControl::new(ModuleId::Pile, "deployer");
        assert!(acl.is_permitted("deployer"));
        assert!(!acl.is_permitted("stranger"));
        assert_eq!(
            acl.require_permitted("stranger"),
            Err(LendingError::Unauthorized {
                module: ModuleId::Pile,
                caller: "stranger".to_string()
            })
        );
    }

    #[test]
    fn granted_identities_may_grant_further() {
        let mut acl = AccessControl::new(ModuleId::Origination, "deployer");
        assert_eq!(acl.grant("deployer", "fund:TST"), Ok(true));
        assert_eq!(acl.grant("fund:TST", "operator"), Ok(true));
        assert!(acl.is_permitted("operator"));
        assert_eq!(acl.grant("operator", "fund:TST"), Ok(false));
    }

    #[test]
    fn strangers_cannot_grant_or_revoke() {
        let mut acl = AccessControl::new(ModuleId::Origination, "deployer");
        assert!(matches!(
            acl.grant("stranger", "stranger"),
            Err(LendingError::Unauthorized { .. })
        ));
        assert!(matches!(
            acl.revoke("stranger", "deployer"),
            Err(LendingError::Unauthorized { .. })
        ));
        assert!(acl.is_permitted("deployer"));
    }

    #[test]
    fn revocation_is_immediate() {
        let mut acl = AccessControl::new(ModuleId::Origination, "deployer");
        acl.grant("deployer", "funder").unwrap();
        assert_eq!(acl.revoke("deployer", "funder"), Ok(true));
        assert!(!acl.is_permitted("funder"));
        assert_eq!(acl.revoke("deployer", "funder"), Ok(false));
        assert_eq!(acl.record("funder").map(|g| g.active), Some(false));
    }

    #[test]
    fn last_administrator_cannot_be_revoked() {
        let mut acl = AccessControl::new(ModuleId::Pile, "deployer");
        assert_eq!(
            acl.revoke("deployer", "deployer"),
            Err(LendingError::WouldOrphanModule {
                module: ModuleId::Pile,
                grantee: "deployer".to_string()
            })
        );

        acl.grant("deployer", "successor").unwrap();
        assert_eq!(acl.revoke("successor", "deployer"), Ok(true));
        assert_eq!(acl.administrators().collect::<Vec<_>>(), vec!["successor"]);
        assert!(matches!(
            acl.revoke("successor", "successor"),
            Err(LendingError::WouldOrphanModule { .. })
        ));
    }

    #[test]
    fn restore_keeps_only_rows_of_the_module() {
        let rows = vec![
            Grant {
                module: "pile".to_string(),
                grantee: "origination".to_string(),
                active: true,
            },
            Grant {
                module: "pile".to_string(),
                grantee: "old".to_string(),
                active: false,
            },
            Grant {
                module: "origination".to_string(),
                grantee: "fund:TST".to_string(),
                active: true,
            },
        ];
        let acl = AccessControl::restore(ModuleId::Pile, &rows);
        assert!(acl.is_permitted("origination"));
        assert!(!acl.is_permitted("old"));
        assert!(!acl.is_permitted("fund:TST"));
        assert_eq!(acl.records().len(), 2);
    }
}
