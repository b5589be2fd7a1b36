use std::{collections::BTreeMap, fs, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{AccountId, Amount};

/// Upper bound on `delegation_limit`; keeps every cascade cheap.
pub const MAX_DELEGATION_LIMIT: usize = 32;
/// Largest percentage precision whose base (`10^precision`) still fits a `u32`.
pub const MAX_PERCENTAGE_PRECISION: u32 = 9;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Constants fixed when a ledger is created.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LedgerConfig {
    /// Token decimal precision. Informational; amounts are always minimal units.
    pub decimals: u8,
    /// Delegation percentages are expressed in units of `10^-percentage_precision`.
    /// The default of 4 gives basis points.
    pub percentage_precision: u32,
    /// Maximum number of simultaneous delegatees per account.
    pub delegation_limit: usize,
    /// Allocations minted at index 0 when the ledger is built.
    pub genesis: BTreeMap<AccountId, Amount>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            decimals: 18,
            percentage_precision: 4,
            delegation_limit: 5,
            genesis: BTreeMap::new(),
        }
    }
}

impl LedgerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes = fs::read(path)?;
        let config: LedgerConfig = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    /// The value representing 100%.
    pub fn percentage_base(&self) -> u32 {
        10u32.pow(self.percentage_precision)
    }

    pub fn genesis_supply(&self) -> Option<Amount> {
        self.genesis
            .values()
            .try_fold(0u64, |acc, amount| acc.checked_add(*amount))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.percentage_precision == 0 || self.percentage_precision > MAX_PERCENTAGE_PRECISION {
            return Err(ConfigError::Invalid(format!(
                "percentage_precision must be in 1..={MAX_PERCENTAGE_PRECISION}, got {}",
                self.percentage_precision
            )));
        }
        if self.delegation_limit == 0 || self.delegation_limit > MAX_DELEGATION_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "delegation_limit must be in 1..={MAX_DELEGATION_LIMIT}, got {}",
                self.delegation_limit
            )));
        }
        if self.genesis_supply().is_none() {
            return Err(ConfigError::Invalid(
                "genesis allocations overflow total supply".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_basis_points() {
        let config = LedgerConfig::default();
        assert_eq!(config.percentage_base(), 10_000);
        assert_eq!(config.delegation_limit, 5);
        config.validate().unwrap();
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: LedgerConfig =
            serde_json::from_str(r#"{"delegation_limit": 3, "genesis": {"dev": 1000}}"#).unwrap();
        assert_eq!(config.delegation_limit, 3);
        assert_eq!(config.percentage_precision, 4);
        assert_eq!(config.genesis_supply(), Some(1_000));
    }

    #[test]
    fn rejects_out_of_range_constants() {
        let mut config = LedgerConfig {
            percentage_precision: 10,
            ..LedgerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        config.percentage_precision = 2;
        config.delegation_limit = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        config.delegation_limit = MAX_DELEGATION_LIMIT + 1;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_overflowing_genesis() {
        let mut config = LedgerConfig::default();
        config.genesis.insert("a".into(), u64::MAX);
        config.genesis.insert("b".into(), 1);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn load_reads_json_file() {
        let path = std::env::temp_dir().join(format!("fasset-config-{}.json", std::process::id()));
        fs::write(&path, br#"{"decimals": 6, "percentage_precision": 2}"#).unwrap();
        let config = LedgerConfig::load(&path).unwrap();
        fs::remove_file(&path).ok();
        assert_eq!(config.decimals, 6);
        assert_eq!(config.percentage_base(), 100);
    }
}
