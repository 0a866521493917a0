use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::ledger::{Amount, TokenMetadata, MAX_DECIMALS, TOKEN_DECIMALS, TOKEN_SCALE};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("token name and symbol must be non-empty")]
    EmptyTokenMetadata,
    #[error("token decimals must be at most 38")]
    TooManyDecimals,
    #[error("reward per referral must be greater than zero")]
    ZeroReward,
    #[error("initial pool {pool} exceeds token supply {supply}")]
    PoolExceedsSupply { pool: Amount, supply: Amount },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TokenConfig {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    /// Minimal units minted to the deployer at genesis.
    pub initial_supply: Amount,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            name: "RiferoToken".to_string(),
            symbol: "RFT".to_string(),
            decimals: TOKEN_DECIMALS,
            initial_supply: 1_000_000 * TOKEN_SCALE,
        }
    }
}

impl TokenConfig {
    pub fn metadata(&self) -> TokenMetadata {
        TokenMetadata {
            name: self.name.clone(),
            symbol: self.symbol.clone(),
            decimals: self.decimals,
        }
    }
}

/// Deployment parameters for the token and the referral platform.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlatformConfig {
    pub token: TokenConfig,
    pub reward_per_referral: Amount,
    /// Moved from the deployer into the platform account at genesis.
    pub initial_pool: Amount,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            token: TokenConfig::default(),
            reward_per_referral: 10 * TOKEN_SCALE,
            initial_pool: 100 * TOKEN_SCALE,
        }
    }
}

impl PlatformConfig {
    pub fn from_json(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_slice(bytes)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes = fs::read(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&bytes)
    }

    /// Reads `path` when given, otherwise falls back to the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token.name.trim().is_empty() || self.token.symbol.trim().is_empty() {
            return Err(ConfigError::EmptyTokenMetadata);
        }
        if self.token.decimals > MAX_DECIMALS {
            return Err(ConfigError::TooManyDecimals);
        }
        if self.reward_per_referral == 0 {
            return Err(ConfigError::ZeroReward);
        }
        if self.initial_pool > self.token.initial_supply {
            return Err(ConfigError::PoolExceedsSupply {
                pool: self.initial_pool,
                supply: self.token.initial_supply,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original_deployment() {
        let config = PlatformConfig::default();
        config.validate().unwrap();
        assert_eq!(config.token.symbol, "RFT");
        assert_eq!(config.reward_per_referral, 10 * TOKEN_SCALE);
        assert_eq!(config.initial_pool, 100 * TOKEN_SCALE);
        assert_eq!(config.token.initial_supply, 1_000_000 * TOKEN_SCALE);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = PlatformConfig::from_json(br#"{"reward_per_referral": 5}"#).unwrap();
        assert_eq!(config.reward_per_referral, 5);
        assert_eq!(config.token, TokenConfig::default());
    }

    #[test]
    fn validation_rejects_bad_parameters() {
        assert!(matches!(
            PlatformConfig::from_json(br#"{"reward_per_referral": 0}"#),
            Err(ConfigError::ZeroReward)
        ));
        assert!(matches!(
            PlatformConfig::from_json(br#"{"initial_pool": 10, "token": {"initial_supply": 5}}"#),
            Err(ConfigError::PoolExceedsSupply { pool: 10, supply: 5 })
        ));
        assert!(matches!(
            PlatformConfig::from_json(br#"{"token": {"symbol": " "}}"#),
            Err(ConfigError::EmptyTokenMetadata)
        ));
        assert!(matches!(
            PlatformConfig::from_json(b"not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
