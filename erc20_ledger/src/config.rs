use std::path::Path;
use std::str::FromStr;

use fvm_shared::address::{Address, Error as AddressError};
use fvm_shared::econ::TokenAmount;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::denomination::{parse_units, DenominationError};
use crate::ledger::TokenMetadata;
use crate::token::TokenError;
use crate::token::state::DEFAULT_HAMT_BIT_WIDTH;

/// Largest number of display decimals accepted, the most a 256 bit amount can make use of
pub const MAX_DECIMALS: u8 = 77;

pub const DEFAULT_DECIMALS: u8 = 18;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
    #[error("decimals must be at most 77, got {0}")]
    Decimals(u8),
    #[error("hamt bit width must be between 1 and 8, got {0}")]
    HamtBitWidth(u32),
    #[error("invalid initial supply {supply:?}: {source}")]
    InitialSupply { supply: String, source: DenominationError },
    #[error("invalid owner address {owner:?}: {source}")]
    Owner { owner: String, source: AddressError },
    #[error("failed to create genesis state: {0}")]
    Genesis(#[from] TokenError),
}

/// Genesis configuration of a token ledger
///
/// ```json
/// {
///     "name": "Topcoder Coin",
///     "symbol": "TCC",
///     "initial_supply": "1000000000000000000000000000",
///     "owner": "f0100"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenConfig {
    pub name: String,
    pub symbol: String,
    #[serde(default = "default_decimals")]
    pub decimals: u8,
    /// Base units credited to the owner at genesis, as a decimal string so that JSON number
    /// precision does not truncate it
    pub initial_supply: String,
    /// Address of the account receiving the whole initial supply
    pub owner: String,
    #[serde(default = "default_hamt_bit_width")]
    pub hamt_bit_width: u32,
}

fn default_decimals() -> u8 {
    DEFAULT_DECIMALS
}

fn default_hamt_bit_width() -> u32 {
    DEFAULT_HAMT_BIT_WIDTH
}

impl TokenConfig {
    /// Parses and validates a config from JSON
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: TokenConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::EmptyField("name"));
        }
        if self.symbol.is_empty() {
            return Err(ConfigError::EmptyField("symbol"));
        }
        if self.decimals > MAX_DECIMALS {
            return Err(ConfigError::Decimals(self.decimals));
        }
        if !(1..=8).contains(&self.hamt_bit_width) {
            return Err(ConfigError::HamtBitWidth(self.hamt_bit_width));
        }
        self.initial_supply()?;
        self.owner_address()?;
        Ok(())
    }

    pub fn owner_address(&self) -> Result<Address, ConfigError> {
        Address::from_str(&self.owner)
            .map_err(|source| ConfigError::Owner { owner: self.owner.clone(), source })
    }

    pub fn initial_supply(&self) -> Result<TokenAmount, ConfigError> {
        parse_units(&self.initial_supply, 0).map_err(|source| ConfigError::InitialSupply {
            supply: self.initial_supply.clone(),
            source,
        })
    }

    pub fn metadata(&self) -> TokenMetadata {
        TokenMetadata {
            name: self.name.clone(),
            symbol: self.symbol.clone(),
            decimals: self.decimals,
        }
    }
}

#[cfg(test)]
mod test {
    use fvm_shared::address::Address;
    use fvm_shared::econ::TokenAmount;

    use super::{ConfigError, TokenConfig};

    const CONFIG: &str = r#"{
        "name": "Topcoder Coin",
        "symbol": "TCC",
        "initial_supply": "1000000000000000000000000000",
        "owner": "f0100"
    }"#;

    #[test]
    fn it_parses_with_defaults() {
        let config = TokenConfig::from_json(CONFIG).unwrap();
        assert_eq!(config.name, "Topcoder Coin");
        assert_eq!(config.decimals, 18);
        assert_eq!(config.hamt_bit_width, 3);
        assert_eq!(config.owner_address().unwrap(), Address::new_id(100));
        assert_eq!(
            config.initial_supply().unwrap(),
            TokenAmount::from_whole(1_000_000_000)
        );

        // serializing writes the defaults out explicitly
        let reparsed = TokenConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(reparsed, config);
    }

    #[test]
    fn it_rejects_unknown_fields() {
        let json = CONFIG.replace("\"owner\"", "\"mintable\": true, \"owner\"");
        let err = TokenConfig::from_json(&json).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)), "{err}");
    }

    #[test]
    fn it_validates_fields() {
        let config = TokenConfig::from_json(CONFIG).unwrap();

        let invalid = TokenConfig { symbol: String::new(), ..config.clone() };
        assert!(matches!(invalid.validate().unwrap_err(), ConfigError::EmptyField("symbol")));

        let invalid = TokenConfig { decimals: 78, ..config.clone() };
        assert!(matches!(invalid.validate().unwrap_err(), ConfigError::Decimals(78)));

        let invalid = TokenConfig { hamt_bit_width: 0, ..config.clone() };
        assert!(matches!(invalid.validate().unwrap_err(), ConfigError::HamtBitWidth(0)));

        let invalid = TokenConfig { initial_supply: "-5".into(), ..config.clone() };
        assert!(matches!(invalid.validate().unwrap_err(), ConfigError::InitialSupply { .. }));

        let invalid = TokenConfig { initial_supply: "1.5".into(), ..config.clone() };
        assert!(matches!(invalid.validate().unwrap_err(), ConfigError::InitialSupply { .. }));

        let invalid = TokenConfig { owner: "alice".into(), ..config };
        assert!(matches!(invalid.validate().unwrap_err(), ConfigError::Owner { .. }));
    }
}
