//! An ERC-20 style fungible token ledger.
//!
//! Balances and allowances live in Hamts on a content-addressed blockstore. The [`token::Token`]
//! handle enforces the transfer and allowance rules over a single state tree, and
//! [`ledger::Ledger`] shares one such tree between threads, applying writes one at a time.
//!
//! Amounts are always integers of the base unit. [`denomination`] converts them to and from the
//! decimal units shown to users.

pub mod config;
pub mod denomination;
pub mod ledger;
pub mod token;

pub use config::{ConfigError, TokenConfig};
pub use ledger::{Ledger, MemoryLedger, TokenMetadata};
pub use token::{ErrorKind, Token, TokenError};
