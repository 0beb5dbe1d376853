//! Conversion between base units and the decimal display units shown to users
//!
//! The ledger only ever stores base units. These helpers are pure and never touch ledger state.

use std::fmt;
use std::str::FromStr;

use fvm_shared::bigint::BigInt;
use fvm_shared::econ::TokenAmount;
use num_traits::Signed;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DenominationError {
    #[error("empty amount")]
    Empty,
    #[error("malformed amount {0:?}, expected unsigned decimal digits")]
    Malformed(String),
    #[error("amount {text:?} has more than {max_decimals} fractional digits")]
    TooPrecise { text: String, max_decimals: u32 },
    #[error("unknown unit {0:?}")]
    UnknownUnit(String),
}

type Result<T> = std::result::Result<T, DenominationError>;

/// Named denominations, each a power of ten of the base unit
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Unit {
    Wei,
    Kwei,
    Mwei,
    Gwei,
    Szabo,
    Finney,
    Ether,
}

impl Unit {
    pub const ALL: [Unit; 7] =
        [Unit::Wei, Unit::Kwei, Unit::Mwei, Unit::Gwei, Unit::Szabo, Unit::Finney, Unit::Ether];

    /// Power of ten of base units making up one of this unit
    pub fn exponent(self) -> u32 {
        match self {
            Unit::Wei => 0,
            Unit::Kwei => 3,
            Unit::Mwei => 6,
            Unit::Gwei => 9,
            Unit::Szabo => 12,
            Unit::Finney => 15,
            Unit::Ether => 18,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Unit::Wei => "wei",
            Unit::Kwei => "kwei",
            Unit::Mwei => "mwei",
            Unit::Gwei => "gwei",
            Unit::Szabo => "szabo",
            Unit::Finney => "finney",
            Unit::Ether => "ether",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Unit {
    type Err = DenominationError;

    fn from_str(s: &str) -> Result<Self> {
        Unit::ALL
            .into_iter()
            .find(|unit| unit.name() == s)
            .ok_or_else(|| DenominationError::UnknownUnit(s.to_owned()))
    }
}

/// Renders a base unit amount in the given unit
pub fn to_display(amount: &TokenAmount, unit: Unit) -> String {
    format_units(amount, unit.exponent())
}

/// Parses an amount written in the given unit back into base units
pub fn from_display(text: &str, unit: Unit) -> Result<TokenAmount> {
    parse_units(text, unit.exponent())
}

/// Renders an amount as an exact decimal with `decimals` fractional places
///
/// Trailing fractional zeros are dropped, whole amounts have no decimal point.
pub fn format_units(amount: &TokenAmount, decimals: u32) -> String {
    let atto = amount.atto();
    let digits = atto.abs().to_string();
    let sign = if atto.is_negative() { "-" } else { "" };
    let decimals = decimals as usize;
    if decimals == 0 {
        return format!("{sign}{digits}");
    }

    // pad so there is always at least one integer digit
    let digits = format!("{digits:0>width$}", width = decimals + 1);
    let (integer, fraction) = digits.split_at(digits.len() - decimals);
    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        format!("{sign}{integer}")
    } else {
        format!("{sign}{integer}.{fraction}")
    }
}

/// Parses an unsigned decimal with at most `decimals` fractional places into base units
pub fn parse_units(text: &str, decimals: u32) -> Result<TokenAmount> {
    if text.is_empty() {
        return Err(DenominationError::Empty);
    }

    let (integer, fraction) = match text.split_once('.') {
        Some((integer, fraction)) => (integer, fraction),
        None => (text, ""),
    };
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if integer.is_empty()
        || (text.contains('.') && fraction.is_empty())
        || !all_digits(integer)
        || !all_digits(fraction)
    {
        return Err(DenominationError::Malformed(text.to_owned()));
    }
    if fraction.len() > decimals as usize {
        return Err(DenominationError::TooPrecise { text: text.to_owned(), max_decimals: decimals });
    }

    let digits = format!("{integer}{fraction:0<width$}", width = decimals as usize);
    let atto =
        BigInt::from_str(&digits).map_err(|_| DenominationError::Malformed(text.to_owned()))?;
    Ok(TokenAmount::from_atto(atto))
}
