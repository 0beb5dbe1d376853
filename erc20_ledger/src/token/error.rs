use fvm_shared::econ::TokenAmount;
use ledger_utils::AccountError;
use thiserror::Error;

use crate::token::state::StateError as TokenStateError;
use crate::token::state::StateInvariantError;

#[derive(Error, Debug)]
pub enum TokenError {
    #[error(transparent)]
    TokenState(#[from] TokenStateError),
    #[error("{name} must not be negative, got {amount:?}")]
    InvalidNegative { name: &'static str, amount: TokenAmount },
    #[error("account error: {0}")]
    Account(#[from] AccountError),
    #[error("ledger invariant violated: {0}")]
    StateInvariant(#[from] StateInvariantError),
}

/// The failure classes a caller can act upon
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The debited account holds less than the requested amount
    InsufficientBalance,
    /// The spender was approved for less than the requested amount
    InsufficientAllowance,
    /// The call itself was malformed: a negative amount or an account that cannot exist
    InvalidArgument,
    /// The stored state is inconsistent or missing
    IllegalState,
    /// Encoding or decoding of stored data failed
    Serialization,
}

impl TokenError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::from(self)
    }
}

impl From<&TokenError> for ErrorKind {
    fn from(error: &TokenError) -> Self {
        match error {
            TokenError::InvalidNegative { .. } => ErrorKind::InvalidArgument,
            TokenError::Account(_) => ErrorKind::InvalidArgument,
            TokenError::StateInvariant(_) => ErrorKind::IllegalState,
            TokenError::TokenState(state_error) => match state_error {
                TokenStateError::IpldHamt(_) | TokenStateError::Serialization(_) => {
                    ErrorKind::Serialization
                }
                TokenStateError::InvalidBitWidth(_) => ErrorKind::InvalidArgument,
                TokenStateError::NegativeAllowance { .. }
                | TokenStateError::NegativeTotalSupply { .. }
                | TokenStateError::MissingState(_) => ErrorKind::IllegalState,
                TokenStateError::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
                TokenStateError::InsufficientAllowance { .. } => ErrorKind::InsufficientAllowance,
            },
        }
    }
}
