use fvm_ipld_encoding::tuple::{Deserialize_tuple, Serialize_tuple};
use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;

/// A standard fungible token interface following ERC-20. This represents the surface a host
/// runtime maps incoming calls onto.
///
/// Mutating methods take the address of the caller explicitly. The host is responsible for
/// authenticating it.
pub trait Erc20Token {
    type TokenError;

    /// Human readable token name, never empty
    fn name(&self) -> String;

    /// Ticker shown next to amounts, e.g. "TCC"
    fn symbol(&self) -> String;

    /// Returns the number of decimals used when presenting amounts to users
    ///
    /// Purely informational, all amounts handled by the token are in base units.
    fn decimals(&self) -> DecimalsReturn;

    /// Base units in existence, equal to the sum of every balance
    fn total_supply(&self) -> TotalSupplyReturn;

    /// Base units held by an address, zero for addresses never seen before
    fn balance_of(&self, params: Address) -> Result<BalanceReturn, Self::TokenError>;

    /// Returns the allowance approved for a spender on an owner's balance
    fn allowance(&self, params: GetAllowanceParams) -> Result<AllowanceReturn, Self::TokenError>;

    /// Moves the caller's own tokens to `params.to`
    ///
    /// Zero is a valid amount. Sending to the caller's own address succeeds when the balance
    /// covers the amount and leaves it unchanged.
    fn transfer(
        &self,
        caller: &Address,
        params: TransferParams,
    ) -> Result<TransferReturn, Self::TokenError>;

    /// Sets the allowance a spender has on the caller's balance, replacing any previous value
    ///
    /// Returns the previous allowance.
    fn approve(
        &self,
        caller: &Address,
        params: ApproveParams,
    ) -> Result<ApproveReturn, Self::TokenError>;

    /// Moves tokens out of `params.from` using an allowance granted to the caller
    ///
    /// The allowance shrinks by exactly the amount moved.
    fn transfer_from(
        &self,
        caller: &Address,
        params: TransferFromParams,
    ) -> Result<TransferFromReturn, Self::TokenError>;

    /// Adds to the allowance of `params.spender`, returning the resulting allowance
    fn increase_allowance(
        &self,
        caller: &Address,
        params: IncreaseAllowanceParams,
    ) -> Result<IncreaseAllowanceReturn, Self::TokenError>;

    /// Subtracts from the allowance of `params.spender`, never going below zero
    ///
    /// Returns the resulting allowance.
    fn decrease_allowance(
        &self,
        caller: &Address,
        params: DecreaseAllowanceParams,
    ) -> Result<DecreaseAllowanceReturn, Self::TokenError>;

    /// Clears the allowance of `params.spender`, returning what it was
    fn revoke_allowance(
        &self,
        caller: &Address,
        params: RevokeAllowanceParams,
    ) -> Result<RevokeAllowanceReturn, Self::TokenError>;
}

pub type DecimalsReturn = u8;
pub type TotalSupplyReturn = TokenAmount;
pub type BalanceReturn = TokenAmount;
pub type AllowanceReturn = TokenAmount;
pub type ApproveReturn = TokenAmount;
pub type IncreaseAllowanceReturn = TokenAmount;
pub type DecreaseAllowanceReturn = TokenAmount;
pub type RevokeAllowanceReturn = TokenAmount;

/// Arguments of [`Erc20Token::transfer`]
#[derive(Serialize_tuple, Deserialize_tuple, PartialEq, Eq, Clone, Debug)]
pub struct TransferParams {
    pub to: Address,
    /// Base units to send, may be zero
    pub amount: TokenAmount,
}

/// Balances after a transfer
#[derive(Serialize_tuple, Deserialize_tuple, PartialEq, Eq, Clone, Debug)]
pub struct TransferReturn {
    pub from_balance: TokenAmount,
    pub to_balance: TokenAmount,
}

/// Instruction to transfer tokens between two addresses as an approved spender
#[derive(Serialize_tuple, Deserialize_tuple, PartialEq, Eq, Clone, Debug)]
pub struct TransferFromParams {
    pub from: Address,
    pub to: Address,
    /// Base units to send, may be zero
    pub amount: TokenAmount,
}

/// Balances and the remaining allowance after a delegated transfer
#[derive(Serialize_tuple, Deserialize_tuple, PartialEq, Eq, Clone, Debug)]
pub struct TransferFromReturn {
    pub from_balance: TokenAmount,
    pub to_balance: TokenAmount,
    /// What the caller may still spend from `from`
    pub allowance: TokenAmount,
}

/// Instruction to set an allowance to an absolute amount
#[derive(Serialize_tuple, Deserialize_tuple, PartialEq, Eq, Clone, Debug)]
pub struct ApproveParams {
    pub spender: Address,
    /// A non-negative allowance, zero revokes
    pub amount: TokenAmount,
}

/// Arguments of [`Erc20Token::increase_allowance`]
#[derive(Serialize_tuple, Deserialize_tuple, PartialEq, Eq, Clone, Debug)]
pub struct IncreaseAllowanceParams {
    pub spender: Address,
    pub increase: TokenAmount,
}

/// Arguments of [`Erc20Token::decrease_allowance`]
#[derive(Serialize_tuple, Deserialize_tuple, PartialEq, Eq, Clone, Debug)]
pub struct DecreaseAllowanceParams {
    pub spender: Address,
    pub decrease: TokenAmount,
}

/// Arguments of [`Erc20Token::revoke_allowance`]
#[derive(Serialize_tuple, Deserialize_tuple, PartialEq, Eq, Clone, Debug)]
pub struct RevokeAllowanceParams {
    pub spender: Address,
}

/// Owner and spender whose allowance [`Erc20Token::allowance`] reads
#[derive(Serialize_tuple, Deserialize_tuple, PartialEq, Eq, Clone, Debug)]
pub struct GetAllowanceParams {
    pub owner: Address,
    pub spender: Address,
}
