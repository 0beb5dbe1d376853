use std::ops::Neg;

use cid::Cid;
pub use error::{ErrorKind, TokenError};
use fvm_ipld_blockstore::Blockstore;
use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;
use fvm_shared::ActorID;
use ledger_utils::{AccountResolver, LedgerRuntime};
use num_traits::Zero;

use self::state::{StateError as TokenStateError, StateInvariantError, StateSummary, TokenState};
use self::types::{TransferFromReturn, TransferReturn};

mod error;
pub mod state;
pub mod types;

type Result<T> = std::result::Result<T, TokenError>;

/// The ERC-20 rules applied to a borrowed [`TokenState`]
///
/// Addresses are resolved to actor ids through the runtime before the state is touched. Every
/// operation either applies all of its changes or none of them.
pub struct Token<'st, A, BS>
where
    A: AccountResolver,
    BS: Blockstore,
{
    runtime: LedgerRuntime<A, BS>,
    state: &'st mut TokenState,
}

impl<'st, A, BS> Token<'st, A, BS>
where
    A: AccountResolver,
    BS: Blockstore,
{
    /// Empty state with the default Hamt bit width. Nothing is persisted until it is flushed.
    pub fn create_state(bs: &BS) -> Result<TokenState> {
        Ok(TokenState::new(bs)?)
    }

    pub fn wrap(runtime: LedgerRuntime<A, BS>, state: &'st mut TokenState) -> Self {
        Self { runtime, state }
    }

    /// Swaps in `state`, handing back the one that was wrapped
    pub fn replace(&mut self, state: TokenState) -> TokenState {
        std::mem::replace(self.state, state)
    }

    /// Swaps in the state stored under `cid`, handing back the one that was wrapped
    pub fn load_replace(&mut self, cid: &Cid) -> Result<TokenState> {
        let loaded = TokenState::load(&self.runtime, cid)?;
        Ok(self.replace(loaded))
    }

    /// Writes the state root to the blockstore
    pub fn flush(&mut self) -> Result<Cid> {
        Ok(self.state.save(&self.runtime)?)
    }

    pub fn state(&self) -> &TokenState {
        self.state
    }

    pub fn runtime(&self) -> &LedgerRuntime<A, BS> {
        &self.runtime
    }

    /// Runs `f` against a copy of the state and keeps the copy only if `f` succeeds
    fn atomically<F, R>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&mut TokenState, &LedgerRuntime<A, BS>) -> Result<R>,
    {
        let mut draft = self.state.clone();
        let out = f(&mut draft, &self.runtime)?;
        *self.state = draft;
        Ok(out)
    }

    /// Resolves an address without registering it
    ///
    /// None means the host has not seen the address yet but could create an account there.
    /// Undefined addresses fail with AccountError::AddressNotInitialized.
    fn lookup(&self, address: &Address) -> Result<Option<ActorID>> {
        Ok(self.runtime.resolve_existing(address)?)
    }

    /// Id of a looked up address, initializing the account if it was not seen yet
    fn existing_or_init(&self, address: &Address, known: Option<ActorID>) -> Result<ActorID> {
        match known {
            Some(id) => Ok(id),
            None => Ok(self.runtime.resolve_or_init(address)?),
        }
    }
}

impl<'st, A, BS> Token<'st, A, BS>
where
    A: AccountResolver,
    BS: Blockstore,
{
    /// Credits freshly created tokens to `owner` and grows the supply to match
    ///
    /// Used to place the initial supply; the ledger exposes no minting after genesis. Returns the
    /// owner's new balance.
    pub fn mint(&mut self, owner: &Address, amount: &TokenAmount) -> Result<TokenAmount> {
        let amount = non_negative(amount, "mint")?;
        let owner = self.runtime.resolve_or_init(owner)?;

        self.atomically(|state, bs| {
            let balance = state.change_balance_by(bs, owner, amount)?;
            state.change_supply_by(amount)?;
            Ok(balance)
        })
    }

    /// Sum of all balances
    pub fn total_supply(&self) -> TokenAmount {
        self.state.supply.clone()
    }

    /// Balance held by `owner`, zero for any address without an account
    pub fn balance_of(&self, owner: &Address) -> Result<TokenAmount> {
        match self.runtime.accounts.resolve_address(owner) {
            Some(owner) => Ok(self.state.get_balance(&self.runtime, owner)?),
            None => Ok(TokenAmount::zero()),
        }
    }

    /// Amount `spender` may still move out of `owner`'s balance with `transfer_from`
    pub fn allowance(&self, owner: &Address, spender: &Address) -> Result<TokenAmount> {
        let accounts = &self.runtime.accounts;
        let (Some(owner), Some(spender)) =
            (accounts.resolve_address(owner), accounts.resolve_address(spender))
        else {
            return Ok(TokenAmount::zero());
        };
        Ok(self.state.get_allowance_between(&self.runtime, owner, spender)?)
    }

    /// Adds `delta` to the allowance of `spender` and returns the new allowance
    pub fn increase_allowance(
        &mut self,
        owner: &Address,
        spender: &Address,
        delta: &TokenAmount,
    ) -> Result<TokenAmount> {
        let delta = non_negative(delta, "increase allowance delta")?;
        let owner = self.runtime.resolve_or_init(owner)?;
        let spender = self.runtime.resolve_or_init(spender)?;
        Ok(self.state.change_allowance_by(&self.runtime, owner, spender, delta)?)
    }

    /// Takes `delta` off the allowance of `spender`, stopping at zero. Returns the new allowance.
    pub fn decrease_allowance(
        &mut self,
        owner: &Address,
        spender: &Address,
        delta: &TokenAmount,
    ) -> Result<TokenAmount> {
        let delta = non_negative(delta, "decrease allowance delta")?;
        let (Some(owner), Some(spender)) = (self.lookup(owner)?, self.lookup(spender)?) else {
            return Ok(TokenAmount::zero());
        };
        Ok(self.state.change_allowance_by(&self.runtime, owner, spender, &delta.neg())?)
    }

    /// Removes the allowance of `spender`, returning what it was
    pub fn revoke_allowance(&mut self, owner: &Address, spender: &Address) -> Result<TokenAmount> {
        let (Some(owner), Some(spender)) = (self.lookup(owner)?, self.lookup(spender)?) else {
            return Ok(TokenAmount::zero());
        };
        Ok(self.state.revoke_allowance(&self.runtime, owner, spender)?)
    }

    /// ERC-20 `approve`: replaces the allowance of `spender` and returns the previous one
    pub fn set_allowance(
        &mut self,
        owner: &Address,
        spender: &Address,
        amount: &TokenAmount,
    ) -> Result<TokenAmount> {
        let amount = non_negative(amount, "set allowance amount")?;
        // a zero approval must not register unseen addresses
        if amount.is_zero() {
            return self.revoke_allowance(owner, spender);
        }

        let owner = self.runtime.resolve_or_init(owner)?;
        let spender = self.runtime.resolve_or_init(spender)?;
        Ok(self.state.set_allowance(&self.runtime, owner, spender, amount)?)
    }

    /// Moves `amount` from `from` to `to` on the authority of `from` itself
    ///
    /// Undefined addresses are rejected before any balance is read. Otherwise this fails with an
    /// insufficient balance if `from` holds less than `amount`, including when `from` and `to` are
    /// the same account. A recipient the host has not seen yet is initialized only once the debit
    /// succeeds.
    pub fn transfer(
        &mut self,
        from: &Address,
        to: &Address,
        amount: &TokenAmount,
    ) -> Result<TransferReturn> {
        let amount = non_negative(amount, "transfer")?;
        let (from_id, to_id) = (self.lookup(from)?, self.lookup(to)?);

        let from_id = match from_id {
            Some(id) => id,
            None if amount.is_zero() => self.runtime.resolve_or_init(from)?,
            None => {
                return Err(TokenStateError::InsufficientBalance {
                    owner: *from,
                    balance: TokenAmount::zero(),
                    delta: amount.neg(),
                }
                .into())
            }
        };

        self.atomically(|state, runtime| {
            let (from_balance, to_balance) =
                move_balance(state, runtime, from_id, to, to_id, amount)
                    .map_err(|err| readdress(err, from, from))?;
            Ok(TransferReturn { from_balance, to_balance })
        })
    }

    /// Moves `amount` from `from` to `to` on the authority of `spender`
    ///
    /// Undefined addresses are rejected first. Then the allowance `from` gave `spender` is checked
    /// and reduced by exactly `amount`, and finally the balance of `from` must cover it. A call
    /// failing both checks reports the allowance.
    pub fn transfer_from(
        &mut self,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: &TokenAmount,
    ) -> Result<TransferFromReturn> {
        let amount = non_negative(amount, "transfer")?;
        let spender_id = self.lookup(spender)?;
        let from_id = self.lookup(from)?;
        let to_id = self.lookup(to)?;

        let (spender_id, from_id) = match (spender_id, from_id) {
            (Some(spender_id), Some(from_id)) => (spender_id, from_id),
            // an account the host has never seen cannot be part of a non-zero allowance
            _ if !amount.is_zero() => {
                return Err(TokenStateError::InsufficientAllowance {
                    owner: *from,
                    spender: *spender,
                    allowance: TokenAmount::zero(),
                    delta: amount.clone(),
                }
                .into())
            }
            (spender_id, from_id) => {
                (self.existing_or_init(spender, spender_id)?, self.existing_or_init(from, from_id)?)
            }
        };

        self.atomically(|state, runtime| {
            let allowance = state
                .attempt_use_allowance(runtime, spender_id, from_id, amount)
                .map_err(|err| readdress(err, from, spender))?;
            let (from_balance, to_balance) =
                move_balance(state, runtime, from_id, to, to_id, amount)
                    .map_err(|err| readdress(err, from, spender))?;
            Ok(TransferFromReturn { from_balance, to_balance, allowance })
        })
    }

    /// Number of accounts currently holding a non-zero balance
    pub fn holder_count(&self) -> Result<usize> {
        Ok(self.state.count_balances(&self.runtime)?)
    }

    /// Like [`Token::check_invariants`], reporting a violation as a [`TokenError`]
    pub fn assert_invariants(&self) -> Result<StateSummary> {
        Ok(self.check_invariants()?)
    }

    pub fn check_invariants(&self) -> std::result::Result<StateSummary, StateInvariantError> {
        self.state.check_invariants(&self.runtime)
    }
}

/// Debits `from` and credits `to`, returning both balances afterwards
///
/// `to_id` is the recipient as looked up by the caller; an unseen recipient is initialized after
/// the debit. When both are the same account nothing moves, but the balance must still cover
/// `amount`.
fn move_balance<A, BS>(
    state: &mut TokenState,
    runtime: &LedgerRuntime<A, BS>,
    from: ActorID,
    to: &Address,
    to_id: Option<ActorID>,
    amount: &TokenAmount,
) -> Result<(TokenAmount, TokenAmount)>
where
    A: AccountResolver,
    BS: Blockstore,
{
    if to_id == Some(from) {
        let balance = state.get_balance(runtime, from)?;
        if &balance < amount {
            return Err(TokenStateError::InsufficientBalance {
                owner: Address::new_id(from),
                balance,
                delta: amount.neg(),
            }
            .into());
        }
        return Ok((balance.clone(), balance));
    }

    let from_balance = state.change_balance_by(runtime, from, &amount.neg())?;
    let to_id = match to_id {
        Some(id) => id,
        None => runtime.resolve_or_init(to)?,
    };
    let to_balance = state.change_balance_by(runtime, to_id, amount)?;
    Ok((from_balance, to_balance))
}

/// Reports balance and allowance failures with the addresses the caller used rather than the
/// resolved ids
fn readdress(err: impl Into<TokenError>, owner: &Address, spender: &Address) -> TokenError {
    match err.into() {
        TokenError::TokenState(TokenStateError::InsufficientAllowance {
            allowance, delta, ..
        }) => TokenStateError::InsufficientAllowance {
            owner: *owner,
            spender: *spender,
            allowance,
            delta,
        }
        .into(),
        TokenError::TokenState(TokenStateError::InsufficientBalance { balance, delta, .. }) => {
            TokenStateError::InsufficientBalance { owner: *owner, balance, delta }.into()
        }
        other => other,
    }
}

/// Rejects negative amounts, naming the offending argument
fn non_negative<'a>(amount: &'a TokenAmount, name: &'static str) -> Result<&'a TokenAmount> {
    if amount.is_negative() {
        return Err(TokenError::InvalidNegative { name, amount: amount.clone() });
    }
    Ok(amount)
}
