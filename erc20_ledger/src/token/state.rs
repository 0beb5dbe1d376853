use std::ops::Neg;

use cid::multihash::Code;
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::tuple::*;
use fvm_ipld_encoding::CborStore;
use fvm_ipld_hamt::{BytesKey, Error as HamtError, Hamt};
use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;
use fvm_shared::ActorID;
use integer_encoding::VarInt;
use num_traits::Zero;
use thiserror::Error;

/// Bit width of the balance and allowance Hamts when none is configured
pub const DEFAULT_HAMT_BIT_WIDTH: u32 = 3;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("hamt operation failed: {0}")]
    IpldHamt(#[from] HamtError),
    #[error("no token state stored under {0}")]
    MissingState(Cid),
    #[error("token state could not be encoded or decoded: {0}")]
    Serialization(String),
    #[error("account {owner} holds {balance:?}, which cannot cover a debit of {delta:?}")]
    InsufficientBalance { owner: Address, balance: TokenAmount, delta: TokenAmount },
    #[error("{spender} may spend {allowance:?} on behalf of {owner}, but asked for {delta:?}")]
    InsufficientAllowance {
        owner: Address,
        spender: Address,
        allowance: TokenAmount,
        delta: TokenAmount,
    },
    #[error("supply of {supply:?} would go negative after adding {delta:?}")]
    NegativeTotalSupply { supply: TokenAmount, delta: TokenAmount },
    #[error("refusing to store allowance {amount:?} from {owner} to {spender}")]
    NegativeAllowance { amount: TokenAmount, owner: ActorID, spender: ActorID },
    #[error("hamt bit width must be between 1 and 8, got {0}")]
    InvalidBitWidth(u32),
}

/// A broken ledger invariant found by [`TokenState::check_invariants`]
#[derive(Error, Debug)]
pub enum StateInvariantError {
    #[error("supply is negative: {0:?}")]
    SupplyNegative(TokenAmount),
    #[error("account {account} has a negative balance {balance:?}")]
    BalanceNegative { account: ActorID, balance: TokenAmount },
    #[error("balances add up to {balance_sum:?} but the supply is {supply:?}")]
    BalanceSupplyMismatch { supply: TokenAmount, balance_sum: TokenAmount },
    #[error("allowance from {owner} to {spender} is negative: {allowance:?}")]
    NegativeAllowance { owner: ActorID, spender: ActorID, allowance: TokenAmount },
    #[error("account {0} has an explicit zero balance entry")]
    ExplicitZeroBalance(ActorID),
    #[error("allowance from {owner} to {spender} is stored as an explicit zero")]
    ExplicitZeroAllowance { owner: ActorID, spender: ActorID },
    #[error("owner {0} has an allowance table with no entries")]
    ExplicitEmptyAllowance(ActorID),
    #[error("key {0:?} does not encode an actor id")]
    InvalidAccountKey(BytesKey),
    #[error(transparent)]
    State(#[from] StateError),
}

impl From<HamtError> for StateInvariantError {
    fn from(err: HamtError) -> Self {
        StateError::from(err).into()
    }
}

type Result<T> = std::result::Result<T, StateError>;

/// Hamt keyed by varint encoded actor ids
type ActorMap<'bs, BS, V> = Hamt<&'bs BS, V, BytesKey>;
type BalanceMap<'bs, BS> = ActorMap<'bs, BS, TokenAmount>;
/// Root of the allowance tables, linking each owner to its own table of spenders
type AllowanceMap<'bs, BS> = ActorMap<'bs, BS, Cid>;
type OwnerAllowanceMap<'bs, BS> = ActorMap<'bs, BS, TokenAmount>;

/// Root of the token state as stored in the blockstore
///
/// Balances map `owner -> amount`; allowances map `owner -> spender -> amount`. Zero amounts are
/// never stored, and an owner with no remaining allowances has no entry in the root table.
#[derive(Serialize_tuple, Deserialize_tuple, PartialEq, Eq, Clone, Debug)]
pub struct TokenState {
    pub supply: TokenAmount,
    pub balances: Cid,
    pub allowances: Cid,
    hamt_bit_width: u32,
}

/// Storage level reads and writes of balances and allowances.
///
/// Amounts are kept non-negative here, but protocol rules such as requiring an allowance before
/// moving someone else's tokens belong to [`crate::token::Token`].
impl TokenState {
    pub fn new<BS: Blockstore>(store: &BS) -> Result<Self> {
        Self::new_with_bit_width(store, DEFAULT_HAMT_BIT_WIDTH)
    }

    /// Creates empty balance and allowance tables in `store`. The state root itself is not
    /// written until [`TokenState::save`].
    ///
    /// The bit width must be within 1..=8 and is used for every Hamt of this state.
    pub fn new_with_bit_width<BS: Blockstore>(store: &BS, hamt_bit_width: u32) -> Result<Self> {
        if !(1..=8).contains(&hamt_bit_width) {
            return Err(StateError::InvalidBitWidth(hamt_bit_width));
        }
        let balances = BalanceMap::new_with_bit_width(store, hamt_bit_width).flush()?;
        let allowances = AllowanceMap::new_with_bit_width(store, hamt_bit_width).flush()?;
        Ok(Self { supply: TokenAmount::zero(), balances, allowances, hamt_bit_width })
    }

    pub fn load<BS: Blockstore>(bs: &BS, cid: &Cid) -> Result<Self> {
        bs.get_cbor::<Self>(cid)
            .map_err(|err| StateError::Serialization(err.to_string()))?
            .ok_or(StateError::MissingState(*cid))
    }

    /// Writes the state root to the blockstore, returning its cid
    pub fn save<BS: Blockstore>(&self, bs: &BS) -> Result<Cid> {
        bs.put_cbor(self, Code::Blake2b256)
            .map_err(|err| StateError::Serialization(err.to_string()))
    }

    pub fn hamt_bit_width(&self) -> u32 {
        self.hamt_bit_width
    }

    pub fn get_balance<BS: Blockstore>(&self, bs: &BS, owner: ActorID) -> Result<TokenAmount> {
        let balances = self.balance_map(bs)?;
        stored_amount(&balances, &actor_id_key(owner))
    }

    /// Adds `delta` to the balance of `owner` and returns the result
    ///
    /// A negative delta debits the account and fails if the balance cannot cover it. Whether a
    /// debit is allowed at all is up to the caller.
    pub fn change_balance_by<BS: Blockstore>(
        &mut self,
        bs: &BS,
        owner: ActorID,
        delta: &TokenAmount,
    ) -> Result<TokenAmount> {
        if delta.is_zero() {
            return self.get_balance(bs, owner);
        }

        let mut balances = self.balance_map(bs)?;
        let key = actor_id_key(owner);
        let balance = stored_amount(&balances, &key)?;
        let updated = &balance + delta;
        if updated.is_negative() {
            return Err(StateError::InsufficientBalance {
                owner: Address::new_id(owner),
                balance,
                delta: delta.clone(),
            });
        }

        put_amount(&mut balances, key, &updated)?;
        self.balances = balances.flush()?;
        Ok(updated)
    }

    /// Number of accounts with a non-zero balance, found by walking the whole balance table
    pub fn count_balances<BS: Blockstore>(&self, bs: &BS) -> Result<usize> {
        let mut holders = 0;
        self.balance_map(bs)?.for_each(|_, _| {
            holders += 1;
            Ok(())
        })?;
        Ok(holders)
    }

    /// Adds `delta` to the supply and returns the new supply, which may not become negative
    pub fn change_supply_by(&mut self, delta: &TokenAmount) -> Result<&TokenAmount> {
        let supply = &self.supply + delta;
        if supply.is_negative() {
            return Err(StateError::NegativeTotalSupply {
                supply: self.supply.clone(),
                delta: delta.clone(),
            });
        }
        self.supply = supply;
        Ok(&self.supply)
    }

    /// Amount `spender` may move on behalf of `owner`, zero when nothing was approved
    pub fn get_allowance_between<BS: Blockstore>(
        &self,
        bs: &BS,
        owner: ActorID,
        spender: ActorID,
    ) -> Result<TokenAmount> {
        match self.owner_allowances(bs, owner)? {
            Some(table) => stored_amount(&table, &actor_id_key(spender)),
            None => Ok(TokenAmount::zero()),
        }
    }

    /// Adds `delta` to an allowance, stopping at zero rather than going negative
    ///
    /// Returns the allowance after the change.
    pub fn change_allowance_by<BS: Blockstore>(
        &mut self,
        bs: &BS,
        owner: ActorID,
        spender: ActorID,
        delta: &TokenAmount,
    ) -> Result<TokenAmount> {
        if delta.is_zero() {
            return self.get_allowance_between(bs, owner, spender);
        }

        let mut root = self.allowance_root(bs)?;
        let owner_key = actor_id_key(owner);
        let mut table = match self.load_owner_table(bs, &root, &owner_key)? {
            Some(table) => table,
            // nothing approved yet, so a decrease leaves it at zero
            None if delta.is_negative() => return Ok(TokenAmount::zero()),
            None => OwnerAllowanceMap::new_with_bit_width(bs, self.hamt_bit_width),
        };

        let spender_key = actor_id_key(spender);
        let updated = (&stored_amount(&table, &spender_key)? + delta).max(TokenAmount::zero());
        put_amount(&mut table, spender_key, &updated)?;
        self.store_owner_table(&mut root, owner_key, table)?;
        Ok(updated)
    }

    /// Deletes the allowance from `owner` to `spender`, returning what it was
    pub fn revoke_allowance<BS: Blockstore>(
        &mut self,
        bs: &BS,
        owner: ActorID,
        spender: ActorID,
    ) -> Result<TokenAmount> {
        let mut root = self.allowance_root(bs)?;
        let owner_key = actor_id_key(owner);
        let Some(mut table) = self.load_owner_table(bs, &root, &owner_key)? else {
            return Ok(TokenAmount::zero());
        };

        let Some((_, previous)) = table.delete(&actor_id_key(spender))? else {
            return Ok(TokenAmount::zero());
        };
        self.store_owner_table(&mut root, owner_key, table)?;
        Ok(previous)
    }

    /// Replaces the allowance from `owner` to `spender`, returning the previous one
    ///
    /// Setting zero removes the entry.
    pub fn set_allowance<BS: Blockstore>(
        &mut self,
        bs: &BS,
        owner: ActorID,
        spender: ActorID,
        amount: &TokenAmount,
    ) -> Result<TokenAmount> {
        if amount.is_negative() {
            return Err(StateError::NegativeAllowance { owner, spender, amount: amount.clone() });
        }
        if amount.is_zero() {
            return self.revoke_allowance(bs, owner, spender);
        }

        let mut root = self.allowance_root(bs)?;
        let owner_key = actor_id_key(owner);
        let mut table = self
            .load_owner_table(bs, &root, &owner_key)?
            .unwrap_or_else(|| OwnerAllowanceMap::new_with_bit_width(bs, self.hamt_bit_width));
        let previous = table.set(actor_id_key(spender), amount.clone())?.unwrap_or_default();
        self.store_owner_table(&mut root, owner_key, table)?;
        Ok(previous)
    }

    /// Deducts `amount` from the allowance `owner` gave `spender`, if it covers the amount
    ///
    /// Returns the remaining allowance. On failure nothing is deducted.
    pub fn attempt_use_allowance<BS: Blockstore>(
        &mut self,
        bs: &BS,
        spender: ActorID,
        owner: ActorID,
        amount: &TokenAmount,
    ) -> Result<TokenAmount> {
        let allowance = self.get_allowance_between(bs, owner, spender)?;
        if &allowance < amount {
            return Err(StateError::InsufficientAllowance {
                owner: Address::new_id(owner),
                spender: Address::new_id(spender),
                allowance,
                delta: amount.clone(),
            });
        }
        if amount.is_zero() {
            return Ok(allowance);
        }
        self.change_allowance_by(bs, owner, spender, &amount.neg())
    }

    /// Verifies the stored state against the ledger invariants
    ///
    /// Amounts must be positive wherever they are stored, balances must add up to the supply, and
    /// every owner in the allowance root must have at least one allowance. On success the returned
    /// summary describes the checked state.
    pub fn check_invariants<BS: Blockstore>(
        &self,
        bs: &BS,
    ) -> std::result::Result<StateSummary, StateInvariantError> {
        if self.supply.is_negative() {
            return Err(StateInvariantError::SupplyNegative(self.supply.clone()));
        }

        let balances = entries(&self.balance_map(bs)?)?;
        let mut balance_sum = TokenAmount::zero();
        for (account, balance) in &balances {
            let account = *account;
            if balance.is_negative() {
                return Err(StateInvariantError::BalanceNegative {
                    account,
                    balance: balance.clone(),
                });
            }
            if balance.is_zero() {
                return Err(StateInvariantError::ExplicitZeroBalance(account));
            }
            balance_sum += balance.clone();
        }
        if balance_sum != self.supply {
            return Err(StateInvariantError::BalanceSupplyMismatch {
                supply: self.supply.clone(),
                balance_sum,
            });
        }

        let mut allowances = 0;
        for (owner, table) in entries(&self.allowance_root(bs)?)? {
            let table = OwnerAllowanceMap::load_with_bit_width(&table, bs, self.hamt_bit_width)?;
            let approved = entries(&table)?;
            if approved.is_empty() {
                return Err(StateInvariantError::ExplicitEmptyAllowance(owner));
            }
            for (spender, allowance) in approved {
                if allowance.is_negative() {
                    return Err(StateInvariantError::NegativeAllowance {
                        owner,
                        spender,
                        allowance,
                    });
                }
                if allowance.is_zero() {
                    return Err(StateInvariantError::ExplicitZeroAllowance { owner, spender });
                }
                allowances += 1;
            }
        }

        Ok(StateSummary { total_supply: self.supply.clone(), holders: balances.len(), allowances })
    }

    fn balance_map<'bs, BS: Blockstore>(&self, bs: &'bs BS) -> Result<BalanceMap<'bs, BS>> {
        Ok(BalanceMap::load_with_bit_width(&self.balances, bs, self.hamt_bit_width)?)
    }

    fn allowance_root<'bs, BS: Blockstore>(&self, bs: &'bs BS) -> Result<AllowanceMap<'bs, BS>> {
        Ok(AllowanceMap::load_with_bit_width(&self.allowances, bs, self.hamt_bit_width)?)
    }

    /// Table of spenders approved by `owner`, or None if they approved nobody
    fn owner_allowances<'bs, BS: Blockstore>(
        &self,
        bs: &'bs BS,
        owner: ActorID,
    ) -> Result<Option<OwnerAllowanceMap<'bs, BS>>> {
        let root = self.allowance_root(bs)?;
        self.load_owner_table(bs, &root, &actor_id_key(owner))
    }

    fn load_owner_table<'bs, BS: Blockstore>(
        &self,
        bs: &'bs BS,
        root: &AllowanceMap<'bs, BS>,
        owner_key: &BytesKey,
    ) -> Result<Option<OwnerAllowanceMap<'bs, BS>>> {
        match root.get(owner_key)? {
            Some(cid) => Ok(Some(OwnerAllowanceMap::load_with_bit_width(
                cid,
                bs,
                self.hamt_bit_width,
            )?)),
            None => Ok(None),
        }
    }

    /// Links an owner's table back into the root, dropping the owner once the table is empty
    fn store_owner_table<BS: Blockstore>(
        &mut self,
        root: &mut AllowanceMap<'_, BS>,
        owner_key: BytesKey,
        mut table: OwnerAllowanceMap<'_, BS>,
    ) -> Result<()> {
        if table.is_empty() {
            root.delete(&owner_key)?;
        } else {
            root.set(owner_key, table.flush()?)?;
        }
        self.allowances = root.flush()?;
        Ok(())
    }
}

/// Reads an amount from a balance or allowance table, absent entries being zero
fn stored_amount<BS: Blockstore>(
    map: &ActorMap<'_, BS, TokenAmount>,
    key: &BytesKey,
) -> Result<TokenAmount> {
    Ok(map.get(key)?.cloned().unwrap_or_default())
}

/// Writes an amount into a balance or allowance table, deleting the entry for zero
fn put_amount<BS: Blockstore>(
    map: &mut ActorMap<'_, BS, TokenAmount>,
    key: BytesKey,
    amount: &TokenAmount,
) -> Result<()> {
    if amount.is_zero() {
        map.delete(&key)?;
    } else {
        map.set(key, amount.clone())?;
    }
    Ok(())
}

/// Collects every entry of an actor keyed table
fn entries<BS, V>(
    map: &ActorMap<'_, BS, V>,
) -> std::result::Result<Vec<(ActorID, V)>, StateInvariantError>
where
    BS: Blockstore,
    V: serde::de::DeserializeOwned + serde::Serialize + Clone + PartialEq,
{
    let mut found = Vec::new();
    let mut bad_key = None;
    map.for_each(|key, value| {
        match decode_actor_id(key) {
            Some(id) => found.push((id, value.clone())),
            None if bad_key.is_none() => bad_key = Some(key.clone()),
            None => {}
        }
        Ok(())
    })?;
    match bad_key {
        Some(key) => Err(StateInvariantError::InvalidAccountKey(key)),
        None => Ok(found),
    }
}

pub fn actor_id_key(id: ActorID) -> BytesKey {
    id.encode_var_vec().into()
}

pub fn decode_actor_id(key: &BytesKey) -> Option<ActorID> {
    let (id, read) = u64::decode_var(&key.0)?;
    (read == key.0.len()).then_some(id)
}

/// Figures gathered while checking the invariants, for checks layered on top
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateSummary {
    pub total_supply: TokenAmount,
    /// Accounts with a non-zero balance
    pub holders: usize,
    /// Owner and spender pairs with a non-zero allowance
    pub allowances: usize,
}
