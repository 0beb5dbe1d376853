use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;
use ledger_utils::{AccountResolver, LedgerRuntime, MemoryAccountRegistry, SharedMemoryBlockstore};
use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, TokenConfig};
use crate::token::state::{StateInvariantError, StateSummary, TokenState};
use crate::token::types::{
    AllowanceReturn, ApproveParams, ApproveReturn, BalanceReturn, DecimalsReturn,
    DecreaseAllowanceParams, DecreaseAllowanceReturn, Erc20Token, GetAllowanceParams,
    IncreaseAllowanceParams, IncreaseAllowanceReturn, RevokeAllowanceParams,
    RevokeAllowanceReturn, TotalSupplyReturn, TransferFromParams, TransferFromReturn,
    TransferParams, TransferReturn,
};
use crate::token::{Token, TokenError};

type Result<T> = std::result::Result<T, TokenError>;

/// A ledger kept entirely in memory
pub type MemoryLedger = Ledger<MemoryAccountRegistry, SharedMemoryBlockstore>;

/// Descriptive token properties, fixed at genesis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// A token ledger that can be shared between threads
///
/// Mutations hold the write lock for the whole of their transaction, so they are applied one at
/// a time. Reads copy the state root under the read lock and then work from that snapshot.
pub struct Ledger<A, BS>
where
    A: AccountResolver,
    BS: Blockstore,
{
    metadata: TokenMetadata,
    runtime: LedgerRuntime<A, BS>,
    state: RwLock<TokenState>,
}

impl<A, BS> Ledger<A, BS>
where
    A: AccountResolver,
    BS: Blockstore,
{
    /// Creates a ledger from a validated genesis config
    pub fn genesis(
        runtime: LedgerRuntime<A, BS>,
        config: &TokenConfig,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let owner = config.owner_address()?;
        let supply = config.initial_supply()?;
        Ok(Self::new(runtime, config.metadata(), config.hamt_bit_width, &owner, &supply)?)
    }

    /// Creates a fresh ledger crediting the whole supply to a single owner
    ///
    /// Fails with an invalid argument unless 1 <= hamt_bit_width <= 8.
    pub fn new(
        runtime: LedgerRuntime<A, BS>,
        metadata: TokenMetadata,
        hamt_bit_width: u32,
        owner: &Address,
        supply: &TokenAmount,
    ) -> Result<Self> {
        let mut state = TokenState::new_with_bit_width(runtime.bs(), hamt_bit_width)?;
        Token::wrap(runtime.by_ref(), &mut state).mint(owner, supply)?;

        tracing::info!(
            name = %metadata.name,
            symbol = %metadata.symbol,
            %owner,
            supply = %supply.atto(),
            "created token ledger"
        );
        Ok(Self { metadata, runtime, state: RwLock::new(state) })
    }

    /// Restores a ledger from a state root previously returned by [`Ledger::flush`]
    pub fn load(
        runtime: LedgerRuntime<A, BS>,
        metadata: TokenMetadata,
        root: &Cid,
    ) -> Result<Self> {
        let state = TokenState::load(&runtime, root)?;
        tracing::info!(
            name = %metadata.name,
            %root,
            supply = %state.supply.atto(),
            "loaded token ledger"
        );
        Ok(Self { metadata, runtime, state: RwLock::new(state) })
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn symbol(&self) -> &str {
        &self.metadata.symbol
    }

    pub fn decimals(&self) -> u8 {
        self.metadata.decimals
    }

    pub fn metadata(&self) -> &TokenMetadata {
        &self.metadata
    }

    pub fn runtime(&self) -> &LedgerRuntime<A, BS> {
        &self.runtime
    }

    /// A copy of the current state root
    pub fn snapshot(&self) -> TokenState {
        self.read_state().clone()
    }

    pub fn total_supply(&self) -> TokenAmount {
        self.read_state().supply.clone()
    }

    /// Balance of an account, zero for accounts never seen
    pub fn balance_of(&self, owner: &Address) -> Result<TokenAmount> {
        self.read(|token| token.balance_of(owner))
    }

    /// Amount `spender` may still move out of `owner`'s balance
    pub fn allowance(&self, owner: &Address, spender: &Address) -> Result<TokenAmount> {
        self.read(|token| token.allowance(owner, spender))
    }

    /// Number of accounts holding a non-zero balance
    pub fn holder_count(&self) -> Result<usize> {
        self.read(|token| token.holder_count())
    }

    /// Moves `amount` from `from` to `to`
    pub fn transfer(
        &self,
        from: &Address,
        to: &Address,
        amount: &TokenAmount,
    ) -> Result<TransferReturn> {
        let ret = self.write("transfer", |token| token.transfer(from, to, amount))?;
        tracing::debug!(%from, %to, amount = %amount.atto(), "transfer");
        Ok(ret)
    }

    /// Sets the allowance of `spender` over `owner`'s balance, returning the previous allowance
    pub fn approve(
        &self,
        owner: &Address,
        spender: &Address,
        amount: &TokenAmount,
    ) -> Result<TokenAmount> {
        let previous = self.write("approve", |token| token.set_allowance(owner, spender, amount))?;
        tracing::debug!(
            %owner,
            %spender,
            amount = %amount.atto(),
            previous = %previous.atto(),
            "approve"
        );
        Ok(previous)
    }

    /// Moves `amount` from `owner` to `to` on the authority of `spender`, consuming allowance
    pub fn transfer_from(
        &self,
        spender: &Address,
        owner: &Address,
        to: &Address,
        amount: &TokenAmount,
    ) -> Result<TransferFromReturn> {
        let ret = self.write("transfer_from", |token| {
            token.transfer_from(spender, owner, to, amount)
        })?;
        tracing::debug!(
            %spender,
            from = %owner,
            %to,
            amount = %amount.atto(),
            allowance = %ret.allowance.atto(),
            "transfer_from"
        );
        Ok(ret)
    }

    /// Adds to an allowance, returning the new allowance
    pub fn increase_allowance(
        &self,
        owner: &Address,
        spender: &Address,
        delta: &TokenAmount,
    ) -> Result<TokenAmount> {
        let allowance = self.write("increase_allowance", |token| {
            token.increase_allowance(owner, spender, delta)
        })?;
        tracing::debug!(%owner, %spender, allowance = %allowance.atto(), "increase_allowance");
        Ok(allowance)
    }

    /// Subtracts from an allowance, stopping at zero, and returns the new allowance
    pub fn decrease_allowance(
        &self,
        owner: &Address,
        spender: &Address,
        delta: &TokenAmount,
    ) -> Result<TokenAmount> {
        let allowance = self.write("decrease_allowance", |token| {
            token.decrease_allowance(owner, spender, delta)
        })?;
        tracing::debug!(%owner, %spender, allowance = %allowance.atto(), "decrease_allowance");
        Ok(allowance)
    }

    /// Removes an allowance, returning what it was
    pub fn revoke_allowance(&self, owner: &Address, spender: &Address) -> Result<TokenAmount> {
        let previous =
            self.write("revoke_allowance", |token| token.revoke_allowance(owner, spender))?;
        tracing::debug!(%owner, %spender, previous = %previous.atto(), "revoke_allowance");
        Ok(previous)
    }

    /// Writes the state root to the blockstore and returns its cid
    pub fn flush(&self) -> Result<Cid> {
        let root = self.read_state().save(&self.runtime)?;
        tracing::debug!(%root, "flushed token ledger");
        Ok(root)
    }

    /// Checks the invariants of the current state
    pub fn check_invariants(&self) -> std::result::Result<StateSummary, StateInvariantError> {
        self.snapshot().check_invariants(&self.runtime)
    }

    /// Like [`Ledger::check_invariants`], reporting a violation as a [`TokenError`]
    pub fn assert_invariants(&self) -> Result<StateSummary> {
        Ok(self.check_invariants()?)
    }

    fn read<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Token<&A, &BS>) -> Result<R>,
    {
        let mut snapshot = self.snapshot();
        let token = Token::wrap(self.runtime.by_ref(), &mut snapshot);
        f(&token)
    }

    fn write<F, R>(&self, operation: &'static str, f: F) -> Result<R>
    where
        F: FnOnce(&mut Token<&A, &BS>) -> Result<R>,
    {
        let mut state = self.write_state();
        let mut token = Token::wrap(self.runtime.by_ref(), &mut state);
        f(&mut token).map_err(|err| {
            tracing::debug!(operation, kind = ?err.kind(), error = %err, "rejected");
            err
        })
    }

    // a transaction only replaces the root once it has succeeded, so a poisoned root is intact
    fn read_state(&self) -> RwLockReadGuard<'_, TokenState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, TokenState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<A, BS> Erc20Token for Ledger<A, BS>
where
    A: AccountResolver,
    BS: Blockstore,
{
    type TokenError = TokenError;

    fn name(&self) -> String {
        self.metadata.name.clone()
    }

    fn symbol(&self) -> String {
        self.metadata.symbol.clone()
    }

    fn decimals(&self) -> DecimalsReturn {
        self.metadata.decimals
    }

    fn total_supply(&self) -> TotalSupplyReturn {
        Ledger::total_supply(self)
    }

    fn balance_of(&self, params: Address) -> Result<BalanceReturn> {
        Ledger::balance_of(self, &params)
    }

    fn allowance(&self, params: GetAllowanceParams) -> Result<AllowanceReturn> {
        Ledger::allowance(self, &params.owner, &params.spender)
    }

    fn transfer(&self, caller: &Address, params: TransferParams) -> Result<TransferReturn> {
        Ledger::transfer(self, caller, &params.to, &params.amount)
    }

    fn approve(&self, caller: &Address, params: ApproveParams) -> Result<ApproveReturn> {
        Ledger::approve(self, caller, &params.spender, &params.amount)
    }

    fn transfer_from(
        &self,
        caller: &Address,
        params: TransferFromParams,
    ) -> Result<TransferFromReturn> {
        Ledger::transfer_from(self, caller, &params.from, &params.to, &params.amount)
    }

    fn increase_allowance(
        &self,
        caller: &Address,
        params: IncreaseAllowanceParams,
    ) -> Result<IncreaseAllowanceReturn> {
        Ledger::increase_allowance(self, caller, &params.spender, &params.increase)
    }

    fn decrease_allowance(
        &self,
        caller: &Address,
        params: DecreaseAllowanceParams,
    ) -> Result<DecreaseAllowanceReturn> {
        Ledger::decrease_allowance(self, caller, &params.spender, &params.decrease)
    }

    fn revoke_allowance(
        &self,
        caller: &Address,
        params: RevokeAllowanceParams,
    ) -> Result<RevokeAllowanceReturn> {
        Ledger::revoke_allowance(self, caller, &params.spender)
    }
}

#[cfg(test)]
mod test {
    use std::thread;

    use fvm_ipld_encoding::RawBytes;
    use fvm_shared::address::Address;
    use fvm_shared::econ::TokenAmount;
    use ledger_utils::LedgerRuntime;
    use num_traits::Zero;

    use super::{Ledger, MemoryLedger, TokenMetadata};
    use crate::config::{ConfigError, TokenConfig};
    use crate::token::types::{
        ApproveParams, Erc20Token, GetAllowanceParams, TransferFromParams, TransferParams,
    };
    use crate::token::{ErrorKind, TokenError};

    const OWNER: &Address = &Address::new_id(100);
    const ALICE: &Address = &Address::new_id(101);
    const BOB: &Address = &Address::new_id(102);

    fn metadata() -> TokenMetadata {
        TokenMetadata { name: "Test Token".into(), symbol: "TT".into(), decimals: 18 }
    }

    fn new_ledger(supply: u64) -> MemoryLedger {
        Ledger::new(
            LedgerRuntime::new_memory_runtime(),
            metadata(),
            3,
            OWNER,
            &TokenAmount::from_atto(supply),
        )
        .unwrap()
    }

    #[test]
    fn it_creates_ledger_from_config() {
        let config = TokenConfig::from_json(
            r#"{
                "name": "Topcoder Coin",
                "symbol": "TCC",
                "decimals": 18,
                "initial_supply": "1000000000000000000000000000",
                "owner": "f0100",
                "hamt_bit_width": 5
            }"#,
        )
        .unwrap();
        let ledger = Ledger::genesis(LedgerRuntime::new_memory_runtime(), &config).unwrap();

        assert_eq!(ledger.name(), "Topcoder Coin");
        assert_eq!(ledger.symbol(), "TCC");
        assert_eq!(ledger.decimals(), 18);
        assert_eq!(ledger.total_supply(), TokenAmount::from_whole(1_000_000_000));
        assert_eq!(ledger.balance_of(OWNER).unwrap(), TokenAmount::from_whole(1_000_000_000));
        assert_eq!(ledger.balance_of(ALICE).unwrap(), TokenAmount::zero());
        assert_eq!(ledger.snapshot().hamt_bit_width(), 5);
        ledger.assert_invariants().unwrap();
    }

    #[test]
    fn it_refuses_genesis_for_undefined_owners() {
        let config = TokenConfig {
            name: "Test Token".into(),
            symbol: "TT".into(),
            decimals: 18,
            initial_supply: "100".into(),
            owner: Address::new_actor(b"token").to_string(),
            hamt_bit_width: 3,
        };
        let err = Ledger::genesis(LedgerRuntime::new_memory_runtime(), &config).err().unwrap();
        match err {
            ConfigError::Genesis(err) => assert_eq!(err.kind(), ErrorKind::InvalidArgument),
            e => panic!("unexpected error {e:?}"),
        }
    }

    #[test]
    fn it_refuses_out_of_range_bit_widths() {
        for width in [0, 9] {
            let supply = TokenAmount::from_atto(100);
            let runtime = LedgerRuntime::new_memory_runtime();
            let err = Ledger::new(runtime, metadata(), width, OWNER, &supply).err().unwrap();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        }
    }

    #[test]
    fn it_transfers_and_approves() {
        let ledger = new_ledger(1_000);

        let ret = ledger.transfer(OWNER, ALICE, &TokenAmount::from_atto(300)).unwrap();
        assert_eq!(ret.from_balance, TokenAmount::from_atto(700));
        assert_eq!(ret.to_balance, TokenAmount::from_atto(300));

        let previous = ledger.approve(ALICE, BOB, &TokenAmount::from_atto(100)).unwrap();
        assert_eq!(previous, TokenAmount::zero());
        let previous = ledger.approve(ALICE, BOB, &TokenAmount::from_atto(200)).unwrap();
        assert_eq!(previous, TokenAmount::from_atto(100));

        let ret = ledger.transfer_from(BOB, ALICE, OWNER, &TokenAmount::from_atto(200)).unwrap();
        assert_eq!(ret.allowance, TokenAmount::zero());
        assert_eq!(ret.from_balance, TokenAmount::from_atto(100));
        assert_eq!(ret.to_balance, TokenAmount::from_atto(900));

        let err = ledger.transfer_from(BOB, ALICE, OWNER, &TokenAmount::from_atto(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientAllowance);
        let err = ledger.transfer(ALICE, BOB, &TokenAmount::from_atto(101)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientBalance);

        assert_eq!(ledger.total_supply(), TokenAmount::from_atto(1_000));
        assert_eq!(ledger.holder_count().unwrap(), 2);
        ledger.assert_invariants().unwrap();
    }

    #[test]
    fn it_adjusts_allowances() {
        let ledger = new_ledger(1_000);

        let allowance = ledger.increase_allowance(OWNER, ALICE, &TokenAmount::from_atto(10)).unwrap();
        assert_eq!(allowance, TokenAmount::from_atto(10));
        let allowance = ledger.increase_allowance(OWNER, ALICE, &TokenAmount::from_atto(5)).unwrap();
        assert_eq!(allowance, TokenAmount::from_atto(15));
        let allowance = ledger.decrease_allowance(OWNER, ALICE, &TokenAmount::from_atto(20)).unwrap();
        assert_eq!(allowance, TokenAmount::zero());

        ledger.approve(OWNER, ALICE, &TokenAmount::from_atto(7)).unwrap();
        assert_eq!(ledger.revoke_allowance(OWNER, ALICE).unwrap(), TokenAmount::from_atto(7));
        assert_eq!(ledger.allowance(OWNER, ALICE).unwrap(), TokenAmount::zero());
    }

    #[test]
    fn it_reloads_flushed_state() {
        let runtime = LedgerRuntime::new_memory_runtime();
        let blockstore = runtime.blockstore.clone();
        let ledger =
            Ledger::new(runtime, metadata(), 3, OWNER, &TokenAmount::from_atto(500)).unwrap();
        ledger.transfer(OWNER, ALICE, &TokenAmount::from_atto(125)).unwrap();
        ledger.approve(ALICE, BOB, &TokenAmount::from_atto(25)).unwrap();
        let root = ledger.flush().unwrap();

        // a second ledger over the same blocks
        let restored = Ledger::load(
            LedgerRuntime::new(ledger_utils::MemoryAccountRegistry::new(), blockstore),
            metadata(),
            &root,
        )
        .unwrap();
        assert_eq!(restored.total_supply(), TokenAmount::from_atto(500));
        assert_eq!(restored.balance_of(ALICE).unwrap(), TokenAmount::from_atto(125));
        assert_eq!(restored.allowance(ALICE, BOB).unwrap(), TokenAmount::from_atto(25));
        assert_eq!(restored.snapshot(), ledger.snapshot());
    }

    #[test]
    fn it_serves_calls_through_the_token_interface() {
        let ledger = new_ledger(1_000);
        let token: &dyn Erc20Token<TokenError = TokenError> = &ledger;

        assert_eq!(token.name(), "Test Token");
        assert_eq!(token.symbol(), "TT");
        assert_eq!(token.decimals(), 18);

        // params arrive encoded from the host
        let params = RawBytes::serialize(TransferParams {
            to: *ALICE,
            amount: TokenAmount::from_atto(40),
        })
        .unwrap();
        let params: TransferParams = params.deserialize().unwrap();
        let ret = token.transfer(OWNER, params).unwrap();
        assert_eq!(ret.to_balance, TokenAmount::from_atto(40));

        token.approve(ALICE, ApproveParams { spender: *BOB, amount: TokenAmount::from_atto(30) }).unwrap();
        let ret = token
            .transfer_from(
                BOB,
                TransferFromParams { from: *ALICE, to: *BOB, amount: TokenAmount::from_atto(10) },
            )
            .unwrap();
        assert_eq!(ret.allowance, TokenAmount::from_atto(20));
        assert_eq!(
            token.allowance(GetAllowanceParams { owner: *ALICE, spender: *BOB }).unwrap(),
            TokenAmount::from_atto(20)
        );
        assert_eq!(token.balance_of(*BOB).unwrap(), TokenAmount::from_atto(10));
        assert_eq!(token.total_supply(), TokenAmount::from_atto(1_000));
    }

    #[test]
    fn it_serializes_concurrent_transfers() {
        let ledger = new_ledger(10_000);
        let holders: Vec<Address> = (200..210).map(Address::new_id).collect();

        thread::scope(|s| {
            for holder in &holders {
                let ledger = &ledger;
                s.spawn(move || {
                    for _ in 0..10 {
                        ledger.transfer(OWNER, holder, &TokenAmount::from_atto(10)).unwrap();

                        // reads never observe a half applied transfer
                        let snapshot = ledger.snapshot();
                        let bs = ledger.runtime().bs();
                        let mut held = snapshot.get_balance(bs, 100).unwrap();
                        for id in 200..210 {
                            held += snapshot.get_balance(bs, id).unwrap();
                        }
                        assert_eq!(held, TokenAmount::from_atto(10_000));
                        let summary = ledger.check_invariants().unwrap();
                        assert_eq!(summary.total_supply, TokenAmount::from_atto(10_000));
                    }
                });
            }
        });

        assert_eq!(ledger.balance_of(OWNER).unwrap(), TokenAmount::from_atto(9_000));
        for holder in &holders {
            assert_eq!(ledger.balance_of(holder).unwrap(), TokenAmount::from_atto(100));
        }
        ledger.assert_invariants().unwrap();
    }
}
