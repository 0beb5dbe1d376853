use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use fvm_shared::address::Address;
use fvm_shared::ActorID;

use crate::accounts::{AccountError, AccountResolver, MemoryAccountRegistry, Result};
use crate::shared_blockstore::SharedMemoryBlockstore;

/// LedgerRuntime bundles the services a ledger needs from its host: account resolution and a
/// blockstore for the state tree
#[derive(Clone, Debug)]
pub struct LedgerRuntime<A: AccountResolver, BS: Blockstore> {
    pub accounts: A,
    pub blockstore: BS,
}

impl LedgerRuntime<MemoryAccountRegistry, SharedMemoryBlockstore> {
    /// Creates a runtime backed entirely by memory, suitable for tests and embedding
    pub fn new_memory_runtime() -> Self {
        Self { accounts: MemoryAccountRegistry::new(), blockstore: SharedMemoryBlockstore::new() }
    }
}

impl<A: AccountResolver, BS: Blockstore> LedgerRuntime<A, BS> {
    pub fn new(accounts: A, blockstore: BS) -> Self {
        Self { accounts, blockstore }
    }

    /// Borrows both services, producing a runtime that can be handed out without moving self
    pub fn by_ref(&self) -> LedgerRuntime<&A, &BS> {
        LedgerRuntime { accounts: &self.accounts, blockstore: &self.blockstore }
    }

    /// Attempts to resolve the given address to its account id
    ///
    /// Returns AccountError::AddressNotResolved if the address could not be resolved
    pub fn resolve_id(&self, address: &Address) -> Result<ActorID> {
        self.accounts.resolve_address(address).ok_or(AccountError::AddressNotResolved(*address))
    }

    /// Resolves an address to an account id, initializing an account there if it doesn't exist
    ///
    /// If the account cannot be created, this function returns AccountError::AddressNotInitialized
    pub fn resolve_or_init(&self, address: &Address) -> Result<ActorID> {
        match self.resolve_id(address) {
            Ok(id) => Ok(id),
            Err(AccountError::AddressNotResolved(_)) => self.accounts.initialize_account(address),
            Err(e) => Err(e),
        }
    }

    /// Resolves an address without creating an account there
    ///
    /// Returns None for an address that has not been seen yet but could be initialized, and
    /// AccountError::AddressNotInitialized for an address where no account can ever exist.
    pub fn resolve_existing(&self, address: &Address) -> Result<Option<ActorID>> {
        match self.accounts.resolve_address(address) {
            Some(id) => Ok(Some(id)),
            None if self.accounts.can_initialize(address) => Ok(None),
            None => Err(AccountError::AddressNotInitialized(*address)),
        }
    }

    pub fn bs(&self) -> &BS {
        &self.blockstore
    }
}

/// Convenience impl encapsulating the blockstore functionality
impl<A: AccountResolver, BS: Blockstore> Blockstore for LedgerRuntime<A, BS> {
    fn get(&self, k: &Cid) -> anyhow::Result<Option<Vec<u8>>> {
        self.blockstore.get(k)
    }

    fn put_keyed(&self, k: &Cid, block: &[u8]) -> anyhow::Result<()> {
        self.blockstore.put_keyed(k, block)
    }

    fn has(&self, k: &Cid) -> anyhow::Result<bool> {
        self.blockstore.has(k)
    }
}
