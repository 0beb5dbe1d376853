use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use fvm_shared::address::{Address, Payload};
use fvm_shared::ActorID;
use thiserror::Error;

/// First id handed out by a [`MemoryAccountRegistry`] to newly initialized accounts.
///
/// Ids below this value are left for ID addresses chosen directly by the host.
pub const FIRST_ACCOUNT_ID: ActorID = 100;

pub type Result<T> = std::result::Result<T, AccountError>;

#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum AccountError {
    #[error("address could not be resolved: `{0}`")]
    AddressNotResolved(Address),
    #[error("address could not be initialized: `{0}`")]
    AddressNotInitialized(Address),
}

/// Maps opaque account addresses onto the numeric ids the ledger stores balances under
pub trait AccountResolver {
    /// Resolves the id of an account.
    ///
    /// Returns None if the address is unknown. ID addresses always resolve to their own id.
    fn resolve_address(&self, address: &Address) -> Option<ActorID>;

    /// Resolves the id of an account, creating the account first if the address is unknown
    ///
    /// Returns AccountError::AddressNotInitialized if no account can exist at this address.
    fn initialize_account(&self, address: &Address) -> Result<ActorID>;

    /// Whether an account exists at `address` or could be created there on demand
    ///
    /// Must not create anything. An address for which this is false is undefined.
    fn can_initialize(&self, address: &Address) -> bool;
}

impl<T: AccountResolver + ?Sized> AccountResolver for &T {
    fn resolve_address(&self, address: &Address) -> Option<ActorID> {
        (**self).resolve_address(address)
    }

    fn initialize_account(&self, address: &Address) -> Result<ActorID> {
        (**self).initialize_account(address)
    }

    fn can_initialize(&self, address: &Address) -> bool {
        (**self).can_initialize(address)
    }
}

impl<T: AccountResolver + ?Sized> AccountResolver for Arc<T> {
    fn resolve_address(&self, address: &Address) -> Option<ActorID> {
        (**self).resolve_address(address)
    }

    fn initialize_account(&self, address: &Address) -> Result<ActorID> {
        (**self).initialize_account(address)
    }

    fn can_initialize(&self, address: &Address) -> bool {
        (**self).can_initialize(address)
    }
}

#[derive(Debug)]
struct Accounts {
    /// Addresses that were initialized or registered in this registry
    addresses: HashMap<Address, ActorID>,
    /// The next id to allocate
    next_account_id: ActorID,
}

/// In-memory, thread-safe [`AccountResolver`]
///
/// Public-key addresses (secp256k1 and BLS) are allocated a fresh id on first use. Actor and
/// delegated addresses can only be resolved once the host has bound them with [`register`].
///
/// [`register`]: MemoryAccountRegistry::register
#[derive(Debug)]
pub struct MemoryAccountRegistry {
    accounts: RwLock<Accounts>,
}

impl MemoryAccountRegistry {
    pub fn new() -> Self {
        Self::with_first_id(FIRST_ACCOUNT_ID)
    }

    pub fn with_first_id(first_id: ActorID) -> Self {
        Self {
            accounts: RwLock::new(Accounts {
                addresses: HashMap::new(),
                next_account_id: first_id,
            }),
        }
    }

    /// Binds an address to an existing id, returning the id it was previously bound to
    pub fn register(&self, address: Address, id: ActorID) -> Option<ActorID> {
        self.write().addresses.insert(address, id)
    }

    /// Number of non-ID addresses known to the registry
    pub fn len(&self) -> usize {
        self.read().addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // allocation never leaves the map half-written, so a poisoned lock is still consistent
    fn read(&self) -> RwLockReadGuard<'_, Accounts> {
        self.accounts.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Accounts> {
        self.accounts.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryAccountRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AccountResolver for MemoryAccountRegistry {
    fn resolve_address(&self, address: &Address) -> Option<ActorID> {
        if let Payload::ID(id) = address.payload() {
            return Some(*id);
        }
        self.read().addresses.get(address).copied()
    }

    fn initialize_account(&self, address: &Address) -> Result<ActorID> {
        match address.payload() {
            Payload::ID(id) => Ok(*id),
            Payload::Secp256k1(_) | Payload::BLS(_) => {
                let mut accounts = self.write();
                if let Some(id) = accounts.addresses.get(address) {
                    return Ok(*id);
                }
                let id = accounts.next_account_id;
                accounts.next_account_id += 1;
                accounts.addresses.insert(*address, id);
                tracing::debug!(%address, id, "initialized account");
                Ok(id)
            }
            _ => self
                .resolve_address(address)
                .ok_or(AccountError::AddressNotInitialized(*address)),
        }
    }

    fn can_initialize(&self, address: &Address) -> bool {
        match address.payload() {
            Payload::ID(_) | Payload::Secp256k1(_) | Payload::BLS(_) => true,
            _ => self.resolve_address(address).is_some(),
        }
    }
}

#[cfg(test)]
mod test {
    use fvm_shared::address::{Address, BLS_PUB_LEN};

    use super::{AccountError, AccountResolver, MemoryAccountRegistry, FIRST_ACCOUNT_ID};

    fn secp_address() -> Address {
        let key = vec![0; 65];
        Address::new_secp256k1(key.as_slice()).unwrap()
    }

    fn bls_address() -> Address {
        let key = vec![0; BLS_PUB_LEN];
        Address::new_bls(key.as_slice()).unwrap()
    }

    #[test]
    fn it_resolves_id_addresses_directly() {
        let registry = MemoryAccountRegistry::new();
        assert_eq!(registry.resolve_address(&Address::new_id(7)), Some(7));
        assert_eq!(registry.initialize_account(&Address::new_id(7)).unwrap(), 7);
        // id addresses are never stored
        assert!(registry.is_empty());
    }

    #[test]
    fn it_allocates_ids_for_public_key_addresses() {
        let registry = MemoryAccountRegistry::new();
        let secp = secp_address();
        let bls = bls_address();

        assert_eq!(registry.resolve_address(&secp), None);
        let secp_id = registry.initialize_account(&secp).unwrap();
        assert_eq!(secp_id, FIRST_ACCOUNT_ID);
        // initializing again is idempotent
        assert_eq!(registry.initialize_account(&secp).unwrap(), secp_id);

        let bls_id = registry.initialize_account(&bls).unwrap();
        assert_eq!(bls_id, FIRST_ACCOUNT_ID + 1);
        assert_eq!(registry.resolve_address(&bls), Some(bls_id));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn it_refuses_to_initialize_actor_addresses() {
        let registry = MemoryAccountRegistry::with_first_id(1000);
        let actor = Address::new_actor(b"token");

        assert!(!registry.can_initialize(&actor));
        let err = registry.initialize_account(&actor).unwrap_err();
        assert_eq!(err, AccountError::AddressNotInitialized(actor));

        // once the host binds the address it resolves like any other
        assert_eq!(registry.register(actor, 42), None);
        assert!(registry.can_initialize(&actor));
        assert_eq!(registry.initialize_account(&actor).unwrap(), 42);
        assert_eq!(registry.resolve_address(&actor), Some(42));
    }

    #[test]
    fn it_reports_initializable_addresses_without_allocating() {
        let registry = MemoryAccountRegistry::new();
        assert!(registry.can_initialize(&Address::new_id(3)));
        assert!(registry.can_initialize(&secp_address()));
        assert!(registry.can_initialize(&bls_address()));
        assert!(registry.is_empty());
        assert_eq!(registry.resolve_address(&secp_address()), None);
    }
}
