pub mod accounts;
pub mod runtime;
pub mod shared_blockstore;

pub use accounts::{AccountError, AccountResolver, MemoryAccountRegistry};
pub use runtime::LedgerRuntime;
pub use shared_blockstore::SharedMemoryBlockstore;
