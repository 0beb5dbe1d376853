use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::Result;
use cid::Cid;

/// A thread-safe in-memory blockstore.
///
/// Clones of it reference the same underlying block map, so a ledger and the threads reading
/// from it can share one store.
#[derive(Debug, Clone, Default)]
pub struct SharedMemoryBlockstore {
    blocks: Arc<RwLock<HashMap<Cid, Vec<u8>>>>,
}

impl SharedMemoryBlockstore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blocks held
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // blocks are written with a single insert, a poisoned lock cannot hide a partial write
    fn read(&self) -> RwLockReadGuard<'_, HashMap<Cid, Vec<u8>>> {
        self.blocks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Cid, Vec<u8>>> {
        self.blocks.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fvm_ipld_blockstore::Blockstore for SharedMemoryBlockstore {
    fn get(&self, k: &Cid) -> Result<Option<Vec<u8>>> {
        Ok(self.read().get(k).cloned())
    }

    /// Put a block with a pre-computed cid.
    ///
    /// Blocks are content-addressed, so re-inserting an existing cid replaces it with identical data.
    fn put_keyed(&self, k: &Cid, block: &[u8]) -> Result<()> {
        self.write().insert(*k, block.to_vec());
        Ok(())
    }

    fn has(&self, k: &Cid) -> Result<bool> {
        Ok(self.read().contains_key(k))
    }
}

#[cfg(test)]
mod test {
    use cid::multihash::Code;
    use fvm_ipld_blockstore::{Block, Blockstore};
    use fvm_ipld_encoding::DAG_CBOR;

    use super::SharedMemoryBlockstore;

    #[test]
    fn clones_share_blocks() {
        let bs = SharedMemoryBlockstore::new();
        let other = bs.clone();

        let cid = bs.put(Code::Blake2b256, &Block::new(DAG_CBOR, b"ledger".as_slice())).unwrap();

        assert!(other.has(&cid).unwrap());
        assert_eq!(other.get(&cid).unwrap().unwrap(), b"ledger".to_vec());
        assert_eq!(other.len(), 1);
    }

    #[test]
    fn blocks_are_visible_across_threads() {
        let bs = SharedMemoryBlockstore::new();

        let cids: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0u8..4)
                .map(|i| {
                    let bs = bs.clone();
                    s.spawn(move || {
                        bs.put(Code::Blake2b256, &Block::new(DAG_CBOR, vec![i; 8])).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(bs.len(), 4);
        for cid in cids {
            assert!(bs.has(&cid).unwrap());
        }
    }
}
