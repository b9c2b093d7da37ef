//! In-memory block store for deterministic testing.
//!
//! Blocks live in a `HashMap`. Read and write failures can be injected at
//! configurable rates, driven by a seeded RNG so the same seed reproduces the
//! same sequence of faults.

use std::collections::{HashMap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::storage::block::{BlockId, pad_to_block};
use crate::storage::io::{BlockStore, StorageError};

/// Configuration for fault injection.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaultConfig {
    /// Probability of a read error (0.0 - 1.0).
    pub read_error_rate: f64,
    /// Probability of a write error (0.0 - 1.0).
    pub write_error_rate: f64,
}

impl FaultConfig {
    /// Create a fault config with no faults.
    #[must_use]
    pub fn no_faults() -> Self {
        Self::default()
    }

    /// Fail every read.
    #[must_use]
    pub const fn failing_reads() -> Self {
        Self {
            read_error_rate: 1.0,
            write_error_rate: 0.0,
        }
    }

    /// Fail every write.
    #[must_use]
    pub const fn failing_writes() -> Self {
        Self {
            read_error_rate: 0.0,
            write_error_rate: 1.0,
        }
    }
}

/// Statistics about in-memory store operations.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemoryStoreStats {
    /// Number of block reads.
    pub reads: u64,
    /// Number of block writes.
    pub writes: u64,
    /// Number of allocations.
    pub allocations: u64,
    /// Number of deallocations.
    pub deallocations: u64,
    /// Number of injected read errors.
    pub injected_read_errors: u64,
    /// Number of injected write errors.
    pub injected_write_errors: u64,
}

/// In-memory block store.
///
/// # Thread Safety
///
/// Not thread-safe. The tree handle owns its store exclusively.
#[derive(Debug)]
pub struct MemoryBlockStore {
    block_size: usize,
    /// Written blocks, always exactly `block_size` bytes.
    blocks: HashMap<BlockId, Vec<u8>>,
    next_block_id: BlockId,
    deallocated: HashSet<BlockId>,
    root: Option<BlockId>,

    fault_config: FaultConfig,
    rng: StdRng,

    stats: MemoryStoreStats,
}

impl MemoryBlockStore {
    /// Create an empty store without fault injection.
    #[must_use]
    pub fn new(block_size: usize) -> Self {
        Self::with_faults(block_size, 0, FaultConfig::no_faults())
    }

    /// Create an empty store with fault injection seeded by `seed`.
    #[must_use]
    pub fn with_faults(block_size: usize, seed: u64, fault_config: FaultConfig) -> Self {
        Self {
            block_size,
            blocks: HashMap::new(),
            next_block_id: 0,
            deallocated: HashSet::new(),
            root: None,
            fault_config,
            rng: StdRng::seed_from_u64(seed),
            stats: MemoryStoreStats::default(),
        }
    }

    /// Get the current statistics.
    #[must_use]
    pub const fn stats(&self) -> &MemoryStoreStats {
        &self.stats
    }

    /// Reset statistics.
    pub fn reset_stats(&mut self) {
        self.stats = MemoryStoreStats::default();
    }

    /// Update the fault configuration.
    pub const fn set_fault_config(&mut self, config: FaultConfig) {
        self.fault_config = config;
    }

    /// Number of blocks that are allocated and not deallocated.
    #[must_use]
    pub fn live_blocks(&self) -> usize {
        self.next_block_id as usize - self.deallocated.len()
    }

    fn should_inject_fault(&mut self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        self.rng.random::<f64>() < rate
    }

    fn check_live(&self, block_id: BlockId) -> Result<(), StorageError> {
        if block_id >= self.next_block_id || self.deallocated.contains(&block_id) {
            return Err(StorageError::BlockNotFound {
                block_id,
                next_block_id: self.next_block_id,
            });
        }
        Ok(())
    }
}

impl BlockStore for MemoryBlockStore {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn next_block_id(&self) -> BlockId {
        self.next_block_id
    }

    fn allocate(&mut self) -> Result<BlockId, StorageError> {
        let block_id = self.next_block_id;
        self.next_block_id = block_id
            .checked_add(1)
            .ok_or(StorageError::AddressSpaceExhausted)?;
        self.stats.allocations += 1;
        Ok(block_id)
    }

    fn read(&mut self, block_id: BlockId) -> Result<Vec<u8>, StorageError> {
        self.stats.reads += 1;
        self.check_live(block_id)?;

        if self.should_inject_fault(self.fault_config.read_error_rate) {
            self.stats.injected_read_errors += 1;
            return Err(StorageError::InjectedFault(format!(
                "simulated read error on block {block_id}"
            )));
        }

        self.blocks
            .get(&block_id)
            .cloned()
            .ok_or(StorageError::BlockNotFound {
                block_id,
                next_block_id: self.next_block_id,
            })
    }

    fn write(&mut self, block_id: BlockId, data: &[u8]) -> Result<(), StorageError> {
        self.stats.writes += 1;
        let block = pad_to_block(data, self.block_size)?;
        self.check_live(block_id)?;

        if self.should_inject_fault(self.fault_config.write_error_rate) {
            self.stats.injected_write_errors += 1;
            return Err(StorageError::InjectedFault(format!(
                "simulated write error on block {block_id}"
            )));
        }

        self.blocks.insert(block_id, block);
        Ok(())
    }

    fn deallocate(&mut self, block_id: BlockId) -> Result<(), StorageError> {
        self.check_live(block_id)?;
        self.deallocated.insert(block_id);
        self.blocks.remove(&block_id);
        self.stats.deallocations += 1;
        Ok(())
    }

    fn root(&self) -> Option<BlockId> {
        self.root
    }

    fn set_root(&mut self, root: Option<BlockId>) -> Result<(), StorageError> {
        self.root = root;
        Ok(())
    }

    fn sync(&mut self) -> Result<(), StorageError> {
        // Writes are already "durable".
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_monotonic() {
        let mut store = MemoryBlockStore::new(64);
        assert_eq!(store.allocate().expect("allocate"), 0);
        assert_eq!(store.allocate().expect("allocate"), 1);
        assert_eq!(store.next_block_id(), 2);
        assert_eq!(store.stats().allocations, 2);

        store.reset_stats();
        assert_eq!(store.stats(), &MemoryStoreStats::default());
        assert_eq!(store.allocate().expect("allocate"), 2);
        assert_eq!(store.stats().allocations, 1);
    }

    #[test]
    fn test_write_and_read() {
        let mut store = MemoryBlockStore::new(8);
        let id = store.allocate().expect("allocate");
        store.write(id, b"abc").expect("write");

        let data = store.read(id).expect("read");
        assert_eq!(data, vec![b'a', b'b', b'c', 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_read_never_allocated() {
        let mut store = MemoryBlockStore::new(8);
        assert!(matches!(
            store.read(0),
            Err(StorageError::BlockNotFound {
                block_id: 0,
                next_block_id: 0
            })
        ));
    }

    #[test]
    fn test_read_allocated_but_unwritten() {
        let mut store = MemoryBlockStore::new(8);
        let id = store.allocate().expect("allocate");
        assert!(matches!(
            store.read(id),
            Err(StorageError::BlockNotFound { .. })
        ));
    }

    #[test]
    fn test_write_unallocated_block() {
        let mut store = MemoryBlockStore::new(8);
        assert!(matches!(
            store.write(3, b"x"),
            Err(StorageError::BlockNotFound { block_id: 3, .. })
        ));
    }

    #[test]
    fn test_oversized_payload() {
        let mut store = MemoryBlockStore::new(8);
        let id = store.allocate().expect("allocate");
        assert!(matches!(
            store.write(id, &[0u8; 9]),
            Err(StorageError::OversizedPayload {
                len: 9,
                block_size: 8
            })
        ));
    }

    #[test]
    fn test_deallocate() {
        let mut store = MemoryBlockStore::new(8);
        let a = store.allocate().expect("allocate");
        let b = store.allocate().expect("allocate");
        store.write(a, b"a").expect("write");
        store.write(b, b"b").expect("write");

        store.deallocate(a).expect("deallocate");
        assert_eq!(store.live_blocks(), 1);
        assert_eq!(store.stats().deallocations, 1);
        assert!(matches!(
            store.read(a),
            Err(StorageError::BlockNotFound { .. })
        ));
        assert!(store.read(b).is_ok());
        assert_eq!(store.allocate().expect("allocate"), 2);
    }

    #[test]
    fn test_root_pointer() {
        let mut store = MemoryBlockStore::new(8);
        assert_eq!(store.root(), None);
        store.set_root(Some(4)).expect("set root");
        assert_eq!(store.root(), Some(4));
    }

    #[test]
    fn test_injected_read_fault() {
        let mut store = MemoryBlockStore::with_faults(8, 7, FaultConfig::failing_reads());
        let id = store.allocate().expect("allocate");
        store.write(id, b"x").expect("write");

        assert!(matches!(store.read(id), Err(StorageError::InjectedFault(_))));
        assert_eq!(store.stats().injected_read_errors, 1);

        store.set_fault_config(FaultConfig::no_faults());
        assert!(store.read(id).is_ok());
    }

    #[test]
    fn test_injected_write_fault_leaves_block_untouched() {
        let mut store = MemoryBlockStore::new(8);
        let id = store.allocate().expect("allocate");
        store.write(id, b"old").expect("write");

        store.set_fault_config(FaultConfig::failing_writes());
        assert!(matches!(
            store.write(id, b"new"),
            Err(StorageError::InjectedFault(_))
        ));
        assert_eq!(store.stats().injected_write_errors, 1);

        store.set_fault_config(FaultConfig::no_faults());
        assert_eq!(&store.read(id).expect("read")[..3], b"old");
    }

    #[test]
    fn test_fault_sequence_is_deterministic() {
        let config = FaultConfig {
            read_error_rate: 0.5,
            write_error_rate: 0.0,
        };

        let run = |seed: u64| {
            let mut store = MemoryBlockStore::with_faults(8, seed, config);
            let id = store.allocate().expect("allocate");
            store.write(id, b"x").expect("write");
            (0..32).map(|_| store.read(id).is_ok()).collect::<Vec<_>>()
        };

        assert_eq!(run(99), run(99));
    }
}
