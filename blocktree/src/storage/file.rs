//! File-backed block store.
//!
//! The file starts with a fixed `HEADER_SIZE`-byte header followed by the
//! blocks, so block `i` lives at `HEADER_SIZE + i * block_size`.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::storage::block::{BlockId, pad_to_block};
use crate::storage::header::{FileHeader, HEADER_SIZE};
use crate::storage::io::{BlockStore, StorageError};

/// A block store backed by a single file.
#[derive(Debug)]
pub struct FileBlockStore {
    file: File,
    path: PathBuf,
    header: FileHeader,
    block_size: usize,
    /// Blocks deallocated during this session. Not persisted.
    deallocated: HashSet<BlockId>,
    /// Blocks allocated during this session and not yet written.
    unwritten: HashSet<BlockId>,
}

impl FileBlockStore {
    /// Create a new block file at the given path.
    ///
    /// Returns an error if the file already exists.
    pub fn create(path: &Path, block_size: usize) -> Result<Self, StorageError> {
        if path.exists() {
            return Err(StorageError::AlreadyExists(path.to_path_buf()));
        }
        let stored_block_size = encode_block_size(block_size)?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        let header = FileHeader::new(stored_block_size);
        file.write_all(&header.to_bytes())?;
        file.sync_all()?;

        tracing::info!(
            "Created block file {} (block size {block_size})",
            path.display()
        );

        Ok(Self {
            file,
            path: path.to_path_buf(),
            header,
            block_size,
            deallocated: HashSet::new(),
            unwritten: HashSet::new(),
        })
    }

    /// Open an existing block file.
    ///
    /// Fails with `BlockSizeMismatch` if the file was created with a
    /// different block size.
    pub fn open(path: &Path, block_size: usize) -> Result<Self, StorageError> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        let mut buf = [0u8; HEADER_SIZE];
        file.read_exact(&mut buf)?;
        let header =
            FileHeader::from_bytes(&buf).map_err(|e| StorageError::CorruptHeader(e.to_string()))?;

        let stored = header.block_size as usize;
        if stored != block_size {
            return Err(StorageError::BlockSizeMismatch {
                stored,
                requested: block_size,
            });
        }

        tracing::info!(
            "Opened block file {} ({} blocks allocated)",
            path.display(),
            header.next_block_id
        );

        Ok(Self {
            file,
            path: path.to_path_buf(),
            header,
            block_size,
            deallocated: HashSet::new(),
            unwritten: HashSet::new(),
        })
    }

    /// Open the file if it exists, otherwise create it.
    pub fn open_or_create(path: &Path, block_size: usize) -> Result<Self, StorageError> {
        if path.exists() {
            Self::open(path, block_size)
        } else {
            Self::create(path, block_size)
        }
    }

    /// Path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get a reference to the header.
    #[must_use]
    pub const fn header(&self) -> &FileHeader {
        &self.header
    }

    fn block_offset(&self, block_id: BlockId) -> u64 {
        HEADER_SIZE as u64 + u64::from(block_id) * self.block_size as u64
    }

    fn write_header(&mut self) -> Result<(), StorageError> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&self.header.to_bytes())?;
        Ok(())
    }

    /// Fail with `BlockNotFound` unless the block is allocated and live.
    fn check_live(&self, block_id: BlockId) -> Result<(), StorageError> {
        if block_id >= self.header.next_block_id || self.deallocated.contains(&block_id) {
            return Err(StorageError::BlockNotFound {
                block_id,
                next_block_id: self.header.next_block_id,
            });
        }
        Ok(())
    }
}

fn encode_block_size(block_size: usize) -> Result<u32, StorageError> {
    u32::try_from(block_size)
        .ok()
        .filter(|&size| size > 0)
        .ok_or_else(|| {
            StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("unsupported block size: {block_size}"),
            ))
        })
}

impl BlockStore for FileBlockStore {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn next_block_id(&self) -> BlockId {
        self.header.next_block_id
    }

    fn allocate(&mut self) -> Result<BlockId, StorageError> {
        let block_id = self.header.next_block_id;
        self.header.next_block_id = block_id
            .checked_add(1)
            .ok_or(StorageError::AddressSpaceExhausted)?;
        self.write_header()?;
        self.unwritten.insert(block_id);
        Ok(block_id)
    }

    fn read(&mut self, block_id: BlockId) -> Result<Vec<u8>, StorageError> {
        self.check_live(block_id)?;

        let offset = self.block_offset(block_id);
        let file_len = self.file.metadata()?.len();
        // Allocated but never written. Blocks allocated before a reopen are
        // only caught past the end of the file.
        if self.unwritten.contains(&block_id) || offset + self.block_size as u64 > file_len {
            return Err(StorageError::BlockNotFound {
                block_id,
                next_block_id: self.header.next_block_id,
            });
        }

        let mut data = vec![0u8; self.block_size];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut data)?;
        Ok(data)
    }

    fn write(&mut self, block_id: BlockId, data: &[u8]) -> Result<(), StorageError> {
        let block = pad_to_block(data, self.block_size)?;
        self.check_live(block_id)?;

        let offset = self.block_offset(block_id);
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&block)?;
        self.unwritten.remove(&block_id);
        Ok(())
    }

    fn deallocate(&mut self, block_id: BlockId) -> Result<(), StorageError> {
        self.check_live(block_id)?;
        self.deallocated.insert(block_id);
        self.unwritten.remove(&block_id);
        Ok(())
    }

    fn root(&self) -> Option<BlockId> {
        self.header.root_block
    }

    fn set_root(&mut self, root: Option<BlockId>) -> Result<(), StorageError> {
        self.header.root_block = root;
        self.write_header()
    }

    fn sync(&mut self) -> Result<(), StorageError> {
        self.file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_create_and_open() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.dat");

        {
            let store = FileBlockStore::create(&path, 256).expect("create store");
            assert_eq!(store.block_size(), 256);
            assert_eq!(store.next_block_id(), 0);
            assert_eq!(store.root(), None);
        }

        {
            let store = FileBlockStore::open(&path, 256).expect("open store");
            assert_eq!(store.block_size(), 256);
            assert_eq!(store.next_block_id(), 0);
        }
    }

    #[test]
    fn test_create_already_exists() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.dat");
        fs::write(&path, b"existing").expect("write file");

        let result = FileBlockStore::create(&path, 256);
        assert!(matches!(result, Err(StorageError::AlreadyExists(_))));
    }

    #[test]
    fn test_open_block_size_mismatch() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.dat");
        drop(FileBlockStore::create(&path, 256).expect("create store"));

        let result = FileBlockStore::open(&path, 512);
        assert!(matches!(
            result,
            Err(StorageError::BlockSizeMismatch {
                stored: 256,
                requested: 512
            })
        ));
    }

    #[test]
    fn test_open_corrupt_header() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.dat");
        fs::write(&path, [0xAAu8; HEADER_SIZE]).expect("write file");

        let result = FileBlockStore::open(&path, 256);
        assert!(matches!(result, Err(StorageError::CorruptHeader(_))));
    }

    #[test]
    fn test_allocate_is_monotonic_and_persisted() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.dat");

        {
            let mut store = FileBlockStore::create(&path, 64).expect("create store");
            assert_eq!(store.allocate().expect("allocate"), 0);
            assert_eq!(store.allocate().expect("allocate"), 1);
            assert_eq!(store.allocate().expect("allocate"), 2);
            store.sync().expect("sync");
        }

        let mut store = FileBlockStore::open(&path, 64).expect("open store");
        assert_eq!(store.next_block_id(), 3);
        assert_eq!(store.allocate().expect("allocate"), 3);
    }

    #[test]
    fn test_write_pads_and_reads_back() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.dat");
        let mut store = FileBlockStore::create(&path, 32).expect("create store");

        let id = store.allocate().expect("allocate");
        store.write(id, b"hello").expect("write");

        let data = store.read(id).expect("read");
        assert_eq!(data.len(), 32);
        assert_eq!(&data[..5], b"hello");
        assert!(data[5..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_overwrite_replaces_contents() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.dat");
        let mut store = FileBlockStore::create(&path, 16).expect("create store");

        let id = store.allocate().expect("allocate");
        store.write(id, &[0xFFu8; 16]).expect("write");
        store.write(id, &[0x01u8; 4]).expect("overwrite");

        let data = store.read(id).expect("read");
        assert_eq!(&data[..4], &[0x01u8; 4]);
        assert!(data[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_oversized_payload() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.dat");
        let mut store = FileBlockStore::create(&path, 16).expect("create store");

        let id = store.allocate().expect("allocate");
        let result = store.write(id, &[0u8; 17]);
        assert!(matches!(
            result,
            Err(StorageError::OversizedPayload {
                len: 17,
                block_size: 16
            })
        ));
    }

    #[test]
    fn test_read_unallocated_block() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.dat");
        let mut store = FileBlockStore::create(&path, 16).expect("create store");

        let result = store.read(100);
        assert!(matches!(
            result,
            Err(StorageError::BlockNotFound { block_id: 100, .. })
        ));
    }

    #[test]
    fn test_read_allocated_but_unwritten_block() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.dat");
        let mut store = FileBlockStore::create(&path, 16).expect("create store");

        let id = store.allocate().expect("allocate");
        let result = store.read(id);
        assert!(matches!(result, Err(StorageError::BlockNotFound { .. })));
    }

    #[test]
    fn test_read_unwritten_block_inside_file() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.dat");
        let mut store = FileBlockStore::create(&path, 16).expect("create store");

        let gap = store.allocate().expect("allocate");
        let written = store.allocate().expect("allocate");
        store.write(written, b"data").expect("write");

        // The file now extends past `gap`, but it was never written.
        assert!(matches!(
            store.read(gap),
            Err(StorageError::BlockNotFound { block_id, .. }) if block_id == gap
        ));

        store.write(gap, b"late").expect("write");
        assert_eq!(&store.read(gap).expect("read")[..4], b"late");
    }

    #[test]
    fn test_deallocate() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.dat");
        let mut store = FileBlockStore::create(&path, 16).expect("create store");

        let id = store.allocate().expect("allocate");
        store.write(id, b"data").expect("write");
        store.deallocate(id).expect("deallocate");

        assert!(matches!(
            store.read(id),
            Err(StorageError::BlockNotFound { .. })
        ));
        assert!(matches!(
            store.deallocate(id),
            Err(StorageError::BlockNotFound { .. })
        ));
        // Identifiers are never reused.
        assert_eq!(store.allocate().expect("allocate"), id + 1);
    }

    #[test]
    fn test_block_data_persistence() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.dat");

        {
            let mut store = FileBlockStore::create(&path, 64).expect("create store");
            store.allocate().expect("allocate");
            let id = store.allocate().expect("allocate");
            store.write(id, &0xDEAD_BEEF_u32.to_le_bytes()).expect("write");
            store.set_root(Some(id)).expect("set root");
            store.sync().expect("sync");
        }

        let mut store = FileBlockStore::open(&path, 64).expect("open store");
        assert_eq!(store.root(), Some(1));
        assert_eq!(store.header().root_block, Some(1));
        assert_eq!(store.header().next_block_id, 2);
        assert_eq!(store.header().block_size, 64);
        let data = store.read(1).expect("read");
        assert_eq!(&data[..4], &0xDEAD_BEEF_u32.to_le_bytes());
    }

    #[test]
    fn test_open_or_create() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.dat");

        {
            let mut store = FileBlockStore::open_or_create(&path, 64).expect("create");
            store.allocate().expect("allocate");
        }

        let store = FileBlockStore::open_or_create(&path, 64).expect("open");
        assert_eq!(store.next_block_id(), 1);
        assert_eq!(store.path(), path.as_path());
    }

    #[test]
    fn test_zero_block_size_rejected() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.dat");

        let result = FileBlockStore::create(&path, 0);
        assert!(matches!(result, Err(StorageError::Io(_))));
        assert!(!path.exists());
    }
}
