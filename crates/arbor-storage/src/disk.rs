//! Disk manager for page-level file I/O, and the file-backed page store.

use crate::allocator::PageAllocator;
use crate::btree::PageStore;
use arbor_common::page::{new_page_buf, seal_page};
use arbor_common::{
    ArborError, PageBuf, PageHeader, PageId, PageType, Result, StorageConfig, PAGE_SIZE,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Manages reading and writing pages to disk files.
///
/// Each file_id maps to a separate data file named `{file_id:08}.dat`, and
/// each file is one backing id for page stores. Free pages are marked with
/// a `Free` page header, so the free list of a file is rebuilt by scanning
/// its headers when the file is opened.
pub struct DiskManager {
    /// Configuration.
    config: StorageConfig,
    /// Open file handles keyed by file_id.
    files: Mutex<HashMap<u32, FileHandle>>,
    /// Next file_id handed out by `create_file`.
    next_file_id: Mutex<u32>,
}

/// Handle for an open data file.
struct FileHandle {
    /// The file handle.
    file: File,
    /// Path to the file.
    path: PathBuf,
    /// Page numbers in use within the file.
    allocator: PageAllocator,
}

impl DiskManager {
    /// Creates a disk manager over `config.data_dir`, creating the directory
    /// if needed.
    pub fn new(config: StorageConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let next_file_id = existing_file_ids(&config.data_dir)?
            .into_iter()
            .max()
            .map_or(0, |max| max + 1);

        Ok(Self {
            config,
            files: Mutex::new(HashMap::new()),
            next_file_id: Mutex::new(next_file_id),
        })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Generates the file path for a given file ID.
    fn file_path(&self, file_id: u32) -> PathBuf {
        self.config.data_dir.join(format!("{:08}.dat", file_id))
    }

    /// Creates a new, empty data file and returns its file_id.
    pub fn create_file(&self) -> Result<u32> {
        let file_id = {
            let mut next = self.next_file_id.lock();
            let file_id = *next;
            *next = file_id
                .checked_add(1)
                .ok_or_else(|| ArborError::Internal("file id space exhausted".to_string()))?;
            file_id
        };
        self.with_file(file_id, |_| Ok(()))?;
        Ok(file_id)
    }

    /// Runs `f` on the handle of `file_id`, opening the file first if
    /// needed.
    fn with_file<R>(&self, file_id: u32, f: impl FnOnce(&mut FileHandle) -> Result<R>) -> Result<R> {
        let mut files = self.files.lock();
        if !files.contains_key(&file_id) {
            let handle = self.open_file(file_id)?;
            files.insert(file_id, handle);
        }
        let handle = files
            .get_mut(&file_id)
            .ok_or_else(|| ArborError::IoError(format!("file {} not open", file_id)))?;
        f(handle)
    }

    /// Opens or creates a data file and rebuilds its free list.
    fn open_file(&self, file_id: u32) -> Result<FileHandle> {
        let path = self.file_path(file_id);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let num_pages = u32::try_from(file.metadata()?.len() / PAGE_SIZE as u64)
            .map_err(|_| ArborError::IoError(format!("file {} is too large", path.display())))?;

        let mut free = Vec::new();
        let mut header = [0u8; PageHeader::SIZE];
        for page_num in 0..num_pages {
            file.seek(SeekFrom::Start(page_offset(page_num)))?;
            file.read_exact(&mut header)?;
            let page_type = PageHeader::from_bytes(&header)
                .map_err(|err| ArborError::PageCorrupted {
                    page_id: PageId::new(file_id, page_num),
                    reason: err.to_string(),
                })?
                .page_type;
            if page_type == PageType::Free {
                free.push(page_num);
            }
        }

        debug!(
            file_id,
            path = %path.display(),
            pages = num_pages,
            free = free.len(),
            "opened data file"
        );
        Ok(FileHandle {
            file,
            path,
            allocator: PageAllocator::with_free_pages(num_pages, free),
        })
    }

    /// Reads a page from disk.
    pub fn read_page(&self, page_id: PageId) -> Result<PageBuf> {
        self.with_file(page_id.file_id, |handle| {
            if !handle.allocator.is_allocated(page_id.page_num) {
                return Err(ArborError::PageNotFound { page_id });
            }
            handle.file.seek(SeekFrom::Start(page_offset(page_id.page_num)))?;
            let mut buffer = new_page_buf();
            handle.file.read_exact(&mut buffer[..])?;
            Ok(buffer)
        })
    }

    /// Writes a page to disk.
    pub fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let fsync = self.config.fsync_enabled;
        self.with_file(page_id.file_id, |handle| {
            if !handle.allocator.is_allocated(page_id.page_num) {
                return Err(ArborError::PageNotFound { page_id });
            }
            write_at(handle, page_id.page_num, data, fsync)
        })
    }

    /// Allocates a page in the specified file, reusing a freed one when
    /// available. The page is zeroed on disk.
    ///
    /// Returns the PageId of the newly allocated page.
    pub fn allocate_page(&self, file_id: u32) -> Result<PageId> {
        let fsync = self.config.fsync_enabled;
        self.with_file(file_id, |handle| {
            let page_num = handle.allocator.allocate()?;
            write_at(handle, page_num, &[0u8; PAGE_SIZE], fsync)?;
            Ok(PageId::new(file_id, page_num))
        })
    }

    /// Releases a page, marking it free on disk.
    pub fn free_page(&self, page_id: PageId) -> Result<()> {
        let fsync = self.config.fsync_enabled;
        self.with_file(page_id.file_id, |handle| {
            handle.allocator.release(page_id.page_num)?;
            let mut page = new_page_buf();
            page[..PageHeader::SIZE]
                .copy_from_slice(&PageHeader::new(page_id, PageType::Free).to_bytes());
            seal_page(&mut page);
            write_at(handle, page_id.page_num, &page, fsync)
        })
    }

    /// Returns the number of pages in a file.
    pub fn num_pages(&self, file_id: u32) -> Result<u32> {
        self.with_file(file_id, |handle| Ok(handle.allocator.high_water()))
    }

    /// Returns the number of allocated pages in a file.
    pub fn live_pages(&self, file_id: u32) -> Result<usize> {
        self.with_file(file_id, |handle| Ok(handle.allocator.live_count()))
    }

    /// Flushes all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        let files = self.files.lock();
        for handle in files.values() {
            handle.file.sync_all()?;
        }
        Ok(())
    }

    /// Closes a specific file.
    pub fn close_file(&self, file_id: u32) -> Result<()> {
        let mut files = self.files.lock();
        if let Some(handle) = files.remove(&file_id) {
            handle.file.sync_all()?;
        }
        Ok(())
    }

    /// Closes all open files.
    pub fn close_all(&self) -> Result<()> {
        let mut files = self.files.lock();
        for (_, handle) in files.drain() {
            handle.file.sync_all()?;
        }
        Ok(())
    }

    /// Deletes a data file.
    pub fn delete_file(&self, file_id: u32) -> Result<()> {
        let path = {
            let mut files = self.files.lock();
            match files.remove(&file_id) {
                Some(handle) => handle.path,
                None => self.file_path(file_id),
            }
        };
        if path.exists() {
            std::fs::remove_file(&path)?;
            debug!(file_id, path = %path.display(), "deleted data file");
        }
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.close_all();
    }
}

fn page_offset(page_num: u32) -> u64 {
    page_num as u64 * PAGE_SIZE as u64
}

fn write_at(handle: &mut FileHandle, page_num: u32, data: &[u8; PAGE_SIZE], fsync: bool) -> Result<()> {
    handle.file.seek(SeekFrom::Start(page_offset(page_num)))?;
    handle.file.write_all(data)?;
    if fsync {
        handle.file.sync_all()?;
    }
    Ok(())
}

/// File ids of the `NNNNNNNN.dat` files in `dir`.
fn existing_file_ids(dir: &Path) -> Result<Vec<u32>> {
    let mut ids = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("dat") {
            continue;
        }
        let id = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .filter(|stem| stem.len() == 8)
            .and_then(|stem| stem.parse::<u32>().ok());
        if let Some(id) = id {
            ids.push(id);
        }
    }
    Ok(ids)
}

/// Page store over one data file of a `DiskManager`.
#[derive(Clone)]
pub struct FilePageStore {
    disk: Arc<DiskManager>,
    file_id: u32,
}

impl FilePageStore {
    /// Opens the store over an existing (or implicitly created) file.
    pub fn new(disk: Arc<DiskManager>, file_id: u32) -> Self {
        Self { disk, file_id }
    }

    /// Creates a store over a fresh data file.
    pub fn create(disk: Arc<DiskManager>) -> Result<Self> {
        let file_id = disk.create_file()?;
        Ok(Self { disk, file_id })
    }

    pub fn disk(&self) -> &Arc<DiskManager> {
        &self.disk
    }

    /// Number of allocated pages.
    pub fn live_pages(&self) -> Result<usize> {
        self.disk.live_pages(self.file_id)
    }

    fn check_owner(&self, page_id: PageId) -> Result<()> {
        if page_id.file_id != self.file_id {
            return Err(ArborError::PageNotFound { page_id });
        }
        Ok(())
    }
}

impl PageStore for FilePageStore {
    fn backing_id(&self) -> u32 {
        self.file_id
    }

    fn allocate(&self) -> Result<PageId> {
        self.disk.allocate_page(self.file_id)
    }

    fn read_page(&self, page_id: PageId) -> Result<PageBuf> {
        self.check_owner(page_id)?;
        self.disk.read_page(page_id)
    }

    fn write_page(&self, page_id: PageId, page: &[u8; PAGE_SIZE]) -> Result<()> {
        self.check_owner(page_id)?;
        self.disk.write_page(page_id, page)
    }

    fn free(&self, page_id: PageId) -> Result<()> {
        self.check_owner(page_id)?;
        self.disk.free_page(page_id)
    }

    fn flush_all(&self) -> Result<()> {
        self.disk.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_disk_manager() -> (DiskManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            data_dir: dir.path().to_path_buf(),
            fsync_enabled: false,
        };
        let dm = DiskManager::new(config).unwrap();
        (dm, dir)
    }

    #[test]
    fn test_disk_manager_new() {
        let (dm, _dir) = create_test_disk_manager();
        assert!(dm.data_dir().exists());
    }

    #[test]
    fn test_disk_manager_allocate_page() {
        let (dm, _dir) = create_test_disk_manager();

        let page1 = dm.allocate_page(0).unwrap();
        assert_eq!(page1.file_id, 0);
        assert_eq!(page1.page_num, 0);

        let page2 = dm.allocate_page(0).unwrap();
        assert_eq!(page2.page_num, 1);

        assert_eq!(dm.num_pages(0).unwrap(), 2);
    }

    #[test]
    fn test_disk_manager_write_read() {
        let (dm, _dir) = create_test_disk_manager();

        let page_id = dm.allocate_page(0).unwrap();

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 0xAB;
        data[100] = 0xCD;
        data[PAGE_SIZE - 1] = 0xEF;
        dm.write_page(page_id, &data).unwrap();

        let read_data = dm.read_page(page_id).unwrap();
        assert_eq!(read_data[0], 0xAB);
        assert_eq!(read_data[100], 0xCD);
        assert_eq!(read_data[PAGE_SIZE - 1], 0xEF);
    }

    #[test]
    fn test_disk_manager_read_nonexistent_page() {
        let (dm, _dir) = create_test_disk_manager();
        dm.allocate_page(0).unwrap();

        let err = dm.read_page(PageId::new(0, 99)).unwrap_err();
        assert!(matches!(err, ArborError::PageNotFound { .. }));
    }

    #[test]
    fn test_disk_manager_free_and_reuse() {
        let (dm, _dir) = create_test_disk_manager();
        let first = dm.allocate_page(0).unwrap();
        let second = dm.allocate_page(0).unwrap();

        dm.free_page(first).unwrap();
        assert_eq!(dm.live_pages(0).unwrap(), 1);
        assert!(matches!(
            dm.read_page(first),
            Err(ArborError::PageNotFound { .. })
        ));
        assert!(dm.free_page(first).is_err());

        let reused = dm.allocate_page(0).unwrap();
        assert_eq!(reused, first);
        assert_eq!(dm.read_page(reused).unwrap()[..], [0u8; PAGE_SIZE][..]);
        assert_eq!(dm.allocate_page(0).unwrap().page_num, second.page_num + 1);
    }

    #[test]
    fn test_disk_manager_rebuilds_free_list() {
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            data_dir: dir.path().to_path_buf(),
            fsync_enabled: false,
        };
        let freed;
        {
            let dm = DiskManager::new(config.clone()).unwrap();
            let mut pages = Vec::new();
            for _ in 0..4 {
                let page_id = dm.allocate_page(0).unwrap();
                let mut data = new_page_buf();
                data[..PageHeader::SIZE]
                    .copy_from_slice(&PageHeader::new(page_id, PageType::BTreeLeaf).to_bytes());
                seal_page(&mut data);
                dm.write_page(page_id, &data).unwrap();
                pages.push(page_id);
            }
            freed = pages[1];
            dm.free_page(freed).unwrap();
        }

        let dm = DiskManager::new(config).unwrap();
        assert_eq!(dm.num_pages(0).unwrap(), 4);
        assert_eq!(dm.live_pages(0).unwrap(), 3);
        assert_eq!(dm.allocate_page(0).unwrap(), freed);
    }

    #[test]
    fn test_disk_manager_persistence() {
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            data_dir: dir.path().to_path_buf(),
            fsync_enabled: true,
        };
        let page_id;

        {
            let dm = DiskManager::new(config.clone()).unwrap();
            page_id = dm.allocate_page(0).unwrap();

            let mut data = [0u8; PAGE_SIZE];
            data[..PageHeader::SIZE]
                .copy_from_slice(&PageHeader::new(page_id, PageType::Descriptor).to_bytes());
            data[PAGE_SIZE - 1] = 0xFF;
            dm.write_page(page_id, &data).unwrap();
        }

        {
            let dm = DiskManager::new(config).unwrap();
            let read_data = dm.read_page(page_id).unwrap();
            assert_eq!(read_data[PAGE_SIZE - 1], 0xFF);
        }
    }

    #[test]
    fn test_disk_manager_create_file_ids() {
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            data_dir: dir.path().to_path_buf(),
            fsync_enabled: false,
        };
        {
            let dm = DiskManager::new(config.clone()).unwrap();
            assert_eq!(dm.create_file().unwrap(), 0);
            assert_eq!(dm.create_file().unwrap(), 1);
        }
        let dm = DiskManager::new(config).unwrap();
        assert_eq!(dm.create_file().unwrap(), 2);
    }

    #[test]
    fn test_disk_manager_delete_file() {
        let (dm, dir) = create_test_disk_manager();

        dm.allocate_page(0).unwrap();
        let file_path = dir.path().join("00000000.dat");
        assert!(file_path.exists());

        dm.delete_file(0).unwrap();
        assert!(!file_path.exists());
    }

    #[test]
    fn test_disk_manager_close_file() {
        let (dm, _dir) = create_test_disk_manager();

        let page_id = dm.allocate_page(0).unwrap();
        let mut data = [0u8; PAGE_SIZE];
        data[..PageHeader::SIZE]
            .copy_from_slice(&PageHeader::new(page_id, PageType::Overflow).to_bytes());
        dm.write_page(page_id, &data).unwrap();
        dm.close_file(0).unwrap();

        dm.allocate_page(0).unwrap();
        assert_eq!(dm.num_pages(0).unwrap(), 2);
    }

    #[test]
    fn test_file_page_store_rejects_foreign_pages() {
        let (dm, _dir) = create_test_disk_manager();
        let store = FilePageStore::create(Arc::new(dm)).unwrap();
        let page_id = store.allocate().unwrap();
        assert_eq!(page_id.file_id, store.backing_id());

        let foreign = PageId::new(store.backing_id() + 1, page_id.page_num);
        assert!(matches!(
            store.read_page(foreign),
            Err(ArborError::PageNotFound { .. })
        ));
        assert!(store.free(foreign).is_err());

        store.free(page_id).unwrap();
        assert_eq!(store.live_pages().unwrap(), 0);
    }
}
