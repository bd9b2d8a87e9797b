use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{
    format_file_prefix, page_size_exponent, page_size_from_exponent, PageFrame, PageRef,
    PageStore, PagerOptions, FILE_TYPE_OFFSET, MAX_PAGES, MIN_PAGE_SIZE, PAGE_SIZE_OFFSET,
};
use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::{ArborError, FileType, PageId, Result};

/// Snapshot of buffer pool counters.
#[derive(Default, Debug, Clone, Copy)]
pub struct PagerStats {
    /// Loads served from the cache.
    pub hits: u64,
    /// Loads that read the page from the file.
    pub misses: u64,
    /// Frames dropped from the cache.
    pub evictions: u64,
    /// Pages written back to the file.
    pub writes: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    writes: AtomicU64,
}

struct CacheState {
    frames: LruCache<PageId, PageRef>,
    num_pages: u32,
}

/// File-backed page store with a bounded LRU buffer pool.
pub struct FilePager {
    io: Arc<dyn FileIo>,
    page_size: usize,
    file_type: FileType,
    capacity: usize,
    state: Mutex<CacheState>,
    counters: Counters,
}

impl FilePager {
    /// Creates a new file at `path` and writes its page 0 prefix.
    pub fn create(
        path: impl AsRef<Path>,
        file_type: FileType,
        options: PagerOptions,
    ) -> Result<Self> {
        page_size_exponent(options.page_size)?;
        let io: Arc<dyn FileIo> = Arc::new(StdFileIo::create_new(path.as_ref())?);
        let mut header = vec![0u8; options.page_size].into_boxed_slice();
        format_file_prefix(&mut header, file_type)?;
        io.write_at(0, &header)?;
        debug!(
            target: "arbor::pager",
            path = %path.as_ref().display(),
            page_size = options.page_size,
            "created file"
        );
        Ok(Self::with_io(io, options.page_size, file_type, options.cache_pages, 1))
    }

    /// Opens an existing file; the page size comes from the file itself.
    pub fn open(path: impl AsRef<Path>, options: PagerOptions) -> Result<Self> {
        let io: Arc<dyn FileIo> = Arc::new(StdFileIo::open_existing(path.as_ref())?);
        let len = io.len()?;
        if len < MIN_PAGE_SIZE as u64 {
            return Err(ArborError::Corruption("file is shorter than one page"));
        }
        let mut prefix = [0u8; 2];
        io.read_at(0, &mut prefix)?;
        let file_type = FileType::try_from(prefix[FILE_TYPE_OFFSET])?;
        let page_size = page_size_from_exponent(prefix[PAGE_SIZE_OFFSET])?;
        if len % page_size as u64 != 0 {
            return Err(ArborError::Corruption(
                "file length is not a whole number of pages",
            ));
        }
        let num_pages = len / page_size as u64;
        if num_pages > u64::from(MAX_PAGES) {
            return Err(ArborError::Corruption("file holds more pages than addressable"));
        }
        Ok(Self::with_io(
            io,
            page_size,
            file_type,
            options.cache_pages,
            num_pages as u32,
        ))
    }

    fn with_io(
        io: Arc<dyn FileIo>,
        page_size: usize,
        file_type: FileType,
        cache_pages: usize,
        num_pages: u32,
    ) -> Self {
        Self {
            io,
            page_size,
            file_type,
            capacity: cache_pages.max(1),
            state: Mutex::new(CacheState {
                frames: LruCache::unbounded(),
                num_pages,
            }),
            counters: Counters::default(),
        }
    }

    /// Returns a snapshot of the buffer pool counters.
    pub fn stats(&self) -> PagerStats {
        PagerStats {
            hits: self.counters.hits.load(AtomicOrdering::Relaxed),
            misses: self.counters.misses.load(AtomicOrdering::Relaxed),
            evictions: self.counters.evictions.load(AtomicOrdering::Relaxed),
            writes: self.counters.writes.load(AtomicOrdering::Relaxed),
        }
    }

    /// Number of frames currently cached.
    pub fn cached_pages(&self) -> usize {
        self.state.lock().frames.len()
    }

    fn write_back(&self, frame: &PageFrame) -> Result<()> {
        if frame.take_dirty() {
            let data = frame.read();
            self.io
                .write_at(frame.id().file_offset(self.page_size), &data)?;
            self.counters.writes.fetch_add(1, AtomicOrdering::Relaxed);
        }
        Ok(())
    }

    /// Drops least recently used unpinned frames until there is room for one more.
    fn make_room(&self, state: &mut CacheState) -> Result<()> {
        while state.frames.len() >= self.capacity {
            let victim = state
                .frames
                .iter()
                .rev()
                .find(|(_, frame)| Arc::strong_count(*frame) == 1)
                .map(|(id, _)| *id);
            let Some(id) = victim else {
                warn!(
                    target: "arbor::pager",
                    capacity = self.capacity,
                    cached = state.frames.len(),
                    "all cached pages are pinned; growing buffer pool"
                );
                return Ok(());
            };
            if let Some(frame) = state.frames.pop(&id) {
                self.write_back(&frame)?;
                self.counters.evictions.fetch_add(1, AtomicOrdering::Relaxed);
            }
        }
        Ok(())
    }
}

impl PageStore for FilePager {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn num_pages(&self) -> u32 {
        self.state.lock().num_pages
    }

    fn file_type(&self) -> FileType {
        self.file_type
    }

    fn load_page(&self, id: PageId) -> Result<PageRef> {
        let mut state = self.state.lock();
        if u32::from(id.0) >= state.num_pages {
            return Err(ArborError::Invalid("page number past end of file"));
        }
        if let Some(frame) = state.frames.get(&id) {
            self.counters.hits.fetch_add(1, AtomicOrdering::Relaxed);
            return Ok(Arc::clone(frame));
        }
        self.counters.misses.fetch_add(1, AtomicOrdering::Relaxed);
        let mut buf = vec![0u8; self.page_size].into_boxed_slice();
        self.io.read_at(id.file_offset(self.page_size), &mut buf)?;
        self.make_room(&mut state)?;
        let frame = PageFrame::new(id, buf, false);
        state.frames.put(id, Arc::clone(&frame));
        Ok(frame)
    }

    fn allocate_page(&self) -> Result<PageRef> {
        let mut state = self.state.lock();
        if state.num_pages >= MAX_PAGES {
            return Err(ArborError::FileFull);
        }
        let id = PageId(state.num_pages as u16);
        self.io
            .set_len(u64::from(state.num_pages + 1) * self.page_size as u64)?;
        state.num_pages += 1;
        self.make_room(&mut state)?;
        let frame = PageFrame::new(id, vec![0u8; self.page_size].into_boxed_slice(), true);
        state.frames.put(id, Arc::clone(&frame));
        Ok(frame)
    }

    fn flush(&self) -> Result<()> {
        let mut dirty: Vec<PageRef> = {
            let state = self.state.lock();
            state
                .frames
                .iter()
                .filter(|(_, frame)| frame.is_dirty())
                .map(|(_, frame)| Arc::clone(frame))
                .collect()
        };
        dirty.sort_by_key(|frame| frame.id());
        for frame in &dirty {
            self.write_back(frame)?;
        }
        self.io.sync_all()
    }
}

impl Drop for FilePager {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            warn!(target: "arbor::pager", error = %err, "flush on close failed");
        }
    }
}
