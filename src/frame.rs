use std::{
    collections::HashSet,
    io,
    sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::{
    log_manager::LogManager,
    storage::{BlockId, Page},
    Lsn, SharedFS,
};

/// Per-frame state guarded by the frame latch: the resident block, the pin
/// count, and the dirty bookkeeping.
#[derive(Debug)]
pub(crate) struct FrameMeta {
    pub(crate) block_id: Option<BlockId>,
    pub(crate) pins: usize,
    pub(crate) dirty: bool,
    pub(crate) modifying_txns: HashSet<u64>,
    pub(crate) lsn: Option<Lsn>,
}

impl FrameMeta {
    fn new() -> Self {
        Self {
            block_id: None,
            pins: 0,
            dirty: false,
            modifying_txns: HashSet::new(),
            lsn: None,
        }
    }

    /// Increment the pin count; `true` when this crossed zero.
    pub(crate) fn pin(&mut self) -> bool {
        let was_zero = self.pins == 0;
        self.pins += 1;
        was_zero
    }

    /// Decrement the pin count; `true` when this reached zero. Unpinning an
    /// unpinned frame is a caller bug, not an error the pool can recover.
    pub(crate) fn unpin(&mut self) -> bool {
        assert!(self.pins > 0, "FrameMeta::unpin on zero pins");
        self.pins -= 1;
        self.pins == 0
    }

    pub(crate) fn is_modified_by(&self, txn_num: u64) -> bool {
        self.modifying_txns.contains(&txn_num)
    }

    /// Return the frame to the empty state after an I/O failure.
    pub(crate) fn reset(&mut self) {
        self.block_id = None;
        self.dirty = false;
        self.modifying_txns.clear();
        self.lsn = None;
    }
}

/// A page-sized slot of the buffer pool. The page contents live behind a
/// read-write lock; residence, pins, and dirty state live behind the frame
/// latch and change only while the latch is held.
#[derive(Debug)]
pub struct Frame {
    index: usize,
    file_manager: SharedFS,
    log_manager: Arc<Mutex<LogManager>>,
    page: RwLock<Page>,
    meta: Mutex<FrameMeta>,
}

impl Frame {
    pub(crate) fn new(file_manager: SharedFS, log_manager: Arc<Mutex<LogManager>>, index: usize) -> Self {
        Self {
            index,
            file_manager,
            log_manager,
            page: RwLock::new(Page::new()),
            meta: Mutex::new(FrameMeta::new()),
        }
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn lock_meta(&self) -> MutexGuard<'_, FrameMeta> {
        self.meta.lock().unwrap()
    }

    /// The block currently resident in this frame, if any.
    pub fn block_id(&self) -> Option<BlockId> {
        self.lock_meta().block_id.clone()
    }

    pub fn pin_count(&self) -> usize {
        self.lock_meta().pins
    }

    pub fn is_pinned(&self) -> bool {
        self.lock_meta().pins > 0
    }

    pub fn is_modified_by(&self, txn_num: u64) -> bool {
        self.lock_meta().is_modified_by(txn_num)
    }

    pub fn read_page(&self) -> RwLockReadGuard<'_, Page> {
        self.page.read().unwrap()
    }

    pub fn write_page(&self) -> RwLockWriteGuard<'_, Page> {
        self.page.write().unwrap()
    }

    /// Record that `txn_num` modified this page, attaching the log sequence
    /// number of the record describing the change. The frame stays dirty
    /// until flushed.
    pub fn mark_modified(&self, txn_num: u64, lsn: Lsn) {
        let mut meta = self.lock_meta();
        meta.dirty = true;
        meta.modifying_txns.insert(txn_num);
        meta.lsn = Some(meta.lsn.map_or(lsn, |current| current.max(lsn)));
    }

    /// Write the page out if it is dirty, flushing the log through the
    /// page's LSN first. Clears the dirty bookkeeping on success.
    pub(crate) fn flush_locked(&self, meta: &mut FrameMeta) -> io::Result<()> {
        if !meta.dirty {
            return Ok(());
        }
        let Some(block_id) = meta.block_id.clone() else {
            return Ok(());
        };
        //  WAL rule: the log must be durable through this page's LSN before
        //  the page itself reaches disk
        if let Some(lsn) = meta.lsn {
            self.log_manager.lock().unwrap().flush_lsn(lsn)?;
        }
        let page_guard = self.page.read().unwrap();
        self.file_manager
            .lock()
            .unwrap()
            .write(&block_id, &page_guard)?;
        drop(page_guard);
        log::debug!("frame {} flushed {:?}", self.index, block_id);
        meta.dirty = false;
        meta.modifying_txns.clear();
        meta.lsn = None;
        Ok(())
    }

    /// Repurpose this frame to hold the contents of a different block. The
    /// current residence is flushed out first if dirty, then the new block is
    /// read in. Preconditions: no pins, and the old block is already
    /// unreachable through the pool's resident index.
    pub(crate) fn assign_to_block_locked(
        &self,
        meta: &mut FrameMeta,
        block_id: &BlockId,
    ) -> io::Result<()> {
        self.flush_locked(meta)?;
        meta.block_id = Some(block_id.clone());
        meta.dirty = false;
        meta.modifying_txns.clear();
        meta.lsn = None;
        let mut page_guard = self.page.write().unwrap();
        self.file_manager
            .lock()
            .unwrap()
            .read(block_id, &mut page_guard)
    }

    /// Repurpose this frame to hold a freshly appended block of `filename`,
    /// initialized by `formatter`. The page is marked dirty so the formatted
    /// contents reach disk on the next flush.
    pub(crate) fn assign_to_new_locked(
        &self,
        meta: &mut FrameMeta,
        filename: &str,
        formatter: &dyn Fn(&mut Page),
    ) -> io::Result<BlockId> {
        self.flush_locked(meta)?;
        let block_id = self.file_manager.lock().unwrap().append(filename)?;
        {
            let mut page_guard = self.page.write().unwrap();
            *page_guard = Page::new();
            formatter(&mut page_guard);
        }
        meta.block_id = Some(block_id.clone());
        meta.dirty = true;
        meta.modifying_txns.clear();
        meta.lsn = None;
        Ok(block_id)
    }
}
