use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, OnceLock,
    },
};

use crate::{
    clock::{Clock, MonotonicClock},
    config::PoolConfig,
    error::PoolError,
    frame::{Frame, FrameMeta},
    history::HistoryTable,
    log_manager::LogManager,
    replacement::VictimSet,
    storage::{BlockId, Page},
    SharedFS,
};

/// Hit/miss statistics for the buffer pool.
#[derive(Debug, Default)]
pub struct BufferStats {
    pub hits: AtomicUsize,
    pub misses: AtomicUsize,
}

impl BufferStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> (usize, usize) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    pub fn hit_rate(&self) -> f64 {
        let (hits, misses) = self.get();
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64) * 100.0
        }
    }
}

/// The buffer pool: a fixed array of frames, the block-to-frame index, and
/// the LRU-K victim set, behind the pin/unpin/flush protocol.
///
/// Same-identity pins are serialized by a fixed, prime-sized array of anchor
/// stripes rather than one pool-wide lock, so concurrent pins of the same
/// block cannot load it twice while pins of unrelated blocks proceed in
/// parallel. Blocking I/O happens only under a single frame's latch; neither
/// an anchor stripe nor the victim-set mutex is held across a block pin's
/// disk read.
#[derive(Debug)]
pub struct BufferPool {
    frames: Vec<Arc<Frame>>,
    resident: Mutex<HashMap<BlockId, usize>>,
    available: AtomicUsize,
    victim_set: VictimSet,
    history: HistoryTable,
    anchors: Box<[Mutex<()>]>,
    clock: Arc<dyn Clock>,
    config: PoolConfig,
    stats: OnceLock<Arc<BufferStats>>,
}

impl BufferPool {
    pub fn new(
        file_manager: SharedFS,
        log_manager: Arc<Mutex<LogManager>>,
        config: PoolConfig,
    ) -> Self {
        Self::with_clock(
            file_manager,
            log_manager,
            config,
            Arc::new(MonotonicClock::new()),
        )
    }

    /// Build a pool over an explicit clock. Tests drive the replacement
    /// policy through a [`crate::ManualClock`] passed here.
    pub fn with_clock(
        file_manager: SharedFS,
        log_manager: Arc<Mutex<LogManager>>,
        config: PoolConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let frames: Vec<Arc<Frame>> = (0..config.buffer_count)
            .map(|index| {
                Arc::new(Frame::new(
                    Arc::clone(&file_manager),
                    Arc::clone(&log_manager),
                    index,
                ))
            })
            .collect();
        let anchors: Box<[Mutex<()>]> = (0..config.anchor_stripes)
            .map(|_| Mutex::new(()))
            .collect();

        Self {
            resident: Mutex::new(HashMap::new()),
            available: AtomicUsize::new(config.buffer_count),
            victim_set: VictimSet::new(config.buffer_count),
            history: HistoryTable::new(config.lru_k, config.crt_ms),
            anchors,
            clock,
            config,
            stats: OnceLock::new(),
            frames,
        }
    }

    /// Enable statistics collection. Idempotent, zero-cost when unused.
    pub fn enable_stats(&self) {
        let _ = self.stats.set(Arc::new(BufferStats::new()));
    }

    /// Current (hits, misses), or `None` if stats were never enabled.
    pub fn get_stats(&self) -> Option<(usize, usize)> {
        self.stats.get().map(|s| s.get())
    }

    pub fn stats(&self) -> Option<&Arc<BufferStats>> {
        self.stats.get()
    }

    pub fn reset_stats(&self) {
        if let Some(stats) = self.stats.get() {
            stats.reset();
        }
    }

    /// Number of frames currently holding no pins.
    pub fn available(&self) -> usize {
        self.available.load(Ordering::Acquire)
    }

    /// FNV-1a over the block identity, reduced modulo the stripe count.
    fn anchor_index(&self, filename: &str, block_num: Option<u64>) -> usize {
        let mut h = 0xcbf29ce484222325u64;
        for &byte in filename.as_bytes() {
            h ^= byte as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
        if let Some(block_num) = block_num {
            h ^= block_num;
            h = h.wrapping_mul(0x100000001b3);
        }
        (h as usize) % self.anchors.len()
    }

    fn anchor_for_block(&self, block_id: &BlockId) -> &Mutex<()> {
        &self.anchors[self.anchor_index(block_id.filename(), Some(block_id.number()))]
    }

    fn anchor_for_file(&self, filename: &str) -> &Mutex<()> {
        &self.anchors[self.anchor_index(filename, None)]
    }

    /// Pin the frame holding `block_id`, loading the block first if it is
    /// not resident.
    ///
    /// Fails fast with [`PoolError::NoBufferAvailable`] when no frame is
    /// eligible for eviction; the pool never blocks waiting for one. The
    /// returned frame keeps its residence until the matching
    /// [`BufferPool::unpin`].
    pub fn pin(&self, block_id: &BlockId) -> Result<Arc<Frame>, PoolError> {
        loop {
            if let Some(frame) = self.try_pin(block_id)? {
                return Ok(frame);
            }
            //  the frame we found was swapped out while we waited for its
            //  latch; start over from the anchor
            log::trace!("pin retry for {block_id:?} after losing a swap race");
        }
    }

    /// One pin attempt. `Ok(None)` means a hit-path race was detected and
    /// the caller should retry from the anchor.
    fn try_pin(&self, block_id: &BlockId) -> Result<Option<Arc<Frame>>, PoolError> {
        let anchor = self.anchor_for_block(block_id);
        let anchor_guard = anchor.lock().unwrap();

        let resident_idx = self.resident.lock().unwrap().get(block_id).copied();

        //  hit path
        if let Some(frame_idx) = resident_idx {
            let frame = &self.frames[frame_idx];
            let mut meta = frame.lock_meta(); // waits out any in-flight swap
            if meta.block_id.as_ref() != Some(block_id) {
                let mut resident = self.resident.lock().unwrap();
                if resident.get(block_id) == Some(&frame_idx) {
                    resident.remove(block_id);
                }
                return Ok(None);
            }
            if meta.pin() {
                self.available.fetch_sub(1, Ordering::AcqRel);
            }
            self.history.record_hit(block_id, self.clock.now());
            if let Some(stats) = self.stats.get() {
                stats.hits.fetch_add(1, Ordering::Relaxed);
            }
            log::trace!("pin hit for {block_id:?} in frame {frame_idx}");
            return Ok(Some(Arc::clone(frame)));
        }

        //  miss path
        if let Some(stats) = self.stats.get() {
            stats.misses.fetch_add(1, Ordering::Relaxed);
        }
        let now = self.clock.now();
        let Some((frame_idx, mut meta)) =
            self.victim_set
                .evict(&self.frames, &self.history, now, self.config.crt_ms)
        else {
            log::debug!("pin miss for {block_id:?}: no victim available");
            return Err(PoolError::NoBufferAvailable);
        };
        log::debug!("pin miss for {block_id:?}, loading into frame {frame_idx}");

        let frame = Arc::clone(&self.frames[frame_idx]);
        {
            let mut resident = self.resident.lock().unwrap();
            if let Some(old) = meta.block_id.as_ref() {
                resident.remove(old);
            }
            //  installing the mapping before the read makes concurrent pins
            //  of this block find the frame and wait on its latch instead of
            //  loading a second copy
            resident.insert(block_id.clone(), frame_idx);
        }
        let was_zero = meta.pin();
        debug_assert!(was_zero, "victim frame must have zero pins");
        self.available.fetch_sub(1, Ordering::AcqRel);
        self.history.record_miss(block_id, now);
        drop(anchor_guard);

        if let Err(e) = frame.assign_to_block_locked(&mut meta, block_id) {
            self.reset_failed_frame(frame_idx, &mut meta, block_id);
            let now_zero = meta.unpin();
            debug_assert!(now_zero, "failed swap frame had exactly one pin");
            self.available.fetch_add(1, Ordering::AcqRel);
            drop(meta);
            self.victim_set.release(frame_idx, None);
            return Err(e.into());
        }
        Ok(Some(frame))
    }

    /// Append a block to `filename`, format it, and return it pinned.
    ///
    /// The file-name anchor serializes concurrent extensions of the same
    /// file, so each call observes the file length its new block number was
    /// derived from.
    pub fn pin_new(
        &self,
        filename: &str,
        formatter: &dyn Fn(&mut Page),
    ) -> Result<Arc<Frame>, PoolError> {
        let anchor = self.anchor_for_file(filename);
        let _anchor_guard = anchor.lock().unwrap();

        if let Some(stats) = self.stats.get() {
            stats.misses.fetch_add(1, Ordering::Relaxed);
        }
        let now = self.clock.now();
        let Some((frame_idx, mut meta)) =
            self.victim_set
                .evict(&self.frames, &self.history, now, self.config.crt_ms)
        else {
            log::debug!("pin_new on {filename:?}: no victim available");
            return Err(PoolError::NoBufferAvailable);
        };

        let frame = Arc::clone(&self.frames[frame_idx]);
        if let Some(old) = meta.block_id.clone() {
            let mut resident = self.resident.lock().unwrap();
            resident.remove(&old);
        }
        let block_id = match frame.assign_to_new_locked(&mut meta, filename, formatter) {
            Ok(block_id) => block_id,
            Err(e) => {
                //  the frame was never pinned, so only its residence needs
                //  clearing before it goes back on the free list
                meta.reset();
                drop(meta);
                self.victim_set.release(frame_idx, None);
                log::warn!("pin_new on {filename:?} failed: {e}");
                return Err(e.into());
            }
        };
        self.resident
            .lock()
            .unwrap()
            .insert(block_id.clone(), frame_idx);
        let was_zero = meta.pin();
        debug_assert!(was_zero, "victim frame must have zero pins");
        self.available.fetch_sub(1, Ordering::AcqRel);
        self.history.record_miss(&block_id, now);
        log::debug!("pin_new formatted {block_id:?} in frame {frame_idx}");
        Ok(frame)
    }

    /// Release one pin. On the pins-to-zero transition the frame re-enters
    /// the victim set keyed by its block's current order.
    pub fn unpin(&self, frame: &Arc<Frame>) {
        let mut meta = frame.lock_meta();
        if !meta.unpin() {
            return;
        }
        self.available.fetch_add(1, Ordering::AcqRel);
        let key = meta.block_id.as_ref().map(|blk| self.history.order(blk));
        drop(meta);
        self.victim_set.release(frame.index(), key);
    }

    pub fn unpin_all<'a>(&self, frames: impl IntoIterator<Item = &'a Arc<Frame>>) {
        for frame in frames {
            self.unpin(frame);
        }
    }

    /// Flush every dirty frame.
    pub fn flush_all(&self) -> Result<(), PoolError> {
        self.flush_where(|_| true)
    }

    /// Flush the dirty frames modified by this specific transaction.
    pub fn flush_txn(&self, txn_num: u64) -> Result<(), PoolError> {
        self.flush_where(|meta| meta.is_modified_by(txn_num))
    }

    fn flush_where(&self, pred: impl Fn(&FrameMeta) -> bool) -> Result<(), PoolError> {
        let mut first_err: Option<std::io::Error> = None;
        for (frame_idx, frame) in self.frames.iter().enumerate() {
            let mut meta = frame.lock_meta();
            if !meta.dirty || !pred(&meta) {
                continue;
            }
            if let Err(e) = frame.flush_locked(&mut meta) {
                log::warn!("flush of frame {frame_idx} failed: {e}");
                let was_unpinned = meta.pins == 0;
                if let Some(block_id) = meta.block_id.clone() {
                    self.reset_failed_frame(frame_idx, &mut meta, &block_id);
                }
                drop(meta);
                if was_unpinned {
                    self.victim_set.release(frame_idx, None);
                }
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        first_err.map_or(Ok(()), |e| Err(e.into()))
    }

    /// Drop retained history for blocks unreferenced for longer than the
    /// retained information period. Intended to be called out of band;
    /// nothing in the pin path depends on it running.
    pub fn sweep_history(&self) -> usize {
        let now = self.clock.now();
        let resident = self.resident.lock().unwrap();
        let dropped = self
            .history
            .sweep(now, self.config.rit_ms, |blk| resident.contains_key(blk));
        if dropped > 0 {
            log::debug!("history sweep dropped {dropped} entries");
        }
        dropped
    }

    /// Clear a frame's residence after an I/O failure so the pool stays
    /// consistent: the block becomes unreachable through the index and the
    /// frame reports empty.
    fn reset_failed_frame(&self, frame_idx: usize, meta: &mut FrameMeta, block_id: &BlockId) {
        {
            let mut resident = self.resident.lock().unwrap();
            if resident.get(block_id) == Some(&frame_idx) {
                resident.remove(block_id);
            }
        }
        meta.reset();
        log::warn!("frame {frame_idx} reset to empty after storage failure on {block_id:?}");
    }

    #[cfg(test)]
    pub(crate) fn assert_buffer_count_invariant(&self) {
        let available = self.available();
        let num_pinned_frames = self.frames.iter().filter(|f| f.is_pinned()).count();
        assert_eq!(
            available + num_pinned_frames,
            self.frames.len(),
            "buffer count invariant violated: available={}, pinned={}, total={}",
            available,
            num_pinned_frames,
            self.frames.len()
        );
    }

    #[cfg(test)]
    pub(crate) fn history(&self) -> &HistoryTable {
        &self.history
    }
}
