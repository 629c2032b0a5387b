//! LRU-K victim set over the fixed frame array.
//!
//! Two structures under one mutex: a free list of empty frames, preferred
//! unconditionally, and a lazy min-heap of unpinned frames keyed by the
//! resident block's K-th most recent reference timestamp. The heap never
//! supports decrease-key; a fresh entry is pushed on every pins-to-zero
//! transition and every popped entry is validated against the live frame
//! before it is honored. Stale entries are discarded on pop.
//!
//! # Complexity
//!
//! - Release (unpin): O(log n) push
//! - Eviction: amortized O(log n); each stale entry is popped once

use std::{
    cmp::Reverse,
    collections::BinaryHeap,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::{
    frame::{Frame, FrameMeta},
    history::{ns_to_ms, HistoryTable},
};

#[derive(Debug)]
struct VictimSetInner {
    free: Vec<usize>,
    //  (order key, frame index): equal keys break ties toward the smallest
    //  frame index
    heap: BinaryHeap<Reverse<(u64, usize)>>,
}

#[derive(Debug)]
pub(crate) struct VictimSet {
    inner: Mutex<VictimSetInner>,
}

impl VictimSet {
    /// Every frame of a new pool starts on the free list, lowest index first.
    pub(crate) fn new(pool_size: usize) -> Self {
        Self {
            inner: Mutex::new(VictimSetInner {
                free: (0..pool_size).rev().collect(),
                heap: BinaryHeap::with_capacity(pool_size),
            }),
        }
    }

    /// Make an unpinned frame eligible again. `key` is the resident block's
    /// current order; `None` puts an empty frame back on the free list.
    ///
    /// Must not be called while any frame latch is held.
    pub(crate) fn release(&self, frame_idx: usize, key: Option<u64>) {
        let mut inner = self.inner.lock().unwrap();
        match key {
            Some(order) => inner.heap.push(Reverse((order, frame_idx))),
            None => inner.free.push(frame_idx),
        }
    }

    /// Choose a victim and hand back its index together with its held latch,
    /// or `None` when no frame is eligible.
    ///
    /// Empty frames win outright. Otherwise candidates come off the heap
    /// coldest-first; an entry is honored only if its frame is still
    /// unpinned, still resident, and its key still matches the block's
    /// current order. A candidate that is merely inside its correlated
    /// window is set aside and re-queued, not discarded.
    pub(crate) fn evict<'a>(
        &self,
        frames: &'a [Arc<Frame>],
        history: &HistoryTable,
        now: u64,
        crt_ms: u64,
    ) -> Option<(usize, MutexGuard<'a, FrameMeta>)> {
        let mut inner = self.inner.lock().unwrap();

        while let Some(frame_idx) = inner.free.pop() {
            let meta = frames[frame_idx].lock_meta();
            if meta.pins == 0 && meta.block_id.is_none() {
                return Some((frame_idx, meta));
            }
            //  stale free entry: the frame found a block since
        }

        let mut chosen = None;
        let mut still_correlated = Vec::new();
        while let Some(Reverse((key, frame_idx))) = inner.heap.pop() {
            let meta = frames[frame_idx].lock_meta();
            if meta.pins != 0 {
                continue;
            }
            let Some(block_id) = meta.block_id.clone() else {
                //  emptied since the entry was pushed; an empty unpinned
                //  frame is the best possible victim
                return Some((frame_idx, meta));
            };
            let Some((order, last_ref)) = history.snapshot(&block_id) else {
                return Some((frame_idx, meta));
            };
            if order != key {
                //  the block was re-referenced since; a fresher entry exists
                continue;
            }
            if ns_to_ms(now).saturating_sub(ns_to_ms(last_ref)) <= crt_ms {
                //  mid-burst pages are not evicted even while unpinned
                still_correlated.push(Reverse((key, frame_idx)));
                continue;
            }
            chosen = Some((frame_idx, meta));
            break;
        }

        for entry in still_correlated {
            inner.heap.push(entry);
        }
        chosen
    }
}

#[cfg(test)]
mod victim_set_tests {
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::{
        file_manager::mock::MockFileManager,
        log_manager::LogManager,
        storage::BlockId,
        SharedFS,
    };

    const MS: u64 = 1_000_000;

    fn test_frames(count: usize) -> Vec<Arc<Frame>> {
        let file_manager: SharedFS =
            Arc::new(StdMutex::new(Box::new(MockFileManager::new())));
        let log_manager = Arc::new(StdMutex::new(
            LogManager::new(Arc::clone(&file_manager), "victim_test.log").unwrap(),
        ));
        (0..count)
            .map(|i| {
                Arc::new(Frame::new(
                    Arc::clone(&file_manager),
                    Arc::clone(&log_manager),
                    i,
                ))
            })
            .collect()
    }

    fn make_resident(frames: &[Arc<Frame>], idx: usize, block_id: &BlockId) {
        frames[idx].lock_meta().block_id = Some(block_id.clone());
    }

    #[test]
    fn test_free_frames_come_first_in_index_order() {
        let frames = test_frames(3);
        let history = HistoryTable::new(2, 100);
        let victim_set = VictimSet::new(3);

        let (first, guard) = victim_set.evict(&frames, &history, 0, 100).unwrap();
        drop(guard);
        let (second, guard) = victim_set.evict(&frames, &history, 0, 100).unwrap();
        drop(guard);
        assert_eq!((first, second), (0, 1));
    }

    #[test]
    fn test_smallest_order_wins_and_pinned_entries_are_skipped() {
        let frames = test_frames(2);
        let history = HistoryTable::new(2, 100);
        let victim_set = VictimSet::new(0); // no free list; drive the heap directly

        let cold = BlockId::new("f".to_string(), 0);
        let warm = BlockId::new("f".to_string(), 1);
        history.record_miss(&cold, 10 * MS);
        history.record_hit(&cold, 200 * MS); // order now 10ms
        history.record_miss(&warm, 20 * MS);
        history.record_hit(&warm, 250 * MS);
        history.record_hit(&warm, 400 * MS); // order now 250ms

        make_resident(&frames, 0, &cold);
        make_resident(&frames, 1, &warm);
        victim_set.release(0, Some(history.order(&cold)));
        victim_set.release(1, Some(history.order(&warm)));

        //  pin the cold frame: its heap entry must be discarded on pop
        frames[0].lock_meta().pins = 1;
        let (idx, guard) = victim_set
            .evict(&frames, &history, 1_000 * MS, 100)
            .unwrap();
        drop(guard);
        assert_eq!(idx, 1);
    }

    #[test]
    fn test_correlated_candidates_are_deferred_not_dropped() {
        let frames = test_frames(1);
        let history = HistoryTable::new(2, 100);
        let victim_set = VictimSet::new(0);

        let block = BlockId::new("f".to_string(), 0);
        history.record_miss(&block, 500 * MS);
        make_resident(&frames, 0, &block);
        victim_set.release(0, Some(history.order(&block)));

        //  50ms after the reference: inside the correlated window
        assert!(victim_set.evict(&frames, &history, 550 * MS, 100).is_none());
        //  150ms after: eligible again without any re-insertion
        let (idx, _guard) = victim_set.evict(&frames, &history, 650 * MS, 100).unwrap();
        assert_eq!(idx, 0);
    }

    #[test]
    fn test_stale_key_entries_are_discarded() {
        let frames = test_frames(1);
        let history = HistoryTable::new(2, 100);
        let victim_set = VictimSet::new(0);

        let block = BlockId::new("f".to_string(), 0);
        history.record_miss(&block, 10 * MS);
        make_resident(&frames, 0, &block);
        victim_set.release(0, Some(history.order(&block)));

        //  the block is referenced again; the queued key is now stale
        history.record_hit(&block, 300 * MS);
        history.record_hit(&block, 500 * MS);
        victim_set.release(0, Some(history.order(&block)));

        let (idx, guard) = victim_set
            .evict(&frames, &history, 1_000 * MS, 100)
            .unwrap();
        assert_eq!(idx, 0);
        drop(guard);
        //  both entries are gone: one honored, one discarded as stale
        assert!(victim_set
            .evict(&frames, &history, 1_000 * MS, 100)
            .is_none());
    }
}
