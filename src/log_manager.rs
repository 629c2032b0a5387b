use std::io;

use crate::{
    storage::{BlockId, Page},
    Lsn, SharedFS,
};

/// The write-ahead log. Records are appended right-to-left into an in-memory
/// page and spilled to disk when the page fills or a flush is demanded.
///
/// The pool's flush path calls [`LogManager::flush_lsn`] before any dirty
/// page reaches disk, which is what makes the log write-ahead.
#[derive(Debug)]
pub struct LogManager {
    file_manager: SharedFS,
    log_file: String,
    log_page: Page,
    current_block: BlockId,
    latest_lsn: Lsn,
    last_saved_lsn: Lsn,
}

impl LogManager {
    pub fn new(file_manager: SharedFS, log_file: &str) -> io::Result<Self> {
        let block_size = file_manager.lock().unwrap().block_size();
        let mut log_page = Page::from_bytes(vec![0; block_size]);
        let log_size = file_manager.lock().unwrap().length(log_file)?;
        let current_block = if log_size == 0 {
            LogManager::append_new_block(&file_manager, log_file, &mut log_page)?
        } else {
            let block = BlockId::new(log_file.to_string(), log_size - 1);
            file_manager.lock().unwrap().read(&block, &mut log_page)?;
            block
        };
        Ok(Self {
            file_manager,
            log_file: log_file.to_string(),
            log_page,
            current_block,
            latest_lsn: 0,
            last_saved_lsn: 0,
        })
    }

    /// Number handed to the most recently appended record. Dirty frames carry
    /// this value so that eviction knows how far the log must be flushed.
    pub fn current_lsn(&self) -> Lsn {
        self.latest_lsn
    }

    /// Highest log sequence number known to be durable.
    pub fn last_saved_lsn(&self) -> Lsn {
        self.last_saved_lsn
    }

    /// Ensure every record up to and including `lsn` is durable.
    pub fn flush_lsn(&mut self, lsn: Lsn) -> io::Result<()> {
        if self.last_saved_lsn >= lsn {
            return Ok(());
        }
        self.flush_to_disk()
    }

    /// Write the log page to disk for the current block and advance the
    /// durability watermark.
    fn flush_to_disk(&mut self) -> io::Result<()> {
        let mut file_manager = self.file_manager.lock().unwrap();
        file_manager.write(&self.current_block, &self.log_page)?;
        file_manager.sync(&self.log_file)?;
        file_manager.sync_directory()?;
        self.last_saved_lsn = self.latest_lsn;
        Ok(())
    }

    /// Append a record to the log page, spilling to a fresh block first when
    /// the page has no room left. Returns the record's sequence number.
    pub fn append(&mut self, log_record: &[u8]) -> io::Result<Lsn> {
        let mut boundary = self.log_page.get_int(0) as usize;
        let bytes_needed = log_record.len() + Page::INT_BYTES;
        if boundary.saturating_sub(bytes_needed) < Page::INT_BYTES {
            self.flush_to_disk()?;
            self.current_block = LogManager::append_new_block(
                &self.file_manager,
                &self.log_file,
                &mut self.log_page,
            )?;
            boundary = self.log_page.get_int(0) as usize;
        }

        let record_pos = boundary - bytes_needed;
        self.log_page.set_bytes(record_pos, log_record);
        self.log_page.set_int(0, record_pos as i32);
        self.latest_lsn += 1;
        Ok(self.latest_lsn)
    }

    /// Start a fresh log block whose boundary pointer marks it as empty.
    fn append_new_block(
        file_manager: &SharedFS,
        log_file: &str,
        log_page: &mut Page,
    ) -> io::Result<BlockId> {
        let mut fm = file_manager.lock().unwrap();
        let block_id = fm.append(log_file)?;
        log_page.set_int(0, fm.block_size() as i32);
        fm.write(&block_id, log_page)?;
        Ok(block_id)
    }

    /// Iterate records newest-first, starting from the current block.
    pub fn iterator(&mut self) -> io::Result<LogIterator> {
        self.flush_to_disk()?;
        LogIterator::new(
            std::sync::Arc::clone(&self.file_manager),
            BlockId::new(self.log_file.clone(), self.current_block.number()),
        )
    }
}

pub struct LogIterator {
    file_manager: SharedFS,
    current_block: BlockId,
    page: Page,
    current_pos: usize,
}

impl LogIterator {
    fn new(file_manager: SharedFS, current_block: BlockId) -> io::Result<Self> {
        let mut page = Page::new();
        file_manager.lock().unwrap().read(&current_block, &mut page)?;
        let boundary = page.get_int(0) as usize;

        Ok(Self {
            file_manager,
            current_block,
            page,
            current_pos: boundary,
        })
    }

    fn move_to_block(&mut self) -> io::Result<()> {
        self.file_manager
            .lock()
            .unwrap()
            .read(&self.current_block, &mut self.page)?;
        self.current_pos = self.page.get_int(0) as usize;
        Ok(())
    }
}

impl Iterator for LogIterator {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        let block_size = self.file_manager.lock().unwrap().block_size();
        if self.current_pos >= block_size {
            if self.current_block.number() == 0 {
                return None; //  no more blocks
            }
            self.current_block = BlockId::new(
                self.current_block.filename().to_string(),
                self.current_block.number() - 1,
            );
            if let Err(e) = self.move_to_block() {
                return Some(Err(e));
            }
        }
        let record = self.page.get_bytes(self.current_pos);
        self.current_pos += Page::INT_BYTES + record.len();
        Some(Ok(record))
    }
}
