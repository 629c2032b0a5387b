use std::{
    collections::HashMap,
    fs::{self, File, OpenOptions},
    io::{self, Read, Seek, Write},
    path::{Path, PathBuf},
};

use crate::storage::{BlockId, Page, PAGE_SIZE};

/// Block-granular file interface the pool and log depend on.
///
/// Implementations report failures through `io::Result` so the pool can
/// surface them as storage errors instead of tearing down the process.
pub trait FileSystem: std::fmt::Debug {
    fn block_size(&self) -> usize;
    /// Length of the file in blocks.
    fn length(&mut self, filename: &str) -> io::Result<u64>;
    fn read(&mut self, block_id: &BlockId, page: &mut Page) -> io::Result<()>;
    fn write(&mut self, block_id: &BlockId, page: &Page) -> io::Result<()>;
    /// Extend the file by one zeroed block and return its id.
    fn append(&mut self, filename: &str) -> io::Result<BlockId>;
    fn sync(&mut self, filename: &str) -> io::Result<()>;
    fn sync_directory(&mut self) -> io::Result<()>;
}

/// The file manager owning every open database file under one directory.
#[derive(Debug)]
pub struct FileManager {
    db_directory: PathBuf,
    open_files: HashMap<String, File>,
    directory_fd: File,
}

impl FileManager {
    pub fn new<P>(db_directory: &P, clean: bool) -> io::Result<Self>
    where
        P: AsRef<Path>,
    {
        let db_path = db_directory.as_ref().to_path_buf();
        fs::create_dir_all(&db_path)?;

        if clean {
            for entry in fs::read_dir(&db_path)? {
                let entry = entry?;
                if entry.file_type()?.is_file() {
                    fs::remove_file(entry.path())?;
                }
            }
        }

        let directory_fd = File::open(&db_path)?;

        Ok(Self {
            db_directory: db_path,
            open_files: HashMap::new(),
            directory_fd,
        })
    }

    /// Get the handle for the named file, opening or creating it on first use.
    fn get_file(&mut self, filename: &str) -> io::Result<File> {
        let full_path = self.db_directory.join(filename);
        let full_path_str = full_path.to_string_lossy().to_string();
        if !self.open_files.contains_key(&full_path_str) {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(full_path)?;
            self.open_files.insert(full_path_str.clone(), file);
        }
        self.open_files[&full_path_str].try_clone()
    }

    fn block_offset(block_num: u64) -> io::SeekFrom {
        io::SeekFrom::Start(block_num * PAGE_SIZE as u64)
    }
}

impl FileSystem for FileManager {
    fn block_size(&self) -> usize {
        PAGE_SIZE
    }

    fn length(&mut self, filename: &str) -> io::Result<u64> {
        let file = self.get_file(filename)?;
        let metadata = file.metadata()?;
        Ok(metadata.len() / PAGE_SIZE as u64)
    }

    fn read(&mut self, block_id: &BlockId, page: &mut Page) -> io::Result<()> {
        let mut file = self.get_file(block_id.filename())?;
        file.seek(Self::block_offset(block_id.number()))?;
        match file.read_exact(page.contents_mut()) {
            Ok(()) => Ok(()),
            //  reads past the end of the file observe an all-zero block
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                page.contents_mut().fill(0);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn write(&mut self, block_id: &BlockId, page: &Page) -> io::Result<()> {
        let mut file = self.get_file(block_id.filename())?;
        file.seek(Self::block_offset(block_id.number()))?;
        file.write_all(page.contents())
    }

    fn append(&mut self, filename: &str) -> io::Result<BlockId> {
        let new_blk_num = self.length(filename)?;
        let block_id = BlockId::new(filename.to_string(), new_blk_num);
        let buffer = Page::new();
        let mut file = self.get_file(filename)?;
        file.seek(Self::block_offset(new_blk_num))?;
        file.write_all(buffer.contents())?;
        Ok(block_id)
    }

    fn sync(&mut self, filename: &str) -> io::Result<()> {
        let file = self.get_file(filename)?;
        file.sync_all()
    }

    fn sync_directory(&mut self) -> io::Result<()> {
        self.directory_fd.sync_all()
    }
}
