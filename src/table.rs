//! The single table this database ever has: a pager plus the (fixed)
//! root page number. Opening a fresh file initializes page 0 as an empty
//! leaf root (§3 Lifecycle); opening an existing one just loads the pager.

use std::path::Path;

use tracing::info;

use crate::errors::Error;
use crate::pager::Pager;

pub struct Table {
    pub pager: Pager,
    pub root_page_num: u32,
}

impl Table {
    pub fn open(path: &Path) -> Result<Self, Error> {
        let mut pager = Pager::open(path)?;
        let is_new = pager.num_pages() == 0;
        if is_new {
            let root = pager.get_page_mut(0)?;
            root.init_leaf();
            root.set_is_root(true);
            info!(path = %path.display(), "initialized new database file");
        }
        Ok(Table { pager, root_page_num: 0 })
    }

    pub fn close(self) -> Result<(), Error> {
        self.pager.close()
    }
}
