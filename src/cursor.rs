//! A transient `(page_num, cell_num)` position within a leaf, produced by
//! `Find` and consumed by insert/update/delete.

use crate::node::NodeType;
use crate::table::Table;
use crate::errors::Error;

pub struct Cursor {
    pub page_num: u32,
    pub cell_num: usize,
}

impl Cursor {
    /// Descends from the root to the leaf that should contain `key`,
    /// binary-searching separator keys at internal nodes (§4.3). Lands on
    /// the first cell whose key is >= `key`, or one-past-the-end if none.
    pub fn find(table: &mut Table, key: u32) -> Result<Self, Error> {
        let mut page_num = table.root_page_num;
        loop {
            let node = table.pager.get_page(page_num)?;
            match node.node_type()? {
                NodeType::Leaf => {
                    let cell_num = leaf_find_index(node, key);
                    return Ok(Cursor { page_num, cell_num });
                }
                NodeType::Internal => {
                    let child_idx = node.internal_find_child_index(key);
                    page_num = node.child_at(child_idx);
                }
            }
        }
    }

    /// True if the cursor is positioned exactly on a cell with key == `key`.
    pub fn matches(&self, table: &mut Table, key: u32) -> Result<bool, Error> {
        let node = table.pager.get_page(self.page_num)?;
        Ok(self.cell_num < node.leaf_num_cells() && node.leaf_key(self.cell_num) == key)
    }
}

/// Binary search within a single leaf's cells for the first key >= `key`.
fn leaf_find_index(node: &crate::node::Node, key: u32) -> usize {
    let (mut lo, mut hi) = (0, node.leaf_num_cells());
    while lo != hi {
        let mid = (lo + hi) / 2;
        let key_at_mid = node.leaf_key(mid);
        if key_at_mid == key {
            return mid;
        } else if key < key_at_mid {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    lo
}
