//! Disk-resident B-tree of (composite key, rid) entries
//!
//! Each node occupies exactly one page of the `.bt` file; node ids come from
//! an id pool persisted in the `.pl` sidecar and double as page ids. The
//! root's id lives in a tiny `.root` text file. Entries are ordered by
//! (key, rid) lexicographically, the rid breaking ties among duplicate keys.
//!
//! Keys are stored raw (fixed width, with VARCHAR as a heap offset);
//! comparisons restore the full key through the `KeyCodec` supplied at
//! construction, so the tree needs no back-pointer to its index.

mod error;

pub use error::{BTreeError, BTreeResult};

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use crate::ast::{CmpOp, DataType, Value};
use crate::error::DbResult;
use crate::file::{FileId, FileResult, PAGE_SIZE, PageCache};
use crate::storage::{HeapFile, IdPool};
use crate::table::value::{self, DATA_NORMAL};

/// One predicate of a tree query: the operator and the literal to test
#[derive(Debug, Clone)]
pub struct Pred {
    pub op: CmpOp,
    pub value: Value,
}

/// Key serialization/comparison configuration for one tree
///
/// Holds the column types of the indexed composite in declaration order and,
/// for VARCHAR columns, a handle to the column's heap so raw offsets can be
/// restored to the text the tree actually orders by.
pub struct KeyCodec {
    cols: Vec<DataType>,
    heaps: Vec<Option<HeapFile>>,
    sizes: Vec<usize>,
    key_size: usize,
}

impl KeyCodec {
    pub fn new(cols: Vec<DataType>, heaps: Vec<Option<HeapFile>>) -> Self {
        let sizes: Vec<usize> = cols.iter().map(value::key_size).collect();
        let key_size = sizes.iter().sum();
        Self {
            cols,
            heaps,
            sizes,
            key_size,
        }
    }

    pub fn key_size(&self) -> usize {
        self.key_size
    }

    pub fn cols(&self) -> &[DataType] {
        &self.cols
    }

    fn raw_col<'a>(&self, raw: &'a [u8], i: usize) -> &'a [u8] {
        let start: usize = self.sizes[..i].iter().sum();
        &raw[start..start + self.sizes[i]]
    }

    /// Materialize column `i` of a raw composite into its full form
    pub fn restore_col(&self, cache: &mut PageCache, raw: &[u8], i: usize) -> FileResult<Vec<u8>> {
        let col = self.raw_col(raw, i);
        match &self.heaps[i] {
            Some(heap) if col[0] == DATA_NORMAL => {
                let mut offset_buf = [0u8; 8];
                offset_buf.copy_from_slice(&col[1..9]);
                let text = heap.read_byte_arr(cache, u64::from_le_bytes(offset_buf))?;
                let mut full = Vec::with_capacity(1 + text.len());
                full.push(DATA_NORMAL);
                full.extend_from_slice(&text);
                Ok(full)
            }
            Some(_) => Ok(vec![col[0]]),
            None => Ok(col.to_vec()),
        }
    }

    /// Materialize every column of a raw composite
    pub fn restore(&self, cache: &mut PageCache, raw: &[u8]) -> FileResult<Vec<Vec<u8>>> {
        (0..self.cols.len())
            .map(|i| self.restore_col(cache, raw, i))
            .collect()
    }

    /// Compare a stored raw composite against a materialized full key
    pub fn cmp_raw_full(
        &self,
        cache: &mut PageCache,
        raw: &[u8],
        full: &[Vec<u8>],
    ) -> FileResult<Ordering> {
        for i in 0..self.cols.len() {
            let stored = self.restore_col(cache, raw, i)?;
            let ord = value::cmp_keys(&stored, &full[i], &self.cols[i]);
            if ord != Ordering::Equal {
                return Ok(ord);
            }
        }
        Ok(Ordering::Equal)
    }
}

/// One node image: exactly one page
///
/// Layout: `count: u32`, then interleaved slots of
/// `child: u64 | key: [u8; key_size] | rid: u64`, with a trailing child
/// pointer after the last entry. A node is a leaf iff its first two child
/// pointers are both zero; node id 0 is never allocated.
struct Node {
    id: u64,
    key_size: usize,
    data: Vec<u8>,
}

const NODE_HEADER: usize = 4;

impl Node {
    fn new(id: u64, key_size: usize) -> Self {
        Self {
            id,
            key_size,
            data: vec![0u8; PAGE_SIZE],
        }
    }

    fn stride(&self) -> usize {
        8 + self.key_size + 8
    }

    fn count(&self) -> usize {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.data[..4]);
        u32::from_le_bytes(buf) as usize
    }

    fn set_count(&mut self, n: usize) {
        self.data[..4].copy_from_slice(&(n as u32).to_le_bytes());
    }

    fn slot(&self, i: usize) -> usize {
        NODE_HEADER + i * self.stride()
    }

    fn child(&self, i: usize) -> u64 {
        let at = self.slot(i);
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.data[at..at + 8]);
        u64::from_le_bytes(buf)
    }

    fn set_child(&mut self, i: usize, v: u64) {
        let at = self.slot(i);
        self.data[at..at + 8].copy_from_slice(&v.to_le_bytes());
    }

    fn key(&self, i: usize) -> &[u8] {
        let at = self.slot(i) + 8;
        &self.data[at..at + self.key_size]
    }

    fn set_key(&mut self, i: usize, key: &[u8]) {
        let at = self.slot(i) + 8;
        self.data[at..at + self.key_size].copy_from_slice(key);
    }

    fn rid(&self, i: usize) -> u64 {
        let at = self.slot(i) + 8 + self.key_size;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.data[at..at + 8]);
        u64::from_le_bytes(buf)
    }

    fn set_rid(&mut self, i: usize, v: u64) {
        let at = self.slot(i) + 8 + self.key_size;
        self.data[at..at + 8].copy_from_slice(&v.to_le_bytes());
    }

    fn is_leaf(&self) -> bool {
        self.child(0) == 0 && self.child(1) == 0
    }

    /// Copy entry `from` of `src` into entry `to` of self
    fn copy_entry(&mut self, to: usize, src: &Node, from: usize) {
        let key = src.key(from).to_vec();
        self.set_key(to, &key);
        self.set_rid(to, src.rid(from));
    }
}

/// Disk-resident B-tree of minimum degree `t`
pub struct BTree {
    prefix: PathBuf,
    file: FileId,
    pool: IdPool,
    codec: KeyCodec,
    t: usize,
    root: u64,
}

fn tree_name(prefix: &Path) -> PathBuf {
    prefix.with_extension("bt")
}

fn pool_name(prefix: &Path) -> PathBuf {
    prefix.with_extension("pl")
}

fn root_name(prefix: &Path) -> PathBuf {
    prefix.with_extension("root")
}

/// Minimum degree derived from the page and entry sizes
fn fanout(key_size: usize) -> usize {
    (PAGE_SIZE - NODE_HEADER) / (2 * (8 + key_size + 8))
}

impl BTree {
    /// Create an empty tree, then bulk-insert the given live entries
    ///
    /// Each entry is (raw composite, full composite, rid).
    pub fn init(
        cache: &mut PageCache,
        prefix: &Path,
        codec: KeyCodec,
        entries: Vec<(Vec<u8>, Vec<Vec<u8>>, u64)>,
    ) -> DbResult<Self> {
        let t = fanout(codec.key_size());
        if t < 2 {
            return Err(BTreeError::FanoutTooSmall {
                key_size: codec.key_size(),
            }
            .into());
        }

        cache.file_manager_mut().create_file(tree_name(prefix))?;
        let file = cache.file_manager_mut().open_file(tree_name(prefix))?;
        let mut pool = IdPool::init(cache, pool_name(prefix))?;
        // Node id 0 means "no child"; burn it so no node ever claims it
        pool.new_id(cache)?;

        let mut tree = Self {
            prefix: prefix.to_path_buf(),
            file,
            pool,
            codec,
            t,
            root: 0,
        };
        let root = tree.new_node(cache)?;
        tree.root = root.id;
        tree.write_node(cache, &root)?;
        tree.write_root()?;

        for (raw, full, rid) in entries {
            tree.insert(cache, &raw, rid, &full)?;
        }
        Ok(tree)
    }

    /// Re-open an existing tree from its root pointer and node pool
    pub fn load(cache: &mut PageCache, prefix: &Path, codec: KeyCodec) -> DbResult<Self> {
        let t = fanout(codec.key_size());
        if t < 2 {
            return Err(BTreeError::FanoutTooSmall {
                key_size: codec.key_size(),
            }
            .into());
        }

        let file = cache.file_manager_mut().open_file(tree_name(prefix))?;
        let pool = IdPool::load(cache, pool_name(prefix))?;
        let root_text = fs::read_to_string(root_name(prefix))?;
        let root = root_text.trim().parse::<u64>().unwrap_or(0);

        Ok(Self {
            prefix: prefix.to_path_buf(),
            file,
            pool,
            codec,
            t,
            root,
        })
    }

    /// Flush the root pointer and close the backing files
    pub fn close(self, cache: &mut PageCache) -> DbResult<()> {
        self.write_root()?;
        cache.close_file(self.file)?;
        self.pool.close(cache)?;
        Ok(())
    }

    /// Close and delete every backing file
    pub fn destroy(self, cache: &mut PageCache) -> DbResult<()> {
        let prefix = self.prefix.clone();
        cache.close_file(self.file)?;
        self.pool.close(cache)?;
        cache.remove_file(tree_name(&prefix))?;
        cache.remove_file(pool_name(&prefix))?;
        fs::remove_file(root_name(&prefix))?;
        Ok(())
    }

    fn write_root(&self) -> FileResult<()> {
        fs::write(root_name(&self.prefix), self.root.to_string())?;
        Ok(())
    }

    pub fn codec(&self) -> &KeyCodec {
        &self.codec
    }

    fn new_node(&mut self, cache: &mut PageCache) -> BTreeResult<Node> {
        let id = self.pool.new_id(cache)?;
        Ok(Node::new(id, self.codec.key_size()))
    }

    fn read_node(&self, cache: &mut PageCache, id: u64) -> BTreeResult<Node> {
        let mut node = Node::new(id, self.codec.key_size());
        let page = cache.get_page(self.file, id as usize)?;
        node.data.copy_from_slice(page);
        Ok(node)
    }

    fn write_node(&self, cache: &mut PageCache, node: &Node) -> BTreeResult<()> {
        let page = cache.get_page_mut(self.file, node.id as usize)?;
        page.copy_from_slice(&node.data);
        Ok(())
    }

    /// Compare stored entry (key, rid) against the probe (full, rid)
    fn cmp_entry(
        &self,
        cache: &mut PageCache,
        node: &Node,
        i: usize,
        full: &[Vec<u8>],
        rid: u64,
    ) -> BTreeResult<Ordering> {
        let key = node.key(i).to_vec();
        let ord = self.codec.cmp_raw_full(cache, &key, full)?;
        Ok(if ord == Ordering::Equal {
            node.rid(i).cmp(&rid)
        } else {
            ord
        })
    }

    /// Number of entries strictly less than the probe (binary search)
    fn upper_bound(
        &self,
        cache: &mut PageCache,
        node: &Node,
        full: &[Vec<u8>],
        rid: u64,
    ) -> BTreeResult<usize> {
        let (mut lo, mut hi) = (0, node.count());
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.cmp_entry(cache, node, mid, full, rid)? == Ordering::Less {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    /// Split the full child `i` of `x` around its median entry
    fn split_child(&mut self, cache: &mut PageCache, x: &mut Node, i: usize) -> BTreeResult<()> {
        let t = self.t;
        let mut y = self.read_node(cache, x.child(i))?;
        let mut z = self.new_node(cache)?;

        for j in 0..t - 1 {
            z.copy_entry(j, &y, j + t);
        }
        if !y.is_leaf() {
            for j in 0..t {
                z.set_child(j, y.child(j + t));
            }
        }
        z.set_count(t - 1);
        y.set_count(t - 1);

        let n = x.count();
        for j in (i + 1..=n).rev() {
            x.set_child(j + 1, x.child(j));
        }
        x.set_child(i + 1, z.id);
        for j in (i..n).rev() {
            let key = x.key(j).to_vec();
            x.set_key(j + 1, &key);
            x.set_rid(j + 1, x.rid(j));
        }
        x.copy_entry(i, &y, t - 1);
        x.set_count(n + 1);

        self.write_node(cache, x)?;
        self.write_node(cache, &y)?;
        self.write_node(cache, &z)?;
        Ok(())
    }

    /// Insert an entry; duplicates differ by rid so the tree stays a total order
    pub fn insert(
        &mut self,
        cache: &mut PageCache,
        raw: &[u8],
        rid: u64,
        full: &[Vec<u8>],
    ) -> BTreeResult<()> {
        let mut node = self.read_node(cache, self.root)?;

        if node.count() == 2 * self.t - 1 {
            let mut new_root = self.new_node(cache)?;
            new_root.set_child(0, node.id);
            self.split_child(cache, &mut new_root, 0)?;
            self.root = new_root.id;
            self.write_root()?;
            node = new_root;
        }

        loop {
            let mut i = self.upper_bound(cache, &node, full, rid)?;
            if node.is_leaf() {
                let n = node.count();
                for j in (i..n).rev() {
                    let key = node.key(j).to_vec();
                    node.set_key(j + 1, &key);
                    node.set_rid(j + 1, node.rid(j));
                }
                node.set_key(i, raw);
                node.set_rid(i, rid);
                node.set_count(n + 1);
                self.write_node(cache, &node)?;
                return Ok(());
            }

            let child = self.read_node(cache, node.child(i))?;
            if child.count() == 2 * self.t - 1 {
                self.split_child(cache, &mut node, i)?;
                if self.cmp_entry(cache, &node, i, full, rid)? == Ordering::Less {
                    i += 1;
                }
            }
            node = self.read_node(cache, node.child(i))?;
        }
    }

    /// Remove the entry equal to (key, rid); returns whether it was found
    pub fn remove(&mut self, cache: &mut PageCache, raw: &[u8], rid: u64) -> BTreeResult<bool> {
        let full = self.codec.restore(cache, raw)?;
        let root = self.read_node(cache, self.root)?;
        let found = self.remove_rec(cache, root, &full, rid)?;

        // Shrink the tree when the root empties out
        let root = self.read_node(cache, self.root)?;
        if root.count() == 0 && !root.is_leaf() {
            let old = root.id;
            self.root = root.child(0);
            self.pool.free_id(cache, old)?;
            self.write_root()?;
        }
        Ok(found)
    }

    /// Delete from the subtree rooted at `x`, pre-filling children on the way
    ///
    /// Invariant: `x` is the root or has at least `t` entries when entered.
    fn remove_rec(
        &mut self,
        cache: &mut PageCache,
        mut x: Node,
        full: &[Vec<u8>],
        rid: u64,
    ) -> BTreeResult<bool> {
        let t = self.t;
        let mut i = self.upper_bound(cache, &x, full, rid)?;
        let hit = i < x.count() && self.cmp_entry(cache, &x, i, full, rid)? == Ordering::Equal;

        if hit && x.is_leaf() {
            let n = x.count();
            for j in i..n - 1 {
                let key = x.key(j + 1).to_vec();
                x.set_key(j, &key);
                x.set_rid(j, x.rid(j + 1));
            }
            x.set_count(n - 1);
            self.write_node(cache, &x)?;
            return Ok(true);
        }

        if hit {
            let left = self.read_node(cache, x.child(i))?;
            if left.count() >= t {
                // Replace with the predecessor and delete it from the left subtree
                let (pred_raw, pred_rid) = self.max_entry(cache, &left)?;
                x.set_key(i, &pred_raw);
                x.set_rid(i, pred_rid);
                self.write_node(cache, &x)?;
                let pred_full = self.codec.restore(cache, &pred_raw)?;
                return self.remove_rec(cache, left, &pred_full, pred_rid);
            }
            let right = self.read_node(cache, x.child(i + 1))?;
            if right.count() >= t {
                let (succ_raw, succ_rid) = self.min_entry(cache, &right)?;
                x.set_key(i, &succ_raw);
                x.set_rid(i, succ_rid);
                self.write_node(cache, &x)?;
                let succ_full = self.codec.restore(cache, &succ_raw)?;
                return self.remove_rec(cache, right, &succ_full, succ_rid);
            }
            // Both children minimal: merge them around the entry, then recurse
            let merged = self.merge_children(cache, &mut x, i)?;
            let merged = self.read_node(cache, merged)?;
            return self.remove_rec(cache, merged, full, rid);
        }

        if x.is_leaf() {
            return Ok(false);
        }

        let child = self.read_node(cache, x.child(i))?;
        if child.count() == t - 1 {
            i = self.fill_child(cache, &mut x, i)?;
        }
        let child = self.read_node(cache, x.child(i))?;
        self.remove_rec(cache, child, full, rid)
    }

    /// Rightmost entry of the subtree under `x`
    fn max_entry(&self, cache: &mut PageCache, x: &Node) -> BTreeResult<(Vec<u8>, u64)> {
        let mut node = self.read_node(cache, x.id)?;
        while !node.is_leaf() {
            node = self.read_node(cache, node.child(node.count()))?;
        }
        let last = node.count() - 1;
        Ok((node.key(last).to_vec(), node.rid(last)))
    }

    /// Leftmost entry of the subtree under `x`
    fn min_entry(&self, cache: &mut PageCache, x: &Node) -> BTreeResult<(Vec<u8>, u64)> {
        let mut node = self.read_node(cache, x.id)?;
        while !node.is_leaf() {
            node = self.read_node(cache, node.child(0))?;
        }
        Ok((node.key(0).to_vec(), node.rid(0)))
    }

    /// Merge child `i`, entry `i`, and child `i+1` into one node; returns its id
    fn merge_children(
        &mut self,
        cache: &mut PageCache,
        x: &mut Node,
        i: usize,
    ) -> BTreeResult<u64> {
        let t = self.t;
        let mut y = self.read_node(cache, x.child(i))?;
        let z = self.read_node(cache, x.child(i + 1))?;

        y.copy_entry(t - 1, x, i);
        for j in 0..t - 1 {
            y.copy_entry(j + t, &z, j);
        }
        if !y.is_leaf() {
            for j in 0..t {
                y.set_child(j + t, z.child(j));
            }
        }
        y.set_count(2 * t - 1);
        self.pool.free_id(cache, z.id)?;

        let n = x.count();
        for j in i..n - 1 {
            let key = x.key(j + 1).to_vec();
            x.set_key(j, &key);
            x.set_rid(j, x.rid(j + 1));
            x.set_child(j + 1, x.child(j + 2));
        }
        x.set_count(n - 1);

        self.write_node(cache, x)?;
        self.write_node(cache, &y)?;
        Ok(y.id)
    }

    /// Bring child `i` of `x` up to at least `t` entries; returns the index
    /// of the (possibly merged) child to descend into
    fn fill_child(&mut self, cache: &mut PageCache, x: &mut Node, i: usize) -> BTreeResult<usize> {
        let t = self.t;

        if i > 0 {
            let mut left = self.read_node(cache, x.child(i - 1))?;
            if left.count() >= t {
                // Rotate the left sibling's last entry through the parent
                let mut c = self.read_node(cache, x.child(i))?;
                let n = c.count();
                for j in (0..n).rev() {
                    let key = c.key(j).to_vec();
                    c.set_key(j + 1, &key);
                    c.set_rid(j + 1, c.rid(j));
                }
                if !c.is_leaf() {
                    for j in (0..=n).rev() {
                        c.set_child(j + 1, c.child(j));
                    }
                }
                c.copy_entry(0, x, i - 1);
                if !left.is_leaf() {
                    c.set_child(0, left.child(left.count()));
                }
                c.set_count(n + 1);

                let last = left.count() - 1;
                x.copy_entry(i - 1, &left, last);
                left.set_count(last);

                self.write_node(cache, x)?;
                self.write_node(cache, &left)?;
                self.write_node(cache, &c)?;
                return Ok(i);
            }
        }

        if i < x.count() {
            let mut right = self.read_node(cache, x.child(i + 1))?;
            if right.count() >= t {
                // Rotate the right sibling's first entry through the parent
                let mut c = self.read_node(cache, x.child(i))?;
                let n = c.count();
                c.copy_entry(n, x, i);
                if !c.is_leaf() {
                    c.set_child(n + 1, right.child(0));
                }
                c.set_count(n + 1);

                x.copy_entry(i, &right, 0);
                let rn = right.count();
                for j in 0..rn - 1 {
                    let key = right.key(j + 1).to_vec();
                    right.set_key(j, &key);
                    right.set_rid(j, right.rid(j + 1));
                }
                if !right.is_leaf() {
                    for j in 0..rn {
                        right.set_child(j, right.child(j + 1));
                    }
                }
                right.set_count(rn - 1);

                self.write_node(cache, x)?;
                self.write_node(cache, &right)?;
                self.write_node(cache, &c)?;
                return Ok(i);
            }
        }

        if i < x.count() {
            self.merge_children(cache, x, i)?;
            Ok(i)
        } else {
            self.merge_children(cache, x, i - 1)?;
            Ok(i - 1)
        }
    }

    /// Collect up to `limit` rids whose keys satisfy every predicate
    ///
    /// `preds[i]` is the conjunction for indexed column `i`. Results come
    /// back in (key, rid) order; the first column's upper bounds prune the
    /// in-order walk early.
    pub fn query(
        &self,
        cache: &mut PageCache,
        preds: &[Vec<Pred>],
        limit: usize,
    ) -> DbResult<Vec<u64>> {
        let mut out = Vec::new();
        let root = self.read_node(cache, self.root)?;
        self.query_rec(cache, &root, preds, limit, &mut out)?;
        Ok(out)
    }

    /// In-order walk; returns false once the walk should stop entirely
    fn query_rec(
        &self,
        cache: &mut PageCache,
        x: &Node,
        preds: &[Vec<Pred>],
        limit: usize,
        out: &mut Vec<u64>,
    ) -> DbResult<bool> {
        let leaf = x.is_leaf();
        for i in 0..=x.count() {
            if !leaf {
                let child = self.read_node(cache, x.child(i))?;
                if !self.query_rec(cache, &child, preds, limit, out)? {
                    return Ok(false);
                }
            }
            if out.len() >= limit {
                return Ok(false);
            }
            if i < x.count() {
                let key = x.key(i).to_vec();
                let full = self.codec.restore(cache, &key)?;

                if self.beyond_upper(&full[0], &preds[0])? {
                    return Ok(false);
                }
                if self.matches(&full, preds)? {
                    out.push(x.rid(i));
                    if out.len() >= limit {
                        return Ok(false);
                    }
                }
            }
        }
        Ok(true)
    }

    /// True when no entry at or beyond this first-column value can match
    fn beyond_upper(&self, col0: &[u8], preds0: &[Pred]) -> DbResult<bool> {
        let ty = &self.codec.cols[0];
        for pred in preds0 {
            let past = match pred.op {
                CmpOp::Eq | CmpOp::Le => value::cmp_with_value(col0, ty, CmpOp::Gt, &pred.value)?,
                CmpOp::Lt => value::cmp_with_value(col0, ty, CmpOp::Ge, &pred.value)?,
                _ => false,
            };
            if past {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn matches(&self, full: &[Vec<u8>], preds: &[Vec<Pred>]) -> DbResult<bool> {
        for (i, col_preds) in preds.iter().enumerate() {
            for pred in col_preds {
                if !value::cmp_with_value(&full[i], &self.codec.cols[i], pred.op, &pred.value)? {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Every rid stored under a key equal to `full`, in rid order
    pub fn rids_matching(&self, cache: &mut PageCache, full: &[Vec<u8>]) -> DbResult<Vec<u64>> {
        let mut out = Vec::new();
        let root = self.read_node(cache, self.root)?;
        self.rids_matching_rec(cache, &root, full, &mut out)?;
        Ok(out)
    }

    /// In-order walk pruned to the equal-key run; returns false once past it
    fn rids_matching_rec(
        &self,
        cache: &mut PageCache,
        x: &Node,
        full: &[Vec<u8>],
        out: &mut Vec<u64>,
    ) -> DbResult<bool> {
        let leaf = x.is_leaf();
        for i in 0..=x.count() {
            if !leaf {
                // Skip subtrees that lie entirely below the key
                let subtree_may_match = i == x.count() || {
                    let key = x.key(i).to_vec();
                    self.codec.cmp_raw_full(cache, &key, full)? != Ordering::Less
                };
                if subtree_may_match {
                    let child = self.read_node(cache, x.child(i))?;
                    if !self.rids_matching_rec(cache, &child, full, out)? {
                        return Ok(false);
                    }
                }
            }
            if i < x.count() {
                let key = x.key(i).to_vec();
                match self.codec.cmp_raw_full(cache, &key, full)? {
                    Ordering::Less => {}
                    Ordering::Equal => out.push(x.rid(i)),
                    Ordering::Greater => return Ok(false),
                }
            }
        }
        Ok(true)
    }

    /// Minimum degree (test hook)
    pub fn min_degree(&self) -> usize {
        self.t
    }

    /// Tree height: 1 for a lone leaf (test hook)
    pub fn height(&self, cache: &mut PageCache) -> BTreeResult<usize> {
        let mut h = 1;
        let mut node = self.read_node(cache, self.root)?;
        while !node.is_leaf() {
            node = self.read_node(cache, node.child(0))?;
            h += 1;
        }
        Ok(h)
    }

    /// In-order (key, rid) pairs of the whole tree (test hook)
    pub fn entries(&self, cache: &mut PageCache) -> DbResult<Vec<(Vec<Vec<u8>>, u64)>> {
        let mut out = Vec::new();
        let root = self.read_node(cache, self.root)?;
        self.entries_rec(cache, &root, &mut out)?;
        Ok(out)
    }

    fn entries_rec(
        &self,
        cache: &mut PageCache,
        x: &Node,
        out: &mut Vec<(Vec<Vec<u8>>, u64)>,
    ) -> DbResult<()> {
        let leaf = x.is_leaf();
        for i in 0..=x.count() {
            if !leaf {
                let child = self.read_node(cache, x.child(i))?;
                self.entries_rec(cache, &child, out)?;
            }
            if i < x.count() {
                let key = x.key(i).to_vec();
                out.push((self.codec.restore(cache, &key)?, x.rid(i)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FileManager;
    use crate::table::value::encode;
    use tempfile::TempDir;

    fn int_codec() -> KeyCodec {
        KeyCodec::new(vec![DataType::Int], vec![None])
    }

    fn int_key(i: i64) -> (Vec<u8>, Vec<Vec<u8>>) {
        let full = encode(&Value::Int(i), &DataType::Int).unwrap();
        (full.clone(), vec![full])
    }

    fn setup() -> (TempDir, PageCache) {
        let temp_dir = tempfile::tempdir().unwrap();
        (temp_dir, PageCache::new(FileManager::new()))
    }

    fn eq_pred(i: i64) -> Vec<Vec<Pred>> {
        vec![vec![Pred {
            op: CmpOp::Eq,
            value: Value::Int(i),
        }]]
    }

    #[test]
    fn test_fanout_for_int_keys() {
        // (8192 - 4) / (2 * (8 + 9 + 8)) = 163
        assert_eq!(fanout(9), 163);
    }

    #[test]
    fn test_insert_and_query() {
        let (temp, mut cache) = setup();
        let prefix = temp.path().join("ix");
        let mut tree = BTree::init(&mut cache, &prefix, int_codec(), Vec::new()).unwrap();

        for i in 0..50 {
            let (raw, full) = int_key(i);
            tree.insert(&mut cache, &raw, i as u64, &full).unwrap();
        }

        for i in 0..50 {
            let rids = tree.query(&mut cache, &eq_pred(i), usize::MAX).unwrap();
            assert_eq!(rids, vec![i as u64]);
        }
        assert!(tree
            .query(&mut cache, &eq_pred(99), usize::MAX)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_root_split_produces_height_two() {
        let (temp, mut cache) = setup();
        let prefix = temp.path().join("ix");
        let mut tree = BTree::init(&mut cache, &prefix, int_codec(), Vec::new()).unwrap();
        let t = tree.min_degree();

        for i in 0..(2 * t - 1) {
            let (raw, full) = int_key(i as i64);
            tree.insert(&mut cache, &raw, i as u64, &full).unwrap();
        }
        assert_eq!(tree.height(&mut cache).unwrap(), 1);

        let (raw, full) = int_key((2 * t) as i64);
        tree.insert(&mut cache, &raw, (2 * t) as u64, &full).unwrap();
        assert_eq!(tree.height(&mut cache).unwrap(), 2);
    }

    #[test]
    fn test_entries_in_order_with_duplicate_keys() {
        let (temp, mut cache) = setup();
        let prefix = temp.path().join("ix");
        let mut tree = BTree::init(&mut cache, &prefix, int_codec(), Vec::new()).unwrap();

        // Same key, different rids: rid breaks the tie
        for rid in [5u64, 1, 3] {
            let (raw, full) = int_key(7);
            tree.insert(&mut cache, &raw, rid, &full).unwrap();
        }
        let (raw, full) = int_key(2);
        tree.insert(&mut cache, &raw, 9, &full).unwrap();

        let rids: Vec<u64> = tree
            .entries(&mut cache)
            .unwrap()
            .into_iter()
            .map(|(_, rid)| rid)
            .collect();
        assert_eq!(rids, vec![9, 1, 3, 5]);
    }

    #[test]
    fn test_remove_and_rebalance() {
        let (temp, mut cache) = setup();
        let prefix = temp.path().join("ix");
        let mut tree = BTree::init(&mut cache, &prefix, int_codec(), Vec::new()).unwrap();
        let n = 2000i64;

        for i in 0..n {
            let (raw, full) = int_key(i);
            tree.insert(&mut cache, &raw, i as u64, &full).unwrap();
        }
        assert!(tree.height(&mut cache).unwrap() >= 2);

        for i in (0..n).step_by(2) {
            let (raw, _) = int_key(i);
            assert!(tree.remove(&mut cache, &raw, i as u64).unwrap());
        }

        for i in 0..n {
            let rids = tree.query(&mut cache, &eq_pred(i), usize::MAX).unwrap();
            if i % 2 == 0 {
                assert!(rids.is_empty(), "key {} should be gone", i);
            } else {
                assert_eq!(rids, vec![i as u64]);
            }
        }
    }

    #[test]
    fn test_remove_missing_returns_false() {
        let (temp, mut cache) = setup();
        let prefix = temp.path().join("ix");
        let mut tree = BTree::init(&mut cache, &prefix, int_codec(), Vec::new()).unwrap();

        let (raw, full) = int_key(1);
        tree.insert(&mut cache, &raw, 1, &full).unwrap();

        let (raw, _) = int_key(2);
        assert!(!tree.remove(&mut cache, &raw, 2).unwrap());
        // Present key but wrong rid is also a miss
        let (raw, _) = int_key(1);
        assert!(!tree.remove(&mut cache, &raw, 99).unwrap());
    }

    #[test]
    fn test_range_query_with_limit() {
        let (temp, mut cache) = setup();
        let prefix = temp.path().join("ix");
        let mut tree = BTree::init(&mut cache, &prefix, int_codec(), Vec::new()).unwrap();

        for i in 0..100 {
            let (raw, full) = int_key(i);
            tree.insert(&mut cache, &raw, i as u64, &full).unwrap();
        }

        let preds = vec![vec![
            Pred {
                op: CmpOp::Ge,
                value: Value::Int(10),
            },
            Pred {
                op: CmpOp::Lt,
                value: Value::Int(20),
            },
        ]];
        let rids = tree.query(&mut cache, &preds, usize::MAX).unwrap();
        assert_eq!(rids, (10..20).map(|i| i as u64).collect::<Vec<_>>());

        let rids = tree.query(&mut cache, &preds, 3).unwrap();
        assert_eq!(rids, vec![10, 11, 12]);
    }

    #[test]
    fn test_persists_across_load() {
        let (temp, mut cache) = setup();
        let prefix = temp.path().join("ix");

        let mut tree = BTree::init(&mut cache, &prefix, int_codec(), Vec::new()).unwrap();
        for i in 0..500 {
            let (raw, full) = int_key(i);
            tree.insert(&mut cache, &raw, i as u64, &full).unwrap();
        }
        tree.close(&mut cache).unwrap();

        let tree = BTree::load(&mut cache, &prefix, int_codec()).unwrap();
        let rids = tree.query(&mut cache, &eq_pred(321), usize::MAX).unwrap();
        assert_eq!(rids, vec![321]);
        assert_eq!(tree.entries(&mut cache).unwrap().len(), 500);
    }

    #[test]
    fn test_init_bulk_builds_from_entries() {
        let (temp, mut cache) = setup();
        let prefix = temp.path().join("ix");

        let entries: Vec<_> = (0..300)
            .map(|i| {
                let (raw, full) = int_key(i);
                (raw, full, i as u64)
            })
            .collect();
        let tree = BTree::init(&mut cache, &prefix, int_codec(), entries).unwrap();
        assert_eq!(tree.entries(&mut cache).unwrap().len(), 300);
    }

    #[test]
    fn test_fanout_too_small() {
        let (temp, mut cache) = setup();
        let prefix = temp.path().join("ix");
        // A composite wide enough to push t below 2
        let codec = KeyCodec::new(vec![DataType::Char(4000)], vec![None]);
        let result = BTree::init(&mut cache, &prefix, codec, Vec::new());
        assert!(result.is_err());
    }
}
