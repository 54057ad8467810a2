//! Balanced 3-D KD-tree over a dataset's objects.
//!
//! The tree is built once per dataset after placement, over unit-sphere
//! vertices of every object, and answers exact nearest-neighbour queries
//! in great-circle distance. Node links are flat-array indices stored on
//! the objects themselves, so the whole tree serializes with the object
//! records and reloads without a rebuild.
//!
//! The build is not the classical single-axis-sort construction: all
//! three axes are sorted up front and the pivot rotates X -> Y -> Z per
//! level, with each node chosen by scanning outward from the pivot
//! axis's array median until an element inside the other two axes'
//! current value bounds is found. That keeps the tree balanced on all
//! three axes at once, paying a linear scan per node at build time only.

use tracing::{debug, info};

use crate::catalog::{Catalog, CatalogObject};
use crate::error::CatalogError;
use crate::geom::sphere::{angular_separation, radec_to_unit, vector_to_radec};

/// Absent node link.
pub const KD_NONE: i32 = -1;

/// Per-object tree node; all links are indices into the dataset's flat
/// object array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdNode {
    /// Below/above subtree roots, [`KD_NONE`] when absent.
    pub child: [i32; 2],
    /// Parent node, [`KD_NONE`] at the root.
    pub parent: i32,
    /// This object's own index.
    pub index: u32,
}

impl KdNode {
    pub(crate) fn unset(index: u32) -> KdNode {
        KdNode {
            child: [KD_NONE; 2],
            parent: KD_NONE,
            index,
        }
    }
}

const AXES: usize = 3;

fn next_axis(axis: usize) -> usize {
    (axis + 1) % AXES
}

/// Build-time view of one object.
struct Elem {
    /// Flat index into the dataset's object array.
    object: u32,
    v: [f64; 3],
    used: bool,
    child: [i32; 2],
    parent: i32,
}

/// Shared build state: the elements plus one rank array per axis, each
/// holding every element index sorted by that axis coordinate.
struct Build {
    elems: Vec<Elem>,
    ranks: [Vec<u32>; AXES],
}

impl Build {
    fn coord(&self, axis: usize, rank: usize) -> f64 {
        self.elems[self.ranks[axis][rank] as usize].v[axis]
    }

    /// Whether the element at `rank` on `axis` is unused and inside the
    /// value bounds of both other axes.
    fn valid(&self, axis: usize, rank: usize, bounds: &[[f64; 2]; AXES]) -> bool {
        let elem = &self.elems[self.ranks[axis][rank] as usize];
        if elem.used {
            return false;
        }
        for other in [next_axis(axis), next_axis(next_axis(axis))] {
            let c = elem.v[other];
            if c < bounds[other][0] || c > bounds[other][1] {
                return false;
            }
        }
        true
    }

    /// The element at (or nearest to) the median of `[start, end]` on
    /// the pivot axis that satisfies the other axes' bounds.
    ///
    /// Scans outward +-1, +-2, ... from the exact median; an odd-sized
    /// range leaves the end slot unvisited by the symmetric scan, so it
    /// is checked last. Returns the rank within the pivot axis order, or
    /// `None` when the range holds no satisfying element (empty subtree).
    fn median(
        &self,
        axis: usize,
        start: usize,
        end: usize,
        bounds: &[[f64; 2]; AXES],
    ) -> Option<usize> {
        let size = end - start;
        let count = size >> 1;
        let index = start + count;

        if self.valid(axis, index, bounds) {
            return Some(index);
        }

        for i in 1..=count {
            if self.valid(axis, index - i, bounds) {
                return Some(index - i);
            }
            if self.valid(axis, index + i, bounds) {
                return Some(index + i);
            }
        }

        if size & 0x1 != 0 && self.valid(axis, end, bounds) {
            return Some(end);
        }

        None
    }

    /// Select the node for `[start, end]` on `axis` and recurse into its
    /// partitions with the next pivot axis, narrowing only the pivoted
    /// range. Returns the chosen element's index, or `None` for an empty
    /// subtree.
    fn select(&mut self, axis: usize, ranges: [[usize; 2]; AXES]) -> Option<u32> {
        let mut bounds = [[0.0; 2]; AXES];
        for a in 0..AXES {
            bounds[a] = [self.coord(a, ranges[a][0]), self.coord(a, ranges[a][1])];
        }

        let [start, end] = ranges[axis];
        let rank = self.median(axis, start, end, &bounds)?;
        let node = self.ranks[axis][rank];
        self.elems[node as usize].used = true;

        let mut below = ranges;
        below[axis] = [start, rank];
        if let Some(child) = self.select(next_axis(axis), below) {
            self.elems[child as usize].parent = node as i32;
            self.elems[node as usize].child[0] = child as i32;
        }

        let mut above = ranges;
        above[axis] = [if rank == end { rank } else { rank + 1 }, end];
        if let Some(child) = self.select(next_axis(axis), above) {
            self.elems[child as usize].parent = node as i32;
            self.elems[node as usize].child[1] = child as i32;
        }

        Some(node)
    }
}

impl Catalog {
    /// Build the KD-tree for a dataset over its placed objects.
    ///
    /// Runs once at the end of import; the tree is read-only afterwards.
    pub fn build_kd_tree(&mut self, slot: usize) -> Result<(), CatalogError> {
        // Mesh traversal order, so a saved dataset reloads with node
        // links matching its file order.
        let order = self.traversal_order(slot)?;
        let ds = self.dataset(slot)?;
        if ds.is_empty() {
            return Err(CatalogError::EmptyDataset);
        }

        let elems: Vec<Elem> = order
            .iter()
            .map(|&object| {
                let o = ds.object(object as usize);
                Elem {
                    object,
                    v: radec_to_unit(o.ra, o.dec),
                    used: false,
                    child: [KD_NONE; 2],
                    parent: KD_NONE,
                }
            })
            .collect();

        let mut ranks: [Vec<u32>; AXES] = std::array::from_fn(|_| (0..elems.len() as u32).collect());
        for (axis, rank) in ranks.iter_mut().enumerate() {
            rank.sort_by(|&a, &b| elems[a as usize].v[axis].total_cmp(&elems[b as usize].v[axis]));
        }

        let mut build = Build { elems, ranks };
        let full = [[0, build.elems.len() - 1]; AXES];
        let root = build
            .select(0, full)
            .ok_or(CatalogError::EmptyDataset)?;

        // Write the links back onto the objects, translated from elem
        // ids to flat object indices.
        let flat = |id: i32| {
            if id < 0 {
                KD_NONE
            } else {
                build.elems[id as usize].object as i32
            }
        };
        let ds = self.dataset_mut(slot)?;
        for elem in &build.elems {
            let kd = &mut ds.objects[elem.object as usize].kd;
            kd.child = [flat(elem.child[0]), flat(elem.child[1])];
            kd.parent = flat(elem.parent);
            kd.index = elem.object;
        }
        ds.kd_root = build.elems[root as usize].object as i32;

        info!(
            slot,
            objects = build.elems.len(),
            root = ds.kd_root,
            "built kd-tree"
        );
        Ok(())
    }

    /// The catalog object nearest to a sky position.
    pub fn nearest(&self, slot: usize, ra: f64, dec: f64) -> Result<&CatalogObject, CatalogError> {
        self.nearest_inner(slot, ra, dec, None)
    }

    /// The catalog object nearest to another object, excluding it.
    pub fn nearest_to_object(
        &self,
        slot: usize,
        index: usize,
    ) -> Result<&CatalogObject, CatalogError> {
        let object = *self.dataset(slot)?.object(index);
        self.nearest_inner(slot, object.ra, object.dec, Some(index as u32))
    }

    fn nearest_inner(
        &self,
        slot: usize,
        ra: f64,
        dec: f64,
        exclude: Option<u32>,
    ) -> Result<&CatalogObject, CatalogError> {
        let ds = self.dataset(slot)?;
        if ds.kd_root < 0 {
            return Err(CatalogError::KdTreeNotBuilt);
        }

        let mut search = Nearest {
            ds,
            target: radec_to_unit(ra, dec),
            ra,
            dec,
            exclude,
            closest: None,
            distance: f64::INFINITY,
        };
        search.walk(ds.kd_root, 0);

        let closest = search.closest.ok_or(CatalogError::EmptyDataset)?;
        debug!(
            slot,
            object = closest,
            distance_deg = search.distance.to_degrees(),
            "nearest"
        );
        Ok(ds.object(closest as usize))
    }
}

/// One nearest-neighbour descent.
struct Nearest<'a> {
    ds: &'a crate::catalog::Dataset,
    target: [f64; 3],
    ra: f64,
    dec: f64,
    exclude: Option<u32>,
    closest: Option<u32>,
    distance: f64,
}

impl Nearest<'_> {
    fn distance_to(&self, v: [f64; 3]) -> f64 {
        let (ra2, dec2) = vector_to_radec(v);
        angular_separation(self.ra, self.dec, ra2, dec2)
    }

    /// Recursive descend-then-unwind. Returns true only from past a
    /// leaf, which makes the first unwound node the initial candidate.
    fn walk(&mut self, node: i32, axis: usize) -> bool {
        if node < 0 {
            return true;
        }
        let index = node as u32;
        let object = self.ds.object(node as usize);
        let kd = self.ds.kd_node(node as usize);
        let v = radec_to_unit(object.ra, object.dec);

        let next = if self.target[axis] < v[axis] {
            kd.child[0]
        } else {
            kd.child[1]
        };

        let end = self.walk(next, next_axis(axis));
        if end && self.closest.is_none() && self.exclude != Some(index) {
            self.closest = Some(index);
            self.distance = self.distance_to(v);
            return false;
        }

        let d = self.distance_to(v);
        if d < self.distance && self.exclude != Some(index) {
            self.closest = Some(index);
            self.distance = d;
        }

        // Distance from the query to this node's splitting plane: the
        // query point with its pivot coordinate projected onto the
        // node's. If the plane is closer than the best so far, the
        // unexplored sibling subtree may hold a closer object.
        let mut plane = self.target;
        plane[axis] = v[axis];
        if self.distance_to(plane) < self.distance {
            let sibling = if next == kd.child[0] {
                kd.child[1]
            } else {
                kd.child[0]
            };
            self.walk(sibling, next_axis(axis));
        }

        false
    }
}
