//! Region queries: clip a field of view to a minimal trixel set.
//!
//! A [`Region`] is an ephemeral per-query context borrowing the catalog
//! immutably, so any number of regions can run concurrently once import
//! has finished. Constraints move it through `Unclipped -> Clipped ->
//! Materialized`; changing any constraint resets it.
//!
//! The clip does no per-object distance test itself: it resolves the
//! centre trixel at a depth matched to the field width, adds every
//! trixel sharing a vertex with it, the ancestors of those up to the
//! shallowest depth the value range maps to, and their descendants down
//! to the deepest. Consumers walk the materialized lists and filter on
//! true angular distance.

use std::f64::consts::{PI, TAU};

use tracing::{debug, error};

use crate::catalog::{Catalog, CatalogObject};
use crate::error::CatalogError;
use crate::mesh::{self, Mesh, ROOT_COUNT};

/// One non-empty trixel's object list in a materialized region.
#[derive(Debug, Clone, Copy)]
pub struct ObjectHead {
    /// Flat index of the first object in list order.
    pub(crate) head: u32,
    /// Objects on the list.
    pub count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unclipped,
    Clipped,
    Materialized,
}

/// A clipped sky region over one dataset.
pub struct Region<'a> {
    catalog: &'a Catalog,
    slot: usize,
    state: State,

    centre_ra: f64,
    centre_dec: f64,
    /// Full angular width of the field.
    fov: f64,
    min_value: f64,
    max_value: f64,

    min_depth: u8,
    max_depth: u8,
    fov_depth: u8,
    centre: usize,

    trixels: Vec<usize>,
    neighbours: usize,
    heads: Vec<ObjectHead>,
    count: usize,
}

impl<'a> Region<'a> {
    /// A region over a dataset, initially clipped to the whole sphere
    /// and the dataset's full declared value range.
    pub fn new(catalog: &'a Catalog, slot: usize) -> Result<Region<'a>, CatalogError> {
        let ds = catalog.dataset(slot)?;
        let (min_value, max_value) = ds.declared_range();

        let mut region = Region {
            catalog,
            slot,
            state: State::Unclipped,
            centre_ra: 0.0,
            centre_dec: 0.0,
            fov: TAU,
            min_value,
            max_value,
            min_depth: 0,
            max_depth: 0,
            fov_depth: 0,
            centre: 0,
            trixels: Vec::new(),
            neighbours: 0,
            heads: Vec::new(),
            count: 0,
        };
        region.clip(0.0, 0.0, TAU, min_value, max_value)?;
        Ok(region)
    }

    /// Constrain the region to a field centred on (`ra`, `dec`) with
    /// full angular width `fov`, keeping only key values in
    /// `[min_value, max_value]`.
    ///
    /// Any error leaves the region unclipped; a later materialize is
    /// rejected until a clip succeeds.
    pub fn clip(
        &mut self,
        ra: f64,
        dec: f64,
        fov: f64,
        min_value: f64,
        max_value: f64,
    ) -> Result<(), CatalogError> {
        self.state = State::Unclipped;
        self.trixels.clear();
        self.neighbours = 0;
        self.heads.clear();
        self.count = 0;

        let ds = self.catalog.dataset(self.slot)?;
        let map = ds.depth_map().ok_or(CatalogError::NotImported)?;
        let (min_depth, max_depth) = map.clip_depths(min_value, max_value)?;

        let mesh = self.catalog.mesh();
        let fov_depth = mesh::depth_for_resolution(fov).min(mesh.depth());
        let centre = mesh.home_trixel(ra, dec, fov_depth)?;

        debug!(
            min_value,
            max_value,
            min_depth,
            max_depth,
            fov_deg = fov.to_degrees(),
            fov_depth,
            centre = %mesh.trixel(centre).id(),
            "clipped region"
        );

        self.centre_ra = ra;
        self.centre_dec = dec;
        self.fov = fov;
        self.min_value = min_value;
        self.max_value = max_value;
        self.min_depth = min_depth;
        self.max_depth = max_depth;
        self.fov_depth = fov_depth;
        self.centre = centre;
        self.state = State::Clipped;
        Ok(())
    }

    /// Resolve the candidate trixels and collect every non-empty object
    /// list whose trixel depth falls inside the value-derived band.
    ///
    /// Gathering happens on the first call after a clip; repeated calls
    /// reuse the resolved set.
    pub fn materialize(&mut self) -> Result<(&[ObjectHead], usize), CatalogError> {
        match self.state {
            State::Unclipped => return Err(CatalogError::Unclipped),
            State::Clipped => {
                self.gather()?;
                self.collect_heads()?;
                self.state = State::Materialized;
            }
            State::Materialized => {
                debug!("reusing clipped trixels");
            }
        }
        Ok((&self.heads, self.count))
    }

    /// Candidate trixel resolution: neighbours, ancestors, descendants.
    fn gather(&mut self) -> Result<(), CatalogError> {
        let mesh = self.catalog.mesh();
        let capacity = mesh.trixel_count();
        let mut seen = vec![false; capacity];

        if self.fov >= PI {
            // Whole sphere: enumerating from the roots beats narrowing.
            debug!(fov_deg = self.fov.to_degrees(), "whole-sphere clip");
            for root in 0..ROOT_COUNT {
                seen[root] = true;
                self.trixels.push(root);
            }
        } else {
            // Every trixel sharing a corner with the centre trixel at
            // the fov depth, the centre itself among them.
            let centre = mesh.trixel(self.centre);
            for vertex in [centre.a, centre.b, centre.c] {
                for &trixel in mesh.vertex(vertex).trixels_at(self.fov_depth) {
                    if let Some(t) = trixel {
                        if !seen[t] {
                            seen[t] = true;
                            self.trixels.push(t);
                        }
                    }
                }
            }
        }
        self.neighbours = self.trixels.len();

        // Ancestors of the neighbour set, one depth per round, stopping
        // at the shallowest stored depth or when a round adds nothing.
        let mut round = 0..self.trixels.len();
        let mut depth = self.fov_depth;
        while depth > self.min_depth && !round.is_empty() {
            for i in round.clone() {
                if let Some(parent) = mesh.trixel(self.trixels[i]).parent {
                    if !seen[parent] {
                        seen[parent] = true;
                        self.trixels.push(parent);
                    }
                }
            }
            round = round.end..self.trixels.len();
            depth -= 1;
        }
        let ancestors = self.trixels.len() - self.neighbours;

        // Full 4-ary expansion below each neighbour.
        for i in 0..self.neighbours {
            descend(mesh, self.trixels[i], self.max_depth, &mut seen, &mut self.trixels);
        }

        debug!(
            neighbours = self.neighbours,
            ancestors,
            descendants = self.trixels.len() - self.neighbours - ancestors,
            "gathered candidate trixels"
        );

        let needed = self.trixels.len();
        if needed > capacity {
            error!(
                needed,
                capacity,
                centre = %mesh.trixel(self.centre).id(),
                min_depth = self.min_depth,
                max_depth = self.max_depth,
                fov_depth = self.fov_depth,
                "candidate trixel set overflowed the mesh"
            );
            self.trixels.clear();
            self.state = State::Unclipped;
            return Err(CatalogError::CandidateOverflow { needed, capacity });
        }
        Ok(())
    }

    fn collect_heads(&mut self) -> Result<(), CatalogError> {
        let mesh = self.catalog.mesh();
        let mut pruned = 0usize;

        for &t in &self.trixels {
            let trixel = mesh.trixel(t);
            if trixel.depth < self.min_depth || trixel.depth > self.max_depth {
                pruned += 1;
                continue;
            }
            let data = trixel.slot(self.slot);
            let Some(head) = data.head else { continue };
            self.heads.push(ObjectHead {
                head,
                count: data.count,
            });
            self.count += data.count as usize;
        }

        debug!(
            candidates = self.trixels.len(),
            populated = self.heads.len(),
            pruned,
            objects = self.count,
            "materialized region"
        );
        Ok(())
    }

    /// Every object on the materialized lists, in head order.
    ///
    /// Empty before a successful [`materialize`](Region::materialize).
    pub fn iter(&self) -> impl Iterator<Item = &CatalogObject> + '_ {
        self.catalog
            .dataset(self.slot)
            .into_iter()
            .flat_map(move |ds| {
                self.heads.iter().flat_map(move |h| {
                    ds.list(Some(h.head)).map(move |i| ds.object(i as usize))
                })
            })
    }

    /// Total objects across the materialized lists.
    pub fn count(&self) -> usize {
        self.count
    }

    /// The clip centre (RA, Dec) in radians.
    pub fn centre(&self) -> (f64, f64) {
        (self.centre_ra, self.centre_dec)
    }

    /// Full angular width of the clipped field, in radians.
    pub fn fov(&self) -> f64 {
        self.fov
    }

    /// The clipped key value range.
    pub fn value_range(&self) -> (f64, f64) {
        (self.min_value, self.max_value)
    }

    /// Depth limits the clip resolved to: `(min, max, fov)`.
    pub fn depths(&self) -> (u8, u8, u8) {
        (self.min_depth, self.max_depth, self.fov_depth)
    }
}

/// Recursively add `parent`'s children, down to `max_depth`.
fn descend(mesh: &Mesh, parent: usize, max_depth: u8, seen: &mut [bool], out: &mut Vec<usize>) {
    if mesh.trixel(parent).depth >= max_depth {
        return;
    }
    let Some(children) = mesh.trixel(parent).children else {
        return;
    };
    for child in children {
        if !seen[child] {
            seen[child] = true;
            out.push(child);
        }
    }
    for child in children {
        descend(mesh, child, max_depth, seen, out);
    }
}
