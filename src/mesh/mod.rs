//! Hierarchical Triangular Mesh over the celestial sphere.
//!
//! The sphere is flattened onto an octahedron and its 8 faces are
//! recursively split into 4 spherical triangles ("trixels") down to a
//! configured depth. Construction happens once, eagerly, at catalog-open
//! time; afterwards the geometry is immutable and any number of query
//! threads may read it. Trixels and vertices live in arenas and refer to
//! each other by index, so nothing here owns a pointer.

pub mod build;
pub mod id;
pub mod locate;

use std::f64::consts::FRAC_PI_2;

pub use id::TrixelId;

use crate::error::CatalogError;

/// Deepest subdivision level a mesh can be built with.
pub const MAX_DEPTH: u8 = 12;

/// Trixels sharing one vertex at a single depth level.
pub const TRIXELS_PER_VERTEX: usize = 6;

pub(crate) const CHILD_COUNT: usize = 4;
pub(crate) const ROOT_COUNT: usize = 8;

/// Angular resolution of one trixel edge per depth level, halving with
/// every subdivision.
const RESOLUTION: [f64; MAX_DEPTH as usize + 1] = [
    FRAC_PI_2,
    FRAC_PI_2 / 2.0,
    FRAC_PI_2 / 4.0,
    FRAC_PI_2 / 8.0,
    FRAC_PI_2 / 16.0,
    FRAC_PI_2 / 32.0,
    FRAC_PI_2 / 64.0,
    FRAC_PI_2 / 128.0,
    FRAC_PI_2 / 256.0,
    FRAC_PI_2 / 512.0,
    FRAC_PI_2 / 1024.0,
    FRAC_PI_2 / 2048.0,
    FRAC_PI_2 / 4096.0,
];

/// Trixel edge resolution at `depth`, in radians.
pub fn resolution(depth: u8) -> f64 {
    RESOLUTION[usize::from(depth.min(MAX_DEPTH))]
}

/// Shallowest depth whose trixels resolve the given angular scale.
pub fn depth_for_resolution(angle: f64) -> u8 {
    for (depth, &res) in RESOLUTION.iter().enumerate() {
        if angle >= res {
            return depth as u8;
        }
    }
    MAX_DEPTH
}

/// Which way a trixel points on the flattened octahedron face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Up,
    Down,
}

impl Orientation {
    pub(crate) fn flip(self) -> Orientation {
        match self {
            Orientation::Up => Orientation::Down,
            Orientation::Down => Orientation::Up,
        }
    }
}

/// Northern or southern root family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hemisphere {
    North,
    South,
}

/// A corner of one or more trixels, created once per unique position.
#[derive(Debug, Clone)]
pub struct Vertex {
    /// Right ascension in radians.
    pub ra: f64,
    /// Declination in radians.
    pub dec: f64,
    /// Octahedron-mapped coordinates.
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Depth the vertex was first used at.
    depth: u8,
    /// Back-references to every trixel using this vertex, grouped 6 slots
    /// per depth level starting at `depth`.
    trixels: Vec<Option<usize>>,
}

impl Vertex {
    pub(crate) fn new(x: f64, y: f64, z: f64, depth: u8, mesh_depth: u8) -> Vertex {
        let (ra, dec) = crate::geom::sphere::octahedron_to_radec([x, y, z]);
        let groups = usize::from(mesh_depth - depth) + 1;
        Vertex {
            ra,
            dec,
            x,
            y,
            z,
            depth,
            trixels: vec![None; groups * TRIXELS_PER_VERTEX],
        }
    }

    /// Depth this vertex first appeared at.
    pub fn first_depth(&self) -> u8 {
        self.depth
    }

    pub(crate) fn attach(&mut self, level: u8, trixel: usize) {
        let group = usize::from(level - self.depth) * TRIXELS_PER_VERTEX;
        for slot in &mut self.trixels[group..group + TRIXELS_PER_VERTEX] {
            if slot.is_none() {
                *slot = Some(trixel);
                return;
            }
        }
        // By construction at most 6 trixels meet at a vertex per level.
        tracing::error!(
            ra = self.ra,
            dec = self.dec,
            level,
            "vertex back-reference overflow"
        );
    }

    /// The up-to-6 trixels sharing this vertex at `depth`, or an empty
    /// slice when the vertex does not exist at that depth.
    pub fn trixels_at(&self, depth: u8) -> &[Option<usize>] {
        if depth < self.depth {
            return &[];
        }
        let group = usize::from(depth - self.depth) * TRIXELS_PER_VERTEX;
        match self.trixels.get(group..group + TRIXELS_PER_VERTEX) {
            Some(slice) => slice,
            None => &[],
        }
    }
}

/// Object-list anchor for one dataset slot.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TrixelData {
    pub(crate) head: Option<u32>,
    pub(crate) count: u32,
}

/// One spherical triangle of the mesh.
#[derive(Debug, Clone)]
pub struct Trixel {
    /// Corner vertex indices.
    pub a: usize,
    pub b: usize,
    pub c: usize,
    /// Parent trixel index; `None` for the 8 roots.
    pub parent: Option<usize>,
    /// Child trixel indices; `None` iff at the mesh depth.
    pub children: Option<[usize; CHILD_COUNT]>,
    pub orientation: Orientation,
    pub hemisphere: Hemisphere,
    /// Root quadrant, 0-3.
    pub quadrant: u8,
    pub depth: u8,
    pub(crate) position: u32,
    pub(crate) data: Vec<TrixelData>,
}

impl Trixel {
    /// Packed identifier of this trixel.
    pub fn id(&self) -> TrixelId {
        TrixelId::pack(self.hemisphere, self.quadrant, self.depth, self.position)
    }

    /// Number of objects stored here for a dataset slot.
    pub fn object_count(&self, slot: usize) -> u32 {
        self.data[slot].count
    }

    pub(crate) fn slot(&self, slot: usize) -> TrixelData {
        self.data[slot]
    }

    pub(crate) fn slot_mut(&mut self, slot: usize) -> &mut TrixelData {
        &mut self.data[slot]
    }
}

/// The built mesh: 8 root trixels, their subdivisions, and the shared
/// vertex arena.
pub struct Mesh {
    pub(crate) trixels: Vec<Trixel>,
    pub(crate) vertices: Vec<Vertex>,
    depth: u8,
    slots: usize,
}

impl Mesh {
    /// Build the full mesh to `depth`, with `dataset_slots` object-list
    /// anchors per trixel.
    pub fn new(depth: u8, dataset_slots: usize) -> Result<Mesh, CatalogError> {
        if depth > MAX_DEPTH {
            return Err(CatalogError::DepthOutOfRange {
                depth,
                max: MAX_DEPTH,
            });
        }
        Ok(build::build(depth, dataset_slots))
    }

    /// Configured mesh depth.
    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// Number of per-trixel dataset slots.
    pub fn dataset_slots(&self) -> usize {
        self.slots
    }

    /// Total trixel count across all depths.
    pub fn trixel_count(&self) -> usize {
        self.trixels.len()
    }

    /// Total unique vertex count.
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Arena index of a root trixel.
    pub fn root(hemisphere: Hemisphere, quadrant: u8) -> usize {
        let base = match hemisphere {
            Hemisphere::North => 0,
            Hemisphere::South => 4,
        };
        base + usize::from(quadrant)
    }

    pub fn trixel(&self, index: usize) -> &Trixel {
        &self.trixels[index]
    }

    pub fn vertex(&self, index: usize) -> &Vertex {
        &self.vertices[index]
    }

    pub(crate) fn trixel_mut(&mut self, index: usize) -> &mut Trixel {
        &mut self.trixels[index]
    }

    pub(crate) fn new_parts(
        trixels: Vec<Trixel>,
        vertices: Vec<Vertex>,
        depth: u8,
        slots: usize,
    ) -> Mesh {
        Mesh {
            trixels,
            vertices,
            depth,
            slots,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn resolution_halves_per_depth() {
        for depth in 1..=MAX_DEPTH {
            let ratio = resolution(depth - 1) / resolution(depth);
            assert!((ratio - 2.0).abs() < 1e-12);
        }
    }

    #[test]
    fn depth_for_resolution_bounds() {
        assert_eq!(depth_for_resolution(PI), 0);
        assert_eq!(depth_for_resolution(FRAC_PI_2), 0);
        assert_eq!(depth_for_resolution(FRAC_PI_2 / 2.0), 1);
        // Finer than the deepest level clamps to the maximum.
        assert_eq!(depth_for_resolution(1e-9), MAX_DEPTH);
        // Finer scales need deeper meshes.
        let d1 = depth_for_resolution(0.1f64.to_radians());
        let d2 = depth_for_resolution(1.0f64.to_radians());
        assert!(d1 > d2);
    }

    #[test]
    fn trixel_counts_by_depth() {
        for depth in 0..4u8 {
            let mesh = Mesh::new(depth, 1).unwrap();
            // 8 * (4^(d+1) - 1) / 3 trixels in a complete 4-ary forest.
            let expected = 8 * (4usize.pow(u32::from(depth) + 1) - 1) / 3;
            assert_eq!(mesh.trixel_count(), expected, "depth {depth}");
        }
    }

    #[test]
    fn rejects_over_deep_mesh() {
        assert!(matches!(
            Mesh::new(MAX_DEPTH + 1, 1),
            Err(CatalogError::DepthOutOfRange { .. })
        ));
    }

    #[test]
    fn roots_have_expected_layout() {
        let mesh = Mesh::new(2, 1).unwrap();
        for quadrant in 0..4u8 {
            let n = mesh.trixel(Mesh::root(Hemisphere::North, quadrant));
            assert_eq!(n.orientation, Orientation::Up);
            assert_eq!(n.hemisphere, Hemisphere::North);
            assert_eq!(n.quadrant, quadrant);
            assert_eq!(n.depth, 0);
            assert!(n.parent.is_none());

            let s = mesh.trixel(Mesh::root(Hemisphere::South, quadrant));
            assert_eq!(s.orientation, Orientation::Down);
            assert_eq!(s.hemisphere, Hemisphere::South);
            assert_eq!(s.quadrant, quadrant);
        }
    }

    #[test]
    fn children_complete_except_at_depth() {
        let mesh = Mesh::new(3, 1).unwrap();
        for t in &mesh.trixels {
            if t.depth == mesh.depth() {
                assert!(t.children.is_none());
            } else {
                assert!(t.children.is_some());
            }
        }
    }

    #[test]
    fn vertex_sharing_bounds() {
        let mesh = Mesh::new(4, 1).unwrap();
        // Vertices are deduplicated: a depth-d mesh has far fewer vertices
        // than 3 corners per trixel.
        assert!(mesh.vertex_count() * 2 < mesh.trixel_count() * 3);

        // No more than 6 trixels share a vertex at any depth.
        for v in &mesh.vertices {
            for depth in v.first_depth()..=mesh.depth() {
                let n = v.trixels_at(depth).iter().flatten().count();
                assert!(n <= TRIXELS_PER_VERTEX);
                assert!(n > 0, "vertex unused at depth {depth}");
            }
        }
    }

    #[test]
    fn child_vertices_lie_on_parent_face() {
        let mesh = Mesh::new(3, 1).unwrap();
        for t in &mesh.trixels {
            for corner in [t.a, t.b, t.c] {
                let v = mesh.vertex(corner);
                let l1 = v.x.abs() + v.y.abs() + v.z.abs();
                assert!((l1 - 1.0).abs() < 1e-12);
            }
        }
    }
}
