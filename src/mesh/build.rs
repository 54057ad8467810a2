//! Mesh construction: octahedron roots and recursive subdivision.
//!
//! Midpoint vertices are deduplicated through a declination-banded strip
//! cache: every vertex position at the final depth falls on a regular
//! (y band, x step) grid of the octahedron, so a quantized lookup finds an
//! existing vertex no matter which neighbouring trixel created it first.

use tracing::info;

use crate::geom::sphere::octahedron_midpoint;

use super::{
    CHILD_COUNT, Hemisphere, Mesh, Orientation, ROOT_COUNT, Trixel, TrixelData, Vertex,
};

/// The six octahedron corners; y is the polar axis.
const OCTAHEDRON: [[f64; 3]; 6] = [
    [0.0, 1.0, 0.0],
    [0.0, 0.0, 1.0],
    [1.0, 0.0, 0.0],
    [0.0, 0.0, -1.0],
    [-1.0, 0.0, 0.0],
    [0.0, -1.0, 0.0],
];

/// Corner assignments for the 8 root faces: N0-N3 fan around the north
/// pole, S0-S3 around the south pole.
const ROOT_CORNERS: [(Hemisphere, [usize; 3]); ROOT_COUNT] = [
    (Hemisphere::North, [0, 1, 2]),
    (Hemisphere::North, [0, 2, 3]),
    (Hemisphere::North, [0, 3, 4]),
    (Hemisphere::North, [0, 4, 1]),
    (Hemisphere::South, [5, 1, 2]),
    (Hemisphere::South, [5, 2, 3]),
    (Hemisphere::South, [5, 3, 4]),
    (Hemisphere::South, [5, 4, 1]),
];

/// One declination band of the vertex cache.
struct Strip {
    width: f64,
    half: usize,
    slots: Vec<Option<usize>>,
}

struct Builder {
    trixels: Vec<Trixel>,
    vertices: Vec<Vertex>,
    strips: Vec<Strip>,
    step: f64,
    depth: u8,
    slots: usize,
}

pub(super) fn build(depth: u8, dataset_slots: usize) -> Mesh {
    let mut b = Builder::new(depth, dataset_slots);

    // Roots occupy arena slots 0..8 in N0..N3, S0..S3 order.
    for (root, &(hemisphere, corners)) in ROOT_CORNERS.iter().enumerate() {
        let a = b.vertex_at(0, OCTAHEDRON[corners[0]]);
        let bb = b.vertex_at(0, OCTAHEDRON[corners[1]]);
        let c = b.vertex_at(0, OCTAHEDRON[corners[2]]);
        let orientation = match hemisphere {
            Hemisphere::North => Orientation::Up,
            Hemisphere::South => Orientation::Down,
        };
        b.trixels.push(Trixel {
            a,
            b: bb,
            c,
            parent: None,
            children: None,
            orientation,
            hemisphere,
            quadrant: (root % 4) as u8,
            depth: 0,
            position: 0,
            data: vec![TrixelData::default(); dataset_slots],
        });
        for v in [a, bb, c] {
            b.vertices[v].attach(0, root);
        }
    }

    for root in 0..ROOT_COUNT {
        b.subdivide(root, 0);
    }

    info!(
        depth,
        trixels = b.trixels.len(),
        vertices = b.vertices.len(),
        resolution_deg = super::resolution(depth).to_degrees(),
        "built HTM mesh"
    );

    Mesh::new_parts(b.trixels, b.vertices, depth, dataset_slots)
}

impl Builder {
    fn new(depth: u8, dataset_slots: usize) -> Builder {
        let strip_count = (1usize << (depth + 1)) + 1;
        let step = 2.0 / (strip_count - 1) as f64;
        let mid = strip_count >> 1;

        let strips = (0..strip_count)
            .map(|i| {
                let rings = if i <= mid { i } else { strip_count - 1 - i };
                let steps = (rings * 4).max(1);
                Strip {
                    width: rings as f64 * step,
                    half: steps / 2,
                    slots: vec![None; steps],
                }
            })
            .collect();

        Builder {
            trixels: Vec::new(),
            vertices: Vec::new(),
            strips,
            step,
            depth,
            slots: dataset_slots,
        }
    }

    /// Look a vertex up in the strip cache, creating it on first use.
    fn vertex_at(&mut self, level: u8, p: [f64; 3]) -> usize {
        let [x, y, z] = p;
        let last = self.strips.len() - 1;
        let y_pos = ((y + 1.0) / self.step).round() as usize;
        let strip = &mut self.strips[y_pos];

        let x_pos = if y_pos == 0 || y_pos == last {
            0 // pole, a single shared vertex
        } else {
            let mut pos = ((x + strip.width) / self.step).round() as usize;
            if z < -1e-5 {
                pos += strip.half;
            }
            pos
        };

        if let Some(existing) = strip.slots[x_pos] {
            return existing;
        }

        let index = self.vertices.len();
        self.vertices.push(Vertex::new(x, y, z, level, self.depth));
        strip.slots[x_pos] = Some(index);
        index
    }

    /// Split `parent` (at `level`) into its 4 children and recurse.
    fn subdivide(&mut self, parent: usize, level: u8) {
        if level >= self.depth {
            return;
        }
        let child_level = level + 1;

        let p = &self.trixels[parent];
        let (pa, pb, pc) = (p.a, p.b, p.c);
        let orientation = p.orientation;
        let hemisphere = p.hemisphere;
        let quadrant = p.quadrant;
        let position = p.position;

        let corner = |v: &Vertex| [v.x, v.y, v.z];
        let ca = corner(&self.vertices[pa]);
        let cb = corner(&self.vertices[pb]);
        let cc = corner(&self.vertices[pc]);

        // Midpoint a opposes the parent's a corner, b and c likewise.
        let ma = self.vertex_at(child_level, octahedron_midpoint(cc, cb));
        let mb = self.vertex_at(child_level, octahedron_midpoint(ca, cb));
        let mc = self.vertex_at(child_level, octahedron_midpoint(cc, ca));

        // Child 0 is the medial triangle and flips orientation; children
        // 1-3 each keep one parent corner and the parent's orientation.
        let corners = [[ma, mb, mc], [pa, mb, mc], [mb, pb, ma], [mc, ma, pc]];

        let base = self.trixels.len();
        for (k, &[a, b, c]) in corners.iter().enumerate() {
            let index = base + k;
            let child_position = if k == 0 {
                position
            } else {
                position | (k as u32) << ((u32::from(child_level) - 1) * 2)
            };
            self.trixels.push(Trixel {
                a,
                b,
                c,
                parent: Some(parent),
                children: None,
                orientation: if k == 0 { orientation.flip() } else { orientation },
                hemisphere,
                quadrant,
                depth: child_level,
                position: child_position,
                data: vec![TrixelData::default(); self.slots],
            });
            for v in [a, b, c] {
                self.vertices[v].attach(child_level, index);
            }
        }
        self.trixels[parent].children = Some([base, base + 1, base + 2, base + 3]);

        for k in 0..CHILD_COUNT {
            self.subdivide(base + k, child_level);
        }
    }
}
