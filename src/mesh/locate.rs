//! Point location: containment tests, home-trixel search, id lookup.

use std::f64::consts::{FRAC_PI_2, TAU};

use tracing::debug;

use crate::error::CatalogError;
use crate::geom::sphere::{radec_to_unit, unit_to_octahedron};

use super::{Mesh, Orientation, ROOT_COUNT, Trixel, TrixelId};

/// Edge tests tolerate this much numerical noise on trixel boundaries.
const INSIDE_LIMIT: f64 = -1.0e-5;

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - b[1] * a[2],
        a[2] * b[0] - b[2] * a[0],
        a[0] * b[1] - b[0] * a[1],
    ]
}

fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Whether an octahedron-mapped point lies inside a trixel.
///
/// Each edge cross-product dotted with the point must clear the limit; up
/// trixels walk their edges clockwise (a->b->c->a), down trixels mirror
/// with the anticlockwise order (a->c->b->a).
fn contains(trixel: &Trixel, mesh: &Mesh, p: [f64; 3]) -> bool {
    let corner = |v: usize| {
        let v = &mesh.vertices[v];
        [v.x, v.y, v.z]
    };
    let (a, b, c) = (corner(trixel.a), corner(trixel.b), corner(trixel.c));

    let edges = match trixel.orientation {
        Orientation::Up => [(a, b), (b, c), (c, a)],
        Orientation::Down => [(a, c), (c, b), (b, a)],
    };

    edges
        .iter()
        .all(|&(e0, e1)| dot(cross(e0, e1), p) >= INSIDE_LIMIT)
}

impl Mesh {
    /// Find the trixel at `depth` containing the point.
    ///
    /// Errors when the point is outside RA `[0, 2*pi)` / Dec
    /// `[-pi/2, pi/2]` or the depth exceeds the built mesh.
    pub fn home_trixel(&self, ra: f64, dec: f64, depth: u8) -> Result<usize, CatalogError> {
        if !(0.0..TAU).contains(&ra) || !(-FRAC_PI_2..=FRAC_PI_2).contains(&dec) {
            return Err(CatalogError::InvalidPoint { ra, dec });
        }
        if depth > self.depth() {
            return Err(CatalogError::DepthOutOfRange {
                depth,
                max: self.depth(),
            });
        }

        let p = unit_to_octahedron(radec_to_unit(ra, dec));

        for root in 0..ROOT_COUNT {
            if contains(&self.trixels[root], self, p) {
                return Ok(self.descend(root, p, depth));
            }
        }

        // Unreachable: the 8 roots tile the sphere and the edge tests
        // tolerate boundary noise.
        debug!(ra, dec, "no root trixel contains point");
        Err(CatalogError::InvalidPoint { ra, dec })
    }

    fn descend(&self, mut current: usize, p: [f64; 3], depth: u8) -> usize {
        for _ in 0..depth {
            let Some(children) = self.trixels[current].children else {
                break;
            };
            match children
                .iter()
                .find(|&&c| contains(&self.trixels[c], self, p))
            {
                Some(&child) => current = child,
                None => {
                    // Boundary noise can leave a point in no child; the
                    // shallower container is still a correct answer.
                    debug!(
                        trixel = %self.trixels[current].id(),
                        "point in no child trixel"
                    );
                    break;
                }
            }
        }
        current
    }

    /// Resolve a packed id to its arena index by walking the child chain,
    /// one path digit per level.
    pub fn resolve(&self, id: TrixelId) -> Option<usize> {
        if id.depth() > self.depth() {
            return None;
        }
        let mut current = Mesh::root(id.hemisphere(), id.quadrant());
        for level in 1..=id.depth() {
            current = self.trixels[current].children?[id.branch(level)];
        }
        Some(current)
    }

    /// Fetch a trixel by its packed id.
    pub fn get_trixel(&self, id: TrixelId) -> Option<&Trixel> {
        self.resolve(id).map(|index| &self.trixels[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::Hemisphere;

    /// Deterministic grid of in-domain sky positions.
    fn sky_grid(n: usize) -> Vec<(f64, f64)> {
        let mut points = Vec::new();
        for i in 0..n {
            let ra = TAU * (i as f64 + 0.37) / n as f64;
            for j in 0..n {
                let dec = -FRAC_PI_2 + (j as f64 + 0.5) / n as f64 * std::f64::consts::PI;
                points.push((ra, dec));
            }
        }
        points
    }

    #[test]
    fn every_point_has_one_home_per_depth() {
        let mesh = Mesh::new(5, 1).unwrap();
        for &(ra, dec) in &sky_grid(24) {
            for depth in 0..=mesh.depth() {
                let home = mesh.home_trixel(ra, dec, depth).unwrap();
                assert_eq!(
                    mesh.trixel(home).depth,
                    depth,
                    "point ({ra}, {dec}) at depth {depth}"
                );
            }
        }
    }

    #[test]
    fn ancestors_contain_the_point() {
        let mesh = Mesh::new(5, 1).unwrap();
        for &(ra, dec) in &sky_grid(16) {
            let home = mesh.home_trixel(ra, dec, mesh.depth()).unwrap();

            // The home at every shallower depth is exactly the ancestor
            // chain of the deepest home.
            let mut ancestor = home;
            for depth in (0..mesh.depth()).rev() {
                ancestor = mesh.trixel(ancestor).parent.unwrap();
                let shallow = mesh.home_trixel(ra, dec, depth).unwrap();
                assert_eq!(shallow, ancestor, "point ({ra}, {dec}) depth {depth}");
            }
        }
    }

    #[test]
    fn id_roundtrip_for_every_trixel() {
        let mesh = Mesh::new(4, 1).unwrap();
        for index in 0..mesh.trixel_count() {
            let id = mesh.trixel(index).id();
            assert_eq!(mesh.resolve(id), Some(index), "trixel {id}");
        }
    }

    #[test]
    fn resolve_rejects_foreign_depths() {
        let mesh = Mesh::new(2, 1).unwrap();
        let too_deep = TrixelId::pack(Hemisphere::North, 0, 3, 0);
        assert_eq!(mesh.resolve(too_deep), None);
    }

    #[test]
    fn poles_and_wrap_points_locate() {
        let mesh = Mesh::new(6, 1).unwrap();
        for (ra, dec) in [
            (0.0, FRAC_PI_2),
            (0.0, -FRAC_PI_2),
            (0.0, 0.0),
            (TAU - 1e-12, 0.3),
            (3.9, 1.2),
        ] {
            let home = mesh.home_trixel(ra, dec, mesh.depth()).unwrap();
            assert_eq!(mesh.trixel(home).depth, mesh.depth());
        }
    }

    #[test]
    fn pole_home_is_in_expected_hemisphere() {
        let mesh = Mesh::new(4, 1).unwrap();
        let north = mesh.home_trixel(1.0, FRAC_PI_2, 4).unwrap();
        assert_eq!(mesh.trixel(north).hemisphere, Hemisphere::North);
        let south = mesh.home_trixel(1.0, -FRAC_PI_2, 4).unwrap();
        assert_eq!(mesh.trixel(south).hemisphere, Hemisphere::South);
    }

    #[test]
    fn out_of_domain_points_error() {
        let mesh = Mesh::new(3, 1).unwrap();
        for (ra, dec) in [
            (-0.1, 0.0),
            (TAU, 0.0),
            (7.0, 0.0),
            (1.0, FRAC_PI_2 + 0.1),
            (1.0, -2.0),
        ] {
            assert!(
                matches!(
                    mesh.home_trixel(ra, dec, 2),
                    Err(CatalogError::InvalidPoint { .. })
                ),
                "({ra}, {dec}) should be rejected"
            );
        }
    }

    #[test]
    fn over_deep_request_errors() {
        let mesh = Mesh::new(3, 1).unwrap();
        assert!(matches!(
            mesh.home_trixel(1.0, 0.5, 4),
            Err(CatalogError::DepthOutOfRange { .. })
        ));
    }

    #[test]
    fn home_matches_vertex_backrefs() {
        // The home trixel shares its corner vertices' back-references.
        let mesh = Mesh::new(4, 1).unwrap();
        let home = mesh.home_trixel(2.2, -0.4, 3).unwrap();
        let t = mesh.trixel(home);
        for v in [t.a, t.b, t.c] {
            let found = mesh
                .vertex(v)
                .trixels_at(3)
                .iter()
                .flatten()
                .any(|&x| x == home);
            assert!(found);
        }
    }
}
