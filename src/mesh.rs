use glam::{DMat4, DVec3, Vec3};
use std::collections::HashMap;

/// Triangle or quad face. Triangles repeat their third corner (`d == c`).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MeshFace {
    pub a: u32,
    pub b: u32,
    pub c: u32,
    pub d: u32,
}

impl MeshFace {
    pub const fn triangle(a: u32, b: u32, c: u32) -> Self {
        Self { a, b, c, d: c }
    }

    pub const fn quad(a: u32, b: u32, c: u32, d: u32) -> Self {
        Self { a, b, c, d }
    }

    pub fn is_quad(&self) -> bool {
        self.c != self.d
    }

    pub fn triangle_count(&self) -> usize {
        if self.is_quad() {
            2
        } else {
            1
        }
    }

    /// Corners in winding order; three for triangles, four for quads.
    pub fn corners(&self) -> &[u32] {
        let all: &[u32; 4] = bytemuck::cast_ref(self);
        if self.is_quad() {
            &all[..]
        } else {
            &all[..3]
        }
    }

    pub fn min_corner(&self) -> u32 {
        self.a.min(self.b).min(self.c).min(self.d)
    }

    pub fn max_corner(&self) -> u32 {
        self.a.max(self.b).max(self.c).max(self.d)
    }

    pub fn remapped(&self, mut map: impl FnMut(u32) -> u32) -> Self {
        Self { a: map(self.a), b: map(self.b), c: map(self.c), d: map(self.d) }
    }
}

/// Axis aligned box in double precision. The empty box has inverted extents.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub min: DVec3,
    pub max: DVec3,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl BoundingBox {
    pub const EMPTY: BoundingBox =
        BoundingBox { min: DVec3::splat(f64::INFINITY), max: DVec3::splat(f64::NEG_INFINITY) };

    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    pub fn from_points<I>(points: I) -> Self
    where
        I: IntoIterator<Item = Vec3>,
    {
        let mut bounds = Self::EMPTY;
        for point in points {
            bounds.include_point(point.as_dvec3());
        }
        bounds
    }

    /// Finite and not inverted on any axis.
    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min.cmple(self.max).all()
    }

    pub fn include_point(&mut self, point: DVec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn union(&mut self, other: &BoundingBox) {
        if other.is_valid() {
            self.include_point(other.min);
            self.include_point(other.max);
        }
    }

    pub fn center(&self) -> DVec3 {
        0.5 * (self.min + self.max)
    }

    pub fn size(&self) -> DVec3 {
        self.max - self.min
    }

    pub fn corners(&self) -> [DVec3; 8] {
        let (lo, hi) = (self.min, self.max);
        [
            DVec3::new(lo.x, lo.y, lo.z),
            DVec3::new(lo.x, lo.y, hi.z),
            DVec3::new(lo.x, hi.y, lo.z),
            DVec3::new(lo.x, hi.y, hi.z),
            DVec3::new(hi.x, lo.y, lo.z),
            DVec3::new(hi.x, lo.y, hi.z),
            DVec3::new(hi.x, hi.y, lo.z),
            DVec3::new(hi.x, hi.y, hi.z),
        ]
    }

    pub fn transformed(&self, xform: &DMat4) -> Self {
        if !self.is_valid() {
            return Self::EMPTY;
        }
        let mut out = Self::EMPTY;
        for corner in self.corners() {
            out.include_point(xform.transform_point3(corner));
        }
        out
    }
}

/// CPU side mesh as handed over by model preparation. Normal and color arrays are either
/// empty or exactly one entry per vertex.
#[derive(Clone, Debug, Default)]
pub struct Mesh {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub colors: Vec<[f32; 4]>,
    pub faces: Vec<MeshFace>,
}

impl Mesh {
    pub fn new(positions: Vec<Vec3>, faces: Vec<MeshFace>) -> Self {
        Self { positions, normals: Vec::new(), colors: Vec::new(), faces }
    }

    pub fn with_normals(mut self, normals: Vec<Vec3>) -> Self {
        self.normals = normals;
        self
    }

    pub fn with_colors(mut self, colors: Vec<[f32; 4]>) -> Self {
        self.colors = colors;
        self
    }

    /// Eight shared corners and six outward facing quads; topologically closed.
    pub fn cube(size: f32) -> Self {
        let hs = size * 0.5;
        let positions = vec![
            Vec3::new(-hs, -hs, -hs),
            Vec3::new(hs, -hs, -hs),
            Vec3::new(hs, hs, -hs),
            Vec3::new(-hs, hs, -hs),
            Vec3::new(-hs, -hs, hs),
            Vec3::new(hs, -hs, hs),
            Vec3::new(hs, hs, hs),
            Vec3::new(-hs, hs, hs),
        ];
        let faces = vec![
            MeshFace::quad(0, 3, 2, 1), // back
            MeshFace::quad(4, 5, 6, 7), // front
            MeshFace::quad(0, 4, 7, 3), // left
            MeshFace::quad(1, 2, 6, 5), // right
            MeshFace::quad(3, 7, 6, 2), // top
            MeshFace::quad(0, 1, 5, 4), // bottom
        ];
        Self::new(positions, faces)
    }

    /// Flat grid of `columns x rows` quads in the XY plane; open along its border.
    pub fn grid(columns: u32, rows: u32, spacing: f32) -> Self {
        let stride = columns + 1;
        let mut positions = Vec::with_capacity(((columns + 1) * (rows + 1)) as usize);
        for row in 0..=rows {
            for column in 0..=columns {
                positions.push(Vec3::new(column as f32 * spacing, row as f32 * spacing, 0.0));
            }
        }
        let mut faces = Vec::with_capacity((columns * rows) as usize);
        for row in 0..rows {
            for column in 0..columns {
                let base = row * stride + column;
                faces.push(MeshFace::quad(base, base + 1, base + stride + 1, base + stride));
            }
        }
        Self::new(positions, faces)
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.faces.iter().map(MeshFace::triangle_count).sum()
    }

    pub fn has_normals(&self) -> bool {
        !self.normals.is_empty()
    }

    pub fn has_colors(&self) -> bool {
        !self.colors.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty() || self.faces.is_empty()
    }

    pub fn bounds(&self) -> BoundingBox {
        BoundingBox::from_points(self.positions.iter().copied())
    }

    /// Area weighted vertex normals; quads contribute both of their triangles.
    pub fn compute_normals(&mut self) {
        let mut accum = vec![Vec3::ZERO; self.positions.len()];
        let vertex_count = self.positions.len() as u32;
        for face in &self.faces {
            if face.max_corner() >= vertex_count {
                continue;
            }
            let mut add_triangle = |i0: u32, i1: u32, i2: u32| {
                let p0 = self.positions[i0 as usize];
                let p1 = self.positions[i1 as usize];
                let p2 = self.positions[i2 as usize];
                let normal = (p1 - p0).cross(p2 - p0);
                accum[i0 as usize] += normal;
                accum[i1 as usize] += normal;
                accum[i2 as usize] += normal;
            };
            add_triangle(face.a, face.b, face.c);
            if face.is_quad() {
                add_triangle(face.c, face.d, face.a);
            }
        }
        self.normals = accum.into_iter().map(|n| n.try_normalize().unwrap_or(Vec3::Z)).collect();
    }

    /// Appends another mesh. Per-vertex attributes survive only when both sides carry them.
    pub fn append(&mut self, other: &Mesh) {
        if self.positions.is_empty() {
            *self = other.clone();
            return;
        }
        let offset = self.positions.len() as u32;
        let keep_normals = self.has_normals() && other.has_normals();
        let keep_colors = self.has_colors() && other.has_colors();
        self.positions.extend_from_slice(&other.positions);
        if keep_normals {
            self.normals.extend_from_slice(&other.normals);
        } else {
            self.normals.clear();
        }
        if keep_colors {
            self.colors.extend_from_slice(&other.colors);
        } else {
            self.colors.clear();
        }
        self.faces.extend(other.faces.iter().map(|face| face.remapped(|i| i + offset)));
    }

    /// True when no edge is used by exactly one face. Coincident vertices are welded by
    /// position first so split normals do not open the mesh.
    pub fn is_closed(&self) -> bool {
        if self.faces.is_empty() {
            return false;
        }
        let mut weld: HashMap<[u32; 3], u32> = HashMap::with_capacity(self.positions.len());
        let topology: Vec<u32> = self
            .positions
            .iter()
            .map(|p| {
                let key = [p.x.to_bits(), p.y.to_bits(), p.z.to_bits()];
                let next = weld.len() as u32;
                *weld.entry(key).or_insert(next)
            })
            .collect();

        let mut edges: HashMap<(u32, u32), u32> = HashMap::with_capacity(self.faces.len() * 4);
        for face in &self.faces {
            let corners = face.corners();
            for (i, &start) in corners.iter().enumerate() {
                let end = corners[(i + 1) % corners.len()];
                let (Some(&s), Some(&e)) = (topology.get(start as usize), topology.get(end as usize)) else {
                    return false;
                };
                if s == e {
                    continue;
                }
                *edges.entry((s.min(e), s.max(e))).or_insert(0) += 1;
            }
        }
        !edges.is_empty() && edges.values().all(|&count| count != 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_is_closed_and_grid_is_open() {
        assert!(Mesh::cube(2.0).is_closed());
        assert!(!Mesh::grid(3, 2, 1.0).is_closed());
    }

    #[test]
    fn split_normal_cube_stays_closed() {
        // same cube with every face owning its own corners
        let cube = Mesh::cube(1.0);
        let mut split = Mesh::default();
        for face in &cube.faces {
            let mut piece = Mesh::new(
                face.corners().iter().map(|&i| cube.positions[i as usize]).collect(),
                vec![MeshFace::quad(0, 1, 2, 3)],
            );
            piece.compute_normals();
            split.append(&piece);
        }
        assert_eq!(split.vertex_count(), 24);
        assert!(split.has_normals());
        assert!(split.is_closed());
    }

    #[test]
    fn computed_normals_follow_winding() {
        let mut grid = Mesh::grid(1, 1, 1.0);
        grid.compute_normals();
        for normal in &grid.normals {
            assert!((normal.z - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn append_drops_attributes_missing_on_one_side() {
        let mut a = Mesh::grid(1, 1, 1.0).with_colors(vec![[1.0; 4]; 4]);
        let b = Mesh::grid(1, 1, 1.0);
        a.append(&b);
        assert_eq!(a.vertex_count(), 8);
        assert!(!a.has_colors());
        assert_eq!(a.faces[1], MeshFace::quad(4, 5, 7, 6));
    }

    #[test]
    fn bounding_box_transform_and_validity() {
        assert!(!BoundingBox::EMPTY.is_valid());
        let bounds = Mesh::cube(2.0).bounds();
        assert!(bounds.is_valid());
        let moved = bounds.transformed(&DMat4::from_translation(DVec3::new(5.0, 0.0, 0.0)));
        assert!((moved.min.x - 4.0).abs() < 1e-9);
        assert!((moved.max.x - 6.0).abs() < 1e-9);
    }
}
