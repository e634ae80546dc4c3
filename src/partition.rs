//! Splits CPU meshes into chunks whose local indices fit 16 bits, and packs each chunk into
//! one of four interleaved vertex layouts.

use std::collections::HashMap;
use std::ops::Range;

use log::debug;
use thiserror::Error;

use crate::mesh::{BoundingBox, Mesh, MeshFace};

/// One more than the largest `u16` index.
pub const MAX_PARTITION_VERTICES: usize = u16::MAX as usize + 1;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct VertexP {
    pub position: [f32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct VertexPN {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct VertexPC {
    pub position: [f32; 3],
    pub color: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct VertexPNC {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub color: [f32; 4],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AttributeSemantic {
    Position,
    Normal,
    Color,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayoutAttribute {
    pub semantic: AttributeSemantic,
    pub components: i32,
    pub offset: i32,
}

const POSITION: LayoutAttribute = LayoutAttribute { semantic: AttributeSemantic::Position, components: 3, offset: 0 };
const NORMAL: LayoutAttribute = LayoutAttribute { semantic: AttributeSemantic::Normal, components: 3, offset: 12 };
const COLOR_AFTER_POSITION: LayoutAttribute =
    LayoutAttribute { semantic: AttributeSemantic::Color, components: 4, offset: 12 };
const COLOR_AFTER_NORMAL: LayoutAttribute =
    LayoutAttribute { semantic: AttributeSemantic::Color, components: 4, offset: 24 };

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VertexLayout {
    Position,
    PositionNormal,
    PositionColor,
    PositionNormalColor,
}

impl VertexLayout {
    pub fn for_flags(has_normals: bool, has_colors: bool) -> Self {
        match (has_normals, has_colors) {
            (false, false) => VertexLayout::Position,
            (true, false) => VertexLayout::PositionNormal,
            (false, true) => VertexLayout::PositionColor,
            (true, true) => VertexLayout::PositionNormalColor,
        }
    }

    pub fn for_mesh(mesh: &Mesh) -> Self {
        Self::for_flags(mesh.has_normals(), mesh.has_colors())
    }

    pub const fn stride(self) -> usize {
        match self {
            VertexLayout::Position => std::mem::size_of::<VertexP>(),
            VertexLayout::PositionNormal => std::mem::size_of::<VertexPN>(),
            VertexLayout::PositionColor => std::mem::size_of::<VertexPC>(),
            VertexLayout::PositionNormalColor => std::mem::size_of::<VertexPNC>(),
        }
    }

    pub const fn has_normals(self) -> bool {
        matches!(self, VertexLayout::PositionNormal | VertexLayout::PositionNormalColor)
    }

    pub const fn has_colors(self) -> bool {
        matches!(self, VertexLayout::PositionColor | VertexLayout::PositionNormalColor)
    }

    pub fn attributes(self) -> &'static [LayoutAttribute] {
        match self {
            VertexLayout::Position => &[POSITION],
            VertexLayout::PositionNormal => &[POSITION, NORMAL],
            VertexLayout::PositionColor => &[POSITION, COLOR_AFTER_POSITION],
            VertexLayout::PositionNormalColor => &[POSITION, NORMAL, COLOR_AFTER_NORMAL],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionLimits {
    pub max_vertices: usize,
    pub max_faces: usize,
}

impl PartitionLimits {
    /// `max_vertices` is clamped so a quad always fits and local indices stay 16 bit.
    pub fn new(max_vertices: usize, max_faces: usize) -> Self {
        Self { max_vertices: max_vertices.clamp(4, MAX_PARTITION_VERTICES), max_faces: max_faces.max(1) }
    }
}

impl Default for PartitionLimits {
    fn default() -> Self {
        Self::new(u16::MAX as usize - 3, i32::MAX as usize - 3)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshPartition {
    pub vertex_start: usize,
    pub vertex_end: usize,
    pub face_start: usize,
    pub face_end: usize,
    pub triangle_count: usize,
}

impl MeshPartition {
    pub fn vertex_range(&self) -> Range<usize> {
        self.vertex_start..self.vertex_end
    }

    pub fn face_range(&self) -> Range<usize> {
        self.face_start..self.face_end
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_end - self.vertex_start
    }

    pub fn face_count(&self) -> usize {
        self.face_end - self.face_start
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PartitionError {
    #[error("mesh has no vertices or no faces")]
    EmptyMesh,
    #[error("face {face} references vertex {index} but the mesh has {vertex_count} vertices")]
    IndexOutOfRange { face: usize, index: u32, vertex_count: usize },
    #[error("{attribute} count {found} does not match vertex count {expected}")]
    AttributeCountMismatch { attribute: &'static str, expected: usize, found: usize },
    #[error("partition {index} produced an empty vertex or index array")]
    EmptyPartition { index: usize },
}

/// Interleaved vertices of one partition, typed by layout.
#[derive(Debug, Clone, PartialEq)]
pub enum VertexData {
    P(Vec<VertexP>),
    PN(Vec<VertexPN>),
    PC(Vec<VertexPC>),
    PNC(Vec<VertexPNC>),
}

impl VertexData {
    pub fn layout(&self) -> VertexLayout {
        match self {
            VertexData::P(_) => VertexLayout::Position,
            VertexData::PN(_) => VertexLayout::PositionNormal,
            VertexData::PC(_) => VertexLayout::PositionColor,
            VertexData::PNC(_) => VertexLayout::PositionNormalColor,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            VertexData::P(v) => v.len(),
            VertexData::PN(v) => v.len(),
            VertexData::PC(v) => v.len(),
            VertexData::PNC(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            VertexData::P(v) => bytemuck::cast_slice(v),
            VertexData::PN(v) => bytemuck::cast_slice(v),
            VertexData::PC(v) => bytemuck::cast_slice(v),
            VertexData::PNC(v) => bytemuck::cast_slice(v),
        }
    }
}

/// CPU arrays for one upload. Dropped as soon as the upload attempt returns.
#[derive(Debug, Clone)]
pub struct PartitionBuffers {
    pub vertices: VertexData,
    pub indices: Vec<u16>,
}

impl PartitionBuffers {
    pub fn layout(&self) -> VertexLayout {
        self.vertices.layout()
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}

/// A mesh in partition order. Every display mesh cut from it holds a shared reference.
#[derive(Debug)]
pub struct PartitionedMesh {
    mesh: Mesh,
    partitions: Vec<MeshPartition>,
    layout: VertexLayout,
    closed: bool,
}

impl PartitionedMesh {
    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    pub fn partitions(&self) -> &[MeshPartition] {
        &self.partitions
    }

    pub fn partition(&self, index: usize) -> Option<&MeshPartition> {
        self.partitions.get(index)
    }

    pub fn layout(&self) -> VertexLayout {
        self.layout
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn partition_bounds(&self, index: usize) -> BoundingBox {
        match self.partitions.get(index) {
            Some(part) => BoundingBox::from_points(self.mesh.positions[part.vertex_range()].iter().copied()),
            None => BoundingBox::EMPTY,
        }
    }

    /// Interleaved vertices re-based to the partition start, and 16 bit triangle indices.
    /// Quads `(a, b, c, d)` expand to `(a, b, c)` and `(c, d, a)`.
    pub fn build_buffers(&self, index: usize) -> Result<PartitionBuffers, PartitionError> {
        let part = self.partitions.get(index).ok_or(PartitionError::EmptyPartition { index })?;
        let vertices = self.vertex_data(part);

        let base = part.vertex_start as u32;
        let mut indices = Vec::with_capacity(part.triangle_count * 3);
        for (offset, face) in self.mesh.faces[part.face_range()].iter().enumerate() {
            let local = |corner: u32| {
                corner
                    .checked_sub(base)
                    .and_then(|i| u16::try_from(i).ok())
                    .filter(|&i| (i as usize) < part.vertex_count())
                    .ok_or(PartitionError::IndexOutOfRange {
                        face: part.face_start + offset,
                        index: corner,
                        vertex_count: self.mesh.vertex_count(),
                    })
            };
            let (a, b, c) = (local(face.a)?, local(face.b)?, local(face.c)?);
            indices.extend_from_slice(&[a, b, c]);
            if face.d != face.c {
                let d = local(face.d)?;
                indices.extend_from_slice(&[c, d, a]);
            }
        }

        if vertices.is_empty() || indices.is_empty() {
            return Err(PartitionError::EmptyPartition { index });
        }
        Ok(PartitionBuffers { vertices, indices })
    }

    fn vertex_data(&self, part: &MeshPartition) -> VertexData {
        let range = part.vertex_range();
        let positions = &self.mesh.positions[range.clone()];
        match self.layout {
            VertexLayout::Position => {
                VertexData::P(positions.iter().map(|p| VertexP { position: p.to_array() }).collect())
            }
            VertexLayout::PositionNormal => VertexData::PN(
                positions
                    .iter()
                    .zip(&self.mesh.normals[range])
                    .map(|(p, n)| VertexPN { position: p.to_array(), normal: n.to_array() })
                    .collect(),
            ),
            VertexLayout::PositionColor => VertexData::PC(
                positions
                    .iter()
                    .zip(&self.mesh.colors[range])
                    .map(|(p, c)| VertexPC { position: p.to_array(), color: *c })
                    .collect(),
            ),
            VertexLayout::PositionNormalColor => VertexData::PNC(
                positions
                    .iter()
                    .zip(&self.mesh.normals[range.clone()])
                    .zip(&self.mesh.colors[range])
                    .map(|((p, n), c)| VertexPNC { position: p.to_array(), normal: n.to_array(), color: *c })
                    .collect(),
            ),
        }
    }
}

/// Partitions `mesh`. Vertex order is kept when cuts can be placed between vertices that no
/// face straddles; otherwise the mesh is rebuilt partition by partition, duplicating the
/// vertices shared across a cut.
pub fn partition_mesh(mesh: Mesh, limits: PartitionLimits) -> Result<PartitionedMesh, PartitionError> {
    validate(&mesh)?;
    let limits = PartitionLimits::new(limits.max_vertices, limits.max_faces);
    let layout = VertexLayout::for_mesh(&mesh);
    let closed = mesh.is_closed();

    let (mesh, partitions) = match plan_in_place(&mesh, limits) {
        Some((order, partitions)) => (reorder_faces(mesh, &order), partitions),
        None => {
            let (rebuilt, partitions) = rebuild(&mesh, limits);
            debug!(
                "[partition] rebuilt mesh: {} -> {} vertices over {} partitions",
                mesh.vertex_count(),
                rebuilt.vertex_count(),
                partitions.len()
            );
            (rebuilt, partitions)
        }
    };
    Ok(PartitionedMesh { mesh, partitions, layout, closed })
}

fn validate(mesh: &Mesh) -> Result<(), PartitionError> {
    if mesh.is_empty() {
        return Err(PartitionError::EmptyMesh);
    }
    let vertex_count = mesh.vertex_count();
    if mesh.has_normals() && mesh.normals.len() != vertex_count {
        return Err(PartitionError::AttributeCountMismatch {
            attribute: "normal",
            expected: vertex_count,
            found: mesh.normals.len(),
        });
    }
    if mesh.has_colors() && mesh.colors.len() != vertex_count {
        return Err(PartitionError::AttributeCountMismatch {
            attribute: "color",
            expected: vertex_count,
            found: mesh.colors.len(),
        });
    }
    for (face_index, face) in mesh.faces.iter().enumerate() {
        let index = face.max_corner();
        if index as usize >= vertex_count {
            return Err(PartitionError::IndexOutOfRange { face: face_index, index, vertex_count });
        }
    }
    Ok(())
}

/// Cuts along the original vertex order. Returns the face order (faces grouped by the
/// partition of their lowest corner, stable within a group) and the partitions, or `None`
/// when some stretch of `max_vertices` vertices offers no cut.
fn plan_in_place(mesh: &Mesh, limits: PartitionLimits) -> Option<(Vec<usize>, Vec<MeshPartition>)> {
    let vertex_count = mesh.vertex_count();

    // reach[i]: highest corner of any face whose lowest corner is <= i
    let mut reach = vec![-1i64; vertex_count];
    // faces_before[i]: number of faces whose lowest corner is < i
    let mut faces_before = vec![0usize; vertex_count + 1];
    for face in &mesh.faces {
        let lo = face.min_corner() as usize;
        reach[lo] = reach[lo].max(face.max_corner() as i64);
        faces_before[lo + 1] += 1;
    }
    for i in 1..vertex_count {
        reach[i] = reach[i].max(reach[i - 1]);
    }
    for i in 1..=vertex_count {
        faces_before[i] += faces_before[i - 1];
    }

    let mut cuts = Vec::new();
    let mut start = 0usize;
    while start < vertex_count {
        let upper = (start + limits.max_vertices).min(vertex_count);
        // faces_before is monotone, so the face budget bounds `end` directly
        let budget = faces_before[start].saturating_add(limits.max_faces);
        let within_budget = faces_before[start..=upper].partition_point(|&faces| faces <= budget);
        let mut end = start + within_budget - 1;
        while end > start && end < vertex_count && reach[end - 1] >= end as i64 {
            end -= 1;
        }
        if end == start {
            return None;
        }
        cuts.push(start..end);
        start = end;
    }

    let partition_of = |vertex: u32| cuts.partition_point(|range| range.end <= vertex as usize);
    let mut order: Vec<usize> = (0..mesh.faces.len()).collect();
    order.sort_by_key(|&f| partition_of(mesh.faces[f].min_corner()));

    let mut partitions = Vec::with_capacity(cuts.len());
    let mut face_start = 0;
    for range in cuts {
        let face_count = faces_before[range.end] - faces_before[range.start];
        let face_end = face_start + face_count;
        let triangle_count = order[face_start..face_end].iter().map(|&f| mesh.faces[f].triangle_count()).sum();
        partitions.push(MeshPartition {
            vertex_start: range.start,
            vertex_end: range.end,
            face_start,
            face_end,
            triangle_count,
        });
        face_start = face_end;
    }
    Some((order, partitions))
}

fn reorder_faces(mut mesh: Mesh, order: &[usize]) -> Mesh {
    if order.iter().enumerate().any(|(i, &f)| i != f) {
        let faces: Vec<MeshFace> = order.iter().map(|&f| mesh.faces[f]).collect();
        mesh.faces = faces;
    }
    mesh
}

/// Greedy face walk. Each partition receives private copies of the vertices it uses.
fn rebuild(mesh: &Mesh, limits: PartitionLimits) -> (Mesh, Vec<MeshPartition>) {
    let mut out = Mesh {
        positions: Vec::with_capacity(mesh.vertex_count()),
        normals: Vec::new(),
        colors: Vec::new(),
        faces: Vec::with_capacity(mesh.face_count()),
    };
    let mut partitions = Vec::new();
    let mut local: HashMap<u32, u32> = HashMap::new();
    let mut current = MeshPartition { vertex_start: 0, vertex_end: 0, face_start: 0, face_end: 0, triangle_count: 0 };

    for face in &mesh.faces {
        let corners = face.corners();
        let missing = corners
            .iter()
            .enumerate()
            .filter(|&(i, c)| !local.contains_key(c) && !corners[..i].contains(c))
            .count();
        let vertices_after = out.vertex_count() - current.vertex_start + missing;
        let faces_after = out.face_count() - current.face_start + 1;
        if out.face_count() > current.face_start
            && (vertices_after > limits.max_vertices || faces_after > limits.max_faces)
        {
            current.vertex_end = out.vertex_count();
            current.face_end = out.face_count();
            partitions.push(current);
            current = MeshPartition {
                vertex_start: out.vertex_count(),
                vertex_end: 0,
                face_start: out.face_count(),
                face_end: 0,
                triangle_count: 0,
            };
            local.clear();
        }

        let remapped = face.remapped(|corner| {
            *local.entry(corner).or_insert_with(|| {
                let source = corner as usize;
                out.positions.push(mesh.positions[source]);
                if mesh.has_normals() {
                    out.normals.push(mesh.normals[source]);
                }
                if mesh.has_colors() {
                    out.colors.push(mesh.colors[source]);
                }
                (out.positions.len() - 1) as u32
            })
        });
        out.faces.push(remapped);
        current.triangle_count += face.triangle_count();
    }

    if out.face_count() > current.face_start {
        current.vertex_end = out.vertex_count();
        current.face_end = out.face_count();
        partitions.push(current);
    }
    (out, partitions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn strip(vertex_count: u32) -> Mesh {
        let positions = (0..vertex_count).map(|i| Vec3::new(i as f32, (i % 2) as f32, 0.0)).collect();
        let faces = (0..vertex_count - 2).map(|i| MeshFace::triangle(i, i + 1, i + 2)).collect();
        Mesh::new(positions, faces)
    }

    #[test]
    fn strides_match_layouts() {
        assert_eq!(VertexLayout::Position.stride(), 12);
        assert_eq!(VertexLayout::PositionNormal.stride(), 24);
        assert_eq!(VertexLayout::PositionColor.stride(), 28);
        assert_eq!(VertexLayout::PositionNormalColor.stride(), 40);
        let color = VertexLayout::PositionNormalColor.attributes()[2];
        assert_eq!((color.semantic, color.offset), (AttributeSemantic::Color, 24));
    }

    #[test]
    fn small_mesh_is_one_partition() {
        let partitioned = partition_mesh(Mesh::cube(1.0), PartitionLimits::default()).expect("partition");
        assert_eq!(partitioned.partitions().len(), 1);
        let part = partitioned.partitions()[0];
        assert_eq!((part.vertex_start, part.vertex_end), (0, 8));
        assert_eq!((part.face_start, part.face_end), (0, 6));
        assert_eq!(part.triangle_count, 12);
        assert!(partitioned.is_closed());
    }

    #[test]
    fn quad_splits_into_two_triangles_with_local_indices() {
        let mut mesh = strip(6);
        mesh.faces = vec![MeshFace::quad(0, 1, 2, 3), MeshFace::triangle(3, 4, 5), MeshFace::quad(2, 3, 5, 5)];
        let partitioned = partition_mesh(mesh, PartitionLimits::default()).expect("partition");
        let buffers = partitioned.build_buffers(0).expect("buffers");
        assert_eq!(buffers.indices, vec![0, 1, 2, 2, 3, 0, 3, 4, 5, 2, 3, 5]);
    }

    #[test]
    fn indices_are_rebased_per_partition() {
        let partitioned = partition_mesh(strip(10), PartitionLimits::new(4, 100)).expect("partition");
        assert!(partitioned.partitions().len() > 1);
        for (index, part) in partitioned.partitions().iter().enumerate() {
            let buffers = partitioned.build_buffers(index).expect("buffers");
            assert_eq!(buffers.vertices.len(), part.vertex_count());
            assert!(buffers.indices.iter().all(|&i| (i as usize) < part.vertex_count()));
            assert_eq!(buffers.indices.len(), part.triangle_count * 3);
        }
    }

    #[test]
    fn straddling_faces_force_a_rebuild_that_still_covers_every_vertex() {
        // strip faces connect neighbouring vertices, so no cut avoids them
        let partitioned = partition_mesh(strip(10), PartitionLimits::new(4, 100)).expect("partition");
        let mut expected_start = 0;
        let mut face_total = 0;
        for part in partitioned.partitions() {
            assert_eq!(part.vertex_start, expected_start);
            assert!(part.vertex_count() <= 4);
            expected_start = part.vertex_end;
            face_total += part.face_count();
        }
        assert_eq!(expected_start, partitioned.mesh().vertex_count());
        assert_eq!(face_total, 8);
    }

    #[test]
    fn face_limit_closes_partitions_early() {
        let mesh = Mesh::grid(4, 1, 1.0);
        let partitioned = partition_mesh(mesh, PartitionLimits::new(1024, 2)).expect("partition");
        assert!(partitioned.partitions().iter().all(|p| p.face_count() <= 2));
        let faces: usize = partitioned.partitions().iter().map(MeshPartition::face_count).sum();
        assert_eq!(faces, 4);
    }

    #[test]
    fn face_limit_cuts_disjoint_triangles_in_place() {
        let positions: Vec<Vec3> = (0..12).map(|i| Vec3::new(i as f32, (i % 3) as f32, 0.0)).collect();
        let faces = (0..4u32).map(|t| MeshFace::triangle(3 * t, 3 * t + 1, 3 * t + 2)).collect();
        let partitioned = partition_mesh(Mesh::new(positions, faces), PartitionLimits::new(1024, 2)).expect("partition");
        let ranges: Vec<_> = partitioned.partitions().iter().map(|part| part.vertex_range()).collect();
        assert_eq!(ranges, vec![0..6, 6..12]);
        assert_eq!(partitioned.mesh().vertex_count(), 12);
    }

    #[test]
    fn layout_follows_mesh_attributes() {
        let plain = Mesh::grid(1, 1, 1.0);
        let mut lit = plain.clone();
        lit.compute_normals();
        let colored = plain.clone().with_colors(vec![[0.5; 4]; 4]);
        let both = lit.clone().with_colors(vec![[0.5; 4]; 4]);
        let cases = [
            (plain, VertexLayout::Position),
            (lit, VertexLayout::PositionNormal),
            (colored, VertexLayout::PositionColor),
            (both, VertexLayout::PositionNormalColor),
        ];
        for (mesh, layout) in cases {
            let partitioned = partition_mesh(mesh, PartitionLimits::default()).expect("partition");
            assert_eq!(partitioned.layout(), layout);
            let buffers = partitioned.build_buffers(0).expect("buffers");
            assert_eq!(buffers.layout(), layout);
            assert_eq!(buffers.vertices.as_bytes().len(), 4 * layout.stride());
        }
    }

    #[test]
    fn invalid_meshes_are_rejected() {
        assert_eq!(partition_mesh(Mesh::default(), PartitionLimits::default()).unwrap_err(), PartitionError::EmptyMesh);
        let broken = Mesh::new(vec![Vec3::ZERO; 3], vec![MeshFace::triangle(0, 1, 7)]);
        assert!(matches!(
            partition_mesh(broken, PartitionLimits::default()),
            Err(PartitionError::IndexOutOfRange { index: 7, .. })
        ));
        let mismatched = Mesh::cube(1.0).with_normals(vec![Vec3::Z; 3]);
        assert!(matches!(
            partition_mesh(mismatched, PartitionLimits::default()),
            Err(PartitionError::AttributeCountMismatch { attribute: "normal", .. })
        ));
    }

    #[test]
    fn faceless_partition_reports_empty() {
        // trailing vertices that no face uses end up in a partition of their own
        let mut mesh = Mesh::grid(1, 1, 1.0);
        mesh.positions.extend(std::iter::repeat(Vec3::ONE).take(6));
        let partitioned = partition_mesh(mesh, PartitionLimits::new(4, 10)).expect("partition");
        let last = partitioned.partitions().len() - 1;
        assert_eq!(partitioned.partitions()[last].face_count(), 0);
        assert_eq!(partitioned.build_buffers(last).unwrap_err(), PartitionError::EmptyPartition { index: last });
    }
}
