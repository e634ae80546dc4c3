//! Per-partition GPU state and the renderables that reference it.

use std::sync::Arc;

use glam::DMat4;
use uuid::Uuid;

use crate::gpu::{BufferHandle, GraphicsDevice};
use crate::material::DisplayMaterial;
use crate::mesh::BoundingBox;
use crate::partition::{PartitionedMesh, VertexLayout};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GpuFit {
    /// No upload attempted yet.
    #[default]
    Unknown,
    Resident,
    /// Upload failed, or the source was discarded before any upload; never retried.
    Rejected,
}

/// At most one live buffer. Overwriting a live handle is a bug in the caller.
#[derive(Debug, Default)]
pub struct BufferSlot(Option<BufferHandle>);

impl BufferSlot {
    pub fn get(&self) -> Option<BufferHandle> {
        self.0
    }

    pub fn is_some(&self) -> bool {
        self.0.is_some()
    }

    pub fn set(&mut self, handle: BufferHandle) {
        assert!(self.0.is_none(), "buffer slot already holds {:?}; release it before replacing", self.0);
        self.0 = Some(handle);
    }

    pub fn take(&mut self) -> Option<BufferHandle> {
        self.0.take()
    }
}

/// Index into [`crate::model::DisplayModel::meshes`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(pub usize);

#[derive(Debug)]
pub struct DisplayMesh {
    pub(crate) source: Option<Arc<PartitionedMesh>>,
    pub partition_index: usize,
    pub layout: VertexLayout,
    pub stride: usize,
    pub(crate) vertex_buffer: BufferSlot,
    pub(crate) index_buffer: BufferSlot,
    pub index_count: usize,
    pub triangle_count: usize,
    pub bounds: BoundingBox,
    pub material: Arc<DisplayMaterial>,
    pub closed: bool,
    pub(crate) fit: GpuFit,
    pub object_id: Uuid,
}

impl DisplayMesh {
    /// One display mesh per partition of `source`, all sharing it.
    pub fn from_partitions(
        source: &Arc<PartitionedMesh>,
        material: &Arc<DisplayMaterial>,
        object_id: Uuid,
    ) -> Vec<DisplayMesh> {
        source
            .partitions()
            .iter()
            .enumerate()
            .filter(|(_, part)| part.triangle_count > 0)
            .map(|(index, part)| DisplayMesh {
                source: Some(Arc::clone(source)),
                partition_index: index,
                layout: source.layout(),
                stride: source.layout().stride(),
                vertex_buffer: BufferSlot::default(),
                index_buffer: BufferSlot::default(),
                index_count: part.triangle_count * 3,
                triangle_count: part.triangle_count,
                bounds: source.partition_bounds(index),
                material: Arc::clone(material),
                closed: source.is_closed(),
                fit: GpuFit::Unknown,
                object_id,
            })
            .collect()
    }

    pub fn fit(&self) -> GpuFit {
        self.fit
    }

    pub fn is_resident(&self) -> bool {
        self.fit == GpuFit::Resident
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    pub fn vertex_buffer(&self) -> Option<BufferHandle> {
        self.vertex_buffer.get()
    }

    pub fn index_buffer(&self) -> Option<BufferHandle> {
        self.index_buffer.get()
    }

    /// Drops the pending source of a mesh that never tried to upload, rejecting it.
    /// Resident and rejected meshes are left alone.
    pub fn discard_source(&mut self) -> bool {
        if self.fit != GpuFit::Unknown || self.source.is_none() {
            return false;
        }
        self.source = None;
        self.fit = GpuFit::Rejected;
        true
    }

    /// Teardown: deletes both buffers and drops the source.
    pub fn release(&mut self, device: &mut dyn GraphicsDevice) {
        for handle in [self.vertex_buffer.take(), self.index_buffer.take()].into_iter().flatten() {
            device.delete_buffer(handle);
        }
        self.source = None;
        self.fit = GpuFit::Rejected;
    }
}

/// A display mesh drawn a second time under `transform`. Shares the mesh's buffers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplayInstance {
    pub mesh: MeshId,
    pub transform: DMat4,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RenderableKind {
    StaticMesh(MeshId),
    InstancedMesh(DisplayInstance),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Renderable {
    pub kind: RenderableKind,
    pub visible: bool,
    pub layer_index: usize,
}

impl Renderable {
    pub fn mesh(mesh: MeshId, layer_index: usize) -> Self {
        Self { kind: RenderableKind::StaticMesh(mesh), visible: true, layer_index }
    }

    pub fn instance(mesh: MeshId, transform: DMat4, layer_index: usize) -> Self {
        Self { kind: RenderableKind::InstancedMesh(DisplayInstance { mesh, transform }), visible: true, layer_index }
    }

    pub fn mesh_id(&self) -> MeshId {
        match self.kind {
            RenderableKind::StaticMesh(mesh) => mesh,
            RenderableKind::InstancedMesh(instance) => instance.mesh,
        }
    }

    pub fn is_instance(&self) -> bool {
        matches!(self.kind, RenderableKind::InstancedMesh(_))
    }

    /// Instance transform; static meshes draw untransformed.
    pub fn transform(&self) -> DMat4 {
        match self.kind {
            RenderableKind::StaticMesh(_) => DMat4::IDENTITY,
            RenderableKind::InstancedMesh(instance) => instance.transform,
        }
    }

    /// Transformed bounds of the referenced mesh.
    pub fn bounds(&self, meshes: &[DisplayMesh]) -> BoundingBox {
        match meshes.get(self.mesh_id().0) {
            Some(mesh) => match self.kind {
                RenderableKind::StaticMesh(_) => mesh.bounds,
                RenderableKind::InstancedMesh(instance) => mesh.bounds.transformed(&instance.transform),
            },
            None => BoundingBox::EMPTY,
        }
    }

    pub fn is_closed(&self, meshes: &[DisplayMesh]) -> bool {
        meshes.get(self.mesh_id().0).is_some_and(|mesh| mesh.closed)
    }

    pub fn material<'a>(&self, meshes: &'a [DisplayMesh]) -> Option<&'a Arc<DisplayMaterial>> {
        meshes.get(self.mesh_id().0).map(|mesh| &mesh.material)
    }
}
