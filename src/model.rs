//! Scene objects in, flat display lists out.

mod preparation;

pub use preparation::{
    CancellationToken, MemoryPressure, PreparationError, PreparationOptions, PreparationSignals, PreparationTask,
};

use std::collections::HashMap;
use std::sync::Arc;

use glam::DMat4;
use log::{debug, info, warn};
use uuid::Uuid;

use crate::display::{DisplayMesh, MeshId, Renderable};
use crate::gpu::GraphicsDevice;
use crate::material::{DisplayMaterial, Material, MaterialKey, MaterialTable};
use crate::mesh::{BoundingBox, Mesh};
use crate::partition::partition_mesh;
use crate::viewport::Viewport;

/// Nested instance references deeper than this are dropped.
const MAX_INSTANCE_DEPTH: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub name: String,
    pub visible: bool,
    pub render_material_index: Option<usize>,
}

impl Layer {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), visible: true, render_material_index: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaterialSource {
    #[default]
    FromLayer,
    FromObject,
    FromParent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectAttributes {
    pub id: Uuid,
    pub layer_index: usize,
    pub visible: bool,
    pub material_source: MaterialSource,
    pub material_index: Option<usize>,
    /// Part of an instance definition; only drawn through references.
    pub definition_member: bool,
}

impl Default for ObjectAttributes {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            layer_index: 0,
            visible: true,
            material_source: MaterialSource::default(),
            material_index: None,
            definition_member: false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum SceneGeometry {
    Mesh(Mesh),
    /// Render meshes of each boundary representation face; faces that were never meshed are `None`.
    Brep { face_meshes: Vec<Option<Mesh>> },
    Extrusion { render_mesh: Option<Mesh> },
    InstanceReference { definition: Uuid, transform: DMat4 },
    /// Curves, points, annotations and other kinds that have nothing to shade.
    Unsupported(String),
}

#[derive(Debug, Clone)]
pub struct SceneObject {
    pub attributes: ObjectAttributes,
    pub geometry: SceneGeometry,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstanceDefinition {
    pub id: Uuid,
    pub name: String,
    pub members: Vec<Uuid>,
}

/// Everything preparation needs from a parsed model file.
#[derive(Debug, Clone, Default)]
pub struct ModelSource {
    pub layers: Vec<Layer>,
    pub materials: Vec<Material>,
    pub objects: Vec<SceneObject>,
    pub definitions: Vec<InstanceDefinition>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModelStatistics {
    pub mesh_count: usize,
    pub triangle_count: usize,
    pub geometry_count: usize,
    pub brep_count: usize,
    pub brep_with_mesh_count: usize,
    pub extrusion_count: usize,
}

#[derive(Debug)]
pub struct DisplayModel {
    pub(crate) meshes: Vec<DisplayMesh>,
    pub(crate) opaque: Vec<Renderable>,
    pub(crate) transparent: Vec<Renderable>,
    pub(crate) layers: Vec<Layer>,
    layer_bounds: Vec<BoundingBox>,
    bounds: BoundingBox,
    statistics: ModelStatistics,
    ready: bool,
}

impl DisplayModel {
    pub fn meshes(&self) -> &[DisplayMesh] {
        &self.meshes
    }

    pub fn opaque(&self) -> &[Renderable] {
        &self.opaque
    }

    pub fn transparent(&self) -> &[Renderable] {
        &self.transparent
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn bounds(&self) -> BoundingBox {
        self.bounds
    }

    pub fn statistics(&self) -> ModelStatistics {
        self.statistics
    }

    pub fn is_ready_for_rendering(&self) -> bool {
        self.ready
    }

    /// Unknown layers count as hidden.
    pub fn layer_is_visible(&self, index: usize) -> bool {
        self.layers.get(index).is_some_and(|layer| layer.visible)
    }

    pub fn set_layer_visible(&mut self, index: usize, visible: bool) -> bool {
        match self.layers.get_mut(index) {
            Some(layer) => {
                layer.visible = visible;
                true
            }
            None => false,
        }
    }

    pub fn layer_bounds(&self, index: usize) -> BoundingBox {
        self.layer_bounds.get(index).copied().unwrap_or(BoundingBox::EMPTY)
    }

    pub fn layers_with_geometry(&self) -> Vec<usize> {
        (0..self.layers.len()).filter(|&index| self.layer_bounds(index).is_valid()).collect()
    }

    /// Union of the bounds of every visible layer; drives the clip planes.
    pub fn visible_layers_bounds(&self) -> BoundingBox {
        let mut bounds = BoundingBox::EMPTY;
        for (index, layer_bounds) in self.layer_bounds.iter().enumerate() {
            if self.layer_is_visible(index) {
                bounds.union(layer_bounds);
            }
        }
        bounds
    }

    pub fn default_viewport(&self) -> Viewport {
        Viewport::default_for_bounds(&self.bounds)
    }

    /// Frees every GPU buffer and pending source mesh. The model stops rendering.
    pub fn release_gpu_resources(&mut self, device: &mut dyn GraphicsDevice) {
        for mesh in &mut self.meshes {
            mesh.release(device);
        }
        self.ready = false;
    }

    /// Drops the pending sources of meshes that no drawable renderable uses. Uploaded
    /// meshes keep their buffers. Returns how many sources were dropped.
    pub fn discard_hidden_sources(&mut self) -> usize {
        let in_use = meshes_in_use(
            self.meshes.len(),
            self.opaque
                .iter()
                .chain(&self.transparent)
                .filter(|renderable| renderable.visible && self.layer_is_visible(renderable.layer_index)),
        );
        discard_unused(&mut self.meshes, &in_use)
    }
}

fn meshes_in_use<'a>(count: usize, renderables: impl Iterator<Item = &'a Renderable>) -> Vec<bool> {
    let mut in_use = vec![false; count];
    for renderable in renderables {
        if let Some(flag) = in_use.get_mut(renderable.mesh_id().0) {
            *flag = true;
        }
    }
    in_use
}

fn discard_unused(meshes: &mut [DisplayMesh], in_use: &[bool]) -> usize {
    let mut discarded = 0;
    for (mesh, used) in meshes.iter_mut().zip(in_use) {
        if !used && mesh.discard_source() {
            discarded += 1;
        }
    }
    discarded
}

enum Prepared {
    Meshes(Vec<MeshId>),
    Reference { definition: Uuid, transform: DMat4 },
}

struct PreparedObject {
    layer_index: usize,
    visible: bool,
    definition_member: bool,
    content: Prepared,
}

struct Builder<'a> {
    options: &'a PreparationOptions,
    layers: &'a [Layer],
    materials: MaterialTable,
    material_cache: HashMap<MaterialKey, Arc<DisplayMaterial>>,
    meshes: Vec<DisplayMesh>,
    statistics: ModelStatistics,
}

impl Builder<'_> {
    fn material_for(&mut self, attributes: &ObjectAttributes) -> Arc<DisplayMaterial> {
        let index = match attributes.material_source {
            MaterialSource::FromLayer => {
                self.layers.get(attributes.layer_index).and_then(|layer| layer.render_material_index)
            }
            MaterialSource::FromObject | MaterialSource::FromParent => attributes.material_index,
        };
        let resolved = self.materials.resolve(index);
        Arc::clone(self.material_cache.entry(resolved.key).or_insert_with(|| Arc::new(resolved)))
    }

    fn add_mesh(&mut self, mut mesh: Mesh, attributes: &ObjectAttributes) -> Vec<MeshId> {
        if !mesh.has_normals() && !mesh.is_empty() && self.options.compute_missing_normals {
            mesh.compute_normals();
        }
        let partitioned = match partition_mesh(mesh, self.options.limits) {
            Ok(partitioned) => Arc::new(partitioned),
            Err(err) => {
                warn!("[model] skipping object {}: {err}", attributes.id);
                return Vec::new();
            }
        };
        let material = self.material_for(attributes);
        let first = self.meshes.len();
        self.meshes.extend(DisplayMesh::from_partitions(&partitioned, &material, attributes.id));
        (first..self.meshes.len()).map(MeshId).collect()
    }

    fn prepare(&mut self, object: SceneObject) -> Option<Prepared> {
        let attributes = object.attributes;
        match object.geometry {
            SceneGeometry::Mesh(mesh) => {
                self.statistics.geometry_count += 1;
                Some(Prepared::Meshes(self.add_mesh(mesh, &attributes)))
            }
            SceneGeometry::Brep { face_meshes } => {
                self.statistics.brep_count += 1;
                let present: Vec<Mesh> = face_meshes.into_iter().flatten().collect();
                if present.is_empty() {
                    return None;
                }
                self.statistics.brep_with_mesh_count += 1;
                let mut combined = Mesh::default();
                for face in &present {
                    combined.append(face);
                }
                if combined.vertex_count() == 0 {
                    return None;
                }
                self.statistics.geometry_count += 1;
                Some(Prepared::Meshes(self.add_mesh(combined, &attributes)))
            }
            SceneGeometry::Extrusion { render_mesh } => {
                self.statistics.extrusion_count += 1;
                let mesh = render_mesh.filter(|mesh| mesh.vertex_count() > 0)?;
                self.statistics.geometry_count += 1;
                Some(Prepared::Meshes(self.add_mesh(mesh, &attributes)))
            }
            SceneGeometry::InstanceReference { definition, transform } => {
                self.statistics.geometry_count += 1;
                let transform = if transform == DMat4::ZERO { DMat4::IDENTITY } else { transform };
                Some(Prepared::Reference { definition, transform })
            }
            SceneGeometry::Unsupported(kind) => {
                debug!("[model] object {} has unsupported geometry '{kind}'", attributes.id);
                None
            }
        }
    }
}

struct Exploder<'a> {
    objects: &'a HashMap<Uuid, PreparedObject>,
    definitions: HashMap<Uuid, &'a InstanceDefinition>,
    out: Vec<Renderable>,
}

impl Exploder<'_> {
    fn push_meshes(&mut self, ids: &[MeshId], transform: DMat4, layer_index: usize, visible: bool) {
        let identity = transform.abs_diff_eq(DMat4::IDENTITY, 1.0e-12);
        for &id in ids {
            let mut renderable =
                if identity { Renderable::mesh(id, layer_index) } else { Renderable::instance(id, transform, layer_index) };
            renderable.visible = visible;
            self.out.push(renderable);
        }
    }

    /// Members inherit the outermost reference's layer; transforms compose outer * inner.
    fn explode(
        &mut self,
        definition: Uuid,
        transform: DMat4,
        layer_index: usize,
        visible: bool,
        stack: &mut Vec<Uuid>,
    ) {
        if stack.len() >= MAX_INSTANCE_DEPTH || stack.contains(&definition) {
            warn!("[model] instance definition {definition} nests too deep or refers to itself; skipped");
            return;
        }
        let Some(def) = self.definitions.get(&definition).copied() else {
            warn!("[model] reference to unknown instance definition {definition}");
            return;
        };
        let objects = self.objects;
        stack.push(definition);
        for member in &def.members {
            let Some(object) = objects.get(member) else { continue };
            let visible = visible && object.visible;
            match &object.content {
                Prepared::Meshes(ids) => self.push_meshes(ids, transform, layer_index, visible),
                Prepared::Reference { definition: inner, transform: inner_transform } => {
                    self.explode(*inner, transform * *inner_transform, layer_index, visible, stack);
                }
            }
        }
        stack.pop();
    }
}

/// Builds a display model on the calling thread. `progress` receives values in `0.0..=1.0`.
pub fn prepare_model(
    source: ModelSource,
    options: &PreparationOptions,
    signals: &PreparationSignals,
    mut progress: impl FnMut(f32),
) -> Result<DisplayModel, PreparationError> {
    let ModelSource { layers, materials, objects, definitions } = source;
    let mut builder = Builder {
        options,
        layers: &layers,
        materials: MaterialTable::new(materials),
        material_cache: HashMap::new(),
        meshes: Vec::new(),
        statistics: ModelStatistics::default(),
    };

    progress(0.0);
    let total = objects.len();
    let mut order = Vec::with_capacity(total);
    let mut prepared = HashMap::with_capacity(total);
    for (index, object) in objects.into_iter().enumerate() {
        signals.check()?;
        let attributes = object.attributes.clone();
        if let Some(content) = builder.prepare(object) {
            order.push(attributes.id);
            prepared.insert(
                attributes.id,
                PreparedObject {
                    layer_index: attributes.layer_index,
                    visible: attributes.visible,
                    definition_member: attributes.definition_member,
                    content,
                },
            );
        }
        progress((index + 1) as f32 / total as f32);
    }
    signals.check()?;

    let Builder { mut meshes, mut statistics, .. } = builder;
    let mut exploder = Exploder {
        objects: &prepared,
        definitions: definitions.iter().map(|def| (def.id, def)).collect(),
        out: Vec::new(),
    };
    let top_level: Vec<&PreparedObject> =
        order.iter().filter_map(|id| prepared.get(id)).filter(|object| !object.definition_member).collect();
    for object in &top_level {
        if let Prepared::Meshes(ids) = &object.content {
            exploder.push_meshes(ids, DMat4::IDENTITY, object.layer_index, object.visible);
        }
    }
    for object in &top_level {
        if let Prepared::Reference { definition, transform } = &object.content {
            exploder.explode(*definition, *transform, object.layer_index, object.visible, &mut Vec::new());
        }
    }
    let renderables = exploder.out;

    let (opaque, transparent): (Vec<Renderable>, Vec<Renderable>) = renderables
        .into_iter()
        .partition(|renderable| meshes.get(renderable.mesh_id().0).is_some_and(|mesh| mesh.material.is_opaque()));

    if opaque.is_empty() && transparent.is_empty() {
        let err = classify_failure(&statistics, signals);
        info!("[model] preparation failed: {err}");
        return Err(err);
    }

    // members of definitions nobody references are never drawn
    let in_use = meshes_in_use(meshes.len(), opaque.iter().chain(&transparent));
    let unreferenced = discard_unused(&mut meshes, &in_use);
    if unreferenced > 0 {
        debug!("[model] dropped {unreferenced} partitions no renderable draws");
    }

    let mut layer_bounds = vec![BoundingBox::EMPTY; layers.len()];
    let mut bounds = BoundingBox::EMPTY;
    for renderable in opaque.iter().chain(&transparent) {
        let renderable_bounds = renderable.bounds(&meshes);
        bounds.union(&renderable_bounds);
        if let Some(layer) = layer_bounds.get_mut(renderable.layer_index) {
            layer.union(&renderable_bounds);
        }
    }

    statistics.mesh_count = opaque.len() + transparent.len();
    statistics.triangle_count = opaque
        .iter()
        .chain(&transparent)
        .filter_map(|renderable| meshes.get(renderable.mesh_id().0))
        .map(|mesh| mesh.triangle_count)
        .sum();
    info!(
        "[model] prepared {} renderables ({} transparent), {} triangles",
        statistics.mesh_count,
        transparent.len(),
        statistics.triangle_count
    );
    progress(1.0);

    Ok(DisplayModel { meshes, opaque, transparent, layers, layer_bounds, bounds, statistics, ready: true })
}

fn classify_failure(statistics: &ModelStatistics, signals: &PreparationSignals) -> PreparationError {
    let s = statistics;
    if s.brep_count > 0 && s.brep_with_mesh_count == 0 {
        PreparationError::WireframeOnly
    } else if s.geometry_count > 0 && s.brep_with_mesh_count == 0 {
        PreparationError::NoRenderableGeometry
    } else if s.geometry_count == 0 && s.brep_with_mesh_count == 0 {
        PreparationError::Empty
    } else if signals.memory.is_raised() {
        PreparationError::TooLarge
    } else if signals.cancel.is_cancelled() {
        PreparationError::Cancelled
    } else {
        PreparationError::Corrupt
    }
}
