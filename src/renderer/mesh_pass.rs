use super::residency::ensure_resident;
use super::FrameStats;
use crate::display::{DisplayMesh, Renderable, RenderableKind};
use crate::gpu::{FrontFace, GraphicsDevice, IndexedDraw, VertexAttribute};
use crate::material::MaterialKey;
use crate::model::Layer;
use crate::partition::VertexLayout;
use crate::shader::{attribute_location, ShaderProgram};

/// Mirroring transforms flip triangle winding.
const MIRROR_DETERMINANT: f64 = -1.0e-12;

/// State carried across the draws of one frame.
pub(super) struct DrawContext<'a> {
    pub device: &'a mut dyn GraphicsDevice,
    shader: &'a ShaderProgram,
    meshes: &'a mut [DisplayMesh],
    layers: &'a [Layer],
    current_material: Option<MaterialKey>,
    stats: FrameStats,
}

impl<'a> DrawContext<'a> {
    pub fn new(
        device: &'a mut dyn GraphicsDevice,
        shader: &'a ShaderProgram,
        meshes: &'a mut [DisplayMesh],
        layers: &'a [Layer],
    ) -> Self {
        Self { device, shader, meshes, layers, current_material: None, stats: FrameStats::default() }
    }

    pub fn finish(self) -> FrameStats {
        self.stats
    }

    pub fn is_closed(&self, renderable: &Renderable) -> bool {
        renderable.is_closed(&*self.meshes)
    }

    fn layer_visible(&self, index: usize) -> bool {
        self.layers.get(index).is_some_and(|layer| layer.visible)
    }

    /// Draws one renderable with whatever depth and cull state is current.
    pub fn draw(&mut self, renderable: &Renderable) {
        if !renderable.visible || !self.layer_visible(renderable.layer_index) {
            return;
        }
        let Some(mesh) = self.meshes.get_mut(renderable.mesh_id().0) else {
            return;
        };
        if !ensure_resident(self.device, mesh, &mut self.stats) {
            self.stats.skipped += 1;
            return;
        }
        let (Some(vertex_buffer), Some(index_buffer)) = (mesh.vertex_buffer(), mesh.index_buffer()) else {
            self.stats.skipped += 1;
            return;
        };
        // skipped partitions leave material state untouched
        if self.current_material != Some(mesh.material.key) {
            self.shader.setup_material(self.device, &mesh.material);
            self.current_material = Some(mesh.material.key);
        }

        let (attributes, attribute_count) = vertex_attributes(mesh.layout);
        let uses_colors = mesh.layout.has_colors();
        if uses_colors {
            self.shader.enable_color_usage(self.device, true);
        }
        let mut mirrored = false;
        if let RenderableKind::InstancedMesh(instance) = renderable.kind {
            mirrored = instance.transform.determinant() < MIRROR_DETERMINANT;
            if mirrored {
                self.device.set_front_face(FrontFace::Cw);
            }
            self.shader.push_instance_transform(self.device, &instance.transform);
        }

        self.device.draw_indexed(&IndexedDraw {
            vertex_buffer,
            index_buffer,
            stride: mesh.stride as i32,
            attributes: &attributes[..attribute_count],
            index_count: mesh.index_count as i32,
        });
        self.stats.draw_calls += 1;
        self.stats.triangles += mesh.triangle_count;

        if renderable.is_instance() {
            self.shader.pop_instance_transform(self.device);
            if mirrored {
                self.device.set_front_face(FrontFace::Ccw);
            }
        }
        if uses_colors {
            self.shader.enable_color_usage(self.device, false);
        }
    }
}

fn vertex_attributes(layout: VertexLayout) -> ([VertexAttribute; 3], usize) {
    let mut attributes = [VertexAttribute { location: 0, components: 0, offset: 0 }; 3];
    let layout_attributes = layout.attributes();
    for (slot, attribute) in attributes.iter_mut().zip(layout_attributes) {
        *slot = VertexAttribute {
            location: attribute_location(attribute.semantic),
            components: attribute.components,
            offset: attribute.offset,
        };
    }
    (attributes, layout_attributes.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_follow_layout() {
        let (attributes, count) = vertex_attributes(VertexLayout::PositionNormalColor);
        assert_eq!(count, 3);
        assert_eq!(attributes[1], VertexAttribute { location: 1, components: 3, offset: 12 });
        assert_eq!(attributes[2], VertexAttribute { location: 3, components: 4, offset: 24 });

        let (attributes, count) = vertex_attributes(VertexLayout::PositionColor);
        assert_eq!(count, 2);
        assert_eq!(attributes[1], VertexAttribute { location: 3, components: 4, offset: 12 });
    }
}
