//! Approximate order independent transparency without sorting.
//!
//! Back faces go first with depth writes off so they never hide front faces. Open meshes
//! have no consistent inside, so they are also drawn with their front faces in that
//! pass. Pass two writes depth for front faces; pass three repaints the back faces of
//! open meshes that the depth written in pass two still lets through.

use super::mesh_pass::DrawContext;
use crate::display::Renderable;
use crate::gpu::CullFace;

pub(super) fn draw_transparent<'r, I>(ctx: &mut DrawContext<'_>, renderables: I)
where
    I: Iterator<Item = &'r Renderable> + Clone,
{
    ctx.device.set_depth_write(false);
    ctx.device.set_cull_face(Some(CullFace::Front));
    for renderable in renderables.clone() {
        ctx.draw(renderable);
        if !ctx.is_closed(renderable) {
            ctx.device.set_cull_face(Some(CullFace::Back));
            ctx.draw(renderable);
            ctx.device.set_cull_face(Some(CullFace::Front));
        }
    }

    ctx.device.set_depth_write(true);
    ctx.device.set_cull_face(Some(CullFace::Back));
    for renderable in renderables.clone() {
        ctx.draw(renderable);
    }

    ctx.device.set_cull_face(Some(CullFace::Front));
    for renderable in renderables {
        if !ctx.is_closed(renderable) {
            ctx.draw(renderable);
        }
    }

    ctx.device.set_cull_face(None);
}
