use anyhow::{bail, Result};
use log::{trace, warn};

use super::FrameStats;
use crate::display::{DisplayMesh, GpuFit};
use crate::gpu::{BufferHandle, BufferTarget, GraphicsDevice};
use crate::partition::PartitionBuffers;

/// Uploads `mesh` on its first draw. Returns whether it can be drawn.
///
/// The shared source is dropped on the first attempt whatever the outcome, so a rejected
/// partition is never retried and the CPU copy of a fully uploaded mesh goes away with
/// its last partition.
pub(super) fn ensure_resident(device: &mut dyn GraphicsDevice, mesh: &mut DisplayMesh, stats: &mut FrameStats) -> bool {
    match mesh.fit {
        GpuFit::Resident => return true,
        GpuFit::Rejected => return false,
        GpuFit::Unknown => {}
    }
    let Some(source) = mesh.source.take() else {
        mesh.fit = GpuFit::Rejected;
        return false;
    };
    let buffers = match source.build_buffers(mesh.partition_index) {
        Ok(buffers) => buffers,
        Err(err) => {
            warn!("[gpu] partition {} of object {} has no data: {err}", mesh.partition_index, mesh.object_id);
            mesh.fit = GpuFit::Rejected;
            stats.rejected += 1;
            return false;
        }
    };
    drop(source);

    stats.uploads += 1;
    let mut created = Vec::with_capacity(2);
    match upload(device, &buffers, &mut created) {
        Ok((vertex, index)) => {
            mesh.vertex_buffer.set(vertex);
            mesh.index_buffer.set(index);
            mesh.fit = GpuFit::Resident;
            trace!(
                "[gpu] partition {} of object {} resident ({} bytes)",
                mesh.partition_index,
                mesh.object_id,
                buffers.vertices.as_bytes().len() + buffers.index_bytes().len()
            );
            true
        }
        Err(err) => {
            for handle in created {
                device.delete_buffer(handle);
            }
            // a failed create returns before the error queue is read
            device.take_errors();
            mesh.fit = GpuFit::Rejected;
            stats.rejected += 1;
            warn!(
                "[gpu] partition {} of object {} does not fit on the GPU: {err:#}",
                mesh.partition_index, mesh.object_id
            );
            false
        }
    }
}

fn upload(
    device: &mut dyn GraphicsDevice,
    buffers: &PartitionBuffers,
    created: &mut Vec<BufferHandle>,
) -> Result<(BufferHandle, BufferHandle)> {
    let vertex = device.create_buffer()?;
    created.push(vertex);
    device.upload_buffer(BufferTarget::Vertex, vertex, buffers.vertices.as_bytes());

    let index = device.create_buffer()?;
    created.push(index);
    device.upload_buffer(BufferTarget::Index, index, buffers.index_bytes());

    // every pending error counts, including ones raised before this upload
    let errors = device.take_errors();
    if !errors.is_empty() {
        let codes: Vec<String> = errors.iter().map(ToString::to_string).collect();
        bail!("device reported {}", codes.join(", "));
    }
    Ok((vertex, index))
}
