use glam::Vec3;
use kestrel_mesh_viewer::mesh::{Mesh, MeshFace};
use kestrel_mesh_viewer::partition::{partition_mesh, PartitionLimits, VertexLayout, MAX_PARTITION_VERTICES};

fn strip_mesh() -> Mesh {
    let positions: Vec<Vec3> = (0..70_000).map(|i| Vec3::new(i as f32, (i % 7) as f32, 0.0)).collect();
    let mut faces = Vec::with_capacity(40_000);
    for k in 0..30_000u32 {
        faces.push(MeshFace::triangle(2 * k, 2 * k + 1, 2 * k + 2));
    }
    for j in 0..10_000u32 {
        let v = 65_535 + (j % 4_462);
        faces.push(MeshFace::triangle(v, v + 1, v + 2));
    }
    Mesh::new(positions, faces)
}

#[test]
fn seventy_thousand_vertices_split_at_the_limit() {
    let mesh = strip_mesh();
    assert_eq!(mesh.triangle_count(), 40_000);
    let partitioned = partition_mesh(mesh, PartitionLimits::new(65_535, usize::MAX)).expect("partition");

    let ranges: Vec<_> = partitioned.partitions().iter().map(|part| part.vertex_range()).collect();
    assert_eq!(ranges, vec![0..65_535, 65_535..70_000]);
    let triangles: Vec<_> = partitioned.partitions().iter().map(|part| part.triangle_count).collect();
    assert_eq!(triangles, vec![30_000, 10_000]);
    assert_eq!(partitioned.mesh().vertex_count(), 70_000);
    assert_eq!(partitioned.layout(), VertexLayout::Position);

    let second = partitioned.build_buffers(1).expect("second partition");
    assert_eq!(second.vertices.len(), 4_465);
    assert_eq!(second.indices.len(), 30_000);
    assert_eq!(second.indices[..3], [0, 1, 2]);
    assert!(second.indices.iter().all(|&index| (index as usize) < 4_465));
}

#[test]
fn rebuilt_partitions_cover_every_vertex_and_face_once() {
    // grid rows share vertices, so no cut is straddle free and the mesh is rebuilt
    let mesh = Mesh::grid(300, 300, 1.0);
    let face_count = mesh.face_count();
    let partitioned = partition_mesh(mesh, PartitionLimits::new(10_000, usize::MAX)).expect("partition");
    let vertex_count = partitioned.mesh().vertex_count();
    assert!(vertex_count > 301 * 301);

    let parts = partitioned.partitions();
    assert!(parts.len() > 1);
    assert_eq!(parts[0].vertex_start, 0);
    assert_eq!(parts[0].face_start, 0);
    for pair in parts.windows(2) {
        assert_eq!(pair[0].vertex_end, pair[1].vertex_start);
        assert_eq!(pair[0].face_end, pair[1].face_start);
    }
    let last = parts.last().expect("partitions");
    assert_eq!(last.vertex_end, vertex_count);
    assert_eq!(last.face_end, face_count);
    for (index, part) in parts.iter().enumerate() {
        assert!(part.vertex_count() <= 10_000);
        let buffers = partitioned.build_buffers(index).expect("buffers");
        assert!(buffers.indices.iter().all(|&i| (i as usize) < part.vertex_count()));
    }
}

#[test]
fn default_limit_keeps_large_indices_in_sixteen_bits() {
    let partitioned = partition_mesh(Mesh::grid(400, 200, 1.0), PartitionLimits::default()).expect("partition");
    for (index, part) in partitioned.partitions().iter().enumerate() {
        assert!(part.vertex_count() <= MAX_PARTITION_VERTICES);
        let buffers = partitioned.build_buffers(index).expect("buffers");
        assert_eq!(buffers.indices.len(), part.triangle_count * 3);
    }
}
