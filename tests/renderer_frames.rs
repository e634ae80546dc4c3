use glam::{DMat4, DVec3};
use kestrel_mesh_viewer::display::GpuFit;
use kestrel_mesh_viewer::gpu::{CullFace, DeviceCall, FrontFace, GraphicsDevice, RecordingDevice, UniformValue};
use kestrel_mesh_viewer::material::{Color, Material};
use kestrel_mesh_viewer::mesh::Mesh;
use kestrel_mesh_viewer::model::{
    prepare_model, DisplayModel, InstanceDefinition, Layer, MaterialSource, ModelSource, ObjectAttributes,
    PreparationOptions, PreparationSignals, SceneGeometry, SceneObject,
};
use kestrel_mesh_viewer::renderer::{RenderError, RenderQuality, Renderer};
use kestrel_mesh_viewer::viewport::Viewport;
use uuid::Uuid;

fn object(geometry: SceneGeometry, layer_index: usize, material_index: Option<usize>) -> SceneObject {
    SceneObject {
        attributes: ObjectAttributes {
            layer_index,
            material_source: MaterialSource::FromObject,
            material_index,
            ..ObjectAttributes::default()
        },
        geometry,
    }
}

fn glass() -> Material {
    Material { name: "glass".to_string(), transparency: 0.5, ..Material::default() }
}

fn build(objects: Vec<SceneObject>, layers: usize) -> DisplayModel {
    let source = ModelSource {
        layers: (0..layers).map(|i| Layer::new(format!("Layer {i}"))).collect(),
        materials: vec![glass()],
        objects,
        definitions: Vec::new(),
    };
    prepare_model(source, &PreparationOptions::default(), &PreparationSignals::default(), |_| {}).expect("model")
}

fn camera() -> Viewport {
    Viewport::perspective(DVec3::new(0.0, 0.0, 10.0), DVec3::ZERO, 0.8)
}

#[test]
fn frame_sets_clip_planes_from_visible_geometry() {
    let mut model = build(vec![object(SceneGeometry::Mesh(Mesh::cube(2.0)), 0, None)], 1);
    let mut renderer = Renderer::new(RecordingDevice::new());
    let mut viewport = camera();
    assert!(renderer.render_frame(&mut model, &mut viewport, RenderQuality::High));
    assert!(viewport.near() > 8.9 && viewport.near() < 11.2);
    assert!(viewport.far() > 8.9 && viewport.far() < 11.2);
    assert!(viewport.far() > viewport.near());
    assert_eq!(renderer.device().draws().count(), 1);
}

#[test]
fn rejected_uploads_are_never_retried() {
    let mut model = build(
        vec![object(SceneGeometry::Mesh(Mesh::cube(2.0)), 0, None), object(SceneGeometry::Mesh(Mesh::grid(3, 3, 1.0)), 0, None)],
        1,
    );
    let mut renderer = Renderer::new(RecordingDevice::new().fail_all_uploads());
    let mut viewport = camera();

    let stats = renderer.try_render_frame(&mut model, &mut viewport, RenderQuality::High).expect("frame");
    assert_eq!(stats.draw_calls, 0);
    assert_eq!(stats.rejected, 2);
    assert_eq!(renderer.device().live_buffer_count(), 0);
    assert!(model.meshes().iter().all(|mesh| mesh.fit() == GpuFit::Rejected && !mesh.has_source()));

    let attempts = renderer.device().upload_attempts();
    let stats = renderer.try_render_frame(&mut model, &mut viewport, RenderQuality::High).expect("frame");
    assert_eq!(stats.uploads, 0);
    assert_eq!(stats.skipped, 2);
    assert_eq!(renderer.device().upload_attempts(), attempts);
}

#[test]
fn partitions_over_budget_are_skipped_while_others_draw() {
    // a cube with computed normals needs 8 * 24 + 36 * 2 = 264 bytes
    let mut model = build(
        vec![object(SceneGeometry::Mesh(Mesh::cube(2.0)), 0, None), object(SceneGeometry::Mesh(Mesh::cube(1.0)), 0, None)],
        1,
    );
    let mut renderer = Renderer::new(RecordingDevice::new().with_memory_budget(300));
    let stats = renderer.try_render_frame(&mut model, &mut camera(), RenderQuality::Fast).expect("frame");
    assert_eq!(stats.draw_calls, 1);
    assert_eq!(stats.rejected, 1);
    assert_eq!(renderer.device().live_buffer_bytes(), 264);
    let fits: Vec<GpuFit> = model.meshes().iter().map(|mesh| mesh.fit()).collect();
    assert_eq!(fits, vec![GpuFit::Resident, GpuFit::Rejected]);
}

#[test]
fn shader_variants_are_built_once() {
    let mut model = build(vec![object(SceneGeometry::Mesh(Mesh::cube(2.0)), 0, None)], 1);
    let mut renderer = Renderer::new(RecordingDevice::new());
    let mut viewport = camera();

    assert!(renderer.render_frame(&mut model, &mut viewport, RenderQuality::High));
    let compiled = renderer.device().compile_count();
    let program = renderer.device().draws().last().and_then(|draw| draw.program);
    assert!(renderer.render_frame(&mut model, &mut viewport, RenderQuality::High));
    assert_eq!(renderer.device().compile_count(), compiled);
    assert_eq!(renderer.device().draws().last().and_then(|draw| draw.program), program);
    assert_eq!(renderer.device().live_program_count(), 1);

    assert!(renderer.render_frame(&mut model, &mut viewport, RenderQuality::Fast));
    assert_eq!(renderer.device().compile_count(), compiled + 2);
    assert_eq!(renderer.device().live_program_count(), 2);
    // shaders are deleted once linked
    assert_eq!(renderer.device().live_shader_count(), 0);
    assert_eq!(renderer.device().current_program(), None);

    renderer.release_shaders();
    assert_eq!(renderer.device().live_program_count(), 0);
}

#[test]
fn broken_shaders_fail_the_frame_without_rebuilding() {
    let mut model = build(vec![object(SceneGeometry::Mesh(Mesh::cube(2.0)), 0, None)], 1);
    let mut renderer = Renderer::new(RecordingDevice::new().fail_shader_compiles());
    let mut viewport = camera();
    assert!(!renderer.render_frame(&mut model, &mut viewport, RenderQuality::High));
    let compiled = renderer.device().compile_count();
    let err = renderer.try_render_frame(&mut model, &mut viewport, RenderQuality::High).unwrap_err();
    assert!(matches!(err, RenderError::Shader(_)));
    assert_eq!(renderer.device().compile_count(), compiled);
    assert_eq!(renderer.device().draws().count(), 0);
}

#[test]
fn transparent_meshes_draw_in_three_passes() {
    let mut model = build(
        vec![
            object(SceneGeometry::Mesh(Mesh::cube(2.0)), 0, Some(0)),
            object(SceneGeometry::Mesh(Mesh::grid(1, 1, 1.0)), 0, Some(0)),
        ],
        1,
    );
    assert_eq!(model.transparent().len(), 2);
    let mut renderer = Renderer::new(RecordingDevice::new());
    renderer.render_frame(&mut model, &mut camera(), RenderQuality::High);

    // cube: 36 indices, closed; grid: 6 indices, open
    let sequence: Vec<(i32, bool, Option<CullFace>)> =
        renderer.device().draws().map(|draw| (draw.index_count, draw.depth_write, draw.cull_face)).collect();
    assert_eq!(
        sequence,
        vec![
            (36, false, Some(CullFace::Front)),
            (6, false, Some(CullFace::Front)),
            (6, false, Some(CullFace::Back)),
            (36, true, Some(CullFace::Back)),
            (6, true, Some(CullFace::Back)),
            (6, true, Some(CullFace::Front)),
        ]
    );
    assert!(renderer.device().draws().all(|draw| draw.blend));
    assert_eq!(renderer.device().calls().last(), Some(&DeviceCall::UseProgram(None)));
    assert!(renderer.device().calls().contains(&DeviceCall::CullFace(None)));
}

#[test]
fn mirrored_instances_flip_winding_for_their_draw() {
    let member = SceneObject {
        attributes: ObjectAttributes { definition_member: true, ..ObjectAttributes::default() },
        geometry: SceneGeometry::Mesh(Mesh::cube(1.0)),
    };
    let definition = InstanceDefinition { id: Uuid::new_v4(), name: "part".to_string(), members: vec![member.attributes.id] };
    let mirror = DMat4::from_scale(DVec3::new(-1.0, 1.0, 1.0));
    let source = ModelSource {
        layers: vec![Layer::new("Default")],
        objects: vec![
            member,
            object(SceneGeometry::InstanceReference { definition: definition.id, transform: mirror }, 0, None),
        ],
        definitions: vec![definition],
        ..ModelSource::default()
    };
    let mut model =
        prepare_model(source, &PreparationOptions::default(), &PreparationSignals::default(), |_| {}).expect("model");
    let mut renderer = Renderer::new(RecordingDevice::new());
    renderer.render_frame(&mut model, &mut camera(), RenderQuality::High);

    let draws: Vec<_> = renderer.device().draws().collect();
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].front_face, FrontFace::Cw);
    let calls = renderer.device().calls();
    let draw_at = calls.iter().position(|call| matches!(call, DeviceCall::Draw(_))).expect("draw");
    assert!(calls[draw_at..].contains(&DeviceCall::FrontFace(FrontFace::Ccw)));
}

#[test]
fn hidden_layers_are_not_drawn_or_uploaded() {
    let mut model = build(
        vec![object(SceneGeometry::Mesh(Mesh::cube(2.0)), 0, None), object(SceneGeometry::Mesh(Mesh::cube(1.0)), 1, None)],
        2,
    );
    model.set_layer_visible(1, false);
    let mut renderer = Renderer::new(RecordingDevice::new());
    let stats = renderer.try_render_frame(&mut model, &mut camera(), RenderQuality::High).expect("frame");
    assert_eq!(stats.draw_calls, 1);
    assert_eq!(stats.uploads, 1);
    assert_eq!(model.meshes()[1].fit(), GpuFit::Unknown);
}

#[test]
fn memory_warning_only_drops_meshes_not_yet_uploaded() {
    let mut model = build(
        vec![
            object(SceneGeometry::Mesh(Mesh::cube(2.0)), 0, None),
            object(SceneGeometry::Mesh(Mesh::cube(1.0)), 1, None),
            object(SceneGeometry::Mesh(Mesh::cube(0.5)), 2, None),
        ],
        3,
    );
    model.set_layer_visible(2, false);
    let mut renderer = Renderer::new(RecordingDevice::new());
    let mut viewport = camera();
    renderer.render_frame(&mut model, &mut viewport, RenderQuality::High);
    assert_eq!(renderer.device().live_buffer_count(), 4);

    model.set_layer_visible(1, false);
    assert_eq!(renderer.handle_memory_warning(&mut model), 1);
    assert_eq!(renderer.device().live_buffer_count(), 4);
    let fits: Vec<GpuFit> = model.meshes().iter().map(|mesh| mesh.fit()).collect();
    assert_eq!(fits, vec![GpuFit::Resident, GpuFit::Resident, GpuFit::Rejected]);

    model.set_layer_visible(1, true);
    model.set_layer_visible(2, true);
    let stats = renderer.try_render_frame(&mut model, &mut viewport, RenderQuality::High).expect("frame");
    assert_eq!(stats.draw_calls, 2);
    assert_eq!(stats.uploads, 0);
    assert_eq!(stats.skipped, 1);
}

#[test]
fn material_uniforms_are_set_only_when_the_material_changes() {
    let red = Material { name: "red".to_string(), diffuse: Color::rgb(255, 0, 0), ..Material::default() };
    let green = Material { name: "green".to_string(), diffuse: Color::rgb(0, 255, 0), ..Material::default() };
    let blue = Material { name: "blue".to_string(), diffuse: Color::rgb(0, 0, 255), ..Material::default() };
    let source = ModelSource {
        layers: vec![Layer::new("Default")],
        materials: vec![red, green, blue],
        objects: vec![
            object(SceneGeometry::Mesh(Mesh::cube(2.0)), 0, Some(0)),
            object(SceneGeometry::Mesh(Mesh::cube(1.5)), 0, Some(0)),
            object(SceneGeometry::Mesh(Mesh::cube(1.0)), 0, Some(1)),
            object(SceneGeometry::Mesh(Mesh::cube(0.5)), 0, Some(2)),
        ],
        definitions: Vec::new(),
    };
    let mut model =
        prepare_model(source, &PreparationOptions::default(), &PreparationSignals::default(), |_| {}).expect("model");
    // room for three cubes; the blue one is rejected
    let mut renderer = Renderer::new(RecordingDevice::new().with_memory_budget(3 * 264));
    let stats = renderer.try_render_frame(&mut model, &mut camera(), RenderQuality::High).expect("frame");
    assert_eq!(stats.draw_calls, 3);
    assert_eq!(stats.rejected, 1);

    let program = renderer.device().draws().next().and_then(|draw| draw.program).expect("program");
    let diffuse = renderer.device_mut().uniform_location(program, "rglDiffuse").expect("diffuse uniform");
    let diffuse_writes = renderer
        .device()
        .calls()
        .iter()
        .filter(|call| matches!(call, DeviceCall::Uniform { location, .. } if *location == diffuse))
        .count();
    assert_eq!(diffuse_writes, 2);
    assert_eq!(
        renderer.device().uniform(program, "rglDiffuse"),
        Some(&UniformValue::Vec4([0.0, 1.0, 0.0, 1.0]))
    );
}

#[test]
fn released_models_stop_rendering() {
    let mut model = build(vec![object(SceneGeometry::Mesh(Mesh::cube(2.0)), 0, None)], 1);
    let mut renderer = Renderer::new(RecordingDevice::new());
    let mut viewport = camera();
    assert!(renderer.render_frame(&mut model, &mut viewport, RenderQuality::High));
    model.release_gpu_resources(renderer.device_mut());
    assert_eq!(renderer.device().live_buffer_count(), 0);
    assert!(!renderer.render_frame(&mut model, &mut viewport, RenderQuality::High));
    let err = renderer.try_render_frame(&mut model, &mut viewport, RenderQuality::High).unwrap_err();
    assert_eq!(err, RenderError::NotReady);
}
