use std::thread;
use std::time::Duration;

use anyhow::Result;
use glam::{DMat4, DVec3, Vec3};
use log::info;
use uuid::Uuid;

use kestrel_mesh_viewer::cli::CliOverrides;
use kestrel_mesh_viewer::config::ViewerConfig;
use kestrel_mesh_viewer::gpu::RecordingDevice;
use kestrel_mesh_viewer::material::{Color, Material};
use kestrel_mesh_viewer::mesh::Mesh;
use kestrel_mesh_viewer::model::{
    InstanceDefinition, Layer, MaterialSource, ModelSource, ObjectAttributes, PreparationTask, SceneGeometry,
    SceneObject,
};
use kestrel_mesh_viewer::renderer::Renderer;

const DEFAULT_FRAMES: u32 = 3;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = match CliOverrides::parse_from_env() {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("[cli] {err}");
            std::process::exit(2);
        }
    };
    if let Err(err) = run(&cli) {
        eprintln!("Application error: {err:?}");
        std::process::exit(1);
    }
}

/// Prepares a synthetic scene and draws it headless on the recording device.
fn run(cli: &CliOverrides) -> Result<()> {
    let mut config = cli.config_path().map(ViewerConfig::load_or_default).unwrap_or_default();
    let overrides = cli.to_config_overrides();
    if !overrides.is_empty() {
        info!("[cli] overriding {}", overrides.applied_fields().join(", "));
        config.apply_overrides(&overrides);
    }

    let task = PreparationTask::spawn(demo_scene(), config.preparation_options())?;
    while !task.is_finished() {
        for event in task.drain() {
            info!("[model] {event}");
        }
        thread::sleep(Duration::from_millis(10));
    }
    for event in task.drain() {
        info!("[model] {event}");
    }
    let mut model = task.wait()?;

    let mut renderer = Renderer::with_config(RecordingDevice::new(), &config);
    let mut viewport = model.default_viewport();
    renderer.resize(1280, 720);
    for frame in 0..cli.frames().unwrap_or(DEFAULT_FRAMES) {
        renderer.clear();
        let stats = renderer.try_render_frame(&mut model, &mut viewport, config.render.quality)?;
        info!(
            "[renderer] frame {frame}: {} draws, {} triangles, {} uploads, {} rejected",
            stats.draw_calls, stats.triangles, stats.uploads, stats.rejected
        );
    }
    info!(
        "[renderer] {} GPU buffers holding {} bytes",
        renderer.device().live_buffer_count(),
        renderer.device().live_buffer_bytes()
    );
    model.release_gpu_resources(renderer.device_mut());
    renderer.release_shaders();
    Ok(())
}

fn demo_scene() -> ModelSource {
    let terrain = SceneObject {
        attributes: ObjectAttributes::default(),
        geometry: SceneGeometry::Mesh(wavy_grid(320, 320)),
    };
    let glass = SceneObject {
        attributes: ObjectAttributes {
            layer_index: 1,
            material_source: MaterialSource::FromObject,
            material_index: Some(0),
            ..ObjectAttributes::default()
        },
        geometry: SceneGeometry::Mesh(Mesh::cube(40.0)),
    };
    let bolt = SceneObject {
        attributes: ObjectAttributes { definition_member: true, ..ObjectAttributes::default() },
        geometry: SceneGeometry::Mesh(Mesh::cube(4.0)),
    };
    let definition = InstanceDefinition { id: Uuid::new_v4(), name: "bolt".to_string(), members: vec![bolt.attributes.id] };
    let reference = |transform: DMat4| SceneObject {
        attributes: ObjectAttributes { layer_index: 1, ..ObjectAttributes::default() },
        geometry: SceneGeometry::InstanceReference { definition: definition.id, transform },
    };
    let references = vec![
        reference(DMat4::from_translation(DVec3::new(60.0, 60.0, 10.0))),
        reference(DMat4::from_scale(DVec3::new(-1.0, 1.0, 1.0)) * DMat4::from_translation(DVec3::new(-60.0, 60.0, 10.0))),
    ];

    let mut objects = vec![terrain, glass, bolt];
    objects.extend(references);
    ModelSource {
        layers: vec![Layer::new("Terrain"), Layer::new("Props")],
        materials: vec![Material {
            name: "glass".to_string(),
            diffuse: Color::rgb(120, 180, 255),
            transparency: 0.6,
            shine: 200,
            ..Material::default()
        }],
        objects,
        definitions: vec![definition],
    }
}

/// More vertices than one partition holds, with a per-vertex color ramp.
fn wavy_grid(columns: u32, rows: u32) -> Mesh {
    let mut mesh = Mesh::grid(columns, rows, 1.0);
    for position in &mut mesh.positions {
        position.z = (position.x * 0.1).sin() * (position.y * 0.1).cos() * 4.0;
    }
    let colors = mesh
        .positions
        .iter()
        .map(|position| {
            let t = (position.z / 8.0 + 0.5).clamp(0.0, 1.0);
            let color = Vec3::new(0.2, 0.5, 0.2).lerp(Vec3::new(0.9, 0.9, 0.8), t);
            [color.x, color.y, color.z, 1.0]
        })
        .collect();
    mesh.with_colors(colors)
}
