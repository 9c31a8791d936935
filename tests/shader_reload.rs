/// Shader Hot Reload Tests
///
/// Edits shader sources on disk while pipelines are running and checks that
/// valid edits swap programs in and broken edits leave the previous program
/// active.

use instancing_engine::constants::shader_files;
use instancing_engine::pipelines::{spawn, FlockingPipeline, InstancedDrawPass, MeshData, ViewParams};
use instancing_engine::{BoidInstance, EngineConfig, FlockingParams, GpuContext, SoftwareDevice};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

const BROKEN: &str = "@compute @workgroup_size(64) fn update_boids( {";

fn copy_shader(dir: &TempDir, name: &str) -> PathBuf {
    let from = EngineConfig::default().shader_dir.join(name);
    let to = dir.path().join(name);
    fs::copy(from, &to).unwrap();
    to
}

fn touch(path: &Path, offset_secs: u64) {
    let file = fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(offset_secs))
        .unwrap();
}

#[test]
fn test_broken_edit_keeps_previous_kernel() {
    let dir = TempDir::new().unwrap();
    let shader = copy_shader(&dir, shader_files::BOIDS_COMPUTE);

    let mut ctx = GpuContext::new(SoftwareDevice::new());
    let mut flocking =
        FlockingPipeline::new(&mut ctx, &shader, &spawn::boids(16, 5.0, 2), Some(Duration::ZERO))
            .unwrap();
    let params = FlockingParams::default();
    let generation = flocking.kernel().program().generation();

    fs::write(&shader, BROKEN).unwrap();
    touch(&shader, 10);

    // The change settles on the second poll; both steps still dispatch
    for _ in 0..2 {
        let report = flocking.step(&mut ctx, &params, 1.0 / 60.0).unwrap();
        assert_eq!(report.program_generation, generation);
    }
    let program = flocking.kernel().program();
    assert!(program.last_error().is_some());
    assert!(program.is_usable());
    assert_eq!(program.generation(), generation);
    assert_eq!(ctx.device().stats().dispatches, 2);

    // Fixing the file brings in a new generation
    let original = fs::read_to_string(
        EngineConfig::default().shader_dir.join(shader_files::BOIDS_COMPUTE),
    )
    .unwrap();
    fs::write(&shader, format!("// edited\n{original}")).unwrap();
    touch(&shader, 20);

    let mut last = generation;
    for _ in 0..2 {
        last = flocking.step(&mut ctx, &params, 1.0 / 60.0).unwrap().program_generation;
    }
    assert!(last > generation);
    assert!(flocking.kernel().program().last_error().is_none());
    println!("✓ Kernel reloaded after a broken edit");
}

#[test]
fn test_valid_edit_refreshes_uniform_locations() {
    let dir = TempDir::new().unwrap();
    let shader = copy_shader(&dir, shader_files::BOIDS_COMPUTE);

    let mut ctx = GpuContext::new(SoftwareDevice::new());
    let boid = BoidInstance::new(glam::Vec3::ZERO, glam::Vec3::ONE, glam::Vec3::X);
    let mut flocking = FlockingPipeline::new(&mut ctx, &shader, &[boid], Some(Duration::ZERO)).unwrap();
    let params = FlockingParams::default().without_steering();

    let original = fs::read_to_string(&shader).unwrap();
    fs::write(&shader, format!("// edited\n{original}")).unwrap();
    touch(&shader, 10);

    flocking.step(&mut ctx, &params, 0.5).unwrap();
    let report = flocking.step(&mut ctx, &params, 0.5).unwrap();
    assert_eq!(report.program_generation, flocking.kernel().program().generation());

    // Parameters resolved against the new program still reach the kernel
    let boids = flocking.read_back(&mut ctx).unwrap();
    assert!((boids[0].position[0] - 1.0).abs() < 1e-6);
}

#[test]
fn test_broken_vertex_edit_keeps_drawing() {
    let dir = TempDir::new().unwrap();
    let vertex = copy_shader(&dir, shader_files::BOIDS_VERTEX);
    let fragment = copy_shader(&dir, shader_files::LIT_FRAGMENT);

    let mut ctx = GpuContext::new(SoftwareDevice::new().with_draw_capture());
    let mut pass = InstancedDrawPass::new(
        &mut ctx,
        "Boids",
        &vertex,
        &fragment,
        BoidInstance::vertex_layout(),
        &MeshData::boid(),
        Some(Duration::ZERO),
    )
    .unwrap();
    let flocking = FlockingPipeline::new(
        &mut ctx,
        EngineConfig::default().shader_dir.join(shader_files::BOIDS_COMPUTE),
        &spawn::boids(8, 5.0, 4),
        None,
    )
    .unwrap();
    let generation = pass.program().generation();

    fs::write(&vertex, "@vertex fn vs_main(").unwrap();
    touch(&vertex, 10);

    let view = ViewParams::orbit(0.0, 20.0, 5.0, 1.0, 0.0);
    for _ in 0..2 {
        pass.draw(&mut ctx, flocking.boids(), flocking.count(), &view).unwrap();
    }

    assert_eq!(ctx.device().captured_draws().len(), 2);
    assert!(pass.program().last_error().is_some());
    assert_eq!(pass.program().generation(), generation);
}
