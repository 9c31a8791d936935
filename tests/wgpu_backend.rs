#![cfg(feature = "native")]

/// GPU Backend Tests
///
/// Runs the same pipelines on the wgpu device and on the software device and
/// compares results. Skipped when no adapter is available.

use glam::Vec3;
use instancing_engine::constants::shader_files;
use instancing_engine::pipelines::{spawn, ClassificationPipeline, FlockingPipeline, ParticlePipeline};
use instancing_engine::{
    EngineConfig, FlockingParams, GpuContext, GpuDevice, InstanceCategory, ResolvedDraws,
    SoftwareDevice, WgpuDevice,
};

fn gpu_context() -> Option<GpuContext<WgpuDevice>> {
    match WgpuDevice::new(64, 64) {
        Ok(device) => Some(GpuContext::new(device)),
        Err(e) => {
            println!("Skipping GPU test - no GPU available ({})", e);
            None
        }
    }
}

fn classify<D: GpuDevice>(ctx: &mut GpuContext<D>, count: u32, view: Vec3) -> ResolvedDraws {
    let shader = EngineConfig::default().shader_dir.join(shader_files::CLASSIFY_COMPUTE);
    let instances = spawn::batch_instances(count, 20.0, 77);
    let mut classification = ClassificationPipeline::new(ctx, shader, &instances, count, None).unwrap();
    // Second frame checks the counter reset as well
    classification.classify(ctx, view, 12.0).unwrap();
    classification.classify(ctx, view, 12.0).unwrap()
}

#[test]
fn test_classification_matches_software() {
    let Some(mut gpu) = gpu_context() else {
        return;
    };
    let mut software = GpuContext::new(SoftwareDevice::new());

    let view = Vec3::new(3.0, 1.0, -2.0);
    // Small counts leave padding in the input allocation
    for count in [1u32, 3, 65, 1000] {
        let expected = classify(&mut software, count, view);
        let actual = classify(&mut gpu, count, view);

        assert_eq!(actual.total(), count as u64);
        for category in InstanceCategory::ALL {
            assert_eq!(actual.instance_count(category), expected.instance_count(category));
        }
    }
    println!("✓ {} classification matches software", gpu.backend_name());
}

#[test]
fn test_attracted_particles_match_software() {
    let Some(mut gpu) = gpu_context() else {
        return;
    };
    let mut software = GpuContext::new(SoftwareDevice::new());
    let shader = EngineConfig::default().shader_dir.join(shader_files::PARTICLES_COMPUTE);
    // Fewer records than a workgroup, so the guard matters
    let particles = spawn::particles(37, 5.0, 13);

    let mut on_gpu = ParticlePipeline::new(&mut gpu, &shader, &particles, None).unwrap();
    let mut on_cpu = ParticlePipeline::new(&mut software, &shader, &particles, None).unwrap();
    for pipeline in [&mut on_gpu, &mut on_cpu] {
        pipeline.set_center_of_mass(Vec3::new(1.0, 0.5, -1.0));
        pipeline.set_mass(1.0);
    }
    for _ in 0..3 {
        on_gpu.step(&mut gpu, 0.05).unwrap();
        on_cpu.step(&mut software, 0.05).unwrap();
    }

    let actual = on_gpu.read_back(&mut gpu).unwrap();
    let expected = on_cpu.read_back(&mut software).unwrap();
    assert_eq!(actual.len(), 37);
    for (a, e) in actual.iter().zip(&expected) {
        assert!((a.position() - e.position()).length() < 1e-3);
        assert!((a.velocity() - e.velocity()).length() < 1e-3);
    }
    println!("✓ {} particle step matches software", gpu.backend_name());
}

#[test]
fn test_drifting_flock_matches_software() {
    let Some(mut gpu) = gpu_context() else {
        return;
    };
    let mut software = GpuContext::new(SoftwareDevice::new());
    let shader = EngineConfig::default().shader_dir.join(shader_files::BOIDS_COMPUTE);
    let boids = spawn::boids(200, 10.0, 31);
    let params = FlockingParams::default().without_steering();

    let mut on_gpu = FlockingPipeline::new(&mut gpu, &shader, &boids, None).unwrap();
    let mut on_cpu = FlockingPipeline::new(&mut software, &shader, &boids, None).unwrap();
    for _ in 0..3 {
        on_gpu.step(&mut gpu, &params, 0.1).unwrap();
        on_cpu.step(&mut software, &params, 0.1).unwrap();
    }

    let actual = on_gpu.read_back(&mut gpu).unwrap();
    let expected = on_cpu.read_back(&mut software).unwrap();
    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(&expected) {
        assert!((a.position() - e.position()).length() < 1e-4);
        assert!((a.velocity() - e.velocity()).length() < 1e-4);
    }
}

#[test]
fn test_paused_flock_unchanged_on_gpu() {
    let Some(mut gpu) = gpu_context() else {
        return;
    };
    let shader = EngineConfig::default().shader_dir.join(shader_files::BOIDS_COMPUTE);
    let boids = spawn::boids(64, 10.0, 12);
    let mut flocking = FlockingPipeline::new(&mut gpu, shader, &boids, None).unwrap();

    let params = FlockingParams {
        paused: true,
        ..FlockingParams::default()
    };
    flocking.step(&mut gpu, &params, 0.1).unwrap();
    assert_eq!(flocking.read_back(&mut gpu).unwrap(), boids);
}
