//! Tests for the rendering pipelines

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::config::{BackendKind, EngineConfig};
    use crate::constants::shader_files;
    use crate::gpu::buffer_layouts::{
        bindings::{self, vertex_slots},
        GeometryVertex, InstanceCategory, Particle,
    };
    use crate::gpu::{GpuContext, SoftwareDevice};
    use crate::hot_reload::HotReloadConfig;
    use crate::shader::{compile_stage, ShaderStageKind, UniformSet};
    use glam::Vec3;
    use std::collections::HashSet;

    fn shader_source(name: &str) -> String {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("src/shaders")
            .join(name);
        std::fs::read_to_string(path).unwrap()
    }

    fn small_config() -> EngineConfig {
        let mut config = EngineConfig {
            backend: BackendKind::Software,
            hot_reload: HotReloadConfig::disabled(),
            ..EngineConfig::default()
        };
        config.classification.instance_count = 200;
        config.flocking.instance_count = 32;
        config.particles.particle_count = 64;
        config
    }

    fn declared_names(file: &str, kind: ShaderStageKind) -> HashSet<String> {
        let stage = compile_stage(kind, file, &shader_source(file)).unwrap();
        stage
            .reflection
            .params
            .unwrap()
            .slots
            .into_iter()
            .map(|s| s.name)
            .collect()
    }

    fn key_names<K: UniformSet>() -> HashSet<String> {
        K::ALL.iter().map(|k| k.name().to_string()).collect()
    }

    #[test]
    fn test_uniform_sets_match_shaders() {
        assert_eq!(
            key_names::<ClassifyUniform>(),
            declared_names(shader_files::CLASSIFY_COMPUTE, ShaderStageKind::Compute)
        );
        assert_eq!(
            key_names::<BoidUniform>(),
            declared_names(shader_files::BOIDS_COMPUTE, ShaderStageKind::Compute)
        );
        assert_eq!(
            key_names::<ParticleUniform>(),
            declared_names(shader_files::PARTICLES_COMPUTE, ShaderStageKind::Compute)
        );
        for file in [
            shader_files::BATCH_MESH_VERTEX,
            shader_files::BATCH_BILLBOARD_VERTEX,
            shader_files::BOIDS_VERTEX,
            shader_files::PARTICLES_VERTEX,
        ] {
            assert_eq!(key_names::<DrawUniform>(), declared_names(file, ShaderStageKind::Vertex));
        }

        for (i, key) in BoidUniform::ALL.iter().enumerate() {
            assert_eq!(key.index(), i);
        }
    }

    #[test]
    fn test_mesh_geometry() {
        let cube = MeshData::cube(0.5);
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.index_count(), 36);

        let quad = MeshData::quad(1.0);
        assert_eq!(quad.vertices.len(), 4);
        assert_eq!(quad.index_count(), 6);

        let boid = MeshData::boid();
        assert_eq!(boid.vertices.len(), 16);
        assert_eq!(boid.index_count(), 18);

        for mesh in [&cube, &quad, &boid] {
            assert_eq!(mesh.index_count() % 3, 0);
            assert!(mesh.indices.iter().all(|&i| (i as usize) < mesh.vertices.len()));
            for vertex in &mesh.vertices {
                let normal = Vec3::from_array(vertex.normal);
                assert!((normal.length() - 1.0).abs() < 1e-4);
            }
        }

        let extent = cube
            .vertices
            .iter()
            .flat_map(|v| v.position)
            .fold(0.0f32, |m, c| m.max(c.abs()));
        assert_eq!(extent, 0.5);
    }

    #[test]
    fn test_spawn_is_deterministic() {
        let a = spawn::batch_instances(50, 10.0, 7);
        let b = spawn::batch_instances(50, 10.0, 7);
        let c = spawn::batch_instances(50, 10.0, 8);
        assert_eq!(a, b);
        assert_ne!(a, c);

        for instance in &a {
            assert_eq!(instance.position[1], 0.0);
            assert!(instance.position[0].abs() <= 10.0 && instance.position[2].abs() <= 10.0);
            assert!((0.7..1.0).contains(&instance.scale));
        }

        let boids = spawn::boids(50, 5.0, 3);
        assert_eq!(boids, spawn::boids(50, 5.0, 3));
        for boid in &boids {
            assert!(boid.position().abs().max_element() <= 5.0);
            assert!(boid.velocity().abs().max_element() <= 1.0);
            assert_eq!(boid.acceleration(), Vec3::ZERO);
        }

        let particles = spawn::particles(50, 5.0, 9);
        assert_eq!(particles, spawn::particles(50, 5.0, 9));
        for particle in &particles {
            assert!(particle.position().abs().max_element() <= 5.0);
            assert_eq!(particle.velocity(), Vec3::ZERO);
        }
    }

    #[test]
    fn test_view_params() {
        let view = ViewParams::orbit(0.0, 10.0, 5.0, 1.5, 2.0);
        assert!((view.view_position - Vec3::new(10.0, 5.0, 0.0)).length() < 1e-5);
        assert_eq!(view.time, 2.0);

        // The target projects to the centre of the screen
        let clip = view.view_projection * glam::Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert!((clip.x / clip.w).abs() < 1e-5);
        assert!((clip.y / clip.w).abs() < 1e-5);
    }

    #[test]
    fn test_draw_pass_binds_and_uploads() {
        let mut ctx = GpuContext::new(SoftwareDevice::new().with_draw_capture());
        let config = small_config();
        let mut pass = InstancedDrawPass::new(
            &mut ctx,
            "Quads",
            config.shader_dir.join(shader_files::BATCH_BILLBOARD_VERTEX),
            config.shader_dir.join(shader_files::LIT_FRAGMENT),
            crate::gpu::buffer_layouts::ClassifyInstance::vertex_layout(),
            &MeshData::quad(0.5),
            None,
        )
        .unwrap();
        let instances = crate::gpu::GpuBuffer::with_data(
            &mut ctx,
            "Instances",
            crate::gpu::BufferTarget::Storage,
            &spawn::batch_instances(3, 5.0, 1),
            crate::gpu::UsageHint::Static,
        )
        .unwrap();

        let view = ViewParams::look_at(Vec3::new(0.0, 2.0, 8.0), Vec3::ZERO, 1.0, 0.25);
        pass.draw(&mut ctx, &instances, 3, &view).unwrap();

        let bound = ctx.bound();
        assert_eq!(bound.vertex_slots.get(&vertex_slots::GEOMETRY), Some(&pass.geometry().vertices.id()));
        assert_eq!(bound.vertex_slots.get(&vertex_slots::INSTANCES), Some(&instances.id()));
        assert_eq!(bound.index_buffer, Some(pass.geometry().indices.id()));

        let draws = ctx.device().captured_draws();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].element_count, 6);
        assert_eq!(draws[0].instance_count, 3);
        assert_eq!(
            draws[0].stream(vertex_slots::GEOMETRY).map(<[u8]>::len),
            Some(4 * std::mem::size_of::<GeometryVertex>())
        );

        assert_eq!(
            pass.program().uniform_by_name("time"),
            Some(crate::shader::UniformValue::F32(0.25))
        );
        assert_eq!(
            pass.program().uniform_by_name("view_position"),
            Some(crate::shader::UniformValue::Vec3(Vec3::new(0.0, 2.0, 8.0)))
        );
        assert_eq!(draws[0].uniforms, pass.program().param_bytes());
    }

    #[test]
    fn test_batch_scene_frame() {
        let mut ctx = GpuContext::new(SoftwareDevice::new().with_draw_capture());
        let config = small_config();
        let mut scene = BatchScene::new(&mut ctx, &config).unwrap();
        assert_eq!(scene.lod_distance(), config.classification.lod_distance);

        let view = ViewParams::look_at(Vec3::new(0.0, 0.0, 0.0), Vec3::X, 1.0, 0.0);
        let draws = scene.render_frame(&mut ctx, &view).unwrap();
        assert_eq!(draws.total(), 200);
        assert!(!draws.overflowed());

        // One dispatch, one counter readback, one draw per category
        let stats = ctx.device().stats();
        assert_eq!(stats.dispatches, 1);
        assert_eq!(stats.readbacks, 1);
        assert_eq!(stats.draws, 2);

        let captured = ctx.device_mut().take_captured_draws();
        assert_eq!(captured[0].instance_count, draws.instance_count(InstanceCategory::Near));
        assert_eq!(captured[1].instance_count, draws.instance_count(InstanceCategory::Far));
        assert_eq!(captured[0].element_count, 36);
        assert_eq!(captured[1].element_count, 6);

        // Everything is near once the threshold covers the whole field
        scene.set_lod_distance(1000.0);
        let draws = scene.render_frame(&mut ctx, &view).unwrap();
        assert_eq!(draws.instance_count(InstanceCategory::Near), 200);
        assert_eq!(draws.instance_count(InstanceCategory::Far), 0);
        // The empty category is still drawn
        assert_eq!(ctx.device().stats().draws, 4);
    }

    #[test]
    fn test_flock_scene_frame_and_reset() {
        let mut ctx = GpuContext::new(SoftwareDevice::new());
        let config = small_config();
        let mut scene = FlockScene::new(&mut ctx, &config).unwrap();
        let initial = scene.flocking().read_back(&mut ctx).unwrap();
        assert_eq!(initial.len(), 32);

        let view = ViewParams::orbit(0.0, 50.0, 10.0, 1.0, 0.0);
        scene.render_frame(&mut ctx, &view, 1.0 / 60.0).unwrap();
        assert_ne!(scene.flocking().read_back(&mut ctx).unwrap(), initial);
        // Nothing read back per frame apart from the explicit diagnostics
        assert_eq!(ctx.device().stats().readbacks, 2);

        scene.params_mut().max_speed = 50.0;
        scene.params_mut().paused = true;
        scene.reset(&mut ctx).unwrap();
        assert_eq!(*scene.params(), crate::config::FlockingParams::default());
        assert_eq!(scene.flocking().read_back(&mut ctx).unwrap(), initial);
    }

    #[test]
    fn test_pulled_pass_binds_storage_only() {
        let mut ctx = GpuContext::new(SoftwareDevice::new().with_draw_capture());
        let config = small_config();
        let mut pass = InstancedDrawPass::pulled(
            &mut ctx,
            "Sprites",
            config.shader_dir.join(shader_files::PARTICLES_VERTEX),
            config.shader_dir.join(shader_files::LIT_FRAGMENT),
            &MeshData::quad(0.1),
            None,
        )
        .unwrap();
        let particles = spawn::particles(5, 1.0, 2);
        let buffer = crate::gpu::GpuBuffer::with_data(
            &mut ctx,
            "Particles",
            crate::gpu::BufferTarget::Storage,
            &particles,
            crate::gpu::UsageHint::Static,
        )
        .unwrap();

        let view = ViewParams::look_at(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, 1.0, 0.0);
        pass.draw_pulled(&mut ctx, bindings::particles::PARTICLES, &buffer, 5, &view)
            .unwrap();

        assert_eq!(pass.program().vertex_streams().len(), 1);
        assert_eq!(ctx.bound().storage.get(&bindings::particles::PARTICLES), Some(&buffer.id()));

        let draws = ctx.device().captured_draws();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].instance_count, 5);
        assert!(draws[0].stream(vertex_slots::INSTANCES).is_none());
        assert_eq!(
            draws[0].storage(bindings::particles::PARTICLES),
            Some(bytemuck::cast_slice::<Particle, u8>(&particles))
        );
    }

    #[test]
    fn test_particle_scene_attract_and_reset() {
        let mut ctx = GpuContext::new(SoftwareDevice::new().with_draw_capture());
        let config = small_config();
        let mut scene = ParticleScene::new(&mut ctx, &config).unwrap();
        let initial = scene.particles().read_back(&mut ctx).unwrap();
        assert_eq!(initial.len(), 64);
        assert!(!scene.is_attracting());

        // Released, particles at rest stay where they are
        let view = ViewParams::orbit(0.0, 15.0, 5.0, 1.0, 0.0);
        scene.render_frame(&mut ctx, &view, 0.1).unwrap();
        assert_eq!(scene.particles().read_back(&mut ctx).unwrap(), initial);

        scene.attract(Vec3::ZERO);
        assert!(scene.is_attracting());
        let before = scene.particles().mean_distance(&mut ctx).unwrap();
        for _ in 0..5 {
            scene.render_frame(&mut ctx, &view, 0.1).unwrap();
        }
        assert!(scene.particles().mean_distance(&mut ctx).unwrap() < before);

        // Each frame: one dispatch, one storage barrier, one pulled draw
        let stats = ctx.device().stats();
        assert_eq!(stats.dispatches, 6);
        assert_eq!(stats.draws, 6);
        let captured = ctx.device().captured_draws();
        assert!(captured.iter().all(|d| d.instance_count == 64 && d.element_count == 6));

        scene.reset(&mut ctx).unwrap();
        assert!(!scene.is_attracting());
        assert_eq!(scene.particles().read_back(&mut ctx).unwrap(), initial);
    }
}
