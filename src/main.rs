/// Headless instancing engine runner
/// Renders the batch classification, flocking and particle scenes for a
/// fixed number of frames and logs what each frame drew.
///
/// Usage: instancing-engine [config.toml]

use anyhow::{Context, Result};
use glam::Vec3;
use instancing_engine::{
    BackendKind, BatchScene, EngineConfig, FlockScene, GpuContext, GpuDevice, ParticleScene, SoftwareDevice,
    ViewParams,
};
use log::{info, warn};

const FRAME_DT: f32 = 1.0 / 60.0;

fn run<D: GpuDevice>(mut ctx: GpuContext<D>, config: &EngineConfig) -> Result<()> {
    let mut batch = BatchScene::new(&mut ctx, config).context("failed to build batch scene")?;
    let mut flock = FlockScene::new(&mut ctx, config).context("failed to build flock scene")?;
    let mut particles = ParticleScene::new(&mut ctx, config).context("failed to build particle scene")?;
    let aspect = config.render_target.aspect();

    for frame in 0..config.frames {
        ctx.begin_frame();
        let time = frame as f32 * FRAME_DT;

        let view = ViewParams::orbit(time * 0.2, 35.0, 12.0, aspect, time);
        let draws = batch.render_frame(&mut ctx, &view)?;

        let flock_view = ViewParams::orbit(time * 0.1, 70.0, 20.0, aspect, time);
        flock.render_frame(&mut ctx, &flock_view, FRAME_DT)?;

        // Attractor held one second out of two, circling the origin
        if (time as u32) % 2 == 0 {
            particles.attract(Vec3::new(time.cos() * 2.0, 0.0, time.sin() * 2.0));
        } else {
            particles.release();
        }
        let particle_view = ViewParams::orbit(time * 0.3, 15.0, 5.0, aspect, time);
        particles.render_frame(&mut ctx, &particle_view, FRAME_DT)?;

        if frame % 30 == 0 || frame + 1 == config.frames {
            let centroid = flock.flocking().centroid(&mut ctx)?;
            let spread = particles.particles().mean_distance(&mut ctx)?;
            info!(
                "Frame {}: {} near, {} far{}, flock centroid {:.2?}, particle spread {:.2}{}",
                frame,
                draws.instance_counts.near(),
                draws.instance_counts.far(),
                if draws.overflowed() { " (clamped)" } else { "" },
                centroid,
                spread,
                if particles.is_attracting() { " (attracting)" } else { "" }
            );
        }
    }

    info!("Rendered {} frames on the {} backend", config.frames, ctx.backend_name());
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::load(&path).with_context(|| format!("failed to load config {}", path))?,
        None => EngineConfig::default(),
    };

    match config.backend {
        #[cfg(feature = "native")]
        BackendKind::Wgpu => {
            let target = config.render_target;
            match instancing_engine::WgpuDevice::new(target.width, target.height) {
                Ok(device) => return run(GpuContext::new(device), &config),
                Err(e) => warn!("wgpu backend unavailable ({}), falling back to software", e),
            }
        }
        #[cfg(not(feature = "native"))]
        BackendKind::Wgpu => warn!("built without the native feature, using the software backend"),
        BackendKind::Software => {}
    }

    run(GpuContext::new(SoftwareDevice::new()), &config)
}
