//! Tests for shader programs and uniforms

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::error::EngineError;
    use crate::gpu::buffer_layouts::GeometryVertex;
    use crate::gpu::{GpuContext, SoftwareDevice};
    use glam::{Vec3, Vec4};
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    const VERTEX: &str = r#"
struct Params {
    tint: vec4<f32>,
    scale: f32,
    count: u32,
}

@group(1) @binding(0) var<uniform> params: Params;

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) color: vec4<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = vec4<f32>(f32(index) * params.scale, f32(params.count), 0.0, 1.0);
    out.color = params.tint;
    return out;
}
"#;

    // Adds a member and moves `scale` to a new offset
    const VERTEX_EDITED: &str = r#"
struct Params {
    tint: vec4<f32>,
    offset: f32,
    scale: f32,
}

@group(1) @binding(0) var<uniform> params: Params;

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) color: vec4<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = vec4<f32>(f32(index) * params.scale + params.offset, 0.0, 0.0, 1.0);
    out.color = params.tint;
    return out;
}
"#;

    const FRAGMENT: &str = r#"
@fragment
fn fs_main(@location(0) color: vec4<f32>) -> @location(0) vec4<f32> {
    return color;
}
"#;

    const BROKEN: &str = "fn vs_main( -> {";

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum TestUniform {
        Tint,
        Scale,
        Offset,
    }

    impl UniformSet for TestUniform {
        const ALL: &'static [Self] = &[Self::Tint, Self::Scale, Self::Offset];

        fn name(self) -> &'static str {
            match self {
                Self::Tint => "tint",
                Self::Scale => "scale",
                Self::Offset => "offset",
            }
        }

        fn index(self) -> usize {
            self as usize
        }
    }

    struct Sources {
        _dir: TempDir,
        vertex: PathBuf,
        fragment: PathBuf,
    }

    fn sources(vertex: &str) -> Sources {
        let dir = TempDir::new().unwrap();
        let vertex_path = dir.path().join("test.vert.wgsl");
        let fragment_path = dir.path().join("test.frag.wgsl");
        fs::write(&vertex_path, vertex).unwrap();
        fs::write(&fragment_path, FRAGMENT).unwrap();
        Sources {
            _dir: dir,
            vertex: vertex_path,
            fragment: fragment_path,
        }
    }

    fn desc(sources: &Sources) -> ProgramDesc {
        ProgramDesc::new("Test Program")
            .stage(StageSource::vertex(&sources.vertex))
            .stage(StageSource::fragment(&sources.fragment))
    }

    fn context() -> GpuContext<SoftwareDevice> {
        GpuContext::new(SoftwareDevice::new())
    }

    fn touch(path: &Path, offset_secs: u64) {
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(offset_secs))
            .unwrap();
    }

    #[test]
    fn test_empty_and_duplicate_stages() {
        let mut ctx = context();

        let err = ShaderProgram::build(&mut ctx, ProgramDesc::new("Empty")).unwrap_err();
        assert!(matches!(err, EngineError::EmptyStageSet { .. }));
        assert!(err.is_fatal());

        let src = sources(VERTEX);
        let duplicate = desc(&src).stage(StageSource::vertex(&src.vertex));
        let err = ShaderProgram::build(&mut ctx, duplicate).unwrap_err();
        assert!(matches!(
            err,
            EngineError::DuplicateStage {
                stage: ShaderStageKind::Vertex,
                ..
            }
        ));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_build_links_and_reflects() {
        let mut ctx = context();
        let src = sources(VERTEX);

        let mut program = ShaderProgram::build(&mut ctx, desc(&src)).unwrap();
        assert_eq!(program.state(), ProgramState::Active);
        assert!(program.handle().is_some());
        assert!(program.last_error().is_none());
        assert!(program.generation() > 0);

        let params = &program.reflection().params;
        assert_eq!(params.type_name, "Params");
        assert_eq!(params.slot("tint").map(|(_, s)| s.offset), Some(0));
        assert_eq!(params.slot("scale").map(|(_, s)| s.offset), Some(16));
        assert_eq!(params.slot("count").map(|(_, s)| s.kind), Some(UniformKind::U32));
        assert_eq!(program.param_bytes().len(), 32);

        program.use_program(&mut ctx).unwrap();
        assert_eq!(ctx.bound().active_program, program.handle());
    }

    #[test]
    fn test_link_failure_yields_unusable_program() {
        let mut ctx = context();
        let src = sources(BROKEN);

        let mut program = ShaderProgram::build(&mut ctx, desc(&src)).unwrap();
        assert_eq!(program.state(), ProgramState::Unbuilt);
        assert!(program.handle().is_none());
        assert!(program.last_error().is_some());
        assert_eq!(program.uniform_location("scale"), UniformLocation::INVALID);

        let err = program.use_program(&mut ctx).unwrap_err();
        assert!(matches!(err, EngineError::ProgramUnusable { .. }));
        assert!(ctx.bound().active_program.is_none());

        let err = ShaderProgram::build_strict(&mut ctx, desc(&src)).unwrap_err();
        assert!(matches!(err, EngineError::Link { .. }));
        assert!(!err.is_fatal());

        // A fixed source brings the program to life
        fs::write(&src.vertex, VERTEX).unwrap();
        program.rebuild(&mut ctx).unwrap();
        assert_eq!(program.state(), ProgramState::Active);
        program.use_program(&mut ctx).unwrap();
    }

    #[test]
    fn test_missing_source_file() {
        let mut ctx = context();
        let src = sources(VERTEX);
        let missing = ProgramDesc::new("Missing")
            .stage(StageSource::vertex(src.vertex.with_file_name("nope.wgsl")))
            .stage(StageSource::fragment(&src.fragment));

        let program = ShaderProgram::build(&mut ctx, missing).unwrap();
        assert!(!program.is_usable());
        assert!(program.last_error().unwrap().contains("nope.wgsl"));
    }

    #[test]
    fn test_failed_reload_keeps_previous_handle() {
        let mut ctx = context();
        let src = sources(VERTEX);
        let mut program = ShaderProgram::build(&mut ctx, desc(&src)).unwrap();
        let handle = program.handle();
        let generation = program.generation();
        program.upload_uniform_by_name("scale", 3.0f32);

        fs::write(&src.vertex, BROKEN).unwrap();
        let err = program.rebuild(&mut ctx).unwrap_err();
        assert!(matches!(err, EngineError::Reload { .. }));

        assert_eq!(program.handle(), handle);
        assert_eq!(program.generation(), generation);
        assert!(program.last_error().is_some());
        assert_eq!(program.uniform_by_name("scale"), Some(UniformValue::F32(3.0)));

        // Activation still works with the old handle
        program.use_program(&mut ctx).unwrap();
        assert_eq!(ctx.bound().active_program, handle);
        assert_eq!(ctx.pending_releases(), 0);
    }

    #[test]
    fn test_reload_at_next_activation() {
        let mut ctx = context();
        let src = sources(VERTEX);
        let mut program = ShaderProgram::build(&mut ctx, desc(&src)).unwrap();
        let old_handle = program.handle();
        let old_generation = program.generation();

        program.request_reload();
        assert_eq!(program.state(), ProgramState::Stale);
        // Nothing happens until activation
        assert_eq!(program.handle(), old_handle);

        program.use_program(&mut ctx).unwrap();
        assert_eq!(program.state(), ProgramState::Active);
        assert_ne!(program.handle(), old_handle);
        assert!(program.generation() > old_generation);
        assert_eq!(ctx.bound().active_program, program.handle());

        // The replaced handle is released at the next frame boundary
        assert_eq!(ctx.pending_releases(), 1);
        let live = ctx.device().live_programs();
        assert_eq!(ctx.begin_frame(), 1);
        assert_eq!(ctx.device().live_programs(), live - 1);
    }

    #[test]
    fn test_watched_source_triggers_rebuild() {
        let mut ctx = context();
        let src = sources(VERTEX);
        let mut program =
            ShaderProgram::build(&mut ctx, desc(&src).watch(Some(Duration::ZERO))).unwrap();
        let generation = program.generation();

        fs::write(&src.vertex, VERTEX_EDITED).unwrap();
        touch(&src.vertex, 10);

        // First sighting is pending, the second settles it
        assert!(!program.poll_sources());
        program.use_program(&mut ctx).unwrap();

        assert!(program.generation() > generation);
        assert!(program.reflection().params.slot("offset").is_some());
    }

    #[test]
    fn test_invalid_and_stale_locations_are_ignored() {
        let mut ctx = context();
        let src = sources(VERTEX);
        let mut program = ShaderProgram::build(&mut ctx, desc(&src)).unwrap();

        let missing = program.uniform_location("does_not_exist");
        assert_eq!(missing, UniformLocation::INVALID);
        assert!(!missing.is_valid());

        let before = program.param_bytes().to_vec();
        program.upload_uniform(missing, 5.0f32);
        program.upload_uniform(UniformLocation::INVALID, 5.0f32);
        assert_eq!(program.param_bytes(), before.as_slice());

        let scale = program.uniform_location("scale");
        assert!(scale.is_valid());
        assert_eq!(scale.generation(), program.generation());
        program.upload_uniform(scale, 2.0f32);
        assert_eq!(program.uniform(scale), Some(UniformValue::F32(2.0)));

        program.rebuild(&mut ctx).unwrap();
        // Old location no longer addresses the program
        program.upload_uniform(scale, 9.0f32);
        assert_eq!(program.uniform(scale), None);
        assert_eq!(program.uniform_by_name("scale"), Some(UniformValue::F32(2.0)));
    }

    #[test]
    fn test_locations_do_not_cross_programs() {
        let mut ctx = context();
        let src = sources(VERTEX);
        let mut first = ShaderProgram::build(&mut ctx, desc(&src)).unwrap();
        let mut second = ShaderProgram::build(&mut ctx, desc(&src)).unwrap();

        let location = first.uniform_location("scale");
        second.upload_uniform(location, 4.0f32);
        assert_eq!(second.uniform_by_name("scale"), Some(UniformValue::F32(0.0)));

        first.upload_uniform(location, 4.0f32);
        assert_eq!(first.uniform_by_name("scale"), Some(UniformValue::F32(4.0)));
    }

    #[test]
    fn test_kind_mismatch_is_ignored() {
        let mut ctx = context();
        let src = sources(VERTEX);
        let mut program = ShaderProgram::build(&mut ctx, desc(&src)).unwrap();

        program.upload_uniform_by_name("tint", 1.0f32);
        assert_eq!(program.uniform_by_name("tint"), Some(UniformValue::Vec4(Vec4::ZERO)));

        program.upload_uniform_by_name("tint", Vec4::new(1.0, 0.5, 0.25, 1.0));
        assert_eq!(
            program.uniform_by_name("tint"),
            Some(UniformValue::Vec4(Vec4::new(1.0, 0.5, 0.25, 1.0)))
        );

        // Booleans are stored in u32 members
        program.upload_uniform_by_name("count", true);
        assert_eq!(program.uniform_by_name("count"), Some(UniformValue::U32(1)));
        assert_eq!(&program.param_bytes()[20..24], &1u32.to_ne_bytes());
    }

    #[test]
    fn test_values_carry_over_rebuild() {
        let mut ctx = context();
        let src = sources(VERTEX);
        let mut program = ShaderProgram::build(&mut ctx, desc(&src)).unwrap();
        program.upload_uniform_by_name("tint", Vec4::ONE);
        program.upload_uniform_by_name("scale", 2.5f32);
        program.upload_uniform_by_name("count", 7u32);

        fs::write(&src.vertex, VERTEX_EDITED).unwrap();
        program.rebuild(&mut ctx).unwrap();

        assert_eq!(program.uniform_by_name("tint"), Some(UniformValue::Vec4(Vec4::ONE)));
        assert_eq!(program.uniform_by_name("scale"), Some(UniformValue::F32(2.5)));
        assert_eq!(program.uniform_by_name("offset"), Some(UniformValue::F32(0.0)));
        assert_eq!(program.uniform_by_name("count"), None);
        // `scale` moved from offset 16 to 20
        assert_eq!(&program.param_bytes()[20..24], &2.5f32.to_ne_bytes());
    }

    #[test]
    fn test_uniform_table_refresh() {
        let mut ctx = context();
        let src = sources(VERTEX);
        let mut program = ShaderProgram::build(&mut ctx, desc(&src)).unwrap();

        let mut table = UniformTable::<TestUniform>::resolve(&program);
        assert_eq!(table.generation(), program.generation());
        assert!(table.location(TestUniform::Tint).is_valid());
        assert_eq!(table.missing().collect::<Vec<_>>(), vec![TestUniform::Offset]);
        assert!(!table.refresh(&program));

        table.upload(&mut program, TestUniform::Scale, 1.5f32);
        assert_eq!(program.uniform_by_name("scale"), Some(UniformValue::F32(1.5)));

        fs::write(&src.vertex, VERTEX_EDITED).unwrap();
        program.rebuild(&mut ctx).unwrap();

        // Upload refreshes stale locations first
        table.upload(&mut program, TestUniform::Offset, 0.5f32);
        assert_eq!(table.generation(), program.generation());
        assert_eq!(table.missing().count(), 0);
        assert_eq!(program.uniform_by_name("offset"), Some(UniformValue::F32(0.5)));
        println!("✓ Uniform table follows program generations");
    }

    #[test]
    fn test_vertex_inputs_need_declared_streams() {
        let mut ctx = context();
        let dir = TempDir::new().unwrap();
        let vertex = dir.path().join("mesh.vert.wgsl");
        let fragment = dir.path().join("mesh.frag.wgsl");
        fs::write(
            &vertex,
            r#"
struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) color: vec4<f32>,
}

@vertex
fn vs_main(@location(0) position: vec3<f32>, @location(1) normal: vec3<f32>) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = vec4<f32>(position, 1.0);
    out.color = vec4<f32>(normal, 1.0);
    return out;
}
"#,
        )
        .unwrap();
        fs::write(&fragment, FRAGMENT).unwrap();

        let bare = ProgramDesc::new("Bare")
            .stage(StageSource::vertex(&vertex))
            .stage(StageSource::fragment(&fragment));
        let program = ShaderProgram::build(&mut ctx, bare.clone()).unwrap();
        assert!(!program.is_usable());
        assert!(program.last_error().unwrap().contains("@location(0)"));

        let program =
            ShaderProgram::build(&mut ctx, bare.vertex_stream(GeometryVertex::vertex_layout())).unwrap();
        assert!(program.is_usable());
        assert_eq!(program.reflection().vertex_inputs, vec![0, 1]);
    }

    #[test]
    fn test_cross_stage_link_checks() {
        let compute = compile_stage(
            ShaderStageKind::Compute,
            "kernel",
            r#"
@group(0) @binding(2) var<storage, read_write> data: array<u32>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x < arrayLength(&data)) {
        data[id.x] = id.x;
    }
}
"#,
        )
        .unwrap();
        assert_eq!(compute.reflection.workgroup_size, Some([64, 1, 1]));
        assert_eq!(compute.reflection.storage[0].element_stride, 4);

        let vertex = compile_stage(ShaderStageKind::Vertex, "vertex", VERTEX).unwrap();
        let fragment = compile_stage(ShaderStageKind::Fragment, "fragment", FRAGMENT).unwrap();

        let err = ProgramReflection::link(&[compute, vertex]).unwrap_err();
        assert!(matches!(err, ShaderError::Link(_)));
        assert!(err.to_string().contains("compute"));

        let fragment_only = compile_stage(ShaderStageKind::Fragment, "fragment", FRAGMENT).unwrap();
        assert!(ProgramReflection::link(&[fragment_only]).is_err());

        let vertex = compile_stage(ShaderStageKind::Vertex, "vertex", VERTEX).unwrap();
        let linked = ProgramReflection::link(&[vertex, fragment]).unwrap();
        assert!(!linked.is_compute());
        assert_eq!(linked.params.slots.len(), 3);
    }

    #[test]
    fn test_fragment_input_must_be_written() {
        let vertex = compile_stage(
            ShaderStageKind::Vertex,
            "vertex",
            r#"
@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    return vec4<f32>(f32(index), 0.0, 0.0, 1.0);
}
"#,
        )
        .unwrap();
        let fragment = compile_stage(ShaderStageKind::Fragment, "fragment", FRAGMENT).unwrap();

        let err = ProgramReflection::link(&[vertex, fragment]).unwrap_err();
        assert!(err.to_string().contains("@location(0)"));
    }

    #[test]
    fn test_compile_errors_name_the_stage() {
        let err = compile_stage(ShaderStageKind::Vertex, "broken.wgsl", BROKEN).unwrap_err();
        assert!(matches!(err, ShaderError::Parse { kind: ShaderStageKind::Vertex, .. }));
        assert_eq!(err.label(), Some("broken.wgsl"));
        assert!(err.to_string().starts_with("broken.wgsl (vertex): "));

        // Parses, but has no compute entry point
        let err = compile_stage(ShaderStageKind::Compute, "frag.wgsl", FRAGMENT).unwrap_err();
        assert_eq!(
            err,
            ShaderError::MissingEntryPoint {
                label: "frag.wgsl".to_string(),
                kind: ShaderStageKind::Compute,
            }
        );
        assert_eq!(err.to_string(), "frag.wgsl: no compute entry point");
    }

    #[test]
    fn test_misplaced_storage_is_a_resource_error() {
        let err = compile_stage(
            ShaderStageKind::Compute,
            "grouped.wgsl",
            r#"
@group(1) @binding(2) var<storage, read_write> data: array<u32>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    data[id.x] = id.x;
}
"#,
        )
        .unwrap_err();

        match err {
            ShaderError::Resource { ref label, ref message } => {
                assert_eq!(label, "grouped.wgsl");
                assert!(message.contains("'data' is in group 1"));
            }
            other => panic!("expected a resource error, got {:?}", other),
        }

        let missing = load_stage(&StageSource::compute("/nonexistent/kernel.wgsl")).unwrap_err();
        assert!(matches!(missing, ShaderError::Read { .. }));
        assert_eq!(missing.label(), None);
    }

    #[test]
    fn test_param_block_carry_over() {
        let layout = |slots: Vec<(&str, UniformKind, u32)>| ParamBlockLayout {
            type_name: "Block".to_string(),
            size: 32,
            slots: slots
                .into_iter()
                .map(|(name, kind, offset)| UniformSlot {
                    name: name.to_string(),
                    kind,
                    offset,
                })
                .collect(),
        };

        let mut old = ParamBlock::new(layout(vec![
            ("position", UniformKind::Vec3, 0),
            ("radius", UniformKind::F32, 12),
        ]));
        assert!(old.write(0, UniformValue::Vec3(Vec3::new(1.0, 2.0, 3.0))));
        assert!(old.write(1, UniformValue::F32(4.0)));
        assert!(!old.write(1, UniformValue::U32(4)));
        assert!(!old.write(5, UniformValue::F32(4.0)));

        // `radius` changes kind and is not carried
        let mut new = ParamBlock::new(layout(vec![
            ("radius", UniformKind::U32, 0),
            ("position", UniformKind::Vec3, 16),
        ]));
        assert_eq!(new.carry_over_from(&old), 1);
        assert_eq!(new.read(1), Some(UniformValue::Vec3(Vec3::new(1.0, 2.0, 3.0))));
        assert_eq!(new.read(0), Some(UniformValue::U32(0)));
    }

    #[test]
    fn test_dropped_program_is_retired() {
        let mut ctx = context();
        let src = sources(VERTEX);
        let program = ShaderProgram::build(&mut ctx, desc(&src)).unwrap();
        let live = ctx.device().live_programs();

        drop(program);
        assert_eq!(ctx.pending_releases(), 1);
        assert_eq!(ctx.device().live_programs(), live);

        ctx.begin_frame();
        assert_eq!(ctx.device().live_programs(), live - 1);
        assert_eq!(ctx.device().stats().programs_destroyed, 1);
    }
}
