//! Shared helpers for the integration tests.

#![allow(dead_code)]

use glam::Vec3;
use graphics_lighting::backend::traits::{BufferHandle, GraphicsBackend};
use graphics_lighting::render_graph::{FrameGraph, FrameGraphExecutor, GraphicsTarget, PassRecorder};
use graphics_lighting::scene::{Camera, PerspectiveProjection, VisibleLight, VisibleReflectionProbe};
use graphics_lighting::{LightingFrameInputs, LightingFrameOutputs, LightingPipeline};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Camera at `(0, 2, 5)` looking at the origin with a square aspect
pub fn square_camera() -> Camera {
    Camera::new(Vec3::new(0.0, 2.0, 5.0), Vec3::ZERO)
        .with_projection(PerspectiveProjection::new(60.0, 1.0, 0.1, 100.0))
}

/// Records which atlas slices were handed out for drawing
#[derive(Default)]
pub struct SliceLog {
    pub slices: Vec<(String, u32)>,
}

impl<B> PassRecorder<B> for SliceLog {
    fn record_graphics(&mut self, pass_name: &str, slice: &GraphicsTarget, _backend: &mut B) {
        assert!(slice.view_projection.is_finite());
        self.slices.push((pass_name.to_string(), slice.layer));
    }
}

pub fn read_u32s<B: GraphicsBackend>(backend: &mut B, buffer: BufferHandle) -> Vec<u32> {
    let bytes = backend.read_buffer(buffer).expect("readback");
    bytemuck::pod_collect_to_vec(&bytes[..bytes.len() / 4 * 4])
}

/// Everything read back from one executed frame
pub struct FrameResult {
    pub outputs: LightingFrameOutputs,
    pub light_tiles: Vec<u32>,
    pub probe_tiles: Option<Vec<u32>>,
    pub slices: SliceLog,
}

/// A frame's scene description
pub struct Frame<'a> {
    pub camera: &'a Camera,
    pub lights: &'a [VisibleLight],
    pub probes: &'a [VisibleReflectionProbe],
    pub width: u32,
    pub height: u32,
}

/// Prepare, compile and execute one frame, then read the tile buffers back.
pub fn run_frame<B: GraphicsBackend>(
    pipeline: &mut LightingPipeline,
    backend: &mut B,
    frame: &Frame<'_>,
) -> FrameResult {
    let mut graph = FrameGraph::new();
    let outputs = pipeline
        .prepare_frame(
            &mut graph,
            &LightingFrameInputs {
                camera: frame.camera,
                visible_lights: frame.lights,
                visible_probes: frame.probes,
                width: frame.width,
                height: frame.height,
                depth: None,
            },
        )
        .expect("prepare frame");
    let compiled = graph.compile().expect("compile");

    let mut executor = FrameGraphExecutor::new();
    let mut slices = SliceLog::default();
    executor
        .execute(&graph, &compiled, backend, &mut slices)
        .expect("execute");

    let light_tiles = read_u32s(backend, executor.buffer(outputs.tile_indices).expect("tile buffer"));
    let probe_tiles = outputs
        .probe_tile_indices
        .map(|probes| read_u32s(backend, executor.buffer(probes).expect("probe tile buffer")));
    executor.end_frame(backend);

    FrameResult {
        outputs,
        light_tiles,
        probe_tiles,
        slices,
    }
}
