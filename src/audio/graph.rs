//! Mix graph: per-layer playback nodes summed into one mixer, an optional
//! tap on the mixer output, and the scheduling loops that drive each node.
//!
//! Graph-level changes (start, stop, tap install) happen only through
//! `MixGraph`, which is owned by a single controller. Node loops run on the
//! scheduler context and only ever touch their own binding, which they find
//! by layer id and validate by generation before acting.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use super::capture::{CaptureSink, RecordedFile};
use super::fft::{SpectralAnalyzer, SpectrumSlot};
use super::node::{NodeMode, NodeStatus, PlaybackNode};
use super::output::{OutputStream, PreparedOutput};
use super::scheduler::{Scheduler, SchedulerHandle};
use super::source::load_wav;
use crate::error::Result;
use crate::layer::{Layer, LayerId, LayerKind};
use crate::params::{AnalyzerConfig, EngineConfig, EngineMode, StreamFormat};

/// Read-only view of the mixer output, run on the render thread
struct MixTap {
    analyzer: Option<SpectralAnalyzer>,
    block: Vec<f32>,
    filled: usize,
    sink: Option<CaptureSink>,
    recorded: Arc<AtomicU64>,
}

impl MixTap {
    fn new(
        analyzer: Option<SpectralAnalyzer>,
        sink: Option<CaptureSink>,
        recorded: Arc<AtomicU64>,
    ) -> Self {
        let block_size = analyzer.as_ref().map_or(0, |a| a.block_size());
        recorded.store(0, Ordering::Relaxed);
        Self {
            analyzer,
            block: vec![0.0; block_size],
            filled: 0,
            sink,
            recorded,
        }
    }

    fn process(&mut self, mix: &[f32], channels: usize, spectrum: &SpectrumSlot) {
        if let Some(sink) = self.sink.as_mut() {
            sink.write_interleaved(mix);
            self.recorded.store(sink.frames_written(), Ordering::Relaxed);
        }

        let Some(analyzer) = self.analyzer.as_mut() else {
            return;
        };
        // First channel only
        for frame in mix.chunks_exact(channels) {
            self.block[self.filled] = frame[0];
            self.filled += 1;
            if self.filled == self.block.len() {
                spectrum.publish(analyzer.analyze(&self.block));
                self.filled = 0;
            }
        }
    }
}

/// State shared with the render callback and scheduled node loops
pub(crate) struct GraphShared {
    running: AtomicBool,
    nodes: Mutex<HashMap<LayerId, PlaybackNode>>,
    tap: Mutex<Option<MixTap>>,
    recording: AtomicBool,
    recorded_frames: Arc<AtomicU64>,
    next_generation: AtomicU64,
    spectrum: Arc<SpectrumSlot>,
}

impl GraphShared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn next_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed)
    }

    /// Render one interleaved block of the mix
    ///
    /// Never waits: if a command holds the node table the block is silent,
    /// and if the tap is being swapped the block is not tapped.
    pub(crate) fn render(&self, out: &mut [f32], channels: usize) {
        out.fill(0.0);
        if !self.is_running() || channels == 0 {
            return;
        }

        match self.nodes.try_lock() {
            Some(mut nodes) => {
                for node in nodes.values_mut() {
                    node.mix_into(out, channels);
                }
            }
            None => trace!("Node table busy, rendering silence"),
        }

        if let Some(mut tap) = self.tap.try_lock() {
            if let Some(tap) = tap.as_mut() {
                tap.process(out, channels, &self.spectrum);
            }
        }
    }

    /// Run `f` on the node bound to `id` if it is still the binding `generation`
    fn with_live_node<R>(
        &self,
        id: LayerId,
        generation: u64,
        f: impl FnOnce(&mut PlaybackNode) -> R,
    ) -> Option<R> {
        let mut nodes = self.nodes.lock();
        nodes
            .get_mut(&id)
            .filter(|node| node.generation() == generation)
            .map(f)
    }
}

/// Where a node's audio comes from and how it loops
struct NodeSource {
    path: Option<PathBuf>,
    mode: NodeMode,
}

fn node_source(layer: &Layer, samples_dir: &Path, engine: &EngineConfig) -> NodeSource {
    match layer.kind() {
        LayerKind::Instrumental {
            sample,
            interval_secs,
            ..
        } => NodeSource {
            path: sample.resolve(samples_dir),
            mode: NodeMode::Retrigger(engine.retrigger_interval(*interval_secs)),
        },
        LayerKind::Voice { recording } => NodeSource {
            path: recording.clone(),
            mode: NodeMode::Natural,
        },
    }
}

/// Load the node's buffer, then start its loop if the engine is running
fn load_and_start(
    shared: &Arc<GraphShared>,
    scheduler: &SchedulerHandle,
    id: LayerId,
    generation: u64,
    path: Option<PathBuf>,
    format: StreamFormat,
) {
    let buffer = match path {
        Some(path) => match load_wav(&path, format) {
            Ok(buffer) => Some(Arc::new(buffer)),
            Err(e) => {
                warn!(layer = %id, "Layer will play silence: {}", e);
                None
            }
        },
        None => {
            debug!(layer = %id, "Layer has no source, playing silence");
            None
        }
    };

    let Some(mode) = shared.with_live_node(id, generation, |node| {
        node.set_buffer(buffer);
        node.has_buffer().then(|| node.mode())
    }) else {
        trace!(layer = %id, "Node replaced before its source loaded");
        return;
    };

    if shared.is_running() {
        match mode {
            Some(NodeMode::Retrigger(_)) => retrigger(shared, scheduler, id, generation),
            Some(NodeMode::Natural) => voice_cycle(shared, scheduler, id, generation),
            None => {}
        }
    }
}

/// Fixed-interval loop: restart the buffer, come back after the interval
fn retrigger(shared: &Arc<GraphShared>, scheduler: &SchedulerHandle, id: LayerId, generation: u64) {
    if !shared.is_running() {
        return;
    }

    let now = scheduler.now();
    let interval = shared.with_live_node(id, generation, |node| {
        node.stop();
        node.schedule(now);
        node.play();
        match node.mode() {
            NodeMode::Retrigger(interval) => Some(interval),
            NodeMode::Natural => None,
        }
    });
    let Some(Some(interval)) = interval else {
        return;
    };

    trace!(layer = %id, at = ?scheduler.now(), "Retrigger");
    let weak = Arc::downgrade(shared);
    scheduler.schedule_after(interval, move |s| {
        if let Some(shared) = weak.upgrade() {
            retrigger(&shared, s, id, generation);
        }
    });
}

/// Natural-length loop: play once, decide whether to loop when it ends
fn voice_cycle(shared: &Arc<GraphShared>, scheduler: &SchedulerHandle, id: LayerId, generation: u64) {
    if !shared.is_running() {
        return;
    }

    let now = scheduler.now();
    let duration = shared.with_live_node(id, generation, |node| {
        node.set_start_pending(false);
        node.stop();
        node.schedule(now);
        node.play();
        node.set_sounding(true);
        node.buffer_duration()
    });
    let Some(Some(duration)) = duration else {
        return;
    };

    trace!(layer = %id, at = ?scheduler.now(), ?duration, "Voice cycle");
    let weak = Arc::downgrade(shared);
    scheduler.schedule_after(duration, move |s| {
        if let Some(shared) = weak.upgrade() {
            voice_finished(&shared, s, id, generation);
        }
    });
}

fn voice_finished(
    shared: &Arc<GraphShared>,
    scheduler: &SchedulerHandle,
    id: LayerId,
    generation: u64,
) {
    let looping = shared.with_live_node(id, generation, |node| {
        node.set_sounding(false);
        node.is_looping()
    });

    if looping == Some(true) && shared.is_running() {
        voice_cycle(shared, scheduler, id, generation);
    }
}

/// Owns the engine, the mixer and every layer's playback node
pub struct MixGraph {
    shared: Arc<GraphShared>,
    scheduler: Scheduler,
    engine: EngineConfig,
    analyzer: AnalyzerConfig,
    samples_dir: PathBuf,
    output: Option<OutputStream>,
    format: StreamFormat,
    clock_frames: u64,
    render_scratch: Vec<f32>,
}

impl MixGraph {
    pub fn new(engine: EngineConfig, analyzer: AnalyzerConfig, samples_dir: PathBuf) -> Result<Self> {
        engine.validate()?;

        let (scheduler, format) = match engine.mode {
            EngineMode::Device => (Scheduler::realtime(), StreamFormat::default()),
            EngineMode::Offline(format) => (Scheduler::manual(), format),
        };

        Ok(Self {
            shared: Arc::new(GraphShared {
                running: AtomicBool::new(false),
                nodes: Mutex::new(HashMap::new()),
                tap: Mutex::new(None),
                recording: AtomicBool::new(false),
                recorded_frames: Arc::new(AtomicU64::new(0)),
                next_generation: AtomicU64::new(1),
                spectrum: Arc::new(SpectrumSlot::new(analyzer.bar_count)),
            }),
            scheduler,
            engine,
            analyzer,
            samples_dir,
            output: None,
            format,
            clock_frames: 0,
            render_scratch: Vec::new(),
        })
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Mixer output format of the current (or most recent) run
    pub fn format(&self) -> StreamFormat {
        self.format
    }

    pub fn spectrum(&self) -> Arc<SpectrumSlot> {
        Arc::clone(&self.shared.spectrum)
    }

    /// Scheduler time (virtual in offline mode)
    pub fn now(&self) -> Duration {
        self.scheduler.now()
    }

    /// Rebuild the graph from scratch and start it
    pub fn start(&mut self, layers: &[Layer], analysis_tap: bool) -> Result<()> {
        self.launch(layers, analysis_tap, None)?;
        Ok(())
    }

    /// Rebuild and start the graph with a tap that both records to `path`
    /// and feeds the analyzer
    pub fn start_recording(&mut self, layers: &[Layer], path: &Path) -> Result<()> {
        self.launch(layers, true, Some(path))
    }

    fn launch(&mut self, layers: &[Layer], analysis_tap: bool, record_to: Option<&Path>) -> Result<()> {
        if let Some(recorded) = self.stop() {
            warn!(path = %recorded.path.display(), "Restart closed an open recording");
        }
        self.scheduler.handle().clear();
        self.shared.nodes.lock().clear();

        let prepared = PreparedOutput::prepare(self.engine.mode)?;
        self.format = prepared.format();

        let sink = match record_to {
            Some(path) => Some(CaptureSink::create(path, self.format)?),
            None => None,
        };
        let analyzer = if analysis_tap {
            match SpectralAnalyzer::new(&self.analyzer) {
                Ok(analyzer) => Some(analyzer),
                Err(e) => {
                    warn!("Spectrum analysis disabled: {}", e);
                    None
                }
            }
        } else {
            None
        };
        if let Some(sink) = sink.as_ref() {
            debug!(path = %sink.path().display(), format = ?sink.format(), "Recording tap installed");
        }
        self.shared
            .recording
            .store(sink.is_some(), Ordering::Release);
        if analyzer.is_some() || sink.is_some() {
            let recorded = Arc::clone(&self.shared.recorded_frames);
            *self.shared.tap.lock() = Some(MixTap::new(analyzer, sink, recorded));
        }

        self.shared.running.store(true, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let channels = self.format.channels as usize;
        match prepared.start(move |data| shared.render(data, channels)) {
            Ok(output) => self.output = Some(output),
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                self.shared.recording.store(false, Ordering::Release);
                self.shared.tap.lock().take();
                return Err(e);
            }
        }

        info!(
            layers = layers.len(),
            sample_rate = self.format.sample_rate,
            channels = self.format.channels,
            recording = record_to.is_some(),
            "Mix graph started"
        );

        for layer in layers {
            self.attach_layer(layer);
        }
        Ok(())
    }

    /// Stop the engine; returns the finalized recording if one was open
    ///
    /// Node loops notice on their next wake and end themselves.
    pub fn stop(&mut self) -> Option<RecordedFile> {
        let was_running = self.shared.running.swap(false, Ordering::AcqRel);
        self.output = None;

        let sink = self.shared.tap.lock().take().and_then(|tap| tap.sink);
        self.shared.recording.store(false, Ordering::Release);
        if was_running {
            info!("Mix graph stopped");
        }

        match sink.map(CaptureSink::finalize) {
            Some(Ok(recorded)) => Some(recorded),
            Some(Err(e)) => {
                warn!("Recording could not be finalized: {}", e);
                None
            }
            None => None,
        }
    }

    /// Create a playback node for `layer`
    ///
    /// The binding exists immediately; the source loads on the scheduling
    /// context and the loop starts there if the engine is running.
    pub fn attach_layer(&self, layer: &Layer) {
        self.attach_layer_after(layer, Duration::ZERO);
    }

    /// Like `attach_layer`, but the source loads (and the loop starts)
    /// `delay` from now
    pub fn attach_layer_after(&self, layer: &Layer, delay: Duration) {
        let id = layer.id();
        let generation = self.shared.next_generation();
        let source = node_source(layer, &self.samples_dir, &self.engine);

        let node = PlaybackNode::new(
            generation,
            source.mode,
            layer.volume(),
            layer.is_muted(),
            layer.is_looping(),
        );
        if let Some(previous) = self.shared.nodes.lock().insert(id, node) {
            debug!(layer = %id, old = previous.generation(), "Replaced playback node");
        }
        debug!(layer = %id, generation, ?delay, "Attached layer");

        let weak: Weak<GraphShared> = Arc::downgrade(&self.shared);
        let format = self.format;
        let path = source.path;
        self.scheduler
            .handle()
            .schedule_after(delay, move |s| {
                if let Some(shared) = weak.upgrade() {
                    load_and_start(&shared, s, id, generation, path, format);
                }
            });
    }

    /// Replace the layer's node with one built from its new parameters
    pub fn update_layer(&self, layer: &Layer) {
        self.detach_layer(layer.id());
        self.attach_layer(layer);
    }

    pub fn detach_layer(&self, id: LayerId) {
        if let Some(mut node) = self.shared.nodes.lock().remove(&id) {
            node.stop();
            debug!(layer = %id, "Detached layer");
        }
    }

    pub fn set_volume(&self, id: LayerId, volume: f32) {
        if let Some(node) = self.shared.nodes.lock().get_mut(&id) {
            node.set_volume(volume);
        }
    }

    /// Change a retriggering node's interval in place, keeping its buffer
    /// and whatever is sounding; the next trigger lands `first_after` from now
    ///
    /// A node whose source has not loaded yet just takes the new interval and
    /// starts as usual once loaded. Natural-length nodes are left alone.
    pub fn retime_layer(&self, id: LayerId, interval_secs: f64, first_after: Duration) {
        let interval = self.engine.retrigger_interval(interval_secs);
        let restart = {
            let mut nodes = self.shared.nodes.lock();
            let Some(node) = nodes.get_mut(&id) else {
                return;
            };
            if node.mode() == NodeMode::Natural {
                return;
            }
            node.set_mode(NodeMode::Retrigger(interval));
            if !node.status().loaded || !node.has_buffer() {
                return;
            }
            let generation = self.shared.next_generation();
            node.set_generation(generation);
            generation
        };
        debug!(layer = %id, ?interval, ?first_after, "Retimed layer");

        if self.is_running() {
            let weak = Arc::downgrade(&self.shared);
            self.scheduler
                .handle()
                .schedule_after(first_after, move |s| {
                    if let Some(shared) = weak.upgrade() {
                        retrigger(&shared, s, id, restart);
                    }
                });
        }
    }

    pub fn set_mute(&self, id: LayerId, muted: bool) {
        if let Some(node) = self.shared.nodes.lock().get_mut(&id) {
            node.set_muted(muted);
        }
    }

    /// Update a node's loop flag; a silent voice node that becomes looping
    /// while the engine runs starts a new cycle
    ///
    /// A restart that is already queued is not queued again, so toggling
    /// several times before the scheduler runs starts one cycle.
    pub fn set_looping(&self, id: LayerId, looping: bool) {
        let generation = {
            let mut nodes = self.shared.nodes.lock();
            let Some(node) = nodes.get_mut(&id) else {
                return;
            };
            node.set_looping(looping);
            let idle_voice = node.mode() == NodeMode::Natural
                && node.has_buffer()
                && !node.is_sounding()
                && !node.is_start_pending();
            if !(looping && idle_voice && self.is_running()) {
                return;
            }
            node.set_start_pending(true);
            node.generation()
        };

        let weak = Arc::downgrade(&self.shared);
        self.scheduler
            .handle()
            .schedule_after(Duration::ZERO, move |s| {
                if let Some(shared) = weak.upgrade() {
                    voice_cycle(&shared, s, id, generation);
                }
            });
    }

    pub fn node_status(&self, id: LayerId) -> Option<NodeStatus> {
        self.shared.nodes.lock().get(&id).map(|n| n.status())
    }

    /// Frames written so far by the recording tap
    pub fn recorded_frames(&self) -> Option<u64> {
        self.shared
            .recording
            .load(Ordering::Acquire)
            .then(|| self.shared.recorded_frames.load(Ordering::Relaxed))
    }

    /// Render and run scheduled work for `delta` of virtual time
    ///
    /// Offline only; in device mode the output stream and the scheduler
    /// thread advance on their own and this returns 0. Returns frames rendered.
    pub fn advance(&mut self, delta: Duration) -> u64 {
        let EngineMode::Offline(format) = self.engine.mode else {
            return 0;
        };

        let channels = format.channels as usize;
        let target = self.clock_frames + format.duration_to_frames(delta);
        let mut rendered = 0;

        while self.clock_frames < target {
            self.scheduler
                .advance_to(format.frames_to_duration(self.clock_frames));

            let frames = (target - self.clock_frames).min(self.engine.offline_block_frames as u64);
            if self.is_running() {
                self.render_scratch.resize(frames as usize * channels, 0.0);
                self.shared.render(&mut self.render_scratch, channels);
                rendered += frames;
            }
            self.clock_frames += frames;
        }
        self.scheduler
            .advance_to(format.frames_to_duration(self.clock_frames));
        rendered
    }
}

impl Drop for MixGraph {
    fn drop(&mut self) {
        self.stop();
    }
}
