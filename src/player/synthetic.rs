//! 进程内的合成引擎：生成 RGBA 测试图案，不依赖任何解码库。
//!
//! 用于演示程序（`--synthetic`）和测试。可以注入各种失败（拒绝状态切换、拒绝 seek、
//! 找不到帧输出元素、查询不可用等），也可以由调用方手动 `pump()` 帧。

use crate::core::{log_ctx, PipelineDescriptor, PlaybackClock, PlayerError, Result, TransportState};
use crate::player::engine::{
    Engine, EngineFactory, EngineMessage, FlowReturn, MessageHandler, Sample, SampleHandler,
    SeekRequest,
};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// 合成引擎参数
#[derive(Debug, Clone)]
pub struct SyntheticOptions {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// None 表示直播源（时长未知）
    pub duration_ms: Option<u64>,
    /// 播放时启动自己的生产者线程按帧率出帧
    pub realtime: bool,
    /// 是否支持音量控制
    pub volume_control: bool,
}

impl Default for SyntheticOptions {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
            fps: 30,
            duration_ms: Some(10_000),
            realtime: false,
            volume_control: false,
        }
    }
}

/// 失败注入
#[derive(Debug, Clone, Default)]
pub struct FailurePlan {
    pub fail_build: bool,
    pub missing_sink: bool,
    pub reject_states: Vec<TransportState>,
    pub reject_preroll: bool,
    pub reject_seeks: bool,
    pub no_position: bool,
    pub no_duration: bool,
    pub no_video_size: bool,
}

/// 从 launch 描述中找出 appsink 的 name 属性
fn declared_sink_name(line: &str) -> Option<String> {
    line.split('!')
        .map(str::trim)
        .filter(|element| element.starts_with("appsink"))
        .find_map(|element| {
            element
                .split_whitespace()
                .find_map(|prop| prop.strip_prefix("name="))
                .map(|name| name.trim_matches('"').to_string())
        })
}

/// RGBA 测试图案：R 通道随帧序号变化，G/B 为坐标渐变
pub fn test_pattern(width: u32, height: u32, index: u64) -> Vec<u8> {
    let shade = (index % 256) as u8;
    let mut data = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..height {
        for x in 0..width {
            data.extend_from_slice(&[shade, (x % 256) as u8, (y % 256) as u8, 255]);
        }
    }
    data
}

pub struct SyntheticEngineFactory {
    options: SyntheticOptions,
    failures: FailurePlan,
    engines: Mutex<Vec<Arc<SyntheticEngine>>>,
    loaded: AtomicBool,
}

impl SyntheticEngineFactory {
    pub fn new(options: SyntheticOptions) -> Self {
        Self {
            options,
            failures: FailurePlan::default(),
            engines: Mutex::new(Vec::new()),
            loaded: AtomicBool::new(false),
        }
    }

    pub fn with_failures(mut self, failures: FailurePlan) -> Self {
        self.failures = failures;
        self
    }

    /// 最近一次构建的引擎（测试用来驱动出帧）
    pub fn last_engine(&self) -> Option<Arc<SyntheticEngine>> {
        self.engines.lock().last().cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }
}

impl Default for SyntheticEngineFactory {
    fn default() -> Self {
        Self::new(SyntheticOptions::default())
    }
}

impl EngineFactory for SyntheticEngineFactory {
    fn library_load(&self) -> Result<()> {
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn library_unload(&self) {
        self.loaded.store(false, Ordering::SeqCst);
    }

    fn build(&self, descriptor: &PipelineDescriptor, sink_name: &str) -> Result<Arc<dyn Engine>> {
        if self.failures.fail_build {
            return Err(PlayerError::Construction(format!("无法解析管线: {}", descriptor)));
        }
        let declared_sink = match descriptor {
            PipelineDescriptor::Location(_) => Some(sink_name.to_string()),
            PipelineDescriptor::Launch(line) => declared_sink_name(line),
        };
        let engine = Arc::new(SyntheticEngine::new(
            self.options.clone(),
            self.failures.clone(),
            declared_sink,
            descriptor.launch_line(sink_name),
        ));
        self.engines.lock().push(Arc::clone(&engine));
        Ok(engine)
    }

    fn name(&self) -> &'static str {
        "synthetic"
    }
}

struct Shared {
    options: SyntheticOptions,
    failures: FailurePlan,
    sink_name: Option<String>,
    description: String,
    state: Mutex<TransportState>,
    clock: PlaybackClock,
    dimensions: Mutex<(u32, u32)>,
    sample_handler: Mutex<Option<SampleHandler>>,
    message_handler: Mutex<Option<MessageHandler>>,
    frame_index: AtomicU64,
    eos_posted: AtomicBool,
    seeks: Mutex<Vec<SeekRequest>>,
    volume: Mutex<Option<f64>>,
}

impl Shared {
    fn state(&self) -> TransportState {
        *self.state.lock()
    }

    fn prerolled(&self) -> bool {
        matches!(self.state(), TransportState::Paused | TransportState::Playing)
    }

    fn deliver(&self, sample: Sample) -> Option<FlowReturn> {
        // 回调在锁外执行
        let handler = self.sample_handler.lock().clone()?;
        Some(handler(sample))
    }

    fn post(&self, message: EngineMessage) {
        let handler = self.message_handler.lock().clone();
        if let Some(handler) = handler {
            handler(message);
        }
    }

    fn pump(&self) -> Option<FlowReturn> {
        let (width, height) = *self.dimensions.lock();
        let index = self.frame_index.fetch_add(1, Ordering::Relaxed);
        let result = self.deliver(Sample::new(test_pattern(width, height, index), width, height));
        self.check_end_of_stream();
        result
    }

    fn position_ms(&self) -> i64 {
        let now = self.clock.position_ms().max(0);
        match self.options.duration_ms {
            Some(duration) => now.min(duration as i64),
            None => now,
        }
    }

    fn check_end_of_stream(&self) {
        let Some(duration) = self.options.duration_ms else {
            return;
        };
        if self.state() == TransportState::Playing
            && self.clock.position_ms() >= duration as i64
            && !self.eos_posted.swap(true, Ordering::SeqCst)
        {
            debug!("{} 合成引擎到达末尾，发送 EOS", log_ctx());
            self.post(EngineMessage::Eos);
        }
    }
}

struct Producer {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct SyntheticEngine {
    shared: Arc<Shared>,
    producer: Mutex<Option<Producer>>,
}

impl SyntheticEngine {
    fn new(
        options: SyntheticOptions,
        failures: FailurePlan,
        sink_name: Option<String>,
        description: String,
    ) -> Self {
        let dimensions = (options.width, options.height);
        Self {
            shared: Arc::new(Shared {
                options,
                failures,
                sink_name,
                description,
                state: Mutex::new(TransportState::Null),
                clock: PlaybackClock::new(),
                dimensions: Mutex::new(dimensions),
                sample_handler: Mutex::new(None),
                message_handler: Mutex::new(None),
                frame_index: AtomicU64::new(0),
                eos_posted: AtomicBool::new(false),
                seeks: Mutex::new(Vec::new()),
                volume: Mutex::new(None),
            }),
            producer: Mutex::new(None),
        }
    }

    /// 生成并交付一帧（在调用线程上执行回调），没有注册回调时返回 None
    pub fn pump(&self) -> Option<FlowReturn> {
        self.shared.pump()
    }

    /// 交付任意样本
    pub fn push_sample(&self, sample: Sample) -> Option<FlowReturn> {
        self.shared.deliver(sample)
    }

    pub fn post_message(&self, message: EngineMessage) {
        self.shared.post(message);
    }

    /// 之后的帧使用新尺寸（模拟 caps 变化）
    pub fn set_dimensions(&self, width: u32, height: u32) {
        *self.shared.dimensions.lock() = (width, height);
    }

    pub fn seek_requests(&self) -> Vec<SeekRequest> {
        self.shared.seeks.lock().clone()
    }

    pub fn engine_state(&self) -> TransportState {
        self.shared.state()
    }

    pub fn volume(&self) -> Option<f64> {
        *self.shared.volume.lock()
    }

    pub fn has_handlers(&self) -> bool {
        self.shared.sample_handler.lock().is_some() || self.shared.message_handler.lock().is_some()
    }

    pub fn frames_generated(&self) -> u64 {
        self.shared.frame_index.load(Ordering::Relaxed)
    }

    fn start_producer(&self) {
        let mut producer = self.producer.lock();
        if producer.is_some() {
            return;
        }
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("synthetic-producer".to_string())
            .spawn(move || Self::producer_loop(shared, flag));
        match spawned {
            Ok(handle) => *producer = Some(Producer { running, handle }),
            Err(e) => warn!("{} ⚠️  无法启动合成生产者线程: {}", log_ctx(), e),
        }
    }

    fn producer_loop(shared: Arc<Shared>, running: Arc<AtomicBool>) {
        info!("{} 🎬 合成生产者线程启动", log_ctx());
        let frame_ms = 1000.0 / shared.options.fps.max(1) as f64;
        while running.load(Ordering::SeqCst) {
            if shared.state() == TransportState::Playing {
                shared.pump();
            }
            let rate = shared.clock.rate().max(0.01);
            thread::sleep(Duration::from_secs_f64(frame_ms / rate / 1000.0));
        }
        info!("{} 🛑 合成生产者线程退出", log_ctx());
    }

    fn stop_producer(&self) {
        let Some(producer) = self.producer.lock().take() else {
            return;
        };
        producer.running.store(false, Ordering::SeqCst);
        // 在生产者线程自身上调用时不能 join
        if producer.handle.thread().id() != thread::current().id() {
            let _ = producer.handle.join();
        }
    }
}

impl Engine for SyntheticEngine {
    fn set_state(&self, target: TransportState) -> Result<()> {
        if self.shared.failures.reject_states.contains(&target) {
            return Err(PlayerError::StateTransition { target });
        }
        let old = std::mem::replace(&mut *self.shared.state.lock(), target);

        match target {
            TransportState::Playing => {
                self.shared.clock.start();
                if self.shared.options.realtime {
                    self.start_producer();
                }
            }
            TransportState::Paused => self.shared.clock.halt(),
            TransportState::Ready | TransportState::Null => {
                self.stop_producer();
                self.shared.clock.rewind();
                self.shared.eos_posted.store(false, Ordering::SeqCst);
            }
        }

        self.shared.post(EngineMessage::StateChanged { old, new: target });
        Ok(())
    }

    fn wait_for_state(&self) -> Result<TransportState> {
        if self.shared.failures.reject_preroll {
            return Err(PlayerError::Preroll("合成引擎拒绝预加载".to_string()));
        }
        Ok(self.shared.state())
    }

    fn query_position_ns(&self) -> Option<u64> {
        if self.shared.failures.no_position || !self.shared.prerolled() {
            return None;
        }
        Some(self.shared.position_ms() as u64 * 1_000_000)
    }

    fn query_duration_ns(&self) -> Option<u64> {
        if self.shared.failures.no_duration || self.shared.state() == TransportState::Null {
            return None;
        }
        self.shared.options.duration_ms.map(|ms| ms * 1_000_000)
    }

    fn seek(&self, request: &SeekRequest) -> Result<()> {
        if self.shared.failures.reject_seeks || !self.shared.prerolled() {
            return Err(PlayerError::SeekRejected(format!(
                "合成引擎拒绝 seek 到 {}ns",
                request.position_ns
            )));
        }
        self.shared.seeks.lock().push(*request);
        self.shared
            .clock
            .reposition((request.position_ns / 1_000_000) as i64, request.rate);
        self.shared.eos_posted.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn video_size(&self) -> Option<(u32, u32)> {
        if self.shared.failures.no_video_size || !self.shared.prerolled() {
            return None;
        }
        Some(*self.shared.dimensions.lock())
    }

    fn set_volume(&self, volume: f64) -> Result<()> {
        if !self.shared.options.volume_control {
            return Err(PlayerError::Unsupported("volume"));
        }
        *self.shared.volume.lock() = Some(volume);
        Ok(())
    }

    fn install_sample_handler(&self, sink_name: &str, handler: SampleHandler) -> Result<()> {
        let found = !self.shared.failures.missing_sink
            && self.shared.sink_name.as_deref() == Some(sink_name);
        if !found {
            return Err(PlayerError::SinkNotFound(sink_name.to_string()));
        }
        *self.shared.sample_handler.lock() = Some(handler);
        Ok(())
    }

    fn install_message_handler(&self, handler: MessageHandler) {
        *self.shared.message_handler.lock() = Some(handler);
    }

    fn detach_handlers(&self) {
        self.stop_producer();
        self.shared.sample_handler.lock().take();
        self.shared.message_handler.lock().take();
    }

    fn description(&self) -> String {
        self.shared.description.clone()
    }
}

impl Drop for SyntheticEngine {
    fn drop(&mut self) {
        self.stop_producer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SHM_CAPTURE_PIPELINE;

    #[test]
    fn test_declared_sink_name() {
        assert_eq!(declared_sink_name(SHM_CAPTURE_PIPELINE).as_deref(), Some("sink"));
        assert_eq!(
            declared_sink_name("videotestsrc ! appsink name=\"out\" sync=false").as_deref(),
            Some("out")
        );
        assert_eq!(declared_sink_name("videotestsrc ! fakesink"), None);
    }

    #[test]
    fn test_pattern_size_and_shade() {
        let frame = test_pattern(3, 2, 257);
        assert_eq!(frame.len(), 24);
        assert_eq!(&frame[..4], &[1, 0, 0, 255]);
        assert_eq!(&frame[20..], &[1, 2, 1, 255]);
    }

    #[test]
    fn test_queries_follow_state() {
        let factory = SyntheticEngineFactory::default();
        let engine = factory.build(&PipelineDescriptor::shm_capture(), "sink").unwrap();
        assert_eq!(engine.query_position_ns(), None);
        assert_eq!(engine.video_size(), None);

        engine.set_state(TransportState::Paused).unwrap();
        assert_eq!(engine.wait_for_state().unwrap(), TransportState::Paused);
        assert_eq!(engine.query_position_ns(), Some(0));
        assert_eq!(engine.query_duration_ns(), Some(10_000_000_000));
        assert_eq!(engine.video_size(), Some((320, 240)));
    }

    #[test]
    fn test_missing_sink() {
        let factory = SyntheticEngineFactory::default();
        let engine = factory
            .build(&PipelineDescriptor::launch("videotestsrc ! fakesink"), "sink")
            .unwrap();
        let handler: SampleHandler = Arc::new(|_| FlowReturn::Ok);
        assert!(matches!(
            engine.install_sample_handler("sink", handler),
            Err(PlayerError::SinkNotFound(_))
        ));
    }

    #[test]
    fn test_eos_posted_once_at_end() {
        let factory = SyntheticEngineFactory::new(SyntheticOptions {
            duration_ms: Some(1_000),
            ..Default::default()
        });
        factory.build(&PipelineDescriptor::shm_capture(), "sink").unwrap();
        let engine = factory.last_engine().unwrap();

        let eos_count = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&eos_count);
        engine.install_message_handler(Arc::new(move |message: EngineMessage| {
            if message == EngineMessage::Eos {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));
        engine
            .install_sample_handler("sink", Arc::new(|_: Sample| FlowReturn::Ok))
            .unwrap();

        engine.set_state(TransportState::Paused).unwrap();
        engine
            .seek(&SeekRequest { rate: 1.0, position_ns: 1_000_000_000, flush: true, key_unit: true })
            .unwrap();
        engine.set_state(TransportState::Playing).unwrap();
        engine.pump();
        engine.pump();
        assert_eq!(eos_count.load(Ordering::SeqCst), 1);
        assert_eq!(engine.query_position_ns(), Some(1_000_000_000));
    }

    #[test]
    fn test_realtime_producer_delivers_frames() {
        let factory = SyntheticEngineFactory::new(SyntheticOptions {
            width: 8,
            height: 8,
            fps: 200,
            realtime: true,
            ..Default::default()
        });
        factory.build(&PipelineDescriptor::shm_capture(), "sink").unwrap();
        let engine = factory.last_engine().unwrap();
        let frames = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&frames);
        engine
            .install_sample_handler(
                "sink",
                Arc::new(move |_: Sample| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    FlowReturn::Ok
                }),
            )
            .unwrap();

        engine.set_state(TransportState::Paused).unwrap();
        engine.set_state(TransportState::Playing).unwrap();
        thread::sleep(Duration::from_millis(100));
        engine.set_state(TransportState::Null).unwrap();
        let delivered = frames.load(Ordering::SeqCst);
        assert!(delivered > 0);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(frames.load(Ordering::SeqCst), delivered);
    }
}
