use crate::core::{
    log_ctx, PipelineDescriptor, PlayerError, Result, SessionConfig, SessionStatus,
    StreamDiagnostic, TransportState,
};
use crate::player::engine::{EngineFactory, ImageHandle, ImageImporter};
use crate::player::event_bridge::{CompletionSignal, EventBridge};
use crate::player::frame_store::{FrameStore, FrameView, PublishedFrame};
use crate::player::observer::PlayerObserver;
use crate::player::transport::TransportController;
use log::{error, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// 播放会话 - 持有引擎、帧缓冲区、事件桥接和传输控制
///
/// 所有公开操作都只需要 `&self`，可以在多个消费者线程间共享（`Arc<PlaybackSession>`）。
/// 构建失败时会话仍然存在，但所有操作都返回 `NotInitialized`。
pub struct PlaybackSession {
    descriptor: PipelineDescriptor,
    sink_name: String,
    store: Arc<FrameStore>,
    bridge: Arc<EventBridge>,
    transport: TransportController,
    volume: Mutex<f64>,
    auto_repeat: AtomicBool,
    importer: Mutex<Option<Box<dyn ImageImporter>>>,
    construction_error: Option<PlayerError>,
}

impl PlaybackSession {
    /// 构建引擎并接好回调
    pub fn new(
        factory: &dyn EngineFactory,
        config: &SessionConfig,
        observer: Arc<dyn PlayerObserver>,
    ) -> Self {
        let descriptor = config.descriptor();
        info!("{} 🎮 创建播放会话: {}", log_ctx(), descriptor);

        let store = Arc::new(FrameStore::new());
        let completion = Arc::new(CompletionSignal::new());
        let bridge = Arc::new(EventBridge::new(
            Arc::clone(&store),
            Arc::clone(&completion),
            Arc::clone(&observer),
        ));
        let transport = TransportController::new(Arc::clone(&store), completion, observer);

        let mut session = Self {
            descriptor,
            sink_name: config.sink_name.clone(),
            store,
            bridge,
            transport,
            volume: Mutex::new(config.volume),
            auto_repeat: AtomicBool::new(config.auto_repeat),
            importer: Mutex::new(None),
            construction_error: None,
        };

        if let Err(e) = config.validate().and_then(|_| session.create_pipeline(factory)) {
            error!("{} ❌ 创建管线失败: {}", log_ctx(), e);
            session.teardown();
            session.construction_error = Some(e);
        } else {
            info!("{} ✅ 播放会话创建完成", log_ctx());
        }
        session
    }

    fn create_pipeline(&self, factory: &dyn EngineFactory) -> Result<()> {
        let engine = factory.build(&self.descriptor, &self.sink_name)?;
        // 先交给传输控制，后续步骤失败时由 teardown 统一释放
        self.transport.attach(Arc::clone(&engine));

        engine.install_message_handler(self.bridge.message_handler());
        engine.install_sample_handler(&self.sink_name, self.bridge.sample_handler())?;
        info!("{} 🔗 已连接帧输出元素: {}", log_ctx(), self.sink_name);
        Ok(())
    }

    /// 预加载并分配帧缓冲区
    ///
    /// 阻塞：一直等到引擎确认进入 PAUSED，没有超时。不要在对延迟敏感的线程上调用。
    /// 失败时引擎被销毁，会话不再可用。
    pub fn init(&self) -> Result<()> {
        let result = self.transport.init();
        if let Err(PlayerError::Preroll(_)) = &result {
            self.teardown();
        }
        result
    }

    pub fn play(&self) -> Result<()> {
        self.transport.play()
    }

    pub fn pause(&self) -> Result<()> {
        self.transport.pause()
    }

    pub fn stop(&self) -> Result<()> {
        self.transport.stop()
    }

    /// 记录音量并转发给引擎；引擎不支持音量时返回 `Unsupported`，但值仍被保存
    pub fn set_volume(&self, volume: f64) -> Result<()> {
        if !volume.is_finite() || volume < 0.0 {
            return Err(PlayerError::InvalidArgument(format!("无效音量: {}", volume)));
        }
        *self.volume.lock() = volume;
        match self.transport.set_volume(volume) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("{} ⚠️  音量未生效: {}", log_ctx(), e);
                Err(e)
            }
        }
    }

    pub fn set_playback_rate(&self, rate: f64) -> Result<()> {
        self.transport.set_playback_rate(rate)
    }

    pub fn set_seek(&self, position_ms: i64) -> Result<()> {
        self.transport.set_seek(position_ms)
    }

    /// 总时长（毫秒），未知时 -1
    pub fn get_duration(&self) -> i64 {
        self.transport.duration_ms()
    }

    /// 当前位置（毫秒），未知时 -1。播放结束后的第一次调用会触发重播或完成通知。
    pub fn get_current_position(&self) -> i64 {
        self.transport.position_ms(self.is_auto_repeat())
    }

    /// 最新一帧（RGBA，`width*height*4` 字节）。收到首帧之前返回 None。
    pub fn get_frame_buffer(&self) -> Option<FrameView> {
        self.store.snapshot()
    }

    /// 最新一帧的引用，不拷贝
    pub fn latest_frame(&self) -> Option<PublishedFrame> {
        self.store.latest()
    }

    pub fn set_auto_repeat(&self, enabled: bool) {
        self.auto_repeat.store(enabled, Ordering::SeqCst);
    }

    pub fn is_auto_repeat(&self) -> bool {
        self.auto_repeat.load(Ordering::SeqCst)
    }

    pub fn playback_rate(&self) -> f64 {
        self.transport.rate()
    }

    pub fn volume(&self) -> f64 {
        *self.volume.lock()
    }

    pub fn transport_state(&self) -> TransportState {
        self.transport.state()
    }

    /// 帧缓冲区当前记录的宽高
    pub fn video_size(&self) -> (u32, u32) {
        self.store.dimensions()
    }

    pub fn last_diagnostic(&self) -> Option<StreamDiagnostic> {
        self.bridge.last_diagnostic()
    }

    pub fn frames_published(&self) -> u64 {
        self.bridge.frames_published()
    }

    pub fn construction_error(&self) -> Option<&PlayerError> {
        self.construction_error.as_ref()
    }

    pub fn descriptor(&self) -> &PipelineDescriptor {
        &self.descriptor
    }

    pub fn status(&self) -> SessionStatus {
        let (width, height) = self.store.dimensions();
        SessionStatus {
            state: self.transport.state(),
            position: self.transport.peek_position_ms(),
            duration: self.transport.duration_ms(),
            playback_rate: self.playback_rate(),
            volume: self.volume(),
            width,
            height,
            auto_repeat: self.is_auto_repeat(),
        }
    }

    /// 挂接零拷贝导入器，销毁时第一个被注销
    pub fn attach_image_importer(&self, importer: Box<dyn ImageImporter>) {
        *self.importer.lock() = Some(importer);
    }

    /// 把最新一帧导入为图像句柄（需要先挂接导入器）
    pub fn import_current_frame(&self) -> Result<ImageHandle> {
        let frame = self
            .store
            .latest()
            .ok_or(PlayerError::QueryUnavailable("frame"))?;
        let mut importer = self.importer.lock();
        let importer = importer
            .as_mut()
            .ok_or(PlayerError::Unsupported("image import"))?;
        importer.import(&frame.buffer, frame.width, frame.height)
    }

    /// 销毁引擎。可重复调用，构建失败后调用也安全。
    pub fn close(&self) {
        self.teardown();
    }

    fn teardown(&self) {
        if let Some(mut importer) = self.importer.lock().take() {
            importer.unregister_all();
        }

        let Some(engine) = self.transport.detach() else {
            self.store.clear();
            return;
        };

        if let Err(e) = engine.set_state(TransportState::Null) {
            warn!("{} ⚠️  切换到 NULL 失败: {}", log_ctx(), e);
        }
        self.store.clear();
        engine.detach_handlers();
        info!("{} 🗑️  引擎已销毁: {}", log_ctx(), engine.description());
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
