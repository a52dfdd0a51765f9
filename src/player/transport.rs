use crate::core::{log_ctx, PlayerError, Result, TransportState, UNKNOWN_TIME_MS};
use crate::player::engine::{Engine, SeekRequest};
use crate::player::event_bridge::CompletionSignal;
use crate::player::frame_store::FrameStore;
use crate::player::observer::PlayerObserver;
use log::{error, info, warn};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

const NS_PER_MS: u64 = 1_000_000;

/// 传输控制：对引擎发起状态切换、seek、变速，并跟踪引擎已接受的状态
pub struct TransportController {
    engine: RwLock<Option<Arc<dyn Engine>>>,
    state: Mutex<TransportState>,
    rate: Mutex<f64>,
    store: Arc<FrameStore>,
    completion: Arc<CompletionSignal>,
    observer: Arc<dyn PlayerObserver>,
}

impl TransportController {
    pub fn new(
        store: Arc<FrameStore>,
        completion: Arc<CompletionSignal>,
        observer: Arc<dyn PlayerObserver>,
    ) -> Self {
        Self {
            engine: RwLock::new(None),
            state: Mutex::new(TransportState::Null),
            rate: Mutex::new(1.0),
            store,
            completion,
            observer,
        }
    }

    /// 接管新构建的引擎（状态 -> Ready）
    pub fn attach(&self, engine: Arc<dyn Engine>) {
        let mut slot = self.engine.write();
        *slot = Some(engine);
        *self.state.lock() = TransportState::Ready;
    }

    /// 交出引擎引用（状态 -> Null），之后所有操作返回 NotInitialized
    pub fn detach(&self) -> Option<Arc<dyn Engine>> {
        let mut slot = self.engine.write();
        let engine = slot.take();
        *self.state.lock() = TransportState::Null;
        engine
    }

    /// 只有发起切换的引擎仍然挂接时才记录新状态（状态写入时持有引擎读锁）
    fn commit_state(&self, engine: &Arc<dyn Engine>, target: TransportState) -> Result<()> {
        let slot = self.engine.read();
        match slot.as_ref() {
            Some(current) if Arc::ptr_eq(current, engine) => {
                *self.state.lock() = target;
                Ok(())
            }
            _ => {
                warn!("{} ⚠️  切换到 {:?} 期间引擎已被销毁", log_ctx(), target);
                Err(PlayerError::NotInitialized)
            }
        }
    }

    fn engine(&self) -> Result<Arc<dyn Engine>> {
        self.engine.read().clone().ok_or(PlayerError::NotInitialized)
    }

    pub fn state(&self) -> TransportState {
        *self.state.lock()
    }

    pub fn rate(&self) -> f64 {
        *self.rate.lock()
    }

    /// 预加载：切到 Paused 并无限期等待引擎确认，然后按输出尺寸分配帧缓冲区
    pub fn init(&self) -> Result<()> {
        let engine = self.engine()?;
        let actual = self.state();
        if actual != TransportState::Ready {
            return Err(PlayerError::InvalidState {
                expected: TransportState::Ready,
                actual,
            });
        }

        self.preroll(&*engine)?;
        self.commit_state(&engine, TransportState::Paused)?;

        let (width, height) = engine.video_size().unwrap_or_else(|| {
            warn!("{} ⚠️  无法获取输出尺寸，等待首帧", log_ctx());
            (0, 0)
        });
        self.store.allocate(width, height);

        info!("{} ✅ 预加载完成: {}x{}", log_ctx(), width, height);
        self.observer.on_initialized();
        Ok(())
    }

    fn preroll(&self, engine: &dyn Engine) -> Result<()> {
        if let Err(e) = engine.set_state(TransportState::Paused) {
            error!("{} ❌ 切换到 PAUSED 失败: {}", log_ctx(), e);
            return Err(PlayerError::Preroll(e.to_string()));
        }
        match engine.wait_for_state() {
            Ok(TransportState::Paused) | Ok(TransportState::Playing) => Ok(()),
            Ok(other) => {
                error!("{} ❌ 等待 PAUSED 失败，停在 {:?}", log_ctx(), other);
                Err(PlayerError::Preroll(format!("停在 {:?}", other)))
            }
            Err(e) => {
                error!("{} ❌ 等待 PAUSED 失败: {}", log_ctx(), e);
                Err(PlayerError::Preroll(e.to_string()))
            }
        }
    }

    fn transition(&self, target: TransportState) -> Result<()> {
        let engine = self.engine()?;
        if let Err(e) = engine.set_state(target) {
            error!("{} ❌ 切换到 {:?} 失败: {}", log_ctx(), target, e);
            return Err(PlayerError::StateTransition { target });
        }
        self.commit_state(&engine, target)
    }

    pub fn play(&self) -> Result<()> {
        self.transition(TransportState::Playing)?;
        info!("{} ▶️  播放", log_ctx());
        self.observer.on_playing(true);
        Ok(())
    }

    pub fn pause(&self) -> Result<()> {
        self.transition(TransportState::Paused)?;
        info!("{} ⏸️  暂停", log_ctx());
        self.observer.on_playing(false);
        Ok(())
    }

    /// 停止到 Ready（不是 Null，资源保留以便重新播放）
    pub fn stop(&self) -> Result<()> {
        self.transition(TransportState::Ready)?;
        info!("{} ⏹️  停止", log_ctx());
        self.observer.on_playing(false);
        Ok(())
    }

    /// 变速：在当前位置做一次带新速率的 flush seek，引擎接受后才更新速率
    pub fn set_playback_rate(&self, rate: f64) -> Result<()> {
        if !(rate > 0.0) || !rate.is_finite() {
            error!("{} ❌ 无效的播放速率: {}", log_ctx(), rate);
            return Err(PlayerError::InvalidArgument(format!("播放速率必须为正数: {}", rate)));
        }
        let engine = self.engine()?;
        let position_ns = engine
            .query_position_ns()
            .ok_or(PlayerError::QueryUnavailable("position"))?;

        let request = SeekRequest {
            rate,
            position_ns,
            flush: true,
            key_unit: false,
        };
        if let Err(e) = engine.seek(&request) {
            error!("{} ❌ 变速 seek 失败: {}", log_ctx(), e);
            return Err(e);
        }

        *self.rate.lock() = rate;
        info!("{} ⏩ 播放速率: {}", log_ctx(), rate);
        Ok(())
    }

    /// 绝对位置 seek（flush + 关键帧对齐），使用当前保存的速率
    pub fn set_seek(&self, position_ms: i64) -> Result<()> {
        if position_ms < 0 {
            return Err(PlayerError::InvalidArgument(format!("seek 位置不能为负: {}", position_ms)));
        }
        let engine = self.engine()?;
        let request = SeekRequest {
            rate: self.rate(),
            position_ns: (position_ms as u64).saturating_mul(NS_PER_MS),
            flush: true,
            key_unit: true,
        };
        if let Err(e) = engine.seek(&request) {
            error!("{} ❌ Seek 到 {}ms 失败: {}", log_ctx(), position_ms, e);
            return Err(e);
        }
        info!("{} 🎯 Seek 到: {} ms", log_ctx(), position_ms);
        Ok(())
    }

    /// 总时长（毫秒），未知时返回 -1
    pub fn duration_ms(&self) -> i64 {
        self.engine()
            .ok()
            .and_then(|engine| engine.query_duration_ns())
            .map(|ns| (ns / NS_PER_MS) as i64)
            .unwrap_or(UNKNOWN_TIME_MS)
    }

    fn query_position_ns(&self) -> Option<u64> {
        self.engine().ok().and_then(|engine| engine.query_position_ns())
    }

    /// 只查询位置，不碰完成标记
    pub fn peek_position_ms(&self) -> i64 {
        self.query_position_ns()
            .map(|ns| (ns / NS_PER_MS) as i64)
            .unwrap_or(UNKNOWN_TIME_MS)
    }

    /// 当前位置（毫秒），未知时返回 -1
    ///
    /// 同时消费完成标记：自动重播时 seek 回 0，否则通知观察者播放完成。
    pub fn position_ms(&self, auto_repeat: bool) -> i64 {
        let Some(position_ns) = self.query_position_ns() else {
            return UNKNOWN_TIME_MS;
        };

        if self.completion.take() {
            if auto_repeat {
                info!("{} 🔁 播放结束，自动重播", log_ctx());
                if let Err(e) = self.set_seek(0) {
                    error!("{} ❌ 自动重播 seek 失败: {}", log_ctx(), e);
                }
            } else {
                info!("{} 🏁 播放完成", log_ctx());
                self.observer.on_completed();
            }
        }

        (position_ns / NS_PER_MS) as i64
    }

    pub fn set_volume(&self, volume: f64) -> Result<()> {
        self.engine()?.set_volume(volume)
    }

    pub fn video_size(&self) -> Option<(u32, u32)> {
        self.engine().ok().and_then(|engine| engine.video_size())
    }
}
