use crate::core::StreamDiagnostic;
use crossbeam_channel::Sender;

/// 会话通知的观察者
///
/// `on_frame_decoded` / `on_resolution_changed` / `on_diagnostic` 在引擎回调线程上触发，
/// 其余在调用 API 的线程上触发。会话不会对这些调用做串行化。
pub trait PlayerObserver: Send + Sync {
    fn on_initialized(&self);

    fn on_playing(&self, playing: bool);

    fn on_frame_decoded(&self);

    fn on_completed(&self);

    fn on_resolution_changed(&self, _width: u32, _height: u32) {}

    fn on_diagnostic(&self, _diagnostic: &StreamDiagnostic) {}
}

/// 忽略所有通知
pub struct NullObserver;

impl PlayerObserver for NullObserver {
    fn on_initialized(&self) {}
    fn on_playing(&self, _playing: bool) {}
    fn on_frame_decoded(&self) {}
    fn on_completed(&self) {}
}

/// 观察者事件
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    Initialized,
    Playing(bool),
    FrameDecoded,
    Completed,
    ResolutionChanged { width: u32, height: u32 },
    Diagnostic(StreamDiagnostic),
}

/// 把通知转成事件发送到通道（接收端可在任意线程消费）
pub struct ChannelObserver {
    tx: Sender<PlayerEvent>,
    forward_frames: bool,
}

impl ChannelObserver {
    pub fn new(tx: Sender<PlayerEvent>) -> Self {
        Self {
            tx,
            forward_frames: true,
        }
    }

    /// 不转发逐帧通知（避免高帧率下通道堆积）
    pub fn without_frames(tx: Sender<PlayerEvent>) -> Self {
        Self {
            tx,
            forward_frames: false,
        }
    }

    fn send(&self, event: PlayerEvent) {
        // 接收端已关闭时丢弃
        let _ = self.tx.send(event);
    }
}

impl PlayerObserver for ChannelObserver {
    fn on_initialized(&self) {
        self.send(PlayerEvent::Initialized);
    }

    fn on_playing(&self, playing: bool) {
        self.send(PlayerEvent::Playing(playing));
    }

    fn on_frame_decoded(&self) {
        if self.forward_frames {
            self.send(PlayerEvent::FrameDecoded);
        }
    }

    fn on_completed(&self) {
        self.send(PlayerEvent::Completed);
    }

    fn on_resolution_changed(&self, width: u32, height: u32) {
        self.send(PlayerEvent::ResolutionChanged { width, height });
    }

    fn on_diagnostic(&self, diagnostic: &StreamDiagnostic) {
        self.send(PlayerEvent::Diagnostic(diagnostic.clone()));
    }
}
