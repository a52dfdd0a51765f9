use crate::core::{log_ctx, DiagnosticSeverity, StreamDiagnostic};
use crate::player::engine::{EngineMessage, FlowReturn, MessageHandler, Sample, SampleHandler};
use crate::player::frame_store::FrameStore;
use crate::player::observer::PlayerObserver;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// 播放完成标记：每次 EOS 置位一次，被位置查询消费一次
///
/// 与帧缓冲区使用各自独立的锁。
#[derive(Default)]
pub struct CompletionSignal {
    completed: Mutex<bool>,
}

impl CompletionSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        *self.completed.lock() = true;
    }

    /// 原子地读取并清除
    pub fn take(&self) -> bool {
        std::mem::take(&mut *self.completed.lock())
    }

    pub fn is_set(&self) -> bool {
        *self.completed.lock()
    }
}

/// 引擎异步事件 -> 帧缓冲区更新 / 完成标记 / 观察者通知
pub struct EventBridge {
    store: Arc<FrameStore>,
    completion: Arc<CompletionSignal>,
    observer: Arc<dyn PlayerObserver>,
    last_diagnostic: Mutex<Option<StreamDiagnostic>>,
    frames_published: AtomicU64,
}

impl EventBridge {
    pub fn new(
        store: Arc<FrameStore>,
        completion: Arc<CompletionSignal>,
        observer: Arc<dyn PlayerObserver>,
    ) -> Self {
        Self {
            store,
            completion,
            observer,
            last_diagnostic: Mutex::new(None),
            frames_published: AtomicU64::new(0),
        }
    }

    /// 新帧回调（引擎线程）
    pub fn on_new_sample(&self, sample: Sample) -> FlowReturn {
        let Some(buffer) = sample.buffer else {
            warn!("{} ⚠️  样本中没有可提取的缓冲区", log_ctx());
            return FlowReturn::Error;
        };

        let (width, height) = sample
            .dimensions
            .unwrap_or_else(|| self.store.dimensions());

        if self.store.publish(buffer, width, height) {
            self.observer.on_resolution_changed(width, height);
        }

        let count = self.frames_published.fetch_add(1, Ordering::Relaxed) + 1;
        if count <= 5 || count % 100 == 0 {
            debug!("{} 🖼️  发布第 {} 帧 ({}x{})", log_ctx(), count, width, height);
        }

        self.observer.on_frame_decoded();
        FlowReturn::Ok
    }

    /// 消息总线回调（引擎线程）。所有消息在这里被消费，不再回传给引擎。
    pub fn on_message(&self, message: EngineMessage) {
        match message {
            EngineMessage::Eos => {
                info!("{} 📄 收到 EOS", log_ctx());
                self.completion.signal();
            }
            EngineMessage::Warning { source, message, debug } => {
                self.report(StreamDiagnostic {
                    severity: DiagnosticSeverity::Warning,
                    source,
                    message,
                    details: debug,
                });
            }
            EngineMessage::Error { source, message, debug } => {
                self.report(StreamDiagnostic {
                    severity: DiagnosticSeverity::Error,
                    source,
                    message,
                    details: debug,
                });
            }
            EngineMessage::StateChanged { .. } | EngineMessage::Other(_) => {}
        }
    }

    fn report(&self, diagnostic: StreamDiagnostic) {
        let details = diagnostic.details.as_deref().unwrap_or("none");
        match diagnostic.severity {
            DiagnosticSeverity::Warning => {
                warn!("{} ⚠️  {} (details: {})", log_ctx(), diagnostic, details)
            }
            DiagnosticSeverity::Error => {
                error!("{} ❌ {} (details: {})", log_ctx(), diagnostic, details)
            }
        }
        self.observer.on_diagnostic(&diagnostic);
        *self.last_diagnostic.lock() = Some(diagnostic);
    }

    pub fn last_diagnostic(&self) -> Option<StreamDiagnostic> {
        self.last_diagnostic.lock().clone()
    }

    pub fn frames_published(&self) -> u64 {
        self.frames_published.load(Ordering::Relaxed)
    }

    /// 供引擎注册的新帧回调
    pub fn sample_handler(self: &Arc<Self>) -> SampleHandler {
        let bridge = Arc::clone(self);
        Arc::new(move |sample| bridge.on_new_sample(sample))
    }

    /// 供引擎注册的消息回调
    pub fn message_handler(self: &Arc<Self>) -> MessageHandler {
        let bridge = Arc::clone(self);
        Arc::new(move |message| bridge.on_message(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::observer::{ChannelObserver, PlayerEvent};
    use crossbeam_channel::{unbounded, Receiver};

    fn bridge() -> (Arc<EventBridge>, Arc<FrameStore>, Arc<CompletionSignal>, Receiver<PlayerEvent>) {
        let (tx, rx) = unbounded();
        let store = Arc::new(FrameStore::new());
        let completion = Arc::new(CompletionSignal::new());
        let bridge = Arc::new(EventBridge::new(
            Arc::clone(&store),
            Arc::clone(&completion),
            Arc::new(ChannelObserver::new(tx)),
        ));
        (bridge, store, completion, rx)
    }

    #[test]
    fn test_sample_is_published_and_notified() {
        let (bridge, store, _, rx) = bridge();
        store.allocate(2, 1);
        assert_eq!(bridge.on_new_sample(Sample::new(vec![1u8; 8], 2, 1)), FlowReturn::Ok);
        assert_eq!(rx.try_recv().unwrap(), PlayerEvent::FrameDecoded);
        assert!(rx.try_recv().is_err());
        assert_eq!(store.snapshot().unwrap().len(), 8);
        assert_eq!(bridge.frames_published(), 1);
    }

    #[test]
    fn test_empty_sample_reports_flow_error_without_state_change() {
        let (bridge, store, _, rx) = bridge();
        bridge.on_new_sample(Sample::new(vec![3u8; 4], 1, 1));
        let _ = rx.try_recv();

        assert_eq!(bridge.on_new_sample(Sample::empty()), FlowReturn::Error);
        assert!(rx.try_recv().is_err());
        assert_eq!(store.latest().unwrap().sequence, 1);
        assert_eq!(store.dimensions(), (1, 1));
    }

    #[test]
    fn test_resolution_change_is_notified_before_frame() {
        let (bridge, store, _, rx) = bridge();
        store.allocate(2, 2);
        bridge.on_new_sample(Sample::new(vec![0u8; 16], 2, 2));
        bridge.on_new_sample(Sample::new(vec![0u8; 24], 3, 2));
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                PlayerEvent::FrameDecoded,
                PlayerEvent::ResolutionChanged { width: 3, height: 2 },
                PlayerEvent::FrameDecoded,
            ]
        );
    }

    #[test]
    fn test_sample_without_caps_keeps_current_dimensions() {
        let (bridge, store, _, _rx) = bridge();
        store.allocate(2, 2);
        let sample = Sample {
            buffer: Some(Arc::new(vec![4u8; 16])),
            dimensions: None,
        };
        assert_eq!(bridge.on_new_sample(sample), FlowReturn::Ok);
        assert_eq!(store.snapshot().unwrap().width(), 2);
    }

    #[test]
    fn test_eos_sets_completion_once() {
        let (bridge, _, completion, _rx) = bridge();
        bridge.on_message(EngineMessage::Eos);
        assert!(completion.take());
        assert!(!completion.take());
    }

    #[test]
    fn test_error_and_warning_become_diagnostics() {
        let (bridge, _, completion, rx) = bridge();
        bridge.on_message(EngineMessage::Warning {
            source: "videoconvert0".into(),
            message: "slow".into(),
            debug: None,
        });
        bridge.on_message(EngineMessage::Error {
            source: "shmsrc0".into(),
            message: "socket closed".into(),
            debug: Some("gstshmsrc.c:42".into()),
        });

        let last = bridge.last_diagnostic().unwrap();
        assert!(last.is_error());
        assert_eq!(last.source, "shmsrc0");
        assert_eq!(last.details.as_deref(), Some("gstshmsrc.c:42"));
        assert!(!completion.is_set());

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], PlayerEvent::Diagnostic(d) if d.severity == DiagnosticSeverity::Warning));
    }

    #[test]
    fn test_other_messages_are_ignored() {
        let (bridge, _, completion, rx) = bridge();
        bridge.on_message(EngineMessage::Other("latency".into()));
        bridge.on_message(EngineMessage::StateChanged {
            old: crate::core::TransportState::Ready,
            new: crate::core::TransportState::Paused,
        });
        assert!(!completion.is_set());
        assert!(bridge.last_diagnostic().is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_handlers_forward_to_bridge() {
        let (bridge, store, completion, _rx) = bridge();
        let on_sample = bridge.sample_handler();
        let on_message = bridge.message_handler();
        assert_eq!(on_sample(Sample::new(vec![1u8; 4], 1, 1)), FlowReturn::Ok);
        on_message(EngineMessage::Eos);
        assert!(store.has_frame());
        assert!(completion.is_set());
    }
}
