// 播放引擎核心模块

pub mod engine;
pub mod frame_store;
pub mod observer;
pub mod event_bridge;
pub mod transport;
pub mod session;
pub mod synthetic;  // 合成引擎（演示与测试）
#[cfg(feature = "gstreamer")]
pub mod gst_engine;

pub use engine::{
    Engine, EngineFactory, EngineLibrary, EngineMessage, FlowReturn, FrameBuffer, ImageHandle,
    ImageImporter, Sample, SeekRequest,
};
pub use frame_store::{FrameStore, FrameView, PublishedFrame};
pub use observer::{ChannelObserver, NullObserver, PlayerEvent, PlayerObserver};
pub use event_bridge::{CompletionSignal, EventBridge};
pub use transport::TransportController;
pub use session::PlaybackSession;
pub use synthetic::{FailurePlan, SyntheticEngineFactory, SyntheticOptions};
#[cfg(feature = "gstreamer")]
pub use gst_engine::GstEngineFactory;
