//! 播放引擎核心：把外部解码引擎的输出帧交给任意线程上的消费者，
//! 并提供播放/暂停/停止、seek、变速、自动重播等传输控制。

pub mod core;
pub mod player;

pub use crate::core::{PlayerError, Result, SessionConfig, SessionStatus, TransportState};
pub use crate::player::{EngineLibrary, PlaybackSession, PlayerEvent, PlayerObserver};
