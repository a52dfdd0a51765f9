use crate::core::TransportState;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("引擎构建失败: {0}")]
    Construction(String),

    #[error("找不到帧输出元素 (name={0})")]
    SinkNotFound(String),

    #[error("状态切换失败: -> {target:?}")]
    StateTransition { target: TransportState },

    #[error("预加载失败: {0}")]
    Preroll(String),

    #[error("Seek 被引擎拒绝: {0}")]
    SeekRejected(String),

    #[error("无效参数: {0}")]
    InvalidArgument(String),

    #[error("当前状态不允许该操作: 需要 {expected:?}, 实际 {actual:?}")]
    InvalidState {
        expected: TransportState,
        actual: TransportState,
    },

    #[error("查询不可用: {0}")]
    QueryUnavailable(&'static str),

    #[error("会话未就绪（引擎不存在或已销毁）")]
    NotInitialized,

    #[error("引擎不支持: {0}")]
    Unsupported(&'static str),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("配置解析错误: {0}")]
    Json(#[from] serde_json::Error),

    #[error("其他错误: {0}")]
    Other(String),

    #[error("Anyhow 错误: {0}")]
    AnyhowError(#[from] anyhow::Error),
}

impl PlayerError {
    /// 是否属于构建阶段的致命错误（会话不可再用）
    pub fn is_construction_failure(&self) -> bool {
        matches!(self, PlayerError::Construction(_) | PlayerError::SinkNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, PlayerError>;
