//! 外部解码引擎的抽象。
//!
//! 解码、解封装、色彩转换都在引擎内部完成，这里只定义本模块需要的最小接口：
//! 状态切换、查询、seek，以及两个异步入口（新帧回调、消息总线回调）。

use crate::core::{log_ctx, PipelineDescriptor, PlayerError, Result, TransportState};
use log::info;
use std::sync::Arc;

/// 引擎交付的一块已解码像素数据（RGBA）
///
/// 实现者可以是普通的 `Vec<u8>`，也可以是引擎自己的引用计数缓冲区。
pub trait FrameBuffer: Send + Sync {
    /// 缓冲区字节数
    fn size(&self) -> usize;

    /// 从 `offset` 开始拷贝到 `dest`，返回实际拷贝的字节数
    fn extract(&self, offset: usize, dest: &mut [u8]) -> usize;
}

impl FrameBuffer for Vec<u8> {
    fn size(&self) -> usize {
        self.len()
    }

    fn extract(&self, offset: usize, dest: &mut [u8]) -> usize {
        let src = self.get(offset..).unwrap_or(&[]);
        let n = src.len().min(dest.len());
        dest[..n].copy_from_slice(&src[..n]);
        n
    }
}

/// 新帧回调收到的样本：缓冲区 + 声明的宽高
#[derive(Clone)]
pub struct Sample {
    pub buffer: Option<Arc<dyn FrameBuffer>>,
    pub dimensions: Option<(u32, u32)>,
}

impl Sample {
    pub fn new(buffer: impl FrameBuffer + 'static, width: u32, height: u32) -> Self {
        Self {
            buffer: Some(Arc::new(buffer)),
            dimensions: Some((width, height)),
        }
    }

    /// 没有可提取缓冲区的样本
    pub fn empty() -> Self {
        Self {
            buffer: None,
            dimensions: None,
        }
    }
}

/// 新帧回调的返回值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowReturn {
    Ok,
    /// 向上游报告数据流错误
    Error,
}

/// 引擎消息总线上的消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineMessage {
    Eos,
    Error {
        source: String,
        message: String,
        debug: Option<String>,
    },
    Warning {
        source: String,
        message: String,
        debug: Option<String>,
    },
    StateChanged {
        old: TransportState,
        new: TransportState,
    },
    /// 其他消息（类型名），本模块不处理
    Other(String),
}

/// Seek 请求：从 `position_ns` 播放到流末尾
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekRequest {
    pub rate: f64,
    pub position_ns: u64,
    /// 丢弃旧位置上已缓冲的数据
    pub flush: bool,
    /// 对齐到关键帧
    pub key_unit: bool,
}

pub type SampleHandler = Arc<dyn Fn(Sample) -> FlowReturn + Send + Sync>;
pub type MessageHandler = Arc<dyn Fn(EngineMessage) + Send + Sync>;

/// 运行中的解码管线
///
/// 两个回调可能在引擎自己的线程上被调用，与 API 调用线程无关。
pub trait Engine: Send + Sync {
    /// 请求状态切换（可能是异步完成的）
    fn set_state(&self, target: TransportState) -> Result<()>;

    /// 阻塞等待上一次状态切换完成，没有超时，返回到达的状态
    fn wait_for_state(&self) -> Result<TransportState>;

    fn query_position_ns(&self) -> Option<u64>;

    fn query_duration_ns(&self) -> Option<u64>;

    fn seek(&self, request: &SeekRequest) -> Result<()>;

    /// 帧输出元素当前协商的宽高
    fn video_size(&self) -> Option<(u32, u32)>;

    fn set_volume(&self, _volume: f64) -> Result<()> {
        Err(PlayerError::Unsupported("volume"))
    }

    /// 在名为 `sink_name` 的帧输出元素上注册新帧回调
    fn install_sample_handler(&self, sink_name: &str, handler: SampleHandler) -> Result<()>;

    fn install_message_handler(&self, handler: MessageHandler);

    /// 解除所有回调（销毁前调用）
    fn detach_handlers(&self);

    fn description(&self) -> String;
}

/// 引擎工厂，同时负责进程级的库初始化/反初始化
pub trait EngineFactory: Send + Sync {
    fn library_load(&self) -> Result<()> {
        Ok(())
    }

    fn library_unload(&self) {}

    fn build(&self, descriptor: &PipelineDescriptor, sink_name: &str) -> Result<Arc<dyn Engine>>;

    fn name(&self) -> &'static str;
}

/// 进程级引擎运行库守卫：创建任何会话前加载，所有会话销毁后释放
pub struct EngineLibrary {
    factory: Arc<dyn EngineFactory>,
}

impl EngineLibrary {
    pub fn load(factory: Arc<dyn EngineFactory>) -> Result<Self> {
        factory.library_load()?;
        info!("{} ✅ 引擎运行库已加载: {}", log_ctx(), factory.name());
        Ok(Self { factory })
    }

    pub fn factory(&self) -> &dyn EngineFactory {
        &*self.factory
    }
}

impl Drop for EngineLibrary {
    fn drop(&mut self) {
        self.factory.library_unload();
        info!("{} 🗑️  引擎运行库已卸载: {}", log_ctx(), self.factory.name());
    }
}

/// 零拷贝导入得到的图像句柄（如 EGLImage）
pub type ImageHandle = u64;

/// 可选的零拷贝图像导入能力
pub trait ImageImporter: Send {
    fn import(&mut self, buffer: &Arc<dyn FrameBuffer>, width: u32, height: u32) -> Result<ImageHandle>;

    /// 注销所有已导入的图像
    fn unregister_all(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_extract_clamps_to_both_sides() {
        let buffer: Vec<u8> = (0u8..10).collect();
        let mut dest = [0u8; 4];
        assert_eq!(buffer.extract(8, &mut dest), 2);
        assert_eq!(&dest[..2], &[8, 9]);
        assert_eq!(buffer.extract(20, &mut dest), 0);
        assert_eq!(buffer.extract(0, &mut dest), 4);
        assert_eq!(dest, [0, 1, 2, 3]);
    }
}
