use crate::core::{log_ctx, PlayerError, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// 每像素字节数（打包 RGBA）
pub const BYTES_PER_PIXEL: usize = 4;

/// 时长/位置不可用时的哨兵值
pub const UNKNOWN_TIME_MS: i64 = -1;

/// 默认的帧输出元素名
pub const DEFAULT_SINK_NAME: &str = "sink";

/// 固定的共享内存采集管线：shmsrc → videoconvert → RGBA → appsink
pub const SHM_CAPTURE_PIPELINE: &str = "shmsrc socket-path=/tmp/shmsock \
     ! video/x-raw,format=I420,width=1280,height=720,framerate=30/1 \
     ! videoconvert ! video/x-raw,format=RGBA \
     ! appsink name=sink emit-signals=true sync=false";

/// 引擎的粗粒度状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    /// 没有引擎
    Null,
    /// 引擎已构建，尚未预加载
    Ready,
    /// 已预加载 / 已暂停
    Paused,
    Playing,
}

/// 管线描述：媒体位置或完整的 launch 描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineDescriptor {
    /// 已规范化的 URI，由引擎展开为解码管线
    Location(String),
    /// 完整的管线描述（必须包含帧输出元素）
    Launch(String),
}

impl PipelineDescriptor {
    /// 从路径或 URI 字符串创建（尽力规范化）
    pub fn from_location(location: &str) -> Self {
        PipelineDescriptor::Location(normalize_location(location))
    }

    pub fn launch(line: impl Into<String>) -> Self {
        PipelineDescriptor::Launch(line.into())
    }

    /// 固定的共享内存采集拓扑
    pub fn shm_capture() -> Self {
        PipelineDescriptor::Launch(SHM_CAPTURE_PIPELINE.to_string())
    }

    /// 生成引擎可解析的管线描述
    pub fn launch_line(&self, sink_name: &str) -> String {
        match self {
            PipelineDescriptor::Location(uri) => {
                let escaped = uri.replace('\\', "\\\\").replace('"', "\\\"");
                format!(
                    "uridecodebin uri=\"{}\" ! videoconvert ! video/x-raw,format=RGBA \
                     ! appsink name={} emit-signals=true sync=false",
                    escaped, sink_name
                )
            }
            PipelineDescriptor::Launch(line) => line.clone(),
        }
    }
}

impl fmt::Display for PipelineDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineDescriptor::Location(uri) => write!(f, "{}", uri),
            PipelineDescriptor::Launch(line) => write!(f, "launch({})", line),
        }
    }
}

/// 是否为合法 URI（协议名 + ':'），单字母协议视为 Windows 盘符
pub fn is_valid_uri(location: &str) -> bool {
    let Some((scheme, _)) = location.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    let starts_alpha = chars.next().map(|c| c.is_ascii_alphabetic()).unwrap_or(false);
    starts_alpha
        && scheme.len() >= 2
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
}

/// 把本地路径转换为 file:// URI；合法 URI 原样返回，转换失败时原样透传
pub fn normalize_location(location: &str) -> String {
    if is_valid_uri(location) {
        return location.to_string();
    }

    let path = Path::new(location);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(dir) => dir.join(path),
            Err(e) => {
                warn!("{} ⚠️  无法获取当前目录，原样使用 {}: {}", log_ctx(), location, e);
                return location.to_string();
            }
        }
    };

    match url::Url::from_file_path(&absolute) {
        Ok(uri) => uri.to_string(),
        Err(()) => {
            warn!("{} ⚠️  无法打开 {}，原样使用", log_ctx(), location);
            location.to_string()
        }
    }
}

/// 会话配置（可从 JSON 文件加载）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// 媒体位置或 launch 描述；None 表示固定的共享内存采集管线
    pub source: Option<String>,
    /// source 是否为完整的 launch 描述
    pub launch: bool,
    /// 帧输出元素名
    pub sink_name: String,
    /// EOS 后自动从头播放
    pub auto_repeat: bool,
    pub volume: f64,
    pub playback_rate: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            source: None,
            launch: false,
            sink_name: DEFAULT_SINK_NAME.to_string(),
            auto_repeat: false,
            volume: 1.0,
            playback_rate: 1.0,
        }
    }
}

impl SessionConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// 配置对应的管线描述
    pub fn descriptor(&self) -> PipelineDescriptor {
        match &self.source {
            None => PipelineDescriptor::shm_capture(),
            Some(line) if self.launch => PipelineDescriptor::launch(line.clone()),
            Some(location) => PipelineDescriptor::from_location(location),
        }
    }

    /// 校验数值字段
    pub fn validate(&self) -> Result<()> {
        if !(self.playback_rate > 0.0) {
            return Err(PlayerError::InvalidArgument(format!(
                "playback_rate 必须为正数: {}",
                self.playback_rate
            )));
        }
        if self.sink_name.is_empty() {
            return Err(PlayerError::InvalidArgument("sink_name 不能为空".to_string()));
        }
        Ok(())
    }
}

/// 诊断级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    Warning,
    Error,
}

/// 管线消息通道上报的警告/错误
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDiagnostic {
    pub severity: DiagnosticSeverity,
    /// 产生消息的元素名
    pub source: String,
    pub message: String,
    pub details: Option<String>,
}

impl StreamDiagnostic {
    pub fn is_error(&self) -> bool {
        self.severity == DiagnosticSeverity::Error
    }
}

impl fmt::Display for StreamDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            DiagnosticSeverity::Warning => "WARNING",
            DiagnosticSeverity::Error => "ERROR",
        };
        write!(f, "{} from {}: {}", level, self.source, self.message)
    }
}

/// 会话状态快照（供 UI / 日志读取）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub state: TransportState,
    pub position: i64,          // 当前位置（毫秒），-1 表示未知
    pub duration: i64,          // 总时长（毫秒），-1 表示未知
    pub playback_rate: f64,
    pub volume: f64,
    pub width: u32,
    pub height: u32,
    pub auto_repeat: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_uri() {
        assert!(is_valid_uri("file:///tmp/a.mp4"));
        assert!(is_valid_uri("rtsp://camera.local/stream"));
        assert!(!is_valid_uri("/tmp/a.mp4"));
        assert!(!is_valid_uri("C:\\videos\\a.mp4"));
        assert!(!is_valid_uri("1http://x"));
    }

    #[test]
    fn test_normalize_absolute_path() {
        assert_eq!(normalize_location("/tmp/a b.mp4"), "file:///tmp/a%20b.mp4");
        assert_eq!(normalize_location("http://host/v.m3u8"), "http://host/v.m3u8");
    }

    #[test]
    fn test_normalize_relative_path() {
        let uri = normalize_location("clip.mp4");
        assert!(uri.starts_with("file:///"));
        assert!(uri.ends_with("/clip.mp4"));
    }

    #[test]
    fn test_location_launch_line_names_sink() {
        let line = PipelineDescriptor::Location("file:///a.mp4".into()).launch_line("out");
        assert!(line.starts_with("uridecodebin uri=\"file:///a.mp4\""));
        assert!(line.contains("appsink name=out"));
        assert!(line.contains("format=RGBA"));
    }

    #[test]
    fn test_config_defaults_and_json() {
        let config = SessionConfig::from_json_str(r#"{ "source": "/tmp/x.mp4", "auto_repeat": true }"#).unwrap();
        assert_eq!(config.sink_name, DEFAULT_SINK_NAME);
        assert!(config.auto_repeat);
        assert_eq!(config.playback_rate, 1.0);
        assert_eq!(
            config.descriptor(),
            PipelineDescriptor::Location("file:///tmp/x.mp4".into())
        );
        assert_eq!(SessionConfig::default().descriptor(), PipelineDescriptor::shm_capture());
    }

    #[test]
    fn test_config_validate_rejects_bad_rate() {
        let config = SessionConfig { playback_rate: 0.0, ..Default::default() };
        assert!(matches!(config.validate(), Err(PlayerError::InvalidArgument(_))));
    }

    #[test]
    fn test_diagnostic_display() {
        let diag = StreamDiagnostic {
            severity: DiagnosticSeverity::Warning,
            source: "decoder0".into(),
            message: "late frame".into(),
            details: None,
        };
        assert_eq!(diag.to_string(), "WARNING from decoder0: late frame");
        assert!(!diag.is_error());
    }
}
