//! GStreamer 后端：`parse::launch` 构建的管线 + appsink 新帧回调 + 总线同步回调。

use crate::core::{log_ctx, PipelineDescriptor, PlayerError, Result, TransportState};
use crate::player::engine::{
    Engine, EngineFactory, EngineMessage, FlowReturn, FrameBuffer, MessageHandler, Sample,
    SampleHandler, SeekRequest,
};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;

/// 管线中可选的音量元素名
const VOLUME_ELEMENT: &str = "volume";

/// 引擎的引用计数缓冲区，按需映射读取
struct GstFrameBuffer(gst::Buffer);

impl FrameBuffer for GstFrameBuffer {
    fn size(&self) -> usize {
        self.0.size()
    }

    fn extract(&self, offset: usize, dest: &mut [u8]) -> usize {
        let Ok(map) = self.0.map_readable() else {
            return 0;
        };
        let src = map.as_slice().get(offset..).unwrap_or(&[]);
        let n = src.len().min(dest.len());
        dest[..n].copy_from_slice(&src[..n]);
        n
    }
}

fn to_gst_state(state: TransportState) -> gst::State {
    match state {
        TransportState::Null => gst::State::Null,
        TransportState::Ready => gst::State::Ready,
        TransportState::Paused => gst::State::Paused,
        TransportState::Playing => gst::State::Playing,
    }
}

fn from_gst_state(state: gst::State) -> TransportState {
    match state {
        gst::State::Ready => TransportState::Ready,
        gst::State::Paused => TransportState::Paused,
        gst::State::Playing => TransportState::Playing,
        _ => TransportState::Null,
    }
}

fn convert_sample(appsink: &gst_app::AppSink) -> Sample {
    let Ok(sample) = appsink.pull_sample() else {
        return Sample::empty();
    };
    let dimensions = sample
        .caps()
        .and_then(|caps| gst_video::VideoInfo::from_caps(caps).ok())
        .map(|info| (info.width(), info.height()));
    Sample {
        buffer: sample
            .buffer_owned()
            .map(|buffer| Arc::new(GstFrameBuffer(buffer)) as Arc<dyn FrameBuffer>),
        dimensions,
    }
}

fn convert_message(message: &gst::Message) -> EngineMessage {
    use gst::MessageView;

    let source = message
        .src()
        .map(|s| s.path_string().to_string())
        .unwrap_or_default();
    match message.view() {
        MessageView::Eos(_) => EngineMessage::Eos,
        MessageView::Error(err) => EngineMessage::Error {
            source,
            message: err.error().to_string(),
            debug: err.debug().map(|d| d.to_string()),
        },
        MessageView::Warning(w) => EngineMessage::Warning {
            source,
            message: w.error().to_string(),
            debug: w.debug().map(|d| d.to_string()),
        },
        MessageView::StateChanged(change) => EngineMessage::StateChanged {
            old: from_gst_state(change.old()),
            new: from_gst_state(change.current()),
        },
        _ => EngineMessage::Other(format!("{:?}", message.type_())),
    }
}

pub struct GstEngine {
    pipeline: gst::Pipeline,
    appsink: Mutex<Option<gst_app::AppSink>>,
    description: String,
}

impl GstEngine {
    fn bus(&self) -> Result<gst::Bus> {
        self.pipeline
            .bus()
            .ok_or_else(|| PlayerError::Construction("管线没有消息总线".to_string()))
    }
}

impl Engine for GstEngine {
    fn set_state(&self, target: TransportState) -> Result<()> {
        self.pipeline
            .set_state(to_gst_state(target))
            .map_err(|_| PlayerError::StateTransition { target })?;
        Ok(())
    }

    fn wait_for_state(&self) -> Result<TransportState> {
        let (result, current, _pending) = self.pipeline.state(gst::ClockTime::NONE);
        result.map_err(|e| PlayerError::Preroll(e.to_string()))?;
        Ok(from_gst_state(current))
    }

    fn query_position_ns(&self) -> Option<u64> {
        self.pipeline
            .query_position::<gst::ClockTime>()
            .map(|t| t.nseconds())
    }

    fn query_duration_ns(&self) -> Option<u64> {
        self.pipeline
            .query_duration::<gst::ClockTime>()
            .map(|t| t.nseconds())
    }

    fn seek(&self, request: &SeekRequest) -> Result<()> {
        let mut flags = gst::SeekFlags::empty();
        if request.flush {
            flags |= gst::SeekFlags::FLUSH;
        }
        if request.key_unit {
            flags |= gst::SeekFlags::KEY_UNIT;
        }
        self.pipeline
            .seek(
                request.rate,
                flags,
                gst::SeekType::Set,
                gst::ClockTime::from_nseconds(request.position_ns),
                gst::SeekType::Set,
                gst::ClockTime::NONE,
            )
            .map_err(|e| PlayerError::SeekRejected(e.to_string()))
    }

    fn video_size(&self) -> Option<(u32, u32)> {
        let appsink = self.appsink.lock().clone()?;
        let caps = appsink.static_pad("sink")?.current_caps()?;
        let info = gst_video::VideoInfo::from_caps(&caps).ok()?;
        Some((info.width(), info.height()))
    }

    fn set_volume(&self, volume: f64) -> Result<()> {
        let element = self
            .pipeline
            .by_name(VOLUME_ELEMENT)
            .ok_or(PlayerError::Unsupported("volume"))?;
        element.set_property("volume", volume);
        Ok(())
    }

    fn install_sample_handler(&self, sink_name: &str, handler: SampleHandler) -> Result<()> {
        let appsink = self
            .pipeline
            .by_name(sink_name)
            .and_then(|element| element.downcast::<gst_app::AppSink>().ok())
            .ok_or_else(|| PlayerError::SinkNotFound(sink_name.to_string()))?;

        appsink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| match handler(convert_sample(appsink)) {
                    FlowReturn::Ok => Ok(gst::FlowSuccess::Ok),
                    FlowReturn::Error => Err(gst::FlowError::Error),
                })
                .build(),
        );
        *self.appsink.lock() = Some(appsink);
        Ok(())
    }

    fn install_message_handler(&self, handler: MessageHandler) {
        let bus = match self.bus() {
            Ok(bus) => bus,
            Err(e) => {
                warn!("{} ⚠️  无法注册总线回调: {}", log_ctx(), e);
                return;
            }
        };
        // 同步回调：消息在发送线程上处理，全部丢弃不进入异步队列
        bus.set_sync_handler(move |_bus, message| {
            handler(convert_message(message));
            gst::BusSyncReply::Drop
        });
    }

    fn detach_handlers(&self) {
        if let Some(appsink) = self.appsink.lock().take() {
            appsink.set_callbacks(gst_app::AppSinkCallbacks::builder().build());
        }
        if let Ok(bus) = self.bus() {
            bus.unset_sync_handler();
        }
        debug!("{} 回调已解除: {}", log_ctx(), self.description);
    }

    fn description(&self) -> String {
        self.description.clone()
    }
}

/// GStreamer 引擎工厂
#[derive(Default)]
pub struct GstEngineFactory;

impl GstEngineFactory {
    pub fn new() -> Self {
        Self
    }
}

impl EngineFactory for GstEngineFactory {
    fn library_load(&self) -> Result<()> {
        gst::init().map_err(|e| PlayerError::Construction(format!("GStreamer 初始化失败: {}", e)))?;
        info!("{} 🎬 GStreamer {}", log_ctx(), gst::version_string());
        Ok(())
    }

    fn library_unload(&self) {
        // 之后不能再调用任何 GStreamer API；由 EngineLibrary 保证所有会话已销毁
        unsafe { gst::deinit() };
    }

    fn build(&self, descriptor: &PipelineDescriptor, sink_name: &str) -> Result<Arc<dyn Engine>> {
        let description = descriptor.launch_line(sink_name);
        debug!("{} 解析管线: {}", log_ctx(), description);

        let pipeline = gst::parse::launch(&description)
            .map_err(|e| PlayerError::Construction(e.to_string()))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| PlayerError::Construction("解析结果不是 Pipeline".to_string()))?;

        Ok(Arc::new(GstEngine {
            pipeline,
            appsink: Mutex::new(None),
            description,
        }))
    }

    fn name(&self) -> &'static str {
        "gstreamer"
    }
}

impl Drop for GstEngine {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!("{} ⚠️  销毁时切换到 NULL 失败: {}", log_ctx(), e);
        }
    }
}
