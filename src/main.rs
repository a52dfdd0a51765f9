use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, RecvTimeoutError};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use frame_player::core::{log_ctx, SessionConfig};
use frame_player::player::{
    ChannelObserver, EngineFactory, EngineLibrary, PlaybackSession, PlayerEvent,
    SyntheticEngineFactory, SyntheticOptions,
};

/// 状态输出间隔
const STATUS_INTERVAL: Duration = Duration::from_millis(500);

struct Args {
    config: Option<PathBuf>,
    uri: Option<String>,
    launch: Option<String>,
    repeat: bool,
    rate: Option<f64>,
    seconds: Option<u64>,
    synthetic: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = pico_args::Arguments::from_env();
    let parsed = Args {
        config: args.opt_value_from_str("--config")?,
        uri: args.opt_value_from_str("--uri")?,
        launch: args.opt_value_from_str("--launch")?,
        repeat: args.contains("--loop"),
        rate: args.opt_value_from_str("--rate")?,
        seconds: args.opt_value_from_str("--seconds")?,
        synthetic: args.contains("--synthetic"),
    };
    let rest = args.finish();
    if !rest.is_empty() {
        warn!("{} ⚠️  忽略未知参数: {:?}", log_ctx(), rest);
    }
    Ok(parsed)
}

fn load_config(args: &Args) -> Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::from_json_file(path)
            .with_context(|| format!("无法加载配置文件 {}", path.display()))?,
        None => SessionConfig::default(),
    };
    if let Some(uri) = &args.uri {
        config.source = Some(uri.clone());
        config.launch = false;
    }
    if let Some(line) = &args.launch {
        config.source = Some(line.clone());
        config.launch = true;
    }
    if args.repeat {
        config.auto_repeat = true;
    }
    if let Some(rate) = args.rate {
        config.playback_rate = rate;
    }
    Ok(config)
}

fn select_factory(synthetic: bool) -> Arc<dyn EngineFactory> {
    #[cfg(feature = "gstreamer")]
    if !synthetic {
        return Arc::new(frame_player::player::GstEngineFactory::new());
    }
    #[cfg(not(feature = "gstreamer"))]
    if !synthetic {
        warn!("{} ⚠️  未启用 gstreamer 特性，使用合成引擎", log_ctx());
    }
    Arc::new(SyntheticEngineFactory::new(SyntheticOptions {
        realtime: true,
        ..Default::default()
    }))
}

fn main() -> Result<()> {
    // 初始化日志
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        // GStreamer 绑定的日志较多，只保留警告
        .filter_module("gstreamer", log::LevelFilter::Warn)
        .init();

    info!("{} 🎬 Frame Player 启动", log_ctx());

    let args = parse_args()?;
    let config = load_config(&args)?;

    let library = EngineLibrary::load(select_factory(args.synthetic))?;

    let (tx, events) = unbounded();
    let session = PlaybackSession::new(
        library.factory(),
        &config,
        Arc::new(ChannelObserver::without_frames(tx)),
    );
    if let Some(e) = session.construction_error() {
        anyhow::bail!("会话创建失败: {}", e);
    }

    session.init().context("预加载失败")?;
    session.play().context("播放失败")?;
    if config.playback_rate != 1.0 {
        session.set_playback_rate(config.playback_rate)?;
    }
    if config.volume != 1.0 {
        if let Err(e) = session.set_volume(config.volume) {
            warn!("{} ⚠️  音量设置失败: {}", log_ctx(), e);
        }
    }

    let deadline = args.seconds.map(|s| Instant::now() + Duration::from_secs(s));
    let mut last_status = Instant::now();
    loop {
        // 位置查询同时驱动完成/重播逻辑
        session.get_current_position();

        match events.recv_timeout(Duration::from_millis(100)) {
            Ok(PlayerEvent::Completed) => {
                info!("{} 🏁 播放完成，退出", log_ctx());
                break;
            }
            Ok(PlayerEvent::ResolutionChanged { width, height }) => {
                info!("{} 📐 分辨率变化: {}x{}", log_ctx(), width, height);
            }
            Ok(PlayerEvent::Diagnostic(diagnostic)) if diagnostic.is_error() => {
                warn!("{} ⚠️  引擎错误，退出: {}", log_ctx(), diagnostic);
                break;
            }
            Ok(event) => info!("{} 📨 {:?}", log_ctx(), event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if last_status.elapsed() >= STATUS_INTERVAL {
            last_status = Instant::now();
            println!("{}", serde_json::to_string(&session.status())?);
            if let Some(frame) = session.get_frame_buffer() {
                info!(
                    "{} 🖼️  帧 #{}: {}x{} ({} 字节)",
                    log_ctx(),
                    frame.sequence(),
                    frame.width(),
                    frame.height(),
                    frame.len()
                );
            }
        }

        if deadline.is_some_and(|d| Instant::now() >= d) {
            info!("{} ⏱️  到达运行时长，退出", log_ctx());
            break;
        }
    }

    session.stop()?;
    // 会话必须先于运行库销毁
    drop(session);
    drop(library);
    Ok(())
}
