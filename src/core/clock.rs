use parking_lot::Mutex;
use std::time::Instant;

#[derive(Debug, Clone, Copy)]
enum Motion {
    /// 停在某个位置
    Halted { at_ms: i64 },
    /// 从 `anchor_ms` 开始、自 `since` 起按速率推进
    Running { anchor_ms: i64, since: Instant },
}

/// 播放时钟 - 按播放速率推进的媒体时间（毫秒）
///
/// 合成引擎用它回答位置查询、判断是否到达末尾。
pub struct PlaybackClock {
    inner: Mutex<ClockInner>,
}

struct ClockInner {
    motion: Motion,
    rate: f64,
}

impl ClockInner {
    fn position_ms(&self) -> i64 {
        match self.motion {
            Motion::Halted { at_ms } => at_ms,
            Motion::Running { anchor_ms, since } => {
                let elapsed = since.elapsed().as_secs_f64() * 1000.0;
                anchor_ms + (elapsed * self.rate) as i64
            }
        }
    }
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ClockInner {
                motion: Motion::Halted { at_ms: 0 },
                rate: 1.0,
            }),
        }
    }

    pub fn position_ms(&self) -> i64 {
        self.inner.lock().position_ms()
    }

    /// 从当前位置开始推进（已在推进时不变）
    pub fn start(&self) {
        let mut inner = self.inner.lock();
        if let Motion::Halted { at_ms } = inner.motion {
            inner.motion = Motion::Running {
                anchor_ms: at_ms,
                since: Instant::now(),
            };
        }
    }

    /// 冻结在当前位置
    pub fn halt(&self) {
        let mut inner = self.inner.lock();
        let at_ms = inner.position_ms();
        inner.motion = Motion::Halted { at_ms };
    }

    /// 跳到 `position_ms` 并改用新速率，保持原来的推进/冻结状态
    pub fn reposition(&self, position_ms: i64, rate: f64) {
        let mut inner = self.inner.lock();
        inner.rate = rate;
        inner.motion = match inner.motion {
            Motion::Halted { .. } => Motion::Halted { at_ms: position_ms },
            Motion::Running { .. } => Motion::Running {
                anchor_ms: position_ms,
                since: Instant::now(),
            },
        };
    }

    /// 冻结并回到 0
    pub fn rewind(&self) {
        self.inner.lock().motion = Motion::Halted { at_ms: 0 };
    }

    pub fn rate(&self) -> f64 {
        self.inner.lock().rate
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}
