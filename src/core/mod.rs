// 核心数据结构和类型定义

pub mod types;
pub mod clock;
pub mod error;

pub use types::*;
pub use clock::*;
pub use error::*;

use std::process;
use std::thread;

/// 日志上下文：进程号 + 线程号（区分生产者回调线程与消费者线程）
pub fn log_ctx() -> String {
    format!("[pid:{}-tid:{:?}]", process::id(), thread::current().id())
}
