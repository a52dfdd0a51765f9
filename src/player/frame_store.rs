use crate::core::{log_ctx, BYTES_PER_PIXEL};
use crate::player::engine::FrameBuffer;
use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use std::ops::Deref;
use std::sync::Arc;

/// 最新一帧的引用（不拷贝）
#[derive(Clone)]
pub struct PublishedFrame {
    pub buffer: Arc<dyn FrameBuffer>,
    pub width: u32,
    pub height: u32,
    /// 发布序号，从 1 开始
    pub sequence: u64,
}

struct StoreState {
    buffer: Option<Arc<dyn FrameBuffer>>,
    width: u32,
    height: u32,
    sequence: u64,
}

/// 帧缓冲区：保存最新一帧及其宽高
///
/// - 写者只有一个（新帧回调），读者任意多个
/// - 帧引用与宽高在同一把读写锁下更新，读者只会看到完整的旧帧或完整的新帧
/// - 像素拷贝使用独立的拷贝缓冲区（u32 像素），总是在状态锁之后获取，只在拷贝期间持有
/// - 没有消费者还持有上一次的视图时，拷贝缓冲区被复用；否则换一块新的
pub struct FrameStore {
    state: RwLock<StoreState>,
    pixels: Mutex<Arc<Vec<u32>>>,
}

/// `snapshot()` 返回的只读视图，不持有任何锁
#[derive(Clone)]
pub struct FrameView {
    pixels: Arc<Vec<u32>>,
    width: u32,
    height: u32,
    sequence: u64,
}

impl FrameView {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.pixels.as_slice())
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl Deref for FrameView {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_bytes()
    }
}

fn pixel_count(width: u32, height: u32) -> usize {
    width as usize * height as usize
}

impl FrameStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState {
                buffer: None,
                width: 0,
                height: 0,
                sequence: 0,
            }),
            pixels: Mutex::new(Arc::new(Vec::new())),
        }
    }

    /// 按引擎报告的初始尺寸分配像素缓冲区
    ///
    /// 之前持有的帧属于旧尺寸，一并释放（写锁释放之后），直到下一次发布前 `snapshot()` 返回 None。
    pub fn allocate(&self, width: u32, height: u32) {
        let previous = {
            let mut state = self.state.write();
            state.width = width;
            state.height = height;
            state.buffer.take()
        };
        drop(previous);
        *self.pixels.lock() = Arc::new(vec![0; pixel_count(width, height)]);
        info!("{} 📐 像素缓冲区已分配: {}x{}", log_ctx(), width, height);
    }

    /// 发布新帧（仅在生产者回调中调用），返回尺寸是否发生变化
    ///
    /// 旧帧在新帧安装完成、写锁释放之后才被释放。
    pub fn publish(&self, buffer: Arc<dyn FrameBuffer>, width: u32, height: u32) -> bool {
        let (previous, resized, old_size) = {
            let mut state = self.state.write();
            let old_size = (state.width, state.height);
            let resized = old_size != (width, height);
            state.width = width;
            state.height = height;
            state.sequence += 1;
            (state.buffer.replace(buffer), resized, old_size)
        };
        drop(previous);

        if resized {
            info!(
                "{} 📐 像素缓冲区尺寸变化: {}x{} -> {}x{}",
                log_ctx(),
                old_size.0,
                old_size.1,
                width,
                height
            );
        }
        resized
    }

    /// 把最新一帧提取到共享像素缓冲区，大小恰好为 `width*height*4`
    ///
    /// 从未发布过帧时返回 None。尺寸为 0 时返回空视图。
    pub fn snapshot(&self) -> Option<FrameView> {
        let state = self.state.read();
        let buffer = state.buffer.as_ref()?;
        let (width, height, sequence) = (state.width, state.height, state.sequence);
        let expected = pixel_count(width, height);

        let mut scratch = self.pixels.lock();
        if Arc::get_mut(&mut scratch).is_none() {
            // 上一次的视图还在消费者手里
            *scratch = Arc::new(vec![0; expected]);
        }
        let Some(pixels) = Arc::get_mut(&mut scratch) else {
            return None;
        };
        if pixels.len() != expected {
            // 尺寸变化后的第一次提取：先重新分配
            pixels.clear();
            pixels.resize(expected, 0);
            debug!("{} 像素缓冲区重新分配: {}x{}", log_ctx(), width, height);
        }

        let dest: &mut [u8] = bytemuck::cast_slice_mut(pixels.as_mut_slice());
        let copied = buffer.extract(0, dest);
        if copied < dest.len() {
            dest[copied..].fill(0);
        }
        let pixels = Arc::clone(&scratch);
        drop(scratch);
        drop(state);

        Some(FrameView {
            pixels,
            width,
            height,
            sequence,
        })
    }

    /// 最新一帧的引用（O(1)，不拷贝）
    pub fn latest(&self) -> Option<PublishedFrame> {
        let state = self.state.read();
        state.buffer.as_ref().map(|buffer| PublishedFrame {
            buffer: Arc::clone(buffer),
            width: state.width,
            height: state.height,
            sequence: state.sequence,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        let state = self.state.read();
        (state.width, state.height)
    }

    /// 当前尺寸对应的帧字节数
    pub fn frame_size(&self) -> usize {
        let (width, height) = self.dimensions();
        pixel_count(width, height) * BYTES_PER_PIXEL
    }

    pub fn has_frame(&self) -> bool {
        self.state.read().buffer.is_some()
    }

    /// 释放持有的最后一帧和像素缓冲区，宽高归零
    pub fn clear(&self) {
        let previous = {
            let mut state = self.state.write();
            state.width = 0;
            state.height = 0;
            state.buffer.take()
        };
        *self.pixels.lock() = Arc::new(Vec::new());
        if previous.is_some() {
            debug!("{} 🗑️  释放最后一帧", log_ctx());
        }
    }
}

impl Default for FrameStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn solid_frame(width: u32, height: u32, value: u8) -> Arc<dyn FrameBuffer> {
        Arc::new(vec![value; pixel_count(width, height) * BYTES_PER_PIXEL])
    }

    #[test]
    fn test_snapshot_empty_until_first_publish() {
        let store = FrameStore::new();
        store.allocate(4, 2);
        assert!(store.snapshot().is_none());
        assert!(store.latest().is_none());
        assert_eq!(store.frame_size(), 32);
    }

    #[test]
    fn test_publish_then_snapshot() {
        let store = FrameStore::new();
        store.allocate(2, 2);
        assert!(!store.publish(solid_frame(2, 2, 7), 2, 2));

        let view = store.snapshot().unwrap();
        assert_eq!((view.width(), view.height()), (2, 2));
        assert_eq!(view.len(), 16);
        assert!(view.iter().all(|b| *b == 7));
        assert_eq!(view.sequence(), 1);
    }

    #[test]
    fn test_resolution_change_resizes_next_snapshot() {
        let store = FrameStore::new();
        store.allocate(4, 4);
        store.publish(solid_frame(4, 4, 1), 4, 4);
        assert_eq!(store.snapshot().unwrap().len(), 64);

        assert!(store.publish(solid_frame(8, 2, 2), 8, 2));
        let view = store.snapshot().unwrap();
        assert_eq!((view.width(), view.height()), (8, 2));
        assert_eq!(view.len(), 8 * 2 * 4);
        assert!(view.iter().all(|b| *b == 2));
    }

    #[test]
    fn test_zero_sized_frame_does_not_panic() {
        let store = FrameStore::new();
        store.publish(Arc::new(Vec::new()), 0, 0);
        let view = store.snapshot().unwrap();
        assert_eq!(view.len(), 0);
        assert_eq!(view.width(), 0);
    }

    #[test]
    fn test_short_buffer_is_zero_filled_and_long_buffer_truncated() {
        let store = FrameStore::new();
        store.publish(Arc::new(vec![9u8; 6]), 2, 1);
        let view = store.snapshot().unwrap();
        assert_eq!(view.as_bytes(), &[9, 9, 9, 9, 9, 9, 0, 0]);
        drop(view);

        store.publish(Arc::new(vec![5u8; 100]), 1, 1);
        assert_eq!(store.snapshot().unwrap().as_bytes(), &[5, 5, 5, 5]);
    }

    #[test]
    fn test_previous_buffer_released_after_replace() {
        let store = FrameStore::new();
        let first = solid_frame(1, 1, 1);
        store.publish(Arc::clone(&first), 1, 1);
        assert_eq!(Arc::strong_count(&first), 2);
        store.publish(solid_frame(1, 1, 2), 1, 1);
        assert_eq!(Arc::strong_count(&first), 1);
    }

    #[test]
    fn test_clear_releases_frame() {
        let store = FrameStore::new();
        let frame = solid_frame(1, 1, 3);
        store.publish(Arc::clone(&frame), 1, 1);
        store.clear();
        assert!(!store.has_frame());
        assert!(store.snapshot().is_none());
        assert_eq!(Arc::strong_count(&frame), 1);
        assert_eq!(store.dimensions(), (0, 0));
    }

    #[test]
    fn test_allocate_releases_frame_of_previous_size() {
        let store = FrameStore::new();
        store.allocate(4, 4);
        let frame = solid_frame(4, 4, 1);
        store.publish(Arc::clone(&frame), 4, 4);

        store.allocate(2, 1);
        assert!(store.snapshot().is_none());
        assert_eq!(Arc::strong_count(&frame), 1);
        assert_eq!(store.dimensions(), (2, 1));

        store.publish(solid_frame(2, 1, 6), 2, 1);
        let view = store.snapshot().unwrap();
        assert_eq!(view.len(), 8);
        assert!(view.iter().all(|b| *b == 6));
    }

    #[test]
    fn test_views_outlive_store_operations() {
        let store = FrameStore::new();
        store.publish(solid_frame(2, 2, 1), 2, 2);
        let first = store.snapshot().unwrap();

        // 持有视图期间，其他读者、重新分配和清空都不会被阻塞
        store.publish(solid_frame(2, 2, 2), 2, 2);
        let second = store.snapshot().unwrap();
        store.allocate(3, 3);
        store.clear();

        assert!(first.iter().all(|b| *b == 1));
        assert!(second.iter().all(|b| *b == 2));
        assert_eq!(first.sequence(), 1);
        assert_eq!(second.sequence(), 2);
    }

    #[test]
    fn test_scratch_reused_once_view_released() {
        let store = FrameStore::new();
        store.publish(solid_frame(2, 2, 1), 2, 2);
        let first = store.snapshot().unwrap().as_bytes().as_ptr();
        let second = store.snapshot().unwrap().as_bytes().as_ptr();
        assert_eq!(first, second);
    }

    #[test]
    fn test_concurrent_publish_and_snapshot_never_tear() {
        // 帧内容 = 宽度值，读者验证字节数与内容属于同一次发布
        let store = Arc::new(FrameStore::new());
        let done = Arc::new(AtomicBool::new(false));
        let sizes: [(u32, u32); 3] = [(16, 9), (32, 18), (7, 3)];

        let producer = {
            let store = Arc::clone(&store);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                for i in 0..3000 {
                    let (w, h) = sizes[i % sizes.len()];
                    store.publish(solid_frame(w, h, w as u8), w, h);
                }
                done.store(true, Ordering::SeqCst);
            })
        };

        let readers: Vec<_> = (0..3)
            .map(|_| {
                let store = Arc::clone(&store);
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    let mut seen = 0;
                    while !done.load(Ordering::SeqCst) {
                        if let Some(view) = store.snapshot() {
                            let (w, h) = (view.width(), view.height());
                            assert!(sizes.contains(&(w, h)));
                            assert_eq!(view.len(), pixel_count(w, h) * BYTES_PER_PIXEL);
                            assert!(view.iter().all(|b| *b == w as u8));
                            seen += 1;
                        }
                    }
                    seen
                })
            })
            .collect();

        producer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        let last = store.snapshot().unwrap();
        assert_eq!(last.sequence(), 3000);
    }
}
