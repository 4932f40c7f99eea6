//! 聚合增量管理器
//!
//! 负责收集和刷盘归因增量，支持：
//! - 高并发增量合并（DashMap，同一行的增量在内存中先合并）
//! - 定时刷盘到存储后端
//! - 阈值触发刷盘
//! - 刷盘失败时增量恢复回缓冲区（不丢更新）
//!
//! 同一 (pitch, referral) 行的并发事件先在进程内合并为一条增量，
//! 再由存储层的原子 upsert 累加，两级都不存在 lost update。

use dashmap::DashMap;
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use tokio::sync::Mutex;
use tokio::time::{Duration, sleep};
use tracing::{debug, trace, warn};

use super::{AggregateSink, DeltaKey, DeltaValue};

/// 增量缓冲区，封装所有可变状态
struct DeltaBuffer {
    data: DashMap<DeltaKey, DeltaValue>,
    /// 缓冲的增量合并次数（用于阈值判断）
    total_deltas: AtomicUsize,
    /// 刷盘锁，防止并发刷盘
    flush_lock: Mutex<()>,
    /// 是否有 flush 任务待处理（防止重复 spawn）
    flush_pending: AtomicBool,
}

impl DeltaBuffer {
    fn new() -> Self {
        Self {
            data: DashMap::new(),
            total_deltas: AtomicUsize::new(0),
            flush_lock: Mutex::new(()),
            flush_pending: AtomicBool::new(false),
        }
    }

    /// 合并一批增量
    fn merge(&self, deltas: Vec<(DeltaKey, DeltaValue)>) -> usize {
        let mut added = 0;
        for (key, value) in deltas {
            added += value.weight();
            self.data
                .entry(key)
                .and_modify(|existing| existing.merge(&value))
                .or_insert(value);
        }
        self.total_deltas.fetch_add(added, Ordering::Relaxed) + added
    }

    /// 收集所有增量并清空缓冲区（逐个 remove 避免竞态）
    fn drain(&self) -> Vec<(DeltaKey, DeltaValue)> {
        let keys: Vec<DeltaKey> = self.data.iter().map(|r| r.key().clone()).collect();

        let mut updates = Vec::with_capacity(keys.len());
        let mut total_removed = 0;
        for key in keys {
            if let Some((k, v)) = self.data.remove(&key) {
                total_removed += v.weight();
                updates.push((k, v));
            }
        }

        if total_removed > 0 {
            self.total_deltas
                .fetch_update(Ordering::Release, Ordering::Relaxed, |current| {
                    Some(current.saturating_sub(total_removed))
                })
                .ok();
        }

        updates
    }

    /// 恢复数据到缓冲区（用于刷盘失败时的恢复）
    fn restore(&self, updates: Vec<(DeltaKey, DeltaValue)>) {
        let mut restored = 0;
        for (key, value) in updates {
            restored += value.weight();
            self.data
                .entry(key)
                .and_modify(|existing| existing.merge(&value))
                .or_insert(value);
        }
        self.total_deltas.fetch_add(restored, Ordering::Relaxed);
    }

    fn total(&self) -> usize {
        self.total_deltas.load(Ordering::Relaxed)
    }
}

/// 聚合管理器
///
/// 状态完全封装在结构体内部，便于测试和多实例使用。
#[derive(Clone)]
pub struct AggregateManager {
    buffer: Arc<DeltaBuffer>,
    sink: Arc<dyn AggregateSink>,
    flush_interval: Duration,
    max_deltas_before_flush: usize,
}

impl AggregateManager {
    pub fn new(
        sink: Arc<dyn AggregateSink>,
        flush_interval: Duration,
        max_deltas_before_flush: usize,
    ) -> Self {
        Self {
            buffer: Arc::new(DeltaBuffer::new()),
            sink,
            flush_interval,
            max_deltas_before_flush,
        }
    }

    /// 记录一批增量（线程安全，无锁阻塞）
    pub fn record(&self, deltas: Vec<(DeltaKey, DeltaValue)>) {
        if deltas.is_empty() {
            return;
        }

        let current_size = self.buffer.merge(deltas);
        trace!("AggregateManager: buffer size now {}", current_size);

        if current_size >= self.max_deltas_before_flush {
            // compare_exchange 防止任务风暴：只有成功置位的线程才 spawn
            if self
                .buffer
                .flush_pending
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                let buffer = Arc::clone(&self.buffer);
                let sink = Arc::clone(&self.sink);
                tokio::spawn(async move {
                    if let Ok(_guard) = buffer.flush_lock.try_lock() {
                        Self::flush_buffer(&buffer, &sink).await;
                    } else {
                        trace!("AggregateManager: flush already in progress, skipping");
                    }
                    buffer.flush_pending.store(false, Ordering::Release);
                });
            }
        }
    }

    /// 启动后台刷盘任务（作为异步方法运行）
    pub async fn start_background_task(&self) {
        loop {
            sleep(self.flush_interval).await;

            debug!("AggregateManager: triggering scheduled flush");
            if let Ok(_guard) = self.buffer.flush_lock.try_lock() {
                Self::flush_buffer(&self.buffer, &self.sink).await;
            } else {
                trace!("AggregateManager: flush already in progress, skipping scheduled flush");
            }
        }
    }

    /// 手动触发刷盘（阻塞直到完成）
    pub async fn flush(&self) {
        debug!("AggregateManager: manual flush triggered");
        let _guard = self.buffer.flush_lock.lock().await;
        Self::flush_buffer(&self.buffer, &self.sink).await;
    }

    async fn flush_buffer(buffer: &DeltaBuffer, sink: &Arc<dyn AggregateSink>) {
        let updates = buffer.drain();

        if updates.is_empty() {
            trace!("AggregateManager: no deltas to flush");
            return;
        }

        let count = updates.len();
        match sink.flush_deltas(updates.clone()).await {
            Ok(_) => {
                debug!("AggregateManager: flushed {} delta rows", count);
            }
            Err(e) => {
                // 刷盘失败，恢复数据到 buffer；事件日志仍是事实来源，
                // 最坏情况可以整体 rebuild
                buffer.restore(updates);
                warn!(
                    "AggregateManager: flush_deltas failed: {}, {} rows restored to buffer",
                    e, count
                );
            }
        }
    }

    /// 当前缓冲的增量合并次数（用于监控）
    pub fn buffer_size(&self) -> usize {
        self.buffer.total()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::{ChainNode, Counts, EventKind, compute_deltas};
    use chrono::Utc;

    struct MockSink {
        flushed: std::sync::Mutex<Vec<(DeltaKey, DeltaValue)>>,
        fail_next: AtomicBool,
    }

    impl MockSink {
        fn new() -> Self {
            Self {
                flushed: std::sync::Mutex::new(Vec::new()),
                fail_next: AtomicBool::new(false),
            }
        }

        fn own_views_for(&self, referral_id: i64) -> i64 {
            self.flushed
                .lock()
                .unwrap()
                .iter()
                .filter(|(k, _)| {
                    matches!(k, DeltaKey::ChainNode { referral_id: id } if *id == referral_id)
                })
                .map(|(_, v)| v.own.views)
                .sum()
        }
    }

    #[async_trait::async_trait]
    impl AggregateSink for MockSink {
        async fn flush_deltas(&self, updates: Vec<(DeltaKey, DeltaValue)>) -> anyhow::Result<()> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                anyhow::bail!("simulated sink failure");
            }
            self.flushed.lock().unwrap().extend(updates);
            Ok(())
        }
    }

    fn view_delta(referral_id: i64) -> Vec<(DeltaKey, DeltaValue)> {
        let chain = vec![ChainNode {
            referral_id,
            pitch_id: "p1".to_string(),
            supporter_id: "s1".to_string(),
            depth: 0,
        }];
        compute_deltas(EventKind::PitchViewed, "p1", Utc::now(), &chain, false)
    }

    #[tokio::test]
    async fn test_record_and_flush() {
        let sink = Arc::new(MockSink::new());
        let manager = AggregateManager::new(
            Arc::clone(&sink) as Arc<dyn AggregateSink>,
            Duration::from_secs(60),
            100_000,
        );

        manager.record(view_delta(1));
        manager.record(view_delta(1));
        // 每次 record 产生 3 条增量（chain node / supporter / daily），
        // 合并后行数变少但阈值计数照记
        assert_eq!(manager.buffer_size(), 6);

        manager.flush().await;

        assert_eq!(manager.buffer_size(), 0);
        // 同一行的两个增量在缓冲区合并为一条
        assert_eq!(sink.own_views_for(1), 2);
    }

    /// 100 个并发 view 事件在一个 referral 上，own_views 恰好 100
    #[tokio::test]
    async fn test_concurrent_views_no_lost_updates() {
        let sink = Arc::new(MockSink::new());
        let manager = Arc::new(AggregateManager::new(
            Arc::clone(&sink) as Arc<dyn AggregateSink>,
            Duration::from_secs(60),
            100_000,
        ));

        const NUM_TASKS: usize = 100;

        let mut handles = vec![];
        for _ in 0..NUM_TASKS {
            let mgr = Arc::clone(&manager);
            handles.push(tokio::spawn(async move {
                mgr.record(view_delta(7));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        manager.flush().await;
        assert_eq!(sink.own_views_for(7), NUM_TASKS as i64);
    }

    /// 并发 record + flush 交错不丢增量
    #[tokio::test]
    async fn test_concurrent_record_and_flush() {
        let sink = Arc::new(MockSink::new());
        let manager = Arc::new(AggregateManager::new(
            Arc::clone(&sink) as Arc<dyn AggregateSink>,
            Duration::from_secs(60),
            100_000,
        ));

        const NUM_TASKS: usize = 10;
        const RECORDS_PER_TASK: usize = 200;

        let mut handles = vec![];
        for _ in 0..NUM_TASKS {
            let mgr = Arc::clone(&manager);
            handles.push(tokio::spawn(async move {
                for _ in 0..RECORDS_PER_TASK {
                    mgr.record(view_delta(42));
                    if rand::random::<u8>() < 10 {
                        tokio::task::yield_now().await;
                    }
                }
            }));
        }

        let mgr_flush = Arc::clone(&manager);
        let flush_handle = tokio::spawn(async move {
            for _ in 0..5 {
                tokio::time::sleep(Duration::from_millis(5)).await;
                mgr_flush.flush().await;
            }
        });

        for handle in handles {
            handle.await.unwrap();
        }
        flush_handle.await.unwrap();
        manager.flush().await;

        assert_eq!(sink.own_views_for(42), (NUM_TASKS * RECORDS_PER_TASK) as i64);
    }

    /// 刷盘失败时增量恢复，下一次刷盘补上
    #[tokio::test]
    async fn test_failed_flush_restores_buffer() {
        let sink = Arc::new(MockSink::new());
        let manager = AggregateManager::new(
            Arc::clone(&sink) as Arc<dyn AggregateSink>,
            Duration::from_secs(60),
            100_000,
        );

        manager.record(view_delta(9));
        sink.fail_next.store(true, Ordering::SeqCst);
        manager.flush().await;

        // 失败后增量仍在缓冲区
        assert!(manager.buffer_size() > 0);
        assert_eq!(sink.own_views_for(9), 0);

        manager.flush().await;
        assert_eq!(sink.own_views_for(9), 1);
        assert_eq!(manager.buffer_size(), 0);
    }

    #[test]
    fn test_delta_value_merge_keeps_latest_activity() {
        let earlier = Utc::now();
        let later = earlier + chrono::Duration::seconds(30);

        let mut a = DeltaValue {
            own: Counts {
                views: 1,
                ..Counts::default()
            },
            last_activity_at: Some(earlier),
            ..DeltaValue::default()
        };
        let b = DeltaValue {
            own: Counts {
                views: 2,
                ..Counts::default()
            },
            last_activity_at: Some(later),
            ..DeltaValue::default()
        };

        a.merge(&b);
        assert_eq!(a.own.views, 3);
        assert_eq!(a.last_activity_at, Some(later));
        // 合并后的权重是两条增量之和，drain 时按它扣回阈值计数
        assert_eq!(a.weight(), 2);
    }
}
