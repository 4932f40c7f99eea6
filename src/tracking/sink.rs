use super::{DeltaKey, DeltaValue};

/// 聚合增量 Sink
///
/// 实现方负责把一批增量原子地累加到派生表
/// （存储层使用 upsert 累加，不做 read-modify-write）。
#[async_trait::async_trait]
pub trait AggregateSink: Send + Sync {
    async fn flush_deltas(&self, updates: Vec<(DeltaKey, DeltaValue)>) -> anyhow::Result<()>;
}
