use std::sync::{Arc, OnceLock};
use tracing::trace;

use super::manager::AggregateManager;

pub static GLOBAL_AGGREGATE_MANAGER: OnceLock<Arc<AggregateManager>> = OnceLock::new();

/// 初始化全局聚合管理器（只允许初始化一次）
pub fn set_global_aggregate_manager(manager: Arc<AggregateManager>) {
    if GLOBAL_AGGREGATE_MANAGER.set(manager).is_err() {
        panic!("GLOBAL_AGGREGATE_MANAGER has already been set");
    }
}

/// 获取全局聚合管理器
pub fn get_aggregate_manager() -> Option<&'static Arc<AggregateManager>> {
    match GLOBAL_AGGREGATE_MANAGER.get() {
        Some(manager) => Some(manager),
        None => {
            trace!("GLOBAL_AGGREGATE_MANAGER has not been initialized yet");
            None
        }
    }
}
