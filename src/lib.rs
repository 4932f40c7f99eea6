//! # pitchlink
//!
//! Referral 归因与分析引擎：
//! - **registry** — supporter 的分享链接注册，多级 parent 指针组成归因森林
//! - **ingest** — 交互事件摄入（POST + beacon 双入口），append-only 事件日志
//! - **tracking** — 进程内增量缓冲 + 原子 upsert 刷盘，无 lost update
//! - **analytics** — 漏斗、病毒系数、supporter 榜单、KPI 对比、渠道分解
//!
//! 事件日志是唯一事实来源，所有派生聚合都可以随时 rebuild。

pub mod api;
pub mod config;
pub mod errors;
pub mod services;
pub mod storage;
pub mod tracking;
