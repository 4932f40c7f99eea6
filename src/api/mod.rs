//! HTTP API
//!
//! 路由布局：
//! - `POST /api/events`、`GET /api/events`（信标）— 事件摄入
//! - `/api/referrals` — referral registry
//! - `/api/analytics/...` — 只读分析 + rebuild
//! - `/health` — 探活

pub mod analytics;
pub mod error_code;
pub mod events;
pub mod health;
pub mod helpers;
pub mod referrals;
pub mod types;

use actix_web::web;

/// `/api` 下的全部业务路由
pub fn api_routes() -> actix_web::Scope {
    web::scope("/api")
        .service(events::event_routes())
        .service(referrals::referral_routes())
        .service(analytics::analytics_routes())
}
