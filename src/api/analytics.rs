//! Analytics 只读端点 + rebuild

use std::sync::Arc;

use actix_web::{Responder, web};
use serde::Deserialize;
use tracing::info;

use crate::services::AnalyticsService;
use crate::storage::SeaOrmStorage;
use crate::tracking::rebuild::rebuild_pitch;

use super::helpers::api_result;

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    /// `7d` / `30d` 预设
    pub range: Option<String>,
    /// 显式起止日期（YYYY-MM-DD），优先于 `range`
    #[serde(alias = "start_date", alias = "startDate")]
    pub start: Option<String>,
    #[serde(alias = "end_date", alias = "endDate")]
    pub end: Option<String>,
}

impl RangeQuery {
    /// 合成传给 service 的范围参数；只给一端的显式日期会在解析时报错
    fn selector(&self) -> Option<String> {
        match (&self.start, &self.end) {
            (None, None) => self.range.clone(),
            (start, end) => Some(format!(
                "{}..{}",
                start.as_deref().unwrap_or(""),
                end.as_deref().unwrap_or("")
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SupportersQuery {
    pub limit: Option<usize>,
    /// 接受但不参与排序（榜单是终身累计值）；非法值照常报错
    pub range: Option<String>,
}

const DEFAULT_SUPPORTER_LIMIT: usize = 10;
const MAX_SUPPORTER_LIMIT: usize = 100;

/// GET /analytics/{pitch_id}/funnel
pub async fn get_funnel(
    service: web::Data<Arc<AnalyticsService>>,
    path: web::Path<String>,
    query: web::Query<RangeQuery>,
) -> impl Responder {
    let range = query.selector();
    api_result(service.funnel(&path.into_inner(), range.as_deref()).await)
}

/// GET /analytics/{pitch_id}/viral
pub async fn get_viral(
    service: web::Data<Arc<AnalyticsService>>,
    path: web::Path<String>,
    query: web::Query<RangeQuery>,
) -> impl Responder {
    let range = query.selector();
    api_result(service.viral(&path.into_inner(), range.as_deref()).await)
}

/// GET /analytics/{pitch_id}/supporters
pub async fn get_top_supporters(
    service: web::Data<Arc<AnalyticsService>>,
    path: web::Path<String>,
    query: web::Query<SupportersQuery>,
) -> impl Responder {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_SUPPORTER_LIMIT)
        .clamp(1, MAX_SUPPORTER_LIMIT);
    api_result(
        service
            .top_supporters(&path.into_inner(), query.range.as_deref(), limit)
            .await,
    )
}

/// GET /analytics/{pitch_id}/kpis
pub async fn get_kpis(
    service: web::Data<Arc<AnalyticsService>>,
    path: web::Path<String>,
    query: web::Query<RangeQuery>,
) -> impl Responder {
    let range = query.selector();
    api_result(service.kpis(&path.into_inner(), range.as_deref()).await)
}

/// GET /analytics/{pitch_id}/channels
pub async fn get_channels(
    service: web::Data<Arc<AnalyticsService>>,
    path: web::Path<String>,
    query: web::Query<RangeQuery>,
) -> impl Responder {
    let range = query.selector();
    api_result(service.channels(&path.into_inner(), range.as_deref()).await)
}

/// GET /analytics/user/{user_id}/summary
pub async fn get_user_summary(
    service: web::Data<Arc<AnalyticsService>>,
    path: web::Path<String>,
    query: web::Query<RangeQuery>,
) -> impl Responder {
    let range = query.selector();
    api_result(
        service
            .user_summary(&path.into_inner(), range.as_deref())
            .await,
    )
}

/// POST /analytics/{pitch_id}/rebuild
///
/// 清掉派生表并从事件日志重放。运维端点，同步执行。
pub async fn post_rebuild(
    storage: web::Data<Arc<SeaOrmStorage>>,
    path: web::Path<String>,
) -> impl Responder {
    let pitch_id = path.into_inner();
    info!("Rebuild requested for pitch {}", pitch_id);
    api_result(rebuild_pitch(storage.get_ref(), &pitch_id).await)
}

/// analytics 路由 `/analytics`
pub fn analytics_routes() -> actix_web::Scope {
    web::scope("/analytics")
        .route("/user/{user_id}/summary", web::get().to(get_user_summary))
        .route("/{pitch_id}/funnel", web::get().to(get_funnel))
        .route("/{pitch_id}/viral", web::get().to(get_viral))
        .route("/{pitch_id}/supporters", web::get().to(get_top_supporters))
        .route("/{pitch_id}/kpis", web::get().to(get_kpis))
        .route("/{pitch_id}/channels", web::get().to(get_channels))
        .route("/{pitch_id}/rebuild", web::post().to(post_rebuild))
}
