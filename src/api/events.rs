//! 事件摄入端点
//!
//! 两个入口、一份语义：
//! - `POST /events`：JSON body，正常客户端用
//! - `GET /events`（别名 `/events/beacon`）：query string
//!   （`?event=&pitch=&ref=&session=&meta=` 的短参数名也接受），
//!   给 `navigator.sendBeacon` 不可用 / 页面卸载场景的图片信标用；
//!   信标端总是回 200，失败只体现在响应体里（调用方根本不读响应）
//!
//! 两者都落到 [`IngestService::ingest`]。

use std::sync::Arc;

use actix_web::{HttpResponse, Responder, web};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::services::{IngestRequest, IngestService};

use super::helpers::{error_from_pitchlink, success_response};

/// POST body / beacon query 的公共形状
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    #[serde(alias = "pitch_id", alias = "pitch")]
    pub pitch_id: String,
    #[serde(alias = "event", alias = "event_type")]
    pub event_type: String,
    #[serde(alias = "referral_id", alias = "ref")]
    pub referral_id: Option<i64>,
    pub platform: Option<String>,
    #[serde(alias = "session_id", alias = "session")]
    pub session_id: Option<String>,
    #[serde(alias = "visitor_id")]
    pub visitor_id: Option<String>,
    #[serde(alias = "occurred_at")]
    pub occurred_at: Option<DateTime<Utc>>,
    #[serde(alias = "meta")]
    pub metadata: Option<serde_json::Value>,
}

impl EventPayload {
    fn into_request(self) -> IngestRequest {
        IngestRequest {
            pitch_id: self.pitch_id,
            event_type: self.event_type,
            referral_id: self.referral_id,
            platform: self.platform,
            session_id: self.session_id,
            visitor_id: self.visitor_id,
            occurred_at: self.occurred_at,
            metadata: self.metadata,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TrackResult {
    success: bool,
    tracked: bool,
    deduplicated: bool,
    event_id: Option<i64>,
    method: &'static str,
}

/// POST /events
pub async fn post_event(
    ingest: web::Data<Arc<IngestService>>,
    payload: web::Json<EventPayload>,
) -> impl Responder {
    match ingest.ingest(payload.into_inner().into_request()).await {
        Ok(outcome) => success_response(TrackResult {
            success: true,
            tracked: outcome.tracked,
            deduplicated: outcome.deduplicated,
            event_id: outcome.event_id,
            method: "post",
        }),
        Err(e) => {
            debug!("Event rejected: {}", e);
            error_from_pitchlink(&e)
        }
    }
}

/// GET /events（别名 /events/beacon）
///
/// 信标端点不报 4xx/5xx：图片信标会把非 200 当成加载失败重试，
/// 丢弃决定只写进响应体和日志。
pub async fn beacon_event(
    ingest: web::Data<Arc<IngestService>>,
    query: web::Query<EventPayload>,
) -> impl Responder {
    let result = match ingest.ingest(query.into_inner().into_request()).await {
        Ok(outcome) => TrackResult {
            success: true,
            tracked: outcome.tracked,
            deduplicated: outcome.deduplicated,
            event_id: outcome.event_id,
            method: "beacon",
        },
        Err(e) => {
            debug!("Beacon event dropped: {}", e);
            TrackResult {
                success: false,
                tracked: false,
                deduplicated: false,
                event_id: None,
                method: "beacon",
            }
        }
    };

    HttpResponse::Ok()
        .append_header(("Cache-Control", "no-store"))
        .json(result)
}

/// 事件路由 `/events`
pub fn event_routes() -> actix_web::Scope {
    web::scope("/events")
        .route("", web::post().to(post_event))
        .route("", web::get().to(beacon_event))
        .route("/beacon", web::get().to(beacon_event))
}
