//! Referral registry 端点

use std::sync::Arc;

use actix_web::{Responder, web};
use serde::{Deserialize, Serialize};

use crate::services::{CreateReferralRequest, ReferralService, ReferralView};

use super::helpers::{api_result, error_from_pitchlink, success_response};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReferralPayload {
    #[serde(alias = "pitch_id")]
    pub pitch_id: String,
    #[serde(alias = "supporter_id")]
    pub supporter_id: String,
    #[serde(alias = "parent_referral_id")]
    pub parent_referral_id: Option<i64>,
    pub platform: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateReferralResult {
    referral: ReferralView,
    /// false 表示命中已有行（重复创建幂等返回）
    created: bool,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(alias = "pitchId")]
    pub pitch_id: String,
}

/// POST /referrals
pub async fn create_referral(
    service: web::Data<Arc<ReferralService>>,
    payload: web::Json<CreateReferralPayload>,
) -> impl Responder {
    let p = payload.into_inner();
    let result = service
        .create_or_get(CreateReferralRequest {
            pitch_id: p.pitch_id,
            supporter_id: p.supporter_id,
            parent_referral_id: p.parent_referral_id,
            platform: p.platform,
        })
        .await;

    match result {
        Ok(r) => {
            let status = if r.created {
                actix_web::http::StatusCode::CREATED
            } else {
                actix_web::http::StatusCode::OK
            };
            let body = CreateReferralResult {
                referral: ReferralView::from(r.referral),
                created: r.created,
            };
            super::helpers::json_response(status, super::error_code::ErrorCode::Success, "OK", Some(body))
        }
        Err(e) => error_from_pitchlink(&e),
    }
}

/// GET /referrals/{id}
pub async fn get_referral(
    service: web::Data<Arc<ReferralService>>,
    path: web::Path<i64>,
) -> impl Responder {
    api_result(
        service
            .get(path.into_inner())
            .await
            .map(ReferralView::from),
    )
}

/// DELETE /referrals/{id} — 停用（历史计数保留）
pub async fn deactivate_referral(
    service: web::Data<Arc<ReferralService>>,
    path: web::Path<i64>,
) -> impl Responder {
    match service.deactivate(path.into_inner()).await {
        Ok(()) => success_response(serde_json::json!({ "deactivated": true })),
        Err(e) => error_from_pitchlink(&e),
    }
}

/// GET /referrals/{id}/chain — root 到该节点的归因路径
pub async fn get_chain(
    service: web::Data<Arc<ReferralService>>,
    path: web::Path<i64>,
) -> impl Responder {
    api_result(service.chain(path.into_inner()).await)
}

/// GET /referrals?pitch_id=...
pub async fn list_referrals(
    service: web::Data<Arc<ReferralService>>,
    query: web::Query<ListQuery>,
) -> impl Responder {
    api_result(service.list_for_pitch(&query.pitch_id).await)
}

/// referral 路由 `/referrals`
pub fn referral_routes() -> actix_web::Scope {
    web::scope("/referrals")
        .route("", web::post().to(create_referral))
        .route("", web::get().to(list_referrals))
        .route("/{id}", web::get().to(get_referral))
        .route("/{id}", web::delete().to(deactivate_referral))
        .route("/{id}/chain", web::get().to(get_chain))
}
