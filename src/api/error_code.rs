//! 统一 API 错误码定义

use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::errors::PitchlinkError;

/// API 错误码枚举
///
/// 使用 serde_repr 序列化为数字。按千位分域：
/// - 0: 成功
/// - 1000-1099: 通用错误
/// - 3000-3099: referral registry 错误
/// - 4000-4099: 事件摄入错误
/// - 6000-6099: analytics 错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(i32)]
pub enum ErrorCode {
    // 成功
    Success = 0,

    // 通用错误 1000-1099
    BadRequest = 1000,
    NotFound = 1004,
    InternalServerError = 1005,
    InvalidDateFormat = 1012,
    ServiceUnavailable = 1030,

    // referral registry 错误 3000-3099
    InvalidPitch = 3000,
    CycleDetected = 3001,
    ChainTooDeep = 3002,

    // 事件摄入错误 4000-4099
    UnknownPitch = 4000,
    InvalidEvent = 4001,

    // analytics 错误 6000-6099
    AnalyticsQueryFailed = 6000,
}

impl From<&PitchlinkError> for ErrorCode {
    fn from(err: &PitchlinkError) -> Self {
        match err {
            PitchlinkError::Validation(_) => ErrorCode::BadRequest,
            PitchlinkError::NotFound(_) => ErrorCode::NotFound,
            PitchlinkError::DateParse(_) => ErrorCode::InvalidDateFormat,
            PitchlinkError::InvalidPitch(_) => ErrorCode::InvalidPitch,
            PitchlinkError::CycleDetected(_) => ErrorCode::CycleDetected,
            PitchlinkError::ChainTooDeep(_) => ErrorCode::ChainTooDeep,
            PitchlinkError::UnknownPitch(_) => ErrorCode::UnknownPitch,
            PitchlinkError::Collaborator(_) => ErrorCode::ServiceUnavailable,
            _ => ErrorCode::InternalServerError,
        }
    }
}
