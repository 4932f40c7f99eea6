use std::fmt;

use actix_web::http::StatusCode;

#[derive(Debug, Clone)]
pub enum PitchlinkError {
    DatabaseConfig(String),
    DatabaseConnection(String),
    DatabaseOperation(String),
    Validation(String),
    NotFound(String),
    Serialization(String),
    DateParse(String),
    /// Registry: pitch 不存在或已停用，创建请求被拒绝
    InvalidPitch(String),
    /// Registry: 提议的 parent 链已包含该 supporter，创建请求被拒绝
    CycleDetected(String),
    /// Ingestor: owner 解析失败，事件被丢弃（不重试）
    UnknownPitch(String),
    /// Chain walker: 超过硬跳数上限，归因在上限处截断
    ChainTooDeep(String),
    /// Collaborator 调用失败（owner lookup 等）
    Collaborator(String),
}

impl PitchlinkError {
    /// 获取错误代码
    pub fn code(&self) -> &'static str {
        match self {
            PitchlinkError::DatabaseConfig(_) => "E001",
            PitchlinkError::DatabaseConnection(_) => "E002",
            PitchlinkError::DatabaseOperation(_) => "E003",
            PitchlinkError::Validation(_) => "E004",
            PitchlinkError::NotFound(_) => "E005",
            PitchlinkError::Serialization(_) => "E006",
            PitchlinkError::DateParse(_) => "E007",
            PitchlinkError::InvalidPitch(_) => "E010",
            PitchlinkError::CycleDetected(_) => "E011",
            PitchlinkError::UnknownPitch(_) => "E012",
            PitchlinkError::ChainTooDeep(_) => "E013",
            PitchlinkError::Collaborator(_) => "E014",
        }
    }

    /// 获取错误类型名称
    pub fn error_type(&self) -> &'static str {
        match self {
            PitchlinkError::DatabaseConfig(_) => "Database Configuration Error",
            PitchlinkError::DatabaseConnection(_) => "Database Connection Error",
            PitchlinkError::DatabaseOperation(_) => "Database Operation Error",
            PitchlinkError::Validation(_) => "Validation Error",
            PitchlinkError::NotFound(_) => "Resource Not Found",
            PitchlinkError::Serialization(_) => "Serialization Error",
            PitchlinkError::DateParse(_) => "Date Parse Error",
            PitchlinkError::InvalidPitch(_) => "Invalid Pitch",
            PitchlinkError::CycleDetected(_) => "Referral Cycle Detected",
            PitchlinkError::UnknownPitch(_) => "Unknown Pitch",
            PitchlinkError::ChainTooDeep(_) => "Attribution Chain Too Deep",
            PitchlinkError::Collaborator(_) => "Collaborator Call Failed",
        }
    }

    /// 获取错误详情
    pub fn message(&self) -> &str {
        match self {
            PitchlinkError::DatabaseConfig(msg)
            | PitchlinkError::DatabaseConnection(msg)
            | PitchlinkError::DatabaseOperation(msg)
            | PitchlinkError::Validation(msg)
            | PitchlinkError::NotFound(msg)
            | PitchlinkError::Serialization(msg)
            | PitchlinkError::DateParse(msg)
            | PitchlinkError::InvalidPitch(msg)
            | PitchlinkError::CycleDetected(msg)
            | PitchlinkError::UnknownPitch(msg)
            | PitchlinkError::ChainTooDeep(msg)
            | PitchlinkError::Collaborator(msg) => msg,
        }
    }

    /// HTTP 状态码映射（API 边界使用）
    pub fn http_status(&self) -> StatusCode {
        match self {
            PitchlinkError::Validation(_)
            | PitchlinkError::DateParse(_)
            | PitchlinkError::InvalidPitch(_) => StatusCode::BAD_REQUEST,
            PitchlinkError::NotFound(_) => StatusCode::NOT_FOUND,
            PitchlinkError::CycleDetected(_) => StatusCode::CONFLICT,
            PitchlinkError::UnknownPitch(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn format_simple(&self) -> String {
        format!("{}: {}", self.error_type(), self.message())
    }
}

impl fmt::Display for PitchlinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_simple())
    }
}

impl std::error::Error for PitchlinkError {}

// 便捷的构造函数
impl PitchlinkError {
    pub fn database_config<T: Into<String>>(msg: T) -> Self {
        PitchlinkError::DatabaseConfig(msg.into())
    }

    pub fn database_connection<T: Into<String>>(msg: T) -> Self {
        PitchlinkError::DatabaseConnection(msg.into())
    }

    pub fn database_operation<T: Into<String>>(msg: T) -> Self {
        PitchlinkError::DatabaseOperation(msg.into())
    }

    pub fn validation<T: Into<String>>(msg: T) -> Self {
        PitchlinkError::Validation(msg.into())
    }

    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        PitchlinkError::NotFound(msg.into())
    }

    pub fn serialization<T: Into<String>>(msg: T) -> Self {
        PitchlinkError::Serialization(msg.into())
    }

    pub fn date_parse<T: Into<String>>(msg: T) -> Self {
        PitchlinkError::DateParse(msg.into())
    }

    pub fn invalid_pitch<T: Into<String>>(msg: T) -> Self {
        PitchlinkError::InvalidPitch(msg.into())
    }

    pub fn cycle_detected<T: Into<String>>(msg: T) -> Self {
        PitchlinkError::CycleDetected(msg.into())
    }

    pub fn unknown_pitch<T: Into<String>>(msg: T) -> Self {
        PitchlinkError::UnknownPitch(msg.into())
    }

    pub fn chain_too_deep<T: Into<String>>(msg: T) -> Self {
        PitchlinkError::ChainTooDeep(msg.into())
    }

    pub fn collaborator<T: Into<String>>(msg: T) -> Self {
        PitchlinkError::Collaborator(msg.into())
    }
}

// 为常见的错误类型实现 From trait
impl From<sea_orm::DbErr> for PitchlinkError {
    fn from(err: sea_orm::DbErr) -> Self {
        PitchlinkError::DatabaseOperation(err.to_string())
    }
}

impl From<std::io::Error> for PitchlinkError {
    fn from(err: std::io::Error) -> Self {
        PitchlinkError::DatabaseConnection(err.to_string())
    }
}

impl From<serde_json::Error> for PitchlinkError {
    fn from(err: serde_json::Error) -> Self {
        PitchlinkError::Serialization(err.to_string())
    }
}

impl From<chrono::ParseError> for PitchlinkError {
    fn from(err: chrono::ParseError) -> Self {
        PitchlinkError::DateParse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PitchlinkError>;
