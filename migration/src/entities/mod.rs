pub mod chain_stat;
pub mod daily_metric;
pub mod referral;
pub mod supporter_performance;
pub mod tracking_event;
