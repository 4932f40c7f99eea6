//! Service layer for business logic
//!
//! HTTP handler 只做参数提取和响应包装，
//! 归因语义全部在这一层（便于测试和复用）。

mod analytics_service;
mod chain_walker;
mod ingest_service;
mod owner_lookup;
mod referral_service;

pub use analytics_service::*;
pub use chain_walker::ChainWalker;
pub use ingest_service::*;
pub use owner_lookup::{HttpOwnerLookup, OwnerLookup, StaticOwnerLookup, owner_lookup_from_config};
pub use referral_service::*;
