pub mod consumer;
pub mod handlers;
pub mod logger;
pub mod publisher;
pub mod rate_limit;
pub mod templates;
