pub mod error;
pub mod event;
pub mod health;
pub mod message;
pub mod notification;
pub mod response;
pub mod retry;
pub mod stats;
pub mod status;
pub mod template;
pub mod topic;
