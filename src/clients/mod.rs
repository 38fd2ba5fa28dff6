pub mod broker;
pub mod channel;
pub mod health;
pub mod in_memory;
pub mod rbmq;
pub mod redis;
