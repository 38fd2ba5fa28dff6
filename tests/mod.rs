mod common;

mod config_tests;
mod consumer_tests;
mod logger_tests;
mod queue_test;
mod routing_tests;
