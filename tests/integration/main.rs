//! Integration tests

mod common;
mod data_test;
mod engine_test;
mod optimizer_test;
mod report_test;
