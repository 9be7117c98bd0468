pub mod common;
pub mod config;
pub mod requests;
pub mod responses;
