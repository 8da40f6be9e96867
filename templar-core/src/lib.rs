pub mod backend;
pub mod config;
pub mod data;
pub mod models;
pub mod pipeline;
pub mod report;
pub mod session;
pub mod store;
