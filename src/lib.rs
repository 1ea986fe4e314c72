//! 京豆任务分发平台
//! 任务生命周期、京豆账本、设备派发与代理分配

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod rate_limit;
pub mod repository;
pub mod routes;
pub mod services;
pub mod telemetry;
