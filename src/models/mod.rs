//! 数据模型模块

pub mod device;
pub mod ledger;
pub mod proxy;
pub mod task;
pub mod task_type;
pub mod template;
pub mod user;
