//! 业务服务层

pub mod assignment_service;
pub mod background;
pub mod device_sweeper;
pub mod expiry_sweeper;
pub mod feedback_service;
pub mod ledger_service;
pub mod proxy_service;
pub mod task_service;
pub mod task_type_service;

pub use assignment_service::AssignmentService;
pub use background::BackgroundTasks;
pub use device_sweeper::DeviceSweeper;
pub use expiry_sweeper::{ExpirySweeper, SweepReport};
pub use feedback_service::FeedbackService;
pub use ledger_service::LedgerService;
pub use proxy_service::ProxyService;
pub use task_service::TaskService;
pub use task_type_service::TaskTypeService;
