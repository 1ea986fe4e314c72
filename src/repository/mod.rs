//! Database repository layer

pub mod task_type_repo;
pub mod template_repo;
pub mod user_repo;

pub use task_type_repo::*;
pub use template_repo::*;
pub use user_repo::*;
