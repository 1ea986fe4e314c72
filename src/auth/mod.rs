//! API Key 认证

pub mod api_key;
pub mod middleware;

pub use api_key::{hash_api_key, API_KEY_HEADER};
pub use middleware::{api_key_auth_middleware, extract_api_key, AuthContext};
