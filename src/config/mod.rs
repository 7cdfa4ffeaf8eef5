pub mod schema;
pub mod workspace;

pub use schema::{mask_secret, Config, RemoteConfig, ResumeConfig, RetryConfig, StoreConfig};
pub use workspace::Workspace;
