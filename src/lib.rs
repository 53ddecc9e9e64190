pub mod audit;
pub mod backend;
pub mod config;
pub mod error;
pub mod proxy;
pub mod relay;
pub mod server;
pub mod translate;

pub use config::ShimConfig;
pub use error::{Result, ShimError};
pub use proxy::Proxy;
pub use server::{build_router, AppState};
