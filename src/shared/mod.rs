pub mod config;
pub mod inference;
pub mod logging;
pub mod process;
pub mod workspace;

pub use config::ServiceConfig;
pub use workspace::Workspace;
