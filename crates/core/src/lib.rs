pub mod bridge;
pub mod dict;
pub mod error;
pub mod media;
pub mod pool;
pub mod protocol;
pub mod server;
pub mod session;
pub mod source;

pub use error::{Error, Result};
pub use pool::{PoolConfig, RtpServer};
pub use server::{RtspServer, ServerConfig};
pub use source::{FileCatalog, MediaCatalog};
