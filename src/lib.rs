pub mod cli;
pub mod client;
pub mod config;
pub mod database;
pub mod protocol;
pub mod storage;

pub use cli::{Line, prompt};
pub use client::{Client, ClientError};
pub use config::ServerConfig;
pub use database::{Database, DbError};
pub use protocol::{Server, ServerError};
pub use storage::MemoryDatabase;
