// contracts
pub mod hook;
pub mod node;
pub mod tree;

// request machinery
pub mod codec;
pub mod cond;
pub mod error;
pub mod staging;
pub mod uri;

// the core
mod binding;
mod controller;
mod props;
pub mod server;

pub use server::{DavServer, Server};

/// Advertised in `X-Davit-Version` and in the error envelope.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
