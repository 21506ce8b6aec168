//! Tool server connections and tool invocation for toolwire.
//!
//! Servers are reached through the [`ToolTransport`] capability trait. The
//! bundled [`StdioClient`] spawns a local server and speaks newline-delimited
//! JSON-RPC 2.0 with it. [`ConnectionManager`] keeps one live transport per
//! server name and [`ToolInvoker`] turns a `"server:tool"` call with string
//! parameters into a single rendered result.

pub mod client;
pub mod error;
pub mod image;
pub mod invoker;
pub mod jsonrpc;
pub mod manager;
pub mod render;
pub mod schema;
mod stdio;
pub mod transport;

pub use client::{StdioClient, StdioTransportFactory};
pub use error::McpError;
pub use image::{ImagePool, ImagePoolError, MemoryImagePool};
pub use invoker::{ToolInvoker, parse_qualified_name};
pub use manager::ConnectionManager;
pub use schema::ParamType;
pub use transport::{BoxFuture, ToolTransport, TransportFactory};
