//! Shared types and error taxonomy for toolwire.

pub mod error;
pub mod invocation;
pub mod server;
pub mod util;

pub use error::InvokeError;
pub use invocation::InvocationResult;
pub use server::*;
pub use util::truncate_chars;
