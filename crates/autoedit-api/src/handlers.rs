//! Request handlers.

pub mod cleanup;
pub mod health;
pub mod jobs;
pub mod upload;

pub use cleanup::*;
pub use health::*;
pub use jobs::*;
pub use upload::*;
