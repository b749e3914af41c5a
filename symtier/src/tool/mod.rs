//! The external-tool tier: process lifecycle, reply parsing, discovery.

pub mod cache;
pub mod locate;
pub mod process;
pub mod reply;

pub use cache::{CachedTool, ProcessCache};
pub use process::{RawReply, ToolProcess};
