//! # symtier - Tiered Address Symbolization
//!
//! Turns raw instruction-pointer addresses captured in crash and error
//! reports into names, source locations, and inline expansions, by layering
//! a fast in-process tier over an external symbolizer tool.
//!
//! ## Architecture
//!
//! ```text
//!   Address ──► Symbolizer (pipeline)
//!                 │
//!                 ├──► FastSymbolizer ── dladdr ──► nearest exported symbol
//!                 │      never blocks, never spawns, no file/line
//!                 │
//!                 └──► ProcessCache ──► ToolProcess ──► atos / addr2line /
//!                        one child per        │         llvm-symbolizer
//!                        (image, pid)         ▼
//!                                      reply parser ──► frames with
//!                                                       file:line + inlining
//! ```
//!
//! The external tool is a long-lived child process spoken to over a
//! line-oriented pipe protocol. Replies are matched to requests by the
//! tool's own framing (an echoed synchronization token, a fixed line count,
//! or a blank-line terminator), reads are timeout-bounded through a reader
//! thread, and a reply that arrives after its deadline is quietly discarded
//! instead of being misattributed to the next address.
//!
//! ## Guarantees
//!
//! - [`pipeline::Symbolizer::symbolize`] never fails and never returns an
//!   empty stack: failures degrade through name-only, module-only, and
//!   finally a bare-address frame.
//! - A timed-out tool is kept alive; a dead tool is respawned exactly once
//!   per lookup before this tier gives up.
//! - Dropping the [`pipeline::Symbolizer`] terminates every cached tool
//!   with a bounded SIGTERM-then-SIGKILL sequence.
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use symtier::config::{SymbolizerConfig, ToolSpec};
//! use symtier::domain::{Address, Pid};
//! use symtier::pipeline::Symbolizer;
//!
//! let tool = ToolSpec::llvm_symbolizer("/usr/bin/llvm-symbolizer");
//! let symbolizer = Symbolizer::new(SymbolizerConfig::new(tool));
//!
//! let stack = symbolizer.symbolize(Address(0x40_15a2), Path::new("/opt/app/server"), Pid(4242));
//! println!("{}", stack.format(0));
//! ```
//!
//! ## Modules
//!
//! - [`config`]: tool launch/protocol specs and pipeline policy
//! - [`domain`]: scalar identifiers and the error taxonomy
//! - [`fast_symbolizer`]: the dladdr loader tier
//! - [`frames`]: the resolved frame model and report formatting
//! - [`image_check`]: stripped-image diagnostics
//! - [`pipeline`]: tier ordering, fallback, and retry policy
//! - [`tool`]: external tool processes, their cache, reply parsing

pub mod config;
pub mod domain;
pub mod fast_symbolizer;
pub mod frames;
pub mod image_check;
pub mod pipeline;
pub mod tool;
