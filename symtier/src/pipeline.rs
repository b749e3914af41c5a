//! Tier orchestration: the loader tier, the external tool tier, and the
//! fallback policy gluing them together.
//!
//! The contract callers build on: `symbolize` never fails, never panics on
//! tool misbehavior, and never returns an empty stack. Whatever goes wrong
//! below, the answer degrades through name-only, module-only, and finally
//! a bare-address frame.

use crate::config::{SymbolizerConfig, TierOrder};
use crate::domain::{Address, Pid, QueryError};
use crate::fast_symbolizer::FastSymbolizer;
use crate::frames::SymbolizedStack;
use crate::tool::cache::ProcessCache;
use crate::tool::reply::parse_reply;
use log::{debug, warn};
use std::path::Path;
use std::sync::PoisonError;

/// The symbolization entry point.
///
/// One instance serves every thread that needs addresses resolved; the only
/// internal state is the tool-process cache, which does its own locking.
pub struct Symbolizer {
    config: SymbolizerConfig,
    fast: FastSymbolizer,
    cache: ProcessCache,
}

impl Symbolizer {
    #[must_use]
    pub fn new(config: SymbolizerConfig) -> Self {
        Self {
            config,
            fast: FastSymbolizer::new(),
            cache: ProcessCache::new(),
        }
    }

    /// Resolve one address from `image` as loaded in debuggee `pid`.
    ///
    /// Always returns at least one frame. With the default tier order a
    /// loader hit short-circuits the external tool entirely unless
    /// source-level detail was requested; a resolved tool reply is
    /// preferred over a loader hit because only the tool knows files,
    /// lines, and inlining.
    pub fn symbolize(&self, address: Address, image: &Path, pid: Pid) -> SymbolizedStack {
        let mut fast_hit = None;

        if self.config.tier_order == TierOrder::FastFirst {
            fast_hit = self.fast.resolve(address);
            if let Some(info) = &fast_hit {
                if info.is_resolved() && !self.config.want_source_info {
                    return SymbolizedStack::single(info.clone());
                }
            }
        }

        let tool_candidate = match self.resolve_with_tool(address, image, pid) {
            Some(stack) if stack.is_resolved() => return stack,
            other => other,
        };

        if fast_hit.is_none() && self.config.tier_order == TierOrder::ToolFirst {
            fast_hit = self.fast.resolve(address);
        }

        // The tool said "no symbol" or failed outright. A loader hit, even
        // a module-only one, still carries the load offset; the tool's
        // unresolved frame at least names the image.
        if let Some(info) = fast_hit {
            return SymbolizedStack::single(info);
        }
        if let Some(stack) = tool_candidate {
            return stack;
        }

        debug!("no tier resolved {address}; reporting the bare address");
        SymbolizedStack::unresolved(address)
    }

    /// One tool-tier attempt, including the single respawn-and-retry after
    /// a detected process death. `None` means this tier has nothing to say.
    fn resolve_with_tool(&self, address: Address, image: &Path, pid: Pid) -> Option<SymbolizedStack> {
        let mut respawned = false;
        loop {
            let entry = match self.cache.get_or_spawn(&self.config.tool, image, pid) {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(
                        "cannot launch symbolizer tool for {}: {err}",
                        image.display()
                    );
                    return None;
                }
            };

            let result = {
                let mut process = entry.lock().unwrap_or_else(PoisonError::into_inner);
                process.query(address)
            };

            match result {
                Ok(reply) => {
                    return Some(parse_reply(&self.config.tool, &reply, address, image));
                }
                Err(QueryError::Timeout(timeout)) => {
                    // The process is kept: the stale reply gets discarded by
                    // the next query, and retrying now would just stall the
                    // caller for another deadline.
                    warn!(
                        "symbolizer tool for {} gave no reply within {timeout:?}; falling back",
                        image.display()
                    );
                    return None;
                }
                Err(QueryError::ProcessDied) => {
                    self.cache.evict(image, pid, &entry);
                    if respawned {
                        warn!(
                            "symbolizer tool for {} died twice in one lookup; falling back",
                            image.display()
                        );
                        return None;
                    }
                    debug!("symbolizer tool for {} died; respawning once", image.display());
                    respawned = true;
                }
            }
        }
    }

    /// Number of live cached tool processes.
    #[must_use]
    pub fn cached_tools(&self) -> usize {
        self.cache.len()
    }

    #[must_use]
    pub fn config(&self) -> &SymbolizerConfig {
        &self.config
    }

    /// Tear down every cached tool process. Later lookups simply respawn.
    pub fn shutdown(&self) {
        self.cache.shutdown_all();
    }
}

impl Drop for Symbolizer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
