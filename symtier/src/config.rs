//! Tool and pipeline configuration.
//!
//! Everything platform-specific about an external symbolizer tool lives in
//! one [`ToolSpec`] value: how to launch it, how its replies are delimited
//! on the pipe, and which grammar extracts frames from the reply lines.
//! Supporting a new tool means writing a new spec, not new process or
//! parser code.

use crate::domain::Pid;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Reply deadline applied when a spec does not override it.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(3);

/// Order in which the resolution tiers are consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TierOrder {
    /// Loader introspection first; the external tool only runs when the
    /// fast tier misses or source-level detail was requested.
    #[default]
    FastFirst,
    /// External tool first; for targets whose loader symbol information is
    /// known to be unreliable.
    ToolFirst,
}

/// How replies are delimited on the tool's stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyFraming {
    /// Each request carries a unique token which the tool, unable to parse
    /// it as an address, echoes back verbatim on a line of its own. The
    /// echo marks the end of the reply; everything before it is reply text.
    /// This is how atos behaves.
    TokenEcho,
    /// Every reply is exactly this many lines. addr2line with `-f` prints
    /// two: the function name, then `file:line`.
    CountedLines(usize),
    /// A reply is terminated by an empty line, llvm-symbolizer style.
    BlankLineTerminated,
}

/// How frames are extracted from the reply lines of one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyGrammar {
    /// `function (in module) (file:line[:column])` segments, atos style.
    /// Inlined frames arrive either as consecutive lines or packed into one
    /// line split by `inline_delimiter` when one is configured.
    Annotated { inline_delimiter: Option<String> },
    /// Line pairs: a function name, then `file:line[:column]`. Inlined
    /// frames arrive as additional pairs. addr2line and llvm-symbolizer
    /// both speak this.
    PairedLines,
}

/// Launch and protocol description for one external symbolizer tool.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    /// Executable to spawn.
    pub path: PathBuf,
    /// Argument template; `{image}` and `{pid}` are substituted at spawn
    /// time with the target image path and debuggee PID.
    pub args: Vec<String>,
    pub framing: ReplyFraming,
    pub grammar: ReplyGrammar,
    /// Literal reply text meaning "no symbol at this address". A reply that
    /// merely echoes the queried address back is treated as not-found
    /// independently of this.
    pub not_found: String,
    /// Per-query reply deadline.
    pub timeout: Duration,
}

impl ToolSpec {
    /// A generic token-echoing tool at `path` with no extra arguments.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
            framing: ReplyFraming::TokenEcho,
            grammar: ReplyGrammar::Annotated {
                inline_delimiter: None,
            },
            not_found: String::new(),
            timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    /// atos, attached to the live debuggee so dynamic libraries resolve at
    /// their actual load addresses.
    pub fn atos<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            args: vec!["-p".to_string(), "{pid}".to_string(), "-i".to_string()],
            ..Self::new(path)
        }
    }

    /// binutils addr2line against the on-disk image. Inline expansion
    /// (`-i`) stays off: it emits two extra lines per inline frame, and the
    /// counted framing requires every reply to be exactly one pair.
    pub fn addr2line<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            args: vec![
                "-e".to_string(),
                "{image}".to_string(),
                "-f".to_string(),
                "-C".to_string(),
            ],
            framing: ReplyFraming::CountedLines(2),
            grammar: ReplyGrammar::PairedLines,
            not_found: "??".to_string(),
            ..Self::new(path)
        }
    }

    /// llvm-symbolizer against the on-disk image.
    pub fn llvm_symbolizer<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            args: vec!["--obj={image}".to_string(), "--demangle".to_string()],
            framing: ReplyFraming::BlankLineTerminated,
            grammar: ReplyGrammar::PairedLines,
            not_found: "??".to_string(),
            ..Self::new(path)
        }
    }

    /// The argument vector for one concrete `(image, pid)` target.
    #[must_use]
    pub fn substituted_args(&self, image: &Path, pid: Pid) -> Vec<String> {
        let image = image.to_string_lossy();
        let pid = pid.0.to_string();
        self.args
            .iter()
            .map(|arg| arg.replace("{image}", &image).replace("{pid}", &pid))
            .collect()
    }

    /// Whether this tool binds to the debuggee PID at spawn time.
    #[must_use]
    pub fn binds_pid(&self) -> bool {
        self.args.iter().any(|arg| arg.contains("{pid}"))
    }
}

/// Pipeline-level policy.
#[derive(Debug, Clone)]
pub struct SymbolizerConfig {
    pub tier_order: TierOrder,
    /// Consult the external tool even after the fast tier produced a name,
    /// and prefer the tool's reply when it resolves: only the tool can
    /// produce file/line and inline information.
    pub want_source_info: bool,
    pub tool: ToolSpec,
}

impl SymbolizerConfig {
    #[must_use]
    pub fn new(tool: ToolSpec) -> Self {
        Self {
            tier_order: TierOrder::default(),
            want_source_info: false,
            tool,
        }
    }
}
