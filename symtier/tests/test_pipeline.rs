//! End-to-end symbolization through the tier pipeline.
//!
//! The external tool is a /bin/sh script; the fast tier runs against the
//! real loader. Addresses below 0x10000 are never mapped on Linux, so they
//! force fast-tier misses, while `dlsym(RTLD_DEFAULT, "malloc")` supplies a
//! guaranteed fast-tier hit. Tests that need the hit skip gracefully on
//! environments where the loader lookup comes back empty.

// dlsym and signal delivery to mock tools require unsafe
#![allow(unsafe_code)]

use std::ffi::CString;
use std::path::Path;
use std::time::{Duration, Instant};
use symtier::config::{SymbolizerConfig, TierOrder, ToolSpec};
use symtier::domain::{Address, Pid};
use symtier::fast_symbolizer::FastSymbolizer;
use symtier::frames::SymbolizedStack;
use symtier::pipeline::Symbolizer;

const TARGET_IMAGE: &str = "/opt/target-image";
const UNMAPPED: Address = Address(0x2000);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn sh_config(script: &str) -> SymbolizerConfig {
    let mut spec = ToolSpec::new("/bin/sh");
    spec.args = vec!["-c".to_string(), script.to_string()];
    spec.timeout = Duration::from_millis(400);
    SymbolizerConfig::new(spec)
}

/// An address with a guaranteed exported symbol, or `None` when the loader
/// cannot supply one in this environment.
fn resolvable_address() -> Option<Address> {
    let name = CString::new("malloc").ok()?;
    let addr = unsafe { libc::dlsym(libc::RTLD_DEFAULT, name.as_ptr()) };
    if addr.is_null() {
        return None;
    }
    let address = Address(addr as usize as u64);
    FastSymbolizer::new()
        .resolve(address)
        .is_some_and(|info| info.is_resolved())
        .then_some(address)
}

fn tool_pid_from(stack: &SymbolizedStack) -> u32 {
    let name = stack
        .innermost()
        .function
        .as_deref()
        .expect("mock reply should carry a function name");
    name.strip_prefix("worker_")
        .and_then(|pid| pid.parse().ok())
        .unwrap_or_else(|| panic!("unexpected mock function name {name:?}"))
}

fn process_gone(pid: u32) -> bool {
    #[allow(clippy::cast_possible_wrap)]
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    rc == -1
}

#[test]
fn test_rich_tool_reply_resolves_with_source_info() {
    init_logging();
    let symbolizer = Symbolizer::new(sh_config(
        r#"while read addr tok; do
  echo "frob_handler (in app) (frob.c:42:7)"
  echo "$tok"
done"#,
    ));

    let stack = symbolizer.symbolize(UNMAPPED, Path::new(TARGET_IMAGE), Pid(1));
    let frame = stack.innermost();
    assert_eq!(frame.function.as_deref(), Some("frob_handler"));
    assert_eq!(frame.file.as_deref(), Some("frob.c"));
    assert_eq!(frame.line, 42);
    assert_eq!(frame.column, Some(7));
}

#[test]
fn test_inline_frames_expand_innermost_first() {
    let symbolizer = Symbolizer::new(sh_config(
        r#"while read addr tok; do
  echo "inner_helper (in app) (inline.h:9)"
  echo "outer_caller (in app) (main.c:42)"
  echo "$tok"
done"#,
    ));

    let stack = symbolizer.symbolize(UNMAPPED, Path::new(TARGET_IMAGE), Pid(1));
    assert_eq!(stack.frames().len(), 2);
    assert_eq!(stack.innermost().function.as_deref(), Some("inner_helper"));
    assert_eq!(stack.frames()[1].function.as_deref(), Some("outer_caller"));
}

#[test]
fn test_nothing_resolves_still_one_frame() {
    let symbolizer = Symbolizer::new(sh_config(
        r#"while read addr tok; do
  echo "$addr"
  echo "$tok"
done"#,
    ));

    let stack = symbolizer.symbolize(UNMAPPED, Path::new(TARGET_IMAGE), Pid(1));
    assert_eq!(stack.frames().len(), 1);
    assert!(!stack.is_resolved());
    assert_eq!(stack.innermost().address, UNMAPPED);
}

#[test]
fn test_malformed_tool_output_degrades() {
    // Three reply lines under a pair grammar: truncated, trust none of it.
    let mut config = sh_config(
        r#"while read addr; do
  echo "half_a"
  echo "x.c:1"
  echo "orphan"
  echo ""
done"#,
    );
    config.tool.framing = symtier::config::ReplyFraming::BlankLineTerminated;
    config.tool.grammar = symtier::config::ReplyGrammar::PairedLines;
    config.tool.not_found = "??".to_string();

    let symbolizer = Symbolizer::new(config);
    let stack = symbolizer.symbolize(UNMAPPED, Path::new(TARGET_IMAGE), Pid(1));
    assert_eq!(stack.frames().len(), 1);
    assert!(!stack.is_resolved());
}

#[test]
fn test_fast_hit_short_circuits_the_tool() {
    let Some(address) = resolvable_address() else {
        println!("loader supplies no resolvable symbol here; skipping");
        return;
    };

    // The tool would resolve anything, but must never be consulted.
    let symbolizer = Symbolizer::new(sh_config(
        r#"while read addr tok; do
  echo "should_never_be_seen (in app) (no.c:1)"
  echo "$tok"
done"#,
    ));

    let stack = symbolizer.symbolize(address, Path::new(TARGET_IMAGE), Pid(1));
    assert!(stack.is_resolved());
    assert_ne!(
        stack.innermost().function.as_deref(),
        Some("should_never_be_seen")
    );
    assert_eq!(symbolizer.cached_tools(), 0, "tool was spawned needlessly");
}

#[test]
fn test_want_source_info_prefers_the_rich_reply() {
    let Some(address) = resolvable_address() else {
        println!("loader supplies no resolvable symbol here; skipping");
        return;
    };

    let mut config = sh_config(
        r#"while read addr tok; do
  echo "tool_resolved_name (in app) (deep.c:7)"
  echo "$tok"
done"#,
    );
    config.want_source_info = true;

    let symbolizer = Symbolizer::new(config);
    let stack = symbolizer.symbolize(address, Path::new(TARGET_IMAGE), Pid(1));
    let frame = stack.innermost();
    assert_eq!(frame.function.as_deref(), Some("tool_resolved_name"));
    assert_eq!(frame.file.as_deref(), Some("deep.c"));
}

#[test]
fn test_tool_not_found_keeps_the_fast_name() {
    let Some(address) = resolvable_address() else {
        println!("loader supplies no resolvable symbol here; skipping");
        return;
    };

    // The tool echoes the address back: a definitive "no symbol". The
    // loader's answer must survive it.
    let mut config = sh_config(
        r#"while read addr tok; do
  echo "$addr"
  echo "$tok"
done"#,
    );
    config.want_source_info = true;

    let symbolizer = Symbolizer::new(config);
    let stack = symbolizer.symbolize(address, Path::new(TARGET_IMAGE), Pid(1));
    let frame = stack.innermost();
    assert!(frame.function.is_some());
    // Loader frames carry the load offset; parsed tool frames do not.
    assert!(frame.module_offset.is_some());
}

#[test]
fn test_tool_first_uses_the_tool() {
    let mut config = sh_config(
        r#"while read addr tok; do
  echo "tool_resolved_name (in app) (deep.c:7)"
  echo "$tok"
done"#,
    );
    config.tier_order = TierOrder::ToolFirst;

    let symbolizer = Symbolizer::new(config);
    let stack = symbolizer.symbolize(UNMAPPED, Path::new(TARGET_IMAGE), Pid(1));
    assert_eq!(stack.innermost().function.as_deref(), Some("tool_resolved_name"));
}

#[test]
fn test_tool_first_falls_back_to_the_loader() {
    let Some(address) = resolvable_address() else {
        println!("loader supplies no resolvable symbol here; skipping");
        return;
    };

    let mut config = sh_config("exit 3");
    config.tier_order = TierOrder::ToolFirst;

    let symbolizer = Symbolizer::new(config);
    let stack = symbolizer.symbolize(address, Path::new(TARGET_IMAGE), Pid(1));
    assert!(stack.is_resolved());
    assert!(stack.innermost().module_offset.is_some());
}

#[test]
fn test_dead_tool_respawns_once_transparently() {
    init_logging();
    let symbolizer = Symbolizer::new(sh_config(
        r#"while read addr tok; do
  echo "worker_$$ (in app) (w.c:1)"
  echo "$tok"
done"#,
    ));

    let first = symbolizer.symbolize(UNMAPPED, Path::new(TARGET_IMAGE), Pid(1));
    let first_pid = tool_pid_from(&first);
    assert_eq!(symbolizer.cached_tools(), 1);

    #[allow(clippy::cast_possible_wrap)]
    let rc = unsafe { libc::kill(first_pid as libc::pid_t, libc::SIGKILL) };
    assert_eq!(rc, 0, "could not kill mock tool {first_pid}");
    std::thread::sleep(Duration::from_millis(200));

    // The next lookup hits the dead process, evicts it, respawns, retries.
    let second = symbolizer.symbolize(UNMAPPED, Path::new(TARGET_IMAGE), Pid(1));
    let second_pid = tool_pid_from(&second);
    assert_ne!(second_pid, first_pid, "lookup was served by the dead tool");
    assert_eq!(symbolizer.cached_tools(), 1);
}

#[test]
fn test_timeout_keeps_the_process_cached() {
    let symbolizer = Symbolizer::new(sh_config("read addr tok; sleep 30"));

    let start = Instant::now();
    let stack = symbolizer.symbolize(UNMAPPED, Path::new(TARGET_IMAGE), Pid(1));
    let elapsed = start.elapsed();

    assert_eq!(stack.frames().len(), 1);
    assert!(!stack.is_resolved());
    assert!(elapsed < Duration::from_secs(5), "no timeout bound: {elapsed:?}");
    // A slow tool is not a dead tool; it stays cached.
    assert_eq!(symbolizer.cached_tools(), 1);
}

#[test]
fn test_timeout_falls_back_to_the_loader_name() {
    init_logging();
    let Some(address) = resolvable_address() else {
        println!("loader supplies no resolvable symbol here; skipping");
        return;
    };

    // Source info was requested, so the loader hit does not short-circuit;
    // the stalled tool must cost one deadline and nothing more.
    let mut config = sh_config("read addr tok; sleep 30");
    config.want_source_info = true;

    let symbolizer = Symbolizer::new(config);
    let start = Instant::now();
    let stack = symbolizer.symbolize(address, Path::new(TARGET_IMAGE), Pid(1));
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_millis(350), "tool was never awaited: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "no timeout bound: {elapsed:?}");

    let frame = stack.innermost();
    assert!(frame.function.is_some(), "loader name was dropped on timeout");
    assert!(frame.module_offset.is_some());
    assert!(frame.file.is_none(), "no tool reply, so no source info");
    assert_eq!(symbolizer.cached_tools(), 1);
}

#[test]
fn test_concurrent_lookups_share_one_tool_without_crosstalk() {
    init_logging();
    let symbolizer = Symbolizer::new(sh_config(
        r#"while read addr tok; do
  echo "fn_$addr (in app) (f.c:1)"
  echo "$tok"
done"#,
    ));

    std::thread::scope(|scope| {
        for thread_idx in 0..8u64 {
            let symbolizer = &symbolizer;
            scope.spawn(move || {
                for i in 0..3u64 {
                    let raw = 0x2000 + thread_idx * 0x100 + i * 0x10;
                    let stack =
                        symbolizer.symbolize(Address(raw), Path::new(TARGET_IMAGE), Pid(1));
                    assert_eq!(
                        stack.innermost().function.as_deref(),
                        Some(format!("fn_0x{raw:x}").as_str()),
                        "reply for another address leaked into this lookup"
                    );
                }
            });
        }
    });

    assert_eq!(symbolizer.cached_tools(), 1);
}

#[test]
fn test_shutdown_terminates_cached_tools() {
    let symbolizer = Symbolizer::new(sh_config(
        r#"while read addr tok; do
  echo "worker_$$ (in app) (w.c:1)"
  echo "$tok"
done"#,
    ));

    let stack = symbolizer.symbolize(UNMAPPED, Path::new(TARGET_IMAGE), Pid(1));
    let tool_pid = tool_pid_from(&stack);

    symbolizer.shutdown();
    assert_eq!(symbolizer.cached_tools(), 0);
    assert!(process_gone(tool_pid), "tool {tool_pid} survived shutdown");

    // Symbolization after shutdown just respawns.
    let stack = symbolizer.symbolize(UNMAPPED, Path::new(TARGET_IMAGE), Pid(1));
    assert!(stack.is_resolved());
    assert_eq!(symbolizer.cached_tools(), 1);
}

#[test]
fn test_dropping_the_symbolizer_reaps_tools() {
    let tool_pid = {
        let symbolizer = Symbolizer::new(sh_config(
            r#"while read addr tok; do
  echo "worker_$$ (in app) (w.c:1)"
  echo "$tok"
done"#,
        ));
        let stack = symbolizer.symbolize(UNMAPPED, Path::new(TARGET_IMAGE), Pid(1));
        tool_pid_from(&stack)
    };
    assert!(process_gone(tool_pid), "tool {tool_pid} survived drop");
}
