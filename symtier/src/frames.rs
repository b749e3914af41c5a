//! The resolved frame model handed back to report formatters.
//!
//! One queried address can expand into several frames when the tool tier
//! reports inlining; the fast tier always produces exactly one. Frames are
//! plain immutable values: every lookup hands the caller a fresh copy with
//! no ties back into the pipeline.

// String formatting intentionally uses format! for clarity
#![allow(clippy::format_push_string)]

use crate::domain::Address;

/// One resolved stack location.
///
/// Every field except the address is optional; a tier reports what it knows
/// and leaves the rest empty. `line == 0` means the line is unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressInfo {
    /// The queried address, recorded even when nothing resolves.
    pub address: Address,
    /// Path or name of the image containing the address.
    pub module: Option<String>,
    /// Offset of the address from the image load base.
    pub module_offset: Option<u64>,
    /// Demangled function name, `None` when unresolved.
    pub function: Option<String>,
    /// Distance from the start of the containing symbol. Left empty when
    /// the reported symbol start lies past the queried address, which
    /// synthetic symbol tables can produce.
    pub function_offset: Option<u64>,
    /// Source file, when the resolving tier produced one.
    pub file: Option<String>,
    /// Source line; 0 when unknown.
    pub line: u32,
    /// Source column, when reported.
    pub column: Option<u32>,
}

impl AddressInfo {
    /// A frame carrying nothing but the raw address.
    #[must_use]
    pub fn unresolved(address: Address) -> Self {
        Self {
            address,
            module: None,
            module_offset: None,
            function: None,
            function_offset: None,
            file: None,
            line: 0,
            column: None,
        }
    }

    /// Whether any tier produced a function name for this frame.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.function.is_some()
    }
}

/// The inline-expanded result of symbolizing one address, innermost frame
/// first.
///
/// Never empty: a lookup that resolves nothing still yields a single frame
/// recording the address, so report formatters never special-case failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolizedStack {
    frames: Vec<AddressInfo>,
}

impl SymbolizedStack {
    /// Wrap parsed frames, restoring the non-empty invariant if needed.
    #[must_use]
    pub fn new(address: Address, frames: Vec<AddressInfo>) -> Self {
        if frames.is_empty() {
            Self::unresolved(address)
        } else {
            Self { frames }
        }
    }

    /// A stack of exactly one frame.
    #[must_use]
    pub fn single(frame: AddressInfo) -> Self {
        Self {
            frames: vec![frame],
        }
    }

    /// A stack whose only frame records the raw address.
    #[must_use]
    pub fn unresolved(address: Address) -> Self {
        Self::single(AddressInfo::unresolved(address))
    }

    #[must_use]
    pub fn frames(&self) -> &[AddressInfo] {
        &self.frames
    }

    /// The innermost frame. Total, because the stack is never empty.
    #[must_use]
    pub fn innermost(&self) -> &AddressInfo {
        &self.frames[0]
    }

    /// Whether at least one frame carries a function name.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.frames.iter().any(AddressInfo::is_resolved)
    }

    /// Format the stack for a crash report, `frame_index` being the position
    /// of this address in the captured backtrace.
    ///
    /// Inlined frames are indented under the physical frame:
    ///
    /// ```text
    /// #3  0x00000000004015a2 checked_add::inner_helper
    ///                       at pool.rs:42:7
    ///     0x00000000004015a2 checked_add
    ///                       at pool.rs:88
    /// ```
    #[must_use]
    pub fn format(&self, frame_index: usize) -> String {
        let mut output = String::new();

        for (idx, frame) in self.frames.iter().enumerate() {
            let prefix = if idx == 0 {
                format!("#{frame_index:<3}")
            } else {
                "    ".to_string()
            };

            let name = frame.function.as_deref().unwrap_or("<unknown>");
            output.push_str(&format!("{prefix}0x{:016x} {name}", frame.address.0));

            if let Some(offset) = frame.function_offset {
                if offset > 0 {
                    output.push_str(&format!("+0x{offset:x}"));
                }
            }

            if frame.function.is_none() {
                if let Some(module) = &frame.module {
                    output.push_str(&format!(" (in {module})"));
                    if let Some(offset) = frame.module_offset {
                        output.push_str(&format!("+0x{offset:x}"));
                    }
                }
            }

            if let Some(file) = &frame.file {
                output.push_str(&format!("\n                       at {file}"));
                if frame.line > 0 {
                    output.push_str(&format!(":{}", frame.line));
                    if let Some(column) = frame.column {
                        output.push_str(&format!(":{column}"));
                    }
                }
            }

            if idx + 1 < self.frames.len() {
                output.push('\n');
            }
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved_frame() -> AddressInfo {
        AddressInfo {
            address: Address(0x4015a2),
            module: Some("app".to_string()),
            module_offset: Some(0x15a2),
            function: Some("checked_add".to_string()),
            function_offset: Some(0x12),
            file: Some("pool.rs".to_string()),
            line: 42,
            column: Some(7),
        }
    }

    #[test]
    fn test_empty_frame_list_restores_invariant() {
        let stack = SymbolizedStack::new(Address(0x1000), Vec::new());
        assert_eq!(stack.frames().len(), 1);
        assert_eq!(stack.innermost().address, Address(0x1000));
        assert!(!stack.is_resolved());
    }

    #[test]
    fn test_unresolved_stack_keeps_address_only() {
        let stack = SymbolizedStack::unresolved(Address(0xdead));
        let frame = stack.innermost();
        assert_eq!(frame.address, Address(0xdead));
        assert!(frame.function.is_none());
        assert!(frame.file.is_none());
        assert_eq!(frame.line, 0);
    }

    #[test]
    fn test_format_resolved_frame() {
        let stack = SymbolizedStack::single(resolved_frame());
        let text = stack.format(3);
        assert!(text.starts_with("#3  "), "unexpected prefix: {text}");
        assert!(text.contains("checked_add+0x12"));
        assert!(text.contains("at pool.rs:42:7"));
    }

    #[test]
    fn test_format_unresolved_frame_names_module() {
        let mut frame = AddressInfo::unresolved(Address(0x1000));
        frame.module = Some("libfoo.so".to_string());
        frame.module_offset = Some(0x1000);
        let text = SymbolizedStack::single(frame).format(0);
        assert!(text.contains("<unknown> (in libfoo.so)+0x1000"), "{text}");
    }

    #[test]
    fn test_format_indents_inlined_frames() {
        let mut outer = resolved_frame();
        outer.function = Some("outer_caller".to_string());
        let stack = SymbolizedStack::new(Address(0x4015a2), vec![resolved_frame(), outer]);
        let text = stack.format(0);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[2].starts_with("    0x"), "inline frame not indented: {}", lines[2]);
    }
}
