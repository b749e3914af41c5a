//! Scalar identifiers used throughout the symbolization tiers.

use std::fmt;

/// A raw instruction-pointer address captured from a stack trace.
///
/// Addresses are opaque to this crate: they are forwarded to the resolution
/// tiers and recorded verbatim in unresolved frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address(pub u64);

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl From<u64> for Address {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Process id of the debuggee whose addresses are being symbolized.
///
/// Some platform tools resolve dynamically loaded libraries at their runtime
/// load address and need the target PID for that; the process cache keys on
/// it unconditionally so one tool instance never serves two debuggees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid(pub i32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for Pid {
    fn from(raw: i32) -> Self {
        Self(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_displays_as_hex() {
        assert_eq!(Address(0x1000).to_string(), "0x1000");
        assert_eq!(format!("{:08x}", Address(0xab)), "000000ab");
    }

    #[test]
    fn test_pid_displays_as_number() {
        assert_eq!(Pid(4242).to_string(), "4242");
    }
}
