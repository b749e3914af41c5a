//! In-process resolution through the dynamic loader.
//!
//! `dladdr` is cheap, reentrant-safe to the degree crash reporting needs,
//! and always available, but it only knows exported symbols: no file/line,
//! no inline expansion, and static functions are invisible. It is the tier
//! that can never hang, which makes it both the fast path and the fallback
//! when the external tool misbehaves.

// dladdr and the C string handling around it require unsafe
#![allow(unsafe_code)]

use crate::domain::Address;
use crate::frames::AddressInfo;
use rustc_demangle::demangle;
use std::ffi::CStr;
use std::os::raw::c_void;

/// The in-process resolution tier.
///
/// Stateless: lookups go straight to the loader and never block, spawn, or
/// allocate beyond the returned frame. Absence of information is `None`,
/// never an error.
#[derive(Debug, Default, Clone, Copy)]
pub struct FastSymbolizer;

impl FastSymbolizer {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Resolve `address` to the nearest preceding exported symbol in the
    /// image containing it.
    ///
    /// Returns `None` when the address falls inside no loaded image. A
    /// `Some` result may still lack a function name when the containing
    /// image exports nothing near the address; it then carries at least the
    /// image path and load offset.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn resolve(&self, address: Address) -> Option<AddressInfo> {
        let mut info = unsafe { std::mem::zeroed::<libc::Dl_info>() };
        let found = unsafe { libc::dladdr(address.0 as usize as *const c_void, &mut info) };
        if found == 0 {
            return None;
        }

        let module = if info.dli_fname.is_null() {
            None
        } else {
            let name = unsafe { CStr::from_ptr(info.dli_fname) }.to_string_lossy();
            (!name.is_empty()).then(|| name.into_owned())
        };

        let module_offset = if info.dli_fbase.is_null() {
            None
        } else {
            address.0.checked_sub(info.dli_fbase as usize as u64)
        };

        let function = if info.dli_sname.is_null() {
            None
        } else {
            let name = unsafe { CStr::from_ptr(info.dli_sname) }.to_string_lossy();
            (!name.is_empty()).then(|| demangle_symbol(&name))
        };

        // Synthetic or corrupt symbol tables can report a symbol start past
        // the queried address; the offset is then unknown, not negative.
        let function_offset = if info.dli_saddr.is_null() {
            None
        } else {
            address.0.checked_sub(info.dli_saddr as usize as u64)
        };

        Some(AddressInfo {
            address,
            module,
            module_offset,
            function,
            function_offset,
            file: None,
            line: 0,
            column: None,
        })
    }
}

/// Demangle a symbol name, passing unmangled and foreign names through
/// unchanged. The alternate form drops the trailing hash rustc appends.
#[must_use]
pub fn demangle_symbol(symbol: &str) -> String {
    format!("{:#}", demangle(symbol))
}
