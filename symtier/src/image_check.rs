//! Symbol-table presence diagnostics for target images.
//!
//! A stripped image still gets loader-tier answers from its dynamic symbol
//! table, but the external tool will answer mostly "not found". Surfacing
//! that once, when the tool is spawned, turns a confusing run of unresolved
//! frames into a single explanatory warning.

use log::warn;
use object::{Object, ObjectSection};
use std::path::Path;

/// Warn when `image` carries neither a symbol table nor DWARF debug info.
///
/// Unreadable files and foreign formats are tolerated silently: the tool
/// may know how to handle them anyway, and if it does not, its replies
/// degrade to unresolved frames on their own.
pub fn warn_if_symbolless(image: &Path) {
    let Ok(data) = std::fs::read(image) else {
        return;
    };
    let Ok(file) = object::File::parse(&*data) else {
        return;
    };

    let has_debug_info = file
        .section_by_name(".debug_info")
        .is_some_and(|section| section.size() > 0);
    let has_symtab = file
        .section_by_name(".symtab")
        .is_some_and(|section| section.size() > 0);

    if !has_debug_info && !has_symtab {
        warn!(
            "{} is stripped; external symbolizer replies will mostly be unresolved",
            image.display()
        );
    } else if !has_debug_info {
        warn!(
            "{} has no DWARF debug info; source locations will be unavailable",
            image.display()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_is_tolerated() {
        warn_if_symbolless(Path::new("/no/such/image-anywhere"));
    }

    #[test]
    fn test_non_object_file_is_tolerated() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        file.write_all(b"definitely not an ELF image")
            .expect("write temp file");
        warn_if_symbolless(file.path());
    }

    #[test]
    fn test_own_binary_parses() {
        // The running test binary is a real ELF; whichever warning branch
        // it takes, the parse itself must not trip anything.
        let own = std::env::current_exe().expect("current_exe");
        warn_if_symbolless(&own);
    }
}
