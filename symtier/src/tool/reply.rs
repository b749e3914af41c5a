//! Parsing of external tool replies into frames.
//!
//! The parser is forgiving by construction: tool output is untrusted text,
//! and a reply that fails to parse degrades to a single unresolved frame
//! with the condition logged. Nothing in here returns an error to the
//! pipeline.

use crate::config::{ReplyGrammar, ToolSpec};
use crate::domain::Address;
use crate::fast_symbolizer::demangle_symbol;
use crate::frames::{AddressInfo, SymbolizedStack};
use crate::tool::process::RawReply;
use log::warn;
use std::path::Path;

/// Interpret one reply under the tool's grammar.
///
/// Frames come back innermost first, matching the order every supported
/// tool prints inline expansions in. A sentinel-only reply, an echo of the
/// queried address, and malformed output all collapse to a single
/// unresolved frame.
#[must_use]
pub fn parse_reply(
    spec: &ToolSpec,
    reply: &RawReply,
    address: Address,
    image: &Path,
) -> SymbolizedStack {
    let lines: Vec<&str> = reply
        .lines
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .collect();

    if lines.is_empty() {
        return SymbolizedStack::unresolved(address);
    }
    if let [only] = lines.as_slice() {
        if *only == spec.not_found || is_address_echo(only, address) {
            return SymbolizedStack::unresolved(address);
        }
    }

    let frames = match &spec.grammar {
        ReplyGrammar::Annotated { inline_delimiter } => {
            parse_annotated(spec, &lines, inline_delimiter.as_deref(), address, image)
        }
        ReplyGrammar::PairedLines => parse_pairs(spec, &lines, address, image),
    };

    match frames {
        Some(frames) if !frames.is_empty() => SymbolizedStack::new(address, frames),
        _ => {
            warn!("unparseable symbolizer reply for {address}: {lines:?}");
            SymbolizedStack::unresolved(address)
        }
    }
}

/// `function (in module) (file:line[:column])` lines, optionally packed.
fn parse_annotated(
    spec: &ToolSpec,
    lines: &[&str],
    inline_delimiter: Option<&str>,
    address: Address,
    image: &Path,
) -> Option<Vec<AddressInfo>> {
    let mut frames = Vec::new();
    for line in lines {
        match inline_delimiter {
            Some(delimiter) => {
                for segment in line.split(delimiter) {
                    let segment = segment.trim();
                    if !segment.is_empty() {
                        frames.push(parse_annotated_segment(spec, segment, address, image)?);
                    }
                }
            }
            None => frames.push(parse_annotated_segment(spec, line, address, image)?),
        }
    }
    Some(frames)
}

/// One annotated segment. `None` means malformed.
fn parse_annotated_segment(
    spec: &ToolSpec,
    segment: &str,
    address: Address,
    image: &Path,
) -> Option<AddressInfo> {
    let mut rest = segment.trim();
    if rest.is_empty() {
        return None;
    }

    let mut file = None;
    let mut line = 0;
    let mut column = None;
    let mut module = None;
    let mut function_offset = None;

    // Trailing "(file:line[:column])" group. A trailing group that is not a
    // location stays in place; function names legitimately end in parens.
    if rest.ends_with(')') {
        if let Some(open) = rest.rfind('(') {
            if let Some(location) = parse_location(&rest[open + 1..rest.len() - 1], &spec.not_found)
            {
                (file, line, column) = location;
                rest = rest[..open].trim_end();
            }
        }
    }

    // "+ 24" / "+ 0x18" offset tail, printed when sources are unavailable.
    // Stripped before the module annotation, which precedes it on the line.
    if let Some(idx) = rest.rfind(" + ") {
        if let Some(offset) = parse_number(rest[idx + 3..].trim()) {
            function_offset = Some(offset);
            rest = rest[..idx].trim_end();
        }
    }

    // "(in module)" annotation.
    if rest.ends_with(')') {
        if let Some(open) = rest.rfind("(in ") {
            let name = rest[open + 4..rest.len() - 1].trim();
            if !name.is_empty() {
                module = Some(name.to_string());
            }
            rest = rest[..open].trim_end();
        }
    }

    if rest.is_empty() {
        // Annotations with no symbol in front of them.
        return None;
    }

    let function = if rest == spec.not_found || is_address_echo(rest, address) {
        None
    } else {
        Some(demangle_symbol(rest))
    };

    Some(AddressInfo {
        address,
        module: module.or_else(|| image_name(image)),
        module_offset: None,
        function,
        function_offset,
        file,
        line,
        column,
    })
}

/// Line pairs: function name, then `file:line[:column]`.
fn parse_pairs(
    spec: &ToolSpec,
    lines: &[&str],
    address: Address,
    image: &Path,
) -> Option<Vec<AddressInfo>> {
    if lines.len() % 2 != 0 {
        // Truncated output; trust none of it.
        return None;
    }

    let mut frames = Vec::new();
    for pair in lines.chunks(2) {
        let name_line = pair[0];
        let location_line = pair[1];

        let function = if name_line == spec.not_found || is_address_echo(name_line, address) {
            None
        } else {
            Some(demangle_symbol(name_line))
        };
        let (file, line, column) = parse_location(location_line, &spec.not_found)?;

        frames.push(AddressInfo {
            address,
            module: image_name(image),
            module_offset: None,
            function,
            function_offset: None,
            file,
            line,
            column,
        });
    }
    Some(frames)
}

/// `file:line` or `file:line:column`, numeric components taken greedily
/// from the right so colons inside the path survive. The file sentinel
/// (`??` and friends) maps to an unknown file.
fn parse_location(text: &str, not_found: &str) -> Option<(Option<String>, u32, Option<u32>)> {
    let text = text.trim();
    let last_colon = text.rfind(':')?;
    let tail = text[last_colon + 1..].trim();
    let head = &text[..last_colon];

    let tail_number: u32 = tail.parse().ok()?;

    if let Some(prev_colon) = head.rfind(':') {
        let middle = head[prev_colon + 1..].trim();
        if let Ok(line) = middle.parse::<u32>() {
            let file = head[..prev_colon].trim();
            if !file.is_empty() {
                let column = (tail_number > 0).then_some(tail_number);
                return Some((clean_file(file, not_found), line, column));
            }
        }
    }

    let head = head.trim();
    if head.is_empty() {
        return None;
    }
    Some((clean_file(head, not_found), tail_number, None))
}

fn clean_file(file: &str, not_found: &str) -> Option<String> {
    (file != not_found && file != "??" && !file.is_empty()).then(|| file.to_string())
}

/// Whether `text` is the queried address printed back, in any common hex
/// spelling.
fn is_address_echo(text: &str, address: Address) -> bool {
    let digits = text
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    u64::from_str_radix(digits, 16).is_ok_and(|value| value == address.0)
}

/// Decimal or `0x`-prefixed hex.
fn parse_number(text: &str) -> Option<u64> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        text.parse().ok()
    }
}

fn image_name(image: &Path) -> Option<String> {
    let name = image.to_string_lossy();
    (!name.is_empty()).then(|| name.into_owned())
}
