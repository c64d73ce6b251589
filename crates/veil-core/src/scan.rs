//! Signature scanner.
//!
//! Walks a byte range left to right and reports the first position at which
//! every non-wildcard pattern token matches. On a mismatch the comparison
//! restarts from the next byte position, not from the end of the partial
//! match; patterns are short and ranges are a single module image, so the
//! naive restart is deliberate. The result is deterministic for a fixed
//! range and pattern.

use crate::pattern::Pattern;

#[cfg(target_os = "windows")]
use crate::error::{Error, Result};
#[cfg(target_os = "windows")]
use crate::memory::MemoryRegion;
#[cfg(target_os = "windows")]
use tracing::debug;

/// First offset in `data` at which `pattern` matches, or `None`.
pub fn scan_slice(data: &[u8], pattern: &Pattern) -> Option<usize> {
    if data.len() < pattern.len() {
        return None;
    }

    let last = data.len() - pattern.len();

    // A concrete leading token lets memchr skip straight to candidate
    // positions; the reported match is identical to the plain walk.
    if let Some(first) = pattern.tokens()[0] {
        let mut from = 0;
        while from <= last {
            let Some(found) = memchr::memchr(first, &data[from..=last]) else {
                break;
            };
            let position = from + found;
            if pattern.matches(&data[position..]) {
                return Some(position);
            }
            from = position + 1;
        }
        return None;
    }

    (0..=last).find(|&position| pattern.matches(&data[position..]))
}

/// Range-based scan over memory the caller asserts is readable.
///
/// # Safety
///
/// Every byte in `region` must be mapped and readable for the duration of
/// the call; module image ranges obtained from the loader satisfy this.
#[cfg(target_os = "windows")]
pub unsafe fn scan_region(region: MemoryRegion, pattern: &Pattern) -> Option<usize> {
    // SAFETY: caller contract; the slice lives only for this scan.
    let image = unsafe { std::slice::from_raw_parts(region.start as *const u8, region.len()) };
    scan_slice(image, pattern).map(|offset| region.start + offset)
}

/// Module-qualified scan: resolves the named module's image range and scans
/// it. Fails with `ModuleNotFound` when the module is not loaded and
/// `PatternNotFound` when the scan comes up empty.
#[cfg(target_os = "windows")]
pub fn scan_module(module: &str, pattern: &Pattern) -> Result<usize> {
    let region = crate::memory::module_region(module)?;

    // SAFETY: the loader keeps the module image mapped while it is loaded.
    let found = unsafe { scan_region(region, pattern) };

    match found {
        Some(address) => {
            debug!(
                module,
                pattern = %pattern,
                address = format_args!("{:#x}", address),
                "signature located"
            );
            Ok(address)
        }
        None => Err(Error::PatternNotFound(pattern.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(text: &str) -> Pattern {
        Pattern::parse(text).unwrap()
    }

    #[test]
    fn test_wildcard_in_middle() {
        // "AA ? CC" against [01, AA, BB, CC, 02] matches at index 1.
        let data = [0x01, 0xAA, 0xBB, 0xCC, 0x02];
        assert_eq!(scan_slice(&data, &pattern("AA ? CC")), Some(1));
    }

    #[test]
    fn test_partial_match_restarts_at_next_position() {
        // "AA BB" against [AA, 01, AA, BB]: the partial match at 0 is
        // discarded and the first full match at 2 wins.
        let data = [0xAA, 0x01, 0xAA, 0xBB];
        assert_eq!(scan_slice(&data, &pattern("AA BB")), Some(2));
    }

    #[test]
    fn test_all_wildcards_match_at_start() {
        let data = [0x10, 0x20, 0x30, 0x40];
        assert_eq!(scan_slice(&data, &pattern("? ? ?")), Some(0));
    }

    #[test]
    fn test_exact_bytes_behave_as_substring_search() {
        let data = [0x00, 0x11, 0x48, 0x8B, 0x05, 0x11, 0x48, 0x8B];
        assert_eq!(scan_slice(&data, &pattern("48 8B 05")), Some(2));
        assert_eq!(scan_slice(&data, &pattern("48 8B")), Some(2));
        assert_eq!(scan_slice(&data, &pattern("11 48 8B")), Some(1));
    }

    #[test]
    fn test_first_match_wins_with_overlap() {
        let data = [0xAA, 0xAA, 0xAA, 0xBB];
        assert_eq!(scan_slice(&data, &pattern("AA AA")), Some(0));
    }

    #[test]
    fn test_no_match() {
        let data = [0x01, 0x02, 0x03];
        assert_eq!(scan_slice(&data, &pattern("AA BB")), None);
    }

    #[test]
    fn test_pattern_longer_than_range() {
        let data = [0xAA, 0xBB];
        assert_eq!(scan_slice(&data, &pattern("AA BB CC")), None);
    }

    #[test]
    fn test_match_at_very_end() {
        let data = [0x00, 0x00, 0xAA, 0xBB];
        assert_eq!(scan_slice(&data, &pattern("AA BB")), Some(2));
    }

    #[test]
    fn test_deterministic_result() {
        let data: Vec<u8> = (0..255).cycle().take(4096).map(|b| b as u8).collect();
        let pattern = pattern("10 ? 12");
        let first = scan_slice(&data, &pattern);
        for _ in 0..3 {
            assert_eq!(scan_slice(&data, &pattern), first);
        }
    }

    #[test]
    fn test_wildcard_lead_token_scans_every_position() {
        let data = [0x01, 0xAA, 0x02, 0xAA, 0x03];
        assert_eq!(scan_slice(&data, &pattern("? AA")), Some(0));
        assert_eq!(scan_slice(&data, &pattern("? 03")), Some(3));
    }
}
