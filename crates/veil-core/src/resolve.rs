//! Relative-load instruction decoding.
//!
//! Signatures land on call sites; the instruction that loads the interesting
//! function's address precedes the site in the byte stream. Walking backward
//! by a small offset lands on a `lea rdx, [rip+disp32]` encoding
//! (`48 8D 15 xx xx xx xx`), whose signed 32-bit displacement is measured
//! from the byte immediately after the displacement field. Compiled code
//! around a stable call site is not byte-stable across builds, so a bounded
//! window of alternative offsets is searched when the primary one does not
//! decode.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::memory::QueryExecutable;
use crate::pattern::Pattern;

/// `lea rdx, [rip+disp32]` opcode prefix.
pub const REL_LOAD_PREFIX: [u8; 3] = [0x48, 0x8D, 0x15];

/// Full instruction length: prefix plus the 4-byte displacement.
pub const REL_LOAD_LEN: usize = REL_LOAD_PREFIX.len() + 4;

/// Bounded search window of byte offsets (relative to the signature
/// address) at which the relative-load instruction may start. Offsets are
/// negative; the instruction precedes the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OffsetWindow {
    pub primary: isize,
    pub min: isize,
    pub max: isize,
}

impl Default for OffsetWindow {
    fn default() -> Self {
        Self {
            primary: -7,
            min: -15,
            max: -3,
        }
    }
}

impl OffsetWindow {
    /// Candidate offsets, primary first, then by increasing distance from
    /// the primary (below before above at equal distance), clamped to
    /// `[min, max]`.
    pub fn candidates(&self) -> impl Iterator<Item = isize> + '_ {
        let span = (self.max - self.min).unsigned_abs().max(1);
        std::iter::once(self.primary)
            .chain((1..=span as isize).flat_map(move |distance| {
                [self.primary - distance, self.primary + distance]
            }))
            .filter(move |offset| (self.min..=self.max).contains(offset))
    }
}

/// A function address recovered from a located signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFunction {
    pub address: usize,
    pub pattern: Pattern,
    pub offset: isize,
}

/// Decode the relative-load instruction at `position` inside `image`
/// (loaded at `base`) and compute its absolute target.
///
/// Pure: the same image, base, and position always produce the same result.
pub fn decode_rel_load(image: &[u8], base: usize, position: usize) -> Option<usize> {
    let bytes = image.get(position..position + REL_LOAD_LEN)?;
    if bytes[..REL_LOAD_PREFIX.len()] != REL_LOAD_PREFIX {
        return None;
    }

    let displacement = i32::from_le_bytes([bytes[3], bytes[4], bytes[5], bytes[6]]);
    let next_instruction = base.checked_add(position)?.checked_add(REL_LOAD_LEN)?;

    Some(next_instruction.wrapping_add_signed(displacement as isize))
}

/// Resolve the function a located signature refers to.
///
/// `signature_address` is the absolute address the scanner reported inside
/// `image`/`base`. Each candidate offset must both decode to the expected
/// encoding and produce a target that passes the executable gate; the
/// first offset satisfying both wins.
pub fn resolve_in_image<Q: QueryExecutable>(
    image: &[u8],
    base: usize,
    signature_address: usize,
    pattern: &Pattern,
    window: &OffsetWindow,
    gate: &Q,
) -> Option<ResolvedFunction> {
    let signature_offset = signature_address.checked_sub(base)?;

    for offset in window.candidates() {
        let Some(position) = signature_offset.checked_add_signed(offset) else {
            continue;
        };

        let Some(target) = decode_rel_load(image, base, position) else {
            trace!(offset, "no relative-load encoding at candidate offset");
            continue;
        };

        if !gate.is_executable(target) {
            debug!(
                offset,
                target = format_args!("{:#x}", target),
                "decoded target rejected by executable gate"
            );
            continue;
        }

        debug!(
            offset,
            target = format_args!("{:#x}", target),
            pattern = %pattern,
            "resolved function address"
        );
        return Some(ResolvedFunction {
            address: target,
            pattern: pattern.clone(),
            offset,
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::mock::MockExecQuery;

    const BASE: usize = 0x7FF6_0000_0000;

    /// Image with a relative-load instruction at `position` pointing at
    /// `target`, given the image is loaded at `BASE`.
    fn image_with_lea(len: usize, position: usize, target: usize) -> Vec<u8> {
        let mut image = vec![0x90u8; len];
        image[position..position + 3].copy_from_slice(&REL_LOAD_PREFIX);
        let displacement =
            (target as i64 - (BASE + position + REL_LOAD_LEN) as i64) as i32;
        image[position + 3..position + 7].copy_from_slice(&displacement.to_le_bytes());
        image
    }

    fn pattern() -> Pattern {
        Pattern::parse("48 8B ? 88 00 00 00 E8").unwrap()
    }

    #[test]
    fn test_decode_forward_displacement() {
        let target = BASE + 0x500;
        let image = image_with_lea(0x100, 0x10, target);
        assert_eq!(decode_rel_load(&image, BASE, 0x10), Some(target));
    }

    #[test]
    fn test_decode_negative_displacement() {
        let target = BASE + 0x8;
        let image = image_with_lea(0x100, 0x40, target);
        assert_eq!(decode_rel_load(&image, BASE, 0x40), Some(target));
    }

    #[test]
    fn test_decode_rejects_wrong_prefix() {
        let mut image = image_with_lea(0x100, 0x10, BASE + 0x500);
        image[0x11] = 0x8E;
        assert_eq!(decode_rel_load(&image, BASE, 0x10), None);
    }

    #[test]
    fn test_decode_rejects_truncated_instruction() {
        let image = image_with_lea(0x100, 0x10, BASE + 0x500);
        assert_eq!(decode_rel_load(&image[..0x13], BASE, 0x10), None);
    }

    #[test]
    fn test_decode_is_pure() {
        let image = image_with_lea(0x100, 0x10, BASE + 0x500);
        let first = decode_rel_load(&image, BASE, 0x10);
        for _ in 0..5 {
            assert_eq!(decode_rel_load(&image, BASE, 0x10), first);
        }
    }

    #[test]
    fn test_resolve_at_primary_offset() {
        let target = BASE + 0x2000;
        // Signature at 0x47; instruction at 0x47 - 7 = 0x40.
        let image = image_with_lea(0x100, 0x40, target);
        let gate = MockExecQuery::new().allow(target);

        let resolved = resolve_in_image(
            &image,
            BASE,
            BASE + 0x47,
            &pattern(),
            &OffsetWindow::default(),
            &gate,
        )
        .unwrap();

        assert_eq!(resolved.address, target);
        assert_eq!(resolved.offset, -7);
    }

    #[test]
    fn test_resolve_falls_back_when_primary_does_not_decode() {
        let target = BASE + 0x2000;
        // Instruction at signature - 9; nothing decodable at -7.
        let image = image_with_lea(0x100, 0x40, target);
        let gate = MockExecQuery::new().allow(target);

        let resolved = resolve_in_image(
            &image,
            BASE,
            BASE + 0x49,
            &pattern(),
            &OffsetWindow::default(),
            &gate,
        )
        .unwrap();

        assert_eq!(resolved.address, target);
        assert_eq!(resolved.offset, -9);
    }

    #[test]
    fn test_resolve_skips_candidate_failing_executable_gate() {
        let bad_target = BASE + 0x2000;
        let good_target = BASE + 0x3000;

        // Back-to-back relative loads at -14 and -7 from the signature.
        // The primary (-7) decodes but its target is not executable, so the
        // search must keep walking the window until -14 passes the gate.
        let mut image = image_with_lea(0x100, 0x40, bad_target);
        let fallback = image_with_lea(0x100, 0x39, good_target);
        image[0x39..0x40].copy_from_slice(&fallback[0x39..0x40]);

        let gate = MockExecQuery::new().allow(good_target);

        let resolved = resolve_in_image(
            &image,
            BASE,
            BASE + 0x47,
            &pattern(),
            &OffsetWindow::default(),
            &gate,
        )
        .unwrap();

        assert_eq!(resolved.offset, -14);
        assert_eq!(resolved.address, good_target);
    }

    #[test]
    fn test_resolve_not_found_when_window_exhausted() {
        let image = vec![0x90u8; 0x100];
        let gate = MockExecQuery::new();
        assert!(
            resolve_in_image(
                &image,
                BASE,
                BASE + 0x47,
                &pattern(),
                &OffsetWindow::default(),
                &gate,
            )
            .is_none()
        );
    }

    #[test]
    fn test_candidate_order_is_closest_to_primary_first() {
        let window = OffsetWindow::default();
        let order: Vec<isize> = window.candidates().collect();
        assert_eq!(order[0], -7);
        assert_eq!(&order[1..5], &[-8, -6, -9, -5]);
        assert!(order.contains(&-15));
        assert!(order.contains(&-3));
        assert!(!order.contains(&-16));
        assert!(!order.contains(&-2));
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let target = BASE + 0x2000;
        let image = image_with_lea(0x100, 0x40, target);
        let gate = MockExecQuery::new().allow(target);
        let window = OffsetWindow::default();

        let first = resolve_in_image(&image, BASE, BASE + 0x47, &pattern(), &window, &gate);
        for _ in 0..5 {
            assert_eq!(
                resolve_in_image(&image, BASE, BASE + 0x47, &pattern(), &window, &gate),
                first
            );
        }
    }
}
