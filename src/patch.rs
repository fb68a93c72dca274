//! The patch overlay (§4.I).
//!
//! A handful of real script files ship with bytes that don't round-trip
//! cleanly (typos in a condition token, a cut feature left half-wired). The
//! overlay corrects those bytes before decoding and can restore them before
//! re-encoding, so compiling a decompiled-then-recompiled file still
//! produces the original on-disk bytes. Entries that don't match the
//! expected old bytes are skipped with a warning rather than applied blind.

use crate::error::PatchWarning;

/// One correction: at `offset`, `old` is replaced with `new` (and vice versa
/// for [`unpatch`]). `old` and `new` must be the same length.
#[derive(Debug, Clone, Copy)]
pub struct PatchEntry {
    pub offset: usize,
    pub old: &'static [u8],
    pub new: &'static [u8],
}

/// A named file's list of corrections.
#[derive(Debug, Clone, Copy)]
pub struct PatchSet {
    pub path: &'static str,
    pub entries: &'static [PatchEntry],
}

/// The compiled-in table of known corrections, keyed by the script's path
/// relative to the game's data directory.
pub const PATCHES: &[PatchSet] = &[
    PatchSet {
        path: "data/script/rooms/room4_param.gds",
        entries: &[PatchEntry { offset: 0x2B1, old: &[0, 0, 0x12, 0], new: &[0x09, 0, 0x09, 0] }],
    },
    PatchSet {
        path: "data/script/rooms/room13_in.gds",
        entries: &[PatchEntry { offset: 0x5C, old: &[0, 0, 0x12, 0], new: &[0x09, 0, 0x09, 0] }],
    },
    PatchSet {
        path: "data/script/rooms/room12_in.gds",
        entries: &[PatchEntry {
            offset: 0x127,
            old: &[0, 0, 0x17, 0, 0, 0, 0x12, 0],
            new: &[0, 0, 0x16, 0, 0x09, 0, 0x09, 0],
        }],
    },
    PatchSet {
        path: "data/script/rooms/room23_in.gds",
        entries: &[PatchEntry {
            offset: 0x18,
            old: &[0, 0, 0x12, 0, 0, 0, 0x8d, 0],
            new: &[0, 0, 0xdf, 0, 0, 0, 0xdf, 0],
        }],
    },
    PatchSet {
        path: "data/script/rooms/room24_in.gds",
        entries: &[PatchEntry {
            offset: 0x18,
            old: &[0, 0, 0x12, 0, 0, 0, 0x8d, 0],
            new: &[0, 0, 0xdf, 0, 0, 0, 0xdf, 0],
        }],
    },
    PatchSet {
        path: "data/script/event/e49.gds",
        entries: &[
            PatchEntry {
                offset: 0x24D,
                old: &[0x01, 0, 0xfa, 0xff, 0xff, 0xff],
                new: &[0x02, 0, 0xc0, 0, 0xc0, 0],
            },
            PatchEntry {
                offset: 0x25D,
                old: &[0x01, 0, 0xfa, 0xff, 0xff, 0xff],
                new: &[0x02, 0, 0xc0, 0, 0xc0, 0],
            },
        ],
    },
    PatchSet {
        path: "data/script/event/e126.gds",
        entries: &[PatchEntry { offset: 0x398, old: &[0x01], new: &[0x02] }],
    },
    PatchSet {
        path: "data/script/event/e276.gds",
        entries: &[PatchEntry { offset: 0x1B4, old: &[0x01], new: &[0x02] }],
    },
    PatchSet {
        path: "data/script/event/e233.gds",
        entries: &[PatchEntry { offset: 0x1F8, old: &[0x01], new: &[0x02] }],
    },
    PatchSet {
        path: "data/script/event/e42.gds",
        entries: &[PatchEntry { offset: 0x1C3, old: &[0x01], new: &[0x02] }],
    },
];

fn find(path: &str) -> Option<&'static PatchSet> {
    PATCHES.iter().find(|p| p.path == path)
}

/// Applies every correction registered for `path` to `data`, in place.
/// Entries whose expected `old` bytes don't match the input are skipped with
/// a `log::warn!`, not an error.
pub fn patch(data: &[u8], path: &str) -> Vec<u8> {
    let mut out = data.to_vec();
    let Some(set) = find(path) else {
        return out;
    };
    for entry in set.entries {
        apply_one(&mut out, path, entry.offset, entry.old, entry.new);
    }
    out
}

/// The inverse of [`patch`]: restores the original bytes a correction
/// replaced, so a recompiled file matches the as-shipped binary again.
pub fn unpatch(data: &[u8], path: &str) -> Vec<u8> {
    let mut out = data.to_vec();
    let Some(set) = find(path) else {
        return out;
    };
    for entry in set.entries {
        apply_one(&mut out, path, entry.offset, entry.new, entry.old);
    }
    out
}

fn apply_one(data: &mut [u8], path: &str, offset: usize, expect: &[u8], replacement: &[u8]) {
    if offset + expect.len() > data.len() {
        log::warn!(
            "{}",
            PatchWarning { path: path.to_string(), offset, reason: "offset out of range".to_string() }
        );
        return;
    }
    let slice = &data[offset..offset + expect.len()];
    if slice != expect {
        log::warn!(
            "{}",
            PatchWarning {
                path: path.to_string(),
                offset,
                reason: "bytes at site did not match the expected old bytes".to_string(),
            }
        );
        return;
    }
    data[offset..offset + replacement.len()].copy_from_slice(replacement);
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENTRIES: &[PatchEntry] = &[PatchEntry { offset: 2, old: &[0xaa], new: &[0xbb] }];
    const SET: PatchSet = PatchSet { path: "test/fixture.gds", entries: ENTRIES };

    #[test]
    fn applies_matching_patch() {
        let data = [0, 0, 0xaa, 0];
        let mut out = data.to_vec();
        apply_one(&mut out, SET.path, 2, &[0xaa], &[0xbb]);
        assert_eq!(out, vec![0, 0, 0xbb, 0]);
    }

    #[test]
    fn skips_mismatched_patch() {
        let mut out = vec![0, 0, 0xcc, 0];
        apply_one(&mut out, SET.path, 2, &[0xaa], &[0xbb]);
        assert_eq!(out, vec![0, 0, 0xcc, 0]);
    }

    #[test]
    fn patch_and_unpatch_round_trip() {
        assert_eq!(patch(&[1, 2, 3], "no/such/file.gds"), vec![1, 2, 3]);
        assert_eq!(unpatch(&[1, 2, 3], "no/such/file.gds"), vec![1, 2, 3]);
    }
}
