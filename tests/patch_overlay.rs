//! The known-script patch table (§4.I) at the integration level: applying a
//! registered correction and then undoing it restores the original bytes,
//! using one of the table's real entries rather than a synthetic fixture.

use gds_compiler::patch;

#[test]
fn e126_patch_and_unpatch_round_trip_through_the_real_table() {
    let path = "data/script/event/e126.gds";
    let mut data = vec![0u8; 0x3a0];
    data[0x398] = 0x01;

    let patched = patch::patch(&data, path);
    assert_eq!(patched[0x398], 0x02);

    let restored = patch::unpatch(&patched, path);
    assert_eq!(restored, data);
}

#[test]
fn a_script_with_no_registered_patches_passes_through_unchanged() {
    let data = vec![1, 2, 3, 4, 5];
    assert_eq!(patch::patch(&data, "data/script/rooms/room99_in.gds"), data);
    assert_eq!(patch::unpatch(&data, "data/script/rooms/room99_in.gds"), data);
}

#[test]
fn mismatched_bytes_at_a_known_offset_are_left_alone() {
    let path = "data/script/event/e126.gds";
    let mut data = vec![0u8; 0x3a0];
    data[0x398] = 0xff;

    let patched = patch::patch(&data, path);
    assert_eq!(patched, data);
}
