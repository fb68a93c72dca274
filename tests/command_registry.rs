//! The bundled command definitions (§4.B): loading the real
//! `resources/gds_commands` tree, complex-command dispatch, alias
//! resolution and context narrowing.

use std::path::PathBuf;

use gds_compiler::model::GDSContext;
use gds_compiler::schema::command::Complex;
use gds_compiler::Registry;

fn registry() -> Registry {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("resources/gds_commands");
    Registry::load(&root).expect("bundled command definitions should load")
}

#[test]
fn control_flow_commands_dispatch_by_complex_kind() {
    let reg = registry();
    assert_eq!(reg.by_id(0x00).unwrap().complex, Some(Complex::If));
    assert_eq!(reg.by_id(0x01).unwrap().complex, Some(Complex::Elif));
    assert_eq!(reg.by_id(0x02).unwrap().complex, Some(Complex::Else));
    assert_eq!(reg.by_id(0x03).unwrap().complex, Some(Complex::While));
    assert_eq!(reg.by_id(0x04).unwrap().complex, Some(Complex::RepeatN));
    assert!(reg.by_name("set_score").unwrap().complex.is_none());
}

#[test]
fn grouped_commands_resolve_under_their_prefix() {
    let reg = registry();
    let show = reg.by_name("text.show").expect("text.show should be defined");
    assert_eq!(show.id, 0x28);
    let stop = reg.by_name("sound.stop").expect("sound.stop should be defined");
    assert_eq!(stop.id, 0x2d);
    assert!(stop.params.is_empty());
}

#[test]
fn alias_resolves_to_the_same_command_as_its_canonical_name() {
    let reg = registry();
    let canonical = reg.by_name("not_flag_set").expect("not_flag_set should be defined");
    let aliased = reg.by_name("flag_clear").expect("flag_clear alias should resolve");
    assert_eq!(canonical.id, aliased.id);
    assert_eq!(canonical.id, 0x11);
}

#[test]
fn context_narrowing_flags_a_puzzle_only_command_against_the_default_context() {
    let reg = registry();
    let puzzle_solved = reg.by_name("puzzle_solved").expect("puzzle_solved should be defined");
    assert_eq!(puzzle_solved.context, vec!["puzzle".to_string()]);

    let mut ctx = GDSContext::new();
    assert!(!ctx.narrow(puzzle_solved));
    assert_eq!(ctx.conflicts.len(), 1);
    assert!(ctx.candidates.contains(&"all".to_string()));
    assert!(ctx.candidates.contains(&"puzzle".to_string()));
}

#[test]
fn context_narrowing_accepts_an_all_context_command_with_no_conflict() {
    let reg = registry();
    let wait_frames = reg.by_name("wait_frames").expect("wait_frames should be defined");

    let mut ctx = GDSContext::new();
    assert!(ctx.narrow(wait_frames));
    assert!(ctx.conflicts.is_empty());
    assert_eq!(ctx.candidates, vec!["all".to_string()]);
}
