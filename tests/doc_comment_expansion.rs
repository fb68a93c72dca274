//! Doc-comment template expansion wired through the real bundled commands
//! (§4.E/§4.G): a plain `${n}` substitution and a `$(path)` file splice,
//! each rendered against a real `tempfile` workdir.

use std::fs;
use std::path::PathBuf;

use gds_compiler::model::{GDSElement, GDSIntValue, GDSInvocation, GDSStringValue, GDSValue, IntLiteralFormat};
use gds_compiler::text::writer::{write_with, WriteOptions};
use gds_compiler::Registry;

fn registry() -> Registry {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("resources/gds_commands");
    Registry::load(&root).expect("bundled command definitions should load")
}

#[test]
fn give_gold_expands_its_amount_into_a_comment_above_the_call() {
    let reg = registry();
    let cmd = reg.by_name("give_gold").expect("give_gold should be defined").clone();
    let inv = GDSInvocation {
        command: cmd,
        args: vec![Some(GDSValue::Int(GDSIntValue {
            value: 50,
            bytelen: 4,
            unsigned: false,
            lit_fmt: IntLiteralFormat::Dec,
        }))],
        flow: None,
    };
    let text = write_with(&[GDSElement::Command(inv)], &WriteOptions::default());
    assert_eq!(text, "# gives 50 gold to the player\ngive_gold(50)\n");
}

#[test]
fn show_script_splices_the_referenced_file_into_the_comment() {
    let reg = registry();
    let cmd = reg.by_name("text.show_script").expect("text.show_script should be defined").clone();
    let workdir = tempfile::tempdir().unwrap();
    fs::create_dir_all(workdir.path().join("scripts")).unwrap();
    fs::write(workdir.path().join("scripts/intro_notes.txt"), "a wizard is never late").unwrap();

    let inv = GDSInvocation {
        command: cmd,
        args: vec![Some(GDSValue::LongStr(GDSStringValue {
            value: "welcome".to_string(),
            maxlen: usize::MAX,
        }))],
        flow: None,
    };
    let opts = WriteOptions { workdir: Some(workdir.path()), ..WriteOptions::default() };
    let text = write_with(&[GDSElement::Command(inv)], &opts);
    assert_eq!(text, "# a wizard is never late\ntext.show_script(l\"welcome\")\n");
}

#[test]
fn missing_spliced_file_renders_a_placeholder_instead_of_failing() {
    let reg = registry();
    let cmd = reg.by_name("text.show_script").expect("text.show_script should be defined").clone();
    let workdir = tempfile::tempdir().unwrap();

    let inv = GDSInvocation {
        command: cmd,
        args: vec![Some(GDSValue::LongStr(GDSStringValue {
            value: "welcome".to_string(),
            maxlen: usize::MAX,
        }))],
        flow: None,
    };
    let opts = WriteOptions { workdir: Some(workdir.path()), ..WriteOptions::default() };
    let text = write_with(&[GDSElement::Command(inv)], &opts);
    assert_eq!(text, "# <FILE NOT FOUND>\ntext.show_script(l\"welcome\")\n");
}
