use pretty_assertions::assert_eq;
use proptest::prelude::*;
use quill_core::{apply_edit, Buffer, TextEdit, TextRange, TextSize};
use quill_syntax::{parse_snapshot, PartialReparseEngine, Tree, Verdict};

fn floor_char_boundary(text: &str, mut offset: usize) -> usize {
    offset = offset.min(text.len());
    while !text.is_char_boundary(offset) {
        offset -= 1;
    }
    offset
}

fn make_edit(text: &str, pos: usize, delete: usize, insert: &str) -> TextEdit {
    let start = floor_char_boundary(text, pos % (text.len() + 1));
    let end = floor_char_boundary(text, start + delete).max(start);
    TextEdit::new(
        TextRange::new(TextSize::from(start as u32), TextSize::from(end as u32)),
        insert,
    )
}

fn source() -> impl Strategy<Value = String> {
    let part = prop_oneof![
        Just("foo"),
        Just("bar1"),
        Just(" "),
        Just("\n"),
        Just("{"),
        Just("}"),
        Just("\"s\""),
        Just("// c\n"),
        Just("/* b */"),
        Just("#use x\n"),
        Just("42"),
        Just(";"),
        Just("é"),
    ];
    proptest::collection::vec(part, 0..12).prop_map(|parts| parts.concat())
}

fn edits() -> impl Strategy<Value = Vec<(usize, usize, String)>> {
    proptest::collection::vec(
        (any::<usize>(), 0usize..3, "[a-z0-9 \"{}/*#;\n]{0,2}"),
        1..16,
    )
}

proptest! {
    #[test]
    fn accepted_patches_match_a_full_parse(text in source(), ops in edits()) {
        let engine = PartialReparseEngine::new();
        let mut buffer = Buffer::new(text);
        let mut tree: Tree = parse_snapshot(buffer.snapshot());

        for (pos, delete, insert) in ops {
            let edit = make_edit(buffer.text(), pos, delete, &insert);
            let snapshot = buffer.apply(&edit).expect("edit is in bounds");
            let full = parse_snapshot(&snapshot);

            match engine.try_patch(&tree, &edit, &snapshot) {
                Verdict::Accept(patched) => {
                    prop_assert!(
                        patched.is_equivalent(&full),
                        "patched {:?} != full {:?} for {:?}",
                        patched.tokens(),
                        full.tokens(),
                        snapshot.text()
                    );
                    prop_assert_eq!(patched.version(), snapshot.version());
                    tree = patched;
                }
                Verdict::ProvisionalAccept(_) | Verdict::Reject(_) => tree = full,
            }
        }
    }

    #[test]
    fn malformed_edits_are_rejected_without_panicking(
        text in source(),
        start in 0u32..64,
        len in 0u32..8,
        insert in "[a-z{]{0,3}",
    ) {
        let tree = parse_snapshot(&quill_core::Snapshot::new(1, text));
        let edit = TextEdit::new(TextRange::at(TextSize::from(start), TextSize::from(len)), insert);
        let snapshot = quill_core::Snapshot::new(2, "unrelated text");
        let _ = PartialReparseEngine::new().try_patch(&tree, &edit, &snapshot);
    }
}

#[test]
fn typing_a_word_character_by_character_stays_on_the_fast_path() {
    let engine = PartialReparseEngine::new();
    let mut buffer = Buffer::new("let v = 1;");
    let mut tree = parse_snapshot(buffer.snapshot());

    for (offset, ch) in [(5u32, "a"), (6, "l"), (7, "u")] {
        let edit = TextEdit::insert(TextSize::from(offset), ch);
        let snapshot = buffer.apply(&edit).unwrap();
        match engine.try_patch(&tree, &edit, &snapshot) {
            Verdict::Accept(patched) => tree = patched,
            other => panic!("expected accept for {ch:?}, got {other:?}"),
        }
    }

    assert_eq!(tree.text(), "let valu = 1;");
    assert!(tree.is_equivalent(&parse_snapshot(buffer.snapshot())));
}

#[test]
fn closing_a_string_early_is_not_accepted() {
    let text = "x = \"abc\";";
    let tree = parse_snapshot(&quill_core::Snapshot::new(1, text));
    let edit = TextEdit::insert(TextSize::from(6), "\"");
    let new_text = apply_edit(text, &edit).unwrap();
    let verdict =
        PartialReparseEngine::new().try_patch(&tree, &edit, &quill_core::Snapshot::new(2, new_text));
    assert!(verdict.is_reject(), "{verdict:?}");
}
