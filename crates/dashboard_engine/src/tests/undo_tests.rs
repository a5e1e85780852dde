use super::*;
use shared::protocol::{CommandKind, LAST_INDEX};

fn rename(title: &str) -> Command {
    Command::new(CommandKind::Rename {
        title: title.to_string(),
    })
}

#[test]
fn undo_returns_entries_newest_first() {
    let ledger = UndoLedger::new(10);
    ledger.record(rename("b"), vec![rename("a")]);
    ledger.record(rename("c"), vec![rename("b")]);

    let newest = ledger.undo().expect("not blocked").expect("entry");
    assert_eq!(newest.command, rename("c"));
    assert_eq!(newest.inverse_commands(), &[rename("b")]);
    ledger.complete_undo(newest);

    assert_eq!(ledger.undo_len(), 1);
    assert_eq!(ledger.redo_len(), 1);
    assert!(ledger.can_redo());
}

#[test]
fn recording_clears_the_redo_stack() {
    let ledger = UndoLedger::new(10);
    ledger.record(rename("b"), vec![rename("a")]);
    let entry = ledger.undo().expect("not blocked").expect("entry");
    ledger.complete_undo(entry);
    assert!(ledger.can_redo());

    ledger.record(rename("x"), vec![rename("a")]);

    assert!(!ledger.can_redo());
    assert_eq!(ledger.redo(), Ok(None));
}

#[test]
fn redo_moves_the_entry_back_without_dropping_other_redo_entries() {
    let ledger = UndoLedger::new(10);
    ledger.record(rename("b"), vec![rename("a")]);
    ledger.record(rename("c"), vec![rename("b")]);
    for _ in 0..2 {
        let entry = ledger.undo().expect("not blocked").expect("entry");
        ledger.complete_undo(entry);
    }

    let entry = ledger.redo().expect("not blocked").expect("redo entry");
    assert_eq!(entry.command, rename("b"));
    ledger.complete_redo(entry);

    assert_eq!(ledger.undo_len(), 1);
    assert_eq!(ledger.redo_len(), 1);
}

#[test]
fn not_undoable_entry_blocks_with_its_reason() {
    let ledger = UndoLedger::new(10);
    ledger.record(rename("b"), vec![rename("a")]);
    ledger.record_not_undoable(
        Command::new(CommandKind::SaveAs {
            title: None,
            switch_to_copy: true,
        }),
        "switched to a copy",
    );

    let blocked = ledger.undo().expect_err("blocked");

    assert_eq!(blocked.command_type, "GDC.DASH/CMD.SAVEAS");
    assert_eq!(blocked.reason, "switched to a copy");
    assert!(!ledger.can_undo());
    assert_eq!(ledger.undo_len(), 2);
}

#[test]
fn depth_bound_drops_the_oldest_entry() {
    let ledger = UndoLedger::new(2);
    for title in ["a", "b", "c"] {
        ledger.record(rename(title), Vec::new());
    }

    assert_eq!(ledger.undo_len(), 2);
    let mut undone = Vec::new();
    while let Ok(Some(entry)) = ledger.undo() {
        undone.push(entry.command.clone());
        ledger.complete_undo(entry);
    }
    assert_eq!(undone, vec![rename("c"), rename("b")]);
}

#[test]
fn recorded_commands_drop_their_correlation_ids() {
    let ledger = UndoLedger::new(5);
    let command = shared::protocol::add_section(LAST_INDEX, Vec::new()).with_correlation_id("c-1");

    ledger.record(command, vec![rename("a").with_correlation_id("c-2")]);

    let entry = ledger.undo().expect("not blocked").expect("entry");
    assert_eq!(entry.command.correlation_id, None);
    assert_eq!(entry.inverse_commands()[0].correlation_id, None);
}

#[test]
fn zero_depth_disables_recording() {
    let ledger = UndoLedger::new(0);
    ledger.record(rename("a"), Vec::new());

    assert!(!ledger.can_undo());
    assert_eq!(ledger.undo(), Ok(None));
}

#[test]
fn undo_leaves_the_entry_in_place_until_it_completes() {
    let ledger = UndoLedger::new(10);
    ledger.record(rename("b"), vec![rename("a")]);

    let entry = ledger.undo().expect("not blocked").expect("entry");

    assert_eq!(ledger.undo_len(), 1);
    assert_eq!(ledger.redo_len(), 0);
    let busy = ledger.undo().expect_err("replay still running");
    assert_eq!(busy.command_type, "GDC.DASH/CMD.RENAME");

    ledger.complete_undo(entry);
    assert_eq!(ledger.undo_len(), 0);
    assert_eq!(ledger.redo_len(), 1);
}

#[test]
fn undo_that_applied_nothing_can_be_retried() {
    let ledger = UndoLedger::new(10);
    ledger.record(rename("b"), vec![rename("a")]);
    ledger.record(rename("c"), vec![rename("b")]);

    let entry = ledger.undo().expect("not blocked").expect("entry");
    ledger.abort_undo(&entry, 0);

    let retried = ledger.undo().expect("not blocked").expect("entry");
    assert_eq!(retried, entry);
    assert!(ledger.can_undo());
}

#[test]
fn undo_that_failed_part_way_becomes_a_barrier() {
    let ledger = UndoLedger::new(10);
    ledger.record(rename("b"), vec![rename("a")]);
    ledger.record(rename("c"), vec![rename("x"), rename("b")]);

    let entry = ledger.undo().expect("not blocked").expect("entry");
    ledger.abort_undo(&entry, 1);

    let blocked = ledger.undo().expect_err("barrier");
    assert_eq!(blocked.command_type, "GDC.DASH/CMD.RENAME");
    assert!(blocked.reason.contains("1 of 2"), "{}", blocked.reason);
    assert!(!ledger.can_undo());
    assert_eq!(ledger.undo_len(), 2);
}

#[test]
fn failed_redo_keeps_the_entry_for_another_try() {
    let ledger = UndoLedger::new(10);
    ledger.record(rename("b"), vec![rename("a")]);
    let entry = ledger.undo().expect("not blocked").expect("entry");
    ledger.complete_undo(entry);

    let entry = ledger.redo().expect("not blocked").expect("entry");
    ledger.abort_redo();

    assert_eq!(ledger.redo_len(), 1);
    assert_eq!(ledger.redo(), Ok(Some(entry)));
}

#[test]
fn edits_recorded_during_an_undo_stay_on_the_stack() {
    let ledger = UndoLedger::new(10);
    ledger.record(rename("b"), vec![rename("a")]);
    let entry = ledger.undo().expect("not blocked").expect("entry");

    ledger.record(rename("z"), vec![rename("b")]);
    ledger.complete_undo(entry);

    assert_eq!(ledger.undo_len(), 1);
    let newest = ledger.undo().expect("not blocked").expect("entry");
    assert_eq!(newest.command, rename("z"));
}
