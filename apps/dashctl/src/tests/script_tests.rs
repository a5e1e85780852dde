use super::{parse_script, validate};

#[test]
fn parses_a_json_array() {
    let commands = parse_script(
        r#"[
            {"type": "GDC.DASH/CMD.UNDO"},
            {"type": "GDC.DASH/CMD.RENAME", "payload": {"title": "Q3"}}
        ]"#,
    )
    .expect("script");

    assert_eq!(commands.len(), 2);
    assert_eq!(commands[1]["payload"]["title"], "Q3");
}

#[test]
fn parses_json_lines_skipping_comments() {
    let commands = parse_script(
        "# load first\n{\"type\": \"GDC.DASH/CMD.INITIALIZE\"}\n\n{\"type\": \"GDC.DASH/CMD.SAVE\"}\n",
    )
    .expect("script");

    assert_eq!(commands.len(), 2);
    assert_eq!(commands[0]["type"], "GDC.DASH/CMD.INITIALIZE");
}

#[test]
fn reports_the_offending_line() {
    let err = parse_script("{\"type\": \"GDC.DASH/CMD.SAVE\"}\nnot json\n").expect_err("bad line");

    assert!(err.to_string().contains("line 2"), "{err}");
}

#[test]
fn validation_flags_unknown_types_and_bad_payloads() {
    let commands = parse_script(
        "{\"type\": \"GDC.DASH/CMD.RENAME\", \"payload\": {\"title\": 1}}\n{\"type\": \"acme.custom\"}\n{\"type\": \"GDC.DASH/CMD.REDO\"}\n",
    )
    .expect("script");

    let err = validate(&commands).expect_err("invalid");
    let message = err.to_string();

    assert!(message.starts_with("2 invalid commands"), "{message}");
    assert!(message.contains("#1: unknown command type acme.custom"), "{message}");
    assert!(validate(&commands[2..]).is_ok());
}
