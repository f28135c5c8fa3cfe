// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::json;

use super::*;

fn client() -> ClientRef {
    ClientRef::new("ws", 3)
}

// -- parse_frame --------------------------------------------------------------

#[test]
fn parse_stamps_client_over_supplied_identity() -> anyhow::Result<()> {
    let text = r#"{"tag":"t1","agent":"cache","cmd":"get","args":["k"],"clientAgent":"evil","clientId":99}"#;
    let command = parse_frame(text).map_err(|r| anyhow::anyhow!("{r:?}"))?.into_command(&client());
    let command = command.map_err(|r| anyhow::anyhow!("{r:?}"))?;

    assert_eq!(command.client_agent, "ws");
    assert_eq!(command.client_id, 3);
    assert_eq!(command.tag, "t1");
    assert_eq!(command.agent, "cache");
    assert_eq!(command.cmd, "get");
    assert_eq!(command.args, vec![json!("k")]);
    Ok(())
}

#[test]
fn parse_invalid_json_is_untagged_error() {
    let Err(resp) = parse_frame("{not json") else {
        unreachable!("invalid json must not parse");
    };
    match resp {
        Response::Error { tag, error_msg } => {
            assert!(tag.is_none());
            assert!(error_msg.starts_with("Invalid command:"), "{error_msg}");
        }
        other => unreachable!("unexpected response {other:?}"),
    }
}

#[test]
fn parse_non_object_is_untagged_error() {
    let resp = parse_frame("[1,2]").err();
    assert!(matches!(resp, Some(Response::Error { tag: None, .. })));
}

#[yare::parameterized(
    absent = { r#"{"cmd":"get"}"# },
    empty = { r#"{"tag":"","cmd":"get"}"# },
    null = { r#"{"tag":null,"cmd":"get"}"# },
)]
fn parse_missing_tag(text: &str) {
    let resp = parse_frame(text).err();
    assert_eq!(resp, Some(Response::untagged_error("missing tag")));
}

#[test]
fn missing_command_keeps_tag() -> anyhow::Result<()> {
    let frame = parse_frame(r#"{"tag":"t9","args":[]}"#).map_err(|r| anyhow::anyhow!("{r:?}"))?;
    let resp = frame.into_command(&client()).err();
    assert_eq!(resp, Some(Response::error("t9", "missing command")));
    Ok(())
}

#[test]
fn absent_agent_and_args_default_to_empty() -> anyhow::Result<()> {
    let frame = parse_frame(r#"{"tag":"a","cmd":"ping"}"#).map_err(|r| anyhow::anyhow!("{r:?}"))?;
    let command = frame.into_command(&client()).map_err(|r| anyhow::anyhow!("{r:?}"))?;
    assert!(command.agent.is_empty());
    assert!(command.args.is_empty());
    Ok(())
}

// -- Response wire format -----------------------------------------------------

#[test]
fn ok_response_wire_shape() -> anyhow::Result<()> {
    let wire = Response::ok("t", json!({"A": "socket"})).to_wire();
    let parsed: serde_json::Value = serde_json::from_str(&wire)?;
    assert_eq!(parsed, json!({"status": "ok", "tag": "t", "result": {"A": "socket"}}));
    Ok(())
}

#[test]
fn error_response_uses_error_msg_key() -> anyhow::Result<()> {
    let wire = Response::error("t", "duplicate tag").to_wire();
    let parsed: serde_json::Value = serde_json::from_str(&wire)?;
    assert_eq!(parsed, json!({"status": "error", "tag": "t", "errorMsg": "duplicate tag"}));
    Ok(())
}

#[test]
fn pmessage_wire_shape() -> anyhow::Result<()> {
    let resp = Response::PMessage {
        pattern: "news.*".to_owned(),
        channel: "news.eu".to_owned(),
        message: "hi".to_owned(),
    };
    assert!(resp.is_async());
    assert!(resp.tag().is_none());
    let parsed: serde_json::Value = serde_json::from_str(&resp.to_wire())?;
    assert_eq!(parsed["status"], "pmessage");
    assert_eq!(parsed["pattern"], "news.*");
    assert_eq!(parsed["channel"], "news.eu");
    Ok(())
}

#[test]
fn batch_is_array_of_serialized_strings() -> anyhow::Result<()> {
    let items = vec![Response::ok("a", json!(1)).to_wire(), Response::ok("b", json!(2)).to_wire()];
    let batch = encode_batch(&items);
    let outer: Vec<String> = serde_json::from_str(&batch)?;
    assert_eq!(outer, items);
    let first: Response = serde_json::from_str(&outer[0])?;
    assert_eq!(first, Response::ok("a", json!(1)));
    Ok(())
}

#[yare::parameterized(
    string = { json!("k"), "k" },
    number = { json!(42), "42" },
    boolean = { json!(true), "true" },
    object = { json!({"a": 1}), r#"{"a":1}"# },
)]
fn args_render_as_text(value: serde_json::Value, expected: &str) {
    assert_eq!(arg_to_string(&value), expected);
}
