//! Mock relayd binary for integration testing
//!
//! Implements a minimal newline-delimited JSON-RPC daemon on stdio so
//! the client can be tested without a real messaging daemon. Besides
//! the normal methods it understands a few test-only verbs: `emit`
//! pushes a notification, `stderr` prints a given line to stderr,
//! `garbage` writes a non-JSON line, `sleep` never answers, and
//! `exit` terminates the process.

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};

fn main() {
    eprintln!("INFO mock_relayd - started");

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let reader = BufReader::new(stdin.lock());
    let mut writer = stdout.lock();

    for line in reader.lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        let message: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(_) => continue,
        };

        let method = message["method"].as_str().unwrap_or_default().to_string();
        let id = message["id"].clone();
        let params = message["params"].clone();

        match method.as_str() {
            "version" => respond(&mut writer, &id, json!({ "version": "0.1.0-mock" })),
            "send" => respond(&mut writer, &id, json!({ "timestamp": 123, "results": [] })),
            "sendReaction" | "sendTyping" | "sendReceipt" => {
                respond(&mut writer, &id, json!({ "timestamp": 123, "results": [] }))
            }
            "listGroups" | "listContacts" | "listDevices" | "listAccounts"
            | "listStickerPacks" => respond(&mut writer, &id, json!([])),
            // Push the given notification before acking
            "emit" => {
                let notification = json!({
                    "jsonrpc": "2.0",
                    "method": params["method"],
                    "params": params["params"],
                });
                write_line(&mut writer, &notification);
                respond(&mut writer, &id, json!({}));
            }
            // Print a line to stderr, for severity classification tests
            "stderr" => {
                eprintln!("{}", params["line"].as_str().unwrap_or_default());
                respond(&mut writer, &id, json!({}));
            }
            // A non-JSON line followed by the ack, on purpose
            "garbage" => {
                writer.write_all(b"** not json **\n").ok();
                writer.flush().ok();
                respond(&mut writer, &id, json!({}));
            }
            // Never answers; used for timeout tests
            "sleep" => {}
            "fail" => respond_error(&mut writer, &id, -32000, "mock failure", None),
            "ratelimit" => respond_error(
                &mut writer,
                &id,
                -429,
                "rate limited",
                Some(json!({ "retryAfter": 17 })),
            ),
            "exit" => std::process::exit(1),
            _ => respond(&mut writer, &id, json!({})),
        }
    }
}

fn respond<W: Write>(writer: &mut W, id: &Value, result: Value) {
    write_line(
        writer,
        &json!({ "jsonrpc": "2.0", "id": id, "result": result }),
    );
}

fn respond_error<W: Write>(writer: &mut W, id: &Value, code: i64, message: &str, data: Option<Value>) {
    let mut error = json!({ "code": code, "message": message });
    if let Some(data) = data {
        error["data"] = data;
    }
    write_line(writer, &json!({ "jsonrpc": "2.0", "id": id, "error": error }));
}

fn write_line<W: Write>(writer: &mut W, message: &Value) {
    let body = serde_json::to_string(message).unwrap();
    writer.write_all(body.as_bytes()).ok();
    writer.write_all(b"\n").ok();
    writer.flush().ok();
}
