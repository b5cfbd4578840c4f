use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use lwmav_frame::{Dialect, Message};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    msgid: u32,
    name: &'a str,
    sysid: u8,
    compid: u8,
    seq: u8,
    payload_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<Value>,
    payload: String,
    timestamp: String,
}

pub fn print_message(msg: &Message, dialect: &Dialect, format: OutputFormat) {
    let name = dialect.name(msg.msgid()).unwrap_or("UNKNOWN");
    let fields = decode_known(msg);
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                msgid: msg.msgid(),
                name,
                sysid: msg.sysid(),
                compid: msg.compid(),
                seq: msg.seq(),
                payload_size: msg.payload.len(),
                fields,
                payload: hex(&msg.payload),
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["MSG", "ID", "SRC", "SEQ", "FIELDS"])
                .add_row(vec![
                    name.to_string(),
                    msg.msgid().to_string(),
                    format!("{}/{}", msg.sysid(), msg.compid()),
                    msg.seq().to_string(),
                    fields
                        .map(|value| compact_fields(&value))
                        .unwrap_or_else(|| hex(&msg.payload)),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let detail = fields
                .map(|value| compact_fields(&value))
                .unwrap_or_else(|| format!("payload={}", hex(&msg.payload)));
            println!(
                "{name} ({}) from {}/{} seq={} {detail}",
                msg.msgid(),
                msg.sysid(),
                msg.compid(),
                msg.seq()
            );
        }
    }
}

/// Print a single result record: JSON object, key/value table, or lines.
pub fn print_record<T: Serialize>(title: &str, record: &T, format: OutputFormat) {
    let value = serde_json::to_value(record).unwrap_or(Value::Null);
    match format {
        OutputFormat::Json => println!("{value}"),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            for (key, field) in object_entries(&value) {
                table.add_row(vec![key, field]);
            }
            println!("{title}");
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("{title}:");
            for (key, field) in object_entries(&value) {
                println!("  {key:<18} {field}");
            }
        }
    }
}

fn object_entries(value: &Value) -> Vec<(String, String)> {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(key, field)| (key.clone(), scalar(field)))
            .collect(),
        other => vec![("value".to_string(), scalar(other))],
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn compact_fields(value: &Value) -> String {
    object_entries(value)
        .into_iter()
        .map(|(key, field)| format!("{key}={field}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Field view for common-set messages; None for vendor or undecodable
/// payloads.
pub fn decode_known(msg: &Message) -> Option<Value> {
    let mav = msg.to_mav().ok()?;
    let mut value = serde_json::to_value(mav).ok()?;
    // The enum tag repeats the message name.
    if let Value::Object(map) = &mut value {
        map.remove("type");
    }
    Some(value)
}

fn hex(data: &[u8]) -> String {
    data.iter().map(|byte| format!("{byte:02x}")).collect()
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
