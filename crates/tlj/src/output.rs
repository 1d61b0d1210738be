use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Event,
    Request,
    Response,
}

impl Kind {
    fn as_str(self) -> &'static str {
        match self {
            Kind::Event => "event",
            Kind::Request => "request",
            Kind::Response => "response",
        }
    }
}

/// One value received by `serve` or `send`.
#[derive(Debug, Serialize)]
pub struct Received {
    pub kind: Kind,
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
    pub peer: String,
    pub value: serde_json::Value,
    pub timestamp: u64,
}

impl Received {
    pub fn new(kind: Kind, code: u16, peer: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            kind,
            code,
            request_id: None,
            connection: None,
            peer: peer.into(),
            value,
            timestamp: now_unix_seconds(),
        }
    }
}

pub fn render(received: &Received, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => {
            serde_json::to_string(received).unwrap_or_else(|_| "{}".to_string())
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["KIND", "CODE", "REQUEST", "CONNECTION", "PEER", "VALUE"])
                .add_row(vec![
                    received.kind.as_str().to_string(),
                    received.code.to_string(),
                    optional(received.request_id),
                    received.connection.clone().unwrap_or_else(|| "-".to_string()),
                    received.peer.clone(),
                    received.value.to_string(),
                ]);
            table.to_string()
        }
        OutputFormat::Pretty => {
            let mut line = format!("{} code={}", received.kind.as_str(), received.code);
            if let Some(id) = received.request_id {
                line.push_str(&format!(" request={id}"));
            }
            if let Some(conn) = &received.connection {
                line.push_str(&format!(" connection={conn}"));
            }
            line.push_str(&format!(" peer={} value={}", received.peer, received.value));
            line
        }
    }
}

pub fn print_received(received: &Received, format: OutputFormat) {
    println!("{}", render(received, format));
}

fn optional(value: Option<u16>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn now_unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample() -> Received {
        let mut received = Received::new(Kind::Request, 1, "unix:/tmp/a.sock", json!({"ID": 1}));
        received.request_id = Some(7);
        received.connection = Some("conn-3".to_string());
        received
    }

    #[test]
    fn json_output_is_one_object() {
        let rendered = render(&sample(), OutputFormat::Json);
        let parsed: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed["kind"], "request");
        assert_eq!(parsed["request_id"], 7);
        assert_eq!(parsed["value"]["ID"], 1);
    }

    #[test]
    fn json_output_omits_missing_fields() {
        let received = Received::new(Kind::Event, 1, "tcp:127.0.0.1:9", json!(null));
        let rendered = render(&received, OutputFormat::Json);
        assert!(!rendered.contains("request_id"));
        assert!(!rendered.contains("connection"));
    }

    #[test]
    fn pretty_output_is_single_line() {
        let rendered = render(&sample(), OutputFormat::Pretty);
        assert_eq!(
            rendered,
            r#"request code=1 request=7 connection=conn-3 peer=unix:/tmp/a.sock value={"ID":1}"#
        );
    }

    #[test]
    fn table_output_has_header() {
        let rendered = render(&sample(), OutputFormat::Table);
        assert!(rendered.contains("CONNECTION"));
        assert!(rendered.contains("conn-3"));
    }
}
