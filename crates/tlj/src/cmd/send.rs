use std::fs;
use std::sync::mpsc;

use serde_json::Value;
use tlj_peer::Client;
use tracing::debug;

use crate::cmd::{json_registry, SendArgs, JSON_CODE};
use crate::exit::{
    frame_error, io_error, peer_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE,
};
use crate::output::{print_received, Kind, OutputFormat, Received};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let document = resolve_document(&args)?;
    let types = json_registry(None, false)?;
    let client =
        Client::connect(&args.endpoint, types).map_err(|err| peer_error("connect failed", &err))?;

    if !args.request {
        client
            .message(&document)
            .map_err(|err| peer_error("send failed", &err))?;
        let _ = client.close();
        return Ok(SUCCESS);
    }

    let (tx, rx) = mpsc::channel::<Value>();
    let handle = client
        .request_with::<_, Value, _>(&document, move |answer| {
            let _ = tx.send((*answer).clone());
        })
        .map_err(|err| peer_error("request failed", &err))?;
    debug!(request_id = handle.request_id(), "request sent");

    let answer = match rx.recv_timeout(args.wait_timeout) {
        Ok(answer) => answer,
        Err(_) => {
            let lost = client.closed_reason();
            let _ = client.close();
            if let Some(reason) = lost {
                return Err(frame_error("connection lost before answer", &reason));
            }
            return Err(CliError::new(
                TIMEOUT,
                format!("no answer within {:?}", args.wait_timeout),
            ));
        }
    };

    let mut received = Received::new(Kind::Response, JSON_CODE, args.endpoint.to_string(), answer);
    received.request_id = Some(handle.request_id());
    print_received(&received, format);
    let _ = client.close();
    Ok(SUCCESS)
}

fn resolve_document(args: &SendArgs) -> CliResult<Value> {
    let text = match (&args.json, &args.file) {
        (Some(json), _) => json.clone(),
        (None, Some(path)) => fs::read_to_string(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), &err))?,
        (None, None) => return Err(CliError::new(USAGE, "one of --json or --file is required")),
    };
    serde_json::from_str(&text)
        .map_err(|err| CliError::new(USAGE, format!("not valid JSON: {err}")))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn args(json: Option<&str>) -> SendArgs {
        SendArgs {
            endpoint: "unix:/tmp/unused.sock".parse().unwrap(),
            json: json.map(str::to_string),
            file: None,
            request: false,
            wait_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn inline_json_is_parsed() {
        let value = resolve_document(&args(Some(r#"{"ID":4}"#))).unwrap();
        assert_eq!(value["ID"], 4);
    }

    #[test]
    fn invalid_json_is_usage_error() {
        let err = resolve_document(&args(Some("{nope"))).unwrap_err();
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn missing_document_is_usage_error() {
        assert_eq!(resolve_document(&args(None)).unwrap_err().code, USAGE);
    }
}
