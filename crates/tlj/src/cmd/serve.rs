use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use serde_json::Value;
use tlj_peer::Server;
use tracing::{info, warn};

use crate::cmd::{json_registry, ServeArgs, JSON_CODE};
use crate::exit::{peer_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_received, Kind, OutputFormat, Received};

const POLL: Duration = Duration::from_millis(200);

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let types = json_registry(args.validate.as_deref(), args.strict)?;

    let tag = args.tag.clone();
    let server = Server::bind(
        &args.endpoint,
        move |conn, server| {
            server.tag_socket(conn.id(), &tag);
            info!(
                connection = %conn.id(),
                peer = conn.peer(),
                tag = %tag,
                "connection accepted"
            );
        },
        types,
    )
    .map_err(|err| peer_error("bind failed", &err))?;
    info!(endpoint = %args.endpoint, tag = %args.tag, "serving");

    let (tx, rx) = mpsc::channel::<Received>();
    subscribe(&server, &args.tag, tx);

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(Arc::clone(&running))?;

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        if let Some(err) = server.listener_failure() {
            return Err(transport_error("listener failed", &err));
        }
        while let Some(conn) = server.try_next_failed() {
            info!(connection = %conn, "connection closed");
        }

        let received = match rx.recv_timeout(POLL) {
            Ok(received) => received,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        };
        print_received(&received, format);
        printed = printed.saturating_add(1);
        if args.count.is_some_and(|count| printed >= count) {
            break;
        }
    }

    Ok(SUCCESS)
}

/// Print every event; echo every request back to its sender.
fn subscribe(server: &Server, tag: &str, tx: mpsc::Sender<Received>) {
    let events = tx.clone();
    server.accept::<Value, _>(tag, move |value, ctx| {
        let peer = ctx.connection().peer();
        let mut received = Received::new(Kind::Event, JSON_CODE, peer, (*value).clone());
        received.connection = Some(ctx.connection_id().to_string());
        let _ = events.send(received);
    });

    server.accept_request::<Value, _>(tag, move |value, ctx| {
        if let Err(err) = ctx.respond(&*value) {
            warn!(connection = %ctx.connection().id(), error = %err, "echo failed");
        }
        let peer = ctx.connection().peer();
        let mut received = Received::new(Kind::Request, JSON_CODE, peer, (*value).clone());
        received.request_id = Some(ctx.request_id());
        received.connection = Some(ctx.connection().id().to_string());
        let _ = tx.send(received);
    });
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
