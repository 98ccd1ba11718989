use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, close_code};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use parley_types::events::GatewayEvent;
use parley_types::models::UserProfile;

use crate::config::GatewayConfig;
use crate::endpoint::Endpoint;
use crate::router::MessageRouter;
use crate::routes::GatewayState;

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

#[derive(Debug, Error)]
enum WriteError {
    #[error("socket write failed: {0}")]
    Socket(#[from] axum::Error),

    #[error("socket write timed out after {0:?}")]
    Timeout(Duration),

    #[error("could not encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Drive one authenticated connection from registration to teardown.
///
/// The user is online as soon as it is registered. The welcome frame is
/// written before either pump starts, so it is always the first frame the
/// client sees. Whichever pump exits first closes the endpoint; the other
/// one is given `write_timeout` to wind down before it is aborted.
pub async fn handle_connection(socket: WebSocket, state: GatewayState, user: UserProfile) {
    let config = state.config().clone();
    let registry = state.registry().clone();
    let (mut sink, stream) = socket.split();

    let (endpoint, outbound) = Endpoint::new(user, config.outbound_capacity);
    registry.register(endpoint.clone()).await;

    info!(
        "{} ({}) connected on {}",
        endpoint.user().name,
        endpoint.user_id(),
        endpoint.id()
    );

    let welcome = GatewayEvent::connected();
    if let Err(e) = write_event(&mut sink, &welcome, config.write_timeout).await {
        warn!("{} welcome frame not sent: {}", endpoint.user_id(), e);
        endpoint.close();
    } else if !endpoint.activate() {
        // Evicted by a newer login before we got going.
        debug!("{} connection {} closed before activation", endpoint.user_id(), endpoint.id());
        let _ = write_frame(&mut sink, close_frame(), config.write_timeout).await;
    } else {
        let writer = tokio::spawn(write_pump(sink, outbound, endpoint.clone(), config.clone()));
        let reader = tokio::spawn(read_pump(
            stream,
            endpoint.clone(),
            state.router().clone(),
            config.read_deadline,
        ));
        supervise(&endpoint, writer, reader, config.write_timeout).await;
    }

    registry.unregister(&endpoint).await;
    endpoint.mark_closed();
    info!(
        "{} ({}) disconnected from {}",
        endpoint.user().name,
        endpoint.user_id(),
        endpoint.id()
    );
}

async fn supervise(endpoint: &Endpoint, mut writer: JoinHandle<()>, mut reader: JoinHandle<()>, grace: Duration) {
    let writer_exited = tokio::select! {
        _ = &mut writer => true,
        _ = &mut reader => false,
    };
    endpoint.close();

    let survivor = if writer_exited { reader } else { writer };

    let abort = survivor.abort_handle();
    if tokio::time::timeout(grace, survivor).await.is_err() {
        debug!("{} worker did not stop within {:?}, aborting", endpoint.user_id(), grace);
        abort.abort();
    }
}

/// Sole writer of the socket: drains the outbound queue, sends heartbeat
/// pings and says goodbye once the endpoint is closing.
async fn write_pump(
    mut sink: WsSink,
    mut outbound: mpsc::Receiver<GatewayEvent>,
    endpoint: Endpoint,
    config: GatewayConfig,
) {
    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            biased;

            _ = endpoint.closing() => {
                if let Err(e) = write_frame(&mut sink, close_frame(), config.write_timeout).await {
                    debug!("{} close frame not sent: {}", endpoint.user_id(), e);
                }
                break;
            }
            event = outbound.recv() => {
                let Some(event) = event else { break };
                match write_event(&mut sink, &event, config.write_timeout).await {
                    Ok(()) => {}
                    Err(WriteError::Encode(e)) => {
                        warn!("{} dropping unencodable event: {}", endpoint.user_id(), e);
                    }
                    Err(e) => {
                        warn!("{} {}", endpoint.user_id(), e);
                        break;
                    }
                }
            }
            _ = heartbeat.tick() => {
                if let Err(e) = write_frame(&mut sink, Message::Ping(Vec::new().into()), config.write_timeout).await {
                    warn!("{} heartbeat failed: {}", endpoint.user_id(), e);
                    break;
                }
            }
        }
    }
}

/// Sole reader of the socket. Any inbound frame, pongs included, resets the
/// read deadline. Text frames are routed inline so one sender's messages are
/// handled in arrival order.
async fn read_pump(mut stream: WsStream, endpoint: Endpoint, router: MessageRouter, deadline: Duration) {
    loop {
        let next = tokio::select! {
            _ = endpoint.closing() => break,
            next = tokio::time::timeout(deadline, stream.next()) => next,
        };

        let msg = match next {
            Err(_) => {
                warn!(
                    "{} read deadline of {:?} expired, dropping connection",
                    endpoint.user_id(),
                    deadline
                );
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!("{} read error: {}", endpoint.user_id(), e);
                break;
            }
            Ok(Some(Ok(msg))) => msg,
        };

        match msg {
            Message::Text(text) => router.route(&endpoint, text.as_str()).await,
            Message::Close(_) => break,
            Message::Binary(data) => {
                debug!("{} sent {} binary bytes, ignored", endpoint.user_id(), data.len());
            }
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
}

async fn write_event(sink: &mut WsSink, event: &GatewayEvent, limit: Duration) -> Result<(), WriteError> {
    let text = serde_json::to_string(event)?;
    write_frame(sink, Message::Text(text.into()), limit).await
}

async fn write_frame(sink: &mut WsSink, frame: Message, limit: Duration) -> Result<(), WriteError> {
    match tokio::time::timeout(limit, sink.send(frame)).await {
        Ok(result) => result.map_err(WriteError::from),
        Err(_) => Err(WriteError::Timeout(limit)),
    }
}

fn close_frame() -> Message {
    Message::Close(Some(CloseFrame {
        code: close_code::NORMAL,
        reason: Utf8Bytes::from_static("closing"),
    }))
}
