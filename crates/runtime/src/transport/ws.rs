//! WebSocket bridges between the hub and real connections.
//!
//! The protocol, not the library, is the contract: connections exchange
//! `{"kind", "payload"}` text frames, the first of which must be a `join`
//! naming the connection's room. Malformed frames are logged and dropped.

use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::hub::{ConnectionId, Hub};
use super::message::{ClientRequest, ControlCommand, Handshake, Room, WorkerEvent};

/// Messages flowing from connections into the single server loop.
#[derive(Debug)]
pub enum Inbound {
    Client {
        conn: ConnectionId,
        request: ClientRequest,
    },
    Worker {
        conn: ConnectionId,
        event: WorkerEvent,
    },
    Disconnected {
        conn: ConnectionId,
        room: Room,
    },
}

/// Accept loop: upgrades TCP connections and bridges them onto the hub.
pub async fn serve(listener: TcpListener, hub: Arc<Hub>, inbound: mpsc::Sender<Inbound>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let hub = Arc::clone(&hub);
                let inbound = inbound.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, hub, inbound).await {
                        tracing::debug!("connection from {addr} ended: {err}");
                    }
                });
            }
            Err(err) => {
                tracing::warn!("accept failed: {err}");
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    hub: Arc<Hub>,
    inbound: mpsc::Sender<Inbound>,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut sink, mut stream) = ws.split();

    // The first text frame must name the connection's room.
    let room = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<Handshake>(&text) {
                Ok(Handshake::Join { room }) => break room,
                Err(err) => {
                    tracing::warn!("rejecting connection with invalid handshake: {err}");
                    return Ok(());
                }
            },
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(_)) | None => return Ok(()),
            Some(Err(err)) => return Err(err),
        }
    };

    let (conn, mut outbound_rx) = hub.register(room);

    loop {
        tokio::select! {
            message = outbound_rx.recv() => match message {
                Some(outbound) => {
                    let text = match serde_json::to_string(&outbound) {
                        Ok(text) => text,
                        Err(err) => {
                            tracing::error!("unencodable outbound message: {err}");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    dispatch_inbound(conn, room, &text, &inbound).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    tracing::debug!("{conn} read error: {err}");
                    break;
                }
            },
        }
    }

    hub.unregister(conn);
    if inbound
        .send(Inbound::Disconnected { conn, room })
        .await
        .is_err()
    {
        tracing::debug!("server loop gone while reporting {conn} disconnect");
    }
    Ok(())
}

async fn dispatch_inbound(
    conn: ConnectionId,
    room: Room,
    text: &str,
    inbound: &mpsc::Sender<Inbound>,
) {
    let parsed = match room {
        Room::Client | Room::Script => match serde_json::from_str::<ClientRequest>(text) {
            // Shutdown is a script-room privilege.
            Ok(ClientRequest::Terminate) if room == Room::Client => {
                tracing::warn!("{conn} sent terminate from the client room, ignoring");
                return;
            }
            Ok(request) => Ok(Inbound::Client { conn, request }),
            Err(err) => Err(err),
        },
        Room::Simulation => {
            serde_json::from_str::<WorkerEvent>(text).map(|event| Inbound::Worker { conn, event })
        }
    };
    match parsed {
        Ok(message) => {
            if inbound.send(message).await.is_err() {
                tracing::debug!("server loop gone, dropping message from {conn}");
            }
        }
        Err(err) => tracing::warn!("{conn} sent malformed message: {err}"),
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Worker-side sending half: typed events out.
pub struct WorkerSender {
    sink: SplitSink<WsStream, Message>,
}

impl WorkerSender {
    /// Send one event. Serialization of our own types cannot realistically
    /// fail; if it somehow does, the event is logged and dropped rather
    /// than killing the worker.
    pub async fn send(
        &mut self,
        event: &WorkerEvent,
    ) -> Result<(), tokio_tungstenite::tungstenite::Error> {
        match serde_json::to_string(event) {
            Ok(text) => self.sink.send(Message::Text(text)).await,
            Err(err) => {
                tracing::error!("unencodable worker event: {err}");
                Ok(())
            }
        }
    }

    pub async fn close(&mut self) -> Result<(), tokio_tungstenite::tungstenite::Error> {
        self.sink.close().await
    }
}

/// Worker-side receiving half: control commands in.
pub struct WorkerReceiver {
    stream: SplitStream<WsStream>,
}

impl WorkerReceiver {
    /// Next control command; `None` once the connection is gone.
    pub async fn next_command(&mut self) -> Option<ControlCommand> {
        while let Some(frame) = self.stream.next().await {
            match frame {
                Ok(Message::Text(text)) => match serde_json::from_str(&text) {
                    Ok(command) => return Some(command),
                    Err(err) => tracing::warn!("malformed control message: {err}"),
                },
                Ok(Message::Close(_)) => return None,
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!("control stream error: {err}");
                    return None;
                }
            }
        }
        None
    }
}

/// Connect a worker to the server and join the simulation room.
pub async fn connect_worker(
    url: &str,
) -> Result<(WorkerSender, WorkerReceiver), tokio_tungstenite::tungstenite::Error> {
    let (ws, _response) = tokio_tungstenite::connect_async(url).await?;
    let (sink, stream) = ws.split();
    let mut sender = WorkerSender { sink };

    let join = serde_json::to_string(&Handshake::Join {
        room: Room::Simulation,
    })
    .unwrap_or_default();
    sender.sink.send(Message::Text(join)).await?;

    Ok((sender, WorkerReceiver { stream }))
}
