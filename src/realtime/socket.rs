//! Chat socket with unauthorized recovery
//!
//! One actor task owns the connection for a room. Callers talk to it through
//! a command channel, which gives the ordering guarantees for free: the actor
//! finishes flushing the outbox before it reads the next command, so nothing
//! submitted later can overtake a queued message.
//!
//! ```text
//! CONNECTING ──open──▶ OPEN ──close / error──▶ CLOSED
//!     ▲                  │
//!     └──unauthorized────┘  (token refreshed, same room)
//! ```

use reqwest::Url;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::frame::{self, ControlFrame};
use super::transport::{self, FrameSink, FrameStream};
use crate::config::ClientConfig;
use crate::session::SessionManager;
use crate::types::{ClientError, Result};

/// Connection lifecycle as seen by the application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// Chat socket configuration
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Base WebSocket URL; the room id is appended as a path segment
    pub chat_url: Url,
    /// Room to join
    pub room_id: String,
    /// Consecutive unauthorized recoveries before giving up
    pub max_auth_recoveries: u32,
}

impl ChatConfig {
    pub fn new(chat_url: Url, room_id: impl Into<String>) -> Self {
        Self {
            chat_url,
            room_id: room_id.into(),
            max_auth_recoveries: 3,
        }
    }

    pub fn from_client_config(config: &ClientConfig, room_id: impl Into<String>) -> Self {
        Self {
            chat_url: config.chat_url.clone(),
            room_id: room_id.into(),
            max_auth_recoveries: config.max_auth_recoveries,
        }
    }

    /// Connection URI for the room, carrying the access token when there is one
    pub fn endpoint(&self, access_token: Option<&str>) -> Result<Url> {
        let mut url = self.chat_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::Config(format!("Chat URL cannot take a path: {}", self.chat_url)))?
            .pop_if_empty()
            .push(&self.room_id);
        if let Some(token) = access_token {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url)
    }
}

enum Command {
    Send(String),
    Close,
}

/// Handle to a chat room connection
pub struct ChatSocket {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
}

impl ChatSocket {
    /// Start connecting to the room.
    ///
    /// Returns immediately in `Connecting`; inbound application frames are
    /// delivered on the returned receiver.
    pub fn connect(
        config: ChatConfig,
        session: Arc<SessionManager>,
    ) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (inbound, inbound_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Connecting);

        info!(room = %config.room_id, "Opening chat socket");

        let reconnector = Reconnector {
            config,
            session,
            commands: command_rx,
            inbound,
            state: state_tx,
            outbox: VecDeque::new(),
            recoveries: 0,
        };
        let task = tokio::spawn(reconnector.run());

        (
            Self {
                commands,
                state,
                task,
            },
            inbound_rx,
        )
    }

    /// Fire-and-forget send; queued until the connection is open
    pub fn send(&self, text: impl Into<String>) {
        if self.commands.send(Command::Send(text.into())).is_err() {
            debug!("Chat socket already closed, message dropped");
        }
    }

    /// Leave the room and close the connection
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }

    /// Close and wait for the actor to finish
    pub async fn shutdown(self) {
        self.close();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Chat socket task ended abnormally");
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

/// How a served connection ended
enum Exit {
    Reconnect,
    Closed,
}

struct Reconnector {
    config: ChatConfig,
    session: Arc<SessionManager>,
    commands: mpsc::UnboundedReceiver<Command>,
    inbound: mpsc::UnboundedSender<String>,
    state: watch::Sender<ConnectionState>,
    outbox: VecDeque<String>,
    recoveries: u32,
}

impl Reconnector {
    async fn run(mut self) {
        loop {
            self.state.send_replace(ConnectionState::Connecting);

            let Some((sink, stream)) = self.establish().await else {
                break;
            };

            match self.serve(sink, stream).await {
                Exit::Reconnect => continue,
                Exit::Closed => break,
            }
        }

        if !self.outbox.is_empty() {
            warn!(
                room = %self.config.room_id,
                unsent = self.outbox.len(),
                "Chat socket closed with unsent messages"
            );
        }
        self.state.send_replace(ConnectionState::Closed);
        info!(room = %self.config.room_id, "Chat socket closed");
    }

    /// CONNECTING: run the handshake while queueing sends
    async fn establish(&mut self) -> Option<(FrameSink, FrameStream)> {
        let url = match self.config.endpoint(self.session.access_token().as_deref()) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "Cannot build chat endpoint");
                return None;
            }
        };

        let connect = transport::connect(&url);
        tokio::pin!(connect);

        loop {
            tokio::select! {
                result = &mut connect => {
                    return match result {
                        Ok(halves) => Some(halves),
                        Err(e) => {
                            warn!(room = %self.config.room_id, error = %e, "Chat connection failed");
                            None
                        }
                    };
                }
                command = self.commands.recv() => match command {
                    Some(Command::Send(text)) => self.outbox.push_back(text),
                    Some(Command::Close) | None => {
                        debug!("Close requested while connecting");
                        return None;
                    }
                },
            }
        }
    }

    /// OPEN: enter, flush, then relay until close or unauthorized
    async fn serve(&mut self, mut sink: FrameSink, mut stream: FrameStream) -> Exit {
        let enter = ControlFrame::Enter {
            room_id: self.config.room_id.clone(),
        };
        if let Err(e) = self.send_control(&mut sink, &enter).await {
            warn!(error = %e, "Failed to enter room");
            return Exit::Closed;
        }

        self.state.send_replace(ConnectionState::Open);
        info!(room = %self.config.room_id, queued = self.outbox.len(), "Chat socket open");

        while let Some(text) = self.outbox.pop_front() {
            if let Err(e) = sink.send_text(text.clone()).await {
                warn!(error = %e, "Failed to flush queued message");
                self.outbox.push_front(text);
                return Exit::Closed;
            }
        }

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Send(text)) => {
                        if let Err(e) = sink.send_text(text.clone()).await {
                            warn!(error = %e, "Failed to send chat message");
                            self.outbox.push_back(text);
                            return Exit::Closed;
                        }
                    }
                    Some(Command::Close) | None => {
                        let leave = ControlFrame::Leave {
                            room_id: self.config.room_id.clone(),
                        };
                        if let Err(e) = self.send_control(&mut sink, &leave).await {
                            debug!(error = %e, "Leave frame not delivered");
                        }
                        sink.close().await;
                        return Exit::Closed;
                    }
                },
                incoming = stream.recv() => match incoming {
                    Ok(Some(text)) if frame::is_unauthorized(&text) => {
                        return self.recover(&mut sink).await;
                    }
                    Ok(Some(text)) => {
                        self.recoveries = 0;
                        if self.inbound.send(text).is_err() {
                            debug!("No listener for inbound chat frames");
                        }
                    }
                    Ok(None) => return Exit::Closed,
                    Err(e) => {
                        warn!(error = %e, "Chat connection error");
                        return Exit::Closed;
                    }
                },
            }
        }
    }

    /// Server said the token expired: refresh, then reconnect to the same room
    async fn recover(&mut self, sink: &mut FrameSink) -> Exit {
        if self.recoveries >= self.config.max_auth_recoveries {
            warn!(
                room = %self.config.room_id,
                attempts = self.recoveries,
                "Chat still unauthorized after refresh, giving up"
            );
            sink.close().await;
            return Exit::Closed;
        }
        self.recoveries += 1;

        info!(room = %self.config.room_id, "Chat unauthorized, refreshing token");
        self.state.send_replace(ConnectionState::Connecting);

        match self.session.refresh().await {
            Ok(_) => {
                sink.close().await;
                Exit::Reconnect
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, chat socket closing");
                sink.close().await;
                Exit::Closed
            }
        }
    }

    async fn send_control(&self, sink: &mut FrameSink, control: &ControlFrame) -> Result<()> {
        sink.send_text(control.to_text()?).await
    }
}
