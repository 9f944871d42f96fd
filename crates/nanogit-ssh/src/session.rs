//! Per-connection russh handler.
//!
//! Authentication resolves the client key to an [`Identity`] once per
//! connection. Each session channel then gets its own [`Multiplexer`] task
//! reading from the russh channel and replying through a [`HandleSink`].
//!
//! Non-exec channel requests are answered here, synchronously with their
//! arrival, so each reply honours the client's `want_reply` for that request.

use std::net::SocketAddr;
use std::sync::Arc;

use russh::keys::PublicKey;
use russh::server::{self, Auth, Msg, Session};
use russh::{Channel, ChannelId, ChannelMsg, Pty};
use tracing::Instrument;

use crate::channel::{ChannelEvent, ChannelRequest, ChannelSource, Multiplexer};
use crate::command::CommandTable;
use crate::error::UnknownKey;
use crate::identity::{fingerprint, ConnectionMeta, Identity, PublicKeyVerifier};
use crate::sink::HandleSink;

pub struct ConnectionHandler {
    peer_addr: Option<SocketAddr>,
    verifier: Arc<dyn PublicKeyVerifier>,
    commands: Arc<CommandTable>,
    identity: Option<Identity>,
}

impl ConnectionHandler {
    pub fn new(
        peer_addr: Option<SocketAddr>,
        verifier: Arc<dyn PublicKeyVerifier>,
        commands: Arc<CommandTable>,
    ) -> Self {
        Self {
            peer_addr,
            verifier,
            commands,
            identity: None,
        }
    }

    fn verify(&self, user: &str, key: &PublicKey) -> Result<Identity, UnknownKey> {
        let meta = ConnectionMeta {
            peer_addr: self.peer_addr,
            user,
        };
        self.verifier.verify(meta, key)
    }
}

fn reject() -> Auth {
    Auth::Reject {
        proceed_with_methods: None,
        partial_success: false,
    }
}

impl server::Handler for ConnectionHandler {
    type Error = russh::Error;

    async fn auth_publickey_offered(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        match self.verify(user, public_key) {
            Ok(_) => Ok(Auth::Accept),
            Err(e) => {
                tracing::debug!(user, fingerprint = %e.fingerprint, "offered key not recognized");
                Ok(reject())
            }
        }
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        match self.verify(user, public_key) {
            Ok(identity) => {
                tracing::info!(
                    user,
                    identity = %identity,
                    fingerprint = %fingerprint(public_key),
                    "public key accepted"
                );
                self.identity = Some(identity);
                Ok(Auth::Accept)
            }
            Err(e) => {
                tracing::warn!(user, fingerprint = %e.fingerprint, "public key rejected");
                Ok(reject())
            }
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let Some(identity) = self.identity.clone() else {
            tracing::warn!("session channel requested before authentication");
            return Ok(false);
        };

        let id = channel.id();
        tracing::debug!(channel = %id, "session channel opened");
        let sink = HandleSink::new(session.handle(), id);
        let mux = Multiplexer::new(identity, self.commands.clone(), sink);
        tokio::spawn(
            mux.run(channel)
                .instrument(tracing::info_span!("channel", channel = %id)),
        );
        Ok(true)
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        _channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        tracing::info!(
            host = host_to_connect,
            port = port_to_connect,
            "refusing direct-tcpip channel"
        );
        Ok(false)
    }

    /// Always acknowledged; the multiplexer validates and stores the pair.
    async fn env_request(
        &mut self,
        channel: ChannelId,
        variable_name: &str,
        _variable_value: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::trace!(channel = %channel, name = variable_name, "env request");
        session.channel_success(channel)?;
        Ok(())
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        _term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.channel_failure(channel)?;
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.channel_failure(channel)?;
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!(channel = %channel, subsystem = name, "refusing subsystem");
        session.channel_failure(channel)?;
        Ok(())
    }
}

impl ChannelSource for Channel<Msg> {
    async fn next_event(&mut self) -> Option<ChannelEvent> {
        loop {
            let event = match self.wait().await? {
                ChannelMsg::SetEnv {
                    variable_name,
                    variable_value,
                    ..
                } => ChannelEvent::Request(ChannelRequest::Env {
                    name: variable_name,
                    value: variable_value,
                }),
                ChannelMsg::Exec { command, .. } => {
                    ChannelEvent::Request(ChannelRequest::Exec { command })
                }
                ChannelMsg::RequestPty { .. } => other("pty-req"),
                ChannelMsg::RequestShell { .. } => other("shell"),
                ChannelMsg::RequestSubsystem { .. } => other("subsystem"),
                ChannelMsg::Data { data } => ChannelEvent::Data(data.to_vec()),
                ChannelMsg::Eof => ChannelEvent::Eof,
                ChannelMsg::Close => ChannelEvent::Closed,
                msg => {
                    tracing::trace!(?msg, "ignoring channel message");
                    continue;
                }
            };
            return Some(event);
        }
    }
}

fn other(kind: &'static str) -> ChannelEvent {
    ChannelEvent::Request(ChannelRequest::Other { kind })
}
