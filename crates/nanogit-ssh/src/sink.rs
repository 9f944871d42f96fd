//! Outbound side of a session channel.
//!
//! The multiplexer and the output pump never talk to russh directly; they go
//! through [`ChannelSink`], which the russh server [`Handle`] implements for a
//! given channel.

use std::future::Future;

use russh::server::Handle;
use russh::{ChannelId, CryptoVec};

use crate::constants::SSH_EXTENDED_DATA_STDERR;

/// The peer is gone or the channel was already closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkClosed;

/// Everything the server sends on a channel.
pub trait ChannelSink: Clone + Send + Sync + 'static {
    /// Positive reply to the request being handled.
    fn success(&self) -> impl Future<Output = Result<(), SinkClosed>> + Send;
    /// Negative reply to the request being handled.
    fn failure(&self) -> impl Future<Output = Result<(), SinkClosed>> + Send;
    fn data(&self, bytes: &[u8]) -> impl Future<Output = Result<(), SinkClosed>> + Send;
    fn stderr(&self, bytes: &[u8]) -> impl Future<Output = Result<(), SinkClosed>> + Send;
    fn exit_status(&self, status: u32) -> impl Future<Output = Result<(), SinkClosed>> + Send;
    fn eof(&self) -> impl Future<Output = Result<(), SinkClosed>> + Send;
    fn close(&self) -> impl Future<Output = Result<(), SinkClosed>> + Send;
}

/// A russh session handle bound to one channel.
#[derive(Clone)]
pub struct HandleSink {
    handle: Handle,
    channel: ChannelId,
}

impl HandleSink {
    pub fn new(handle: Handle, channel: ChannelId) -> Self {
        Self { handle, channel }
    }
}

impl ChannelSink for HandleSink {
    async fn success(&self) -> Result<(), SinkClosed> {
        self.handle
            .channel_success(self.channel)
            .await
            .map_err(|_| SinkClosed)
    }

    async fn failure(&self) -> Result<(), SinkClosed> {
        self.handle
            .channel_failure(self.channel)
            .await
            .map_err(|_| SinkClosed)
    }

    async fn data(&self, bytes: &[u8]) -> Result<(), SinkClosed> {
        self.handle
            .data(self.channel, CryptoVec::from_slice(bytes))
            .await
            .map_err(|_| SinkClosed)
    }

    async fn stderr(&self, bytes: &[u8]) -> Result<(), SinkClosed> {
        self.handle
            .extended_data(
                self.channel,
                SSH_EXTENDED_DATA_STDERR,
                CryptoVec::from_slice(bytes),
            )
            .await
            .map_err(|_| SinkClosed)
    }

    async fn exit_status(&self, status: u32) -> Result<(), SinkClosed> {
        self.handle
            .exit_status_request(self.channel, status)
            .await
            .map_err(|_| SinkClosed)
    }

    async fn eof(&self) -> Result<(), SinkClosed> {
        self.handle.eof(self.channel).await.map_err(|_| SinkClosed)
    }

    async fn close(&self) -> Result<(), SinkClosed> {
        self.handle.close(self.channel).await.map_err(|_| SinkClosed)
    }
}
