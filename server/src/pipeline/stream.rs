//! Streaming Call Wrappers
//!
//! Each wrapper owns the call's [`CallContext`], so a streaming handler
//! reaches the caller's claims and cancellation through `context()`.

use std::pin::Pin;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tonic::{Code, Status};

use super::context::CallContext;
use crate::error::{ServiceError, ServiceResult};

/// Boxed inbound message stream as handed over by the transport.
pub type InboundStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

/// Sending half of the response stream.
pub type OutboundSender<T> = mpsc::Sender<Result<T, Status>>;

/// A streaming call whose context is reachable from the stream object.
pub trait CallStream: Send {
    fn context(&self) -> &CallContext;
}

/// Response half of a streaming call.
#[derive(Debug)]
pub struct Outbound<T> {
    tx: OutboundSender<T>,
}

impl<T> Outbound<T> {
    pub const fn new(tx: OutboundSender<T>) -> Self {
        Self { tx }
    }

    /// Send one response, waiting for buffer space.
    ///
    /// Fails with Cancelled once the caller has gone away.
    pub async fn send(&self, item: T) -> ServiceResult<()> {
        self.tx
            .send(Ok(item))
            .await
            .map_err(|_| ServiceError::Cancelled)
    }
}

/// Request half of a streaming call.
pub struct Inbound<T> {
    stream: InboundStream<T>,
}

impl<T> std::fmt::Debug for Inbound<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inbound").finish_non_exhaustive()
    }
}

impl<T> Inbound<T> {
    pub fn new(stream: impl Stream<Item = Result<T, Status>> + Send + 'static) -> Self {
        Self {
            stream: Box::pin(stream),
        }
    }

    /// Next request, `None` once the caller has finished sending.
    ///
    /// Returns Cancelled as soon as `ctx` is cancelled, even while waiting.
    pub async fn recv(&mut self, ctx: &CallContext) -> ServiceResult<Option<T>> {
        tokio::select! {
            biased;
            () = ctx.cancellation().cancelled() => Err(ServiceError::Cancelled),
            item = self.stream.next() => match item {
                None => Ok(None),
                Some(Ok(item)) => Ok(Some(item)),
                Some(Err(status)) => Err(inbound_failure(&status)),
            },
        }
    }
}

fn inbound_failure(status: &Status) -> ServiceError {
    match status.code() {
        Code::Cancelled | Code::DeadlineExceeded => ServiceError::Cancelled,
        code => {
            tracing::debug!(?code, "Inbound stream failed");
            ServiceError::internal("inbound stream failed")
        }
    }
}

/// One request in, many responses out.
#[derive(Debug)]
pub struct ServerStream<Resp> {
    ctx: CallContext,
    out: Outbound<Resp>,
}

impl<Resp: Send> ServerStream<Resp> {
    pub const fn new(ctx: CallContext, out: Outbound<Resp>) -> Self {
        Self { ctx, out }
    }

    pub async fn send(&self, item: Resp) -> ServiceResult<()> {
        self.out.send(item).await
    }
}

impl<Resp: Send> CallStream for ServerStream<Resp> {
    fn context(&self) -> &CallContext {
        &self.ctx
    }
}

/// Many requests in, one response out.
#[derive(Debug)]
pub struct ClientStream<Req> {
    ctx: CallContext,
    input: Inbound<Req>,
}

impl<Req: Send> ClientStream<Req> {
    pub const fn new(ctx: CallContext, input: Inbound<Req>) -> Self {
        Self { ctx, input }
    }

    pub async fn recv(&mut self) -> ServiceResult<Option<Req>> {
        self.input.recv(&self.ctx).await
    }
}

impl<Req: Send> CallStream for ClientStream<Req> {
    fn context(&self) -> &CallContext {
        &self.ctx
    }
}

/// Concurrent request and response sequences over one session.
#[derive(Debug)]
pub struct BidiStream<Req, Resp> {
    ctx: CallContext,
    input: Inbound<Req>,
    out: Outbound<Resp>,
}

impl<Req: Send, Resp: Send> BidiStream<Req, Resp> {
    pub const fn new(ctx: CallContext, input: Inbound<Req>, out: Outbound<Resp>) -> Self {
        Self { ctx, input, out }
    }

    pub async fn recv(&mut self) -> ServiceResult<Option<Req>> {
        self.input.recv(&self.ctx).await
    }

    /// Takes `&mut self`: the inbound half is not `Sync`.
    pub async fn send(&mut self, item: Resp) -> ServiceResult<()> {
        self.out.send(item).await
    }
}

impl<Req: Send, Resp: Send> CallStream for BidiStream<Req, Resp> {
    fn context(&self) -> &CallContext {
        &self.ctx
    }
}
