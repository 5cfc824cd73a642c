//! Requesters decide whether a tile request becomes deferred work.

use super::{Completion, FetchOutcome, FetchTask, TileRequest};
use crate::{
    error::{Error, Result},
    memory::TileMemoryCache,
};
use std::{fmt, sync::Arc};

/// State a requester may consult or resolve a request with.
#[derive(Debug)]
pub struct RequestContext<'a> {
    /// Decoded payload cache.
    pub memory: &'a TileMemoryCache,
    /// Channel for completions resolved without a task.
    pub completions: &'a async_channel::Sender<Completion>,
}

/// Turns a tile request into deferred work.
pub trait Requester: Send + Sync + fmt::Debug {
    /// Name the requester is configured by.
    fn name(&self) -> &'static str;

    /// Return a task for `request`, or `None` if the requester already
    /// completed it (delivering the completion through `ctx.completions`).
    fn request_task(&self, request: TileRequest, ctx: &RequestContext<'_>) -> Option<FetchTask>;
}

/// Always defers to a worker task.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeferredRequester;

impl Requester for DeferredRequester {
    fn name(&self) -> &'static str {
        "deferred"
    }

    fn request_task(&self, request: TileRequest, _ctx: &RequestContext<'_>) -> Option<FetchTask> {
        Some(FetchTask { request })
    }
}

/// Resolves requests already present in the payload cache immediately and
/// defers the rest.
///
/// This serves callers driving a [`TileLoader`](crate::TileLoader) directly,
/// such as a prefetch over a memory cache other layers fill. A
/// [`TiledLayer`](crate::TiledLayer) consults the memory cache itself before
/// submitting, so under a layer every request reaching this requester is a
/// miss and it behaves like [`DeferredRequester`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryFirstRequester;

impl Requester for MemoryFirstRequester {
    fn name(&self) -> &'static str {
        "memory-first"
    }

    fn request_task(&self, request: TileRequest, ctx: &RequestContext<'_>) -> Option<FetchTask> {
        let Some(payload) = ctx.memory.get(&request.key) else {
            return Some(FetchTask { request });
        };
        let completion = Completion {
            key: request.key,
            tile: request.tile,
            outcome: FetchOutcome::Loaded(payload),
        };
        if ctx.completions.try_send(completion).is_err() {
            tracing::debug!("completion channel closed, dropping resolved request");
        }
        None
    }
}

pub(crate) fn requester_by_name(name: &str) -> Result<Arc<dyn Requester>> {
    match name {
        "deferred" => Ok(Arc::new(DeferredRequester)),
        "memory-first" => Ok(Arc::new(MemoryFirstRequester)),
        other => Err(Error::config(format!("unknown requester {other:?}"))),
    }
}
