//! Calling a daemon over its connection, and answering calls as a daemon.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tideway_core::{ChangeSpec, JobId, JobStatusReport};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::codec::{Codec, Method, Request, Response, V4Codec, V5Codec, V6Codec};
use super::{ImageStatus, Platform, PlatformCloser, ProtocolVersion, RemoteError, ServiceStatus};

/// A bidirectional stream of text frames.
#[async_trait]
pub trait FrameChannel: Send + 'static {
    async fn send_frame(&mut self, frame: String) -> Result<(), RemoteError>;

    /// Next frame from the peer, or `None` once it has gone away.
    async fn recv_frame(&mut self) -> Option<Result<String, RemoteError>>;

    async fn shutdown(&mut self) -> Result<(), RemoteError>;
}

#[async_trait]
impl FrameChannel for WebSocket {
    async fn send_frame(&mut self, frame: String) -> Result<(), RemoteError> {
        self.send(Message::Text(frame))
            .await
            .map_err(|e| RemoteError::Fatal(e.to_string()))
    }

    async fn recv_frame(&mut self) -> Option<Result<String, RemoteError>> {
        loop {
            match self.recv().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => {
                    return Some(String::from_utf8(bytes).map_err(RemoteError::protocol))
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Ok(Message::Close(_)) => return None,
                Err(err) => return Some(Err(RemoteError::Fatal(err.to_string()))),
            }
        }
    }

    async fn shutdown(&mut self) -> Result<(), RemoteError> {
        self.send(Message::Close(None))
            .await
            .map_err(|e| RemoteError::Fatal(e.to_string()))
    }
}

type Waiter = oneshot::Sender<Result<Value, RemoteError>>;
type Pending = Arc<Mutex<HashMap<u64, Waiter>>>;

fn lock(pending: &Pending) -> MutexGuard<'_, HashMap<u64, Waiter>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Server-side handle on a connected daemon.
///
/// Calls are multiplexed over one connection and matched to responses by
/// id. Nothing moves until the paired [`Connection`] is run.
pub struct RpcClient<C> {
    codec: C,
    next_id: AtomicU64,
    pending: Pending,
    outgoing: mpsc::UnboundedSender<String>,
    closed: CancellationToken,
}

pub type ClientV4 = RpcClient<V4Codec>;
pub type ClientV5 = RpcClient<V5Codec>;
pub type ClientV6 = RpcClient<V6Codec>;

/// Drives the frames of one daemon connection.
pub struct Connection<C, T> {
    codec: C,
    channel: T,
    pending: Pending,
    outgoing: mpsc::UnboundedReceiver<String>,
    closed: CancellationToken,
}

impl<C: Codec> RpcClient<C> {
    pub fn new<T: FrameChannel>(codec: C, channel: T) -> (Self, Connection<C, T>) {
        let pending: Pending = Arc::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();

        let client = Self {
            codec,
            next_id: AtomicU64::new(1),
            pending: Arc::clone(&pending),
            outgoing: tx,
            closed: closed.clone(),
        };
        let connection = Connection {
            codec,
            channel,
            pending,
            outgoing: rx,
            closed,
        };
        (client, connection)
    }

    pub fn protocol(&self) -> ProtocolVersion {
        C::VERSION
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    async fn call<P, R>(&self, method: Method, params: P) -> Result<R, RemoteError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        if self.is_closed() {
            return Err(RemoteError::Disconnected);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let params = serde_json::to_value(params).map_err(RemoteError::protocol)?;
        let frame = self.codec.encode_request(&Request {
            id,
            method: method.wire_name().to_string(),
            params,
        })?;

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);
        if self.outgoing.send(frame).is_err() {
            lock(&self.pending).remove(&id);
            return Err(RemoteError::Disconnected);
        }

        let value = rx.await.unwrap_or(Err(RemoteError::Disconnected))?;
        serde_json::from_value(value).map_err(|e| {
            RemoteError::Protocol(format!("decoding {} result: {e}", method.wire_name()))
        })
    }
}

impl<C: Codec, T: FrameChannel> Connection<C, T> {
    /// Pump frames until the daemon goes away or the client is closed.
    ///
    /// Calls still waiting when this returns fail with
    /// [`RemoteError::Disconnected`].
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.closed.cancelled() => break,
                frame = self.outgoing.recv() => match frame {
                    Some(frame) => {
                        if let Err(err) = self.channel.send_frame(frame).await {
                            warn!(version = %C::VERSION, error = %err, "sending to daemon failed");
                            break;
                        }
                    }
                    None => break,
                },
                inbound = self.channel.recv_frame() => match inbound {
                    Some(Ok(frame)) => self.dispatch(&frame),
                    Some(Err(err)) => {
                        debug!(version = %C::VERSION, error = %err, "daemon connection failed");
                        break;
                    }
                    None => break,
                },
            }
        }

        self.outgoing.close();
        self.closed.cancel();
        let waiters: Vec<Waiter> = lock(&self.pending).drain().map(|(_, w)| w).collect();
        for waiter in waiters {
            let _ = waiter.send(Err(RemoteError::Disconnected));
        }

        if let Err(err) = self.channel.shutdown().await {
            debug!(error = %err, "closing daemon connection");
        }
    }

    fn dispatch(&self, frame: &str) {
        let response = match self.codec.decode_response(frame) {
            Ok(response) => response,
            Err(err) => {
                warn!(version = %C::VERSION, error = %err, "undecodable frame from daemon");
                return;
            }
        };

        match lock(&self.pending).remove(&response.id) {
            Some(waiter) => {
                let _ = waiter.send(response.result);
            }
            None => warn!(id = response.id, "response to unknown request"),
        }
    }
}

#[async_trait]
impl<C: Codec> Platform for RpcClient<C> {
    async fn ping(&self) -> Result<(), RemoteError> {
        self.call(Method::Ping, ()).await
    }

    async fn version(&self) -> Result<String, RemoteError> {
        self.call(Method::Version, ()).await
    }

    async fn list_services(
        &self,
        namespace: Option<String>,
    ) -> Result<Vec<ServiceStatus>, RemoteError> {
        self.call(Method::ListServices, namespace).await
    }

    async fn list_images(
        &self,
        service: Option<String>,
    ) -> Result<Vec<ImageStatus>, RemoteError> {
        self.call(Method::ListImages, service).await
    }

    async fn export(&self) -> Result<String, RemoteError> {
        self.call(Method::Export, ()).await
    }

    async fn update_manifests(&self, spec: ChangeSpec) -> Result<JobId, RemoteError> {
        self.call(Method::UpdateManifests, spec).await
    }

    async fn sync_notify(&self) -> Result<(), RemoteError> {
        self.call(Method::SyncNotify, ()).await
    }

    async fn job_status(&self, job: JobId) -> Result<JobStatusReport, RemoteError> {
        self.call(Method::JobStatus, job).await
    }

    async fn sync_status(&self, reference: String) -> Result<Vec<String>, RemoteError> {
        self.call(Method::SyncStatus, reference).await
    }
}

impl<C: Codec> PlatformCloser for RpcClient<C> {
    fn close(&self) {
        self.closed.cancel();
    }
}

/// Answer calls arriving on `channel` from `platform`, as a daemon does.
///
/// Returns once the server hangs up.
pub async fn serve<C, T, P>(codec: C, mut channel: T, platform: &P) -> Result<(), RemoteError>
where
    C: Codec,
    T: FrameChannel,
    P: Platform + ?Sized,
{
    while let Some(frame) = channel.recv_frame().await {
        let request = match codec.decode_request(&frame?) {
            Ok(request) => request,
            Err(err) => {
                warn!(version = %C::VERSION, error = %err, "dropping undecodable request");
                continue;
            }
        };

        let result = answer(platform, &request.method, request.params).await;
        let reply = codec.encode_response(&Response {
            id: request.id,
            result,
        })?;
        channel.send_frame(reply).await?;
    }
    Ok(())
}

async fn answer<P>(platform: &P, method: &str, params: Value) -> Result<Value, RemoteError>
where
    P: Platform + ?Sized,
{
    let method = Method::from_wire(method)
        .ok_or_else(|| RemoteError::Protocol(format!("unknown method {method}")))?;

    match method {
        Method::Ping => reply(platform.ping().await),
        Method::Version => reply(platform.version().await),
        Method::ListServices => reply(platform.list_services(argument(params)?).await),
        Method::ListImages => reply(platform.list_images(argument(params)?).await),
        Method::Export => reply(platform.export().await),
        Method::UpdateManifests => reply(platform.update_manifests(argument(params)?).await),
        Method::SyncNotify => reply(platform.sync_notify().await),
        Method::JobStatus => reply(platform.job_status(argument(params)?).await),
        Method::SyncStatus => reply(platform.sync_status(argument(params)?).await),
    }
}

fn argument<T: DeserializeOwned>(params: Value) -> Result<T, RemoteError> {
    serde_json::from_value(params).map_err(RemoteError::protocol)
}

fn reply<T: Serialize>(result: Result<T, RemoteError>) -> Result<Value, RemoteError> {
    serde_json::to_value(result?).map_err(RemoteError::protocol)
}
