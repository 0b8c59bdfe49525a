// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_channel::TrySendError;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::time;
use tracing::{debug, error, info, trace, warn};

use crate::protocol::{Message, MessageValidator, PacketCodec};
use crate::request::{RequestContext, RequestDispatcher, RequestLimits};
use crate::storage::SensorStore;
use crate::utils::{Exchange, ExchangeCache, PoolHandler, WorkerPool, WorkerPoolConfig};

use super::{AppError, AppResult, ConcurrencyManager, ServerConfig, Shutdown};

/// One received datagram waiting for a worker.
#[derive(Debug)]
pub struct RequestTask {
    pub peer: SocketAddr,
    pub datagram: Bytes,
    pub received_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerState {
    Idle = 0,
    Receiving = 1,
    Dispatching = 2,
    Stopped = 3,
}

impl ServerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ServerState::Idle,
            1 => ServerState::Receiving,
            2 => ServerState::Dispatching,
            _ => ServerState::Stopped,
        }
    }
}

/// Processes queued datagrams on the pool workers: admission, decode,
/// validate, dispatch, encode, send.
#[derive(Clone)]
pub(crate) struct RequestHandler {
    socket: Arc<UdpSocket>,
    codec: PacketCodec,
    admission: ConcurrencyManager,
    store: Arc<dyn SensorStore>,
    limits: RequestLimits,
    task_timeout: Duration,
    exchanges: Option<Arc<ExchangeCache>>,
}

impl PoolHandler<RequestTask> for RequestHandler {
    fn handle(&self, task: RequestTask) -> impl Future<Output = ()> + Send {
        let handler = self.clone();
        async move { handler.handle_task(task).await }
    }
}

impl RequestHandler {
    async fn handle_task(&self, task: RequestTask) {
        let slot = match self.admission.admit().await {
            Ok(slot) => slot,
            Err(err) => {
                error!("admission failed for {}: {err}", task.peer);
                return;
            }
        };
        trace!(
            "admitted datagram from {} after {:?} in queue, {} in flight",
            task.peer,
            task.received_at.elapsed(),
            self.admission.in_flight()
        );

        let RequestTask { peer, datagram, .. } = task;
        match time::timeout(self.task_timeout, self.process_datagram(peer, &datagram)).await {
            Ok(Some(encoded)) => {
                if let Err(err) = self.socket.send_to(&encoded, peer).await {
                    error!("failed to send {} bytes to {peer}: {err}", encoded.len());
                }
            }
            Ok(None) => {}
            Err(_) => {
                warn!(
                    "request from {peer} not finished within {:?}, dropping response",
                    self.task_timeout
                );
            }
        }
        self.admission.release(slot);
    }

    /// Produces the bytes to send back for one datagram, or `None` when
    /// nothing should be sent.
    pub(crate) async fn process_datagram(
        &self,
        peer: SocketAddr,
        datagram: &[u8],
    ) -> Option<Bytes> {
        let message = match self.codec.decode(datagram) {
            Ok(message) => message,
            Err(err) => {
                let Some(message_id) = PacketCodec::peek_message_id(datagram) else {
                    warn!("dropping datagram from {peer}: {err}");
                    return None;
                };
                warn!("malformed datagram from {peer} mid={message_id}: {err}, sending reset");
                return self.encode(peer, &Message::reset(message_id));
            }
        };

        if let Err(err) = MessageValidator::check(&message) {
            warn!(
                "invalid message from {peer} mid={}: {err}, sending reset",
                message.message_id
            );
            return self.encode(peer, &Message::reset(message.message_id));
        }

        let message_id = message.message_id;
        let begun = self
            .exchanges
            .as_deref()
            .map(|exchanges| exchanges.begin(peer, message_id));
        let reservation = match begun {
            None => None,
            Some(Exchange::New(reservation)) => Some(reservation),
            Some(Exchange::Completed(cached)) => return Some(cached),
            Some(Exchange::InFlight) => {
                debug!("{peer} mid={message_id} is still being processed, ignoring retransmission");
                return None;
            }
        };

        let context = RequestContext::new(peer, message, self.store.clone(), self.limits);
        let response = RequestDispatcher::dispatch(context).await;
        debug!("{peer} mid={message_id} -> {}", response.code);

        let encoded = self.encode(peer, &response)?;
        if let Some(reservation) = reservation {
            reservation.complete(encoded.clone());
        }
        Some(encoded)
    }

    fn encode(&self, peer: SocketAddr, message: &Message) -> Option<Bytes> {
        match self.codec.encode(message) {
            Ok(encoded) => Some(encoded),
            Err(err) => {
                error!(
                    "failed to encode response for {peer} mid={}: {err}",
                    message.message_id
                );
                None
            }
        }
    }
}

/// UDP front end. The receive loop only queues datagrams; a fixed worker
/// pool does the rest under the admission bound.
pub struct Server {
    socket: Arc<UdpSocket>,
    config: ServerConfig,
    store: Arc<dyn SensorStore>,
    admission: ConcurrencyManager,
    state: Arc<AtomicU8>,
    dropped: Arc<AtomicU64>,
}

struct StoppedOnDrop(Arc<AtomicU8>);

impl Drop for StoppedOnDrop {
    fn drop(&mut self) {
        self.0.store(ServerState::Stopped as u8, Ordering::Release);
    }
}

impl Server {
    pub async fn bind(config: ServerConfig, store: Arc<dyn SensorStore>) -> AppResult<Server> {
        let listen_address = config.listen_address();
        let socket = UdpSocket::bind(&listen_address).await.map_err(|err| {
            AppError::DetailedIoError(format!(
                "Failed to bind server to address: {listen_address} - Error: {err}"
            ))
        })?;
        info!("udp server bound to {}", socket.local_addr()?);

        let admission = ConcurrencyManager::new(config.admission.max_concurrent);
        Ok(Server {
            socket: Arc::new(socket),
            config,
            store,
            admission,
            state: Arc::new(AtomicU8::new(ServerState::Idle as u8)),
            dropped: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn local_addr(&self) -> AppResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn state(&self) -> ServerState {
        ServerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn admission(&self) -> &ConcurrencyManager {
        &self.admission
    }

    /// Datagrams dropped because the request queue was full.
    pub fn dropped_datagrams(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn request_handler(&self) -> RequestHandler {
        let exchanges = self.config.dedup.enabled.then(|| {
            Arc::new(ExchangeCache::new(
                Duration::from_secs(self.config.dedup.exchange_lifetime_secs),
                self.config.dedup.max_entries,
            ))
        });
        RequestHandler {
            socket: self.socket.clone(),
            codec: PacketCodec::new(
                self.config.protocol.max_options,
                self.config.network.max_datagram_size,
            ),
            admission: self.admission.clone(),
            store: self.store.clone(),
            limits: RequestLimits::from(&self.config.protocol),
            task_timeout: self.config.admission.task_timeout(),
            exchanges,
        }
    }

    /// Answers a datagram longer than `max_datagram_size` with a Reset
    /// instead of queueing it; the kernel may already have cut it short.
    async fn reject_oversized(&self, peer: SocketAddr, datagram: &[u8]) {
        let Some(message_id) = PacketCodec::peek_message_id(datagram) else {
            return;
        };
        warn!(
            "datagram from {peer} mid={message_id} exceeds {} bytes, sending reset",
            self.config.network.max_datagram_size
        );
        match PacketCodec::default().encode(&Message::reset(message_id)) {
            Ok(reset) => {
                if let Err(err) = self.socket.send_to(&reset, peer).await {
                    error!("failed to send reset to {peer}: {err}");
                }
            }
            Err(err) => error!("failed to encode reset for {peer}: {err}"),
        }
    }

    /// Receives until `notify_shutdown` fires. Queued datagrams are not
    /// drained on stop.
    pub async fn run(&self, notify_shutdown: broadcast::Sender<()>) -> AppResult<()> {
        let _stopped = StoppedOnDrop(self.state.clone());
        let pool_config = &self.config.request_handler_pool;
        let pool = WorkerPool::new(
            notify_shutdown.clone(),
            self.request_handler(),
            WorkerPoolConfig {
                channel_capacity: pool_config.channel_capacity,
                num_workers: pool_config.num_workers,
                monitor_interval: Duration::from_millis(pool_config.monitor_interval_ms),
                worker_check_timeout: Duration::from_millis(pool_config.worker_check_timeout_ms),
            },
        );
        info!(
            "serving with {} workers, {} concurrent requests, queue capacity {}",
            pool_config.num_workers,
            self.admission.bound(),
            pool_config.channel_capacity
        );

        let mut shutdown = Shutdown::subscribe(&notify_shutdown);
        let max_datagram_size = self.config.network.max_datagram_size;
        // one spare byte tells an oversized datagram from one that fits exactly
        let mut buffer = vec![0u8; max_datagram_size + 1];
        loop {
            self.state
                .store(ServerState::Receiving as u8, Ordering::Release);
            let (len, peer) = tokio::select! {
                res = self.socket.recv_from(&mut buffer) => match res {
                    Ok(received) => received,
                    Err(err) => {
                        // e.g. ICMP port unreachable reported on the next read
                        warn!("receive error: {err}");
                        continue;
                    }
                },
                _ = shutdown.recv() => {
                    debug!("receive loop got shutdown signal");
                    break;
                }
            };

            self.state
                .store(ServerState::Dispatching as u8, Ordering::Release);
            if len > max_datagram_size {
                self.reject_oversized(peer, &buffer[..len]).await;
                continue;
            }
            let task = RequestTask {
                peer,
                datagram: Bytes::copy_from_slice(&buffer[..len]),
                received_at: Instant::now(),
            };
            match pool.try_send(task) {
                Ok(()) => {}
                Err(TrySendError::Full(task)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "request queue full, dropping {} bytes from {}",
                        task.datagram.len(),
                        task.peer
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    return Err(AppError::ChannelSendError(
                        "request queue closed".to_string(),
                    ));
                }
            }
        }
        info!("udp server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::*;
    use crate::protocol::{Code, MessageType, OPTION_URI_PATH};
    use crate::storage::MemoryStore;

    async fn test_handler(dedup: bool) -> (RequestHandler, Arc<MemoryStore>) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let store = Arc::new(MemoryStore::new());
        let handler = RequestHandler {
            socket: Arc::new(socket),
            codec: PacketCodec::default(),
            admission: ConcurrencyManager::new(4),
            store: store.clone(),
            limits: RequestLimits::default(),
            task_timeout: Duration::from_secs(30),
            exchanges: dedup.then(|| Arc::new(ExchangeCache::new(Duration::from_secs(60), 16))),
        };
        (handler, store)
    }

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 50000))
    }

    #[tokio::test]
    async fn test_minimal_get_gets_bad_request() {
        let (handler, _) = test_handler(false).await;
        let encoded = handler
            .process_datagram(peer(), &[0x40, 0x01, 0x12, 0x34])
            .await
            .unwrap();
        assert_eq!(encoded.as_ref(), &[0x60, 0x80, 0x12, 0x34]);
    }

    #[tokio::test]
    async fn test_bad_version_gets_reset() {
        let (handler, _) = test_handler(false).await;
        let encoded = handler
            .process_datagram(peer(), &[0x80, 0x01, 0x00, 0x07])
            .await
            .unwrap();
        assert_eq!(encoded.as_ref(), &[0x70, 0x00, 0x00, 0x07]);
    }

    #[tokio::test]
    async fn test_malformed_gets_reset_and_short_is_dropped() {
        let (handler, _) = test_handler(false).await;
        // tkl 9
        let encoded = handler
            .process_datagram(peer(), &[0x49, 0x01, 0xAB, 0xCD])
            .await
            .unwrap();
        assert_eq!(encoded.as_ref(), &[0x70, 0x00, 0xAB, 0xCD]);

        assert!(handler.process_datagram(peer(), &[0x40, 0x01]).await.is_none());
    }

    #[tokio::test]
    async fn test_retransmitted_post_is_not_applied_twice() {
        let (handler, store) = test_handler(true).await;
        let codec = PacketCodec::default();
        let post = codec
            .encode(
                &Message::new(MessageType::Confirmable, Code::Post, 0x0100).with_payload("21.5"),
            )
            .unwrap();

        let first = handler.process_datagram(peer(), &post).await.unwrap();
        let second = handler.process_datagram(peer(), &post).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.len(), 1);

        let get = codec
            .encode(
                &Message::new(MessageType::Confirmable, Code::Get, 0x0101)
                    .with_option(OPTION_URI_PATH, "2"),
            )
            .unwrap();
        let response = codec
            .decode(&handler.process_datagram(peer(), &get).await.unwrap())
            .unwrap();
        assert_eq!(response.code, Code::BadRequest);
    }
}
