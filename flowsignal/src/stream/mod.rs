use self::timeout::TimeoutStream;
use crate::{
    config::StreamConfig,
    error::SignalError,
    model::{Candle, SubscriptionKey, Trade},
};
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use parking_lot::Mutex;
use std::{collections::BTreeSet, ops::ControlFlow, sync::Arc, time::Duration};
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{Instant, Interval, MissedTickBehavior, interval_at},
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Pluggable exchange wire format of the live connection.
pub mod adapter;

/// Read timeout wrapper detecting silent connections.
pub mod timeout;

pub use adapter::{Frame, StreamAdapter};

/// Maximum number of characters of a dropped frame included in logs.
const LOG_PAYLOAD_CHARS: usize = 100;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// Receives classified frames, in arrival order, from the connection manager.
///
/// Implementations must not block: long running work is spawned.
pub trait FrameHandler: Send + Sync + 'static {
    /// Trades of one frame. A `snapshot` replays recent history and may overlap trades
    /// already delivered.
    fn on_trades(&self, symbol: &str, trades: Vec<Trade>, snapshot: bool);

    /// Every candle row of one frame, in ascending open time.
    fn on_candles(&self, key: &SubscriptionKey, candles: Vec<Candle>);

    /// Evict every subscription nobody is interested in that has been idle for longer than
    /// `threshold`, returning the evicted keys.
    fn sweep_idle(&self, threshold: Duration) -> Vec<SubscriptionKey>;
}

/// Connection status updates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Reconnecting,
}

#[derive(Debug)]
enum Command {
    Subscribe(SubscriptionKey),
    Release(SubscriptionKey),
    Shutdown,
}

/// Handle to the single live connection shared by every subscription.
///
/// The connection task owns the socket and the desired subscription set. Every mutation of
/// either goes through its command channel. Connection failures are retried forever.
#[derive(Debug)]
pub struct ConnectionManager {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Spawn the connection task. It connects immediately, even before the first subscription.
    pub fn spawn<Adapter, Handler>(
        config: StreamConfig,
        adapter: Adapter,
        handler: Arc<Handler>,
    ) -> Self
    where
        Adapter: StreamAdapter,
        Handler: FrameHandler,
    {
        let (command_tx, command_rx) = mpsc::channel(config.command_buffer_size.max(1));
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);

        let sweep = interval_at(
            Instant::now() + config.sweep_interval,
            config.sweep_interval.max(Duration::from_millis(1)),
        );

        let actor = ConnectionActor {
            config,
            adapter,
            handler,
            desired: BTreeSet::new(),
            upstream: BTreeSet::new(),
            commands: command_rx,
            status: status_tx,
            sweep,
        };

        Self {
            commands: command_tx,
            status: status_rx,
            task: Mutex::new(Some(tokio::spawn(actor.run()))),
        }
    }

    /// Add `key` to the desired set. Idempotent.
    pub async fn subscribe(&self, key: SubscriptionKey) -> Result<(), SignalError> {
        self.commands
            .send(Command::Subscribe(key))
            .await
            .map_err(|_| SignalError::ServiceStopped)
    }

    /// Remove `key` from the desired set so it is no longer replayed on reconnect.
    ///
    /// The upstream channels stay open on the current connection until the idle sweep
    /// evicts the key.
    pub async fn release(&self, key: SubscriptionKey) -> Result<(), SignalError> {
        self.commands
            .send(Command::Release(key))
            .await
            .map_err(|_| SignalError::ServiceStopped)
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn status_receiver(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Close the connection and wait for the connection task to finish.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(error) = task.await {
                error!(%error, "connection task failed");
            }
        }
    }
}

struct ConnectionActor<Adapter, Handler> {
    config: StreamConfig,
    adapter: Adapter,
    handler: Arc<Handler>,
    desired: BTreeSet<SubscriptionKey>,
    /// Keys subscribed on the current connection.
    upstream: BTreeSet<SubscriptionKey>,
    commands: mpsc::Receiver<Command>,
    status: watch::Sender<ConnectionStatus>,
    sweep: Interval,
}

impl<Adapter, Handler> ConnectionActor<Adapter, Handler>
where
    Adapter: StreamAdapter,
    Handler: FrameHandler,
{
    /// Main connection loop with auto-reconnect
    async fn run(mut self) {
        info!("Starting live connection to {}", self.config.url);
        self.sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            self.status.send_replace(ConnectionStatus::Reconnecting);

            let connect = connect_async(self.config.url.clone());
            tokio::pin!(connect);

            let connection = loop {
                tokio::select! {
                    result = &mut connect => break result,
                    command = self.commands.recv() => {
                        if self.on_command(command, None).await.is_break() {
                            return self.stopped();
                        }
                    }
                    _ = self.sweep.tick() => self.on_sweep(None).await,
                }
            };

            match connection {
                Ok((socket, _)) => {
                    info!("Connected to {}", self.config.url);
                    self.status.send_replace(ConnectionStatus::Connected);

                    let (mut write, read) = socket.split();
                    let mut read = TimeoutStream::new(read, self.config.read_timeout);

                    let flow = self.connected(&mut write, &mut read).await;
                    self.upstream.clear();
                    self.status.send_replace(ConnectionStatus::Disconnected);

                    if flow.is_break() {
                        let _ = write.close().await;
                        return self.stopped();
                    }
                    warn!("Connection closed, will reconnect...");
                }
                Err(error) => {
                    error!("Failed to connect to {}: {}", self.config.url, error);
                    self.status.send_replace(ConnectionStatus::Disconnected);
                }
            }

            debug!(
                "Waiting {:?} before reconnecting...",
                self.config.reconnect_delay
            );
            if self.offline(self.config.reconnect_delay).await.is_break() {
                return self.stopped();
            }
        }
    }

    fn stopped(&self) {
        self.status.send_replace(ConnectionStatus::Disconnected);
        info!("Live connection stopped");
    }

    /// Serve one open connection until it drops (`Continue`) or shutdown is requested (`Break`).
    async fn connected(
        &mut self,
        write: &mut WsWriter,
        read: &mut TimeoutStream<WsReader>,
    ) -> ControlFlow<()> {
        // Replay the full desired set, the exchange forgets everything on reconnect
        let keys = self.desired.iter().cloned().collect::<Vec<_>>();
        if let Err(error) = send_all(write, self.adapter.subscribe_requests(&keys)).await {
            warn!(%error, "failed to send subscriptions");
            return ControlFlow::Continue(());
        }
        if !keys.is_empty() {
            info!(subscriptions = keys.len(), "subscribed desired set");
        }
        self.upstream.extend(keys);

        // Never ping less often than the exchange requires
        let mut ping = self.adapter.ping_interval().map(|period| {
            let period = period.min(self.config.ping_interval).max(Duration::from_millis(1));
            let mut ping = interval_at(Instant::now() + period, period);
            ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ping
        });

        loop {
            tokio::select! {
                message = read.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(error) = self.dispatch(text.as_str(), write).await {
                            warn!(%error, "failed to answer keep-alive");
                            return ControlFlow::Continue(());
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(?frame, "Server closed connection");
                        return ControlFlow::Continue(());
                    }
                    Some(Ok(_)) => {
                        // Binary, protocol ping and pong frames carry no market data
                    }
                    Some(Err(error)) => {
                        error!("WebSocket error: {}", error);
                        return ControlFlow::Continue(());
                    }
                    None => {
                        if !read.timed_out() {
                            info!("Connection stream ended");
                        }
                        return ControlFlow::Continue(());
                    }
                },
                command = self.commands.recv() => {
                    if self.on_command(command, Some(&mut *write)).await.is_break() {
                        return ControlFlow::Break(());
                    }
                }
                _ = self.sweep.tick() => self.on_sweep(Some(&mut *write)).await,
                _ = tick(&mut ping) => {
                    if let Err(error) = write.send(Message::text(self.adapter.ping())).await {
                        debug!(%error, "Failed to send ping, connection likely dead");
                        return ControlFlow::Continue(());
                    }
                }
            }
        }
    }

    /// Wait out the reconnect delay while still serving commands and sweeps.
    async fn offline(&mut self, delay: Duration) -> ControlFlow<()> {
        let deadline = tokio::time::sleep(delay);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => return ControlFlow::Continue(()),
                command = self.commands.recv() => {
                    if self.on_command(command, None).await.is_break() {
                        return ControlFlow::Break(());
                    }
                }
                _ = self.sweep.tick() => self.on_sweep(None).await,
            }
        }
    }

    async fn dispatch(&self, text: &str, write: &mut WsWriter) -> Result<(), SignalError> {
        match self.adapter.parse(text) {
            Ok(Frame::Trades {
                symbol,
                trades,
                snapshot,
            }) => {
                if !trades.is_empty() {
                    self.handler.on_trades(&symbol, trades, snapshot);
                }
            }
            Ok(Frame::Candles { key, candles }) => {
                if !candles.is_empty() {
                    self.handler.on_candles(&key, candles);
                }
            }
            Ok(Frame::Ping { reply }) => {
                write.send(Message::text(reply)).await?;
            }
            Ok(Frame::Ignore) => {}
            Err(error) => {
                debug!(
                    %error,
                    payload = %text.chars().take(LOG_PAYLOAD_CHARS).collect::<String>(),
                    "dropping malformed frame"
                );
            }
        }
        Ok(())
    }

    async fn on_command(
        &mut self,
        command: Option<Command>,
        write: Option<&mut WsWriter>,
    ) -> ControlFlow<()> {
        match command {
            Some(Command::Subscribe(key)) => {
                if self.desired.insert(key.clone()) {
                    debug!(%key, "added to desired subscriptions");
                    if let Some(write) = write {
                        if self.upstream.contains(&key) {
                            return ControlFlow::Continue(());
                        }
                        let requests = self.adapter.subscribe_requests(std::slice::from_ref(&key));
                        match send_all(write, requests).await {
                            Ok(()) => {
                                self.upstream.insert(key);
                            }
                            // Replayed with the full desired set on reconnect
                            Err(error) => warn!(%error, "failed to send subscription"),
                        }
                    }
                }
                ControlFlow::Continue(())
            }
            Some(Command::Release(key)) => {
                if self.desired.remove(&key) {
                    debug!(%key, "released from desired subscriptions");
                }
                ControlFlow::Continue(())
            }
            Some(Command::Shutdown) | None => ControlFlow::Break(()),
        }
    }

    async fn on_sweep(&mut self, write: Option<&mut WsWriter>) {
        let evicted = self.handler.sweep_idle(self.config.idle_threshold);
        if evicted.is_empty() {
            return;
        }

        for key in &evicted {
            self.desired.remove(key);
        }
        let open = evicted
            .into_iter()
            .filter(|key| self.upstream.remove(key))
            .collect::<Vec<_>>();
        info!(
            evicted = open.len(),
            remaining = self.desired.len(),
            "swept idle subscriptions"
        );

        // Keys never subscribed on this connection need no unsubscribe
        if let Some(write) = write {
            if open.is_empty() {
                return;
            }
            let remaining = self.upstream.iter().cloned().collect::<Vec<_>>();
            let requests = self.adapter.unsubscribe_requests(&open, &remaining);
            if let Err(error) = send_all(write, requests).await {
                warn!(%error, "failed to send unsubscriptions");
            }
        }
    }
}

async fn send_all(write: &mut WsWriter, requests: Vec<String>) -> Result<(), SignalError> {
    for request in requests {
        write.send(Message::text(request)).await?;
    }
    Ok(())
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
