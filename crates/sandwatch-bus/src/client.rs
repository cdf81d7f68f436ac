//! Bus client: connection, subscription and inbound task notifications
//!
//! The client keeps one TCP connection to the event bus. After connecting it
//! subscribes to the configured events and forwards every recognised task
//! notification to the runtime. Malformed lines are logged and dropped. A
//! lost connection is re-established with capped exponential backoff and
//! the subscription is sent again.

use crate::error::{BusError, BusResult};
use crate::publisher::BusPublisher;
use sandwatch_core::config::BusSettings;
use sandwatch_core::notify::{parse_inbound, subscribe_message, TaskAction, TaskNotification};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Bus client configuration
#[derive(Debug, Clone)]
pub struct BusClientConfig {
    /// Bus address, `host:port`
    pub addr: String,

    /// Event names to subscribe to
    pub subscriptions: Vec<String>,

    pub reconnect_initial_delay: Duration,
    pub reconnect_max_delay: Duration,
}

impl BusClientConfig {
    pub fn from_settings(addr: impl Into<String>, settings: &BusSettings) -> Self {
        Self {
            addr: addr.into(),
            subscriptions: settings.subscriptions.clone(),
            reconnect_initial_delay: settings.reconnect_initial_delay(),
            reconnect_max_delay: settings.reconnect_max_delay(),
        }
    }
}

/// A task notification the runtime should act on
#[derive(Debug, Clone, PartialEq)]
pub struct InboundTask {
    pub action: TaskAction,
    /// Inbound event name, echoed in the `finished` notification
    pub event: String,
    pub notification: TaskNotification,
}

/// Capped exponential backoff
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Why a read loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadEnd {
    /// The peer closed the connection
    Disconnected,
    /// Nobody is receiving tasks anymore
    ReceiverClosed,
}

/// Event bus client
pub struct BusClient {
    config: BusClientConfig,
    publisher: BusPublisher,
}

impl BusClient {
    pub fn new(config: BusClientConfig) -> Self {
        Self {
            config,
            publisher: BusPublisher::new(),
        }
    }

    /// Publisher sharing this client's connection
    pub fn publisher(&self) -> BusPublisher {
        self.publisher.clone()
    }

    /// Run until shutdown is signalled or the task receiver goes away
    pub async fn run(
        self,
        tasks: mpsc::Sender<InboundTask>,
        mut shutdown: watch::Receiver<bool>,
    ) -> BusResult<()> {
        let mut backoff = Backoff::new(
            self.config.reconnect_initial_delay,
            self.config.reconnect_max_delay,
        );

        loop {
            let stream = tokio::select! {
                result = TcpStream::connect(&self.config.addr) => result,
                _ = shutdown.changed() => return Ok(()),
            };

            let stream = match stream {
                Ok(stream) => stream,
                Err(source) => {
                    let err = BusError::Connect {
                        addr: self.config.addr.clone(),
                        source,
                    };
                    let delay = backoff.next_delay();
                    error!("{}; retrying in {:?}", err, delay);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => continue,
                        _ = shutdown.changed() => return Ok(()),
                    }
                }
            };

            info!("Connected to event bus at {}", self.config.addr);
            backoff.reset();

            let (reader, writer) = stream.into_split();
            self.publisher.attach(writer).await;

            let subscribe = subscribe_message(&self.config.subscriptions);
            if let Err(e) = self.publisher.send(&subscribe).await {
                error!("Failed to subscribe: {}", e);
                self.publisher.detach().await;
            } else {
                debug!("Subscribed to {:?}", self.config.subscriptions);

                let end = tokio::select! {
                    end = read_loop(reader, &tasks) => end,
                    _ = shutdown.changed() => {
                        self.publisher.detach().await;
                        return Ok(());
                    }
                };
                self.publisher.detach().await;

                match end {
                    Ok(ReadEnd::ReceiverClosed) => return Ok(()),
                    Ok(ReadEnd::Disconnected) => error!("Event bus closed the connection"),
                    Err(e) => error!("Event bus connection lost: {}", e),
                }
            }

            // Back off before reconnecting
            let delay = backoff.next_delay();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => return Ok(()),
            }
        }
    }
}

/// Forward task notifications from one connection until it ends
pub async fn read_loop<R>(reader: R, tasks: &mpsc::Sender<InboundTask>) -> BusResult<ReadEnd>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(ReadEnd::Disconnected);
        }

        let line = String::from_utf8_lossy(&buf);
        let Some(task) = handle_line(line.trim()) else {
            continue;
        };
        if tasks.send(task).await.is_err() {
            return Ok(ReadEnd::ReceiverClosed);
        }
    }
}

/// Interpret one inbound line
///
/// Malformed lines and events without a task action yield `None`.
pub fn handle_line(line: &str) -> Option<InboundTask> {
    if line.is_empty() {
        return None;
    }

    let envelope = match parse_inbound(line) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("Dropping malformed bus message: {} ({})", e, line);
            return None;
        }
    };

    let event = envelope.body.event;
    let Some(action) = TaskAction::from_event(&event) else {
        debug!("Ignoring bus event {}", event);
        return None;
    };

    info!(
        task_id = envelope.body.body.taskid,
        appid = envelope.body.body.context_id(),
        "Task notification: {}",
        event
    );

    Some(InboundTask {
        action,
        event,
        notification: envelope.body.body,
    })
}
