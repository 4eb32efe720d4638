use crate::config::BridgeConfig;
use crate::discovery::Step;
use crate::error::{BridgeError, Result};
use crate::host::DeviceHost;
use crate::protocol::{subscribe_topics, Command};
use crate::registry::DeviceRegistry;
use crate::store::DeviceMapStore;
use crate::subscription::{BridgeEvent, EventReceiver};
use crate::types::DeviceRecord;
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, Packet, QoS};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{sleep_until, Instant};

const MAX_BACKOFF: Duration = Duration::from_secs(60);
const REQUEST_CAPACITY: usize = 32;

/// Requests from the [`Bridge`] handle to its task
enum Request {
    StartDiscovery,
    Devices(oneshot::Sender<Vec<DeviceRecord>>),
}

/// Running bridge between the gateway's MQTT topics and a host
///
/// One background task owns the MQTT event loop and the [`DeviceRegistry`]; all
/// bridge state is confined to it. Discovery pacing and response timeouts are
/// deadlines inside that task, so telemetry keeps flowing while discovery runs.
///
/// # Example
///
/// ```no_run
/// use zb_bridge::{Bridge, BridgeConfig, MemoryHost};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = BridgeConfig::new("Zb_gateway_28F860").with_broker("192.168.88.115", 1883);
///     let mut bridge = Bridge::start(config, MemoryHost::new()).await?;
///
///     let mut events = bridge.subscribe();
///     while let Ok(event) = events.recv().await {
///         println!("{:?}", event);
///     }
///
///     bridge.stop().await;
///     Ok(())
/// }
/// ```
pub struct Bridge {
    requests: mpsc::UnboundedSender<Request>,
    events: broadcast::Sender<BridgeEvent>,
    stop_tx: Option<broadcast::Sender<()>>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl Bridge {
    /// Connect to the broker and start bridging
    ///
    /// The persisted device map at `config.map_path` is loaded first. Discovery
    /// starts `startup_delay` after every successful (re)connect.
    pub async fn start<H>(config: BridgeConfig, host: H) -> Result<Self>
    where
        H: DeviceHost + Send + 'static,
    {
        config.validate()?;
        let registry = DeviceRegistry::new(host)
            .with_pacing(config.pacing())
            .with_store(DeviceMapStore::new(&config.map_path));
        Self::with_registry(config, registry).await
    }

    /// Start bridging with a pre-built registry
    pub async fn with_registry<H>(config: BridgeConfig, registry: DeviceRegistry<H>) -> Result<Self>
    where
        H: DeviceHost + Send + 'static,
    {
        config.validate()?;
        tracing::info!(
            "Connecting to {}:{} for gateway {}",
            config.broker_host,
            config.broker_port,
            config.gateway_topic
        );

        let (client, eventloop) = AsyncClient::new(config.mqtt_options(), REQUEST_CAPACITY);
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(100);
        let (stop_tx, stop_rx) = broadcast::channel(1);

        let worker = Worker {
            config,
            client,
            registry,
            events: events.clone(),
            start_at: None,
            resume_at: None,
            timeout: None,
            reconnect_at: None,
            backoff: Duration::ZERO,
        };
        let handle = tokio::spawn(worker.run(eventloop, request_rx, stop_rx));

        Ok(Self {
            requests: request_tx,
            events,
            stop_tx: Some(stop_tx),
            task_handle: Some(handle),
        })
    }

    /// Subscribe to bridge events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver::new(self.events.subscribe())
    }

    /// Start a discovery batch now (ignored while one is running)
    pub fn start_discovery(&self) -> Result<()> {
        self.requests
            .send(Request::StartDiscovery)
            .map_err(|_| BridgeError::ConnectionClosed)
    }

    /// Snapshot of the known devices
    pub async fn devices(&self) -> Result<Vec<DeviceRecord>> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request::Devices(tx))
            .map_err(|_| BridgeError::ConnectionClosed)?;
        rx.await.map_err(|_| BridgeError::ConnectionClosed)
    }

    /// Stop the bridge task and disconnect
    pub async fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.task_handle.take() {
            // Give it a moment to stop gracefully
            let _ = tokio::time::timeout(Duration::from_millis(500), handle).await;
        }
    }
}

/// State confined to the bridge task
struct Worker<H> {
    config: BridgeConfig,
    client: AsyncClient,
    registry: DeviceRegistry<H>,
    events: broadcast::Sender<BridgeEvent>,
    start_at: Option<Instant>,
    resume_at: Option<Instant>,
    /// Response deadline and the request sequence number it belongs to
    timeout: Option<(Instant, u64)>,
    reconnect_at: Option<Instant>,
    backoff: Duration,
}

impl<H: DeviceHost> Worker<H> {
    async fn run(
        mut self,
        mut eventloop: EventLoop,
        mut requests: mpsc::UnboundedReceiver<Request>,
        mut stop_rx: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = stop_rx.recv() => {
                    tracing::info!("Bridge stopped");
                    break;
                }
                request = requests.recv() => match request {
                    Some(Request::StartDiscovery) => {
                        let step = self.registry.start_discovery();
                        self.apply(step);
                    }
                    Some(Request::Devices(reply)) => {
                        let _ = reply.send(self.registry.devices().values().cloned().collect());
                    }
                    None => break,
                },
                event = eventloop.poll(), if self.reconnect_at.is_none() => self.on_event(event),
                _ = wait_until(self.reconnect_at) => {
                    self.reconnect_at = None;
                }
                _ = wait_until(self.start_at) => {
                    self.start_at = None;
                    let step = self.registry.start_discovery();
                    self.apply(step);
                }
                _ = wait_until(self.resume_at) => {
                    self.resume_at = None;
                    let step = self.registry.resume_discovery();
                    self.apply(step);
                }
                _ = wait_until(self.timeout.map(|(at, _)| at)) => {
                    if let Some((_, seq)) = self.timeout.take() {
                        let step = self.registry.discovery_timeout(seq);
                        self.apply(step);
                    }
                }
            }

            for event in self.registry.drain_events() {
                let _ = self.events.send(event);
            }
        }

        let _ = self.client.try_disconnect();
    }

    fn on_event(&mut self, event: std::result::Result<Event, ConnectionError>) {
        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                tracing::info!("MQTT connected");
                self.backoff = Duration::ZERO;

                let topics = subscribe_topics(&self.config.gateway_topic);
                for topic in &topics {
                    if let Err(e) = self.client.try_subscribe(topic, QoS::AtMostOnce) {
                        tracing::warn!("Failed to subscribe to {}: {}", topic, e);
                    }
                }
                tracing::info!("Subscribed to: {:?}", topics);

                self.start_at = Some(Instant::now() + self.config.startup_delay());
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                tracing::debug!(
                    "Received on {}: {} bytes",
                    publish.topic,
                    publish.payload.len()
                );
                let step = self.registry.handle_payload(&publish.payload);
                self.apply(step);
            }
            Ok(_) => {}
            Err(e) => {
                // Exponential backoff: 1s, 2s, 4s, ... 60s (max)
                self.backoff = if self.backoff.is_zero() {
                    Duration::from_secs(1)
                } else {
                    (self.backoff * 2).min(MAX_BACKOFF)
                };
                tracing::warn!(
                    "{}; reconnecting in {:?}",
                    BridgeError::from(e),
                    self.backoff
                );
                self.reconnect_at = Some(Instant::now() + self.backoff);
            }
        }
    }

    fn apply(&mut self, step: Step) {
        match step {
            Step::Send(command) => self.publish(command),
            Step::Pace(delay) => {
                self.timeout = None;
                self.resume_at = Some(Instant::now() + delay);
            }
            Step::Completed | Step::Aborted => {
                self.timeout = None;
                self.resume_at = None;
            }
            Step::Pending => {}
        }
    }

    fn publish(&mut self, command: Command) {
        let topic = command.topic(&self.config.gateway_topic);
        match self
            .client
            .try_publish(&topic, QoS::AtMostOnce, false, command.payload())
        {
            Ok(()) => tracing::debug!("Published {}", topic),
            // the response timeout below skips the request
            Err(e) => tracing::warn!("Failed to publish {}: {}", topic, e),
        }
        self.timeout = Some((
            Instant::now() + self.config.response_timeout(),
            self.registry.request_seq(),
        ));
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
