// MQTT transport - fire-and-forget publishing at QoS 1
//
// Ownership layout keeps the graph worker isolated from the network:
//
//   graph worker --(rtrb SPSC)--> publish thread --(rumqttc)--> broker
//                                       |
//                              connection thread (event loop, reconnects)
//
// The publish call is a queue push; everything that can block or fail
// lives on the transport threads. Failed publishes are logged and dropped,
// never retried by the core - QoS 1 redelivery is the client's business.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rumqttc::{Client, Event, MqttOptions, Packet, QoS};

use crate::config::PublisherConfig;
use crate::error::ConfigError;
use crate::lighting::LightingCommand;
use crate::publish::{parse_broker_uri, CommandPayload, WallClock};

/// Commands buffered between the graph worker and the publish thread.
const COMMAND_QUEUE_CAPACITY: usize = 256;

/// rumqttc request channel capacity.
const MQTT_CHANNEL_CAPACITY: usize = 64;

/// Idle sleep for the publish thread when the queue is empty.
const DRAIN_IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Back-off between connection error reports, to keep a dead broker from
/// hot-looping the event thread.
const RECONNECT_PAUSE: Duration = Duration::from_millis(500);

pub struct MqttPublisher {
    queue: rtrb::Producer<CommandPayload>,
    clock: WallClock,
    client: Client,
    stop: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    publish_thread: Option<JoinHandle<()>>,
    connection_thread: Option<JoinHandle<()>>,
}

impl MqttPublisher {
    /// Capture the wall-clock baseline and bring up the transport threads.
    ///
    /// The broker does not need to be reachable: connection and reconnects
    /// happen asynchronously, and commands published meanwhile are dropped
    /// with a log line.
    pub fn connect(config: &PublisherConfig) -> Result<Self, ConfigError> {
        let (host, port) = parse_broker_uri(&config.broker_uri)?;

        let mut options = MqttOptions::new(config.client_id.clone(), host, port);
        options.set_keep_alive(Duration::from_secs(5));
        options.set_clean_session(true);

        let (client, mut connection) = Client::new(options, MQTT_CHANNEL_CAPACITY);
        let (queue_tx, mut queue_rx) =
            rtrb::RingBuffer::<CommandPayload>::new(COMMAND_QUEUE_CAPACITY);

        let stop = Arc::new(AtomicBool::new(false));
        let dropped = Arc::new(AtomicU64::new(0));

        // Connection event loop: drives outgoing packets, observes acks,
        // performs automatic reconnects.
        let conn_stop = Arc::clone(&stop);
        let broker_uri = config.broker_uri.clone();
        let connection_thread = thread::Builder::new()
            .name("beatlight-mqtt-conn".to_string())
            .spawn(move || {
                for event in connection.iter() {
                    match event {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            log::info!("MQTT connected to {}", broker_uri);
                        }
                        Ok(_) => {}
                        Err(err) => {
                            if conn_stop.load(Ordering::Acquire) {
                                break;
                            }
                            log::warn!("MQTT connection error ({}): {}", broker_uri, err);
                            thread::sleep(RECONNECT_PAUSE);
                        }
                    }
                    if conn_stop.load(Ordering::Acquire) {
                        break;
                    }
                }
            })
            .expect("failed to spawn MQTT connection thread");

        // Publish drain loop.
        let publish_client = client.clone();
        let publish_stop = Arc::clone(&stop);
        let topic = config.topic.clone();
        let publish_thread = thread::Builder::new()
            .name("beatlight-mqtt-pub".to_string())
            .spawn(move || loop {
                match queue_rx.pop() {
                    Ok(payload) => match serde_json::to_string(&payload) {
                        Ok(body) => {
                            if let Err(err) = publish_client.try_publish(
                                &topic,
                                QoS::AtLeastOnce,
                                false,
                                body,
                            ) {
                                log::warn!(
                                    "MQTT publish failed for {}: {}",
                                    payload.event_id,
                                    err
                                );
                            }
                        }
                        Err(err) => {
                            log::error!("command serialization failed: {}", err);
                        }
                    },
                    Err(_) => {
                        if publish_stop.load(Ordering::Acquire) {
                            break;
                        }
                        thread::sleep(DRAIN_IDLE_SLEEP);
                    }
                }
            })
            .expect("failed to spawn MQTT publish thread");

        Ok(Self {
            queue: queue_tx,
            clock: WallClock::now(),
            client,
            stop,
            dropped,
            publish_thread: Some(publish_thread),
            connection_thread: Some(connection_thread),
        })
    }

    /// Convert a command to its wall-clock payload and enqueue it.
    ///
    /// Never blocks; a full queue drops the command with a warning.
    pub fn publish(&mut self, command: &LightingCommand) {
        let payload = CommandPayload::from_command(command, &self.clock);
        if self.queue.push(payload).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            log::warn!(
                "command queue full, dropping event {}",
                command.event_id
            );
        }
    }

    /// Commands dropped because the hand-off queue was full.
    pub fn dropped_commands(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Wall-clock baseline captured at connect time.
    pub fn clock(&self) -> WallClock {
        self.clock
    }

    /// Override the baseline (deterministic scheduling in tests).
    pub fn set_clock(&mut self, clock: WallClock) {
        self.clock = clock;
    }

    /// Drain the queue, disconnect, and join the transport threads.
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.publish_thread.take() {
            let _ = handle.join();
        }
        let _ = self.client.disconnect();
        if let Some(handle) = self.connection_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MqttPublisher {
    fn drop(&mut self) {
        if self.publish_thread.is_some() || self.connection_thread.is_some() {
            self.shutdown();
        }
    }
}
