//! Publishing normalized frames to a message broker.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    thread,
    time::Duration,
};

use crossbeam_channel::{Receiver, SendTimeoutError, Sender, bounded};

use crate::{
    error::{ConnectError, PublishError},
    types::Frame,
};

/// An open broker connection.
pub trait MessageBroker: Send {
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), PublishError>;
}

pub trait BrokerConnector: Send + Sync {
    fn connect(&self, endpoint: &str) -> Result<Box<dyn MessageBroker>, ConnectError>;
}

/// Default bound on connecting to the broker and on each publish round trip.
pub const DEFAULT_BROKER_TIMEOUT: Duration = Duration::from_secs(2);

/// Redis Streams connector: each message becomes one `XADD` entry.
#[derive(Debug)]
pub struct RedisStreamConnector {
    timeout: Duration,
}

impl RedisStreamConnector {
    /// `timeout` bounds connecting as well as every read and write, so a
    /// stalled broker fails the publish instead of holding the connection.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for RedisStreamConnector {
    fn default() -> Self {
        Self::new(DEFAULT_BROKER_TIMEOUT)
    }
}

impl BrokerConnector for RedisStreamConnector {
    fn connect(&self, endpoint: &str) -> Result<Box<dyn MessageBroker>, ConnectError> {
        let client =
            redis::Client::open(endpoint).map_err(|err| ConnectError::new(endpoint, err))?;
        let connection = client
            .get_connection_with_timeout(self.timeout)
            .map_err(|err| ConnectError::new(endpoint, err))?;
        connection
            .set_read_timeout(Some(self.timeout))
            .map_err(|err| ConnectError::new(endpoint, err))?;
        connection
            .set_write_timeout(Some(self.timeout))
            .map_err(|err| ConnectError::new(endpoint, err))?;
        Ok(Box::new(RedisStreamBroker { connection }))
    }
}

pub struct RedisStreamBroker {
    connection: redis::Connection,
}

impl MessageBroker for RedisStreamBroker {
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        let _entry_id: String = redis::cmd("XADD")
            .arg(topic)
            .arg("*")
            .arg("payload")
            .arg(payload)
            .query(&mut self.connection)
            .map_err(|err| PublishError::broker(topic, err))?;
        Ok(())
    }
}

/// Single shared broker connection. Publishes are serialized so frames reach
/// the broker in the order they were handed over.
pub struct DeliveryProducer {
    connector: Box<dyn BrokerConnector>,
    topic: String,
    connection: Mutex<Option<Box<dyn MessageBroker>>>,
}

impl DeliveryProducer {
    pub fn new(connector: Box<dyn BrokerConnector>, topic: impl Into<String>) -> Self {
        Self {
            connector,
            topic: topic.into(),
            connection: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn MessageBroker>>> {
        self.connection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Opens the connection reused by every later publish. An existing
    /// connection is kept.
    pub fn connect(&self, endpoint: &str) -> Result<(), ConnectError> {
        let mut connection = self.lock();
        if connection.is_some() {
            return Ok(());
        }
        *connection = Some(self.connector.connect(endpoint)?);
        log::info!("connected to broker at {endpoint}");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.lock().is_some()
    }

    /// Blocks until the broker accepts or rejects the payload. Not retried.
    pub fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        match self.lock().as_mut() {
            Some(broker) => broker.publish(topic, payload),
            None => Err(PublishError::NotConnected),
        }
    }

    pub fn publish_frame(&self, frame: &Frame) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(frame)?;
        self.publish(&self.topic, &payload)
    }
}

#[derive(Debug)]
pub struct PublishFailure {
    pub subject_id: String,
    pub captured_at_millis: u64,
    pub error: PublishError,
}

/// Runs publishes off the frame path, in FIFO order.
pub struct DeliveryWorker {
    frame_tx: Option<Sender<Frame>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl DeliveryWorker {
    pub fn start<F>(producer: Arc<DeliveryProducer>, queue_depth: usize, on_result: F) -> Self
    where
        F: Fn(Result<(), PublishFailure>) + Send + 'static,
    {
        let (frame_tx, frame_rx) = bounded(queue_depth.max(1));
        let handle = thread::spawn(move || run_delivery_loop(&producer, frame_rx, on_result));
        Self {
            frame_tx: Some(frame_tx),
            handle: Some(handle),
        }
    }

    /// Queues `frame`, waiting at most `wait` for room. Returns false when
    /// the frame was dropped.
    pub fn enqueue(&self, frame: Frame, wait: Duration) -> bool {
        let Some(frame_tx) = self.frame_tx.as_ref() else {
            return false;
        };
        match frame_tx.send_timeout(frame, wait) {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(frame)) => {
                log::warn!(
                    "delivery queue full, dropping frame {}@{}",
                    frame.subject_id,
                    frame.captured_at_millis
                );
                false
            }
            Err(SendTimeoutError::Disconnected(_)) => false,
        }
    }

    /// Drains queued frames, then stops the worker.
    pub fn shutdown(&mut self) {
        self.frame_tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DeliveryWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_delivery_loop<F>(producer: &DeliveryProducer, frame_rx: Receiver<Frame>, on_result: F)
where
    F: Fn(Result<(), PublishFailure>),
{
    while let Ok(frame) = frame_rx.recv() {
        match producer.publish_frame(&frame) {
            Ok(()) => on_result(Ok(())),
            Err(error) => {
                log::warn!(
                    "failed to publish frame {}@{}: {error}",
                    frame.subject_id,
                    frame.captured_at_millis
                );
                on_result(Err(PublishFailure {
                    subject_id: frame.subject_id,
                    captured_at_millis: frame.captured_at_millis,
                    error,
                }));
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::testing::{StubBroker, StubConnector};
    use super::*;
    use crate::types::{Joint, JointName, Vector3};

    fn frame(t: u64) -> Frame {
        Frame::new(
            "s",
            t,
            vec![Joint::tracked(JointName::HipCenter, Vector3::new(t as f64, 0.0, 0.0))],
        )
        .unwrap()
    }

    fn producer(broker: Option<StubBroker>) -> DeliveryProducer {
        DeliveryProducer::new(Box::new(StubConnector { broker }), "frames")
    }

    #[test]
    fn publish_requires_connection() {
        let producer = producer(Some(StubBroker::default()));
        assert!(!producer.is_connected());
        assert!(matches!(
            producer.publish_frame(&frame(1)),
            Err(PublishError::NotConnected)
        ));
    }

    #[test]
    fn connect_failure_leaves_producer_disconnected() {
        let producer = producer(None);
        let err = producer.connect("redis://nowhere").unwrap_err();
        assert_eq!(err.endpoint, "redis://nowhere");
        assert!(!producer.is_connected());
    }

    #[test]
    fn failed_publish_is_reported_and_not_retried() {
        let broker = StubBroker::failing_on(&[2]);
        let producer = producer(Some(broker.clone()));
        producer.connect("stub").unwrap();

        let results: Vec<bool> = (1..=3)
            .map(|t| producer.publish_frame(&frame(t)).is_ok())
            .collect();

        assert_eq!(results, vec![true, false, true]);
        assert_eq!(broker.delivered_frames(), vec![frame(1), frame(3)]);
        assert_eq!(broker.calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[test]
    fn unreachable_broker_fails_within_the_timeout() {
        let connector = RedisStreamConnector::new(Duration::from_millis(200));
        let started = std::time::Instant::now();

        // Non-routable address: either refused at once or left to time out.
        let err = connector.connect("redis://10.255.255.1:6379").err().unwrap();
        assert_eq!(err.endpoint, "redis://10.255.255.1:6379");
        assert!(started.elapsed() < Duration::from_secs(2));

        assert!(connector.connect("not a url").is_err());
    }

    #[test]
    fn connection_is_reused() {
        let broker = StubBroker::default();
        let producer = producer(Some(broker.clone()));
        producer.connect("stub").unwrap();
        producer.publish_frame(&frame(1)).unwrap();
        producer.connect("stub").unwrap();
        producer.publish_frame(&frame(2)).unwrap();
        assert_eq!(broker.delivered_frames(), vec![frame(1), frame(2)]);
    }

    #[test]
    fn worker_delivers_in_order_and_reports_failures() {
        let broker = StubBroker::failing_on(&[2]);
        let producer = Arc::new(producer(Some(broker.clone())));
        producer.connect("stub").unwrap();

        let failures = Arc::new(Mutex::new(Vec::new()));
        let mut worker = {
            let failures = failures.clone();
            DeliveryWorker::start(producer, 8, move |result| {
                if let Err(failure) = result {
                    failures.lock().unwrap().push(failure.captured_at_millis);
                }
            })
        };

        for t in 1..=3 {
            assert!(worker.enqueue(frame(t), Duration::from_millis(100)));
        }
        worker.shutdown();

        assert_eq!(broker.delivered_frames(), vec![frame(1), frame(3)]);
        assert_eq!(*failures.lock().unwrap(), vec![2]);
        assert!(!worker.enqueue(frame(4), Duration::ZERO));
    }
}
