use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

use ecomarket_messaging_core::{
    AnalyticsRecorder, EmailNotifier, LoyaltyActivator, MessagingError, Publisher, QueueSpec,
    UserCreated, UserEvent, UserEventHandler,
};
use ecomarket_messaging_rabbitmq::{RabbitConsumer, RabbitMqOptions, RabbitPublisher};

/// Delegates to the wrapped handler and fires the oneshot on first success.
struct Notify<H> {
    inner: H,
    tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl<H> Notify<H> {
    fn new(inner: H) -> (Arc<Self>, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Arc::new(Self {
                inner,
                tx: Mutex::new(Some(tx)),
            }),
            rx,
        )
    }
}

#[async_trait::async_trait]
impl<H: UserEventHandler> UserEventHandler for Notify<H> {
    fn accepts(&self, event: &UserEvent) -> bool {
        self.inner.accepts(event)
    }

    async fn handle(&self, event: &UserEvent) -> Result<(), MessagingError> {
        self.inner.handle(event).await?;
        if let Some(tx) = self.tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
        Ok(())
    }
}

fn test_options(service: &str) -> RabbitMqOptions {
    let mut opts = RabbitMqOptions::from_env().with_service(service);
    opts.confirms = true;
    opts
}

fn spawn_consumer(spec: QueueSpec, service: &str, handler: Arc<dyn UserEventHandler>) {
    let consumer = RabbitConsumer::new(test_options(service), spec);
    tokio::spawn(async move { consumer.run(handler).await });
}

#[tokio::test]
#[ignore = "requires a RabbitMQ broker (RABBIT_HOST et al.)"]
async fn fans_out_one_copy_to_every_bound_queue() -> Result<(), Box<dyn std::error::Error>> {
    let (email, email_rx) = Notify::new(EmailNotifier);
    let (loyalty, loyalty_rx) = Notify::new(LoyaltyActivator);
    let (analytics, analytics_rx) = Notify::new(AnalyticsRecorder);

    spawn_consumer(QueueSpec::email(), "it-email", email);
    spawn_consumer(QueueSpec::loyalty(), "it-loyalty", loyalty);
    spawn_consumer(QueueSpec::analytics(), "it-analytics", analytics);

    // let the consumer tasks declare exchanges, queues and bindings
    tokio::time::sleep(Duration::from_millis(400)).await;

    let publisher = Publisher::new(Arc::new(RabbitPublisher::new(test_options("it-publisher"))));
    assert!(
        publisher
            .publish_user_created(&UserCreated {
                user_id: "u1".into(),
                nombre: "Ana".into(),
                email: "ana@x.com".into(),
            })
            .await
    );

    tokio::time::timeout(Duration::from_secs(5), email_rx).await??;
    tokio::time::timeout(Duration::from_secs(5), loyalty_rx).await??;
    tokio::time::timeout(Duration::from_secs(5), analytics_rx).await??;
    Ok(())
}

/// Fails the first execution, succeeds when the broker redelivers the
/// message from the delay queue.
struct FailOnce {
    failed: AtomicBool,
    tx: Mutex<Option<oneshot::Sender<()>>>,
}

#[async_trait::async_trait]
impl UserEventHandler for FailOnce {
    fn accepts(&self, event: &UserEvent) -> bool {
        event.user_id().is_some()
    }

    async fn handle(&self, _event: &UserEvent) -> Result<(), MessagingError> {
        if !self.failed.swap(true, Ordering::SeqCst) {
            return Err(MessagingError::Handler("transient failure".into()));
        }
        if let Some(tx) = self.tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
        Ok(())
    }
}

#[tokio::test]
#[ignore = "requires a RabbitMQ broker (RABBIT_HOST et al.)"]
async fn failed_handler_gets_a_delayed_redelivery() -> Result<(), Box<dyn std::error::Error>> {
    let (tx, rx) = oneshot::channel();
    let handler = Arc::new(FailOnce {
        failed: AtomicBool::new(false),
        tx: Mutex::new(Some(tx)),
    });

    let mut opts = test_options("it-retry");
    opts.retry_ttl_ms = 500;
    let consumer = RabbitConsumer::new(opts, QueueSpec::durable("it_retry_queue"));
    tokio::spawn(async move { consumer.run(handler).await });
    tokio::time::sleep(Duration::from_millis(400)).await;

    let publisher = Publisher::new(Arc::new(RabbitPublisher::new(test_options("it-publisher"))));
    assert!(
        publisher
            .publish_user_created(&UserCreated {
                user_id: "u2".into(),
                nombre: "Luis".into(),
                email: "luis@x.com".into(),
            })
            .await
    );

    // first attempt fails, redelivery lands after the 500ms delay
    tokio::time::timeout(Duration::from_secs(10), rx).await??;
    Ok(())
}
