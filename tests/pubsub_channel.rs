//! End-to-end tests for the publisher/subscriber topic channel.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use commsrt::identity::HostIdentity;
use commsrt::publisher::Publisher;
use commsrt::subscriber::{ErrorPolicy, NullSubscriberObserver, Subscriber};
use commsrt::transport::tcp::{TcpPublishSocket, TcpSubscribeSocket};
use commsrt::transport::TransportConfig;

#[tokio::test]
async fn subscriber_receives_messages_in_publish_order_with_increasing_sequence() {
    let endpoint = "127.0.0.1:29101";
    let mut publisher = Publisher::new(TcpPublishSocket::default(), HostIdentity::new("pub", "", None));
    publisher.start(endpoint, &TransportConfig::default()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let received: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let mut subscriber = Subscriber::new(
        TcpSubscribeSocket::default(),
        Arc::new(NullSubscriberObserver),
        ErrorPolicy::EmitEvent,
    );
    subscriber.start(endpoint, &TransportConfig::default()).await.unwrap();

    let sink = received.clone();
    subscriber
        .register_topic_handler("metrics/cpu", move |payload: String| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(payload);
                Ok(())
            }
        })
        .await;
    subscriber.subscribe("metrics/").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    for i in 0..5 {
        publisher.send("metrics/cpu", &format!("sample-{i}")).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let seen = received.lock().unwrap().clone();
    assert_eq!(seen, vec!["sample-0", "sample-1", "sample-2", "sample-3", "sample-4"]);

    subscriber.stop().await.unwrap();
    publisher.stop().await.unwrap();
}

#[tokio::test]
async fn unsubscribing_stops_further_delivery_for_that_prefix() {
    let endpoint = "127.0.0.1:29102";
    let mut publisher = Publisher::new(TcpPublishSocket::default(), HostIdentity::new("pub", "", None));
    publisher.start(endpoint, &TransportConfig::default()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let received: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let mut subscriber = Subscriber::new(
        TcpSubscribeSocket::default(),
        Arc::new(NullSubscriberObserver),
        ErrorPolicy::EmitEvent,
    );
    subscriber.start(endpoint, &TransportConfig::default()).await.unwrap();

    let sink = received.clone();
    subscriber
        .register_topic_handler("alerts/disk", move |payload: String| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(payload);
                Ok(())
            }
        })
        .await;
    subscriber.subscribe("alerts/").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    publisher.send("alerts/disk", &"first".to_string()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    subscriber.unsubscribe("alerts/").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    publisher.send("alerts/disk", &"second".to_string()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(*received.lock().unwrap(), vec!["first".to_string()]);

    subscriber.stop().await.unwrap();
    publisher.stop().await.unwrap();
}

#[tokio::test]
async fn non_matching_topic_is_never_delivered() {
    let endpoint = "127.0.0.1:29103";
    let mut publisher = Publisher::new(TcpPublishSocket::default(), HostIdentity::new("pub", "", None));
    publisher.start(endpoint, &TransportConfig::default()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let received: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let mut subscriber = Subscriber::new(
        TcpSubscribeSocket::default(),
        Arc::new(NullSubscriberObserver),
        ErrorPolicy::EmitEvent,
    );
    subscriber.start(endpoint, &TransportConfig::default()).await.unwrap();

    let sink = received.clone();
    subscriber
        .register_topic_handler("metrics/cpu", move |payload: String| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(payload);
                Ok(())
            }
        })
        .await;
    subscriber.subscribe("metrics/").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    publisher.send("other/topic", &"irrelevant".to_string()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(received.lock().unwrap().is_empty());

    subscriber.stop().await.unwrap();
    publisher.stop().await.unwrap();
}
