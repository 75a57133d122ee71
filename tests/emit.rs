//! Emitting events and settling acknowledgements.

mod harness;

use std::time::Duration;

use futures::future::try_join_all;
use harness::{TestServer, within};
use iounit::{AckHandler, Args, Error};
use serde_json::{Value, json};

#[tokio::test]
async fn test_say_hi() {
    let fixture = TestServer::spawn();
    let client = within(fixture.factory().connect()).await.unwrap();

    let data = within(client.emit("sayHi", vec![])).await.unwrap();

    assert_eq!(data["status"], true);
    assert_eq!(data["message"], "hi");
}

#[tokio::test]
async fn test_create_file() {
    let fixture = TestServer::spawn();
    let client = within(fixture.factory().connect()).await.unwrap();
    let contents = 0.123_456_f64;

    let data = within(client.emit("createFile", vec![json!("mytest.txt"), json!(contents)]))
        .await
        .unwrap();

    assert_eq!(data["status"], true);
    let path = data["path"].as_str().unwrap();
    assert!(path.ends_with("mytest.txt"));
    assert!(path.starts_with(fixture.dir().to_str().unwrap()));
    let written = std::fs::read_to_string(path).unwrap();
    assert_eq!(written.parse::<f64>().unwrap(), contents);
}

#[tokio::test]
async fn test_should_fail_rejects() {
    let fixture = TestServer::spawn();
    let client = within(fixture.factory().connect()).await.unwrap();

    let err = within(client.emit("shouldFail", vec![])).await.unwrap_err();

    assert_eq!(err, Error::Rejected(json!({"status": false})));
}

#[tokio::test]
async fn test_say_hi_for_all_clients() {
    let fixture = TestServer::spawn();
    let clients = within(fixture.factory().connect_many(5)).await.unwrap();

    let results = within(try_join_all(clients.iter().map(|c| c.emit("sayHi", vec![]))))
        .await
        .unwrap();

    assert_eq!(results.len(), 5);
    assert!(results.iter().all(|r| r["message"] == "hi"));
}

#[tokio::test]
async fn test_async_handler() {
    let fixture = TestServer::spawn();
    let handler = AckHandler::new(|args: Args| async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        match args.first() {
            Some(reply) => Ok(reply["message"].clone()),
            None => Err(Error::Rejected(Value::Null)),
        }
    });
    let config = fixture.config().with_ack_handler(handler);
    let client = within(fixture.factory_with(config).connect()).await.unwrap();

    let data = within(client.emit("sayHi", vec![])).await.unwrap();

    assert_eq!(data, json!("hi"));
}

#[tokio::test]
async fn test_override_handler_per_connection() {
    let fixture = TestServer::spawn();
    let factory = fixture.factory();
    let lenient = within(factory.connect_to(None, Some(AckHandler::first())))
        .await
        .unwrap();

    let data = within(lenient.emit("shouldFail", vec![])).await.unwrap();

    assert_eq!(data, json!({"status": false}));
}

#[tokio::test]
async fn test_panicking_handler_is_malformed() {
    let fixture = TestServer::spawn();
    let handler = AckHandler::from_fn(|_| panic!("handler must not panic"));
    let config = fixture.config().with_ack_handler(handler);
    let client = within(fixture.factory_with(config).connect()).await.unwrap();

    let err = within(client.emit("sayHi", vec![])).await.unwrap_err();

    assert_eq!(
        err,
        Error::MalformedHandler("handler must not panic".into())
    );
}

#[tokio::test]
async fn test_emit_after_disconnect() {
    let fixture = TestServer::spawn();
    let client = within(fixture.factory().connect()).await.unwrap();
    within(client.disconnect()).await.unwrap();

    let err = within(client.emit("sayHi", vec![])).await.unwrap_err();

    assert_eq!(err, Error::NotConnected);
}

#[tokio::test]
async fn test_emit_reserved_event() {
    let fixture = TestServer::spawn();
    let client = within(fixture.factory().connect()).await.unwrap();

    let err = within(client.emit("connect", vec![])).await.unwrap_err();

    assert!(matches!(err, Error::Transport(_)));
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_emit_is_sent_before_await() {
    let fixture = TestServer::spawn();
    let client = within(fixture.factory().connect()).await.unwrap();
    let pong = client.on("xpong");

    let ack = client.emit("xping", vec![]);
    assert_eq!(within(pong).await.unwrap(), vec![json!("ping ok")]);
    within(ack).await.unwrap();
}

#[tokio::test]
async fn test_events_arrive_before_ack() {
    let fixture = TestServer::spawn();
    let client = within(fixture.factory().connect()).await.unwrap();
    let count = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen = count.clone();
    client.socket().on(
        "count",
        std::sync::Arc::new(move |args: Args| {
            seen.lock().unwrap().push(args[0].as_u64().unwrap());
        }),
    );

    let data = within(client.emit("countTo", vec![json!(10)])).await.unwrap();

    assert_eq!(data["count"], 10);
    assert_eq!(*count.lock().unwrap(), (1..=10).collect::<Vec<u64>>());
}
