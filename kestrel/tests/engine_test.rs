
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kestrel::kestrel_api::{
    ActorDuplicateIdEvent, ActorResult, ActorStartedEvent, EngineRemoteMissingEvent, Payload, Pid,
    RemoteSender,
};
use kestrel::{ActorConfig, Context, Engine, EngineConfig, EngineError, Receiver, RequestError};
use test_helpers::{assert_silent, engine, recv, EventCollector};
use tokio::sync::mpsc;

#[derive(Debug)]
struct Ping;

#[derive(Debug, PartialEq)]
struct Pong(u32);

#[derive(Debug)]
struct Text(&'static str);

fn spawn_recorder(engine: &Engine, name: &str) -> (Pid, mpsc::UnboundedReceiver<&'static str>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let pid = engine.spawn_fn(
        move |ctx| {
            if let Some(Text(text)) = ctx.message_as::<Text>() {
                let _ = tx.send(*text);
            }
            Ok(())
        },
        name,
        ActorConfig::default(),
    );
    (pid, rx)
}

#[tokio::test]
async fn test_spawn_and_send() {
    let engine = engine();
    let (pid, mut rx) = spawn_recorder(&engine, "recorder");

    assert_eq!(pid.address(), "local");
    assert!(pid.id().starts_with("recorder/"));
    assert!(engine.registry().contains(&pid));

    engine.send(&pid, Text("hello")).await.unwrap();
    engine.send(&pid, Text("world")).await.unwrap();
    assert_eq!(recv(&mut rx).await, "hello");
    assert_eq!(recv(&mut rx).await, "world");
}

#[tokio::test]
async fn test_spawn_with_explicit_id() {
    let engine = engine();
    let pid = engine.spawn_fn(|_| Ok(()), "worker", ActorConfig::default().with_id("7"));
    assert_eq!(pid, Pid::new("local", "worker/7"));
    assert_eq!(engine.registry().get_by_id("worker/7"), Some(pid));
}

#[tokio::test]
async fn test_duplicate_spawn_keeps_first() {
    let engine = engine();
    let mut events = EventCollector::new(&engine);
    let (first, mut rx) = spawn_recorder(&engine, "unique");
    let id = first.id().rsplit('/').next().unwrap().to_string();

    let (tx, mut second_rx) = mpsc::unbounded_channel();
    let second = engine.spawn_fn(
        move |ctx| {
            if ctx.message_as::<Text>().is_some() {
                let _ = tx.send(());
            }
            Ok(())
        },
        "unique",
        ActorConfig::default().with_id(id),
    );

    assert_eq!(first, second);
    events.wait_for::<ActorDuplicateIdEvent, _>(|e| e.pid == first).await;

    engine.send(&first, Text("still me")).await.unwrap();
    assert_eq!(recv(&mut rx).await, "still me");
    assert_silent(&mut second_rx, Duration::from_millis(50)).await;

    events.settle(Duration::from_millis(20)).await;
    assert_eq!(events.count::<ActorStartedEvent, _>(|e| e.pid == first), 1);
}

#[tokio::test]
async fn test_send_to_unknown_pid_is_dead_lettered() {
    let engine = engine();
    let target = Pid::new("local", "nonexistent");

    engine.send(&target, "hi").await.unwrap();

    let letters = engine.dead_letters(false).await.unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].target.id(), "nonexistent");
    assert_eq!(letters[0].message.downcast_ref::<&str>(), Some(&"hi"));
    assert!(letters[0].sender.is_none());

    // Flushing empties the buffer.
    assert_eq!(engine.dead_letters(true).await.unwrap().len(), 1);
    assert!(engine.dead_letters(false).await.unwrap().is_empty());
}

/// Answers every `Ping` with `Pong(n)` for each configured `n`.
struct Responder(&'static [u32]);

#[async_trait]
impl Receiver for Responder {
    async fn receive(&mut self, ctx: &mut Context) -> ActorResult<()> {
        if ctx.message_as::<Ping>().is_some() {
            for n in self.0 {
                ctx.respond(Pong(*n)).await?;
            }
        }
        Ok(())
    }
}

/// Hands every `Ping` on to another actor.
struct Forwarder(Pid);

#[async_trait]
impl Receiver for Forwarder {
    async fn receive(&mut self, ctx: &mut Context) -> ActorResult<()> {
        if ctx.message_as::<Ping>().is_some() {
            ctx.forward(&self.0).await?;
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_request_resolves_with_first_reply() {
    let engine = engine();
    let pid = engine.spawn(|| Responder(&[1, 2]), "responder", ActorConfig::default());

    let response = engine.request(&pid, Ping, Duration::from_secs(1)).await;
    let reply_pid = response.pid().clone();
    assert!(reply_pid.id().starts_with("response/"));
    assert!(engine.registry().contains(&reply_pid));

    let pong = response.result_as::<Pong>().await.unwrap();
    assert_eq!(*pong, Pong(1));
    assert!(!engine.registry().contains(&reply_pid));
}

#[tokio::test]
async fn test_request_times_out() {
    let engine = engine();
    let pid = engine.spawn_fn(|_| Ok(()), "silent", ActorConfig::default());

    let response = engine.request(&pid, Ping, Duration::from_millis(10)).await;
    let reply_pid = response.pid().clone();
    let started = tokio::time::Instant::now();
    let result = response.result().await;

    assert!(matches!(result, Err(RequestError::Timeout(d)) if d == Duration::from_millis(10)));
    assert!(started.elapsed() < Duration::from_millis(500));
    assert!(!engine.registry().contains(&reply_pid));
}

#[tokio::test]
async fn test_late_reply_becomes_dead_letter() {
    let engine = engine();
    let (tx, mut rx) = mpsc::unbounded_channel::<Pid>();
    // Hands the sender out instead of replying.
    let pid = engine.spawn_fn(
        move |ctx| {
            if ctx.message_as::<Ping>().is_some() {
                let _ = tx.send(ctx.sender().cloned().unwrap());
            }
            Ok(())
        },
        "slowpoke",
        ActorConfig::default(),
    );

    let result = engine.request(&pid, Ping, Duration::from_millis(10)).await.result().await;
    assert!(matches!(result, Err(RequestError::Timeout(_))));

    let reply_to = recv(&mut rx).await;
    engine.send(&reply_to, Pong(9)).await.unwrap();
    let letters = engine.dead_letters(false).await.unwrap();
    assert!(letters
        .iter()
        .any(|l| l.target == reply_to && l.message.downcast_ref::<Pong>() == Some(&Pong(9))));
}

#[tokio::test]
async fn test_forward_keeps_original_sender() {
    let engine = engine();
    let backend = engine.spawn(|| Responder(&[42]), "backend", ActorConfig::default());
    let frontend = engine.spawn(
        move || Forwarder(backend.clone()),
        "frontend",
        ActorConfig::default(),
    );

    let pong = engine
        .request(&frontend, Ping, Duration::from_secs(1))
        .await
        .result_as::<Pong>()
        .await
        .unwrap();
    assert_eq!(*pong, Pong(42));
}

#[tokio::test]
async fn test_send_repeat_until_stopped() {
    let engine = engine();
    let (pid, mut rx) = spawn_recorder(&engine, "ticker");

    let repeater = engine.send_repeat(&pid, Text("tick"), Duration::from_millis(10));
    assert_eq!(repeater.target(), &pid);
    for _ in 0..3 {
        assert_eq!(recv(&mut rx).await, "tick");
    }
    repeater.stop();

    // Let anything already enqueued drain, then expect silence.
    tokio::time::sleep(Duration::from_millis(30)).await;
    while rx.try_recv().is_ok() {}
    assert_silent(&mut rx, Duration::from_millis(50)).await;
}

#[tokio::test]
async fn test_missing_remote_is_reported() {
    let engine = engine();
    let mut events = EventCollector::new(&engine);
    let foreign = Pid::new("10.0.0.2:4000", "remote/1");

    let result = engine.send(&foreign, Text("lost?")).await;
    assert!(matches!(result, Err(EngineError::RemoteMissing(ref pid)) if *pid == foreign));

    let event = events
        .wait_for::<EngineRemoteMissingEvent, _>(|e| e.target == foreign)
        .await;
    assert!(event.message.downcast_ref::<Text>().is_some());

    let result = engine.request(&foreign, Ping, Duration::from_secs(1)).await.result().await;
    assert!(matches!(result, Err(RequestError::Send(EngineError::RemoteMissing(_)))));
}

#[derive(Default)]
struct RecordingRemote {
    started: AtomicUsize,
    sent: Mutex<Vec<(Pid, Payload, Option<Pid>)>>,
}

impl RemoteSender for RecordingRemote {
    fn address(&self) -> &str {
        "127.0.0.1:4000"
    }

    fn send(&self, target: &Pid, message: Payload, sender: Option<&Pid>) {
        self.sent
            .lock()
            .unwrap()
            .push((target.clone(), message, sender.cloned()));
    }

    fn start(&self) -> anyhow::Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_remote_sender_routes_foreign_pids() {
    test_helpers::init_logging();
    let remote = Arc::new(RecordingRemote::default());
    let engine = Engine::new(EngineConfig::default().with_remote(remote.clone())).unwrap();

    assert_eq!(engine.address(), "127.0.0.1:4000");
    assert_eq!(remote.started.load(Ordering::SeqCst), 1);
    assert_eq!(engine.dead_letter_pid(), &Pid::new("127.0.0.1:4000", "deadletter"));

    let (local, mut rx) = spawn_recorder(&engine, "local");
    assert_eq!(local.address(), "127.0.0.1:4000");

    let foreign = Pid::new("127.0.0.1:5000", "peer/1");
    engine.send_with_sender(&foreign, Text("over the wire"), local.clone()).await.unwrap();
    engine.send(&local, Text("at home")).await.unwrap();
    assert_eq!(recv(&mut rx).await, "at home");

    let sent = remote.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, foreign);
    assert!(sent[0].1.downcast_ref::<Text>().is_some());
    assert_eq!(sent[0].2.as_ref(), Some(&local));
}

struct BrokenRemote;

impl RemoteSender for BrokenRemote {
    fn address(&self) -> &str {
        "127.0.0.1:4001"
    }

    fn send(&self, _target: &Pid, _message: Payload, _sender: Option<&Pid>) {}

    fn start(&self) -> anyhow::Result<()> {
        anyhow::bail!("address in use")
    }
}

#[tokio::test]
async fn test_remote_start_failure() {
    test_helpers::init_logging();
    let result = Engine::new(EngineConfig::default().with_remote(Arc::new(BrokenRemote)));
    assert!(matches!(result, Err(EngineError::RemoteStart(_))));
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    test_helpers::init_logging();
    let config = EngineConfig {
        default_mailbox_capacity: 1000,
        ..Default::default()
    };
    assert!(matches!(Engine::new(config), Err(EngineError::Config(_))));
}
