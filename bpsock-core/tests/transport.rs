use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use bpsock_core::{
    Bundle, BundleSocket, DtnError, EndpointId, Engine, LoopbackEngine, PayloadLocation, Priority,
};

/// Routes the crate's `tracing` output to the test harness; `RUST_LOG` picks the level.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn started_engine(node: u64) -> (tempfile::TempDir, Arc<LoopbackEngine>) {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(LoopbackEngine::new(node, dir.path().join("spool")));
    engine.start();
    (dir, engine)
}

#[test]
fn ping_between_two_ipn_sockets() {
    let (_dir, engine) = started_engine(1);
    let a = BundleSocket::register_ipn(engine.clone(), 10).unwrap();
    let b = BundleSocket::register_ipn(engine.clone(), 20).unwrap();

    let mut ping = Bundle::new(b.local_eid().unwrap())
        .with_data(b"ping")
        .with_priority(Priority::normal())
        .with_expiration(60);
    a.send(&mut ping).unwrap();

    let got = b.receive_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(got.data().unwrap().unwrap(), b"ping");
    assert_eq!(got.source, a.local_eid());
    assert_eq!(got.priority, Priority::normal());
    assert_eq!(got.orig_length, 4);
}

#[test]
fn bounded_receive_times_out_after_its_timeout() {
    let (_dir, engine) = started_engine(1);
    let socket = BundleSocket::register_ipn(engine, 10).unwrap();
    let start = Instant::now();
    let err = socket.receive_timeout(Duration::from_secs(5)).unwrap_err();
    let elapsed = start.elapsed();
    assert!(matches!(err, DtnError::Timeout));
    assert!(err.is_transient());
    assert!(elapsed >= Duration::from_secs(5));
    assert!(elapsed < Duration::from_secs(7), "took {:?}", elapsed);
}

#[test]
fn indefinite_receive_survives_poll_timeouts() {
    let (_dir, engine) = started_engine(1);
    let mut rx = BundleSocket::register_ipn(engine.clone(), 20).unwrap();
    rx.set_poll_window(Duration::from_secs(1));
    let tx = BundleSocket::register_ipn(engine, 10).unwrap();
    let dest = rx.local_eid().unwrap();
    let sender = thread::spawn(move || {
        thread::sleep(Duration::from_millis(2500));
        tx.send(&mut Bundle::new(dest).with_data(b"late")).unwrap();
        tx
    });
    let got = rx.receive().unwrap();
    assert_eq!(got.data().unwrap().unwrap(), b"late");
    sender.join().unwrap();
}

#[test]
fn socket_lifecycle_errors() {
    let (_dir, engine) = started_engine(1);
    let socket = BundleSocket::register_dtn(engine, "lifecycle").unwrap();
    assert_eq!(
        socket.local_eid().unwrap().to_string(),
        "dtn://node1/lifecycle"
    );
    socket.unregister().unwrap();
    let err = socket.unregister().unwrap_err();
    assert!(matches!(err, DtnError::NotRegistered));
    assert!(err.is_terminal());
    assert!(matches!(
        socket.receive_timeout(Duration::ZERO),
        Err(DtnError::NotRegistered)
    ));
}

#[test]
fn unregister_interrupts_indefinite_receive() {
    let (_dir, engine) = started_engine(1);
    let socket = Arc::new(BundleSocket::register_ipn(engine, 30).unwrap());
    let (tx, rx) = mpsc::channel();
    socket
        .receive_async(
            |_| panic!("nothing was sent"),
            Some(Box::new(move |e: DtnError| tx.send(e).unwrap())),
        )
        .unwrap();
    thread::sleep(Duration::from_millis(100));
    socket.unregister().unwrap();
    let err = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(matches!(err, DtnError::NotRegistered));
}

#[test]
fn async_receive_hands_bundle_to_handler() {
    let (_dir, engine) = started_engine(2);
    let rx_socket = Arc::new(BundleSocket::register_ipn(engine.clone(), 7).unwrap());
    let tx_socket = BundleSocket::register_ipn(engine, 8).unwrap();
    let (tx, rx) = mpsc::channel();
    rx_socket
        .receive_async_with(
            Some(PayloadLocation::TemporaryFile),
            Some(Duration::from_secs(5)),
            move |bundle| tx.send(bundle).unwrap(),
            None,
        )
        .unwrap();
    let mut bundle = Bundle::new(EndpointId::ipn(2, 7).unwrap()).with_data(b"async");
    tx_socket.send(&mut bundle).unwrap();
    let got = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    let payload = got.payload.unwrap();
    let path = payload.path().unwrap().to_path_buf();
    assert_eq!(payload.data().unwrap(), b"async");
    assert!(!path.exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn receive_task_resolves_on_the_blocking_pool() {
    let (_dir, engine) = started_engine(3);
    let socket = Arc::new(BundleSocket::register_ipn(engine.clone(), 1).unwrap());
    let task = socket
        .receive_task(None, Some(Duration::from_secs(5)))
        .unwrap();
    let sender = BundleSocket::register_ipn(engine.clone(), 2).unwrap();
    sender
        .send(&mut Bundle::new(EndpointId::ipn(3, 1).unwrap()).with_data(b"task"))
        .unwrap();
    let got = task.await.unwrap().unwrap();
    assert_eq!(got.data().unwrap().unwrap(), b"task");
    assert!(engine.local_eid(socket.token()).is_some());
}

#[test]
fn receive_task_needs_a_runtime() {
    let (_dir, engine) = started_engine(3);
    let socket = Arc::new(BundleSocket::register_ipn(engine, 1).unwrap());
    assert!(matches!(
        socket.receive_task(None, None),
        Err(DtnError::IllegalState(_))
    ));
}

#[test]
fn stopped_engine_interrupts_receivers() {
    let (_dir, engine) = started_engine(4);
    let socket = BundleSocket::register_ipn(engine.clone(), 1).unwrap();
    let stopper = {
        let engine = engine.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            engine.stop();
        })
    };
    let err = socket.receive().unwrap_err();
    assert!(matches!(err, DtnError::ReceptionInterrupted));
    stopper.join().unwrap();
}
