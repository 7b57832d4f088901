use std::io::{self, Write};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use bpsock_core::{
    decode_frame, Bundle, BundleListener, ClientConfig, DeathWatch, Delivery, DtnError,
    EndpointService, LoopbackEngine, ListenerError, StreamListener,
};

/// Byte sink that forwards each write to a channel, standing in for a pipe to another process.
struct Pipe(mpsc::Sender<Vec<u8>>);

impl Write for Pipe {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .send(buf.to_vec())
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct Silent {
    watch: Mutex<Option<DeathWatch>>,
}

impl BundleListener for Silent {
    fn on_bundle_received(&self, _: Delivery) -> Result<(), ListenerError> {
        Ok(())
    }

    fn link_to_death(&self, watch: DeathWatch) -> Result<(), ListenerError> {
        *self.watch.lock().unwrap() = Some(watch);
        Ok(())
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn service(threshold: usize) -> (tempfile::TempDir, Arc<LoopbackEngine>, EndpointService) {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(LoopbackEngine::new(5, dir.path().join("spool")));
    engine.start();
    let config = ClientConfig::from_toml_str(&format!(
        "payload_threshold = {}\nscratch_dir = {:?}\n",
        threshold,
        dir.path().display().to_string()
    ))
    .unwrap();
    let service = EndpointService::new(engine.clone(), engine.status_cell(), config);
    (dir, engine, service)
}

#[test]
fn large_bundle_reaches_stream_listener() {
    let (_dir, _engine, service) = service(1000);
    let (tx, rx) = mpsc::channel();
    let remote = Arc::new(StreamListener::new(Pipe(tx)));
    let sink = service.open_endpoint("", 20, remote).unwrap();
    let source = service
        .open_endpoint("", 10, Arc::new(Silent { watch: Mutex::new(None) }))
        .unwrap();

    let payload: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();
    let mut bundle = Bundle::new(sink.local_eid().clone()).with_data(&payload);
    source.send(&mut bundle).unwrap();

    let mut buf = Vec::new();
    let frame = loop {
        buf.extend(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        if let Ok((frame, _)) = decode_frame(&buf) {
            break frame;
        }
    };
    assert_eq!(frame.payload, payload);
    assert_eq!(frame.source.as_ref(), Some(source.local_eid()));

    sink.close().unwrap();
    source.close().unwrap();
}

#[test]
fn second_open_of_same_endpoint_is_rejected() {
    let (_dir, _engine, service) = service(1000);
    let first = service
        .open_endpoint("app", 0, Arc::new(Silent { watch: Mutex::new(None) }))
        .unwrap();
    let second = service.open_endpoint("app", 0, Arc::new(Silent { watch: Mutex::new(None) }));
    assert!(matches!(
        second,
        Err(DtnError::Register { .. }) | Err(DtnError::IllegalState(_))
    ));
    first.close().unwrap();
    let again = service
        .open_endpoint("app", 0, Arc::new(Silent { watch: Mutex::new(None) }))
        .unwrap();
    again.close().unwrap();
}

#[test]
fn send_refused_after_engine_stops() {
    let (_dir, engine, service) = service(1000);
    let endpoint = service
        .open_endpoint("", 10, Arc::new(Silent { watch: Mutex::new(None) }))
        .unwrap();
    engine.stop();
    let mut bundle = Bundle::new(endpoint.local_eid().clone()).with_data(b"x");
    assert!(matches!(
        endpoint.send(&mut bundle),
        Err(DtnError::IllegalState(_))
    ));
    endpoint.close().ok();
}
