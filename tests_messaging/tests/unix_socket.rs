//! Socket Transport Integration Tests
//!
//! Client and service live in separate runtimes that share only a socket
//! directory, which is how two processes meet:
//! - Requests, responses and descriptors over the socket
//! - Peer credentials from the kernel
//! - Close propagation and size agreement

use std::io::{Read, Seek, SeekFrom, Write};
use std::os::fd::OwnedFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use messaging::{Credentials, Runtime, RuntimeConfig, Session, SessionState};
use tests_messaging::*;

fn client_runtime(dir: &std::path::Path) -> Runtime {
    socket_runtime(dir)
}

fn open_client(runtime: &Runtime, size: usize) -> Session {
    let protocol = runtime.get_protocol(PROTOCOL_ID, size);
    let session = runtime.create_session(&protocol, "calculator");
    session.open_sync().unwrap();
    session
}

#[test]
fn test_add_over_socket() {
    let dir = tempfile::tempdir().unwrap();
    let server_runtime = socket_runtime(dir.path());
    let _server = ServiceThread::spawn(&server_runtime, "calculator", calculator);
    assert!(dir.path().join("calculator").exists());

    let runtime = client_runtime(dir.path());
    assert!(runtime.services().is_empty());
    let session = open_client(&runtime, PAYLOAD_SIZE);
    assert_eq!(session.state(), SessionState::Open);
    assert!(session.peer_thread().is_none());

    let request = session.create_msg();
    request.encode_json(&CalcRequest::add(2, 3)).unwrap();
    let response = request.request_sync_response().unwrap();
    assert_eq!(
        response.decode_json::<CalcResponse>().unwrap(),
        CalcResponse { result: 5 }
    );
}

#[test]
fn test_async_requests_over_socket() {
    let dir = tempfile::tempdir().unwrap();
    let server_runtime = socket_runtime(dir.path());
    let _server = ServiceThread::spawn(&server_runtime, "calculator", calculator);
    let runtime = client_runtime(dir.path());
    let session = open_client(&runtime, PAYLOAD_SIZE);

    let results = Arc::new(Mutex::new(Vec::new()));
    for i in 0..8 {
        let request = session.create_msg();
        request.encode_json(&CalcRequest::add(i, i)).unwrap();
        let sink = Arc::clone(&results);
        request
            .request_response(move |response| {
                let result = response.unwrap().decode_json::<CalcResponse>().unwrap().result;
                sink.lock().unwrap().push((i, result));
            })
            .unwrap();
    }

    assert!(pump_until(|| results.lock().unwrap().len() == 8));
    for (i, result) in results.lock().unwrap().iter() {
        assert_eq!(*result, i * 2);
    }
}

#[test]
fn test_socket_credentials() {
    let dir = tempfile::tempdir().unwrap();
    let server_runtime = socket_runtime(dir.path());
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let _server = ServiceThread::spawn(&server_runtime, "calculator", move |service| {
        calculator(service);
        service.add_open_handler(move |session| {
            let _ = tx.lock().unwrap().send(session.client_credentials());
        });
    });

    let runtime = client_runtime(dir.path());
    let _session = open_client(&runtime, PAYLOAD_SIZE);

    let credentials = rx.recv_timeout(TIMEOUT).unwrap().unwrap();
    assert_eq!(credentials, Credentials::current_process());
}

#[test]
fn test_fd_over_socket() {
    let dir = tempfile::tempdir().unwrap();
    let server_runtime = socket_runtime(dir.path());
    let _server = ServiceThread::spawn(&server_runtime, "calculator", |service| {
        service.enable_fd_reception();
        service.set_receive_handler(|message| {
            let mut file = std::fs::File::from(message.take_fd().expect("request fd"));
            let mut contents = String::new();
            file.seek(SeekFrom::Start(0)).unwrap();
            file.read_to_string(&mut contents).unwrap();
            message
                .encode_json(&CalcResponse {
                    result: contents.len() as i64,
                })
                .unwrap();
            let _ = message.respond();
        });
    });

    let runtime = client_runtime(dir.path());
    let session = open_client(&runtime, PAYLOAD_SIZE);

    let mut file = tempfile::tempfile().unwrap();
    file.write_all(b"over the wire").unwrap();
    let request = session.create_msg();
    request.set_fd(OwnedFd::from(file));
    let response = request.request_sync_response().unwrap();
    assert_eq!(response.decode_json::<CalcResponse>().unwrap().result, 13);
}

#[test]
fn test_service_delete_reaches_socket_client() {
    let dir = tempfile::tempdir().unwrap();
    let server_runtime = socket_runtime(dir.path());
    let server = ServiceThread::spawn(&server_runtime, "calculator", calculator);
    let runtime = client_runtime(dir.path());
    let session = open_client(&runtime, PAYLOAD_SIZE);

    let closed = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&closed);
    session.set_close_handler(move |_| flag.store(true, Ordering::SeqCst));
    assert!(wait_for(|| server.service().session_count() == 1));

    server.run_on(|service| service.clone().delete());
    assert!(pump_until(|| closed.load(Ordering::SeqCst)));
    assert_eq!(session.state(), SessionState::Closed);
    assert!(!dir.path().join("calculator").exists());
}

#[test]
fn test_client_close_reaches_socket_service() {
    let dir = tempfile::tempdir().unwrap();
    let server_runtime = socket_runtime(dir.path());
    let server = ServiceThread::spawn(&server_runtime, "calculator", calculator);
    let runtime = client_runtime(dir.path());
    let session = open_client(&runtime, PAYLOAD_SIZE);
    assert!(wait_for(|| server.service().session_count() == 1));

    session.close();
    assert!(wait_for(|| server.service().session_count() == 0));
}

#[test]
fn test_open_sync_polls_socket_until_advertised() {
    let dir = tempfile::tempdir().unwrap();
    let server_runtime = socket_runtime(dir.path());
    let server = ServiceThread::spawn_hidden(&server_runtime, "calculator", calculator);
    let service = server.service().clone();
    server.event_loop().post(move || {
        std::thread::sleep(Duration::from_millis(100));
        service.advertise().unwrap();
    });

    let runtime = Runtime::new(
        RuntimeConfig::default()
            .with_socket_dir(dir.path())
            .with_connect_retry_interval(Duration::from_millis(10))
            .with_open_timeout(TIMEOUT),
    );
    let session = open_client(&runtime, PAYLOAD_SIZE);
    assert!(session.is_open());
}

#[test]
fn test_config_file_selects_socket_dir() {
    let dir = tempfile::tempdir().unwrap();
    let server_runtime = socket_runtime(dir.path());
    let _server = ServiceThread::spawn(&server_runtime, "calculator", calculator);

    let mut config_file = tempfile::NamedTempFile::new().unwrap();
    let json = serde_json::json!({
        "socket_dir": dir.path(),
        "open_timeout": 2000,
    });
    config_file.write_all(json.to_string().as_bytes()).unwrap();
    let config = RuntimeConfig::from_json_file(config_file.path()).unwrap();
    assert_eq!(config.socket_dir.as_deref(), Some(dir.path()));

    let runtime = Runtime::new(config);
    let session = open_client(&runtime, PAYLOAD_SIZE);
    let request = session.create_msg();
    request.encode_json(&CalcRequest::add(1, 1)).unwrap();
    let response = request.request_sync_response().unwrap();
    assert_eq!(response.decode_json::<CalcResponse>().unwrap().result, 2);
}

#[test]
#[should_panic(expected = "maximum message size")]
fn test_size_mismatch_over_socket_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let server_runtime = socket_runtime(dir.path());
    let _server = ServiceThread::spawn(&server_runtime, "calculator", calculator);

    let runtime = client_runtime(dir.path());
    let _ = open_client(&runtime, 128);
}
