//! Message Ownership Integration Tests
//!
//! These tests validate reference counting and descriptor passing:
//! - Messages keep their session alive
//! - The last reference to a client session closes the connection
//! - File descriptors travel with requests and responses, and are fetched once

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::fd::OwnedFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use messaging::{Message, Session};
use tests_messaging::*;

fn open_client(runtime: &messaging::Runtime) -> Session {
    let protocol = runtime.get_protocol(PROTOCOL_ID, PAYLOAD_SIZE);
    let session = runtime.create_session(&protocol, "files");
    session.open_sync().unwrap();
    session
}

fn file_with(contents: &str) -> OwnedFd {
    let mut file = tempfile::tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();
    OwnedFd::from(file)
}

fn read_fd(fd: OwnedFd) -> String {
    let mut file = File::from(fd);
    file.seek(SeekFrom::Start(0)).unwrap();
    let mut contents = String::new();
    file.read_to_string(&mut contents).unwrap();
    contents
}

/// Reads the request fd and answers with the length read plus a fresh fd
fn file_service(service: &messaging::Service) {
    service.enable_fd_reception();
    service.set_receive_handler(|message: Message| {
        let read = message.take_fd().map(read_fd).unwrap_or_default();
        message
            .encode_json(&CalcResponse {
                result: read.len() as i64,
            })
            .unwrap();
        message.set_fd(file_with(&format!("got {}", read)));
        let _ = message.respond();
    });
}

// ===== Reference counting =====

#[test]
fn test_messages_count_as_session_references() {
    let runtime = test_runtime();
    let _server = ServiceThread::spawn(&runtime, "files", file_service);
    let session = open_client(&runtime);
    let base = session.ref_count();

    let messages: Vec<_> = (0..3).map(|_| session.create_msg()).collect();
    assert_eq!(session.ref_count(), base + 3);

    let extra = messages[0].add_ref();
    assert_eq!(messages[0].ref_count(), 2);
    assert_eq!(session.ref_count(), base + 3);

    drop(extra);
    drop(messages);
    assert_eq!(session.ref_count(), base);
}

#[test]
fn test_response_keeps_session_alive() {
    let runtime = test_runtime();
    let closes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&closes);
    let server = ServiceThread::spawn(&runtime, "files", move |service| {
        file_service(service);
        service.add_close_handler(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    });

    let session = open_client(&runtime);
    let response = session.create_msg().request_sync_response().unwrap();
    drop(session);

    assert!(response.session().is_open());
    assert_eq!(response.session().ref_count(), 1);
    assert_eq!(server.service().session_count(), 1);

    // Dropping the last reference tears the connection down.
    drop(response);
    assert!(wait_for(|| server.service().session_count() == 0));
    assert!(wait_for(|| closes.load(Ordering::SeqCst) == 1));
}

#[test]
fn test_pool_buffers_return_after_exchange() {
    let runtime = test_runtime();
    let _server = ServiceThread::spawn(&runtime, "files", file_service);
    let session = open_client(&runtime);
    let pool = session.protocol().pool().clone();

    for _ in 0..3 {
        let response = session.create_msg().request_sync_response().unwrap();
        drop(response);
    }
    assert!(wait_for(|| pool.stats().in_use == 0));
    assert_eq!(pool.stats().total, messaging::RuntimeConfig::default().initial_pool_size);
}

// ===== File descriptors =====

#[test]
fn test_fd_travels_both_ways() {
    let runtime = test_runtime();
    let _server = ServiceThread::spawn(&runtime, "files", file_service);
    let session = open_client(&runtime);

    let request = session.create_msg();
    request.set_fd(file_with("ping"));
    let response = request.request_sync_response().unwrap();

    assert_eq!(response.decode_json::<CalcResponse>().unwrap().result, 4);
    let fd = response.take_fd().expect("response carries an fd");
    assert_eq!(read_fd(fd), "got ping");
    assert!(response.take_fd().is_none());
}

#[test]
fn test_unfetched_request_fd_is_not_echoed() {
    let runtime = test_runtime();
    let _server = ServiceThread::spawn(&runtime, "files", |service| {
        service.enable_fd_reception();
        // Answers without looking at the request fd.
        service.set_receive_handler(|message| {
            let _ = message.respond();
        });
    });
    let session = open_client(&runtime);

    let request = session.create_msg();
    request.set_fd(file_with("ignored"));
    let response = request.request_sync_response().unwrap();
    assert!(response.take_fd().is_none());
}

/// Answers 1 if the request carried an fd, 0 otherwise
fn fd_counter(accept_fds: bool) -> impl FnOnce(&messaging::Service) + Send + 'static {
    move |service| {
        if accept_fds {
            service.enable_fd_reception();
        }
        service.set_receive_handler(|message| {
            let result = i64::from(message.take_fd().is_some());
            message.encode_json(&CalcResponse { result }).unwrap();
            let _ = message.respond();
        });
    }
}

#[test]
fn test_service_drops_fds_by_default() {
    let runtime = test_runtime();
    let server = ServiceThread::spawn(&runtime, "files", fd_counter(false));
    assert!(!server.service().fd_reception_enabled());
    let session = open_client(&runtime);

    let request = session.create_msg();
    request.set_fd(file_with("unwanted"));
    let response = request.request_sync_response().unwrap();
    assert_eq!(response.decode_json::<CalcResponse>().unwrap().result, 0);
    assert!(session.is_open());
}

#[test]
fn test_service_receives_fds_when_enabled() {
    let runtime = test_runtime();
    let server = ServiceThread::spawn(&runtime, "files", fd_counter(true));
    assert!(server.service().fd_reception_enabled());
    let session = open_client(&runtime);

    let request = session.create_msg();
    request.set_fd(file_with("wanted"));
    let response = request.request_sync_response().unwrap();
    assert_eq!(response.decode_json::<CalcResponse>().unwrap().result, 1);
}

#[test]
#[should_panic(expected = "File descriptor already set")]
fn test_double_response_fd_is_fatal() {
    let runtime = test_runtime();
    let protocol = runtime.get_protocol(PROTOCOL_ID, PAYLOAD_SIZE);
    let service = runtime.create_service(&protocol, "files");
    service.set_receive_handler(|message| {
        message.set_fd(file_with("one"));
        message.set_fd(file_with("two"));
    });
    service.advertise().unwrap();

    let session = runtime.create_session(&protocol, "files");
    session.open_sync().unwrap();
    let answered = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&answered);
    session
        .create_msg()
        .request_response(move |_| *flag.lock().unwrap() = true)
        .unwrap();

    pump_until(|| *answered.lock().unwrap());
}
