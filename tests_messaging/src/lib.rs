//! Messaging Test Utilities
//!
//! This crate provides shared scaffolding for end-to-end messaging tests.
//!
//! ## Test Philosophy
//!
//! - **Real threads**: services run on their own thread and event loop, the
//!   way programs use them
//! - **Bounded waits**: every wait has a timeout, so a broken guarantee fails
//!   the test instead of hanging it
//! - **Observable handlers**: handlers report through channels and counters
//!   rather than asserting on foreign threads

use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use event_loop::LoopHandle;
use messaging::{kill_client, Message, Runtime, RuntimeConfig, Service};
use serde::{Deserialize, Serialize};

/// Upper bound for any wait in a test
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Protocol spoken by the calculator service
pub const PROTOCOL_ID: &str = "proto-v1";

/// Maximum payload size of [`PROTOCOL_ID`]
pub const PAYLOAD_SIZE: usize = 64;

/// Calculator request payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalcRequest {
    pub op: String,
    pub a: i64,
    pub b: i64,
}

impl CalcRequest {
    pub fn add(a: i64, b: i64) -> Self {
        Self {
            op: "ADD".to_string(),
            a,
            b,
        }
    }
}

/// Calculator response payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalcResponse {
    pub result: i64,
}

/// Runtime isolated from every other test
pub fn test_runtime() -> Runtime {
    Runtime::new(RuntimeConfig::default())
}

/// Runtime whose services also listen in `dir`
pub fn socket_runtime(dir: &std::path::Path) -> Runtime {
    Runtime::new(RuntimeConfig::default().with_socket_dir(dir))
}

/// Evaluates a calculator request
pub fn evaluate(request: &CalcRequest) -> Option<i64> {
    match request.op.as_str() {
        "ADD" => Some(request.a + request.b),
        "SUB" => Some(request.a - request.b),
        _ => None,
    }
}

/// Answers a calculator request in place
pub fn answer(message: Message) {
    let request: CalcRequest = match message.decode_json() {
        Ok(request) => request,
        Err(_) => return kill_client("malformed calculator request"),
    };
    let Some(result) = evaluate(&request) else {
        return kill_client("unknown calculator operation");
    };
    message
        .encode_json(&CalcResponse { result })
        .expect("response fits the payload");
    // The client may already be gone.
    let _ = message.respond();
}

/// Installs the calculator receive handler
pub fn calculator(service: &Service) {
    service.set_receive_handler(answer);
}

/// Pumps the calling thread's loop until `predicate` holds
pub fn pump_until(predicate: impl FnMut() -> bool) -> bool {
    event_loop::run_until(predicate, TIMEOUT)
}

/// Pumps the calling thread's loop for `duration`
pub fn pump_for(duration: Duration) {
    event_loop::run_until(|| false, duration);
}

/// Polls `predicate` without pumping, for state owned by other threads
pub fn wait_for(mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    predicate()
}

/// A service living on its own thread and event loop
pub struct ServiceThread {
    service: Service,
    event_loop: LoopHandle,
    handle: Option<JoinHandle<()>>,
}

impl ServiceThread {
    /// Starts an advertised service; `setup` runs on the service thread first
    pub fn spawn(
        runtime: &Runtime,
        name: &str,
        setup: impl FnOnce(&Service) + Send + 'static,
    ) -> Self {
        Self::start(runtime, PROTOCOL_ID, PAYLOAD_SIZE, name, true, setup)
    }

    /// Starts a service that is not advertised yet
    pub fn spawn_hidden(
        runtime: &Runtime,
        name: &str,
        setup: impl FnOnce(&Service) + Send + 'static,
    ) -> Self {
        Self::start(runtime, PROTOCOL_ID, PAYLOAD_SIZE, name, false, setup)
    }

    /// Starts an advertised service with an explicit protocol
    pub fn spawn_with_protocol(
        runtime: &Runtime,
        protocol_id: &str,
        max_payload_size: usize,
        name: &str,
        setup: impl FnOnce(&Service) + Send + 'static,
    ) -> Self {
        Self::start(runtime, protocol_id, max_payload_size, name, true, setup)
    }

    fn start(
        runtime: &Runtime,
        protocol_id: &str,
        max_payload_size: usize,
        name: &str,
        advertise: bool,
        setup: impl FnOnce(&Service) + Send + 'static,
    ) -> Self {
        let (ready_tx, ready_rx) = mpsc::channel();
        let runtime = runtime.clone();
        let protocol_id = protocol_id.to_string();
        let service_name = name.to_string();

        let handle = thread::Builder::new()
            .name(format!("svc-{}", name))
            .spawn(move || {
                let protocol = runtime.get_protocol(&protocol_id, max_payload_size);
                let service = runtime.create_service(&protocol, &service_name);
                setup(&service);
                if advertise {
                    service.advertise().expect("service advertises");
                }
                ready_tx
                    .send((service, event_loop::current()))
                    .expect("test still waiting");
                event_loop::run();
            })
            .expect("spawn service thread");

        let (service, event_loop) = ready_rx.recv_timeout(TIMEOUT).expect("service ready");
        Self {
            service,
            event_loop,
            handle: Some(handle),
        }
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    /// Loop handle of the service thread
    pub fn event_loop(&self) -> &LoopHandle {
        &self.event_loop
    }

    /// Runs `f` on the service thread and waits for its result
    pub fn run_on<R: Send + 'static>(&self, f: impl FnOnce(&Service) -> R + Send + 'static) -> R {
        let (tx, rx) = mpsc::channel();
        let service = self.service.clone();
        self.event_loop.post(move || {
            let _ = tx.send(f(&service));
        });
        rx.recv_timeout(TIMEOUT).expect("service thread answered")
    }

    /// Stops the loop and joins the thread
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.event_loop.stop();
            let _ = handle.join();
        }
    }
}

impl Drop for ServiceThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}
