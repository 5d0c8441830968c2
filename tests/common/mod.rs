//! In-process mock pool speaking the line-delimited JSON protocol.

use chukwa_miner::config::Pool;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Byte offset of the nonce window within a blob.
pub const NONCE_OFFSET: usize = 39;

/// Something the mock pool observed or did.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    /// A client connected
    Connected,
    /// A login request arrived (raw request)
    Login(Value),
    /// A submit request arrived (raw request)
    Submit(Value),
    /// A getjob request arrived
    GetJob(Value),
    /// A keepalived request arrived
    KeepAlive,
    /// The connection closed
    Disconnected,
}

/// A scriptable pool: answers logins with a canned job, acks submits and
/// keepalives, reports everything it sees, and can push lines or drop the
/// connection on demand.
pub struct MockPool {
    /// The port the mock listens on
    pub port: u16,
    events: mpsc::UnboundedReceiver<PoolEvent>,
    push: Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>,
}

impl MockPool {
    /// Binds to an ephemeral port.
    pub async fn spawn(login_job: Value) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::from_listener(listener, login_job)
    }

    /// Binds to a specific port (used to "bring a pool back up").
    pub async fn spawn_on(port: u16, login_job: Value) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        Self::from_listener(listener, login_job)
    }

    fn from_listener(listener: TcpListener, login_job: Value) -> Self {
        let port = listener.local_addr().unwrap().port();
        let (event_sender, events) = mpsc::unbounded_channel();
        let push: Arc<Mutex<Option<mpsc::UnboundedSender<String>>>> =
            Arc::new(Mutex::new(None));

        {
            let push = Arc::clone(&push);

            tokio::spawn(async move {
                loop {
                    let Ok((socket, _)) = listener.accept().await else {
                        break;
                    };

                    let _ = event_sender.send(PoolEvent::Connected);

                    let (push_sender, push_receiver) = mpsc::unbounded_channel();
                    *push.lock().unwrap() = Some(push_sender);

                    handle_connection(
                        socket,
                        event_sender.clone(),
                        push_receiver,
                        login_job.clone(),
                    )
                    .await;
                }
            });
        }

        MockPool { port, events, push }
    }

    /// Waits for the next observed event.
    pub async fn next_event(&mut self, timeout: Duration) -> PoolEvent {
        tokio::time::timeout(timeout, self.events.recv())
            .await
            .expect("timed out waiting for a pool event")
            .expect("mock pool went away")
    }

    /// Waits for the next event matched by `filter`, discarding others.
    pub async fn wait_for<T>(
        &mut self,
        timeout: Duration,
        filter: impl Fn(&PoolEvent) -> Option<T>,
    ) -> T {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .expect("timed out waiting for a matching pool event");

            let event = self.next_event(remaining).await;

            if let Some(found) = filter(&event) {
                return found;
            }
        }
    }

    /// Sends one line to the currently connected client.
    pub fn push_line(&self, value: &Value) {
        let push = self.push.lock().unwrap();
        let sender = push.as_ref().expect("no client connected");
        sender.send(value.to_string() + "\n").unwrap();
    }

    /// Drops the current connection.
    pub fn close_connection(&self) {
        *self.push.lock().unwrap() = None;
    }
}

async fn handle_connection(
    socket: TcpStream,
    events: mpsc::UnboundedSender<PoolEvent>,
    mut push: mpsc::UnboundedReceiver<String>,
    login_job: Value,
) {
    let (read_half, mut write_half) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Ok(Some(line)) = line else {
                    break;
                };

                let Ok(request) = serde_json::from_str::<Value>(&line) else {
                    continue;
                };

                let reply = match request.get("method").and_then(Value::as_str) {
                    Some("login") => {
                        let _ = events.send(PoolEvent::Login(request.clone()));
                        Some(json!({
                            "id": 1,
                            "jsonrpc": "2.0",
                            "result": {
                                "id": "session-1",
                                "job": login_job,
                                "status": "OK",
                            },
                        }))
                    }
                    Some("submit") => {
                        let _ = events.send(PoolEvent::Submit(request.clone()));
                        Some(json!({"id": 1, "result": {"status": "OK"}}))
                    }
                    Some("keepalived") => {
                        let _ = events.send(PoolEvent::KeepAlive);
                        Some(json!({"id": 1, "result": {"status": "KEEPALIVED"}}))
                    }
                    Some("getjob") => {
                        let _ = events.send(PoolEvent::GetJob(request.clone()));
                        None
                    }
                    _ => None,
                };

                if let Some(reply) = reply {
                    if write_half
                        .write_all((reply.to_string() + "\n").as_bytes())
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }
            pushed = push.recv() => {
                let Some(pushed) = pushed else {
                    // Scripted connection drop
                    break;
                };

                if write_half.write_all(pushed.as_bytes()).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = events.send(PoolEvent::Disconnected);
}

/// A job object for login replies and job pushes.
pub fn job_value(job_id: &str, nonce: [u8; 4], target: &str) -> Value {
    let mut blob = vec![0u8; 80];
    blob[NONCE_OFFSET..NONCE_OFFSET + 4].copy_from_slice(&nonce);

    json!({
        "job_id": job_id,
        "blob": hex::encode(blob),
        "target": target,
    })
}

/// A pool config entry pointing at a mock pool.
pub fn test_pool(port: u16, priority: usize, algorithm: &str) -> Pool {
    Pool {
        host: "127.0.0.1".to_string(),
        port,
        username: "wallet".to_string(),
        password: String::new(),
        rig_id: "rig-1".to_string(),
        algorithm: algorithm.to_string(),
        agent: String::new(),
        login_id: String::new(),
        nice_hash: false,
        priority,
        ssl: false,
        disable_auto_algo_select: false,
    }
}
