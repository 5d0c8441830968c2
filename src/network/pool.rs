// src/network/pool.rs
//! Pool connection manager
//!
//! Owns the prioritised pool list and drives the connection state machine:
//! login with retries, preference climbing across pools, keepalive, message
//! routing, and share submission. Consumers register callbacks for new jobs,
//! accepted shares, pool swaps and disconnects; the mining side never touches
//! the socket directly.

use crate::config::constants;
use crate::config::Pool;
use crate::network::protocol::{self, Job, PoolMessage};
use crate::network::transport::{self, PoolStream};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::timeout;

type PoolReader = BufReader<ReadHalf<Box<dyn PoolStream>>>;
type PoolWriter = WriteHalf<Box<dyn PoolStream>>;

type JobCallback = Box<dyn Fn(Job) + Send + Sync>;
type HashAcceptedCallback = Box<dyn Fn(String) + Send + Sync>;
type PoolSwappedCallback = Box<dyn Fn(Pool) + Send + Sync>;
type PoolDisconnectedCallback = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    on_new_job: Option<JobCallback>,
    on_hash_accepted: Option<HashAcceptedCallback>,
    on_pool_swapped: Option<PoolSwappedCallback>,
    on_pool_disconnected: Option<PoolDisconnectedCallback>,
}

struct State {
    /// The pool we are currently logged in to, with its session id
    current_pool: Option<Pool>,

    /// The job every backend should be working on
    current_job: Option<Job>,

    /// Preference index of the current pool; `pools.len()` means none
    current_index: usize,
}

/// Manages communication with the configured pools
///
/// One instance owns one prioritised pool list. `start_managing` spawns the
/// manager task onto the ambient tokio runtime; everything else is callable
/// from any thread.
pub struct PoolCommunication {
    /// Self-reference handed to the spawned tasks
    weak: Weak<PoolCommunication>,

    /// All pools, sorted most preferred first
    pools: Vec<Pool>,

    state: Mutex<State>,

    callbacks: Mutex<Callbacks>,

    /// Outgoing line channel for the current connection
    writer: Mutex<Option<UnboundedSender<String>>>,

    /// Connection generation; bumped on every successful login so tasks
    /// belonging to a superseded socket can tell they are stale
    generation: AtomicU64,

    should_stop: AtomicBool,

    /// Wakes the manager to rescan pool preferences
    should_find_new_pool: AtomicBool,
    find_new_pool: Notify,

    /// Spawned manager/reader/writer tasks, aborted on logout
    tasks: Mutex<Vec<JoinHandle<()>>>,

    login_retry_interval: Duration,
    reply_timeout: Duration,
}

impl PoolCommunication {
    /// Creates a manager over the given pools, sorted by priority.
    pub fn new(pools: Vec<Pool>) -> Arc<Self> {
        Self::with_timings(
            pools,
            constants::POOL_LOGIN_RETRY_INTERVAL,
            constants::POOL_LOGIN_RETRY_INTERVAL,
        )
    }

    /// Creates a manager with explicit login-retry and reply timeouts.
    /// The defaults suit real pools; tests shorten them.
    pub fn with_timings(
        mut pools: Vec<Pool>,
        retry_interval: Duration,
        reply_timeout: Duration,
    ) -> Arc<Self> {
        pools.sort_by_key(|pool| pool.priority);

        let current_index = pools.len();

        Arc::new_cyclic(|weak| PoolCommunication {
            weak: weak.clone(),
            pools,
            state: Mutex::new(State {
                current_pool: None,
                current_job: None,
                current_index,
            }),
            callbacks: Mutex::new(Callbacks::default()),
            writer: Mutex::new(None),
            generation: AtomicU64::new(0),
            should_stop: AtomicBool::new(false),
            should_find_new_pool: AtomicBool::new(true),
            find_new_pool: Notify::new(),
            tasks: Mutex::new(Vec::new()),
            login_retry_interval: retry_interval,
            reply_timeout,
        })
    }

    /// Register a function to call when a new job arrives.
    pub fn on_new_job(&self, callback: impl Fn(Job) + Send + Sync + 'static) {
        self.callbacks.lock().unwrap().on_new_job = Some(Box::new(callback));
    }

    /// Register a function to call when a share is accepted.
    pub fn on_hash_accepted(&self, callback: impl Fn(String) + Send + Sync + 'static) {
        self.callbacks.lock().unwrap().on_hash_accepted = Some(Box::new(callback));
    }

    /// Register a function to call when we connect to a (possibly different)
    /// pool.
    pub fn on_pool_swapped(&self, callback: impl Fn(Pool) + Send + Sync + 'static) {
        self.callbacks.lock().unwrap().on_pool_swapped = Some(Box::new(callback));
    }

    /// Register a function to call when the current pool disconnects.
    pub fn on_pool_disconnected(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.callbacks.lock().unwrap().on_pool_disconnected = Some(Box::new(callback));
    }

    /// The job backends should currently be working on.
    pub fn get_job(&self) -> Option<Job> {
        self.state.lock().unwrap().current_job.clone()
    }

    /// The pool we are currently logged in to.
    pub fn current_pool(&self) -> Option<Pool> {
        self.state.lock().unwrap().current_pool.clone()
    }

    /// Whether the current pool wants nicehash style nonces.
    pub fn is_nice_hash(&self) -> bool {
        self.state
            .lock()
            .unwrap()
            .current_pool
            .as_ref()
            .map(|pool| pool.nice_hash)
            .unwrap_or(false)
    }

    /// Starts managing the pool connection: logging in, handling messages and
    /// reconnecting. Must be called from within a tokio runtime context.
    ///
    /// Safe to call again after [`logout`](Self::logout); any previous
    /// manager is torn down first.
    pub fn start_managing(&self) {
        self.shutdown_tasks();

        self.should_stop.store(false, Ordering::Release);
        self.should_find_new_pool.store(true, Ordering::Release);

        let Some(this) = self.weak.upgrade() else {
            return;
        };

        let manager = tokio::spawn(async move { this.manage_pools().await });

        self.tasks.lock().unwrap().push(manager);
    }

    /// Closes the current connection and stops the manager.
    pub fn logout(&self) {
        self.shutdown_tasks();
    }

    /// Submits a valid share to the current pool.
    ///
    /// The nonce travels as lowercase hex of its little-endian bytes, the
    /// digest as lowercase hex of all 32 bytes.
    pub fn submit_share(&self, hash: &[u8; 32], job_id: &str, nonce: u32) {
        let Some(pool) = self.current_pool() else {
            log::warn!("Dropping share submission: not connected to a pool");
            return;
        };

        let submit = json!({
            "method": "submit",
            "params": {
                "id": pool.login_id,
                "job_id": job_id,
                "nonce": hex::encode(nonce.to_le_bytes()),
                "result": hex::encode(hash),
                "rigid": pool.rig_id,
                "agent": pool.agent(),
            },
            "id": 1,
        });

        self.send_line(submit.to_string());
    }

    /// Requests a fresh job from the pool.
    pub fn get_new_job(&self) {
        let Some(pool) = self.current_pool() else {
            return;
        };

        let request = json!({
            "method": "getjob",
            "params": {
                "id": pool.login_id,
                "rigid": pool.rig_id,
                "agent": pool.agent(),
            },
            "id": 1,
        });

        self.send_line(request.to_string());
    }

    fn keep_alive(&self) {
        let Some(pool) = self.current_pool() else {
            return;
        };

        let ping = json!({
            "method": "keepalived",
            "params": {
                "id": pool.login_id,
                "rigid": pool.rig_id,
                "agent": pool.agent(),
            },
            "id": 1,
        });

        self.send_line(ping.to_string());
    }

    fn send_line(&self, line: String) {
        let writer = self.writer.lock().unwrap();

        if let Some(sender) = writer.as_ref() {
            if sender.send(line + "\n").is_err() {
                log::debug!("Pool writer task is gone; message dropped");
            }
        } else {
            log::debug!("No pool connection; message dropped");
        }
    }

    fn should_stop(&self) -> bool {
        self.should_stop.load(Ordering::Acquire)
    }

    fn shutdown_tasks(&self) {
        self.should_stop.store(true, Ordering::Release);
        self.find_new_pool.notify_waiters();

        // Dropping the sender closes the socket's write half
        *self.writer.lock().unwrap() = None;

        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }

    /// The manager loop: find a pool, then periodically retry more preferred
    /// ones, waking early on disconnects.
    async fn manage_pools(self: Arc<Self>) {
        if self.pools.is_empty() {
            log::warn!("No pools configured, nothing to manage");
            return;
        }

        let mut last_kept_alive = tokio::time::Instant::now();

        while !self.should_stop() {
            if self.should_find_new_pool.load(Ordering::Acquire) {
                self.state.lock().unwrap().current_index = self.pools.len();
            }

            /* Most preferred pool = index 0. If we're not connected to it, we
             * step down the list in order of preference, trying each. */
            let current_index = self.state.lock().unwrap().current_index;

            for preference in 0..current_index {
                if self.should_stop() {
                    return;
                }

                let pool = self.pools[preference].clone();

                if self.try_login(&pool).await {
                    self.state.lock().unwrap().current_index = preference;
                    self.should_find_new_pool.store(false, Ordering::Release);
                    break;
                }
            }

            // Still not found a pool. Go again.
            if self.should_find_new_pool.load(Ordering::Acquire) {
                continue;
            }

            if last_kept_alive.elapsed() >= constants::KEEPALIVE_INTERVAL {
                self.keep_alive();
                last_kept_alive = tokio::time::Instant::now();
            }

            /* Connected. Wait out the scan interval, or wake immediately when
             * the connection drops. */
            tokio::select! {
                _ = self.find_new_pool.notified() => {}
                _ = tokio::time::sleep(constants::POOL_SCAN_INTERVAL) => {}
            }
        }
    }

    /// Attempts to connect and log in to one pool, with retries.
    ///
    /// On success the connection's reader and writer tasks are running, the
    /// current pool and job are set, and `on_pool_swapped` has fired.
    async fn try_login(&self, pool: &Pool) -> bool {
        log::info!("{} Attempting to connect to pool...", pool.address());

        for attempt in 1..=constants::MAX_LOGIN_ATTEMPTS {
            if self.should_stop() {
                return false;
            }

            let stream = match timeout(
                self.reply_timeout,
                transport::connect(&pool.host, pool.port, pool.ssl),
            )
            .await
            {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    self.login_failed(pool, attempt, true, Some(e.to_string())).await;
                    continue;
                }
                Err(_) => {
                    self.login_failed(pool, attempt, true, Some("connection timed out".to_string()))
                        .await;
                    continue;
                }
            };

            let (read_half, mut write_half) = tokio::io::split(stream);
            let mut reader = BufReader::new(read_half);

            let login = json!({
                "method": "login",
                "params": {
                    "login": pool.username,
                    "pass": pool.password,
                    "rigid": pool.rig_id,
                    "agent": pool.agent(),
                },
                "id": 1,
                "jsonrpc": "2.0",
            });

            if let Err(e) = write_half
                .write_all((login.to_string() + "\n").as_bytes())
                .await
            {
                self.login_failed(pool, attempt, false, Some(e.to_string())).await;
                continue;
            }

            let mut line = String::new();

            match timeout(self.reply_timeout, reader.read_line(&mut line)).await {
                Ok(Ok(0)) => {
                    self.login_failed(pool, attempt, false, Some("connection closed by pool".to_string()))
                        .await;
                    continue;
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    self.login_failed(pool, attempt, false, Some(e.to_string())).await;
                    continue;
                }
                Err(_) => {
                    self.login_failed(pool, attempt, false, Some("no reply from pool".to_string()))
                        .await;
                    continue;
                }
            }

            let reply = match protocol::parse_login_reply(line.trim()) {
                Ok(reply) => reply,
                Err(e) => {
                    self.login_failed(pool, attempt, false, Some(e.to_string())).await;
                    continue;
                }
            };

            log::info!("{} Logged in.", pool.address());

            let mut current = pool.clone();
            current.login_id = reply.login_id;

            let mut job = reply.job;

            /* Nicehash auto-detection: a pool that seeds the job nonce is
             * reserving its high byte for buyer-side coordination. */
            if job.nonce() != 0 {
                current.nice_hash = true;
            }

            job.update_from_pool(&current);

            let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;

            let (sender, receiver) = mpsc::unbounded_channel::<String>();

            // Installing the new sender drops the previous connection's,
            // which ends its writer task and closes the superseded socket.
            *self.writer.lock().unwrap() = Some(sender);

            {
                let mut state = self.state.lock().unwrap();
                state.current_pool = Some(current.clone());
                state.current_job = Some(job);
            }

            let Some(this) = self.weak.upgrade() else {
                return false;
            };

            let reader_task = tokio::spawn(this.read_loop(generation, reader));
            let writer_task = tokio::spawn(write_loop(write_half, receiver));

            {
                let mut tasks = self.tasks.lock().unwrap();
                tasks.retain(|task| !task.is_finished());
                tasks.push(reader_task);
                tasks.push(writer_task);
            }

            if let Some(callback) = &self.callbacks.lock().unwrap().on_pool_swapped {
                callback(current);
            }

            return true;
        }

        log::warn!("{} All login/connect attempts failed.", pool.address());

        false
    }

    async fn login_failed(
        &self,
        pool: &Pool,
        attempt: u32,
        connect_failure: bool,
        message: Option<String>,
    ) {
        log::warn!(
            "{} Failed to {} to pool, attempt {}/{}",
            pool.address(),
            if connect_failure { "connect" } else { "login" },
            attempt,
            constants::MAX_LOGIN_ATTEMPTS
        );

        if let Some(message) = message {
            log::warn!("{} Error: {}", pool.address(), message);
        }

        if attempt != constants::MAX_LOGIN_ATTEMPTS {
            log::info!(
                "{} Will try again in {} seconds.",
                pool.address(),
                self.login_retry_interval.as_secs()
            );
        }

        tokio::time::sleep(self.login_retry_interval).await;
    }

    /// Reads lines from one connection until it closes or is superseded.
    async fn read_loop(self: Arc<Self>, generation: u64, mut reader: PoolReader) {
        let mut line = String::new();

        loop {
            line.clear();

            match reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let message = line.trim().trim_matches('\0');

                    if !message.is_empty() {
                        self.handle_message(message);
                    }
                }
                Err(e) => {
                    log::warn!("Failed to read from pool socket: {}", e);
                    break;
                }
            }

            if self.should_stop() || self.generation.load(Ordering::Acquire) != generation {
                return;
            }
        }

        // A superseded connection closing is not a disconnect
        if self.should_stop() || self.generation.load(Ordering::Acquire) != generation {
            return;
        }

        log::warn!("Lost connection with pool.");

        if let Some(callback) = &self.callbacks.lock().unwrap().on_pool_disconnected {
            callback();
        }

        self.should_find_new_pool.store(true, Ordering::Release);
        self.find_new_pool.notify_waiters();
    }

    /// Routes one incoming line to the right handler.
    fn handle_message(&self, message: &str) {
        let parsed = match protocol::parse_pool_message(message) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("Unexpected message from pool: {} ({})", message, e);
                return;
            }
        };

        match parsed {
            PoolMessage::Job(mut job) => {
                {
                    let mut state = self.state.lock().unwrap();

                    if let Some(pool) = &state.current_pool {
                        job.update_from_pool(pool);
                    }

                    state.current_job = Some(job.clone());
                }

                if let Some(callback) = &self.callbacks.lock().unwrap().on_new_job {
                    callback(job);
                }
            }
            PoolMessage::Status { id, status } => {
                if status == "OK" {
                    if let Some(callback) = &self.callbacks.lock().unwrap().on_hash_accepted {
                        callback(id);
                    }
                } else if status == "KEEPALIVED" {
                    // kept alive
                } else {
                    log::warn!("Unknown status message: {}", status);
                }
            }
            PoolMessage::Login(_) => {
                log::warn!("Unexpected login reply outside of a handshake");
            }
            PoolMessage::Error { message, .. } => {
                log::warn!("Error message received from pool: {}", message);

                if message == "Low difficulty share" {
                    log::warn!(
                        "Probably a stale job, unless you are only getting rejected shares. \
                         If so, ensure you are using the correct mining algorithm for this pool."
                    );
                } else if message == "Invalid nonce; is miner not compatible with NiceHash?" {
                    log::warn!("Make sure \"niceHash\" is set to true in your config file.");
                } else if message == "Invalid job id" {
                    self.get_new_job();
                }
            }
        }
    }
}

impl Drop for PoolCommunication {
    fn drop(&mut self) {
        self.shutdown_tasks();
    }
}

/// Drains outgoing lines into the socket until the sender side is dropped.
async fn write_loop(mut writer: PoolWriter, mut receiver: UnboundedReceiver<String>) {
    while let Some(line) = receiver.recv().await {
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            log::warn!("Failed to write to pool socket: {}", e);
            break;
        }
    }

    // Dropping the write half closes the connection
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(host: &str, priority: usize) -> Pool {
        Pool {
            host: host.to_string(),
            port: 3333,
            username: "wallet".to_string(),
            password: String::new(),
            rig_id: String::new(),
            algorithm: "turtlecoin".to_string(),
            agent: String::new(),
            login_id: String::new(),
            nice_hash: false,
            priority,
            ssl: false,
            disable_auto_algo_select: false,
        }
    }

    #[test]
    fn test_pools_sorted_by_priority() {
        let comms = PoolCommunication::new(vec![
            pool("third.example.com", 7),
            pool("first.example.com", 0),
            pool("second.example.com", 2),
        ]);

        let hosts: Vec<&str> = comms.pools.iter().map(|p| p.host.as_str()).collect();
        assert_eq!(
            hosts,
            ["first.example.com", "second.example.com", "third.example.com"]
        );

        // Not connected yet: index past the end, nothing current
        assert_eq!(comms.state.lock().unwrap().current_index, 3);
        assert!(comms.get_job().is_none());
        assert!(comms.current_pool().is_none());
        assert!(!comms.is_nice_hash());
    }

    #[test]
    fn test_submit_without_connection_is_dropped() {
        let comms = PoolCommunication::new(vec![pool("pool.example.com", 0)]);

        // No connection; must not panic or queue anything
        comms.submit_share(&[0u8; 32], "J1", 1234);
        comms.get_new_job();
        assert!(comms.writer.lock().unwrap().is_none());
    }
}
