//! Redis-based leader election.
//!
//! Implements distributed leader election using Redis with:
//! - SET NX with expiry for atomic lock acquisition
//! - Periodic heartbeat to extend lease
//! - Automatic leader change on lease expiry
//!
//! Used to run a single active instance of a poller (Outbox, Delayed,
//! Recovery) across a fleet. This is an efficiency knob, not a
//! correctness requirement: the claim-based compare-and-set on the rows
//! themselves is what prevents double processing when more than one
//! instance is briefly active.

use redis::aio::ConnectionManager;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{CoordinationError, Result};

#[derive(Debug, Clone)]
pub struct LeaderElectionConfig {
    pub redis_url: String,
    pub lock_key: String,
    pub lock_ttl_seconds: u64,
    pub heartbeat_interval_seconds: u64,
    pub instance_id: String,
}

impl Default for LeaderElectionConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            lock_key: "notify:leader".to_string(),
            lock_ttl_seconds: 30,
            heartbeat_interval_seconds: 10,
            instance_id: Uuid::new_v4().to_string(),
        }
    }
}

impl LeaderElectionConfig {
    pub fn new(redis_url: String) -> Self {
        Self { redis_url, ..Default::default() }
    }

    pub fn with_lock_key(mut self, key: String) -> Self {
        self.lock_key = key;
        self
    }

    pub fn with_instance_id(mut self, id: String) -> Self {
        self.instance_id = id;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadershipStatus {
    Leader,
    Follower,
    Unknown,
}

pub struct LeaderElection {
    config: LeaderElectionConfig,
    conn: ConnectionManager,
    is_leader: AtomicBool,
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    status_tx: watch::Sender<LeadershipStatus>,
    status_rx: watch::Receiver<LeadershipStatus>,
}

impl LeaderElection {
    pub async fn new(config: LeaderElectionConfig) -> Result<Self> {
        let client = redis::Client::open(config.redis_url.as_str())
            .map_err(|e| CoordinationError::Connection(e.to_string()))?;

        let conn = ConnectionManager::new(client).await?;
        let (shutdown_tx, _) = broadcast::channel(1);
        let (status_tx, status_rx) = watch::channel(LeadershipStatus::Unknown);

        Ok(Self {
            config,
            conn,
            is_leader: AtomicBool::new(false),
            running: AtomicBool::new(false),
            shutdown_tx,
            status_tx,
            status_rx,
        })
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> LeadershipStatus {
        *self.status_rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LeadershipStatus> {
        self.status_rx.clone()
    }

    pub async fn start(self: Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CoordinationError::AlreadyRunning);
        }

        info!(instance_id = %self.config.instance_id, lock_key = %self.config.lock_key, "starting leader election");

        let election = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(election.config.heartbeat_interval_seconds));

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        election.election_tick().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!(instance_id = %election.config.instance_id, "leader election shutting down");
                        election.release_leadership().await;
                        break;
                    }
                }
            }
        });

        Ok(())
    }

    async fn election_tick(&self) {
        let mut conn = self.conn.clone();

        if self.is_leader() {
            match self.extend_lease(&mut conn).await {
                Ok(true) => debug!(instance_id = %self.config.instance_id, "extended leadership lease"),
                Ok(false) => {
                    warn!(instance_id = %self.config.instance_id, "lost leadership");
                    self.set_status(LeadershipStatus::Follower);
                }
                Err(e) => {
                    error!(error = %e, "failed to extend lease");
                    self.set_status(LeadershipStatus::Follower);
                }
            }
        } else {
            match self.try_acquire_leadership(&mut conn).await {
                Ok(true) => {
                    info!(instance_id = %self.config.instance_id, "acquired leadership");
                    self.set_status(LeadershipStatus::Leader);
                }
                Ok(false) => {
                    debug!(instance_id = %self.config.instance_id, "leadership held by another instance");
                    self.set_status(LeadershipStatus::Follower);
                }
                Err(e) => {
                    error!(error = %e, "failed to acquire leadership");
                    self.set_status(LeadershipStatus::Unknown);
                }
            }
        }
    }

    async fn try_acquire_leadership(&self, conn: &mut ConnectionManager) -> Result<bool> {
        let result: Option<String> = redis::cmd("SET")
            .arg(&self.config.lock_key)
            .arg(&self.config.instance_id)
            .arg("NX")
            .arg("EX")
            .arg(self.config.lock_ttl_seconds)
            .query_async(conn)
            .await?;

        Ok(result.is_some())
    }

    async fn extend_lease(&self, conn: &mut ConnectionManager) -> Result<bool> {
        let script = r#"
            if redis.call("GET", KEYS[1]) == ARGV[1] then
                redis.call("EXPIRE", KEYS[1], ARGV[2])
                return 1
            else
                return 0
            end
        "#;

        let result: i32 = redis::Script::new(script)
            .key(&self.config.lock_key)
            .arg(&self.config.instance_id)
            .arg(self.config.lock_ttl_seconds)
            .invoke_async(conn)
            .await?;

        Ok(result == 1)
    }

    async fn release_leadership(&self) {
        if !self.is_leader() {
            return;
        }

        let mut conn = self.conn.clone();

        let script = r#"
            if redis.call("GET", KEYS[1]) == ARGV[1] then
                redis.call("DEL", KEYS[1])
                return 1
            else
                return 0
            end
        "#;

        match redis::Script::new(script)
            .key(&self.config.lock_key)
            .arg(&self.config.instance_id)
            .invoke_async::<i32>(&mut conn)
            .await
        {
            Ok(1) => info!(instance_id = %self.config.instance_id, "released leadership"),
            Ok(_) => debug!(instance_id = %self.config.instance_id, "leadership was already released"),
            Err(e) => error!(error = %e, "failed to release leadership"),
        }

        self.set_status(LeadershipStatus::Follower);
    }

    fn set_status(&self, status: LeadershipStatus) {
        let was_leader = self.is_leader.load(Ordering::SeqCst);
        let is_now_leader = status == LeadershipStatus::Leader;

        self.is_leader.store(is_now_leader, Ordering::SeqCst);
        let _ = self.status_tx.send(status);

        if was_leader != is_now_leader {
            if is_now_leader {
                info!(instance_id = %self.config.instance_id, "became leader");
            } else {
                info!(instance_id = %self.config.instance_id, "lost leadership");
            }
        }
    }

    pub async fn shutdown(&self) {
        info!(instance_id = %self.config.instance_id, "stopping leader election");
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
    }

    pub fn instance_id(&self) -> &str {
        &self.config.instance_id
    }
}

/// Gates operations on leadership status.
pub struct StandbyGuard {
    election: Arc<LeaderElection>,
}

impl StandbyGuard {
    pub fn new(election: Arc<LeaderElection>) -> Self {
        Self { election }
    }

    pub async fn run_if_leader<F, Fut, T>(&self, f: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        if self.election.is_leader() {
            Some(f().await)
        } else {
            None
        }
    }

    pub fn should_process(&self) -> bool {
        self.election.is_leader()
    }

    pub async fn wait_for_leadership(&self) {
        let mut rx = self.election.subscribe();
        while *rx.borrow() != LeadershipStatus::Leader {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = LeaderElectionConfig::default();
        assert_eq!(config.lock_ttl_seconds, 30);
        assert_eq!(config.heartbeat_interval_seconds, 10);
        assert_eq!(config.lock_key, "notify:leader");
    }

    #[test]
    fn config_builder() {
        let config = LeaderElectionConfig::new("redis://localhost:6380".to_string())
            .with_lock_key("custom:lock".to_string())
            .with_instance_id("test-instance".to_string());

        assert_eq!(config.redis_url, "redis://localhost:6380");
        assert_eq!(config.lock_key, "custom:lock");
        assert_eq!(config.instance_id, "test-instance");
    }
}
