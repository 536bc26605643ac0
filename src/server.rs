use crate::client::Client;
use crate::collaborators::{Argv, Clock, FollowerFeed, KeyspaceEvents, SystemClock, WalSink};
use crate::config::ConfigRef;
use crate::connection::Connection;
use crate::database::{Ctx, Database};
use crate::session::SessionRegistry;
use crate::shared;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::sleep;

/// Everything §3 calls "server-wide": the bucket migration flag and dirty
/// counter, plus the collaborator handles the core consumes (§6) and the
/// per-database storage they apply to.
pub struct ServerState {
    pub config: ConfigRef,
    pub databases: Vec<Database>,
    pub sessions: SessionRegistry,
    pub server_in_transfer: AtomicBool,
    pub dirty_counter: AtomicU64,
    pub run_id: String,

    pub clock: Arc<dyn Clock>,
    pub wal: Arc<dyn WalSink>,
    pub followers: Arc<dyn FollowerFeed>,
    pub events: Arc<dyn KeyspaceEvents>,

    pub is_follower: AtomicBool,
    pub loading: AtomicBool,
    pub snapshot_child_active: AtomicBool,
    pub wal_rewrite_child_active: AtomicBool,

    quit_ch: broadcast::Sender<()>,
}

impl ServerState {
    pub fn new(config: ConfigRef) -> Arc<Self> {
        Self::with_collaborators(
            config,
            Arc::new(SystemClock),
            Arc::new(crate::collaborators::NullWal),
            Arc::new(crate::collaborators::NullFollowerFeed),
            Arc::new(crate::collaborators::LoggingEvents),
        )
    }

    pub fn with_collaborators(
        config: ConfigRef,
        clock: Arc<dyn Clock>,
        wal: Arc<dyn WalSink>,
        followers: Arc<dyn FollowerFeed>,
        events: Arc<dyn KeyspaceEvents>,
    ) -> Arc<Self> {
        let databases = (0..config.dbnum).map(Database::new).collect();
        Arc::new(ServerState {
            config,
            databases,
            sessions: SessionRegistry::new(),
            server_in_transfer: AtomicBool::new(false),
            dirty_counter: AtomicU64::new(0),
            run_id: shared::gen_runid(),
            clock,
            wal,
            followers,
            events,
            is_follower: AtomicBool::new(false),
            loading: AtomicBool::new(false),
            snapshot_child_active: AtomicBool::new(false),
            wal_rewrite_child_active: AtomicBool::new(false),
            quit_ch: broadcast::channel(1).0,
        })
    }

    pub fn database(&self, index: u32) -> Option<&Database> {
        self.databases.get(index as usize)
    }

    pub fn dbnum(&self) -> u32 {
        self.databases.len() as u32
    }

    /// Builds the per-call context a core mutation needs. Cheap: borrowed
    /// trait objects and copied atomics.
    pub fn ctx(&self, db_id: u32) -> Ctx<'_> {
        Ctx {
            db_id,
            clock: self.clock.as_ref(),
            wal: self.wal.as_ref(),
            followers: self.followers.as_ref(),
            events: self.events.as_ref(),
            is_follower: self.is_follower.load(Ordering::Relaxed),
            loading: self.loading.load(Ordering::Relaxed),
            frozen_now: None,
            lru_gate_suppressed: self.snapshot_child_active.load(Ordering::Relaxed)
                || self.wal_rewrite_child_active.load(Ordering::Relaxed),
        }
    }

    /// Feeds a successful mutation to the write-ahead log and follower feed,
    /// in that order, and bumps the dirty counter. Called by command
    /// dispatch adapters (component H) after a mutation succeeds — never
    /// before, and never on an error path.
    pub fn propagate(&self, db_id: u32, args: Vec<bytes::Bytes>) {
        self.wal.append(Argv::new(db_id, args.clone()));
        self.followers.feed(Argv::new(db_id, args));
        self.dirty_counter.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn start(self: &Arc<Self>) -> std::io::Result<()> {
        {
            let state = self.clone();
            let mut quit_ch = self.quit_ch.subscribe();
            tokio::spawn(async move {
                let mut cronloops: u64 = 0;
                let period_ms = 1000 / state.config.hz.max(1) as u64;
                loop {
                    tokio::select! {
                        _ = quit_ch.recv() => break,
                        _ = sleep(Duration::from_millis(period_ms)) => {
                            state.cron(cronloops);
                            cronloops = cronloops.wrapping_add(1);
                        }
                    }
                }
            });
        }

        let host = self
            .config
            .host
            .parse::<Ipv4Addr>()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid host"))?;
        let listener = TcpListener::bind(SocketAddr::new(std::net::IpAddr::V4(host), self.config.port)).await?;
        log::info!("listening on {}:{}", host, self.config.port);

        let mut quit_ch = self.quit_ch.subscribe();
        loop {
            tokio::select! {
                _ = quit_ch.recv() => break,
                conn = listener.accept() => match conn {
                    Ok((stream, address)) => {
                        log::info!("accepted connection from {}", address);
                        let session_id = self.sessions.next_session_id();
                        let mut client = Client::new(self.clone(), Connection::from(stream), session_id);
                        tokio::spawn(async move {
                            client.serve().await;
                        });
                    }
                    Err(err) => {
                        log::warn!("accept error: {:?}", err);
                    }
                }
            }
        }
        Ok(())
    }

    fn cron(&self, cronloops: u64) {
        if cronloops % 10 == 0 {
            for (index, db) in self.databases.iter().enumerate() {
                let inner = db.lock();
                let used = inner.primary.len();
                if used > 0 {
                    log::debug!(
                        "DB {}: {} keys, dirty={}",
                        index,
                        used,
                        self.dirty_counter.load(Ordering::Relaxed)
                    );
                }
            }
        }
    }
}
