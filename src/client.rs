use crate::command::Command;
use crate::connection::Connection;
use crate::database::{Ctx, Database};
use crate::server::ServerState;
use crate::session::Session;
use crate::shared;
use bytes::Bytes;
use std::sync::Arc;

/// Per-connection state: the session (id/role/selected db) plus the wire
/// connection. Mirrors the reference `Client` (config/dbms/connection), but
/// holds a session instead of an inline role/name bundle since role is the
/// field the migration command gates actually key off.
pub struct Client {
    pub state: Arc<ServerState>,
    pub connection: Connection,
    pub session: Session,
}

impl Client {
    pub fn new(state: Arc<ServerState>, connection: Connection, session_id: u64) -> Self {
        Client {
            state,
            connection,
            session: Session::new(session_id),
        }
    }

    pub fn db(&self) -> &Database {
        self.state
            .database(self.session.db_index)
            .expect("session db_index is always kept in range by SELECT")
    }

    pub fn ctx(&self) -> Ctx<'_> {
        self.state.ctx(self.session.db_index)
    }

    /// Feeds a mutation to the write-ahead log and follower feed after it
    /// has already succeeded against the keyspace core.
    pub fn propagate(&self, args: Vec<Bytes>) {
        self.state.propagate(self.session.db_index, args);
    }

    pub async fn serve(&mut self) {
        loop {
            let frame = match self.connection.read_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    log::warn!("connection read error: {:?}", e);
                    break;
                }
            };

            let reply = match Command::from_frame(frame) {
                Ok(cmd) => cmd.apply(self),
                Err(e) => shared::error_frame(&e),
            };

            if let Err(e) = self.connection.write_frame(&reply).await {
                log::warn!("connection write error: {:?}", e);
                break;
            }
        }

        // The core never rolls back migration state on session loss (§5);
        // this only drops the session's role from the liveness registry so
        // a reconnecting coordinator can resume via transbegin's
        // single-bucket resumption path.
        self.state.sessions.forget(self.session.id);
    }
}
