//! Classification of `sea_orm::DbErr` into a small closed set of kinds.
//!
//! Retry and rollback decisions match on [`DbErrKind`] instead of parsing
//! free-text driver messages. Text is consulted only for connection-level
//! errors whose driver carries nothing but a message.

use std::io::ErrorKind;

use sea_orm::{ConnAcquireErr, DbErr, RuntimeErr};

/// What a database error says about the connection it happened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbErrKind {
    /// The connection dropped mid-query; a fresh attempt may succeed.
    TransientDisconnect,
    /// The connection is unusable and the transaction must be abandoned.
    ConnectionFatal,
    /// The statement itself failed; the connection is fine.
    Statement,
}

/// Phrases drivers use for a connection that vanished underneath a query.
pub const TRANSIENT_DISCONNECT_MESSAGES: [&str; 2] = [
    "server closed the connection unexpectedly",
    "ssl connection has been closed unexpectedly",
];

/// Phrases that leave the session in a state only a rollback can clear.
pub const KNOWN_FATAL_MESSAGES: [&str; 8] = [
    "server closed the connection unexpectedly",
    "ssl connection has been closed unexpectedly",
    "terminating connection due to administrator command",
    "could not receive data from server",
    "connection already closed",
    "ssl syscall error",
    "connection reset by peer",
    "broken pipe",
];

/// Postgres SQLSTATE classes for connection exceptions and operator intervention.
const CONNECTION_SQLSTATE_PREFIXES: [&str; 2] = ["08", "57P"];

pub fn is_transient_disconnect_message(message: &str) -> bool {
    let msg = message.to_lowercase();
    TRANSIENT_DISCONNECT_MESSAGES.iter().any(|m| msg.contains(m))
        || (msg.contains("connection") && msg.contains("closed") && msg.contains("unexpectedly"))
}

pub fn mentions_known_fatal(message: &str) -> bool {
    let msg = message.to_lowercase();
    KNOWN_FATAL_MESSAGES.iter().any(|m| msg.contains(m))
}

fn connection_level(message: &str) -> DbErrKind {
    if is_transient_disconnect_message(message) {
        DbErrKind::TransientDisconnect
    } else {
        DbErrKind::ConnectionFatal
    }
}

fn classify_sqlx(err: &sqlx::Error) -> DbErrKind {
    match err {
        sqlx::Error::Io(io) => match io.kind() {
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => DbErrKind::TransientDisconnect,
            _ => connection_level(&io.to_string()),
        },
        sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => connection_level(&err.to_string()),
        sqlx::Error::Protocol(msg) => connection_level(msg),
        sqlx::Error::Database(db) => {
            let is_connection = db.code().is_some_and(|code| {
                CONNECTION_SQLSTATE_PREFIXES
                    .iter()
                    .any(|prefix| code.starts_with(prefix))
            });
            if is_connection {
                connection_level(db.message())
            } else {
                DbErrKind::Statement
            }
        }
        _ => DbErrKind::Statement,
    }
}

fn classify_runtime(err: &RuntimeErr, is_conn_variant: bool) -> DbErrKind {
    match err {
        RuntimeErr::SqlxError(sqlx_err) => {
            let sqlx_err: &sqlx::Error = sqlx_err;
            classify_sqlx(sqlx_err)
        }
        RuntimeErr::Internal(msg) if is_conn_variant => connection_level(msg),
        RuntimeErr::Internal(_) => DbErrKind::Statement,
    }
}

pub fn classify(err: &DbErr) -> DbErrKind {
    match err {
        DbErr::ConnectionAcquire(ConnAcquireErr::ConnectionClosed) => {
            DbErrKind::TransientDisconnect
        }
        DbErr::ConnectionAcquire(_) => DbErrKind::ConnectionFatal,
        DbErr::Conn(rt) => classify_runtime(rt, true),
        DbErr::Exec(rt) | DbErr::Query(rt) => classify_runtime(rt, false),
        _ => DbErrKind::Statement,
    }
}

/// Whether the session must be rolled back before it is released.
pub fn requires_rollback(err: &DbErr) -> bool {
    classify(err) != DbErrKind::Statement || mentions_known_fatal(&err.to_string())
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    fn sqlx_query_err(err: sqlx::Error) -> DbErr {
        DbErr::Query(RuntimeErr::SqlxError(err.into()))
    }

    #[test]
    fn dropped_socket_is_transient() {
        let err = sqlx_query_err(sqlx::Error::Io(io::Error::from(ErrorKind::ConnectionReset)));
        assert_eq!(classify(&err), DbErrKind::TransientDisconnect);

        let err = sqlx_query_err(sqlx::Error::Io(io::Error::from(ErrorKind::UnexpectedEof)));
        assert_eq!(classify(&err), DbErrKind::TransientDisconnect);
    }

    #[test]
    fn connection_messages_drive_internal_errors() {
        let err = DbErr::Conn(RuntimeErr::Internal(
            "SSL connection has been closed unexpectedly".into(),
        ));
        assert_eq!(classify(&err), DbErrKind::TransientDisconnect);

        let err = DbErr::Conn(RuntimeErr::Internal(
            "the Connection was Closed quite Unexpectedly".into(),
        ));
        assert_eq!(classify(&err), DbErrKind::TransientDisconnect);

        let err = DbErr::Conn(RuntimeErr::Internal("password authentication failed".into()));
        assert_eq!(classify(&err), DbErrKind::ConnectionFatal);
    }

    #[test]
    fn statement_errors_are_never_transient() {
        // Same text, but on a statement variant: the connection is not implicated.
        let err = DbErr::Exec(RuntimeErr::Internal(
            "server closed the connection unexpectedly".into(),
        ));
        assert_eq!(classify(&err), DbErrKind::Statement);
        assert!(requires_rollback(&err));

        let err = DbErr::Custom("duplicate key value".into());
        assert_eq!(classify(&err), DbErrKind::Statement);
        assert!(!requires_rollback(&err));

        assert_eq!(
            classify(&DbErr::RecordNotFound("x".into())),
            DbErrKind::Statement
        );
    }

    #[test]
    fn pool_failures_are_fatal_connection_errors() {
        assert_eq!(
            classify(&DbErr::ConnectionAcquire(ConnAcquireErr::Timeout)),
            DbErrKind::ConnectionFatal
        );
        assert_eq!(
            classify(&DbErr::ConnectionAcquire(ConnAcquireErr::ConnectionClosed)),
            DbErrKind::TransientDisconnect
        );
        assert_eq!(
            classify(&sqlx_query_err(sqlx::Error::PoolClosed)),
            DbErrKind::ConnectionFatal
        );
        assert!(requires_rollback(&sqlx_query_err(sqlx::Error::PoolTimedOut)));
    }
}
