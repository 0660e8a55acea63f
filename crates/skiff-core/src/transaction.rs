//! The whole-run transactional boundary.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{debug, warn};

use crate::error::{ImportError, ImportResult};
use crate::traits::Storage;

/// How a run's transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransactionStatus {
    /// Every write since `begin` was committed.
    Committed,
    /// The run succeeded but the import definition asked for a rollback.
    RolledBackByRequest,
    /// The run failed and every write since `begin` was undone.
    RolledBackByError,
    /// The run was not wrapped; each chunk stands on its own.
    NotWrapped,
}

/// The three ways a wrapped body can end.
#[derive(Debug)]
pub enum TransactionOutcome<T> {
    Committed(T),
    RolledBack(T),
    Failed(ImportError),
}

impl<T> TransactionOutcome<T> {
    pub fn status(&self) -> TransactionStatus {
        match self {
            Self::Committed(_) => TransactionStatus::Committed,
            Self::RolledBack(_) => TransactionStatus::RolledBackByRequest,
            Self::Failed(_) => TransactionStatus::RolledBackByError,
        }
    }

    /// The body's value with its status, or the error that aborted it.
    pub fn into_result(self) -> ImportResult<(T, TransactionStatus)> {
        let status = self.status();
        match self {
            Self::Committed(value) | Self::RolledBack(value) => Ok((value, status)),
            Self::Failed(err) => Err(err),
        }
    }
}

/// Runs a body inside a storage transaction, or without one.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionalRunner;

impl TransactionalRunner {
    /// Run `body` against `storage`.
    ///
    /// When `enabled`, the body is bracketed by `begin` and `commit`. The
    /// transaction is rolled back when the body fails or when
    /// `rollback_requested` returns true for the body's value. Body errors are
    /// returned unchanged after the rollback.
    pub fn run<S, T, B, P>(
        enabled: bool,
        storage: &mut S,
        body: B,
        rollback_requested: P,
    ) -> ImportResult<(T, TransactionStatus)>
    where
        S: Storage + ?Sized,
        B: FnOnce(&mut S) -> ImportResult<T>,
        P: FnOnce(&T) -> bool,
    {
        if !enabled {
            return body(storage).map(|value| (value, TransactionStatus::NotWrapped));
        }

        storage.begin()?;
        debug!("Transaction opened");

        let outcome = match body(&mut *storage) {
            Ok(value) => {
                if rollback_requested(&value) {
                    warn!("Rollback requested by import definition");
                    storage.rollback()?;
                    TransactionOutcome::RolledBack(value)
                } else {
                    match storage.commit() {
                        Ok(()) => {
                            debug!("Transaction committed");
                            TransactionOutcome::Committed(value)
                        }
                        Err(err) => {
                            warn!(error = %err, "Commit failed, rolling back");
                            abandon(storage);
                            TransactionOutcome::Failed(err)
                        }
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "Import failed, rolling back");
                abandon(storage);
                TransactionOutcome::Failed(err)
            }
        };

        outcome.into_result()
    }
}

/// Roll back after a failure. A failed rollback is logged; the original error
/// is what the caller sees.
fn abandon<S: Storage + ?Sized>(storage: &mut S) {
    if let Err(rollback_err) = storage.rollback() {
        warn!(error = %rollback_err, "Rollback failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WriteOptions;
    use crate::types::{ChunkOutcome, Record, Row};
    use std::str::FromStr;

    #[derive(Default)]
    struct Journal {
        calls: Vec<&'static str>,
        fail_commit: bool,
    }

    impl Storage for Journal {
        type Entity = Record;

        fn bulk_insert(
            &mut self,
            _target: &str,
            _rows: Vec<Row<Record>>,
            _options: &WriteOptions,
        ) -> ImportResult<ChunkOutcome<Record>> {
            self.calls.push("insert");
            Ok(ChunkOutcome::empty())
        }

        fn bulk_insert_strict(
            &mut self,
            target: &str,
            rows: Vec<Row<Record>>,
            options: &WriteOptions,
        ) -> ImportResult<ChunkOutcome<Record>> {
            self.bulk_insert(target, rows, options)
        }

        fn begin(&mut self) -> ImportResult<()> {
            self.calls.push("begin");
            Ok(())
        }

        fn commit(&mut self) -> ImportResult<()> {
            self.calls.push("commit");
            if self.fail_commit {
                return Err(ImportError::backend("commit failed"));
            }
            Ok(())
        }

        fn rollback(&mut self) -> ImportResult<()> {
            self.calls.push("rollback");
            Ok(())
        }
    }

    fn insert(storage: &mut Journal) -> ImportResult<u32> {
        storage.bulk_insert("t", Vec::new(), &WriteOptions::default())?;
        Ok(7)
    }

    #[test]
    fn test_commit_on_success() {
        let mut storage = Journal::default();
        let (value, status) =
            TransactionalRunner::run(true, &mut storage, insert, |_| false).unwrap();
        assert_eq!(value, 7);
        assert_eq!(status, TransactionStatus::Committed);
        assert_eq!(storage.calls, vec!["begin", "insert", "commit"]);
    }

    #[test]
    fn test_rollback_on_error() {
        let mut storage = Journal::default();
        let err = TransactionalRunner::run(
            true,
            &mut storage,
            |s: &mut Journal| -> ImportResult<()> {
                insert(s)?;
                Err(ImportError::backend("boom"))
            },
            |_| false,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Backend error: boom");
        assert_eq!(storage.calls, vec!["begin", "insert", "rollback"]);
    }

    #[test]
    fn test_rollback_on_request() {
        let mut storage = Journal::default();
        let (_, status) =
            TransactionalRunner::run(true, &mut storage, insert, |v| *v == 7).unwrap();
        assert_eq!(status, TransactionStatus::RolledBackByRequest);
        assert_eq!(storage.calls, vec!["begin", "insert", "rollback"]);
    }

    #[test]
    fn test_disabled_runs_without_boundary() {
        let mut storage = Journal::default();
        let (_, status) =
            TransactionalRunner::run(false, &mut storage, insert, |_| true).unwrap();
        assert_eq!(status, TransactionStatus::NotWrapped);
        assert_eq!(storage.calls, vec!["insert"]);
    }

    #[test]
    fn test_commit_failure_rolls_back() {
        let mut storage = Journal {
            fail_commit: true,
            ..Default::default()
        };
        let err = TransactionalRunner::run(true, &mut storage, insert, |_| false).unwrap_err();
        assert_eq!(err.to_string(), "Backend error: commit failed");
        assert_eq!(storage.calls, vec!["begin", "insert", "commit", "rollback"]);
    }

    #[test]
    fn test_status_string_forms() {
        assert_eq!(
            TransactionStatus::RolledBackByRequest.to_string(),
            "rolled_back_by_request"
        );
        assert_eq!(
            TransactionStatus::from_str("not_wrapped").unwrap(),
            TransactionStatus::NotWrapped
        );
    }
}
