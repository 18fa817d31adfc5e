//! Helpers for write transactions

use sqlx::{Sqlite, Transaction};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Commit `tx` when `result` is `Ok`, otherwise roll it back and return the
/// original error.
///
/// A transaction dropped without reaching this point is rolled back by sqlx.
pub(crate) async fn finish<T>(tx: Transaction<'_, Sqlite>, result: Result<T>) -> Result<T> {
   match result {
      Ok(value) => {
         tx.commit().await.map_err(Error::mutation)?;
         Ok(value)
      }
      Err(e) => match tx.rollback().await {
         // Rollback succeeded, return original error
         Ok(()) => {
            debug!(error = %e, "Transaction rolled back");
            Err(e)
         }

         // Rollback also failed, return the rollback error and the original error
         Err(rollback_err) => {
            warn!(error = %e, rollback_error = %rollback_err, "Rollback failed");
            Err(Error::TransactionRollbackFailed {
               transaction_error: e.to_string(),
               rollback_error: rollback_err.to_string(),
            })
         }
      },
   }
}

/// Fail with [`Error::Cancelled`] once `token` has been cancelled.
pub(crate) fn ensure_not_cancelled(token: Option<&CancellationToken>) -> Result<()> {
   match token {
      Some(token) if token.is_cancelled() => Err(Error::Cancelled),
      _ => Ok(()),
   }
}
