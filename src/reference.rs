use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, FixedOffset, Utc};
use tracing::{error, warn};

use crate::engine::EngineError;
use crate::limits::COUNTER_TX_ATTEMPTS;
use crate::model::YearCounter;
use crate::store::{DocumentStore, StoreError};

/// `PREFIX_<year>_<counter>`, counter zero-padded to four digits.
pub fn format_reference_id(prefix: &str, year: i32, counter: u32) -> String {
    format!("{prefix}_{year:04}_{counter:04}")
}

/// Split a reference id back into prefix, year and counter.
pub fn parse_reference_id(id: &str) -> Option<(&str, i32, u32)> {
    let mut parts = id.rsplitn(3, '_');
    let counter = parts.next()?.parse().ok()?;
    let year = parts.next()?.parse().ok()?;
    let prefix = parts.next().filter(|p| !p.is_empty())?;
    Some((prefix, year, counter))
}

/// Issues year-scoped booking ids from the business's counter document.
///
/// Only `issue` is safe under concurrency. `peek` is a plain read and
/// `reset` a blind overwrite that can race a concurrent `issue`.
pub struct ReferenceIdIssuer {
    store: Arc<dyn DocumentStore>,
    prefix: String,
    utc_offset: FixedOffset,
}

impl ReferenceIdIssuer {
    pub fn new(store: Arc<dyn DocumentStore>, prefix: String, utc_offset: FixedOffset) -> Self {
        Self {
            store,
            prefix,
            utc_offset,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Calendar year on the business-local clock.
    pub fn current_year(&self) -> i32 {
        Utc::now().with_timezone(&self.utc_offset).year()
    }

    pub async fn issue(&self) -> Result<String, EngineError> {
        self.issue_in_year(self.current_year()).await
    }

    pub async fn issue_in_year(&self, year: i32) -> Result<String, EngineError> {
        // A missing document or one from another year both count from zero.
        let next = move |current: Option<&YearCounter>| {
            let base = match current {
                Some(c) if c.year == year => c.counter,
                _ => 0,
            };
            YearCounter {
                year,
                counter: base + 1,
                last_updated: Utc::now(),
            }
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.store.transact_counter(&next).await {
                Ok(counter) => {
                    metrics::counter!(crate::observability::REFERENCE_IDS_ISSUED_TOTAL).increment(1);
                    return Ok(format_reference_id(&self.prefix, counter.year, counter.counter));
                }
                Err(StoreError::Aborted(reason)) if attempt < COUNTER_TX_ATTEMPTS => {
                    warn!("counter transaction aborted (attempt {attempt}): {reason}");
                    metrics::counter!(crate::observability::COUNTER_TX_RETRIES_TOTAL).increment(1);
                    tokio::time::sleep(Duration::from_millis(10 * u64::from(attempt))).await;
                }
                Err(e) => {
                    error!("counter transaction failed after {attempt} attempt(s): {e}");
                    return Err(EngineError::CounterTransactionFailed(e.to_string()));
                }
            }
        }
    }

    /// Display only. Never derive the next id from this.
    pub async fn peek(&self) -> Result<Option<YearCounter>, EngineError> {
        Ok(self.store.read_counter().await?)
    }

    pub async fn reset(&self) -> Result<(), EngineError> {
        self.reset_in_year(self.current_year()).await
    }

    pub async fn reset_in_year(&self, year: i32) -> Result<(), EngineError> {
        warn!("resetting {} counter for {year}", self.prefix);
        self.store
            .write_counter(YearCounter {
                year,
                counter: 0,
                last_updated: Utc::now(),
            })
            .await?;
        Ok(())
    }
}
