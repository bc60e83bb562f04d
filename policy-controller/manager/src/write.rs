use crate::Metrics;
use admission_policy_controller_core::{
    store::{StoreError, Writer},
    Error, Result,
};

/// The number of times a conflicting write is attempted before giving up.
pub(crate) const MAX_ATTEMPTS: usize = 3;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Part {
    Spec,
    Status,
}

/// Applies `update` to `current` and writes the result, compare-and-swap style.
///
/// `current` typically comes from the cache and may be stale. On a conflict the object is
/// re-read from the API and `update` is applied again, up to [`MAX_ATTEMPTS`] writes in total.
pub(crate) async fn update<K: Clone + Send + Sync>(
    writer: &dyn Writer<K>,
    metrics: &Metrics,
    kind: &'static str,
    name: &str,
    mut current: K,
    part: Part,
    not_found: impl Fn() -> Error,
    mut update: impl FnMut(&mut K),
) -> Result<K> {
    for attempt in 1..=MAX_ATTEMPTS {
        let mut next = current.clone();
        update(&mut next);
        let written = match part {
            Part::Spec => writer.replace(&next).await,
            Part::Status => writer.replace_status(&next).await,
        };
        match written {
            Ok(written) => return Ok(written),
            Err(StoreError::Conflict) => {
                metrics.store_conflict(kind);
                tracing::debug!(%kind, %name, attempt, "Write conflicted; re-reading");
                if attempt == MAX_ATTEMPTS {
                    break;
                }
                current = writer
                    .fetch(name)
                    .await
                    .map_err(store_error)?
                    .ok_or_else(&not_found)?;
            }
            Err(StoreError::NotFound) => return Err(not_found()),
            Err(error) => return Err(store_error(error)),
        }
    }

    Err(Error::Conflict {
        kind,
        name: name.to_string(),
        attempts: MAX_ATTEMPTS,
    })
}

/// Maps store failures that have no more specific meaning to the caller.
pub(crate) fn store_error(error: StoreError) -> Error {
    match error {
        StoreError::Other(error) => Error::Internal(error),
        error => Error::Internal(error.into()),
    }
}
