//! AWS backends for the capability, credential-exchange, registry and
//! mail-transport seams.

pub mod dynamo;
pub mod iam;
pub mod ses;
pub mod sts;

use std::future::Future;
use std::time::Duration;

use aws_sdk_iam::error::ProvideErrorMetadata;
use tracing::debug;

use crate::error::IamError;

/// Map an AWS SDK error onto the shared taxonomy by error code.
pub(crate) fn map_sdk_err<E>(err: E) -> IamError
where
    E: ProvideErrorMetadata + std::fmt::Display,
{
    let message = || {
        err.message()
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string())
    };
    match err.code() {
        Some("NoSuchEntity") => IamError::NotFound(message()),
        Some("EntityAlreadyExists") => IamError::AlreadyExists(message()),
        Some("Throttling") | Some("ThrottlingException") | Some("RequestLimitExceeded") => {
            IamError::Throttled
        }
        Some("MalformedPolicyDocument") => IamError::InvalidPolicyDocument(message()),
        _ => IamError::Other(err.to_string()),
    }
}

/// Retry a throttled call with exponential backoff, transparently to the
/// reconcilers. Any other outcome is returned as-is.
pub(crate) async fn with_throttle_retry<T, F, Fut>(
    operation: &'static str,
    mut call: F,
) -> Result<T, IamError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, IamError>>,
{
    let mut delay = Duration::from_millis(250);
    for attempt in 1..5u32 {
        match call().await {
            Err(IamError::Throttled) => {
                debug!(operation, attempt, delay_ms = delay.as_millis() as u64, "throttled, backing off");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            other => return other,
        }
    }
    call().await
}

/// Marker for the next page, or `None` when the listing is complete.
pub(crate) fn next_marker(truncated: bool, marker: Option<&str>) -> Option<String> {
    if truncated {
        marker.map(str::to_string)
    } else {
        None
    }
}

/// Drain a marker-paginated listing. `page` receives the marker to resume
/// from and returns one batch plus the marker for the next one.
pub(crate) async fn collect_pages<T, F, Fut>(mut page: F) -> Result<Vec<T>, IamError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<(Vec<T>, Option<String>), IamError>>,
{
    let mut items = Vec::new();
    let mut marker: Option<String> = None;
    loop {
        let (mut batch, next) = page(marker.take()).await?;
        items.append(&mut batch);
        match next {
            Some(next) => marker = Some(next),
            None => return Ok(items),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_retry_gives_up_after_bound() {
        let calls = AtomicU32::new(0);
        let result: Result<(), IamError> = with_throttle_retry("op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(IamError::Throttled) }
        })
        .await;

        assert_eq!(result, Err(IamError::Throttled));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_retry_passes_through_success() {
        let calls = AtomicU32::new(0);
        let result = with_throttle_retry("op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(IamError::Throttled)
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(1));
    }

    #[tokio::test]
    async fn test_retry_does_not_retry_other_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<(), IamError> = with_throttle_retry("op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(IamError::NotFound("x".into())) }
        })
        .await;

        assert!(matches!(result, Err(IamError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_collect_pages_follows_markers_in_order() {
        let seen = Mutex::new(Vec::new());
        let result = collect_pages(|marker| {
            seen.lock().unwrap().push(marker.clone());
            async move {
                match marker.as_deref() {
                    None => Ok((vec!["a", "b"], Some("m1".to_string()))),
                    Some("m1") => Ok((vec!["c"], Some("m2".to_string()))),
                    Some("m2") => Ok((vec!["d"], None)),
                    other => panic!("unexpected marker {other:?}"),
                }
            }
        })
        .await;

        assert_eq!(result, Ok(vec!["a", "b", "c", "d"]));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![None, Some("m1".to_string()), Some("m2".to_string())]
        );
    }

    #[tokio::test]
    async fn test_collect_pages_surfaces_mid_listing_errors() {
        let result: Result<Vec<String>, IamError> = collect_pages(|marker| async move {
            match marker {
                None => Ok((vec!["a".to_string()], Some("m1".to_string()))),
                Some(_) => Err(IamError::Other("page fetch failed".to_string())),
            }
        })
        .await;

        assert_eq!(result, Err(IamError::Other("page fetch failed".to_string())));
    }

    #[test]
    fn test_next_marker_requires_truncation() {
        assert_eq!(next_marker(true, Some("m")), Some("m".to_string()));
        assert_eq!(next_marker(false, Some("m")), None);
        assert_eq!(next_marker(true, None), None);
    }
}
