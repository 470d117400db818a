//! Pre-validation: weed out references that can never be fetched before they
//! reach the worker pool.

use std::collections::HashMap;
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::ErrorClass;
use crate::item::{FetchItem, ItemKind};
use crate::traits::FetchBackend;

#[derive(Debug, Clone)]
pub struct ValidationConfig {
    pub enabled: bool,
    /// Per-probe timeout, independent of the fetch timeout.
    pub probe_timeout: Duration,
    /// Probes in flight at once.
    pub concurrency: usize,
    /// Deadline for the whole validation phase.
    pub global_timeout: Duration,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            probe_timeout: Duration::from_secs(10),
            concurrency: 2,
            global_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    /// The reference can never be fetched; the item is skipped.
    Invalid(String),
    /// The probe could not tell; the item stays queued.
    Unverified(String),
}

/// Checks that need no network access.
pub fn static_check(item: &FetchItem) -> Result<(), String> {
    let source = item.source_ref.trim();
    if source.is_empty() {
        return Err("empty source reference".to_string());
    }
    if source.chars().any(char::is_whitespace) {
        return Err(format!("source reference '{source}' contains whitespace"));
    }

    if item.kind == ItemKind::File {
        let url = Url::parse(source).map_err(|e| format!("invalid URL '{source}': {e}"))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(format!("unsupported URL scheme '{}'", url.scheme()));
        }
        if url.host_str().is_none() {
            return Err(format!("URL '{source}' has no host"));
        }
    }
    Ok(())
}

/// Static check followed by a backend probe under `timeout`.
pub async fn verify<B: FetchBackend>(backend: &B, item: &FetchItem, timeout: Duration) -> Verdict {
    if let Err(reason) = static_check(item) {
        return Verdict::Invalid(reason);
    }

    match tokio::time::timeout(timeout, backend.probe(item)).await {
        Ok(Ok(())) => Verdict::Valid,
        Ok(Err(e)) if e.class() == ErrorClass::Invalid => Verdict::Invalid(e.to_string()),
        Ok(Err(e)) => Verdict::Unverified(e.to_string()),
        Err(_) => Verdict::Unverified(format!("probe timed out after {}s", timeout.as_secs())),
    }
}

/// Validates `items[i]` for every `i` in `indices`, returning one verdict per
/// index in the same order.
///
/// Probes still outstanding at the global deadline or on cancellation come
/// back `Unverified`.
pub async fn validate_items<B: FetchBackend>(
    backend: &B,
    items: &[FetchItem],
    indices: &[usize],
    config: &ValidationConfig,
    cancel: &CancellationToken,
) -> Vec<(usize, Verdict)> {
    let mut verdicts: HashMap<usize, Verdict> = HashMap::with_capacity(indices.len());

    {
        let mut probes = futures::stream::iter(indices.iter().copied())
            .map(|index| {
                let item = &items[index];
                async move { (index, verify(backend, item, config.probe_timeout).await) }
            })
            .buffer_unordered(config.concurrency.max(1));

        let deadline = tokio::time::sleep(config.global_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = &mut deadline => {
                    tracing::warn!(
                        validated = verdicts.len(),
                        total = indices.len(),
                        "Validation deadline reached, remaining items stay queued unverified"
                    );
                    break;
                }
                next = probes.next() => match next {
                    Some((index, verdict)) => {
                        verdicts.insert(index, verdict);
                    }
                    None => break,
                },
            }
        }
    }

    indices
        .iter()
        .map(|&index| {
            let verdict = verdicts
                .remove(&index)
                .unwrap_or_else(|| Verdict::Unverified("not probed before the deadline".into()));
            (index, verdict)
        })
        .collect()
}
