use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tsl_types::{Result, TslError};

use super::XsltProcessor;

/// Workers used when the pipeline does not configure a count.
pub const DEFAULT_WORKERS: usize = 4;
/// Upper bound on concurrent transforms regardless of configuration.
pub const MAX_WORKERS: usize = 16;

/// Apply `stylesheet` to every document on a fixed pool of workers.
///
/// Returns one result per input, in input order. A failed document does not
/// stop the others.
pub async fn transform_all(
    processor: Arc<dyn XsltProcessor>,
    stylesheet: Arc<[u8]>,
    reference: &str,
    documents: Vec<Vec<u8>>,
    workers: usize,
) -> Vec<Result<Vec<u8>>> {
    let total = documents.len();
    let workers = workers.clamp(1, MAX_WORKERS).min(total.max(1));
    let queue: Arc<Mutex<VecDeque<(usize, Vec<u8>)>>> =
        Arc::new(Mutex::new(documents.into_iter().enumerate().collect()));

    let mut join_set = JoinSet::new();
    for worker in 0..workers {
        let queue = Arc::clone(&queue);
        let processor = Arc::clone(&processor);
        let stylesheet = Arc::clone(&stylesheet);
        let reference = reference.to_string();

        join_set.spawn(async move {
            let mut done = Vec::new();
            loop {
                let next = queue.lock().await.pop_front();
                let Some((index, document)) = next else {
                    break;
                };
                let result = processor
                    .transform(&stylesheet, &document)
                    .await
                    .map_err(|e| TslError::Transform {
                        stylesheet: reference.clone(),
                        index,
                        message: e.to_string(),
                    });
                if let Err(e) = &result {
                    tracing::warn!(worker, index, error = %e, "Transform failed");
                }
                done.push((index, result));
            }
            done
        });
    }

    let mut results: Vec<Option<Result<Vec<u8>>>> = (0..total).map(|_| None).collect();
    while let Some(task_result) = join_set.join_next().await {
        match task_result {
            Ok(done) => {
                for (index, result) in done {
                    results[index] = Some(result);
                }
            }
            Err(e) => tracing::error!("Transform worker failed to complete: {}", e),
        }
    }

    results
        .into_iter()
        .enumerate()
        .map(|(index, r)| {
            r.unwrap_or_else(|| {
                Err(TslError::Transform {
                    stylesheet: reference.to_string(),
                    index,
                    message: "worker terminated before producing a result".into(),
                })
            })
        })
        .collect()
}

/// Split per-document results into outputs, or a batch error naming every
/// failure.
pub fn collect_outputs(reference: &str, results: Vec<Result<Vec<u8>>>) -> Result<Vec<Vec<u8>>> {
    let total = results.len();
    let mut outputs = Vec::with_capacity(total);
    let mut failures = Vec::new();
    for result in results {
        match result {
            Ok(out) => outputs.push(out),
            Err(e) => failures.push(e),
        }
    }
    if failures.is_empty() {
        Ok(outputs)
    } else {
        Err(TslError::TransformBatch {
            stylesheet: reference.to_string(),
            total,
            failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    /// Upper-cases documents, failing any that contain "bad". Tracks peak
    /// concurrency.
    #[derive(Default)]
    struct Upper {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl XsltProcessor for Upper {
        async fn transform(&self, _stylesheet: &[u8], document: &[u8]) -> Result<Vec<u8>> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            let text = String::from_utf8_lossy(document);
            if text.contains("bad") {
                return Err(TslError::Other("cannot transform".into()));
            }
            Ok(text.to_uppercase().into_bytes())
        }
    }

    fn docs(items: &[&str]) -> Vec<Vec<u8>> {
        items.iter().map(|s| s.as_bytes().to_vec()).collect()
    }

    #[tokio::test]
    async fn results_keep_input_order() {
        let processor = Arc::new(Upper::default());
        let results = transform_all(
            processor,
            Arc::from(&b"xslt"[..]),
            "embedded:test.xslt",
            docs(&["a", "b", "c", "d", "e"]),
            3,
        )
        .await;
        let outputs = collect_outputs("embedded:test.xslt", results).unwrap();
        assert_eq!(outputs, docs(&["A", "B", "C", "D", "E"]));
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let processor = Arc::new(Upper::default());
        let inputs: Vec<String> = (0..40).map(|i| format!("doc{i}")).collect();
        let inputs: Vec<&str> = inputs.iter().map(String::as_str).collect();
        transform_all(
            processor.clone(),
            Arc::from(&b"xslt"[..]),
            "x",
            docs(&inputs),
            100,
        )
        .await;
        let peak = processor.peak.load(Ordering::SeqCst);
        assert!(peak >= 1 && peak <= MAX_WORKERS, "peak {peak}");
    }

    #[tokio::test]
    async fn failures_are_aggregated() {
        let processor = Arc::new(Upper::default());
        let results = transform_all(
            processor,
            Arc::from(&b"xslt"[..]),
            "style.xslt",
            docs(&["ok", "bad1", "ok", "bad2", "ok"]),
            2,
        )
        .await;
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 3);

        let err = collect_outputs("style.xslt", results).unwrap_err();
        match &err {
            TslError::TransformBatch { total, failures, .. } => {
                assert_eq!(*total, 5);
                assert_eq!(failures.len(), 2);
                assert!(matches!(failures[0], TslError::Transform { index: 1, .. }));
                assert!(matches!(failures[1], TslError::Transform { index: 3, .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("2 of 5"));
    }

    #[tokio::test]
    async fn empty_input_is_empty_output() {
        let results = transform_all(
            Arc::new(Upper::default()),
            Arc::from(&b"xslt"[..]),
            "x",
            Vec::new(),
            4,
        )
        .await;
        assert!(results.is_empty());
    }
}
