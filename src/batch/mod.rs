//! 批处理模块：在有界并发下执行多个独立请求，并按提交顺序返回结果。
//!
//! # Batch Execution Module
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`BatchExecutor`] | Runs N operations under a permit pool of `max_concurrency` |
//! | [`BatchConfig`] | Concurrency, per-operation timeout, stop-on-error |
//! | [`BatchResult`] | One slot: index, content, error, model, tokens, latency |
//! | [`BatchResults`] | Ordered slots plus aggregate helpers |
//!
//! Results are placed by submission index, never by completion order. The two
//! policies compose: a per-operation timeout is a child scope of the batch
//! scope, and stop-on-error cancels the batch scope so running and waiting
//! operations all finish promptly.
//!
//! ```rust
//! use modelmux::batch::{BatchConfig, BatchExecutor, BatchOutput};
//! use tokio_util::sync::CancellationToken;
//!
//! # tokio_test::block_on(async {
//! let exec = BatchExecutor::new(BatchConfig::new().with_max_concurrency(2));
//! let jobs: Vec<_> = ["a", "b", "c"]
//!     .into_iter()
//!     .map(|text| {
//!         let op = move |_scope: CancellationToken| async move {
//!             Ok::<_, modelmux::Error>(BatchOutput { content: text.to_uppercase(), ..Default::default() })
//!         };
//!         ("local".to_string(), op)
//!     })
//!     .collect();
//! let results = exec.execute(jobs, &CancellationToken::new()).await;
//! assert_eq!(results.contents(), vec!["A", "B", "C"]);
//! # });
//! ```

mod executor;

pub use executor::{BatchConfig, BatchExecutor, BatchOutput, BatchResult, BatchResults};
