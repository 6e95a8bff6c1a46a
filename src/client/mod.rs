//! 执行客户端模块：把提供方、重试策略、降级链与执行上下文组合成一个执行器。
//!
//! # Execution Client
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`Executor`] | rate limit → cache → retry → adapter → fallback, plus batch and race helpers |
//! | [`ExecutorBuilder`] | Fluent construction; honours `MODELMUX_RPS` |
//! | [`ExecutionContext`] | Debug switch, cache, rate limiter, stats and hooks, injected rather than global |
//! | [`ExecutionOutcome`] | Content, tool calls, model used, tokens, latency, retries, earlier failures |
//! | [`SessionStats`] | Counters shared by every call through one context |
//! | [`ExecutionHooks`] | Optional observer callbacks |
//!
//! Capability mismatches found by the preflight check are logged with
//! `warn!` and never block a request.

mod builder;
mod context;
mod executor;
mod hooks;
pub mod preflight;
mod stats;

pub use builder::ExecutorBuilder;
pub use context::ExecutionContext;
pub use executor::{ExecutionOutcome, Executor};
pub use hooks::ExecutionHooks;
pub use stats::{ModelUsage, SessionStats, StatsSnapshot};
