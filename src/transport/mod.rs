//! HTTP transport shared by all provider adapters.

mod http;

pub use http::{
    api_key_from_env, AuthStyle, HttpTransport, TransportConfig, TransportError,
    DEFAULT_TIMEOUT_SECS,
};
