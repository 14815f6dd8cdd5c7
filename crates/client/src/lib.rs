//! Client code for capsync.
//!
//! This crate provides the request/response model, the network seam used by
//! the strategy engine and sync coordinator, and the request router.

pub mod fetch;
pub mod http;
pub mod router;

pub use fetch::{FetchConfig, HttpNetwork, Network};
pub use http::{Request, RequestMode, Response, ResponseSource};
pub use router::{Route, Router};

pub use reqwest::{Method, StatusCode};
pub use url::Url;
