//! Integration tests for dpconsole.
//!
//! - `http_roundtrip`: the local server driven through `HttpClient`
//! - `collaborators`: dataset, job and preview clients against stub routes
//! - `cli`: the `dpconsole` binary

mod cli;
mod collaborators;
mod http_roundtrip;
mod support;
