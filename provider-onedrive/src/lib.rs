//! # OneDrive Provider
//!
//! Glue between the authentication core and Microsoft Graph requests.
//!
//! ## Overview
//!
//! This module provides:
//! - [`GraphAuthorizer`]: stamps a valid bearer token on outbound requests
//! - [`AuthenticatedHttpClient`]: an `HttpClient` that authorizes every call
//! - Graph response classification (auth required, throttling, API errors)
//!
//! Building Graph requests themselves is left to the host.

pub mod authorizer;
pub mod error;

pub use authorizer::{check_response, graph_url, AuthenticatedHttpClient, GraphAuthorizer, GRAPH_API_BASE};
pub use error::{OneDriveError, Result};
