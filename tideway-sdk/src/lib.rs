//! # tideway-sdk
//!
//! Client for submitting changes to a tideway server and following them
//! until they are committed and applied.
//!
//! ## Example
//!
//! ```no_run
//! use tideway_core::{Cause, ReleaseSpec};
//! use tideway_sdk::{await_change, Backoff, TidewayClient};
//!
//! let client = TidewayClient::new("http://localhost:3030");
//! let spec = ReleaseSpec {
//!     services: vec!["default/app".to_string()],
//!     image: "app:v2".to_string(),
//!     kind: Default::default(),
//!     excludes: vec![],
//! };
//!
//! let job = client.update_images(&spec, &Cause::default()).unwrap();
//! await_change(&mut std::io::stdout(), &client, &job, true, &Backoff::default()).unwrap();
//! ```

pub mod backoff;
pub mod client;
pub mod error;
pub mod watch;

pub use backoff::Backoff;
pub use client::{ClientService, TidewayClient, TENANT_HEADER};
pub use error::{ClientError, Result};
pub use tideway_core::{ContainerImages, ImageStatus, ServiceStatus};
pub use watch::{await_change, await_job, await_sync, watch_change, Progress};
