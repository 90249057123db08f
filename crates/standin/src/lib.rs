//! Standin is a programmable HTTP service double: tests register
//! interactions (an expected request shape paired with a canned response),
//! the server listens on a socket, and every inbound request is matched
//! against the registry deterministically, most recently added first. Each
//! match is recorded so assertions can verify call counts afterwards.
//!
//! ```no_run
//! use serde_json::json;
//! use standin::{matcher::like, InteractionSpec, MockServer};
//!
//! # async fn demo() -> standin::Result<()> {
//! let server = MockServer::default();
//! let spec: InteractionSpec = serde_json::from_value(json!({
//!     "request": {
//!         "method": "GET",
//!         "path": "/api/projects/1",
//!         "queryParams": { "date": like("08/04/2020") }
//!     },
//!     "response": { "status": 200, "body": { "id": 1, "name": "fake" } }
//! })).unwrap();
//! server.add_interaction(spec)?;
//! server.start_on(9393, "localhost").await?;
//! // ... drive requests against it ...
//! server.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod interaction;
pub mod logging;
pub mod matcher;
pub mod server;
pub mod store;
pub mod template;

pub use config::{DataStore, Settings};
pub use dispatch::{Dispatcher, ObservedRequest, UnmatchedRequest};
pub use error::{Error, Result};
pub use interaction::{
    BodyFn, CallExpectation, Delay, Interaction, InteractionSpec, OnCallFn, RequestSpec,
    ResponseSpec,
};
pub use matcher::graphql::GraphQlSpec;
pub use matcher::MatchRule;
pub use server::{MockServer, StartOptions};
pub use store::InteractionStore;
