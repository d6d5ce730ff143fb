//! Polls the Harmony Email & Collaboration (HEC) event API and writes
//! enriched security events to a text, CSV or syslog sink.

pub mod auth;
pub mod client;
pub mod enrich;
pub mod error;
pub mod logging;
pub mod poller;
pub mod sink;

pub use auth::{Credentials, Token, TokenManager};
pub use client::QueryClient;
pub use enrich::Enricher;
pub use error::{Error, Result};
pub use poller::{collect_window, CycleReport, PollState, Poller};
pub use sink::OutputSink;
