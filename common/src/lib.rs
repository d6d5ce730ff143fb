pub mod config;
pub mod types;

pub use config::{
    ApiConfig, CadenceMode, Config, EnrichConfig, LinkRewriteRule, LoggingConfig, OutputConfig,
    OutputFormat, PollConfig, WindowPolicy,
};
pub use types::{Action, EnrichedEvent, Event, QueryWindow, WIRE_DATE_FORMAT};
