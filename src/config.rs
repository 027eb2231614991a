// Engine configuration
// Defaults, optionally overridden by a TOML file and INVOKER_* environment variables

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::models::MarkupNames;
use crate::Result;

/// Prefix for environment overrides, e.g. `INVOKER_RATE_LIMIT=200`
pub const ENV_PREFIX: &str = "INVOKER";

/// Tunables for one [`CommandEngine`](crate::CommandEngine)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Executions allowed within `rate_window` before the breaker trips
    pub rate_limit: usize,
    pub rate_window: Duration,

    /// Upper bound on a single action
    pub command_timeout: Duration,

    /// Deepest declarative chain nesting that still executes
    pub max_chain_depth: usize,

    /// How long a disabled invoker stays disabled after a failed command
    pub reenable_delay: Duration,

    /// Broadcast buffer for [`CommandEvent`](crate::CommandEvent)s
    pub event_buffer_size: usize,

    /// Reserved attribute and tag names
    pub markup: MarkupNames,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rate_limit: 100,
            rate_window: Duration::from_secs(1),
            command_timeout: Duration::from_secs(30),
            max_chain_depth: 25,
            reenable_delay: Duration::from_secs(1),
            event_buffer_size: 1000,
            markup: MarkupNames::default(),
        }
    }
}

/// Everything a file or the environment may override. Durations are in
/// milliseconds.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigOverrides {
    rate_limit: Option<usize>,
    rate_window_ms: Option<u64>,
    command_timeout_ms: Option<u64>,
    max_chain_depth: Option<usize>,
    reenable_delay_ms: Option<u64>,
    event_buffer_size: Option<usize>,
    markup: Option<MarkupNames>,
}

impl EngineConfig {
    /// Defaults overridden by `INVOKER_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    /// Defaults, then the TOML file at `path` (if given and present), then
    /// `INVOKER_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(false));
        }
        let overrides: ConfigOverrides = builder
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;

        debug!(?overrides, "Loaded engine configuration overrides");
        Ok(Self::default().apply(overrides))
    }

    fn apply(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(rate_limit) = overrides.rate_limit {
            self.rate_limit = rate_limit;
        }
        if let Some(ms) = overrides.rate_window_ms {
            self.rate_window = Duration::from_millis(ms);
        }
        if let Some(ms) = overrides.command_timeout_ms {
            self.command_timeout = Duration::from_millis(ms);
        }
        if let Some(depth) = overrides.max_chain_depth {
            self.max_chain_depth = depth;
        }
        if let Some(ms) = overrides.reenable_delay_ms {
            self.reenable_delay = Duration::from_millis(ms);
        }
        if let Some(size) = overrides.event_buffer_size {
            self.event_buffer_size = size;
        }
        if let Some(markup) = overrides.markup {
            self.markup = markup;
        }
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: usize, window: Duration) -> Self {
        self.rate_limit = rate_limit;
        self.rate_window = window;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_max_chain_depth(mut self, depth: usize) -> Self {
        self.max_chain_depth = depth;
        self
    }

    pub fn with_markup(mut self, markup: MarkupNames) -> Self {
        self.markup = markup;
        self
    }
}
