//! Health monitoring engine: evaluates alarm rules against live metric
//! charts, runs the alarm state machine with trigger hysteresis, keeps a
//! bounded per-host alarm event log, and dispatches notifications to an
//! external executable.
//!
//! The metric store and the expression evaluator are external collaborators,
//! consumed through the [`Chart`] and [`Expression`] capabilities so that
//! tests (and embedders) can substitute their own implementations. The
//! engine itself runs as one dedicated worker driven by
//! [`engine::HealthEngine::run`].

pub mod engine;
pub mod error;
pub mod eval;
pub mod host;
pub mod log;
pub mod notify;
pub mod rule;
pub mod silence;


use error::{ExpressionError, QueryError};

pub use engine::{EngineConfig, HealthEngine, SuspensionDetector};
pub use eval::BoundExpression;
pub use host::{Host, HostOptions, HostRegistry};
pub use notify::{CommandNotifier, Notifier};
pub use rule::{AlarmRule, DbLookup, RuleFlags};
pub use silence::{SilenceType, Silencer, Silencers};

/// A live metric chart, as seen by the health engine.
///
/// Implementations wrap whatever storage engine collects the samples. All
/// instants are unix seconds; `collected_samples` counts completed
/// collection cycles since the chart appeared.
pub trait Chart: Send + Sync {
    /// Chart id the rule binds to (e.g. `"system.cpu"`).
    fn id(&self) -> &str;

    /// Chart context, matched by silencers.
    fn context(&self) -> &str;

    /// Chart family, matched by silencers and passed to the notifier.
    fn family(&self) -> &str;

    fn enabled(&self) -> bool;

    fn obsolete(&self) -> bool;

    /// Collection cadence of the chart in seconds.
    fn update_every(&self) -> i64;

    /// Completed collection cycles. A chart is usable once it has two.
    fn collected_samples(&self) -> u64;

    /// Instant of the most recent collection, 0 if never collected.
    fn last_collected(&self) -> i64;

    /// Oldest instant the store can answer for.
    fn first_entry(&self) -> i64;

    /// Newest instant the store can answer for.
    fn last_entry(&self) -> i64;

    /// Reduce a time window of this chart to a single value.
    fn query(&self, request: &LookupRequest<'_>) -> Result<LookupResult, QueryError>;

    /// Forget the green/red thresholds attached to the chart. Called when
    /// the health configuration is reloaded.
    fn reset_thresholds(&self);
}

/// Parameters of a [`Chart::query`] call.
#[derive(Debug, Clone)]
pub struct LookupRequest<'a> {
    /// Dimension selector, `None` for all dimensions.
    pub dimensions: Option<&'a str>,
    pub points: usize,
    /// Window start relative to now, ≤ 0.
    pub after: i64,
    /// Window end relative to now, ≤ 0.
    pub before: i64,
    /// Grouping method (`"average"`, `"max"`, ...), interpreted by the store.
    pub group: &'a str,
    pub options: u32,
}

/// Result of a successful [`Chart::query`] call.
#[derive(Debug, Clone, Copy)]
pub struct LookupResult {
    pub value: f64,
    /// Actual start of the window the store answered for.
    pub db_after: i64,
    /// Actual end of the window the store answered for.
    pub db_before: i64,
    /// The window held no collected values.
    pub value_is_null: bool,
}

/// A compiled alarm expression, evaluated against the evaluator's own
/// variable bindings.
pub trait Expression: Send + Sync {
    fn evaluate(&mut self) -> Result<f64, ExpressionError>;

    /// The expression text as the user wrote it.
    fn source(&self) -> &str;

    /// The expression text as the parser understood it.
    fn parsed_as(&self) -> &str;
}

/// Supplies the alarm rules of a host, standing in for the on-disk rule
/// files and their grammar. Returned rules may come pre-linked to charts;
/// unlinked ones are linked by chart id when installed on a host.
pub trait RuleProvider: Send + Sync {
    fn load(&self, hostname: &str) -> Vec<AlarmRule>;
}
