use crate::eval::BoundExpression;
use crate::Chart;
use oxhealth_common::types::AlarmStatus;
use std::sync::Arc;

/// Working flags of a rule. Mutated only by the evaluation worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuleFlags {
    /// Eligible for evaluation this iteration.
    pub runnable: bool,
    /// Evaluation is disabled by a silencer.
    pub disabled: bool,
    /// Notifications are suppressed by a silencer.
    pub silenced: bool,
    /// The last database lookup failed.
    pub db_error: bool,
    /// The last database lookup returned no collected value.
    pub db_nan: bool,
    /// The calculation expression failed.
    pub calc_error: bool,
    /// The warning expression failed.
    pub warn_error: bool,
    /// The critical expression failed.
    pub crit_error: bool,
}

/// Database lookup window for rules that read the metric store directly.
/// `after` and `before` are offsets relative to now, both ≤ 0.
#[derive(Debug, Clone)]
pub struct DbLookup {
    pub after: i64,
    pub before: i64,
    /// Dimension selector, `None` for all dimensions.
    pub dimensions: Option<String>,
    pub group: String,
    pub options: u32,
}

/// One alarm rule, bound to a chart. Unbound rules are never runnable.
pub struct AlarmRule {
    /// Stable across events for one logical alarm.
    pub id: u32,
    /// Monotonic per alarm; consumed by every event the rule produces.
    pub next_event_id: u32,
    pub name: String,
    /// Id of the chart the rule binds to.
    pub chart: String,
    /// Notifier executable override; host default when `None`.
    pub exec: Option<String>,
    /// Recipient override; host default when `None`.
    pub recipient: Option<String>,
    /// Where the rule was declared (file:line), passed to the notifier.
    pub source: String,
    pub units: String,
    pub info: String,

    /// Evaluation cadence in seconds. Zero makes the rule ineligible.
    pub update_every: i64,
    pub next_update: i64,

    pub lookup: Option<DbLookup>,
    pub calculation: Option<BoundExpression>,
    pub warning: Option<BoundExpression>,
    pub critical: Option<BoundExpression>,

    // trigger hysteresis: configuration, then working state
    pub delay_up_duration: i64,
    pub delay_down_duration: i64,
    pub delay_multiplier: f64,
    pub delay_max_duration: i64,
    pub delay_up_current: i64,
    pub delay_down_current: i64,
    pub delay_last: i64,
    pub delay_up_to_timestamp: i64,

    /// Re-notification cadence while in WARNING, 0 to disable.
    pub warn_repeat_every: i64,
    /// Re-notification cadence while in CRITICAL, 0 to disable.
    pub crit_repeat_every: i64,
    pub last_repeat: i64,

    pub status: AlarmStatus,
    pub old_status: AlarmStatus,
    pub value: f64,
    pub old_value: f64,
    pub last_status_change: i64,
    pub last_updated: i64,

    /// Clear transitions are not notified and skip the dedup scan.
    pub no_clear_notification: bool,
    pub flags: RuleFlags,

    pub chart_ref: Option<Arc<dyn Chart>>,
    /// Actual window bounds of the last database lookup.
    pub db_after: i64,
    pub db_before: i64,
}

impl AlarmRule {
    /// A rule with everything at rest: undefined status, NaN value, one
    /// evaluation per `update_every` seconds and no hysteresis.
    pub fn new(id: u32, name: impl Into<String>, chart: impl Into<String>) -> Self {
        Self {
            id,
            next_event_id: 1,
            name: name.into(),
            chart: chart.into(),
            exec: None,
            recipient: None,
            source: String::new(),
            units: String::new(),
            info: String::new(),
            update_every: 10,
            next_update: 0,
            lookup: None,
            calculation: None,
            warning: None,
            critical: None,
            delay_up_duration: 0,
            delay_down_duration: 0,
            delay_multiplier: 1.0,
            delay_max_duration: 3600,
            delay_up_current: 0,
            delay_down_current: 0,
            delay_last: 0,
            delay_up_to_timestamp: 0,
            warn_repeat_every: 0,
            crit_repeat_every: 0,
            last_repeat: 0,
            status: AlarmStatus::Undefined,
            old_status: AlarmStatus::Undefined,
            value: f64::NAN,
            old_value: f64::NAN,
            last_status_change: 0,
            last_updated: 0,
            no_clear_notification: false,
            flags: RuleFlags::default(),
            chart_ref: None,
            db_after: 0,
            db_before: 0,
        }
    }

    pub fn has_db_lookup(&self) -> bool {
        self.lookup.is_some()
    }

    /// Repeating rules re-notify on a cadence instead of logging transitions.
    pub fn is_repeating(&self) -> bool {
        self.warn_repeat_every > 0 || self.crit_repeat_every > 0
    }

    /// Chart context for silencer matching, when the rule is bound.
    pub fn context(&self) -> Option<&str> {
        self.chart_ref.as_deref().map(|c| c.context())
    }

    /// Chart family for silencer matching, when the rule is bound.
    pub fn family(&self) -> Option<&str> {
        self.chart_ref.as_deref().map(|c| c.family())
    }
}
