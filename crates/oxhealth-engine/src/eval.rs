//! Expression evaluation, the value→status mapping, the runnability gate
//! and trigger hysteresis.

use crate::rule::AlarmRule;
use crate::Expression;
use oxhealth_common::types::{AlarmStatus, ValueStatus};

/// Adapter over the external expression evaluator: runs the expression and
/// keeps the numeric result and the error text of the last evaluation
/// observable, the way the notifier argv wants them.
pub struct BoundExpression {
    expr: Box<dyn Expression>,
    pub result: f64,
    pub error: Option<String>,
}

impl BoundExpression {
    pub fn new(expr: Box<dyn Expression>) -> Self {
        Self {
            expr,
            result: f64::NAN,
            error: None,
        }
    }

    /// Evaluate, capturing the result or the error text. Returns whether
    /// the evaluation succeeded; on failure `result` becomes NaN.
    pub fn evaluate(&mut self) -> bool {
        match self.expr.evaluate() {
            Ok(value) => {
                self.result = value;
                self.error = None;
                true
            }
            Err(e) => {
                self.result = f64::NAN;
                self.error = Some(e.to_string());
                false
            }
        }
    }

    pub fn source(&self) -> &str {
        self.expr.source()
    }

    pub fn parsed_as(&self) -> &str {
        self.expr.parsed_as()
    }
}

/// Map one expression result to a status: unset values are undefined, zero
/// is clear, anything else raises.
pub fn value_to_status(value: f64) -> ValueStatus {
    if value.is_nan() || value.is_infinite() {
        ValueStatus::Undefined
    } else if value == 0.0 {
        ValueStatus::Clear
    } else {
        ValueStatus::Raised
    }
}

/// Combine the warning and critical outcomes into the rule status.
/// A raised critical overrides everything; a clear critical only fills in
/// when the warning expression said nothing.
pub fn resolve_status(warning: ValueStatus, critical: ValueStatus) -> AlarmStatus {
    let mut status = AlarmStatus::Undefined;

    match warning {
        ValueStatus::Clear => status = AlarmStatus::Clear,
        ValueStatus::Raised => status = AlarmStatus::Warning,
        ValueStatus::Undefined => {}
    }

    match critical {
        ValueStatus::Clear => {
            if status == AlarmStatus::Undefined {
                status = AlarmStatus::Clear;
            }
        }
        ValueStatus::Raised => status = AlarmStatus::Critical,
        ValueStatus::Undefined => {}
    }

    status
}

/// Apply trigger hysteresis for a transition to `new_status`, returning the
/// chosen delay. Rapid re-transitions multiply the working delays up to
/// `delay_max_duration`; once the previous window expires the working state
/// resets to the configured durations.
pub fn apply_hysteresis(rule: &mut AlarmRule, new_status: AlarmStatus, now: i64) -> i64 {
    if now > rule.delay_up_to_timestamp {
        rule.delay_up_current = rule.delay_up_duration;
        rule.delay_down_current = rule.delay_down_duration;
        rule.delay_last = 0;
        rule.delay_up_to_timestamp = 0;
    } else {
        rule.delay_up_current = (rule.delay_up_current as f64 * rule.delay_multiplier) as i64;
        if rule.delay_up_current > rule.delay_max_duration {
            rule.delay_up_current = rule.delay_max_duration;
        }

        rule.delay_down_current = (rule.delay_down_current as f64 * rule.delay_multiplier) as i64;
        if rule.delay_down_current > rule.delay_max_duration {
            rule.delay_down_current = rule.delay_max_duration;
        }
    }

    let delay = if new_status > rule.status {
        rule.delay_up_current
    } else {
        rule.delay_down_current
    };

    rule.delay_last = delay;
    rule.delay_up_to_timestamp = now + delay;
    delay
}

/// Decide whether a rule is eligible for evaluation right now. Pulls
/// `next_run` forward when the rule's own cadence is the nearest deadline.
pub fn is_runnable(rule: &AlarmRule, now: i64, next_run: &mut i64) -> bool {
    let Some(chart) = rule.chart_ref.as_deref() else {
        tracing::debug!(alarm = %rule.name, "not running alarm: it is not linked to a chart");
        return false;
    };

    if rule.next_update > now {
        if *next_run > rule.next_update {
            *next_run = rule.next_update;
        }
        return false;
    }

    if rule.update_every == 0 {
        tracing::debug!(alarm = %rule.name, "not running alarm: it has no update frequency");
        return false;
    }

    if chart.obsolete() || !chart.enabled() {
        return false;
    }

    if chart.last_collected() == 0 || chart.collected_samples() < 2 {
        tracing::debug!(alarm = %rule.name, chart = %rule.chart, "not running alarm: chart is not fully collected yet");
        return false;
    }

    // window bounds use the chart's cadence, not the rule's
    let update_every = chart.update_every();
    let first = chart.first_entry();
    let last = chart.last_entry();

    if now + update_every < first {
        return false;
    }

    if let Some(lookup) = &rule.lookup {
        let needed = now + lookup.before + lookup.after;
        if needed + update_every < first || needed - update_every > last {
            tracing::debug!(
                alarm = %rule.name,
                chart = %rule.chart,
                needed,
                first,
                last,
                "not examining alarm yet: not enough data"
            );
            return false;
        }
    }

    true
}
