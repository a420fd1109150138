//! Notification dispatch: walks unprocessed log entries, dedups against
//! the previous notification of the same alarm, and spawns the notifier
//! executable with the alarm context as argv.

use crate::eval::BoundExpression;
use crate::host::Host;
use crate::rule::AlarmRule;
use oxhealth_common::types::{format_value_zero, AlarmEvent, AlarmStatus};
use std::collections::HashSet;
use std::io::Read;
use std::process::{Command, Stdio};

/// Spawns the notifier executable and reports its exit code. Swapped for a
/// recording fake in tests.
pub trait Notifier: Send + Sync {
    fn run(&self, program: &str, args: &[String]) -> std::io::Result<i32>;
}

/// Real notifier runner using `std::process::Command`. Stdout is piped
/// back, drained and discarded before waiting for the exit code.
pub struct CommandNotifier;

impl Notifier for CommandNotifier {
    fn run(&self, program: &str, args: &[String]) -> std::io::Result<i32> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()?;

        if let Some(mut stdout) = child.stdout.take() {
            let mut discarded = Vec::new();
            let _ = stdout.read_to_end(&mut discarded);
        }

        let status = child.wait()?;
        Ok(status.code().unwrap_or(-1))
    }
}

/// Expression context for the notifier argv: the source text and the error
/// text of the expression behind the event's own rule.
struct ExprInfo {
    source: String,
    error: String,
}

fn expr_info(expr: Option<&BoundExpression>) -> Option<ExprInfo> {
    expr.map(|e| ExprInfo {
        source: e.source().to_string(),
        error: e.error.clone().unwrap_or_else(|| "NOERRMSG".to_string()),
    })
}

/// Census of the host's raised alarms. Only rules whose chart has actually
/// been collected count; the rule matching `alarm_id` also contributes its
/// expression for the argv (the warning one when the event cleared).
fn raised_counts(rules: &[AlarmRule], alarm_id: u32) -> (u32, u32, Option<ExprInfo>) {
    let mut n_warn = 0;
    let mut n_crit = 0;
    let mut expr = None;

    for rule in rules {
        let collected = rule
            .chart_ref
            .as_deref()
            .map(|c| c.last_collected() != 0)
            .unwrap_or(false);
        if !collected {
            continue;
        }

        match rule.status {
            AlarmStatus::Warning => {
                n_warn += 1;
                if rule.id == alarm_id {
                    expr = expr_info(rule.warning.as_ref());
                }
            }
            AlarmStatus::Critical => {
                n_crit += 1;
                if rule.id == alarm_id {
                    expr = expr_info(rule.critical.as_ref());
                }
            }
            AlarmStatus::Clear => {
                if rule.id == alarm_id {
                    expr = expr_info(rule.warning.as_ref());
                }
            }
            _ => {}
        }
    }

    (n_warn, n_crit, expr)
}

/// Fixed positional argv of the notifier, starting after the program path.
fn build_argv(
    ae: &AlarmEvent,
    registry_hostname: &str,
    recipient: &str,
    expr: Option<&ExprInfo>,
    n_warn: u32,
    n_crit: u32,
) -> Vec<String> {
    let chart = if ae.chart.is_empty() { "NOCHART" } else { &ae.chart };
    let family = if ae.family.is_empty() { "NOFAMILY" } else { &ae.family };
    let source = if ae.source.is_empty() { "UNKNOWN" } else { &ae.source };

    vec![
        recipient.to_string(),
        registry_hostname.to_string(),
        ae.unique_id.to_string(),
        ae.alarm_id.to_string(),
        ae.alarm_event_id.to_string(),
        ae.when.to_string(),
        ae.name.clone(),
        chart.to_string(),
        family.to_string(),
        ae.new_status.to_string(),
        ae.old_status.to_string(),
        format_value_zero(ae.new_value),
        format_value_zero(ae.old_value),
        source.to_string(),
        ae.duration.to_string(),
        ae.non_clear_duration.to_string(),
        ae.units.clone(),
        ae.info.clone(),
        ae.new_value_string.clone(),
        ae.old_value_string.clone(),
        expr.map(|e| e.source.clone())
            .unwrap_or_else(|| "NOSOURCE".to_string()),
        expr.map(|e| e.error.clone())
            .unwrap_or_else(|| "NOERRMSG".to_string()),
        n_warn.to_string(),
        n_crit.to_string(),
    ]
}

/// Decide whether an event reaches the notifier. `in_log` selects whether
/// the prior-notification scan has a log position to walk from; a
/// synthesized repeat event has none.
fn should_notify(host: &Host, ae: &AlarmEvent, in_log: bool) -> bool {
    if ae.new_status.is_internal() {
        tracing::debug!(
            chart = %ae.chart,
            alarm = %ae.name,
            status = %ae.new_status,
            "not sending notification for internal status"
        );
        return false;
    }

    if ae.new_status <= AlarmStatus::Clear && ae.flags.no_clear_notification {
        tracing::debug!(
            chart = %ae.chart,
            alarm = %ae.name,
            "not sending notification: alarm has clear notifications disabled"
        );
        return false;
    }

    // Alarms with clear notifications disabled also skip this scan, so the
    // same status fires again every time it happens.
    if !ae.flags.no_clear_notification {
        let prior = if in_log {
            host.log.find_prior_exec_run(ae.unique_id, ae.alarm_id)
        } else {
            None
        };

        match prior {
            Some(status) if status == ae.new_status => {
                tracing::debug!(
                    chart = %ae.chart,
                    alarm = %ae.name,
                    status = %ae.new_status,
                    "not sending notification for the same status again"
                );
                return false;
            }
            Some(_) => {}
            None => {
                // never announce an alarm with a clear
                if ae.new_status == AlarmStatus::Clear {
                    tracing::debug!(
                        chart = %ae.chart,
                        alarm = %ae.name,
                        "not sending notification for first initialization"
                    );
                    return false;
                }
            }
        }
    }

    if ae.flags.silenced {
        tracing::info!(
            chart = %ae.chart,
            alarm = %ae.name,
            status = %ae.new_status,
            "not sending notification: notifications are silenced"
        );
        return false;
    }

    true
}

/// Run one event through the notification pipeline, updating its flags and
/// notifier bookkeeping in place. Callers persist the mutated event.
pub(crate) fn execute(host: &Host, ae: &mut AlarmEvent, in_log: bool, notifier: &dyn Notifier, now: i64) {
    ae.flags.processed = true;

    if !should_notify(host, ae, in_log) {
        return;
    }

    let exec = ae
        .exec
        .clone()
        .unwrap_or_else(|| host.default_exec.clone());
    let recipient = ae
        .recipient
        .clone()
        .unwrap_or_else(|| host.default_recipient.clone());

    let (n_warn, n_crit, expr) = {
        let state = host.state();
        raised_counts(&state.rules, ae.alarm_id)
    };

    let args = build_argv(ae, &host.registry_hostname, &recipient, expr.as_ref(), n_warn, n_crit);

    // mark as run first, so the same alarm fires again if it recurs even
    // when the spawn fails
    ae.flags.exec_run = true;
    ae.exec_run_timestamp = now;

    tracing::debug!(exec = %exec, alarm = %ae.name, status = %ae.new_status, "executing notifier");

    match notifier.run(&exec, &args) {
        Ok(code) => {
            ae.exec_code = code;
            if code != 0 {
                ae.flags.exec_failed = true;
            }
        }
        Err(e) => {
            tracing::error!(host = %host.hostname, exec = %exec, error = %e, "cannot spawn alarm notifier");
        }
    }
}

/// Drain unprocessed log entries for one host: dispatch the due ones and
/// remember where the next pass has to resume. Trims the log afterwards
/// when it overflowed, taking the write lock only then.
pub(crate) fn log_process(host: &Host, notifier: &dyn Notifier, now: i64) {
    // repeating alarms are dispatched inline by the emitter, never from the log
    let (repeating, last_processed) = {
        let state = host.state();
        let repeating: HashSet<u32> = state
            .rules
            .iter()
            .filter(|r| r.is_repeating())
            .map(|r| r.id)
            .collect();
        (repeating, state.last_processed_id)
    };

    let mut first_waiting = host.log.newest_unique_id();
    let mut due: Vec<AlarmEvent> = Vec::new();
    {
        let events = host.log.read();
        for ae in events.iter() {
            if ae.unique_id < last_processed {
                break;
            }
            if repeating.contains(&ae.alarm_id) {
                continue;
            }
            if ae.flags.processed || ae.flags.updated {
                continue;
            }
            if ae.unique_id < first_waiting {
                first_waiting = ae.unique_id;
            }
            if now >= ae.delay_up_to_timestamp {
                due.push(ae.clone());
            }
        }
    }

    // newest first, as scanned: an event only dedups against notifications
    // that actually ran before it
    for ae in due.iter_mut() {
        tracing::debug!(
            chart = %ae.chart,
            alarm = %ae.name,
            old_status = %ae.old_status,
            new_status = %ae.new_status,
            "alarm changed status"
        );
        execute(host, ae, true, notifier, now);
        host.log.update_event(ae.unique_id, |resident| {
            resident.flags = ae.flags;
            resident.exec_run_timestamp = ae.exec_run_timestamp;
            resident.exec_code = ae.exec_code;
        });
    }

    host.state_mut().last_processed_id = first_waiting;

    if host.log.needs_trim() {
        host.log.trim();
    }
}
