//! The evaluation worker: drives per-iteration evaluation across all
//! hosts, creates events on status transitions, emits repeat
//! notifications, and hands the log to the dispatcher.

use crate::eval::{apply_hysteresis, is_runnable, resolve_status, value_to_status};
use crate::host::{link_rules, Host, HostRegistry};
use crate::log::AlarmLog;
use crate::notify::{self, Notifier};
use crate::rule::AlarmRule;
use crate::silence::{update_disabled_silenced, SilenceType, Silencers};
use crate::{LookupRequest, RuleProvider};
use chrono::Utc;
use oxhealth_common::types::{format_value_string, AlarmEvent, AlarmStatus, EventFlags, ValueStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Floor on the loop period, seconds. Clamped to at least 1.
    pub min_run_every: i64,
    /// Postpone window after a detected suspension, seconds.
    pub hibernation_delay: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_run_every: 10,
            hibernation_delay: 60,
        }
    }
}

/// Detects resume-from-suspension: when the realtime clock advanced more
/// than twice what the monotonic clock did between two samples, the system
/// slept in between.
pub struct SuspensionDetector {
    last_realtime: u64,
    last_monotonic: u64,
}

impl SuspensionDetector {
    pub fn new() -> Self {
        Self {
            last_realtime: 0,
            last_monotonic: 0,
        }
    }

    /// Feed one (realtime, monotonic) microsecond sample pair.
    pub fn sample(&mut self, realtime_usec: u64, monotonic_usec: u64) -> bool {
        let resumed = self.last_realtime != 0
            && self.last_monotonic != 0
            && realtime_usec.saturating_sub(self.last_realtime)
                > 2 * monotonic_usec.saturating_sub(self.last_monotonic);

        self.last_realtime = realtime_usec;
        self.last_monotonic = monotonic_usec;
        resumed
    }
}

impl Default for SuspensionDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// The health evaluation worker. One instance drives all hosts from a
/// single dedicated thread; everything it touches is lock-protected, so
/// the rest of the daemon keeps serving reads while it runs.
pub struct HealthEngine {
    config: EngineConfig,
    silencers: Arc<RwLock<Silencers>>,
    notifier: Arc<dyn Notifier>,
    exit: Arc<AtomicBool>,
    disabled_logged: AtomicBool,
}

impl HealthEngine {
    pub fn new(
        mut config: EngineConfig,
        silencers: Arc<RwLock<Silencers>>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        if config.min_run_every < 1 {
            config.min_run_every = 1;
        }
        Self {
            config,
            silencers,
            notifier,
            exit: Arc::new(AtomicBool::new(false)),
            disabled_logged: AtomicBool::new(false),
        }
    }

    /// Shared flag that stops [`run`](Self::run); polled between hosts and
    /// between evaluation passes.
    pub fn exit_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.exit)
    }

    pub fn request_exit(&self) {
        self.exit.store(true, Ordering::Relaxed);
    }

    /// Handle to the silencer ruleset, for the control API to replace.
    pub fn silencers(&self) -> Arc<RwLock<Silencers>> {
        Arc::clone(&self.silencers)
    }

    /// Run the evaluation loop until the exit flag is raised.
    pub fn run(&self, registry: &HostRegistry) {
        tracing::info!(min_run_every = self.config.min_run_every, "health worker started");

        let mut detector = SuspensionDetector::new();
        let mut iteration: u64 = 0;

        while !self.exit.load(Ordering::Relaxed) {
            iteration += 1;

            let now = unix_now();
            let resumed = detector.sample(realtime_usec(), monotonic_usec());
            if resumed {
                tracing::info!(
                    seconds = self.config.hibernation_delay,
                    "postponing alarm checks: the system seems to have just resumed from suspension"
                );
            }

            let next_run = self.iteration(registry, now, resumed);

            if self.exit.load(Ordering::Relaxed) {
                break;
            }

            let now = unix_now();
            if now < next_run {
                tracing::debug!(iteration, sleep = next_run - now, "health iteration done");
                self.sleep_until(next_run);
            } else {
                tracing::debug!(iteration, "health iteration done, next one immediately");
            }
        }

        tracing::info!("health worker exited");
    }

    /// One pass over every host. Returns the instant of the next run.
    pub fn iteration(&self, registry: &HostRegistry, now: i64, apply_hibernation: bool) -> i64 {
        let mut next_run = now + self.config.min_run_every;

        {
            let silencers = self.silencers.read().unwrap();
            if silencers.all_alarms
                && silencers.stype == SilenceType::DisableAlarms
                && !self.disabled_logged.swap(true, Ordering::Relaxed)
            {
                tracing::info!("skipping health checks: all alarms are disabled");
            }
        }

        for host in registry.hosts() {
            if self.exit.load(Ordering::Relaxed) {
                break;
            }
            if !host.health_enabled {
                continue;
            }

            if apply_hibernation {
                tracing::info!(
                    host = %host.hostname,
                    seconds = self.config.hibernation_delay,
                    "postponing health checks"
                );
                host.state_mut().delay_up_to = now + self.config.hibernation_delay;
            }

            let postponed = {
                let mut state = host.state_mut();
                if state.delay_up_to == 0 {
                    false
                } else if now < state.delay_up_to {
                    true
                } else {
                    tracing::info!(host = %host.hostname, "resuming health checks");
                    state.delay_up_to = 0;
                    false
                }
            };
            if postponed {
                continue;
            }

            let runnable = self.evaluate_values(&host, now, &mut next_run);

            if runnable > 0 && !self.exit.load(Ordering::Relaxed) {
                let repeats = self.evaluate_statuses(&host, now, &mut next_run);

                // host lock is released here; repeat events are dispatched
                // detached and dropped, never stored in the log
                for mut ae in repeats {
                    notify::execute(&host, &mut ae, false, self.notifier.as_ref(), now);
                    tracing::debug!(alarm_id = ae.alarm_id, "notification processed for repeating alarm");
                }
            }

            if self.exit.load(Ordering::Relaxed) {
                break;
            }

            notify::log_process(&host, self.notifier.as_ref(), now);
        }

        next_run
    }

    /// Value pass: refresh silencer flags, gate runnability, pull values
    /// from the metric store and run calculation expressions.
    fn evaluate_values(&self, host: &Host, now: i64, next_run: &mut i64) -> usize {
        let silencers = self.silencers.read().unwrap().clone();
        let mut runnable = 0;
        let mut state = host.state_mut();

        for rule in state.rules.iter_mut() {
            if update_disabled_silenced(rule, &host.hostname, &silencers) {
                continue;
            }

            if !is_runnable(rule, now, next_run) {
                rule.flags.runnable = false;
                continue;
            }

            runnable += 1;
            rule.flags.runnable = true;
            rule.old_value = rule.value;

            if rule.has_db_lookup() {
                lookup_value(rule, &host.hostname);
            }

            if let Some(calc) = rule.calculation.as_mut() {
                if !calc.evaluate() {
                    rule.value = f64::NAN;
                    rule.flags.calc_error = true;
                    tracing::debug!(
                        host = %host.hostname,
                        chart = %rule.chart,
                        alarm = %rule.name,
                        expression = calc.parsed_as(),
                        error = calc.error.as_deref().unwrap_or(""),
                        "calculation expression failed"
                    );
                } else {
                    rule.flags.calc_error = false;
                    rule.value = calc.result;
                }
            }
        }

        runnable
    }

    /// Status pass: evaluate the warning and critical expressions, derive
    /// the new status, log transitions, then collect due repeat events.
    fn evaluate_statuses(&self, host: &Host, now: i64, next_run: &mut i64) -> Vec<AlarmEvent> {
        let mut repeats = Vec::new();
        let mut state = host.state_mut();

        for rule in state.rules.iter_mut() {
            if !rule.flags.runnable || rule.flags.disabled {
                continue;
            }

            let mut warning_status = ValueStatus::Undefined;
            let mut critical_status = ValueStatus::Undefined;

            if let Some(warning) = rule.warning.as_mut() {
                if !warning.evaluate() {
                    rule.flags.warn_error = true;
                    tracing::debug!(
                        host = %host.hostname,
                        chart = %rule.chart,
                        alarm = %rule.name,
                        error = warning.error.as_deref().unwrap_or(""),
                        "warning expression failed"
                    );
                } else {
                    rule.flags.warn_error = false;
                    warning_status = value_to_status(warning.result);
                }
            }

            if let Some(critical) = rule.critical.as_mut() {
                if !critical.evaluate() {
                    rule.flags.crit_error = true;
                    tracing::debug!(
                        host = %host.hostname,
                        chart = %rule.chart,
                        alarm = %rule.name,
                        error = critical.error.as_deref().unwrap_or(""),
                        "critical expression failed"
                    );
                } else {
                    rule.flags.crit_error = false;
                    critical_status = value_to_status(critical.result);
                }
            }

            let status = resolve_status(warning_status, critical_status);

            if status != rule.status {
                apply_hysteresis(rule, status, now);

                // error paths land in Undefined without producing events;
                // repeating alarms log nothing, the emitter below notifies
                if status != AlarmStatus::Undefined && !rule.is_repeating() {
                    let old_status = rule.status;
                    let event = create_event(&host.log, rule, now, old_status, status);
                    host.log.append(event);
                }

                rule.last_status_change = now;
                rule.old_status = rule.status;
                rule.status = status;
            }

            rule.last_updated = now;
            rule.next_update = now + rule.update_every;
            if *next_run > rule.next_update {
                *next_run = rule.next_update;
            }
        }

        for rule in state.rules.iter_mut() {
            if !rule.is_repeating() {
                continue;
            }
            let repeat_every = match rule.status {
                AlarmStatus::Warning => rule.warn_repeat_every,
                AlarmStatus::Critical => rule.crit_repeat_every,
                _ => 0,
            };
            if repeat_every > 0 && rule.last_repeat + repeat_every <= now {
                rule.last_repeat = now;
                let old_status = rule.old_status;
                let new_status = rule.status;
                let mut event = create_event(&host.log, rule, now, old_status, new_status);
                event.last_repeat = rule.last_repeat;
                repeats.push(event);
            }
        }

        repeats
    }

    /// Quiesce one host, drop its rules, invalidate surviving log entries,
    /// reset chart thresholds, and install fresh rules from the provider.
    pub fn reload_host(&self, host: &Host, provider: &dyn RuleProvider) {
        host.state_mut().rules.clear();

        // old state must not re-notify once the new rules take over
        host.log.mark_updated();

        {
            let state = host.state();
            for chart in &state.charts {
                chart.reset_thresholds();
            }
        }

        let rules = provider.load(&host.hostname);
        let mut state = host.state_mut();
        state.rules = rules;
        link_rules(&mut state);
        tracing::info!(host = %host.hostname, rules = state.rules.len(), "health configuration reloaded");
    }

    /// Reload the health configuration of every host.
    pub fn reload(&self, registry: &HostRegistry, provider: &dyn RuleProvider) {
        for host in registry.hosts() {
            if !host.health_enabled {
                continue;
            }
            self.reload_host(&host, provider);
        }
    }

    fn sleep_until(&self, next_run: i64) {
        // short slices so shutdown stays prompt
        while !self.exit.load(Ordering::Relaxed) {
            let now = unix_now();
            if now >= next_run {
                break;
            }
            let slice = (next_run - now).min(1) as u64;
            std::thread::sleep(std::time::Duration::from_secs(slice));
        }
    }
}

/// Pull the rule's value from the metric store, flagging failures and
/// null windows.
fn lookup_value(rule: &mut AlarmRule, hostname: &str) {
    let Some(lookup) = rule.lookup.clone() else {
        return;
    };
    let Some(chart) = rule.chart_ref.clone() else {
        return;
    };

    let request = LookupRequest {
        dimensions: lookup.dimensions.as_deref(),
        points: 1,
        after: lookup.after,
        before: lookup.before,
        group: &lookup.group,
        options: lookup.options,
    };

    match chart.query(&request) {
        Ok(result) => {
            rule.flags.db_error = false;
            rule.db_after = result.db_after;
            rule.db_before = result.db_before;

            if result.value_is_null {
                rule.value = f64::NAN;
                rule.flags.db_nan = true;
                tracing::debug!(
                    host = hostname,
                    chart = %rule.chart,
                    alarm = %rule.name,
                    "database lookup returned an empty value"
                );
            } else {
                rule.value = result.value;
                rule.flags.db_nan = false;
            }
        }
        Err(e) => {
            rule.value = f64::NAN;
            rule.flags.db_error = true;
            tracing::debug!(
                host = hostname,
                chart = %rule.chart,
                alarm = %rule.name,
                error = %e,
                "database lookup failed"
            );
        }
    }
}

/// Build one event from the current state of a rule, claiming the next
/// host-monotonic id and the rule's next per-alarm event id.
pub(crate) fn create_event(
    log: &AlarmLog,
    rule: &mut AlarmRule,
    now: i64,
    old_status: AlarmStatus,
    new_status: AlarmStatus,
) -> AlarmEvent {
    let alarm_event_id = rule.next_event_id;
    rule.next_event_id += 1;

    let duration = now - rule.last_status_change;
    let non_clear_duration = if old_status.is_raised() { duration } else { 0 };

    let (chart, family) = match rule.chart_ref.as_deref() {
        Some(c) => (c.id().to_string(), c.family().to_string()),
        None => (rule.chart.clone(), String::new()),
    };

    AlarmEvent {
        unique_id: log.next_unique_id(),
        alarm_id: rule.id,
        alarm_event_id,
        when: now,
        name: rule.name.clone(),
        chart,
        family,
        exec: rule.exec.clone(),
        recipient: rule.recipient.clone(),
        duration,
        non_clear_duration,
        old_value: rule.old_value,
        new_value: rule.value,
        old_value_string: format_value_string(rule.old_value, &rule.units),
        new_value_string: format_value_string(rule.value, &rule.units),
        old_status,
        new_status,
        source: rule.source.clone(),
        units: rule.units.clone(),
        info: rule.info.clone(),
        delay: rule.delay_last,
        delay_up_to_timestamp: now + rule.delay_last,
        flags: EventFlags {
            silenced: rule.flags.silenced,
            no_clear_notification: rule.no_clear_notification,
            ..EventFlags::default()
        },
        exec_run_timestamp: 0,
        exec_code: 0,
        last_repeat: 0,
    }
}

pub(crate) fn unix_now() -> i64 {
    Utc::now().timestamp()
}

fn realtime_usec() -> u64 {
    Utc::now().timestamp_micros().max(0) as u64
}

fn monotonic_usec() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_micros() as u64
}
