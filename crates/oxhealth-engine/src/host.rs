//! Monitored hosts and the registry the evaluation loop walks.

use crate::log::AlarmLog;
use crate::rule::AlarmRule;
use crate::Chart;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Construction parameters of a [`Host`].
pub struct HostOptions {
    pub hostname: String,
    /// Name announced to the notifier; defaults to `hostname`.
    pub registry_hostname: Option<String>,
    pub health_enabled: bool,
    /// Default notifier executable for rules without an override.
    pub default_exec: String,
    /// Default recipient for rules without an override.
    pub default_recipient: String,
    /// Event log bound.
    pub log_max: usize,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            registry_hostname: None,
            health_enabled: true,
            default_exec: "alarm-notify.sh".to_string(),
            default_recipient: "root".to_string(),
            log_max: 1000,
        }
    }
}

/// Lock-protected health state of one host.
pub struct HostHealth {
    pub rules: Vec<AlarmRule>,
    pub charts: Vec<Arc<dyn Chart>>,
    /// Evaluation resumes at this instant; 0 when not postponed.
    pub delay_up_to: i64,
    /// Oldest event id the dispatcher still has to look at.
    pub last_processed_id: u32,
}

/// One monitored host: its rule set, its alarm log and its notifier
/// defaults.
pub struct Host {
    pub hostname: String,
    pub registry_hostname: String,
    pub health_enabled: bool,
    pub default_exec: String,
    pub default_recipient: String,
    pub log: AlarmLog,
    state: RwLock<HostHealth>,
}

impl Host {
    pub fn new(options: HostOptions) -> Arc<Self> {
        let registry_hostname = options
            .registry_hostname
            .unwrap_or_else(|| options.hostname.clone());
        Arc::new(Self {
            hostname: options.hostname,
            registry_hostname,
            health_enabled: options.health_enabled,
            default_exec: options.default_exec,
            default_recipient: options.default_recipient,
            log: AlarmLog::new(options.log_max),
            state: RwLock::new(HostHealth {
                rules: Vec::new(),
                charts: Vec::new(),
                delay_up_to: 0,
                last_processed_id: 0,
            }),
        })
    }

    pub fn state(&self) -> RwLockReadGuard<'_, HostHealth> {
        self.state.read().unwrap()
    }

    pub fn state_mut(&self) -> RwLockWriteGuard<'_, HostHealth> {
        self.state.write().unwrap()
    }

    /// Register a chart so rules can be linked to it by id.
    pub fn attach_chart(&self, chart: Arc<dyn Chart>) {
        self.state_mut().charts.push(chart);
    }

    /// Install a rule set, linking unbound rules to charts by id.
    pub fn set_rules(&self, rules: Vec<AlarmRule>) {
        let mut state = self.state_mut();
        state.rules = rules;
        link_rules(&mut state);
    }
}

/// Bind every unlinked rule to the chart whose id it names.
pub(crate) fn link_rules(state: &mut HostHealth) {
    for rule in state.rules.iter_mut() {
        if rule.chart_ref.is_none() {
            rule.chart_ref = state
                .charts
                .iter()
                .find(|c| c.id() == rule.chart)
                .cloned();
        }
    }
}

/// All monitored hosts. The evaluation loop takes a snapshot of the list
/// each iteration, so host insertion never blocks on a running pass.
#[derive(Default)]
pub struct HostRegistry {
    hosts: RwLock<Vec<Arc<Host>>>,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, host: Arc<Host>) {
        self.hosts.write().unwrap().push(host);
    }

    pub fn hosts(&self) -> Vec<Arc<Host>> {
        self.hosts.read().unwrap().clone()
    }
}
