//! Silencer ruleset: pattern matchers the control API installs to disable
//! evaluation or suppress notifications for matching alarms.

use crate::error::SilencersError;
use crate::rule::AlarmRule;
use glob_match::glob_match;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Upper bound on the silencers file, matching what the control API writes.
pub const SILENCERS_MAX_FILE_LEN: u64 = 10_000;

/// Effect a matching silencer has on a rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SilenceType {
    /// A match with no command in force; inert.
    #[default]
    #[serde(rename = "NONE", alias = "None")]
    None,
    /// Matching rules are not evaluated at all.
    #[serde(rename = "DISABLE")]
    DisableAlarms,
    /// Matching rules are evaluated but their notifications are dropped.
    #[serde(rename = "SILENCE")]
    SilenceNotifications,
}

/// One matcher. Absent patterns are wildcards; a matcher matches a rule
/// only when every pattern it defines matches the corresponding attribute.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Silencer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alarm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
}

impl Silencer {
    pub fn matches(&self, rule: &AlarmRule, hostname: &str) -> bool {
        pattern_matches(&self.alarm, Some(&rule.name))
            && pattern_matches(&self.context, rule.context())
            && pattern_matches(&self.host, Some(hostname))
            && pattern_matches(&self.chart, Some(&rule.chart))
            && pattern_matches(&self.family, rule.family())
    }
}

/// A defined pattern against a missing attribute never matches.
fn pattern_matches(pattern: &Option<String>, value: Option<&str>) -> bool {
    match pattern {
        None => true,
        Some(p) => value.is_some_and(|v| glob_match(p, v)),
    }
}

/// The full ruleset: ordered matchers plus the global command in force.
/// Replaced atomically (as a value) by the control API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Silencers {
    /// Apply `stype` to every alarm, ignoring the matcher list.
    #[serde(rename = "all", default)]
    pub all_alarms: bool,
    #[serde(rename = "type", default)]
    pub stype: SilenceType,
    #[serde(default)]
    pub silencers: Vec<Silencer>,
}

/// Walk the matcher list in order; the first match decides. No match (or a
/// match while no command is in force) leaves the rule untouched.
pub fn check_silenced(rule: &AlarmRule, hostname: &str, silencers: &Silencers) -> SilenceType {
    for silencer in &silencers.silencers {
        if silencer.matches(rule, hostname) {
            if silencers.stype == SilenceType::None {
                tracing::debug!(
                    alarm = %rule.name,
                    "alarm matches a silencer entry, but no silence or disable command is in force"
                );
            }
            return silencers.stype;
        }
    }
    SilenceType::None
}

/// Recompute the `Disabled`/`Silenced` flags of a rule from the current
/// ruleset. Returns whether the rule is now disabled, in which case the
/// caller skips it entirely.
pub fn update_disabled_silenced(rule: &mut AlarmRule, hostname: &str, silencers: &Silencers) -> bool {
    let old = rule.flags;
    rule.flags.disabled = false;
    rule.flags.silenced = false;

    let stype = if silencers.all_alarms {
        silencers.stype
    } else {
        check_silenced(rule, hostname, silencers)
    };

    match stype {
        SilenceType::DisableAlarms => rule.flags.disabled = true,
        SilenceType::SilenceNotifications => rule.flags.silenced = true,
        SilenceType::None => {}
    }

    if old.disabled != rule.flags.disabled || old.silenced != rule.flags.silenced {
        tracing::info!(
            host = hostname,
            alarm = %rule.name,
            disabled = rule.flags.disabled,
            silenced = rule.flags.silenced,
            "alarm silencing changed"
        );
    }

    rule.flags.disabled
}

/// Read the silencer ruleset the control API persisted. Errors leave the
/// engine running with an empty ruleset.
pub fn load_silencers(path: &Path, max_len: u64) -> Silencers {
    match read_silencers_file(path, max_len) {
        Ok(silencers) => {
            tracing::info!(file = %path.display(), entries = silencers.silencers.len(), "parsed health silencers file");
            silencers
        }
        Err(e) => {
            tracing::error!(file = %path.display(), error = %e, "cannot load health silencers file");
            Silencers::default()
        }
    }
}

fn read_silencers_file(path: &Path, max_len: u64) -> Result<Silencers, SilencersError> {
    let size = std::fs::metadata(path)?.len();
    if size == 0 || size > max_len {
        return Err(SilencersError::OutOfRange { size, max: max_len });
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}
