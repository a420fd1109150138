use serde::{Deserialize, Serialize};

/// Status of an alarm rule. The numeric ordering is significant: anything
/// below `Clear` is an internal status that never reaches the notifier, and
/// escalation is defined as moving to a higher variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlarmStatus {
    Removed,
    Undefined,
    Uninitialized,
    Unknown,
    Clear,
    Warning,
    Critical,
}

impl AlarmStatus {
    /// Internal statuses are bookkeeping states that must not be notified.
    pub fn is_internal(self) -> bool {
        self < AlarmStatus::Clear
    }

    pub fn is_raised(self) -> bool {
        matches!(self, AlarmStatus::Warning | AlarmStatus::Critical)
    }
}

impl std::fmt::Display for AlarmStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlarmStatus::Removed => write!(f, "REMOVED"),
            AlarmStatus::Undefined => write!(f, "UNDEFINED"),
            AlarmStatus::Uninitialized => write!(f, "UNINITIALIZED"),
            AlarmStatus::Unknown => write!(f, "UNKNOWN"),
            AlarmStatus::Clear => write!(f, "CLEAR"),
            AlarmStatus::Warning => write!(f, "WARNING"),
            AlarmStatus::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl std::str::FromStr for AlarmStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "REMOVED" => Ok(AlarmStatus::Removed),
            "UNDEFINED" => Ok(AlarmStatus::Undefined),
            "UNINITIALIZED" => Ok(AlarmStatus::Uninitialized),
            "UNKNOWN" => Ok(AlarmStatus::Unknown),
            "CLEAR" => Ok(AlarmStatus::Clear),
            "WARNING" => Ok(AlarmStatus::Warning),
            "CRITICAL" => Ok(AlarmStatus::Critical),
            _ => Err(format!("unknown alarm status: {s}")),
        }
    }
}

/// Outcome of mapping one expression result to a status, before the
/// warning and critical outcomes are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueStatus {
    Undefined,
    Clear,
    Raised,
}

/// Per-event flags. Mutated only by the evaluation worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFlags {
    /// The dispatcher has looked at this event.
    pub processed: bool,
    /// Superseded by a config reload; never notify.
    pub updated: bool,
    /// The notifier was spawned for this event.
    pub exec_run: bool,
    /// The notifier exited nonzero.
    pub exec_failed: bool,
    /// Notifications were silenced when the event was born.
    pub silenced: bool,
    /// Clear transitions of this alarm are not notified, and the
    /// prior-notification dedup scan is skipped.
    pub no_clear_notification: bool,
}

/// One record in a host's alarm event log: a status transition (or a
/// repeat tick) of a single alarm, immutable except for its flags and
/// notifier bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmEvent {
    /// Host-monotonic id; strictly increasing per append.
    pub unique_id: u32,
    /// Stable across all events of one logical alarm.
    pub alarm_id: u32,
    /// Monotonic per alarm.
    pub alarm_event_id: u32,
    pub when: i64,
    pub name: String,
    pub chart: String,
    pub family: String,
    pub exec: Option<String>,
    pub recipient: Option<String>,
    /// Seconds spent in the prior status.
    pub duration: i64,
    /// Seconds spent in the prior status, when that status was raised.
    pub non_clear_duration: i64,
    pub old_value: f64,
    pub new_value: f64,
    pub old_value_string: String,
    pub new_value_string: String,
    pub old_status: AlarmStatus,
    pub new_status: AlarmStatus,
    pub source: String,
    pub units: String,
    pub info: String,
    /// Hysteresis delay that was in force when the event was born.
    pub delay: i64,
    /// Notifications wait until this instant.
    pub delay_up_to_timestamp: i64,
    pub flags: EventFlags,
    pub exec_run_timestamp: i64,
    pub exec_code: i32,
    pub last_repeat: i64,
}

/// Render a value the way the notifier argv wants raw numbers: zero
/// decimals, `nan` for unset.
pub fn format_value_zero(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else {
        format!("{value:.0}")
    }
}

/// Human-readable `"<value> <units>"` string, `-` when the value is unset.
pub fn format_value_string(value: f64, units: &str) -> String {
    if value.is_nan() {
        return "-".to_string();
    }
    if units.is_empty() {
        format!("{value:.1}")
    } else {
        format!("{value:.1} {units}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_ordering_matches_escalation() {
        assert!(AlarmStatus::Removed < AlarmStatus::Undefined);
        assert!(AlarmStatus::Undefined < AlarmStatus::Uninitialized);
        assert!(AlarmStatus::Uninitialized < AlarmStatus::Unknown);
        assert!(AlarmStatus::Unknown < AlarmStatus::Clear);
        assert!(AlarmStatus::Clear < AlarmStatus::Warning);
        assert!(AlarmStatus::Warning < AlarmStatus::Critical);
    }

    #[test]
    fn internal_statuses_are_below_clear() {
        assert!(AlarmStatus::Undefined.is_internal());
        assert!(AlarmStatus::Removed.is_internal());
        assert!(!AlarmStatus::Clear.is_internal());
        assert!(!AlarmStatus::Critical.is_internal());
    }

    #[test]
    fn status_round_trips_through_strings() {
        for s in [
            AlarmStatus::Removed,
            AlarmStatus::Undefined,
            AlarmStatus::Uninitialized,
            AlarmStatus::Unknown,
            AlarmStatus::Clear,
            AlarmStatus::Warning,
            AlarmStatus::Critical,
        ] {
            assert_eq!(s.to_string().parse::<AlarmStatus>(), Ok(s));
        }
    }

    #[test]
    fn value_strings() {
        assert_eq!(format_value_string(f64::NAN, "%"), "-");
        assert_eq!(format_value_string(85.25, "%"), "85.2 %");
        assert_eq!(format_value_string(3.0, ""), "3.0");
        assert_eq!(format_value_zero(85.6), "86");
        assert_eq!(format_value_zero(f64::NAN), "nan");
    }
}
