//! Notifier config document
//!
//! The JSON document shared between the controller, the remote backend and
//! the user-facing notifier. Field names are part of the on-disk contract.

use chrono::{DateTime, Local, NaiveDateTime, SecondsFormat, TimeZone};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// `scheduled_time` wire format (local time)
pub const SCHEDULE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Message shown to the user when nothing else was configured
pub const DEFAULT_CUSTOM_MESSAGE: &str = "Reboot required to complete important updates.";

/// Delays granted to the user in a fresh document
pub const DEFAULT_DELAY_COUNTER: i64 = 3;

pub const FORCE_REBOOT: &str = "Force reboot after patch deployment";
pub const GRACEFUL_REBOOT: &str = "Graceful reboot";
pub const SCHEDULE_REBOOT: &str = "Schedule reboot";
pub const NO_REBOOT: &str = "No reboot";

/// Reboot policy carried in `reboot_config`
///
/// Unrecognised values are kept verbatim so a newer backend can write them
/// without the controller clobbering the field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RebootPolicy {
    ForceReboot,
    GracefulReboot,
    ScheduleReboot,
    NoReboot,
    Other(String),
}

impl RebootPolicy {
    pub fn as_str(&self) -> &str {
        match self {
            Self::ForceReboot => FORCE_REBOOT,
            Self::GracefulReboot => GRACEFUL_REBOOT,
            Self::ScheduleReboot => SCHEDULE_REBOOT,
            Self::NoReboot => NO_REBOOT,
            Self::Other(raw) => raw,
        }
    }
}

impl Default for RebootPolicy {
    fn default() -> Self {
        Self::GracefulReboot
    }
}

impl From<String> for RebootPolicy {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            FORCE_REBOOT => Self::ForceReboot,
            GRACEFUL_REBOOT => Self::GracefulReboot,
            SCHEDULE_REBOOT => Self::ScheduleReboot,
            NO_REBOOT => Self::NoReboot,
            _ => Self::Other(raw),
        }
    }
}

impl From<&str> for RebootPolicy {
    fn from(raw: &str) -> Self {
        Self::from(raw.to_string())
    }
}

impl From<RebootPolicy> for String {
    fn from(policy: RebootPolicy) -> Self {
        match policy {
            RebootPolicy::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for RebootPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The persisted notifier document
///
/// Every modelled field reads `null` as its default, the way the backend
/// and the notifier app write unset values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    #[serde(deserialize_with = "null_as_default")]
    pub base_url: String,
    #[serde(deserialize_with = "null_as_default")]
    pub jump_host_base_url: String,
    #[serde(deserialize_with = "null_as_default")]
    pub task_scheduled: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub reboot_config: RebootPolicy,
    #[serde(deserialize_with = "null_as_default")]
    pub reboot_now: bool,
    /// `YYYY-MM-DD HH:MM:SS` local time, empty when not yet scheduled
    #[serde(deserialize_with = "null_as_default")]
    pub scheduled_time: String,
    #[serde(deserialize_with = "null_as_default")]
    pub patch_record_id_list: Vec<String>,
    /// XOR-obfuscated bearer token (see `obfuscation`)
    #[serde(deserialize_with = "null_as_default")]
    pub identifier: String,
    #[serde(deserialize_with = "null_as_default")]
    pub custom_message: String,
    /// Owned by the notifier surface; the controller only reads it
    #[serde(deserialize_with = "null_as_default")]
    pub delay_counter: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub asset: String,
    #[serde(deserialize_with = "null_as_default")]
    pub asset_type: String,
    #[serde(deserialize_with = "null_as_default")]
    pub last_updated: String,
    #[serde(deserialize_with = "null_as_default")]
    pub version: String,

    /// Keys written by other parties that this build does not model
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NotifierConfig {
    /// Document written when none exists on disk
    pub fn initial(version: &str) -> Self {
        Self {
            reboot_config: RebootPolicy::GracefulReboot,
            custom_message: DEFAULT_CUSTOM_MESSAGE.to_string(),
            delay_counter: DEFAULT_DELAY_COUNTER,
            version: version.to_string(),
            last_updated: timestamp_now(),
            ..Default::default()
        }
    }

    /// Refresh bookkeeping fields before a write
    pub fn stamp(&mut self, version: &str) {
        self.last_updated = timestamp_now();
        self.version = version.to_string();
    }
}

/// Partial update of the document; `None` leaves a field untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigPatch {
    pub base_url: Option<String>,
    pub jump_host_base_url: Option<String>,
    pub task_scheduled: Option<bool>,
    pub reboot_config: Option<RebootPolicy>,
    pub reboot_now: Option<bool>,
    pub scheduled_time: Option<String>,
    pub patch_record_id_list: Option<Vec<String>>,
    pub identifier: Option<String>,
    pub custom_message: Option<String>,
    pub delay_counter: Option<i64>,
    pub asset: Option<String>,
    pub asset_type: Option<String>,
}

impl ConfigPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Overlay every `Some` field onto `doc`
    pub fn apply_to(&self, doc: &mut NotifierConfig) {
        fn set<T: Clone>(slot: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *slot = v.clone();
            }
        }

        set(&mut doc.base_url, &self.base_url);
        set(&mut doc.jump_host_base_url, &self.jump_host_base_url);
        set(&mut doc.task_scheduled, &self.task_scheduled);
        set(&mut doc.reboot_config, &self.reboot_config);
        set(&mut doc.reboot_now, &self.reboot_now);
        set(&mut doc.scheduled_time, &self.scheduled_time);
        set(&mut doc.patch_record_id_list, &self.patch_record_id_list);
        set(&mut doc.identifier, &self.identifier);
        set(&mut doc.custom_message, &self.custom_message);
        set(&mut doc.delay_counter, &self.delay_counter);
        set(&mut doc.asset, &self.asset);
        set(&mut doc.asset_type, &self.asset_type);
    }
}

/// RFC 3339 local timestamp used for `last_updated`
pub fn timestamp_now() -> String {
    Local::now().to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// Parse a `scheduled_time` value
pub fn parse_schedule_time(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw.trim(), SCHEDULE_TIME_FORMAT).ok()
}

/// Format a local instant in the `scheduled_time` wire format
pub fn format_schedule_time<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: fmt::Display,
{
    at.format(SCHEDULE_TIME_FORMAT).to_string()
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
