//! Inference device identifiers.
//!
//! A device is either a single tag from `ACCEPTED_DEVICES` or a composite
//! `MULTI:<dev1>,<dev2>,...` whose members are all accepted tags.

use std::str::FromStr;

use crate::error::NotifierError;

/// Device tags accepted on their own or as `MULTI:` members.
pub const ACCEPTED_DEVICES: &[&str] = &["CPU", "GPU", "MYRIAD", "HETERO:FPGA,CPU", "HDDL"];

const MULTI_PREFIX: &str = "MULTI:";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Device {
    Single(String),
    Multi(Vec<String>),
}

impl Device {
    /// Tags this device may run on.
    pub fn members(&self) -> Vec<&str> {
        match self {
            Self::Single(tag) => vec![tag.as_str()],
            Self::Multi(tags) => tags.iter().map(String::as_str).collect(),
        }
    }

    /// True when `tag` is this device or one of its `MULTI:` members.
    pub fn includes(&self, tag: &str) -> bool {
        self.members().iter().any(|m| *m == tag)
    }
}

impl FromStr for Device {
    type Err = NotifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let unsupported = || NotifierError::Configuration(format!("Unsupported device: {}", raw));

        if let Some(list) = raw.strip_prefix(MULTI_PREFIX) {
            let members: Vec<String> = list
                .split(',')
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect();
            if members.is_empty() || !members.iter().all(|m| ACCEPTED_DEVICES.contains(&m.as_str())) {
                return Err(unsupported());
            }
            return Ok(Self::Multi(members));
        }

        if ACCEPTED_DEVICES.contains(&raw) {
            Ok(Self::Single(raw.to_string()))
        } else {
            Err(unsupported())
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single(tag) => write!(f, "{}", tag),
            Self::Multi(tags) => write!(f, "{}{}", MULTI_PREFIX, tags.join(",")),
        }
    }
}
