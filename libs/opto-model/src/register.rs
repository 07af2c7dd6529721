//! Register specifications.
//!
//! A [`RegisterSpec`] describes one addressable data point on the heating
//! unit: where to read it, how many bytes it spans, and how to turn the raw
//! bytes into an engineering value. The ordered register list in the device
//! configuration fixes the column order of every log row, and a register's
//! index within that list is its identity for alarm tracking.

use serde::{Deserialize, Deserializer, Serialize};

/// How the raw register value is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueFormat {
    /// Scale by `10^decimal_places` and render as a plain decimal string.
    #[default]
    Default,
    /// Interpret the raw count as tenths of seconds and render `" H:MM:SS"`.
    Hhmmss,
}

/// Specification of a single device register.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterSpec {
    /// Display label; also the log column header. Optional.
    #[serde(default)]
    pub label: Option<String>,

    /// Register address. Accepts a number, a decimal string, or a
    /// `0x`-prefixed hex string in configuration files.
    #[serde(deserialize_with = "deserialize_address")]
    pub address: u16,

    /// Response length in bytes.
    #[serde(default = "default_byte_length")]
    pub byte_length: usize,

    /// Decimal places the raw integer is scaled down by.
    #[serde(default = "default_decimal_places")]
    pub decimal_places: u32,

    /// Rendering format for the decoded value.
    #[serde(default)]
    pub format: ValueFormat,

    /// Upper alarm threshold; alarm is active while `value >= alarm_hi`.
    #[serde(default)]
    pub alarm_hi: Option<f64>,

    /// Consecutive crossing samples required before the "coming" mail.
    #[serde(default)]
    pub alarm_hi_delay_count: u32,

    /// Lower alarm threshold; alarm is active while `value <= alarm_lo`.
    #[serde(default)]
    pub alarm_lo: Option<f64>,

    /// Consecutive crossing samples required before the "coming" mail.
    #[serde(default)]
    pub alarm_lo_delay_count: u32,

    /// Chart the value is plotted on, if any. Display metadata only.
    #[serde(default)]
    pub chart: Option<String>,

    /// Chart axis assignment. Display metadata only.
    #[serde(default)]
    pub chart_axis: Option<String>,
}

fn default_byte_length() -> usize {
    2
}

fn default_decimal_places() -> u32 {
    1
}

impl RegisterSpec {
    /// Column header for this register: the label with tabs replaced by `?`,
    /// or `0x<ADDR>` when no label is configured.
    pub fn column_label(&self) -> String {
        match self.label.as_deref() {
            Some(label) if !label.is_empty() => label.replace('\t', "?"),
            _ => format!("0x{:X}", self.address),
        }
    }

    /// Whether any alarm threshold is configured for this register.
    pub fn has_alarm(&self) -> bool {
        self.alarm_hi.is_some() || self.alarm_lo.is_some()
    }
}

/// Accepts `2050`, `"2050"` and `"0x0802"` as register addresses.
fn deserialize_address<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u16),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => parse_address(&s).map_err(serde::de::Error::custom),
    }
}

/// Parse a register address from its configuration form.
pub fn parse_address(text: &str) -> Result<u16, String> {
    let text = text.trim();
    let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u16::from_str_radix(hex, 16)
    } else {
        text.parse::<u16>()
    };
    parsed.map_err(|_| format!("invalid register address '{text}'"))
}
