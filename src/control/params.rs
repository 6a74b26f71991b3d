//! Operator form parsing. Every field is entered as text and validated here
//! before a session may start.

use crate::control::{Calibration, Thresholds};
use crate::drivers::ConfigError;
use crate::settings::{ChannelSettings, CyclerSettings};

/// Text fields for one DO channel plus its fixed wiring.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelForm {
    pub analog_input: u8,
    pub relay_bit: u8,
    pub v0: String,
    pub v100: String,
    pub low: String,
    pub high: String,
}

impl ChannelForm {
    pub fn from_settings(settings: &ChannelSettings) -> Self {
        Self {
            analog_input: settings.analog_input,
            relay_bit: settings.relay_bit,
            v0: settings.v0.to_string(),
            v100: settings.v100.to_string(),
            low: settings.low.to_string(),
            high: settings.high.to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChannelParams {
    pub analog_input: u8,
    pub relay_bit: u8,
    pub calibration: Calibration,
    pub thresholds: Thresholds,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CyclerForm {
    pub relay_bit: u8,
    pub on_secs: String,
    pub off_secs: String,
}

impl CyclerForm {
    pub fn from_settings(settings: &CyclerSettings) -> Self {
        Self {
            relay_bit: settings.relay_bit,
            on_secs: settings.on_secs.to_string(),
            off_secs: settings.off_secs.to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CyclerParams {
    pub relay_bit: u8,
    pub on_secs: u64,
    pub off_secs: u64,
}

fn parse_number(field: String, text: &str) -> Result<f64, ConfigError> {
    match text.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(ConfigError::NotNumeric {
            field,
            value: text.to_string(),
        }),
    }
}

/// Parses all channels. Every field must be numeric before calibration points
/// are checked, so a typo is always reported as such.
pub fn parse_channels(forms: &[ChannelForm]) -> Result<Vec<ChannelParams>, ConfigError> {
    if forms.is_empty() {
        return Err(ConfigError::NoChannels);
    }
    let raw = forms
        .iter()
        .enumerate()
        .map(|(i, form)| -> Result<_, ConfigError> {
            let n = i + 1;
            Ok((
                parse_number(format!("Ch{n} 0% voltage"), &form.v0)?,
                parse_number(format!("Ch{n} 100% voltage"), &form.v100)?,
                parse_number(format!("Ch{n} low threshold"), &form.low)?,
                parse_number(format!("Ch{n} high threshold"), &form.high)?,
            ))
        })
        .collect::<Result<Vec<_>, _>>()?;

    forms
        .iter()
        .zip(raw)
        .enumerate()
        .map(|(i, (form, (v0, v100, low, high)))| -> Result<_, ConfigError> {
            if low > high {
                log::warn!("Ch{}: low threshold {low} is above high threshold {high}", i + 1);
            }
            Ok(ChannelParams {
                analog_input: form.analog_input,
                relay_bit: form.relay_bit,
                calibration: Calibration::new(v0, v100, i + 1)?,
                thresholds: Thresholds { low, high },
            })
        })
        .collect()
}

pub fn parse_cycler(form: &CyclerForm) -> Result<CyclerParams, ConfigError> {
    let on = parse_number("Flushing period".into(), &form.on_secs)?;
    let off = parse_number("Closed period".into(), &form.off_secs)?;
    let whole = |field: &str, secs: f64| {
        if secs < 1.0 {
            Err(ConfigError::PeriodTooShort {
                field: field.to_string(),
            })
        } else {
            Ok(secs.trunc() as u64)
        }
    };
    Ok(CyclerParams {
        relay_bit: form.relay_bit,
        on_secs: whole("Flushing period", on)?,
        off_secs: whole("Closed period", off)?,
    })
}
