//! Output device discovery and selection on top of CPAL.

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

use super::SampleFormat;

/// Pick the first output device whose name contains `needle` (case-insensitive),
/// or the host default when `needle` is `None`.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    if let Some(needle) = needle {
        let mut devices = host.output_devices().context("no output devices")?;
        return devices
            .find(|d| {
                d.description()
                    .map(|desc| matches_device_name(&desc.name(), needle))
                    .unwrap_or(false)
            })
            .ok_or_else(|| anyhow!("no output device matched: {needle}"));
    }
    host.default_output_device()
        .ok_or_else(|| anyhow!("no default output device"))
}

/// Choose the output config closest to `target_rate` and `channels`.
///
/// Ranking: configs that can hit the target rate exactly, then matching channel
/// count, then the preferred sample format, then CPAL's general format order.
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: u32,
    channels: u16,
    preferred: SampleFormat,
) -> Result<cpal::SupportedStreamConfig> {
    let mut best: Option<(Candidate, cpal::SupportedStreamConfig)> = None;
    for range in device
        .supported_output_configs()
        .context("query output configs")?
    {
        let rate = pick_rate_for_range(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let candidate = Candidate {
            exact_rate: rate == target_rate,
            rate_distance: rate.abs_diff(target_rate),
            channels_match: range.channels() == channels,
            format_rank: sample_format_rank(range.sample_format(), preferred),
        };
        let replace = best
            .as_ref()
            .is_none_or(|(current, _)| candidate.is_better_than(current));
        if replace {
            best = Some((candidate, range.with_sample_rate(rate)));
        }
    }
    best.map(|(_, cfg)| cfg)
        .ok_or_else(|| anyhow!("no supported output configs"))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Candidate {
    exact_rate: bool,
    rate_distance: u32,
    channels_match: bool,
    format_rank: u8,
}

impl Candidate {
    fn is_better_than(&self, other: &Candidate) -> bool {
        if self.exact_rate != other.exact_rate {
            return self.exact_rate;
        }
        if self.rate_distance != other.rate_distance {
            return self.rate_distance < other.rate_distance;
        }
        if self.channels_match != other.channels_match {
            return self.channels_match;
        }
        self.format_rank < other.format_rank
    }
}

fn pick_rate_for_range(min: u32, max: u32, target: u32) -> u32 {
    target.clamp(min, max.max(min))
}

fn sample_format_rank(format: cpal::SampleFormat, preferred: SampleFormat) -> u8 {
    let wanted = match preferred {
        SampleFormat::I16 => cpal::SampleFormat::I16,
        SampleFormat::F32 => cpal::SampleFormat::F32,
    };
    if format == wanted {
        return 0;
    }
    match format {
        cpal::SampleFormat::F32 => 1,
        cpal::SampleFormat::I32 => 2,
        cpal::SampleFormat::I16 => 3,
        cpal::SampleFormat::U16 => 4,
        _ => 10,
    }
}

/// Output device summary for `--list-devices`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub min_rate: u32,
    pub max_rate: u32,
    pub is_default: bool,
}

pub fn list_devices(host: &cpal::Host) -> Result<Vec<DeviceInfo>> {
    let default_name = host
        .default_output_device()
        .and_then(|d| d.description().ok())
        .map(|desc| desc.name().to_string());

    let mut out = Vec::new();
    for device in host.output_devices().context("no output devices")? {
        let name = match device.description() {
            Ok(desc) => desc.name().to_string(),
            Err(e) => {
                tracing::debug!("skipping unnamed device: {e}");
                continue;
            }
        };
        let (min_rate, max_rate) = match device.supported_output_configs() {
            Ok(ranges) => ranges.fold((u32::MAX, 0), |(lo, hi), r| {
                (lo.min(r.min_sample_rate()), hi.max(r.max_sample_rate()))
            }),
            Err(_) => (u32::MAX, 0),
        };
        if max_rate == 0 || min_rate > max_rate {
            tracing::warn!(device = %name, "skipping device with no usable sample rates");
            continue;
        }
        out.push(DeviceInfo {
            is_default: default_name.as_deref() == Some(name.as_str()),
            name,
            min_rate,
            max_rate,
        });
    }
    Ok(out)
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}
