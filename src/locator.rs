//! Channel window locator.
//!
//! Finds the 50-channel extraction window centred on the channel whose
//! frequency is closest to a line's rest frequency. The frequency axis is
//! synthetic: `freq[i] = channel0 + step * i`, with the sign of `step`
//! encoding the scan direction.

use crate::error::LocatorError;
use crate::lines::LineParams;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Channels extracted either side of the best-matching channel
pub const HALF_WIDTH: i64 = 25;

/// Starting value of the running minimum difference, in GHz. If no channel
/// gets closer than this, channel 0 is reported.
pub const MIN_DIFF_SENTINEL_GHZ: f64 = 1.0;

/// Regularly sampled frequency axis of the full spectral cube.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyAxis {
    /// Number of channels in the cube
    pub channel_count: i64,
    /// GHz per channel; negative when frequency falls with index
    pub channel_step: f64,
    /// Frequency of channel 0 in GHz
    pub channel0_freq: f64,
}

impl FrequencyAxis {
    pub fn new(channel_count: i64, channel_step: f64, channel0_freq: f64) -> Self {
        Self {
            channel_count,
            channel_step,
            channel0_freq,
        }
    }

    /// Axis for a catalog line: unsigned channel width times the line's direction.
    pub fn for_line(line: &LineParams, channel_count: i64, channel_width: f64) -> Self {
        Self::new(
            channel_count,
            channel_width * f64::from(line.chan_dir),
            line.chan0,
        )
    }

    /// Frequency of channel `index` in GHz
    pub fn frequency(&self, index: i64) -> f64 {
        self.channel0_freq + self.channel_step * index as f64
    }
}

/// Channel bounds handed to the extraction step, `end == start + 50`.
///
/// Not clamped to the cube: a target near the band edge yields negative or
/// past-the-end indices, which are passed through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelWindow {
    pub start: i64,
    pub end: i64,
}

impl ChannelWindow {
    pub fn around(center: i64) -> Self {
        Self {
            start: center - HALF_WIDTH,
            end: center + HALF_WIDTH,
        }
    }

    pub fn width(&self) -> i64 {
        self.end - self.start
    }

    pub fn center(&self) -> i64 {
        self.start + HALF_WIDTH
    }

    /// True if both bounds fall inside `[0, channel_count)`
    pub fn fits_within(&self, channel_count: i64) -> bool {
        self.start >= 0 && self.end < channel_count
    }

    /// Spectral-window selection string, e.g. `*:1895~1945`
    pub fn spw_selection(&self) -> String {
        format!("*:{}~{}", self.start, self.end)
    }
}

impl fmt::Display for ChannelWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Locate the window around the channel nearest to `target_freq`.
///
/// Channels are scanned in increasing index order and the best index only
/// moves on a strict improvement, so exact ties resolve to the lowest index.
pub fn locate(axis: &FrequencyAxis, target_freq: f64) -> Result<ChannelWindow, LocatorError> {
    if axis.channel_count <= 0 {
        return Err(LocatorError::InvalidChannelCount {
            count: axis.channel_count,
        });
    }

    let mut best = 0;
    let mut min_diff = MIN_DIFF_SENTINEL_GHZ;
    for i in 0..axis.channel_count {
        let diff = (axis.frequency(i) - target_freq).abs();
        if diff < min_diff {
            min_diff = diff;
            best = i;
        }
    }

    Ok(ChannelWindow::around(best))
}

/// Locate the window for a catalog line, optionally targeting a different
/// rest frequency than the catalog value.
pub fn locate_for_line(
    line: &LineParams,
    channel_count: i64,
    channel_width: f64,
    restfreq_override: Option<f64>,
) -> Result<ChannelWindow, LocatorError> {
    let axis = FrequencyAxis::for_line(line, channel_count, channel_width);
    let target = restfreq_override.unwrap_or(line.restfreq);
    let window = locate(&axis, target)?;

    if !window.fits_within(channel_count) {
        tracing::warn!(
            %window,
            channel_count,
            "Channel window extends past the edge of the cube"
        );
    }

    Ok(window)
}
