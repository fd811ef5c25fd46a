//! Audio stream properties.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Properties of the audio stream in a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioProperties {
    pub length: Duration,
    pub channels: u32,
    /// Samples per second.
    pub sample_rate: u32,
    /// Kilobits per second.
    pub bitrate: u32,
}

impl From<[u32; 4]> for AudioProperties {
    /// Guest layout: length in milliseconds, channels, sample rate, bitrate.
    fn from([length_ms, channels, sample_rate, bitrate]: [u32; 4]) -> Self {
        Self {
            length: Duration::from_millis(u64::from(length_ms)),
            channels,
            sample_rate,
            bitrate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_guest_words_in_order() {
        let props = AudioProperties::from([1000, 2, 48000, 1460]);
        assert_eq!(props.length, Duration::from_secs(1));
        assert_eq!(props.channels, 2);
        assert_eq!(props.sample_rate, 48000);
        assert_eq!(props.bitrate, 1460);
    }

    #[test]
    fn length_keeps_milliseconds() {
        let props = AudioProperties::from([1234, 1, 44100, 128]);
        assert_eq!(props.length.as_millis(), 1234);
    }
}
