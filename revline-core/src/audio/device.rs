//! Audio output device enumeration.

use serde::{Deserialize, Serialize};

/// Metadata about an audio output device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    /// Whether this is the system default output device.
    pub is_default: bool,
}

/// Whether a reported device name satisfies a user preference.
///
/// Case-insensitive and whitespace-tolerant. A blank preference matches nothing.
pub fn matches_preference(device_name: &str, preferred: &str) -> bool {
    let preferred = preferred.trim();
    !preferred.is_empty() && device_name.trim().eq_ignore_ascii_case(preferred)
}

/// Enumerate output devices available on the default host, default first.
///
/// Returns an empty `Vec` if cpal is not available or no devices exist.
#[cfg(feature = "audio-cpal")]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    match host.output_devices() {
        Ok(devices) => {
            let mut list = devices
                .enumerate()
                .map(|(idx, device)| {
                    let name = device
                        .name()
                        .unwrap_or_else(|_| format!("Output Device {}", idx + 1));
                    let is_default = default_name.as_deref() == Some(name.as_str());
                    DeviceInfo { name, is_default }
                })
                .collect::<Vec<_>>();
            sort_default_first(&mut list);
            list
        }
        Err(e) => {
            tracing::warn!("failed to enumerate output devices: {e}");
            default_name
                .map(|name| vec![DeviceInfo { name, is_default: true }])
                .unwrap_or_default()
        }
    }
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    vec![]
}

fn sort_default_first(list: &mut [DeviceInfo]) {
    list.sort_by_key(|d| (!d.is_default, d.name.to_ascii_lowercase()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preference_match_ignores_case_and_padding() {
        assert!(matches_preference("Speakers (Realtek Audio)", "speakers (realtek audio)"));
        assert!(matches_preference("  USB DAC ", "USB DAC"));
        assert!(!matches_preference("USB DAC", "USB"));
        assert!(!matches_preference("USB DAC", "   "));
    }

    #[test]
    fn default_device_sorts_first() {
        let mut list = vec![
            DeviceInfo { name: "b".into(), is_default: false },
            DeviceInfo { name: "Z".into(), is_default: true },
            DeviceInfo { name: "A".into(), is_default: false },
        ];
        sort_default_first(&mut list);
        let names: Vec<_> = list.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["Z", "A", "b"]);
    }
}
