//! Point-in-time view of a player for status queries.

use serde::Serialize;

use crate::audio::ControllerState;
use crate::state::PlaybackControl;

/// Serializable playback status.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub playing: bool,
    pub paused: bool,
    pub speed: f32,
    pub current_frame: i64,
    pub frame_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    pub position_ms: u64,
    /// Audio controller state, when audio is attached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
}

impl StatusSnapshot {
    /// Read every field of `control`; fields are sampled independently.
    pub fn capture(control: &PlaybackControl) -> Self {
        let dims = control.dimensions();
        Self {
            playing: control.is_playing(),
            paused: control.is_paused(),
            speed: control.speed(),
            current_frame: control.current_frame(),
            frame_rate: control.frame_rate(),
            width: dims.map(|(w, _)| w),
            height: dims.map(|(_, h)| h),
            position_ms: control.position_ms(),
            audio: None,
        }
    }

    pub fn with_audio(mut self, state: ControllerState) -> Self {
        self.audio = Some(format!("{state:?}").to_lowercase());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_reads_control() {
        let control = PlaybackControl::new(30.0);
        control.set_playing(true);
        control.set_speed(2.0);
        control.set_current_frame(42);
        control.set_dimensions(320, 240);

        let snap = StatusSnapshot::capture(&control);
        assert!(snap.playing);
        assert!(!snap.paused);
        assert_eq!(snap.speed, 2.0);
        assert_eq!(snap.current_frame, 42);
        assert_eq!(snap.frame_rate, 30.0);
        assert_eq!((snap.width, snap.height), (Some(320), Some(240)));
    }

    #[test]
    fn json_omits_unknown_geometry_and_audio() {
        let snap = StatusSnapshot::capture(&PlaybackControl::new(25.0));
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["playing"], false);
        assert_eq!(json["frame_rate"], 25.0);
        assert!(json.get("width").is_none());
        assert!(json.get("audio").is_none());
    }

    #[test]
    fn audio_state_is_lowercased() {
        let snap =
            StatusSnapshot::capture(&PlaybackControl::default()).with_audio(ControllerState::Paused);
        assert_eq!(snap.audio.as_deref(), Some("paused"));
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("\"audio\":\"paused\""));
    }
}
