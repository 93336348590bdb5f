//! Extension pour lire les sections `player` et `video` de wfbconfig

use crate::settings::{PlayerSettings, VideoSettings, DEFAULT_RETRY_DELAYS_MS};
use std::time::Duration;
use wfbconfig::Config;

/// Trait d'extension pour les réglages du lecteur
///
/// ```rust,ignore
/// use wfbconfig::get_config;
/// use wfbplayer::PlayerConfigExt;
///
/// let settings = get_config().get_player_settings();
/// ```
pub trait PlayerConfigExt {
    fn get_player_settings(&self) -> PlayerSettings;
    fn get_video_settings(&self) -> VideoSettings;
}

impl PlayerConfigExt for Config {
    fn get_player_settings(&self) -> PlayerSettings {
        let defaults = PlayerSettings::default();
        let retry_delays: Vec<u64> =
            self.get_or(&["player", "retry_delays_ms"], DEFAULT_RETRY_DELAYS_MS.to_vec());
        let default_volume = self.get_u64_or(
            &["player", "default_volume"],
            u64::from(defaults.default_volume),
        );

        PlayerSettings {
            retry_delays: retry_delays.into_iter().map(Duration::from_millis).collect(),
            fade_out: Duration::from_millis(self.get_u64_or(&["player", "fade_out_ms"], 300)),
            fade_steps: self.get_u64_or(&["player", "fade_steps"], 10) as u32,
            position_interval: Duration::from_millis(
                self.get_u64_or(&["player", "position_interval_ms"], 250).max(10),
            ),
            default_volume: default_volume.min(150) as u8,
        }
    }

    fn get_video_settings(&self) -> VideoSettings {
        let defaults = VideoSettings::default();
        VideoSettings {
            drift_threshold: Duration::from_secs_f64(
                self.get_f64_or(
                    &["video", "drift_threshold_secs"],
                    defaults.drift_threshold.as_secs_f64(),
                )
                .max(0.0),
            ),
            sync_interval: Duration::from_millis(
                self.get_u64_or(&["video", "sync_interval_ms"], 1000).max(10),
            ),
            poll_interval: Duration::from_millis(
                self.get_u64_or(&["video", "poll_interval_ms"], 500).max(10),
            ),
            max_poll_attempts: self.get_u64_or(
                &["video", "max_poll_attempts"],
                u64::from(defaults.max_poll_attempts),
            ) as u32,
            max_backend_retries: self.get_u64_or(
                &["video", "max_backend_retries"],
                u64::from(defaults.max_backend_retries),
            ) as u32,
        }
    }
}
