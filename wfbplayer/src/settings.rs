//! Réglages du contrôleur et du miroir vidéo

use std::time::Duration;

/// Délais avant chaque nouvelle tentative, en millisecondes
pub const DEFAULT_RETRY_DELAYS_MS: [u64; 3] = [400, 1200, 2500];

/// Délai avant la tentative `attempt` (à partir de 1) ; `None` au-delà de la borne
pub fn retry_delay(attempt: u32, delays: &[Duration]) -> Option<Duration> {
    attempt
        .checked_sub(1)
        .and_then(|index| delays.get(index as usize))
        .copied()
}

#[derive(Debug, Clone)]
pub struct PlayerSettings {
    /// Un délai par tentative ; leur nombre borne les tentatives
    pub retry_delays: Vec<Duration>,
    pub fade_out: Duration,
    pub fade_steps: u32,
    /// Cadence d'échantillonnage de la position pendant la lecture
    pub position_interval: Duration,
    /// Volume initial, en pourcentage
    pub default_volume: u8,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            retry_delays: DEFAULT_RETRY_DELAYS_MS
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
            fade_out: Duration::from_millis(300),
            fade_steps: 10,
            position_interval: Duration::from_millis(250),
            default_volume: 80,
        }
    }
}

impl PlayerSettings {
    pub fn max_retries(&self) -> u32 {
        self.retry_delays.len() as u32
    }
}

#[derive(Debug, Clone)]
pub struct VideoSettings {
    /// Écart toléré entre vidéo et audio avant recalage
    pub drift_threshold: Duration,
    pub sync_interval: Duration,
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
    pub max_backend_retries: u32,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            drift_threshold: Duration::from_millis(1200),
            sync_interval: Duration::from_millis(1000),
            poll_interval: Duration::from_millis(500),
            max_poll_attempts: 240,
            max_backend_retries: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_is_bounded() {
        let delays = PlayerSettings::default().retry_delays;
        assert_eq!(retry_delay(0, &delays), None);
        assert_eq!(retry_delay(1, &delays), Some(Duration::from_millis(400)));
        assert_eq!(retry_delay(2, &delays), Some(Duration::from_millis(1200)));
        assert_eq!(retry_delay(3, &delays), Some(Duration::from_millis(2500)));
        assert_eq!(retry_delay(4, &delays), None);
    }
}
