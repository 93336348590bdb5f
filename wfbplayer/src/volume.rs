//! Volume, gain d'appoint et fondu

/// Volume maximal, en pourcentage
pub const MAX_VOLUME: i32 = 150;

/// Volume natif et gain d'appoint pour un pourcentage donné
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeLevels {
    /// 0.0 à 1.0
    pub native: f32,
    pub makeup_gain_db: f32,
}

pub fn clamp_volume(percent: i32) -> u8 {
    percent.clamp(0, MAX_VOLUME) as u8
}

/// Au-delà de 100 %, le volume natif reste à 1.0 et le surplus passe en gain
pub fn volume_levels(percent: u8) -> VolumeLevels {
    let percent = f32::from(percent.min(MAX_VOLUME as u8));
    if percent <= 100.0 {
        VolumeLevels {
            native: percent / 100.0,
            makeup_gain_db: 0.0,
        }
    } else {
        VolumeLevels {
            native: 1.0,
            makeup_gain_db: 20.0 * (percent / 100.0).log10(),
        }
    }
}

/// Gain linéaire correspondant à un gain en dB
pub fn db_to_linear(gain_db: f32) -> f32 {
    10f32.powf(gain_db / 20.0)
}

/// Paliers de volume d'un fondu de sortie, du premier pas jusqu'au silence
pub fn fade_steps(from: f32, steps: u32) -> Vec<f32> {
    let steps = steps.max(1);
    (1..=steps)
        .map(|i| from * (1.0 - i as f32 / steps as f32))
        .collect()
}
