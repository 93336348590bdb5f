//! Modèle de données partagé : plateformes, références de pistes, flux résolus

use crate::error::SourceError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Identifiant d'une plateforme de streaming
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformId {
    Netease,
    QQ,
    Kugou,
    Kuwo,
    Migu,
    Bilibili,
    Itunes,
    Local,
}

impl PlatformId {
    /// Toutes les plateformes, dans l'ordre de recherche par défaut
    pub const ALL: [PlatformId; 8] = [
        PlatformId::Netease,
        PlatformId::QQ,
        PlatformId::Kugou,
        PlatformId::Kuwo,
        PlatformId::Migu,
        PlatformId::Bilibili,
        PlatformId::Itunes,
        PlatformId::Local,
    ];

    /// Identifiant stable, utilisé dans les chemins du cache et le document bibliothèque
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformId::Netease => "netease",
            PlatformId::QQ => "qq",
            PlatformId::Kugou => "kugou",
            PlatformId::Kuwo => "kuwo",
            PlatformId::Migu => "migu",
            PlatformId::Bilibili => "bilibili",
            PlatformId::Itunes => "itunes",
            PlatformId::Local => "local",
        }
    }

    /// Nom affichable
    pub fn display_name(&self) -> &'static str {
        match self {
            PlatformId::Netease => "NetEase Cloud Music",
            PlatformId::QQ => "QQ Music",
            PlatformId::Kugou => "Kugou",
            PlatformId::Kuwo => "Kuwo",
            PlatformId::Migu => "Migu",
            PlatformId::Bilibili => "Bilibili",
            PlatformId::Itunes => "iTunes",
            PlatformId::Local => "Local",
        }
    }

    /// Extension du fichier audio mis en cache pour cette plateforme
    pub fn audio_extension(&self) -> &'static str {
        match self {
            PlatformId::Bilibili | PlatformId::Itunes => "m4a",
            _ => "mp3",
        }
    }
}

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformId {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        PlatformId::ALL
            .into_iter()
            .find(|p| p.as_str() == lower)
            .ok_or_else(|| SourceError::UnknownPlatform(s.to_string()))
    }
}

/// Identité stable d'un contenu sur une plateforme
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackRef {
    pub platform: PlatformId,
    pub track_id: String,
}

impl TrackRef {
    pub fn new(platform: PlatformId, track_id: impl Into<String>) -> Self {
        Self {
            platform,
            track_id: track_id.into(),
        }
    }
}

impl fmt::Display for TrackRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.platform, self.track_id)
    }
}

/// Métadonnées d'une piste telles que renvoyées par une recherche
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackMetadata {
    pub id: String,
    #[serde(rename = "source")]
    pub platform: PlatformId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
}

impl TrackMetadata {
    pub fn new(
        platform: PlatformId,
        id: impl Into<String>,
        title: impl Into<String>,
        artist: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            platform,
            title: title.into(),
            artist: artist.into(),
            album: None,
            duration_ms: None,
            cover_url: None,
            quality: None,
        }
    }

    pub fn track_ref(&self) -> TrackRef {
        TrackRef::new(self.platform, self.id.clone())
    }

    /// Durée en secondes, si connue et non nulle
    pub fn duration_secs(&self) -> Option<f64> {
        self.duration_ms
            .filter(|ms| *ms > 0)
            .map(|ms| ms as f64 / 1000.0)
    }
}

/// Descripteur de flux produit par une résolution réussie
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedStream {
    pub audio_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_quality_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_height: Option<u32>,
    #[serde(default, alias = "headers")]
    pub request_headers: BTreeMap<String, String>,
    /// Flux audio segmenté (DASH) : un fichier partiel n'est pas lisible
    #[serde(default)]
    pub segmented: bool,
}

impl ResolvedStream {
    pub fn new(audio_url: impl Into<String>) -> Self {
        Self {
            audio_url: audio_url.into(),
            ..Default::default()
        }
    }

    pub fn with_quality(mut self, label: impl Into<String>) -> Self {
        self.quality_label = Some(label.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request_headers.insert(name.into(), value.into());
        self
    }

    pub fn with_video(mut self, url: impl Into<String>, width: u32, height: u32) -> Self {
        self.video_url = Some(url.into());
        self.video_width = Some(width);
        self.video_height = Some(height);
        self
    }

    pub fn segmented(mut self, segmented: bool) -> Self {
        self.segmented = segmented;
        self
    }

    /// Vrai si le flux porte une vidéo secondaire
    pub fn has_video(&self) -> bool {
        self.video_url
            .as_deref()
            .is_some_and(|u| !u.trim().is_empty())
    }
}

/// URL d'extrait payant ou de prévisualisation tronquée
pub fn is_trial_url(url: &str) -> bool {
    url.contains("trial=1")
}

/// URL exploitable par le cache : http(s) ou fichier local
pub fn is_playable_url(url: &str) -> bool {
    let url = url.trim();
    url.starts_with("http://") || url.starts_with("https://") || url.starts_with("file://")
}

/// Heuristique pour les URL de segments DASH
pub fn is_segmented_url(url: &str) -> bool {
    let path = url.split('?').next().unwrap_or(url);
    path.ends_with(".m4s") || path.ends_with(".mpd")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_round_trip_through_str() {
        for p in PlatformId::ALL {
            assert_eq!(p.as_str().parse::<PlatformId>().unwrap(), p);
        }
        assert!("spotify".parse::<PlatformId>().is_err());
        assert_eq!(" QQ ".parse::<PlatformId>().unwrap(), PlatformId::QQ);
    }

    #[test]
    fn test_audio_extension() {
        assert_eq!(PlatformId::Bilibili.audio_extension(), "m4a");
        assert_eq!(PlatformId::Itunes.audio_extension(), "m4a");
        assert_eq!(PlatformId::Netease.audio_extension(), "mp3");
    }

    #[test]
    fn test_metadata_json_uses_source_field() {
        let meta = TrackMetadata::new(PlatformId::Kugou, "abc", "Song", "Singer");
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["source"], "kugou");
        assert!(json.get("album").is_none());
    }

    #[test]
    fn test_resolved_stream_tolerates_missing_fields() {
        let stream: ResolvedStream =
            serde_json::from_str(r#"{"audioUrl":"https://a/b.mp3","headers":{"Referer":"x"}}"#)
                .unwrap();
        assert_eq!(stream.audio_url, "https://a/b.mp3");
        assert_eq!(stream.request_headers.get("Referer").unwrap(), "x");
        assert!(!stream.segmented);
        assert!(!stream.has_video());
    }

    #[test]
    fn test_url_predicates() {
        assert!(is_trial_url("https://x/C400.m4a?vkey=1&trial=1"));
        assert!(!is_trial_url("https://x/C400.m4a?vkey=1"));
        assert!(is_playable_url(" https://x "));
        assert!(!is_playable_url("C400abc.m4a"));
        assert!(is_segmented_url("https://upos/123-1-30280.m4s?e=1"));
        assert!(!is_segmented_url("https://upos/123.mp4?e=.m4s"));
    }
}
