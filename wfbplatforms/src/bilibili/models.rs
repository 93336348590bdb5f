//! Modèles de réponse des API Bilibili

use serde::Deserialize;

/// Enveloppe commune `{code, message, data}`
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
}

#[derive(Debug, Deserialize)]
pub struct NavData {
    pub wbi_img: Option<WbiImg>,
}

#[derive(Debug, Deserialize)]
pub struct WbiImg {
    pub img_url: String,
    pub sub_url: String,
}

#[derive(Debug, Deserialize)]
pub struct SpiData {
    pub b_3: Option<String>,
    pub b_4: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchData {
    pub result: Option<Vec<SearchItem>>,
}

#[derive(Debug, Deserialize)]
pub struct SearchItem {
    #[serde(default)]
    pub bvid: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub pic: String,
    /// `mm:ss` ou `hh:mm:ss`
    #[serde(default)]
    pub duration: String,
}

#[derive(Debug, Deserialize)]
pub struct ViewData {
    pub cid: Option<u64>,
    pub dimension: Option<Dimension>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Dimension {
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub rotate: u32,
}

#[derive(Debug, Deserialize)]
pub struct PlayData {
    pub dash: Option<Dash>,
    pub durl: Option<Vec<Durl>>,
}

#[derive(Debug, Deserialize)]
pub struct Dash {
    pub audio: Option<Vec<DashAudio>>,
}

#[derive(Debug, Deserialize)]
pub struct DashAudio {
    #[serde(default, rename = "baseUrl")]
    pub base_url: String,
    #[serde(default)]
    pub id: u32,
}

#[derive(Debug, Deserialize)]
pub struct Durl {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct RankingData {
    pub list: Option<Vec<RankingItem>>,
}

#[derive(Debug, Deserialize)]
pub struct RankingItem {
    #[serde(default)]
    pub bvid: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub pic: String,
    /// Secondes
    #[serde(default)]
    pub duration: u64,
    pub owner: Option<Owner>,
}

#[derive(Debug, Deserialize)]
pub struct Owner {
    #[serde(default)]
    pub name: String,
}
