//! Signature WBI des requêtes Bilibili
//!
//! Les endpoints `wbi/*` exigent un paramètre `w_rid` calculé à partir de deux
//! clés publiées par `/x/web-interface/nav` (`img_key`, `sub_key`) :
//!
//! 1. `mixKey` = permutation fixe de `img_key + sub_key`, tronquée à 32 caractères
//! 2. ajout de `wts` (timestamp Unix), tri des paramètres par nom
//! 3. suppression des caractères `!'()*` dans les valeurs, encodage URL
//! 4. `w_rid = md5(query + mixKey)`

use md5::{Digest, Md5};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Table de permutation des clés WBI
pub const MIXIN_KEY_ENC_TAB: [usize; 64] = [
    46, 47, 18, 2, 53, 8, 23, 32, 15, 50, 10, 31, 58, 3, 45, 35, 27, 43, 5, 49, 33, 9, 42, 19, 29,
    28, 14, 39, 12, 38, 41, 13, 37, 48, 7, 16, 24, 55, 40, 61, 26, 17, 0, 1, 60, 51, 30, 4, 22, 25,
    54, 21, 56, 59, 6, 63, 57, 62, 11, 36, 20, 34, 44, 52,
];

/// Clés WBI courantes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WbiKeys {
    pub img_key: String,
    pub sub_key: String,
}

impl WbiKeys {
    /// Extrait les clés des URL `wbi_img` (`.../<key>.png`)
    pub fn from_urls(img_url: &str, sub_url: &str) -> Option<Self> {
        let img_key = key_from_url(img_url)?;
        let sub_key = key_from_url(sub_url)?;
        Some(Self { img_key, sub_key })
    }

    pub fn mixin_key(&self) -> String {
        mixin_key(&format!("{}{}", self.img_key, self.sub_key))
    }
}

fn key_from_url(url: &str) -> Option<String> {
    let file = url.rsplit('/').next()?;
    let key = file.split('.').next()?;
    (!key.is_empty()).then(|| key.to_string())
}

/// Permute `raw` selon [`MIXIN_KEY_ENC_TAB`] et garde 32 caractères
pub fn mixin_key(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    MIXIN_KEY_ENC_TAB
        .iter()
        .filter_map(|&i| chars.get(i))
        .take(32)
        .collect()
}

/// Encodage URL compatible avec la signature (espaces en `%20`, `~` conservé)
fn encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Requête signée pour `params`, au timestamp `wts`
///
/// # Returns
///
/// La chaîne de requête complète, `w_rid` en dernier.
pub fn sign(params: &[(&str, &str)], keys: &WbiKeys, wts: u64) -> String {
    let wts = wts.to_string();
    let mut sorted: BTreeMap<&str, String> = params
        .iter()
        .map(|(k, v)| {
            let cleaned: String = v.chars().filter(|c| !"!'()*".contains(*c)).collect();
            (*k, cleaned)
        })
        .collect();
    sorted.insert("wts", wts);

    let query = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Md5::new();
    hasher.update(query.as_bytes());
    hasher.update(keys.mixin_key().as_bytes());
    format!("{query}&w_rid={:x}", hasher.finalize())
}

/// Timestamp Unix courant, en secondes
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
