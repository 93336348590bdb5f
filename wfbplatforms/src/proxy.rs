//! Proxys publics de type « meting »
//!
//! Plusieurs plateformes partagent les mêmes services tiers en dernier recours.
//! Leurs réponses varient d'un service à l'autre : on accepte les formes connues
//! (`url`, `play_url`, `data.url`, liste à la racine ou sous `data`/`data.list`).

use crate::http::{PlatformHttp, first_text};
use serde_json::Value;
use wfbsource::{Result, SourceError, is_playable_url};

/// Proxys publics utilisés quand aucune base n'est configurée
pub const DEFAULT_PROXIES: &[&str] = &[
    "https://api.paugram.com/music",
    "https://api.injahow.cn/meting/",
    "https://api.liuzhijin.cn",
];

/// Résout une URL de lecture auprès d'un proxy
pub(crate) async fn stream_url(
    http: &PlatformHttp,
    base: &str,
    source: &str,
    id: &str,
) -> Result<String> {
    let json: Value = http
        .get_json(base, &[("type", "url"), ("source", source), ("id", id)], &[])
        .await?;
    match first_text(&json, &["/url", "/play_url", "/data/url"]) {
        Some(url) if is_playable_url(&url) => Ok(url),
        _ => Err(SourceError::Other(format!("proxy {base} returned no URL"))),
    }
}

/// Paroles auprès d'un proxy
pub(crate) async fn lyrics(
    http: &PlatformHttp,
    base: &str,
    source: &str,
    id: &str,
) -> Result<Option<String>> {
    let json: Value = http
        .get_json(base, &[("type", "lrc"), ("source", source), ("id", id)], &[])
        .await?;
    Ok(first_text(&json, &["/lyric", "/lrc", "/data/lrc", "/data/lyric"]))
}

/// Recherche auprès d'un proxy ; renvoie les objets bruts
pub(crate) async fn search(
    http: &PlatformHttp,
    base: &str,
    source: &str,
    query: &str,
) -> Result<Vec<Value>> {
    let json: Value = http
        .get_json(base, &[("source", source), ("name", query)], &[])
        .await?;
    Ok(result_list(json))
}

fn result_list(json: Value) -> Vec<Value> {
    match json {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(items)) => items,
            Some(Value::Object(mut data)) => match data.remove("list") {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}
