//! Couche HTTP partagée par les adaptateurs
//!
//! Les API des plateformes sont hétérogènes (JSON strict, JSON entre quotes
//! simples, texte brut). [`PlatformHttp`] ne fait que l'envoi et la vérification
//! du statut ; le décodage reste propre à chaque adaptateur.

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use wfbsource::{Result, SourceError};

/// User-Agent navigateur de bureau, utilisé par défaut
pub const DESKTOP_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// User-Agent iPhone (endpoints mobiles QQ et Migu)
pub const IPHONE_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 13_2_3 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/13.0.3 Mobile/15E148 Safari/604.1";

/// User-Agent Android
pub const ANDROID_UA: &str = "Mozilla/5.0 (Linux; Android 10; SM-G973F) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/81.0.4044.138 Mobile Safari/537.36";

/// Délai par défaut d'une requête
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client HTTP partagé (pool de connexions commun à tous les adaptateurs)
#[derive(Debug, Clone)]
pub struct PlatformHttp {
    client: Client,
}

impl PlatformHttp {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(DESKTOP_UA)
            .build()?;
        Ok(Self { client })
    }

    /// Réutilise un client existant (proxy, pool partagé)
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// GET renvoyant le corps en texte
    pub async fn get_text(
        &self,
        url: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<String> {
        debug!("GET {} with {} params", url, query.len());

        let mut request = self.client.get(url);
        if !query.is_empty() {
            request = request.query(query);
        }
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request.send().await?;
        Self::handle_response(response).await
    }

    /// GET décodé en JSON
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<T> {
        let text = self.get_text(url, query, headers).await?;
        serde_json::from_str(&text).map_err(|e| {
            warn!("Failed to parse response from {}: {}", url, e);
            SourceError::Json(e)
        })
    }

    async fn handle_response(response: Response) -> Result<String> {
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let snippet: String = error_text.chars().take(200).collect();
            warn!("HTTP error ({}): {}", status.as_u16(), snippet);
            return Err(SourceError::from_status_code(status.as_u16(), snippet));
        }
        Ok(response.text().await?)
    }
}

/// Valeur textuelle non vide à `pointer` (chaînes et nombres acceptés)
///
/// Les proxys renvoient indifféremment `"id": 123` ou `"id": "123"`.
pub(crate) fn text_at(value: &Value, pointer: &str) -> Option<String> {
    match value.pointer(pointer)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Premier champ textuel présent parmi `pointers`
pub(crate) fn first_text(value: &Value, pointers: &[&str]) -> Option<String> {
    pointers.iter().find_map(|p| text_at(value, p))
}

/// Complète les URL sans schéma (`//host/path`)
pub(crate) fn with_scheme(url: &str) -> String {
    match url.strip_prefix("//") {
        Some(rest) => format!("https://{rest}"),
        None => url.to_string(),
    }
}

/// Durée `mm:ss`, `hh:mm:ss` ou en secondes, convertie en millisecondes
pub(crate) fn parse_clock_ms(text: &str) -> Option<u64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let mut total = 0u64;
    for part in text.split(':') {
        total = total * 60 + part.trim().parse::<u64>().ok()?;
    }
    Some(total * 1000)
}

/// Erreur « rien trouvé » uniforme pour une stratégie
pub(crate) fn not_found(what: impl Into<String>) -> SourceError {
    SourceError::Other(format!("{} not found", what.into()))
}
