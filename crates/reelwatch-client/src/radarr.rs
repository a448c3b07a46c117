use std::time::Duration;

use reelwatch_core::AppError;
use reelwatch_core::models::{AcquisitionOutcome, AcquisitionRequest};
use reelwatch_core::traits::AcquisitionSink;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::OnceCell;
use url::Url;

use crate::http::{build_client, ensure_success, send_error, truncate};

const API_KEY_HEADER: &str = "X-Api-Key";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Where and how new movies are added.
#[derive(Debug, Clone)]
pub struct RadarrOptions {
    pub root_folder: String,
    /// Quality profile name, resolved to its id on first use.
    pub quality_profile: String,
    pub respect_list_exclusions: bool,
    pub timeout: Duration,
}

impl RadarrOptions {
    pub fn new(root_folder: impl Into<String>, quality_profile: impl Into<String>) -> Self {
        Self {
            root_folder: root_folder.into(),
            quality_profile: quality_profile.into(),
            respect_list_exclusions: true,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_list_exclusions(mut self, respect: bool) -> Self {
        self.respect_list_exclusions = respect;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Acquisition sink backed by the Radarr v3 HTTP API.
///
/// Every step is a lookup or an idempotent add, so a repeated dispatch of the
/// same request ends in `exists` instead of a duplicate.
#[derive(Clone)]
pub struct RadarrSink {
    client: Client,
    base_url: Url,
    api_key: String,
    options: RadarrOptions,
    quality_profile_id: std::sync::Arc<OnceCell<i64>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QualityProfile {
    id: i64,
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListExclusion {
    tmdb_id: i64,
}

impl RadarrSink {
    pub fn new(
        mut base_url: Url,
        api_key: impl Into<String>,
        options: RadarrOptions,
    ) -> Result<Self, AppError> {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            client: build_client(options.timeout)?,
            base_url,
            api_key: api_key.into(),
            options,
            quality_profile_id: Default::default(),
        })
    }

    /// Check that the API answers and the configured quality profile exists.
    pub async fn verify(&self) -> Result<i64, AppError> {
        let status: Value = self.get_json("api/v3/system/status", &[]).await?;
        tracing::info!(
            version = status.get("version").and_then(serde_json::Value::as_str).unwrap_or("?"),
            "Connected to Radarr"
        );
        self.quality_profile_id().await
    }

    fn endpoint(&self, path: &str) -> Result<Url, AppError> {
        self.base_url
            .join(path)
            .map_err(|e| AppError::ConfigError(format!("Invalid Radarr URL: {e}")))
    }

    fn timeout_secs(&self) -> u64 {
        self.options.timeout.as_secs()
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, AppError> {
        request
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| send_error(e, self.timeout_secs()))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, AppError> {
        let mut url = self.endpoint(path)?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        let response = ensure_success(self.send(self.client.get(url)).await?).await?;
        let body = response
            .text()
            .await
            .map_err(|e| AppError::NetworkError(format!("Failed to read response body: {e}")))?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn quality_profile_id(&self) -> Result<i64, AppError> {
        self.quality_profile_id
            .get_or_try_init(|| async {
                let profiles: Vec<QualityProfile> =
                    self.get_json("api/v3/qualityprofile", &[]).await?;
                let wanted = &self.options.quality_profile;
                profiles
                    .iter()
                    .find(|p| p.name.eq_ignore_ascii_case(wanted))
                    .map(|p| p.id)
                    .ok_or_else(|| {
                        let known: Vec<&str> = profiles.iter().map(|p| p.name.as_str()).collect();
                        AppError::ConfigError(format!(
                            "Quality profile '{wanted}' not found in Radarr (available: {})",
                            known.join(", ")
                        ))
                    })
            })
            .await
            .copied()
    }

    /// Movie resource for `imdb_id`, or `None` when Radarr does not know it.
    async fn lookup(&self, imdb_id: &str) -> Result<Option<Value>, AppError> {
        let mut url = self.endpoint("api/v3/movie/lookup/imdb")?;
        url.query_pairs_mut().append_pair("imdbId", imdb_id);
        let response = self.send(self.client.get(url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = ensure_success(response)
            .await?
            .text()
            .await
            .map_err(|e| AppError::NetworkError(format!("Failed to read lookup body: {e}")))?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        let movie: Value = serde_json::from_str(&body)?;
        // Some versions answer with a one-element array.
        let movie = match movie {
            Value::Array(mut movies) if !movies.is_empty() => movies.swap_remove(0),
            Value::Array(_) | Value::Null => return Ok(None),
            other => other,
        };
        let known = movie.get("tmdbId").and_then(Value::as_i64).unwrap_or(0) > 0;
        Ok(known.then_some(movie))
    }

    async fn is_excluded(&self, tmdb_id: i64) -> Result<bool, AppError> {
        let exclusions: Vec<ListExclusion> = self.get_json("api/v3/exclusions", &[]).await?;
        Ok(exclusions.iter().any(|e| e.tmdb_id == tmdb_id))
    }

    async fn add(&self, mut movie: Value) -> Result<AcquisitionOutcome, AppError> {
        let profile_id = self.quality_profile_id().await?;
        if let Some(fields) = movie.as_object_mut() {
            fields.insert("qualityProfileId".into(), json!(profile_id));
            fields.insert("rootFolderPath".into(), json!(self.options.root_folder));
            fields.insert("monitored".into(), json!(true));
            fields.insert("minimumAvailability".into(), json!("released"));
            fields.insert("addOptions".into(), json!({ "searchForMovie": true }));
        }

        let url = self.endpoint("api/v3/movie")?;
        let response = self.send(self.client.post(url).json(&movie)).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(AcquisitionOutcome::Added);
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::BAD_REQUEST {
            let lower = body.to_ascii_lowercase();
            if lower.contains("already been added") || lower.contains("movieexistsvalidator") {
                return Ok(AcquisitionOutcome::Exists);
            }
            if lower.contains("exclusion") {
                return Ok(AcquisitionOutcome::Excluded);
            }
        }
        Err(AppError::http(status.as_u16(), truncate(&body, 300)))
    }
}

impl AcquisitionSink for RadarrSink {
    async fn dispatch(&self, request: &AcquisitionRequest) -> Result<AcquisitionOutcome, AppError> {
        let Some(movie) = self.lookup(&request.imdb_id).await? else {
            tracing::debug!(imdb_id = %request.imdb_id, "Not found in Radarr lookup");
            return Ok(AcquisitionOutcome::Invalid);
        };

        if movie.get("id").and_then(Value::as_i64).unwrap_or(0) > 0 {
            return Ok(AcquisitionOutcome::Exists);
        }

        let tmdb_id = movie.get("tmdbId").and_then(Value::as_i64).unwrap_or(0);
        if self.options.respect_list_exclusions && self.is_excluded(tmdb_id).await? {
            return Ok(AcquisitionOutcome::Excluded);
        }

        self.add(movie).await
    }
}
