//! Upstream score services over HTTP
//!
//! All upstreams are reached through one bridge shape:
//!
//! - `GET  {base}/players/{player}/scores[?song_id=N]` returns a JSON array
//! - `POST {base}/players/{player}/scores` accepts a JSON array
//!
//! `{player}` is the friend code, username or local uuid; token-shaped
//! identifiers are sent in `X-Player-Token` with `{player}` = `me`. The
//! provider's developer token, if configured, goes in `Authorization`.
//!
//! Each provider name gets one [`UpstreamClient`] (connection pool + rate
//! limiter) shared by the per-run [`HttpProvider`] façades.

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use otoge_common::{
    Achievement, ChartType, Error, FcType, FsType, LevelIndex, RateType, ScoreRecord,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{PlayerIdentifier, ProviderError, ScoreSink, ScoreSource};

const PLAYER_TOKEN_HEADER: &str = "X-Player-Token";

/// Connection settings for one upstream
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// `None` leaves the provider registered but unavailable
    pub base_url: Option<String>,
    pub developer_token: Option<String>,
    pub proxy: Option<String>,
    pub requests_per_second: u32,
    pub timeout: Duration,
}

/// Shared HTTP state for one provider name
pub struct UpstreamClient {
    name: String,
    client: Client,
    base_url: Option<Url>,
    developer_token: Option<String>,
    rate_limiter: DefaultDirectRateLimiter,
}

impl UpstreamClient {
    pub fn new(name: &str, settings: UpstreamSettings) -> otoge_common::Result<Self> {
        let mut builder = Client::builder()
            .timeout(settings.timeout)
            .connect_timeout(Duration::from_secs(5))
            .user_agent(concat!("otoge-sync/", env!("CARGO_PKG_VERSION")));
        if let Some(proxy) = &settings.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| Error::Config(format!("{} proxy {}: {}", name, proxy, e)))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| Error::Upstream(format!("{}: {}", name, e)))?;

        let base_url = settings
            .base_url
            .as_deref()
            .map(|url| {
                Url::parse(url).map_err(|e| Error::Config(format!("{} base url {}: {}", name, url, e)))
            })
            .transpose()?;

        let per_second = NonZeroU32::new(settings.requests_per_second).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            name: name.to_string(),
            client,
            base_url,
            developer_token: settings.developer_token,
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }

    fn scores_url(&self, player: &PlayerIdentifier) -> Result<Url, ProviderError> {
        let mut url = self
            .base_url
            .clone()
            .ok_or_else(|| ProviderError::Unavailable(format!("{} has no base url configured", self.name)))?;

        let segment = match player {
            PlayerIdentifier::Player(identity) => identity.as_str().to_string(),
            PlayerIdentifier::FriendCode(code) => code.to_string(),
            PlayerIdentifier::Username(name) => name.clone(),
            PlayerIdentifier::PersonalToken(_) | PlayerIdentifier::Credentials(_) => "me".to_string(),
        };

        url.path_segments_mut()
            .map_err(|_| ProviderError::Unavailable(format!("{} base url cannot hold a path", self.name)))?
            .pop_if_empty()
            .extend(["players", segment.as_str(), "scores"]);
        Ok(url)
    }

    fn authorize(&self, mut request: RequestBuilder, player: &PlayerIdentifier) -> RequestBuilder {
        if let Some(token) = &self.developer_token {
            request = request.header(reqwest::header::AUTHORIZATION, token);
        }
        match player {
            PlayerIdentifier::PersonalToken(token) | PlayerIdentifier::Credentials(token) => {
                request.header(PLAYER_TOKEN_HEADER, token)
            }
            _ => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ProviderError> {
        self.rate_limiter.until_ready().await;
        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("{}: {}", self.name, e)))?;
        check_status(&self.name, response)
    }

    async fn get_scores(
        &self,
        player: &PlayerIdentifier,
        song_id: Option<u32>,
    ) -> Result<Vec<ScoreRecord>, ProviderError> {
        let url = self.scores_url(player)?;
        let mut request = self.client.get(url);
        if let Some(song_id) = song_id {
            request = request.query(&[("song_id", song_id)]);
        }

        let response = self.send(self.authorize(request, player)).await?;
        // Rows are decoded one at a time so a single bad row only loses itself
        let rows: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("{} response: {}", self.name, e)))?;

        let total = rows.len();
        let records: Vec<ScoreRecord> = rows
            .into_iter()
            .filter_map(|row| match RemoteScore::decode(row) {
                Ok(record) => Some(record),
                Err(reason) => {
                    warn!(provider = %self.name, reason = %reason, "Dropping undecodable score");
                    None
                }
            })
            .collect();
        debug!(provider = %self.name, total, kept = records.len(), "Fetched scores");
        Ok(records)
    }

    async fn post_scores(
        &self,
        player: &PlayerIdentifier,
        records: &[ScoreRecord],
    ) -> Result<(), ProviderError> {
        let url = self.scores_url(player)?;
        let body: Vec<RemoteScore> = records.iter().map(RemoteScore::from).collect();
        let request = self.client.post(url).json(&body);
        self.send(self.authorize(request, player)).await?;
        debug!(provider = %self.name, count = records.len(), "Pushed scores");
        Ok(())
    }
}

fn check_status(name: &str, response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let detail = format!("{} returned HTTP {}", name, status);
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Unauthorized(detail),
        StatusCode::NOT_IMPLEMENTED => ProviderError::NotSupported(detail),
        _ => ProviderError::Unavailable(detail),
    })
}

/// Per-run façade over a shared [`UpstreamClient`]
pub struct HttpProvider {
    upstream: Arc<UpstreamClient>,
}

impl HttpProvider {
    pub fn new(upstream: Arc<UpstreamClient>) -> Self {
        Self { upstream }
    }
}

#[async_trait]
impl ScoreSource for HttpProvider {
    async fn fetch_all(&self, player: &PlayerIdentifier) -> Result<Vec<ScoreRecord>, ProviderError> {
        self.upstream.get_scores(player, None).await
    }

    async fn fetch_one(
        &self,
        player: &PlayerIdentifier,
        song_id: u32,
    ) -> Result<Vec<ScoreRecord>, ProviderError> {
        self.upstream.get_scores(player, Some(song_id)).await
    }
}

#[async_trait]
impl ScoreSink for HttpProvider {
    async fn push(&self, player: &PlayerIdentifier, records: &[ScoreRecord]) -> Result<(), ProviderError> {
        self.upstream.post_scores(player, records).await
    }
}

/// Score as exchanged with upstreams; every measure may be missing
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RemoteScore {
    song_id: u32,
    #[serde(rename = "type")]
    chart_type: ChartType,
    level_index: LevelIndex,
    #[serde(default)]
    achievements: Option<f64>,
    #[serde(default)]
    dx_score: Option<u32>,
    #[serde(default)]
    dx_rating: Option<f64>,
    #[serde(default)]
    play_count: Option<u32>,
    #[serde(default)]
    fc: Option<FcType>,
    #[serde(default)]
    fs: Option<FsType>,
    #[serde(default)]
    rate: Option<RateType>,
}

impl RemoteScore {
    fn decode(row: serde_json::Value) -> Result<ScoreRecord, String> {
        serde_json::from_value::<Self>(row)
            .map_err(|e| e.to_string())?
            .into_record()
    }

    /// Missing numbers become zero; a missing rate is derived from the achievement
    fn into_record(self) -> Result<ScoreRecord, String> {
        let achievements = match self.achievements {
            Some(percent) => Achievement::from_percent(percent)
                .ok_or_else(|| format!("achievements {} is not a valid percentage", percent))?,
            None => Achievement::default(),
        };
        let rate = self
            .rate
            .unwrap_or_else(|| RateType::from_achievement(achievements));

        Ok(ScoreRecord {
            achievements,
            dx_score: self.dx_score.unwrap_or(0),
            dx_rating: self.dx_rating,
            play_count: self.play_count.unwrap_or(0),
            fc: self.fc,
            fs: self.fs,
            ..ScoreRecord::new(self.song_id, self.chart_type, self.level_index, rate)
        })
    }
}

impl From<&ScoreRecord> for RemoteScore {
    fn from(record: &ScoreRecord) -> Self {
        Self {
            song_id: record.song_id,
            chart_type: record.chart_type,
            level_index: record.level_index,
            achievements: Some(record.achievements.as_percent()),
            dx_score: Some(record.dx_score),
            dx_rating: record.dx_rating,
            play_count: Some(record.play_count),
            fc: record.fc,
            fs: record.fs,
            rate: Some(record.rate),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query, State};
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::routing::get;
    use axum::{Json, Router};
    use otoge_common::PlayerIdentity;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    #[derive(Clone, Default)]
    struct Captured {
        requests: Arc<Mutex<Vec<(String, HashMap<String, String>, Option<String>)>>>,
        pushed: Arc<Mutex<Vec<Value>>>,
    }

    fn header(headers: &HeaderMap, name: &str) -> Option<String> {
        headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
    }

    async fn list_scores(
        State(captured): State<Captured>,
        Path(player): Path<String>,
        Query(query): Query<HashMap<String, String>>,
        headers: HeaderMap,
    ) -> (AxumStatus, Json<Value>) {
        captured
            .requests
            .lock()
            .await
            .push((player.clone(), query, header(&headers, PLAYER_TOKEN_HEADER)));

        match player.as_str() {
            "401" => (AxumStatus::UNAUTHORIZED, Json(json!({}))),
            "501" => (AxumStatus::NOT_IMPLEMENTED, Json(json!({}))),
            "500" => (AxumStatus::INTERNAL_SERVER_ERROR, Json(json!({}))),
            "mixed" => (
                AxumStatus::OK,
                Json(json!([
                    {"song_id": 834, "type": "standard", "level_index": 7, "achievements": 99.0},
                    {"song_id": 834, "type": "standard", "level_index": 3, "achievements": 99.0},
                    {"song_id": 835, "type": "remaster", "level_index": 3},
                    {"song_id": 836, "type": "dx", "level_index": 1, "dx_score": -5},
                    {"song_id": 837, "type": "dx", "level_index": 1, "fc": "perfect"}
                ])),
            ),
            _ => (
                AxumStatus::OK,
                Json(json!([
                    {"song_id": 834, "type": "standard", "level_index": 3,
                     "achievements": 100.6, "fc": "ap", "fs": "fsd", "dx_score": 2400},
                    {"song_id": 11234, "type": "dx", "level_index": 2,
                     "achievements": 97.25, "rate": "s", "dx_rating": 250.0},
                    {"song_id": 9, "type": "standard", "level_index": 0,
                     "achievements": -3.0}
                ])),
            ),
        }
    }

    async fn push_scores(
        State(captured): State<Captured>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> AxumStatus {
        if header(&headers, "authorization").as_deref() != Some("dev-token") {
            return AxumStatus::FORBIDDEN;
        }
        captured.pushed.lock().await.push(body);
        AxumStatus::OK
    }

    async fn spawn_upstream() -> (String, Captured) {
        let captured = Captured::default();
        let app = Router::new()
            .route("/api/players/:player/scores", get(list_scores).post(push_scores))
            .with_state(captured.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/api/", addr), captured)
    }

    fn provider(base_url: Option<String>, developer_token: Option<&str>) -> HttpProvider {
        let upstream = UpstreamClient::new(
            "test",
            UpstreamSettings {
                base_url,
                developer_token: developer_token.map(str::to_string),
                proxy: None,
                requests_per_second: 50,
                timeout: Duration::from_secs(5),
            },
        )
        .unwrap();
        HttpProvider::new(Arc::new(upstream))
    }

    #[tokio::test]
    async fn test_fetch_all_decodes_and_fills_defaults() {
        let (base, captured) = spawn_upstream().await;
        let provider = provider(Some(base), None);

        let records = provider
            .fetch_all(&PlayerIdentifier::FriendCode(123456))
            .await
            .unwrap();

        assert_eq!(records.len(), 2, "negative achievement dropped");
        assert_eq!(records[0].rate, RateType::Sssp, "rate derived from achievement");
        assert_eq!(records[0].fc, Some(FcType::Ap));
        assert_eq!(records[0].play_count, 0);
        assert_eq!(records[1].rate, RateType::S);
        assert_eq!(records[1].dx_rating, Some(250.0));

        let requests = captured.requests.lock().await;
        assert_eq!(requests[0].0, "123456");
    }

    #[tokio::test]
    async fn test_fetch_one_sends_song_and_token() {
        let (base, captured) = spawn_upstream().await;
        let provider = provider(Some(base), None);

        provider
            .fetch_one(&PlayerIdentifier::PersonalToken("tok".to_string()), 834)
            .await
            .unwrap();

        let requests = captured.requests.lock().await;
        let (player, query, token) = &requests[0];
        assert_eq!(player, "me");
        assert_eq!(query.get("song_id").map(String::as_str), Some("834"));
        assert_eq!(token.as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn test_bad_rows_are_dropped_individually() {
        let (base, _) = spawn_upstream().await;
        let provider = provider(Some(base), None);

        let records = provider
            .fetch_all(&PlayerIdentifier::Username("mixed".to_string()))
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].song_id, 834);
        assert_eq!(records[0].level_index, LevelIndex::Master);
        assert_eq!(records[0].rate, RateType::Ss);
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let (base, _) = spawn_upstream().await;
        let provider = provider(Some(base), None);
        let name = |n: &str| PlayerIdentifier::Username(n.to_string());

        assert!(matches!(
            provider.fetch_all(&name("401")).await,
            Err(ProviderError::Unauthorized(_))
        ));
        assert!(matches!(
            provider.fetch_all(&name("501")).await,
            Err(ProviderError::NotSupported(_))
        ));
        assert!(matches!(
            provider.fetch_all(&name("500")).await,
            Err(ProviderError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_push_sends_developer_token_and_full_records() {
        let (base, captured) = spawn_upstream().await;
        let record = ScoreRecord {
            achievements: Achievement::from_percent(99.5).unwrap(),
            play_count: 4,
            ..ScoreRecord::new(834, ChartType::Dx, LevelIndex::Master, RateType::Ssp)
        };

        let player = PlayerIdentifier::Username("alice".to_string());
        assert!(matches!(
            provider(Some(base.clone()), None).push(&player, &[record.clone()]).await,
            Err(ProviderError::Unauthorized(_))
        ));

        provider(Some(base), Some("dev-token"))
            .push(&player, &[record])
            .await
            .unwrap();
        let pushed = captured.pushed.lock().await;
        assert_eq!(pushed[0][0]["achievements"], json!(99.5));
        assert_eq!(pushed[0][0]["type"], json!("dx"));
        assert_eq!(pushed[0][0]["play_count"], json!(4));
    }

    #[tokio::test]
    async fn test_unconfigured_provider_is_unavailable() {
        let provider = provider(None, None);
        let player = PlayerIdentifier::Player(
            PlayerIdentity::parse("3f2504e0-4f89-11d3-9a0c-0305e82c3301").unwrap(),
        );
        assert!(matches!(
            provider.fetch_all(&player).await,
            Err(ProviderError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_unavailable() {
        // Bind then drop to get a port nothing listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let provider = provider(Some(format!("http://{}", addr)), None);
        assert!(matches!(
            provider.fetch_all(&PlayerIdentifier::FriendCode(1)).await,
            Err(ProviderError::Unavailable(_))
        ));
    }
}
