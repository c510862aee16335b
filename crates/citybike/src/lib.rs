use chrono_tz::Tz;
use client::{HttpTransport, RetryClient, RetryPolicy, Transport, TransportError, DEFAULT_TIMEOUT};
use mapper::{map_networks, map_stations, MapError};
use model::{network::Network, station::Station};
use reqwest::Method;
use serde_json::Value;
use thiserror::Error;
use utility::id::Id;

pub mod client;
pub mod mapper;
pub mod normalize;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub const CITYBIKE_API_URL: &str = "http://api.citybik.es/v2";

const NETWORKS_FIELDS: &[&str] = &["id", "name", "location", "company"];
const STATIONS_FIELDS: &[&str] = &["id", "stations"];

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("invalid JSON from {url}: {source}")]
    Json {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Mapping(#[from] MapError),

    #[error("stations of network '{network_id}': {source}")]
    Stations {
        network_id: String,
        #[source]
        source: Box<ApiError>,
    },
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Client for the CityBikes v2 API.
pub struct CityBike<T: Transport> {
    client: RetryClient<T>,
    base_url: String,
}

impl CityBike<HttpTransport> {
    pub fn connect<S: Into<String>>(base_url: S, policy: RetryPolicy) -> ApiResult<Self> {
        let transport = HttpTransport::new(DEFAULT_TIMEOUT)?;
        Ok(Self::new(RetryClient::new(transport, policy)).with_base_url(base_url))
    }
}

impl<T: Transport> CityBike<T> {
    pub fn new(client: RetryClient<T>) -> Self {
        Self {
            client,
            base_url: CITYBIKE_API_URL.to_owned(),
        }
    }

    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        let base_url: String = base_url.into();
        self.base_url = base_url.trim_end_matches('/').to_owned();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get_networks(&self) -> ApiResult<Vec<Network>> {
        log::info!("getting networks...");
        let url = format!("{}/networks", self.base_url);
        let raw = self.get_json(&url, NETWORKS_FIELDS).await?;
        Ok(map_networks(&raw)?)
    }

    /// Stations of one network, each stamped with `network_id`.
    pub async fn get_stations(
        &self,
        network_id: &Id<Network>,
        zone: Tz,
    ) -> ApiResult<Vec<Station>> {
        log::info!("getting stations from network with id {network_id}");
        let url = format!("{}/networks/{}", self.base_url, network_id);
        let stations = match self.get_json(&url, STATIONS_FIELDS).await {
            Ok(raw) => map_stations(&raw, network_id, zone).map_err(ApiError::from),
            Err(why) => Err(why),
        };
        stations.map_err(|source| ApiError::Stations {
            network_id: network_id.raw(),
            source: Box::new(source),
        })
    }

    async fn get_json(&self, url: &str, fields: &[&str]) -> ApiResult<Value> {
        let fields = fields.join(",");
        let body = self
            .client
            .send(Method::GET, url, &[("fields", fields.as_str())])
            .await?;
        serde_json::from_str(&body).map_err(|source| ApiError::Json {
            url: url.to_owned(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use chrono_tz::America::New_York;
    use serde_json::json;

    use super::*;
    use crate::test_support::ScriptedTransport;

    const BASE: &str = "http://citybikes.test/v2";
    const NETWORKS_URL: &str = "http://citybikes.test/v2/networks";
    const NYC_URL: &str = "http://citybikes.test/v2/networks/citi-bike-nyc";

    fn api(transport: Arc<ScriptedTransport>) -> CityBike<Arc<ScriptedTransport>> {
        let policy = RetryPolicy::default().with_wait(Duration::ZERO, Duration::from_millis(1));
        CityBike::new(RetryClient::new(transport, policy)).with_base_url(format!("{BASE}/"))
    }

    fn networks_body() -> String {
        json!({
            "networks": [{
                "id": "citi-bike-nyc",
                "name": "Citi Bike",
                "location": { "latitude": 40.71, "longitude": -74.0, "city": "New York, NY", "country": "US" },
                "company": ["NYC Bike Share, LLC"]
            }]
        })
        .to_string()
    }

    fn stations_body() -> String {
        json!({
            "network": {
                "id": "citi-bike-nyc",
                "stations": [{
                    "id": "a1b2",
                    "name": "W 52 St & 11 Ave",
                    "latitude": 40.767,
                    "longitude": -73.993,
                    "timestamp": "2025-02-01T12:00:00Z",
                    "extra": {
                        "renting": 1,
                        "returning": 1,
                        "last_updated": 1738411200,
                        "payment-terminal": false,
                        "slots": 30
                    }
                }]
            }
        })
        .to_string()
    }

    #[test]
    fn base_url_defaults_to_public_api() {
        let api = CityBike::new(RetryClient::new(ScriptedTransport::new(), RetryPolicy::default()));
        assert_eq!(api.base_url(), "http://api.citybik.es/v2");
    }

    #[tokio::test]
    async fn requests_networks_with_field_selection() {
        let transport = Arc::new(ScriptedTransport::new().body(NETWORKS_URL, networks_body()));

        let networks = api(transport.clone()).get_networks().await.unwrap();

        assert_eq!(networks.len(), 1);
        assert_eq!(networks[0].city, "New York, NY");
        let calls = transport.calls();
        assert_eq!(calls[0].method, Method::GET);
        assert_eq!(
            calls[0].params,
            vec![("fields".to_owned(), "id,name,location,company".to_owned())]
        );
    }

    #[tokio::test]
    async fn malformed_response_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new().body(NETWORKS_URL, "{\"error\": \"busy\"}"));

        let result = api(transport.clone()).get_networks().await;

        assert!(matches!(
            result,
            Err(ApiError::Mapping(MapError::MissingField("networks")))
        ));
        assert_eq!(transport.calls_to(NETWORKS_URL), 1);
    }

    #[tokio::test]
    async fn undecodable_body_is_a_json_error() {
        let transport = Arc::new(ScriptedTransport::new().body(NETWORKS_URL, "<html>"));

        let result = api(transport).get_networks().await;

        assert!(matches!(result, Err(ApiError::Json { url, .. }) if url == NETWORKS_URL));
    }

    #[tokio::test]
    async fn stations_are_stamped_with_the_network() {
        let transport = Arc::new(ScriptedTransport::new().body(NYC_URL, stations_body()));
        let network_id = Id::new("citi-bike-nyc".to_owned());

        let stations = api(transport.clone())
            .get_stations(&network_id, New_York)
            .await
            .unwrap();

        assert_eq!(stations.len(), 1);
        assert_eq!(stations[0].network_id, network_id);
        assert_eq!(stations[0].slots, 30);
        assert_eq!(
            transport.calls()[0].params,
            vec![("fields".to_owned(), "id,stations".to_owned())]
        );
    }

    #[tokio::test]
    async fn station_errors_name_the_network() {
        let transport = Arc::new(ScriptedTransport::new().fail(NYC_URL, 502, 5));
        let network_id = Id::new("citi-bike-nyc".to_owned());

        let error = api(transport.clone())
            .get_stations(&network_id, New_York)
            .await
            .unwrap_err();

        assert_eq!(transport.calls_to(NYC_URL), 5);
        match error {
            ApiError::Stations { network_id, source } => {
                assert_eq!(network_id, "citi-bike-nyc");
                assert!(matches!(
                    *source,
                    ApiError::Transport(TransportError::Status { status: 502, .. })
                ));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
