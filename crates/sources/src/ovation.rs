use crate::products::parse_time_tag;
use crate::{fetch_bytes, FetchError, SourceAdapter};
use chrono::{DateTime, Utc};
use models::{Category, Observation, SourceId};
use std::collections::BTreeMap;
use url::Url;

/// OvationAdapter polls the NOAA SWPC OVATION model output: a global grid
/// of aurora probabilities. The grid is reduced to one observation, the
/// peak probability at or above a configured latitude.
pub struct OvationAdapter {
    id: SourceId,
    endpoint: Url,
    client: reqwest::Client,
    min_latitude: f64,
}

/// One fetch of the OVATION product.
#[derive(serde::Deserialize)]
struct OvationGrid {
    #[serde(rename = "Observation Time")]
    observation_time: String,
    #[serde(rename = "Forecast Time")]
    forecast_time: String,
    /// Grid cells as `[longitude, latitude, probability]` triples.
    coordinates: Vec<(f64, f64, f64)>,
}

impl OvationAdapter {
    pub const DEFAULT_ENDPOINT: &'static str =
        "https://services.swpc.noaa.gov/json/ovation_aurora_latest.json";

    pub const DEFAULT_MIN_LATITUDE: f64 = 50.0;

    const PRODUCT: &'static str = "ovation-aurora";

    pub fn new(
        id: SourceId,
        endpoint: Option<Url>,
        min_latitude: Option<f64>,
        client: reqwest::Client,
    ) -> Self {
        let endpoint = endpoint.unwrap_or_else(|| Self::DEFAULT_ENDPOINT.parse().unwrap());
        Self {
            id,
            endpoint,
            client,
            min_latitude: min_latitude.unwrap_or(Self::DEFAULT_MIN_LATITUDE),
        }
    }

    fn decode(
        &self,
        fetched_at: DateTime<Utc>,
        bytes: &[u8],
    ) -> Result<Vec<Observation>, FetchError> {
        let grid: OvationGrid =
            serde_json::from_slice(bytes).map_err(|err| FetchError::PermanentFormat {
                product: Self::PRODUCT,
                reason: err.to_string(),
            })?;

        let Some(observed_at) = parse_time_tag(&grid.observation_time) else {
            return Err(FetchError::PermanentFormat {
                product: Self::PRODUCT,
                reason: format!("bad observation time {:?}", grid.observation_time),
            });
        };

        let peak = grid
            .coordinates
            .iter()
            .filter(|(_, latitude, _)| *latitude >= self.min_latitude)
            .map(|(_, _, probability)| *probability)
            .fold(0f64, f64::max);

        let mut attributes = BTreeMap::new();
        attributes.insert("forecast_time".to_string(), grid.forecast_time);

        Ok(vec![Observation {
            source_id: self.id.clone(),
            category: Category::AuroraProbability,
            observed_at,
            fetched_at,
            value: peak,
            unit: "percent".to_string(),
            attributes,
        }])
    }
}

#[async_trait::async_trait]
impl SourceAdapter for OvationAdapter {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn category(&self) -> Category {
        Category::AuroraProbability
    }

    async fn fetch(&self) -> Result<Vec<Observation>, FetchError> {
        let bytes = fetch_bytes(&self.client, &self.endpoint).await?;
        self.decode(Utc::now(), &bytes)
    }
}
