use crate::products::parse_time_tag;
use crate::{fetch_bytes, FetchError, SourceAdapter};
use chrono::{DateTime, Utc};
use models::{Category, Observation, SourceId};
use std::collections::BTreeMap;
use url::Url;

/// SdoImageryAdapter polls an index of recently published SDO AIA imagery.
/// Each index entry becomes an observation whose value is the wavelength
/// channel, with the image location carried in attributes.
pub struct SdoImageryAdapter {
    id: SourceId,
    endpoint: Url,
    client: reqwest::Client,
    /// When set, entries of other channels are skipped.
    channel: Option<u32>,
}

#[derive(serde::Deserialize)]
struct ImageEntry {
    channel: u32,
    time: String,
    url: String,
    #[serde(default)]
    resolution: Option<u32>,
}

impl SdoImageryAdapter {
    pub const DEFAULT_ENDPOINT: &'static str =
        "https://sdo.gsfc.nasa.gov/assets/img/latest/index.json";

    const PRODUCT: &'static str = "sdo-imagery-index";

    pub fn new(
        id: SourceId,
        endpoint: Option<Url>,
        channel: Option<u32>,
        client: reqwest::Client,
    ) -> Self {
        let endpoint = endpoint.unwrap_or_else(|| Self::DEFAULT_ENDPOINT.parse().unwrap());
        Self {
            id,
            endpoint,
            client,
            channel,
        }
    }

    fn decode(
        &self,
        fetched_at: DateTime<Utc>,
        bytes: &[u8],
    ) -> Result<Vec<Observation>, FetchError> {
        let entries: Vec<ImageEntry> =
            serde_json::from_slice(bytes).map_err(|err| FetchError::PermanentFormat {
                product: Self::PRODUCT,
                reason: err.to_string(),
            })?;

        let mut out = Vec::with_capacity(entries.len());
        let mut dropped = 0;
        for entry in entries {
            if self.channel.is_some_and(|channel| channel != entry.channel) {
                continue;
            }
            let Some(observed_at) = parse_time_tag(&entry.time) else {
                dropped += 1;
                continue;
            };

            let mut attributes = BTreeMap::new();
            attributes.insert("url".to_string(), entry.url);
            attributes.insert("channel".to_string(), entry.channel.to_string());
            if let Some(resolution) = entry.resolution {
                attributes.insert("resolution".to_string(), resolution.to_string());
            }

            out.push(Observation {
                source_id: self.id.clone(),
                category: Category::SolarImagery,
                observed_at,
                fetched_at,
                value: entry.channel as f64,
                unit: "angstrom".to_string(),
                attributes,
            });
        }
        if dropped != 0 {
            tracing::warn!(source = %self.id, dropped, "dropped imagery entries which could not be decoded");
        }
        Ok(out)
    }
}

#[async_trait::async_trait]
impl SourceAdapter for SdoImageryAdapter {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn category(&self) -> Category {
        Category::SolarImagery
    }

    async fn fetch(&self) -> Result<Vec<Observation>, FetchError> {
        let bytes = fetch_bytes(&self.client, &self.endpoint).await?;
        self.decode(Utc::now(), &bytes)
    }
}
