use crate::products::{parse_time_tag, ProductFrame};
use crate::{fetch_bytes, FetchError, SourceAdapter};
use chrono::{DateTime, Utc};
use models::{Category, Observation, SourceId};
use std::collections::BTreeMap;
use url::Url;

/// KIndexAdapter polls the NOAA SWPC planetary K-index product: the
/// definitive and estimated geomagnetic index over the trailing days,
/// in three-hour bins.
pub struct KIndexAdapter {
    id: SourceId,
    endpoint: Url,
    client: reqwest::Client,
}

impl KIndexAdapter {
    pub const DEFAULT_ENDPOINT: &'static str =
        "https://services.swpc.noaa.gov/products/noaa-planetary-k-index.json";

    const PRODUCT: &'static str = "noaa-planetary-k-index";

    pub fn new(id: SourceId, endpoint: Option<Url>, client: reqwest::Client) -> Self {
        let endpoint = endpoint.unwrap_or_else(|| Self::DEFAULT_ENDPOINT.parse().unwrap());
        Self {
            id,
            endpoint,
            client,
        }
    }

    fn decode(
        &self,
        fetched_at: DateTime<Utc>,
        bytes: &[u8],
    ) -> Result<Vec<Observation>, FetchError> {
        let frame = ProductFrame::decode(Self::PRODUCT, bytes)?;
        let time_tag = frame.column("time_tag")?;
        let kp = frame.column("Kp")?;

        let mut out = Vec::with_capacity(frame.rows().len());
        let mut dropped = 0;
        for row in frame.rows() {
            let (Some(observed_at), Some(value)) = (
                ProductFrame::str_cell(row, time_tag).and_then(parse_time_tag),
                ProductFrame::f64_cell(row, kp),
            ) else {
                dropped += 1;
                continue;
            };

            out.push(Observation {
                source_id: self.id.clone(),
                category: Category::GeomagneticIndex,
                observed_at,
                fetched_at,
                value,
                unit: "kp".to_string(),
                attributes: BTreeMap::new(),
            });
        }
        if dropped != 0 {
            tracing::warn!(source = %self.id, dropped, "dropped K-index rows which could not be decoded");
        }
        Ok(out)
    }
}

#[async_trait::async_trait]
impl SourceAdapter for KIndexAdapter {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn category(&self) -> Category {
        Category::GeomagneticIndex
    }

    async fn fetch(&self) -> Result<Vec<Observation>, FetchError> {
        let bytes = fetch_bytes(&self.client, &self.endpoint).await?;
        self.decode(Utc::now(), &bytes)
    }
}

/// KForecastAdapter polls the NOAA SWPC planetary K-index forecast
/// product. Rows restating already-observed bins are skipped: only the
/// `estimated` and `predicted` rows carry new information, and the
/// K-index product itself is the authority on observed bins.
pub struct KForecastAdapter {
    id: SourceId,
    endpoint: Url,
    client: reqwest::Client,
}

impl KForecastAdapter {
    pub const DEFAULT_ENDPOINT: &'static str =
        "https://services.swpc.noaa.gov/products/noaa-planetary-k-index-forecast.json";

    const PRODUCT: &'static str = "noaa-planetary-k-index-forecast";

    pub fn new(id: SourceId, endpoint: Option<Url>, client: reqwest::Client) -> Self {
        let endpoint = endpoint.unwrap_or_else(|| Self::DEFAULT_ENDPOINT.parse().unwrap());
        Self {
            id,
            endpoint,
            client,
        }
    }

    fn decode(
        &self,
        fetched_at: DateTime<Utc>,
        bytes: &[u8],
    ) -> Result<Vec<Observation>, FetchError> {
        let frame = ProductFrame::decode(Self::PRODUCT, bytes)?;
        let time_tag = frame.column("time_tag")?;
        let kp = frame.column("kp")?;
        let observed = frame.column("observed")?;
        let noaa_scale = frame.column("noaa_scale")?;

        let mut out = Vec::new();
        let mut dropped = 0;
        for row in frame.rows() {
            let kind = ProductFrame::str_cell(row, observed).unwrap_or_default();
            if kind != "estimated" && kind != "predicted" {
                continue;
            }

            let (Some(observed_at), Some(value)) = (
                ProductFrame::str_cell(row, time_tag).and_then(parse_time_tag),
                ProductFrame::f64_cell(row, kp),
            ) else {
                dropped += 1;
                continue;
            };

            let mut attributes = BTreeMap::new();
            attributes.insert("kind".to_string(), kind.to_string());
            if let Some(scale) = ProductFrame::str_cell(row, noaa_scale) {
                attributes.insert("noaa_scale".to_string(), scale.to_string());
            }

            out.push(Observation {
                source_id: self.id.clone(),
                category: Category::GeomagneticForecast,
                observed_at,
                fetched_at,
                value,
                unit: "kp".to_string(),
                attributes,
            });
        }
        if dropped != 0 {
            tracing::warn!(source = %self.id, dropped, "dropped forecast rows which could not be decoded");
        }
        Ok(out)
    }
}

#[async_trait::async_trait]
impl SourceAdapter for KForecastAdapter {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn category(&self) -> Category {
        Category::GeomagneticForecast
    }

    async fn fetch(&self) -> Result<Vec<Observation>, FetchError> {
        let bytes = fetch_bytes(&self.client, &self.endpoint).await?;
        self.decode(Utc::now(), &bytes)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn k_index_adapter() -> KIndexAdapter {
        KIndexAdapter::new(SourceId::new("noaa_kp"), None, reqwest::Client::new())
    }

    fn fetched() -> DateTime<Utc> {
        "2024-01-05T03:04:10Z".parse().unwrap()
    }

    #[test]
    fn test_k_index_decode() {
        let adapter = k_index_adapter();
        let out = adapter
            .decode(
                fetched(),
                br#"[
                    ["time_tag", "Kp", "a_running", "station_count"],
                    ["2024-01-05 00:00:00.000", "3.67", "22", "8"],
                    ["2024-01-05 03:00:00.000", "5.33", "39", "8"]
                ]"#,
            )
            .unwrap();

        assert_eq!(
            out,
            vec![
                Observation {
                    source_id: SourceId::new("noaa_kp"),
                    category: Category::GeomagneticIndex,
                    observed_at: "2024-01-05T00:00:00Z".parse().unwrap(),
                    fetched_at: fetched(),
                    value: 3.67,
                    unit: "kp".to_string(),
                    attributes: BTreeMap::new(),
                },
                Observation {
                    source_id: SourceId::new("noaa_kp"),
                    category: Category::GeomagneticIndex,
                    observed_at: "2024-01-05T03:00:00Z".parse().unwrap(),
                    fetched_at: fetched(),
                    value: 5.33,
                    unit: "kp".to_string(),
                    attributes: BTreeMap::new(),
                },
            ]
        );
    }

    #[test]
    fn test_k_index_drops_bad_rows() {
        let adapter = k_index_adapter();
        let out = adapter
            .decode(
                fetched(),
                br#"[
                    ["time_tag", "Kp"],
                    ["2024-01-05 00:00:00.000", "3.67"],
                    ["not a timestamp", "4.00"],
                    ["2024-01-05 06:00:00.000", "n/a"],
                    ["2024-01-05 09:00:00.000", "4.33"]
                ]"#,
            )
            .unwrap();

        let values: Vec<f64> = out.iter().map(|observation| observation.value).collect();
        assert_eq!(values, vec![3.67, 4.33]);
    }

    #[test]
    fn test_k_index_missing_column_is_permanent() {
        let adapter = k_index_adapter();
        let err = adapter
            .decode(
                fetched(),
                br#"[["time_tag", "kp"], ["2024-01-05 00:00:00.000", "3.67"]]"#,
            )
            .unwrap_err();

        assert!(!err.is_transient());
        insta::assert_snapshot!(
            err.to_string(),
            @r#"malformed noaa-planetary-k-index payload: missing column "Kp""#
        );
    }

    #[test]
    fn test_forecast_decode_keeps_estimated_and_predicted() {
        let adapter = KForecastAdapter::new(
            SourceId::new("noaa_kp_forecast"),
            None,
            reqwest::Client::new(),
        );
        let out = adapter
            .decode(
                fetched(),
                br#"[
                    ["time_tag", "kp", "observed", "noaa_scale"],
                    ["2024-01-04 21:00:00", "4.33", "observed", null],
                    ["2024-01-05 00:00:00", "5.00", "estimated", "G1"],
                    ["2024-01-05 03:00:00", "6.33", "predicted", "G2"],
                    ["2024-01-05 06:00:00", "4.67", "predicted", null]
                ]"#,
            )
            .unwrap();

        let summary: Vec<(&str, f64, Option<&str>)> = out
            .iter()
            .map(|observation| {
                (
                    observation.attributes["kind"].as_str(),
                    observation.value,
                    observation.attributes.get("noaa_scale").map(String::as_str),
                )
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                ("estimated", 5.0, Some("G1")),
                ("predicted", 6.33, Some("G2")),
                ("predicted", 4.67, None),
            ]
        );
        assert!(out
            .iter()
            .all(|observation| observation.category == Category::GeomagneticForecast));
    }
}
