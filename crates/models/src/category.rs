use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Category is the kind of solar activity which an event describes.
/// Every stage of the pipeline partitions its state by Category.
#[derive(
    Serialize, Deserialize, Debug, JsonSchema, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// # Planetary K-index observations of geomagnetic activity.
    GeomagneticIndex,
    /// # Predicted planetary K-index values for upcoming intervals.
    GeomagneticForecast,
    /// # Probability of visible aurora over the configured latitude band.
    AuroraProbability,
    /// # Solar imagery channels published alongside numeric telemetry.
    SolarImagery,
}

impl Category {
    /// All categories, in their stable ordering.
    pub const ALL: [Category; 4] = [
        Category::GeomagneticIndex,
        Category::GeomagneticForecast,
        Category::AuroraProbability,
        Category::SolarImagery,
    ];

    /// The canonical unit in which events of this Category are expressed.
    pub fn canonical_unit(&self) -> &'static str {
        match self {
            Category::GeomagneticIndex | Category::GeomagneticForecast => "kp",
            Category::AuroraProbability => "percent",
            Category::SolarImagery => "angstrom",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::GeomagneticIndex => "geomagnetic_index",
            Category::GeomagneticForecast => "geomagnetic_forecast",
            Category::AuroraProbability => "aurora_probability",
            Category::SolarImagery => "solar_imagery",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// StormScale grades a planetary K-index value into NOAA G-scale severity
/// bands. Fractional values are rounded up before banding, so a reported
/// Kp of 4.33 is already graded as the next whole index.
#[derive(
    Serialize, Deserialize, Debug, JsonSchema, Copy, Clone, PartialEq, Eq, PartialOrd, Ord,
)]
#[serde(rename_all = "snake_case")]
pub enum StormScale {
    Quiet,
    Minor,
    Moderate,
    Strong,
    Severe,
    Extreme,
}

impl StormScale {
    pub fn from_kp(kp: f64) -> StormScale {
        match kp.ceil() as i64 {
            i64::MIN..=4 => StormScale::Quiet,
            5 => StormScale::Minor,
            6 => StormScale::Moderate,
            7 => StormScale::Strong,
            8 | 9 => StormScale::Severe,
            _ => StormScale::Extreme,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StormScale::Quiet => "quiet",
            StormScale::Minor => "minor",
            StormScale::Moderate => "moderate",
            StormScale::Strong => "strong",
            StormScale::Severe => "severe",
            StormScale::Extreme => "extreme",
        }
    }
}

impl std::fmt::Display for StormScale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_storm_scale_banding() {
        let table = vec![
            (0.0, StormScale::Quiet),
            (3.67, StormScale::Quiet),
            (4.0, StormScale::Quiet),
            (4.33, StormScale::Minor),
            (5.0, StormScale::Minor),
            (5.67, StormScale::Moderate),
            (7.0, StormScale::Strong),
            (7.33, StormScale::Severe),
            (9.0, StormScale::Severe),
            (9.33, StormScale::Extreme),
        ];

        for (kp, expect) in table {
            assert_eq!(StormScale::from_kp(kp), expect, "kp {kp}");
        }
    }

    #[test]
    fn test_category_serde_names() {
        for category in Category::ALL {
            let json = serde_json::to_string(&category).unwrap();
            assert_eq!(json, format!("\"{category}\""));

            let parsed: Category = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, category);
        }
    }
}
