pub mod products;

mod noaa;
mod ovation;
mod sdo;

pub use noaa::{KForecastAdapter, KIndexAdapter};
pub use ovation::OvationAdapter;
pub use sdo::SdoImageryAdapter;

use models::{Category, Observation, SourceId};
use url::Url;

/// FetchError is the failure of a single fetch of a source.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// A network, timeout, or upstream server failure.
    /// A later fetch of the same source may succeed.
    #[error("transient failure fetching {url}")]
    Transient {
        url: Url,
        #[source]
        source: reqwest::Error,
    },
    /// The payload doesn't have the shape this adapter expects.
    /// Retries won't help until the upstream product or the adapter changes.
    #[error("malformed {product} payload: {reason}")]
    PermanentFormat {
        product: &'static str,
        reason: String,
    },
}

impl FetchError {
    /// Whether a retry of the same fetch may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }
}

/// SourceAdapter fetches one upstream source and decodes its current
/// payload into Observations. Adapters are stateless: scheduling, health
/// tracking, and retry live with the caller.
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Configured name of this source.
    fn id(&self) -> &SourceId;
    /// Category of the observations this adapter produces.
    fn category(&self) -> Category;
    /// Fetch the source once and decode all of its current observations.
    async fn fetch(&self) -> Result<Vec<Observation>, FetchError>;
}

/// GET `url` and return the response body.
/// All HTTP and transport failures are transient: the upstream products
/// are republished continuously and recover on their own.
pub(crate) async fn fetch_bytes(client: &reqwest::Client, url: &Url) -> Result<Vec<u8>, FetchError> {
    let transient = |source: reqwest::Error| FetchError::Transient {
        url: url.clone(),
        source,
    };

    let response = client
        .get(url.clone())
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(transient)?;

    Ok(response.bytes().await.map_err(transient)?.to_vec())
}
