use models::AlertPreference;
use url::Url;

/// PreferenceSource supplies the current set of user alert preferences.
/// The preference store itself is external; the pipeline only reads
/// snapshots from it on a refresh interval.
#[async_trait::async_trait]
pub trait PreferenceSource: Send + Sync {
    async fn fetch(&self) -> anyhow::Result<Vec<AlertPreference>>;
}

/// HttpPreferenceSource polls an HTTP endpoint which returns the full
/// preference set as a JSON array.
pub struct HttpPreferenceSource {
    endpoint: Url,
    client: reqwest::Client,
}

impl HttpPreferenceSource {
    pub fn new(endpoint: Url, client: reqwest::Client) -> Self {
        Self { endpoint, client }
    }
}

#[async_trait::async_trait]
impl PreferenceSource for HttpPreferenceSource {
    #[tracing::instrument(skip_all, fields(endpoint = %self.endpoint))]
    async fn fetch(&self) -> anyhow::Result<Vec<AlertPreference>> {
        let preferences: Vec<AlertPreference> = self
            .client
            .get(self.endpoint.clone())
            .send()
            .await
            .and_then(|response| response.error_for_status())?
            .json()
            .await?;

        tracing::debug!(count = preferences.len(), "fetched preference snapshot");
        Ok(preferences)
    }
}

/// StaticPreferences serves a fixed preference set: an agent running
/// without a preference service, or a test.
pub struct StaticPreferences(pub Vec<AlertPreference>);

#[async_trait::async_trait]
impl PreferenceSource for StaticPreferences {
    async fn fetch(&self) -> anyhow::Result<Vec<AlertPreference>> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_static_source_round_trips() {
        let source = StaticPreferences(vec![AlertPreference::example()]);
        let fetched = source.fetch().await.unwrap();
        assert_eq!(fetched, vec![AlertPreference::example()]);
    }
}
