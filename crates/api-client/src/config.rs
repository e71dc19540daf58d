use std::time::Duration;

use url::Url;

use crate::error::ApiError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiConfig {
    pub base_url: Url,
    pub timeout: Duration,
}

impl ApiConfig {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let base_url =
            Url::parse(base_url).map_err(|err| ApiError::InvalidUrl(format!("{base_url}: {err}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(format!("{base_url}: not a base url")));
        }
        Ok(Self {
            base_url,
            timeout: Duration::from_secs(30),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Appends path segments to the base url. Segments are percent-encoded.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Resolves a slash-separated path such as `/events/stream` under the base.
    pub fn url_for(&self, path: &str) -> Result<Url, ApiError> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        self.endpoint(&segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_keeps_base_path() {
        let config = ApiConfig::new("https://pulse.example.com/api/").unwrap();
        assert_eq!(
            config.endpoint(&["notebooks", "n 1", "execute"]).unwrap().as_str(),
            "https://pulse.example.com/api/notebooks/n%201/execute"
        );
        assert_eq!(
            config.url_for("/events/stream").unwrap().as_str(),
            "https://pulse.example.com/api/events/stream"
        );
    }

    #[test]
    fn rejects_non_base_urls() {
        assert!(matches!(
            ApiConfig::new("mailto:ops@example.com"),
            Err(ApiError::InvalidUrl(_))
        ));
        assert!(ApiConfig::new("not a url").is_err());
    }
}
