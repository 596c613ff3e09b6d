use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::layers::error::{endpoint, Error, Result};
use crate::layers::Paper;

pub const ADS_API_URL: &str = "https://api.adsabs.harvard.edu/v1";

/// A bibliographic search backend.
#[async_trait]
pub trait PaperSearch: Send + Sync {
    async fn search(&self, query: &str, rows: usize) -> Result<Vec<Paper>>;
}

#[derive(Deserialize)]
struct AdsResult {
    response: AdsResponse,
}

#[derive(Deserialize)]
struct AdsResponse {
    #[serde(default)]
    docs: Vec<AdsDoc>,
}

#[derive(Deserialize)]
struct AdsDoc {
    bibcode: String,
    #[serde(default)]
    title: Vec<String>,
    #[serde(default, rename = "abstract")]
    abstract_text: Option<String>,
}

pub struct AdsClient {
    client: Client,
    url: Url,
    token: String,
}

impl AdsClient {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let token = token
            .filter(|t| !t.trim().is_empty())
            .ok_or(Error::MissingCredential("ADS_API_TOKEN"))?;
        Ok(Self {
            client: Client::new(),
            url: endpoint(base_url, "search/query")?,
            token,
        })
    }
}

#[async_trait]
impl PaperSearch for AdsClient {
    async fn search(&self, query: &str, rows: usize) -> Result<Vec<Paper>> {
        let rows = rows.to_string();
        let request = self
            .client
            .get(self.url.clone())
            .bearer_auth(&self.token)
            .query(&[("q", query), ("fl", "bibcode,title,abstract"), ("rows", rows.as_str())]);

        tracing::info!("Querying ADS: {}", query);
        match request.send().await {
            Ok(resp) => {
                let status = resp.status();
                if !status.is_success() {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(Error::Api { service: "ADS", status, body });
                }
                let results: AdsResult = resp.json().await?;
                Ok(results
                    .response
                    .docs
                    .into_iter()
                    .map(|doc| {
                        Paper::new(
                            doc.bibcode,
                            doc.title.into_iter().next().unwrap_or_default(),
                            doc.abstract_text.unwrap_or_default(),
                        )
                    })
                    .collect())
            }
            Err(e) => Err(Error::Http(e)),
        }
    }
}
