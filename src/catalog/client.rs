use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::api_types::{ApiListing, ApiListingPage, ApiVersionResponse};
use super::service::{CatalogService, UpdateSource};
use super::types::{Category, Listing, ListingFilters, ListingPage};
use crate::clock::SharedClock;
use crate::config::Config;
use crate::error::{CatalogError, CatalogResult};

/// HTTP client for the remote listing catalog
#[derive(Clone)]
pub struct HttpCatalogClient {
  http: reqwest::Client,
  base_url: Url,
  token: Option<String>,
  clock: SharedClock,
}

impl HttpCatalogClient {
  pub fn new(config: &Config, clock: SharedClock) -> Result<Self> {
    let mut base_url = Url::parse(&config.catalog.url)
      .map_err(|e| eyre!("Invalid catalog url {}: {}", config.catalog.url, e))?;
    // Url::join drops the last segment unless the path ends with '/'.
    if !base_url.path().ends_with('/') {
      base_url.set_path(&format!("{}/", base_url.path()));
    }

    let http = reqwest::Client::builder()
      .timeout(Duration::from_millis(config.catalog.timeout_ms))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url,
      token: Config::get_api_token(),
      clock,
    })
  }

  fn endpoint(&self, path: &str) -> CatalogResult<Url> {
    self
      .base_url
      .join(path)
      .map_err(|e| CatalogError::Network(format!("invalid endpoint {}: {}", path, e)))
  }

  async fn get(&self, url: Url) -> CatalogResult<reqwest::Response> {
    let mut request = self.http.get(url.clone());
    if let Some(token) = &self.token {
      request = request.bearer_auth(token);
    }

    debug!(%url, "catalog request");
    Ok(request.send().await?)
  }
}

#[async_trait]
impl CatalogService for HttpCatalogClient {
  async fn fetch_page(
    &self,
    category: Category,
    filters: &ListingFilters,
    page: u32,
    page_size: u32,
  ) -> CatalogResult<ListingPage> {
    let mut url = self.endpoint("listings")?;
    {
      let mut query = url.query_pairs_mut();
      query
        .append_pair("category", category.as_str())
        .append_pair("page", &page.to_string())
        .append_pair("page_size", &page_size.to_string());
      for (key, value) in filters.query_pairs() {
        query.append_pair(key, &value);
      }
    }

    let response = self.get(url).await?;
    if !response.status().is_success() {
      return Err(CatalogError::Network(format!(
        "listing page request failed: HTTP {}",
        response.status()
      )));
    }

    let body: ApiListingPage = response.json().await?;
    Ok(body.into_page(page, page_size, self.clock.now()))
  }

  async fn fetch_single(&self, id: &str) -> CatalogResult<Listing> {
    let url = self.endpoint(&format!("listings/{}", id))?;

    let response = self.get(url).await?;
    match response.status() {
      StatusCode::NOT_FOUND => Err(CatalogError::NotFound(id.to_string())),
      status if !status.is_success() => Err(CatalogError::Network(format!(
        "listing {} request failed: HTTP {}",
        id, status
      ))),
      _ => {
        let body: ApiListing = response.json().await?;
        Ok(body.into())
      }
    }
  }
}

#[async_trait]
impl UpdateSource for HttpCatalogClient {
  async fn latest_update_id(&self) -> CatalogResult<Option<String>> {
    let url = self.endpoint("app/version")?;

    let response = self.get(url).await?;
    if !response.status().is_success() {
      return Err(CatalogError::Network(format!(
        "version request failed: HTTP {}",
        response.status()
      )));
    }

    let body: ApiVersionResponse = response.json().await?;
    Ok(body.update_id)
  }
}
