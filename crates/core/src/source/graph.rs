//! Microsoft Graph user listing with `@odata.nextLink` pagination.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, instrument};

use super::{http_client, SourceDirectoryReader};
use crate::config::SourceConfig;
use crate::errors::{ConfigError, SourceReadError};
use crate::models::SourceIdentity;

/// Attributes requested from the `users` endpoint.
const USER_SELECT: &str = "userPrincipalName,givenName,surname,displayName,mail";

/// One page of a Graph collection.
#[derive(Debug, Deserialize)]
struct ODataPage<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

/// Reads all users from Microsoft Graph.
#[derive(Debug, Clone)]
pub struct GraphUserReader {
    http: reqwest::Client,
    graph_url: String,
    page_size: u32,
}

impl GraphUserReader {
    pub fn new(
        graph_url: impl Into<String>,
        page_size: u32,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let graph_url = graph_url.into().trim_end_matches('/').to_string();
        info!(graph_url = %graph_url, page_size, "created Graph user reader");
        Ok(Self {
            http: http_client(timeout)?,
            graph_url,
            page_size,
        })
    }

    pub fn from_config(config: &SourceConfig) -> Result<Self, ConfigError> {
        Self::new(
            config.graph_url.clone(),
            config.page_size,
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn first_page_url(&self) -> String {
        format!(
            "{}/users?$select={}&$top={}",
            self.graph_url, USER_SELECT, self.page_size
        )
    }
}

#[async_trait]
impl SourceDirectoryReader for GraphUserReader {
    #[instrument(skip(self, token))]
    async fn list_identities(&self, token: &str) -> Result<Vec<SourceIdentity>, SourceReadError> {
        let mut identities = Vec::new();
        let mut next = Some(self.first_page_url());
        let mut page = 0usize;

        while let Some(url) = next.take() {
            page += 1;
            debug!(page, url = %url, "fetching user page");

            let response = self.http.get(&url).bearer_auth(token).send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(SourceReadError::PageFailed {
                    page,
                    status: status.as_u16(),
                    body,
                });
            }

            let body = response.text().await?;
            let parsed: ODataPage<SourceIdentity> =
                serde_json::from_str(&body).map_err(|e| SourceReadError::ParseError {
                    page,
                    detail: e.to_string(),
                })?;

            identities.extend(parsed.value);
            next = parsed.next_link;
        }

        info!(count = identities.len(), pages = page, "retrieved users from source directory");
        Ok(identities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn reader(graph_url: String, page_size: u32) -> GraphUserReader {
        GraphUserReader::new(graph_url, page_size, Duration::from_secs(5)).unwrap()
    }

    fn user(upn: &str) -> serde_json::Value {
        json!({ "userPrincipalName": upn, "displayName": upn })
    }

    #[tokio::test]
    async fn test_follows_next_link() {
        let server = MockServer::start().await;
        let next = format!("{}/v1.0/users?$skiptoken=page2", server.uri());

        Mock::given(method("GET"))
            .and(path("/v1.0/users"))
            .and(query_param("$top", "2"))
            .and(header("Authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [user("a@example.com"), user("b@example.com")],
                "@odata.nextLink": next,
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v1.0/users"))
            .and(query_param("$skiptoken", "page2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [user("c@example.com")],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let reader = reader(format!("{}/v1.0", server.uri()), 2);
        let users = reader.list_identities("tok").await.unwrap();

        let logins: Vec<&str> = users.iter().filter_map(|u| u.login()).collect();
        assert_eq!(logins, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_empty_directory() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1.0/users"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": [] })))
            .mount(&server)
            .await;

        let reader = reader(format!("{}/v1.0/", server.uri()), 999);
        assert!(reader.list_identities("tok").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_page_discards_earlier_pages() {
        let server = MockServer::start().await;
        let next = format!("{}/v1.0/users?$skiptoken=page2", server.uri());

        Mock::given(method("GET"))
            .and(path("/v1.0/users"))
            .and(query_param("$top", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [user("a@example.com")],
                "@odata.nextLink": next,
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v1.0/users"))
            .and(query_param("$skiptoken", "page2"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let reader = reader(format!("{}/v1.0", server.uri()), 1);
        let err = reader.list_identities("tok").await.unwrap_err();
        assert!(matches!(
            err,
            SourceReadError::PageFailed { page: 2, status: 503, .. }
        ));
    }

    #[tokio::test]
    async fn test_undecodable_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1.0/users"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let reader = reader(format!("{}/v1.0", server.uri()), 10);
        let err = reader.list_identities("tok").await.unwrap_err();
        assert!(matches!(err, SourceReadError::ParseError { page: 1, .. }));
    }

    #[tokio::test]
    async fn test_unresponsive_endpoint_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1.0/users"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "value": [] }))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let reader = GraphUserReader::new(
            format!("{}/v1.0", server.uri()),
            10,
            Duration::from_millis(200),
        )
        .unwrap();
        let started = std::time::Instant::now();
        let err = reader.list_identities("tok").await.unwrap_err();

        assert!(matches!(err, SourceReadError::HttpError(ref e) if e.is_timeout()));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
