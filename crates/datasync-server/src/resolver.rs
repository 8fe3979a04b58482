//! HTTP client for the catalog service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use datasync_core::{BackendError, EntityResolver};
use datasync_proto::EntityKind;

use crate::error::Error;

/// Lookup path for each entity kind, relative to the catalog base URL.
pub fn query_path(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Brand => "brand/findById",
        EntityKind::Category => "category/findById",
        EntityKind::Product => "product/findById",
        EntityKind::ProductIntro => "product-intro/findById",
        EntityKind::ProductProperty => "product-property/findById",
        EntityKind::ProductSpecification => "product-specification/findById",
    }
}

/// Resolves entities with `GET {base}/{path}?id={id}`.
///
/// A 404 or an empty body means the record does not exist.
pub struct HttpResolver {
    client: Client,
    base_url: String,
}

impl HttpResolver {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Resolver(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, kind: EntityKind) -> String {
        format!("{}/{}", self.base_url, query_path(kind))
    }
}

#[async_trait]
impl EntityResolver for HttpResolver {
    async fn resolve(&self, kind: EntityKind, id: i64) -> Result<Option<String>, BackendError> {
        let url = self.url(kind);
        let response = self
            .client
            .get(&url)
            .query(&[("id", id)])
            .send()
            .await
            .map_err(|e| BackendError::new(format!("GET {} failed: {}", url, e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(BackendError::new(format!("GET {} returned {}", url, status)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| BackendError::new(format!("failed to read body of {}: {}", url, e)))?;

        if body.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(body))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::http::StatusCode as HttpStatus;
    use axum::routing::get;
    use axum::Router;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct IdQuery {
        id: i64,
    }

    async fn find_brand(Query(query): Query<IdQuery>) -> (HttpStatus, String) {
        match query.id {
            1 => (HttpStatus::OK, r#"{"id":1,"name":"Hilton"}"#.to_string()),
            2 => (HttpStatus::OK, String::new()),
            3 => (HttpStatus::INTERNAL_SERVER_ERROR, "boom".to_string()),
            _ => (HttpStatus::NOT_FOUND, String::new()),
        }
    }

    async fn find_intro(Query(query): Query<IdQuery>) -> String {
        format!(r#"{{"id":{},"intro":"text"}}"#, query.id)
    }

    async fn spawn_catalog() -> String {
        let app = Router::new()
            .route("/brand/findById", get(find_brand))
            .route("/product-intro/findById", get(find_intro));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/", addr)
    }

    #[test]
    fn test_query_paths() {
        assert_eq!(query_path(EntityKind::Brand), "brand/findById");
        assert_eq!(
            query_path(EntityKind::ProductSpecification),
            "product-specification/findById"
        );
        for kind in EntityKind::ALL {
            assert!(query_path(kind).ends_with("/findById"));
        }
    }

    #[tokio::test]
    async fn test_resolve_found() {
        let base = spawn_catalog().await;
        let resolver = HttpResolver::new(base, Duration::from_secs(5)).unwrap();
        assert!(!resolver.base_url().ends_with('/'));

        let record = resolver.resolve(EntityKind::Brand, 1).await.unwrap();
        assert_eq!(record.as_deref(), Some(r#"{"id":1,"name":"Hilton"}"#));

        let intro = resolver.resolve(EntityKind::ProductIntro, 9).await.unwrap();
        assert_eq!(intro.as_deref(), Some(r#"{"id":9,"intro":"text"}"#));
    }

    #[tokio::test]
    async fn test_resolve_not_found() {
        let base = spawn_catalog().await;
        let resolver = HttpResolver::new(base, Duration::from_secs(5)).unwrap();

        assert_eq!(resolver.resolve(EntityKind::Brand, 404).await.unwrap(), None);
        assert_eq!(resolver.resolve(EntityKind::Brand, 2).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_resolve_server_error() {
        let base = spawn_catalog().await;
        let resolver = HttpResolver::new(base, Duration::from_secs(5)).unwrap();

        let err = resolver.resolve(EntityKind::Brand, 3).await.unwrap_err();
        assert!(err.message().contains("500"));
    }

    #[tokio::test]
    async fn test_resolve_unreachable() {
        let resolver =
            HttpResolver::new("http://127.0.0.1:1", Duration::from_millis(500)).unwrap();
        assert!(resolver.resolve(EntityKind::Category, 1).await.is_err());
    }
}
