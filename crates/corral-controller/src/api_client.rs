use crate::client::ClusterClient;
use crate::error::{ControllerError, Result};
use async_trait::async_trait;
use corral_core::types::collection_path;
use corral_core::{Event, Job, Pod, Replica, Resource, ResourceKey};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

/// HTTP client for a Kubernetes-style API server
pub struct ApiClient {
    base_url: String,
    token: Option<String>,
    client: Client,
}

/// List envelope returned by collection endpoints
#[derive(Debug, Deserialize)]
struct ObjectList {
    #[serde(default)]
    items: Vec<serde_json::Value>,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            client: Client::new(),
        }
    }

    /// Authenticate every request with a bearer token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!("{} {}", method, url);
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(
        &self,
        builder: RequestBuilder,
        method: &Method,
        path: &str,
        kind: &str,
        key: &str,
    ) -> Result<Response> {
        let resp = builder
            .send()
            .await
            .map_err(|e| ControllerError::transport_error(format!("HTTP request failed: {}", e)))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => ControllerError::not_found(kind, key),
            StatusCode::CONFLICT if *method == Method::POST => {
                ControllerError::already_exists(kind, key)
            }
            StatusCode::CONFLICT => ControllerError::conflict(kind, key),
            _ => ControllerError::api_error(method.as_str(), path, status.as_u16(), body),
        })
    }

    async fn get_object<T: Resource>(&self, namespace: &str, name: &str) -> Result<T> {
        let key = ResourceKey::new(T::gvk(), namespace, name);
        let path = key.api_path();
        let method = Method::GET;
        let resp = self
            .send(
                self.request(method.clone(), &path),
                &method,
                &path,
                &key.gvk.kind,
                &key.queue_key(),
            )
            .await?;

        resp.json::<T>().await.map_err(|e| {
            ControllerError::transport_error(format!("Failed to parse {}: {}", key.gvk.kind, e))
        })
    }

    async fn list_objects<T: Resource>(&self, namespace: &str) -> Result<Vec<T>> {
        let gvk = T::gvk();
        let path = collection_path(&gvk, namespace);
        let method = Method::GET;
        let resp = self
            .send(
                self.request(method.clone(), &path),
                &method,
                &path,
                &gvk.kind,
                namespace,
            )
            .await?;

        let list: ObjectList = resp.json().await.map_err(|e| {
            ControllerError::transport_error(format!("Failed to parse {} list: {}", gvk.kind, e))
        })?;

        let mut objects = Vec::with_capacity(list.items.len());
        for item in list.items {
            match serde_json::from_value::<T>(item) {
                Ok(obj) => objects.push(obj),
                Err(e) => warn!("Failed to parse {} from list: {}", gvk.kind, e),
            }
        }
        Ok(objects)
    }

    async fn create_object<T: Resource>(&self, namespace: &str, obj: &T) -> Result<T> {
        let gvk = T::gvk();
        let path = collection_path(&gvk, namespace);
        let name = obj.metadata().name.clone().unwrap_or_default();
        let method = Method::POST;
        let resp = self
            .send(
                self.request(method.clone(), &path).json(obj),
                &method,
                &path,
                &gvk.kind,
                &corral_core::meta_namespace_key(namespace, &name),
            )
            .await?;

        resp.json::<T>().await.map_err(|e| {
            ControllerError::transport_error(format!("Failed to parse {}: {}", gvk.kind, e))
        })
    }

    async fn replace_object<T: Resource>(&self, obj: &T) -> Result<T> {
        let key = obj.resource_key()?;
        let path = key.api_path();
        let method = Method::PUT;
        let resp = self
            .send(
                self.request(method.clone(), &path).json(obj),
                &method,
                &path,
                &key.gvk.kind,
                &key.queue_key(),
            )
            .await?;

        resp.json::<T>().await.map_err(|e| {
            ControllerError::transport_error(format!("Failed to parse {}: {}", key.gvk.kind, e))
        })
    }

    async fn delete_object<T: Resource>(
        &self,
        namespace: &str,
        name: &str,
        propagation_policy: Option<&str>,
    ) -> Result<()> {
        let key = ResourceKey::new(T::gvk(), namespace, name);
        let path = key.api_path();
        let method = Method::DELETE;
        let mut builder = self.request(method.clone(), &path);
        if let Some(policy) = propagation_policy {
            builder = builder.query(&[("propagationPolicy", policy)]);
        }
        self.send(builder, &method, &path, &key.gvk.kind, &key.queue_key())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ClusterClient for ApiClient {
    async fn get_replica(&self, namespace: &str, name: &str) -> Result<Replica> {
        self.get_object(namespace, name).await
    }

    async fn list_replicas(&self, namespace: &str) -> Result<Vec<Replica>> {
        self.list_objects(namespace).await
    }

    async fn update_replica(&self, replica: &Replica) -> Result<Replica> {
        self.replace_object(replica).await
    }

    async fn delete_replica(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete_object::<Replica>(namespace, name, None).await
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>> {
        self.list_objects(namespace).await
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod> {
        self.create_object(namespace, pod).await
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete_object::<Pod>(namespace, name, None).await
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job> {
        self.get_object(namespace, name).await
    }

    async fn list_jobs(&self, namespace: &str) -> Result<Vec<Job>> {
        self.list_objects(namespace).await
    }

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job> {
        self.create_object(namespace, job).await
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete_object::<Job>(namespace, name, Some("Background"))
            .await
    }

    async fn create_event(&self, namespace: &str, event: &Event) -> Result<Event> {
        self.create_object(namespace, event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = ApiClient::new("http://127.0.0.1:6443/");
        assert_eq!(client.base_url(), "http://127.0.0.1:6443");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        // Port 9 (discard) on localhost is not served in test environments
        let client = ApiClient::new("http://127.0.0.1:9").with_token("secret");
        let err = client.get_replica("ns", "r").await.unwrap_err();
        assert!(matches!(err, ControllerError::TransportError { .. }));
    }
}
