//! Minimal Pulsar admin REST client (`/admin/v2`).

use reqwest::{Client, Method};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use backplane_mcp_session::ProviderError;

use crate::common::plain_name;

const ADMIN_PREFIX: &str = "/admin/v2";

fn segment(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

/// Fully qualified topic name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicName {
    pub persistent: bool,
    pub tenant: String,
    pub namespace: String,
    pub local: String,
}

impl TopicName {
    /// Accepts `persistent://t/ns/topic`, `non-persistent://t/ns/topic`,
    /// `t/ns/topic`, or a bare topic resolved against the defaults.
    pub fn parse(
        input: &str,
        default_tenant: &str,
        default_namespace: &str,
        persistent: bool,
    ) -> Result<Self, ProviderError> {
        let input = input.trim();
        let (persistent, rest) = if let Some(rest) = input.strip_prefix("persistent://") {
            (true, rest)
        } else if let Some(rest) = input.strip_prefix("non-persistent://") {
            (false, rest)
        } else {
            (persistent, input)
        };

        let parts: Vec<&str> = rest.split('/').collect();
        let (tenant, namespace, local) = match parts.as_slice() {
            [local] => (default_tenant, default_namespace, *local),
            [tenant, namespace, local] => (*tenant, *namespace, *local),
            _ => {
                return Err(ProviderError::invalid_argument(
                    "topic",
                    format!("'{}' is not a topic name", input),
                ));
            }
        };

        Ok(Self {
            persistent,
            tenant: plain_name("tenant", tenant)?.to_string(),
            namespace: plain_name("namespace", namespace)?.to_string(),
            local: plain_name("topic", local)?.to_string(),
        })
    }

    pub fn domain(&self) -> &'static str {
        if self.persistent {
            "persistent"
        } else {
            "non-persistent"
        }
    }

    /// Base REST path of the topic.
    pub fn path(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            ADMIN_PREFIX,
            self.domain(),
            segment(&self.tenant),
            segment(&self.namespace),
            segment(&self.local)
        )
    }
}

impl std::fmt::Display for TopicName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}://{}/{}/{}",
            self.domain(),
            self.tenant,
            self.namespace,
            self.local
        )
    }
}

pub mod paths {
    use super::{ADMIN_PREFIX, TopicName, segment};

    pub fn tenants() -> String {
        format!("{}/tenants", ADMIN_PREFIX)
    }

    pub fn tenant(tenant: &str) -> String {
        format!("{}/tenants/{}", ADMIN_PREFIX, segment(tenant))
    }

    pub fn namespaces(tenant: &str) -> String {
        format!("{}/namespaces/{}", ADMIN_PREFIX, segment(tenant))
    }

    pub fn namespace(tenant: &str, namespace: &str) -> String {
        format!(
            "{}/namespaces/{}/{}",
            ADMIN_PREFIX,
            segment(tenant),
            segment(namespace)
        )
    }

    pub fn topics(persistent: bool, tenant: &str, namespace: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            ADMIN_PREFIX,
            if persistent { "persistent" } else { "non-persistent" },
            segment(tenant),
            segment(namespace)
        )
    }

    pub fn partitioned_topics(persistent: bool, tenant: &str, namespace: &str) -> String {
        format!("{}/partitioned", topics(persistent, tenant, namespace))
    }

    pub fn partitions(topic: &TopicName) -> String {
        format!("{}/partitions", topic.path())
    }

    pub fn stats(topic: &TopicName, partitioned: bool) -> String {
        if partitioned {
            format!("{}/partitioned-stats", topic.path())
        } else {
            format!("{}/stats", topic.path())
        }
    }

    pub fn subscriptions(topic: &TopicName) -> String {
        format!("{}/subscriptions", topic.path())
    }

    pub fn subscription(topic: &TopicName, subscription: &str) -> String {
        format!("{}/subscription/{}", topic.path(), segment(subscription))
    }

    pub fn clusters() -> String {
        format!("{}/clusters", ADMIN_PREFIX)
    }

    pub fn brokers(cluster: &str) -> String {
        format!("{}/brokers/{}", ADMIN_PREFIX, segment(cluster))
    }

    pub fn load_report() -> String {
        format!("{}/broker-stats/load-report", ADMIN_PREFIX)
    }

    pub fn health() -> String {
        format!("{}/brokers/health", ADMIN_PREFIX)
    }
}

/// Credentials for HTTP basic auth
#[derive(Debug, Clone)]
pub struct BasicAuth {
    pub username: String,
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PulsarAdminClient {
    http: Client,
    base_url: String,
    auth: Option<BasicAuth>,
}

impl PulsarAdminClient {
    pub fn new(
        base_url: &str,
        auth: Option<BasicAuth>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ProviderError::invalid_argument(
                "admin_url",
                format!("'{}' must start with http:// or https://", base_url),
            ));
        }
        let http = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| ProviderError::Connect(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_url,
            auth,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send one request. Status >= 400 is an exec error naming method, path,
    /// status and body. Empty bodies decode as null, non-JSON bodies as strings.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Pulsar admin {} {}", method, path);

        let mut request = self
            .http
            .request(method.clone(), &url)
            .header("Accept", "application/json");
        if let Some(auth) = &self.auth {
            request = request.basic_auth(&auth.username, auth.password.as_ref());
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_connect() {
                warn!("Pulsar admin unreachable at {}: {}", self.base_url, e);
                ProviderError::ConnectionLost(e.to_string())
            } else {
                ProviderError::Exec(format!("{} {} failed: {}", method, path, e))
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::Exec(format!("{} {}: unreadable body: {}", method, path, e)))?;

        if status.as_u16() >= 400 {
            return Err(ProviderError::Exec(format!(
                "{} {} returned {}: {}",
                method,
                path,
                status,
                text.trim()
            )));
        }
        Ok(decode_body(&text))
    }

    pub async fn get(&self, path: &str) -> Result<Value, ProviderError> {
        self.request(Method::GET, path, None).await
    }

    pub async fn put(&self, path: &str, body: Option<&Value>) -> Result<Value, ProviderError> {
        self.request(Method::PUT, path, body).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value, ProviderError> {
        self.request(Method::DELETE, path, None).await
    }
}

fn decode_body(text: &str) -> Value {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_topic_name_forms() {
        let t = TopicName::parse("persistent://acme/orders/created", "x", "y", false).unwrap();
        assert!(t.persistent);
        assert_eq!((t.tenant.as_str(), t.namespace.as_str()), ("acme", "orders"));
        assert_eq!(t.to_string(), "persistent://acme/orders/created");

        let t = TopicName::parse("events", "acme", "orders", true).unwrap();
        assert_eq!(t.to_string(), "persistent://acme/orders/events");

        let t = TopicName::parse("non-persistent://a/b/c", "x", "y", true).unwrap();
        assert!(!t.persistent);

        let t = TopicName::parse("a/b/c", "x", "y", false).unwrap();
        assert_eq!(t.to_string(), "non-persistent://a/b/c");
    }

    #[test]
    fn test_topic_name_rejects_bad_shapes() {
        assert!(TopicName::parse("a/b", "x", "y", true).is_err());
        assert!(TopicName::parse("", "x", "y", true).is_err());
        assert!(TopicName::parse("a b", "x", "y", true).is_err());
    }

    #[test]
    fn test_paths() {
        let topic = TopicName::parse("acme/orders/created", "x", "y", true).unwrap();
        assert_eq!(topic.path(), "/admin/v2/persistent/acme/orders/created");
        assert_eq!(
            paths::stats(&topic, true),
            "/admin/v2/persistent/acme/orders/created/partitioned-stats"
        );
        assert_eq!(
            paths::subscription(&topic, "audit sub"),
            "/admin/v2/persistent/acme/orders/created/subscription/audit%20sub"
        );
        assert_eq!(paths::namespace("acme", "orders"), "/admin/v2/namespaces/acme/orders");
        assert_eq!(
            paths::partitioned_topics(false, "acme", "orders"),
            "/admin/v2/non-persistent/acme/orders/partitioned"
        );
        assert_eq!(paths::health(), "/admin/v2/brokers/health");
    }

    #[test]
    fn test_decode_body() {
        assert_eq!(decode_body(""), Value::Null);
        assert_eq!(decode_body("[\"a\"]"), json!(["a"]));
        assert_eq!(decode_body("ok\n"), json!("ok"));
    }

    #[test]
    fn test_client_requires_http_url() {
        let d = Duration::from_secs(1);
        assert!(PulsarAdminClient::new("localhost:8080", None, d, d).is_err());
        let client = PulsarAdminClient::new("http://localhost:8080/", None, d, d).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080");
    }
}
