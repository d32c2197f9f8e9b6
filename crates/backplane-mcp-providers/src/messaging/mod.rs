//! Pulsar adapter over the admin REST API.
//!
//! A session is scoped to one tenant and namespace. Operations that take a
//! tenant or namespace fall back to those when the argument is omitted.

pub mod admin;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use backplane_mcp_protocol::{
    ConfigSchema, JsonSchema, ProviderSettings, ProviderType, ToolSchema,
};
use backplane_mcp_session::{Connection, ConnectionParams, OperationSpec, Provider, ProviderError};

use crate::common::{
    opt_bool, opt_str, opt_u64, plain_name, req_str, security, security_option, str_list,
};
use crate::guard;
use admin::{BasicAuth, PulsarAdminClient, TopicName, paths};

const DEFAULT_ADMIN_URL: &str = "http://localhost:8080";

/// Where a Pulsar session points
#[derive(Debug, Clone, PartialEq)]
pub struct PulsarTarget {
    pub admin_url: String,
    pub tenant: String,
    pub namespace: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl PulsarTarget {
    pub fn from_params(params: &ConnectionParams) -> Result<Self, ProviderError> {
        let tenant = params
            .str("tenant")
            .ok_or_else(|| ProviderError::invalid_argument("tenant", "required"))?;
        let namespace = params
            .str("namespace")
            .ok_or_else(|| ProviderError::invalid_argument("namespace", "required"))?;
        Ok(Self {
            admin_url: params.str_or("admin_url", DEFAULT_ADMIN_URL),
            tenant: plain_name("tenant", tenant)?.to_string(),
            namespace: plain_name("namespace", namespace)?.to_string(),
            username: params.str("username").map(str::to_string),
            password: params.str("password").map(str::to_string),
        })
    }

    fn auth(&self) -> Option<BasicAuth> {
        self.username.as_ref().map(|username| BasicAuth {
            username: username.clone(),
            password: self.password.clone(),
        })
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PulsarProvider;

impl PulsarProvider {
    pub fn new() -> Self {
        Self
    }
}

fn topic_op(name: &str, description: &str) -> OperationSpec {
    OperationSpec::new(name, description).required_param(
        "topic",
        JsonSchema::string()
            .with_description("Topic name: bare, tenant/namespace/topic, or persistent://..."),
    )
}

#[async_trait]
impl Provider for PulsarProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Pulsar
    }

    fn backend_name(&self) -> &'static str {
        "pulsar-admin"
    }

    fn describe_config(&self) -> ConfigSchema {
        ConfigSchema::common()
            .with_option(security_option(security::DISABLE_CREATE))
            .with_option(security_option(security::DISABLE_DELETE))
    }

    fn connect_schema(&self) -> ToolSchema {
        ToolSchema::object()
            .with_property(
                "admin_url",
                JsonSchema::string()
                    .with_description("Admin service URL (default http://localhost:8080)"),
            )
            .with_required_property("tenant", JsonSchema::string())
            .with_required_property("namespace", JsonSchema::string())
            .with_property("username", JsonSchema::string())
            .with_property("password", JsonSchema::string())
    }

    fn operations(&self) -> Vec<OperationSpec> {
        let string_list = || JsonSchema::array(JsonSchema::string());
        vec![
            OperationSpec::new("list_tenants", "List tenants"),
            OperationSpec::new("get_tenant_info", "Admin roles and allowed clusters of tenants")
                .param("tenant", JsonSchema::string())
                .param("tenants", string_list()),
            OperationSpec::new("create_tenant", "Create a tenant")
                .required_param("tenant", JsonSchema::string())
                .param("admin_roles", string_list())
                .param(
                    "allowed_clusters",
                    string_list().with_description("Defaults to every cluster"),
                )
                .mutating(),
            OperationSpec::new("delete_tenant", "Delete an empty tenant")
                .required_param("tenant", JsonSchema::string())
                .mutating(),
            OperationSpec::new("list_namespaces", "List namespaces of a tenant")
                .param("tenant", JsonSchema::string()),
            OperationSpec::new("get_namespace_info", "Policies of a namespace")
                .param("namespace", JsonSchema::string()),
            OperationSpec::new("create_namespace", "Create a namespace")
                .required_param("namespace", JsonSchema::string())
                .param("tenant", JsonSchema::string())
                .mutating(),
            OperationSpec::new("delete_namespace", "Delete an empty namespace")
                .required_param("namespace", JsonSchema::string())
                .param("tenant", JsonSchema::string())
                .mutating(),
            OperationSpec::new("list_topics", "List topics in a namespace")
                .param("tenant", JsonSchema::string())
                .param("namespace", JsonSchema::string())
                .param("persistent", JsonSchema::boolean()),
            topic_op("create_topic", "Create a topic, partitioned when partitions > 0")
                .param("partitions", JsonSchema::integer().with_range(0, 10_000))
                .param("persistent", JsonSchema::boolean())
                .mutating(),
            topic_op("delete_topic", "Delete a topic")
                .param("partitioned", JsonSchema::boolean())
                .param("persistent", JsonSchema::boolean())
                .mutating(),
            topic_op("get_topic_stats", "Topic statistics")
                .param("partitioned", JsonSchema::boolean()),
            topic_op("get_topic_info", "Partition metadata of a topic"),
            topic_op("list_subscriptions", "Subscriptions on a topic"),
            topic_op("create_subscription", "Create a subscription at the latest position")
                .required_param("subscription", JsonSchema::string())
                .mutating(),
            topic_op("delete_subscription", "Delete a subscription")
                .required_param("subscription", JsonSchema::string())
                .mutating(),
            OperationSpec::new("list_brokers", "Active brokers of a cluster")
                .param(
                    "cluster",
                    JsonSchema::string().with_description("Defaults to the first cluster"),
                ),
            OperationSpec::new("get_broker_info", "Load report of the serving broker"),
            OperationSpec::new("broker_healthcheck", "Run the broker health check"),
            OperationSpec::new("list_clusters", "List clusters"),
        ]
    }

    fn default_session_name(&self, params: &ConnectionParams) -> Option<String> {
        PulsarTarget::from_params(params)
            .ok()
            .map(|t| format!("{}_{}", t.tenant, t.namespace))
    }

    async fn connect(
        &self,
        params: &ConnectionParams,
        settings: &ProviderSettings,
    ) -> Result<Box<dyn Connection>, ProviderError> {
        let target = PulsarTarget::from_params(params)?;
        let client = PulsarAdminClient::new(
            &target.admin_url,
            target.auth(),
            settings.connect_timeout(),
            settings.request_timeout(),
        )?;

        client
            .get(&paths::clusters())
            .await
            .map_err(|e| ProviderError::Connect(format!("Pulsar admin not reachable: {}", e)))?;

        info!(
            "Connected to Pulsar admin at {} ({}/{})",
            client.base_url(),
            target.tenant,
            target.namespace
        );
        Ok(Box::new(PulsarConnection {
            client,
            tenant: target.tenant,
            namespace: target.namespace,
            settings: settings.clone(),
        }))
    }
}

struct PulsarConnection {
    client: PulsarAdminClient,
    tenant: String,
    namespace: String,
    settings: ProviderSettings,
}

impl PulsarConnection {
    fn tenant_arg<'a>(&'a self, args: &'a Map<String, Value>) -> Result<&'a str, ProviderError> {
        plain_name("tenant", opt_str(args, "tenant").unwrap_or(&self.tenant))
    }

    /// `namespace` may be `tenant/ns` or a bare name resolved against `tenant`.
    fn namespace_arg(&self, args: &Map<String, Value>) -> Result<(String, String), ProviderError> {
        let raw = opt_str(args, "namespace").unwrap_or(&self.namespace);
        match raw.split_once('/') {
            Some((tenant, ns)) => Ok((
                plain_name("tenant", tenant)?.to_string(),
                plain_name("namespace", ns)?.to_string(),
            )),
            None => Ok((
                self.tenant_arg(args)?.to_string(),
                plain_name("namespace", raw)?.to_string(),
            )),
        }
    }

    fn topic_arg(&self, args: &Map<String, Value>) -> Result<TopicName, ProviderError> {
        TopicName::parse(
            req_str(args, "topic")?,
            &self.tenant,
            &self.namespace,
            opt_bool(args, "persistent", true),
        )
    }

    async fn get_tenant_info(&self, args: &Map<String, Value>) -> Result<Value, ProviderError> {
        let mut tenants = str_list(args, "tenants");
        if let Some(t) = opt_str(args, "tenant") {
            tenants.insert(0, t.to_string());
        }
        if tenants.is_empty() {
            tenants.push(self.tenant.clone());
        }
        let mut info = Map::new();
        for tenant in tenants {
            let path = paths::tenant(plain_name("tenant", &tenant)?);
            info.insert(tenant, self.client.get(&path).await?);
        }
        Ok(Value::Object(info))
    }

    async fn create_tenant(&self, args: &Map<String, Value>) -> Result<Value, ProviderError> {
        let tenant = plain_name("tenant", req_str(args, "tenant")?)?;
        let mut clusters = str_list(args, "allowed_clusters");
        if clusters.is_empty() {
            clusters = string_array(&self.client.get(&paths::clusters()).await?);
        }
        let body = json!({
            "adminRoles": str_list(args, "admin_roles"),
            "allowedClusters": clusters,
        });
        self.client.put(&paths::tenant(tenant), Some(&body)).await?;
        Ok(json!({"created": tenant, "allowed_clusters": body["allowedClusters"]}))
    }

    async fn list_topics(&self, args: &Map<String, Value>) -> Result<Value, ProviderError> {
        let (tenant, namespace) = self.namespace_arg(args)?;
        let persistent = opt_bool(args, "persistent", true);
        let topics = self
            .client
            .get(&paths::topics(persistent, &tenant, &namespace))
            .await?;
        let partitioned = self
            .client
            .get(&paths::partitioned_topics(persistent, &tenant, &namespace))
            .await?;
        Ok(json!({
            "namespace": format!("{}/{}", tenant, namespace),
            "topics": topics,
            "partitioned_topics": partitioned,
        }))
    }

    async fn create_topic(&self, args: &Map<String, Value>) -> Result<Value, ProviderError> {
        let topic = self.topic_arg(args)?;
        let partitions = opt_u64(args, "partitions").unwrap_or(0);
        if partitions > 0 {
            self.client
                .put(&paths::partitions(&topic), Some(&json!(partitions)))
                .await?;
        } else {
            self.client.put(&topic.path(), None).await?;
        }
        Ok(json!({"created": topic.to_string(), "partitions": partitions}))
    }

    async fn delete_topic(&self, args: &Map<String, Value>) -> Result<Value, ProviderError> {
        let topic = self.topic_arg(args)?;
        if opt_bool(args, "partitioned", false) {
            self.client.delete(&paths::partitions(&topic)).await?;
        } else {
            self.client.delete(&topic.path()).await?;
        }
        Ok(json!({"deleted": topic.to_string()}))
    }

    async fn list_brokers(&self, args: &Map<String, Value>) -> Result<Value, ProviderError> {
        let cluster = match opt_str(args, "cluster") {
            Some(c) => c.to_string(),
            None => string_array(&self.client.get(&paths::clusters()).await?)
                .into_iter()
                .next()
                .ok_or_else(|| ProviderError::Exec("broker reports no clusters".to_string()))?,
        };
        let brokers = self
            .client
            .get(&paths::brokers(plain_name("cluster", &cluster)?))
            .await?;
        Ok(json!({"cluster": cluster, "brokers": brokers}))
    }
}

#[async_trait]
impl Connection for PulsarConnection {
    async fn execute(
        &mut self,
        command: &str,
        args: &Map<String, Value>,
    ) -> Result<Value, ProviderError> {
        guard::check_admin_operation(command, &self.settings)?;
        debug!("Pulsar operation {}", command);

        match command {
            "list_tenants" => self.client.get(&paths::tenants()).await,
            "get_tenant_info" => self.get_tenant_info(args).await,
            "create_tenant" => self.create_tenant(args).await,
            "delete_tenant" => {
                let tenant = plain_name("tenant", req_str(args, "tenant")?)?;
                self.client.delete(&paths::tenant(tenant)).await?;
                Ok(json!({"deleted": tenant}))
            }
            "list_namespaces" => {
                let tenant = self.tenant_arg(args)?;
                self.client.get(&paths::namespaces(tenant)).await
            }
            "get_namespace_info" => {
                let (tenant, namespace) = self.namespace_arg(args)?;
                self.client.get(&paths::namespace(&tenant, &namespace)).await
            }
            "create_namespace" => {
                let (tenant, namespace) = self.namespace_arg(args)?;
                self.client
                    .put(&paths::namespace(&tenant, &namespace), None)
                    .await?;
                Ok(json!({"created": format!("{}/{}", tenant, namespace)}))
            }
            "delete_namespace" => {
                let (tenant, namespace) = self.namespace_arg(args)?;
                self.client
                    .delete(&paths::namespace(&tenant, &namespace))
                    .await?;
                Ok(json!({"deleted": format!("{}/{}", tenant, namespace)}))
            }
            "list_topics" => self.list_topics(args).await,
            "create_topic" => self.create_topic(args).await,
            "delete_topic" => self.delete_topic(args).await,
            "get_topic_stats" => {
                let topic = self.topic_arg(args)?;
                let partitioned = opt_bool(args, "partitioned", false);
                self.client.get(&paths::stats(&topic, partitioned)).await
            }
            "get_topic_info" => {
                let topic = self.topic_arg(args)?;
                let metadata = self.client.get(&paths::partitions(&topic)).await?;
                Ok(json!({"topic": topic.to_string(), "metadata": metadata}))
            }
            "list_subscriptions" => {
                let topic = self.topic_arg(args)?;
                self.client.get(&paths::subscriptions(&topic)).await
            }
            "create_subscription" => {
                let topic = self.topic_arg(args)?;
                let subscription = plain_name("subscription", req_str(args, "subscription")?)?;
                self.client
                    .put(&paths::subscription(&topic, subscription), None)
                    .await?;
                Ok(json!({"created": subscription, "topic": topic.to_string()}))
            }
            "delete_subscription" => {
                let topic = self.topic_arg(args)?;
                let subscription = plain_name("subscription", req_str(args, "subscription")?)?;
                self.client
                    .delete(&paths::subscription(&topic, subscription))
                    .await?;
                Ok(json!({"deleted": subscription, "topic": topic.to_string()}))
            }
            "list_brokers" => self.list_brokers(args).await,
            "get_broker_info" => self.client.get(&paths::load_report()).await,
            "broker_healthcheck" => {
                let body = self.client.get(&paths::health()).await?;
                Ok(json!({"healthy": true, "response": body}))
            }
            "list_clusters" => self.client.get(&paths::clusters()).await,
            other => Err(ProviderError::UnsupportedCommand(other.to_string())),
        }
    }

    async fn is_healthy(&mut self) -> bool {
        match self.client.get(&paths::health()).await {
            Ok(_) => true,
            Err(e) => {
                debug!("Pulsar health check failed: {}", e);
                false
            }
        }
    }

    async fn disconnect(&mut self) -> Result<(), ProviderError> {
        // Stateless HTTP; pooled sockets close with the client
        Ok(())
    }
}

fn string_array(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
