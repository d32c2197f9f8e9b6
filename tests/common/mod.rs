//! Shared fixtures: dispatchers and servers backed by the mock provider.

#![allow(dead_code)]

use serde_json::{Map, Value, json};
use std::sync::Arc;

use backplane_mcp_protocol::{CommandFailure, ErrorKind, ProviderType};
use backplane_mcp_server::{BackplaneServer, Dispatcher};
use backplane_mcp_session::Provider;
use backplane_mcp_session::testing::MockProvider;

pub struct Fixture {
    pub server: BackplaneServer,
    pub providers: Vec<MockProvider>,
}

impl Fixture {
    /// A server with one mock provider per type, each with `settings` applied.
    pub fn new(types: &[ProviderType], settings: Value) -> Self {
        let providers: Vec<MockProvider> = types.iter().map(|pt| MockProvider::new(*pt)).collect();
        let mut builder = BackplaneServer::builder().name("backplane-test");
        for provider in &providers {
            builder = builder.provider(Arc::new(provider.clone()) as Arc<dyn Provider>);
            if let Value::Object(patch) = &settings
                && !patch.is_empty()
            {
                builder = builder.settings(provider.provider_type(), patch.clone());
            }
        }
        let server = builder.build().expect("fixture server builds");
        Self { server, providers }
    }

    pub fn mysql() -> Self {
        Self::new(&[ProviderType::Mysql], json!({}))
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        self.server.dispatcher()
    }

    pub fn provider(&self, pt: ProviderType) -> &MockProvider {
        self.providers
            .iter()
            .find(|p| p.provider_type() == pt)
            .expect("provider enabled in fixture")
    }

    pub async fn ok(&self, command: &str, args: Value) -> Value {
        match self.dispatcher().invoke(command, args).await {
            Ok(value) => value,
            Err(failure) => panic!("{} failed: {}", command, failure.to_payload()),
        }
    }

    pub async fn fail(&self, command: &str, args: Value) -> CommandFailure {
        match self.dispatcher().invoke(command, args).await {
            Ok(value) => panic!("{} unexpectedly succeeded: {}", command, value),
            Err(failure) => failure,
        }
    }

    pub async fn current(&self, pt: ProviderType) -> Option<String> {
        match self.dispatcher().invoke(&format!("current_{}", pt), json!({})).await {
            Ok(value) => value["session"]["id"].as_str().map(str::to_string),
            Err(failure) => {
                assert_eq!(failure.kind(), ErrorKind::NoActiveSession);
                None
            }
        }
    }
}

pub fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {}", other),
    }
}
