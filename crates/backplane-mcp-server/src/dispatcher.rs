//! Command dispatch.
//!
//! Resolves the command, checks its arguments, then calls either a registry
//! operation or `Session::run`. Nothing is touched before the arguments pass.

use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::debug;

use backplane_mcp_protocol::{BackplaneError, CommandFailure, ErrorContext, ProviderType};
use backplane_mcp_session::{ConnectionParams, SessionRegistries, SessionRegistry};

use crate::catalogue::{CommandCatalogue, CommandKind, CommandSpec, SESSION_ID_ARG};

/// A failure before context is attached, with the session it concerns if known
struct Failed {
    session_id: Option<String>,
    error: BackplaneError,
}

impl Failed {
    fn at(session_id: impl Into<String>, error: BackplaneError) -> Self {
        Self {
            session_id: Some(session_id.into()),
            error,
        }
    }
}

impl From<BackplaneError> for Failed {
    fn from(error: BackplaneError) -> Self {
        Self {
            session_id: None,
            error,
        }
    }
}

fn optional_str<'a>(args: &'a Map<String, Value>, field: &str) -> Option<&'a str> {
    args.get(field).and_then(Value::as_str)
}

pub struct Dispatcher {
    catalogue: CommandCatalogue,
    registries: Arc<SessionRegistries>,
}

impl Dispatcher {
    pub fn new(catalogue: CommandCatalogue, registries: Arc<SessionRegistries>) -> Self {
        Self {
            catalogue,
            registries,
        }
    }

    pub fn catalogue(&self) -> &CommandCatalogue {
        &self.catalogue
    }

    pub fn registries(&self) -> &Arc<SessionRegistries> {
        &self.registries
    }

    /// Run one command. `arguments` must be an object or null.
    pub async fn invoke(&self, name: &str, arguments: Value) -> Result<Value, CommandFailure> {
        let context = ErrorContext::command(name);
        let Some(spec) = self.catalogue.get(name) else {
            return Err(CommandFailure::new(
                context,
                BackplaneError::UnknownCommand(name.to_string()),
            ));
        };
        let context = context.with_provider(spec.provider);

        let args = match arguments {
            Value::Null => Map::new(),
            Value::Object(map) => map,
            other => {
                return Err(CommandFailure::new(
                    context,
                    BackplaneError::invalid_argument(
                        "arguments",
                        format!("expected an object, got {}", other),
                    ),
                ));
            }
        };
        if spec.validates_arguments() {
            spec.input_schema
                .validate(&args)
                .map_err(|violation| CommandFailure::new(context.clone(), violation.into()))?;
        }

        debug!(provider = %spec.provider, command = %name, "Dispatching command");
        self.execute(spec, args).await.map_err(|failed| {
            let context = match failed.session_id {
                Some(id) => context.with_session(id),
                None => context,
            };
            debug!(
                provider = %spec.provider,
                command = %name,
                error = %failed.error,
                "Command failed"
            );
            CommandFailure::new(context, failed.error)
        })
    }

    async fn execute(
        &self,
        spec: &CommandSpec,
        mut args: Map<String, Value>,
    ) -> Result<Value, Failed> {
        let provider = spec.provider;
        let registry = self.registries.registry(provider)?;

        match &spec.kind {
            CommandKind::Connect => {
                let name = match args.remove("name") {
                    Some(Value::String(name)) => Some(name),
                    _ => None,
                };
                let session = registry
                    .create(name.clone(), ConnectionParams::new(args))
                    .await
                    .map_err(|e| match &name {
                        Some(name) => Failed::at(name.as_str(), e),
                        None => Failed::from(e),
                    })?;
                let is_current = registry.current_id().await.as_deref() == Some(session.id());
                Ok(json!({ "session": session.summary(is_current) }))
            }
            CommandKind::Current => {
                let session = registry.current().await?;
                Ok(json!({ "session": session.summary(true) }))
            }
            CommandKind::History => {
                let name = optional_str(&args, "name");
                let limit = args
                    .get("limit")
                    .and_then(Value::as_u64)
                    .map(|n| n as usize);
                let (session, entries) = registry
                    .history(name, limit)
                    .await
                    .map_err(|e| session_failure(name, e))?;
                Ok(json!({
                    "session": session,
                    "count": entries.len(),
                    "entries": entries,
                }))
            }
            CommandKind::Switch => {
                let name = optional_str(&args, "name").unwrap_or_default();
                let current = registry
                    .switch(name)
                    .await
                    .map_err(|e| Failed::at(name, e))?;
                Ok(json!({ "current": current }))
            }
            CommandKind::List => Ok(list_sessions(provider, registry).await),
            CommandKind::Close => {
                let name = optional_str(&args, "name");
                let switch_to = optional_str(&args, "switch_to");
                let outcome = registry
                    .close(name, switch_to)
                    .await
                    .map_err(|e| session_failure(name, e))?;
                Ok(json!({
                    "closed": outcome.closed,
                    "current": outcome.current,
                }))
            }
            CommandKind::GetConfig => {
                let store = self.registries.config_store();
                let settings = store.get(provider)?;
                let schema = store.schema(provider)?;
                Ok(json!({
                    "provider": provider,
                    "settings": settings.to_json(),
                    "options": schema.options,
                }))
            }
            CommandKind::UpdateConfig => {
                let settings = self.registries.config_store().update(provider, &args)?;
                Ok(json!({
                    "provider": provider,
                    "settings": settings.to_json(),
                }))
            }
            CommandKind::Operation { operation } => {
                let session_id = match args.remove(SESSION_ID_ARG) {
                    Some(Value::String(id)) => Some(id),
                    _ => None,
                };
                let session = registry
                    .resolve(session_id.as_deref())
                    .await
                    .map_err(|e| session_failure(session_id.as_deref(), e))?;
                let result = session
                    .run(operation, args)
                    .await
                    .map_err(|e| Failed::at(session.id(), e))?;
                Ok(json!({
                    "session_id": session.id(),
                    "result": result,
                }))
            }
        }
    }
}

fn session_failure(session_id: Option<&str>, error: BackplaneError) -> Failed {
    match session_id {
        Some(id) => Failed::at(id, error),
        None => Failed::from(error),
    }
}

async fn list_sessions(provider: ProviderType, registry: &SessionRegistry) -> Value {
    let sessions = registry.list().await;
    let current = sessions.iter().find(|s| s.is_current).map(|s| s.id.clone());
    json!({
        "provider": provider,
        "current": current,
        "count": sessions.len(),
        "sessions": sessions,
    })
}
