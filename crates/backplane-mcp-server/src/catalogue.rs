//! Command catalogue: every tool the server advertises.
//!
//! Commands are generated per enabled provider from the adapter's declared
//! connect schema, operations and option schema:
//!
//! - session verbs `connect_<p>`, `current_<p>`, `history_<p>`, `switch_<p>`,
//!   `list_<p>`, `close_<p>`
//! - operation verbs `<p>_<operation>`, each with an optional `session_id`
//! - `<p>_update_config` and `<p>_get_config_details`
//!
//! With exactly one provider enabled, the operation and config verbs are also
//! registered without the prefix.

use std::collections::BTreeMap;

use backplane_mcp_protocol::{JsonSchema, ProviderType, Tool, ToolSchema};
use backplane_mcp_protocol::tools::ToolAnnotations;
use backplane_mcp_session::{OperationSpec, Provider, SessionRegistries};

use crate::error::ServerError;

/// Argument selecting the target session of an operation command
pub const SESSION_ID_ARG: &str = "session_id";

/// What a command does once its arguments are accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    Connect,
    Current,
    History,
    Switch,
    List,
    Close,
    GetConfig,
    UpdateConfig,
    /// Forwarded to the session's connection as `operation`
    Operation { operation: String },
}

/// One registered command
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub name: String,
    pub provider: ProviderType,
    pub kind: CommandKind,
    pub description: String,
    pub input_schema: ToolSchema,
    pub read_only: bool,
    pub destructive: bool,
}

impl CommandSpec {
    /// Whether the dispatcher checks arguments against `input_schema`.
    ///
    /// Settings updates are checked by the config store instead, so a bad
    /// option surfaces as a validation error rather than a request error.
    pub fn validates_arguments(&self) -> bool {
        self.kind != CommandKind::UpdateConfig
    }

    pub fn to_tool(&self) -> Tool {
        Tool {
            name: self.name.clone(),
            description: Some(self.description.clone()),
            input_schema: self.input_schema.clone(),
            annotations: Some(ToolAnnotations {
                read_only_hint: Some(self.read_only),
                destructive_hint: self.destructive.then_some(true),
            }),
        }
    }
}

/// Builder for [`CommandSpec`]
pub struct CommandBuilder {
    name: String,
    provider: ProviderType,
    kind: CommandKind,
    description: Option<String>,
    input_schema: ToolSchema,
    read_only: bool,
    destructive: bool,
}

impl CommandBuilder {
    pub fn new(name: impl Into<String>, provider: ProviderType, kind: CommandKind) -> Self {
        Self {
            name: name.into(),
            provider,
            kind,
            description: None,
            input_schema: ToolSchema::object(),
            read_only: true,
            destructive: false,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn param(mut self, name: impl Into<String>, schema: JsonSchema) -> Self {
        self.input_schema = self.input_schema.with_property(name, schema);
        self
    }

    pub fn required_param(mut self, name: impl Into<String>, schema: JsonSchema) -> Self {
        self.input_schema = self.input_schema.with_required_property(name, schema);
        self
    }

    /// Add every property of `schema`. Properties already declared win.
    pub fn merge_schema(mut self, schema: &ToolSchema) -> Self {
        self.input_schema = self.input_schema.merge(schema);
        self
    }

    /// Replace the argument schema outright.
    pub fn input_schema(mut self, schema: ToolSchema) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn mutating(mut self) -> Self {
        self.read_only = false;
        self
    }

    pub fn destructive(mut self) -> Self {
        self.read_only = false;
        self.destructive = true;
        self
    }

    pub fn build(self) -> CommandSpec {
        let description = self
            .description
            .unwrap_or_else(|| format!("{} command '{}'", self.provider, self.name));
        CommandSpec {
            name: self.name,
            provider: self.provider,
            kind: self.kind,
            description,
            input_schema: self.input_schema,
            read_only: self.read_only,
            destructive: self.destructive,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandCatalogue {
    commands: BTreeMap<String, CommandSpec>,
}

impl CommandCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: CommandSpec) -> Result<(), ServerError> {
        if self.commands.contains_key(&spec.name) {
            return Err(ServerError::DuplicateCommand(spec.name));
        }
        self.commands.insert(spec.name.clone(), spec);
        Ok(())
    }

    /// Every command for every provider the registries serve.
    pub fn for_registries(registries: &SessionRegistries) -> Result<Self, ServerError> {
        let provider_types = registries.provider_types();
        if provider_types.is_empty() {
            return Err(ServerError::NoProviders);
        }
        let with_aliases = provider_types.len() == 1;

        let mut catalogue = Self::new();
        for provider_type in provider_types {
            let Some(registry) = registries.get(provider_type) else {
                continue;
            };
            for spec in provider_commands(registry.provider().as_ref(), with_aliases) {
                catalogue.register(spec)?;
            }
        }
        Ok(catalogue)
    }

    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    /// Tool descriptors, sorted by name.
    pub fn tools(&self) -> Vec<Tool> {
        self.commands.values().map(CommandSpec::to_tool).collect()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

fn session_name(description: &str) -> JsonSchema {
    JsonSchema::string().with_description(description)
}

/// All commands of one provider.
pub fn provider_commands(provider: &dyn Provider, with_aliases: bool) -> Vec<CommandSpec> {
    let pt = provider.provider_type();
    let category = pt.category();

    let mut commands = vec![
        CommandBuilder::new(format!("connect_{}", pt), pt, CommandKind::Connect)
            .description(format!(
                "Open a new named {} session. The first connected session becomes current.",
                category
            ))
            .param(
                "name",
                session_name("Session name; generated from the connection parameters when omitted"),
            )
            .merge_schema(&provider.connect_schema())
            .mutating()
            .build(),
        CommandBuilder::new(format!("current_{}", pt), pt, CommandKind::Current)
            .description(format!("Show the current {} session", category))
            .build(),
        CommandBuilder::new(format!("history_{}", pt), pt, CommandKind::History)
            .description(format!(
                "Show the command history of a {} session, oldest first",
                category
            ))
            .param("name", session_name("Session name; defaults to the current session"))
            .param(
                "limit",
                JsonSchema::integer()
                    .with_range(1, 1000)
                    .with_description("Return only the most recent entries"),
            )
            .build(),
        CommandBuilder::new(format!("switch_{}", pt), pt, CommandKind::Switch)
            .description(format!("Make another {} session current", category))
            .required_param(
                "name",
                session_name("Session name, or a 1-based position in the session list"),
            )
            .mutating()
            .build(),
        CommandBuilder::new(format!("list_{}", pt), pt, CommandKind::List)
            .description(format!("List {} sessions, newest first", category))
            .build(),
        CommandBuilder::new(format!("close_{}", pt), pt, CommandKind::Close)
            .description(format!(
                "Close a {} session and release its connection",
                category
            ))
            .param("name", session_name("Session name; defaults to the current session"))
            .param(
                "switch_to",
                session_name("Connected session to make current in the same step"),
            )
            .destructive()
            .build(),
    ];

    let mut prefixed = Vec::new();
    for operation in provider.operations() {
        prefixed.push(operation_command(pt, &operation));
    }
    prefixed.push(
        CommandBuilder::new(format!("{}_get_config_details", pt), pt, CommandKind::GetConfig)
            .description(format!(
                "Show the {} runtime settings and the options they accept",
                category
            ))
            .build(),
    );
    prefixed.push(
        CommandBuilder::new(format!("{}_update_config", pt), pt, CommandKind::UpdateConfig)
            .description(format!(
                "Change {} runtime settings. All fields are validated before any is applied; \
                 sessions opened afterwards use the new values.",
                category
            ))
            .input_schema(provider.describe_config().to_tool_schema())
            .mutating()
            .build(),
    );

    if with_aliases {
        let prefix = format!("{}_", pt);
        let aliases: Vec<CommandSpec> = prefixed
            .iter()
            .filter_map(|spec| {
                spec.name.strip_prefix(&prefix).map(|bare| CommandSpec {
                    name: bare.to_string(),
                    ..spec.clone()
                })
            })
            .collect();
        prefixed.extend(aliases);
    }

    commands.extend(prefixed);
    commands
}

fn operation_command(pt: ProviderType, operation: &OperationSpec) -> CommandSpec {
    let builder = CommandBuilder::new(
        format!("{}_{}", pt, operation.name),
        pt,
        CommandKind::Operation {
            operation: operation.name.clone(),
        },
    )
    .description(operation.description.clone())
    .input_schema(operation.input_schema.clone())
    .param(
        SESSION_ID_ARG,
        session_name("Target session; defaults to the current session"),
    );
    if operation.read_only {
        builder.build()
    } else {
        builder.mutating().build()
    }
}
