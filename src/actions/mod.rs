//! Action registry and dispatch.
//!
//! Actions are registered by name at startup together with an optional
//! input schema and the ordered list of service dependencies their handler
//! needs. Dispatch extracts the `action` field from a job payload, validates
//! the remaining fields, resolves dependencies from the container, and
//! invokes the handler.

mod schema;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use crate::error::ActionError;
use crate::services::{Dependencies, ServiceContainer};

pub use schema::{InputValidator, JsonSchemaValidator};

/// Boxed handler future.
pub type HandlerFuture = BoxFuture<'static, Result<Value, ActionError>>;

/// Type-erased async handler: validated input plus resolved dependencies in,
/// serializable result out.
pub type ActionHandler = Arc<dyn Fn(Value, Dependencies) -> HandlerFuture + Send + Sync>;

/// One registered action.
pub struct ActionDefinition {
    pub name: String,
    /// Raw JSON schema as registered; published to the fleet registry.
    pub input_schema: Option<Value>,
    /// Service names resolved from the container, in declared order.
    pub dependencies: Vec<String>,
    validator: Option<Box<dyn InputValidator>>,
    handler: ActionHandler,
}

/// Name → action table. Registration happens at startup; dispatch is
/// read-mostly and lock contention is negligible.
#[derive(Default)]
pub struct ActionRegistry {
    actions: RwLock<HashMap<String, Arc<ActionDefinition>>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `name`. A JSON schema, when given, is
    /// compiled once here and validates every payload before the handler
    /// runs. Duplicate names are rejected.
    pub fn register<F, Fut>(
        &self,
        name: &str,
        input_schema: Option<Value>,
        dependencies: Vec<String>,
        handler: F,
    ) -> Result<(), ActionError>
    where
        F: Fn(Value, Dependencies) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ActionError>> + Send + 'static,
    {
        let validator: Option<Box<dyn InputValidator>> = match &input_schema {
            Some(schema) => Some(Box::new(JsonSchemaValidator::new(schema)?)),
            None => None,
        };

        let handler: ActionHandler =
            Arc::new(move |input: Value, deps: Dependencies| -> HandlerFuture {
                Box::pin(handler(input, deps))
            });
        let definition = Arc::new(ActionDefinition {
            name: name.to_string(),
            input_schema,
            dependencies,
            validator,
            handler,
        });

        let mut actions = self.actions.write().expect("action registry lock poisoned");
        if actions.contains_key(name) {
            return Err(ActionError::DuplicateAction(name.to_string()));
        }
        debug!(action = %name, "action registered");
        actions.insert(name.to_string(), definition);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.actions.read().expect("action registry lock poisoned").is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.read().expect("action registry lock poisoned").len()
    }

    /// Registered action names, sorted for stable output.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .actions
            .read()
            .expect("action registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// (name, input schema) pairs for fleet registry publication.
    pub fn schemas(&self) -> Vec<(String, Option<Value>)> {
        let actions = self.actions.read().expect("action registry lock poisoned");
        let mut schemas: Vec<(String, Option<Value>)> = actions
            .values()
            .map(|d| (d.name.clone(), d.input_schema.clone()))
            .collect();
        schemas.sort_by(|a, b| a.0.cmp(&b.0));
        schemas
    }

    /// Route a payload to its handler.
    ///
    /// Pipeline: extract `action` → look up the definition → validate the
    /// remaining fields → resolve dependencies in declared order → invoke.
    /// Each failure maps to its own error code; see [`ActionError`].
    pub async fn dispatch(
        &self,
        payload: Value,
        container: &ServiceContainer,
    ) -> Result<Value, ActionError> {
        let Value::Object(mut fields) = payload else {
            return Err(ActionError::InvalidPayload(
                "payload must be a JSON object".to_string(),
            ));
        };

        let action = match fields.remove("action") {
            Some(Value::String(name)) => name,
            Some(_) => {
                return Err(ActionError::InvalidPayload(
                    "payload field `action` must be a string".to_string(),
                ))
            }
            None => {
                return Err(ActionError::InvalidPayload(
                    "payload is missing required field `action`".to_string(),
                ))
            }
        };

        let definition = {
            let actions = self.actions.read().expect("action registry lock poisoned");
            actions
                .get(&action)
                .cloned()
                .ok_or(ActionError::UnknownAction(action))?
        };

        let input = Value::Object(fields);
        if let Some(validator) = &definition.validator {
            validator.validate(&input)?;
        }

        let dependencies = container.resolve(&definition.dependencies)?;

        (definition.handler)(input, dependencies).await
    }
}
