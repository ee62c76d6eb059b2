//! The action capability and plain-value loading.

use anyhow::{anyhow, Context as _, Result};
use ledgerplay_types::Value;
use std::{collections::BTreeMap, fmt};

use crate::{context::ActionContext, delta::StateDelta};

/// Plain-value entry naming an action's type.
pub const TYPE_ID_KEY: &str = "type_id";

/// One state transition that can be serialized, restored and executed.
pub trait Action {
    /// Type name used for registration and logging.
    fn action_type(&self) -> &str;

    fn plain_value(&self) -> Value;

    fn load_plain_value(&mut self, value: &Value) -> Result<()>;

    /// Runs the action against `context`, returning the resulting ledger.
    ///
    /// Random draws must come from `context.random()`.
    fn execute(&self, context: &mut ActionContext) -> Result<StateDelta>;
}

impl fmt::Debug for dyn Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.action_type(), self.plain_value())
    }
}

/// Restores actions from their plain values.
pub trait ActionLoader {
    fn load(&self, block_index: u64, value: &Value) -> Result<Box<dyn Action>>;
}

type Factory = Box<dyn Fn() -> Box<dyn Action> + Send + Sync>;

/// Loads actions by the `type_id` entry of their plain value.
#[derive(Default)]
pub struct TypedActionLoader {
    factories: BTreeMap<String, Factory>,
}

impl fmt::Debug for TypedActionLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedActionLoader")
            .field("types", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TypedActionLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `A` under `type_id`, replacing any earlier registration.
    pub fn register<A>(mut self, type_id: &str) -> Self
    where
        A: Action + Default + 'static,
    {
        self.factories
            .insert(type_id.to_string(), Box::new(|| Box::new(A::default())));
        self
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl ActionLoader for TypedActionLoader {
    fn load(&self, block_index: u64, value: &Value) -> Result<Box<dyn Action>> {
        let type_id = value
            .get(TYPE_ID_KEY)
            .and_then(Value::as_text)
            .ok_or_else(|| anyhow!("plain value has no {TYPE_ID_KEY}: {value}"))?;
        let factory = self
            .factories
            .get(type_id)
            .ok_or_else(|| anyhow!("unknown action type {type_id:?} at block #{block_index}"))?;
        let mut action = factory();
        action
            .load_plain_value(value)
            .with_context(|| format!("failed to load {type_id} action"))?;
        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        count: i128,
    }

    impl Action for Counter {
        fn action_type(&self) -> &str {
            "counter"
        }

        fn plain_value(&self) -> Value {
            Value::dict([
                (TYPE_ID_KEY, Value::from("counter")),
                ("count", Value::Integer(self.count)),
            ])
        }

        fn load_plain_value(&mut self, value: &Value) -> Result<()> {
            self.count = value
                .get("count")
                .and_then(Value::as_integer)
                .ok_or_else(|| anyhow!("missing count"))?;
            Ok(())
        }

        fn execute(&self, context: &mut ActionContext) -> Result<StateDelta> {
            Ok(context.previous_states().clone())
        }
    }

    #[test]
    fn loads_registered_types() {
        let loader = TypedActionLoader::new().register::<Counter>("counter");
        let plain = Counter { count: 3 }.plain_value();
        let action = loader.load(0, &plain).unwrap();
        assert_eq!(action.action_type(), "counter");
        assert_eq!(action.plain_value(), plain);
        assert_eq!(loader.types().collect::<Vec<_>>(), vec!["counter"]);
    }

    #[test]
    fn rejects_unknown_and_malformed_values() {
        let loader = TypedActionLoader::new().register::<Counter>("counter");

        let missing = loader.load(0, &Value::Null).unwrap_err();
        assert!(missing.to_string().contains("type_id"));

        let unknown = Value::dict([(TYPE_ID_KEY, Value::from("other"))]);
        let err = loader.load(5, &unknown).unwrap_err();
        assert!(err.to_string().contains("unknown action type"));

        let malformed = Value::dict([(TYPE_ID_KEY, Value::from("counter"))]);
        let err = loader.load(0, &malformed).unwrap_err();
        assert_eq!(err.to_string(), "failed to load counter action");
        assert_eq!(err.root_cause().to_string(), "missing count");
    }
}
