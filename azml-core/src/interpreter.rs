//! Interpreter - Execute Effects using a Provider
//!
//! Effects are executed one at a time so the caller can record state and
//! resolve references between steps. This is where side effects actually occur.

use log::info;

use crate::effect::Effect;
use crate::provider::{Provider, ProviderError, ProviderResult};
use crate::resource::State;

/// Result of executing each Effect
#[derive(Debug)]
pub enum EffectOutcome {
    /// Read succeeded
    Read { state: State },
    /// Create succeeded
    Created { state: State },
    /// Update succeeded
    Updated { state: State },
    /// Delete and create succeeded
    Replaced { state: State },
    /// Delete succeeded
    Deleted,
}

impl EffectOutcome {
    /// State left behind by the effect, if any
    pub fn state(&self) -> Option<&State> {
        match self {
            EffectOutcome::Read { state }
            | EffectOutcome::Created { state }
            | EffectOutcome::Updated { state }
            | EffectOutcome::Replaced { state } => Some(state),
            EffectOutcome::Deleted => None,
        }
    }
}

/// Interpreter that executes Effects using a Provider
pub struct Interpreter<P: Provider> {
    provider: P,
}

impl<P: Provider> Interpreter<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Execute a single Effect
    pub async fn execute(&self, effect: &Effect) -> ProviderResult<EffectOutcome> {
        info!("{}", effect);

        match effect {
            Effect::Read { resource } => {
                let state = self.provider.read(&resource.id, None).await?;
                Ok(EffectOutcome::Read { state })
            }
            Effect::Create(resource) => {
                let state = self.provider.create(resource).await?;
                Ok(EffectOutcome::Created { state })
            }
            Effect::Update { id, from, to, .. } => {
                let identifier = from.identifier.as_deref().ok_or_else(|| {
                    ProviderError::new("Cannot update a resource without a remote ID")
                        .for_resource(id.clone())
                })?;
                let state = self.provider.update(id, identifier, from, to).await?;
                Ok(EffectOutcome::Updated { state })
            }
            Effect::Replace { id, from, to, .. } => {
                if let Some(identifier) = from.identifier.as_deref() {
                    self.provider.delete(id, identifier).await?;
                }
                let state = self.provider.create(to).await?;
                Ok(EffectOutcome::Replaced { state })
            }
            Effect::Delete { id, identifier } => {
                self.provider.delete(id, identifier).await?;
                Ok(EffectOutcome::Deleted)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::provider::{BoxFuture, ResourceType};
    use crate::resource::{Resource, ResourceId};

    #[derive(Default)]
    struct TestProvider {
        calls: Mutex<Vec<String>>,
    }

    impl TestProvider {
        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl Provider for TestProvider {
        fn name(&self) -> &'static str {
            "test"
        }

        fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
            vec![]
        }

        fn read(
            &self,
            id: &ResourceId,
            _identifier: Option<&str>,
        ) -> BoxFuture<'_, ProviderResult<State>> {
            let id = id.clone();
            Box::pin(async move { Ok(State::not_found(id)) })
        }

        fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
            self.record(format!("create {}", resource.id));
            let state = State::existing(resource.id.clone(), resource.attributes.clone())
                .with_identifier("test-id");
            Box::pin(async move { Ok(state) })
        }

        fn update(
            &self,
            id: &ResourceId,
            _identifier: &str,
            _from: &State,
            to: &Resource,
        ) -> BoxFuture<'_, ProviderResult<State>> {
            self.record(format!("update {}", id));
            let state = State::existing(id.clone(), to.attributes.clone());
            Box::pin(async move { Ok(state) })
        }

        fn delete(&self, id: &ResourceId, identifier: &str) -> BoxFuture<'_, ProviderResult<()>> {
            self.record(format!("delete {} {}", id, identifier));
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn create_returns_new_state() {
        let interpreter = Interpreter::new(TestProvider::default());
        let effect = Effect::Create(Resource::new("test", "example"));

        let outcome = interpreter.execute(&effect).await.unwrap();

        assert!(matches!(outcome, EffectOutcome::Created { .. }));
        assert_eq!(outcome.state().and_then(|s| s.identifier.as_deref()), Some("test-id"));
    }

    #[tokio::test]
    async fn delete_leaves_no_state() {
        let interpreter = Interpreter::new(TestProvider::default());
        let effect = Effect::Delete {
            id: ResourceId::new("test", "example"),
            identifier: "old-id".to_string(),
        };

        let outcome = interpreter.execute(&effect).await.unwrap();

        assert!(outcome.state().is_none());
        let calls = interpreter.provider().calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["delete test.example old-id".to_string()]);
    }

    #[tokio::test]
    async fn replace_deletes_then_creates() {
        let interpreter = Interpreter::new(TestProvider::default());
        let id = ResourceId::new("test", "example");
        let effect = Effect::Replace {
            id: id.clone(),
            from: State::existing(id.clone(), HashMap::new()).with_identifier("old-id"),
            to: Resource::new("test", "example"),
            changed_attributes: vec!["vm_size".to_string()],
        };

        let outcome = interpreter.execute(&effect).await.unwrap();
        assert!(matches!(outcome, EffectOutcome::Replaced { .. }));
        let calls = interpreter.provider().calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                "delete test.example old-id".to_string(),
                "create test.example".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn update_without_identifier_fails() {
        let interpreter = Interpreter::new(TestProvider::default());
        let id = ResourceId::new("test", "example");
        let effect = Effect::Update {
            id: id.clone(),
            from: State::existing(id.clone(), HashMap::new()),
            to: Resource::new("test", "example"),
            changed_attributes: vec![],
        };
        assert!(interpreter.execute(&effect).await.is_err());
    }
}
