use parking_lot::Mutex;
use stencil_bridge::arena::Token;
use stencil_bridge::sys::Status;
use stencil_bridge::{BridgeError, Env, EnvStack, Reference, Result, Value};

/// Per-registration module data, stored as host instance data.
///
/// Owned by exactly one module registration; the host finalizes it when the
/// environment is torn down.
#[derive(Debug, Default)]
pub struct ModuleState {
    pub env_stack: EnvStack,
    constructor: Mutex<Option<Reference>>,
    tokens: Mutex<Vec<Token>>,
}

impl ModuleState {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_constructor(&self, env: Env, constructor: Reference) {
        if let Some(previous) = self.constructor.lock().replace(constructor) {
            tracing::warn!("template constructor registered twice");
            if let Err(err) = env.delete_reference(previous) {
                tracing::error!(error = %err, "failed to release previous constructor");
            }
        }
    }

    /// The `Template` class, used to instantiate objects from native code.
    pub(crate) fn constructor(&self, env: Env) -> Result<Value> {
        let constructor = self.constructor.lock();
        let reference = constructor.as_ref().ok_or_else(|| {
            BridgeError::status(Status::GENERIC_FAILURE, "Template class is not registered")
        })?;
        env.get_reference_value(reference)?.ok_or_else(|| {
            BridgeError::status(Status::GENERIC_FAILURE, "Template class has been collected")
        })
    }

    /// Keep callback tokens alive until teardown.
    pub(crate) fn keep(&self, tokens: impl IntoIterator<Item = Token>) {
        self.tokens.lock().extend(tokens);
    }

    pub fn token_count(&self) -> usize {
        self.tokens.lock().len()
    }

    /// Release the constructor reference and every callback token.
    pub(crate) fn teardown(&self, env: Env) {
        if let Some(constructor) = self.constructor.lock().take() {
            if let Err(err) = env.delete_reference(constructor) {
                tracing::error!(error = %err, "failed to release Template constructor");
            }
        }
        let tokens = std::mem::take(&mut *self.tokens.lock());
        tracing::debug!(count = tokens.len(), "releasing module callback tokens");
        drop(tokens);
    }
}
