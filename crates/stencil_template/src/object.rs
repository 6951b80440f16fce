//! The native payload behind every `Template` host object.

use crate::engine::TemplateEngine;
use crate::state::ModuleState;
use stencil_bridge::sys::Status;
use stencil_bridge::{Association, AssociationSlot, BridgeError, Env, Result, Value, Wrapper};
use std::sync::Arc;

pub struct TemplateObject<E> {
    pub template: E,
    pub association: AssociationSlot,
}

impl<E: TemplateEngine> TemplateObject<E> {
    pub fn association(&self) -> Result<Arc<Association>> {
        self.association.get().ok_or_else(|| {
            BridgeError::status(Status::GENERIC_FAILURE, "template has no association")
        })
    }
}

/// Tag shared by every `Template` object of the module.
pub const fn wrapper<E: TemplateEngine>() -> Wrapper<TemplateObject<E>> {
    Wrapper::new("Template", 0x7374_656e_6369_6c00, 0x7465_6d70_6c61_7465)
}

/// Attach `template` to the freshly constructed `object` and link it into
/// `association`. On failure the link is undone.
pub(crate) fn attach<E: TemplateEngine>(
    env: Env,
    object: Value,
    template: E,
    association: Arc<Association>,
) -> Result<()> {
    let payload = Arc::new(TemplateObject {
        template,
        association: AssociationSlot::new(),
    });
    association.attach(&payload.association);
    if let Err(err) = wrapper::<E>().wrap(env, object, Arc::clone(&payload), finalize::<E>) {
        association.detach(&payload.association);
        association.maybe_finalize(env);
        return Err(err);
    }
    Ok(())
}

/// Create a `Template` host object for a template produced on the native
/// side. The constructor is called with no arguments, which leaves the
/// object unwrapped for us to wrap here.
pub(crate) fn instantiate<E: TemplateEngine>(
    env: Env,
    state: &ModuleState,
    template: E,
    association: Arc<Association>,
) -> Result<Value> {
    let object = match state
        .constructor(env)
        .and_then(|constructor| env.new_instance(constructor, &[]))
    {
        Ok(object) => object,
        Err(err) => {
            // A fresh association nobody attached to still owns references.
            association.maybe_finalize(env);
            return Err(err);
        }
    };
    attach(env, object, template, association)?;
    Ok(object)
}

fn finalize<E: TemplateEngine>(env: Env, payload: Arc<TemplateObject<E>>) -> Result<()> {
    match payload.association.get() {
        Some(association) => {
            association.detach(&payload.association);
            association.maybe_finalize(env);
            Ok(())
        }
        None => Err(BridgeError::status(
            Status::GENERIC_FAILURE,
            "finalized template was not associated",
        )),
    }
}
