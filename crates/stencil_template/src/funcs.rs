//! Host functions registered with the template engine.
//!
//! A host function reaches the engine as a [`NativeFunc`] that looks its
//! target up by name in an [`Association`] each time it runs. The closure
//! never holds the host value itself, so a cloned template only needs its
//! functions re-bound to the cloned association.

use crate::engine::{FuncError, NativeFunc, TemplateEngine};
use crate::object::TemplateObject;
use crate::state::ModuleState;
use stencil_bridge::association::release_references;
use stencil_bridge::sys::{KeyCollectionMode, KeyConversion, KeyFilter, ValueType};
use stencil_bridge::trampoline::recover;
use stencil_bridge::{
    to_host, to_native, Association, BridgeError, Env, NativeValue, Reference, Result, Value,
};
use std::sync::Arc;

/// Native closure that calls the host function registered as `name`.
///
/// The environment comes from the module's stack: the engine only runs
/// these closures while a `Template` method is on the call stack.
pub(crate) fn host_func(
    state: Arc<ModuleState>,
    association: Arc<Association>,
    name: String,
) -> NativeFunc {
    Arc::new(move |args: &[NativeValue]| -> Result<NativeValue, FuncError> {
        let env = state.env_stack.current();
        let function = association.function_value(env, &name)?;
        let argv = args
            .iter()
            .map(|arg| to_host(env, arg))
            .collect::<Result<Vec<_>>>()?;
        let receiver = env.get_undefined()?;
        // A throw leaves the host exception pending; the method that started
        // execution returns without raising a second one.
        let result = env.call_function(receiver, function, &argv)?;
        Ok(to_native(env, result)?)
    })
}

/// `template.funcs(map)`: register every function-valued own property.
pub(crate) fn register<E: TemplateEngine>(
    env: Env,
    state: &Arc<ModuleState>,
    object: &TemplateObject<E>,
    map: Value,
) -> Result<()> {
    let association = object.association()?;

    let mut created = Vec::new();
    if let Err(err) = collect_functions(env, map, &mut created) {
        release_references(env, created.into_iter().map(|(_, reference)| reference));
        return Err(err);
    }
    if created.is_empty() {
        return Ok(());
    }

    let mut previous: Vec<(String, Option<Reference>)> = Vec::with_capacity(created.len());
    let mut natives = Vec::with_capacity(created.len());
    for (name, reference) in created {
        let old = association.add_function_ref(&name, reference);
        natives.push((
            name.clone(),
            host_func(Arc::clone(state), Arc::clone(&association), name.clone()),
        ));
        previous.push((name, old));
    }

    match recover(|| object.template.funcs(natives)) {
        Ok(()) => {
            release_references(env, previous.into_iter().filter_map(|(_, old)| old));
            Ok(())
        }
        Err(err) => {
            // Put back whatever the batch displaced and drop what it added.
            for (name, old) in previous {
                let added = match old {
                    Some(old) => association.add_function_ref(&name, old),
                    None => association.remove_function_ref(&name),
                };
                release_references(env, added);
            }
            Err(err)
        }
    }
}

/// Walk the own enumerable string keys of `map`, taking a reference to each
/// function value. References land in `created` as they are taken so the
/// caller can release them if a later key fails.
fn collect_functions(env: Env, map: Value, created: &mut Vec<(String, Reference)>) -> Result<()> {
    match env.type_of(map)? {
        ValueType::OBJECT | ValueType::FUNCTION => {}
        ValueType::UNDEFINED | ValueType::NULL => {
            return Err(BridgeError::TypeMismatch(
                "Cannot convert undefined or null to object".into(),
            ))
        }
        other => {
            return Err(BridgeError::TypeMismatch(format!(
                "funcs expects an object, got {}",
                other.name()
            )))
        }
    }

    let keys = env.get_all_property_names(
        map,
        KeyCollectionMode::OWN_ONLY,
        KeyFilter::ENUMERABLE | KeyFilter::SKIP_SYMBOLS,
        KeyConversion::NUMBERS_TO_STRINGS,
    )?;
    for index in 0..env.get_array_length(keys)? {
        let key = env.get_element(keys, index)?;
        let name = env.get_value_string(key)?;
        let value = env.get_property(map, key)?;
        match env.type_of(value)? {
            ValueType::UNDEFINED => continue,
            ValueType::FUNCTION => {
                let reference = env.create_reference(value, 1)?;
                created.push((name, reference));
            }
            _ => {
                return Err(BridgeError::TypeMismatch(format!(
                    "Key '{name}' is not a function"
                )))
            }
        }
    }
    Ok(())
}

/// Install the engine's bundled helpers. A helper that takes over a name a
/// host function held releases that function's reference once the engine
/// has accepted the batch.
pub(crate) fn add_helpers<E: TemplateEngine>(
    env: Env,
    object: &TemplateObject<E>,
    hermetic: bool,
) -> Result<()> {
    let association = object.association()?;
    let helpers = E::helper_funcs(hermetic);
    let names: Vec<String> = helpers.iter().map(|(name, _)| name.clone()).collect();
    recover(|| object.template.funcs(helpers))?;
    release_references(
        env,
        names
            .iter()
            .filter_map(|name| association.remove_function_ref(name)),
    );
    Ok(())
}

/// Point every host function of `template` at `association`.
pub(crate) fn rebind<E: TemplateEngine>(
    state: &Arc<ModuleState>,
    template: &E,
    association: &Arc<Association>,
) -> Result<()> {
    let funcs: Vec<(String, NativeFunc)> = association
        .function_names()
        .into_iter()
        .map(|name| {
            let func = host_func(Arc::clone(state), Arc::clone(association), name.clone());
            (name, func)
        })
        .collect();
    if funcs.is_empty() {
        return Ok(());
    }
    recover(|| template.funcs(funcs))
}
