//! The `Template` class: constructor, prototype methods and statics.

use crate::engine::TemplateEngine;
use crate::exports;
use crate::funcs;
use crate::object::{attach, instantiate, wrapper, TemplateObject};
use crate::state::ModuleState;
use stencil_bridge::module::{define_class, define_functions, instance_data, set_instance_data, PropertyDef};
use stencil_bridge::trampoline::recover;
use stencil_bridge::{to_native, Association, BridgeError, CallArgs, Env, Result, Value};
use std::sync::Arc;

/// Everything a prototype method needs about the call it is serving.
pub(crate) struct Call<'a, E> {
    pub env: Env,
    pub state: &'a Arc<ModuleState>,
    pub args: &'a CallArgs,
    pub object: &'a TemplateObject<E>,
}

impl<E> Call<'_, E> {
    /// Chaining methods return their receiver.
    fn this(&self) -> Result<Value> {
        Ok(self.args.this())
    }
}

// ============================================================================
// Handler plumbing
// ============================================================================

/// Prototype method: the receiver must be a wrapped `Template`.
fn method<E, F>(name: &str, body: F) -> Result<PropertyDef>
where
    E: TemplateEngine,
    F: Fn(&Call<'_, E>) -> Result<Value> + Send + Sync + 'static,
{
    PropertyDef::method(name, move |args| {
        let env = args.env();
        let state = instance_data::<ModuleState>(env)?;
        let _scope = state.env_stack.scope(env);
        let object = wrapper::<E>().unwrap(env, args.this())?;
        body(&Call {
            env,
            state: &state,
            args,
            object: &object,
        })
    })
}

fn static_method<F>(name: &str, body: F) -> Result<PropertyDef>
where
    F: Fn(Env, &Arc<ModuleState>, &CallArgs) -> Result<Value> + Send + Sync + 'static,
{
    PropertyDef::static_method(name, move |args| {
        let env = args.env();
        let state = instance_data::<ModuleState>(env)?;
        let _scope = state.env_stack.scope(env);
        body(env, &state, args)
    })
}

/// `new Template(name)`. Without arguments the object is left unwrapped
/// for native code to wrap.
fn construct<E: TemplateEngine>(args: &CallArgs) -> Result<Value> {
    let env = args.env();
    let state = instance_data::<ModuleState>(env)?;
    let _scope = state.env_stack.scope(env);
    if args.is_empty() {
        return Ok(args.this());
    }
    let name = args.string(0)?;
    attach(env, args.this(), E::new(&name), Association::new())?;
    Ok(args.this())
}

/// Wrap a template that shares the receiver's association.
fn derived<E: TemplateEngine>(call: &Call<'_, E>, template: E) -> Result<Value> {
    instantiate(call.env, call.state, template, call.object.association()?)
}

// ============================================================================
// Members
// ============================================================================

fn members<E: TemplateEngine>() -> Result<Vec<PropertyDef>> {
    Ok(vec![
        method::<E, _>("clone", |call| {
            let template = call.object.template.deep_clone().map_err(BridgeError::domain)?;
            let cloned = call.object.association()?.clone_refs(call.env)?;
            if let Err(err) = funcs::rebind(call.state, &template, &cloned) {
                cloned.maybe_finalize(call.env);
                return Err(err);
            }
            instantiate(call.env, call.state, template, cloned)
        })?,
        method::<E, _>("definedTemplates", |call| {
            call.env
                .create_string(&call.object.template.defined_templates())
        })?,
        method::<E, _>("delims", |call| {
            let left = call.args.string(0)?;
            let right = call.args.string(1)?;
            call.object.template.delims(&left, &right);
            call.this()
        })?,
        method::<E, _>("executeString", |call| {
            let data = to_native(call.env, call.args.value(0)?)?;
            let output = call
                .object
                .template
                .execute(&data)
                .map_err(BridgeError::domain)?;
            call.env.create_string(&output)
        })?,
        method::<E, _>("executeTemplateString", |call| {
            let name = call.args.string(0)?;
            let data = to_native(call.env, call.args.value(1)?)?;
            let output = call
                .object
                .template
                .execute_template(&name, &data)
                .map_err(BridgeError::domain)?;
            call.env.create_string(&output)
        })?,
        method::<E, _>("funcs", |call| {
            funcs::register(call.env, call.state, call.object, call.args.value(0)?)?;
            call.this()
        })?,
        method::<E, _>("lookup", |call| {
            let name = call.args.string(0)?;
            match call.object.template.lookup(&name) {
                Some(found) => derived(call, found),
                None => call.env.get_undefined(),
            }
        })?,
        method::<E, _>("name", |call| {
            call.env.create_string(&call.object.template.name())
        })?,
        method::<E, _>("new", |call| {
            let name = call.args.string(0)?;
            derived(call, call.object.template.new_template(&name))
        })?,
        method::<E, _>("option", |call| {
            let options = call.args.strings_from(0)?;
            recover(|| call.object.template.option(&options))?;
            call.this()
        })?,
        method::<E, _>("parse", |call| {
            let text = call.args.string(0)?;
            call.object
                .template
                .parse(&text)
                .map_err(BridgeError::domain)?;
            call.this()
        })?,
        method::<E, _>("parseFiles", |call| {
            let files = call.args.strings_from(0)?;
            call.object
                .template
                .parse_files(&files)
                .map_err(BridgeError::domain)?;
            call.this()
        })?,
        method::<E, _>("parseGlob", |call| {
            let pattern = call.args.string(0)?;
            call.object
                .template
                .parse_glob(&pattern)
                .map_err(BridgeError::domain)?;
            call.this()
        })?,
        method::<E, _>("templates", |call| {
            let templates = call.object.template.templates();
            let array = call.env.create_array_with_length(templates.len())?;
            for (index, template) in templates.into_iter().enumerate() {
                let object = derived(call, template)?;
                call.env.set_element(array, index as u32, object)?;
            }
            Ok(array)
        })?,
        method::<E, _>("addHelperFuncs", |call| {
            funcs::add_helpers(call.env, call.object, false)?;
            call.this()
        })?,
        method::<E, _>("addHermeticHelperFuncs", |call| {
            funcs::add_helpers(call.env, call.object, true)?;
            call.this()
        })?,
        static_method("parseFiles", |env, state, args| {
            let files = args.strings_from(0)?;
            let template = E::parse_files_new(&files).map_err(BridgeError::domain)?;
            instantiate(env, state, template, Association::new())
        })?,
        static_method("parseGlob", |env, state, args| {
            let pattern = args.string(0)?;
            let template = E::parse_glob_new(&pattern).map_err(BridgeError::domain)?;
            instantiate(env, state, template, Association::new())
        })?,
    ])
}

// ============================================================================
// Registration
// ============================================================================

/// Populate `exports` with the `Template` class and the escapers.
pub(crate) fn register<E: TemplateEngine>(env: Env, exports: Value) -> Result<Value> {
    let state = Arc::new(ModuleState::new());
    set_instance_data(env, Arc::clone(&state), |env, state: Arc<ModuleState>| {
        state.teardown(env);
        Ok(())
    })?;

    let (class, tokens) = define_class(env, "Template", construct::<E>, members::<E>()?)?;
    state.keep(tokens);
    state.set_constructor(env, env.create_reference(class, 1)?);
    env.set_named_property(exports, "Template", class)?;

    let tokens = define_functions(env, exports, exports::functions::<E>()?)?;
    state.keep(tokens);

    tracing::debug!(
        engine = std::any::type_name::<E>(),
        tokens = state.token_count(),
        "registered template module"
    );
    Ok(exports)
}
