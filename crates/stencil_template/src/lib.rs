//! Stencil Template
//!
//! Host binding for a text-templating library: one `Template` class plus a
//! handful of escaping functions, generic over the library through
//! [`TemplateEngine`].
//!
//! ## Architecture
//!
//! - **engine:** the contract a templating library satisfies
//! - **object:** the wrapped payload and native-side instantiation
//! - **funcs:** host functions exposed to templates, and their references
//! - **class:** the `Template` constructor, methods and statics
//! - **exports:** `htmlEscaper` and friends
//! - **state:** per-registration data kept as host instance data
//!
//! A plugin exports its entry point with [`export_module!`]:
//!
//! ```ignore
//! stencil_template::export_module!(stencil_text::TextTemplate);
//! ```

mod class;
mod exports;
mod funcs;
mod object;
mod state;

pub mod engine;

pub use engine::{FuncError, NativeFunc, TemplateEngine};
pub use object::{wrapper, TemplateObject};
pub use state::ModuleState;

use stencil_bridge::module::register_module;
use stencil_bridge::sys;

/// Body of the module entry point for engine `E`.
///
/// # Safety
/// Must be called with exactly the arguments the host passed to the
/// entry point.
pub unsafe fn init_module<E: TemplateEngine>(
    api: *const sys::HostApi,
    env: sys::Env,
    exports: sys::Value,
) -> sys::Value {
    register_module(api, env, exports, class::register::<E>)
}

/// Emit the `stencil_module_init` entry point for an engine type.
#[macro_export]
macro_rules! export_module {
    ($engine:ty) => {
        /// # Safety
        /// Called by the host with its function table, environment and
        /// exports object.
        #[no_mangle]
        pub unsafe extern "C" fn stencil_module_init(
            api: *const $crate::__sys::HostApi,
            env: $crate::__sys::Env,
            exports: $crate::__sys::Value,
        ) -> $crate::__sys::Value {
            $crate::init_module::<$engine>(api, env, exports)
        }
    };
}

#[doc(hidden)]
pub use stencil_bridge::sys as __sys;
