//! Loads the template module into an in-process host and drives it from
//! script.

#![allow(dead_code)]

use stencil_bridge::sys;
use stencil_host::{Host, HostConfig, HostError};
use stencil_text::TextTemplate;

unsafe extern "C" fn init(api: *const sys::HostApi, env: sys::Env, exports: sys::Value) -> sys::Value {
    stencil_template::init_module::<TextTemplate>(api, env, exports)
}

/// Globals every test script can use. `counter(name, reply)` returns a
/// function that bumps `calls[name]` and returns `reply`.
const SCRIPT_PRELUDE: &str = r#"
var { Template } = stencil;
var calls = {};
function counter(name, reply) {
  calls[name] = 0;
  return () => {
    calls[name]++;
    return reply;
  };
}
"#;

pub struct Fixture {
    pub host: Host,
}

impl Fixture {
    pub fn load() -> Self {
        let host = Host::new(HostConfig {
            expose_gc: true,
            ..HostConfig::default()
        })
        .unwrap();
        host.load_module("stencil", init).unwrap();
        host.eval(SCRIPT_PRELUDE).unwrap();
        host.eval(&format!("var dataDir = {:?};", Self::data_dir()))
            .unwrap();
        Self { host }
    }

    /// Completion value of `source`, which must not throw.
    pub fn eval(&self, source: &str) -> String {
        match self.host.eval(source) {
            Ok(shown) => shown,
            Err(err) => panic!("{source}\nthrew {err:?}"),
        }
    }

    /// Name, message and code of the exception `source` throws.
    pub fn error(&self, source: &str) -> (String, String, Option<String>) {
        match self.host.eval(source) {
            Err(HostError::Exception {
                name,
                message,
                code,
            }) => (name, message, code),
            other => panic!("{source}\nexpected an exception, got {other:?}"),
        }
    }

    /// Message of the exception `source` throws.
    pub fn thrown(&self, source: &str) -> String {
        self.error(source).1
    }

    pub fn data_dir() -> String {
        format!("{}/tests/data", env!("CARGO_MANIFEST_DIR"))
    }
}
