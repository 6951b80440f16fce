//! Every laundered handle is returned to the arena: wrapped payloads when
//! their objects are collected, callback data when the module unloads.
//!
//! The arena is process-wide, so this binary holds a single test.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use stencil_bridge::arena::{live_handles, Token};
use stencil_bridge::module::{define_class, register_module, set_instance_data, PropertyDef};
use stencil_bridge::{sys, CallArgs, Env, Result, Value, Wrapper};
use stencil_host::{Host, HostConfig};

struct Payload(#[allow(dead_code)] Vec<u8>);

static PAYLOAD: Wrapper<Payload> = Wrapper::new("Payload", 0x7061_796c_6f61_6400, 0x1);
static FINALIZED: AtomicUsize = AtomicUsize::new(0);
static TORN_DOWN: AtomicUsize = AtomicUsize::new(0);

fn init_exports(env: Env, exports: Value) -> Result<Value> {
    let construct = |args: &CallArgs| -> Result<Value> {
        PAYLOAD.wrap(args.env(), args.this(), Arc::new(Payload(vec![0; 64])), |_, _| {
            FINALIZED.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })?;
        Ok(args.this())
    };
    let touch = PropertyDef::method("touch", |args| {
        PAYLOAD.unwrap(args.env(), args.this())?;
        args.env().get_undefined()
    })?;
    let (class, tokens) = define_class(env, "Payload", construct, vec![touch])?;
    env.set_named_property(exports, "Payload", class)?;

    let tokens: Arc<Mutex<Vec<Token>>> = Arc::new(Mutex::new(tokens));
    set_instance_data(env, tokens, |_, tokens| {
        TORN_DOWN.fetch_add(1, Ordering::SeqCst);
        tokens.lock().clear();
        Ok(())
    })?;
    Ok(exports)
}

unsafe extern "C" fn init(api: *const sys::HostApi, env: sys::Env, exports: sys::Value) -> sys::Value {
    register_module(api, env, exports, init_exports)
}

#[test]
fn handles_are_released_on_collection_and_teardown() {
    let before_load = live_handles();
    let host = Host::new(HostConfig::default()).unwrap();
    host.load_module("lib", init).unwrap();
    let loaded = live_handles();
    assert!(loaded > before_load);

    let created = host
        .eval(
            "var objects = [];
             for (let i = 0; i < 8; i++) {
               const p = new lib.Payload();
               p.touch();
               objects.push(p);
             }
             objects.length",
        )
        .unwrap();
    assert_eq!(created, "8");
    // Payload and finalizer hint per object.
    assert_eq!(live_handles(), loaded + 16);

    host.eval("objects = [objects[0]]; objects.length").unwrap();
    let stats = host.gc();
    assert_eq!(stats.finalized, 7);
    assert_eq!(FINALIZED.load(Ordering::SeqCst), 7);
    assert_eq!(live_handles(), loaded + 2);
    assert_eq!(host.eval("objects[0].touch(); 'alive'").unwrap(), "alive");

    drop(host);
    assert_eq!(FINALIZED.load(Ordering::SeqCst), 8);
    assert_eq!(TORN_DOWN.load(Ordering::SeqCst), 1);
    assert_eq!(live_handles(), before_load);
}
