//! Dropping the host finalizes templates that are still reachable and
//! returns every laundered handle to the arena.
//!
//! The arena is process-wide, so this binary holds a single test.

mod common;

use common::Fixture;
use stencil_bridge::arena::live_handles;

#[test]
fn teardown_finalizes_live_templates() {
    let before = live_handles();

    let fx = Fixture::load();
    fx.eval(
        "var t = new Template('test_template').funcs({ f: counter('f', 'f') });
         var kept = [t, t.clone(), t.new('other')];
         kept.length",
    );
    assert!(fx.host.has_instance_data());
    assert!(fx.host.live_wraps() >= 3);
    assert!(live_handles() > before);

    drop(fx);
    assert_eq!(live_handles(), before);
}
