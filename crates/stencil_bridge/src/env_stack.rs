//! Reentrancy context stack
//!
//! Host closures registered with the wrapped library are invoked from deep
//! inside native execution, where no environment handle is in scope. Entry
//! points push the environment they were called with; the closures read the
//! top of the stack. Push and pop must nest exactly like the call stack.

use crate::env::Env;
use parking_lot::Mutex;

/// Per-module stack of active environments.
#[derive(Debug, Default)]
pub struct EnvStack {
    entries: Mutex<Vec<Env>>,
}

impl EnvStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self, env: Env) {
        self.entries.lock().push(env);
    }

    /// The innermost active environment.
    ///
    /// # Panics
    /// If no environment has been entered: a native closure ran outside any
    /// host call.
    pub fn current(&self) -> Env {
        match self.entries.lock().last() {
            Some(env) => *env,
            None => panic!("environment stack is empty: host closure invoked outside a host call"),
        }
    }

    /// Pop `env`, which must be the innermost entry.
    ///
    /// # Panics
    /// If the stack is empty or its top is a different environment.
    pub fn exit(&self, env: Env) {
        let mut entries = self.entries.lock();
        match entries.last() {
            Some(top) if *top == env => {
                entries.pop();
            }
            Some(top) => {
                let top = *top;
                drop(entries);
                panic!("environment stack exited out of order: expected {top:?}, got {env:?}");
            }
            None => {
                drop(entries);
                panic!("environment stack exited while empty (got {env:?})");
            }
        }
    }

    pub fn depth(&self) -> usize {
        self.entries.lock().len()
    }

    /// Enter `env` for the lifetime of the returned guard.
    pub fn scope(&self, env: Env) -> EnvScope<'_> {
        self.enter(env);
        EnvScope { stack: self, env }
    }
}

/// Exits its environment when dropped, on every return path.
#[must_use = "the environment is exited as soon as the scope is dropped"]
pub struct EnvScope<'a> {
    stack: &'a EnvStack,
    env: Env,
}

impl Drop for EnvScope<'_> {
    fn drop(&mut self) {
        self.stack.exit(self.env);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stencil_abi as sys;

    fn env(n: usize) -> Env {
        unsafe { Env::from_raw(n as sys::Env) }
    }

    #[test]
    fn nested_enter_exit() {
        let stack = EnvStack::new();
        let (a, b) = (env(0x10), env(0x20));
        stack.enter(a);
        stack.enter(b);
        assert_eq!(stack.current(), b);
        stack.exit(b);
        assert_eq!(stack.current(), a);
        stack.exit(a);
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn scope_guard_pops() {
        let stack = EnvStack::new();
        {
            let _outer = stack.scope(env(1));
            {
                let _inner = stack.scope(env(2));
                assert_eq!(stack.current(), env(2));
            }
            assert_eq!(stack.current(), env(1));
        }
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    #[should_panic(expected = "out of order")]
    fn mismatched_exit_is_fatal() {
        let stack = EnvStack::new();
        stack.enter(env(1));
        stack.exit(env(2));
    }

    #[test]
    #[should_panic(expected = "while empty")]
    fn exit_on_empty_is_fatal() {
        EnvStack::new().exit(env(1));
    }

    #[test]
    #[should_panic(expected = "stack is empty")]
    fn current_on_empty_is_fatal() {
        EnvStack::new().current();
    }
}
