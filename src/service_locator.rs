//! Process-wide named service registry (§6, §9), grounded in the original
//! `service/locator.py`'s `__new__`-based singleton keyed by string name.
//!
//! The kernel's concurrency model is single-threaded cooperative (§5) and its
//! handler-owning objects are wired together with `Rc`/`Weak` to break the
//! manager/handler reference cycle §9 calls out. A `static` registry behind a
//! `Mutex` would force `Send + Sync` on every registered service, which is
//! incompatible with `Rc` ownership and buys nothing in a process that never
//! spawns a second thread. This crate instead keeps the registry in a
//! `thread_local!`, documented as a deliberate deviation from the literal
//! "process-wide" wording (see `DESIGN.md`).

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{ServiceLocatorError, SimResult};

thread_local! {
    static REGISTRY: RefCell<HashMap<&'static str, Rc<dyn Any>>> = RefCell::new(HashMap::new());
}

/// Registers `instance` under `name`, replacing any prior registration
/// (idempotent-last-wins, per §6).
pub fn register<T: 'static>(name: &'static str, instance: Rc<T>) {
    REGISTRY.with(|registry| {
        registry.borrow_mut().insert(name, instance as Rc<dyn Any>);
    });
}

/// Looks up a previously-registered service by name and downcasts it to `T`.
///
/// Errors with [`ServiceLocatorError::NotFound`] if nothing was registered
/// under `name`, or if it was registered at a different type (a programmer
/// error the kernel surfaces rather than panicking on).
pub fn get<T: 'static>(name: &'static str) -> SimResult<Rc<T>> {
    REGISTRY.with(|registry| {
        registry
            .borrow()
            .get(name)
            .and_then(|svc| Rc::downcast::<T>(svc.clone()).ok())
            .ok_or(ServiceLocatorError::NotFound(name))
            .map_err(Into::into)
    })
}

/// Clears all registrations. Used between independent simulation runs within
/// the same thread (e.g. in tests) so one `Engine`'s services cannot leak
/// into the next.
pub fn clear() {
    REGISTRY.with(|registry| registry.borrow_mut().clear());
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Widget(u32);

    #[test]
    fn register_then_get_roundtrips() {
        clear();
        register("widget", Rc::new(Widget(42)));
        let got = get::<Widget>("widget").unwrap();
        assert_eq!(got.0, 42);
        clear();
    }

    #[test]
    fn missing_name_errors() {
        clear();
        assert!(get::<Widget>("missing").is_err());
    }

    #[test]
    fn last_registration_wins() {
        clear();
        register("widget", Rc::new(Widget(1)));
        register("widget", Rc::new(Widget(2)));
        assert_eq!(get::<Widget>("widget").unwrap().0, 2);
        clear();
    }
}
