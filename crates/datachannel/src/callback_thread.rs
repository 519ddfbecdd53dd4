//! Marks threads currently running an engine callback
//!
//! Every trampoline enters a [`CallbackScope`] before touching a proxy, so
//! code further down (disposal in particular) can tell a foreign callback
//! thread from a caller thread.

use std::cell::Cell;
use std::marker::PhantomData;

thread_local! {
    static IN_CALLBACK: Cell<bool> = const { Cell::new(false) };
}

/// Whether the current thread is inside an engine callback
pub fn is_callback_thread() -> bool {
    IN_CALLBACK.with(Cell::get)
}

/// Marks the current thread as a callback thread until dropped.
///
/// Scopes nest; dropping one restores the previous marking.
pub fn enter() -> CallbackScope {
    let previous = IN_CALLBACK.with(|flag| flag.replace(true));
    CallbackScope {
        previous,
        _not_send: PhantomData,
    }
}

/// Guard returned by [`enter`]
#[must_use = "the thread is only marked while the scope is alive"]
pub struct CallbackScope {
    previous: bool,
    _not_send: PhantomData<*const ()>,
}

impl Drop for CallbackScope {
    fn drop(&mut self) {
        IN_CALLBACK.with(|flag| flag.set(self.previous));
    }
}
