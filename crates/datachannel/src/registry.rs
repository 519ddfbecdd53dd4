//! Token registry
//!
//! Maps the opaque pointer-sized token handed to the engine as user pointer
//! back to the proxy that owns it. Slots are generation-checked: a token
//! released once never resolves again, even after its slot is reused.

use crate::channel::ChannelShared;
use crate::connection::ConnectionShared;
use crate::error::{RtcError, RtcResult};
use parking_lot::{const_mutex, Mutex};
use std::ffi::c_void;
use std::num::NonZeroUsize;
use std::sync::{Arc, Weak};
use tracing::debug;

const INDEX_BITS: u32 = usize::BITS / 2;
const INDEX_MASK: usize = (1 << INDEX_BITS) - 1;
const GENERATION_MASK: usize = usize::MAX >> INDEX_BITS;

/// Opaque handle that round-trips through the engine's user pointer.
///
/// Packs a slot index (low half) and a generation (high half, never zero).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(NonZeroUsize);

impl Token {
    fn new(index: usize, generation: usize) -> Option<Self> {
        if index > INDEX_MASK {
            return None;
        }
        NonZeroUsize::new(((generation & GENERATION_MASK) << INDEX_BITS) | index).map(Token)
    }

    fn index(self) -> usize {
        self.0.get() & INDEX_MASK
    }

    fn generation(self) -> usize {
        self.0.get() >> INDEX_BITS
    }

    /// The user pointer handed to the engine
    pub fn as_ptr(self) -> *mut c_void {
        self.0.get() as *mut c_void
    }

    /// Recovers a token from a user pointer; `None` for null
    pub fn from_ptr(ptr: *mut c_void) -> Option<Self> {
        NonZeroUsize::new(ptr as usize).map(Token)
    }
}

struct Slot<T> {
    generation: usize,
    value: Option<T>,
}

struct Table<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    live: usize,
}

impl<T> Table<T> {
    fn slot(&mut self, token: Token) -> RtcResult<&mut Slot<T>> {
        match self.slots.get_mut(token.index()) {
            Some(slot) if slot.generation == token.generation() && slot.value.is_some() => {
                Ok(slot)
            }
            _ => Err(RtcError::StaleToken),
        }
    }
}

/// Generation-checked arena; every operation takes the table lock.
pub struct HandleTable<T> {
    inner: Mutex<Table<T>>,
}

impl<T: Clone> HandleTable<T> {
    pub const fn new() -> Self {
        Self {
            inner: const_mutex(Table {
                slots: Vec::new(),
                free: Vec::new(),
                live: 0,
            }),
        }
    }

    pub fn insert(&self, value: T) -> RtcResult<Token> {
        let mut table = self.inner.lock();
        let token = match table.free.pop() {
            Some(index) => {
                let slot = &mut table.slots[index];
                slot.value = Some(value);
                Token::new(index, slot.generation)
            }
            None => {
                let index = table.slots.len();
                let token = Token::new(index, 1);
                if token.is_some() {
                    table.slots.push(Slot {
                        generation: 1,
                        value: Some(value),
                    });
                }
                token
            }
        };
        let token = token.ok_or(RtcError::Failure)?;
        table.live += 1;
        Ok(token)
    }

    pub fn get(&self, token: Token) -> RtcResult<T> {
        let mut table = self.inner.lock();
        let slot = table.slot(token)?;
        slot.value.clone().ok_or(RtcError::StaleToken)
    }

    /// Swaps the value of a live registration
    pub fn replace(&self, token: Token, value: T) -> RtcResult<T> {
        let mut table = self.inner.lock();
        let slot = table.slot(token)?;
        slot.value.replace(value).ok_or(RtcError::StaleToken)
    }

    /// Invalidates `token`; its slot is reused under the next generation.
    ///
    /// A slot whose generation is exhausted is retired instead of wrapping,
    /// so no token ever resolves twice. On 32-bit targets that bounds each
    /// slot to 65535 registrations.
    pub fn remove(&self, token: Token) -> RtcResult<T> {
        let mut table = self.inner.lock();
        let slot = table.slot(token)?;
        let value = slot.value.take().ok_or(RtcError::StaleToken)?;
        if slot.generation < GENERATION_MASK {
            slot.generation += 1;
            table.free.push(token.index());
        } else {
            debug!(index = token.index(), "Retiring exhausted registry slot");
        }
        table.live -= 1;
        Ok(value)
    }

    pub fn live(&self) -> usize {
        self.inner.lock().live
    }
}

impl<T: Clone> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// What a token resolves to. The registry never keeps a proxy alive.
#[derive(Clone)]
pub(crate) enum Proxy {
    /// Reserved while the proxy is being built
    Pending,
    Connection(Weak<ConnectionShared>),
    Channel(Weak<ChannelShared>),
}

static PROXIES: HandleTable<Proxy> = HandleTable::new();

/// Reserves a token for a proxy under construction
pub(crate) fn reserve() -> RtcResult<Token> {
    PROXIES.insert(Proxy::Pending)
}

pub(crate) fn bind(token: Token, proxy: Proxy) -> RtcResult<()> {
    PROXIES.replace(token, proxy).map(|_| ())
}

pub(crate) fn release(token: Token) -> RtcResult<()> {
    PROXIES.remove(token).map(|_| ())
}

/// `Ok(None)` when the token is live but its proxy is gone or unfinished
pub(crate) fn resolve_connection(token: Token) -> RtcResult<Option<Arc<ConnectionShared>>> {
    match PROXIES.get(token)? {
        Proxy::Connection(weak) => Ok(weak.upgrade()),
        Proxy::Pending => Ok(None),
        Proxy::Channel(_) => Err(RtcError::StaleToken),
    }
}

pub(crate) fn resolve_channel(token: Token) -> RtcResult<Option<Arc<ChannelShared>>> {
    match PROXIES.get(token)? {
        Proxy::Channel(weak) => Ok(weak.upgrade()),
        Proxy::Pending => Ok(None),
        Proxy::Connection(_) => Err(RtcError::StaleToken),
    }
}

/// Number of tokens registered and not yet released, process-wide
pub fn live_tokens() -> usize {
    PROXIES.live()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let table = HandleTable::new();
        let a = table.insert("a").unwrap();
        let b = table.insert("b").unwrap();
        assert_ne!(a, b);
        assert_eq!(table.get(a).unwrap(), "a");
        assert_eq!(table.get(b).unwrap(), "b");
        assert_eq!(table.live(), 2);
    }

    #[test]
    fn test_removed_token_is_stale() {
        let table = HandleTable::new();
        let token = table.insert(1u32).unwrap();
        assert_eq!(table.remove(token).unwrap(), 1);
        assert!(matches!(table.get(token), Err(RtcError::StaleToken)));
        assert!(matches!(table.remove(token), Err(RtcError::StaleToken)));
        assert_eq!(table.live(), 0);
    }

    #[test]
    fn test_exhausted_slot_is_retired() {
        let table = HandleTable::new();
        let first = table.insert(1u32).unwrap();
        table.remove(first).unwrap();
        table.inner.lock().slots[first.index()].generation = GENERATION_MASK;

        let last = table.insert(2u32).unwrap();
        assert_eq!(last.index(), first.index());
        assert_eq!(last.generation(), GENERATION_MASK);
        table.remove(last).unwrap();

        let next = table.insert(3u32).unwrap();
        assert_ne!(next.index(), last.index());
        assert!(matches!(table.get(last), Err(RtcError::StaleToken)));
        assert!(matches!(table.get(first), Err(RtcError::StaleToken)));
        assert_eq!(table.get(next).unwrap(), 3);
    }

    #[test]
    fn test_reused_slot_does_not_resolve_old_token() {
        let table = HandleTable::new();
        let old = table.insert(1u32).unwrap();
        table.remove(old).unwrap();

        let new = table.insert(2u32).unwrap();
        assert_eq!(old.index(), new.index());
        assert_ne!(old, new);
        assert!(matches!(table.get(old), Err(RtcError::StaleToken)));
        assert_eq!(table.get(new).unwrap(), 2);
    }

    #[test]
    fn test_replace() {
        let table = HandleTable::new();
        let token = table.insert(1u32).unwrap();
        assert_eq!(table.replace(token, 5).unwrap(), 1);
        assert_eq!(table.get(token).unwrap(), 5);
    }

    #[test]
    fn test_pointer_round_trip() {
        let table = HandleTable::new();
        let token = table.insert(()).unwrap();
        let ptr = token.as_ptr();
        assert!(!ptr.is_null());
        assert_eq!(Token::from_ptr(ptr), Some(token));
        assert_eq!(Token::from_ptr(std::ptr::null_mut()), None);
    }

    #[test]
    fn test_unknown_token_is_stale() {
        let table: HandleTable<u8> = HandleTable::new();
        let bogus = Token::new(42, 7).unwrap();
        assert!(matches!(table.get(bogus), Err(RtcError::StaleToken)));
    }

    #[test]
    fn test_pending_proxy_resolves_to_none() {
        let token = reserve().unwrap();
        assert!(matches!(resolve_connection(token), Ok(None)));
        assert!(matches!(resolve_channel(token), Ok(None)));
        release(token).unwrap();
        assert!(matches!(
            resolve_connection(token),
            Err(RtcError::StaleToken)
        ));
    }
}
