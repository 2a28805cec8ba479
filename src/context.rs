//! The single shared context a machine drives.

use crate::token::Token;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Current named state plus application data.
#[derive(Debug, Clone, PartialEq)]
pub struct Context<S> {
    current: Token,
    data: S,
}

impl<S> Context<S> {
    /// Creates a context positioned at `current`.
    pub fn new(current: impl Into<Token>, data: S) -> Self {
        Self {
            current: current.into(),
            data,
        }
    }

    /// Token of the last committed transition, or the default token.
    pub fn current_state(&self) -> &Token {
        &self.current
    }

    /// Application data.
    pub fn data(&self) -> &S {
        &self.data
    }

    pub(crate) fn set_current(&mut self, token: Token) {
        self.current = token;
    }

    pub(crate) fn set_data(&mut self, data: S) {
        self.data = data;
    }
}

/// Cloneable handle to the one live [`Context`] of a machine.
///
/// Every entry point and every action of a machine sees the same context.
/// Only commits mutate it; actions get read access.
///
/// # Examples
///
/// ```
/// use ayatori::{Context, SharedContext};
///
/// let ctx = SharedContext::new(Context::new("Idle", 3u32));
/// let handle = ctx.clone();
///
/// assert_eq!(handle.current_state(), "Idle");
/// assert_eq!(ctx.read(|c| *c.data() * 2), 6);
/// ```
pub struct SharedContext<S> {
    inner: Arc<RwLock<Context<S>>>,
}

impl<S> Clone for SharedContext<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for SharedContext<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.read(|ctx| f.debug_tuple("SharedContext").field(ctx).finish())
    }
}

impl<S> SharedContext<S> {
    /// Wraps a context for sharing.
    pub fn new(context: Context<S>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(context)),
        }
    }

    /// Runs `f` with read access to the context.
    ///
    /// The lock is released before this returns, so the closure must not
    /// stash the borrow.
    pub fn read<R>(&self, f: impl FnOnce(&Context<S>) -> R) -> R {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    /// Returns the current token.
    pub fn current_state(&self) -> Token {
        self.read(|ctx| ctx.current.clone())
    }

    pub(crate) fn write<R>(&self, f: impl FnOnce(&mut Context<S>) -> R) -> R {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

impl<S: Clone> SharedContext<S> {
    /// Returns a copy of the context as it is right now.
    pub fn snapshot(&self) -> Context<S> {
        self.read(Clone::clone)
    }
}
