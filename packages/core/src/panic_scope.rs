//! Marks code whose panics are caught by its caller.
//!
//! Job workers poll handlers inside [`contain_panics`] and turn a panic into
//! a failed job. A process-wide panic hook can ask [`panic_is_contained`] to
//! tell those apart from panics nobody handles.

use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

thread_local! {
    static CONTAINED: Cell<bool> = const { Cell::new(false) };
}

/// True while the current thread is polling a [`Contained`] future.
pub fn panic_is_contained() -> bool {
    CONTAINED.with(Cell::get)
}

/// Wrap `future` so panics raised while polling it count as contained.
pub fn contain_panics<F: Future>(future: F) -> Contained<F> {
    Contained {
        inner: Box::pin(future),
    }
}

pub struct Contained<F> {
    inner: Pin<Box<F>>,
}

impl<F> std::fmt::Debug for Contained<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Contained").finish_non_exhaustive()
    }
}

struct Restore(bool);

impl Drop for Restore {
    fn drop(&mut self) {
        CONTAINED.with(|c| c.set(self.0));
    }
}

impl<F: Future> Future for Contained<F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let _restore = Restore(CONTAINED.with(|c| c.replace(true)));
        self.inner.as_mut().poll(cx)
    }
}
