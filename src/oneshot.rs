//! Single-assignment synchronization cell.
//!
//! A [OneShot] is set exactly once and may be awaited by any number of tasks;
//! every waiter is woken when the value lands. Awaiting suspends the calling
//! task instead of the worker thread.

use crate::error::{Error, Result};

use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

struct OneShotInner<T> {
    value: Option<T>,
    wakers: Vec<Waker>,
}

pub struct OneShot<T> {
    inner: Mutex<OneShotInner<T>>,
}

impl<T> std::fmt::Debug for OneShot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        write!(
            f,
            "OneShot {{ set: {:?}, waiters: {:?} }}",
            inner.value.is_some(),
            inner.wakers.len()
        )
    }
}

impl<T> Default for OneShot<T> {
    fn default() -> Self {
        OneShot::new()
    }
}

impl<T> OneShot<T> {
    pub fn new() -> OneShot<T> {
        OneShot {
            inner: Mutex::new(OneShotInner {
                value: None,
                wakers: Vec::new(),
            }),
        }
    }

    /// Convenience for the common `Arc<OneShot<T>>` case.
    pub fn new_arc() -> Arc<OneShot<T>> {
        Arc::new(OneShot::new())
    }

    /// Set the value, waking every waiter.
    ///
    /// Returns the value back if the cell was already set.
    pub fn set(&self, value: T) -> std::result::Result<(), T> {
        let wakers = {
            let mut inner = self.inner.lock();
            if inner.value.is_some() {
                return Err(value);
            }
            inner.value = Some(value);
            std::mem::take(&mut inner.wakers)
        };
        for waker in wakers {
            waker.wake();
        }
        Ok(())
    }

    pub fn is_set(&self) -> bool {
        self.inner.lock().value.is_some()
    }
}

impl<T: Clone> OneShot<T> {
    pub fn try_get(&self) -> Option<T> {
        self.inner.lock().value.clone()
    }

    /// A future resolving to (a clone of) the value once it is set.
    pub fn get(&self) -> OneShotGet<'_, T> {
        OneShotGet { cell: self }
    }

    /// Await the value, giving up after `deadline` if one is provided.
    pub async fn wait(&self, deadline: Option<Duration>) -> Result<T> {
        match deadline {
            None => Ok(self.get().await),
            Some(deadline) => async_std::future::timeout(deadline, self.get())
                .await
                .map_err(|_| Error::Timeout(deadline.as_secs_f64())),
        }
    }
}

pub struct OneShotGet<'a, T> {
    cell: &'a OneShot<T>,
}

impl<'a, T: Clone> Future for OneShotGet<'a, T> {
    type Output = T;
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let mut inner = self.cell.inner.lock();
        if let Some(value) = &inner.value {
            return Poll::Ready(value.clone());
        }
        if !inner.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            inner.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}
