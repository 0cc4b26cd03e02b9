//! Bounded admission window for remote loads.
//!
//! At most `capacity` loads hold a permit at once. Waiters queue by priority (embedding loads
//! ahead of column loads) and FIFO within a priority. A released permit is handed directly to
//! the next live waiter, so queued loads never race new arrivals for a slot.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadPriority {
    Embedding,
    Column,
}

#[derive(Clone, Debug)]
pub struct AdmissionWindow {
    inner: Arc<Mutex<WindowState>>,
}

#[derive(Debug)]
struct WindowState {
    capacity: usize,
    active: usize,
    embedding: VecDeque<oneshot::Sender<()>>,
    column: VecDeque<oneshot::Sender<()>>,
}

impl WindowState {
    fn next_waiter(&mut self) -> Option<oneshot::Sender<()>> {
        self.embedding
            .pop_front()
            .or_else(|| self.column.pop_front())
    }
}

impl AdmissionWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(WindowState {
                capacity: capacity.max(1),
                active: 0,
                embedding: VecDeque::new(),
                column: VecDeque::new(),
            })),
        }
    }

    pub async fn acquire(&self, priority: LoadPriority) -> AdmissionPermit {
        loop {
            let rx = match self.try_admit(priority) {
                Ok(permit) => return permit,
                Err(rx) => rx,
            };
            let mut waiter = Waiter {
                rx,
                window: &self.inner,
                admitted: false,
            };
            if (&mut waiter.rx).await.is_ok() {
                waiter.admitted = true;
                return AdmissionPermit {
                    window: Arc::clone(&self.inner),
                };
            }
        }
    }

    fn try_admit(
        &self,
        priority: LoadPriority,
    ) -> Result<AdmissionPermit, oneshot::Receiver<()>> {
        let mut state = self.inner.lock().expect("admission window mutex poisoned");
        let queued = state.embedding.len() + state.column.len();
        if state.active < state.capacity && queued == 0 {
            state.active += 1;
            return Ok(AdmissionPermit {
                window: Arc::clone(&self.inner),
            });
        }
        let (tx, rx) = oneshot::channel();
        match priority {
            LoadPriority::Embedding => state.embedding.push_back(tx),
            LoadPriority::Column => state.column.push_back(tx),
        }
        Err(rx)
    }

    pub fn capacity(&self) -> usize {
        self.inner
            .lock()
            .expect("admission window mutex poisoned")
            .capacity
    }

    /// Permits currently held.
    pub fn active(&self) -> usize {
        self.inner
            .lock()
            .expect("admission window mutex poisoned")
            .active
    }

    /// Waiters queued, including abandoned ones not yet skipped.
    pub fn queued(&self) -> usize {
        let state = self.inner.lock().expect("admission window mutex poisoned");
        state.embedding.len() + state.column.len()
    }
}

fn release(window: &Mutex<WindowState>) {
    let mut state = window.lock().expect("admission window mutex poisoned");
    while let Some(next) = state.next_waiter() {
        if next.send(()).is_ok() {
            return;
        }
    }
    state.active = state.active.saturating_sub(1);
}

#[derive(Debug)]
pub struct AdmissionPermit {
    window: Arc<Mutex<WindowState>>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        release(&self.window);
    }
}

/// A queued acquire. If it is dropped after a permit was handed to it but before it noticed,
/// the slot is passed on.
struct Waiter<'a> {
    rx: oneshot::Receiver<()>,
    window: &'a Mutex<WindowState>,
    admitted: bool,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if self.admitted {
            return;
        }
        self.rx.close();
        if self.rx.try_recv().is_ok() {
            release(self.window);
        }
    }
}
