//! Deferred binding of the data service.
//!
//! [`ServiceHandle`] implements [`NoteStore`] by forwarding to an
//! implementation attached later, so the protocol engine can be built before
//! storage exists. The slot is written at most once per process.

use crate::error::{Error, Result};
use crate::store::{Note, NoteStore};
use async_trait::async_trait;
use std::sync::{Arc, OnceLock};

/// Produces the concrete data service on first use.
pub type ServiceFactory = Arc<dyn Fn() -> Arc<dyn NoteStore> + Send + Sync>;

#[derive(Default)]
pub struct ServiceHandle {
    slot: OnceLock<Arc<dyn NoteStore>>,
}

impl ServiceHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `store`. Returns `false`, leaving the first binding in
    /// place, when the handle is already bound.
    pub fn bind(&self, store: Arc<dyn NoteStore>) -> bool {
        let installed = self.slot.set(store).is_ok();
        if installed {
            tracing::info!("data service bound");
        } else {
            tracing::warn!("data service already bound, ignoring second binding");
        }
        installed
    }

    /// Like [`ServiceHandle::bind`], but only runs `factory` when the handle
    /// is still empty. Concurrent callers block until the winner finishes.
    pub fn bind_with<F>(&self, factory: F) -> bool
    where
        F: FnOnce() -> Arc<dyn NoteStore>,
    {
        let mut installed = false;
        self.slot.get_or_init(|| {
            installed = true;
            factory()
        });
        if installed {
            tracing::info!("data service bound");
        }
        installed
    }

    pub fn is_bound(&self) -> bool {
        self.slot.get().is_some()
    }

    fn bound(&self) -> Result<&Arc<dyn NoteStore>> {
        self.slot.get().ok_or_else(|| {
            tracing::error!("data service used before it was bound");
            Error::ServicesNotInitialized
        })
    }
}

#[async_trait]
impl NoteStore for ServiceHandle {
    async fn list(&self) -> Result<Vec<Note>> {
        self.bound()?.list().await
    }

    async fn get(&self, id: &str) -> Result<Option<Note>> {
        self.bound()?.get(id).await
    }

    async fn create(&self, title: &str, content: &str) -> Result<Note> {
        self.bound()?.create(title, content).await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.bound()?.delete(id).await
    }

    async fn search(&self, query: &str) -> Result<Vec<Note>> {
        self.bound()?.search(query).await
    }
}
