use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cell::PersistentCell;
use crate::id::new_prefixed_id;
use crate::kv::StoreHandle;
use crate::{AppError, AppResult};

/// A record kept in one of the namespaced entity collections.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Collection name, also the key suffix under which the sequence is stored.
    const COLLECTION: &'static str;
    /// Tag placed in front of generated ids.
    const ID_PREFIX: &'static str;

    fn id(&self) -> &str;
    fn set_id(&mut self, id: String);
}

/// Ordered, id-addressed repository over a persistent cell holding `Vec<E>`.
pub struct Collection<E: Entity> {
    cell: PersistentCell<Vec<E>>,
}

impl<E: Entity> Collection<E> {
    pub fn new(store: StoreHandle) -> Self {
        Self {
            cell: PersistentCell::new(store, E::COLLECTION, Vec::new()),
        }
    }

    pub fn cell(&self) -> &PersistentCell<Vec<E>> {
        &self.cell
    }

    pub fn list(&self) -> Vec<E> {
        self.cell.get()
    }

    pub fn len(&self) -> usize {
        self.cell.with(Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &str) -> Option<E> {
        self.cell
            .with(|items| items.iter().find(|item| item.id() == id).cloned())
    }

    /// Append `entity` under a freshly generated id, returning the stored copy.
    /// Any id the caller set is discarded.
    pub async fn add(&self, mut entity: E) -> AppResult<E> {
        entity.set_id(new_prefixed_id(E::ID_PREFIX));
        let stored = entity.clone();
        self.cell.update(move |items| items.push(entity)).await?;
        Ok(stored)
    }

    /// Replace the entity sharing `entity`'s id, keeping its position.
    pub async fn update(&self, entity: E) -> AppResult<E> {
        let id = entity.id().to_string();
        let stored = entity.clone();
        let replaced = self
            .cell
            .try_update(move |items| {
                let slot = items.iter_mut().find(|item| item.id() == entity.id())?;
                *slot = entity;
                Some(())
            })
            .await?;
        match replaced {
            Some(()) => Ok(stored),
            None => Err(AppError::not_found(E::COLLECTION, &id)),
        }
    }

    /// Remove the entity with `id`. Returns `false` (and writes nothing) when
    /// no such entity exists.
    pub async fn delete(&self, id: &str) -> AppResult<bool> {
        let removed = self
            .cell
            .try_update(|items| {
                let index = items.iter().position(|item| item.id() == id)?;
                Some(items.remove(index))
            })
            .await?;
        Ok(removed.is_some())
    }

    /// Keep only entities matching `keep`; returns how many were removed.
    pub async fn retain(&self, keep: impl Fn(&E) -> bool + Send + Sync) -> AppResult<usize> {
        let removed = self
            .cell
            .try_update(|items| {
                let before = items.len();
                items.retain(|item| keep(item));
                let removed = before - items.len();
                (removed > 0).then_some(removed)
            })
            .await?;
        Ok(removed.unwrap_or(0))
    }

    pub async fn replace(&self, items: Vec<E>) -> AppResult<()> {
        self.cell.set(items).await
    }

    /// Mutate the entity with `id` in place.
    pub async fn modify<R>(&self, id: &str, f: impl FnOnce(&mut E) -> R + Send) -> AppResult<R>
    where
        R: Send,
    {
        self.cell
            .try_update(|items| items.iter_mut().find(|item| item.id() == id).map(f))
            .await?
            .ok_or_else(|| AppError::not_found(E::COLLECTION, id))
    }
}
