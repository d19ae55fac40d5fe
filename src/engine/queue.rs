use tracing::info;
use ulid::Ulid;

use crate::limits::MAX_QUEUE_ENTRIES_PER_SHOP;
use crate::model::*;

use super::ranking::{position_of, rank_all};
use super::{now_ms, required_text, Engine, EngineError, Entity};

impl Engine {
    /// Add a walk-in. Unknown statuses become pending.
    pub async fn join_queue(
        &self,
        name: &str,
        status: Option<&str>,
    ) -> Result<QueueInfo, EngineError> {
        let name = required_text("name", name)?;
        if self.store.queue_count() >= MAX_QUEUE_ENTRIES_PER_SHOP {
            return Err(EngineError::LimitExceeded("too many queue entries"));
        }
        let entry = QueueEntry {
            id: self.next_id(),
            name,
            status: QueueStatus::coerce(status),
            created_at: now_ms(),
        };
        let id = entry.id;
        self.persist_and_apply(Event::QueueJoined(entry)).await?;

        metrics::counter!(crate::observability::QUEUE_JOINED_TOTAL).increment(1);
        let info = self.queue_position(id)?;
        info!("queue entry {id} joined at position {}", info.position);
        Ok(info)
    }

    /// Ranked pending entries first, then everything else with position 0.
    pub fn list_queue(&self) -> Vec<QueueInfo> {
        rank_all(self.store.queue_entries())
            .into_iter()
            .map(|(entry, position)| QueueInfo { entry, position })
            .collect()
    }

    pub fn queue_position(&self, id: Ulid) -> Result<QueueInfo, EngineError> {
        let entry = self
            .store
            .queue_entry(&id)
            .ok_or(EngineError::NotFound(Entity::QueueEntry, id))?;
        let position = position_of(&self.store.queue_entries(), id);
        Ok(QueueInfo { entry, position })
    }

    pub async fn cancel_queue_entry(&self, id: Ulid) -> Result<(), EngineError> {
        self.set_queue_status(id, QueueStatus::Canceled).await
    }

    pub async fn complete_queue_entry(&self, id: Ulid) -> Result<(), EngineError> {
        self.set_queue_status(id, QueueStatus::Completed).await
    }

    async fn set_queue_status(&self, id: Ulid, status: QueueStatus) -> Result<(), EngineError> {
        let _guard = self.lock_record(&id).await;
        if self.store.queue_entry(&id).is_none() {
            return Err(EngineError::NotFound(Entity::QueueEntry, id));
        }
        self.persist_and_apply(Event::QueueStatusChanged { id, status }).await?;
        info!("queue entry {id} -> {status}");
        Ok(())
    }

    /// Hard delete, whatever the status.
    pub async fn remove_queue_entry(&self, id: Ulid) -> Result<(), EngineError> {
        let _guard = self.lock_record(&id).await;
        if self.store.queue_entry(&id).is_none() {
            return Err(EngineError::NotFound(Entity::QueueEntry, id));
        }
        self.persist_and_apply(Event::QueueRemoved { id }).await?;
        info!("removed queue entry {id}");
        Ok(())
    }
}
