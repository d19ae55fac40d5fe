use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::info;

use crate::compactor;
use crate::engine::Engine;
use crate::limits::{MAX_SHOPS, MAX_SHOP_NAME_LEN};

/// One engine per shop. The shop is the database name on the connection, so
/// `psql -d downtown` and `psql -d uptown` never see each other's bookings.
pub struct ShopManager {
    shops: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
}

/// Keep `[A-Za-z0-9_-]` only, so a shop name can never escape the data directory.
pub fn sanitize_shop_name(raw: &str) -> Option<String> {
    let safe: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    (!safe.is_empty()).then_some(safe)
}

impl ShopManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            shops: DashMap::new(),
            data_dir,
            compact_threshold,
        }
    }

    pub fn shop_count(&self) -> usize {
        self.shops.len()
    }

    /// Get the shop's engine, replaying its WAL on first use.
    pub fn get_or_create(&self, shop: &str) -> io::Result<Arc<Engine>> {
        if shop.len() > MAX_SHOP_NAME_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "shop name too long"));
        }
        let safe_name = sanitize_shop_name(shop)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty shop name"))?;

        if let Some(engine) = self.shops.get(&safe_name) {
            return Ok(engine.value().clone());
        }
        if self.shops.len() >= MAX_SHOPS {
            return Err(io::Error::other("too many shops"));
        }

        // The entry guard keeps two first connections from replaying the same WAL twice.
        let engine = match self.shops.entry(safe_name.clone()) {
            Entry::Occupied(existing) => return Ok(existing.get().clone()),
            Entry::Vacant(slot) => {
                let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
                let engine = Arc::new(Engine::new(wal_path)?);
                slot.insert(engine.clone());
                engine
            }
        };

        tokio::spawn(compactor::run_compactor(engine.clone(), self.compact_threshold));
        metrics::gauge!(crate::observability::SHOPS_ACTIVE).set(self.shops.len() as f64);
        info!("opened shop {safe_name}");
        Ok(engine)
    }
}
