//! Open position book.
//!
//! Each position sits behind its own async mutex so fills on one position
//! never wait on another. The map itself is a `DashMap`; handles are cloned
//! out before any lock is awaited.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex as SyncMutex;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::debug;

use tgate_core::PositionId;

use crate::position::Position;

pub type PositionHandle = Arc<Mutex<Position>>;

pub struct PositionBook {
    open: DashMap<PositionId, PositionHandle>,
    archive: SyncMutex<VecDeque<Position>>,
    archive_limit: usize,
}

impl Default for PositionBook {
    fn default() -> Self {
        Self::new(256)
    }
}

impl PositionBook {
    pub fn new(archive_limit: usize) -> Self {
        Self {
            open: DashMap::new(),
            archive: SyncMutex::new(VecDeque::new()),
            archive_limit,
        }
    }

    pub fn insert(&self, position: Position) -> PositionHandle {
        let id = position.id.clone();
        let handle = Arc::new(Mutex::new(position));
        self.open.insert(id, handle.clone());
        handle
    }

    pub fn get(&self, id: &PositionId) -> Option<PositionHandle> {
        self.open.get(id).map(|entry| entry.value().clone())
    }

    /// Ids of positions in the book, sorted for a stable processing order.
    pub fn ids(&self) -> Vec<PositionId> {
        let mut ids: Vec<PositionId> = self.open.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    fn handles(&self) -> Vec<PositionHandle> {
        self.open.iter().map(|e| e.value().clone()).collect()
    }

    /// Copies of every position in the book, oldest first.
    pub async fn snapshot(&self) -> Vec<Position> {
        let mut positions = Vec::with_capacity(self.open.len());
        for handle in self.handles() {
            positions.push(handle.lock().await.clone());
        }
        positions.sort_by(|a, b| a.opened_at.cmp(&b.opened_at).then(a.id.cmp(&b.id)));
        positions
    }

    /// Count of live positions and their combined exposure.
    pub async fn exposure(&self) -> (u32, Decimal) {
        let mut count = 0u32;
        let mut total = Decimal::ZERO;
        for handle in self.handles() {
            let p = handle.lock().await;
            if !p.is_closed() {
                count += 1;
                total += p.exposure();
            }
        }
        (count, total)
    }

    /// Sum of unrealized P&L across live positions.
    pub async fn unrealized_pnl(&self) -> Decimal {
        let mut total = Decimal::ZERO;
        for handle in self.handles() {
            total += handle.lock().await.unrealized_pnl;
        }
        total
    }

    /// Move closed positions to the archive and return them.
    pub async fn archive_closed(&self) -> Vec<Position> {
        let mut closed = Vec::new();
        for id in self.ids() {
            let Some(handle) = self.get(&id) else {
                continue;
            };
            let position = handle.lock().await;
            if position.is_closed() {
                closed.push(position.clone());
                drop(position);
                self.open.remove(&id);
            }
        }

        if !closed.is_empty() {
            let mut archive = self.archive.lock();
            for p in &closed {
                debug!(position = %p.id, "Archived position");
                archive.push_back(p.clone());
            }
            while archive.len() > self.archive_limit {
                archive.pop_front();
            }
        }
        closed
    }

    /// Recently closed positions, oldest first.
    pub fn recent_closed(&self) -> Vec<Position> {
        self.archive.lock().iter().cloned().collect()
    }

    /// Load persisted positions after a restart.
    pub fn restore(&self, positions: Vec<Position>) {
        for p in positions {
            if !p.is_closed() {
                self.insert(p);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ladder::LadderConfig;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use tgate_core::{Price, Side, SignalAttributes, TechnicalFlags, TradeCandidate};

    fn position(id: &str, notional: Decimal) -> Position {
        let candidate = TradeCandidate {
            id: id.to_string(),
            symbol: "BTC".to_string(),
            side: Side::Long,
            notional,
            reference_price: Price::new(dec!(50000)),
            stop_distance_pct: dec!(4),
            attributes: SignalAttributes {
                confidence: dec!(0.8),
                source_id: "desk".to_string(),
                technical: TechnicalFlags::default(),
                market_condition: dec!(0.5),
                momentum_pct: Decimal::ZERO,
            },
        };
        Position::plan(
            &candidate,
            notional,
            dec!(4),
            &LadderConfig::default(),
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_exposure_sums_live_positions() {
        let book = PositionBook::default();
        book.insert(position("a", dec!(500)));
        book.insert(position("b", dec!(300)));

        let (count, exposure) = book.exposure().await;
        assert_eq!(count, 2);
        assert_eq!(exposure, dec!(800));
    }

    #[tokio::test]
    async fn test_archive_moves_closed_positions() {
        let book = PositionBook::new(1);
        let handle = book.insert(position("a", dec!(500)));
        book.insert(position("b", dec!(300)));

        {
            let mut p = handle.lock().await;
            let opened = p.opened_at;
            p.expire_entries(opened + chrono::Duration::days(1), 60);
            assert!(p.is_closed());
        }

        let closed = book.archive_closed().await;
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].candidate_id, "a");
        assert_eq!(book.len(), 1);
        assert_eq!(book.recent_closed().len(), 1);
    }

    #[tokio::test]
    async fn test_restore_skips_closed() {
        let book = PositionBook::default();
        let mut closed = position("x", dec!(100));
        let opened = closed.opened_at;
        closed.expire_entries(opened + chrono::Duration::days(1), 60);

        book.restore(vec![position("y", dec!(100)), closed]);
        assert_eq!(book.len(), 1);
        let snapshot = book.snapshot().await;
        assert_eq!(snapshot[0].candidate_id, "y");
    }
}
