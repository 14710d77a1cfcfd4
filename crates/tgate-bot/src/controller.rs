//! Cycle controller.
//!
//! One cycle is one transaction over the risk state: the tracker and kill
//! switch sit behind a single async mutex that is held from the boundary roll
//! to the state save, so cycles never interleave. Positions carry their own
//! locks inside the book. A kill switch trip part-way through a cycle cancels
//! a token the engine checks before every new placement.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use parking_lot::Mutex as SyncMutex;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tgate_control::{ControlError, ControlHandle, ControlResult, StatusReport};
use tgate_core::{
    BoxFuture, HealthSnapshot, MarketSnapshot, Observed, ScoredCandidate, TradeCandidate,
};
use tgate_executor::{
    DynExecutionAdapter, ExecutorError, LadderEngine, PaperExecutionAdapter, PositionEvent,
};
use tgate_feed::{
    DynHealthMetricProvider, DynMarketDataProvider, DynSignalSource, FeedConfig,
    FileHealthProvider, FileMarketDataProvider, JsonlSignalSource, StaticHealthProvider,
    TtlCache,
};
use tgate_persistence::{JsonLinesWriter, StateStore};
use tgate_position::{Position, PositionBook};
use tgate_risk::{
    GateContext, GateLayer, HealthLevel, KillSwitch, KillSwitchInputs, KillSwitchState,
    KillSwitchStatus, RiskDecision, RiskError, RiskGate, TrackerState,
};
use tgate_scorer::OpportunityScorer;
use tgate_telemetry::Metrics;

use crate::config::{AppConfig, OperatingMode};
use crate::error::{AppError, AppResult};
use crate::summary::{CycleSummary, DecisionRecord, PersistedState};

const HEALTH_KEY: &str = "health";

/// Upstream collaborators for one controller.
pub struct Feeds {
    pub signals: DynSignalSource,
    pub market: DynMarketDataProvider,
    pub health: DynHealthMetricProvider,
}

impl Feeds {
    /// File-backed feeds. Without a health file nothing leveraged is tracked.
    pub fn from_config(config: &FeedConfig) -> Self {
        let health: DynHealthMetricProvider = match &config.health_path {
            Some(path) => Arc::new(FileHealthProvider::new(path.clone())),
            None => Arc::new(StaticHealthProvider::untracked()),
        };
        Self {
            signals: Arc::new(JsonlSignalSource::new(config.signals_path.clone())),
            market: Arc::new(FileMarketDataProvider::new(config.market_path.clone())),
            health,
        }
    }
}

struct RiskState {
    tracker: TrackerState,
    kill_switch: KillSwitch,
}

struct Journal {
    cycles: JsonLinesWriter<CycleSummary>,
    positions: JsonLinesWriter<Position>,
}

pub struct CycleController {
    mode: OperatingMode,
    reset_hour: u32,
    fetch_timeout: Duration,
    risk: Mutex<RiskState>,
    scorer: OpportunityScorer,
    gate: RiskGate,
    engine: LadderEngine,
    book: PositionBook,
    feeds: Feeds,
    market_cache: TtlCache<MarketSnapshot>,
    health_cache: TtlCache<HealthSnapshot>,
    store: StateStore,
    journal: SyncMutex<Journal>,
    cycles_run: AtomicU64,
    last_summary: SyncMutex<Option<CycleSummary>>,
}

impl CycleController {
    /// Build a controller and restore any persisted state.
    pub fn new(config: &AppConfig, feeds: Feeds, adapter: DynExecutionAdapter) -> AppResult<Self> {
        let now = Utc::now();
        let scorer = OpportunityScorer::new(config.scorer.clone())?;
        let store = StateStore::new(config.persistence.state_path.clone());
        let book = PositionBook::new(config.cycle.archive_limit);

        let (tracker, kill_switch, cycles_run) = match store.load::<PersistedState>()? {
            Some(state) => {
                info!(
                    saved_at = %state.saved_at,
                    positions = state.positions.len(),
                    kill_switch = %state.kill_switch.state,
                    cycles_run = state.cycles_run,
                    "Restored persisted state"
                );
                book.restore(state.positions);
                (
                    state.tracker,
                    KillSwitch::from_status(config.kill_switch.clone(), state.kill_switch),
                    state.cycles_run,
                )
            }
            None => {
                info!(
                    equity = %config.tracker.starting_equity,
                    "No persisted state, starting a new session"
                );
                (
                    TrackerState::new(&config.tracker, now),
                    KillSwitch::new(config.kill_switch.clone()),
                    0,
                )
            }
        };
        Metrics::kill_switch_state(kill_switch.state().as_level());

        let journal_dir = &config.persistence.journal_dir;
        let buffer = config.persistence.journal_buffer;
        let journal = Journal {
            cycles: JsonLinesWriter::new(journal_dir, "cycles", buffer),
            positions: JsonLinesWriter::new(journal_dir, "positions", buffer),
        };

        let feeds_config = &config.feeds;
        Ok(Self {
            mode: config.mode,
            reset_hour: config.tracker.daily_reset_hour_utc,
            fetch_timeout: Duration::from_millis(feeds_config.fetch_timeout_ms),
            risk: Mutex::new(RiskState {
                tracker,
                kill_switch,
            }),
            scorer,
            gate: RiskGate::new(config.risk.clone()),
            engine: LadderEngine::new(adapter, config.ladder.clone(), config.execution.clone()),
            book,
            feeds,
            market_cache: TtlCache::new(
                "market",
                feeds_config.market_ttl_secs,
                feeds_config.fetch_timeout_ms,
            ),
            health_cache: TtlCache::new(
                HEALTH_KEY,
                feeds_config.health_ttl_secs,
                feeds_config.fetch_timeout_ms,
            ),
            store,
            journal: SyncMutex::new(journal),
            cycles_run: AtomicU64::new(cycles_run),
            last_summary: SyncMutex::new(None),
        })
    }

    /// File-backed feeds and the paper adapter.
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let adapter = Arc::new(PaperExecutionAdapter::new(
            config.execution.paper_slippage_bps,
        ));
        Self::new(config, Feeds::from_config(&config.feeds), adapter)
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    pub fn book(&self) -> &PositionBook {
        &self.book
    }

    pub fn cycles_run(&self) -> u64 {
        self.cycles_run.load(Ordering::SeqCst)
    }

    pub fn last_summary(&self) -> Option<CycleSummary> {
        self.last_summary.lock().clone()
    }

    pub async fn tracker(&self) -> TrackerState {
        self.risk.lock().await.tracker.clone()
    }

    pub async fn kill_switch(&self) -> KillSwitchStatus {
        self.risk.lock().await.kill_switch.status().clone()
    }

    /// Run one full cycle at `now`.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> AppResult<CycleSummary> {
        let started = Instant::now();
        let mut guard = self.risk.lock().await;
        let risk = &mut *guard;

        let cycle = self.cycles_run.load(Ordering::SeqCst) + 1;
        let rollover = risk.tracker.roll_boundaries(now, self.reset_hour);
        if rollover.daily || rollover.weekly {
            debug!(cycle, daily = rollover.daily, weekly = rollover.weekly, "Windows rolled");
        }

        let cancel = CancellationToken::new();
        let mut summary = CycleSummary::begin(
            cycle,
            self.mode,
            now,
            risk.tracker.clone(),
            risk.kill_switch.status().clone(),
        );
        info!(
            cycle,
            mode = %self.mode,
            kill_switch = %risk.kill_switch.state(),
            open_positions = self.book.len(),
            "Cycle started"
        );

        let candidates = self.fetch_candidates(&mut summary).await;
        summary.seen = candidates.len();
        let ranking = self.scorer.rank(candidates);
        summary.scored = ranking.scored;
        summary.below_threshold = ranking.below_threshold;
        summary.invalid = ranking.invalid;

        let health = self.fetch_health(now, &mut summary).await;
        let health_level = self.gate.config().classify_health(health.as_ref(), now);

        let mut symbols: BTreeSet<String> = ranking
            .survivors
            .iter()
            .map(|c| c.symbol().to_string())
            .collect();
        for position in self.book.snapshot().await {
            symbols.insert(position.symbol);
        }
        let markets = self.fetch_markets(&symbols, now, &mut summary).await;

        self.manage_positions(risk, &markets, health_level, now, &cancel, &mut summary)
            .await;
        self.refresh_exposure(risk).await;
        self.evaluate_kill_switch(risk, health_level, now, &cancel, &mut summary);

        for candidate in &ranking.survivors {
            self.admit(
                risk,
                candidate,
                &markets,
                health.as_ref(),
                health_level,
                now,
                &cancel,
                &mut summary,
            )
            .await;
        }

        let closed = self.book.archive_closed().await;
        self.refresh_exposure(risk).await;
        self.evaluate_kill_switch(risk, health_level, now, &cancel, &mut summary);

        let open = self.book.snapshot().await;
        summary.flagged_positions = open
            .iter()
            .filter(|p| p.needs_attention)
            .map(|p| p.id.clone())
            .collect();
        summary.tracker = risk.tracker.clone();
        summary.kill_switch = risk.kill_switch.status().clone();
        summary.finished_at =
            now + chrono::Duration::from_std(started.elapsed())
                .unwrap_or_else(|_| chrono::Duration::zero());

        self.cycles_run.store(cycle, Ordering::SeqCst);
        self.persist(risk, open.clone(), now)?;
        self.journal(&summary, closed);

        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        publish_metrics(&summary, &open, duration_ms);

        info!(
            cycle,
            seen = summary.seen,
            admitted = summary.admitted,
            rejected = summary.rejected,
            opened = summary.positions_opened.len(),
            closed = summary.positions_closed.len(),
            flagged = summary.flagged_positions.len(),
            kill_switch = %summary.kill_switch.state,
            duration_ms,
            "Cycle completed"
        );

        *self.last_summary.lock() = Some(summary.clone());
        Ok(summary)
    }

    async fn fetch_candidates(&self, summary: &mut CycleSummary) -> Vec<TradeCandidate> {
        let source = &self.feeds.signals;
        let error = match tokio::time::timeout(self.fetch_timeout, source.fetch_candidates()).await
        {
            Ok(Ok(candidates)) => {
                debug!(source = source.name(), count = candidates.len(), "Candidates fetched");
                return candidates;
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {}ms", self.fetch_timeout.as_millis()),
        };
        warn!(
            source = source.name(),
            error = %error,
            "Signal fetch failed, no candidates this cycle"
        );
        summary.mark_stale("signals");
        Metrics::stale_fallback("signals");
        Vec::new()
    }

    async fn fetch_health(
        &self,
        now: DateTime<Utc>,
        summary: &mut CycleSummary,
    ) -> Option<Observed<HealthSnapshot>> {
        let provider = &self.feeds.health;
        match self
            .health_cache
            .get_or_fetch(HEALTH_KEY, now, || provider.fetch_health())
            .await
        {
            Ok(observed) => {
                if observed.stale {
                    summary.mark_stale(HEALTH_KEY);
                    Metrics::stale_fallback(HEALTH_KEY);
                }
                Some(observed)
            }
            Err(e) => {
                warn!(source = provider.name(), error = %e, "Health metric unavailable");
                summary.mark_stale(HEALTH_KEY);
                Metrics::stale_fallback(HEALTH_KEY);
                None
            }
        }
    }

    /// Fetch every symbol touched this cycle concurrently.
    async fn fetch_markets(
        &self,
        symbols: &BTreeSet<String>,
        now: DateTime<Utc>,
        summary: &mut CycleSummary,
    ) -> HashMap<String, Observed<MarketSnapshot>> {
        let provider = &self.feeds.market;
        let fetches = symbols.iter().map(|symbol| async move {
            let result = self
                .market_cache
                .get_or_fetch(symbol, now, || provider.fetch_market(symbol))
                .await;
            (symbol, result)
        });

        let mut markets = HashMap::with_capacity(symbols.len());
        for (symbol, result) in join_all(fetches).await {
            match result {
                Ok(observed) => {
                    if observed.stale {
                        summary.mark_stale(&format!("market:{symbol}"));
                        Metrics::stale_fallback("market");
                    }
                    markets.insert(symbol.clone(), observed);
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Market data unavailable");
                    summary.mark_stale(&format!("market:{symbol}"));
                    Metrics::stale_fallback("market");
                }
            }
        }
        markets
    }

    async fn manage_positions(
        &self,
        risk: &mut RiskState,
        markets: &HashMap<String, Observed<MarketSnapshot>>,
        health: HealthLevel,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
        summary: &mut CycleSummary,
    ) {
        for id in self.book.ids() {
            let Some(handle) = self.book.get(&id) else {
                continue;
            };
            let symbol = handle.lock().await.symbol.clone();
            let Some(market) = markets.get(&symbol) else {
                warn!(position = %id, symbol = %symbol, "No price, position not worked this cycle");
                continue;
            };

            let events = self
                .engine
                .manage(&handle, market.value.price, now, cancel)
                .await;
            if events.is_empty() {
                continue;
            }
            book_events(risk, events, summary);
            self.refresh_exposure(risk).await;
            self.evaluate_kill_switch(risk, health, now, cancel, summary);
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn admit(
        &self,
        risk: &mut RiskState,
        candidate: &ScoredCandidate,
        markets: &HashMap<String, Observed<MarketSnapshot>>,
        health: Option<&Observed<HealthSnapshot>>,
        health_level: HealthLevel,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
        summary: &mut CycleSummary,
    ) {
        let market = markets.get(candidate.symbol());
        let decision = self.gate.evaluate(
            candidate,
            &GateContext {
                tracker: &risk.tracker,
                kill_switch: risk.kill_switch.state(),
                market,
                health,
                now,
            },
        );
        record_gate_metrics(&decision);

        let mut record = DecisionRecord {
            score: candidate.score,
            decision,
            position_id: None,
        };

        if !record.decision.approved {
            summary.rejected += 1;
            info!(
                candidate = %candidate.id(),
                symbol = %candidate.symbol(),
                layer = ?record.decision.rejected_by.map(|l| l.as_str()),
                reasons = ?record.decision.reasons,
                "Candidate rejected"
            );
            summary.decisions.push(record);
            return;
        }
        summary.admitted += 1;

        match (self.mode, market) {
            (OperatingMode::Observation, _) => {
                info!(
                    candidate = %candidate.id(),
                    symbol = %candidate.symbol(),
                    notional = %record.decision.approved_notional,
                    "Candidate admitted (observation, not deployed)"
                );
            }
            (OperatingMode::Paper, Some(market)) => {
                match self
                    .engine
                    .deploy(
                        &self.book,
                        &candidate.candidate,
                        record.decision.approved_notional,
                        record.decision.stop_distance_pct,
                        market.value.price,
                        now,
                        cancel,
                    )
                    .await
                {
                    Ok((handle, events)) => {
                        let id = handle.lock().await.id.clone();
                        risk.tracker.record_admission();
                        summary.positions_opened.push(id.clone());
                        record.position_id = Some(id);
                        book_events(risk, events, summary);
                        self.refresh_exposure(risk).await;
                        self.evaluate_kill_switch(risk, health_level, now, cancel, summary);
                    }
                    Err(ExecutorError::Cancelled) => {
                        info!(candidate = %candidate.id(), "Deployment cancelled for this cycle");
                        summary
                            .execution_failures
                            .push(format!("{}: deployment cancelled", candidate.id()));
                    }
                    Err(e) => {
                        warn!(candidate = %candidate.id(), error = %e, "Deployment failed");
                        Metrics::execution_failure("deploy");
                        summary
                            .execution_failures
                            .push(format!("{}: {e}", candidate.id()));
                    }
                }
            }
            (OperatingMode::Paper, None) => {
                warn!(candidate = %candidate.id(), "Admitted without a price, not deployed");
            }
        }
        summary.decisions.push(record);
    }

    /// Copy open count, exposure and unrealized P&L from the book.
    async fn refresh_exposure(&self, risk: &mut RiskState) {
        let (count, exposure) = self.book.exposure().await;
        risk.tracker.sync_exposure(count, exposure);
        risk.tracker.record_mark(self.book.unrealized_pnl().await);
    }

    fn evaluate_kill_switch(
        &self,
        risk: &mut RiskState,
        health: HealthLevel,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
        summary: &mut CycleSummary,
    ) {
        let inputs = KillSwitchInputs {
            tracker: &risk.tracker,
            health,
            daily_loss_limit: self.gate.config().daily_loss_limit,
            now,
        };
        let Some(state) = risk.kill_switch.evaluate(inputs) else {
            return;
        };

        summary.kill_switch_transitions.push(state);
        Metrics::kill_switch_state(state.as_level());
        if state == KillSwitchState::Halted {
            if let Some(reason) = &risk.kill_switch.status().trip_reason {
                Metrics::kill_switch_tripped(reason.kind());
            }
            if !cancel.is_cancelled() {
                warn!("Cancelling unsubmitted placements for the rest of this cycle");
                cancel.cancel();
            }
        }
    }

    fn persist(
        &self,
        risk: &RiskState,
        positions: Vec<Position>,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        let state = PersistedState {
            tracker: risk.tracker.clone(),
            kill_switch: risk.kill_switch.status().clone(),
            positions,
            cycles_run: self.cycles_run.load(Ordering::SeqCst),
            saved_at: now,
        };
        self.store.save(&state)?;
        debug!(path = %self.store.path().display(), "State saved");
        Ok(())
    }

    fn journal(&self, summary: &CycleSummary, closed: Vec<Position>) {
        let mut journal = self.journal.lock();
        for position in closed {
            let id = position.id.clone();
            if let Err(e) = journal.positions.add_record(position) {
                error!(position = %id, error = %e, "Failed to journal closed position");
            }
        }
        if let Err(e) = journal.cycles.add_record(summary.clone()) {
            error!(cycle = summary.cycle, error = %e, "Failed to journal cycle summary");
        }
    }

    /// Manual HALTED -> ARMED. Saved immediately.
    pub async fn reset_kill_switch(&self, operator: &str) -> AppResult<KillSwitchStatus> {
        let mut guard = self.risk.lock().await;
        let now = Utc::now();
        guard.kill_switch.reset(operator, now)?;
        Metrics::kill_switch_state(guard.kill_switch.state().as_level());
        self.persist(&guard, self.book.snapshot().await, now)?;
        Ok(guard.kill_switch.status().clone())
    }

    /// Start a new drawdown session at `equity`. Saved immediately.
    pub async fn restart_session(&self, equity: Decimal) -> AppResult<TrackerState> {
        if equity <= Decimal::ZERO {
            return Err(AppError::Config(format!(
                "session equity ({equity}) must be positive"
            )));
        }
        let mut guard = self.risk.lock().await;
        let now = Utc::now();
        guard.tracker.restart_session(equity, now);
        self.persist(&guard, self.book.snapshot().await, now)?;
        Ok(guard.tracker.clone())
    }

    /// Live positions with their ladder state.
    pub async fn open_positions(&self) -> Vec<Position> {
        self.book
            .snapshot()
            .await
            .into_iter()
            .filter(|p| !p.is_closed())
            .collect()
    }

    pub async fn status(&self) -> StatusReport {
        let (tracker, kill_switch) = {
            let guard = self.risk.lock().await;
            (guard.tracker.clone(), guard.kill_switch.status().clone())
        };
        let open = self.open_positions().await;
        StatusReport {
            mode: self.mode.to_string(),
            cycles_run: self.cycles_run(),
            tracker,
            kill_switch,
            open_positions: open.len(),
            flagged_positions: open.iter().filter(|p| p.needs_attention).count(),
            last_cycle: self
                .last_summary()
                .and_then(|s| serde_json::to_value(s).ok()),
        }
    }

    /// Flush journals.
    pub fn close(&self) -> AppResult<()> {
        let mut journal = self.journal.lock();
        journal.cycles.close()?;
        journal.positions.close()?;
        Ok(())
    }
}

impl ControlHandle for CycleController {
    fn status(&self) -> BoxFuture<'_, StatusReport> {
        Box::pin(CycleController::status(self))
    }

    fn open_positions(&self) -> BoxFuture<'_, Vec<Position>> {
        Box::pin(CycleController::open_positions(self))
    }

    fn reset_kill_switch(&self, operator: String) -> BoxFuture<'_, ControlResult<KillSwitchStatus>> {
        Box::pin(async move {
            CycleController::reset_kill_switch(self, &operator)
                .await
                .map_err(|e| match e {
                    AppError::Risk(RiskError::InvalidTransition(msg)) => {
                        ControlError::NotHalted(msg)
                    }
                    other => ControlError::Internal(other.to_string()),
                })
        })
    }
}

/// Book realized P&L and closes into the tracker and note failures.
fn book_events(risk: &mut RiskState, events: Vec<PositionEvent>, summary: &mut CycleSummary) {
    for event in events {
        if let Some(pnl) = event.realized_pnl() {
            risk.tracker.record_realized(pnl);
        }
        match &event {
            PositionEvent::Closed {
                position_id,
                realized_pnl,
                ..
            } => {
                risk.tracker.record_close(*realized_pnl);
                summary.positions_closed.push(position_id.clone());
            }
            PositionEvent::EntrySkipped {
                position_id,
                tier,
                error,
            } => {
                Metrics::execution_failure("entry");
                summary
                    .execution_failures
                    .push(format!("{position_id} entry tier {tier}: {error}"));
            }
            PositionEvent::AttentionRequired {
                position_id,
                reason,
            } => {
                Metrics::execution_failure("protective");
                summary
                    .execution_failures
                    .push(format!("{position_id}: {reason}"));
            }
            _ => {}
        }
        summary.events.push(event);
    }
}

fn record_gate_metrics(decision: &RiskDecision) {
    if let Some(layer) = decision.rejected_by {
        Metrics::gate_rejected(layer.as_str());
    }
    for layer in GateLayer::ORDER {
        if decision.rejected_by == Some(layer) {
            continue;
        }
        let prefix = format!("{layer}:");
        if decision.reasons.iter().any(|r| r.starts_with(&prefix)) {
            Metrics::gate_adjusted(layer.as_str());
        }
    }
}

fn publish_metrics(summary: &CycleSummary, open: &[Position], duration_ms: f64) {
    Metrics::candidates("seen", summary.seen);
    Metrics::candidates("scored", summary.scored);
    Metrics::candidates("below_threshold", summary.below_threshold);
    Metrics::candidates("invalid", summary.invalid);
    Metrics::candidates("admitted", summary.admitted);
    Metrics::candidates("rejected", summary.rejected);

    let t = &summary.tracker;
    Metrics::kill_switch_state(summary.kill_switch.state.as_level());
    Metrics::positions(
        open.len(),
        summary.flagged_positions.len(),
        t.aggregate_exposure,
    );
    Metrics::tracker(
        t.daily_loss,
        t.weekly_loss,
        t.session_drawdown_pct,
        t.consecutive_losses,
    );
    Metrics::cycle_completed(duration_ms);
}
