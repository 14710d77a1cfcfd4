//! File-drop providers.
//!
//! An upstream process writes candidates, market snapshots and health
//! readings to files; these providers read them. Useful for paper trading and
//! for replaying a recorded session.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};

use tgate_core::{BoxFuture, HealthSnapshot, MarketSnapshot, TradeCandidate};

use crate::error::{FeedError, FeedResult};
use crate::provider::{HealthMetricProvider, MarketDataProvider, SignalSource};

/// Reads candidates from a JSON Lines inbox.
///
/// Each fetch claims the inbox by renaming it to `<name>.<millis>.consumed`,
/// so a writer appending afterwards starts a fresh file. Claimed files are
/// deleted only once read. A fetch interrupted between claim and delete (a
/// timeout or a crash) leaves its claimed file behind, and the next fetch
/// reads it first. Lines that do not parse or validate are logged and skipped.
pub struct JsonlSignalSource {
    path: PathBuf,
}

impl JsonlSignalSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn inbox_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    async fn claim_inbox(&self) -> FeedResult<()> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(());
        }
        let mut millis = Utc::now().timestamp_millis();
        let claimed = loop {
            let candidate = self
                .path
                .with_file_name(format!("{}.{millis}.consumed", self.inbox_name()));
            if !tokio::fs::try_exists(&candidate).await? {
                break candidate;
            }
            millis += 1;
        };
        tokio::fs::rename(&self.path, &claimed).await?;
        debug!(file = %claimed.display(), "Claimed candidate inbox");
        Ok(())
    }

    /// Claimed files not yet deleted, oldest first.
    async fn claimed_files(&self) -> FeedResult<Vec<PathBuf>> {
        let prefix = format!("{}.", self.inbox_name());
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(self.dir()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(stamp) = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".consumed"))
            else {
                continue;
            };
            if let Ok(millis) = stamp.parse::<i64>() {
                files.push((millis, entry.path()));
            }
        }
        files.sort();
        Ok(files.into_iter().map(|(_, path)| path).collect())
    }

    async fn read_batch(&self) -> FeedResult<Vec<TradeCandidate>> {
        self.claim_inbox().await?;
        let claimed = self.claimed_files().await?;

        let mut candidates = Vec::new();
        for file in &claimed {
            let content = tokio::fs::read_to_string(file).await?;
            parse_lines(&content, &mut candidates);
        }

        // No await past this point: a fetch dropped by its caller's timeout
        // either deletes nothing or returns everything it deleted.
        for file in &claimed {
            if let Err(e) = std::fs::remove_file(file) {
                warn!(file = %file.display(), error = %e, "Consumed inbox not removed, it will be read again");
            }
        }
        if !claimed.is_empty() {
            info!(
                count = candidates.len(),
                files = claimed.len(),
                "Consumed candidate inbox"
            );
        }
        Ok(candidates)
    }
}

fn parse_lines(content: &str, out: &mut Vec<TradeCandidate>) {
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let candidate: TradeCandidate = match serde_json::from_str(line) {
            Ok(c) => c,
            Err(e) => {
                warn!(line = line_no + 1, error = %e, "Skipping unparseable candidate");
                continue;
            }
        };
        if let Err(e) = candidate.validate() {
            warn!(line = line_no + 1, candidate = %candidate.id, error = %e, "Skipping invalid candidate");
            continue;
        }
        out.push(candidate);
    }
}

impl SignalSource for JsonlSignalSource {
    fn fetch_candidates(&self) -> BoxFuture<'_, FeedResult<Vec<TradeCandidate>>> {
        Box::pin(self.read_batch())
    }

    fn name(&self) -> &'static str {
        "jsonl_signals"
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path, feed: &str) -> FeedResult<T> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(FeedError::unavailable(
                feed,
                format!("{} not found", path.display()),
            ))
        }
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_str(&content)?)
}

/// Reads a JSON array of [`MarketSnapshot`]s and picks the requested symbol.
pub struct FileMarketDataProvider {
    path: PathBuf,
}

impl FileMarketDataProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read_symbol(&self, symbol: &str) -> FeedResult<MarketSnapshot> {
        let snapshots: Vec<MarketSnapshot> = read_json(&self.path, self.name()).await?;
        let snapshot = snapshots
            .into_iter()
            .find(|s| s.symbol == symbol)
            .ok_or_else(|| FeedError::unavailable(self.name(), format!("no snapshot for {symbol}")))?;
        if !snapshot.price.is_positive() {
            return Err(FeedError::InvalidData(format!(
                "{symbol}: non-positive price {}",
                snapshot.price
            )));
        }
        debug!(symbol, price = %snapshot.price, "Read market snapshot");
        Ok(snapshot)
    }
}

impl MarketDataProvider for FileMarketDataProvider {
    fn fetch_market<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, FeedResult<MarketSnapshot>> {
        Box::pin(self.read_symbol(symbol))
    }

    fn name(&self) -> &'static str {
        "file_market"
    }
}

/// Reads a single [`HealthSnapshot`] JSON document.
pub struct FileHealthProvider {
    path: PathBuf,
}

impl FileHealthProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl HealthMetricProvider for FileHealthProvider {
    fn fetch_health(&self) -> BoxFuture<'_, FeedResult<HealthSnapshot>> {
        Box::pin(async move {
            let snapshot: HealthSnapshot = read_json(&self.path, self.name()).await?;
            if matches!(snapshot.ratio, Some(r) if r.is_sign_negative()) {
                return Err(FeedError::InvalidData("negative health ratio".to_string()));
            }
            Ok(snapshot)
        })
    }

    fn name(&self) -> &'static str {
        "file_health"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;
    use tempfile::TempDir;

    const CANDIDATE: &str = r#"{"id":"c-1","symbol":"BTC","side":"long","notional":"500","reference_price":"50000","stop_distance_pct":"4","attributes":{"confidence":"0.8","source_id":"desk"}}"#;

    #[tokio::test]
    async fn test_signal_inbox_claimed_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("candidates.jsonl");
        {
            let mut f = std::fs::File::create(&path).unwrap();
            writeln!(f, "{CANDIDATE}").unwrap();
            writeln!(f, "not json").unwrap();
            writeln!(f).unwrap();
        }
        let source = JsonlSignalSource::new(&path);

        let batch = source.fetch_candidates().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].symbol, "BTC");
        assert_eq!(batch[0].attributes.confidence, dec!(0.8));
        assert!(!path.exists());

        let again = source.fetch_candidates().await.unwrap();
        assert!(again.is_empty());

        // Nothing accumulates once a batch is read.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_interrupted_claim_is_read_next_fetch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("candidates.jsonl");
        let leftover = dir.path().join("candidates.jsonl.1700000000000.consumed");
        let unrelated = dir.path().join("other.jsonl.1700000000000.consumed");
        std::fs::write(&leftover, format!("{CANDIDATE}\n")).unwrap();
        std::fs::write(&unrelated, format!("{CANDIDATE}\n")).unwrap();
        std::fs::write(&path, CANDIDATE.replace("c-1", "c-2") + "\n").unwrap();
        let source = JsonlSignalSource::new(&path);

        let batch = source.fetch_candidates().await.unwrap();
        let ids: Vec<&str> = batch.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c-1", "c-2"]);
        assert!(!leftover.exists());
        assert!(!path.exists());
        assert!(unrelated.exists());

        assert!(source.fetch_candidates().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_fetch_loses_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("candidates.jsonl");
        std::fs::write(&path, format!("{CANDIDATE}\n")).unwrap();
        let source = JsonlSignalSource::new(&path);

        // The claim completes but the read never happens.
        source.claim_inbox().await.unwrap();
        assert!(!path.exists());
        assert_eq!(source.claimed_files().await.unwrap().len(), 1);

        let batch = source.fetch_candidates().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, "c-1");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_missing_inbox_is_empty_batch() {
        let dir = TempDir::new().unwrap();
        let source = JsonlSignalSource::new(dir.path().join("none.jsonl"));
        assert!(source.fetch_candidates().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_market_file_lookup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("market.json");
        std::fs::write(
            &path,
            r#"[{"symbol":"ETH","price":"3000","short_ratio_pct":"56.2","funding":[{"venue":"a","rate":"0.0001"}],"oi_change_pct":"1.1"}]"#,
        )
        .unwrap();
        let provider = FileMarketDataProvider::new(&path);

        let snap = provider.fetch_market("ETH").await.unwrap();
        assert_eq!(snap.short_ratio_pct, dec!(56.2));

        let err = provider.fetch_market("SOL").await.unwrap_err();
        assert!(matches!(err, FeedError::DataUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_health_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("health.json");
        let provider = FileHealthProvider::new(&path);

        assert!(matches!(
            provider.fetch_health().await,
            Err(FeedError::DataUnavailable { .. })
        ));

        std::fs::write(&path, r#"{"ratio":"2.15"}"#).unwrap();
        let snap = provider.fetch_health().await.unwrap();
        assert_eq!(snap.ratio, Some(dec!(2.15)));
    }
}
