use std::collections::BTreeMap;

use mesh_protocol::{MetricReport, PeerAddress};

/// One gossiped counter, split so that no contribution is applied twice.
///
/// - `baseline`: last value confirmed by a completed round.
/// - `internal`: this node's own contribution to the current round.
/// - `external`: contributions peers reported this round.
/// - `uncommitted`: local events since the last flooding tick; folded into
///   `internal` by [`StatsRound::commit`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsRound {
    pub baseline: u64,
    pub internal: u64,
    pub external: u64,
    pub uncommitted: u64,
    /// Latest contribution per reporting peer; `external` is their sum.
    reports: BTreeMap<PeerAddress, u64>,
}

/// What [`StatsRound::absorb`] did with a peer report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Absorbed {
    /// Peer is on the same baseline; its contribution was counted.
    Counted,
    /// Peer is ahead; its baseline was adopted and the round restarted.
    Adopted,
    /// Peer is behind; report dropped.
    Ignored,
}

impl StatsRound {
    pub fn with_baseline(baseline: u64) -> Self {
        Self {
            baseline,
            ..Default::default()
        }
    }

    pub fn record(&mut self, amount: u64) {
        self.uncommitted += amount;
    }

    pub fn commit(&mut self) {
        self.internal += self.uncommitted;
        self.uncommitted = 0;
    }

    pub fn report(&self) -> MetricReport {
        MetricReport {
            baseline: self.baseline,
            internal: self.internal,
        }
    }

    /// Value this round would close at: `baseline + internal + external`.
    pub fn total(&self) -> u64 {
        self.baseline + self.internal + self.external
    }

    /// Fold in `from`'s report for the current round.
    ///
    /// A repeated report from the same peer replaces its earlier
    /// contribution instead of adding to it.
    pub fn absorb(&mut self, from: &PeerAddress, report: MetricReport) -> Absorbed {
        if report.baseline > self.baseline {
            self.baseline = report.baseline;
            self.internal = 0;
            self.external = report.internal;
            self.reports.clear();
            self.reports.insert(from.clone(), report.internal);
            Absorbed::Adopted
        } else if report.baseline == self.baseline {
            let previous = self
                .reports
                .insert(from.clone(), report.internal)
                .unwrap_or(0);
            self.external = self.external.saturating_sub(previous) + report.internal;
            Absorbed::Counted
        } else {
            Absorbed::Ignored
        }
    }

    /// Close the round: the total becomes the new baseline. `uncommitted`
    /// is left alone, it belongs to the next round.
    pub fn finalize(&mut self) -> u64 {
        self.baseline = self.total();
        self.internal = 0;
        self.external = 0;
        self.reports.clear();
        self.baseline
    }

    /// Apply a peer's confirmed value. Returns this node's own total from
    /// before the confirmation so callers can log a divergence.
    pub fn confirm(&mut self, confirmed: u64) -> u64 {
        let mine = self.total();
        self.baseline = mine.max(confirmed);
        self.internal = 0;
        self.external = 0;
        self.reports.clear();
        mine
    }
}
