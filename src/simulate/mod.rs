//! Scenario traffic generator writing into two spool directories.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::message::SourceKind;
use crate::source::spool::TMP_EXTENSION;

/// Traffic shapes understood by [`Simulator::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Scenario {
    /// Identical payloads on both streams.
    Normal,
    /// Same key, different payloads.
    Mismatch,
    /// One side only, chosen at random.
    Orphan,
    /// A full pair, then both sides again.
    Duplicate,
    /// 70% normal, 15% mismatch, 10% orphan, 5% duplicate, shuffled.
    Mixed,
    /// Normal pairs as fast as the disk allows.
    Stress,
}

impl Scenario {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Mismatch => "mismatch",
            Self::Orphan => "orphan",
            Self::Duplicate => "duplicate",
            Self::Mixed => "mixed",
            Self::Stress => "stress",
        }
    }
}

/// Files written by one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulationSummary {
    pub legacy_written: usize,
    pub modern_written: usize,
    pub elapsed: Duration,
}

impl SimulationSummary {
    pub fn total(&self) -> usize {
        self.legacy_written + self.modern_written
    }

    /// Messages per second, 0 for an instantaneous run.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.total() as f64 / secs
    }
}

/// Writes one file per message, renaming from `.tmp` so readers never see a
/// partial payload. Names sort in write order.
#[derive(Debug)]
pub struct SpoolWriter {
    dir: PathBuf,
    run_id: u128,
    seq: u64,
}

impl SpoolWriter {
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating spool directory {}", dir.display()))?;

        let run_id = Utc::now().timestamp_millis().max(0) as u128;
        Ok(Self { dir, run_id, seq: 0 })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write(&mut self, payload: &str) -> Result<PathBuf> {
        let stem = format!("{:013}-{:08}", self.run_id, self.seq);
        self.seq += 1;

        let tmp = self.dir.join(format!("{stem}.{TMP_EXTENSION}"));
        let dst = self.dir.join(format!("{stem}.msg"));

        fs::write(&tmp, payload).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &dst).with_context(|| format!("renaming into {}", dst.display()))?;

        Ok(dst)
    }
}

/// Build a 24-character correlation key: 7-char producer tag (space padded
/// or truncated), MMddyyyy, HHmmss, then a 3-digit sequence.
pub fn correlation_key(program: &str, number: usize, at: DateTime<Utc>) -> String {
    let tag: String = program.chars().chain(std::iter::repeat(' ')).take(7).collect();
    format!(
        "{tag}{}{}{:03}",
        at.format("%m%d%Y"),
        at.format("%H%M%S"),
        number % 1000
    )
}

type Delivery = (SourceKind, String);

pub struct Simulator<R = StdRng> {
    legacy: SpoolWriter,
    modern: SpoolWriter,
    rng: R,
}

impl Simulator<StdRng> {
    pub fn new(legacy_dir: impl Into<PathBuf>, modern_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::with_rng(legacy_dir, modern_dir, StdRng::from_entropy())
    }
}

impl<R: Rng> Simulator<R> {
    pub fn with_rng(
        legacy_dir: impl Into<PathBuf>,
        modern_dir: impl Into<PathBuf>,
        rng: R,
    ) -> Result<Self> {
        Ok(Self {
            legacy: SpoolWriter::create(legacy_dir)?,
            modern: SpoolWriter::create(modern_dir)?,
            rng,
        })
    }

    /// Write `count` units of `scenario` traffic. A unit is one pair, one
    /// orphan or one duplicated pair depending on the scenario.
    pub fn run(&mut self, scenario: Scenario, count: usize) -> Result<SimulationSummary> {
        let started = Instant::now();
        let now = Utc::now();
        let units = self.plan(scenario, count, now);

        info!(scenario = scenario.as_str(), units = units.len(), "simulation started");

        let mut summary = SimulationSummary::default();
        for (i, unit) in units.into_iter().enumerate() {
            for (side, payload) in unit {
                match side {
                    SourceKind::Legacy => {
                        self.legacy.write(&payload)?;
                        summary.legacy_written += 1;
                    }
                    SourceKind::Modern => {
                        self.modern.write(&payload)?;
                        summary.modern_written += 1;
                    }
                }
            }
            if i > 0 && i % 100 == 0 {
                info!(progress = i, "simulation progress");
            }
        }
        summary.elapsed = started.elapsed();

        info!(
            scenario = scenario.as_str(),
            legacy = summary.legacy_written,
            modern = summary.modern_written,
            throughput = format_args!("{:.2}", summary.throughput()),
            "simulation complete",
        );

        Ok(summary)
    }

    fn plan(&mut self, scenario: Scenario, count: usize, now: DateTime<Utc>) -> Vec<Vec<Delivery>> {
        match scenario {
            Scenario::Normal => (0..count)
                .map(|i| self.matched("TESTPGM", i, &format!("Normal test message {i}"), now))
                .collect(),
            Scenario::Mismatch => (0..count)
                .map(|i| {
                    self.mismatched(
                        "MISMTCH",
                        i,
                        &format!("Legacy message content {i}"),
                        &format!("New message content DIFFERENT {i}"),
                        now,
                    )
                })
                .collect(),
            Scenario::Orphan => (0..count)
                .map(|i| self.orphan("ORPHANS", i, &format!("Orphaned message {i}"), now))
                .collect(),
            Scenario::Duplicate => (0..count)
                .map(|i| {
                    let msg = self.message("DUPLICT", i, &format!("Duplicate test message {i}"), now);
                    vec![
                        (SourceKind::Legacy, msg.clone()),
                        (SourceKind::Modern, msg.clone()),
                        (SourceKind::Legacy, msg.clone()),
                        (SourceKind::Modern, msg),
                    ]
                })
                .collect(),
            Scenario::Mixed => self.mixed(count, now),
            Scenario::Stress => (0..count)
                .map(|i| self.matched("STRESS!", i, &format!("Stress test message {i}"), now))
                .collect(),
        }
    }

    fn mixed(&mut self, count: usize, now: DateTime<Utc>) -> Vec<Vec<Delivery>> {
        let matches = count * 70 / 100;
        let mismatches = count * 15 / 100;
        let orphans = count * 10 / 100;
        let duplicates = count - matches - mismatches - orphans;

        let mut units = Vec::with_capacity(count);
        for i in 0..matches {
            units.push(self.matched("MIXNORM", i, &format!("Mixed normal message {i}"), now));
        }
        for i in 0..mismatches {
            units.push(self.mismatched(
                "MIXMISM",
                i,
                &format!("Legacy {i}"),
                &format!("New {i} DIFF"),
                now,
            ));
        }
        for i in 0..orphans {
            units.push(self.orphan("MIXORPH", i, &format!("Orphan {i}"), now));
        }
        for i in 0..duplicates {
            let msg = self.message("MIXDUPL", i, &format!("Duplicate {i}"), now);
            units.push(vec![
                (SourceKind::Legacy, msg.clone()),
                (SourceKind::Modern, msg.clone()),
                (SourceKind::Legacy, msg),
            ]);
        }

        units.shuffle(&mut self.rng);
        units
    }

    fn matched(&mut self, program: &str, i: usize, content: &str, now: DateTime<Utc>) -> Vec<Delivery> {
        let msg = self.message(program, i, content, now);
        vec![(SourceKind::Legacy, msg.clone()), (SourceKind::Modern, msg)]
    }

    fn mismatched(
        &mut self,
        program: &str,
        i: usize,
        legacy: &str,
        modern: &str,
        now: DateTime<Utc>,
    ) -> Vec<Delivery> {
        vec![
            (SourceKind::Legacy, self.message(program, i, legacy, now)),
            (SourceKind::Modern, self.message(program, i, modern, now)),
        ]
    }

    fn orphan(&mut self, program: &str, i: usize, content: &str, now: DateTime<Utc>) -> Vec<Delivery> {
        let side = if self.rng.gen_bool(0.5) {
            SourceKind::Legacy
        } else {
            SourceKind::Modern
        };
        vec![(side, self.message(program, i, content, now))]
    }

    /// The key's sequence field wraps at 1000, so each block of 1000 units
    /// is stamped one second later to keep keys unique within a run.
    fn message(&mut self, program: &str, i: usize, content: &str, now: DateTime<Utc>) -> String {
        let at = now + chrono::Duration::seconds((i / 1000) as i64);
        format!(
            "{}|{content}|TIMESTAMP={}|RANDOM={:032x}",
            correlation_key(program, i, at),
            at.timestamp_millis(),
            self.rng.gen::<u128>()
        )
    }
}
