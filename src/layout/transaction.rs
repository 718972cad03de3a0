use std::time::{Duration, Instant};

use anyhow::Context as _;

use super::Panel;
use crate::surface::{Snapshot, SnapshotKind, SurfaceId};

/// Transaction between the surfaces of one workspace.
///
/// How it's used:
/// 1. When a surface is asked to change its size, the workspace calls [`Transaction::start()`].
///    The first participant captures a snapshot of everything currently visible; later ones only
///    join.
/// 2. While the transaction is active, the renderer draws the snapshot instead of live surfaces.
/// 3. Every participant that commits a buffer matching its pending state calls
///    [`Transaction::update()`]. Once the last one does, the workspace finishes the transaction
///    with [`Transaction::finish()`].
/// 4. If clients take too long, the workspace finishes it anyway, see
///    [`Transaction::is_expired()`].
#[derive(Debug, Default)]
pub struct Transaction {
    /// Number of participants that haven't acknowledged yet.
    sentinel: u32,
    start_time: Option<Instant>,
    /// Incremented every time a new transaction starts.
    ///
    /// Lets timers armed for an earlier transaction tell that it's gone.
    serial: u64,
    snapshot: Option<TransactionSnapshot>,
}

/// Frozen picture of a workspace, drawn while a transaction is active.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionSnapshot {
    pub panel: Panel,
    /// Snapshots of the visible surfaces and their children, bottom to top.
    pub surfaces: Vec<SurfaceSnapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceSnapshot {
    pub surface: SurfaceId,
    /// Indexed by [`SnapshotKind`]; geometry is workspace-local.
    slots: [Option<Snapshot>; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartResult {
    /// This was the first participant, the snapshot was captured.
    Started,
    /// A transaction was already running.
    Joined,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a participant to the transaction, starting it if necessary.
    ///
    /// `capture` is only called when the transaction is not active yet. If it fails, the
    /// transaction stays idle.
    pub fn start(
        &mut self,
        capture: impl FnOnce() -> anyhow::Result<TransactionSnapshot>,
    ) -> anyhow::Result<StartResult> {
        if self.is_active() {
            self.sentinel += 1;
            trace!(sentinel = self.sentinel, "joined transaction");
            return Ok(StartResult::Joined);
        }

        let snapshot = capture().context("error capturing transaction snapshot")?;

        self.start_time = Some(Instant::now());
        self.serial = self.serial.wrapping_add(1);
        self.snapshot = Some(snapshot);
        self.sentinel = 1;
        debug!(serial = self.serial, "started transaction");

        Ok(StartResult::Started)
    }

    /// Records one participant acknowledging its pending state.
    ///
    /// Returns `true` if that was the last outstanding participant, at which point the
    /// transaction should be finished.
    pub fn update(&mut self) -> bool {
        if !self.is_active() {
            warn!("transaction update without an active transaction");
            return false;
        }

        self.sentinel -= 1;
        trace!(sentinel = self.sentinel, "transaction participant ready");
        self.sentinel == 0
    }

    /// Resets the transaction to idle and returns the snapshot it held.
    pub fn finish(&mut self) -> Option<TransactionSnapshot> {
        if let Some(start_time) = self.start_time.take() {
            trace!(
                serial = self.serial,
                outstanding = self.sentinel,
                "finished transaction after {:?}",
                start_time.elapsed()
            );
        }

        self.sentinel = 0;
        self.snapshot.take()
    }

    pub fn is_active(&self) -> bool {
        self.sentinel > 0
    }

    pub fn sentinel(&self) -> u32 {
        self.sentinel
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn start_time(&self) -> Option<Instant> {
        self.start_time
    }

    pub fn snapshot(&self) -> Option<&TransactionSnapshot> {
        self.snapshot.as_ref()
    }

    pub(crate) fn snapshot_mut(&mut self) -> Option<&mut TransactionSnapshot> {
        self.snapshot.as_mut()
    }

    /// Time since the transaction started, or `None` if it's idle.
    pub fn elapsed(&self, now: Instant) -> Option<Duration> {
        self.start_time
            .map(|start_time| now.saturating_duration_since(start_time))
    }

    /// Whether the transaction has been running for at least `timeout` at `now`.
    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        self.elapsed(now).is_some_and(|elapsed| elapsed >= timeout)
    }

    /// Whether the snapshot includes the surface.
    pub fn references(&self, surface: SurfaceId) -> bool {
        self.snapshot
            .as_ref()
            .is_some_and(|snapshot| snapshot.surfaces.iter().any(|s| s.surface == surface))
    }
}

impl SurfaceSnapshot {
    pub fn new(surface: SurfaceId, normal: Option<Snapshot>, decoration: Option<Snapshot>) -> Self {
        Self {
            surface,
            slots: [normal, decoration],
        }
    }

    pub fn get(&self, kind: SnapshotKind) -> Option<&Snapshot> {
        self.slots[kind as usize].as_ref()
    }
}
