use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Context;
use log::{error, info, trace, warn};
use web_time::Instant;

use crate::error::MapError;
use crate::map::MapSystem;
use crate::map::renderer::{DisplaySink, RenderOutcome};
use crate::map::store::TileStore;
use crate::state::SharedState;

/// Readiness flags raised by the producer threads
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    GpsData,
    MapControl,
    Telemetry,
}

impl Signal {
    fn bit(self) -> u8 {
        match self {
            Signal::GpsData => 1,
            Signal::MapControl => 1 << 1,
            Signal::Telemetry => 1 << 2,
        }
    }
}

/// Set of signals collected by one wait
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SignalSet(u8);

impl SignalSet {
    pub fn contains(&self, signal: Signal) -> bool {
        self.0 & signal.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// Level-triggered signals: raising one that is already pending is a no-op
#[derive(Debug, Default)]
pub struct Signals {
    pending: Mutex<u8>,
    ready: Condvar,
}

impl Signals {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, u8> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn raise(&self, signal: Signal) {
        *self.lock() |= signal.bit();
        self.ready.notify_all();
    }

    /// Take everything raised so far without blocking
    pub fn take(&self) -> SignalSet {
        SignalSet(std::mem::take(&mut *self.lock()))
    }

    /// Block until at least one signal is raised or `timeout` elapses
    ///
    /// Returns and clears all pending signals, an empty set on timeout.
    pub fn wait(&self, timeout: Duration) -> SignalSet {
        let pending = self.lock();
        let (mut pending, _) = self
            .ready
            .wait_timeout_while(pending, timeout, |p| *p == 0)
            .unwrap_or_else(PoisonError::into_inner);
        SignalSet(std::mem::take(&mut *pending))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CycleOutcome {
    /// No position published yet
    NoFix,
    /// Position could not be mapped, nothing was drawn
    Skipped,
    Rendered(RenderOutcome),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CycleReport {
    pub signals: SignalSet,
    pub outcome: CycleOutcome,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub cycles: u64,
    pub renders: u64,
    pub flushes: u64,
    pub skipped: u64,
    pub last_cycle: Duration,
    pub max_cycle: Duration,
}

/// Drives the map system from shared state and flushes frames to the display
pub struct RenderLoop<S: TileStore, D: DisplaySink> {
    map: MapSystem<S>,
    state: Arc<SharedState>,
    signals: Arc<Signals>,
    sink: D,
    timeout: Duration,
    stats: LoopStats,
}

impl<S: TileStore, D: DisplaySink> RenderLoop<S, D> {
    pub fn new(
        map: MapSystem<S>,
        state: Arc<SharedState>,
        signals: Arc<Signals>,
        sink: D,
        timeout: Duration,
    ) -> Self {
        Self {
            map,
            state,
            signals,
            sink,
            timeout,
            stats: LoopStats::default(),
        }
    }

    pub fn map(&self) -> &MapSystem<S> {
        &self.map
    }

    pub fn sink(&self) -> &D {
        &self.sink
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    /// Wait for a signal, then composite one frame from the current state
    pub fn run_once(&mut self) -> anyhow::Result<CycleReport> {
        let signals = self.signals.wait(self.timeout);
        let started = Instant::now();
        self.stats.cycles += 1;

        let Some(input) = self.state.frame_input() else {
            trace!("No position yet");
            return Ok(CycleReport {
                signals,
                outcome: CycleOutcome::NoFix,
            });
        };

        let outcome = match self.map.render(&input, &mut self.sink) {
            Ok(rendered) => {
                self.state
                    .publish_grid(rendered.viewport.center_tile, self.map.grid_dimension());
                self.stats.renders += 1;
                if rendered.flushed {
                    self.stats.flushes += 1;
                }
                CycleOutcome::Rendered(rendered)
            }
            Err(e @ MapError::Display(_)) => {
                return Err(e).context("Display sink rejected frame");
            }
            Err(e) => {
                warn!("Skipping map cycle: {}", e);
                self.stats.skipped += 1;
                CycleOutcome::Skipped
            }
        };

        let elapsed = started.elapsed();
        self.stats.last_cycle = elapsed;
        self.stats.max_cycle = self.stats.max_cycle.max(elapsed);
        trace!("Map cycle took {:?}", elapsed);

        Ok(CycleReport { signals, outcome })
    }

    /// Run cycles until `stop` is set
    pub fn run(&mut self, stop: &AtomicBool) -> anyhow::Result<LoopStats> {
        info!("Render loop started");
        while !stop.load(Ordering::Acquire) {
            if let Err(e) = self.run_once() {
                error!("Render loop stopped: {:#}", e);
                return Err(e);
            }
        }
        info!("Render loop stopped after {} cycles", self.stats.cycles);
        Ok(self.stats)
    }
}

impl<S, D> RenderLoop<S, D>
where
    S: TileStore + 'static,
    D: DisplaySink + Send + 'static,
{
    /// Run the loop on its own thread; the handle yields the final stats
    pub fn spawn(mut self, stop: Arc<AtomicBool>) -> anyhow::Result<JoinHandle<anyhow::Result<LoopStats>>> {
        thread::Builder::new()
            .name("map-render".to_string())
            .spawn(move || self.run(&stop))
            .context("Failed to spawn render thread")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::framebuffer::ScreenBuffer;
    use crate::map::renderer::RedrawKind;
    use crate::map::renderer::tests::{RecordingSink, SyntheticStore, test_config};
    use crate::map::tile::TileKey;
    use crate::state::PositionFix;
    use std::io;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn render_loop<D: DisplaySink>(sink: D) -> RenderLoop<SyntheticStore, D> {
        let config = test_config();
        let state = Arc::new(SharedState::new(&config));
        let map = MapSystem::new(config, SyntheticStore::default()).unwrap();
        RenderLoop::new(map, state, Arc::new(Signals::new()), sink, Duration::from_millis(5))
    }

    struct FailingSink;

    impl DisplaySink for FailingSink {
        fn flush(&mut self, _frame: &ScreenBuffer, _x: i32, _y: i32) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "panel off"))
        }
    }

    #[test]
    fn test_signals_coalesce() {
        let signals = Signals::new();
        signals.raise(Signal::GpsData);
        signals.raise(Signal::GpsData);
        signals.raise(Signal::MapControl);

        let set = signals.wait(Duration::from_millis(1));
        assert!(set.contains(Signal::GpsData));
        assert!(set.contains(Signal::MapControl));
        assert!(!set.contains(Signal::Telemetry));

        assert!(signals.wait(Duration::from_millis(1)).is_empty());
        assert!(signals.take().is_empty());
    }

    #[test]
    fn test_wait_wakes_on_raise_from_other_thread() {
        let signals = Arc::new(Signals::new());
        let raiser = {
            let signals = Arc::clone(&signals);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                signals.raise(Signal::Telemetry);
            })
        };

        let set = signals.wait(Duration::from_secs(10));
        assert!(set.contains(Signal::Telemetry));
        raiser.join().unwrap();
    }

    #[test]
    fn test_cycle_without_fix_draws_nothing() {
        init();
        let mut render = render_loop(RecordingSink::default());
        let report = render.run_once().unwrap();
        assert_eq!(report.outcome, CycleOutcome::NoFix);
        assert!(render.sink().frames.is_empty());
        assert!(render.state.tile_grid().is_none());
    }

    #[test]
    fn test_cycle_renders_and_publishes_grid() {
        init();
        let mut render = render_loop(RecordingSink::default());
        render.state.publish_fix(PositionFix::new(46.947597, 7.440434));
        render.signals.raise(Signal::GpsData);

        let report = render.run_once().unwrap();
        assert!(report.signals.contains(Signal::GpsData));
        let CycleOutcome::Rendered(outcome) = report.outcome else {
            panic!("expected a rendered cycle, got {:?}", report.outcome);
        };
        assert_eq!(outcome.redraw, RedrawKind::Full);

        let grid = render.state.tile_grid().unwrap();
        assert_eq!(grid.center, outcome.viewport.center_tile);
        assert_eq!(grid.center, TileKey::new(15, 17061, 11532));
        assert_eq!(grid.dimension, 7);

        // Idle cycle: nothing moved, nothing flushed
        render.run_once().unwrap();
        assert_eq!(render.sink().frames.len(), 1);
        assert_eq!(render.stats().renders, 2);
        assert_eq!(render.stats().flushes, 1);
    }

    #[test]
    fn test_unmappable_position_is_skipped() {
        init();
        let mut render = render_loop(RecordingSink::default());
        render.state.publish_fix(PositionFix::new(88.0, 7.4));

        let report = render.run_once().unwrap();
        assert_eq!(report.outcome, CycleOutcome::Skipped);
        assert_eq!(render.stats().skipped, 1);

        render.state.publish_fix(PositionFix::new(46.9, 7.4));
        assert!(matches!(render.run_once().unwrap().outcome, CycleOutcome::Rendered(_)));
    }

    #[test]
    fn test_display_failure_is_fatal() {
        init();
        let mut render = render_loop(FailingSink);
        render.state.publish_fix(PositionFix::new(46.9, 7.4));

        let err = render.run_once().unwrap_err();
        assert!(matches!(err.downcast_ref::<MapError>(), Some(MapError::Display(_))));

        let stop = AtomicBool::new(false);
        assert!(render.run(&stop).is_err());
    }

    #[test]
    fn test_spawned_loop_stops_on_flag() {
        init();
        let render = render_loop(RecordingSink::default());
        let state = Arc::clone(&render.state);
        let signals = Arc::clone(&render.signals);
        let stop = Arc::new(AtomicBool::new(false));

        let handle = render.spawn(Arc::clone(&stop)).unwrap();
        state.publish_fix(PositionFix::new(46.9, 7.4));
        signals.raise(Signal::GpsData);
        thread::sleep(Duration::from_millis(50));
        stop.store(true, Ordering::Release);

        let stats = handle.join().unwrap().unwrap();
        assert!(stats.cycles > 0);
        assert!(state.tile_grid().is_some());
    }
}
