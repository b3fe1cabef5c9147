//! Synchronization-free scheduling of triangular dependency graphs.
//!
//! Work units (rows, or fixed-size chunks of rows) are handed out in
//! increasing order through one atomic claim counter, so any idle worker
//! picks up the next unit regardless of how expensive earlier units were.
//! Each unit has a status word. A unit that depends on another spins on
//! that unit's status with acquire ordering until it reads `Ready`; the
//! owner publishes `Ready` with release ordering once its outputs are
//! written. There are no locks and no barriers between units.
//!
//! Preconditions (not checked): every dependency of unit `u` is a unit
//! `< u`, and the dependency graph is acyclic. A violation hangs the run.
//! The work closure must not call back into rayon: a worker blocked in a
//! nested join could pick up a unit that spins on its own suspended owner.

use std::cell::UnsafeCell;
use std::ops::Range;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use crate::executor::Executor;

/// Lifecycle of one unit. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UnitState {
    Unclaimed = 0,
    Claimed = 1,
    Computing = 2,
    Ready = 3,
}

impl UnitState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => UnitState::Unclaimed,
            1 => UnitState::Claimed,
            2 => UnitState::Computing,
            _ => UnitState::Ready,
        }
    }
}

/// Spins before a waiting worker starts yielding its time slice.
const SPIN_BUDGET: u32 = 1 << 10;

/// Claim counter and status words for one factorization or solve call.
/// Not reusable across concurrent calls.
pub struct SyncFreeScheduler {
    next: AtomicUsize,
    status: Vec<AtomicU8>,
}

/// Handle given to the work closure of the unit being computed.
pub struct UnitContext<'a> {
    unit: usize,
    scheduler: &'a SyncFreeScheduler,
}

impl UnitContext<'_> {
    pub fn unit(&self) -> usize {
        self.unit
    }

    /// Block until `dependency` has published `Ready`. Every write the
    /// dependency's owner made before publishing is visible afterwards.
    pub fn wait_for(&self, dependency: usize) {
        debug_assert!(
            dependency < self.unit,
            "unit {} waits on later unit {dependency}",
            self.unit
        );
        let status = &self.scheduler.status[dependency];
        let mut spins = 0u32;
        while status.load(Ordering::Acquire) != UnitState::Ready as u8 {
            if spins < SPIN_BUDGET {
                std::hint::spin_loop();
                spins += 1;
            } else {
                std::thread::yield_now();
            }
        }
    }
}

impl SyncFreeScheduler {
    pub fn new(num_units: usize) -> Self {
        tracing::trace!(num_units, "allocating scheduler status words");
        Self {
            next: AtomicUsize::new(0),
            status: (0..num_units).map(|_| AtomicU8::new(UnitState::Unclaimed as u8)).collect(),
        }
    }

    pub fn num_units(&self) -> usize {
        self.status.len()
    }

    pub fn state(&self, unit: usize) -> UnitState {
        UnitState::from_u8(self.status[unit].load(Ordering::Acquire))
    }

    /// Run `work` once for every unit on the executor's workers.
    ///
    /// `work` resolves its own dependencies through `UnitContext::wait_for`
    /// before reading them; the scheduler publishes the unit as ready when
    /// `work` returns.
    pub fn run<F>(&self, exec: &Executor, work: F)
    where
        F: Fn(&UnitContext<'_>) + Sync,
    {
        let workers = exec.num_workers().max(1);
        exec.install(|| {
            rayon::scope(|scope| {
                for _ in 0..workers {
                    scope.spawn(|_| self.worker_loop(&work));
                }
            })
        });
        exec.synchronize();
    }

    fn worker_loop<F>(&self, work: &F)
    where
        F: Fn(&UnitContext<'_>),
    {
        loop {
            let unit = self.next.fetch_add(1, Ordering::Relaxed);
            if unit >= self.status.len() {
                return;
            }
            self.status[unit].store(UnitState::Claimed as u8, Ordering::Relaxed);
            let ctx = UnitContext { unit, scheduler: self };
            self.status[unit].store(UnitState::Computing as u8, Ordering::Relaxed);
            work(&ctx);
            self.status[unit].store(UnitState::Ready as u8, Ordering::Release);
        }
    }
}

/// Order in which rows are turned into units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOrder {
    /// Unit 0 holds the first rows; lower-triangular dependencies.
    Ascending,
    /// Unit 0 holds the last rows; upper-triangular dependencies.
    Descending,
}

/// Rows grouped into fixed-size units of a `SyncFreeScheduler`.
///
/// Rows inside one unit are processed in order by the same worker, so a
/// dependency on an earlier row of the same unit needs no wait.
pub struct RowSchedule {
    scheduler: SyncFreeScheduler,
    num_rows: usize,
    rows_per_unit: usize,
    order: RowOrder,
}

/// Handle given to the per-row work closure.
pub struct RowContext<'a> {
    unit: &'a UnitContext<'a>,
    schedule: &'a RowSchedule,
}

impl RowContext<'_> {
    /// Block until `row` has been computed.
    pub fn wait_for_row(&self, row: usize) {
        let unit = self.schedule.unit_of(row);
        if unit < self.unit.unit() {
            self.unit.wait_for(unit);
        } else {
            debug_assert_eq!(unit, self.unit.unit(), "row {row} belongs to a later unit");
        }
    }
}

impl RowSchedule {
    pub fn new(num_rows: usize, rows_per_unit: usize, order: RowOrder) -> Self {
        let rows_per_unit = rows_per_unit.max(1);
        Self {
            scheduler: SyncFreeScheduler::new(num_rows.div_ceil(rows_per_unit)),
            num_rows,
            rows_per_unit,
            order,
        }
    }

    pub fn unit_of(&self, row: usize) -> usize {
        match self.order {
            RowOrder::Ascending => row / self.rows_per_unit,
            RowOrder::Descending => (self.num_rows - 1 - row) / self.rows_per_unit,
        }
    }

    /// Run `work(row, ctx)` once per row.
    pub fn run<F>(&self, exec: &Executor, work: F)
    where
        F: Fn(usize, &RowContext<'_>) + Sync,
    {
        self.scheduler.run(exec, |unit_ctx| {
            let ctx = RowContext {
                unit: unit_ctx,
                schedule: self,
            };
            let first = unit_ctx.unit() * self.rows_per_unit;
            let last = (first + self.rows_per_unit).min(self.num_rows);
            for k in first..last {
                let row = match self.order {
                    RowOrder::Ascending => k,
                    RowOrder::Descending => self.num_rows - 1 - k,
                };
                work(row, &ctx);
            }
        });
    }
}

/// Output buffer shared by all workers of one scheduler run.
///
/// Each unit writes only its own range, and reads other units' ranges only
/// after `wait_for` on them returned.
pub struct SharedSlots<T> {
    cells: Box<[UnsafeCell<T>]>,
}

// SAFETY: access is partitioned by the scheduler protocol described above.
unsafe impl<T: Send> Sync for SharedSlots<T> {}

impl<T: Copy> SharedSlots<T> {
    pub fn new(data: Vec<T>) -> Self {
        Self {
            cells: data.into_iter().map(UnsafeCell::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn into_inner(self) -> Vec<T> {
        self.cells.into_vec().into_iter().map(UnsafeCell::into_inner).collect()
    }

    /// # Safety
    /// The caller must own `range` (it belongs to the unit currently being
    /// computed) and no other live reference may overlap it.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn slice_mut(&self, range: Range<usize>) -> &mut [T] {
        let cells = &self.cells[range];
        // UnsafeCell<T> has the layout of T
        std::slice::from_raw_parts_mut(UnsafeCell::raw_get(cells.as_ptr()), cells.len())
    }

    /// # Safety
    /// `range` must belong to a unit that is ready, or to the calling unit
    /// with no outstanding mutable borrow.
    pub unsafe fn slice(&self, range: Range<usize>) -> &[T] {
        let cells = &self.cells[range];
        std::slice::from_raw_parts(UnsafeCell::raw_get(cells.as_ptr()) as *const T, cells.len())
    }
}
