//! Pass timing.
//!
//! Every analysis phase grabs a `TimingToken` on entry:
//!
//! ```ignore
//! let _tt = timing::solve();
//! ```
//!
//! The token accumulates the elapsed wall time into a thread-local table
//! when dropped, and logs it at debug level. `take_current` drains the
//! table for reporting.

use log::debug;
use std::cell::RefCell;
use std::fmt;
use std::time::{Duration, Instant};

// Each pass gets a description and a starter function.
macro_rules! define_passes {
    ($($fn_name:ident : $display:expr,)+) => {
        const PASS_DESCRIPTIONS: &[&str] = &[$($display,)+];

        define_passes!(@count 0; $($fn_name,)+);
    };

    (@count $idx:expr;) => {};
    (@count $idx:expr; $fn_name:ident, $($rest:ident,)*) => {
        /// Start timing this pass.
        pub fn $fn_name() -> TimingToken {
            start_pass($idx)
        }

        define_passes!(@count $idx + 1; $($rest,)*);
    };
}

define_passes! {
    identify_objects: "Object identification",
    create_constraints: "Constraint generation",
    optimize_constraints: "Constraint optimization (HU)",
    andersen: "Auxiliary Andersen solve",
    add_indirect_calls: "Indirect call resolution",
    compute_ssa: "Ramalingam condensation",
    fill_top_level: "DUG top-level fill",
    compute_partitions: "Access-equivalence partitioning",
    add_partitions: "Per-partition SSA",
    solve: "Points-to solve",
}

thread_local! {
    static PASS_TIME: RefCell<Vec<Duration>> =
        RefCell::new(vec![Duration::from_secs(0); PASS_DESCRIPTIONS.len()]);
}

/// A timing token. Accumulates the pass time when dropped.
pub struct TimingToken {
    pass: usize,
    start: Instant,
}

fn start_pass(pass: usize) -> TimingToken {
    TimingToken {
        pass,
        start: Instant::now(),
    }
}

impl Drop for TimingToken {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        debug!(
            "timing: {}: {}.{:03}s",
            PASS_DESCRIPTIONS[self.pass],
            elapsed.as_secs(),
            elapsed.subsec_millis()
        );
        PASS_TIME.with(|t| t.borrow_mut()[self.pass] += elapsed);
    }
}

/// Accumulated pass times, obtained from `take_current`.
pub struct PassTimes {
    times: Vec<Duration>,
}

impl fmt::Display for PassTimes {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "========  ==================================")?;
        let mut total = Duration::from_secs(0);
        for (idx, &dur) in self.times.iter().enumerate() {
            writeln!(
                f,
                "{:4}.{:03}  {}",
                dur.as_secs(),
                dur.subsec_millis(),
                PASS_DESCRIPTIONS[idx]
            )?;
            total += dur;
        }
        writeln!(f, "========  ==================================")?;
        writeln!(
            f,
            "{:4}.{:03}  Total",
            total.as_secs(),
            total.subsec_millis()
        )
    }
}

/// Take the current accumulated pass timings, resetting them to zero.
pub fn take_current() -> PassTimes {
    PASS_TIME.with(|t| PassTimes {
        times: std::mem::replace(
            &mut *t.borrow_mut(),
            vec![Duration::from_secs(0); PASS_DESCRIPTIONS.len()],
        ),
    })
}
