use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};

/// How a cancellable loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit<B> {
    /// The iterator was exhausted.
    Completed,
    /// The loop body requested to stop and returned a value.
    Stopped(B),
    /// The abort flag was raised before an item was processed.
    Cancelled,
}

/// Runs `func` on every item until the iterator is exhausted, `func` breaks, or `abort_flag` is
/// raised.
///
/// The flag is checked before every item and left untouched, so a single flag can cancel several
/// loops running on different threads.
pub fn try_for_each_cancellable<I, F, T, B>(
    iter: I,
    abort_flag: &AtomicBool,
    mut func: F,
) -> LoopExit<B>
where
    I: IntoIterator<Item = T>,
    F: FnMut(T) -> ControlFlow<B>,
{
    for item in iter {
        if abort_flag.load(Ordering::Relaxed) {
            return LoopExit::Cancelled;
        }
        if let ControlFlow::Break(value) = func(item) {
            return LoopExit::Stopped(value);
        }
    }
    LoopExit::Completed
}
