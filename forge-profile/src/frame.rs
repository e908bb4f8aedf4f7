//! Frame flip: periodically drains every thread's log, reconstructs
//! each thread's ENTER/LEAVE call stack, and rolls per-timer tick
//! aggregates into a displayable snapshot (§4.12 "Frame flip").

use crate::thread_log::{self, ENTRY_ENTER, ENTRY_LABEL, ENTRY_LABEL_LITERAL, ENTRY_LEAVE, ENTRY_META};
use crate::token;
use crate::{PROFILE_DEFAULT_AGGREGATE_FLIPS, PROFILE_MAX_TIMERS, PROFILE_STACK_MAX};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

bitflags::bitflags! {
    /// Mirrors `ProfileCounterFlags` (§4.12 added "Counter display
    /// flags"); `INTERNAL_MASK` from the original is omitted since it
    /// only gates the original's own UI bookkeeping.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct CounterFlags: u32 {
        const NONE = 0;
        const DETAILED = 0x1;
        const DETAILED_GRAPH = 0x2;
        const HAS_LIMIT = 0x4;
        const CLOSED = 0x8;
        const MANUAL_SWAP = 0x10;
        const LEAF = 0x20;
    }
}

#[derive(Clone, Debug)]
pub struct TimerSnapshot {
    pub timer_index: u16,
    pub name: String,
    pub color: u32,
    pub group_index: u16,
    /// Total ticks spent in this timer across all calls this window,
    /// including time spent in nested child timers.
    pub ticks: u64,
    /// `ticks` minus time attributed to nested child timers.
    pub exclusive_ticks: u64,
    pub max_ticks: u64,
    pub call_count: u32,
}

#[derive(Clone, Debug)]
pub struct CounterSnapshot {
    pub name: String,
    pub value: i64,
    pub limit: i64,
    pub flags: CounterFlags,
}

#[derive(Clone, Debug, Default)]
pub struct FrameSnapshot {
    pub aggregate_index: u64,
    pub flips_in_window: u32,
    pub timers: Vec<TimerSnapshot>,
    pub counters: Vec<CounterSnapshot>,
    pub labels: Vec<String>,
    pub overflow_threads: u32,
}

impl Default for TimerSnapshot {
    fn default() -> Self {
        Self {
            timer_index: 0,
            name: String::new(),
            color: 0,
            group_index: 0,
            ticks: 0,
            exclusive_ticks: 0,
            max_ticks: 0,
            call_count: 0,
        }
    }
}

#[derive(Clone, Copy, Default)]
struct Accum {
    ticks: u64,
    exclusive_ticks: u64,
    max_ticks: u64,
    meta_total: i64,
    call_count: u32,
}

struct StackFrame {
    timer_index: u16,
    enter_tick: u64,
    children_ticks: u64,
}

struct FrameState {
    accum: Vec<Accum>,
    aggregate_index: u64,
    flips_in_window: u32,
    pending_labels: Vec<String>,
}

impl FrameState {
    fn new() -> Self {
        Self {
            accum: vec![Accum::default(); PROFILE_MAX_TIMERS],
            aggregate_index: 0,
            flips_in_window: 0,
            pending_labels: Vec::new(),
        }
    }
}

static STATE: once_cell::sync::Lazy<Mutex<FrameState>> =
    once_cell::sync::Lazy::new(|| Mutex::new(FrameState::new()));
static PAUSED: AtomicBool = AtomicBool::new(false);

pub fn set_paused(paused: bool) {
    PAUSED.store(paused, Ordering::Relaxed);
}

pub fn is_paused() -> bool {
    PAUSED.load(Ordering::Relaxed)
}

/// Signed difference between two 48-bit ticks that stays correct
/// across a wraparound: shift both operands left by 16 so the 48-bit
/// value occupies the high bits of an `i64`, subtract, then shift back
/// to sign-extend from bit 47 (§4.12 "wrap-safe tick arithmetic").
pub(crate) fn tick_delta(end: u64, start: u64) -> u64 {
    let diff = (end as i64).wrapping_sub(start as i64);
    let signed = (diff << 16) >> 16;
    signed.max(0) as u64
}

/// Drains every registered thread's log, reconstructs call stacks, and
/// folds ticks into the running aggregate. Returns `Some` only on the
/// flip that completes a [`crate::PROFILE_DEFAULT_AGGREGATE_FLIPS`]
/// window, at which point the running aggregate is rolled into a
/// [`FrameSnapshot`] and reset (§4.12 "Aggregate rollup every N
/// flips").
pub fn flip() -> Option<FrameSnapshot> {
    let mut overflow_threads = 0u32;
    let mut labels_this_flip = Vec::new();

    {
        let mut state = STATE.lock();
        for log in thread_log::registry_snapshot() {
            if log.overflow_count() > 0 {
                overflow_threads += 1;
            }
            let mut stack: Vec<StackFrame> = Vec::with_capacity(PROFILE_STACK_MAX);
            log.drain(|entry| {
                let (ty, index, tick) = thread_log::unpack(entry);
                match ty {
                    ENTRY_ENTER => {
                        if stack.len() < PROFILE_STACK_MAX {
                            stack.push(StackFrame { timer_index: index, enter_tick: tick, children_ticks: 0 });
                        }
                    }
                    ENTRY_LEAVE => {
                        if let Some(frame) = stack.pop() {
                            if !token::group_enabled(
                                token::timer_info(frame.timer_index).map(|(_, _, g)| g).unwrap_or(0),
                            ) {
                                return;
                            }
                            let ticks = tick_delta(tick, frame.enter_tick);
                            let exclusive = ticks.saturating_sub(frame.children_ticks);
                            let slot = &mut state.accum[frame.timer_index as usize];
                            slot.ticks += ticks;
                            slot.exclusive_ticks += exclusive;
                            slot.max_ticks = slot.max_ticks.max(ticks);
                            slot.call_count += 1;
                            if let Some(parent) = stack.last_mut() {
                                parent.children_ticks += ticks;
                            }
                        }
                    }
                    ENTRY_META => {
                        if let Some(frame) = stack.last() {
                            let value = {
                                let signed = (tick as i64) << 16 >> 16;
                                signed
                            };
                            state.accum[frame.timer_index as usize].meta_total += value;
                        }
                    }
                    ENTRY_LABEL | ENTRY_LABEL_LITERAL => {
                        if let Some(text) = log.label_text(index) {
                            labels_this_flip.push(text);
                        }
                    }
                    _ => {}
                }
            });
        }

        state.flips_in_window += 1;
        if state.flips_in_window < PROFILE_DEFAULT_AGGREGATE_FLIPS {
            state.pending_labels.extend(labels_this_flip);
            return None;
        }

        let timers = state
            .accum
            .iter()
            .enumerate()
            .filter(|(_, a)| a.call_count > 0)
            .map(|(index, a)| {
                let (name, color, group_index) =
                    token::timer_info(index as u16).unwrap_or_else(|| (String::new(), 0, 0));
                TimerSnapshot {
                    timer_index: index as u16,
                    name,
                    color,
                    group_index,
                    ticks: a.ticks,
                    exclusive_ticks: a.exclusive_ticks,
                    max_ticks: a.max_ticks,
                    call_count: a.call_count,
                }
            })
            .collect();

        let counters = token::counters_snapshot()
            .into_iter()
            .map(|(name, value, limit)| {
                let mut flags = CounterFlags::NONE;
                if limit != i64::MAX {
                    flags |= CounterFlags::HAS_LIMIT;
                }
                CounterSnapshot { name, value, limit, flags }
            })
            .collect();

        let mut labels = std::mem::take(&mut state.pending_labels);
        labels.extend(labels_this_flip);

        let snapshot = FrameSnapshot {
            aggregate_index: state.aggregate_index,
            flips_in_window: state.flips_in_window,
            timers,
            counters,
            labels,
            overflow_threads,
        };

        state.aggregate_index += 1;
        state.flips_in_window = 0;
        state.accum.iter_mut().for_each(|a| *a = Accum::default());

        Some(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_delta_handles_wraparound() {
        let max_tick = (1u64 << 48) - 1;
        let wrapped = 5u64;
        assert_eq!(tick_delta(wrapped, max_tick), 6);
    }

    #[test]
    fn tick_delta_is_nonnegative_for_normal_order() {
        assert_eq!(tick_delta(100, 40), 60);
    }

    #[test]
    fn counter_gets_has_limit_flag_only_when_limited() {
        let unlimited = CounterSnapshot { name: "a".into(), value: 0, limit: i64::MAX, flags: CounterFlags::NONE };
        let limited = CounterSnapshot { name: "b".into(), value: 0, limit: 10, flags: CounterFlags::HAS_LIMIT };
        assert!(!unlimited.flags.contains(CounterFlags::HAS_LIMIT));
        assert!(limited.flags.contains(CounterFlags::HAS_LIMIT));
    }
}
