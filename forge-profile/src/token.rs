//! Token registry: interns (group, name) pairs into a stable 64-bit
//! token, `ProfileGetToken`/`ProfileGetGroup` (§4.12 "Token registry").

use crate::{PROFILE_MAX_GROUPS, PROFILE_MAX_TIMERS, PROFILE_NAME_MAX_LEN};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// `(group_mask: 48 bits) << 16 | (timer_index: 16 bits)` (§4.12; mirrors
/// `ProfileMakeToken`/`ProfileGetTimerIndex`/`ProfileGetGroupMask`).
pub type ProfileToken = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenType {
    Cpu,
    Gpu,
}

pub(crate) struct GroupInfo {
    pub name: String,
    pub enabled: AtomicBool,
    pub ty: TokenType,
}

pub(crate) struct TimerInfo {
    pub name: String,
    pub color: u32,
    pub group_index: u16,
}

#[derive(Default)]
pub(crate) struct CounterInfo {
    pub name: String,
    pub value: std::sync::atomic::AtomicI64,
    pub limit: std::sync::atomic::AtomicI64,
}

struct Registry {
    groups: Vec<GroupInfo>,
    timers: Vec<TimerInfo>,
    meta_names: Vec<String>,
    label_groups: Vec<u16>,
    counters: Vec<CounterInfo>,
}

impl Registry {
    fn new() -> Self {
        Self {
            groups: Vec::with_capacity(PROFILE_MAX_GROUPS),
            timers: Vec::with_capacity(PROFILE_MAX_TIMERS),
            meta_names: Vec::new(),
            label_groups: Vec::new(),
            counters: Vec::new(),
        }
    }

    fn find_or_create_group(&mut self, name: &str, ty: TokenType) -> u16 {
        if let Some(index) = self.groups.iter().position(|g| g.name == name) {
            return index as u16;
        }
        assert!(self.groups.len() < PROFILE_MAX_GROUPS, "profiler group table full");
        self.groups.push(GroupInfo {
            name: truncate_name(name),
            enabled: AtomicBool::new(true),
            ty,
        });
        (self.groups.len() - 1) as u16
    }
}

static REGISTRY: once_cell::sync::Lazy<Mutex<Registry>> =
    once_cell::sync::Lazy::new(|| Mutex::new(Registry::new()));

fn truncate_name(name: &str) -> String {
    name.chars().take(PROFILE_NAME_MAX_LEN).collect()
}

/// Deterministic djb2-style hash used to pick a display color when the
/// caller passes `0` (matches the original's "auto color from name"
/// fallback used by `PROFILE_SCOPEI`-style call sites with no explicit
/// color).
fn hash_color(name: &str) -> u32 {
    let mut hash: u32 = 5381;
    for byte in name.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(byte as u32);
    }
    0x00FF_FFFF & hash
}

/// Interns `(group, name, thread)` into a stable token; linear scan
/// under the registry mutex, O(nGroups + nTimers) (§4.12 "Group
/// creation is O(nGroups) linear scan").
pub fn get_token(group: &str, name: &str, color: u32, ty: TokenType) -> ProfileToken {
    let mut registry = REGISTRY.lock();
    let group_index = registry.find_or_create_group(group, ty);

    if let Some(index) = registry
        .timers
        .iter()
        .position(|t| t.group_index == group_index && t.name == name)
    {
        return make_token(1u64 << group_index, index as u16);
    }

    assert!(registry.timers.len() < PROFILE_MAX_TIMERS, "profiler timer table full");
    let color = if color == 0 { hash_color(name) } else { color };
    registry.timers.push(TimerInfo { name: truncate_name(name), color, group_index });
    make_token(1u64 << group_index, (registry.timers.len() - 1) as u16)
}

/// Looks up an already-interned token without creating one; returns
/// `None` if the (group, name) pair has never been seen.
pub fn find_token(group: &str, name: &str) -> Option<ProfileToken> {
    let registry = REGISTRY.lock();
    let group_index = registry.groups.iter().position(|g| g.name == group)? as u16;
    let timer_index = registry
        .timers
        .iter()
        .position(|t| t.group_index == group_index && t.name == name)?;
    Some(make_token(1u64 << group_index, timer_index as u16))
}

/// A free-standing meta-counter token (§4.12 added "Meta counters"),
/// interned in its own namespace separate from timers.
pub fn get_meta_token(name: &str) -> ProfileToken {
    let mut registry = REGISTRY.lock();
    if let Some(index) = registry.meta_names.iter().position(|n| n == name) {
        return index as u64;
    }
    registry.meta_names.push(truncate_name(name));
    (registry.meta_names.len() - 1) as u64
}

/// A label token: labels attach to whichever timer is on top of the
/// calling thread's stack, so the "token" here only needs to carry the
/// owning group (§4.12 added "Labels").
pub fn get_label_token(group: &str) -> ProfileToken {
    let mut registry = REGISTRY.lock();
    let group_index = registry.find_or_create_group(group, TokenType::Cpu);
    registry.label_groups.push(group_index);
    group_index as u64
}

/// A free-standing counter token, independent of the timer/group system
/// (§4.12 added "Free-standing counters").
pub fn get_counter_token(name: &str) -> ProfileToken {
    let mut registry = REGISTRY.lock();
    if let Some(index) = registry.counters.iter().position(|c| c.name == name) {
        return index as u64;
    }
    registry.counters.push(CounterInfo {
        name: truncate_name(name),
        value: std::sync::atomic::AtomicI64::new(0),
        limit: std::sync::atomic::AtomicI64::new(i64::MAX),
    });
    (registry.counters.len() - 1) as u64
}

pub(crate) fn with_counter<R>(token: ProfileToken, f: impl FnOnce(&CounterInfo) -> R) -> Option<R> {
    let registry = REGISTRY.lock();
    registry.counters.get(token as usize).map(f)
}

pub fn get_group_name(token: ProfileToken) -> Option<String> {
    let registry = REGISTRY.lock();
    let index = group_index(token) as usize;
    registry.groups.get(index).map(|g| g.name.clone())
}

/// Disables walking a group's log entries during [`crate::flip`]
/// (§4.12 added "Group force-enable/disable").
pub fn force_disable_group(name: &str, ty: TokenType) {
    set_group_enabled(name, ty, false);
}

pub fn force_enable_group(name: &str, ty: TokenType) {
    set_group_enabled(name, ty, true);
}

fn set_group_enabled(name: &str, ty: TokenType, enabled: bool) {
    let mut registry = REGISTRY.lock();
    let index = registry.find_or_create_group(name, ty);
    registry.groups[index as usize].enabled.store(enabled, Ordering::Relaxed);
}

pub(crate) fn group_enabled(group_index: u16) -> bool {
    REGISTRY
        .lock()
        .groups
        .get(group_index as usize)
        .map(|g| g.enabled.load(Ordering::Relaxed))
        .unwrap_or(true)
}

pub(crate) fn timer_color(timer_index: u16) -> u32 {
    REGISTRY.lock().timers.get(timer_index as usize).map(|t| t.color).unwrap_or(0)
}

/// `(name, color, owning group index)` for the given timer, used by
/// [`crate::frame::flip`] to label its rolled-up snapshot.
pub(crate) fn timer_info(timer_index: u16) -> Option<(String, u32, u16)> {
    REGISTRY
        .lock()
        .timers
        .get(timer_index as usize)
        .map(|t| (t.name.clone(), t.color, t.group_index))
}

/// `(name, value, limit)` for every registered free-standing counter,
/// in registration order (stable token order).
pub(crate) fn counters_snapshot() -> Vec<(String, i64, i64)> {
    REGISTRY
        .lock()
        .counters
        .iter()
        .map(|c| {
            (
                c.name.clone(),
                c.value.load(Ordering::Relaxed),
                c.limit.load(Ordering::Relaxed),
            )
        })
        .collect()
}

fn make_token(group_mask: u64, timer_index: u16) -> ProfileToken {
    (group_mask << 16) | timer_index as u64
}

pub(crate) fn timer_index(token: ProfileToken) -> u16 {
    (token & 0xffff) as u16
}

fn group_index(token: ProfileToken) -> u16 {
    let mask = (token >> 16) & ((1u64 << PROFILE_MAX_GROUPS) - 1);
    mask.trailing_zeros() as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_name_interns_to_the_same_token() {
        let a = get_token("render", "opaque-pass", 0xff0000, TokenType::Cpu);
        let b = get_token("render", "opaque-pass", 0xff0000, TokenType::Cpu);
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_names_intern_distinct_timer_indices() {
        let a = get_token("render-distinct", "pass-a", 1, TokenType::Cpu);
        let b = get_token("render-distinct", "pass-b", 1, TokenType::Cpu);
        assert_ne!(timer_index(a), timer_index(b));
    }

    #[test]
    fn zero_color_hashes_deterministically() {
        let a = hash_color("same-name");
        let b = hash_color("same-name");
        assert_eq!(a, b);
    }
}
