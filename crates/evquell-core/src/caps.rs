// Evquell Capability Layer
// Typed bitsets over the kernel event-type and event-code spaces

use std::collections::BTreeMap;

use evdev_rs::enums::{
    int_to_ev_abs, int_to_ev_key, int_to_ev_led, int_to_ev_msc, int_to_ev_rel, int_to_ev_snd,
    int_to_ev_sw, EventCode, EventType,
};

/// Highest event-type number queried when replicating a device.
pub const EV_TYPE_MAX: u16 = 0x1f;

pub(crate) const TYPE_SYN: u16 = EventType::EV_SYN as u16;
pub(crate) const TYPE_KEY: u16 = EventType::EV_KEY as u16;
pub(crate) const TYPE_REL: u16 = EventType::EV_REL as u16;
pub(crate) const TYPE_ABS: u16 = EventType::EV_ABS as u16;
pub(crate) const TYPE_MSC: u16 = EventType::EV_MSC as u16;
pub(crate) const TYPE_SW: u16 = EventType::EV_SW as u16;
pub(crate) const TYPE_LED: u16 = EventType::EV_LED as u16;
pub(crate) const TYPE_SND: u16 = EventType::EV_SND as u16;

/// Event types carrying an enumerable code table, in ascending type order.
/// Types outside this table (EV_REP, EV_FF, ...) are replicated type-only.
const CODE_TABLE_TYPES: &[(u16, u16)] = &[
    (TYPE_KEY, 0x2ff), // KEY_MAX
    (TYPE_REL, 0x0f),  // REL_MAX
    (TYPE_ABS, 0x3f),  // ABS_MAX
    (TYPE_MSC, 0x07),  // MSC_MAX
    (TYPE_SW, 0x10),   // SW_MAX
    (TYPE_LED, 0x0f),  // LED_MAX
    (TYPE_SND, 0x07),  // SND_MAX
];

/// All event types a device may declare, ascending.
const KNOWN_TYPES: &[EventType] = &[
    EventType::EV_SYN,
    EventType::EV_KEY,
    EventType::EV_REL,
    EventType::EV_ABS,
    EventType::EV_MSC,
    EventType::EV_SW,
    EventType::EV_LED,
    EventType::EV_SND,
    EventType::EV_REP,
    EventType::EV_FF,
    EventType::EV_PWR,
    EventType::EV_FF_STATUS,
];

/// Highest valid code for a given event type, if the type has a code table.
pub fn code_max(ev_type: u16) -> Option<u16> {
    CODE_TABLE_TYPES
        .iter()
        .find(|(t, _)| *t == ev_type)
        .map(|(_, max)| *max)
}

/// Map a raw event-type number onto the typed enum.
pub fn event_type_for(ev_type: u16) -> Option<EventType> {
    KNOWN_TYPES.iter().copied().find(|t| *t as u16 == ev_type)
}

/// Map a (type, code) pair onto a typed event code.
///
/// Only types with a code table resolve; anything else has no per-code
/// representation worth naming.
pub fn event_code_for(ev_type: u16, code: u16) -> Option<EventCode> {
    let code = u32::from(code);
    match ev_type {
        TYPE_KEY => int_to_ev_key(code).map(EventCode::EV_KEY),
        TYPE_REL => int_to_ev_rel(code).map(EventCode::EV_REL),
        TYPE_ABS => int_to_ev_abs(code).map(EventCode::EV_ABS),
        TYPE_MSC => int_to_ev_msc(code).map(EventCode::EV_MSC),
        TYPE_SW => int_to_ev_sw(code).map(EventCode::EV_SW),
        TYPE_LED => int_to_ev_led(code).map(EventCode::EV_LED),
        TYPE_SND => int_to_ev_snd(code).map(EventCode::EV_SND),
        _ => None,
    }
}

/// Recover the raw (type, code) pair from a typed event code.
pub fn event_ids(code: &EventCode) -> Option<(u16, u16)> {
    match code {
        EventCode::EV_SYN(c) => Some((TYPE_SYN, *c as u16)),
        EventCode::EV_KEY(c) => Some((TYPE_KEY, *c as u16)),
        EventCode::EV_REL(c) => Some((TYPE_REL, *c as u16)),
        EventCode::EV_ABS(c) => Some((TYPE_ABS, *c as u16)),
        EventCode::EV_MSC(c) => Some((TYPE_MSC, *c as u16)),
        EventCode::EV_SW(c) => Some((TYPE_SW, *c as u16)),
        EventCode::EV_LED(c) => Some((TYPE_LED, *c as u16)),
        EventCode::EV_SND(c) => Some((TYPE_SND, *c as u16)),
        _ => None,
    }
}

/// Fixed-range bitset with ascending iteration.
///
/// Out-of-range positions are silently absent: `set` ignores them and `test`
/// reports false, mirroring how the kernel ioctls treat unknown bits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitset {
    words: Vec<u64>,
    len: u16,
}

impl Bitset {
    /// A bitset covering positions `0..=max`.
    pub fn with_max(max: u16) -> Self {
        let len = max + 1;
        Self {
            words: vec![0; (usize::from(len) + 63) / 64],
            len,
        }
    }

    pub fn set(&mut self, bit: u16) {
        if bit < self.len {
            self.words[usize::from(bit) / 64] |= 1u64 << (bit % 64);
        }
    }

    pub fn unset(&mut self, bit: u16) {
        if bit < self.len {
            self.words[usize::from(bit) / 64] &= !(1u64 << (bit % 64));
        }
    }

    pub fn test(&self, bit: u16) -> bool {
        bit < self.len && self.words[usize::from(bit) / 64] & (1u64 << (bit % 64)) != 0
    }

    /// Number of addressable positions.
    pub fn len(&self) -> u16 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Set positions, ascending.
    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        (0..self.len).filter(|bit| self.test(*bit))
    }
}

/// The declared capability surface of one input device: which event types it
/// supports and, per table type, which codes.
///
/// EV_SYN is implicitly present on every device and carries no code table;
/// it is reported by `supports_type` and `types` but never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    types: u32,
    codes: BTreeMap<u16, Bitset>,
}

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare support for an event type. Out-of-range types and EV_SYN
    /// (always present) are ignored.
    pub fn insert_type(&mut self, ev_type: u16) {
        if ev_type != TYPE_SYN && ev_type <= EV_TYPE_MAX {
            self.types |= 1 << ev_type;
        }
    }

    /// Declare support for a code under a table type, implying the type.
    /// Pairs outside the known code tables are ignored.
    pub fn insert_code(&mut self, ev_type: u16, code: u16) {
        let Some(max) = code_max(ev_type) else {
            return;
        };
        if code > max {
            return;
        }
        self.insert_type(ev_type);
        self.codes
            .entry(ev_type)
            .or_insert_with(|| Bitset::with_max(max))
            .set(code);
    }

    pub fn supports_type(&self, ev_type: u16) -> bool {
        ev_type == TYPE_SYN || (ev_type <= EV_TYPE_MAX && self.types & (1 << ev_type) != 0)
    }

    pub fn supports_code(&self, ev_type: u16, code: u16) -> bool {
        self.codes.get(&ev_type).is_some_and(|set| set.test(code))
    }

    /// Supported event types, ascending, EV_SYN first.
    pub fn types(&self) -> impl Iterator<Item = u16> + '_ {
        (0..=EV_TYPE_MAX).filter(|t| self.supports_type(*t))
    }

    /// Supported codes under one type, ascending. Empty for non-table types.
    pub fn codes(&self, ev_type: u16) -> impl Iterator<Item = u16> + '_ {
        self.codes.get(&ev_type).into_iter().flat_map(Bitset::iter)
    }
}

/// A set of (event type, event code) pairs, used for the activity and
/// suppression rules.
///
/// Synchronization records (type 0) are not representable: they frame event
/// groups for downstream readers and must never match a rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventSet {
    codes: BTreeMap<u16, Bitset>,
}

impl EventSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every code of one table type, e.g. all EV_KEY codes.
    pub fn all_of_type(ev_type: u16) -> Self {
        let mut set = Self::new();
        if let Some(max) = code_max(ev_type) {
            for code in 0..=max {
                set.insert(ev_type, code);
            }
        }
        set
    }

    /// Add one pair. Returns false (and leaves the set unchanged) for type 0
    /// or pairs outside the known code tables.
    pub fn insert(&mut self, ev_type: u16, code: u16) -> bool {
        let Some(max) = code_max(ev_type) else {
            return false;
        };
        if code > max {
            return false;
        }
        self.codes
            .entry(ev_type)
            .or_insert_with(|| Bitset::with_max(max))
            .set(code);
        true
    }

    pub fn remove(&mut self, ev_type: u16, code: u16) {
        if let Some(set) = self.codes.get_mut(&ev_type) {
            set.unset(code);
        }
    }

    pub fn contains(&self, ev_type: u16, code: u16) -> bool {
        self.codes.get(&ev_type).is_some_and(|set| set.test(code))
    }

    pub fn is_empty(&self) -> bool {
        self.codes.values().all(Bitset::is_empty)
    }

    pub fn len(&self) -> usize {
        self.codes.values().map(Bitset::count).sum()
    }
}
