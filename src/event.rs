//! The unified event model and per-backend flag mapping
//!
//! Every backend adapter translates its own native bits or codes into the
//! [`EventKind`]s defined here, and translates a subscribed [`WatchFlags`]
//! mask back into its own native subscription mask via [`convert_flags`].

use std::fmt;
use std::path::Path;

use bitflags::bitflags;

use crate::watch::Watch;

bitflags! {
    /// A subscription mask, or the set of kinds an [`Event`] can report
    ///
    /// `DeleteSelf` is always added to a watch's subscribed flags by the
    /// adapter that creates it, regardless of what the caller passed in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct WatchFlags: u32 {
        /// File was accessed
        const ACCESS      = 0x01;
        /// File was modified
        const MODIFY      = 0x02;
        /// Metadata (permissions, timestamps, ...) changed
        const ATTRIB      = 0x04;
        /// File/directory created in watched directory
        const CREATE      = 0x08;
        /// File/directory deleted from watched directory
        const DELETE      = 0x10;
        /// Watched file/directory was itself deleted
        const DELETE_SELF = 0x20;
        /// File was renamed/moved; watched directory contained old name
        const MOVE_FROM   = 0x40;
        /// File was renamed/moved; watched directory contains new name
        const MOVE_TO     = 0x80;
        /// Union of every other flag
        const ALL         = 0xFF;
    }
}

/// The category of a single [`Event`]
///
/// Unlike [`WatchFlags`], which describes a *subscription* and can combine
/// several kinds, an `EventKind` describes exactly one reported change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// File was accessed
    Access,
    /// File was modified
    Modify,
    /// Metadata changed
    Attrib,
    /// File/directory created in watched directory
    Create,
    /// File/directory deleted from watched directory
    Delete,
    /// Watched file/directory was itself deleted
    DeleteSelf,
    /// File was renamed/moved; watched directory contained old name
    MoveFrom,
    /// File was renamed/moved; watched directory contains new name
    MoveTo,
}

impl EventKind {
    /// Every event kind, in the order a native bitmask is scanned
    pub const ALL: [EventKind; 8] = [
        EventKind::Access,
        EventKind::Modify,
        EventKind::Attrib,
        EventKind::Create,
        EventKind::Delete,
        EventKind::DeleteSelf,
        EventKind::MoveFrom,
        EventKind::MoveTo,
    ];

    /// The single-bit [`WatchFlags`] value for this kind
    pub fn flag(self) -> WatchFlags {
        match self {
            EventKind::Access => WatchFlags::ACCESS,
            EventKind::Modify => WatchFlags::MODIFY,
            EventKind::Attrib => WatchFlags::ATTRIB,
            EventKind::Create => WatchFlags::CREATE,
            EventKind::Delete => WatchFlags::DELETE,
            EventKind::DeleteSelf => WatchFlags::DELETE_SELF,
            EventKind::MoveFrom => WatchFlags::MOVE_FROM,
            EventKind::MoveTo => WatchFlags::MOVE_TO,
        }
    }

    /// The stable, lower-case human name used in textual output
    pub fn name(self) -> &'static str {
        match self {
            EventKind::Access => "access",
            EventKind::Modify => "modify",
            EventKind::Attrib => "attrib",
            EventKind::Create => "create",
            EventKind::Delete => "delete",
            EventKind::DeleteSelf => "delete self",
            EventKind::MoveFrom => "move from",
            EventKind::MoveTo => "move to",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Translates a subscribed [`WatchFlags`] mask into a native subscription
/// mask, by unioning in the native bits from `table` whose [`WatchFlags`]
/// bit is set
pub(crate) fn convert_flags(flags: WatchFlags, table: &[(WatchFlags, u32)]) -> u32 {
    table.iter().fold(0, |acc, &(flag, native)| {
        if flags.contains(flag) {
            acc | native
        } else {
            acc
        }
    })
}

/// Looks up the unified [`EventKind`] for a single native bit/code, via a
/// backend-supplied native-to-unified table. Unknown codes map to `None`
/// and are silently ignored by callers.
pub(crate) fn decode_native(native: u32, table: &[(u32, EventKind)]) -> Option<EventKind> {
    table
        .iter()
        .find(|&&(code, _)| code == native)
        .map(|&(_, kind)| kind)
}

/// A single filesystem-change notification
///
/// Immutable once constructed. Carries a non-owning reference to the
/// [`Watch`] it originated from, via a cheap handle clone; the watch, in
/// turn, owns the path and user annotation that [`Event::path`] and
/// [`Event::user`] read through to.
#[derive(Debug, Clone)]
pub struct Event<T = ()> {
    watch: Watch<T>,
    action: EventKind,
    name: String,
}

impl<T> Event<T> {
    pub(crate) fn new(watch: Watch<T>, action: EventKind, name: impl Into<String>) -> Self {
        Event {
            watch,
            action,
            name: name.into(),
        }
    }

    /// The watch this event originates from
    pub fn watch(&self) -> &Watch<T> {
        &self.watch
    }

    /// The kind of change this event reports
    pub fn action(&self) -> EventKind {
        self.action
    }

    /// The stable, lower-case human name for [`Event::action`]
    pub fn action_name(&self) -> &'static str {
        self.action.name()
    }

    /// The affected entry's basename, relative to the watched directory
    ///
    /// Empty for `DeleteSelf`, and for file-watch self-events.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The watched path, read through from [`Event::watch`]
    pub fn path(&self) -> &Path {
        self.watch.path()
    }

    /// The watch's user annotation, read through from [`Event::watch`]
    pub fn user(&self) -> &T {
        self.watch.user()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_round_trips_through_event_kind() {
        for kind in EventKind::ALL {
            assert_eq!(kind.flag().bits().count_ones(), 1);
        }
    }

    #[test]
    fn names_match_spec_strings() {
        assert_eq!(EventKind::Access.name(), "access");
        assert_eq!(EventKind::DeleteSelf.name(), "delete self");
        assert_eq!(EventKind::MoveFrom.name(), "move from");
        assert_eq!(EventKind::MoveTo.name(), "move to");
    }

    #[test]
    fn convert_flags_unions_native_bits() {
        let table = [
            (WatchFlags::CREATE, 0x100),
            (WatchFlags::DELETE, 0x200),
            (WatchFlags::MODIFY, 0x2),
        ];
        let native = convert_flags(WatchFlags::CREATE | WatchFlags::DELETE, &table);
        assert_eq!(native, 0x100 | 0x200);
    }

    #[test]
    fn decode_native_ignores_unknown_codes() {
        let table = [(0x100, EventKind::Create)];
        assert_eq!(decode_native(0x100, &table), Some(EventKind::Create));
        assert_eq!(decode_native(0xdead, &table), None);
    }
}
