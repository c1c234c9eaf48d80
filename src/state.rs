//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Declarative state tables
//!
//! Engine threads bind their transition handlers at construction time with
//! [`StateTableBuilder`] and dispatch events through a dense two-dimensional
//! lookup indexed by enum ordinals. Either axis of a binding may be a
//! wildcard; overlaps are resolved at build time in fixed priority order
//!
//! ```text
//! (state, event)  >  (state, *)  >  (*, event)  >  (*, *)
//! ```
//!
//! so only the most specific binding occupies a cell. A lookup miss is the
//! caller's signal of a protocol violation.

use crate::event::InterestEvent;
use crate::types::ConnectionStatus;
use std::marker::PhantomData;

/// Dense-index capability for table axes
pub(crate) trait Ordinal: Copy {
    /// Number of distinct values
    const COUNT: usize;
    /// Zero-based dense index of this value
    fn index(self) -> usize;
}

impl Ordinal for ConnectionStatus {
    const COUNT: usize = ConnectionStatus::COUNT;

    fn index(self) -> usize {
        self.ordinal()
    }
}

impl Ordinal for crate::event::InterestKind {
    const COUNT: usize = crate::event::InterestKind::COUNT;

    fn index(self) -> usize {
        self.ordinal()
    }
}

/// A binding pattern on one table axis
#[derive(Debug, Clone, Copy)]
pub(crate) enum Match<T> {
    /// Matches every value on the axis
    Any,
    /// Matches exactly one value
    Is(T),
}

impl<T> From<T> for Match<T> {
    fn from(value: T) -> Self {
        Match::Is(value)
    }
}

/// A compiled table cell: handler plus optional post-handler state
pub(crate) struct TableEntry<S, C> {
    pub run: fn(&mut C, InterestEvent),
    pub next: Option<S>,
}

impl<S: Copy, C> Clone for TableEntry<S, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S: Copy, C> Copy for TableEntry<S, C> {}

/// A two-dimensional transition lookup
pub(crate) struct StateTable<S, K, C> {
    cells: Vec<Option<TableEntry<S, C>>>,
    _axes: PhantomData<fn(S, K)>,
}

impl<S: Ordinal, K: Ordinal, C> StateTable<S, K, C> {
    /// Start declaring bindings
    pub(crate) fn builder() -> StateTableBuilder<S, K, C> {
        StateTableBuilder { bindings: Vec::new() }
    }

    /// Look up the most specific binding for `(state, kind)`
    pub(crate) fn lookup(&self, state: S, kind: K) -> Option<TableEntry<S, C>> {
        self.cells[state.index() * K::COUNT + kind.index()]
    }
}

struct Binding<S, K, C> {
    state: Match<S>,
    kind: Match<K>,
    entry: TableEntry<S, C>,
}

impl<S, K, C> Binding<S, K, C> {
    /// Specificity class, lowest first; later classes overwrite earlier ones
    fn specificity(&self) -> usize {
        match (&self.state, &self.kind) {
            (Match::Any, Match::Any) => 0,
            (Match::Any, Match::Is(_)) => 1,
            (Match::Is(_), Match::Any) => 2,
            (Match::Is(_), Match::Is(_)) => 3,
        }
    }
}

/// Builder for a [`StateTable`]
pub(crate) struct StateTableBuilder<S, K, C> {
    bindings: Vec<Binding<S, K, C>>,
}

impl<S: Ordinal, K: Ordinal, C> StateTableBuilder<S, K, C> {
    /// Declare a binding for the given state/kind pattern
    pub(crate) fn on(
        self,
        state: impl Into<Match<S>>,
        kind: impl Into<Match<K>>,
    ) -> TransitionBuilder<S, K, C> {
        TransitionBuilder {
            table: self,
            state: state.into(),
            kind: kind.into(),
            next: None,
        }
    }

    /// Compile the bindings into a dense table
    pub(crate) fn build(self) -> StateTable<S, K, C> {
        let mut cells = vec![None; S::COUNT * K::COUNT];

        for class in 0..4 {
            for binding in self.bindings.iter().filter(|b| b.specificity() == class) {
                let states: Vec<usize> = match binding.state {
                    Match::Is(s) => vec![s.index()],
                    Match::Any => (0..S::COUNT).collect(),
                };
                let kinds: Vec<usize> = match binding.kind {
                    Match::Is(k) => vec![k.index()],
                    Match::Any => (0..K::COUNT).collect(),
                };
                for &s in &states {
                    for &k in &kinds {
                        cells[s * K::COUNT + k] = Some(binding.entry);
                    }
                }
            }
        }

        StateTable {
            cells,
            _axes: PhantomData,
        }
    }
}

/// In-progress binding created by [`StateTableBuilder::on`]
pub(crate) struct TransitionBuilder<S, K, C> {
    table: StateTableBuilder<S, K, C>,
    state: Match<S>,
    kind: Match<K>,
    next: Option<S>,
}

impl<S: Ordinal, K: Ordinal, C> TransitionBuilder<S, K, C> {
    /// Apply this state after the handler runs
    pub(crate) fn transition_to(mut self, next: S) -> Self {
        self.next = Some(next);
        self
    }

    /// Attach the handler and finish the binding
    pub(crate) fn run(mut self, handler: fn(&mut C, InterestEvent)) -> StateTableBuilder<S, K, C> {
        self.table.bindings.push(Binding {
            state: self.state,
            kind: self.kind,
            entry: TableEntry {
                run: handler,
                next: self.next,
            },
        });
        self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventPayload, InterestKind};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Toy {
        A,
        B,
        C,
    }

    impl Ordinal for Toy {
        const COUNT: usize = 3;

        fn index(self) -> usize {
            self as usize
        }
    }

    #[derive(Default)]
    struct Trace {
        hits: Vec<&'static str>,
    }

    fn hit_exact(ctx: &mut Trace, _evt: InterestEvent) {
        ctx.hits.push("exact");
    }

    fn hit_state_any(ctx: &mut Trace, _evt: InterestEvent) {
        ctx.hits.push("state-any");
    }

    fn hit_any_kind(ctx: &mut Trace, _evt: InterestEvent) {
        ctx.hits.push("any-kind");
    }

    fn hit_any_any(ctx: &mut Trace, _evt: InterestEvent) {
        ctx.hits.push("any-any");
    }

    fn evt() -> InterestEvent {
        InterestEvent::internal(InterestKind::Close, EventPayload::None)
    }

    fn fire(table: &StateTable<Toy, InterestKind, Trace>, state: Toy, kind: InterestKind) -> Vec<&'static str> {
        let mut trace = Trace::default();
        if let Some(entry) = table.lookup(state, kind) {
            (entry.run)(&mut trace, evt());
        }
        trace.hits
    }

    fn build_overlapping() -> StateTable<Toy, InterestKind, Trace> {
        // Declared least specific first on purpose; priority is positional,
        // not declaration order.
        StateTable::builder()
            .on(Match::Any, Match::Any).run(hit_any_any)
            .on(Match::Any, InterestKind::Close).run(hit_any_kind)
            .on(Toy::A, Match::Any).run(hit_state_any)
            .on(Toy::A, InterestKind::Close).run(hit_exact)
            .build()
    }

    #[test]
    fn test_exact_beats_all() {
        let table = build_overlapping();
        assert_eq!(fire(&table, Toy::A, InterestKind::Close), vec!["exact"]);
    }

    #[test]
    fn test_state_wildcard_beats_kind_wildcard() {
        let table = build_overlapping();
        // (A, Error): candidates are (A, *) and (*, *)
        assert_eq!(fire(&table, Toy::A, InterestKind::Error), vec!["state-any"]);
        // (B, Close): candidates are (*, Close) and (*, *)
        assert_eq!(fire(&table, Toy::B, InterestKind::Close), vec!["any-kind"]);
    }

    #[test]
    fn test_fallback_wildcard() {
        let table = build_overlapping();
        assert_eq!(fire(&table, Toy::C, InterestKind::Op), vec!["any-any"]);
    }

    #[test]
    fn test_lookup_miss() {
        let table: StateTable<Toy, InterestKind, Trace> = StateTable::builder()
            .on(Toy::A, InterestKind::Close).run(hit_exact)
            .build();

        assert!(table.lookup(Toy::B, InterestKind::Close).is_none());
        assert!(table.lookup(Toy::A, InterestKind::Error).is_none());
    }

    #[test]
    fn test_transition_annotation() {
        let table: StateTable<Toy, InterestKind, Trace> = StateTable::builder()
            .on(Toy::A, InterestKind::Close).transition_to(Toy::C).run(hit_exact)
            .build();

        let entry = table.lookup(Toy::A, InterestKind::Close).unwrap();
        assert_eq!(entry.next, Some(Toy::C));
    }
}
