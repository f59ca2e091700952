//! Per-task bookkeeping node (component A of the runtime).
//!
//! Some coroutine-frame-based runtimes pack caller/callee links and
//! state/policy tag bits into the low bits of a raw coroutine-frame
//! pointer. Rust's ownership model makes that unnecessary: a suspended
//! `async fn` already owns every future it is waiting on, so dropping the top
//! of a suspension chain tears the whole chain down for free (see
//! `crate::task`). What's left to model explicitly is the *bookkeeping* the
//! rest of the runtime needs: who is awaiting whom, and what cancellation
//! policy each party declared. That bookkeeping lives in a side-table here,
//! keyed by a generational slab index rather than a pointer.

use slab::Slab;

/// Identifies one entry in a loop's frame side-table.
pub type FrameId = usize;

/// Schedule-site diagnostic: where a frame was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub file: &'static str,
    pub line: u32,
}

impl Location {
    pub const fn new(file: &'static str, line: u32) -> Self {
        Self { file, line }
    }
}

/// Captures the call site of its expansion point as a [`Location`].
#[macro_export]
macro_rules! here {
    () => {
        $crate::frame::Location::new(file!(), line!())
    };
}

/// State bits a frame carries about itself (spec: tagged on the `callee` edge).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameState {
    pub cancelled: bool,
    pub disposable: bool,
    pub finished: bool,
}

/// Policy bits a frame declares about how it wants to be treated by an
/// ancestor's cancellation sweep (spec: tagged on the `caller` edge).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FramePolicy {
    /// This frame owns its own cancellation semantics; an ancestor's
    /// `cancel()` walk stops here instead of continuing past it.
    pub explicit_cancel: bool,
    /// This frame wants to observe cancellation (typically via
    /// [`crate::cancellation::with_token`]) rather than be torn down
    /// silently underneath it.
    pub intercept_cancel: bool,
}

/// One side-table entry: the bookkeeping half of a live `Task`.
#[derive(Debug)]
pub struct FrameRecord {
    pub location: Location,
    pub caller: Option<FrameId>,
    pub callee: Option<FrameId>,
    pub state: FrameState,
    pub policy: FramePolicy,
}

impl FrameRecord {
    pub(crate) fn root(location: Location) -> Self {
        Self {
            location,
            caller: None,
            callee: None,
            state: FrameState {
                disposable: true,
                ..FrameState::default()
            },
            policy: FramePolicy::default(),
        }
    }
}

/// The side-table itself. Owned by one [`crate::loop_::EventLoop`]; never
/// shared across loops or threads.
#[derive(Default)]
pub struct FrameTable {
    slab: Slab<FrameRecord>,
}

impl FrameTable {
    pub fn new() -> Self {
        Self { slab: Slab::new() }
    }

    pub fn insert(&mut self, record: FrameRecord) -> FrameId {
        self.slab.insert(record)
    }

    pub fn get(&self, id: FrameId) -> Option<&FrameRecord> {
        self.slab.get(id)
    }

    pub fn get_mut(&mut self, id: FrameId) -> Option<&mut FrameRecord> {
        self.slab.get_mut(id)
    }

    pub fn remove(&mut self, id: FrameId) -> Option<FrameRecord> {
        if self.slab.contains(id) {
            Some(self.slab.remove(id))
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.slab.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slab.is_empty()
    }

    /// Link `callee` as currently awaited by `caller` (both directions).
    pub fn link(&mut self, caller: FrameId, callee: FrameId) {
        if let Some(c) = self.slab.get_mut(caller) {
            c.callee = Some(callee);
        }
        if let Some(c) = self.slab.get_mut(callee) {
            c.caller = Some(caller);
        }
    }

    /// Clear a frame's outgoing callee link (it finished or was torn down).
    pub fn unlink_callee(&mut self, caller: FrameId) {
        if let Some(c) = self.slab.get_mut(caller) {
            c.callee = None;
        }
    }

    /// `cancel(self)` (spec §4.A): walk the callee chain from `start`,
    /// tagging each reachable frame `Cancelled`, stopping at (and including)
    /// any frame marked `ExplicitCancel`.
    ///
    /// Returns the ids visited, in walk order (root to leaf), for callers
    /// that want to observe which frames were marked.
    pub fn cancel_chain(&mut self, start: FrameId) -> Vec<FrameId> {
        let mut visited = Vec::new();
        let mut cur = Some(start);
        while let Some(id) = cur {
            let Some(record) = self.slab.get_mut(id) else {
                break;
            };
            record.state.cancelled = true;
            visited.push(id);
            if record.policy.explicit_cancel {
                break;
            }
            cur = record.callee;
        }
        visited
    }
}
