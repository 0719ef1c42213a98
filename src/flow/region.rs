//! Structured regions partitioning the block sequence.
//!
//! Regions form a tree of nested lexical and exception-handling scopes. Each region owns a
//! contiguous, non-empty range of block ordinals fully contained in its parent's range;
//! sibling regions never overlap. The root region spans the whole graph.
//!
//! Exception handling uses the same grouping the runtime dispatches with: a
//! [`TryAndCatch`](ControlFlowRegionKind::TryAndCatch) region wraps a
//! [`Try`](ControlFlowRegionKind::Try) region and its handler regions, a
//! [`TryAndFinally`](ControlFlowRegionKind::TryAndFinally) region wraps a
//! [`Try`](ControlFlowRegionKind::Try) and a [`Finally`](ControlFlowRegionKind::Finally),
//! and a filtered handler pairs its [`Filter`](ControlFlowRegionKind::Filter) and
//! [`Catch`](ControlFlowRegionKind::Catch) regions under a
//! [`FilterAndHandler`](ControlFlowRegionKind::FilterAndHandler) region.

use std::fmt;

use crate::flow::capture::CaptureId;
use crate::operation::{FunctionId, LocalId, TypeName};

/// Reference to a region inside a control flow graph's region tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(usize);

impl RegionId {
    /// Creates a region id from its arena index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the arena index of this region.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "region{}", self.0)
    }
}

/// The structural kind of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
pub enum ControlFlowRegionKind {
    /// The root region; spans every block, has no parent.
    Root,
    /// The lifetime scope of locals declared in a nested block.
    LocalLifetime,
    /// A loop's condition and body blocks.
    Loop,
    /// The protected blocks of a try.
    Try,
    /// The blocks of an exception filter expression.
    Filter,
    /// The blocks of a catch handler body.
    Catch,
    /// Groups a [`Filter`](Self::Filter) region with its [`Catch`](Self::Catch) region.
    FilterAndHandler,
    /// Groups a [`Try`](Self::Try) region with its handler regions.
    TryAndCatch,
    /// The blocks of a finally body.
    Finally,
    /// Groups a [`Try`](Self::Try) region with its [`Finally`](Self::Finally) region.
    TryAndFinally,
}

impl ControlFlowRegionKind {
    /// Returns `true` for regions that participate in exception dispatch.
    #[must_use]
    pub const fn is_exception_handling(&self) -> bool {
        matches!(
            self,
            Self::Try
                | Self::Filter
                | Self::Catch
                | Self::FilterAndHandler
                | Self::TryAndCatch
                | Self::Finally
                | Self::TryAndFinally
        )
    }

    /// Returns `true` for the grouping regions whose first child is the protected region
    /// and whose remaining children are entered by the exception dispatcher.
    #[must_use]
    pub const fn is_protected_grouping(&self) -> bool {
        matches!(self, Self::TryAndCatch | Self::TryAndFinally)
    }
}

/// A node in the tree of nested structured scopes.
///
/// Regions are immutable once their graph is constructed; all links are arena ids into the
/// owning graph's region list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlFlowRegion {
    /// The structural kind of this region.
    kind: ControlFlowRegionKind,
    /// Ordinal of the first block in this region's span.
    first_block: usize,
    /// Ordinal of the last block in this region's span, inclusive.
    last_block: usize,
    /// The enclosing region; `None` only for the root.
    parent: Option<RegionId>,
    /// Directly nested regions, in block order.
    children: Vec<RegionId>,
    /// Locals whose lifetime is this region.
    locals: Vec<LocalId>,
    /// Local functions declared directly in this region.
    local_functions: Vec<FunctionId>,
    /// Captures anchored to this region.
    captures: Vec<CaptureId>,
    /// The caught exception type for [`Catch`](ControlFlowRegionKind::Catch) and
    /// [`Filter`](ControlFlowRegionKind::Filter) regions, when the clause names one.
    exception_type: Option<TypeName>,
}

impl ControlFlowRegion {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        kind: ControlFlowRegionKind,
        first_block: usize,
        last_block: usize,
        parent: Option<RegionId>,
        children: Vec<RegionId>,
        locals: Vec<LocalId>,
        local_functions: Vec<FunctionId>,
        captures: Vec<CaptureId>,
        exception_type: Option<TypeName>,
    ) -> Self {
        Self {
            kind,
            first_block,
            last_block,
            parent,
            children,
            locals,
            local_functions,
            captures,
            exception_type,
        }
    }

    /// Returns the structural kind of this region.
    #[must_use]
    pub const fn kind(&self) -> ControlFlowRegionKind {
        self.kind
    }

    /// Returns the ordinal of the first block in this region's span.
    #[must_use]
    pub const fn first_block(&self) -> usize {
        self.first_block
    }

    /// Returns the ordinal of the last block in this region's span, inclusive.
    #[must_use]
    pub const fn last_block(&self) -> usize {
        self.last_block
    }

    /// Returns the enclosing region, or `None` for the root.
    #[must_use]
    pub const fn parent(&self) -> Option<RegionId> {
        self.parent
    }

    /// Returns the directly nested regions, in block order.
    #[must_use]
    pub fn children(&self) -> &[RegionId] {
        &self.children
    }

    /// Returns the locals whose lifetime is this region.
    #[must_use]
    pub fn locals(&self) -> &[LocalId] {
        &self.locals
    }

    /// Returns the local functions declared directly in this region.
    #[must_use]
    pub fn local_functions(&self) -> &[FunctionId] {
        &self.local_functions
    }

    /// Returns the captures anchored to this region.
    #[must_use]
    pub fn captures(&self) -> &[CaptureId] {
        &self.captures
    }

    /// Returns the caught exception type, for catch and filter regions that name one.
    #[must_use]
    pub fn exception_type(&self) -> Option<&TypeName> {
        self.exception_type.as_ref()
    }

    /// Returns `true` if the given block ordinal falls inside this region's span.
    #[must_use]
    pub const fn contains_block(&self, ordinal: usize) -> bool {
        self.first_block <= ordinal && ordinal <= self.last_block
    }

    /// Returns the number of blocks in this region's span.
    #[must_use]
    pub const fn block_count(&self) -> usize {
        self.last_block - self.first_block + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    fn plain_region(kind: ControlFlowRegionKind, first: usize, last: usize) -> ControlFlowRegion {
        ControlFlowRegion::new(
            kind,
            first,
            last,
            Some(RegionId::new(0)),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            None,
        )
    }

    #[test]
    fn test_region_span_queries() {
        let region = plain_region(ControlFlowRegionKind::Loop, 2, 5);
        assert!(region.contains_block(2));
        assert!(region.contains_block(5));
        assert!(!region.contains_block(1));
        assert!(!region.contains_block(6));
        assert_eq!(region.block_count(), 4);
    }

    #[test]
    fn test_single_block_region() {
        let region = plain_region(ControlFlowRegionKind::Finally, 3, 3);
        assert!(region.contains_block(3));
        assert_eq!(region.block_count(), 1);
    }

    #[test]
    fn test_kind_classification() {
        assert!(!ControlFlowRegionKind::Root.is_exception_handling());
        assert!(!ControlFlowRegionKind::LocalLifetime.is_exception_handling());
        assert!(!ControlFlowRegionKind::Loop.is_exception_handling());
        assert!(ControlFlowRegionKind::Try.is_exception_handling());
        assert!(ControlFlowRegionKind::Finally.is_exception_handling());

        // The grouping kinds are a subset of the exception-handling kinds.
        for kind in ControlFlowRegionKind::iter() {
            if kind.is_protected_grouping() {
                assert!(kind.is_exception_handling());
            }
        }
    }

    #[test]
    fn test_exception_type_only_on_handler_regions() {
        let mut region = plain_region(ControlFlowRegionKind::Catch, 1, 2);
        region.exception_type = Some(TypeName::new("System.IO.IOException"));
        assert_eq!(
            region.exception_type().unwrap().as_str(),
            "System.IO.IOException"
        );
    }
}
