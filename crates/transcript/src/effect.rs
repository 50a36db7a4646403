/// What a transition changed, in the order it happened.
///
/// Indices refer to positions in the transcript after the change. A renderer
/// can apply these incrementally instead of diffing snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    TurnAppended { index: usize },
    /// Spliced in before the end; turns at `index..` moved down by one.
    TurnInserted { index: usize },
    TurnUpdated { index: usize },
    TurnClosed { index: usize },
    StatusChanged,
    StreamingFinished,
}
