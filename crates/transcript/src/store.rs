//! Transcript store: the ordered list of turns a UI renders.
//!
//! Turns are only appended or spliced in; the single open turn is the only
//! one ever mutated in place.

use legion_protocol::new_id;

use crate::turn::{AssistantTurn, Turn, TurnBody};

#[derive(Debug, Clone, Default)]
pub struct TranscriptStore {
    turns: Vec<Turn>,
    open: Option<usize>,
}

impl TranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_turns(turns: Vec<Turn>) -> Self {
        Self { turns, open: None }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn open_index(&self) -> Option<usize> {
        self.open
    }

    pub fn open_turn(&self) -> Option<&AssistantTurn> {
        self.open
            .and_then(|index| self.turns.get(index))
            .and_then(Turn::as_assistant)
    }

    pub fn open_turn_mut(&mut self) -> Option<(usize, &mut AssistantTurn)> {
        let index = self.open?;
        let turn = self.turns.get_mut(index)?.as_assistant_mut()?;
        Some((index, turn))
    }

    /// The open turn, creating one at the end if none is open.
    /// The returned flag is true when the turn was just created.
    pub fn open_or_create(&mut self) -> (usize, &mut AssistantTurn, bool) {
        let created = self.open_turn().is_none();
        if created {
            self.turns.push(Turn::new(
                new_id(),
                TurnBody::Assistant(AssistantTurn::open()),
            ));
            self.open = Some(self.turns.len() - 1);
        }
        let index = self.open.unwrap_or(self.turns.len() - 1);
        let turn = match self.turns[index].as_assistant_mut() {
            Some(turn) => turn,
            None => unreachable!("open pointer always refers to an assistant turn"),
        };
        (index, turn, created)
    }

    /// Finalize the open turn, if any, and return its position.
    pub fn close_open(&mut self) -> Option<usize> {
        let index = self.open.take()?;
        if let Some(turn) = self.turns.get_mut(index).and_then(Turn::as_assistant_mut) {
            turn.close();
        }
        Some(index)
    }

    /// Append a turn at the end.
    pub fn push(&mut self, turn: Turn) -> usize {
        self.turns.push(turn);
        self.turns.len() - 1
    }

    /// Splice a turn in at `index`; the open pointer follows its turn.
    pub fn insert(&mut self, index: usize, turn: Turn) -> usize {
        let index = index.min(self.turns.len());
        self.turns.insert(index, turn);
        if let Some(open) = self.open.as_mut() {
            if *open >= index {
                *open += 1;
            }
        }
        index
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Turn> {
        self.turns.get_mut(index)
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.open = None;
    }

    /// Position of the first assistant turn holding a call with `tool_call_id`
    pub fn find_tool_call_turn(&self, tool_call_id: &str) -> Option<usize> {
        self.turns.iter().position(|turn| {
            turn.as_assistant()
                .is_some_and(|assistant| assistant.has_tool_call(tool_call_id))
        })
    }
}
