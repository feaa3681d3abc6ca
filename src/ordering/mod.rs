mod engine;
mod tree;

pub use engine::{OrderingEngine, NOTE_BEFORE_DISPLAY, NOTE_NO_OUTPUT};
pub use tree::{AreaNode, BufferTree, ConfigNode, GroupNode, TestNode};
