pub use self::node::Node;
pub use self::queue::Queue;
pub use self::stack::Stack;

mod node;
mod queue;
mod stack;
