//! Live application state that writes itself into a save tree.

use crate::error::Result;
use crate::node::SaveNode;

/// An object whose current state belongs in a save tree.
///
/// The owning container calls [`save`](Self::save) right before the tree
/// is encoded, so the tree never has to be kept in sync by hand.
///
/// ```rust
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use save_data::{SaveNode, SavedObject};
///
/// struct Player {
///     hp: AtomicU32,
/// }
///
/// impl SavedObject for Player {
///     fn save(&self, node: &mut SaveNode) -> save_data::Result<()> {
///         node.key_mut("hp")?.set(self.hp.load(Ordering::Relaxed));
///         Ok(())
///     }
/// }
///
/// let player = Player { hp: AtomicU32::new(42) };
/// let mut tree = SaveNode::new();
/// player.save(&mut tree)?;
/// assert_eq!(tree["hp"].get::<u32>()?, 42);
/// # Ok::<(), save_data::SaveDataError>(())
/// ```
pub trait SavedObject: Send + Sync {
    fn save(&self, node: &mut SaveNode) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SaveDataError;

    struct Inventory(Vec<u16>);

    impl SavedObject for Inventory {
        fn save(&self, node: &mut SaveNode) -> Result<()> {
            node.reset();
            node.set_kind(crate::ContainerKind::List)?;
            for item in &self.0 {
                node.append(SaveNode::from_scalar(*item))?;
            }
            Ok(())
        }
    }

    struct Broken;

    impl SavedObject for Broken {
        fn save(&self, _: &mut SaveNode) -> Result<()> {
            Err(SaveDataError::NotImplemented("broken object"))
        }
    }

    #[test]
    fn object_overwrites_previous_state() -> Result<()> {
        let mut node = SaveNode::string("stale");
        Inventory(vec![3, 1]).save(&mut node)?;
        assert_eq!(node.len(), 2);
        assert_eq!(node[1].get::<u16>()?, 1);

        Inventory(vec![]).save(&mut node)?;
        assert!(node.is_empty());
        Ok(())
    }

    #[test]
    fn trait_objects_forward_errors() {
        let objects: Vec<Box<dyn SavedObject>> = vec![Box::new(Broken)];
        assert!(objects[0].save(&mut SaveNode::new()).is_err());
    }
}
