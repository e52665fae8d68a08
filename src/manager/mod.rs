pub mod ids;
pub mod item_manager;
pub mod registry;


pub use ids::IdAllocator;
pub use item_manager::{ItemManager, ManagerError};
pub use registry::ItemRegistry;
