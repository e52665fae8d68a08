//! Items: status model, forms and the item abstraction.

pub mod basic;
pub mod base;
pub mod form;
pub mod status;
pub mod types;

pub use basic::{BasicItem, BasicItemBuilder};
pub use base::{DisabledItem, Item, ItemCore, ItemEvent, ItemListener};
pub use form::{
    Component, DataComponent, Entry, Form, MasterDetailsComponent, MasterDetailsPair, Resource,
    ResourceComponent,
};
pub use status::ItemStatus;
pub use types::{FormCell, ItemId, ItemRecord, ItemSummary, ItemType, Project, StatusCell};
