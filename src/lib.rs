//! # itemflow
//!
//! A workflow engine for configurable units of work ("items"). Each item
//! carries a form, moves through a small status machine, and can be
//! processed with named actions. Composite launchers run several items as
//! one job, one after another or side by side.
//!
//! ## Architecture Overview
//!
//! - **[`item`]**: Status model, forms, the [`Item`] trait and the basic item
//! - **[`builder`]**: Named item factories and the registry that holds them
//! - **[`launcher`]**: Job launchers, job runners and the multi-launcher
//! - **[`manager`]**: Item identity, lifecycle and persistence coordination
//! - **[`persistence`]**: Storage contract and the JSON file provider
//! - **[`messaging`]**: Update messages delivered to running items
//! - **[`facade`]**: The outward API used by front ends
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use itemflow::{EngineConfig, Facade};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let facade = Facade::from_config(&EngineConfig::default(), None).await?;
//!
//!     let id = facade.create_item("Basic").await.expect("Basic is registered");
//!     let mut form = facade.get_item(id).await.expect("item exists");
//!     form.set_value("Title", "first run");
//!
//!     let client = facade.connect();
//!     facade.update_item(form, client).await;
//!     let status = facade
//!         .process_item(id, "Export to key-value pair output", client)
//!         .await;
//!     println!("Item {} is {}", id, status);
//!
//!     facade.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod config;
pub mod env;
pub mod facade;
pub mod item;
pub mod launcher;
pub mod manager;
pub mod messaging;
pub mod persistence;

pub mod cli;

pub use builder::{BuilderCatalog, BuilderConfig, BuilderRegistry, CompositeItemBuilder, ItemBuilder};
pub use config::EngineConfig;
pub use facade::Facade;
pub use item::{Form, Item, ItemId, ItemStatus, ItemType, Project};
pub use launcher::{JobLauncher, JobRunner, MultiLauncher, ShellRunner};
pub use manager::{ItemManager, ManagerError};
pub use messaging::{Message, MessageType, parse_update_message};
pub use persistence::{JsonFileProvider, PersistenceError, PersistenceProvider};
