//! Command line argument parsing
//!
//! Subcommands:
//! - `types`: List the item types that can be created
//! - `list`: List the items of the workspace
//! - `create`: Create an item, optionally filled from an input file
//! - `show`: Print an item's status and form
//! - `set`: Set form entries and submit the form
//! - `process`: Run an action on an item
//! - `cancel`: Cancel a running action
//! - `delete`: Delete an item
//! - `post`: Deliver a `key=<json>` update message
//! - `show-config`: Show configuration discovery information
//! - `init-config`: Write the default user configuration file

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::item::ItemId;

#[derive(Debug, Parser)]
#[command(name = "itemflow")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Create, configure and run workflow items from the command line")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,
    /// Workspace directory
    #[arg(short = 'w', long = "workspace", global = true)]
    pub workspace: Option<PathBuf>,
    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Clone, PartialEq, Subcommand)]
pub enum Commands {
    /// List the item types that can be created
    Types,
    /// List the items of the workspace
    List,
    /// Create an item of the given type
    Create {
        /// Item type (builder name)
        item_type: String,
        /// `key = value` file used to fill the new item's form
        #[arg(short = 'i', long = "input", value_name = "FILE")]
        input: Option<PathBuf>,
    },
    /// Print an item's status and form
    Show {
        id: ItemId,
        /// Print the form as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set entries on an item's form and submit it
    ///
    /// Rows of a master/details component are added with `Jobs+=<template>`
    /// and configured with `Jobs[<i>].<entry>=<value>`.
    Set {
        id: ItemId,
        /// Entry assignments, `name=value`
        #[arg(value_name = "NAME=VALUE", required = true)]
        values: Vec<String>,
    },
    /// Run an action on an item
    Process {
        id: ItemId,
        action: String,
        /// Wait until the item leaves Processing
        #[arg(long)]
        wait: bool,
        /// Give up waiting after this many seconds
        #[arg(long, default_value_t = 300)]
        timeout: u64,
    },
    /// Cancel the running action of an item
    Cancel {
        id: ItemId,
        #[arg(default_value = "")]
        action: String,
    },
    /// Delete an item
    Delete { id: ItemId },
    /// Deliver an update message of the form `key=<json>`
    Post { message: String },
    /// Show configuration discovery information
    ShowConfig,
    /// Write the default configuration to the user configuration file
    InitConfig,
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    pub fn command(&self) -> Result<&Commands, String> {
        self.command.as_ref().ok_or_else(|| {
            "No command specified. Use 'itemflow --help' to see available commands.".to_string()
        })
    }
}

/// Split `name=value`. The name is trimmed; the value is kept as written.
pub fn parse_assignment(raw: &str) -> Option<(&str, &str)> {
    let (name, value) = raw.split_once('=')?;
    let name = name.trim();
    (!name.is_empty()).then_some((name, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_command_with_input() {
        let args = Args::try_parse_from([
            "itemflow",
            "-w",
            "/work",
            "create",
            "Basic",
            "--input",
            "case.in",
        ])
        .unwrap();

        assert_eq!(args.workspace, Some(PathBuf::from("/work")));
        assert_eq!(
            args.command().unwrap(),
            &Commands::Create {
                item_type: "Basic".to_string(),
                input: Some(PathBuf::from("case.in")),
            }
        );
    }

    #[test]
    fn test_process_command_defaults() {
        let args = Args::try_parse_from(["itemflow", "process", "3", "Launch", "--wait"]).unwrap();

        match args.command().unwrap() {
            Commands::Process {
                id,
                action,
                wait,
                timeout,
            } => {
                assert_eq!(*id, 3);
                assert_eq!(action, "Launch");
                assert!(*wait);
                assert_eq!(*timeout, 300);
            }
            other => panic!("Expected process command, got {:?}", other),
        }
    }

    #[test]
    fn test_set_requires_values() {
        assert!(Args::try_parse_from(["itemflow", "set", "1"]).is_err());

        let args = Args::try_parse_from(["itemflow", "set", "1", "Title=a b", "Notes="]).unwrap();
        assert!(matches!(
            args.command().unwrap(),
            Commands::Set { values, .. } if values.len() == 2
        ));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::try_parse_from(["itemflow", "list", "--verbose"]).unwrap();
        assert!(args.verbose);
        assert_eq!(args.command().unwrap(), &Commands::List);
    }

    #[test]
    fn test_no_command_error() {
        let args = Args {
            config: None,
            workspace: None,
            verbose: false,
            command: None,
        };
        assert!(args.command().is_err());
    }

    #[test]
    fn test_parse_assignment() {
        assert_eq!(parse_assignment("Title=a=b"), Some(("Title", "a=b")));
        assert_eq!(parse_assignment(" Notes =x"), Some(("Notes", "x")));
        assert_eq!(parse_assignment("=x"), None);
        assert_eq!(parse_assignment("novalue"), None);
    }
}
