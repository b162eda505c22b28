//! Client for the binary TCP protocol spoken by Luxtronik heat pump controllers.
//!
//! The controller exposes three tables of 32-bit registers: parameters (settings, writable),
//! calculations (measurements and state) and visibilities (which parameters apply to the
//! installation). A [`Catalog`] describes what each position means; a [`RegisterTable`] holds the
//! values of one table; a [`Client`] moves them over the wire.

pub mod catalog;
pub mod client;
pub mod commands;
pub mod connection;
pub mod output;
pub mod protocol;
pub mod register_table;
pub mod registers;

pub use catalog::{Catalog, CatalogError, Definition, FamilyCatalog};
pub use client::{Client, ExchangeLock, Options, SafeMode};
pub use connection::{ConnectCallback, Endpoint, Error};
pub use protocol::{CommandCode, DEFAULT_PORT};
pub use register_table::{Family, RegisterTable, TableError};
pub use registers::{Choice, Class, ConversionError, Register, Value, Version};
