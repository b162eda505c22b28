//! Register catalogs describe what a particular controller firmware exposes at each position of
//! the parameter, calculation and visibility tables.
//!
//! A catalog is plain configuration data and is usually loaded from JSON:
//!
//! ```json
//! {
//!   "calculations": {
//!     "span": 260,
//!     "registers": [
//!       { "id": 15, "name": "Temperatur_TA", "unit": "°C", "class": { "type": "celsius" } }
//!     ]
//!   }
//! }
//! ```
use std::path::{Path, PathBuf};

use crate::register_table::Family;
use crate::registers::Class;

#[derive(thiserror::Error, Debug)]
pub enum CatalogError {
    #[error("could not read the register catalog at {1:?}")]
    Read(#[source] std::io::Error, PathBuf),
    #[error("register catalog is not valid")]
    Json(#[source] serde_json::Error),
    #[error("{family} register id {id} is declared more than once")]
    DuplicateId { family: Family, id: i32 },
    #[error("{family} register `{name}` has negative id {id}")]
    NegativeId { family: Family, id: i32, name: String },
    #[error("{family} register id {id} lies outside the declared span of {span}")]
    OutsideSpan { family: Family, id: i32, span: usize },
    #[error("{family} span of {span} exceeds the {limit} elements a response may carry")]
    SpanTooLarge { family: Family, span: usize, limit: i32 },
    #[error("{family} register id {id} exceeds the {limit} elements a response may carry")]
    IdTooLarge { family: Family, id: i32, limit: i32 },
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Definition {
    pub id: i32,
    pub name: String,
    #[serde(default)]
    pub unit: String,
    pub class: Class,
    /// Smallest raw value accepted for writes.
    #[serde(default)]
    pub minimum: Option<i32>,
    /// Largest raw value accepted for writes.
    #[serde(default)]
    pub maximum: Option<i32>,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FamilyCatalog {
    /// Number of elements the controller sends for this family.
    ///
    /// Defaults to one past the highest declared id.
    #[serde(default)]
    pub span: Option<usize>,
    #[serde(default)]
    pub registers: Vec<Definition>,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Catalog {
    #[serde(default)]
    pub parameters: FamilyCatalog,
    #[serde(default)]
    pub calculations: FamilyCatalog,
    #[serde(default)]
    pub visibilities: FamilyCatalog,
}

impl Catalog {
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        serde_json::from_str(json).map_err(CatalogError::Json)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| CatalogError::Read(e, path.to_path_buf()))?;
        Self::from_json(&json)
    }

    pub fn family(&self, family: Family) -> &FamilyCatalog {
        match family {
            Family::Parameters => &self.parameters,
            Family::Calculations => &self.calculations,
            Family::Visibilities => &self.visibilities,
        }
    }
}
