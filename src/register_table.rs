use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use crate::catalog::{Catalog, CatalogError, FamilyCatalog};
use crate::protocol::{CommandCode, ElementWidth, MAX_ELEMENTS};
use crate::registers::Register;

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    clap::ValueEnum,
)]
#[strum(serialize_all = "kebab-case")]
pub enum Family {
    Parameters,
    Calculations,
    Visibilities,
}

impl Family {
    pub const fn read_command(self) -> CommandCode {
        match self {
            Family::Parameters => CommandCode::ParametersRead,
            Family::Calculations => CommandCode::CalculationsRead,
            Family::Visibilities => CommandCode::VisibilitiesRead,
        }
    }

    pub const fn element_width(self) -> ElementWidth {
        match self {
            Family::Visibilities => ElementWidth::Flag,
            Family::Parameters | Family::Calculations => ElementWidth::Word,
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum TableError {
    #[error("{family} response carries {received} values but the table spans {expected}")]
    LengthMismatch { family: Family, expected: usize, received: usize },
    #[error("{family} response position {position} has no register")]
    UnknownId { family: Family, position: usize },
}

/// All registers of one family, keyed and ordered by id.
///
/// Membership is fixed at construction. Positions inside the family's span that the catalog does
/// not describe are filled with [`crate::Class::Unknown`] registers, so that the table always
/// covers the entire payload of a read.
#[derive(Clone, Debug)]
pub struct RegisterTable {
    family: Family,
    registers: BTreeMap<i32, Register>,
}

impl RegisterTable {
    pub fn new(family: Family, catalog: &FamilyCatalog) -> Result<Self, CatalogError> {
        if let Some(span) = catalog.span {
            if span > MAX_ELEMENTS as usize {
                return Err(CatalogError::SpanTooLarge { family, span, limit: MAX_ELEMENTS });
            }
        }
        let mut registers = BTreeMap::new();
        for definition in &catalog.registers {
            let id = definition.id;
            let Ok(position) = usize::try_from(id) else {
                let name = definition.name.clone();
                return Err(CatalogError::NegativeId { family, id, name });
            };
            if id >= MAX_ELEMENTS {
                return Err(CatalogError::IdTooLarge { family, id, limit: MAX_ELEMENTS });
            }
            if let Some(span) = catalog.span {
                if position >= span {
                    return Err(CatalogError::OutsideSpan { family, id, span });
                }
            }
            match registers.entry(id) {
                Entry::Occupied(_) => return Err(CatalogError::DuplicateId { family, id }),
                Entry::Vacant(slot) => {
                    slot.insert(Register::new(definition.clone()));
                }
            }
        }
        let span = catalog.span.unwrap_or_else(|| {
            let last = registers.last_key_value().map(|(&id, _)| usize::try_from(id));
            last.map_or(0, |position| position.map_or(0, |p| p + 1))
        });
        // Both the span and every id are below MAX_ELEMENTS at this point.
        for id in (0..MAX_ELEMENTS).take(span) {
            registers.entry(id).or_insert_with(|| Register::unknown(id));
        }
        Ok(Self { family, registers })
    }

    pub fn for_family(family: Family, catalog: &Catalog) -> Result<Self, CatalogError> {
        Self::new(family, catalog.family(family))
    }

    pub fn parameters(catalog: &Catalog) -> Result<Self, CatalogError> {
        Self::for_family(Family::Parameters, catalog)
    }

    pub fn calculations(catalog: &Catalog) -> Result<Self, CatalogError> {
        Self::for_family(Family::Calculations, catalog)
    }

    pub fn visibilities(catalog: &Catalog) -> Result<Self, CatalogError> {
        Self::for_family(Family::Visibilities, catalog)
    }

    pub fn family(&self) -> Family {
        self.family
    }

    /// Number of elements a read response must carry.
    pub fn span(&self) -> usize {
        self.registers.len()
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    pub fn get(&self, id: i32) -> Option<&Register> {
        self.registers.get(&id)
    }

    pub fn by_name(&self, name: &str) -> Option<&Register> {
        self.registers.values().find(|r| r.name() == name)
    }

    /// Assign `values` positionally: the value at position `i` goes to the register with id `i`.
    ///
    /// Either every register is updated or, on error, none is.
    pub fn set_raw_values(&mut self, values: &[i32]) -> Result<(), TableError> {
        let family = self.family;
        if values.len() != self.registers.len() {
            return Err(TableError::LengthMismatch {
                family,
                expected: self.registers.len(),
                received: values.len(),
            });
        }
        let mut ids = self.registers.keys().copied();
        if let Some(position) = (0..values.len()).find(|&p| ids.next() != Some(p as i32)) {
            return Err(TableError::UnknownId { family, position });
        }
        for (register, &value) in self.registers.values_mut().zip(values) {
            register.store(value);
        }
        Ok(())
    }

    /// Registers in ascending id order. Call again to restart the traversal.
    pub fn iter_sorted(&self) -> impl Iterator<Item = &Register> {
        self.registers.values()
    }

    /// Registers whose last read changed their raw value.
    pub fn changed(&self) -> impl Iterator<Item = &Register> {
        self.iter_sorted().filter(|r| r.has_changes())
    }
}
