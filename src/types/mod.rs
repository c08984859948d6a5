//! Core type definitions for octofhir-fhirprofile.
//!
//! - **[`structure_definition`]** - StructureDefinition types consumed by the
//!   schema compiler and the self-consistency checks
//!
//! # Example
//!
//! ```ignore
//! use octofhir_fhirprofile::types::StructureDefinition;
//!
//! let profile: StructureDefinition = serde_json::from_str(json_str)?;
//! for element in profile.elements() {
//!     println!("{} {:?}..{:?}", element.path, element.min, element.max);
//! }
//! ```

pub mod structure_definition;

pub use structure_definition::{
    Binding, Constraint, Discriminator, ElementBase, ElementDefinition, Extension,
    FHIR_STRUCTURE_DEFINITION_BASE, FHIRPATH_SYSTEM_TYPE_PREFIX, REGEX_EXTENSION_URL, Slicing,
    Snapshot, StructureDefinition, TypeRef, TypedValue, is_structure_definition,
    type_code_from_suffix,
};
