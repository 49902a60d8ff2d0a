//! xsd-logical-model - Generate FHIR Logical Model spreadsheets from XML Schema complex types
//!
//! This crate walks the complex types declared in a set of XML Schema (XSD)
//! documents and, for each distinct complex type, instantiates the FHIR
//! "Logical Model" template artifacts (`*-spreadsheet.xml`, `*-introduction.xml`,
//! `*-notes.xml`) and writes the type's identifying row into the
//! `Data Elements` worksheet of the copied spreadsheet.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use xsd_logical_model::{GeneratorBuilder, SchemaSet};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load the root schema and every document it includes or imports
//!     let schemas = SchemaSet::load("schema/observation.xsd")?;
//!
//!     let generator = GeneratorBuilder::new()
//!         .with_source_schema_set(schemas)
//!         .with_fhir_directory("fhir")
//!         .with_target_directory("fhir/source/observation")
//!         .build()?;
//!
//!     // ObservationResult -> observationresult-spreadsheet.xml, ...
//!     let report = generator.convert()?;
//!     for converted in &report.converted {
//!         println!("{} -> {}", converted.name, converted.artifacts.spreadsheet.display());
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Custom Configuration
//!
//! ```rust,no_run
//! use xsd_logical_model::{CollisionPolicy, GeneratorBuilder, SchemaSet};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let generator = GeneratorBuilder::new()
//!         .with_source_schema_set(SchemaSet::load("schema/root.xsd")?)
//!         .with_fhir_directory("fhir")
//!         .with_target_directory("out")
//!         .with_templates_subpath("build/templates")  // Non-default template location
//!         .with_collision_policy(CollisionPolicy::OverwriteLastWins)  // Patient vs PATIENT
//!         .build()?;
//!
//!     generator.convert()?;
//!     Ok(())
//! }
//! ```
//!
//! # Converting Types One by One
//!
//! ```rust,no_run
//! use xsd_logical_model::{GeneratorBuilder, SchemaSet};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let generator = GeneratorBuilder::new()
//!         .with_source_schema_set(SchemaSet::load("schema/root.xsd")?)
//!         .with_fhir_directory("fhir")
//!         .with_target_directory("out")
//!         .build()?;
//!
//!     let mut run = generator.start_run();
//!     for complex in generator.schema_set().complex_types() {
//!         // Types already converted in this run are skipped without side effects
//!         if let Some(converted) = run.convert_type(complex)? {
//!             println!("{}", converted.logical_name);
//!         }
//!     }
//!     let report = run.finish();
//!     println!("{} converted", report.converted.len());
//!
//!     Ok(())
//! }
//! ```

mod api;
mod builder;
mod error;
mod schema;
mod security;
mod template;
mod types;
mod workbook;

// 公開API
pub use api::{CollisionPolicy, HeaderColumn, Stage, TemplateKind};
pub use builder::{
    ConversionReport, ConversionRun, ConvertedType, GeneratorBuilder, LogicalModelGenerator,
};
pub use error::LogicalModelError;
pub use schema::{ComplexType, Schema, SchemaSet, SimpleType, TypeDefinition, TypeId};
pub use template::{logical_model_name, ArtifactPaths, DEFAULT_TEMPLATES_SUBPATH};
pub use workbook::{ColumnIndices, DATA_ELEMENTS_SHEET};
