//! xsd2logical
//!
//! Command-line front end: converts every complex type of an XSD schema set
//! into FHIR Logical Model spreadsheet artifacts.

use std::path::{Path, PathBuf};
use std::process;

use xsd_logical_model::{
    CollisionPolicy, ConversionReport, GeneratorBuilder, LogicalModelError, SchemaSet,
};

/// Parsed command line
#[derive(Debug, Default)]
struct CliArgs {
    source: Option<PathBuf>,
    dest: Option<PathBuf>,
    fhir_path: Option<PathBuf>,
    templates: Option<PathBuf>,
    overwrite_collisions: bool,
    json: bool,
    verbose: bool,
}

impl CliArgs {
    fn parse(args: &[String]) -> Result<Self, String> {
        let mut parsed = CliArgs::default();
        let mut i = 0;
        while i < args.len() {
            let flag = args[i].as_str();
            match flag {
                "-source" | "-dest" | "-fhirPath" | "--templates" => {
                    let value = args
                        .get(i + 1)
                        .ok_or_else(|| format!("{} requires a value", flag))?;
                    let value = Some(PathBuf::from(value));
                    match flag {
                        "-source" => parsed.source = value,
                        "-dest" => parsed.dest = value,
                        "-fhirPath" => parsed.fhir_path = value,
                        _ => parsed.templates = value,
                    }
                    i += 2;
                }
                "--overwrite-collisions" => {
                    parsed.overwrite_collisions = true;
                    i += 1;
                }
                "--json" => {
                    parsed.json = true;
                    i += 1;
                }
                "--verbose" | "-v" => {
                    parsed.verbose = true;
                    i += 1;
                }
                _ => return Err(format!("Unknown option: {}", flag)),
            }
        }
        Ok(parsed)
    }
}

fn print_usage(program: &str) {
    eprintln!("XSD to FHIR Logical Model Generator");
    eprintln!(
        "\nUsage: {} -source <schema.xsd> -dest <dir> -fhirPath <dir> [options]",
        program
    );
    eprintln!("\nParameters:");
    eprintln!("  -source <file>           Root XSD document (required)");
    eprintln!("  -dest <dir>              Directory receiving the generated artifacts (required, created if missing)");
    eprintln!("  -fhirPath <dir>          Directory of the FHIR build containing the templates (required)");
    eprintln!("\nOptions:");
    eprintln!("  --templates <subpath>    Template directory relative to -fhirPath (default: source/templates)");
    eprintln!("  --overwrite-collisions   Let later types overwrite artifacts of types with the same lowercase name");
    eprintln!("  --json                   Print the conversion report as JSON");
    eprintln!("  --verbose, -v            Enable debug logging");
    eprintln!("\nExample:");
    eprintln!(
        "  {} -source schema/observation.xsd -dest fhir/source/observation -fhirPath fhir",
        program
    );
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("xsd2logical");

    let cli = match CliArgs::parse(args.get(1..).unwrap_or_default()) {
        Ok(cli) => cli,
        Err(message) => {
            eprintln!("Error: {}", message);
            print_usage(program);
            process::exit(1);
        }
    };

    let (source, dest, fhir_path) = match (&cli.source, &cli.dest, &cli.fhir_path) {
        (Some(source), Some(dest), Some(fhir_path)) => (source, dest, fhir_path),
        _ => {
            print_usage(program);
            process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_writer(std::io::stderr)
        .init();

    match run(&cli, source, dest, fhir_path) {
        Ok(report) => {
            if cli.json {
                match serde_json::to_string_pretty(&report) {
                    Ok(json) => println!("{}", json),
                    Err(e) => {
                        eprintln!("Failed to serialize report: {}", e);
                        process::exit(1);
                    }
                }
            } else {
                print_summary(&report);
            }
        }
        Err(e) => {
            handle_error(&e);
            process::exit(1);
        }
    }
}

fn run(
    cli: &CliArgs,
    source: &Path,
    dest: &Path,
    fhir_path: &Path,
) -> Result<ConversionReport, LogicalModelError> {
    // 1. Load the schema set (root document plus everything it references)
    let schemas = SchemaSet::load(source)?;

    // 2. Create the destination directory when missing
    if !dest.exists() {
        std::fs::create_dir_all(dest)?;
        tracing::info!(dest = %dest.display(), "created destination directory");
    }

    // 3. Build and run the generator
    let mut builder = GeneratorBuilder::new()
        .with_source_schema_set(schemas)
        .with_fhir_directory(fhir_path)
        .with_target_directory(dest);
    if let Some(templates) = &cli.templates {
        builder = builder.with_templates_subpath(templates);
    }
    if cli.overwrite_collisions {
        builder = builder.with_collision_policy(CollisionPolicy::OverwriteLastWins);
    }

    builder.build()?.convert()
}

fn print_summary(report: &ConversionReport) {
    for converted in &report.converted {
        println!(
            "{} -> {}",
            converted.name,
            converted.artifacts.spreadsheet.display()
        );
    }
    println!(
        "Generated {} logical model(s) ({} complex type(s) seen, {} duplicate(s) skipped, {} simple type(s) skipped)",
        report.converted.len(),
        report.total_complex_types,
        report.skipped_duplicates,
        report.skipped_non_complex
    );
}

fn handle_error(error: &LogicalModelError) {
    eprintln!("Error: {}", error);

    match error.root_cause() {
        LogicalModelError::Schema { .. } => {
            eprintln!("Please check that the source is a well-formed XML Schema document.");
        }
        LogicalModelError::TemplateCopy { .. } => {
            eprintln!("Please check -fhirPath and the template subpath.");
        }
        LogicalModelError::WorksheetMissing { .. }
        | LogicalModelError::ColumnNotFound { .. }
        | LogicalModelError::MalformedTemplate { .. } => {
            eprintln!("The spreadsheet template does not have the expected 'Data Elements' layout.");
        }
        LogicalModelError::NameCollision { .. } => {
            eprintln!("Rename one of the types or rerun with --overwrite-collisions.");
        }
        LogicalModelError::Config(_) => {
            eprintln!("Please check the command line parameters.");
        }
        _ => {}
    }
}
