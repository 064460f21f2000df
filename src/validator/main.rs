//! Standalone validator for detection rules files.
//!
//! Checks a rules JSON file for empty entries, duplicates and a missing
//! gift action list before the detector loads it.

use std::process::ExitCode;

use clap::Parser;

use gift_responder::config::DetectionRules;

/// Detection rules validator.
#[derive(Parser, Debug)]
#[command(name = "validate_rules")]
#[command(about = "Validates detection rules files for the gift detector")]
#[command(version)]
struct Args {
    /// Path to the JSON rules file to validate.
    #[arg(short, long, default_value = "rules.json")]
    file: String,

    /// Generate an example rules file at the specified path.
    #[arg(long)]
    generate_example: Option<String>,

    /// List every entry of every list.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Some(output_path) = args.generate_example {
        return generate_example(&output_path);
    }

    validate_rules(&args.file, args.verbose)
}

fn generate_example(output_path: &str) -> ExitCode {
    let example = DetectionRules::example();

    match example.save_to_file(output_path) {
        Ok(()) => {
            println!("✓ Example rules written to: {output_path}");
            println!("\nThe file contains {} entries.", example.len());
            println!("Point RULES_PATH at it to use it with gift_detector.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Failed to write example file: {e}");
            ExitCode::FAILURE
        }
    }
}

fn validate_rules(path: &str, verbose: bool) -> ExitCode {
    println!("Validating: {path}\n");

    let rules = match DetectionRules::load_from_file(path) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("✗ Failed to load rules: {e}");
            return ExitCode::FAILURE;
        }
    };

    for (name, entries) in rules.lists() {
        println!("{name}: {} entries", entries.len());
        if verbose {
            for entry in entries {
                println!("  - \"{}\"", truncate(entry, 40));
            }
        }
    }
    println!("rare_gift_ids: {} entries", rules.rare_gift_ids.len());
    if verbose {
        for id in &rules.rare_gift_ids {
            println!("  - {id}");
        }
    }
    println!();

    let errors: Vec<_> = rules
        .validate_all()
        .into_iter()
        .filter_map(Result::err)
        .collect();

    if errors.is_empty() {
        println!("✓ All {} entries are valid!", rules.len());
        ExitCode::SUCCESS
    } else {
        for e in &errors {
            println!("  ✗ Error: {e}");
        }
        println!("\n✗ Validation failed: {} error(s)", errors.len());
        ExitCode::FAILURE
    }
}

/// Truncates a string for display.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_owned()
    } else {
        format!("{}...", s.chars().take(max_len).collect::<String>())
    }
}
