//! Suitegen CLI - Generate a test suite for a synthetic unit.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use suitegen::{
    GeneticAlgorithm, GoalRegistry, SearchConfig, SyntheticUnit, evolution::ProgressCallback,
    schema::SearchProgress,
};

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <unit.json> [config.json] [result.json]", args[0]);
        eprintln!();
        eprintln!("Evolve a branch-covering test suite for a synthetic unit.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  unit.json    Path to the unit description, or --example for the built-in one");
        eprintln!("  config.json  Path to search configuration (default: built-in defaults)");
        eprintln!("  result.json  Where to write the result (default: not written)");
        eprintln!();
        eprintln!("Print the default configuration with --print-config.");
        std::process::exit(1);
    }

    if args[1] == "--print-config" {
        print_default_config();
        return;
    }

    let unit = if args[1] == "--example" {
        SyntheticUnit::example()
    } else {
        SyntheticUnit::load(&args[1])
    }
    .unwrap_or_else(|e| {
        eprintln!("Error loading unit: {}", e);
        std::process::exit(1);
    });

    let config = match args.get(2) {
        Some(path) => SearchConfig::load(path).unwrap_or_else(|e| {
            eprintln!("Error loading config: {}", e);
            std::process::exit(1);
        }),
        None => SearchConfig::default(),
    };
    let output = args.get(3).map(PathBuf::from);

    let mut registry = GoalRegistry::new();
    let executor = unit.register(&mut registry).unwrap_or_else(|e| {
        eprintln!("Error registering unit: {}", e);
        std::process::exit(1);
    });

    println!("Suitegen");
    println!("========");
    println!("Unit: {} ({} methods)", unit.class_name, unit.methods.len());
    println!(
        "Goals: {} ({} branches, {} branchless methods)",
        registry.total_goals(),
        registry.scored_branch_count(),
        registry.branchless_method_count()
    );
    println!(
        "Population: {} (elite {})",
        config.population.size, config.population.elite
    );
    println!();

    let mut search = GeneticAlgorithm::new(
        config,
        registry,
        unit.test_cluster(),
        Arc::new(executor),
    )
    .unwrap_or_else(|e| {
        eprintln!("Error creating search: {}", e);
        std::process::exit(1);
    });

    let report: ProgressCallback = Box::new(|progress: &SearchProgress| {
        if progress.generation % 10 == 0 {
            println!(
                "  Generation {}: fitness={:.4}, coverage={:.1}%, {}/{} goals",
                progress.generation,
                progress.best_fitness,
                progress.best_coverage * 100.0,
                progress.covered_goals,
                progress.total_goals
            );
        }
    });

    println!("Running search...");
    let result = search.run_with_callback(report).unwrap_or_else(|e| {
        eprintln!("Search failed: {}", e);
        std::process::exit(1);
    });

    let stats = &result.stats;
    println!();
    println!("Result:");
    println!("  Stopped: {:?}", stats.stop_reason);
    println!("  Generations: {}", stats.generations);
    println!("  Fitness evaluations: {}", stats.fitness_evaluations);
    println!("  Best fitness: {:.4}", stats.best_fitness);
    println!(
        "  Coverage: {:.1}% ({}/{} goals)",
        stats.coverage * 100.0,
        stats.covered_goals,
        stats.total_goals
    );
    println!("  Tests: {}", result.tests.len());
    for goal in &result.uncovered_goals {
        println!("  Uncovered: {}", goal);
    }
    println!("Time: {:.2}s", stats.elapsed_seconds);

    if let Some(path) = output {
        let json = serde_json::to_string_pretty(&result).unwrap_or_else(|e| {
            eprintln!("Error serializing result: {}", e);
            std::process::exit(1);
        });
        if let Err(e) = fs::write(&path, json) {
            eprintln!("Error writing {}: {}", path.display(), e);
            std::process::exit(1);
        }
        println!("Wrote {}", path.display());
    }
}

fn print_default_config() {
    match serde_json::to_string_pretty(&SearchConfig::default()) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error serializing config: {}", e);
            std::process::exit(1);
        }
    }
}
