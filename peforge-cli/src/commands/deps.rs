use anyhow::Result;
use peforge::{analyze_dependencies, DependencyAnalysis, DependencyNode};

use crate::{app::Cli, output::print_output};

pub fn run(cli: &Cli) -> Result<()> {
    let analysis = analyze_dependencies(&cli.file, cli.analysis.max_depth)?;

    print_output(&analysis, &cli.global, |analysis| {
        if cli.analysis.flat {
            display_flat(analysis);
        } else {
            display_tree(analysis);
        }
    })
}

fn display_flat(analysis: &DependencyAnalysis) {
    println!("\nDependencies ({} unique):", analysis.total_count());
    for (name, path) in &analysis.resolved {
        match path {
            Some(path) => println!("  {name}  ->  {}", path.display()),
            None => println!("  {name}  (system)"),
        }
    }

    display_summary(analysis);
}

fn display_tree(analysis: &DependencyAnalysis) {
    println!("\nDependency tree:");
    display_node(&analysis.root, "", "");
    display_summary(analysis);
}

fn display_node(node: &DependencyNode, connector: &str, child_prefix: &str) {
    let marker = if !node.found {
        "  [MISSING]"
    } else if node.system {
        "  (system)"
    } else {
        ""
    };
    println!("{connector}{}{marker}", node.name);

    for (index, child) in node.children.iter().enumerate() {
        let last = index + 1 == node.children.len();
        let branch = if last { "└─ " } else { "├─ " };
        let continuation = if last { "   " } else { "│  " };
        display_node(
            child,
            &format!("{child_prefix}{branch}"),
            &format!("{child_prefix}{continuation}"),
        );
    }
}

fn display_summary(analysis: &DependencyAnalysis) {
    if !analysis.missing.is_empty() {
        println!("\nMissing dependencies:");
        for name in &analysis.missing {
            println!("  {name}");
        }
    }
    if analysis.has_cycles {
        println!("\nNote: dependency cycle detected.");
    }
    println!(
        "\n{} unique dependencies, max depth {}.",
        analysis.total_count(),
        analysis.max_depth
    );
}
