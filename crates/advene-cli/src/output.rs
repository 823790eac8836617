//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use std::collections::BTreeMap;

use serde::Serialize;

use advene_core::backend::{Reference, ReferenceRole};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// One import of a package, as shown by `info`
#[derive(Debug, Serialize)]
pub struct ImportSummary {
    pub name: String,
    pub url: String,
    pub uri: String,
    pub loaded: bool,
}

/// What `info` shows about a package
#[derive(Debug, Serialize)]
pub struct PackageInfo {
    pub url: String,
    pub uri: String,
    pub imports: Vec<ImportSummary>,
    /// Element counts per kind, own elements only
    pub own: BTreeMap<&'static str, usize>,
    /// Element counts per kind, imports included
    pub all: BTreeMap<&'static str, usize>,
}

/// One element line of `ls`
#[derive(Debug, Serialize)]
pub struct ElementSummary {
    /// Id-ref from the listed package's viewpoint
    pub id: String,
    pub kind: &'static str,
    pub detail: String,
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    /// Print a package overview
    pub fn print_package(&self, info: &PackageInfo) {
        match self.format {
            OutputFormat::Human => {
                println!("URL:      {}", info.url);
                println!(
                    "URI:      {}",
                    if info.uri.is_empty() { "(not set)" } else { &info.uri }
                );
                if !info.imports.is_empty() {
                    println!();
                    println!("── Imports ({}) ──", info.imports.len());
                    for import in &info.imports {
                        let marker = if import.loaded { "" } else { " (unreachable)" };
                        println!("{} | {}{}", import.name, truncate(&import.url, 60), marker);
                    }
                }
                println!();
                println!("{:<12} {:>6} {:>6}", "kind", "own", "all");
                for (kind, own) in &info.own {
                    let all = info.all.get(kind).copied().unwrap_or(0);
                    println!("{:<12} {:>6} {:>6}", kind, own, all);
                }
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(info).unwrap());
            }
            OutputFormat::Quiet => {
                println!("{}", info.url);
            }
        }
    }

    /// Print a list of elements
    pub fn print_elements(&self, elements: &[ElementSummary]) {
        match self.format {
            OutputFormat::Human => {
                if elements.is_empty() {
                    println!("No elements found.");
                    return;
                }
                for element in elements {
                    println!(
                        "{:<10} | {} | {}",
                        element.kind,
                        truncate(&element.id, 35),
                        truncate(&element.detail, 45)
                    );
                }
                println!("\n{} element(s)", elements.len());
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(elements).unwrap());
            }
            OutputFormat::Quiet => {
                for element in elements {
                    println!("{}", element.id);
                }
            }
        }
    }

    /// Print the references to an element
    pub fn print_references(&self, target: &str, references: &[Reference]) {
        match self.format {
            OutputFormat::Human => {
                if references.is_empty() {
                    println!("Nothing references {}.", target);
                    return;
                }
                for reference in references {
                    let element = if reference.element.is_empty() {
                        "(package)"
                    } else {
                        &reference.element
                    };
                    println!(
                        "{} | {} | {}",
                        reference.package,
                        element,
                        role_label(&reference.role)
                    );
                }
                println!("\n{} reference(s)", references.len());
            }
            OutputFormat::Json => {
                let json_refs: Vec<_> = references
                    .iter()
                    .map(|r| {
                        serde_json::json!({
                            "package": r.package,
                            "element": r.element,
                            "role": role_label(&r.role),
                            "target": r.target
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&json_refs).unwrap());
            }
            OutputFormat::Quiet => {
                for reference in references {
                    println!("{}", reference.element);
                }
            }
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

/// Short label for the role a referencing row plays
pub fn role_label(role: &ReferenceRole) -> String {
    match role {
        ReferenceRole::Media => "media".to_string(),
        ReferenceRole::ContentModel => "content model".to_string(),
        ReferenceRole::Member(i) => format!("member #{}", i),
        ReferenceRole::Item(i) => format!("item #{}", i),
        ReferenceRole::Tag(element) => format!("tag of {}", element),
        ReferenceRole::Tagged(tag) => format!("tagged {}", tag),
        ReferenceRole::Meta(key) => format!("meta {}", key),
    }
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{}...", kept)
    }
}
