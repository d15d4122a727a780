//! # Source Validation Suite
//!
//! External-facing checks over `.rac` sources, reported as a flat list of
//! violations rather than hard failures so authoring tools can show all
//! problems at once.
//!
//! Three families of rules:
//! - structural: files parse, no duplicate variable declarations,
//!   temporal intervals are ordered
//! - reference: amendment targets and `/`-path references resolve to a
//!   declaration somewhere in the file set
//! - convention: integer literals of a thousand or more carry `_`
//!   separators (`12_500`, not `12500`); years and dates are exempt

use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

use crate::ast::Module;
use crate::compiler::find_deps;
use crate::parser;

/// Validation rule identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationRule {
    Syntax,
    DuplicateDeclaration,
    UnknownAmendTarget,
    UnresolvedReference,
    TemporalOrder,
    ThousandsSeparator,
}

impl fmt::Display for ValidationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValidationRule::Syntax => "syntax",
            ValidationRule::DuplicateDeclaration => "duplicate-declaration",
            ValidationRule::UnknownAmendTarget => "unknown-amend-target",
            ValidationRule::UnresolvedReference => "unresolved-reference",
            ValidationRule::TemporalOrder => "temporal-order",
            ValidationRule::ThousandsSeparator => "thousands-separator",
        };
        f.write_str(name)
    }
}

/// A single rule violation with its source location.
#[derive(Debug, Clone)]
pub struct Violation {
    pub file: String,
    /// 1-based line, or 0 when the violation has no single line.
    pub line: usize,
    pub rule: ValidationRule,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}: [{}] {}",
            self.file, self.line, self.rule, self.message
        )
    }
}

/// Validate a single source.
pub fn validate_source(file: &str, text: &str) -> Vec<Violation> {
    validate_sources(&[(file, text)])
}

/// Validate a set of sources together. Cross-file rules (duplicates,
/// references) see the whole set.
pub fn validate_sources(sources: &[(&str, &str)]) -> Vec<Violation> {
    let mut violations = Vec::new();
    let mut parsed: Vec<(&str, &str, Module)> = Vec::new();

    for (file, text) in sources {
        match parser::parse(text) {
            Ok(module) => parsed.push((*file, *text, module)),
            Err(err) => violations.push(Violation {
                file: file.to_string(),
                line: err.line,
                rule: ValidationRule::Syntax,
                message: err.message,
            }),
        }
        check_thousands_separators(file, text, &mut violations);
    }

    let mut declared: HashSet<&str> = HashSet::new();
    for (file, text, module) in &parsed {
        for decl in &module.variables {
            if !declared.insert(decl.path.as_str()) {
                violations.push(Violation {
                    file: file.to_string(),
                    line: find_line(text, &format!("variable {}", decl.path)),
                    rule: ValidationRule::DuplicateDeclaration,
                    message: format!("variable '{}' is declared more than once", decl.path),
                });
            }
        }
    }

    for (file, text, module) in &parsed {
        check_references(file, text, module, &declared, &mut violations);
        check_temporal_order(file, text, module, &mut violations);
    }

    violations
}

fn check_references(
    file: &str,
    text: &str,
    module: &Module,
    declared: &HashSet<&str>,
    violations: &mut Vec<Violation>,
) {
    for amendment in &module.amendments {
        if !declared.contains(amendment.target.as_str()) {
            violations.push(Violation {
                file: file.to_string(),
                line: find_line(text, &format!("amend {}", amendment.target)),
                rule: ValidationRule::UnknownAmendTarget,
                message: format!("amendment targets undeclared variable '{}'", amendment.target),
            });
        }
    }

    let mut reported: HashSet<String> = HashSet::new();
    let temporal_exprs = module
        .variables
        .iter()
        .flat_map(|v| v.values.iter())
        .chain(module.amendments.iter().flat_map(|a| a.values.iter()));
    for tv in temporal_exprs {
        for dep in find_deps(&tv.expr) {
            if !declared.contains(dep.as_str()) && reported.insert(dep.clone()) {
                violations.push(Violation {
                    file: file.to_string(),
                    line: find_line(text, &dep),
                    rule: ValidationRule::UnresolvedReference,
                    message: format!("reference to undeclared variable '{}'", dep),
                });
            }
        }
    }
}

fn check_temporal_order(file: &str, text: &str, module: &Module, violations: &mut Vec<Violation>) {
    let decls = module
        .variables
        .iter()
        .map(|v| (v.path.as_str(), &v.values))
        .chain(module.amendments.iter().map(|a| (a.target.as_str(), &a.values)));
    for (path, values) in decls {
        for tv in values.iter() {
            if let Some(end) = tv.end {
                if end < tv.start {
                    violations.push(Violation {
                        file: file.to_string(),
                        line: find_line(text, &tv.start.to_string()),
                        rule: ValidationRule::TemporalOrder,
                        message: format!(
                            "'{}': interval ends {} before it starts {}",
                            path, end, tv.start
                        ),
                    });
                }
            }
        }
    }
}

/// Integer literals >= 1000 should use `_` separators. Years (1900-2100)
/// and anything on a line carrying a date literal are exempt, as are
/// floats.
fn check_thousands_separators(file: &str, text: &str, violations: &mut Vec<Violation>) {
    static NUMBER: OnceLock<Regex> = OnceLock::new();
    static DATE: OnceLock<Regex> = OnceLock::new();
    let number =
        NUMBER.get_or_init(|| Regex::new(r"[0-9][0-9_]*(\.[0-9_]+)?").expect("valid regex"));
    let date = DATE.get_or_init(|| Regex::new(r"\d{4}-\d{2}-\d{2}").expect("valid regex"));

    for (i, raw_line) in text.lines().enumerate() {
        let line = raw_line.split('#').next().unwrap_or_default();
        // temporal headers put dates and values on one line, so dates are
        // masked out rather than exempting the whole line
        let masked = date.replace_all(line, "          ");
        let line = masked.as_ref();

        for m in number.find_iter(line) {
            let token = m.as_str();
            if token.contains('.') || token.contains('_') {
                continue;
            }
            // numbers embedded in identifiers are not literals
            let before = line[..m.start()].chars().next_back();
            let after = line[m.end()..].chars().next();
            if before.is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '.') {
                continue;
            }
            if after.is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '.') {
                continue;
            }

            let Ok(value) = token.parse::<i64>() else {
                continue;
            };
            if (1900..=2100).contains(&value) || value < 1000 {
                continue;
            }
            violations.push(Violation {
                file: file.to_string(),
                line: i + 1,
                rule: ValidationRule::ThousandsSeparator,
                message: format!("{} should use a separator ({})", token, with_separators(value)),
            });
        }
    }
}

fn with_separators(value: i64) -> String {
    let digits = value.to_string();
    let mut out = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push('_');
        }
        out.push(c);
    }
    out
}

/// 1-based line of the first occurrence of `needle`, or 0.
fn find_line(text: &str, needle: &str) -> usize {
    text.lines()
        .position(|line| line.contains(needle))
        .map_or(0, |i| i + 1)
}
