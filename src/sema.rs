//! Semantic analysis: the passes between parsing and IR generation.
//!
//! Each pass takes the whole [`crate::front::ast::Program`] by `&mut`,
//! rewrites it in place, and appends to a shared [`crate::common::Diagnostics`].
//! [`validate`] runs them in the fixed order the original source does and
//! stops before the next pass once a pass reports any error, since later
//! passes assume the tree they're handed is well-formed.

pub mod initializers;
pub mod labels;
pub mod lvalue;
pub mod resolve;
pub mod returns;
pub mod symtab;
pub mod typecheck;
pub mod types;

use crate::common::{Counter, Diagnostics};
use crate::front::ast::Program;
use symtab::SymbolTable;
use types::AggregateRegistry;

/// Output of a successful run of every semantic pass: the rewritten program
/// plus the two tables every later stage (IR generation onward) queries by
/// unique name instead of walking the tree again.
pub struct Analysis {
    pub symbols: SymbolTable,
    pub aggregates: AggregateRegistry,
}

/// Run every semantic pass over `program` in order, stopping at the first
/// pass that reports a diagnostic. Returns the symbol table and aggregate
/// registry IR generation needs on success, or the accumulated diagnostics
/// from whichever pass failed.
pub fn validate(program: &mut Program) -> Result<Analysis, Diagnostics> {
    let mut symbols = SymbolTable::new();
    let mut aggregates = AggregateRegistry::new();
    let mut counter = Counter::new();

    let mut diags = Diagnostics::new();
    resolve::resolve(program, &mut symbols, &mut aggregates, &mut counter, &mut diags);
    diags.ok(())?;

    let mut diags = Diagnostics::new();
    typecheck::typecheck(program, &mut symbols, &aggregates, &mut diags);
    diags.ok(())?;

    let mut diags = Diagnostics::new();
    lvalue::check(program, &mut diags);
    diags.ok(())?;

    let mut diags = Diagnostics::new();
    labels::resolve_labels(program, &mut counter, &mut diags);
    diags.ok(())?;

    let mut diags = Diagnostics::new();
    returns::validate_returns(program, &symbols, &mut diags);
    diags.ok(())?;

    let mut diags = Diagnostics::new();
    initializers::normalize(program, &symbols, &aggregates, &mut diags);
    diags.ok(())?;

    Ok(Analysis { symbols, aggregates })
}
