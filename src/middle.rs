//! The three-address intermediate representation that sits between the
//! typed AST ([`crate::front`]) and instruction selection ([`crate::back`]).

pub mod tir;
pub use tir::*;
