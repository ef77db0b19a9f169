//! hucasm, a multi-pass cross-assembler for the HuC6280, 65C02 and 6502.
//!
//! The [`asm`] module runs the passes; [`syn`] splits and lexes source lines
//! for it, [`isa`] knows the opcode tables, and [`rom`] holds the resulting
//! banks.
//!
//! [`asm`]: asm/index.html
//! [`syn`]: syn/index.html
//! [`isa`]: isa/index.html
//! [`rom`]: rom/index.html

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod asm;
pub mod config;
pub mod error;
pub mod int;
pub mod isa;
pub mod listing;
pub mod rom;
pub mod syn;
