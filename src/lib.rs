//! Two LC-3 virtual machines exchanging words over a lock-free ring buffer.
//!
//! This crate consists of:
//! - an LC-3 [parser](parse) and [assembler](asm), which produce program images,
//! - a [simulator](sim) which executes them, extended with two message traps
//!     (`SEND`, `TRAP x30`, and `RECV`, `TRAP x31`),
//! - a bounded single-producer/single-consumer [ring buffer](ring), which carries those messages,
//! - a [harness] which runs a producer VM and a consumer VM on two threads against one ring.
//!
//! # Usage
//!
//! To convert LC-3 source code to an object file, it must be parsed and assembled:
//! ```
//! use lc3_bus::parse::parse_ast;
//! use lc3_bus::asm::{assemble, ObjectFile};
//!
//! let code = "
//!     .orig x3000
//!     AND R0, R0, #0
//!     ADD R0, R0, #7
//!     SEND
//!     HALT
//!     .end
//! ";
//! let ast = parse_ast(code).unwrap();
//! let obj_file: ObjectFile = assemble(ast).unwrap();
//! ```
//!
//! Once an object file has been created, it can be executed with the simulator:
//! ```
//! # use lc3_bus::parse::parse_ast;
//! # use lc3_bus::asm::assemble;
//! #
//! # let code = ".orig x3000\nHALT\n.end";
//! # let obj_file = assemble(parse_ast(code).unwrap()).unwrap();
//! #
//! use lc3_bus::sim::Simulator;
//!
//! let mut simulator = Simulator::new(Default::default());
//! simulator.load_obj_file(&obj_file);
//! simulator.run().unwrap(); // <-- Result can be handled accordingly
//! ```
//!
//! To run two programs against each other, see the [`harness`] module.
#![warn(missing_docs)]

pub mod parse;
pub mod ast;
pub mod asm;
pub mod sim;
pub mod ring;
pub mod harness;
pub mod config;
pub mod err;
