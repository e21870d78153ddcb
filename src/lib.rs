//! Actuation kernel: a kernel integrity substrate for agent governance.
//!
//! Decides whether an externally proposed action may produce a real side
//! effect, and proves after the fact that no proposal bypassed that decision.
//! Proposals go through commit, anchor and reveal ([`acv`]); the kernel
//! rebuilds the action itself ([`recomposer`]), binds it with a
//! non-exportable secret ([`authority`]) and records every decision in a
//! hash chain ([`audit`]) that the [`probe`] engine analyses afterwards.
//!
//! See `DESIGN.md` for the architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod budget;
pub mod canonical;
pub mod config;
pub mod logging;

pub mod acv;
pub mod authority;
pub mod recomposer;
pub mod types;

pub mod audit;
pub mod kernel;
pub mod probe;

pub mod actuator;
pub mod demo;
