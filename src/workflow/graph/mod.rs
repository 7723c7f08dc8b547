// SPDX-License-Identifier: MIT

//! Graph model for workflow definitions
//!
//! Turns the flat node/edge definition into the service pool, the forward
//! and backward adjacency maps, the edge parameter map and the start/end
//! node sets.

mod model;

pub use model::{invert, roots, Adjacency, EdgeParamMap, GraphModel, ResolvedService};
