//! World-space bookkeeping: the generation domain, the screen mapping and
//! spatial partitioning.

pub mod grid;
pub mod viewport;
