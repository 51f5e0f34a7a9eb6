pub mod graphs;
pub mod runs;
