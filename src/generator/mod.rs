pub mod context;
pub mod graph;
pub mod nodes;
pub mod prompts;
pub mod report;
pub mod state;
pub mod workflow;

#[cfg(test)]
pub(crate) mod test_support;
