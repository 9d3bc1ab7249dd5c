pub mod cost;
pub mod draft;
pub mod extract;
pub mod generator;
pub mod llm;
pub mod passes;
pub mod retry;
pub mod setup;
pub mod shape;
pub mod workflow;
